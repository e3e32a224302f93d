//! Work-queue fan-out over N workers, each owning one reusable session.
//!
//! Tasks and one stop sentinel per worker are queued up front. Workers pull
//! from the shared queue, retry a failing task after resetting their session,
//! and report every task exactly once, with `output: None` when the retry
//! budget runs out. Results arrive in completion order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::fetch::{FetchError, PageFetch};

/// Opens and closes the expensive per-worker resource.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Send + 'static;

    async fn open(&self) -> anyhow::Result<Self::Session>;

    async fn close(&self, session: Self::Session) {
        drop(session);
    }
}

#[async_trait]
pub trait TaskHandler<S: Send>: Send + Sync + 'static {
    type Task: fmt::Debug + Send + Sync + 'static;
    type Output: Send + 'static;

    async fn run(&self, session: &mut S, task: &Self::Task) -> anyhow::Result<Self::Output>;
}

/// Retry budget per task and the wait after a transient fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following failed attempt `attempt` (0-based).
    /// Throttled or unavailable pages back off exponentially up to `max_delay`;
    /// any other failure is retried on the fresh session right away.
    pub fn pause_after(&self, attempt: usize, err: &anyhow::Error) -> Duration {
        let transient = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<FetchError>())
            .is_some_and(FetchError::is_transient);
        if !transient {
            return Duration::ZERO;
        }
        let factor = u32::try_from(attempt)
            .ok()
            .and_then(|shift| 1u32.checked_shl(shift))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Pause before every attempt.
    pub delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            retry: RetryPolicy::default(),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskResult<K, O> {
    pub key: K,
    pub output: Option<O>,
    pub attempts: usize,
}

enum Job<K, T> {
    Run { key: K, task: T },
    Stop,
}

type SharedQueue<K, T> = Arc<Mutex<UnboundedReceiver<Job<K, T>>>>;

/// Handle over a running pool; yields results as workers finish tasks.
pub struct FanOut<K, O> {
    results: UnboundedReceiver<TaskResult<K, O>>,
    workers: Vec<JoinHandle<()>>,
    expected: usize,
    received: usize,
}

impl<K, O> FanOut<K, O>
where
    K: Send + 'static,
    O: Send + 'static,
{
    pub fn spawn<F, H>(
        factory: Arc<F>,
        handler: Arc<H>,
        tasks: Vec<(K, H::Task)>,
        config: PoolConfig,
    ) -> Self
    where
        F: SessionFactory,
        H: TaskHandler<F::Session, Output = O>,
    {
        let worker_count = config.workers.max(1);
        let expected = tasks.len();

        let (task_tx, task_rx) = mpsc::unbounded_channel();
        for (key, task) in tasks {
            let _ = task_tx.send(Job::Run { key, task });
        }
        for _ in 0..worker_count {
            let _ = task_tx.send(Job::Stop);
        }
        drop(task_tx);

        let queue: SharedQueue<K, H::Task> = Arc::new(Mutex::new(task_rx));
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&factory),
                    Arc::clone(&handler),
                    Arc::clone(&queue),
                    result_tx.clone(),
                    config,
                ))
            })
            .collect();

        Self {
            results: result_rx,
            workers,
            expected,
            received: 0,
        }
    }

    /// Next completed task, or `None` once every task has been reported.
    pub async fn next(&mut self) -> Option<TaskResult<K, O>> {
        if self.received >= self.expected {
            return None;
        }
        let result = self.results.recv().await?;
        self.received += 1;
        Some(result)
    }

    pub fn total(&self) -> usize {
        self.expected
    }

    pub fn remaining(&self) -> usize {
        self.expected - self.received
    }

    /// Wait for every worker to observe its stop sentinel and exit.
    pub async fn finish(self) -> anyhow::Result<()> {
        drop(self.results);
        for handle in self.workers {
            handle.await.context("pool worker panicked")?;
        }
        Ok(())
    }
}

async fn open_session<F: SessionFactory>(factory: &F, worker_id: usize) -> Option<F::Session> {
    match factory.open().await {
        Ok(session) => Some(session),
        Err(err) => {
            warn!(worker_id, error = %err, "failed to open session");
            None
        }
    }
}

async fn worker_loop<F, H, K>(
    worker_id: usize,
    factory: Arc<F>,
    handler: Arc<H>,
    queue: SharedQueue<K, H::Task>,
    results: UnboundedSender<TaskResult<K, H::Output>>,
    config: PoolConfig,
) where
    F: SessionFactory,
    H: TaskHandler<F::Session>,
    K: Send + 'static,
{
    let mut session = open_session(factory.as_ref(), worker_id).await;

    loop {
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let (key, task) = match job {
            Some(Job::Run { key, task }) => (key, task),
            Some(Job::Stop) | None => break,
        };

        let mut output = None;
        let mut attempts = 0;
        for attempt in 0..=config.retry.max_retries {
            attempts = attempt + 1;
            if !config.delay.is_zero() {
                tokio::time::sleep(config.delay).await;
            }
            if session.is_none() {
                session = open_session(factory.as_ref(), worker_id).await;
            }
            let Some(active) = session.as_mut() else {
                continue;
            };

            match handler.run(active, &task).await {
                Ok(value) => {
                    output = Some(value);
                    break;
                }
                Err(err) => {
                    warn!(worker_id, attempt = attempts, ?task, error = %err, "task attempt failed");
                    if let Some(old) = session.take() {
                        factory.close(old).await;
                    }
                    session = open_session(factory.as_ref(), worker_id).await;
                    if attempt < config.retry.max_retries {
                        let pause = config.retry.pause_after(attempt, &err);
                        if !pause.is_zero() {
                            debug!(worker_id, ?pause, "backing off");
                            tokio::time::sleep(pause).await;
                        }
                    }
                }
            }
        }

        if output.is_none() {
            error!(worker_id, attempts, ?task, "task failed, giving up");
        }
        if results.send(TaskResult { key, output, attempts }).is_err() {
            break;
        }
    }

    if let Some(active) = session.take() {
        factory.close(active).await;
    }
    debug!(worker_id, "worker stopped");
}

/// Fetches each URL's page body; the task key is the URL itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchPageHandler;

#[async_trait]
impl<S> TaskHandler<S> for FetchPageHandler
where
    S: PageFetch + Send + 'static,
{
    type Task = String;
    type Output = String;

    async fn run(&self, session: &mut S, url: &String) -> anyhow::Result<String> {
        Ok(session.fetch_page(url).await?)
    }
}

pub fn fetch_pages<F>(factory: Arc<F>, urls: Vec<String>, config: PoolConfig) -> FanOut<String, String>
where
    F: SessionFactory,
    F::Session: PageFetch,
{
    let tasks = urls.into_iter().map(|url| (url.clone(), url)).collect();
    FanOut::spawn(factory, Arc::new(FetchPageHandler), tasks, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::fetch::FetchError;

    #[derive(Default)]
    struct CountingFactory {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    struct CountingSession {
        serial: usize,
    }

    #[async_trait]
    impl SessionFactory for CountingFactory {
        type Session = CountingSession;

        async fn open(&self) -> anyhow::Result<CountingSession> {
            let serial = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(CountingSession { serial })
        }

        async fn close(&self, _session: CountingSession) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Fails `"bad"` forever and `"flaky"` on its first two attempts.
    #[derive(Default)]
    struct ScriptedHandler {
        flaky_attempts: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler<CountingSession> for ScriptedHandler {
        type Task = String;
        type Output = (String, usize);

        async fn run(
            &self,
            session: &mut CountingSession,
            task: &String,
        ) -> anyhow::Result<(String, usize)> {
            match task.as_str() {
                "bad" => anyhow::bail!("page layout changed"),
                "flaky" if self.flaky_attempts.fetch_add(1, Ordering::SeqCst) < 2 => {
                    anyhow::bail!("connection reset")
                }
                _ => Ok((task.to_uppercase(), session.serial)),
            }
        }
    }

    fn tasks(names: &[&str]) -> Vec<(usize, String)> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| (i, name.to_string()))
            .collect()
    }

    async fn drain<K: Send + 'static, O: Send + 'static>(
        mut pool: FanOut<K, O>,
    ) -> Vec<TaskResult<K, O>> {
        let mut out = Vec::new();
        while let Some(result) = pool.next().await {
            out.push(result);
        }
        pool.finish().await.expect("workers join");
        out
    }

    #[tokio::test]
    async fn every_task_is_reported_once() {
        let factory = Arc::new(CountingFactory::default());
        let pool = FanOut::spawn(
            Arc::clone(&factory),
            Arc::new(ScriptedHandler::default()),
            tasks(&["a", "b", "c", "d", "e", "f"]),
            PoolConfig {
                workers: 3,
                ..Default::default()
            },
        );
        assert_eq!(pool.total(), 6);

        let mut results = drain(pool).await;
        results.sort_by_key(|r| r.key);
        let outputs = results
            .iter()
            .map(|r| r.output.as_ref().map(|(o, _)| o.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            outputs,
            vec![Some("A"), Some("B"), Some("C"), Some("D"), Some("E"), Some("F")]
        );
        assert_eq!(
            factory.opened.load(Ordering::SeqCst),
            factory.closed.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn single_worker_reuses_its_session() {
        let factory = Arc::new(CountingFactory::default());
        let pool = FanOut::spawn(
            Arc::clone(&factory),
            Arc::new(ScriptedHandler::default()),
            tasks(&["a", "b", "c", "d"]),
            PoolConfig::default(),
        );
        let results = drain(pool).await;
        assert!(results
            .iter()
            .all(|r| r.output.as_ref().map(|(_, serial)| *serial) == Some(0)));
        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_task_yields_none_without_stopping_worker() {
        let factory = Arc::new(CountingFactory::default());
        let pool = FanOut::spawn(
            Arc::clone(&factory),
            Arc::new(ScriptedHandler::default()),
            tasks(&["bad", "ok"]),
            PoolConfig::default(),
        );
        let results = drain(pool).await;
        let by_key = results
            .into_iter()
            .map(|r| (r.key, r))
            .collect::<HashMap<_, _>>();

        assert!(by_key[&0].output.is_none());
        assert_eq!(by_key[&0].attempts, 4);
        assert_eq!(by_key[&1].output.as_ref().map(|(o, _)| o.as_str()), Some("OK"));
        // initial session plus one reset per failed attempt
        assert_eq!(factory.opened.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn flaky_task_succeeds_on_a_fresh_session() {
        let factory = Arc::new(CountingFactory::default());
        let pool = FanOut::spawn(
            Arc::clone(&factory),
            Arc::new(ScriptedHandler::default()),
            tasks(&["flaky"]),
            PoolConfig::default(),
        );
        let results = drain(pool).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].attempts, 3);
        assert_eq!(
            results[0].output,
            Some(("FLAKY".to_string(), 2)),
            "third attempt runs on the second replacement session"
        );
    }

    #[tokio::test]
    async fn empty_task_list_finishes_immediately() {
        let factory = Arc::new(CountingFactory::default());
        let mut pool = FanOut::spawn(
            factory,
            Arc::new(ScriptedHandler::default()),
            Vec::<(usize, String)>::new(),
            PoolConfig {
                workers: 4,
                ..Default::default()
            },
        );
        assert!(pool.next().await.is_none());
        pool.finish().await.expect("workers join");
    }

    #[test]
    fn transient_fetch_failures_back_off_exponentially() {
        let policy = RetryPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        let throttled = anyhow::Error::new(FetchError::HttpStatus {
            status: 429,
            url: "https://www.bestfightodds.com/search?query=Jon+Jones".into(),
        })
        .context("fetching search page");

        let pauses = (0..5)
            .map(|attempt| policy.pause_after(attempt, &throttled))
            .collect::<Vec<_>>();
        assert_eq!(
            pauses,
            [500, 1000, 2000, 3000, 3000].map(Duration::from_millis)
        );
        assert_eq!(policy.pause_after(64, &throttled), Duration::from_secs(3));
    }

    #[test]
    fn permanent_failures_retry_without_waiting() {
        let policy = RetryPolicy::default();
        let missing = anyhow::Error::new(FetchError::HttpStatus {
            status: 404,
            url: "http://www.ufcstats.com/fighter-details/0000000000000000".into(),
        });
        let layout = anyhow::anyhow!("page has no odds table");
        assert_eq!(policy.pause_after(0, &missing), Duration::ZERO);
        assert_eq!(policy.pause_after(2, &layout), Duration::ZERO);
    }

    struct MapSession(HashMap<String, String>);

    #[async_trait]
    impl PageFetch for MapSession {
        async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::NotFound(url.to_string()))
        }
    }

    struct MapFactory;

    #[async_trait]
    impl SessionFactory for MapFactory {
        type Session = MapSession;

        async fn open(&self) -> anyhow::Result<MapSession> {
            Ok(MapSession(HashMap::from([(
                "http://x/1".to_string(),
                "<html>1</html>".to_string(),
            )])))
        }
    }

    #[tokio::test]
    async fn fetch_pages_keys_results_by_url() {
        let pool = fetch_pages(
            Arc::new(MapFactory),
            vec!["http://x/1".to_string(), "http://x/missing".to_string()],
            PoolConfig {
                workers: 2,
                retry: RetryPolicy {
                    max_retries: 1,
                    ..RetryPolicy::default()
                },
                delay: Duration::ZERO,
            },
        );
        let results = drain(pool)
            .await
            .into_iter()
            .map(|r| (r.key, r.output))
            .collect::<HashMap<_, _>>();
        assert_eq!(results["http://x/1"].as_deref(), Some("<html>1</html>"));
        assert_eq!(results["http://x/missing"], None);
    }
}
