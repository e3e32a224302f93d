//! Single-request page sessions. Retrying belongs to the pool.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

use crate::pool::SessionFactory;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        transient: bool,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("no page for {0}")]
    NotFound(String),
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    fn request(url: &str, source: reqwest::Error) -> Self {
        FetchError::Request {
            url: url.to_string(),
            transient: source.is_timeout() || source.is_connect(),
            source,
        }
    }

    /// Whether waiting before the next attempt could help: throttling,
    /// server errors, timeouts and refused connections.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request { transient, .. } => *transient,
            FetchError::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::NotFound(_) | FetchError::Other(_) => false,
        }
    }
}

/// Anything that turns a URL into page text.
#[async_trait]
pub trait PageFetch: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

/// One reusable HTTP client, owned by a single pool worker.
#[derive(Debug)]
pub struct HttpSession {
    client: reqwest::Client,
}

impl HttpSession {
    pub fn new(config: &HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::request(url, err))?;
        let status = resp.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "page not served");
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        resp.text().await.map_err(|err| FetchError::request(url, err))
    }
}

#[async_trait]
impl PageFetch for HttpSession {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        self.get(url).instrument(info_span!("http_fetch", url)).await
    }
}

/// Opens a fresh [`HttpSession`] per worker and on every reset.
#[derive(Debug, Clone, Default)]
pub struct HttpSessionFactory {
    pub config: HttpClientConfig,
}

impl HttpSessionFactory {
    pub fn new(config: HttpClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    type Session = HttpSession;

    async fn open(&self) -> anyhow::Result<HttpSession> {
        HttpSession::new(&self.config)
    }
}
