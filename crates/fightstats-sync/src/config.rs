use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use fightstats_adapters::{bestfightodds, ufcstats};
use fightstats_storage::{HttpClientConfig, PoolConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Earliest event date the odds pipeline considers by default.
pub fn default_min_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2008, 8, 1).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub data_folder: PathBuf,
    pub n_sessions: usize,
    /// Seconds to wait before every request.
    pub delay_secs: f64,
    pub max_retries: usize,
    /// First back-off after a throttled or unavailable page; doubles per retry.
    pub retry_delay_secs: f64,
    pub min_score: u8,
    pub min_date: NaiveDate,
    pub ufcstats_base_url: String,
    pub bestfightodds_base_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            data_folder: PathBuf::from("./data"),
            n_sessions: 1,
            delay_secs: 0.0,
            max_retries: 3,
            retry_delay_secs: 1.0,
            min_score: 90,
            min_date: default_min_date(),
            ufcstats_base_url: ufcstats::BASE_URL.to_string(),
            bestfightodds_base_url: bestfightodds::BASE_URL.to_string(),
            user_agent: "fightstats/0.1".to_string(),
            http_timeout_secs: 30,
        }
    }
}

/// Partial settings read from a YAML file; absent keys keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverlay {
    pub data_folder: Option<PathBuf>,
    pub n_sessions: Option<usize>,
    pub delay_secs: Option<f64>,
    pub max_retries: Option<usize>,
    pub retry_delay_secs: Option<f64>,
    pub min_score: Option<u8>,
    pub min_date: Option<NaiveDate>,
    pub ufcstats_base_url: Option<String>,
    pub bestfightodds_base_url: Option<String>,
    pub user_agent: Option<String>,
    pub http_timeout_secs: Option<u64>,
}

impl ScrapeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `FIGHTSTATS_*` variables; unparsable values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_folder: lookup("FIGHTSTATS_DATA_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_folder),
            n_sessions: parsed(&lookup, "FIGHTSTATS_N_SESSIONS").unwrap_or(defaults.n_sessions),
            delay_secs: parsed(&lookup, "FIGHTSTATS_DELAY").unwrap_or(defaults.delay_secs),
            max_retries: parsed(&lookup, "FIGHTSTATS_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_delay_secs: parsed(&lookup, "FIGHTSTATS_RETRY_DELAY")
                .unwrap_or(defaults.retry_delay_secs),
            min_score: parsed(&lookup, "FIGHTSTATS_MIN_SCORE").unwrap_or(defaults.min_score),
            min_date: parsed(&lookup, "FIGHTSTATS_MIN_DATE").unwrap_or(defaults.min_date),
            ufcstats_base_url: lookup("FIGHTSTATS_UFCSTATS_URL")
                .unwrap_or(defaults.ufcstats_base_url),
            bestfightodds_base_url: lookup("FIGHTSTATS_BESTFIGHTODDS_URL")
                .unwrap_or(defaults.bestfightodds_base_url),
            user_agent: lookup("FIGHTSTATS_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: parsed(&lookup, "FIGHTSTATS_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
        }
    }

    /// Environment settings, then the YAML file on top when one is given.
    pub fn load(yaml: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_env();
        if let Some(path) = yaml {
            config.apply(read_overlay(path)?);
        }
        Ok(config)
    }

    pub fn apply(&mut self, overlay: ConfigOverlay) {
        if let Some(v) = overlay.data_folder {
            self.data_folder = v;
        }
        if let Some(v) = overlay.n_sessions {
            self.n_sessions = v;
        }
        if let Some(v) = overlay.delay_secs {
            self.delay_secs = v;
        }
        if let Some(v) = overlay.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = overlay.retry_delay_secs {
            self.retry_delay_secs = v;
        }
        if let Some(v) = overlay.min_score {
            self.min_score = v;
        }
        if let Some(v) = overlay.min_date {
            self.min_date = v;
        }
        if let Some(v) = overlay.ufcstats_base_url {
            self.ufcstats_base_url = v;
        }
        if let Some(v) = overlay.bestfightodds_base_url {
            self.bestfightodds_base_url = v;
        }
        if let Some(v) = overlay.user_agent {
            self.user_agent = v;
        }
        if let Some(v) = overlay.http_timeout_secs {
            self.http_timeout_secs = v;
        }
    }

    pub fn delay(&self) -> Duration {
        seconds(self.delay_secs)
    }

    /// The pool owns the retry budget; sessions make a single request per attempt.
    pub fn retry_policy(&self) -> RetryPolicy {
        let base_delay = seconds(self.retry_delay_secs);
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay,
            max_delay: base_delay.saturating_mul(16),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.n_sessions.max(1),
            retry: self.retry_policy(),
            delay: self.delay(),
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn read_overlay(path: &Path) -> Result<ConfigOverlay> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}
