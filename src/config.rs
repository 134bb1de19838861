//! Audit configuration
//!
//! Optional TOML file; every field has a default, and CLI/env values
//! override what the file says. The access token never lives in the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audit::fetcher::DEFAULT_PAGE_SIZE;
use crate::audit::summary::AuditPaths;
use crate::audit::AuditOptions;
use crate::scrapers::bitquery_query::{RetryPolicy, BITQUERY_HTTP_URL};
use crate::scrapers::bitquery_ws::BITQUERY_WS_URL;

pub const DEFAULT_CONFIG_PATH: &str = "stream_audit.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    #[serde(default = "default_http_url")]
    pub http_url: String,

    #[serde(default)]
    pub outputs: OutputConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

fn default_ws_url() -> String {
    BITQUERY_WS_URL.to_string()
}

fn default_http_url() -> String {
    BITQUERY_HTTP_URL.to_string()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            http_url: default_http_url(),
            outputs: OutputConfig::default(),
            query: QueryConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_stream_csv")]
    pub stream_csv: PathBuf,
    #[serde(default = "default_query_csv")]
    pub query_csv: PathBuf,
    #[serde(default = "default_mismatch_csv")]
    pub mismatch_csv: PathBuf,
}

fn default_stream_csv() -> PathBuf {
    PathBuf::from("stream_trades.csv")
}

fn default_query_csv() -> PathBuf {
    PathBuf::from("query_trades.csv")
}

fn default_mismatch_csv() -> PathBuf {
    PathBuf::from("mismatches.csv")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            stream_csv: default_stream_csv(),
            query_csv: default_query_csv(),
            mismatch_csv: default_mismatch_csv(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Pause between pages (seconds)
    #[serde(default = "default_page_pause_secs")]
    pub page_pause_secs: f64,

    /// Per-request timeout (seconds); large pages take a while
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_page_pause_secs() -> f64 {
    2.0
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    4
}

fn default_retry_delay_secs() -> u64 {
    5
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_pause_secs: default_page_pause_secs(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stop collecting automatically after this many seconds
    #[serde(default)]
    pub max_duration_secs: Option<u64>,

    #[serde(default = "default_progress_secs")]
    pub progress_secs: u64,
}

fn default_progress_secs() -> u64 {
    10
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: None,
            progress_secs: default_progress_secs(),
        }
    }
}

impl AuditConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load the given file, or `stream_audit.toml` if it exists, else defaults.
    /// An explicitly named file that fails to load is an error.
    pub fn resolve(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load(default)
                } else {
                    tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn paths(&self) -> AuditPaths {
        AuditPaths {
            stream_csv: self.outputs.stream_csv.clone(),
            query_csv: self.outputs.query_csv.clone(),
            mismatch_csv: self.outputs.mismatch_csv.clone(),
        }
    }

    pub fn audit_options(&self) -> AuditOptions {
        AuditOptions {
            paths: self.paths(),
            page_size: self.query.page_size.max(1),
            page_pause: Duration::from_secs_f64(self.query.page_pause_secs.max(0.0)),
            progress_every: Duration::from_secs(self.stream.progress_secs.max(1)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.query.max_attempts.max(1),
            base_delay: Duration::from_secs(self.query.retry_delay_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.query.timeout_secs)
    }
}
