use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};
use tracing::level_filters::LevelFilter;
use url::Url;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the engine.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Connection settings for the remote general-ledger service.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the remote proxy, e.g. `http://127.0.0.1:5002/`.
    pub base_url: Url,
    /// Connect timeout for every request.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Overall timeout for one request, including the response body.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            base_url: Url::parse("http://127.0.0.1:5002/").unwrap(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Fine-tuning for the coalescing pipeline.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// How long the scheduler stays armed before draining the registry.
    ///
    /// Deliberately short: the registry already accumulates every invocation
    /// arriving within the window without additional delay.
    #[serde(with = "humantime_serde")]
    pub coalesce_window: Duration,

    /// Maximum number of accounts per chunk.
    ///
    /// Chosen to stay under the remote service's concurrency policy.
    pub max_chunk_accounts: usize,

    /// Delay between consecutive chunks of one group.
    ///
    /// Chunks are dispatched sequentially, never before the previous chunk
    /// settles. This is a throttle: exceeding the remote concurrency ceiling
    /// fails the whole request with a backpressure error.
    #[serde(with = "humantime_serde")]
    pub inter_chunk_delay: Duration,

    /// Ceiling on the expanded period union of one batch group.
    ///
    /// Members are packed into subgroups whose union stays under this bound;
    /// a single member exceeding it on its own forms a one-member group.
    pub max_group_periods: usize,

    /// How many times a chunk is retried after a backpressure response
    /// before it degrades to the sentinel.
    pub backpressure_retries: u32,

    /// Delay before a backpressure retry.
    #[serde(with = "humantime_serde")]
    pub backpressure_backoff: Duration,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        BatchingConfig {
            coalesce_window: Duration::from_millis(10),
            max_chunk_accounts: 25,
            inter_chunk_delay: Duration::from_millis(100),
            max_group_periods: 96,
            backpressure_retries: 3,
            backpressure_backoff: Duration::from_millis(500),
        }
    }
}

/// The engine configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub batching: BatchingConfig,
    pub logging: Logging,
}

impl Config {
    /// Loads the configuration, layering a YAML file over the defaults if a
    /// path is given.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let source = fs::read_to_string(path)
                    .context(format!("failed to open file {}", path.display()))?;
                serde_yaml::from_str(&source)
                    .context(format!("failed to parse YAML config {}", path.display()))
            }
            None => Ok(Config::default()),
        }
    }
}

fn deserialize_level_filter<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    text.parse().map_err(de::Error::custom)
}
