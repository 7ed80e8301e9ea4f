use serde::{Deserialize, Deserializer};
use std::{fs, path::Path, path::PathBuf, time::Duration};
use url::Url;

pub const DEFAULT_SOURCE_URL: &str = "https://celestrak.org/NORAD/elements/gp.php";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub store: StoreConfig,
    pub source: SourceConfig,
    pub freshness: FreshnessConfig,
    pub batch: BatchConfig,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackendKind {
    #[default]
    File,
    Memory,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    /// Directory for the file backend
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackendKind::File,
            path: PathBuf::from("elset-store"),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SourceConfig {
    /// Provider endpoint, [`DEFAULT_SOURCE_URL`] when absent
    pub url: Option<Url>,
    #[serde(deserialize_with = "humantime_duration")]
    pub timeout: Duration,
    /// Outbound request pacing, unlimited when absent
    pub requests_per_second: Option<u64>,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            url: None,
            timeout: Duration::from_secs(10),
            requests_per_second: None,
            user_agent: concat!("tracker/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FreshnessConfig {
    /// Stored element sets fetched longer ago than this are refreshed
    pub max_age_hours: u32,
    /// Element sets with an epoch older than this are reported stale
    pub epoch_stale_after_days: u32,
    #[serde(deserialize_with = "humantime_duration")]
    pub fetch_timeout: Duration,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        FreshnessConfig {
            max_age_hours: 12,
            epoch_stale_after_days: 14,
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BatchConfig {
    pub concurrency: usize,
    pub max_steps: u64,
    pub allow_fetch: bool,
    /// Outer deadline for a whole batch
    #[serde(deserialize_with = "humantime_duration_opt")]
    pub deadline: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            concurrency: 4,
            max_steps: 100_000,
            allow_fetch: false,
            deadline: None,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str_checked(&content)
    }

    pub fn from_str_checked(s: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(s)?;

        if cfg.batch.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "batch.concurrency must be at least 1".to_owned(),
            ));
        }
        if cfg.batch.max_steps == 0 {
            return Err(ConfigError::Invalid(
                "batch.max-steps must be at least 1".to_owned(),
            ));
        }
        if cfg.source.requests_per_second == Some(0) {
            return Err(ConfigError::Invalid(
                "source.requests-per-second must be at least 1, or omitted".to_owned(),
            ));
        }
        if cfg.source.timeout.is_zero() || cfg.freshness.fetch_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_owned()));
        }
        if let Some(url) = &cfg.source.url {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "source.url must be http or https, got '{url}'"
                )));
            }
        }

        Ok(cfg)
    }
}

fn humantime_duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let s = String::deserialize(d)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

fn humantime_duration_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    humantime_duration(d).map(Some)
}
