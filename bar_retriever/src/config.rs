//! Retriever configuration: parsing, validation, and loading.
//!
//! A config file looks like:
//!
//! ```toml
//! cache_root = "data/historical"
//! market_timezone = "America/New_York"
//! open_session = "refresh"
//! ```
//!
//! Every key is optional; unknown keys are rejected. When loading from a path,
//! `BAR_RETRIEVER_CACHE_ROOT` overrides `cache_root`.
//!
//! Entrypoints:
//! - Parse + validate from a TOML string: [`load_config_str`]
//! - Parse + validate from a file path: [`load_config_path`]

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use shared_utils::env::get_env_override;
use thiserror::Error;
use tracing::debug;

/// Environment variable that replaces `cache_root` when set and non-blank.
pub const CACHE_ROOT_ENV: &str = "BAR_RETRIEVER_CACHE_ROOT";

pub const DEFAULT_CACHE_ROOT: &str = "data/historical";
pub const DEFAULT_MARKET_TIMEZONE: Tz = chrono_tz::America::New_York;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown market time zone '{0}'")]
    UnknownTimeZone(String),

    #[error("cache_root cannot be empty")]
    EmptyCacheRoot,
}

/// How the coordinator treats cached units for sessions that may still be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenSessionPolicy {
    /// Dates on or after today (market time) are always fetched again.
    #[default]
    Refresh,
    /// A cached unit is a hit regardless of its date.
    TrustCache,
}

/// Validated retriever settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverConfig {
    /// Root directory of the on-disk cache.
    pub cache_root: PathBuf,
    /// Zone whose calendar defines session dates.
    pub market_timezone: Tz,
    pub open_session: OpenSessionPolicy,
}

impl RetrieverConfig {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    pub fn with_market_timezone(mut self, tz: Tz) -> Self {
        self.market_timezone = tz;
        self
    }

    pub fn with_open_session(mut self, policy: OpenSessionPolicy) -> Self {
        self.open_session = policy;
        self
    }

    /// Replaces `cache_root` with `value` when present.
    pub fn with_cache_root_override(mut self, value: Option<String>) -> Self {
        if let Some(root) = value {
            debug!(%root, "cache_root overridden from environment");
            self.cache_root = PathBuf::from(root);
        }
        self
    }
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from(DEFAULT_CACHE_ROOT),
            market_timezone: DEFAULT_MARKET_TIMEZONE,
            open_session: OpenSessionPolicy::default(),
        }
    }
}

/// On-disk shape of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    cache_root: Option<PathBuf>,
    market_timezone: Option<String>,
    open_session: Option<OpenSessionPolicy>,
}

impl TryFrom<RawConfig> for RetrieverConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let defaults = RetrieverConfig::default();

        let cache_root = match raw.cache_root {
            Some(p) if p.as_os_str().is_empty() => return Err(ConfigError::EmptyCacheRoot),
            Some(p) => p,
            None => defaults.cache_root,
        };

        let market_timezone = match raw.market_timezone {
            Some(name) => {
                let name = name.trim();
                name.parse::<Tz>()
                    .map_err(|_| ConfigError::UnknownTimeZone(name.to_string()))?
            }
            None => defaults.market_timezone,
        };

        Ok(Self {
            cache_root,
            market_timezone,
            open_session: raw.open_session.unwrap_or(defaults.open_session),
        })
    }
}

/// Parse and validate a TOML config string.
pub fn load_config_str(s: &str) -> Result<RetrieverConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(s)?;
    raw.try_into()
}

/// Read, parse, and validate a TOML config file, then apply environment overrides.
pub fn load_config_path(path: impl AsRef<Path>) -> Result<RetrieverConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cfg = load_config_str(&content)?.with_cache_root_override(get_env_override(CACHE_ROOT_ENV));
    debug!(path = %path.display(), ?cfg, "loaded retriever config");
    Ok(cfg)
}
