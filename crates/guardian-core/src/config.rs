//! guardian.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;

/// Environment variable consulted when `[map] access_token` is unset.
pub const MAP_TOKEN_ENV: &str = "GUARDIAN_MAP_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub server: ServerConfig,
    pub realtime: RealtimeConfig,
    pub map: MapConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Schema every feed filter is scoped to.
    pub schema: String,
    /// Prefix for process-unique channel names.
    pub channel_prefix: String,
    /// First reconnect delay after a dropped feed (e.g., "1s").
    pub reconnect_base: String,
    /// Upper bound on the reconnect delay (e.g., "60s").
    pub reconnect_max: String,
    /// Most recent records kept per live buffer.
    pub buffer_capacity: usize,
    /// Age window kept per live buffer (e.g., "30m").
    pub buffer_window: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub access_token: Option<String>,
    pub style_url: String,
    /// Initial centre as `[longitude, latitude]`.
    pub center: [f64; 2],
    pub zoom: f64,
    pub container_width: u32,
    pub container_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: Option<String>,
    /// "pretty" or "json".
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            data_dir: PathBuf::from("/var/lib/guardian"),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            channel_prefix: "guardian".to_string(),
            reconnect_base: "1s".to_string(),
            reconnect_max: "60s".to_string(),
            buffer_capacity: 500,
            buffer_window: Some("30m".to_string()),
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            style_url: "mapbox://styles/mapbox/light-v11".to_string(),
            center: [100.5018, 13.7563],
            zoom: 2.0,
            container_width: 1024,
            container_height: 640,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            format: "pretty".to_string(),
        }
    }
}

impl GuardianConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: GuardianConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let rt = &self.realtime;
        if rt.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "realtime.buffer_capacity must be at least 1".to_string(),
            ));
        }
        if parse_duration(&rt.reconnect_base).is_none() {
            return Err(ConfigError::Invalid(format!(
                "realtime.reconnect_base: bad duration {:?}",
                rt.reconnect_base
            )));
        }
        if parse_duration(&rt.reconnect_max).is_none() {
            return Err(ConfigError::Invalid(format!(
                "realtime.reconnect_max: bad duration {:?}",
                rt.reconnect_max
            )));
        }
        if let Some(window) = &rt.buffer_window
            && parse_duration(window).is_none()
        {
            return Err(ConfigError::Invalid(format!(
                "realtime.buffer_window: bad duration {window:?}"
            )));
        }
        let [lng, lat] = self.map.center;
        if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
            return Err(ConfigError::Invalid(format!(
                "map.center out of range: [{lng}, {lat}]"
            )));
        }
        Ok(())
    }

    /// Map access token from the config file, falling back to the
    /// `GUARDIAN_MAP_TOKEN` environment variable. Blank tokens count as unset.
    pub fn map_token(&self) -> Option<String> {
        self.map
            .access_token
            .clone()
            .or_else(|| std::env::var(MAP_TOKEN_ENV).ok())
            .filter(|t| !t.trim().is_empty())
    }
}

impl RealtimeConfig {
    pub fn reconnect_base(&self) -> Duration {
        parse_duration(&self.reconnect_base).unwrap_or(Duration::from_secs(1))
    }

    pub fn reconnect_max(&self) -> Duration {
        parse_duration(&self.reconnect_max).unwrap_or(Duration::from_secs(60))
    }

    pub fn buffer_window(&self) -> Option<Duration> {
        self.buffer_window.as_deref().and_then(parse_duration)
    }
}
