//! Configuration types for the gateway

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capability::{postal, video};

/// Upper bound on the config file size.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;

/// Errors raised while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("config i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Postal-code upstream settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostalConfig {
    /// URL template; `{code}` is replaced by the normalized code.
    pub base_url: String,
}

impl Default for PostalConfig {
    fn default() -> Self {
        Self { base_url: postal::DEFAULT_POSTAL_URL.to_string() }
    }
}

/// Video extractor settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VideoConfig {
    pub program: String,
    pub format: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            program: video::DEFAULT_PROGRAM.to_string(),
            format: video::DEFAULT_FORMAT.to_string(),
        }
    }
}

/// Gateway configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Listen address.
    pub bind: String,
    /// Persisted key table.
    pub keys_path: PathBuf,
    /// Phrase list used by the `phrases` capability.
    pub phrases_path: PathBuf,
    /// Budget for a single key-table load or save.
    pub storage_timeout_ms: u64,
    /// Budget for one capability call, upstream included.
    pub handler_timeout_ms: u64,
    /// Paths that bypass the admission gate (exact, or prefix when ending in `*`).
    pub open_paths: Vec<String>,
    pub postal: PostalConfig,
    pub video: VideoConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            keys_path: PathBuf::from("apiKeys.json"),
            phrases_path: PathBuf::from("phrases.json"),
            storage_timeout_ms: 2_000,
            handler_timeout_ms: 30_000,
            open_paths: vec!["/".to_string()],
            postal: PostalConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Read, parse and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Builder-style: set the listen address
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    /// Builder-style: set the key table path
    pub fn keys_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.keys_path = path.into();
        self
    }

    /// Builder-style: set the ungated paths
    pub fn open_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.open_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        if self.storage_timeout_ms == 0 {
            return Err(ConfigError::Invalid("storage_timeout_ms must be positive".to_string()));
        }
        if self.handler_timeout_ms == 0 {
            return Err(ConfigError::Invalid("handler_timeout_ms must be positive".to_string()));
        }
        if let Some(bad) = self.open_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid(format!("open path `{bad}` must start with `/`")));
        }
        if !self.postal.base_url.contains("{code}") {
            return Err(ConfigError::Invalid("postal.base_url must contain `{code}`".to_string()));
        }
        if self.video.program.trim().is_empty() {
            return Err(ConfigError::Invalid("video.program must be set".to_string()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid bind address `{}`", self.bind)))
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}
