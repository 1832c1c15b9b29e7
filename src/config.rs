//! # Configuration
//!
//! TOML configuration for the broker connection, session defaults and
//! logging. Every field has a default so a partial (or missing) file still
//! yields a usable configuration.
//!
//! ```toml
//! [broker]
//! endpoint = "tcp://broker.emqx.io:1883"
//! client_id_prefix = "client_"
//! keep_alive_secs = 60
//!
//! [session]
//! qos = 1
//! default_topic = "test/topic"
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn, Level};

use crate::adapter::{qos_from_level, QoS};

const CONFIG_DIR: &str = ".config/mqtt-session";
const CONFIG_FILE: &str = "config.toml";

/// Broker connection settings handed to the protocol adapter.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker address, e.g. `tcp://broker.emqx.io:1883`
    pub endpoint: String,
    /// Prefix for generated client identifiers
    pub client_id_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    /// Capacity of the request channel between client and event loop
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://broker.emqx.io:1883".to_string(),
            client_id_prefix: "client_".to_string(),
            username: None,
            password: None,
            keep_alive_secs: 60,
            clean_session: true,
            channel_capacity: 100,
        }
    }
}

/// Defaults for subscribe and publish commands.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// QoS level (0, 1 or 2) used for subscribe and publish
    pub qos: u8,
    pub default_topic: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            qos: 1,
            default_topic: "test/topic".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Default location: `~/.config/mqtt-session/config.toml`.
    pub fn default_path() -> PathBuf {
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads the configuration at `path`, falling back to defaults when the
    /// file does not exist.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            warn!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file: {}", e))?;
        let config = Self::parse(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the default configuration to `path` unless a file is already
    /// there.
    pub async fn ensure_default_config(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            debug!("Config file {} already present", path.display());
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;

        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if qos_from_level(self.session.qos).is_none() {
            return Err(eyre!("Invalid qos {}: expected 0, 1 or 2", self.session.qos));
        }
        if self.broker.keep_alive_secs < 5 {
            return Err(eyre!("broker.keep_alive_secs must be at least 5"));
        }
        if self.broker.channel_capacity == 0 {
            return Err(eyre!("broker.channel_capacity must be greater than zero"));
        }
        self.log_level()?;
        Ok(())
    }

    pub fn qos(&self) -> QoS {
        qos_from_level(self.session.qos).unwrap_or(QoS::AtLeastOnce)
    }

    pub fn log_level(&self) -> Result<Level> {
        Level::from_str(&self.logging.level)
            .map_err(|_| eyre!("Unknown log level: {}", self.logging.level))
    }

    /// Client identifier made of the configured prefix and the current time
    /// in milliseconds.
    pub fn generate_client_id(&self) -> String {
        format!(
            "{}{}",
            self.broker.client_id_prefix,
            chrono::Utc::now().timestamp_millis()
        )
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}
