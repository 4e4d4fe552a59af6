//! TOML configuration of one instrument connection.
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyUSB0"
//! profile = "bus"
//! baud_rate = 19200
//! address = 1
//! timeout_ms = 500
//!
//! [retry]
//! max_attempts = 3
//! backoff = "exponential"
//! delay_ms = 100
//! max_delay_ms = 1000
//!
//! [thickness]
//! model = "z-match"
//! ```

use serde::{Deserialize, Serialize};
use std::{io, path::Path, time::Duration};
use thiserror::Error;

use crate::measurement::ModelKind;
use crate::proto::codec::Profile;
use crate::session::{Backoff, RetryPolicy, SessionSettings, ADDRESSES, BAUD_RATES};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("Cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid setting '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FtmConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub thickness: ThicknessConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_profile")]
    pub profile: Profile,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Bus address, ignored for USB-direct devices.
    #[serde(default = "default_address")]
    pub address: u8,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff")]
    pub backoff: BackoffKind,

    /// Fixed delay, or the first delay of an exponential backoff.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ThicknessConfig {
    #[serde(default)]
    pub model: ModelKind,
}

fn default_port() -> String {
    crate::DEFAULT_TTY.to_string()
}

fn default_profile() -> Profile {
    Profile::Usb
}

fn default_baud_rate() -> u32 {
    crate::DEFAULT_BAUDRATE
}

fn default_address() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> BackoffKind {
    BackoffKind::Fixed
}

fn default_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    1000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            profile: default_profile(),
            baud_rate: default_baud_rate(),
            address: default_address(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            delay_ms: default_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl std::str::FromStr for FtmConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: FtmConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl FtmConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        std::fs::read_to_string(path)?.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.connection;
        if !BAUD_RATES.contains(&c.baud_rate) {
            return Err(ConfigError::Invalid {
                key: "connection.baud_rate",
                reason: format!("{} is not one of {:?}", c.baud_rate, BAUD_RATES),
            });
        }
        if c.profile == Profile::Bus && !ADDRESSES.contains(&u32::from(c.address)) {
            return Err(ConfigError::Invalid {
                key: "connection.address",
                reason: format!("{} outside {:?}", c.address, ADDRESSES),
            });
        }
        if c.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "connection.timeout_ms",
                reason: "must not be zero".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "retry.max_attempts",
                reason: "at least one attempt is needed".to_string(),
            });
        }
        if self.retry.backoff == BackoffKind::Exponential
            && self.retry.max_delay_ms < self.retry.delay_ms
        {
            return Err(ConfigError::Invalid {
                key: "retry.max_delay_ms",
                reason: "smaller than delay_ms".to_string(),
            });
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        let delay = Duration::from_millis(self.retry.delay_ms);
        let backoff = match self.retry.backoff {
            BackoffKind::Fixed => Backoff::Fixed(delay),
            BackoffKind::Exponential => Backoff::Exponential {
                initial: delay,
                max: Duration::from_millis(self.retry.max_delay_ms),
            },
        };
        SessionSettings {
            timeout: Duration::from_millis(self.connection.timeout_ms),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                backoff,
            },
        }
    }
}
