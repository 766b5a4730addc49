//! Bridge configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! robot_specs_dir = "robot_specifications"
//!
//! [rosbridge]
//! ip = "192.168.1.50"
//! port = 9090
//! default_timeout_secs = 5.0
//! connect_timeout_secs = 5.0
//! keep_alive = false
//!
//! [tools]
//! action_timeout_secs = 30.0
//! status_grace_secs = 1.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use rosbridge_client::config::{
    DEFAULT_ACTION_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IP, DEFAULT_PORT, DEFAULT_STATUS_GRACE,
    DEFAULT_TIMEOUT,
};
use rosbridge_client::{ClientConfig, ConnectionConfig};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Default directory holding robot specification files.
pub const DEFAULT_ROBOT_SPECS_DIR: &str = "robot_specifications";

/// rosbridge endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RosbridgeSection {
    /// Host name or IP address.
    pub ip: String,
    /// TCP port.
    pub port: u16,
    /// Default timeout for requests and single-message waits, in seconds.
    pub default_timeout_secs: f64,
    /// WebSocket connect timeout, in seconds.
    pub connect_timeout_secs: f64,
    /// Reuse the socket across tool calls.
    pub keep_alive: bool,
}

impl Default for RosbridgeSection {
    fn default() -> Self {
        Self {
            ip: DEFAULT_IP.to_string(),
            port: DEFAULT_PORT,
            default_timeout_secs: DEFAULT_TIMEOUT.as_secs_f64(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs_f64(),
            keep_alive: false,
        }
    }
}

/// Tool behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsSection {
    /// Deadline for blocking action goals, in seconds.
    pub action_timeout_secs: f64,
    /// Window for advertise/publish error statuses, in seconds.
    pub status_grace_secs: f64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            action_timeout_secs: DEFAULT_ACTION_TIMEOUT.as_secs_f64(),
            status_grace_secs: DEFAULT_STATUS_GRACE.as_secs_f64(),
        }
    }
}

/// Main bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// rosbridge endpoint.
    pub rosbridge: RosbridgeSection,
    /// Tool behaviour.
    pub tools: ToolsSection,
    /// Directory of `*.toml` robot specifications.
    pub robot_specs_dir: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rosbridge: RosbridgeSection::default(),
            tools: ToolsSection::default(),
            robot_specs_dir: PathBuf::from(DEFAULT_ROBOT_SPECS_DIR),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("failed to read config file '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> BridgeResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| BridgeError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.rosbridge.ip.trim().is_empty() {
            return Err(BridgeError::Config("rosbridge.ip cannot be empty".to_string()));
        }
        if self.rosbridge.port == 0 {
            return Err(BridgeError::Config("rosbridge.port must be greater than 0".to_string()));
        }
        for (name, secs) in [
            ("rosbridge.default_timeout_secs", self.rosbridge.default_timeout_secs),
            ("rosbridge.connect_timeout_secs", self.rosbridge.connect_timeout_secs),
            ("tools.action_timeout_secs", self.tools.action_timeout_secs),
        ] {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(BridgeError::Config(format!("{name} must be greater than 0")));
            }
        }
        let grace = self.tools.status_grace_secs;
        if !(grace.is_finite() && grace >= 0.0) {
            return Err(BridgeError::Config(
                "tools.status_grace_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Client settings derived from this configuration.
    ///
    /// Call after [`validate`](Self::validate); out-of-range durations fall
    /// back to the client defaults.
    pub fn client_config(&self) -> ClientConfig {
        let target = ConnectionConfig::new(self.rosbridge.ip.clone(), self.rosbridge.port)
            .with_default_timeout(secs(self.rosbridge.default_timeout_secs, DEFAULT_TIMEOUT));
        ClientConfig::new(target)
            .with_connect_timeout(secs(self.rosbridge.connect_timeout_secs, DEFAULT_CONNECT_TIMEOUT))
            .with_action_timeout(secs(self.tools.action_timeout_secs, DEFAULT_ACTION_TIMEOUT))
            .with_status_grace(secs(self.tools.status_grace_secs, DEFAULT_STATUS_GRACE))
            .with_keep_alive(self.rosbridge.keep_alive)
    }
}

/// Seconds as a [`Duration`], or `fallback` if negative or not finite.
pub(crate) fn secs(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}
