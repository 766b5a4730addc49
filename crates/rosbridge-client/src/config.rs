//! Connection and session configuration.

use std::time::Duration;

/// Default rosbridge host.
pub const DEFAULT_IP: &str = "127.0.0.1";

/// Default rosbridge port.
pub const DEFAULT_PORT: u16 = 9090;

/// Default timeout for correlated requests and single-message waits.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for establishing the WebSocket connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for blocking action goals. Physical actions run long.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for an error status after advertise/publish.
pub const DEFAULT_STATUS_GRACE: Duration = Duration::from_secs(1);

/// The rosbridge endpoint a connection is opened against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Host name or IP address.
    pub ip: String,
    /// TCP port.
    pub port: u16,
    /// Timeout applied when callers do not supply one.
    pub default_timeout: Duration,
}

impl ConnectionConfig {
    /// Create a target with the default timeout.
    #[must_use]
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the default timeout.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// WebSocket URL for this target.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.ip, self.port)
    }

    /// Whether two configs point at the same endpoint.
    #[must_use]
    pub fn same_endpoint(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_IP, DEFAULT_PORT)
    }
}

/// Client-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Initial target.
    pub target: ConnectionConfig,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Default deadline for blocking action goals.
    pub action_timeout: Duration,
    /// Window in which an error status is attributed to advertise/publish.
    pub status_grace: Duration,
    /// Park the socket on release and reuse it while the target is unchanged.
    pub keep_alive: bool,
}

impl ClientConfig {
    /// Create a config for the given target with default settings.
    #[must_use]
    pub fn new(target: ConnectionConfig) -> Self {
        Self {
            target,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            status_grace: DEFAULT_STATUS_GRACE,
            keep_alive: false,
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the default action deadline.
    #[must_use]
    pub const fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Set the status grace window.
    #[must_use]
    pub const fn with_status_grace(mut self, grace: Duration) -> Self {
        self.status_grace = grace;
        self
    }

    /// Enable or disable socket reuse across scopes.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}
