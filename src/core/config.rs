//! Configuration types for standalone and cluster clients
//!
//! Both client kinds accept two historically distinct bootstrap shapes: the
//! PHPRedis style (`host`/`port` for standalone, `seeds` for cluster) and the
//! native style (an `addresses` list). Supplying both shapes at once is a
//! construction-time error: [`validate`](ClientConfig::validate) runs before
//! any network I/O and rejects the conflict with a "Cannot specify both"
//! message.

use crate::core::error::{GlideError, GlideResult};
use crate::core::types::NodeAddress;
use std::time::Duration;

/// Authentication credentials
///
/// Either a bare password (AUTH with one argument) or a username/password
/// pair (AUTH with two arguments, Redis 6+ ACL style).
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Password-only authentication
    Password(String),
    /// Username and password authentication
    UserPassword {
        /// ACL user name
        username: String,
        /// Password for that user
        password: String,
    },
}

impl Credentials {
    /// Password-only credentials
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(password.into())
    }

    /// Username/password credentials
    pub fn user_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UserPassword {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Which nodes read commands may be served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFrom {
    /// Always read from the slot primary
    #[default]
    Primary,
    /// Prefer a replica of the slot primary, falling back to the primary
    PreferReplica,
}

/// Configuration for reconnection behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection
    pub enabled: bool,
    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts
    pub max_delay: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
    /// Maximum number of reconnect attempts (None = infinite)
    pub max_attempts: Option<usize>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_attempts: Some(8),
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given (zero-based) reconnect attempt
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }
}

/// Advanced tuning options
#[derive(Debug, Clone, Default)]
pub struct AdvancedConfig {
    /// Override for the connection timeout, in place of the top-level one
    pub connection_timeout: Option<Duration>,
    /// When true, periodic topology refresh queries the original seed or
    /// address list instead of the currently known cluster nodes
    pub refresh_topology_from_initial_nodes: bool,
}

/// Configuration for a standalone client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Single host (PHPRedis style, paired with `port`)
    pub host: Option<String>,
    /// Port for `host`; ignored when `host` is unset
    pub port: u16,
    /// Endpoint list (native style); mutually exclusive with `host`
    pub addresses: Vec<NodeAddress>,
    /// Optional authentication credentials
    pub credentials: Option<Credentials>,
    /// Database number selected after connecting
    pub database: u8,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Read/write operation timeout
    pub operation_timeout: Duration,
    /// Enable TCP keepalive
    pub tcp_keepalive: Option<Duration>,
    /// Which nodes reads may be served from
    pub read_from: ReadFrom,
    /// Reconnection settings
    pub reconnect: ReconnectConfig,
    /// Advanced tuning options
    pub advanced: AdvancedConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 6379,
            addresses: Vec::new(),
            credentials: None,
            database: 0,
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
            tcp_keepalive: Some(Duration::from_secs(60)),
            read_from: ReadFrom::default(),
            reconnect: ReconnectConfig::default(),
            advanced: AdvancedConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration for a single host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port,
            ..Default::default()
        }
    }

    /// Create a configuration from an address list
    #[must_use]
    pub fn with_addresses(addresses: Vec<NodeAddress>) -> Self {
        Self {
            addresses,
            ..Default::default()
        }
    }

    /// Set authentication credentials
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the database number
    #[must_use]
    pub const fn database(mut self, database: u8) -> Self {
        self.database = database;
        self
    }

    /// Set the connection timeout
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the operation timeout
    #[must_use]
    pub const fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the read-from policy
    #[must_use]
    pub const fn read_from(mut self, read_from: ReadFrom) -> Self {
        self.read_from = read_from;
        self
    }

    /// Set the reconnection policy
    #[must_use]
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set advanced tuning options
    #[must_use]
    pub fn advanced(mut self, advanced: AdvancedConfig) -> Self {
        self.advanced = advanced;
        self
    }

    /// Validate the configuration; runs before any network I/O
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::ConfigConflict`] when both `host` and
    /// `addresses` are supplied, and [`GlideError::Config`] when neither is.
    pub fn validate(&self) -> GlideResult<()> {
        if self.host.is_some() && !self.addresses.is_empty() {
            return Err(GlideError::ConfigConflict(
                "Cannot specify both host and addresses".to_string(),
            ));
        }
        if self.host.is_none() && self.addresses.is_empty() {
            return Err(GlideError::Config("No endpoints specified".to_string()));
        }
        Ok(())
    }

    /// The endpoints to attempt, in order
    #[must_use]
    pub fn endpoints(&self) -> Vec<NodeAddress> {
        if let Some(ref host) = self.host {
            vec![NodeAddress::new(host.clone(), self.port)]
        } else {
            self.addresses.clone()
        }
    }

    /// Effective connection timeout, honoring the advanced override
    #[must_use]
    pub fn effective_connect_timeout(&self) -> Duration {
        self.advanced
            .connection_timeout
            .unwrap_or(self.connect_timeout)
    }
}

/// Configuration for a cluster client
#[derive(Debug, Clone)]
pub struct ClusterClientConfig {
    /// Seed node list (PHPRedis RedisCluster style)
    pub seeds: Vec<NodeAddress>,
    /// Address list (native style); mutually exclusive with `seeds`
    pub addresses: Vec<NodeAddress>,
    /// Optional authentication credentials
    pub credentials: Option<Credentials>,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Read/write operation timeout
    pub operation_timeout: Duration,
    /// Enable TCP keepalive
    pub tcp_keepalive: Option<Duration>,
    /// Which nodes reads may be served from
    pub read_from: ReadFrom,
    /// Maximum number of redirects followed for one command
    pub max_redirects: usize,
    /// Reconnection settings
    pub reconnect: ReconnectConfig,
    /// Advanced tuning options
    pub advanced: AdvancedConfig,
}

impl Default for ClusterClientConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            addresses: Vec::new(),
            credentials: None,
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
            tcp_keepalive: Some(Duration::from_secs(60)),
            read_from: ReadFrom::default(),
            max_redirects: 3,
            reconnect: ReconnectConfig::default(),
            advanced: AdvancedConfig::default(),
        }
    }
}

impl ClusterClientConfig {
    /// Create a configuration from a seed list (PHPRedis style)
    #[must_use]
    pub fn with_seeds(seeds: Vec<NodeAddress>) -> Self {
        Self {
            seeds,
            ..Default::default()
        }
    }

    /// Create a configuration from an address list (native style)
    #[must_use]
    pub fn with_addresses(addresses: Vec<NodeAddress>) -> Self {
        Self {
            addresses,
            ..Default::default()
        }
    }

    /// Set authentication credentials
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the connection timeout
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the operation timeout
    #[must_use]
    pub const fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the read-from policy
    #[must_use]
    pub const fn read_from(mut self, read_from: ReadFrom) -> Self {
        self.read_from = read_from;
        self
    }

    /// Set the maximum number of redirects
    #[must_use]
    pub const fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Set the reconnection policy
    #[must_use]
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set advanced tuning options
    #[must_use]
    pub fn advanced(mut self, advanced: AdvancedConfig) -> Self {
        self.advanced = advanced;
        self
    }

    /// Validate the configuration; runs before any network I/O
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::ConfigConflict`] when both `seeds` and
    /// `addresses` are supplied, and [`GlideError::Config`] when neither is.
    pub fn validate(&self) -> GlideResult<()> {
        if !self.seeds.is_empty() && !self.addresses.is_empty() {
            return Err(GlideError::ConfigConflict(
                "Cannot specify both seeds and addresses".to_string(),
            ));
        }
        if self.seeds.is_empty() && self.addresses.is_empty() {
            return Err(GlideError::Config("No endpoints specified".to_string()));
        }
        Ok(())
    }

    /// The bootstrap node list, whichever shape was supplied
    #[must_use]
    pub fn initial_nodes(&self) -> Vec<NodeAddress> {
        if self.seeds.is_empty() {
            self.addresses.clone()
        } else {
            self.seeds.clone()
        }
    }

    /// Effective connection timeout, honoring the advanced override
    #[must_use]
    pub fn effective_connect_timeout(&self) -> Duration {
        self.advanced
            .connection_timeout
            .unwrap_or(self.connect_timeout)
    }
}
