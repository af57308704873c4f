//! Low-level TCP connections and the connect/close lifecycle
//!
//! [`Connection`] wraps one TCP stream with the RESP codec, the AUTH/SELECT
//! handshake, and per-operation timeouts. [`ConnectionManager`] owns the
//! connected/closed lifecycle: a second `connect()` on a live manager fails,
//! while `close()` is idempotent.

use crate::core::config::Credentials;
use crate::core::error::{GlideError, GlideResult};
use crate::core::types::NodeAddress;
use crate::core::value::Value;
use crate::protocol::{decode_buffered, RespEncoder};
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Everything a single connection needs from the client configuration
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Read/write operation timeout
    pub operation_timeout: Duration,
    /// TCP keepalive interval, if enabled
    pub tcp_keepalive: Option<Duration>,
    /// Credentials sent via AUTH after the TCP handshake
    pub credentials: Option<Credentials>,
    /// Database selected after authenticating (standalone only)
    pub database: u8,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
            tcp_keepalive: None,
            credentials: None,
            database: 0,
        }
    }
}

/// A single connection to a server node
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    read_buffer: BytesMut,
    address: NodeAddress,
    operation_timeout: Duration,
}

impl Connection {
    /// Open a connection and run the AUTH/SELECT handshake
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Connection`] when the node is unreachable or the
    /// connect timeout elapses, and [`GlideError::Auth`] when the server
    /// rejects the credentials.
    pub async fn connect(address: NodeAddress, settings: &ConnectionSettings) -> GlideResult<Self> {
        debug!(%address, "connecting");

        let stream = timeout(
            settings.connect_timeout,
            TcpStream::connect((address.host.as_str(), address.port)),
        )
        .await
        .map_err(|_| GlideError::Connection(format!("Connection to {address} timed out")))?
        .map_err(|e| GlideError::Connection(format!("Failed to connect to {address}: {e}")))?;

        let stream = match settings.tcp_keepalive {
            Some(interval) => {
                let socket = socket2::Socket::from(stream.into_std()?);
                let keepalive = socket2::TcpKeepalive::new().with_time(interval);
                socket.set_tcp_keepalive(&keepalive).map_err(|e| {
                    GlideError::Connection(format!("Failed to set TCP keepalive: {e}"))
                })?;
                TcpStream::from_std(socket.into())?
            }
            None => stream,
        };

        let mut conn = Self {
            stream,
            read_buffer: BytesMut::with_capacity(8192),
            address,
            operation_timeout: settings.operation_timeout,
        };

        if let Some(ref credentials) = settings.credentials {
            conn.authenticate(credentials).await?;
        }
        if settings.database != 0 {
            conn.select_database(settings.database).await?;
        }

        Ok(conn)
    }

    /// The address this connection is bound to
    #[must_use]
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> GlideResult<()> {
        let args = match credentials {
            Credentials::Password(password) => vec![Value::from(password.as_str())],
            Credentials::UserPassword { username, password } => vec![
                Value::from(username.as_str()),
                Value::from(password.as_str()),
            ],
        };

        match self.request("AUTH", &args).await {
            Ok(Value::SimpleString(ref s)) if s == "OK" => Ok(()),
            Ok(other) => Err(GlideError::Auth(format!(
                "Unexpected AUTH response: {other:?}"
            ))),
            Err(GlideError::Server(msg)) => Err(GlideError::Auth(msg)),
            Err(e) => Err(e),
        }
    }

    async fn select_database(&mut self, db: u8) -> GlideResult<()> {
        match self.request("SELECT", &[Value::Integer(i64::from(db))]).await? {
            Value::SimpleString(ref s) if s == "OK" => Ok(()),
            other => Err(GlideError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Send a command and wait for its reply
    ///
    /// Error replies are classified: MOVED/ASK become redirect variants,
    /// NOSCRIPT and READONLY get their own variants, anything else is a
    /// plain server error.
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Timeout`] when the operation timeout elapses and
    /// connection or classified server errors otherwise.
    pub async fn request(&mut self, command: &str, args: &[Value]) -> GlideResult<Value> {
        self.send(command, args).await?;
        let response = timeout(self.operation_timeout, self.read_value())
            .await
            .map_err(|_| GlideError::Timeout)??;

        if let Value::Error(ref msg) = response {
            return Err(GlideError::from_server_message(msg));
        }
        Ok(response)
    }

    /// Send a command without waiting for a reply
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Timeout`] or an I/O error on write failure.
    pub async fn send(&mut self, command: &str, args: &[Value]) -> GlideResult<()> {
        let encoded = RespEncoder::encode_command(command, args);
        timeout(self.operation_timeout, self.stream.write_all(&encoded))
            .await
            .map_err(|_| GlideError::Timeout)?
            .map_err(GlideError::Io)?;
        Ok(())
    }

    /// Read one complete RESP value, waiting for more bytes as needed
    ///
    /// Used both for command replies and for server push frames in subscribe
    /// mode. Cancel-safe: partially read frames stay in the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Connection`] when the peer closes the stream.
    pub async fn read_value(&mut self) -> GlideResult<Value> {
        loop {
            if let Some(value) = decode_buffered(&mut self.read_buffer)? {
                return Ok(value);
            }
            let n = self.stream.read_buf(&mut self.read_buffer).await?;
            if n == 0 {
                return Err(GlideError::Connection(format!(
                    "Connection to {} closed by server",
                    self.address
                )));
            }
        }
    }
}

/// State of a [`ConnectionManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Disconnected,
    Connected,
}

/// Tracks the connect/close lifecycle of a client
///
/// Wraps the settings every node connection shares, plus a connected flag so
/// that `connect()` on an already-connected client fails instead of silently
/// reconnecting, and `close()` can be called any number of times.
#[derive(Debug)]
pub struct ConnectionManager {
    settings: ConnectionSettings,
    state: LifecycleState,
}

impl ConnectionManager {
    /// Create a manager in the disconnected state
    #[must_use]
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            state: LifecycleState::Disconnected,
        }
    }

    /// Mark the client connected, verifying reachability of one endpoint
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::AlreadyConnected`] on a second call before
    /// `close()`, or a connection error when no endpoint is reachable.
    pub async fn connect(&mut self, endpoints: &[NodeAddress]) -> GlideResult<Connection> {
        if self.state == LifecycleState::Connected {
            return Err(GlideError::AlreadyConnected);
        }

        let mut last_err = GlideError::Connection("No endpoints specified".to_string());
        for address in endpoints {
            match Connection::connect(address.clone(), &self.settings).await {
                Ok(conn) => {
                    self.state = LifecycleState::Connected;
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(%address, error = %e, "endpoint unreachable, trying next");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// Open an additional connection to a specific node
    ///
    /// # Errors
    ///
    /// Propagates connection and handshake errors.
    pub async fn open(&self, address: NodeAddress) -> GlideResult<Connection> {
        Connection::connect(address, &self.settings).await
    }

    /// Whether `connect()` has succeeded and `close()` has not been called
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == LifecycleState::Connected
    }

    /// Mark the client closed; safe to call repeatedly
    pub fn close(&mut self) {
        self.state = LifecycleState::Disconnected;
    }

    /// Shared per-connection settings
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }
}
