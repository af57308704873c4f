//! Error types for client operations

use std::io;
use thiserror::Error;

/// Result type for client operations
pub type GlideResult<T> = Result<T, GlideError>;

/// Comprehensive error type for client operations
///
/// Connection and protocol failures are distinct variants from argument and
/// usage errors, so callers can tell "cannot reach server" apart from
/// "invalid call".
#[derive(Error, Debug)]
pub enum GlideError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol parsing error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server returned an error
    #[error("Server error: {0}")]
    Server(String),

    /// MOVED redirect in cluster mode
    #[error("MOVED redirect: slot {slot} to {host}:{port}")]
    Moved {
        /// Slot number that was moved
        slot: u16,
        /// Target host
        host: String,
        /// Target port
        port: u16,
    },

    /// ASK redirect in cluster mode
    #[error("ASK redirect: slot {slot} to {host}:{port}")]
    Ask {
        /// Slot number for temporary redirect
        slot: u16,
        /// Target host
        host: String,
        /// Target port
        port: u16,
    },

    /// Connection error (unreachable, refused, dropped)
    #[error("Connection error: {0}")]
    Connection(String),

    /// A second connect() on a client that is already connected
    #[error("Client is already connected")]
    AlreadyConnected,

    /// Mutually exclusive bootstrap parameters were both supplied
    #[error("{0}")]
    ConfigConflict(String),

    /// A command other than the unsubscribe class was issued while the
    /// connection is in subscribe mode
    #[error("Command not allowed while subscribed: {0}")]
    ModeViolation(String),

    /// Route-by-address target is not part of the current topology
    #[error("Node not found in topology: {0}")]
    NodeNotFound(String),

    /// EVALSHA against a digest the server does not know
    #[error("No matching script: {0}")]
    NoScript(String),

    /// Write command was routed to a replica
    #[error("Write against read-only replica: {0}")]
    ReadOnly(String),

    /// Invalid transaction usage (second MULTI before EXEC/DISCARD, WATCH
    /// after MULTI)
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Type conversion error
    #[error("Type conversion error: {0}")]
    Type(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Cluster error
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Maximum retry attempts exceeded
    #[error("Maximum retry attempts ({0}) exceeded")]
    MaxRetriesExceeded(usize),

    /// Unexpected response from server
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl GlideError {
    /// Classify a raw server error string into the matching variant
    ///
    /// Recognizes MOVED and ASK redirects plus the NOSCRIPT and READONLY
    /// prefixes; everything else becomes [`GlideError::Server`].
    #[must_use]
    pub fn from_server_message(msg: &str) -> Self {
        if let Some(redirect) = Self::parse_redirect(msg) {
            return redirect;
        }
        if msg.starts_with("NOSCRIPT") {
            return Self::NoScript(msg.to_string());
        }
        if msg.starts_with("READONLY") {
            return Self::ReadOnly(msg.to_string());
        }
        Self::Server(msg.to_string())
    }

    /// Parse a server error message to check for MOVED or ASK redirects
    #[must_use]
    pub fn parse_redirect(msg: &str) -> Option<Self> {
        let (rest, is_ask) = if let Some(rest) = msg.strip_prefix("MOVED ") {
            (rest, false)
        } else if let Some(rest) = msg.strip_prefix("ASK ") {
            (rest, true)
        } else {
            return None;
        };

        let parts: Vec<&str> = rest.split_whitespace().collect();
        if parts.len() != 2 {
            return None;
        }
        let slot = parts[0].parse::<u16>().ok()?;
        let (host, port) = parts[1].rsplit_once(':')?;
        let port = port.parse::<u16>().ok()?;

        Some(if is_ask {
            Self::Ask {
                slot,
                host: host.to_string(),
                port,
            }
        } else {
            Self::Moved {
                slot,
                host: host.to_string(),
                port,
            }
        })
    }

    /// Check if this error is a redirect (MOVED or ASK)
    #[must_use]
    pub const fn is_redirect(&self) -> bool {
        matches!(self, Self::Moved { .. } | Self::Ask { .. })
    }

    /// Get the target address from a redirect error
    #[must_use]
    pub fn redirect_target(&self) -> Option<(String, u16)> {
        match self {
            Self::Moved { host, port, .. } | Self::Ask { host, port, .. } => {
                Some((host.clone(), *port))
            }
            _ => None,
        }
    }

    /// Get the slot number from a redirect error
    #[must_use]
    pub const fn redirect_slot(&self) -> Option<u16> {
        match self {
            Self::Moved { slot, .. } | Self::Ask { slot, .. } => Some(*slot),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_moved_redirect() {
        let err = GlideError::parse_redirect("MOVED 3999 127.0.0.1:6381").unwrap();
        match err {
            GlideError::Moved { slot, host, port } => {
                assert_eq!(slot, 3999);
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 6381);
            }
            other => panic!("expected Moved, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_ask_redirect() {
        let err = GlideError::parse_redirect("ASK 42 10.0.0.5:7002").unwrap();
        assert!(err.is_redirect());
        assert_eq!(err.redirect_slot(), Some(42));
        assert_eq!(err.redirect_target(), Some(("10.0.0.5".to_string(), 7002)));
    }

    #[test]
    fn test_parse_redirect_rejects_garbage() {
        assert!(GlideError::parse_redirect("ERR unknown command").is_none());
        assert!(GlideError::parse_redirect("MOVED notaslot 1.2.3.4:1").is_none());
        assert!(GlideError::parse_redirect("MOVED 1").is_none());
    }

    #[test]
    fn test_from_server_message_noscript() {
        let err = GlideError::from_server_message("NOSCRIPT No matching script");
        assert!(matches!(err, GlideError::NoScript(_)));
    }

    #[test]
    fn test_from_server_message_readonly() {
        let err = GlideError::from_server_message(
            "READONLY You can't write against a read only replica.",
        );
        assert!(matches!(err, GlideError::ReadOnly(_)));
    }

    #[test]
    fn test_from_server_message_generic() {
        let err = GlideError::from_server_message("ERR wrong number of arguments");
        assert!(matches!(err, GlideError::Server(_)));
    }
}
