//! Cluster-aware async Valkey/Redis client
//!
//! `valkey-glide` speaks RESP to standalone servers and clusters. The cluster
//! client bootstraps the slot map from CLUSTER SLOTS, routes each command to
//! the node owning its key's slot, and follows MOVED/ASK redirects
//! transparently. On top of the key/value basics it covers pub/sub,
//! MULTI/EXEC transactions, Lua scripting and function libraries.
//!
//! # Features
//!
//! - Standalone and cluster clients with the same command surface
//! - Slot-based routing with hash-tag support and routing hints
//! - Transparent handling of MOVED and ASK redirects
//! - One multiplexed connection per node with automatic reconnect
//! - Modal pub/sub subscribers on dedicated connections
//! - Transactions, scripting and server-side functions
//! - PHPRedis-style class aliases in [`compat`]
//!
//! # Quick Start
//!
//! ```no_run
//! use valkey_glide::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect(ClientConfig::new("localhost", 6379)).await?;
//!
//!     client.set("mykey", "myvalue").await?;
//!     let value: Option<String> = client.get("mykey").await?;
//!     println!("Value: {:?}", value);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::future_not_send)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::large_enum_variant)]
#![allow(clippy::implicit_clone)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::unused_async)]

pub mod client;
pub mod cluster;
pub mod commands;
pub mod compat;
pub mod connection;
pub mod pool;
pub mod protocol;
pub mod pubsub;
pub mod routing;
pub mod script;
pub mod transaction;

pub mod core;

pub use client::{Client, ClusterClient, RoutedReply};
pub use pubsub::{HandlerControl, PubSubMessage, Publisher, Subscriber};
pub use routing::Route;
pub use script::{FunctionLibrary, FunctionRestorePolicy, Script};
pub use transaction::Transaction;

pub use crate::core::{
    config::{
        AdvancedConfig, ClientConfig, ClusterClientConfig, Credentials, ReadFrom, ReconnectConfig,
    },
    error::{GlideError, GlideResult},
    types::{ExecOutcome, NodeAddress, NodeInfo, NodeRole, SlotRange},
    value::Value,
};
