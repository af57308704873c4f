//! Core building blocks: configuration, errors, values, and shared types

pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::{
    AdvancedConfig, ClientConfig, ClusterClientConfig, Credentials, ReadFrom, ReconnectConfig,
};
pub use error::{GlideError, GlideResult};
pub use types::{ExecOutcome, NodeAddress, NodeInfo, NodeRole, SlotRange};
pub use value::Value;
