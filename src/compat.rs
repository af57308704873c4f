//! PHPRedis-style aliases
//!
//! Code ported from PHPRedis can keep its class names: `Redis` is the
//! standalone [`Client`], `RedisCluster` the [`ClusterClient`] and
//! `RedisException` the error type. The aliases are plain re-exports, so a
//! value constructed under one name is usable under the other.
//!
//! # Examples
//!
//! ```no_run
//! use valkey_glide::compat::{Redis, RedisException};
//! use valkey_glide::ClientConfig;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), RedisException> {
//! let redis = Redis::connect(ClientConfig::new("localhost", 6379)).await?;
//! redis.set("greeting", "hello").await?;
//! # Ok(())
//! # }
//! ```

pub use crate::client::Client as Redis;
pub use crate::client::ClusterClient as RedisCluster;
pub use crate::core::error::GlideError as RedisException;
