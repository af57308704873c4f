//! Typed command builders
//!
//! Each builder carries its arguments, knows its keys (for slot routing) and
//! parses its own reply into a typed output. The client and transaction
//! layers stay generic over [`Command`].

use crate::core::error::{GlideError, GlideResult};
use crate::core::value::Value;
use std::time::Duration;

/// A command with typed output
pub trait Command {
    /// The return type of the command
    type Output;

    /// Command name as sent on the wire
    fn command_name(&self) -> &str;

    /// Command arguments, key(s) included
    fn args(&self) -> Vec<Value>;

    /// Parse the reply into the output type
    ///
    /// # Errors
    ///
    /// Returns a type error when the reply shape is unexpected.
    fn parse_response(&self, response: Value) -> GlideResult<Self::Output>;

    /// Keys involved, used for cluster routing
    fn keys(&self) -> Vec<&[u8]>;

    /// Whether the command only reads, so replica routing may apply
    fn is_read(&self) -> bool {
        false
    }
}

/// GET command builder
pub struct GetCommand {
    key: String,
}

impl GetCommand {
    /// Create a new GET command
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for GetCommand {
    type Output = Option<String>;

    fn command_name(&self) -> &str {
        "GET"
    }

    fn args(&self) -> Vec<Value> {
        vec![Value::from(self.key.as_str())]
    }

    fn parse_response(&self, response: Value) -> GlideResult<Self::Output> {
        if response.is_null() {
            Ok(None)
        } else {
            Ok(Some(response.as_string()?))
        }
    }

    fn keys(&self) -> Vec<&[u8]> {
        vec![self.key.as_bytes()]
    }

    fn is_read(&self) -> bool {
        true
    }
}

/// SET command builder with optional expiration and conditions
pub struct SetCommand {
    key: String,
    value: String,
    expiration: Option<Duration>,
    nx: bool,
    xx: bool,
}

impl SetCommand {
    /// Create a new SET command
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expiration: None,
            nx: false,
            xx: false,
        }
    }

    /// Expire the key after the given duration (EX)
    #[must_use]
    pub const fn expire(mut self, duration: Duration) -> Self {
        self.expiration = Some(duration);
        self
    }

    /// Only set when the key does not exist (NX)
    #[must_use]
    pub const fn if_not_exists(mut self) -> Self {
        self.nx = true;
        self
    }

    /// Only set when the key already exists (XX)
    #[must_use]
    pub const fn if_exists(mut self) -> Self {
        self.xx = true;
        self
    }
}

impl Command for SetCommand {
    type Output = bool;

    fn command_name(&self) -> &str {
        "SET"
    }

    fn args(&self) -> Vec<Value> {
        let mut args = vec![
            Value::from(self.key.as_str()),
            Value::from(self.value.as_str()),
        ];
        if let Some(expiration) = self.expiration {
            args.push(Value::from("EX"));
            args.push(Value::Integer(expiration.as_secs() as i64));
        }
        if self.nx {
            args.push(Value::from("NX"));
        }
        if self.xx {
            args.push(Value::from("XX"));
        }
        args
    }

    fn parse_response(&self, response: Value) -> GlideResult<Self::Output> {
        match response {
            Value::SimpleString(ref s) if s == "OK" => Ok(true),
            // NX/XX condition not met
            Value::Null => Ok(false),
            other => Err(GlideError::Type(format!(
                "Unexpected SET response: {other:?}"
            ))),
        }
    }

    fn keys(&self) -> Vec<&[u8]> {
        vec![self.key.as_bytes()]
    }
}

/// DEL command builder (one or more keys)
pub struct DelCommand {
    keys: Vec<String>,
}

impl DelCommand {
    /// Create a new DEL command
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

impl Command for DelCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "DEL"
    }

    fn args(&self) -> Vec<Value> {
        self.keys.iter().map(|k| Value::from(k.as_str())).collect()
    }

    fn parse_response(&self, response: Value) -> GlideResult<Self::Output> {
        response.as_int()
    }

    fn keys(&self) -> Vec<&[u8]> {
        self.keys.iter().map(String::as_bytes).collect()
    }
}

/// EXISTS command builder
pub struct ExistsCommand {
    key: String,
}

impl ExistsCommand {
    /// Create a new EXISTS command
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for ExistsCommand {
    type Output = bool;

    fn command_name(&self) -> &str {
        "EXISTS"
    }

    fn args(&self) -> Vec<Value> {
        vec![Value::from(self.key.as_str())]
    }

    fn parse_response(&self, response: Value) -> GlideResult<Self::Output> {
        Ok(response.as_int()? > 0)
    }

    fn keys(&self) -> Vec<&[u8]> {
        vec![self.key.as_bytes()]
    }

    fn is_read(&self) -> bool {
        true
    }
}

/// INCR / INCRBY command builder
pub struct IncrCommand {
    key: String,
    delta: i64,
}

impl IncrCommand {
    /// Increment by one
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            delta: 1,
        }
    }

    /// Increment by an arbitrary amount
    pub fn by(key: impl Into<String>, delta: i64) -> Self {
        Self {
            key: key.into(),
            delta,
        }
    }
}

impl Command for IncrCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        if self.delta == 1 {
            "INCR"
        } else {
            "INCRBY"
        }
    }

    fn args(&self) -> Vec<Value> {
        let mut args = vec![Value::from(self.key.as_str())];
        if self.delta != 1 {
            args.push(Value::Integer(self.delta));
        }
        args
    }

    fn parse_response(&self, response: Value) -> GlideResult<Self::Output> {
        response.as_int()
    }

    fn keys(&self) -> Vec<&[u8]> {
        vec![self.key.as_bytes()]
    }
}

/// TTL command builder
pub struct TtlCommand {
    key: String,
}

impl TtlCommand {
    /// Create a new TTL command
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Command for TtlCommand {
    type Output = i64;

    fn command_name(&self) -> &str {
        "TTL"
    }

    fn args(&self) -> Vec<Value> {
        vec![Value::from(self.key.as_str())]
    }

    fn parse_response(&self, response: Value) -> GlideResult<Self::Output> {
        response.as_int()
    }

    fn keys(&self) -> Vec<&[u8]> {
        vec![self.key.as_bytes()]
    }

    fn is_read(&self) -> bool {
        true
    }
}

/// EXPIRE command builder
pub struct ExpireCommand {
    key: String,
    seconds: i64,
}

impl ExpireCommand {
    /// Create a new EXPIRE command
    pub fn new(key: impl Into<String>, seconds: i64) -> Self {
        Self {
            key: key.into(),
            seconds,
        }
    }
}

impl Command for ExpireCommand {
    type Output = bool;

    fn command_name(&self) -> &str {
        "EXPIRE"
    }

    fn args(&self) -> Vec<Value> {
        vec![
            Value::from(self.key.as_str()),
            Value::Integer(self.seconds),
        ]
    }

    fn parse_response(&self, response: Value) -> GlideResult<Self::Output> {
        Ok(response.as_int()? == 1)
    }

    fn keys(&self) -> Vec<&[u8]> {
        vec![self.key.as_bytes()]
    }
}
