//! Server-side scripting and function libraries
//!
//! [`Script`] pairs Lua source with its SHA1 digest and executes via EVALSHA,
//! falling back to EVAL exactly once when the server does not know the digest
//! yet. Helpers below build the argument layouts shared by EVAL/EVALSHA/FCALL
//! and parse the SCRIPT and FUNCTION replies; the client facades do the
//! routing (scripting state is per node, so cluster clients fan the cache
//! mutations out to every primary).
//!
//! # Examples
//!
//! ```no_run
//! use valkey_glide::{Client, ClientConfig, Script};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(ClientConfig::new("localhost", 6379)).await?;
//!
//! let script = Script::new("return redis.call('GET', KEYS[1])");
//! let value = script.execute(&client, vec!["mykey".to_string()], vec![]).await?;
//! println!("{value:?}");
//! # Ok(())
//! # }
//! ```

use crate::core::error::{GlideError, GlideResult};
use crate::core::value::Value;
use async_trait::async_trait;
use sha1::{Digest, Sha1};

/// Hex-encoded SHA1 of a script source
#[must_use]
pub fn sha1_hex(source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

/// Anything that can run scripts; implemented by both client kinds
#[async_trait]
pub trait ScriptRunner {
    /// EVAL the source directly
    async fn eval(&self, script: &str, keys: Vec<String>, args: Vec<String>)
        -> GlideResult<Value>;

    /// EVALSHA by digest; unknown digests fail with [`GlideError::NoScript`]
    async fn evalsha(&self, sha: &str, keys: Vec<String>, args: Vec<String>)
        -> GlideResult<Value>;

    /// SCRIPT LOAD, returning the digest
    async fn script_load(&self, source: &str) -> GlideResult<String>;
}

/// A Lua script with its precomputed digest
#[derive(Debug, Clone)]
pub struct Script {
    source: String,
    sha: String,
}

impl Script {
    /// Hash the source and keep both
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let sha = sha1_hex(&source);
        Self { source, sha }
    }

    /// The hex SHA1 digest
    #[must_use]
    pub fn sha(&self) -> &str {
        &self.sha
    }

    /// The Lua source
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run the script, EVALSHA first with one EVAL fallback
    ///
    /// # Errors
    ///
    /// Propagates evaluation errors; only the unknown-digest case triggers
    /// the fallback.
    pub async fn execute<R: ScriptRunner + Sync>(
        &self,
        runner: &R,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> GlideResult<Value> {
        match runner.evalsha(&self.sha, keys.clone(), args.clone()).await {
            Err(GlideError::NoScript(_)) => runner.eval(&self.source, keys, args).await,
            other => other,
        }
    }

    /// Preload the script into the server cache
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub async fn load<R: ScriptRunner + Sync>(&self, runner: &R) -> GlideResult<String> {
        runner.script_load(&self.source).await
    }
}

/// Argument layout shared by EVAL, EVALSHA and FCALL:
/// `<body> <numkeys> key... arg...`
#[must_use]
pub fn eval_args(body: &str, keys: Vec<String>, args: Vec<String>) -> Vec<Value> {
    let mut out = Vec::with_capacity(2 + keys.len() + args.len());
    out.push(Value::from(body));
    out.push(Value::Integer(keys.len() as i64));
    out.extend(keys.into_iter().map(Value::from));
    out.extend(args.into_iter().map(Value::from));
    out
}

/// Parse a SCRIPT EXISTS reply into per-digest booleans, order preserved
///
/// # Errors
///
/// Returns a type error when the reply is not an integer array.
pub fn parse_script_exists(reply: Value) -> GlideResult<Vec<bool>> {
    reply
        .as_array()?
        .into_iter()
        .map(|v| Ok(v.as_int()? != 0))
        .collect()
}

/// Conflict policy for FUNCTION RESTORE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionRestorePolicy {
    /// Keep existing libraries, fail on name collisions
    #[default]
    Append,
    /// Drop every library before restoring
    Flush,
    /// Overwrite colliding libraries
    Replace,
}

impl FunctionRestorePolicy {
    /// The policy token sent on the wire
    #[must_use]
    pub const fn as_arg(self) -> &'static str {
        match self {
            Self::Append => "APPEND",
            Self::Flush => "FLUSH",
            Self::Replace => "REPLACE",
        }
    }
}

/// One library entry from FUNCTION LIST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionLibrary {
    /// Library name
    pub name: String,
    /// Engine (normally "LUA")
    pub engine: String,
    /// Names of the functions the library registers
    pub functions: Vec<String>,
}

/// Parse a FUNCTION LIST reply
///
/// Entries are flat field/value maps; unknown fields are skipped so newer
/// servers keep parsing.
///
/// # Errors
///
/// Returns a type error when the reply shape is not a list of maps.
pub fn parse_function_list(reply: Value) -> GlideResult<Vec<FunctionLibrary>> {
    let mut libraries = Vec::new();
    for entry in reply.as_array()? {
        let fields = entry.as_array()?;
        let mut name = String::new();
        let mut engine = String::new();
        let mut functions = Vec::new();

        for pair in fields.chunks(2) {
            let [field, value] = pair else { continue };
            match field.as_string()?.as_str() {
                "library_name" => name = value.as_string()?,
                "engine" => engine = value.as_string()?,
                "functions" => {
                    for func in value.as_array()? {
                        let func_fields = func.as_array()?;
                        for func_pair in func_fields.chunks(2) {
                            let [f, v] = func_pair else { continue };
                            if f.as_string()? == "name" {
                                functions.push(v.as_string()?);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        libraries.push(FunctionLibrary {
            name,
            engine,
            functions,
        });
    }
    Ok(libraries)
}
