//! MULTI/EXEC transactions
//!
//! A transaction is a session on one connection: optional WATCHes, then MULTI,
//! queued commands, then EXEC or DISCARD. A failed WATCH is a normal outcome
//! reported as [`ExecOutcome::Aborted`], never an error, and the shape is the
//! same whether the session runs against a standalone server or a cluster
//! node.
//!
//! # Examples
//!
//! ```no_run
//! use valkey_glide::{Client, ClientConfig, ExecOutcome};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(ClientConfig::new("localhost", 6379)).await?;
//!
//! let mut tx = client.transaction().await?;
//! tx.watch(vec!["balance".to_string()]).await?;
//! tx.multi().await?;
//! tx.incr("balance").await?;
//! tx.set("touched", "1").await?;
//!
//! match tx.exec().await? {
//!     ExecOutcome::Results(replies) => println!("applied: {replies:?}"),
//!     ExecOutcome::Aborted => println!("balance changed under us"),
//! }
//! # Ok(())
//! # }
//! ```

use crate::commands::Command;
use crate::connection::Connection;
use crate::core::error::{GlideError, GlideResult};
use crate::core::types::ExecOutcome;
use crate::core::value::Value;
use async_trait::async_trait;

/// Executes raw commands on behalf of a transaction session
#[async_trait]
pub trait TransactionExecutor {
    /// Run one command and return its reply
    async fn execute(&mut self, command: &str, args: &[Value]) -> GlideResult<Value>;
}

#[async_trait]
impl TransactionExecutor for Connection {
    async fn execute(&mut self, command: &str, args: &[Value]) -> GlideResult<Value> {
        self.request(command, args).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    /// Before MULTI: WATCH allowed, queueing not
    Open,
    /// After MULTI: commands queue, WATCH and a second MULTI are errors
    Queuing,
}

/// A transaction session bound to one connection
pub struct Transaction<E> {
    executor: E,
    phase: SessionPhase,
    watched: Vec<String>,
    queued: usize,
}

impl<E: TransactionExecutor> Transaction<E> {
    /// Start a session in the open (pre-MULTI) phase
    pub const fn new(executor: E) -> Self {
        Self {
            executor,
            phase: SessionPhase::Open,
            watched: Vec::new(),
            queued: 0,
        }
    }

    /// WATCH keys; EXEC aborts if any changes before it runs
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Transaction`] when called after `multi()`.
    pub async fn watch(&mut self, keys: Vec<String>) -> GlideResult<()> {
        if self.phase == SessionPhase::Queuing {
            return Err(GlideError::Transaction(
                "WATCH inside MULTI is not allowed".to_string(),
            ));
        }
        if keys.is_empty() {
            return Ok(());
        }
        let args: Vec<Value> = keys.iter().map(|k| Value::from(k.as_str())).collect();
        expect_ok(self.executor.execute("WATCH", &args).await?)?;
        self.watched.extend(keys);
        Ok(())
    }

    /// Drop all watches without touching the queue
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn unwatch(&mut self) -> GlideResult<()> {
        expect_ok(self.executor.execute("UNWATCH", &[]).await?)?;
        self.watched.clear();
        Ok(())
    }

    /// Open the queued phase with MULTI
    ///
    /// # Errors
    ///
    /// Fails fast with [`GlideError::Transaction`] when a MULTI is already
    /// open on this session.
    pub async fn multi(&mut self) -> GlideResult<()> {
        if self.phase == SessionPhase::Queuing {
            return Err(GlideError::Transaction(
                "MULTI calls can not be nested".to_string(),
            ));
        }
        expect_ok(self.executor.execute("MULTI", &[]).await?)?;
        self.phase = SessionPhase::Queuing;
        Ok(())
    }

    /// Queue a typed command; the server answers QUEUED immediately
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Transaction`] outside the queued phase.
    pub async fn queue<C: Command>(&mut self, command: C) -> GlideResult<()> {
        self.queue_raw(command.command_name().to_string(), command.args())
            .await
    }

    /// Queue a raw command
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Transaction`] outside the queued phase.
    pub async fn queue_raw(&mut self, command: String, args: Vec<Value>) -> GlideResult<()> {
        if self.phase != SessionPhase::Queuing {
            return Err(GlideError::Transaction(
                "No MULTI in progress".to_string(),
            ));
        }
        match self.executor.execute(&command, &args).await? {
            Value::SimpleString(ref s) if s == "QUEUED" => {
                self.queued += 1;
                Ok(())
            }
            other => Err(GlideError::Transaction(format!(
                "Expected QUEUED, got {other:?}"
            ))),
        }
    }

    /// Queue a SET
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Transaction`] outside the queued phase.
    pub async fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> GlideResult<()> {
        self.queue(crate::commands::SetCommand::new(key, value)).await
    }

    /// Queue a GET
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Transaction`] outside the queued phase.
    pub async fn get(&mut self, key: impl Into<String>) -> GlideResult<()> {
        self.queue(crate::commands::GetCommand::new(key)).await
    }

    /// Queue an INCR
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Transaction`] outside the queued phase.
    pub async fn incr(&mut self, key: impl Into<String>) -> GlideResult<()> {
        self.queue(crate::commands::IncrCommand::new(key)).await
    }

    /// Queue a DEL
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Transaction`] outside the queued phase.
    pub async fn del(&mut self, keys: Vec<String>) -> GlideResult<()> {
        self.queue(crate::commands::DelCommand::new(keys)).await
    }

    /// Run the queue atomically
    ///
    /// A null reply means a watched key changed and nothing ran: that is
    /// [`ExecOutcome::Aborted`]. Either way the session returns to the open
    /// phase with watches cleared.
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Transaction`] when no MULTI is in progress.
    pub async fn exec(&mut self) -> GlideResult<ExecOutcome> {
        if self.phase != SessionPhase::Queuing {
            return Err(GlideError::Transaction(
                "EXEC without MULTI".to_string(),
            ));
        }
        let reply = self.executor.execute("EXEC", &[]).await?;
        self.reset();
        match reply {
            Value::Null => Ok(ExecOutcome::Aborted),
            Value::Array(results) => Ok(ExecOutcome::Results(results)),
            other => Err(GlideError::Transaction(format!(
                "Unexpected EXEC reply: {other:?}"
            ))),
        }
    }

    /// Throw the queue away and drop all watches
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Transaction`] when no MULTI is in progress.
    pub async fn discard(&mut self) -> GlideResult<()> {
        if self.phase != SessionPhase::Queuing {
            return Err(GlideError::Transaction(
                "DISCARD without MULTI".to_string(),
            ));
        }
        expect_ok(self.executor.execute("DISCARD", &[]).await?)?;
        self.reset();
        Ok(())
    }

    /// Number of commands queued since MULTI
    #[must_use]
    pub const fn queued_len(&self) -> usize {
        self.queued
    }

    /// Keys watched by this session
    #[must_use]
    pub fn watched_keys(&self) -> &[String] {
        &self.watched
    }

    /// Give the underlying executor back
    pub fn into_inner(self) -> E {
        self.executor
    }

    fn reset(&mut self) {
        self.phase = SessionPhase::Open;
        self.watched.clear();
        self.queued = 0;
    }
}

fn expect_ok(reply: Value) -> GlideResult<()> {
    match reply {
        Value::SimpleString(ref s) if s == "OK" => Ok(()),
        other => Err(GlideError::Transaction(format!(
            "Expected OK, got {other:?}"
        ))),
    }
}
