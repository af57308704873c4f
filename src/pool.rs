//! Per-node multiplexed connections
//!
//! Each node gets a single multiplexed connection: callers push requests into
//! an mpsc channel and a background task owns the socket, answering each
//! request through a oneshot. When the socket drops, the task reconnects with
//! the configured backoff and replays nothing: the in-flight request gets the
//! connection error and the caller decides whether to retry.

use crate::connection::{Connection, ConnectionSettings};
use crate::core::config::ReconnectConfig;
use crate::core::error::{GlideError, GlideResult};
use crate::core::types::NodeAddress;
use crate::core::value::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

struct CommandRequest {
    command: String,
    args: Vec<Value>,
    /// Send ASKING immediately before the command, on the same connection
    asking: bool,
    response_tx: oneshot::Sender<GlideResult<Value>>,
}

/// Handle to the multiplexed connection of one node
///
/// Cheap to clone; all clones feed the same background task.
#[derive(Clone, Debug)]
pub struct NodePool {
    address: NodeAddress,
    command_tx: mpsc::UnboundedSender<CommandRequest>,
}

impl NodePool {
    /// Spawn the connection task for a node
    ///
    /// The first connect happens eagerly so that configuration and
    /// reachability problems surface here rather than on the first command.
    ///
    /// # Errors
    ///
    /// Propagates the initial connection failure.
    pub async fn connect(
        address: NodeAddress,
        settings: ConnectionSettings,
        reconnect: ReconnectConfig,
    ) -> GlideResult<Self> {
        let conn = Connection::connect(address.clone(), &settings).await?;
        Ok(Self::with_connection(conn, settings, reconnect))
    }

    /// Spawn the connection task around an already-open connection
    #[must_use]
    pub fn with_connection(
        conn: Connection,
        settings: ConnectionSettings,
        reconnect: ReconnectConfig,
    ) -> Self {
        let address = conn.address().clone();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let task_address = address.clone();
        tokio::spawn(async move {
            run_node(conn, task_address, settings, reconnect, command_rx).await;
        });

        Self {
            address,
            command_tx,
        }
    }

    /// The node this pool is bound to
    #[must_use]
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Execute a command on this node
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Connection`] when the background task has shut
    /// down, or whatever the server/socket produced.
    pub async fn request(&self, command: String, args: Vec<Value>) -> GlideResult<Value> {
        self.enqueue(command, args, false).await
    }

    /// Execute a command preceded by ASKING, as one unit
    ///
    /// The connection task runs both frames back to back, so no concurrent
    /// caller's command can slip in and consume the one-shot ASKING grant.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request); an ASKING failure is the result.
    pub async fn request_asking(&self, command: String, args: Vec<Value>) -> GlideResult<Value> {
        self.enqueue(command, args, true).await
    }

    async fn enqueue(&self, command: String, args: Vec<Value>, asking: bool) -> GlideResult<Value> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(CommandRequest {
                command,
                args,
                asking,
                response_tx,
            })
            .map_err(|_| {
                GlideError::Connection(format!("Connection to {} is closed", self.address))
            })?;

        response_rx.await.map_err(|_| {
            GlideError::Connection(format!("Connection to {} dropped mid-request", self.address))
        })?
    }
}

async fn run_node(
    mut conn: Connection,
    address: NodeAddress,
    settings: ConnectionSettings,
    reconnect: ReconnectConfig,
    mut command_rx: mpsc::UnboundedReceiver<CommandRequest>,
) {
    while let Some(req) = command_rx.recv().await {
        let result = run_request(&mut conn, &req).await;
        let connection_lost = matches!(result, Err(GlideError::Io(_) | GlideError::Connection(_)));
        // The requester may have given up; that is fine
        let _ = req.response_tx.send(result);

        if connection_lost {
            match reestablish(&address, &settings, &reconnect).await {
                Some(new_conn) => conn = new_conn,
                None => break,
            }
        }
    }
    debug!(%address, "node connection task stopped");
}

async fn run_request(conn: &mut Connection, req: &CommandRequest) -> GlideResult<Value> {
    if req.asking {
        conn.request("ASKING", &[]).await?;
    }
    conn.request(&req.command, &req.args).await
}

async fn reestablish(
    address: &NodeAddress,
    settings: &ConnectionSettings,
    reconnect: &ReconnectConfig,
) -> Option<Connection> {
    if !reconnect.enabled {
        return None;
    }

    let mut attempt = 0;
    loop {
        if let Some(max) = reconnect.max_attempts {
            if attempt >= max {
                warn!(%address, attempts = attempt, "giving up on reconnect");
                return None;
            }
        }

        tokio::time::sleep(reconnect.delay_for_attempt(attempt)).await;
        match Connection::connect(address.clone(), settings).await {
            Ok(conn) => {
                debug!(%address, "reconnected");
                return Some(conn);
            }
            Err(e) => {
                warn!(%address, attempt, error = %e, "reconnect attempt failed");
                attempt += 1;
            }
        }
    }
}
