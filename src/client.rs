//! Client facades for standalone servers and clusters
//!
//! [`Client`] talks to one server through a multiplexed connection.
//! [`ClusterClient`] adds slot-based routing on top: it bootstraps the slot
//! map from CLUSTER SLOTS, keeps one multiplexed connection per node, follows
//! MOVED/ASK redirects, and fans multi-node routes out concurrently.
//!
//! # Examples
//!
//! ```no_run
//! use valkey_glide::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect(ClientConfig::new("localhost", 6379)).await?;
//!     client.set("greeting", "hello").await?;
//!     assert_eq!(client.get("greeting").await?, Some("hello".to_string()));
//!     Ok(())
//! }
//! ```

use crate::cluster::{calculate_slot, ClusterTopology, TopologyView};
use crate::commands::{
    Command, DelCommand, ExistsCommand, ExpireCommand, GetCommand, IncrCommand, SetCommand,
    TtlCommand,
};
use crate::connection::{Connection, ConnectionManager, ConnectionSettings};
use crate::core::config::{ClientConfig, ClusterClientConfig};
use crate::core::error::{GlideError, GlideResult};
use crate::core::types::NodeAddress;
use crate::core::value::Value;
use crate::pool::NodePool;
use crate::pubsub::{PublishTransport, Subscriber};
use crate::routing::{collect_node_replies, resolve, NodeReply, Route, RouteTargets};
use crate::script::{
    eval_args, parse_function_list, parse_script_exists, FunctionLibrary, FunctionRestorePolicy,
    ScriptRunner,
};
use crate::transaction::Transaction;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

fn standalone_settings(config: &ClientConfig) -> ConnectionSettings {
    ConnectionSettings {
        connect_timeout: config.effective_connect_timeout(),
        operation_timeout: config.operation_timeout,
        tcp_keepalive: config.tcp_keepalive,
        credentials: config.credentials.clone(),
        database: config.database,
    }
}

fn cluster_settings(config: &ClusterClientConfig) -> ConnectionSettings {
    ConnectionSettings {
        connect_timeout: config.effective_connect_timeout(),
        operation_timeout: config.operation_timeout,
        tcp_keepalive: config.tcp_keepalive,
        credentials: config.credentials.clone(),
        // SELECT does not exist in cluster mode
        database: 0,
    }
}

fn expect_ok(reply: &Value) -> GlideResult<()> {
    match reply {
        Value::SimpleString(s) if s == "OK" => Ok(()),
        other => Err(GlideError::UnexpectedResponse(format!("{other:?}"))),
    }
}

/// Client for a standalone server
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    manager: ConnectionManager,
    pool: Option<NodePool>,
}

impl Client {
    /// Validate the configuration without touching the network
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::ConfigConflict`] when both bootstrap shapes are
    /// supplied, [`GlideError::Config`] when neither is.
    pub fn new(config: ClientConfig) -> GlideResult<Self> {
        config.validate()?;
        let manager = ConnectionManager::new(standalone_settings(&config));
        Ok(Self {
            config,
            manager,
            pool: None,
        })
    }

    /// Create a client and open its connection in one step
    ///
    /// # Errors
    ///
    /// Propagates validation and connection errors.
    pub async fn connect(config: ClientConfig) -> GlideResult<Self> {
        let mut client = Self::new(config)?;
        client.open().await?;
        Ok(client)
    }

    /// Open the connection
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::AlreadyConnected`] when called on a client whose
    /// connection is already open.
    pub async fn open(&mut self) -> GlideResult<()> {
        let conn = self.manager.connect(&self.config.endpoints()).await?;
        info!(address = %conn.address(), "connected");
        self.pool = Some(NodePool::with_connection(
            conn,
            self.manager.settings().clone(),
            self.config.reconnect.clone(),
        ));
        Ok(())
    }

    /// Whether the client currently holds an open connection
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Close the connection; safe to call repeatedly
    pub fn close(&mut self) {
        self.manager.close();
        self.pool = None;
    }

    fn pool(&self) -> GlideResult<&NodePool> {
        self.pool
            .as_ref()
            .ok_or_else(|| GlideError::Connection("Client is not connected".to_string()))
    }

    /// Run a raw command
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn execute_raw(&self, command: &str, args: Vec<Value>) -> GlideResult<Value> {
        self.pool()?.request(command.to_string(), args).await
    }

    async fn execute<C: Command>(&self, command: C) -> GlideResult<C::Output> {
        let reply = self
            .execute_raw(command.command_name(), command.args())
            .await?;
        command.parse_response(reply)
    }

    /// Get the value of a key
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn get(&self, key: impl Into<String>) -> GlideResult<Option<String>> {
        self.execute(GetCommand::new(key)).await
    }

    /// Set a key to a value
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> GlideResult<bool> {
        self.execute(SetCommand::new(key, value)).await
    }

    /// Set a key with a time-to-live
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn set_ex(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> GlideResult<bool> {
        self.execute(SetCommand::new(key, value).expire(ttl)).await
    }

    /// Delete keys, returning how many existed
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn del(&self, keys: Vec<String>) -> GlideResult<i64> {
        self.execute(DelCommand::new(keys)).await
    }

    /// Whether a key exists
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn exists(&self, key: impl Into<String>) -> GlideResult<bool> {
        self.execute(ExistsCommand::new(key)).await
    }

    /// Increment a key by one
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn incr(&self, key: impl Into<String>) -> GlideResult<i64> {
        self.execute(IncrCommand::new(key)).await
    }

    /// Increment a key by an arbitrary amount
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn incr_by(&self, key: impl Into<String>, delta: i64) -> GlideResult<i64> {
        self.execute(IncrCommand::by(key, delta)).await
    }

    /// Remaining time-to-live in seconds
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn ttl(&self, key: impl Into<String>) -> GlideResult<i64> {
        self.execute(TtlCommand::new(key)).await
    }

    /// Set a key's time-to-live
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn expire(&self, key: impl Into<String>, seconds: i64) -> GlideResult<bool> {
        self.execute(ExpireCommand::new(key, seconds)).await
    }

    /// PING the server
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn ping(&self) -> GlideResult<String> {
        self.execute_raw("PING", vec![]).await?.as_string()
    }

    /// PING with a payload, echoed back
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn ping_message(&self, message: &str) -> GlideResult<String> {
        self.execute_raw("PING", vec![Value::from(message)])
            .await?
            .as_string()
    }

    /// Full INFO output
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn info(&self) -> GlideResult<String> {
        self.execute_raw("INFO", vec![]).await?.as_string()
    }

    /// INFO restricted to one section
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn info_section(&self, section: &str) -> GlideResult<String> {
        self.execute_raw("INFO", vec![Value::from(section)])
            .await?
            .as_string()
    }

    /// Publish a message, returning the receiver count
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn publish(&self, channel: &str, message: &str) -> GlideResult<i64> {
        self.execute_raw("PUBLISH", vec![Value::from(channel), Value::from(message)])
            .await?
            .as_int()
    }

    /// Open a dedicated subscriber connection
    ///
    /// # Errors
    ///
    /// Fails when the client is not connected or the server is unreachable.
    pub async fn subscriber(&self) -> GlideResult<Subscriber> {
        let conn = self.manager.open(self.primary_endpoint()?).await?;
        Ok(Subscriber::new(conn))
    }

    /// Open a transaction session on a dedicated connection
    ///
    /// # Errors
    ///
    /// Fails when the client is not connected or the server is unreachable.
    pub async fn transaction(&self) -> GlideResult<Transaction<Connection>> {
        let conn = self.manager.open(self.primary_endpoint()?).await?;
        Ok(Transaction::new(conn))
    }

    fn primary_endpoint(&self) -> GlideResult<NodeAddress> {
        if !self.manager.is_connected() {
            return Err(GlideError::Connection(
                "Client is not connected".to_string(),
            ));
        }
        self.config
            .endpoints()
            .into_iter()
            .next()
            .ok_or_else(|| GlideError::Config("No endpoints specified".to_string()))
    }

    /// Per-digest presence in the server script cache
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn script_exists(&self, shas: Vec<String>) -> GlideResult<Vec<bool>> {
        let args = shas.into_iter().map(Value::from).collect();
        parse_script_exists(self.execute_raw("SCRIPT EXISTS", args).await?)
    }

    /// Drop the server script cache
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn script_flush(&self) -> GlideResult<()> {
        expect_ok(&self.execute_raw("SCRIPT FLUSH", vec![]).await?)
    }

    /// Load a function library, returning its name
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn function_load(&self, code: &str, replace: bool) -> GlideResult<String> {
        let mut args = Vec::new();
        if replace {
            args.push(Value::from("REPLACE"));
        }
        args.push(Value::from(code));
        self.execute_raw("FUNCTION LOAD", args).await?.as_string()
    }

    /// Delete a function library by name
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn function_delete(&self, library: &str) -> GlideResult<()> {
        expect_ok(
            &self
                .execute_raw("FUNCTION DELETE", vec![Value::from(library)])
                .await?,
        )
    }

    /// Serialize all loaded libraries
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn function_dump(&self) -> GlideResult<Bytes> {
        self.execute_raw("FUNCTION DUMP", vec![]).await?.as_bytes()
    }

    /// Restore libraries from a dump payload
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn function_restore(
        &self,
        dump: Bytes,
        policy: FunctionRestorePolicy,
    ) -> GlideResult<()> {
        let args = vec![Value::BulkString(dump), Value::from(policy.as_arg())];
        expect_ok(&self.execute_raw("FUNCTION RESTORE", args).await?)
    }

    /// List loaded function libraries
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn function_list(&self) -> GlideResult<Vec<FunctionLibrary>> {
        parse_function_list(self.execute_raw("FUNCTION LIST", vec![]).await?)
    }

    /// Engine statistics for loaded functions
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn function_stats(&self) -> GlideResult<Value> {
        self.execute_raw("FUNCTION STATS", vec![]).await
    }

    /// Call a loaded function
    ///
    /// # Errors
    ///
    /// Propagates connection and server errors.
    pub async fn fcall(
        &self,
        function: &str,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> GlideResult<Value> {
        self.execute_raw("FCALL", eval_args(function, keys, args))
            .await
    }
}

#[async_trait]
impl PublishTransport for Client {
    async fn publish_message(&self, channel: &str, message: &str) -> GlideResult<i64> {
        self.publish(channel, message).await
    }
}

#[async_trait]
impl ScriptRunner for Client {
    async fn eval(
        &self,
        script: &str,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> GlideResult<Value> {
        self.execute_raw("EVAL", eval_args(script, keys, args)).await
    }

    async fn evalsha(
        &self,
        sha: &str,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> GlideResult<Value> {
        self.execute_raw("EVALSHA", eval_args(sha, keys, args)).await
    }

    async fn script_load(&self, source: &str) -> GlideResult<String> {
        self.execute_raw("SCRIPT LOAD", vec![Value::from(source)])
            .await?
            .as_string()
    }
}

/// Reply of a routed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedReply {
    /// One node answered
    Single(NodeAddress, Value),
    /// Fan-out: one reply per node, address-sorted
    PerNode(Vec<NodeReply>),
}

impl RoutedReply {
    /// The single reply, discarding the answering address
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Cluster`] for fan-out replies.
    pub fn into_single(self) -> GlideResult<Value> {
        match self {
            Self::Single(_, value) => Ok(value),
            Self::PerNode(_) => Err(GlideError::Cluster(
                "Expected a single-node reply".to_string(),
            )),
        }
    }

    /// Per-node entries; a single reply becomes a one-entry list
    #[must_use]
    pub fn into_per_node(self) -> Vec<NodeReply> {
        match self {
            Self::Single(address, value) => vec![(address, value)],
            Self::PerNode(replies) => replies,
        }
    }
}

/// Client for a cluster deployment
#[derive(Debug)]
pub struct ClusterClient {
    config: ClusterClientConfig,
    manager: ConnectionManager,
    topology: ClusterTopology,
    pools: Arc<RwLock<HashMap<NodeAddress, NodePool>>>,
}

impl ClusterClient {
    /// Validate the configuration without touching the network
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::ConfigConflict`] when both `seeds` and
    /// `addresses` are supplied, [`GlideError::Config`] when neither is.
    pub fn new(config: ClusterClientConfig) -> GlideResult<Self> {
        config.validate()?;
        let manager = ConnectionManager::new(cluster_settings(&config));
        Ok(Self {
            config,
            manager,
            topology: ClusterTopology::new(),
            pools: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Create a cluster client and bootstrap the topology in one step
    ///
    /// # Errors
    ///
    /// Propagates validation, connection and bootstrap errors.
    pub async fn connect(config: ClusterClientConfig) -> GlideResult<Self> {
        let mut client = Self::new(config)?;
        client.open().await?;
        Ok(client)
    }

    /// Connect to the first reachable bootstrap node and load the slot map
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::AlreadyConnected`] on a second call, connection
    /// errors when no bootstrap node answers.
    pub async fn open(&mut self) -> GlideResult<()> {
        let conn = self.manager.connect(&self.config.initial_nodes()).await?;
        let pool = NodePool::with_connection(
            conn,
            self.manager.settings().clone(),
            self.config.reconnect.clone(),
        );
        let reply = pool.request("CLUSTER SLOTS".to_string(), vec![]).await?;
        let view = TopologyView::from_cluster_slots(&reply)?;
        info!(
            nodes = view.all_nodes().len(),
            slots = view.covered_slots(),
            "cluster topology loaded"
        );
        self.topology.replace(view).await;
        self.pools
            .write()
            .await
            .insert(pool.address().clone(), pool);
        Ok(())
    }

    /// Whether the client currently holds an open connection
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Close all node connections; safe to call repeatedly
    pub async fn close(&mut self) {
        self.manager.close();
        self.pools.write().await.clear();
        self.topology.replace(TopologyView::default()).await;
    }

    /// Rebuild the slot map from CLUSTER SLOTS
    ///
    /// Queries the currently known nodes, or the original bootstrap list when
    /// `advanced.refresh_topology_from_initial_nodes` is set.
    ///
    /// # Errors
    ///
    /// Returns the last node's error when every source fails.
    pub async fn refresh_topology(&self) -> GlideResult<()> {
        let sources = if self.config.advanced.refresh_topology_from_initial_nodes {
            self.config.initial_nodes()
        } else {
            let known = self.topology.current().await.all_nodes();
            if known.is_empty() {
                self.config.initial_nodes()
            } else {
                known
            }
        };

        let mut last_err = GlideError::Cluster("No topology source available".to_string());
        for address in sources {
            let attempt = async {
                let pool = self.pool_for(&address).await?;
                let reply = pool.request("CLUSTER SLOTS".to_string(), vec![]).await?;
                TopologyView::from_cluster_slots(&reply)
            };
            match attempt.await {
                Ok(view) => {
                    self.topology.replace(view).await;
                    return Ok(());
                }
                Err(e) => {
                    debug!(%address, error = %e, "topology refresh source failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn pool_for(&self, address: &NodeAddress) -> GlideResult<NodePool> {
        if let Some(pool) = self.pools.read().await.get(address) {
            return Ok(pool.clone());
        }
        let pool = NodePool::connect(
            address.clone(),
            self.manager.settings().clone(),
            self.config.reconnect.clone(),
        )
        .await?;
        Ok(self
            .pools
            .write()
            .await
            .entry(address.clone())
            .or_insert(pool)
            .clone())
    }

    /// Run a command at the nodes a route resolves to
    ///
    /// Single-node routes follow MOVED/ASK redirects: MOVED reassigns the
    /// slot in the topology and retries at the new owner, ASK retries once at
    /// the named node after ASKING without touching the topology. Fan-out
    /// routes run concurrently and return per-node replies in address order.
    ///
    /// # Errors
    ///
    /// Propagates resolution, connection and server errors; redirect loops
    /// beyond `max_redirects` surface the final redirect error.
    pub async fn execute_route(
        &self,
        command: &str,
        args: Vec<Value>,
        route: &Route,
        is_read: bool,
    ) -> GlideResult<RoutedReply> {
        let view = self.topology.current().await;
        match resolve(route, &view, is_read, self.config.read_from)? {
            RouteTargets::Single(address) => {
                let (address, value) = self.execute_at(address, command, args).await?;
                Ok(RoutedReply::Single(address, value))
            }
            RouteTargets::Fanout(addresses) => {
                let futures = addresses.into_iter().map(|address| {
                    let args = args.clone();
                    async move {
                        let (address, value) = self.execute_at(address, command, args).await?;
                        Ok::<NodeReply, GlideError>((address, value))
                    }
                });
                let replies: Vec<NodeReply> = join_all(futures)
                    .await
                    .into_iter()
                    .collect::<GlideResult<_>>()?;
                Ok(RoutedReply::PerNode(collect_node_replies(replies)))
            }
        }
    }

    async fn execute_at(
        &self,
        mut address: NodeAddress,
        command: &str,
        args: Vec<Value>,
    ) -> GlideResult<(NodeAddress, Value)> {
        let max = self.config.max_redirects;
        let mut asking = false;
        for attempt in 0..=max {
            let pool = self.pool_for(&address).await?;
            // ASKING rides with the retried command so no concurrent caller
            // can consume the one-shot grant in between
            let result = if asking {
                asking = false;
                pool.request_asking(command.to_string(), args.clone()).await
            } else {
                pool.request(command.to_string(), args.clone()).await
            };
            match result {
                Err(GlideError::Moved { slot, host, port }) if attempt < max => {
                    let owner = NodeAddress::new(host, port);
                    debug!(slot, %owner, "following MOVED redirect");
                    self.topology.apply_moved(slot, owner.clone()).await;
                    address = owner;
                }
                Err(GlideError::Ask { slot, host, port }) if attempt < max => {
                    debug!(slot, host, port, "following ASK redirect");
                    address = NodeAddress::new(host, port);
                    asking = true;
                }
                other => return other.map(|value| (address, value)),
            }
        }
        Err(GlideError::MaxRetriesExceeded(max))
    }

    /// Run a typed command, routed by its first key
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Cluster`] for commands without keys.
    pub async fn execute<C: Command>(&self, command: C) -> GlideResult<C::Output> {
        let route = {
            let keys = command.keys();
            let first = keys.first().ok_or_else(|| {
                GlideError::Cluster("Command has no keys to route by".to_string())
            })?;
            Route::Key(String::from_utf8_lossy(first).into_owned())
        };
        let reply = self
            .execute_route(
                command.command_name(),
                command.args(),
                &route,
                command.is_read(),
            )
            .await?
            .into_single()?;
        command.parse_response(reply)
    }

    /// Get the value of a key
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn get(&self, key: impl Into<String>) -> GlideResult<Option<String>> {
        self.execute(GetCommand::new(key)).await
    }

    /// Set a key to a value
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> GlideResult<bool> {
        self.execute(SetCommand::new(key, value)).await
    }

    /// Delete keys; multi-key calls are routed by the first key, so keys
    /// should share a hash tag
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn del(&self, keys: Vec<String>) -> GlideResult<i64> {
        self.execute(DelCommand::new(keys)).await
    }

    /// Whether a key exists
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn exists(&self, key: impl Into<String>) -> GlideResult<bool> {
        self.execute(ExistsCommand::new(key)).await
    }

    /// Increment a key by one
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn incr(&self, key: impl Into<String>) -> GlideResult<i64> {
        self.execute(IncrCommand::new(key)).await
    }

    /// PING one node or a set of nodes
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn ping(&self, route: Option<Route>) -> GlideResult<RoutedReply> {
        let route = route.unwrap_or(Route::RandomNode);
        self.execute_route("PING", vec![], &route, true).await
    }

    /// PING with a payload
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn ping_message(
        &self,
        message: &str,
        route: Option<Route>,
    ) -> GlideResult<RoutedReply> {
        let route = route.unwrap_or(Route::RandomNode);
        self.execute_route("PING", vec![Value::from(message)], &route, true)
            .await
    }

    /// INFO from one node or a set of nodes, one entry per node
    ///
    /// Entries never merge: two nodes reporting the same field yield two
    /// entries under their own addresses.
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn info(
        &self,
        route: Option<Route>,
        section: Option<&str>,
    ) -> GlideResult<Vec<(NodeAddress, String)>> {
        let route = route.unwrap_or(Route::RandomNode);
        let args = section.map(|s| vec![Value::from(s)]).unwrap_or_default();
        self.execute_route("INFO", args, &route, true)
            .await?
            .into_per_node()
            .into_iter()
            .map(|(address, value)| Ok((address, value.as_string()?)))
            .collect()
    }

    /// Publish a message; the channel name picks the shard
    ///
    /// The count reflects subscribers reachable through the channel's slot
    /// owner.
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn publish(&self, channel: &str, message: &str) -> GlideResult<i64> {
        let route = Route::PrimarySlotKey(channel.to_string());
        self.execute_route(
            "PUBLISH",
            vec![Value::from(channel), Value::from(message)],
            &route,
            false,
        )
        .await?
        .into_single()?
        .as_int()
    }

    /// Open a dedicated subscriber connection to one node
    ///
    /// # Errors
    ///
    /// Fails when no node is reachable.
    pub async fn subscriber(&self) -> GlideResult<Subscriber> {
        let view = self.topology.current().await;
        let address = match resolve(
            &Route::RandomNode,
            &view,
            true,
            self.config.read_from,
        )? {
            RouteTargets::Single(address) => address,
            RouteTargets::Fanout(_) => {
                return Err(GlideError::Cluster(
                    "Subscriber needs a single node".to_string(),
                ))
            }
        };
        let conn = self.manager.open(address).await?;
        Ok(Subscriber::new(conn))
    }

    /// Open a transaction session pinned to the node owning `key`'s slot
    ///
    /// All commands queued in the session must hash to that node; sharing a
    /// hash tag with `key` guarantees it.
    ///
    /// # Errors
    ///
    /// Fails when the slot has no known owner or the node is unreachable.
    pub async fn transaction(&self, key: &str) -> GlideResult<Transaction<Connection>> {
        let view = self.topology.current().await;
        let slot = calculate_slot(key.as_bytes());
        let address = view
            .primary_for_slot(slot)
            .cloned()
            .ok_or_else(|| GlideError::Cluster(format!("No node owns slot {slot}")))?;
        let conn = self.manager.open(address).await?;
        Ok(Transaction::new(conn))
    }

    /// Per-digest presence, true only when every primary has the script
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::Cluster`] when the topology has no primaries;
    /// propagates routing and server errors otherwise.
    pub async fn script_exists(&self, shas: Vec<String>) -> GlideResult<Vec<bool>> {
        let args: Vec<Value> = shas.into_iter().map(Value::from).collect();
        let mut replies = self
            .execute_route("SCRIPT EXISTS", args, &Route::AllPrimaries, true)
            .await?
            .into_per_node()
            .into_iter();

        // Presence is seeded from a real reply, never assumed
        let Some((_, first)) = replies.next() else {
            return Err(GlideError::Cluster("No primaries in topology".to_string()));
        };
        let mut merged = parse_script_exists(first)?;
        for (_, reply) in replies {
            for (present, flag) in parse_script_exists(reply)?.iter().zip(merged.iter_mut()) {
                *flag &= present;
            }
        }
        Ok(merged)
    }

    /// Drop the script cache on every node
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn script_flush(&self) -> GlideResult<()> {
        for (_, reply) in self
            .execute_route("SCRIPT FLUSH", vec![], &Route::AllNodes, false)
            .await?
            .into_per_node()
        {
            expect_ok(&reply)?;
        }
        Ok(())
    }

    /// Load a function library on every primary, returning its name
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn function_load(&self, code: &str, replace: bool) -> GlideResult<String> {
        let mut args = Vec::new();
        if replace {
            args.push(Value::from("REPLACE"));
        }
        args.push(Value::from(code));
        self.execute_route("FUNCTION LOAD", args, &Route::AllPrimaries, false)
            .await?
            .into_per_node()
            .into_iter()
            .next()
            .ok_or_else(|| GlideError::Cluster("No primaries in topology".to_string()))?
            .1
            .as_string()
    }

    /// Delete a function library from every primary
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn function_delete(&self, library: &str) -> GlideResult<()> {
        for (_, reply) in self
            .execute_route(
                "FUNCTION DELETE",
                vec![Value::from(library)],
                &Route::AllPrimaries,
                false,
            )
            .await?
            .into_per_node()
        {
            expect_ok(&reply)?;
        }
        Ok(())
    }

    /// Serialize loaded libraries from one node
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn function_dump(&self) -> GlideResult<Bytes> {
        self.execute_route("FUNCTION DUMP", vec![], &Route::RandomNode, true)
            .await?
            .into_single()?
            .as_bytes()
    }

    /// Restore libraries on every primary from a dump payload
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn function_restore(
        &self,
        dump: Bytes,
        policy: FunctionRestorePolicy,
    ) -> GlideResult<()> {
        let args = vec![Value::BulkString(dump), Value::from(policy.as_arg())];
        for (_, reply) in self
            .execute_route("FUNCTION RESTORE", args, &Route::AllPrimaries, false)
            .await?
            .into_per_node()
        {
            expect_ok(&reply)?;
        }
        Ok(())
    }

    /// List loaded function libraries, from one node
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn function_list(&self) -> GlideResult<Vec<FunctionLibrary>> {
        parse_function_list(
            self.execute_route("FUNCTION LIST", vec![], &Route::RandomNode, true)
                .await?
                .into_single()?,
        )
    }

    /// Per-node engine statistics
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn function_stats(&self) -> GlideResult<Vec<(NodeAddress, Value)>> {
        Ok(self
            .execute_route("FUNCTION STATS", vec![], &Route::AllNodes, true)
            .await?
            .into_per_node())
    }

    /// Call a loaded function, routed by its first key
    ///
    /// # Errors
    ///
    /// Propagates routing and server errors.
    pub async fn fcall(
        &self,
        function: &str,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> GlideResult<Value> {
        let route = keys
            .first()
            .map_or(Route::RandomNode, |k| Route::Key(k.clone()));
        self.execute_route("FCALL", eval_args(function, keys, args), &route, false)
            .await?
            .into_single()
    }
}

#[async_trait]
impl PublishTransport for ClusterClient {
    async fn publish_message(&self, channel: &str, message: &str) -> GlideResult<i64> {
        self.publish(channel, message).await
    }
}

#[async_trait]
impl ScriptRunner for ClusterClient {
    async fn eval(
        &self,
        script: &str,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> GlideResult<Value> {
        let route = keys
            .first()
            .map_or(Route::RandomNode, |k| Route::Key(k.clone()));
        self.execute_route("EVAL", eval_args(script, keys, args), &route, false)
            .await?
            .into_single()
    }

    async fn evalsha(
        &self,
        sha: &str,
        keys: Vec<String>,
        args: Vec<String>,
    ) -> GlideResult<Value> {
        let route = keys
            .first()
            .map_or(Route::RandomNode, |k| Route::Key(k.clone()));
        self.execute_route("EVALSHA", eval_args(sha, keys, args), &route, false)
            .await?
            .into_single()
    }

    async fn script_load(&self, source: &str) -> GlideResult<String> {
        self.execute_route(
            "SCRIPT LOAD",
            vec![Value::from(source)],
            &Route::AllPrimaries,
            false,
        )
        .await?
        .into_per_node()
        .into_iter()
        .next()
        .ok_or_else(|| GlideError::Cluster("No primaries in topology".to_string()))?
        .1
        .as_string()
    }
}
