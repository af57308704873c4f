//! In-process RESP server backing the integration tests
//!
//! Speaks enough of the protocol for the client to exercise its full surface
//! without an external server: a string keyspace, WATCH/MULTI/EXEC with
//! version-based conflict detection, pub/sub delivery, a script cache, and
//! optional MOVED/ASK redirect injection for cluster tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use valkey_glide::cluster::calculate_slot;
use valkey_glide::protocol::{decode_buffered, RespEncoder};
use valkey_glide::script::sha1_hex;
use valkey_glide::{NodeAddress, Value};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, PartialEq, Eq)]
enum RedirectKind {
    Moved,
    Ask,
}

#[derive(Default)]
struct ServerState {
    store: HashMap<String, String>,
    versions: HashMap<String, u64>,
    scripts: HashMap<String, String>,
    subscribers: HashMap<String, HashMap<u64, mpsc::UnboundedSender<(String, String)>>>,
    redirects: HashMap<String, (RedirectKind, NodeAddress)>,
}

impl ServerState {
    fn bump(&mut self, key: &str) {
        *self.versions.entry(key.to_string()).or_insert(0) += 1;
    }

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }
}

/// One fake server bound to an ephemeral port
pub struct TestServer {
    address: NodeAddress,
    state: Arc<Mutex<ServerState>>,
}

impl TestServer {
    pub async fn start() -> Self {
        // RUST_LOG=valkey_glide=debug shows the client side of each test
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let address = NodeAddress::new("127.0.0.1", port);
        let state = Arc::new(Mutex::new(ServerState::default()));

        let accept_state = state.clone();
        let accept_address = address.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let state = accept_state.clone();
                let address = accept_address.clone();
                tokio::spawn(handle_conn(socket, state, address));
            }
        });

        Self { address, state }
    }

    pub fn address(&self) -> NodeAddress {
        self.address.clone()
    }

    /// Make this server answer the given key with a MOVED to `target`
    pub async fn redirect_moved(&self, key: &str, target: NodeAddress) {
        self.state
            .lock()
            .await
            .redirects
            .insert(key.to_string(), (RedirectKind::Moved, target));
    }

    /// Make this server answer the given key with an ASK to `target`
    pub async fn redirect_ask(&self, key: &str, target: NodeAddress) {
        self.state
            .lock()
            .await
            .redirects
            .insert(key.to_string(), (RedirectKind::Ask, target));
    }

    /// Value currently stored under a key, bypassing the protocol
    pub async fn stored(&self, key: &str) -> Option<String> {
        self.state.lock().await.store.get(key).cloned()
    }

    /// Seed a key directly, bumping its version like a write would
    pub async fn seed(&self, key: &str, value: &str) {
        let mut state = self.state.lock().await;
        state.store.insert(key.to_string(), value.to_string());
        state.bump(key);
    }
}

#[derive(Default)]
struct ConnState {
    id: u64,
    in_multi: bool,
    queue: Vec<Vec<String>>,
    watching: HashMap<String, u64>,
    subscriptions: BTreeSet<String>,
}

async fn handle_conn(mut socket: TcpStream, state: Arc<Mutex<ServerState>>, address: NodeAddress) {
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<(String, String)>();
    let mut conn = ConnState {
        id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
        ..Default::default()
    };
    let mut buf = BytesMut::new();

    loop {
        tokio::select! {
            delivery = push_rx.recv() => {
                let Some((channel, payload)) = delivery else { break };
                let frame = Value::Array(vec![
                    Value::from("message"),
                    Value::from(channel),
                    Value::from(payload),
                ]);
                if write_value(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
            read = socket.read_buf(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                loop {
                    let frame = match decode_buffered(&mut buf) {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(_) => return,
                    };
                    let Some(args) = to_args(&frame) else {
                        let _ = write_value(
                            &mut socket,
                            &Value::Error("ERR invalid request".to_string()),
                        )
                        .await;
                        return;
                    };
                    let replies = dispatch(&args, &mut conn, &state, &push_tx, &address).await;
                    for reply in replies {
                        if write_value(&mut socket, &reply).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    // Drop this connection's subscriptions so publish counts stay accurate
    let mut guard = state.lock().await;
    for channel in &conn.subscriptions {
        if let Some(entries) = guard.subscribers.get_mut(channel) {
            entries.remove(&conn.id);
        }
    }
}

async fn write_value(socket: &mut TcpStream, value: &Value) -> std::io::Result<()> {
    let mut out = BytesMut::new();
    RespEncoder::encode(value, &mut out);
    socket.write_all(&out).await
}

fn to_args(frame: &Value) -> Option<Vec<String>> {
    let Value::Array(items) = frame else {
        return None;
    };
    let mut args = Vec::with_capacity(items.len());
    for item in items {
        args.push(item.as_string().ok()?);
    }
    if args.is_empty() {
        return None;
    }
    Some(args)
}

fn ok() -> Value {
    Value::SimpleString("OK".to_string())
}

async fn dispatch(
    args: &[String],
    conn: &mut ConnState,
    state: &Arc<Mutex<ServerState>>,
    push_tx: &mpsc::UnboundedSender<(String, String)>,
    address: &NodeAddress,
) -> Vec<Value> {
    let cmd = args[0].to_ascii_uppercase();

    if conn.in_multi
        && !matches!(
            cmd.as_str(),
            "MULTI" | "EXEC" | "DISCARD" | "WATCH" | "UNWATCH"
        )
    {
        conn.queue.push(args.to_vec());
        return vec![Value::SimpleString("QUEUED".to_string())];
    }

    match cmd.as_str() {
        "AUTH" | "SELECT" | "ASKING" => vec![ok()],
        "PING" => vec![args.get(1).map_or_else(
            || Value::SimpleString("PONG".to_string()),
            |msg| Value::from(msg.as_str()),
        )],
        "INFO" => vec![Value::from(
            "# Server\r\nredis_version:7.2.0\r\nrole:master\r\n",
        )],
        "MULTI" => {
            conn.in_multi = true;
            conn.queue.clear();
            vec![ok()]
        }
        "EXEC" => {
            if !conn.in_multi {
                return vec![Value::Error("ERR EXEC without MULTI".to_string())];
            }
            conn.in_multi = false;
            let queued = std::mem::take(&mut conn.queue);
            let watching = std::mem::take(&mut conn.watching);

            let mut guard = state.lock().await;
            let conflicted = watching
                .iter()
                .any(|(key, version)| guard.version(key) != *version);
            if conflicted {
                return vec![Value::Null];
            }
            let results = queued
                .iter()
                .map(|queued_args| run_data_command(queued_args, &mut guard, address))
                .collect();
            vec![Value::Array(results)]
        }
        "DISCARD" => {
            conn.in_multi = false;
            conn.queue.clear();
            vec![ok()]
        }
        "WATCH" => {
            let guard = state.lock().await;
            for key in &args[1..] {
                conn.watching.insert(key.clone(), guard.version(key));
            }
            vec![ok()]
        }
        "UNWATCH" => {
            conn.watching.clear();
            vec![ok()]
        }
        "SUBSCRIBE" => {
            let mut guard = state.lock().await;
            let mut replies = Vec::new();
            for channel in &args[1..] {
                conn.subscriptions.insert(channel.clone());
                guard
                    .subscribers
                    .entry(channel.clone())
                    .or_default()
                    .insert(conn.id, push_tx.clone());
                replies.push(Value::Array(vec![
                    Value::from("subscribe"),
                    Value::from(channel.as_str()),
                    Value::Integer(conn.subscriptions.len() as i64),
                ]));
            }
            replies
        }
        "UNSUBSCRIBE" => {
            let mut guard = state.lock().await;
            let mut replies = Vec::new();
            for channel in &args[1..] {
                conn.subscriptions.remove(channel);
                if let Some(entries) = guard.subscribers.get_mut(channel) {
                    entries.remove(&conn.id);
                }
                replies.push(Value::Array(vec![
                    Value::from("unsubscribe"),
                    Value::from(channel.as_str()),
                    Value::Integer(conn.subscriptions.len() as i64),
                ]));
            }
            replies
        }
        "PUBLISH" => {
            if args.len() < 3 {
                return vec![Value::Error("ERR wrong number of arguments".to_string())];
            }
            let mut guard = state.lock().await;
            let mut receivers = 0;
            if let Some(entries) = guard.subscribers.get_mut(&args[1]) {
                entries.retain(|_, tx| tx.send((args[1].clone(), args[2].clone())).is_ok());
                receivers = entries.len() as i64;
            }
            vec![Value::Integer(receivers)]
        }
        "SCRIPT" => {
            let sub = args.get(1).map(|s| s.to_ascii_uppercase());
            let mut guard = state.lock().await;
            match sub.as_deref() {
                Some("LOAD") => {
                    let body = args.get(2).cloned().unwrap_or_default();
                    let sha = sha1_hex(&body);
                    guard.scripts.insert(sha.clone(), body);
                    vec![Value::from(sha)]
                }
                Some("EXISTS") => {
                    let flags = args[2..]
                        .iter()
                        .map(|sha| Value::Integer(i64::from(guard.scripts.contains_key(sha))))
                        .collect();
                    vec![Value::Array(flags)]
                }
                Some("FLUSH") => {
                    guard.scripts.clear();
                    vec![ok()]
                }
                _ => vec![Value::Error("ERR unknown SCRIPT subcommand".to_string())],
            }
        }
        "EVAL" => {
            let body = args.get(1).cloned().unwrap_or_default();
            let mut guard = state.lock().await;
            guard.scripts.insert(sha1_hex(&body), body.clone());
            vec![Value::from(body)]
        }
        "EVALSHA" => {
            let sha = args.get(1).cloned().unwrap_or_default();
            let guard = state.lock().await;
            match guard.scripts.get(&sha) {
                Some(body) => vec![Value::from(body.as_str())],
                None => vec![Value::Error("NOSCRIPT No matching script".to_string())],
            }
        }
        "CLUSTER" => {
            // Single node owning every slot; enough for routing tests
            vec![Value::Array(vec![Value::Array(vec![
                Value::Integer(0),
                Value::Integer(16383),
                Value::Array(vec![
                    Value::from(address.host.as_str()),
                    Value::Integer(i64::from(address.port)),
                    Value::from("test-node"),
                ]),
            ])])]
        }
        _ => {
            let mut guard = state.lock().await;
            vec![run_data_command(args, &mut guard, address)]
        }
    }
}

fn run_data_command(args: &[String], state: &mut ServerState, address: &NodeAddress) -> Value {
    let cmd = args[0].to_ascii_uppercase();

    if let Some(key) = args.get(1) {
        if let Some((kind, target)) = state.redirects.get(key) {
            if *target != *address {
                let slot = calculate_slot(key.as_bytes());
                let verb = match kind {
                    RedirectKind::Moved => "MOVED",
                    RedirectKind::Ask => "ASK",
                };
                return Value::Error(format!("{verb} {slot} {target}"));
            }
        }
    }

    match cmd.as_str() {
        "GET" => args
            .get(1)
            .and_then(|key| state.store.get(key))
            .map_or(Value::Null, |v| Value::from(v.as_str())),
        "SET" => {
            let (Some(key), Some(value)) = (args.get(1), args.get(2)) else {
                return Value::Error("ERR wrong number of arguments".to_string());
            };
            let nx = args[3..].iter().any(|a| a.eq_ignore_ascii_case("NX"));
            if nx && state.store.contains_key(key) {
                return Value::Null;
            }
            state.store.insert(key.clone(), value.clone());
            state.bump(key);
            ok()
        }
        "DEL" => {
            let mut removed = 0;
            for key in &args[1..] {
                if state.store.remove(key).is_some() {
                    state.bump(key);
                    removed += 1;
                }
            }
            Value::Integer(removed)
        }
        "EXISTS" => Value::Integer(i64::from(
            args.get(1).is_some_and(|key| state.store.contains_key(key)),
        )),
        "INCR" | "INCRBY" => {
            let Some(key) = args.get(1) else {
                return Value::Error("ERR wrong number of arguments".to_string());
            };
            let delta = if cmd == "INCR" {
                1
            } else {
                match args.get(2).and_then(|d| d.parse::<i64>().ok()) {
                    Some(delta) => delta,
                    None => return Value::Error("ERR value is not an integer".to_string()),
                }
            };
            let current = state
                .store
                .get(key)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);
            let next = current + delta;
            state.store.insert(key.clone(), next.to_string());
            state.bump(key);
            Value::Integer(next)
        }
        "TTL" => Value::Integer(-1),
        "EXPIRE" => Value::Integer(i64::from(
            args.get(1).is_some_and(|key| state.store.contains_key(key)),
        )),
        other => Value::Error(format!("ERR unknown command '{other}'")),
    }
}
