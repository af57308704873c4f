//! Publish/subscribe support
//!
//! A subscriber's connection is modal: once the first SUBSCRIBE or PSUBSCRIBE
//! is issued the connection only accepts the subscription-management commands
//! until the interest set empties again. Anything else fails with
//! [`GlideError::ModeViolation`] instead of being silently queued.
//!
//! # Examples
//!
//! ```no_run
//! use valkey_glide::{Client, ClientConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(ClientConfig::new("localhost", 6379)).await?;
//!
//! let mut subscriber = client.subscriber().await?;
//! subscriber.subscribe(vec!["news".to_string()]).await?;
//!
//! while let Some(message) = subscriber.next_message().await? {
//!     println!("{}: {}", message.channel, message.payload);
//! }
//! # Ok(())
//! # }
//! ```

use crate::connection::Connection;
use crate::core::error::{GlideError, GlideResult};
use crate::core::value::Value;
use futures_util::Stream;
use std::collections::BTreeSet;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// A message delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    /// Channel the message was published to
    pub channel: String,
    /// Message payload
    pub payload: String,
    /// Matching pattern, for pattern subscriptions
    pub pattern: Option<String>,
}

/// Whether a subscriber connection currently holds any interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// No active subscriptions; the connection accepts any command
    Idle,
    /// At least one channel or pattern; only subscription commands allowed
    Subscribed,
}

/// The set of channels and patterns a subscriber holds
///
/// Sorted sets keep listings stable for callers that compare them.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionState {
    channels: BTreeSet<String>,
    patterns: BTreeSet<String>,
}

impl SubscriptionState {
    /// Current mode
    #[must_use]
    pub fn mode(&self) -> SubscriptionMode {
        if self.channels.is_empty() && self.patterns.is_empty() {
            SubscriptionMode::Idle
        } else {
            SubscriptionMode::Subscribed
        }
    }

    /// Reject commands that are not valid in the current mode
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::ModeViolation`] for any command outside the
    /// subscription set while subscribed.
    pub fn guard_command(&self, command: &str) -> GlideResult<()> {
        if self.mode() == SubscriptionMode::Idle {
            return Ok(());
        }
        let upper = command.to_ascii_uppercase();
        match upper.as_str() {
            "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE" | "PUNSUBSCRIBE" | "PING" | "QUIT" => Ok(()),
            _ => Err(GlideError::ModeViolation(upper)),
        }
    }

    fn add_channels(&mut self, channels: &[String]) {
        self.channels.extend(channels.iter().cloned());
    }

    fn add_patterns(&mut self, patterns: &[String]) {
        self.patterns.extend(patterns.iter().cloned());
    }

    /// Remove channels, keeping only the ones that were actually held
    fn retain_known(&mut self, channels: &[String]) -> Vec<String> {
        channels
            .iter()
            .filter(|c| self.channels.remove(*c))
            .cloned()
            .collect()
    }

    fn retain_known_patterns(&mut self, patterns: &[String]) -> Vec<String> {
        patterns
            .iter()
            .filter(|p| self.patterns.remove(*p))
            .cloned()
            .collect()
    }

    /// Channels currently subscribed, sorted
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().cloned().collect()
    }

    /// Patterns currently subscribed, sorted
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        self.patterns.iter().cloned().collect()
    }
}

enum ControlMessage {
    Send {
        command: &'static str,
        args: Vec<String>,
    },
    Request {
        command: String,
        args: Vec<Value>,
        reply: oneshot::Sender<GlideResult<Value>>,
    },
    Close,
}

/// What a [`Subscriber::run`] handler wants after a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerControl {
    /// Keep receiving
    Continue,
    /// Withdraw every channel and pattern, ending the loop
    Unsubscribe,
}

/// Remote handle that can close a subscriber from another task
#[derive(Clone)]
pub struct SubscriberCloseHandle {
    control_tx: mpsc::UnboundedSender<ControlMessage>,
}

impl SubscriberCloseHandle {
    /// Close the subscriber connection; any blocked receive loop unblocks
    pub fn close(&self) {
        let _ = self.control_tx.send(ControlMessage::Close);
    }
}

/// Subscriber over a dedicated connection
///
/// The connection is owned by a background task; this handle tracks the
/// interest set and receives deliveries through a channel. Dropping the
/// subscriber tears the task and the socket down.
pub struct Subscriber {
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    message_rx: mpsc::UnboundedReceiver<PubSubMessage>,
    state: SubscriptionState,
}

impl Subscriber {
    /// Take ownership of a connection and start the receive task
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive_subscription(conn, control_rx, message_tx));
        Self {
            control_tx,
            message_rx,
            state: SubscriptionState::default(),
        }
    }

    /// Subscribe to one or more channels; enters subscribe mode
    ///
    /// # Errors
    ///
    /// Returns a connection error when the receive task has stopped.
    pub async fn subscribe(&mut self, channels: Vec<String>) -> GlideResult<()> {
        if channels.is_empty() {
            return Ok(());
        }
        self.send_control("SUBSCRIBE", channels.clone())?;
        self.state.add_channels(&channels);
        Ok(())
    }

    /// Subscribe to one or more glob patterns
    ///
    /// # Errors
    ///
    /// Returns a connection error when the receive task has stopped.
    pub async fn psubscribe(&mut self, patterns: Vec<String>) -> GlideResult<()> {
        if patterns.is_empty() {
            return Ok(());
        }
        self.send_control("PSUBSCRIBE", patterns.clone())?;
        self.state.add_patterns(&patterns);
        Ok(())
    }

    /// Unsubscribe from channels
    ///
    /// Channels that were never subscribed are skipped silently; deliveries
    /// for the remaining subscriptions continue undisturbed.
    ///
    /// # Errors
    ///
    /// Returns a connection error when the receive task has stopped.
    pub async fn unsubscribe(&mut self, channels: Vec<String>) -> GlideResult<()> {
        let known = self.state.retain_known(&channels);
        if known.is_empty() {
            return Ok(());
        }
        self.send_control("UNSUBSCRIBE", known)
    }

    /// Unsubscribe from patterns; unknown patterns are a no-op
    ///
    /// # Errors
    ///
    /// Returns a connection error when the receive task has stopped.
    pub async fn punsubscribe(&mut self, patterns: Vec<String>) -> GlideResult<()> {
        let known = self.state.retain_known_patterns(&patterns);
        if known.is_empty() {
            return Ok(());
        }
        self.send_control("PUNSUBSCRIBE", known)
    }

    /// Run an arbitrary command on this connection
    ///
    /// Only valid while idle; in subscribe mode everything outside the
    /// subscription command set fails.
    ///
    /// # Errors
    ///
    /// Returns [`GlideError::ModeViolation`] while subscribed.
    pub async fn execute(&mut self, command: &str, args: Vec<Value>) -> GlideResult<Value> {
        self.state.guard_command(command)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control_tx
            .send(ControlMessage::Request {
                command: command.to_string(),
                args,
                reply: reply_tx,
            })
            .map_err(|_| GlideError::Connection("Subscriber connection closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| GlideError::Connection("Subscriber connection closed".to_string()))?
    }

    /// Wait for the next delivery; `None` when the connection closed
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps room for transport errors.
    pub async fn next_message(&mut self) -> GlideResult<Option<PubSubMessage>> {
        Ok(self.message_rx.recv().await)
    }

    /// Like [`next_message`](Self::next_message) with a deadline
    ///
    /// # Errors
    ///
    /// Currently infallible; a timeout yields `Ok(None)`.
    pub async fn next_message_timeout(
        &mut self,
        duration: Duration,
    ) -> GlideResult<Option<PubSubMessage>> {
        match timeout(duration, self.message_rx.recv()).await {
            Ok(message) => Ok(message),
            Err(_) => Ok(None),
        }
    }

    /// Deliver messages to `handler` until the subscription ends
    ///
    /// The loop exits when the handler returns
    /// [`HandlerControl::Unsubscribe`] (every channel and pattern is
    /// withdrawn first), when the interest set empties, or when the
    /// connection is closed (including via
    /// [`close_handle`](Self::close_handle) from another task).
    ///
    /// # Errors
    ///
    /// Returns a connection error when the receive task stopped before a
    /// handler-requested withdrawal could be sent.
    pub async fn run<F>(&mut self, mut handler: F) -> GlideResult<()>
    where
        F: FnMut(PubSubMessage) -> HandlerControl,
    {
        while self.state.mode() == SubscriptionMode::Subscribed {
            match self.message_rx.recv().await {
                Some(message) => {
                    if handler(message) == HandlerControl::Unsubscribe {
                        let channels = self.state.channels();
                        self.unsubscribe(channels).await?;
                        let patterns = self.state.patterns();
                        self.punsubscribe(patterns).await?;
                    }
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Handle that closes this subscriber from another task
    #[must_use]
    pub fn close_handle(&self) -> SubscriberCloseHandle {
        SubscriberCloseHandle {
            control_tx: self.control_tx.clone(),
        }
    }

    /// Close the connection; the interest set is dropped
    pub fn close(&mut self) {
        let _ = self.control_tx.send(ControlMessage::Close);
        self.state = SubscriptionState::default();
    }

    /// Current mode
    #[must_use]
    pub fn mode(&self) -> SubscriptionMode {
        self.state.mode()
    }

    /// Channels currently subscribed
    #[must_use]
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.state.channels()
    }

    /// Patterns currently subscribed
    #[must_use]
    pub fn subscribed_patterns(&self) -> Vec<String> {
        self.state.patterns()
    }

    fn send_control(&self, command: &'static str, args: Vec<String>) -> GlideResult<()> {
        self.control_tx
            .send(ControlMessage::Send { command, args })
            .map_err(|_| GlideError::Connection("Subscriber connection closed".to_string()))
    }
}

impl Stream for Subscriber {
    type Item = GlideResult<PubSubMessage>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.message_rx.poll_recv(cx) {
            Poll::Ready(Some(message)) => Poll::Ready(Some(Ok(message))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

async fn drive_subscription(
    mut conn: Connection,
    mut control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    message_tx: mpsc::UnboundedSender<PubSubMessage>,
) {
    loop {
        tokio::select! {
            control = control_rx.recv() => match control {
                Some(ControlMessage::Send { command, args }) => {
                    let args: Vec<Value> = args.iter().map(|a| Value::from(a.as_str())).collect();
                    if let Err(e) = conn.send(command, &args).await {
                        warn!(error = %e, "subscription command failed");
                        break;
                    }
                }
                Some(ControlMessage::Request { command, args, reply }) => {
                    let _ = reply.send(request_reply(&mut conn, &command, &args, &message_tx).await);
                }
                Some(ControlMessage::Close) | None => break,
            },
            frame = conn.read_value() => match frame {
                Ok(value) => match parse_push(value) {
                    Ok(Some(message)) => {
                        if message_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "discarding malformed push frame");
                    }
                },
                Err(e) => {
                    debug!(error = %e, "subscriber connection ended");
                    break;
                }
            },
        }
    }
    // message_tx drops here, unblocking any pending receive loop
}

/// Send a command on a subscribed connection and read its reply
///
/// Push frames already in flight when the command goes out arrive before the
/// reply; they are forwarded to the delivery channel rather than mistaken for
/// the reply. The first non-push frame is the reply.
async fn request_reply(
    conn: &mut Connection,
    command: &str,
    args: &[Value],
    message_tx: &mpsc::UnboundedSender<PubSubMessage>,
) -> GlideResult<Value> {
    conn.send(command, args).await?;
    loop {
        let frame = conn.read_value().await?;
        if !is_push_frame(&frame) {
            return match frame {
                Value::Error(message) => Err(GlideError::from_server_message(&message)),
                reply => Ok(reply),
            };
        }
        if let Some(message) = parse_push(frame)? {
            // The subscriber may have dropped its receiver; the reply still counts
            let _ = message_tx.send(message);
        }
    }
}

fn is_push_frame(frame: &Value) -> bool {
    let Value::Array(items) = frame else {
        return false;
    };
    if items.len() < 3 {
        return false;
    }
    let kind = match &items[0] {
        Value::BulkString(kind) => kind.as_ref(),
        Value::SimpleString(kind) => kind.as_bytes(),
        _ => return false,
    };
    matches!(
        kind,
        b"message" | b"pmessage" | b"subscribe" | b"unsubscribe" | b"psubscribe" | b"punsubscribe"
    )
}

/// Parse a server push frame
///
/// Returns the delivery for `message`/`pmessage` frames and `None` for
/// subscribe/unsubscribe confirmations.
///
/// # Errors
///
/// Returns [`GlideError::Protocol`] for frames that are not pub/sub shaped.
pub fn parse_push(frame: Value) -> GlideResult<Option<PubSubMessage>> {
    let items = match frame {
        Value::Array(items) if items.len() >= 3 => items,
        other => {
            return Err(GlideError::Protocol(format!(
                "Invalid pub/sub frame: {other:?}"
            )))
        }
    };

    let kind = items[0].as_string()?;
    match kind.as_str() {
        "message" => Ok(Some(PubSubMessage {
            channel: items[1].as_string()?,
            payload: items[2].as_string()?,
            pattern: None,
        })),
        "pmessage" if items.len() >= 4 => Ok(Some(PubSubMessage {
            channel: items[2].as_string()?,
            payload: items[3].as_string()?,
            pattern: Some(items[1].as_string()?),
        })),
        "subscribe" | "unsubscribe" | "psubscribe" | "punsubscribe" => Ok(None),
        other => Err(GlideError::Protocol(format!(
            "Unknown pub/sub frame type: {other}"
        ))),
    }
}

/// Transport a [`Publisher`] sends through; implemented by both client kinds
#[async_trait::async_trait]
pub trait PublishTransport {
    /// Publish a message, returning the receiver count
    async fn publish_message(&self, channel: &str, message: &str) -> GlideResult<i64>;
}

/// Publisher facade over any client
pub struct Publisher<T> {
    transport: T,
}

impl<T: PublishTransport> Publisher<T> {
    /// Wrap a transport
    pub const fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Publish a message to a channel
    ///
    /// Returns how many subscribers received it; zero when nobody listens.
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub async fn publish(
        &self,
        channel: impl AsRef<str>,
        message: impl AsRef<str>,
    ) -> GlideResult<i64> {
        self.transport
            .publish_message(channel.as_ref(), message.as_ref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_mode_transitions() {
        let mut state = SubscriptionState::default();
        assert_eq!(state.mode(), SubscriptionMode::Idle);

        state.add_channels(&["news".to_string()]);
        assert_eq!(state.mode(), SubscriptionMode::Subscribed);

        state.retain_known(&["news".to_string()]);
        assert_eq!(state.mode(), SubscriptionMode::Idle);

        state.add_patterns(&["news.*".to_string()]);
        assert_eq!(state.mode(), SubscriptionMode::Subscribed);
    }

    #[test]
    fn test_guard_blocks_regular_commands_while_subscribed() {
        let mut state = SubscriptionState::default();
        state.guard_command("GET").unwrap();

        state.add_channels(&["news".to_string()]);
        let err = state.guard_command("GET").unwrap_err();
        assert!(matches!(err, GlideError::ModeViolation(_)));
        assert!(state.guard_command("UNSUBSCRIBE").is_ok());
        assert!(state.guard_command("psubscribe").is_ok());
        assert!(state.guard_command("PING").is_ok());
    }

    #[test]
    fn test_unsubscribe_unknown_is_noop() {
        let mut state = SubscriptionState::default();
        state.add_channels(&["a".to_string(), "b".to_string()]);

        let removed = state.retain_known(&["c".to_string()]);
        assert!(removed.is_empty());
        assert_eq!(state.channels(), vec!["a".to_string(), "b".to_string()]);

        let removed = state.retain_known(&["b".to_string(), "c".to_string()]);
        assert_eq!(removed, vec!["b".to_string()]);
        assert_eq!(state.channels(), vec!["a".to_string()]);
    }

    #[test]
    fn test_parse_message_frame() {
        let frame = Value::Array(vec![
            Value::from("message"),
            Value::from("news"),
            Value::from("hello"),
        ]);
        let message = parse_push(frame).unwrap().unwrap();
        assert_eq!(message.channel, "news");
        assert_eq!(message.payload, "hello");
        assert!(message.pattern.is_none());
    }

    #[test]
    fn test_parse_pattern_frame() {
        let frame = Value::Array(vec![
            Value::from("pmessage"),
            Value::from("news.*"),
            Value::from("news.tech"),
            Value::from("hi"),
        ]);
        let message = parse_push(frame).unwrap().unwrap();
        assert_eq!(message.channel, "news.tech");
        assert_eq!(message.pattern, Some("news.*".to_string()));
    }

    #[test]
    fn test_parse_confirmation_is_silent() {
        let frame = Value::Array(vec![
            Value::from("subscribe"),
            Value::from("news"),
            Value::Integer(1),
        ]);
        assert!(parse_push(frame).unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_non_pubsub_frames() {
        assert!(parse_push(Value::Integer(1)).is_err());
        let frame = Value::Array(vec![
            Value::from("wat"),
            Value::from("x"),
            Value::from("y"),
        ]);
        assert!(parse_push(frame).is_err());
    }

    #[tokio::test]
    async fn test_command_reply_skips_inflight_delivery() {
        use crate::connection::{Connection, ConnectionSettings};
        use crate::core::types::NodeAddress;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                // SUBSCRIBE and PING may arrive in one read; answer both
                let chunk = &buf[..n];
                let mut frames = Vec::new();
                if chunk.windows(9).any(|w| w == b"SUBSCRIBE") {
                    frames.extend_from_slice(b"*3\r\n$9\r\nsubscribe\r\n$2\r\nch\r\n:1\r\n");
                }
                if chunk.windows(4).any(|w| w == b"PING") {
                    // A delivery is already on the wire ahead of the reply
                    frames.extend_from_slice(
                        b"*3\r\n$7\r\nmessage\r\n$2\r\nch\r\n$5\r\nhello\r\n+PONG\r\n",
                    );
                }
                if socket.write_all(&frames).await.is_err() {
                    return;
                }
            }
        });

        let conn = Connection::connect(
            NodeAddress::new("127.0.0.1", port),
            &ConnectionSettings::default(),
        )
        .await
        .unwrap();
        let mut subscriber = Subscriber::new(conn);
        subscriber.subscribe(vec!["ch".to_string()]).await.unwrap();

        // The reply is PONG, not the delivery that preceded it
        let reply = subscriber.execute("PING", vec![]).await.unwrap();
        assert_eq!(reply, Value::SimpleString("PONG".to_string()));

        // And the delivery still reaches the subscriber
        let message = subscriber
            .next_message_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .expect("the in-flight delivery must not be lost");
        assert_eq!(message.channel, "ch");
        assert_eq!(message.payload, "hello");
    }

    struct MockTransport {
        published: Mutex<Vec<(String, String)>>,
        receivers: i64,
    }

    #[async_trait::async_trait]
    impl PublishTransport for MockTransport {
        async fn publish_message(&self, channel: &str, message: &str) -> GlideResult<i64> {
            self.published
                .lock()
                .unwrap()
                .push((channel.to_string(), message.to_string()));
            Ok(self.receivers)
        }
    }

    #[tokio::test]
    async fn test_publisher_returns_receiver_count() {
        let publisher = Publisher::new(MockTransport {
            published: Mutex::new(Vec::new()),
            receivers: 2,
        });
        assert_eq!(publisher.publish("news", "hello").await.unwrap(), 2);

        let silent = Publisher::new(MockTransport {
            published: Mutex::new(Vec::new()),
            receivers: 0,
        });
        assert_eq!(silent.publish("empty", "hello").await.unwrap(), 0);
    }
}
