//! Pub/sub integration tests against the in-process server

mod common;

use std::time::Duration;

use common::TestServer;
use valkey_glide::pubsub::SubscriptionMode;
use valkey_glide::{Client, ClientConfig, GlideError, HandlerControl, Publisher, Value};

async fn connected_client(server: &TestServer) -> Client {
    let address = server.address();
    Client::connect(ClientConfig::new(address.host.clone(), address.port))
        .await
        .unwrap()
}

/// Publish until the expected number of subscribers is registered
///
/// Subscribe commands are fire-and-forget, so the registration races the
/// first publish; retry briefly instead of sleeping a fixed amount.
async fn publish_until_received(client: &Client, channel: &str, payload: &str, expected: i64) {
    for _ in 0..100 {
        let receivers = client.publish(channel, payload).await.unwrap();
        if receivers == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("never reached {expected} receivers on {channel}");
}

#[tokio::test]
async fn test_subscribe_and_receive() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut subscriber = client.subscriber().await.unwrap();
    subscriber.subscribe(vec!["news".to_string()]).await.unwrap();
    assert_eq!(subscriber.mode(), SubscriptionMode::Subscribed);

    publish_until_received(&client, "news", "hello", 1).await;

    let message = subscriber
        .next_message_timeout(Duration::from_secs(5))
        .await
        .unwrap()
        .expect("a delivery");
    assert_eq!(message.channel, "news");
    assert_eq!(message.payload, "hello");
    assert!(message.pattern.is_none());
}

#[tokio::test]
async fn test_two_subscribers_both_counted() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut first = client.subscriber().await.unwrap();
    let mut second = client.subscriber().await.unwrap();
    first.subscribe(vec!["fanout".to_string()]).await.unwrap();
    second.subscribe(vec!["fanout".to_string()]).await.unwrap();

    publish_until_received(&client, "fanout", "to-everyone", 2).await;

    for subscriber in [&mut first, &mut second] {
        let message = subscriber
            .next_message_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .expect("a delivery");
        assert_eq!(message.payload, "to-everyone");
    }
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut subscriber = client.subscriber().await.unwrap();
    subscriber
        .subscribe(vec!["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    publish_until_received(&client, "a", "warmup", 1).await;

    subscriber.unsubscribe(vec!["a".to_string()]).await.unwrap();
    assert_eq!(subscriber.subscribed_channels(), vec!["b".to_string()]);

    // Eventually the server drops the registration and counts zero receivers
    for _ in 0..100 {
        if client.publish("a", "gone").await.unwrap() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("subscriber still registered after unsubscribe");
}

#[tokio::test]
async fn test_unsubscribe_unknown_channel_is_noop() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut subscriber = client.subscriber().await.unwrap();
    subscriber.subscribe(vec!["kept".to_string()]).await.unwrap();
    publish_until_received(&client, "kept", "warmup", 1).await;

    // Never-subscribed channel: nothing sent, nothing disturbed
    subscriber
        .unsubscribe(vec!["never-subscribed".to_string()])
        .await
        .unwrap();
    assert_eq!(subscriber.subscribed_channels(), vec!["kept".to_string()]);
    assert_eq!(subscriber.mode(), SubscriptionMode::Subscribed);

    publish_until_received(&client, "kept", "still-here", 1).await;
    let mut saw_delivery = false;
    while let Some(message) = subscriber
        .next_message_timeout(Duration::from_secs(2))
        .await
        .unwrap()
    {
        if message.payload == "still-here" {
            saw_delivery = true;
            break;
        }
    }
    assert!(saw_delivery);
}

#[tokio::test]
async fn test_mode_violation_while_subscribed() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut subscriber = client.subscriber().await.unwrap();

    // Idle connections run anything
    subscriber.execute("PING", vec![]).await.unwrap();

    subscriber.subscribe(vec!["news".to_string()]).await.unwrap();

    // PING stays allowed and gets its own reply, not a stray push frame
    let pong = subscriber.execute("PING", vec![]).await.unwrap();
    assert_eq!(pong, Value::SimpleString("PONG".to_string()));

    let err = subscriber.execute("GET", vec![]).await.unwrap_err();
    assert!(matches!(err, GlideError::ModeViolation(_)));
}

#[tokio::test]
async fn test_close_handle_unblocks_run() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut subscriber = client.subscriber().await.unwrap();
    subscriber.subscribe(vec!["blocked".to_string()]).await.unwrap();
    publish_until_received(&client, "blocked", "warmup", 1).await;

    let handle = subscriber.close_handle();
    let closer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.close();
    });

    // run() blocks on deliveries; the remote close must end it
    tokio::time::timeout(
        Duration::from_secs(5),
        subscriber.run(|_| HandlerControl::Continue),
    )
    .await
    .expect("run() must unblock on close")
    .unwrap();
    closer.await.unwrap();
}

#[tokio::test]
async fn test_handler_unsubscribe_ends_run() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut subscriber = client.subscriber().await.unwrap();
    subscriber.subscribe(vec!["stream".to_string()]).await.unwrap();
    publish_until_received(&client, "stream", "first", 1).await;

    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    tokio::time::timeout(
        Duration::from_secs(5),
        subscriber.run(move |message| {
            sink.lock().unwrap().push(message.payload);
            HandlerControl::Unsubscribe
        }),
    )
    .await
    .expect("run() must end when the handler withdraws interest")
    .unwrap();

    assert_eq!(seen.lock().unwrap().as_slice(), ["first".to_string()]);
    assert_eq!(subscriber.mode(), SubscriptionMode::Idle);
    assert!(subscriber.subscribed_channels().is_empty());
}

#[tokio::test]
async fn test_publisher_facade() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut subscriber = client.subscriber().await.unwrap();
    subscriber.subscribe(vec!["facade".to_string()]).await.unwrap();
    publish_until_received(&client, "facade", "warmup", 1).await;

    let publisher = Publisher::new(connected_client(&server).await);
    assert_eq!(publisher.publish("facade", "via-facade").await.unwrap(), 1);
    assert_eq!(publisher.publish("empty-channel", "x").await.unwrap(), 0);
}
