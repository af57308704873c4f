//! Transaction integration tests against the in-process server

mod common;

use common::TestServer;
use valkey_glide::{Client, ClientConfig, ExecOutcome, GlideError, Value};

async fn connected_client(server: &TestServer) -> Client {
    let address = server.address();
    Client::connect(ClientConfig::new(address.host.clone(), address.port))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_multi_exec_applies_queue() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut tx = client.transaction().await.unwrap();
    tx.multi().await.unwrap();
    tx.set("k", "v").await.unwrap();
    tx.incr("counter").await.unwrap();
    tx.get("k").await.unwrap();
    assert_eq!(tx.queued_len(), 3);

    let results = tx.exec().await.unwrap().into_results().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], Value::SimpleString("OK".to_string()));
    assert_eq!(results[1], Value::Integer(1));
    assert_eq!(results[2], Value::from("v"));

    assert_eq!(server.stored("k").await, Some("v".to_string()));
}

#[tokio::test]
async fn test_watch_conflict_aborts_without_error() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;
    server.seed("balance", "100").await;

    let mut tx = client.transaction().await.unwrap();
    tx.watch(vec!["balance".to_string()]).await.unwrap();

    // Another connection writes the watched key before EXEC
    client.set("balance", "150").await.unwrap();

    tx.multi().await.unwrap();
    tx.set("balance", "200").await.unwrap();
    let outcome = tx.exec().await.unwrap();
    assert!(outcome.is_aborted());

    // The queued write never ran
    assert_eq!(server.stored("balance").await, Some("150".to_string()));

    // The session is reusable after an abort
    tx.multi().await.unwrap();
    tx.incr("other").await.unwrap();
    let outcome = tx.exec().await.unwrap();
    assert!(matches!(outcome, ExecOutcome::Results(_)));
}

#[tokio::test]
async fn test_watch_without_conflict_commits() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;
    server.seed("balance", "100").await;

    let mut tx = client.transaction().await.unwrap();
    tx.watch(vec!["balance".to_string()]).await.unwrap();
    tx.multi().await.unwrap();
    tx.set("balance", "200").await.unwrap();

    let outcome = tx.exec().await.unwrap();
    assert!(!outcome.is_aborted());
    assert_eq!(server.stored("balance").await, Some("200".to_string()));
}

#[tokio::test]
async fn test_watch_after_multi_fails_fast() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut tx = client.transaction().await.unwrap();
    tx.multi().await.unwrap();
    let err = tx.watch(vec!["k".to_string()]).await.unwrap_err();
    assert!(matches!(err, GlideError::Transaction(_)));
    assert!(err.to_string().contains("WATCH inside MULTI"));

    // The session itself is still usable
    tx.set("k", "v").await.unwrap();
    assert!(!tx.exec().await.unwrap().is_aborted());
}

#[tokio::test]
async fn test_nested_multi_fails_fast() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut tx = client.transaction().await.unwrap();
    tx.multi().await.unwrap();
    let err = tx.multi().await.unwrap_err();
    assert!(matches!(err, GlideError::Transaction(_)));
    assert!(err.to_string().contains("MULTI calls can not be nested"));
}

#[tokio::test]
async fn test_discard_throws_queue_away() {
    let server = TestServer::start().await;
    let client = connected_client(&server).await;

    let mut tx = client.transaction().await.unwrap();
    tx.multi().await.unwrap();
    tx.set("discarded", "1").await.unwrap();
    tx.discard().await.unwrap();

    assert_eq!(server.stored("discarded").await, None);

    // EXEC without an open MULTI is a usage error
    let err = tx.exec().await.unwrap_err();
    assert!(matches!(err, GlideError::Transaction(_)));
}
