//! End-to-end tests for the query-tool session lifecycle over HTTP:
//! initialize, start, poll (status + notices + rows), close.

mod common;

use common::TestServer;

const NOTICE_BATCH: &str = "DROP TABLE IF EXISTS test_for_notices;\n\nDO $$\nBEGIN\n    RAISE NOTICE 'Hello, world!';\nEND $$;\n\nSELECT 'CHECKING POLLING';";

const LOOP_BATCH: &str = "DO $$\nBEGIN\n    FOR i in 1..1000 LOOP\n        RAISE NOTICE 'Count is %', i;\n    END LOOP;\nEND $$;\n\nSELECT 'CHECKING POLLING FOR LONG MESSAGES';";

#[tokio::test]
async fn batch_with_notices_delivers_messages_and_result() {
    let server = TestServer::spawn().await;
    let id = server.initialize("local", "postgres").await;

    let (status, body) = server.start(&id, NOTICE_BATCH).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "accepted");

    let (status, body) = server.poll_until_terminal(&id).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "completed");
    assert_eq!(
        body["additional_messages"],
        "NOTICE:  table \"test_for_notices\" does not exist, skipping\nNOTICE:  Hello, world!"
    );
    assert_eq!(body["result_available"], true);
    assert_eq!(body["rows"][0][0], "CHECKING POLLING");
    assert_eq!(body["row_count"], 1);

    // Terminal polls are idempotent
    let (_, again) = server.poll(&id).await;
    assert_eq!(again["status"], "completed");
    assert_eq!(again["additional_messages"], body["additional_messages"]);

    assert_eq!(server.close(&id).await, 200);
    server.shutdown().await;
}

#[tokio::test]
async fn loop_batch_delivers_thousand_notices_in_order() {
    let server = TestServer::spawn().await;
    let id = server.initialize("local", "postgres").await;

    server.start(&id, LOOP_BATCH).await;
    let (_, body) = server.poll_until_terminal(&id).await;
    assert_eq!(body["status"], "completed");

    let messages = body["additional_messages"].as_str().unwrap();
    let notices: Vec<&str> = messages.lines().collect();
    assert_eq!(notices.len(), 1000);
    assert_eq!(notices[0], "NOTICE:  Count is 1");
    assert_eq!(notices[499], "NOTICE:  Count is 500");
    assert_eq!(notices[999], "NOTICE:  Count is 1000");

    // The trailing select's row survives the notice flood
    assert_eq!(body["result_available"], true);
    assert_eq!(body["rows"][0][0], "CHECKING POLLING FOR LONG MESSAGES");
    assert_eq!(body["row_count"], 1);

    server.close(&id).await;
    server.shutdown().await;
}

#[tokio::test]
async fn select_without_notices_leaves_messages_empty() {
    let server = TestServer::spawn().await;
    let id = server.initialize("local", "postgres").await;

    server.start(&id, "SELECT 'CHECKING POLLING'").await;
    let (_, body) = server.poll_until_terminal(&id).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["additional_messages"], "");
    assert_eq!(body["rows"][0][0], "CHECKING POLLING");

    server.close(&id).await;
    server.shutdown().await;
}

#[tokio::test]
async fn start_while_running_is_conflict() {
    let server = TestServer::spawn().await;
    let id = server.initialize("local", "postgres").await;

    server.start(&id, LOOP_BATCH).await;
    let (status, body) = server.start(&id, "SELECT 1").await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "EXECUTION_IN_PROGRESS");

    // After completion the session accepts a new batch
    server.poll_until_terminal(&id).await;
    let (status, _) = server.start(&id, "SELECT 'next'").await;
    assert_eq!(status, 200);
    let (_, body) = server.poll_until_terminal(&id).await;
    assert_eq!(body["rows"][0][0], "next");

    server.close(&id).await;
    server.shutdown().await;
}

#[tokio::test]
async fn failed_statement_reports_error_with_partial_notices() {
    let server = TestServer::spawn().await;
    let id = server.initialize("local", "postgres").await;

    let sql = "DO $$\nBEGIN\n    RAISE NOTICE 'before failure';\nEND $$;\nSELEC oops;";
    server.start(&id, sql).await;

    let (status, body) = server.poll_until_terminal(&id).await;
    assert_eq!(status, 500);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["additional_messages"], "NOTICE:  before failure");
    assert!(body["error"].as_str().unwrap().contains("syntax error"));
    assert_eq!(body["result_available"], false);

    server.close(&id).await;
    server.shutdown().await;
}

#[tokio::test]
async fn close_mid_execution_then_reinitialize() {
    let server = TestServer::spawn().await;
    let id = server.initialize("local", "postgres").await;

    server.start(&id, LOOP_BATCH).await;
    assert_eq!(server.close(&id).await, 200);

    // The id is gone; polls and starts answer 404
    let (status, body) = server.poll(&id).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");

    // A fresh session against the same database works immediately
    let id2 = server.initialize("local", "postgres").await;
    server.start(&id2, "SELECT 'fresh'").await;
    let (_, body) = server.poll_until_terminal(&id2).await;
    assert_eq!(body["rows"][0][0], "fresh");

    server.close(&id2).await;
    server.shutdown().await;
}

#[tokio::test]
async fn close_is_idempotent_over_http() {
    let server = TestServer::spawn().await;
    let id = server.initialize("local", "postgres").await;

    assert_eq!(server.close(&id).await, 200);
    assert_eq!(server.close(&id).await, 200);
    assert_eq!(server.close("never-existed").await, 200);

    server.shutdown().await;
}

#[tokio::test]
async fn row_window_parameters_page_the_result() {
    let server = TestServer::spawn().await;
    let id = server.initialize("local", "postgres").await;

    server.start(&id, "SELECT 'only row'").await;
    server.poll_until_terminal(&id).await;

    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .get(server.url(&format!("/v1/query/{}/poll?offset=1&limit=10", id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["result_available"], true);
    assert_eq!(body["rows"].as_array().unwrap().len(), 0);
    assert_eq!(body["row_count"], 1);
    // The first full poll already handed out the single row
    assert_eq!(body["rows_delivered"], 1);

    server.close(&id).await;
    server.shutdown().await;
}
