//! Shared helpers for integration tests: an ephemeral HTTP server plus a
//! small typed client around the query-tool endpoints.

use querydesk_server::config::ServerConfig;
use querydesk_server::lifecycle::{bootstrap, run_for_tests, RunningTestHttpServer};
use serde_json::Value;
use std::time::Duration;

pub struct TestServer {
    inner: RunningTestHttpServer,
    client: reqwest::Client,
}

impl TestServer {
    /// Starts a server on an ephemeral port with the reaper disabled.
    pub async fn spawn() -> Self {
        let mut config = ServerConfig::default();
        config.session.idle_timeout_seconds = 0;

        let components = bootstrap(&config).await.expect("bootstrap failed");
        let inner = run_for_tests(&config, components)
            .await
            .expect("failed to start test server");

        Self {
            inner,
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.base_url, path)
    }

    pub async fn shutdown(self) {
        self.inner.shutdown().await;
    }

    /// Opens a session and returns its transaction id.
    pub async fn initialize(&self, server: &str, database: &str) -> String {
        let body: Value = self
            .client
            .post(self.url(&format!("/v1/query/initialize/{}/{}", server, database)))
            .send()
            .await
            .expect("initialize request failed")
            .json()
            .await
            .expect("initialize response was not JSON");
        body["transaction_id"]
            .as_str()
            .expect("missing transaction_id")
            .to_string()
    }

    /// Submits a batch; returns (status code, body).
    pub async fn start(&self, transaction_id: &str, sql: &str) -> (u16, Value) {
        let response = self
            .client
            .post(self.url(&format!("/v1/query/{}/start", transaction_id)))
            .json(&serde_json::json!({ "sql": sql }))
            .send()
            .await
            .expect("start request failed");
        let status = response.status().as_u16();
        let body = response.json().await.expect("start response was not JSON");
        (status, body)
    }

    /// Single poll; returns (status code, body).
    pub async fn poll(&self, transaction_id: &str) -> (u16, Value) {
        let response = self
            .client
            .get(self.url(&format!("/v1/query/{}/poll", transaction_id)))
            .send()
            .await
            .expect("poll request failed");
        let status = response.status().as_u16();
        let body = response.json().await.expect("poll response was not JSON");
        (status, body)
    }

    /// Polls until the execution reaches a terminal status.
    pub async fn poll_until_terminal(&self, transaction_id: &str) -> (u16, Value) {
        for _ in 0..500 {
            let (status, body) = self.poll(transaction_id).await;
            match body["status"].as_str() {
                Some("pending") | Some("running") => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                _ => return (status, body),
            }
        }
        panic!("execution did not reach a terminal state");
    }

    /// Closes the session; returns the status code.
    pub async fn close(&self, transaction_id: &str) -> u16 {
        self.client
            .delete(self.url(&format!("/v1/query/{}", transaction_id)))
            .send()
            .await
            .expect("close request failed")
            .status()
            .as_u16()
    }
}
