#![allow(dead_code)]

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, StatusCode};
use axum::routing::any;
use axum::Router;
use logpoll::{LogBatch, Sink, TargetSpec};
use tokio::sync::mpsc;

/// Serve `router` on a random local port, returning the base url
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Serve a fixed body with a fixed content type on /logs
pub async fn serve_body(content_type: &'static str, body: &'static str) -> String {
    let router = Router::new().route(
        "/logs",
        any(move || async move { ([(header::CONTENT_TYPE, content_type)], body) }),
    );
    format!("{}/logs", serve(router).await)
}

/// Serve a bare status code on /logs
pub async fn serve_status(status: StatusCode) -> String {
    let router = Router::new().route("/logs", any(move || async move { status }));
    format!("{}/logs", serve(router).await)
}

/// A validated target for `endpoint` with the given labels
pub fn target(endpoint: &str, labels: &[(&str, &str)]) -> TargetSpec {
    let mut target = TargetSpec::new(endpoint);
    target.labels = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<HashMap<_, _>>();
    target.validate().unwrap();
    target
}

/// Wait up to `wait` for the next batch
pub async fn next_batch(rx: &mut mpsc::Receiver<LogBatch>, wait: Duration) -> LogBatch {
    tokio::time::timeout(wait, rx.recv())
        .await
        .expect("timed out waiting for a batch")
        .expect("batch channel closed")
}

/// A sink that refuses everything
pub struct RejectingSink;

#[async_trait]
impl Sink for RejectingSink {
    async fn consume(&self, _batch: LogBatch) -> Result<(), anyhow::Error> {
        Err(anyhow::anyhow!("downstream full"))
    }
}
