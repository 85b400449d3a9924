use std::{sync::Arc, time::Duration};

use reqwest::{header::CONTENT_TYPE, Client};
use tracing::{debug, instrument};

use crate::config::TargetSpec;
use crate::error::PollError;
use crate::parser;
use crate::request::build_request;
use crate::sink::Sink;

/// Upper bound on a single request, connect to last byte of the body
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs one poll of one target at a time: request, status check, parse, hand off to the sink.
/// Shared by every target - the client's connection pool is reused across polls.
pub struct TargetPoller {
    client: Client,
    sink: Arc<dyn Sink>,
}

impl TargetPoller {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self::with_client(Client::new(), sink)
    }

    pub fn with_client(client: Client, sink: Arc<dyn Sink>) -> Self {
        TargetPoller { client, sink }
    }

    /// Poll `target` once. Returns the number of log entries delivered - zero if the response
    /// had nothing in it, in which case the sink isn't called at all.
    #[instrument(level = "debug", skip_all, fields(endpoint = %target.endpoint))]
    pub async fn poll_once(&self, target: &TargetSpec) -> Result<usize, PollError> {
        let mut request = build_request(&self.client, target)?;
        *request.timeout_mut() = Some(REQUEST_TIMEOUT);

        let response = self
            .client
            .execute(request)
            .await
            .map_err(PollError::Transport)?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(PollError::Status {
                code: status.as_u16(),
                text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await.map_err(PollError::Body)?;

        let batch = parser::parse(&body, &content_type, target)?;
        let count = batch.len();
        if count == 0 {
            debug!("Response held no log entries");
            return Ok(0);
        }

        self.sink.consume(batch).await.map_err(PollError::Sink)?;
        debug!(log_count = count, "Successfully consumed logs");

        Ok(count)
    }
}
