//! Upstream chat-completion client.

use std::time::Duration;

use axum::http::header;
use futures::StreamExt;
use reqwest::{Client, Response};

use super::stream::FragmentStream;
use super::types::{ChatCompletionRequest, Message};
use crate::config::{ApiKey, UpstreamConfig};
use crate::error::{Error, Result};

/// Most of a rejected response's body that is read for diagnostics.
const ERROR_BODY_LIMIT: usize = 4 * 1024;
/// How long to wait for a rejected response's body.
const ERROR_BODY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens streaming completion calls against the configured upstream.
#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    url: String,
    stream_timeout: Option<Duration>,
    error_body_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(http: Client, upstream: &UpstreamConfig) -> Self {
        Self {
            http,
            url: upstream.completions_url(),
            stream_timeout: upstream.stream_timeout(),
            error_body_timeout: ERROR_BODY_TIMEOUT,
        }
    }

    /// Override how long a rejected response's body is awaited.
    pub fn with_error_body_timeout(mut self, timeout: Duration) -> Self {
        self.error_body_timeout = timeout;
        self
    }

    /// Start a streaming completion.
    ///
    /// Resolves once the upstream has answered with a success status; the
    /// body is then consumed lazily through the returned [`FragmentStream`].
    /// A connection failure, timeout or non-2xx status is
    /// [`Error::UpstreamUnavailable`].
    pub async fn open_stream(
        &self,
        token: &ApiKey,
        model: &str,
        messages: &[Message],
    ) -> Result<FragmentStream> {
        let body = ChatCompletionRequest {
            model,
            messages,
            stream: true,
        };

        let mut request = self
            .http
            .post(&self.url)
            .header(header::ACCEPT, "text/event-stream")
            .bearer_auth(token.expose_secret())
            .json(&body);

        if let Some(timeout) = self.stream_timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, url = %self.url, "Failed to reach upstream");
            Error::UpstreamUnavailable(format!("Failed to reach upstream: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = self.read_error_body(response).await;
            tracing::error!(
                status = %status,
                body = %error_body,
                "Upstream rejected stream request"
            );
            return Err(Error::UpstreamUnavailable(format!(
                "Upstream returned {}: {}",
                status, error_body
            )));
        }

        tracing::debug!(model = %model, "Upstream stream opened");
        Ok(FragmentStream::new(response.bytes_stream()))
    }

    /// Read at most [`ERROR_BODY_LIMIT`] bytes of a rejected response,
    /// giving up after the error body timeout.
    async fn read_error_body(&self, response: Response) -> String {
        let mut body = std::pin::pin!(response.bytes_stream());
        let mut buf = Vec::new();

        let read = async {
            while let Some(Ok(chunk)) = body.next().await {
                buf.extend_from_slice(&chunk);
                if buf.len() >= ERROR_BODY_LIMIT {
                    break;
                }
            }
        };
        if tokio::time::timeout(self.error_body_timeout, read).await.is_err() {
            tracing::warn!(
                timeout_ms = self.error_body_timeout.as_millis() as u64,
                "Timed out reading upstream error body"
            );
        }

        buf.truncate(ERROR_BODY_LIMIT);
        String::from_utf8_lossy(&buf).into_owned()
    }
}
