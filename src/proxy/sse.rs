//! Outbound SSE encoding.
//!
//! Every frame is `data: <compact JSON>\n\n`. A stream carries zero or more
//! `token` events followed by exactly one terminal `done` or `error`.

use std::convert::Infallible;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tracing::Instrument;

use crate::config::ErrorPolicy;
use crate::error::{Error, SANITIZED_STREAM_MESSAGE};

/// An event delivered to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Token { text: String },
    Done,
    Error { message: String },
}

impl StreamEvent {
    /// Serialize as one SSE frame.
    pub fn to_frame(&self) -> Bytes {
        let json = serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize stream event");
            r#"{"type":"error","message":"event serialization failed"}"#.to_string()
        });
        Bytes::from(format!("data: {}\n\n", json))
    }
}

/// Text for the terminal `error` frame under the given policy.
pub fn error_message(error: &Error, policy: &ErrorPolicy) -> String {
    if policy.expose_upstream_detail {
        error.to_string()
    } else {
        SANITIZED_STREAM_MESSAGE.to_string()
    }
}

enum EncoderState<S> {
    Streaming {
        fragments: Pin<Box<S>>,
        emitted: usize,
    },
    Finished,
}

/// Encode a fragment sequence as SSE frames.
///
/// Never fails: an error from `fragments` becomes the terminal `error`
/// frame in place of `done`, and nothing is read after a terminal frame.
/// Dropping the returned stream drops `fragments`, which releases the
/// upstream connection when the client goes away.
pub fn encode_events<S>(
    fragments: S,
    policy: ErrorPolicy,
    span: tracing::Span,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = crate::Result<String>> + Send + 'static,
{
    let initial = EncoderState::Streaming {
        fragments: Box::pin(fragments),
        emitted: 0,
    };

    stream::unfold(initial, move |state| {
        let policy = policy.clone();
        async move {
            let EncoderState::Streaming {
                mut fragments,
                emitted,
            } = state
            else {
                return None;
            };

            let terminal = match fragments.next().await {
                Some(Ok(text)) => {
                    let frame = StreamEvent::Token { text }.to_frame();
                    let next = EncoderState::Streaming {
                        fragments,
                        emitted: emitted + 1,
                    };
                    return Some((Ok(frame), next));
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, fragments = emitted, "Model stream failed");
                    StreamEvent::Error {
                        message: error_message(&e, &policy),
                    }
                }
                None => {
                    tracing::info!(fragments = emitted, "Model stream completed");
                    StreamEvent::Done
                }
            };

            Some((Ok(terminal.to_frame()), EncoderState::Finished))
        }
        .instrument(span.clone())
    })
}
