//! Upstream stream decoding.
//!
//! [`SseDecoder`] reassembles SSE events from raw body bytes across TCP
//! chunk boundaries. [`FragmentStream`] sits on top of it and turns
//! upstream completion chunks into text fragments, stopping as soon as a
//! finish signal is seen.

use std::collections::VecDeque;
use std::fmt::Display;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};

use super::types::{ChatCompletionChunk, Delta};
use crate::error::{Error, Result};

/// Cap on a single SSE line. Longer lines end the stream with an error.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// A dispatched SSE event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseData {
    /// The joined `data:` lines of one event.
    Payload(String),
    /// `data: [DONE]`
    Done,
    /// A line exceeded [`MAX_LINE_BYTES`]; nothing further is decoded.
    Overflow,
}

/// Line-buffered SSE event decoder.
///
/// Handles `\n` and `\r\n` endings, `data:` with or without a space, and
/// ignores `event:`, `id:`, `retry:` and comment lines. Multiple `data:`
/// lines in one event are joined with `\n`.
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    data: Vec<String>,
    overflowed: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            data: Vec::new(),
            overflowed: false,
        }
    }

    /// Feed a chunk of body bytes, appending any completed events to `out`.
    pub fn push(&mut self, bytes: &[u8], out: &mut VecDeque<SseData>) {
        if self.overflowed {
            return;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            self.scanned = 0;
            if end > MAX_LINE_BYTES {
                self.overflow(end, out);
                return;
            }

            let mut line: Vec<u8> = self.buffer.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.process_line(&line, out);
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            self.overflow(self.buffer.len(), out);
            return;
        }
        self.scanned = self.buffer.len();
    }

    /// Flush a trailing line without newline and any pending event.
    pub fn finish(&mut self, out: &mut VecDeque<SseData>) {
        if self.overflowed {
            return;
        }
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            self.scanned = 0;
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.process_line(&line, out);
        }
        self.dispatch(out);
    }

    fn overflow(&mut self, line_len: usize, out: &mut VecDeque<SseData>) {
        tracing::warn!(
            line_bytes = line_len,
            limit = MAX_LINE_BYTES,
            "Oversized SSE line from upstream"
        );
        self.buffer = Vec::new();
        self.scanned = 0;
        self.data.clear();
        self.overflowed = true;
        out.push_back(SseData::Overflow);
    }

    fn process_line(&mut self, line: &[u8], out: &mut VecDeque<SseData>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }

        let Ok(line) = std::str::from_utf8(line) else {
            tracing::warn!("Skipping non-UTF-8 SSE line from upstream");
            return;
        };

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data.push(value.to_string());
        }
    }

    fn dispatch(&mut self, out: &mut VecDeque<SseData>) {
        if self.data.is_empty() {
            return;
        }
        let payload = self.data.join("\n");
        self.data.clear();

        if payload.trim() == "[DONE]" {
            out.push_back(SseData::Done);
        } else {
            out.push_back(SseData::Payload(payload));
        }
    }
}

/// Forward-only sequence of text fragments from one upstream completion.
///
/// Ends when the upstream reports a finish reason, sends `[DONE]`, or the
/// body is exhausted. On a finish signal the body is dropped at once, so
/// anything the upstream still had buffered is never read.
pub struct FragmentStream {
    body: Option<BoxStream<'static, Result<Bytes>>>,
    decoder: SseDecoder,
    pending: VecDeque<SseData>,
    finished: bool,
}

impl FragmentStream {
    /// Wrap an upstream body. Transport errors become [`Error::MidStream`].
    pub fn new<S, E>(body: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Display,
    {
        let body = body
            .map(|chunk| chunk.map_err(|e| Error::MidStream(e.to_string())))
            .boxed();
        Self {
            body: Some(body),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// Next fragment, `None` at the end of the sequence.
    ///
    /// After an error is returned the sequence is over.
    pub async fn next_fragment(&mut self) -> Option<Result<String>> {
        loop {
            if self.finished {
                return None;
            }

            while let Some(data) = self.pending.pop_front() {
                let payload = match data {
                    SseData::Done => {
                        self.finish();
                        return None;
                    }
                    SseData::Overflow => {
                        self.finish();
                        return Some(Err(Error::MidStream(format!(
                            "Upstream SSE line exceeded {} KiB",
                            MAX_LINE_BYTES / 1024
                        ))));
                    }
                    SseData::Payload(payload) => payload,
                };

                match decode_chunk(&payload) {
                    Err(e) => {
                        self.finish();
                        return Some(Err(e));
                    }
                    Ok(Decoded { text, finished }) => {
                        if finished {
                            self.finish();
                        }
                        if let Some(text) = text {
                            return Some(Ok(text));
                        }
                        if finished {
                            return None;
                        }
                    }
                }
            }

            let Some(body) = self.body.as_mut() else {
                self.finished = true;
                return None;
            };

            match body.next().await {
                Some(Ok(bytes)) => self.decoder.push(&bytes, &mut self.pending),
                Some(Err(e)) => {
                    self.finish();
                    return Some(Err(e));
                }
                None => {
                    self.body = None;
                    self.decoder.finish(&mut self.pending);
                }
            }
        }
    }

    /// Adapt into a [`Stream`] for the encoder.
    pub fn into_stream(self) -> impl Stream<Item = Result<String>> + Send + 'static {
        stream::unfold(self, |mut fragments| async move {
            let item = fragments.next_fragment().await?;
            Some((item, fragments))
        })
    }

    /// Stop consuming and release the upstream connection.
    fn finish(&mut self) {
        self.finished = true;
        self.body = None;
        self.pending.clear();
    }
}

struct Decoded {
    text: Option<String>,
    finished: bool,
}

/// Decode one upstream chunk payload.
///
/// A chunk with no choice yields nothing and does not end the stream.
fn decode_chunk(payload: &str) -> Result<Decoded> {
    let chunk: ChatCompletionChunk = serde_json::from_str(payload)
        .map_err(|e| Error::MidStream(format!("Malformed chunk from upstream: {}", e)))?;

    if let Some(message) = chunk.error_message() {
        return Err(Error::MidStream(message));
    }

    let Some(choice) = chunk.choices.first() else {
        return Ok(Decoded {
            text: None,
            finished: false,
        });
    };

    Ok(Decoded {
        text: choice.delta.as_ref().and_then(Delta::text),
        finished: choice.is_finished(),
    })
}
