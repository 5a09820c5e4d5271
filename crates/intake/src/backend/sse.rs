//! `text/event-stream` decoding for the agent push channel.

use std::collections::VecDeque;
use std::fmt::Display;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tracing::warn;

use super::{AgentEvent, AgentEventStream, BackendError};
use crate::sanitize::truncate_body;

/// Incremental server-sent-events parser that yields the `data` payload of
/// each dispatched event.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere; only complete lines
/// are interpreted. Comment lines and non-`data` fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every payload completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let mut line = &raw[..raw.len() - 1];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }

            if let Some(payload) = self.process_line(&String::from_utf8_lossy(line)) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flushes an event left undispatched when the stream ended without a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            // A trailing partial line cannot dispatch on its own
            let _ = self.process_line(&line);
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        Some(payload)
    }
}

struct DecodeState<E> {
    bytes: BoxStream<'static, Result<Vec<u8>, E>>,
    decoder: SseDecoder,
    pending: VecDeque<AgentEvent>,
    finished: bool,
}

impl<E> DecodeState<E> {
    fn push_payload(&mut self, payload: &str) {
        match serde_json::from_str::<AgentEvent>(payload) {
            Ok(event) => self.pending.push_back(event),
            Err(e) => warn!(
                error = %e,
                payload = %truncate_body(payload),
                "Discarding malformed agent event"
            ),
        }
    }
}

/// Turns a raw byte stream into a stream of agent events.
///
/// Malformed payloads are logged and skipped. A transport error is yielded
/// once and ends the stream.
pub fn decode_event_stream<S, B, E>(bytes: S) -> AgentEventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        bytes: bytes
            .map(|chunk| chunk.map(|b| b.as_ref().to_vec()))
            .boxed(),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for payload in state.decoder.feed(&chunk) {
                        state.push_payload(&payload);
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(BackendError::Stream(e.to_string())), state));
                }
                None => {
                    state.finished = true;
                    if let Some(payload) = state.decoder.finish() {
                        state.push_payload(&payload);
                    }
                }
            }
        }
    })
    .boxed()
}
