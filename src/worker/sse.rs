//! Incremental server-sent event decoder
//!
//! Chunks arrive from the HTTP body at arbitrary boundaries, so bytes are
//! buffered until a blank line closes an event. Only `data:` fields matter to
//! the worker protocol; multi-line data is joined with `\n`.

use bytes::{Buf, BytesMut};

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the data payloads of every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(newline + 1);
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            self.consume_line(line, &mut events);
        }

        events
    }

    /// Flush an event left open when the stream ended without a blank line
    pub fn finish(&mut self) -> Option<String> {
        let mut events = Vec::new();
        if self.buffer.has_remaining() {
            let rest = String::from_utf8_lossy(self.buffer.chunk()).into_owned();
            self.buffer.clear();
            self.consume_line(rest.trim_end_matches('\r'), &mut events);
        }
        events.pop().or_else(|| self.take_event())
    }

    fn consume_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            events.extend(self.take_event());
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let event = self.data.join("\n");
        self.data.clear();
        Some(event)
    }
}
