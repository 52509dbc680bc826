//! Incremental parser for `text/event-stream` payloads.
//!
//! The transport delivers arbitrary byte chunks; events and even single
//! UTF-8 characters can straddle chunk boundaries. The parser buffers
//! bytes, processes complete lines, and dispatches an event per blank
//! line. `id:` and `retry:` fields are accepted and ignored; comment
//! lines (leading `:`) are skipped.

/// One named server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the stream did not name one.
    pub name: String,
    /// Data payload; multi-line data is joined with `\n`. May be empty
    /// for liveness-only events.
    pub data: String,
}

/// Incremental SSE parser.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event_name: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_name = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            // id and retry are part of the protocol but unused here.
            _ => {}
        }
        None
    }

    /// Emit the buffered event, if any fields were seen.
    ///
    /// The event-stream protocol drops events with an empty data buffer;
    /// the backend's heartbeat may arrive payload-free, so a named event
    /// dispatches even without data.
    fn dispatch(&mut self) -> Option<SseEvent> {
        let name = self.event_name.take();
        let data = std::mem::take(&mut self.data);

        if name.is_none() && data.is_empty() {
            return None;
        }

        Some(SseEvent {
            name: name.unwrap_or_else(|| "message".to_owned()),
            data: data.join("\n"),
        })
    }
}
