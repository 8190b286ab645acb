//! Incremental Server-Sent Events parser.
//!
//! Shared by the LLM backends (streamed completions) and the MCP HTTP
//! transports (server-to-client message channel).

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Event type, defaulting to `message` as per the EventSource model.
    pub fn kind(&self) -> &str {
        self.event_type.as_deref().unwrap_or("message")
    }
}

/// Incremental SSE parser that turns text chunks into events.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    /// Trailing bytes of a UTF-8 sequence split across network chunks.
    partial: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text and return any complete events.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        // normalised on the whole buffer so a CRLF split across chunks is caught
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = Self::parse_block(block.trim_end_matches('\n')) {
                events.push(event);
            }
        }
        events
    }

    /// Feed raw bytes from the network, carrying incomplete UTF-8
    /// sequences over to the next call.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.partial.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.partial) {
            Ok(_) => self.partial.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // invalid sequence, not just a truncated one
            Err(_) => {
                let text = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                return self.feed(&text);
            }
        };
        let rest = self.partial.split_off(valid);
        let head = std::mem::replace(&mut self.partial, rest);
        match String::from_utf8(head) {
            Ok(text) => self.feed(&text),
            Err(_) => Vec::new(),
        }
    }

    /// Parse one block (lines between blank lines) into an event.
    fn parse_block(block: &str) -> Option<SseEvent> {
        let mut event_type = None;
        let mut data_lines = Vec::new();

        for line in block.lines() {
            if line.starts_with(':') {
                continue;
            }
            if let Some((field, value)) = line.split_once(':') {
                let value = value.strip_prefix(' ').unwrap_or(value);
                match field {
                    "event" => event_type = Some(value.to_string()),
                    "data" => data_lines.push(value.to_string()),
                    _ => {}
                }
            } else if line == "data" {
                data_lines.push(String::new());
            }
        }

        if data_lines.is_empty() {
            return None;
        }

        Some(SseEvent {
            event_type,
            data: data_lines.join("\n"),
        })
    }
}
