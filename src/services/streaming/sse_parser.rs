//! Server-Sent Events (SSE) parsing
//!
//! Two framings are supported:
//! - full framing following the W3C spec (`event:` / `data:` lines, blank line ends the event)
//! - legacy line framing, where every significant line is a standalone `data:` payload

/// SSE event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type (e.g., "content_block_delta", "conversation.message.delta")
    pub event_type: Option<String>,

    /// Event data (JSON payload)
    pub data: String,

    /// Event ID (for reconnection)
    pub id: Option<String>,
}

impl SseEvent {
    /// Create a data-only event
    #[must_use]
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Check if event is complete (has data)
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.data.is_empty()
    }

    /// Check if this is the `[DONE]` end-of-stream marker
    #[must_use]
    pub fn is_done_marker(&self) -> bool {
        is_done_marker(&self.data)
    }

    /// Event type, or empty
    #[must_use]
    pub fn kind(&self) -> &str {
        self.event_type.as_deref().unwrap_or("")
    }
}

fn is_done_marker(payload: &str) -> bool {
    payload.starts_with("[DONE]")
}

/// Classification of one legacy-framed line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyLine<'a> {
    /// Not a `data:` line, or an empty `data:` line
    Skip,
    /// `[DONE]` marker
    Done,
    /// Trimmed payload to decode
    Payload(&'a str),
}

impl<'a> LegacyLine<'a> {
    /// Classify a raw line: significant iff it starts with `data:` and is longer than 5 bytes
    #[must_use]
    pub fn classify(raw: &'a str) -> Self {
        if raw.len() <= 5 || !raw.starts_with("data:") {
            return Self::Skip;
        }

        let payload = raw["data:".len()..].trim();
        if is_done_marker(payload) {
            Self::Done
        } else if payload.is_empty() {
            Self::Skip
        } else {
            Self::Payload(payload)
        }
    }
}

/// SSE parser for full-framing streams
///
/// Follows the W3C Server-Sent Events specification:
/// https://html.spec.whatwg.org/multipage/server-sent-events.html
#[derive(Debug, Default)]
pub struct SseParser {
    /// Current event being assembled
    current_event: SseEvent,
}

impl SseParser {
    /// Create a new SSE parser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a single line; returns the event it completes, if any
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.trim_end_matches('\r');

        // Blank line signals end of event
        if line.trim().is_empty() {
            return self.take_complete();
        }

        // Ignore comments
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = Self::parse_field(line);
        match field {
            "event" => {
                self.current_event.event_type = Some(value.trim().to_string());
            }
            "data" => {
                if !self.current_event.data.is_empty() {
                    self.current_event.data.push('\n');
                }
                self.current_event.data.push_str(value);
            }
            "id" => {
                self.current_event.id = Some(value.to_string());
            }
            _ => {}
        }

        None
    }

    /// Parse a field line into (field_name, value)
    fn parse_field(line: &str) -> (&str, &str) {
        match line.split_once(':') {
            // Remove optional space after colon
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        }
    }

    fn take_complete(&mut self) -> Option<SseEvent> {
        let event = std::mem::take(&mut self.current_event);
        event.is_complete().then_some(event)
    }

    /// Flush the event still being assembled at end of stream
    pub fn flush(&mut self) -> Option<SseEvent> {
        self.take_complete()
    }
}
