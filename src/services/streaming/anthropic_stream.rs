//! Anthropic Messages API stream decoding
//!
//! Full-framing events from `/v1/messages` are classified into content,
//! terminal and structural no-ops. Thinking deltas go through the reasoning
//! splitter; tool-use blocks become OpenAI-style streamed tool calls.

use serde::{Deserialize, Serialize};

use super::{Decoded, ReasoningSplitter, SseEvent};
use crate::{
    error::{RelayError, Result},
    messages::{Chunk, ToolCall, ToolCallFunction},
};

const PROVIDER: &str = "claude";

/// Stream event types for the Anthropic API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    /// Initial message metadata
    MessageStart {
        #[serde(default)]
        message: serde_json::Value,
    },

    /// Start of a content block
    ContentBlockStart {
        index: usize,
        content_block: ContentBlockStart,
    },

    /// Delta update for content block
    ContentBlockDelta { index: usize, delta: ContentDelta },

    /// End of a content block
    ContentBlockStop { index: usize },

    /// Message-level delta (usage, stop reason, etc.)
    MessageDelta {
        #[serde(default)]
        delta: serde_json::Value,
    },

    /// End of message stream
    MessageStop,

    /// Ping event (keepalive)
    Ping,

    /// Error event
    Error { error: ErrorData },

    #[serde(other)]
    Unknown,
}

/// Content block start data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockStart {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Other,
}

/// Content delta types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    #[serde(other)]
    Other,
}

/// Error data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorData {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorData {
    /// Convert to an upstream error
    #[must_use]
    pub fn into_error(self) -> RelayError {
        RelayError::upstream(
            PROVIDER,
            format!("{} (type: {})", self.message, self.error_type),
        )
    }
}

/// `{"error": {...}}` body returned with error statuses
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorData,
}

/// Per-call decoder for Claude streams
#[derive(Debug, Default)]
pub struct ClaudeStreamDecoder {
    splitter: ReasoningSplitter,
}

impl ClaudeStreamDecoder {
    /// Create a new decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one full-framing event
    ///
    /// # Errors
    ///
    /// Returns an upstream error for `error` events and error envelopes
    pub fn decode(&mut self, event: &SseEvent) -> Result<Decoded> {
        let Ok(parsed) = serde_json::from_str::<AnthropicStreamEvent>(&event.data) else {
            return Self::fallback(&event.data);
        };

        match parsed {
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => Ok(match delta {
                ContentDelta::TextDelta { text } => Decoded::text(self.splitter.answer(&text)),
                ContentDelta::ThinkingDelta { thinking } => {
                    Decoded::text(self.splitter.reasoning(&thinking))
                }
                ContentDelta::InputJsonDelta { partial_json } => {
                    Decoded::chunk(tool_call_chunk(index, String::new(), String::new(), partial_json))
                }
                ContentDelta::Other => Decoded::Ignored,
            }),

            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlockStart::ToolUse { id, name },
            } => Ok(Decoded::chunk(tool_call_chunk(index, id, name, String::new()))),

            AnthropicStreamEvent::MessageStop => Ok(Decoded::Done),

            AnthropicStreamEvent::Error { error } => Err(error.into_error()),

            AnthropicStreamEvent::MessageStart { .. }
            | AnthropicStreamEvent::ContentBlockStart { .. }
            | AnthropicStreamEvent::ContentBlockStop { .. }
            | AnthropicStreamEvent::MessageDelta { .. }
            | AnthropicStreamEvent::Ping => Ok(Decoded::Ignored),

            AnthropicStreamEvent::Unknown => Self::fallback(&event.data).map(|decoded| {
                if decoded == Decoded::Dropped {
                    Decoded::Ignored
                } else {
                    decoded
                }
            }),
        }
    }

    fn fallback(data: &str) -> Result<Decoded> {
        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(data) {
            return Err(envelope.error.into_error());
        }
        Ok(Decoded::Dropped)
    }
}

fn tool_call_chunk(index: usize, id: String, name: String, arguments: String) -> Chunk {
    Chunk {
        content: String::new(),
        tool_call: Some(vec![ToolCall {
            index: Some(index),
            id,
            call_type: "function".to_string(),
            function: ToolCallFunction { name, arguments },
        }]),
        function_call: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str, data: &str) -> SseEvent {
        SseEvent {
            event_type: Some(kind.to_string()),
            data: data.to_string(),
            id: None,
        }
    }

    fn text_of(decoded: Decoded) -> String {
        match decoded {
            Decoded::Chunk(chunk) => chunk.content,
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_thinking_then_text() {
        let mut decoder = ClaudeStreamDecoder::new();
        let thinking = r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm\n\nok"}}"#;
        let text = r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Answer"}}"#;

        assert_eq!(text_of(decoder.decode(&event("content_block_delta", thinking)).unwrap()), ">hmm\nok");
        assert_eq!(text_of(decoder.decode(&event("content_block_delta", text)).unwrap()), "\n\nAnswer");
    }

    #[test]
    fn test_structural_events_are_ignored() {
        let mut decoder = ClaudeStreamDecoder::new();
        for (kind, data) in [
            ("message_start", r#"{"type":"message_start","message":{"id":"m","usage":{"input_tokens":3}}}"#),
            ("content_block_start", r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#),
            ("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
            ("message_delta", r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}"#),
            ("ping", r#"{"type":"ping"}"#),
            ("future_event", r#"{"type":"future_event"}"#),
        ] {
            assert_eq!(decoder.decode(&event(kind, data)).unwrap(), Decoded::Ignored, "{kind}");
        }
    }

    #[test]
    fn test_message_stop_is_terminal() {
        let mut decoder = ClaudeStreamDecoder::new();
        assert_eq!(
            decoder.decode(&event("message_stop", r#"{"type":"message_stop"}"#)).unwrap(),
            Decoded::Done
        );
    }

    #[test]
    fn test_error_event() {
        let mut decoder = ClaudeStreamDecoder::new();
        let err = decoder
            .decode(&event(
                "error",
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            ))
            .unwrap_err();
        assert_eq!(err.to_string(), "claude error: Overloaded (type: overloaded_error)");
    }

    #[test]
    fn test_tool_use_stream() {
        let mut decoder = ClaudeStreamDecoder::new();
        let start = r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"search","input":{}}}"#;
        let delta = r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"q\":"}}"#;

        match decoder.decode(&event("content_block_start", start)).unwrap() {
            Decoded::Chunk(chunk) => {
                let call = &chunk.tool_call.unwrap()[0];
                assert_eq!(call.id, "toolu_1");
                assert_eq!(call.function.name, "search");
            }
            other => panic!("expected chunk, got {other:?}"),
        }
        match decoder.decode(&event("content_block_delta", delta)).unwrap() {
            Decoded::Chunk(chunk) => assert_eq!(chunk.tool_call.unwrap()[0].function.arguments, "{\"q\":"),
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_is_dropped() {
        let mut decoder = ClaudeStreamDecoder::new();
        assert_eq!(decoder.decode(&event("x", "{oops")).unwrap(), Decoded::Dropped);
    }
}
