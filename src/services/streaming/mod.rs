//! Streaming support for upstream responses
//!
//! Provides the event scanner with its two SSE framings, the per-provider
//! line decoders, and the reasoning/answer splitter.

pub mod anthropic_stream;
pub mod openai_stream;
pub mod reasoning;
pub mod scanner;
pub mod sse_parser;

pub use reasoning::ReasoningSplitter;
pub use scanner::{EventScanner, Framing, ScanSummary};
pub use sse_parser::{LegacyLine, SseEvent, SseParser};

use crate::messages::Chunk;

/// Outcome of decoding one stream event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Deliver this chunk to the hook
    Chunk(Chunk),
    /// Structural event with nothing to deliver
    Ignored,
    /// Unrecognized payload, tolerated and counted
    Dropped,
    /// Terminal event; stop reading
    Done,
}

impl Decoded {
    /// Chunk for a text fragment, or `Ignored` when empty
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::chunk(Chunk::text(content))
    }

    /// Deliver a chunk unless it carries nothing
    #[must_use]
    pub fn chunk(chunk: Chunk) -> Self {
        if chunk.is_empty() {
            Self::Ignored
        } else {
            Self::Chunk(chunk)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_ignored() {
        assert_eq!(Decoded::text(""), Decoded::Ignored);
        assert_eq!(Decoded::text("a"), Decoded::Chunk(Chunk::text("a")));
    }
}
