//! Event scanner
//!
//! Reads a live upstream response, frames it into events and hands each event
//! to a provider decoder. Decoded chunks go to the hook in arrival order.
//!
//! A status >= 400 is turned into [`RelayError::Status`] with the verbatim body
//! before any decoding happens. A hook or decoder error stops reading at once and
//! drops the response, which closes the connection.

use futures::StreamExt;
use reqwest::Response;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    sse_parser::{LegacyLine, SseEvent, SseParser},
    Decoded,
};
use crate::{
    error::{RelayError, Result},
    services::Hook,
};

/// Stream framing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Every significant line is a `data:` payload
    Legacy,
    /// `event:` / `data:` blocks terminated by a blank line
    Full,
}

/// Counters for one scanned stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Events handed to the decoder
    pub events: usize,
    /// Chunks delivered to the hook
    pub chunks: usize,
    /// Events the decoder could not recognize
    pub dropped: usize,
    /// Whether the decoder reported a terminal event
    pub terminated: bool,
}

/// Frames and dispatches one upstream stream
#[derive(Debug, Clone, Copy)]
pub struct EventScanner {
    provider: &'static str,
    framing: Framing,
}

enum Framer {
    Legacy,
    Full(SseParser),
}

impl Framer {
    fn line(&mut self, raw: &str) -> Option<SseEvent> {
        match self {
            Self::Legacy => {
                debug!("[sse] chunk: {raw}");
                match LegacyLine::classify(raw) {
                    LegacyLine::Payload(payload) => Some(SseEvent::data(payload)),
                    LegacyLine::Skip | LegacyLine::Done => None,
                }
            }
            Self::Full(parser) => parser
                .push_line(raw)
                .filter(|event| !event.is_done_marker()),
        }
    }

    fn finish(&mut self) -> Option<SseEvent> {
        match self {
            Self::Legacy => None,
            Self::Full(parser) => parser.flush().filter(|event| !event.is_done_marker()),
        }
    }
}

impl EventScanner {
    /// Create a new scanner for a provider
    #[must_use]
    pub const fn new(provider: &'static str, framing: Framing) -> Self {
        Self { provider, framing }
    }

    #[must_use]
    pub const fn legacy(provider: &'static str) -> Self {
        Self::new(provider, Framing::Legacy)
    }

    #[must_use]
    pub const fn full(provider: &'static str) -> Self {
        Self::new(provider, Framing::Full)
    }

    /// `Status` error for a failed response; an unreadable body is logged and left empty
    fn status_failure<E: std::fmt::Display>(
        &self,
        status: u16,
        read: std::result::Result<String, E>,
    ) -> RelayError {
        let body = match read {
            Ok(body) => body,
            Err(e) => {
                debug!(
                    provider = self.provider,
                    "[sse] failed to read error body for status {status}: {e}"
                );
                String::new()
            }
        };
        debug!(
            provider = self.provider,
            "[sse] request failed with status: {status}\nresponse: {body}"
        );
        RelayError::Status { status, body }
    }

    /// Scan a response to completion
    ///
    /// # Errors
    ///
    /// - [`RelayError::Status`] when the upstream answered with status >= 400
    /// - any error returned by `decode` or `hook`, unchanged
    /// - [`RelayError::Cancelled`] when `cancel` fires
    /// - transport errors while reading the body
    pub async fn scan<D>(
        &self,
        response: Response,
        cancel: &CancellationToken,
        mut decode: D,
        hook: &mut Hook<'_>,
    ) -> Result<ScanSummary>
    where
        D: FnMut(&SseEvent) -> Result<Decoded> + Send,
    {
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(self.status_failure(status, response.text().await));
        }

        let mut framer = match self.framing {
            Framing::Legacy => Framer::Legacy,
            Framing::Full => Framer::Full(SseParser::new()),
        };
        let mut summary = ScanSummary::default();
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        'read: loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RelayError::Cancelled),
                next = stream.next() => next,
            };

            let Some(bytes) = next else {
                break 'read;
            };
            buffer.extend_from_slice(&bytes?);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line[..pos]);

                if let Some(event) = framer.line(&line) {
                    if self.dispatch(&event, &mut decode, hook, &mut summary)? {
                        break 'read;
                    }
                }
            }
        }

        if !summary.terminated {
            // trailing line without newline
            if !buffer.is_empty() {
                let line = String::from_utf8_lossy(&buffer).into_owned();
                buffer.clear();
                if let Some(event) = framer.line(&line) {
                    if self.dispatch(&event, &mut decode, hook, &mut summary)? {
                        return Ok(self.finish(summary));
                    }
                }
            }
            if let Some(event) = framer.finish() {
                self.dispatch(&event, &mut decode, hook, &mut summary)?;
            }
        }

        Ok(self.finish(summary))
    }

    /// Decode one event and deliver its chunk; returns true on a terminal event
    fn dispatch<D>(
        &self,
        event: &SseEvent,
        decode: &mut D,
        hook: &mut Hook<'_>,
        summary: &mut ScanSummary,
    ) -> Result<bool>
    where
        D: FnMut(&SseEvent) -> Result<Decoded>,
    {
        if self.framing == Framing::Full {
            debug!("[sse-full] event: {} data: {}", event.kind(), event.data);
        }
        summary.events += 1;

        match decode(event)? {
            Decoded::Chunk(chunk) => {
                summary.chunks += 1;
                hook(chunk)?;
            }
            Decoded::Ignored => {}
            Decoded::Dropped => {
                summary.dropped += 1;
                debug!(
                    provider = self.provider,
                    "dropping unrecognized stream event: {}", event.data
                );
                metrics::counter!("relay_sse_dropped_lines_total", "provider" => self.provider)
                    .increment(1);
            }
            Decoded::Done => {
                summary.terminated = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn finish(&self, summary: ScanSummary) -> ScanSummary {
        debug!(
            provider = self.provider,
            events = summary.events,
            chunks = summary.chunks,
            dropped = summary.dropped,
            "stream finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messages::Chunk,
        services::test_support::{collector, joined, legacy_sse},
    };
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    async fn serve(status: u16, body: &str) -> (MockServer, Response) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(status)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body.to_string()),
            )
            .mount(&server)
            .await;
        let response = reqwest::Client::new()
            .post(server.uri())
            .send()
            .await
            .unwrap();
        (server, response)
    }

    fn passthrough(event: &SseEvent) -> Result<Decoded> {
        Ok(Decoded::text(event.data.clone()))
    }

    #[tokio::test]
    async fn test_legacy_delivers_each_payload_and_skips_done() {
        let (_server, response) = serve(200, &legacy_sse(&["a", "b", "c"])).await;
        let (chunks, mut hook) = collector();

        let summary = EventScanner::legacy("test")
            .scan(response, &CancellationToken::new(), passthrough, hook.as_mut())
            .await
            .unwrap();

        assert_eq!(joined(&chunks), "abc");
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.events, 3);
    }

    #[tokio::test]
    async fn test_legacy_ignores_short_and_foreign_lines() {
        let body = "data:\n: comment\nevent: x\ndata: one\r\ndata:two";
        let (_server, response) = serve(200, body).await;
        let (chunks, mut hook) = collector();

        EventScanner::legacy("test")
            .scan(response, &CancellationToken::new(), passthrough, hook.as_mut())
            .await
            .unwrap();

        assert_eq!(joined(&chunks), "onetwo");
    }

    #[tokio::test]
    async fn test_status_error_never_reaches_decoder() {
        let (_server, response) = serve(429, "{\"error\":{\"message\":\"slow down\"}}").await;
        let (chunks, mut hook) = collector();
        let mut decoded = 0;

        let err = EventScanner::legacy("test")
            .scan(
                response,
                &CancellationToken::new(),
                |_event: &SseEvent| {
                    decoded += 1;
                    Ok(Decoded::Ignored)
                },
                hook.as_mut(),
            )
            .await
            .unwrap_err();

        match err {
            RelayError::Status { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "{\"error\":{\"message\":\"slow down\"}}");
            }
            other => panic!("expected status error, got {other:?}"),
        }
        assert_eq!(decoded, 0);
        assert!(chunks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_full_framing_events_and_terminal() {
        let body = "event: delta\ndata: a\n\nevent: delta\ndata: b\n\nevent: stop\ndata: {}\n\nevent: delta\ndata: late\n\n";
        let (_server, response) = serve(200, body).await;
        let (chunks, mut hook) = collector();

        let summary = EventScanner::full("test")
            .scan(
                response,
                &CancellationToken::new(),
                |event: &SseEvent| {
                    Ok(match event.kind() {
                        "delta" => Decoded::text(event.data.clone()),
                        "stop" => Decoded::Done,
                        _ => Decoded::Ignored,
                    })
                },
                hook.as_mut(),
            )
            .await
            .unwrap();

        assert_eq!(joined(&chunks), "ab");
        assert!(summary.terminated);
    }

    #[tokio::test]
    async fn test_full_framing_flushes_last_event_at_eof() {
        let (_server, response) = serve(200, "event: delta\ndata: tail").await;
        let (chunks, mut hook) = collector();

        EventScanner::full("test")
            .scan(response, &CancellationToken::new(), passthrough, hook.as_mut())
            .await
            .unwrap();

        assert_eq!(joined(&chunks), "tail");
    }

    #[tokio::test]
    async fn test_hook_error_aborts_scan() {
        let (_server, response) = serve(200, &legacy_sse(&["a", "b", "c"])).await;
        let mut calls = 0;
        let mut hook = |_chunk: Chunk| -> Result<()> {
            calls += 1;
            Err(RelayError::from("client went away"))
        };

        let err = EventScanner::legacy("test")
            .scan(response, &CancellationToken::new(), passthrough, &mut hook)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "client went away");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_unreadable_error_body_keeps_status() {
        let scanner = EventScanner::legacy("test");

        let err = scanner.status_failure(503, Err::<String, _>("connection reset"));
        assert!(matches!(err, RelayError::Status { status: 503, .. }));
        assert_eq!(err.status_body(), Some(""));

        let err = scanner.status_failure(429, Ok::<_, RelayError>("slow down".to_string()));
        assert_eq!(err.status_body(), Some("slow down"));
    }

    #[tokio::test]
    async fn test_dropped_events_are_counted() {
        let (_server, response) = serve(200, &legacy_sse(&["ok", "garbage"])).await;
        let (chunks, mut hook) = collector();

        let summary = EventScanner::legacy("test")
            .scan(
                response,
                &CancellationToken::new(),
                |event: &SseEvent| {
                    Ok(if event.data == "ok" {
                        Decoded::text("ok")
                    } else {
                        Decoded::Dropped
                    })
                },
                hook.as_mut(),
            )
            .await
            .unwrap();

        assert_eq!(summary.dropped, 1);
        assert_eq!(chunks.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_scan() {
        let (_server, response) = serve(200, &legacy_sse(&["a"])).await;
        let (_chunks, mut hook) = collector();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = EventScanner::legacy("test")
            .scan(response, &cancel, passthrough, hook.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Cancelled));
    }
}
