//! Server-Sent Events (SSE) encoding and decoding.
//!
//! SSE messages consist of fields separated by newlines and are terminated by
//! a blank line:
//! ```text
//! event: message
//! data: {"jsonrpc": "2.0", ...}
//!
//! ```

use gatemcp_protocol::{CodecResult, Envelope};

use crate::events;

/// A Server-Sent Event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    /// Event ID for resumption support
    pub id: Option<String>,
    /// Event type (defaults to "message" if not specified)
    pub event: Option<String>,
    /// Event data (can be multiline)
    pub data: String,
    /// Retry interval in milliseconds (optional)
    pub retry: Option<u32>,
}

impl SseEvent {
    fn typed(event: &str, data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: Some(event.to_string()),
            data: data.into(),
            retry: None,
        }
    }

    /// The handshake event announcing where the client should post.
    pub fn endpoint(post_url: impl Into<String>) -> Self {
        Self::typed(events::ENDPOINT, post_url)
    }

    /// A `message` event carrying one envelope.
    pub fn envelope(envelope: &Envelope) -> CodecResult<Self> {
        Ok(Self::typed(events::MESSAGE, envelope.encode_string()?))
    }

    /// Decode the data field as an envelope.
    pub fn decode_envelope(&self) -> CodecResult<Envelope> {
        Envelope::decode_str(&self.data)
    }
}

/// SSE encoder for converting events to wire format.
#[derive(Debug)]
pub struct SseEncoder;

impl SseEncoder {
    /// Encode an SSE event to bytes.
    pub fn encode(event: &SseEvent) -> Vec<u8> {
        Self::encode_string(event).into_bytes()
    }

    /// Encode an SSE event to a string.
    pub fn encode_string(event: &SseEvent) -> String {
        let mut output = String::with_capacity(event.data.len() + 32);

        if let Some(ref id) = event.id {
            output.push_str("id: ");
            output.push_str(id);
            output.push('\n');
        }

        if let Some(ref event_type) = event.event {
            output.push_str("event: ");
            output.push_str(event_type);
            output.push('\n');
        }

        if let Some(retry) = event.retry {
            output.push_str("retry: ");
            output.push_str(&retry.to_string());
            output.push('\n');
        }

        // `split('\n')` keeps empty lines so multi-line data survives a round trip.
        for line in event.data.split('\n') {
            output.push_str("data: ");
            output.push_str(line.strip_suffix('\r').unwrap_or(line));
            output.push('\n');
        }

        output.push('\n');
        output
    }
}

/// Incremental SSE parser.
///
/// Bytes may arrive split at any position, including inside a multi-byte
/// character or between `\r` and `\n`.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    current_id: Option<String>,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_retry: Option<u32>,
}

impl SseParser {
    /// Create a new SSE parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed data to the parser and extract any complete events.
    pub fn feed(&mut self, data: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(data);

        let mut events = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if let Some(event) = self.emit_event() {
                    events.push(event);
                }
            } else if line.starts_with(':') {
                // Comment (keepalive)
            } else {
                let (field, value) = match line.find(':') {
                    Some(colon_pos) => {
                        let value = &line[colon_pos + 1..];
                        (&line[..colon_pos], value.strip_prefix(' ').unwrap_or(value))
                    }
                    None => (line.as_ref(), ""),
                };
                match field {
                    "id" => self.current_id = Some(value.to_string()),
                    "event" => self.current_event = Some(value.to_string()),
                    "data" => self.current_data.push(value.to_string()),
                    "retry" => {
                        if let Ok(ms) = value.parse() {
                            self.current_retry = Some(ms);
                        }
                    }
                    _ => {}
                }
            }
        }

        events
    }

    fn emit_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.current_id = None;
            self.current_event = None;
            self.current_retry = None;
            return None;
        }

        let event = SseEvent {
            id: self.current_id.take(),
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            retry: self.current_retry.take(),
        };
        self.current_data.clear();
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatemcp_protocol::RequestId;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn untyped(data: impl Into<String>) -> SseEvent {
        SseEvent {
            id: None,
            event: None,
            data: data.into(),
            retry: None,
        }
    }

    #[test]
    fn test_sse_encode_simple() {
        let encoded = SseEncoder::encode_string(&untyped("hello"));
        assert_eq!(encoded, "data: hello\n\n");
    }

    #[test]
    fn test_endpoint_event_wire_format() {
        let encoded = SseEncoder::encode_string(&SseEvent::endpoint("/sse?sessionId=abc"));
        assert_eq!(encoded, "event: endpoint\ndata: /sse?sessionId=abc\n\n");
    }

    #[test]
    fn test_multiline_data_roundtrip() {
        let event = untyped("a\n\nb");
        let events = SseParser::new().feed(&SseEncoder::encode(&event));
        assert_eq!(events, vec![event]);
    }

    #[test]
    fn test_parser_handles_crlf_and_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(b":\r\n\r\nevent: message\r\ndata: {}\r\nid: 3\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{}");
        assert_eq!(events[0].id.as_deref(), Some("3"));
    }

    #[test]
    fn test_keepalive_yields_no_event() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b":\n\n").is_empty());
    }

    #[test]
    fn test_envelope_event_decodes() {
        let envelope = Envelope::success(RequestId::Number(4), serde_json::json!({"ok": true}));
        let event = SseEvent::envelope(&envelope).unwrap();
        assert_eq!(event.event.as_deref(), Some("message"));
        let parsed = SseParser::new().feed(&SseEncoder::encode(&event));
        assert_eq!(parsed[0].decode_envelope().unwrap(), envelope);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property: chunk boundaries never change the parsed events
        #[test]
        fn prop_chunking_is_transparent(
            payloads in prop::collection::vec("[a-zé€ {}\":,]{0,20}", 1..6),
            cut in 1usize..17,
        ) {
            let events: Vec<SseEvent> = payloads.iter().map(|p| untyped(p.clone())).collect();
            let wire: Vec<u8> = events.iter().flat_map(SseEncoder::encode).collect();

            let mut parser = SseParser::new();
            let mut parsed = Vec::new();
            for chunk in wire.chunks(cut) {
                parsed.extend(parser.feed(chunk));
            }
            prop_assert_eq!(parsed, events);
        }
    }
}
