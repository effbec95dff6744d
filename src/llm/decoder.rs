//! Incremental decoder for the line-oriented chat completion stream
//!
//! The transport may split chunks anywhere: mid-line, mid-JSON, even inside
//! a multi-byte UTF-8 sequence. The decoder keeps the unfinished tail as raw
//! bytes and only interprets complete lines.
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"},"index":0,"finish_reason":null}]}
//! data: {"choices":[{"delta":{"content":"lo"},"index":0,"finish_reason":null}]}
//! data: {"choices":[{"delta":{},"index":0,"finish_reason":"stop"}]}
//! data: [DONE]
//! ```

use std::collections::VecDeque;

use futures::{Stream, StreamExt};

use super::types::ChatStreamItem;
use crate::{Error, Result};

/// Prefix of a line carrying a JSON event
const EVENT_PREFIX: &str = "data: ";

/// Output of the decoder, in stream order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// Non-empty fragment of generated text
    Delta(String),
    /// The first choice reported a finish reason
    Finished { finish_reason: String },
}

/// Stateful line decoder; one per response stream
#[derive(Debug, Default)]
pub struct StreamDecoder {
    carry: Vec<u8>,
    failed: bool,
}

impl StreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a protocol error has already ended this stream
    #[must_use]
    pub const fn has_failed(&self) -> bool {
        self.failed
    }

    /// Feed one transport chunk
    ///
    /// Returns the events decoded from every line completed by this chunk.
    /// If a line fails, the error is the last item and the decoder refuses
    /// all further input.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<DecodeEvent>> {
        if self.failed {
            return Vec::new();
        }

        self.carry.extend_from_slice(chunk);
        let Some(last_newline) = self.carry.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, rest);

        let mut events = Vec::new();
        for line in complete.split(|&b| b == b'\n') {
            match decode_line(line) {
                Ok(Some(item)) => events.extend(item_events(item).into_iter().map(Ok)),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "chat stream failed");
                    self.failed = true;
                    self.carry.clear();
                    events.push(Err(e));
                    break;
                }
            }
        }
        events
    }

    /// Signal transport end
    ///
    /// Any unterminated tail is discarded; returns how many bytes were lost.
    pub fn finish(&mut self) -> usize {
        let dropped = self.carry.len();
        if dropped > 0 {
            tracing::debug!(bytes = dropped, "discarding unterminated trailing line");
        }
        self.carry.clear();
        dropped
    }
}

/// Parse one complete line; `None` for lines that carry no JSON event
fn decode_line(line: &[u8]) -> Result<Option<ChatStreamItem>> {
    let line = String::from_utf8_lossy(line);
    let line = line.strip_suffix('\r').unwrap_or(&line);

    let Some(payload) = line.strip_prefix(EVENT_PREFIX) else {
        return Ok(None);
    };
    if !(payload.starts_with('{') && payload.ends_with('}')) {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| Error::Protocol(format!("malformed event: {e}")))?;

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| error.to_string(), ToString::to_string);
        return Err(Error::Protocol(message));
    }

    if !value.get("choices").is_some_and(serde_json::Value::is_array) {
        return Err(Error::Protocol("invalid response".to_string()));
    }

    let item = serde_json::from_value(value)
        .map_err(|e| Error::Protocol(format!("invalid response: {e}")))?;
    Ok(Some(item))
}

fn item_events(item: ChatStreamItem) -> Vec<DecodeEvent> {
    let Some(choice) = item.choices.into_iter().next() else {
        return Vec::new();
    };

    let mut events = Vec::with_capacity(2);
    if let Some(content) = choice.delta.and_then(|d| d.content)
        && !content.is_empty()
    {
        events.push(DecodeEvent::Delta(content));
    }
    if let Some(finish_reason) = choice.finish_reason {
        events.push(DecodeEvent::Finished { finish_reason });
    }
    events
}

struct DecodeState<S> {
    chunks: S,
    decoder: StreamDecoder,
    pending: VecDeque<Result<DecodeEvent>>,
    done: bool,
}

/// Lazily decode a stream of transport chunks
///
/// The returned stream is forward-only. It ends after the first error,
/// whether that error came from the transport or from a stream event.
pub fn decode_stream<S, B>(chunks: S) -> impl Stream<Item = Result<DecodeEvent>>
where
    S: Stream<Item = Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        chunks,
        decoder: StreamDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if item.is_err() {
                    st.done = true;
                    st.pending.clear();
                }
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.chunks.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.push(chunk.as_ref());
                    st.pending.extend(events);
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.decoder.finish();
                    st.done = true;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        ": keep-alive\n",
        "\n",
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"},\"index\":0,\"finish_reason\":null}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Héllo \"},\"index\":0,\"finish_reason\":null}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"wörld.\"},\"index\":0,\"finish_reason\":null}]}\r\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"\"},\"index\":0,\"finish_reason\":null}]}\n",
        "data: {\"choices\":[{\"delta\":{},\"index\":0,\"finish_reason\":\"stop\"}]}\n",
        "data: [DONE]\n",
    );

    fn decode_all(chunks: &[&[u8]]) -> Vec<Result<DecodeEvent>> {
        let mut decoder = StreamDecoder::new();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(decoder.push(chunk));
        }
        decoder.finish();
        out
    }

    fn ok_events(results: Vec<Result<DecodeEvent>>) -> Vec<DecodeEvent> {
        results.into_iter().map(Result::unwrap).collect()
    }

    fn expected() -> Vec<DecodeEvent> {
        vec![
            DecodeEvent::Delta("Héllo ".to_string()),
            DecodeEvent::Delta("wörld.".to_string()),
            DecodeEvent::Finished {
                finish_reason: "stop".to_string(),
            },
        ]
    }

    #[test]
    fn decodes_whole_stream() {
        let events = ok_events(decode_all(&[STREAM.as_bytes()]));
        assert_eq!(events, expected());
    }

    #[test]
    fn every_split_point_yields_same_events() {
        let bytes = STREAM.as_bytes();
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            let events = ok_events(decode_all(&[a, b]));
            assert_eq!(events, expected(), "split at byte {split}");
        }
    }

    #[test]
    fn byte_at_a_time_yields_same_events() {
        let chunks: Vec<&[u8]> = STREAM.as_bytes().chunks(1).collect();
        assert_eq!(ok_events(decode_all(&chunks)), expected());
    }

    #[test]
    fn error_event_stops_decoding() {
        let input = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"},\"index\":0,\"finish_reason\":null}]}\n",
            "data: {\"error\":{\"message\":\"rate limited\"}}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"},\"index\":0,\"finish_reason\":null}]}\n",
        );
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(input.as_bytes());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap(), &DecodeEvent::Delta("a".to_string()));
        match &events[1] {
            Err(Error::Protocol(msg)) => assert_eq!(msg, "rate limited"),
            other => panic!("expected protocol error, got {other:?}"),
        }
        assert!(decoder.has_failed());
        assert!(decoder.push(input.as_bytes()).is_empty());
    }

    #[test]
    fn missing_choices_is_invalid_response() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b"data: {\"id\":\"x\"}\n");
        match &events[0] {
            Err(Error::Protocol(msg)) => assert_eq!(msg, "invalid response"),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_protocol_error() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b"data: {\"choices\":[}\n");
        assert!(matches!(events[0], Err(Error::Protocol(_))));
    }

    #[test]
    fn unterminated_tail_is_dropped() {
        let mut decoder = StreamDecoder::new();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"lost\"},\"index\":0,\"finish_reason\":null}]}";
        assert!(decoder.push(line.as_bytes()).is_empty());
        assert_eq!(decoder.finish(), line.len());
    }

    #[tokio::test]
    async fn decode_stream_ends_after_error() {
        let chunks: Vec<Result<&[u8]>> = vec![
            Ok(&b"data: {\"choices\":[{\"delta\":{\"content\":\"one\"},\"index\":0,\"finish_reason\":null}]}\n"[..]),
            Ok(&b"data: {\"error\":{\"message\":\"boom\"}}\n"[..]),
            Ok(&b"data: {\"choices\":[{\"delta\":{\"content\":\"two\"},\"index\":0,\"finish_reason\":null}]}\n"[..]),
        ];
        let events: Vec<_> = decode_stream(futures::stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(DecodeEvent::Delta(t)) if t == "one"));
        assert!(matches!(&events[1], Err(Error::Protocol(m)) if m == "boom"));
    }

    #[tokio::test]
    async fn decode_stream_surfaces_transport_error() {
        let chunks: Vec<Result<&[u8]>> = vec![
            Ok(&b"data: {\"choices\":[{\"delta\":{\"content\":\"one\"},\"index\":0,\"finish_reason\":null}]}\n"[..]),
            Err(Error::Network("connection reset".to_string())),
        ];
        let events: Vec<_> = decode_stream(futures::stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], Err(Error::Network(_))));
    }
}
