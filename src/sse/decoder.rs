//! Incremental SSE line decoder
//!
//! Chunk boundaries from the transport never line up with event boundaries,
//! so the decoder buffers the trailing partial line between reads. Lines are
//! split on the byte `\n` before UTF-8 decoding, which keeps multi-byte
//! characters that straddle two chunks intact.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;

const EVENT_FIELD: &str = "event:";
const DATA_FIELD: &str = "data:";

/// One decoded event before its payload is interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event_type: String,
    pub data: String,
}

impl RawEvent {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
        }
    }
}

/// Stateful decoder fed one transport chunk at a time
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    pending_event: Option<String>,
    pending_data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        let scan_from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let Some(last_newline) = self.buffer[scan_from..]
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|pos| scan_from + pos)
        else {
            return Vec::new();
        };

        let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();
        complete
            .split(|b| *b == b'\n')
            .filter_map(|line| {
                let text = String::from_utf8_lossy(line);
                self.accept_line(text.strip_suffix('\r').unwrap_or(&*text))
            })
            .collect()
    }

    /// Bytes still waiting for a line terminator
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Close the decoder at end of stream.
    ///
    /// An incomplete trailing line or a half-received event is dropped; the
    /// number of discarded bytes is returned.
    pub fn finish(self) -> usize {
        let dropped = self.buffer.len();
        if dropped > 0 || self.pending_event.is_some() {
            tracing::debug!(
                dropped_bytes = dropped,
                pending_event = ?self.pending_event,
                "Discarding incomplete trailing event"
            );
        }
        dropped
    }

    /// Decode a complete body in one go
    pub fn decode_all(body: &[u8]) -> Vec<RawEvent> {
        let mut decoder = Self::new();
        let events = decoder.feed(body);
        decoder.finish();
        events
    }

    fn accept_line(&mut self, line: &str) -> Option<RawEvent> {
        if let Some(value) = line.strip_prefix(EVENT_FIELD) {
            self.pending_event = non_empty(value);
            return None;
        }

        let value = line.strip_prefix(DATA_FIELD)?;
        self.pending_data = non_empty(value);

        if self.pending_event.is_some() && self.pending_data.is_some() {
            let event_type = self.pending_event.take()?;
            let data = self.pending_data.take()?;
            return Some(RawEvent { event_type, data });
        }
        None
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Adapt a transport byte stream into a stream of raw events.
///
/// A transport error is yielded once and ends the stream.
pub fn decode_stream<S, E>(body: S) -> impl Stream<Item = Result<RawEvent, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    let state = (body, Some(SseDecoder::new()), VecDeque::new());
    stream::unfold(state, |(mut body, mut decoder, mut ready)| async move {
        loop {
            if let Some(event) = ready.pop_front() {
                return Some((Ok(event), (body, decoder, ready)));
            }
            let active = decoder.as_mut()?;
            match body.next().await {
                Some(Ok(chunk)) => ready.extend(active.feed(&chunk)),
                Some(Err(e)) => {
                    decoder.take();
                    return Some((Err(e), (body, decoder, ready)));
                }
                None => {
                    if let Some(finished) = decoder.take() {
                        finished.finish();
                    }
                    return None;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(chunks: &[&[u8]]) -> Vec<RawEvent> {
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(decoder.feed(chunk));
        }
        events
    }

    #[test]
    fn decodes_event_data_pairs() {
        let body = b"event: meta\ndata: {\"conversation_id\":\"c-1\"}\n\nevent: delta\ndata: {\"content\":\"Hi\"}\n\n";
        assert_eq!(
            SseDecoder::decode_all(body),
            vec![
                RawEvent::new("meta", r#"{"conversation_id":"c-1"}"#),
                RawEvent::new("delta", r#"{"content":"Hi"}"#),
            ]
        );
    }

    #[test]
    fn holds_back_partial_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: delta\ndata: {\"con").is_empty());
        assert_eq!(decoder.buffered_len(), "data: {\"con".len());
        let events = decoder.feed(b"tent\":\"x\"}\n");
        assert_eq!(events, vec![RawEvent::new("delta", r#"{"content":"x"}"#)]);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn split_between_event_and_data_lines() {
        let events = feed_all(&[b"event: done\n", b"data: {}\n"]);
        assert_eq!(events, vec![RawEvent::new("done", "{}")]);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let body = "event: delta\ndata: {\"content\":\"没有找到\"}\n".as_bytes();
        // split inside the first CJK character
        let cut = body.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let events = feed_all(&[&body[..cut], &body[cut..]]);
        assert_eq!(events, vec![RawEvent::new("delta", r#"{"content":"没有找到"}"#)]);
    }

    #[test]
    fn crlf_line_endings() {
        let events = SseDecoder::decode_all(b"event: delta\r\ndata: {\"content\":\"a\"}\r\n\r\n");
        assert_eq!(events, vec![RawEvent::new("delta", r#"{"content":"a"}"#)]);
    }

    #[test]
    fn data_without_event_is_not_emitted() {
        let events = SseDecoder::decode_all(b"data: {\"orphan\":true}\nevent: delta\ndata: {\"content\":\"b\"}\n");
        assert_eq!(events, vec![RawEvent::new("delta", r#"{"content":"b"}"#)]);
    }

    #[test]
    fn orphan_data_does_not_pair_with_a_later_event() {
        let events = SseDecoder::decode_all(b"data: {\"orphan\":true}\nevent: delta\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn empty_data_waits_for_a_real_data_line() {
        let events = SseDecoder::decode_all(b"event: delta\ndata:\ndata: {\"content\":\"c\"}\n");
        assert_eq!(events, vec![RawEvent::new("delta", r#"{"content":"c"}"#)]);
    }

    #[test]
    fn comments_and_unknown_fields_are_ignored() {
        let events = SseDecoder::decode_all(b": ping\nid: 7\nretry: 100\nevent: done\ndata: {}\n");
        assert_eq!(events, vec![RawEvent::new("done", "{}")]);
    }

    #[test]
    fn trailing_partial_event_is_discarded() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: done\ndata: {}\nevent: delta\ndata: {\"content\":\"lost\"}");
        assert_eq!(events, vec![RawEvent::new("done", "{}")]);
        assert_eq!(decoder.finish(), "data: {\"content\":\"lost\"}".len());
    }

    #[tokio::test]
    async fn decode_stream_preserves_order_across_chunks() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"event: delta\nda")),
            Ok(Bytes::from_static(b"ta: {\"content\":\"1\"}\nevent: delta\ndata: {\"content\":\"2\"}\n")),
            Ok(Bytes::from_static(b"event: done\ndata: {}\n")),
        ];
        let events: Vec<_> = decode_stream(stream::iter(chunks))
            .map(|r| r.unwrap().data)
            .collect()
            .await;
        assert_eq!(events, vec![r#"{"content":"1"}"#, r#"{"content":"2"}"#, "{}"]);
    }

    #[tokio::test]
    async fn decode_stream_ends_after_transport_error() {
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"event: delta\ndata: {\"content\":\"1\"}\n")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"event: done\ndata: {}\n")),
        ];
        let items: Vec<_> = decode_stream(stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1].as_ref().unwrap_err(), "connection reset");
    }
}
