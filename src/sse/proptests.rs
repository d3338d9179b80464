//! Property-based tests for stream decoding
//!
//! Chunk boundaries chosen by the transport must never change what the
//! session sees.

use super::*;
use crate::assembler::TurnAssembler;
use crate::conversation::{Message, Timeline};
use proptest::prelude::*;
use proptest::sample::Index;
use serde_json::json;

fn arb_event_type() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("meta"),
        Just("delta"),
        Just("citations"),
        Just("done"),
        Just("heartbeat"),
    ]
}

/// A line that is not part of any event
fn arb_noise() -> impl Strategy<Value = Option<String>> {
    proptest::option::of(prop_oneof![
        Just(": keep-alive".to_string()),
        Just("id: 7".to_string()),
        Just(String::new()),
        Just("retry: 1000".to_string()),
    ])
}

fn arb_frame() -> impl Strategy<Value = (String, String, Option<String>)> {
    (arb_event_type(), "\\PC{1,24}", arb_noise())
        .prop_map(|(event, data, noise)| (event.to_string(), data, noise))
}

fn render(frames: &[(String, String, Option<String>)], crlf: bool) -> Vec<u8> {
    let eol = if crlf { "\r\n" } else { "\n" };
    let mut body = String::new();
    for (event, data, noise) in frames {
        if let Some(noise) = noise {
            body.push_str(noise);
            body.push_str(eol);
        }
        body.push_str(&format!("event: {event}{eol}data: {data}{eol}{eol}"));
    }
    body.into_bytes()
}

/// Cut `body` at the chosen offsets, in any byte position
fn split(body: &[u8], cuts: &[Index]) -> Vec<Vec<u8>> {
    let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(body.len() + 1)).collect();
    offsets.sort_unstable();
    offsets.dedup();

    let mut chunks = Vec::new();
    let mut start = 0;
    for offset in offsets {
        chunks.push(body[start..offset].to_vec());
        start = offset;
    }
    chunks.push(body[start..].to_vec());
    chunks
}

fn decode_chunked(chunks: &[Vec<u8>]) -> Vec<RawEvent> {
    let mut decoder = SseDecoder::new();
    let mut events = Vec::new();
    for chunk in chunks {
        events.extend(decoder.feed(chunk));
    }
    decoder.finish();
    events
}

proptest! {
    /// Any chunking decodes to the same events as the whole body
    #[test]
    fn prop_chunking_is_invisible(
        frames in proptest::collection::vec(arb_frame(), 0..12),
        crlf in any::<bool>(),
        cuts in proptest::collection::vec(any::<Index>(), 0..16),
    ) {
        let body = render(&frames, crlf);
        let whole = SseDecoder::decode_all(&body);
        let chunked = decode_chunked(&split(&body, &cuts));
        prop_assert_eq!(chunked, whole);
    }

    /// Every complete frame with visible data comes out, in order
    #[test]
    fn prop_frames_come_out_in_order(
        frames in proptest::collection::vec(arb_frame(), 0..12),
    ) {
        let body = render(&frames, false);
        let expected: Vec<RawEvent> = frames
            .iter()
            .filter(|(_, data, _)| !data.trim().is_empty())
            .map(|(event, data, _)| RawEvent::new(event.as_str(), data.trim()))
            .collect();
        prop_assert_eq!(SseDecoder::decode_all(&body), expected);
    }

    /// Delta fragments concatenate exactly, however the bytes are cut
    #[test]
    fn prop_deltas_concatenate(
        fragments in proptest::collection::vec("\\PC{0,16}", 0..10),
        cuts in proptest::collection::vec(any::<Index>(), 0..24),
    ) {
        let mut body = String::new();
        for fragment in &fragments {
            let data = json!({ "content": fragment }).to_string();
            body.push_str(&format!("event: delta\ndata: {data}\n\n"));
        }

        let mut timeline = Timeline::new();
        timeline.push(Message::user("q"));
        let mut turn = TurnAssembler::new(timeline.push(Message::assistant_placeholder()));
        for raw in decode_chunked(&split(body.as_bytes(), &cuts)) {
            let event = StreamEvent::parse(&raw).unwrap();
            turn.apply(&mut timeline, event);
        }

        prop_assert_eq!(&timeline.get(turn.index()).unwrap().content, &fragments.concat());
    }
}
