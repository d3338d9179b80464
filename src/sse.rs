//! Server-sent event decoding for the answer stream
//!
//! Two layers: [`SseDecoder`] turns arbitrarily chunked bytes into raw
//! `(event, data)` pairs, and [`StreamEvent::parse`] gives each pair a type.

mod decoder;
mod event;

#[cfg(test)]
mod proptests;

pub use decoder::{decode_stream, RawEvent, SseDecoder};
pub use event::{DeltaPayload, MetaPayload, StreamEvent};
pub(crate) use event::truthy;
