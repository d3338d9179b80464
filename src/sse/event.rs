//! Typed answer-stream events

use super::RawEvent;
use crate::citation::CitationPayload;
use crate::error::DecodeError;
use serde_json::Value;

/// Events the answer service emits during one turn
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Meta(MetaPayload),
    Delta(DeltaPayload),
    Citations(CitationPayload),
    /// Terminal marker, nothing follows for this turn
    Done,
    Unknown { event_type: String },
}

/// Turn metadata, sent before any content
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaPayload {
    pub conversation_id: Option<String>,
    pub needs_clarification: Option<bool>,
    pub clarification_question: Option<String>,
}

/// A fragment of assistant text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaPayload {
    pub content: Option<String>,
}

impl StreamEvent {
    /// Interpret a raw event.
    ///
    /// Every payload must be JSON, whatever its event type. Field shapes are
    /// tolerated loosely: wrong-typed strings count as absent and the
    /// clarification flag is read by truthiness.
    pub fn parse(raw: &RawEvent) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(&raw.data).map_err(|source| DecodeError {
            event_type: raw.event_type.clone(),
            source,
        })?;

        Ok(match raw.event_type.as_str() {
            "meta" => StreamEvent::Meta(MetaPayload {
                conversation_id: string_field(&value, "conversation_id"),
                needs_clarification: value.get("needs_clarification").map(truthy),
                clarification_question: string_field(&value, "clarification_question"),
            }),
            "delta" => StreamEvent::Delta(DeltaPayload {
                content: string_field(&value, "content"),
            }),
            "citations" => StreamEvent::Citations(CitationPayload::from_value(value)),
            "done" => StreamEvent::Done,
            other => StreamEvent::Unknown {
                event_type: other.to_string(),
            },
        })
    }

    pub fn name(&self) -> &str {
        match self {
            StreamEvent::Meta(_) => "meta",
            StreamEvent::Delta(_) => "delta",
            StreamEvent::Citations(_) => "citations",
            StreamEvent::Done => "done",
            StreamEvent::Unknown { event_type } => event_type,
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Loose boolean coercion for flags the server may send as 0/1 or strings
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
