//! Citations attached to assistant answers
//!
//! The wire payload for citations is loosely typed, so decoding goes through
//! [`CitationPayload`], which keeps "well-formed list" and "anything else"
//! apart instead of trusting the shape.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("marker pattern is valid"));

/// A pointer to a source passage backing part of an answer.
///
/// `id` is the 1-based number the answer text refers to as `[id]`. It is
/// unique within the owning message and never reassigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub id: u32,
    #[serde(default)]
    pub chunk_id: String,
    #[serde(default)]
    pub block_id: String,
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub title_path: Vec<String>,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub book_id: String,
    #[serde(default)]
    pub book_title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub highlight_time: Option<String>,
    #[serde(default)]
    pub obsidian_uri: Option<String>,
}

impl Citation {
    pub fn new(id: u32, book_title: impl Into<String>) -> Self {
        Self {
            id,
            chunk_id: String::new(),
            block_id: String::new(),
            source_path: String::new(),
            title_path: Vec::new(),
            snippet: String::new(),
            book_id: String::new(),
            book_title: book_title.into(),
            author: None,
            highlight_time: None,
            obsidian_uri: None,
        }
    }

    /// Human-readable location, e.g. `Atomic Habits / Chapter 1`
    pub fn label(&self) -> String {
        std::iter::once(self.book_title.as_str())
            .chain(self.title_path.iter().map(String::as_str))
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

/// Result of decoding a citations payload at the wire boundary
#[derive(Debug, Clone, PartialEq)]
pub enum CitationPayload {
    Citations(Vec<Citation>),
    /// Not a list, or a list whose entries are not citations
    Malformed(Value),
}

impl CitationPayload {
    pub fn from_value(value: Value) -> Self {
        if !value.is_array() {
            return Self::Malformed(value);
        }
        match serde_json::from_value::<Vec<Citation>>(value.clone()) {
            Ok(citations) => Self::Citations(citations),
            Err(e) => {
                tracing::debug!(error = %e, "Citation list entries did not decode");
                Self::Malformed(value)
            }
        }
    }

    /// Citations carried by the payload; malformed payloads carry none.
    pub fn into_citations(self) -> Vec<Citation> {
        match self {
            Self::Citations(citations) => citations,
            Self::Malformed(_) => Vec::new(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Find the citation a `[k]` marker refers to
pub fn find_by_id(citations: &[Citation], id: u32) -> Option<&Citation> {
    citations.iter().find(|c| c.id == id)
}

/// Numbers of the `[k]` markers in `content`, in order of first appearance
pub fn citation_markers(content: &str) -> Vec<u32> {
    let mut markers = Vec::new();
    for caps in MARKER_RE.captures_iter(content) {
        if let Ok(n) = caps[1].parse::<u32>() {
            if n > 0 && !markers.contains(&n) {
                markers.push(n);
            }
        }
    }
    markers
}
