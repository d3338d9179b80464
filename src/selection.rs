//! Which citations are in view and which one is highlighted

use crate::citation::{find_by_id, Citation};
use crate::conversation::{Message, Timeline};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationSelection {
    current: Vec<Citation>,
    selected: Option<Citation>,
}

impl CitationSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Citations of the most recently focused message
    pub fn current(&self) -> &[Citation] {
        &self.current
    }

    pub fn selected(&self) -> Option<&Citation> {
        self.selected.as_ref()
    }

    /// Select exactly `citation`. Membership in the current set is the
    /// caller's business.
    pub fn select(&mut self, citation: Citation) {
        self.selected = Some(citation);
    }

    /// Replace the current set, e.g. when a streamed answer gets citations
    pub fn set_current(&mut self, citations: Vec<Citation>) {
        self.current = citations;
    }

    /// Focus a message: its citations become current and the first is
    /// selected. A message without citations clears both.
    pub fn handle_message_click(&mut self, message: &Message) {
        if let Some(first) = message.citations.first() {
            self.selected = Some(first.clone());
            self.current = message.citations.clone();
        } else {
            self.clear();
        }
    }

    /// Resolve a `[k]` marker against the current set and select the match.
    ///
    /// Returns `false`, leaving the selection alone, when nothing matches.
    pub fn select_marker(&mut self, marker: u32) -> bool {
        match find_by_id(&self.current, marker) {
            Some(citation) => {
                self.selected = Some(citation.clone());
                true
            }
            None => false,
        }
    }

    /// Focus the newest cited answer of a freshly loaded timeline
    pub fn focus_latest(&mut self, timeline: &Timeline) {
        match timeline.latest_cited_answer() {
            Some(message) => self.handle_message_click(message),
            None => self.clear(),
        }
    }

    pub fn clear(&mut self) {
        self.current.clear();
        self.selected = None;
    }
}
