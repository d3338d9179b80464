//! Assembles the open assistant message from stream events
//!
//! [`TurnAssembler::apply`] is the per-event transition. It only touches the
//! timeline; what else must change (conversation identity, current
//! citations) is reported back as an [`Applied`] for the session to carry out.

use crate::citation::{Citation, CitationPayload};
use crate::conversation::{ConversationId, Timeline};
use crate::sse::StreamEvent;

/// Phrase the answer service uses when the notes hold nothing relevant
pub const NO_INFORMATION_MARKER: &str = "没有找到相关信息";

/// Content shown in place of an answer whose turn failed
pub const FAILURE_NOTICE: &str = "Sorry, something went wrong while answering. Please try again.";

/// Why a citations payload was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// The answer says the notes contain nothing relevant
    NoInformation,
    /// The assistant is asking a follow-up question
    Clarification,
    /// The payload is not a list of citations
    Malformed,
}

/// Outcome of applying one event
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// The server named the conversation this turn belongs to
    ConversationAssigned(ConversationId),
    MetaRecorded,
    ContentAppended,
    CitationsAttached(Vec<Citation>),
    CitationsSuppressed(SuppressReason),
    Finished,
    Ignored,
}

/// Decide whether citations may be attached to an answer
pub fn citation_suppression(
    content: &str,
    is_clarification: bool,
    payload: &CitationPayload,
) -> Option<SuppressReason> {
    if content.contains(NO_INFORMATION_MARKER) {
        Some(SuppressReason::NoInformation)
    } else if is_clarification {
        Some(SuppressReason::Clarification)
    } else if payload.is_malformed() {
        Some(SuppressReason::Malformed)
    } else {
        None
    }
}

/// Per-turn assembly state
#[derive(Debug, Clone)]
pub struct TurnAssembler {
    index: usize,
    clarification: bool,
    clarification_question: Option<String>,
}

impl TurnAssembler {
    /// Start assembling into the assistant message at `index`
    pub fn new(index: usize) -> Self {
        Self {
            index,
            clarification: false,
            clarification_question: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the server flagged this turn as a clarification
    pub fn is_clarification(&self) -> bool {
        self.clarification
    }

    pub fn clarification_question(&self) -> Option<&str> {
        self.clarification_question.as_deref()
    }

    pub fn apply(&mut self, timeline: &mut Timeline, event: StreamEvent) -> Applied {
        match event {
            StreamEvent::Meta(meta) => {
                if let Some(flag) = meta.needs_clarification {
                    self.clarification = flag;
                }
                if meta.clarification_question.is_some() {
                    self.clarification_question = meta.clarification_question;
                }
                match meta.conversation_id {
                    Some(id) if !id.is_empty() => {
                        Applied::ConversationAssigned(ConversationId::new(id))
                    }
                    _ => Applied::MetaRecorded,
                }
            }

            StreamEvent::Delta(delta) => {
                let Some(open) = timeline.get(self.index) else {
                    return self.missing_message();
                };
                let fragment = delta.content.unwrap_or_default();
                let grown = open.with_delta(&fragment, self.clarification);
                timeline.replace(self.index, grown);
                Applied::ContentAppended
            }

            StreamEvent::Citations(payload) => {
                let Some(open) = timeline.get(self.index) else {
                    return self.missing_message();
                };
                match citation_suppression(&open.content, self.clarification, &payload) {
                    Some(reason) => {
                        tracing::debug!(?reason, "Suppressing citations");
                        let emptied = open.with_citations(Vec::new(), self.clarification);
                        timeline.replace(self.index, emptied);
                        Applied::CitationsSuppressed(reason)
                    }
                    None => {
                        let citations = payload.into_citations();
                        let cited = open.with_citations(citations.clone(), self.clarification);
                        timeline.replace(self.index, cited);
                        Applied::CitationsAttached(citations)
                    }
                }
            }

            StreamEvent::Done => Applied::Finished,

            StreamEvent::Unknown { event_type } => {
                tracing::debug!(event_type = %event_type, "Ignoring unrecognized stream event");
                Applied::Ignored
            }
        }
    }

    /// Overwrite the open message with the failure notice.
    ///
    /// This is the one change to an answer that is not an append.
    pub fn fail(&self, timeline: &mut Timeline) {
        if let Some(open) = timeline.get(self.index) {
            let failed = open.with_failure(FAILURE_NOTICE);
            timeline.replace(self.index, failed);
        }
    }

    fn missing_message(&self) -> Applied {
        tracing::warn!(index = self.index, "Open assistant message is gone, dropping event");
        Applied::Ignored
    }
}
