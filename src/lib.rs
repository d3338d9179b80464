//! readmatrix-chat - conversational session core for the readmatrix notes assistant
//!
//! Streams cited answers from the answer service into an observable chat
//! session: conversation identity, incremental SSE decoding, message
//! assembly with citation suppression, and citation selection.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate, clippy::module_name_repetitions)]

pub mod assembler;
pub mod citation;
pub mod config;
pub mod conversation;
pub mod error;
pub mod lifecycle;
pub mod remote;
pub mod selection;
pub mod session;
pub mod sse;
pub mod store;

#[cfg(test)]
mod testing;

pub use citation::{citation_markers, Citation};
pub use config::{ClientConfig, MalformedEventPolicy};
pub use conversation::{ConversationId, Message, Role, Timeline};
pub use error::{RemoteError, RemoteErrorKind, SessionError};
pub use remote::{AnswerService, AskFilters, HttpAnswerService, LoggingAnswerService};
pub use session::{ChatSession, SessionOptions, SessionSnapshot};
pub use store::{FileIdentityStore, IdentityStore, MemoryIdentityStore};
