//! localchat library
//!
//! Session-level context management for interactive chat over a local
//! llama.cpp model.

pub mod inference;
pub mod prompt;
pub mod session;
pub mod storage;
pub mod types;

pub use prompt::{sanitize, PromptFormat, PromptFormatter};
pub use session::{ConversationSession, SessionError, StopReason, TurnStats};
