//! Inference context contract
//!
//! The session drives the engine only through [`InferenceContext`], which keeps
//! position bookkeeping testable without a model on disk.

use crate::inference::engine::EngineError;

/// Vocabulary id of a single token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub i32);

/// One entry of a decode batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchToken {
    pub token: Token,
    /// Position in the context's position space
    pub pos: u32,
    /// Whether the engine must produce output logits for this entry
    pub logits: bool,
}

/// Per-conversation view of an inference engine.
///
/// All operations act on sequence 0; a conversation never uses more than one.
pub trait InferenceContext {
    /// Maximum number of tokens a single `decode` call accepts
    fn batch_size(&self) -> usize;

    /// Tokenize `text`. `add_special` prepends the document-start token,
    /// `parse_special` lets control-token text map to control tokens.
    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>, EngineError>;

    /// Write a batch into the context memory and evaluate it.
    fn decode(&mut self, batch: &[BatchToken]) -> Result<(), EngineError>;

    /// Pick the next token from the logits of the last decoded entry that
    /// requested them.
    fn sample(&mut self) -> Token;

    /// Raw bytes of a token's text; may be a partial UTF-8 sequence.
    fn token_to_bytes(&self, token: Token) -> Result<Vec<u8>, EngineError>;

    /// Whether `token` ends the assistant's turn
    fn is_end_of_generation(&self, token: Token) -> bool;

    /// Drop positions in `[from, to)` from the context memory.
    fn evict_range(&mut self, from: u32, to: u32) -> Result<(), EngineError>;

    /// Add `delta` to every position at or after `from`.
    fn shift_positions(&mut self, from: u32, delta: i32) -> Result<(), EngineError>;

    /// Drop every position.
    fn clear(&mut self);
}
