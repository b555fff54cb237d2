//! Conversation session
//!
//! Runs the turn protocol over an [`InferenceContext`]: format the user
//! message, inject it at the write cursor, then generate token by token.
//! The context has a fixed number of positions and nothing in the engine
//! frees them, so the session evicts the oldest half of the conversation
//! whenever the window would overflow.
//!
//! `cursor` must stay in lockstep with the engine's live positions: after
//! every completed turn the engine holds exactly the positions
//! `0..cursor`.

use llama_cpp_2::model::LlamaModel;
use thiserror::Error;
use uuid::Uuid;

use crate::inference::{
    BatchToken, EngineError, EngineRuntime, InferenceContext, LlamaEngine, Token, Utf8Stream,
};
use crate::prompt::PromptFormatter;
use crate::types::config::SessionConfig;

/// Interval, in generated tokens, between progress log lines
const PROGRESS_INTERVAL: u32 = 20;

/// Errors surfaced by a session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Model, context or sampler could not be created. No session exists.
    #[error("Session initialization failed: {0}")]
    Initialization(String),

    /// The prompt could not be tokenized or does not fit the context.
    /// Nothing was written to the engine; the session is still usable.
    #[error("Invalid prompt: {0}")]
    Prompt(String),

    /// A decode or memory operation failed mid-turn. The engine memory may
    /// no longer match the cursor; start a new session.
    #[error("Decode failed: {0}")]
    Decode(#[from] EngineError),
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model produced an end-of-generation token
    EndOfGeneration,
    /// The per-turn token budget ran out
    TokenLimit,
}

/// Bookkeeping for one completed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnStats {
    pub prompt_tokens: u32,
    pub generated_tokens: u32,
    pub evictions: u32,
    pub stop: StopReason,
}

/// One conversation over an exclusively owned inference context
pub struct ConversationSession<E: InferenceContext> {
    id: Uuid,
    capacity: u32,
    cursor: u32,
    formatter: PromptFormatter,
    engine: E,
}

impl<'m> ConversationSession<LlamaEngine<'m>> {
    /// Create a llama.cpp context and sampler over `model` and wrap them in a
    /// session configured by `config`.
    pub fn open(
        runtime: &EngineRuntime,
        model: &'m LlamaModel,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        let engine = LlamaEngine::new(
            runtime,
            model,
            config.context_size,
            config.batch_size,
            &config.sampling,
        )
        .map_err(|e| SessionError::Initialization(e.to_string()))?;

        let formatter = PromptFormatter::new(&config.system_prompt, config.prompt_format);
        Self::new(engine, config.context_size, formatter)
    }
}

impl<E: InferenceContext> ConversationSession<E> {
    pub fn new(
        engine: E,
        capacity: u32,
        formatter: PromptFormatter,
    ) -> Result<Self, SessionError> {
        if capacity == 0 {
            return Err(SessionError::Initialization(
                "context capacity must be positive".into(),
            ));
        }
        if engine.batch_size() == 0 {
            return Err(SessionError::Initialization(
                "batch size must be positive".into(),
            ));
        }

        let id = Uuid::new_v4();
        tracing::info!(
            session = %id,
            "Session created (capacity={}, format={})",
            capacity,
            formatter.format()
        );

        Ok(Self {
            id,
            capacity,
            cursor: 0,
            formatter,
            engine,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Next free position in the context
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn formatter(&self) -> &PromptFormatter {
        &self.formatter
    }

    /// Used to change the system instruction mid-conversation
    pub fn formatter_mut(&mut self) -> &mut PromptFormatter {
        &mut self.formatter
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Forget the whole conversation.
    pub fn reset(&mut self) {
        self.engine.clear();
        self.cursor = 0;
        tracing::info!(session = %self.id, "Conversation memory cleared");
    }

    /// Run one turn and return the generated text.
    pub fn ask(&mut self, user_message: &str, max_new_tokens: u32) -> Result<String, SessionError> {
        self.ask_with_stats(user_message, max_new_tokens)
            .map(|(text, _)| text)
    }

    /// Run one turn and return the generated text with its bookkeeping.
    pub fn ask_with_stats(
        &mut self,
        user_message: &str,
        max_new_tokens: u32,
    ) -> Result<(String, TurnStats), SessionError> {
        let mut out = String::new();
        let stats = self.ask_streaming(user_message, max_new_tokens, |piece| out.push_str(piece))?;
        Ok((out, stats))
    }

    /// Run one turn, handing each complete UTF-8 fragment to `on_piece` as
    /// soon as it is generated.
    ///
    /// On a decode failure the fragments already delivered stay delivered,
    /// but the turn reports an error and no text is returned.
    pub fn ask_streaming<F>(
        &mut self,
        user_message: &str,
        max_new_tokens: u32,
        mut on_piece: F,
    ) -> Result<TurnStats, SessionError>
    where
        F: FnMut(&str),
    {
        let span = tracing::debug_span!("turn", session = %self.id);
        let _guard = span.enter();

        self.formatter.set_user(user_message);
        let prompt = self.formatter.build();
        tracing::debug!("Prompt length: {} chars", prompt.len());

        let tokens = self.tokenize_prompt(&prompt)?;
        let prompt_tokens = tokens.len() as u32;
        tracing::debug!("Prompt tokens: {}", prompt_tokens);

        let mut evictions = 0;

        // Worst case: the whole generation budget gets used
        if u64::from(self.cursor) + u64::from(prompt_tokens) + u64::from(max_new_tokens)
            >= u64::from(self.capacity)
        {
            evictions += self.evict_to(self.capacity / 2)?;

            if self.cursor + prompt_tokens > self.capacity {
                evictions += self.evict_to(self.capacity - prompt_tokens)?;
            }
        }

        self.inject(&tokens)?;

        let mut stream = Utf8Stream::new();
        let mut generated = 0;
        let mut stop = StopReason::TokenLimit;

        while generated < max_new_tokens {
            if generated > 0 && generated % PROGRESS_INTERVAL == 0 {
                tracing::debug!("Generated {} tokens...", generated);
            }

            if self.cursor >= self.capacity {
                evictions += self.evict_to(self.capacity / 2)?;
            }

            let token = self.engine.sample();
            if self.engine.is_end_of_generation(token) {
                stop = StopReason::EndOfGeneration;
                break;
            }

            let bytes = self.engine.token_to_bytes(token)?;
            if let Some(piece) = stream.push(&bytes) {
                on_piece(&piece);
            }

            self.engine.decode(&[BatchToken {
                token,
                pos: self.cursor,
                logits: true,
            }])?;
            self.cursor += 1;
            generated += 1;
        }

        if let Some(rest) = stream.finish() {
            on_piece(&rest);
        }

        let stats = TurnStats {
            prompt_tokens,
            generated_tokens: generated,
            evictions,
            stop,
        };
        tracing::debug!(
            "Turn complete: {} generated, {} evictions, cursor {}/{}",
            generated,
            evictions,
            self.cursor,
            self.capacity
        );

        Ok(stats)
    }

    /// Tokenize with special-token parsing, falling back to plain parsing once.
    fn tokenize_prompt(&self, prompt: &str) -> Result<Vec<Token>, SessionError> {
        // The document-start token only belongs at the very start of the context
        let add_special = self.cursor == 0;

        let tokens = match self.engine.tokenize(prompt, add_special, true) {
            Ok(tokens) => tokens,
            Err(first) => {
                tracing::warn!("Tokenization failed ({}), retrying without special parsing", first);
                self.engine
                    .tokenize(prompt, add_special, false)
                    .map_err(|e| SessionError::Prompt(e.to_string()))?
            }
        };

        if tokens.is_empty() {
            return Err(SessionError::Prompt("prompt produced no tokens".into()));
        }
        if tokens.len() > self.capacity as usize {
            return Err(SessionError::Prompt(format!(
                "prompt has {} tokens, context holds {}",
                tokens.len(),
                self.capacity
            )));
        }

        Ok(tokens)
    }

    /// Write the prompt at the cursor, in chunks of at most one batch.
    /// Only the final token requests logits.
    fn inject(&mut self, tokens: &[Token]) -> Result<(), SessionError> {
        let last = tokens.len() - 1;
        let chunk_size = self.engine.batch_size();

        for (chunk_index, chunk) in tokens.chunks(chunk_size).enumerate() {
            let offset = chunk_index * chunk_size;
            let batch: Vec<BatchToken> = chunk
                .iter()
                .enumerate()
                .map(|(i, &token)| BatchToken {
                    token,
                    pos: self.cursor + i as u32,
                    logits: offset + i == last,
                })
                .collect();

            self.engine.decode(&batch)?;
            self.cursor += chunk.len() as u32;
        }

        Ok(())
    }

    /// Drop the oldest positions so that at most `keep` remain, renumbering
    /// the survivors from zero. Returns 1 if anything was evicted.
    fn evict_to(&mut self, keep: u32) -> Result<u32, SessionError> {
        let discard = self.cursor.saturating_sub(keep);
        if discard == 0 {
            return Ok(0);
        }

        let delta = i32::try_from(discard)
            .map_err(|_| EngineError::Memory(format!("eviction of {} positions out of range", discard)))?;

        self.engine.evict_range(0, discard)?;
        self.engine.shift_positions(discard, -delta)?;
        self.cursor -= discard;

        tracing::warn!(
            "Context window full, evicted {} oldest tokens (cursor now {})",
            discard,
            self.cursor
        );
        Ok(1)
    }
}

impl<E: InferenceContext> Drop for ConversationSession<E> {
    fn drop(&mut self) {
        tracing::info!(session = %self.id, "Session closed");
    }
}
