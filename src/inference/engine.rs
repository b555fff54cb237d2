//! Inference engine implementation
//!
//! [`LlamaEngine`] implements [`InferenceContext`] on top of a llama-cpp
//! context and sampler.
//!
//! # Ownership
//!
//! The engine borrows its model, so the model outlives it. Both are created
//! through an [`EngineRuntime`] that must outlive them. Field order makes the
//! sampler drop before the context.

use std::num::NonZeroU32;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::context::{BatchToken, InferenceContext, Token};
use crate::inference::model::ModelError;
use crate::inference::runtime::EngineRuntime;

/// Errors that can occur during inference operations
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("Failed to initialize backend: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Model validation failed: {0}")]
    ModelValidation(String),

    #[error("Failed to create context: {0}")]
    ContextCreate(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("llama_decode error: {0}")]
    Decode(String),

    #[error("Context memory operation failed: {0}")]
    Memory(String),
}

impl From<ModelError> for EngineError {
    fn from(e: ModelError) -> Self {
        EngineError::ModelValidation(e.to_string())
    }
}

/// Sampling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature (below 0.01 = greedy)
    pub temperature: f32,
    /// Top-k sampling parameter
    pub top_k: u32,
    /// Top-p (nucleus) sampling parameter
    pub top_p: f32,
    /// Random seed for sampling (0 = random)
    pub seed: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_k: 40,
            top_p: 0.95,
            seed: 0,
        }
    }
}

impl SamplingParams {
    pub fn is_greedy(&self) -> bool {
        self.temperature < 0.01
    }

    fn build_sampler(&self) -> LlamaSampler {
        if self.is_greedy() {
            return LlamaSampler::greedy();
        }

        let seed = if self.seed == 0 { rand_seed() } else { self.seed };

        LlamaSampler::chain_simple([
            LlamaSampler::top_k(self.top_k as i32),
            LlamaSampler::top_p(self.top_p, 1),
            LlamaSampler::temp(self.temperature),
            LlamaSampler::dist(seed),
        ])
    }
}

/// llama-cpp backed inference context for one conversation
pub struct LlamaEngine<'m> {
    sampler: LlamaSampler,
    ctx: LlamaContext<'m>,
    model: &'m LlamaModel,
    batch: LlamaBatch,
    batch_size: usize,
    /// Batch index of the last entry that requested logits
    logits_index: i32,
}

impl<'m> LlamaEngine<'m> {
    /// Create a context of `capacity` positions and a sampler over `model`.
    pub fn new(
        runtime: &EngineRuntime,
        model: &'m LlamaModel,
        capacity: u32,
        batch_size: u32,
        sampling: &SamplingParams,
    ) -> Result<Self, EngineError> {
        let n_ctx = NonZeroU32::new(capacity)
            .ok_or_else(|| EngineError::ContextCreate("context size must be positive".into()))?;
        if batch_size == 0 {
            return Err(EngineError::ContextCreate(
                "batch size must be positive".into(),
            ));
        }

        tracing::info!(
            "Creating context (n_ctx={}, n_batch={})",
            capacity,
            batch_size
        );
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_batch(batch_size);
        let ctx = model
            .new_context(runtime.backend(), ctx_params)
            .map_err(|e| EngineError::ContextCreate(e.to_string()))?;

        let sampler = sampling.build_sampler();
        tracing::info!(
            "Sampler created ({})",
            if sampling.is_greedy() { "greedy" } else { "chain" }
        );

        Ok(Self {
            sampler,
            ctx,
            model,
            batch: LlamaBatch::new(batch_size as usize, 1),
            batch_size: batch_size as usize,
            logits_index: -1,
        })
    }
}

impl InferenceContext for LlamaEngine<'_> {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
    ) -> Result<Vec<Token>, EngineError> {
        require_special_parsing(parse_special)?;

        let add_bos = if add_special {
            AddBos::Always
        } else {
            AddBos::Never
        };

        let tokens = self
            .model
            .str_to_token(text, add_bos)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;

        Ok(tokens.into_iter().map(|t| Token(t.0)).collect())
    }

    fn decode(&mut self, batch: &[BatchToken]) -> Result<(), EngineError> {
        if batch.len() > self.batch_size {
            return Err(EngineError::Decode(format!(
                "batch of {} tokens exceeds n_batch {}",
                batch.len(),
                self.batch_size
            )));
        }

        self.batch.clear();
        for entry in batch {
            let pos = i32::try_from(entry.pos)
                .map_err(|_| EngineError::Decode(format!("position {} out of range", entry.pos)))?;
            self.batch
                .add(LlamaToken::new(entry.token.0), pos, &[0], entry.logits)
                .map_err(|e| EngineError::Decode(format!("Failed to add token to batch: {}", e)))?;
        }

        self.ctx
            .decode(&mut self.batch)
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        if let Some(index) = batch.iter().rposition(|entry| entry.logits) {
            self.logits_index = index as i32;
        }

        Ok(())
    }

    fn sample(&mut self) -> Token {
        Token(self.sampler.sample(&self.ctx, self.logits_index).0)
    }

    fn token_to_bytes(&self, token: Token) -> Result<Vec<u8>, EngineError> {
        self.model
            .token_to_bytes(LlamaToken::new(token.0), Special::Plaintext)
            .map_err(|e| EngineError::Decode(format!("Failed to convert token to bytes: {}", e)))
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        self.model.is_eog_token(LlamaToken::new(token.0))
    }

    fn evict_range(&mut self, from: u32, to: u32) -> Result<(), EngineError> {
        let removed = self
            .ctx
            .clear_kv_cache_seq(Some(0), Some(from), Some(to))
            .map_err(|e| EngineError::Memory(e.to_string()))?;
        removal_outcome(removed)
    }

    fn shift_positions(&mut self, from: u32, delta: i32) -> Result<(), EngineError> {
        self.ctx
            .kv_cache_seq_add(0, Some(from), None, delta)
            .map_err(|e| EngineError::Memory(e.to_string()))
    }

    fn clear(&mut self) {
        self.ctx.clear_kv_cache();
        self.logits_index = -1;
    }
}

impl Drop for LlamaEngine<'_> {
    fn drop(&mut self) {
        tracing::debug!("Releasing sampler and context");
    }
}

/// `str_to_token` always maps control-token text to control tokens, so a
/// plain-text tokenization cannot be honored.
fn require_special_parsing(parse_special: bool) -> Result<(), EngineError> {
    if parse_special {
        Ok(())
    } else {
        Err(EngineError::Tokenization("plain parsing unsupported".into()))
    }
}

/// llama.cpp reports `false` when its memory refuses a partial removal;
/// the positions are then still live.
fn removal_outcome(removed: bool) -> Result<(), EngineError> {
    if removed {
        Ok(())
    } else {
        Err(EngineError::Memory("partial sequence removal refused".into()))
    }
}

/// Generates a random seed using system entropy
fn rand_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_params_default_is_greedy() {
        let params = SamplingParams::default();
        assert!(params.is_greedy());
        assert_eq!(params.top_k, 40);
        assert!((params.top_p - 0.95).abs() < 0.001);
    }

    #[test]
    fn test_sampling_params_temperature_threshold() {
        let mut params = SamplingParams::default();
        params.temperature = 0.009;
        assert!(params.is_greedy());
        params.temperature = 0.7;
        assert!(!params.is_greedy());
    }

    #[test]
    fn test_plain_tokenization_reported_unsupported() {
        assert!(require_special_parsing(true).is_ok());
        assert!(matches!(
            require_special_parsing(false),
            Err(EngineError::Tokenization(msg)) if msg == "plain parsing unsupported"
        ));
    }

    #[test]
    fn test_refused_removal_is_memory_error() {
        assert!(removal_outcome(true).is_ok());
        assert!(matches!(
            removal_outcome(false),
            Err(EngineError::Memory(msg)) if msg.contains("refused")
        ));
    }

    #[test]
    fn test_engine_error_from_model_error() {
        let err: EngineError = ModelError::UnsupportedVersion(1).into();
        assert!(matches!(err, EngineError::ModelValidation(_)));
        assert!(err.to_string().contains("Unsupported GGUF version"));
    }
}
