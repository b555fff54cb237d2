//! Configuration types
//!
//! Parameters needed to open one conversation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::inference::SamplingParams;
use crate::prompt::PromptFormat;

/// Everything needed to open a conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Path to the GGUF file
    pub model_path: PathBuf,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// Context window in tokens
    pub context_size: u32,
    /// Maximum tokens per decode call
    pub batch_size: u32,
    /// Generation budget per turn
    pub max_new_tokens: u32,
    /// System instruction embedded in every prompt
    pub system_prompt: String,
    /// Chat markup dialect
    pub prompt_format: PromptFormat,
    /// Sampler settings
    pub sampling: SamplingParams,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            gpu_layers: 35,
            context_size: 4096,
            batch_size: 2048,
            max_new_tokens: 512,
            system_prompt: "You are a helpful and knowledgeable AI assistant.".to_string(),
            prompt_format: PromptFormat::Llama3,
            sampling: SamplingParams::default(),
        }
    }
}
