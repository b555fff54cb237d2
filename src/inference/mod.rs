//! LLM inference engine
//!
//! This module handles all interaction with llama-cpp for model loading and inference.

pub mod context;
pub mod engine;
pub mod model;
pub mod runtime;
#[cfg(test)]
pub(crate) mod scripted;
pub mod streaming;

// Re-export main types for convenience
pub use context::{BatchToken, InferenceContext, Token};
pub use engine::{EngineError, LlamaEngine, SamplingParams};
pub use model::{load_model, model_info, validate_gguf, GgufMetadata, ModelError, GGUF_MAGIC};
pub use runtime::EngineRuntime;
pub use streaming::Utf8Stream;
