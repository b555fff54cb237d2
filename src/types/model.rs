//! Model types
//!
//! Defines model metadata structures.

use serde::{Deserialize, Serialize};

/// Information about a loaded model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Display name of the model
    pub name: String,
    /// Path to the GGUF file
    pub path: String,
    /// Model size in bytes
    pub size_bytes: u64,
    /// Number of parameters
    pub parameters: u64,
    /// Vocabulary size
    pub vocab_size: i32,
    /// Context length the model was trained with
    pub context_length: u32,
}
