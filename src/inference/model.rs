//! Model files
//!
//! GGUF header validation and model loading.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::LlamaModel;
use thiserror::Error;

use crate::inference::engine::EngineError;
use crate::inference::runtime::EngineRuntime;
use crate::types::model::ModelInfo;

/// Magic bytes at the start of every GGUF file
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";

/// Errors raised while checking a model file
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model file not found: {0}")]
    NotFound(String),

    #[error("Failed to read model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a GGUF file (magic {0:?})")]
    InvalidMagic([u8; 4]),

    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),
}

/// Fixed-size GGUF header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgufMetadata {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

/// Check that `path` is a readable GGUF file and return its header.
pub fn validate_gguf(path: &Path) -> Result<GgufMetadata, ModelError> {
    if !path.is_file() {
        return Err(ModelError::NotFound(path.display().to_string()));
    }

    let mut header = [0u8; 24];
    File::open(path)?.read_exact(&mut header)?;

    let mut magic = [0u8; 4];
    magic.copy_from_slice(&header[0..4]);
    if magic != GGUF_MAGIC {
        return Err(ModelError::InvalidMagic(magic));
    }

    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if !(2..=3).contains(&version) {
        return Err(ModelError::UnsupportedVersion(version));
    }

    let mut count = [0u8; 8];
    count.copy_from_slice(&header[8..16]);
    let tensor_count = u64::from_le_bytes(count);
    count.copy_from_slice(&header[16..24]);
    let metadata_kv_count = u64::from_le_bytes(count);

    Ok(GgufMetadata {
        version,
        tensor_count,
        metadata_kv_count,
    })
}

/// Load a GGUF model, offloading `gpu_layers` layers (0 = CPU only).
pub fn load_model(
    runtime: &EngineRuntime,
    path: &Path,
    gpu_layers: u32,
) -> Result<LlamaModel, EngineError> {
    let metadata = validate_gguf(path)?;
    tracing::debug!(
        "GGUF v{} with {} tensors at {:?}",
        metadata.version,
        metadata.tensor_count,
        path
    );

    tracing::info!("Loading model from {:?} ({} GPU layers)", path, gpu_layers);
    let params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
    let model = LlamaModel::load_from_file(runtime.backend(), path, &params)
        .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

    let info = model_info(&model, path);
    tracing::info!(
        "Model loaded: {} ({} params, {} vocab, {} ctx)",
        info.name,
        info.parameters,
        info.vocab_size,
        info.context_length
    );

    Ok(model)
}

/// Describe a loaded model
pub fn model_info(model: &LlamaModel, path: &Path) -> ModelInfo {
    ModelInfo {
        name: path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string()),
        path: path.display().to_string(),
        size_bytes: model.size() as u64,
        parameters: model.n_params() as u64,
        vocab_size: model.n_vocab(),
        context_length: model.n_ctx_train(),
    }
}
