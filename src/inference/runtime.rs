//! Process-wide llama.cpp runtime

use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::{send_logs_to_tracing, LogOptions};

use crate::inference::engine::EngineError;

/// Owns the llama.cpp backend for the whole process.
///
/// Acquire it once at startup and keep it alive until every model and
/// session built from it is dropped; the borrow checker enforces the order.
pub struct EngineRuntime {
    backend: LlamaBackend,
}

impl EngineRuntime {
    /// Initialize the backend. Fails if it was already initialized.
    pub fn acquire() -> Result<Self, EngineError> {
        send_logs_to_tracing(LogOptions::default());

        let backend =
            LlamaBackend::init().map_err(|e| EngineError::BackendInit(e.to_string()))?;
        tracing::info!("LlamaBackend initialized");

        Ok(Self { backend })
    }

    /// Free the backend. Equivalent to dropping the runtime.
    pub fn release(self) {
        drop(self);
    }

    pub(crate) fn backend(&self) -> &LlamaBackend {
        &self.backend
    }
}

impl Drop for EngineRuntime {
    fn drop(&mut self) {
        tracing::info!("LlamaBackend released");
    }
}
