//! Settings storage
//!
//! Manages persistence of the chat settings file.

use crate::inference::SamplingParams;
use crate::prompt::PromptFormat;
use crate::storage::{get_data_dir, StorageError};
use crate::types::config::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Context sizes offered to the user
const VALID_CONTEXT_SIZES: [u32; 9] = [512, 1024, 2048, 4096, 8192, 16384, 32768, 65536, 131072];

/// Chat settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    /// GGUF model to load on startup
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    /// Context window size
    pub context_size: u32,
    /// Maximum tokens per decode call
    pub batch_size: u32,
    /// Maximum number of tokens to generate per turn
    pub max_new_tokens: u32,
    /// System prompt embedded in every turn
    pub system_prompt: String,
    /// Chat markup dialect of the model
    #[serde(default)]
    pub prompt_format: PromptFormat,
    /// Temperature parameter for text generation (0.0 - 2.0, 0 = greedy)
    #[serde(default)]
    pub temperature: f32,
    /// Top-k sampling parameter
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    /// Top-p (nucleus sampling) parameter (0.0 - 1.0)
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Sampling seed (0 = random)
    #[serde(default)]
    pub seed: u32,
}

fn default_top_k() -> u32 {
    40
}

fn default_top_p() -> f32 {
    0.95
}

/// Default system prompt
pub fn default_system_prompt() -> String {
    "You are a helpful and knowledgeable AI assistant. Be concise.".to_string()
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            gpu_layers: 35,
            context_size: 4096,
            batch_size: 2048,
            max_new_tokens: 512,
            system_prompt: default_system_prompt(),
            prompt_format: PromptFormat::default(),
            temperature: 0.0,
            top_k: default_top_k(),
            top_p: default_top_p(),
            seed: 0,
        }
    }
}

impl ChatSettings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges.
    pub fn validate(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);

        if self.top_k == 0 {
            self.top_k = default_top_k();
        }

        if !VALID_CONTEXT_SIZES.contains(&self.context_size) {
            self.context_size = *VALID_CONTEXT_SIZES
                .iter()
                .min_by_key(|&&size| (size as i64 - self.context_size as i64).abs())
                .unwrap_or(&4096);
        }

        self.batch_size = self.batch_size.clamp(1, self.context_size);

        // Generation budget above the window would evict on every turn
        self.max_new_tokens = self.max_new_tokens.max(1);
        if self.max_new_tokens > self.context_size {
            self.max_new_tokens = self.context_size / 2;
        }
    }

    /// Session parameters for these settings; `None` without a model path.
    pub fn to_session_config(&self) -> Option<SessionConfig> {
        let model_path = self.model_path.clone()?;

        Some(SessionConfig {
            model_path,
            gpu_layers: self.gpu_layers,
            context_size: self.context_size,
            batch_size: self.batch_size,
            max_new_tokens: self.max_new_tokens,
            system_prompt: self.system_prompt.clone(),
            prompt_format: self.prompt_format,
            sampling: SamplingParams {
                temperature: self.temperature,
                top_k: self.top_k,
                top_p: self.top_p,
                seed: self.seed,
            },
        })
    }
}

/// Get the settings file path
pub fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> ChatSettings {
    match get_settings_path() {
        Ok(path) => load_settings_from(&path),
        Err(e) => {
            tracing::warn!("Failed to locate settings, using defaults: {}", e);
            ChatSettings::default()
        }
    }
}

/// Load settings from `path`, falling back to defaults
pub fn load_settings_from(path: &Path) -> ChatSettings {
    match load_settings_internal(path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            ChatSettings::default()
        }
    }
}

/// Internal settings loading with error propagation
fn load_settings_internal(path: &Path) -> Result<ChatSettings, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(ChatSettings::default());
    }

    let json = fs::read_to_string(path)?;
    let mut settings: ChatSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Save settings to disk
pub fn save_settings(settings: &ChatSettings) -> Result<(), StorageError> {
    save_settings_to(settings, &get_settings_path()?)
}

/// Save settings to `path`, creating parent directories
pub fn save_settings_to(settings: &ChatSettings, path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = ChatSettings::default();
        assert_eq!(settings.context_size, 4096);
        assert_eq!(settings.batch_size, 2048);
        assert_eq!(settings.temperature, 0.0);
        assert_eq!(settings.prompt_format, PromptFormat::Llama3);
        assert!(settings.model_path.is_none());
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = ChatSettings::default();

        settings.temperature = 5.0;
        settings.top_p = 2.0;
        settings.top_k = 0;
        settings.validate();
        assert_eq!(settings.temperature, 2.0);
        assert_eq!(settings.top_p, 1.0);
        assert_eq!(settings.top_k, 40);

        // Snaps to the nearest offered size
        settings.context_size = 3000;
        settings.validate();
        assert_eq!(settings.context_size, 2048);

        settings.batch_size = 0;
        settings.validate();
        assert_eq!(settings.batch_size, 1);

        settings.batch_size = 100_000;
        settings.validate();
        assert_eq!(settings.batch_size, 2048);

        settings.max_new_tokens = 10_000;
        settings.validate();
        assert_eq!(settings.max_new_tokens, 1024);
    }

    #[test]
    fn test_session_config_requires_model() {
        let mut settings = ChatSettings::default();
        assert!(settings.to_session_config().is_none());

        settings.model_path = Some(PathBuf::from("/models/llama.gguf"));
        settings.temperature = 0.7;
        let config = settings.to_session_config().expect("Model path was set");
        assert_eq!(config.model_path, PathBuf::from("/models/llama.gguf"));
        assert_eq!(config.context_size, settings.context_size);
        assert!(!config.sampling.is_greedy());
    }

    #[test]
    fn test_settings_persistence() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = ChatSettings::default();
        settings.model_path = Some(PathBuf::from("model.gguf"));
        settings.prompt_format = PromptFormat::ChatMl;
        settings.system_prompt = "Be terse.".to_string();
        save_settings_to(&settings, &path).expect("Failed to save settings");

        let loaded = load_settings_from(&path);
        assert_eq!(loaded.model_path, settings.model_path);
        assert_eq!(loaded.prompt_format, PromptFormat::ChatMl);
        assert_eq!(loaded.system_prompt, "Be terse.");
    }

    #[test]
    fn test_missing_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let loaded = load_settings_from(&dir.path().join("settings.json"));
        assert_eq!(loaded.context_size, ChatSettings::default().context_size);
    }

    #[test]
    fn test_corrupted_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").expect("Failed to write file");

        let loaded = load_settings_from(&path);
        assert_eq!(loaded.batch_size, ChatSettings::default().batch_size);
    }

    #[test]
    fn test_loaded_settings_are_validated() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"gpu_layers":0,"context_size":16,"batch_size":64,"max_new_tokens":8,"system_prompt":""}"#,
        )
        .expect("Failed to write file");

        let loaded = load_settings_from(&path);
        assert_eq!(loaded.context_size, 512);
        assert_eq!(loaded.batch_size, 64);
        assert_eq!(loaded.prompt_format, PromptFormat::Llama3);
        assert_eq!(loaded.top_k, 40);
    }
}
