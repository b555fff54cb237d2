//! Prompt formatting
//!
//! Turns a system instruction and a user message into a single prompt string
//! in the chat markup dialect the loaded model was trained on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role-boundary markers that user or system text must never carry.
pub const FORBIDDEN_MARKERS: [&str; 6] = [
    "<|begin_of_text|>",
    "<|start_header_id|>",
    "<|end_header_id|>",
    "<|eot_id|>",
    "<|im_start|>",
    "<|im_end|>",
];

/// Chat markup dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptFormat {
    /// `<|im_start|>` / `<|im_end|>` turns (Qwen, Mistral, ...)
    ChatMl,
    /// Header-delimited turns (Llama 3.x)
    #[default]
    Llama3,
}

impl fmt::Display for PromptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptFormat::ChatMl => write!(f, "chatml"),
            PromptFormat::Llama3 => write!(f, "llama3"),
        }
    }
}

impl FromStr for PromptFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chatml" => Ok(PromptFormat::ChatMl),
            "llama3" | "llama-3" => Ok(PromptFormat::Llama3),
            other => Err(format!("Unknown prompt format: {}", other)),
        }
    }
}

/// Strips role-boundary markers and surrounding whitespace from `text`.
///
/// Deletion is repeated until a full pass over every marker removes nothing,
/// so markers spliced together by an earlier deletion are removed as well.
pub fn sanitize(text: &str) -> String {
    let mut out = text.to_string();

    loop {
        let mut changed = false;

        for marker in FORBIDDEN_MARKERS {
            if marker.is_empty() {
                continue;
            }

            let mut pos = 0;
            while let Some(found) = out[pos..].find(marker) {
                let start = pos + found;
                out.replace_range(start..start + marker.len(), "");
                pos = start;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    out.trim().to_string()
}

/// Builds prompts for one conversation.
///
/// The system instruction is set once and embedded in every built prompt;
/// only the user message changes between turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptFormatter {
    system: String,
    user: String,
    format: PromptFormat,
}

impl PromptFormatter {
    /// Create a formatter seeded with a system instruction
    pub fn new(system: impl AsRef<str>, format: PromptFormat) -> Self {
        Self {
            system: sanitize(system.as_ref()),
            user: String::new(),
            format,
        }
    }

    /// Replace the system instruction
    pub fn set_system(&mut self, system: impl AsRef<str>) -> &mut Self {
        self.system = sanitize(system.as_ref());
        self
    }

    /// Replace the user message
    pub fn set_user(&mut self, user: impl AsRef<str>) -> &mut Self {
        self.user = sanitize(user.as_ref());
        self
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn format(&self) -> PromptFormat {
        self.format
    }

    /// Render the prompt, leaving the assistant turn open.
    ///
    /// No document-start marker is emitted: the tokenizer adds it.
    pub fn build(&self) -> String {
        match self.format {
            PromptFormat::ChatMl => self.build_chatml(),
            PromptFormat::Llama3 => self.build_llama3(),
        }
    }

    fn build_chatml(&self) -> String {
        let mut out = String::new();

        if !self.system.is_empty() {
            out.push_str("<|im_start|>system\n");
            out.push_str(&self.system);
            out.push_str("<|im_end|>\n");
        }

        out.push_str("<|im_start|>user\n");
        out.push_str(&self.user);
        out.push_str("<|im_end|>\n");
        out.push_str("<|im_start|>assistant\n");
        out
    }

    fn build_llama3(&self) -> String {
        let mut out = String::new();

        if !self.system.is_empty() {
            out.push_str("<|start_header_id|>system<|end_header_id|>\n\n");
            out.push_str(&self.system);
            out.push_str("<|eot_id|>");
        }

        out.push_str("<|start_header_id|>user<|end_header_id|>\n\n");
        out.push_str(&self.user);
        out.push_str("<|eot_id|>");
        out.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
        out
    }
}
