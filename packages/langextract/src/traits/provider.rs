//! Language model boundary.
//!
//! The pipeline needs exactly one capability from a model backend: send a
//! prompt, get text and a token count back, or fail with a typed error.
//! Vendor clients live outside this crate and implement [`LanguageModel`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProviderError;

/// Known provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    OpenAi,
    Anthropic,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Gemini,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    /// Model used when a target doesn't name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.5-flash",
            Self::OpenAi => "gpt-4o",
            Self::Anthropic => "claude-3-5-sonnet-latest",
            Self::Ollama => "llama3",
        }
    }

    /// Parse a provider name, falling back to the default provider.
    pub fn from_name_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            tracing::warn!(provider = %name, "Unknown provider, using default");
            Self::default()
        })
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" | "open_ai" | "gpt" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "ollama" | "local" => Ok(Self::Ollama),
            other => Err(ProviderError::NotRegistered(other.to_string())),
        }
    }
}

/// Per-call model settings handed to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            temperature: None,
            max_output_tokens: None,
        }
    }

    /// Set sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Cap the response length.
    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }
}

/// Text and usage returned by one model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub text: String,
    pub tokens_used: u64,
}

impl ModelOutput {
    pub fn new(text: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            text: text.into(),
            tokens_used,
        }
    }
}

/// A language model backend.
///
/// Implementations wrap specific providers and map their failures onto
/// [`ProviderError`] so the gateway can tell retryable errors apart.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send a prompt and return the model's text.
    async fn call(&self, prompt: &str, config: &ModelConfig) -> Result<ModelOutput, ProviderError>;
}
