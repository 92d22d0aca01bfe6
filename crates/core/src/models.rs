//! # Models
//!
//! LLM provider selection for the generation adapter. Every structured task
//! (kickoff, evaluate, query planning, reflection, summaries, synthesis) can
//! run on its own provider/model pair; see [`crate::config::ResearchConfig`].

use radkit::models::providers::{
    AnthropicLlm, DeepSeekLlm, GeminiLlm, GrokLlm, OpenAILlm, OpenRouterLlm,
};
use radkit::models::BaseLlm;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported LLM providers. API keys come from the provider's usual
/// environment variable (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, ...).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    Gemini,
    OpenRouter,
    Grok,
    DeepSeek,
}

impl LlmProvider {
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Gemini => "Gemini",
            LlmProvider::OpenRouter => "OpenRouter",
            LlmProvider::Grok => "Grok",
            LlmProvider::DeepSeek => "DeepSeek",
        }
    }

    /// Whether this provider supports custom base URL
    pub fn supports_base_url(&self) -> bool {
        matches!(self, LlmProvider::OpenAI)
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAI),
            "gemini" | "google" => Ok(Self::Gemini),
            "openrouter" => Ok(Self::OpenRouter),
            "grok" | "xai" => Ok(Self::Grok),
            "deepseek" => Ok(Self::DeepSeek),
            other => Err(format!("unknown LLM provider `{}`", other)),
        }
    }
}

/// Which provider and model a generation task runs on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "claude-sonnet-4-20250514", "gpt-4o")
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: None,
        }
    }
}

impl ModelConfig {
    /// Build a client for the configured provider, loading its API key from
    /// the environment. Used to fail fast before a run starts.
    pub fn create_llm(&self) -> anyhow::Result<Box<dyn BaseLlm + Send + Sync>> {
        match self.provider {
            LlmProvider::Anthropic => Ok(Box::new(AnthropicLlm::from_env(&self.model)?)),
            LlmProvider::OpenAI => {
                let llm = if let Some(base_url) = &self.base_url {
                    OpenAILlm::from_env(&self.model)?.with_base_url(base_url)
                } else {
                    OpenAILlm::from_env(&self.model)?
                };
                Ok(Box::new(llm))
            }
            LlmProvider::Gemini => Ok(Box::new(GeminiLlm::from_env(&self.model)?)),
            LlmProvider::OpenRouter => Ok(Box::new(OpenRouterLlm::from_env(&self.model)?)),
            LlmProvider::Grok => Ok(Box::new(GrokLlm::from_env(&self.model)?)),
            LlmProvider::DeepSeek => Ok(Box::new(DeepSeekLlm::from_env(&self.model)?)),
        }
    }
}
