//! # Research Configuration
//!
//! Budgets, retry policy and model selection for a research run. Loaded from
//! an optional JSON file, then overlaid with `INQUEST_*` environment variables.

use crate::models::{LlmProvider, ModelConfig};
use crate::tools::retry::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Generation roles that can be given their own model
pub mod roles {
    pub const PLANNER: &str = "planner";
    pub const RESEARCHER: &str = "researcher";
    pub const SUMMARIZER: &str = "summarizer";
    pub const SYNTHESIZER: &str = "synthesizer";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResearchConfig {
    /// Cycle budget given to every new question
    pub max_cycles_per_question: u32,
    /// Planner calls plus executor launches before synthesis is forced
    pub max_steps: u32,
    /// Upper bound on questions a single planner call may add
    pub max_questions_per_round: usize,
    /// Executors allowed to run at once
    pub max_concurrent_questions: usize,
    pub queries_per_cycle: usize,
    /// Consecutive dead-end reflections that end a question
    pub dead_end_streak: u32,
    /// Generations the planner may request before falling back
    pub planner_attempts: u32,
    /// Memory length at which an executor compacts its question
    pub compaction_threshold: usize,
    pub compaction_keep_recent: usize,
    pub retry: RetryPolicy,
    /// Global LLM provider (default: Anthropic)
    pub global_provider: LlmProvider,
    /// Global model to use for all roles
    pub global_model: Option<String>,
    /// Base URL override for OpenAI-compatible endpoints
    pub base_url: Option<String>,
    /// Per-role model overrides (role -> model name)
    pub per_agent_models: HashMap<String, String>,
    /// Per-role provider overrides (role -> provider)
    pub per_agent_providers: HashMap<String, LlmProvider>,
    /// Custom SearXNG instance URL (overrides auto-discovery)
    pub searxng_url: Option<String>,
    pub database_path: String,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_cycles_per_question: 4,
            max_steps: 30,
            max_questions_per_round: 5,
            max_concurrent_questions: 3,
            queries_per_cycle: 3,
            dead_end_streak: 2,
            planner_attempts: 3,
            compaction_threshold: 40,
            compaction_keep_recent: 20,
            retry: RetryPolicy::default(),
            global_provider: LlmProvider::Anthropic,
            global_model: None,
            base_url: None,
            per_agent_models: HashMap::new(),
            per_agent_providers: HashMap::new(),
            searxng_url: None,
            database_path: ".inquest/inquest.db".to_string(),
        }
    }
}

impl ResearchConfig {
    /// Load from an optional JSON file and apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `INQUEST_*` variables read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("{}: {}", key, e))
        }

        if let Some(v) = lookup("INQUEST_MAX_CYCLES") {
            self.max_cycles_per_question = parse("INQUEST_MAX_CYCLES", v)?;
        }
        if let Some(v) = lookup("INQUEST_MAX_STEPS") {
            self.max_steps = parse("INQUEST_MAX_STEPS", v)?;
        }
        if let Some(v) = lookup("INQUEST_MAX_CONCURRENT") {
            self.max_concurrent_questions = parse("INQUEST_MAX_CONCURRENT", v)?;
        }
        if let Some(v) = lookup("INQUEST_CALL_TIMEOUT_SECS") {
            self.retry.call_timeout_secs = parse("INQUEST_CALL_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("INQUEST_PROVIDER") {
            self.global_provider = parse("INQUEST_PROVIDER", v)?;
        }
        if let Some(v) = lookup("INQUEST_MODEL") {
            self.global_model = Some(v);
        }
        if let Some(v) = lookup("INQUEST_BASE_URL") {
            self.base_url = Some(v);
        }
        if let Some(v) = lookup("INQUEST_DB") {
            self.database_path = v;
        }
        if let Some(v) = lookup("SEARXNG_URL").or_else(|| lookup("INQUEST_SEARXNG_URL")) {
            self.searxng_url = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.max_cycles_per_question > 0,
            "max_cycles_per_question must be at least 1"
        );
        anyhow::ensure!(self.max_steps > 0, "max_steps must be at least 1");
        anyhow::ensure!(
            (1..=5).contains(&self.max_questions_per_round),
            "max_questions_per_round must be between 1 and 5"
        );
        anyhow::ensure!(
            self.max_concurrent_questions > 0,
            "max_concurrent_questions must be at least 1"
        );
        anyhow::ensure!(self.queries_per_cycle > 0, "queries_per_cycle must be at least 1");
        anyhow::ensure!(self.planner_attempts > 0, "planner_attempts must be at least 1");
        anyhow::ensure!(
            self.compaction_keep_recent < self.compaction_threshold,
            "compaction_keep_recent must be below compaction_threshold"
        );
        anyhow::ensure!(self.retry.max_attempts > 0, "retry.max_attempts must be at least 1");
        Ok(())
    }

    /// Model for a generation role: per-role override, then global, then the
    /// provider's default model
    pub fn model_config(&self, role: &str) -> ModelConfig {
        let provider = self
            .per_agent_providers
            .get(role)
            .copied()
            .unwrap_or(self.global_provider);

        let model = self
            .per_agent_models
            .get(role)
            .or(self.global_model.as_ref())
            .cloned()
            .unwrap_or_else(|| match provider {
                LlmProvider::Anthropic => "claude-sonnet-4-20250514".to_string(),
                LlmProvider::OpenAI => "gpt-4o".to_string(),
                LlmProvider::Gemini => "gemini-2.0-flash-exp".to_string(),
                LlmProvider::OpenRouter => "anthropic/claude-3.5-sonnet".to_string(),
                LlmProvider::Grok => "grok-2".to_string(),
                LlmProvider::DeepSeek => "deepseek-chat".to_string(),
            });

        let base_url = if provider.supports_base_url() {
            self.base_url.clone()
        } else {
            None
        };

        ModelConfig {
            provider,
            model,
            base_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ResearchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent_questions, 3);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ResearchConfig =
            serde_json::from_str(r#"{"max_steps": 12, "global_provider": "openai"}"#).unwrap();
        assert_eq!(config.max_steps, 12);
        assert_eq!(config.global_provider, LlmProvider::OpenAI);
        assert_eq!(config.max_cycles_per_question, 4);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ResearchConfig::default();
        let env: HashMap<&str, &str> = [
            ("INQUEST_MAX_STEPS", "7"),
            ("INQUEST_PROVIDER", "gemini"),
            ("SEARXNG_URL", "http://search.local"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.max_steps, 7);
        assert_eq!(config.global_provider, LlmProvider::Gemini);
        assert_eq!(config.searxng_url.as_deref(), Some("http://search.local"));
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut config = ResearchConfig::default();
        let err = config
            .apply_env(|key| (key == "INQUEST_MAX_STEPS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("INQUEST_MAX_STEPS"));
    }

    #[test]
    fn test_model_config_overrides() {
        let mut config = ResearchConfig {
            global_model: Some("global-model".to_string()),
            ..Default::default()
        };
        config
            .per_agent_models
            .insert(roles::SYNTHESIZER.to_string(), "big-model".to_string());
        config
            .per_agent_providers
            .insert(roles::SYNTHESIZER.to_string(), LlmProvider::OpenAI);
        config.base_url = Some("http://localhost:8080/v1".to_string());

        let synth = config.model_config(roles::SYNTHESIZER);
        assert_eq!(synth.provider, LlmProvider::OpenAI);
        assert_eq!(synth.model, "big-model");
        assert_eq!(synth.base_url.as_deref(), Some("http://localhost:8080/v1"));

        let planner = config.model_config(roles::PLANNER);
        assert_eq!(planner.provider, LlmProvider::Anthropic);
        assert_eq!(planner.model, "global-model");
        assert!(planner.base_url.is_none());
    }

    #[test]
    fn test_rejects_oversized_rounds() {
        let config = ResearchConfig {
            max_questions_per_round: 9,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
