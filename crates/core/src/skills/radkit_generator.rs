//! # Radkit Generator
//!
//! [`StructuredGenerator`] backed by radkit `LlmFunction`s. Each task runs on
//! the model configured for its role and is constrained to the output's JSON
//! schema. Retries and timeouts are applied by the callers, so each method
//! makes exactly one provider call.

use super::generation::{
    EvaluateContext, EvaluateOutput, KickoffContext, KickoffOutput, QueryBatch, QuestionContext,
    ReflectContext, ReflectOutput, StructuredGenerator, SummaryOutput, SynthesisContext,
    SynthesisOutput,
};
use super::prompts;
use crate::config::{roles, ResearchConfig};
use crate::error::GenerationError;
use crate::models::ModelConfig;
use crate::run_llm_function;
use async_trait::async_trait;
use serde::Serialize;

pub struct RadkitGenerator {
    planner: ModelConfig,
    researcher: ModelConfig,
    summarizer: ModelConfig,
    synthesizer: ModelConfig,
}

impl RadkitGenerator {
    pub fn new(config: &ResearchConfig) -> Self {
        Self {
            planner: config.model_config(roles::PLANNER),
            researcher: config.model_config(roles::RESEARCHER),
            summarizer: config.model_config(roles::SUMMARIZER),
            synthesizer: config.model_config(roles::SYNTHESIZER),
        }
    }

    /// Build a client for every role so missing API keys fail before a run
    pub fn check(&self) -> anyhow::Result<()> {
        for config in [
            &self.planner,
            &self.researcher,
            &self.summarizer,
            &self.synthesizer,
        ] {
            config.create_llm().map_err(|e| {
                anyhow::anyhow!(
                    "{} model `{}` unavailable: {}",
                    config.provider.display_name(),
                    config.model,
                    e
                )
            })?;
        }
        Ok(())
    }
}

fn render<C: Serialize>(task: &str, ctx: &C) -> Result<String, GenerationError> {
    let body = serde_json::to_string_pretty(ctx)
        .map_err(|e| GenerationError::Provider(format!("cannot encode context: {}", e)))?;
    Ok(format!("{}\n\nContext:\n{}", task, body))
}

/// Configuration problems will not fix themselves; everything else is worth
/// another attempt.
fn classify(err: anyhow::Error) -> GenerationError {
    let message = format!("{:#}", err);
    let lower = message.to_ascii_lowercase();
    if lower.contains("api key")
        || lower.contains("api_key")
        || lower.contains("unauthorized")
        || lower.contains("401")
    {
        GenerationError::Provider(message)
    } else if lower.contains("timed out") || lower.contains("timeout") {
        GenerationError::Transient(message)
    } else if lower.contains("parse") || lower.contains("deserializ") || lower.contains("schema") {
        GenerationError::Validation(message)
    } else {
        GenerationError::Transient(message)
    }
}

#[async_trait]
impl StructuredGenerator for RadkitGenerator {
    async fn kickoff(&self, ctx: &KickoffContext) -> Result<KickoffOutput, GenerationError> {
        let input = render("Propose the initial research questions.", ctx)?;
        let result: anyhow::Result<KickoffOutput> =
            async { run_llm_function!(&self.planner, KickoffOutput, prompts::KICKOFF, input) }
                .await;
        result.map_err(classify)
    }

    async fn evaluate(&self, ctx: &EvaluateContext) -> Result<EvaluateOutput, GenerationError> {
        let input = render("Evaluate the research so far and decide.", ctx)?;
        let result: anyhow::Result<EvaluateOutput> =
            async { run_llm_function!(&self.planner, EvaluateOutput, prompts::EVALUATE, input) }
                .await;
        result.map_err(classify)
    }

    async fn plan_queries(&self, ctx: &QuestionContext) -> Result<QueryBatch, GenerationError> {
        let input = render("Propose search queries for the next cycle.", ctx)?;
        let result: anyhow::Result<QueryBatch> = async {
            run_llm_function!(&self.researcher, QueryBatch, prompts::RESEARCHER, input)
        }
        .await;
        result.map_err(classify)
    }

    async fn reflect(&self, ctx: &ReflectContext) -> Result<ReflectOutput, GenerationError> {
        let input = render("Reflect on this cycle's results.", ctx)?;
        let result: anyhow::Result<ReflectOutput> =
            async { run_llm_function!(&self.researcher, ReflectOutput, prompts::REFLECT, input) }
                .await;
        result.map_err(classify)
    }

    async fn summarize_question(
        &self,
        ctx: &QuestionContext,
    ) -> Result<SummaryOutput, GenerationError> {
        let input = render("Summarize this research question.", ctx)?;
        let result: anyhow::Result<SummaryOutput> = async {
            run_llm_function!(&self.summarizer, SummaryOutput, prompts::SUMMARIZER, input)
        }
        .await;
        result.map_err(classify)
    }

    async fn synthesize(&self, ctx: &SynthesisContext) -> Result<SynthesisOutput, GenerationError> {
        let input = render("Write the final answer.", ctx)?;
        let result: anyhow::Result<SynthesisOutput> = async {
            run_llm_function!(
                &self.synthesizer,
                SynthesisOutput,
                prompts::SYNTHESIZER,
                input
            )
        }
        .await;
        result.map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LlmProvider;

    #[test]
    fn test_roles_get_their_models() {
        let mut config = ResearchConfig::default();
        config
            .per_agent_models
            .insert(roles::SUMMARIZER.to_string(), "small-model".to_string());
        config
            .per_agent_providers
            .insert(roles::SUMMARIZER.to_string(), LlmProvider::DeepSeek);

        let generator = RadkitGenerator::new(&config);
        assert_eq!(generator.summarizer.model, "small-model");
        assert_eq!(generator.summarizer.provider, LlmProvider::DeepSeek);
        assert_eq!(generator.planner.provider, LlmProvider::Anthropic);
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            classify(anyhow::anyhow!("ANTHROPIC_API_KEY not set")),
            GenerationError::Provider(_)
        ));
        assert!(matches!(
            classify(anyhow::anyhow!("failed to parse structured output")),
            GenerationError::Validation(_)
        ));
        assert!(matches!(
            classify(anyhow::anyhow!("connection reset by peer")),
            GenerationError::Transient(_)
        ));
    }

    #[test]
    fn test_render_embeds_context() {
        let ctx = KickoffContext {
            objective: "Which runtime?".to_string(),
            success_criteria: vec![],
            max_questions: 3,
            feedback: vec![],
        };
        let text = render("Propose.", &ctx).unwrap();
        assert!(text.starts_with("Propose.\n\nContext:\n"));
        assert!(text.contains("\"max_questions\": 3"));
    }
}
