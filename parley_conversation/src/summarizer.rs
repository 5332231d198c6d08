//! Summarizer backed by a model endpoint.

use async_trait::async_trait;
use parley_core::util::SUMMARY_INSTRUCTION;
use parley_core::{CompletionRequest, ModelEndpoint, Summarizer, Turn};
use tracing::{debug, info};

/// Condenses turns with one low-temperature, non-streaming completion.
pub struct ModelSummarizer<E> {
    endpoint: E,
    model: String,
    temperature: f32,
}

impl<E: ModelEndpoint> ModelSummarizer<E> {
    pub fn new(endpoint: E, model: impl Into<String>) -> Self {
        info!("Creating ModelSummarizer");
        Self {
            endpoint,
            model: model.into(),
            temperature: 0.3,
        }
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_prompt(turns: &[Turn]) -> String {
        let transcript = turns
            .iter()
            .map(|turn| {
                if turn.attachment.is_some() && turn.text.is_empty() {
                    format!("{}: [shared an attachment]", turn.role.as_str())
                } else {
                    format!("{}: {}", turn.role.as_str(), turn.text)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!("{SUMMARY_INSTRUCTION}\n\nChat history to summarize:\n{transcript}")
    }
}

#[async_trait]
impl<E: ModelEndpoint> Summarizer for ModelSummarizer<E> {
    async fn summarize(&self, turns: &[Turn]) -> anyhow::Result<String> {
        if turns.is_empty() {
            return Ok(String::new());
        }

        debug!("Summarizing {} turns with model={}", turns.len(), self.model);
        let request = CompletionRequest {
            model: self.model.clone(),
            system_prompt: None,
            prompt: Self::build_prompt(turns),
            temperature: self.temperature,
            response_schema: None,
        };

        let summary = self.endpoint.complete(&request).await?;
        Ok(summary.trim().to_string())
    }
}
