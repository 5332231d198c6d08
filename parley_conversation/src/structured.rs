//! Non-streaming, schema-constrained model calls.
//!
//! These share the error taxonomy with chat: transport failures and replies
//! that do not deserialize into the expected type are both classified, the
//! latter as `MalformedResponse` unless the text carries another marker.

use parley_core::{
    ClassifiedError, CompletionRequest, ErrorClassifier, ModelEndpoint, RawError,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// One structured operation.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// Verb phrase used in error messages, e.g. "generate a quiz".
    pub operation: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    /// JSON schema the reply must follow. `None` for plain text calls.
    pub schema: Option<serde_json::Value>,
}

impl StructuredRequest {
    #[must_use]
    pub fn new(operation: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.7,
            schema: None,
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

pub struct StructuredGenerator<E> {
    endpoint: E,
    classifier: ErrorClassifier,
    model: String,
}

impl<E: ModelEndpoint> StructuredGenerator<E> {
    pub fn new(endpoint: E, classifier: ErrorClassifier) -> Self {
        let model = endpoint.get_default_model().to_string();
        Self {
            endpoint,
            classifier,
            model,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Run the request and deserialize the reply into `T`.
    pub async fn generate<T: DeserializeOwned>(
        &self,
        request: StructuredRequest,
    ) -> Result<T, ClassifiedError> {
        let operation = request.operation.clone();
        let text = self.generate_text(request).await?;
        let json = strip_code_fence(&text);

        serde_json::from_str(json).map_err(|e| {
            debug!("Structured reply did not match the expected shape: {e}");
            self.classifier
                .classify_in(&RawError::Parse(e.to_string()), &operation)
        })
    }

    /// Run the request and return the reply text.
    pub async fn generate_text(&self, request: StructuredRequest) -> Result<String, ClassifiedError> {
        info!(
            "Running structured operation '{}' with model={}",
            request.operation, self.model
        );
        let completion = CompletionRequest {
            model: self.model.clone(),
            system_prompt: request.system_prompt,
            prompt: request.prompt,
            temperature: request.temperature,
            response_schema: request.schema,
        };

        let text = self
            .endpoint
            .complete(&completion)
            .await
            .map_err(|raw| self.classifier.classify_in(&raw, &request.operation))?;
        Ok(text.trim().to_string())
    }
}

/// Some models wrap JSON in a markdown fence even when asked not to.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.strip_prefix("json").unwrap_or(rest);
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::{ChatRequest, ErrorKind, FragmentStream};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedEndpoint {
        reply: Result<String, RawError>,
        last: Mutex<Option<CompletionRequest>>,
    }

    impl CannedEndpoint {
        fn new(reply: Result<String, RawError>) -> Self {
            Self {
                reply,
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ModelEndpoint for CannedEndpoint {
        async fn stream_chat(&self, _request: &ChatRequest) -> Result<FragmentStream, RawError> {
            Err(RawError::Other("not used".into()))
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, RawError> {
            *self.last.lock().unwrap() = Some(request.clone());
            self.reply.clone()
        }

        fn get_default_model(&self) -> &str {
            "glm-4-flash"
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Quiz {
        questions: Vec<String>,
    }

    fn quiz_request() -> StructuredRequest {
        StructuredRequest::new("generate a quiz", "Three questions on optics").with_schema(json!({
            "type": "object",
            "properties": {"questions": {"type": "array", "items": {"type": "string"}}},
            "required": ["questions"]
        }))
    }

    #[tokio::test]
    async fn parses_schema_reply() {
        let endpoint = CannedEndpoint::new(Ok(r#"{"questions":["a","b"]}"#.into()));
        let generator = StructuredGenerator::new(endpoint, ErrorClassifier::new());

        let quiz: Quiz = generator.generate(quiz_request()).await.unwrap();

        assert_eq!(quiz.questions, ["a", "b"]);
        let last = generator.endpoint.last.lock().unwrap().clone().unwrap();
        assert_eq!(last.model, "glm-4-flash");
        assert!(last.response_schema.is_some());
    }

    #[tokio::test]
    async fn accepts_fenced_json() {
        let endpoint = CannedEndpoint::new(Ok("```json\n{\"questions\":[]}\n```".into()));
        let generator = StructuredGenerator::new(endpoint, ErrorClassifier::new());

        let quiz: Quiz = generator.generate(quiz_request()).await.unwrap();
        assert!(quiz.questions.is_empty());
    }

    #[tokio::test]
    async fn wrong_shape_is_malformed_and_retryable() {
        let endpoint = CannedEndpoint::new(Ok(r#"{"title":"no questions"}"#.into()));
        let generator = StructuredGenerator::new(endpoint, ErrorClassifier::new());

        let err = generator.generate::<Quiz>(quiz_request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn transport_failure_uses_operation_in_message() {
        let endpoint = CannedEndpoint::new(Err(RawError::Other("mystery".into())));
        let generator = StructuredGenerator::new(endpoint, ErrorClassifier::new());

        let err = generator.generate::<Quiz>(quiz_request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(err.message, "Failed to generate a quiz. Please try again.");
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fence("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }
}
