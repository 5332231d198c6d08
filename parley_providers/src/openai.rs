use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parley_core::util::truncate_chars;
use parley_core::{
    ChatRequest, CompletionRequest, ErrorClassifier, FragmentStream, ModelEndpoint, RawError,
    StreamEvent, Turn,
};
use reqwest::{Client, Response};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::retry::retry_with_backoff;
use crate::sse::SseDecoder;

pub const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
pub const DEFAULT_MODEL: &str = "glm-4-flash";

/// Chat endpoint speaking the OpenAI `/chat/completions` protocol.
pub struct OpenAiCompatProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
    retry_delays: Vec<Duration>,
    classifier: ErrorClassifier,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: String) -> Self {
        info!("Creating OpenAiCompatProvider");
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            retry_delays: vec![Duration::from_secs(2), Duration::from_secs(4)],
            classifier: ErrorClassifier::new(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_default_model(mut self, model: String) -> Self {
        self.default_model = model;
        self
    }

    /// Waits between attempts of a non-streaming completion.
    #[must_use]
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Decides which completion failures are retried. Share the caller's
    /// classifier so backoff agrees with how failures are reported.
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    fn endpoint_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn post(&self, body: &Value) -> Result<Response, RawError> {
        let response = self
            .client
            .post(self.endpoint_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RawError::Status {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    /// Helper method to send a single non-streaming request
    async fn try_complete(&self, body: &Value) -> Result<String, RawError> {
        let response = self
            .post(body)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| map_reqwest_error(&e))?;

        if let Some(reason @ ("content_filter" | "sensitive")) =
            response["choices"][0]["finish_reason"].as_str()
        {
            return Err(RawError::Other(format!(
                "reply blocked by content filter ({reason})"
            )));
        }

        response["choices"][0]["message"]["content"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| RawError::Parse("missing choices[0].message.content".to_string()))
    }
}

#[async_trait]
impl ModelEndpoint for OpenAiCompatProvider {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream, RawError> {
        let body = chat_body(request);
        info!(
            "Sending streaming request: model={}, messages={}",
            request.model,
            request.history.len() + 2
        );

        let response = self.post(&body).await?;
        Ok(decode_sse(response))
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, RawError> {
        let body = completion_body(request);
        info!(
            "Sending completion request: model={}, structured={}",
            request.model,
            request.response_schema.is_some()
        );

        let content = retry_with_backoff(
            || self.try_complete(&body),
            &self.retry_delays,
            |e| self.classifier.classify(e).retryable,
        )
        .await?;

        info!("Received completion of {} chars", content.len());
        Ok(content)
    }

    fn get_default_model(&self) -> &str {
        &self.default_model
    }
}

struct SseState {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    queued: VecDeque<Result<StreamEvent, RawError>>,
    finished: bool,
}

fn decode_sse(response: Response) -> FragmentStream {
    let state = SseState {
        body: response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed(),
        decoder: SseDecoder::new(),
        queued: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queued.pop_front() {
                return Some((event, state));
            }
            if state.finished || state.decoder.is_done() {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => state.queued.extend(state.decoder.feed(&bytes)),
                Some(Err(e)) => {
                    state.finished = true;
                    state.queued.push_back(Err(map_reqwest_error(&e)));
                }
                None => {
                    debug!("Response body ended");
                    state.finished = true;
                    state.queued.extend(state.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

fn chat_body(request: &ChatRequest) -> Value {
    let mut messages = Vec::with_capacity(request.history.len() + 2);
    if !request.system_prompt.is_empty() {
        messages.push(json!({"role": "system", "content": request.system_prompt}));
    }
    messages.extend(request.history.iter().map(turn_message));
    messages.push(turn_message(&request.new_turn));

    json!({
        "model": request.model,
        "messages": messages,
        "temperature": request.temperature,
        "stream": true,
    })
}

fn completion_body(request: &CompletionRequest) -> Value {
    let mut messages = Vec::with_capacity(2);
    if let Some(system_prompt) = &request.system_prompt {
        messages.push(json!({"role": "system", "content": system_prompt}));
    }
    messages.push(json!({"role": "user", "content": request.prompt}));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "temperature": request.temperature,
    });
    if let Some(schema) = &request.response_schema {
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {"name": "response", "schema": schema},
        });
    }
    body
}

/// One turn as an OpenAI message. Attachments become an `image_url` part
/// carrying a data URL.
fn turn_message(turn: &Turn) -> Value {
    let role = turn.role.as_str();
    let Some(attachment) = &turn.attachment else {
        return json!({"role": role, "content": turn.text});
    };

    let mut parts = Vec::with_capacity(2);
    if !turn.text.is_empty() {
        parts.push(json!({"type": "text", "text": turn.text}));
    }
    parts.push(json!({
        "type": "image_url",
        "image_url": {"url": attachment.to_data_url()},
    }));
    json!({"role": role, "content": parts})
}

/// Pull `error.message` out of an error body, or fall back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(ToString::to_string))
        .unwrap_or_else(|| truncate_chars(body.trim(), 200))
}

fn map_reqwest_error(e: &reqwest::Error) -> RawError {
    if e.is_connect() {
        RawError::Connectivity(e.to_string())
    } else if e.is_timeout() {
        RawError::Other("request timed out".to_string())
    } else if let Some(status) = e.status() {
        RawError::Status {
            status: status.as_u16(),
            message: e.to_string(),
        }
    } else if e.is_decode() {
        RawError::Parse(e.to_string())
    } else {
        RawError::Other(e.to_string())
    }
}
