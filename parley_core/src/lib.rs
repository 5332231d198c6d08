#![deny(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod attachment;
pub mod classify;
pub mod error;
pub mod profile;
pub mod util;

pub use attachment::Attachment;
pub use classify::{AlwaysOnline, ConnectivityProbe, ErrorClassifier};
pub use error::{ClassifiedError, ErrorKind, RawError};
pub use profile::{CompactionConfig, CompactionConfigError, SurfaceProfile};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One authored message unit in a conversation.
///
/// Turns are values: once committed to a buffer they are never mutated,
/// only cloned or dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl Turn {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            attachment: None,
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            attachment: None,
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// A turn carries content when it has non-empty text or an attachment.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.text.is_empty() || self.attachment.is_some()
    }
}

/// Transport-level stream item produced by a [`ModelEndpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One incremental piece of assistant text.
    Delta(String),
    /// The endpoint finished the reply.
    Close,
}

pub type FragmentStream = BoxStream<'static, Result<StreamEvent, RawError>>;

/// Everything one streamed chat call needs. Each call carries the whole
/// history, so the same request can be replayed verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub history: Vec<Turn>,
    pub new_turn: Turn,
}

/// A non-streaming completion, optionally constrained by a JSON schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub response_schema: Option<serde_json::Value>,
}

#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// Open a streamed chat call. The returned stream must end with
    /// [`StreamEvent::Close`] on success.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream, RawError>;

    /// Run a single non-streaming completion and return its text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, RawError>;

    fn get_default_model(&self) -> &str;
}

#[async_trait]
impl<T: ModelEndpoint + ?Sized> ModelEndpoint for Arc<T> {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream, RawError> {
        (**self).stream_chat(request).await
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, RawError> {
        (**self).complete(request).await
    }

    fn get_default_model(&self) -> &str {
        (**self).get_default_model()
    }
}

/// Condenses a run of turns into one prose string.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, turns: &[Turn]) -> anyhow::Result<String>;
}

#[async_trait]
impl<T: Summarizer + ?Sized> Summarizer for Arc<T> {
    async fn summarize(&self, turns: &[Turn]) -> anyhow::Result<String> {
        (**self).summarize(turns).await
    }
}

/// Identifies one stored transcript.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TranscriptKey {
    pub user: String,
    pub conversation_id: Uuid,
}

impl TranscriptKey {
    #[must_use]
    pub fn new(user: impl Into<String>, conversation_id: Uuid) -> Self {
        Self {
            user: user.into(),
            conversation_id,
        }
    }

    /// Flat storage key, `user:conversation_id`.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.user, self.conversation_id)
    }
}

#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn load(&self, key: &TranscriptKey) -> anyhow::Result<Option<Vec<Turn>>>;
    async fn save(&self, key: &TranscriptKey, turns: &[Turn]) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: TranscriptStore + ?Sized> TranscriptStore for Arc<T> {
    async fn load(&self, key: &TranscriptKey) -> anyhow::Result<Option<Vec<Turn>>> {
        (**self).load(key).await
    }

    async fn save(&self, key: &TranscriptKey, turns: &[Turn]) -> anyhow::Result<()> {
        (**self).save(key, turns).await
    }
}
