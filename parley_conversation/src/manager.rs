//! The per-conversation owner.
//!
//! A [`Conversation`] ties one buffer to one surface profile, one compaction
//! policy, one streaming session and one retry slot. It is the only thing
//! hosts talk to.

use std::sync::Arc;

use parley_core::{
    ClassifiedError, CompactionConfigError, ErrorClassifier, ModelEndpoint, RawError, Role,
    Summarizer, SurfaceProfile, TranscriptKey, TranscriptStore, Turn,
};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::buffer::ConversationBuffer;
use crate::compaction::{CompactionOutcome, CompactionPolicy};
use crate::retry::{PendingRequest, RetryCoordinator};
use crate::streaming::{ReplyStream, StreamingSession};

/// Errors that can occur while setting up or persisting a conversation.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Invalid compaction config for surface '{surface}': {source}")]
    InvalidCompaction {
        surface: String,
        #[source]
        source: CompactionConfigError,
    },

    #[error("Transcript store error: {0}")]
    Store(#[source] anyhow::Error),
}

pub struct Conversation<E, S = Arc<dyn Summarizer>> {
    id: Uuid,
    buffer: ConversationBuffer,
    compaction: Option<CompactionPolicy<S>>,
    session: StreamingSession<E>,
    retry: RetryCoordinator,
    classifier: ErrorClassifier,
}

impl<E, S> Conversation<E, S>
where
    E: ModelEndpoint,
    S: Summarizer,
{
    /// Start a fresh conversation whose turn 0 is the profile's greeting.
    pub fn new(endpoint: E, summarizer: S, profile: SurfaceProfile) -> Result<Self, ConversationError> {
        let greeting = Turn::assistant(profile.greeting.clone());
        Self::from_turns(
            Uuid::now_v7(),
            endpoint,
            summarizer,
            profile,
            vec![greeting],
        )
    }

    /// Rebuild a conversation from committed turns.
    pub fn from_turns(
        id: Uuid,
        endpoint: E,
        summarizer: S,
        profile: SurfaceProfile,
        turns: Vec<Turn>,
    ) -> Result<Self, ConversationError> {
        let compaction = profile
            .compaction
            .map(|config| CompactionPolicy::new(config, summarizer))
            .transpose()
            .map_err(|source| ConversationError::InvalidCompaction {
                surface: profile.name.clone(),
                source,
            })?;

        info!(
            "Conversation {id} on surface '{}' with {} turns",
            profile.name,
            turns.len()
        );

        Ok(Self {
            id,
            buffer: ConversationBuffer::from_turns(turns),
            compaction,
            session: StreamingSession::new(endpoint, profile),
            retry: RetryCoordinator::new(),
            classifier: ErrorClassifier::new(),
        })
    }

    /// Load the transcript stored under `key`, or start fresh when absent.
    pub async fn resume<T: TranscriptStore + ?Sized>(
        store: &T,
        key: &TranscriptKey,
        endpoint: E,
        summarizer: S,
        profile: SurfaceProfile,
    ) -> Result<Self, ConversationError> {
        let stored = store.load(key).await.map_err(ConversationError::Store)?;
        match stored {
            Some(turns) if !turns.is_empty() => {
                info!("Resuming conversation {} ({} turns)", key.conversation_id, turns.len());
                Self::from_turns(key.conversation_id, endpoint, summarizer, profile, turns)
            }
            _ => {
                let mut conversation = Self::new(endpoint, summarizer, profile)?;
                conversation.id = key.conversation_id;
                Ok(conversation)
            }
        }
    }

    /// Write the committed turns to `store`. A conversation holding only
    /// its greeting is not written.
    pub async fn persist<T: TranscriptStore + ?Sized>(
        &self,
        store: &T,
        key: &TranscriptKey,
    ) -> Result<(), ConversationError> {
        if self.buffer.len() <= 1 {
            debug!("Conversation {} has nothing to persist", self.id);
            return Ok(());
        }
        store
            .save(key, self.buffer.turns())
            .await
            .map_err(ConversationError::Store)
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn profile(&self) -> &SurfaceProfile {
        self.session.profile()
    }

    #[must_use]
    pub const fn buffer(&self) -> &ConversationBuffer {
        &self.buffer
    }

    /// Append a committed turn without sending it.
    pub fn append(&mut self, turn: Turn) {
        self.buffer.append(turn);
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Turn> {
        self.buffer.snapshot()
    }

    #[must_use]
    pub const fn pending(&self) -> Option<&PendingRequest> {
        self.retry.pending()
    }

    #[must_use]
    pub fn classify(&self, raw: &RawError) -> ClassifiedError {
        self.classifier.classify_in(raw, &self.operation())
    }

    /// Compact the buffer if it has grown past the surface's threshold.
    pub async fn maybe_compact(&mut self) -> CompactionOutcome {
        match &self.compaction {
            Some(policy) => policy.maybe_compact(&mut self.buffer).await,
            None => CompactionOutcome::Skipped,
        }
    }

    /// Send a user turn and stream the reply.
    ///
    /// The buffer is compacted first, then the turn is appended and the
    /// request is held for [`retry`](Self::retry) until the reply commits or
    /// fails terminally. An empty or non-user turn is rejected before
    /// anything changes.
    pub async fn send(&mut self, turn: Turn) -> Result<ReplyStream<'_>, ClassifiedError> {
        if turn.role != Role::User {
            return Err(ClassifiedError::contract_violation(
                "Only user turns can be sent.",
            ));
        }
        if !turn.has_content() {
            return Err(ClassifiedError::contract_violation(
                "Cannot send an empty message.",
            ));
        }

        let outcome = self.maybe_compact().await;
        if outcome != CompactionOutcome::Skipped {
            debug!("Compaction before send: {outcome:?}");
        }

        let request = PendingRequest::new(self.buffer.snapshot(), turn.clone());
        self.buffer.append(turn);
        self.retry.hold(request.clone());

        info!("Sending turn {} of conversation {}", self.buffer.len(), self.id);
        self.open(&request).await
    }

    /// Resubmit the pending request exactly as it was first sent.
    pub async fn retry(&mut self) -> Result<ReplyStream<'_>, ClassifiedError> {
        let Some(request) = self.retry.pending().cloned() else {
            return Err(ClassifiedError::contract_violation(
                "There is no failed message to retry.",
            ));
        };

        info!("Retrying last request of conversation {}", self.id);
        self.open(&request).await
    }

    async fn open(&mut self, request: &PendingRequest) -> Result<ReplyStream<'_>, ClassifiedError> {
        let operation = self.operation();
        match self.session.open(request).await {
            Ok(inner) => Ok(ReplyStream::new(
                &mut self.buffer,
                &mut self.retry,
                &self.classifier,
                operation,
                inner,
            )),
            Err(raw) => {
                let classified = self.classifier.classify_in(&raw, &operation);
                if !classified.retryable {
                    self.retry.release();
                }
                info!(
                    "Request failed before streaming as {:?}: {}",
                    classified.kind, classified.detail
                );
                Err(classified)
            }
        }
    }

    fn operation(&self) -> String {
        format!("get a reply from the {}", self.session.profile().name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use futures::stream;
    use crate::streaming::ReplyEvent;
    use parley_core::{
        Attachment, ChatRequest, CompletionRequest, ErrorKind, FragmentStream, StreamEvent,
    };
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Endpoint that replays one scripted stream per call and records the
    /// requests it saw.
    #[derive(Default)]
    struct ScriptedEndpoint {
        scripts: Mutex<Vec<Vec<Result<StreamEvent, RawError>>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedEndpoint {
        fn with_scripts(scripts: Vec<Vec<Result<StreamEvent, RawError>>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelEndpoint for ScriptedEndpoint {
        async fn stream_chat(&self, request: &ChatRequest) -> Result<FragmentStream, RawError> {
            self.requests.lock().unwrap().push(request.clone());
            let script = self.scripts.lock().unwrap().pop().unwrap_or_default();
            Ok(stream::iter(script).boxed())
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<String, RawError> {
            Err(RawError::Other("not scripted".into()))
        }

        fn get_default_model(&self) -> &str {
            "test-model"
        }
    }

    #[derive(Default)]
    struct CountingSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for CountingSummarizer {
        async fn summarize(&self, _turns: &[Turn]) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("summary".to_string())
        }
    }

    fn delta(text: &str) -> Result<StreamEvent, RawError> {
        Ok(StreamEvent::Delta(text.to_string()))
    }

    fn conversation(
        endpoint: Arc<ScriptedEndpoint>,
    ) -> Conversation<Arc<ScriptedEndpoint>, Arc<CountingSummarizer>> {
        Conversation::new(
            endpoint,
            Arc::new(CountingSummarizer::default()),
            SurfaceProfile::companion(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn reply_commits_after_close() {
        let endpoint = ScriptedEndpoint::with_scripts(vec![vec![
            delta("Hel"),
            delta("lo"),
            delta("!"),
            Ok(StreamEvent::Close),
        ]]);
        let mut convo = conversation(endpoint.clone());

        let mut reply = convo.send(Turn::user("hi")).await.unwrap();
        let mut deltas = Vec::new();
        let mut committed = None;
        while let Some(event) = reply.next().await {
            match event.unwrap() {
                ReplyEvent::Delta(d) => deltas.push(d),
                ReplyEvent::Committed(turn) => committed = Some(turn),
            }
        }
        drop(reply);

        let committed = committed.unwrap();
        assert_eq!(deltas.concat(), committed.text);
        assert_eq!(
            deltas.iter().map(String::len).sum::<usize>(),
            committed.text.len()
        );
        assert_eq!(convo.buffer().len(), 3);
        assert_eq!(convo.buffer().last(), Some(&committed));
        assert!(convo.pending().is_none());
        assert_eq!(endpoint.calls(), 1);
    }

    #[tokio::test]
    async fn draft_is_not_committed_before_close() {
        let endpoint =
            ScriptedEndpoint::with_scripts(vec![vec![delta("partial"), Ok(StreamEvent::Close)]]);
        let mut convo = conversation(endpoint);

        let mut reply = convo.send(Turn::user("hi")).await.unwrap();
        let first = reply.next().await.unwrap().unwrap();
        assert_eq!(first, ReplyEvent::Delta("partial".into()));
        assert_eq!(reply.draft(), "partial");
        assert!(!reply.is_finished());

        let last = reply.next().await.unwrap().unwrap();
        assert!(matches!(last, ReplyEvent::Committed(_)));
        assert!(reply.next().await.is_none());
    }

    #[tokio::test]
    async fn empty_send_is_rejected_without_network() {
        let endpoint = ScriptedEndpoint::with_scripts(vec![]);
        let mut convo = conversation(endpoint.clone());
        let before = convo.snapshot();

        let err = convo.send(Turn::user("")).await.err().unwrap();

        assert_eq!(err.kind, ErrorKind::ContractViolation);
        assert!(!err.retryable);
        assert_eq!(convo.snapshot(), before);
        assert!(convo.pending().is_none());
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn assistant_turns_cannot_be_sent() {
        let endpoint = ScriptedEndpoint::with_scripts(vec![]);
        let mut convo = conversation(endpoint.clone());

        let err = convo.send(Turn::assistant("hi")).await.err().unwrap();
        assert_eq!(err.kind, ErrorKind::ContractViolation);
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn attachment_only_turn_is_sent() {
        let endpoint = ScriptedEndpoint::with_scripts(vec![vec![delta("A cat."), Ok(StreamEvent::Close)]]);
        let mut convo = conversation(endpoint.clone());
        let image = Attachment::new(vec![1_u8, 2, 3], "image/jpeg");

        let turn = convo
            .send(Turn::user("").with_attachment(image.clone()))
            .await
            .unwrap()
            .into_reply()
            .await
            .unwrap();

        assert_eq!(turn.text, "A cat.");
        let sent = endpoint.requests.lock().unwrap()[0].new_turn.clone();
        assert_eq!(sent.attachment, Some(image));
    }

    #[tokio::test]
    async fn close_without_text_is_malformed() {
        let endpoint = ScriptedEndpoint::with_scripts(vec![vec![Ok(StreamEvent::Close)]]);
        let mut convo = conversation(endpoint);

        let err = convo
            .send(Turn::user("hi"))
            .await
            .unwrap()
            .into_reply()
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert!(convo.pending().is_some());
        assert_eq!(convo.buffer().len(), 2);
    }

    #[tokio::test]
    async fn safety_block_releases_pending_request() {
        let endpoint = ScriptedEndpoint::with_scripts(vec![vec![Err(RawError::Other(
            "response blocked by safety filter".into(),
        ))]]);
        let mut convo = conversation(endpoint);

        let err = convo
            .send(Turn::user("hi"))
            .await
            .unwrap()
            .into_reply()
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::SafetyBlocked);
        assert!(!err.retryable);
        assert!(convo.pending().is_none());

        let retry = convo.retry().await.err().unwrap();
        assert_eq!(retry.kind, ErrorKind::ContractViolation);
    }

    #[tokio::test]
    async fn compaction_runs_before_send_and_not_on_retry() {
        let endpoint = ScriptedEndpoint::with_scripts(vec![
            vec![Err(RawError::Other("HTTP 503".into()))],
            vec![delta("ok"), Ok(StreamEvent::Close)],
        ]);
        let summarizer = Arc::new(CountingSummarizer::default());
        let mut convo =
            Conversation::new(endpoint.clone(), summarizer.clone(), SurfaceProfile::companion())
                .unwrap();
        for i in 1..11 {
            convo.append(Turn::user(format!("turn{i}")));
        }

        let err = convo
            .send(Turn::user("new"))
            .await
            .unwrap()
            .into_reply()
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(convo.buffer().len(), 7);

        convo.retry().await.unwrap().into_reply().await.unwrap();
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(convo.buffer().len(), 8);

        let requests = endpoint.requests.lock().unwrap();
        assert_eq!(requests[0], requests[1]);
        assert_eq!(requests[0].history.len(), 6);
        assert_eq!(requests[0].history[1].text, "summary");
    }

    #[tokio::test]
    async fn surface_without_compaction_never_summarizes() {
        let endpoint = ScriptedEndpoint::with_scripts(vec![vec![delta("ok"), Ok(StreamEvent::Close)]]);
        let summarizer = Arc::new(CountingSummarizer::default());
        let profile = SurfaceProfile::companion().with_compaction(None);
        let mut convo = Conversation::new(endpoint, summarizer.clone(), profile).unwrap();
        for i in 1..30 {
            convo.append(Turn::user(format!("turn{i}")));
        }

        convo.send(Turn::user("new")).await.unwrap().into_reply().await.unwrap();

        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(convo.buffer().len(), 32);
    }

    #[test]
    fn invalid_profile_compaction_is_rejected() {
        let profile = SurfaceProfile::companion().with_compaction(Some(
            parley_core::CompactionConfig {
                threshold: 3,
                retain_tail: 4,
            },
        ));
        let result = Conversation::new(
            ScriptedEndpoint::with_scripts(vec![]),
            Arc::new(CountingSummarizer::default()),
            profile,
        );
        assert!(matches!(
            result,
            Err(ConversationError::InvalidCompaction { .. })
        ));
    }
}
