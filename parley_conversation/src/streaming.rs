//! Streamed replies.
//!
//! [`StreamingSession`] turns a [`PendingRequest`] into a transport stream.
//! [`ReplyStream`] consumes that stream on behalf of a conversation: it
//! yields each delta as an uncommitted draft and commits the assistant turn
//! only once the transport signals the end of the reply.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::{Stream, StreamExt};
use parley_core::{
    ClassifiedError, ErrorClassifier, FragmentStream, ModelEndpoint, RawError, StreamEvent,
    SurfaceProfile, Turn,
};
use tracing::{debug, info, warn};

use crate::buffer::ConversationBuffer;
use crate::retry::{PendingRequest, RetryCoordinator};

/// Stateless sender: every call carries the whole history, so identical
/// requests can be replayed byte-for-byte.
pub struct StreamingSession<E> {
    endpoint: E,
    profile: SurfaceProfile,
}

impl<E: ModelEndpoint> StreamingSession<E> {
    pub const fn new(endpoint: E, profile: SurfaceProfile) -> Self {
        Self { endpoint, profile }
    }

    #[must_use]
    pub const fn profile(&self) -> &SurfaceProfile {
        &self.profile
    }

    #[must_use]
    pub const fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub async fn open(&self, request: &PendingRequest) -> Result<FragmentStream, RawError> {
        let chat = request.to_chat_request(&self.profile, self.endpoint.get_default_model());
        info!(
            "Opening reply stream: surface={}, model={}, history={} turns",
            self.profile.name,
            chat.model,
            chat.history.len()
        );
        self.endpoint.stream_chat(&chat).await
    }
}

/// Caller-facing stream item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    /// A piece of the reply. Not yet part of the conversation.
    Delta(String),
    /// Terminal event: the full reply, now committed to the buffer.
    Committed(Turn),
}

/// The reply to one send or retry.
///
/// Holds the conversation's buffer and retry slot mutably until it is
/// dropped, which is what keeps a conversation single-flight. Yields
/// `Ok(Delta)` items, then exactly one terminal item: `Ok(Committed)` or
/// `Err(ClassifiedError)`. On failure the draft is discarded and the buffer
/// is left as it was when the request was issued.
pub struct ReplyStream<'a> {
    buffer: &'a mut ConversationBuffer,
    retry: &'a mut RetryCoordinator,
    classifier: &'a ErrorClassifier,
    operation: String,
    inner: Option<FragmentStream>,
    draft: String,
}

impl<'a> ReplyStream<'a> {
    pub(crate) fn new(
        buffer: &'a mut ConversationBuffer,
        retry: &'a mut RetryCoordinator,
        classifier: &'a ErrorClassifier,
        operation: String,
        inner: FragmentStream,
    ) -> Self {
        Self {
            buffer,
            retry,
            classifier,
            operation,
            inner: Some(inner),
            draft: String::new(),
        }
    }

    /// Text received so far. Never part of the buffer until committed.
    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Whether the terminal item has been yielded.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.inner.is_none()
    }

    /// Drain the stream and return the committed turn.
    pub async fn into_reply(mut self) -> Result<Turn, ClassifiedError> {
        while let Some(event) = self.next().await {
            if let ReplyEvent::Committed(turn) = event? {
                return Ok(turn);
            }
        }
        Err(ClassifiedError::contract_violation(
            "Reply stream was already finished.",
        ))
    }

    fn commit(&mut self) -> Result<ReplyEvent, ClassifiedError> {
        self.inner = None;
        if self.draft.is_empty() {
            return Err(self.fail(RawError::Parse("reply closed with no text".to_string())));
        }

        let turn = Turn::assistant(std::mem::take(&mut self.draft));
        self.buffer.append(turn.clone());
        self.retry.release();
        info!(
            "Committed reply of {} chars, buffer now {} turns",
            turn.text.len(),
            self.buffer.len()
        );
        Ok(ReplyEvent::Committed(turn))
    }

    fn fail(&mut self, raw: RawError) -> ClassifiedError {
        self.inner = None;
        let discarded = std::mem::take(&mut self.draft);
        let classified = self.classifier.classify_in(&raw, &self.operation);
        if classified.retryable {
            warn!(
                "Reply stream failed as {:?} after {} chars, request kept for retry: {}",
                classified.kind,
                discarded.len(),
                classified.detail
            );
        } else {
            warn!(
                "Reply stream failed as {:?}, releasing request: {}",
                classified.kind, classified.detail
            );
            self.retry.release();
        }
        classified
    }
}

impl Stream for ReplyStream<'_> {
    type Item = Result<ReplyEvent, ClassifiedError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(inner.poll_next_unpin(cx)) {
                Some(Ok(StreamEvent::Delta(delta))) => {
                    if delta.is_empty() {
                        continue;
                    }
                    this.draft.push_str(&delta);
                    return Poll::Ready(Some(Ok(ReplyEvent::Delta(delta))));
                }
                Some(Ok(StreamEvent::Close)) => {
                    debug!("Transport closed the reply stream");
                    return Poll::Ready(Some(this.commit()));
                }
                Some(Err(raw)) => return Poll::Ready(Some(Err(this.fail(raw)))),
                None => {
                    let raw = RawError::Other("reply stream ended before completion".to_string());
                    return Poll::Ready(Some(Err(this.fail(raw))));
                }
            }
        }
    }
}
