//! The retry slot of a conversation.
//!
//! A conversation keeps at most one [`PendingRequest`]: the exact inputs of
//! the send that is in flight or last failed with a retryable error.
//! Replaying it resubmits those inputs unchanged.

use parley_core::{ChatRequest, SurfaceProfile, Turn};
use tracing::debug;

/// Inputs of one send, held for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Buffer contents before `new_turn` was appended.
    pub snapshot: Vec<Turn>,
    pub new_turn: Turn,
}

impl PendingRequest {
    #[must_use]
    pub const fn new(snapshot: Vec<Turn>, new_turn: Turn) -> Self {
        Self { snapshot, new_turn }
    }

    /// Wire request for this send under `profile`, using `default_model`
    /// when the profile has no override.
    #[must_use]
    pub fn to_chat_request(&self, profile: &SurfaceProfile, default_model: &str) -> ChatRequest {
        ChatRequest {
            model: profile
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            system_prompt: profile.system_prompt.clone(),
            temperature: profile.temperature,
            history: self.snapshot.clone(),
            new_turn: self.new_turn.clone(),
        }
    }
}

/// Owns the single pending-request slot.
#[derive(Debug, Default)]
pub struct RetryCoordinator {
    pending: Option<PendingRequest>,
}

impl RetryCoordinator {
    #[must_use]
    pub const fn new() -> Self {
        Self { pending: None }
    }

    /// Hold `request`, replacing whatever was pending.
    pub fn hold(&mut self, request: PendingRequest) {
        if self.pending.is_some() {
            debug!("Replacing stale pending request");
        }
        self.pending = Some(request);
    }

    /// Drop the pending request, after a commit or a terminal failure.
    pub fn release(&mut self) -> Option<PendingRequest> {
        self.pending.take()
    }

    #[must_use]
    pub const fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    #[must_use]
    pub const fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
