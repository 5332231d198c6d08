#![warn(
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

//! Conversation state between a chat UI and a model endpoint.
//!
//! # Key Features
//! - Ordered turn buffer with compaction-by-summarization
//! - Streamed replies committed only on their terminal event
//! - One pending request per conversation, replayable byte-for-byte
//! - Structured (schema-constrained) calls under the same error taxonomy

mod buffer;
mod compaction;
mod manager;
mod retry;
mod streaming;
mod structured;
mod summarizer;

pub use buffer::ConversationBuffer;
pub use compaction::{CompactionOutcome, CompactionPolicy};
pub use manager::{Conversation, ConversationError};
pub use retry::{PendingRequest, RetryCoordinator};
pub use streaming::{ReplyEvent, ReplyStream, StreamingSession};
pub use structured::{StructuredGenerator, StructuredRequest};
pub use summarizer::ModelSummarizer;
