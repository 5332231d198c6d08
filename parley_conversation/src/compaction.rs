//! Buffer compaction.
//!
//! Once a buffer grows past its threshold, everything between turn 0 and
//! the retained tail is condensed into one assistant turn by a
//! [`Summarizer`]. A failing summarizer never blocks the caller: the policy
//! falls back to dropping the older turns instead.

use std::sync::Arc;

use parley_core::{CompactionConfig, CompactionConfigError, Summarizer, Turn};
use tracing::{debug, info, warn};

use crate::buffer::ConversationBuffer;

/// What [`CompactionPolicy::maybe_compact`] did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    Skipped,
    /// `removed` turns were replaced by one summary turn.
    Summarized { removed: usize },
    /// The summarizer failed and `removed` turns were dropped.
    Truncated { removed: usize },
}

pub struct CompactionPolicy<S = Arc<dyn Summarizer>> {
    config: CompactionConfig,
    summarizer: S,
}

impl<S> std::fmt::Debug for CompactionPolicy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: Summarizer> CompactionPolicy<S> {
    pub fn new(config: CompactionConfig, summarizer: S) -> Result<Self, CompactionConfigError> {
        config.validate()?;
        Ok(Self { config, summarizer })
    }

    #[must_use]
    pub const fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Compact `buffer` if it holds more than `threshold` turns.
    ///
    /// The result is `[turn0, summary, ...last retain_tail]`, or
    /// `[turn0, ...last 2 * retain_tail]` when the summarizer fails. Both
    /// shapes fit under the threshold, so a second call is a no-op.
    pub async fn maybe_compact(&self, buffer: &mut ConversationBuffer) -> CompactionOutcome {
        let len = buffer.len();
        if len <= self.config.threshold {
            return CompactionOutcome::Skipped;
        }

        let middle = 1..len.saturating_sub(self.config.retain_tail);
        if middle.is_empty() {
            debug!("Nothing between turn 0 and the retained tail, skipping compaction");
            return CompactionOutcome::Skipped;
        }

        let removed = middle.len();
        info!(
            "Compacting buffer: {len} turns, summarizing {removed} (threshold={}, retain_tail={})",
            self.config.threshold, self.config.retain_tail
        );

        match self.summarizer.summarize(&buffer.turns()[middle.clone()]).await {
            Ok(summary) if !summary.trim().is_empty() => {
                buffer.splice_middle(middle, Some(Turn::assistant(summary)));
                info!("Compaction summarized {removed} turns, buffer now {}", buffer.len());
                CompactionOutcome::Summarized { removed }
            }
            Ok(_) => {
                warn!("Summarizer returned empty text, truncating history instead");
                self.truncate(buffer)
            }
            Err(e) => {
                warn!("Summarizer failed, truncating history instead: {e}");
                self.truncate(buffer)
            }
        }
    }

    fn truncate(&self, buffer: &mut ConversationBuffer) -> CompactionOutcome {
        let keep_from = buffer
            .len()
            .saturating_sub(self.config.fallback_tail())
            .max(1);
        let dropped = 1..keep_from;
        if dropped.is_empty() {
            return CompactionOutcome::Skipped;
        }

        let removed = dropped.len();
        buffer.splice_middle(dropped, None);
        info!("Compaction dropped {removed} turns, buffer now {}", buffer.len());
        CompactionOutcome::Truncated { removed }
    }
}
