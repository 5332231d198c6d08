//! Per-surface chat settings.
//!
//! Every chat entry point (companion, tutor, ...) shares the same buffer and
//! compaction machinery and differs only in the values held here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::{COMPANION_GREETING, COMPANION_SYSTEM_PROMPT, TUTOR_GREETING, TUTOR_SYSTEM_PROMPT};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompactionConfigError {
    #[error("retain_tail must be at least 1")]
    EmptyTail,

    #[error("threshold {threshold} must be at least 2 * retain_tail + 1 = {minimum}")]
    ThresholdTooSmall { threshold: usize, minimum: usize },
}

/// When and how far to shrink a conversation buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Buffer length above which compaction runs.
    #[serde(default = "CompactionConfig::default_threshold")]
    pub threshold: usize,
    /// Most recent turns kept verbatim.
    #[serde(default = "CompactionConfig::default_retain_tail")]
    pub retain_tail: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: Self::default_threshold(),
            retain_tail: Self::default_retain_tail(),
        }
    }
}

impl CompactionConfig {
    pub fn new(threshold: usize, retain_tail: usize) -> Result<Self, CompactionConfigError> {
        let config = Self {
            threshold,
            retain_tail,
        };
        config.validate().map(|()| config)
    }

    /// Both compaction results (summary and truncation) must land at or
    /// under the threshold, otherwise a second pass would compact again.
    pub const fn validate(&self) -> Result<(), CompactionConfigError> {
        if self.retain_tail == 0 {
            return Err(CompactionConfigError::EmptyTail);
        }
        let minimum = 2 * self.retain_tail + 1;
        if self.threshold < minimum {
            return Err(CompactionConfigError::ThresholdTooSmall {
                threshold: self.threshold,
                minimum,
            });
        }
        Ok(())
    }

    /// Turns kept after turn 0 when the summarizer fails.
    #[must_use]
    pub const fn fallback_tail(&self) -> usize {
        2 * self.retain_tail
    }

    const fn default_threshold() -> usize {
        10
    }

    const fn default_retain_tail() -> usize {
        4
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceProfile {
    /// Filled from the map key when loaded from a config file.
    #[serde(default)]
    pub name: String,
    pub system_prompt: String,
    /// Text of turn 0 for a fresh conversation.
    pub greeting: String,
    /// Overrides the provider's default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "SurfaceProfile::default_temperature")]
    pub temperature: f32,
    /// `None` disables compaction for this surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactionConfig>,
}

impl SurfaceProfile {
    /// Friendly general-purpose chat.
    #[must_use]
    pub fn companion() -> Self {
        Self {
            name: "companion".to_string(),
            system_prompt: COMPANION_SYSTEM_PROMPT.to_string(),
            greeting: COMPANION_GREETING.to_string(),
            model: None,
            temperature: Self::default_temperature(),
            compaction: Some(CompactionConfig::default()),
        }
    }

    /// Subject tutoring; longer raw tail since explanations build on each other.
    #[must_use]
    pub fn tutor() -> Self {
        Self {
            name: "tutor".to_string(),
            system_prompt: TUTOR_SYSTEM_PROMPT.to_string(),
            greeting: TUTOR_GREETING.to_string(),
            model: None,
            temperature: Self::default_temperature(),
            compaction: Some(CompactionConfig {
                threshold: 16,
                retain_tail: 6,
            }),
        }
    }

    /// Built-in profile by name.
    #[must_use]
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "companion" => Some(Self::companion()),
            "tutor" => Some(Self::tutor()),
            _ => None,
        }
    }

    #[must_use]
    pub fn with_compaction(mut self, compaction: Option<CompactionConfig>) -> Self {
        self.compaction = compaction;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    const fn default_temperature() -> f32 {
        0.7
    }
}
