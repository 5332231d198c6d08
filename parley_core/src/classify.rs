//! Failure classification.
//!
//! Every model-backed operation funnels its raw failure through
//! [`ErrorClassifier::classify_in`]. Rules are tried in a fixed order and the
//! first match wins, so a message that mentions both a rate limit and a
//! safety block is reported as rate limited.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{ClassifiedError, ErrorKind, RawError};

static NETWORK_MARKERS: Lazy<Regex> = Lazy::new(|| {
    build(
        r"failed to fetch|network is unreachable|connection refused|connection reset|no route to host|dns error",
    )
});

static AUTH_MARKERS: Lazy<Regex> = Lazy::new(|| {
    build(
        r"api[_ ]?key|permission denied|unauthori[sz]ed|unauthenticated|forbidden|invalid credentials",
    )
});

static RATE_LIMIT_MARKERS: Lazy<Regex> = Lazy::new(|| {
    build(r"rate[ _-]?limit|too many requests|resource[ _]exhausted|quota|\b429\b")
});

static SERVER_MARKERS: Lazy<Regex> = Lazy::new(|| {
    build(
        r"internal|service unavailable|bad gateway|gateway timeout|overloaded|\b50[0-4]\b",
    )
});

static SAFETY_MARKERS: Lazy<Regex> =
    Lazy::new(|| build(r"safety|blocked|content[ _]filter|sensitive"));

#[allow(clippy::unwrap_used)]
fn build(pattern: &str) -> Regex {
    // Patterns are compile-time constants covered by the tests below.
    Regex::new(&format!("(?i){pattern}")).unwrap()
}

/// Host hook telling the classifier whether the device has connectivity.
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Probe for hosts that cannot observe connectivity.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl ConnectivityProbe for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct ErrorClassifier {
    probe: Arc<dyn ConnectivityProbe>,
}

impl std::fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier").finish_non_exhaustive()
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            probe: Arc::new(AlwaysOnline),
        }
    }

    #[must_use]
    pub fn with_probe(probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self { probe }
    }

    /// Classify a failure with no particular operation in mind.
    #[must_use]
    pub fn classify(&self, raw: &RawError) -> ClassifiedError {
        self.classify_in(raw, "complete the request")
    }

    /// Classify a failure of `operation`, a verb phrase such as
    /// "get a reply from the tutor", used in the fallback message.
    #[must_use]
    pub fn classify_in(&self, raw: &RawError, operation: &str) -> ClassifiedError {
        let kind = self.kind_of(raw);
        let message = kind.user_message().map_or_else(
            || format!("Failed to {operation}. Please try again."),
            str::to_string,
        );

        debug!("Classified failure of '{operation}' as {kind:?}: {raw}");
        ClassifiedError::new(kind, message, raw.to_string())
    }

    fn kind_of(&self, raw: &RawError) -> ErrorKind {
        let text = raw.to_string();
        let status = match raw {
            RawError::Status { status, .. } => Some(*status),
            _ => None,
        };

        if !self.probe.is_online()
            || matches!(raw, RawError::Connectivity(_))
            || NETWORK_MARKERS.is_match(&text)
        {
            return ErrorKind::Offline;
        }
        if matches!(status, Some(401 | 403)) || AUTH_MARKERS.is_match(&text) {
            return ErrorKind::AuthConfig;
        }
        if status == Some(429) || RATE_LIMIT_MARKERS.is_match(&text) {
            return ErrorKind::RateLimited;
        }
        if status.is_some_and(|s| (500..600).contains(&s)) || SERVER_MARKERS.is_match(&text) {
            return ErrorKind::ServerError;
        }
        if SAFETY_MARKERS.is_match(&text) {
            return ErrorKind::SafetyBlocked;
        }
        if matches!(raw, RawError::Parse(_)) {
            return ErrorKind::MalformedResponse;
        }
        ErrorKind::Unknown
    }
}
