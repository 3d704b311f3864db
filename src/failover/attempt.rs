//! Attempt records and failover outcomes
//!
//! Every candidate visited during one `chat` call leaves exactly one
//! `FallbackAttempt`, in visiting order. Success returns them inside
//! `Routed`; exhaustion returns them inside `FallbackExhaustedError`.

use crate::failover::classifier::FailoverReason;
use crate::provider::ProviderError;
use std::fmt;
use std::time::Duration;

/// Outcome of one candidate within a single request
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackAttempt {
    pub provider: String,
    pub model: String,
    pub error: Option<String>,
    pub reason: Option<FailoverReason>,
    pub duration: Duration,
    pub skipped: bool,
}

impl FallbackAttempt {
    pub(crate) fn succeeded(provider: &str, model: &str, duration: Duration) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            error: None,
            reason: None,
            duration,
            skipped: false,
        }
    }

    pub(crate) fn failed(
        provider: &str,
        model: &str,
        error: String,
        reason: Option<FailoverReason>,
        duration: Duration,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            error: Some(error),
            reason,
            duration,
            skipped: false,
        }
    }

    pub(crate) fn skipped(
        provider: &str,
        model: &str,
        reason: Option<FailoverReason>,
        remaining: Duration,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            error: Some(format!(
                "on cooldown for another {}ms",
                remaining.as_millis()
            )),
            reason,
            duration: Duration::ZERO,
            skipped: true,
        }
    }

    /// True when this attempt produced the response
    pub fn is_success(&self) -> bool {
        !self.skipped && self.error.is_none()
    }
}

impl fmt::Display for FallbackAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = self.reason.map(|r| r.as_str()).unwrap_or("none");
        if self.skipped {
            write!(f, "{} (skipped, last reason: {})", self.provider, reason)
        } else if let Some(error) = &self.error {
            write!(
                f,
                "{} ({}, {}ms): {}",
                self.provider,
                reason,
                self.duration.as_millis(),
                error
            )
        } else {
            write!(f, "{} (ok, {}ms)", self.provider, self.duration.as_millis())
        }
    }
}

/// Every candidate failed or was skipped
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackExhaustedError {
    attempts: Vec<FallbackAttempt>,
}

impl FallbackExhaustedError {
    pub fn new(attempts: Vec<FallbackAttempt>) -> Self {
        Self { attempts }
    }

    pub fn attempts(&self) -> &[FallbackAttempt] {
        &self.attempts
    }

    pub fn into_attempts(self) -> Vec<FallbackAttempt> {
        self.attempts
    }

    /// True when no candidate was actually called
    pub fn all_skipped(&self) -> bool {
        self.attempts.iter().all(|a| a.skipped)
    }

    /// One line per attempt, for logs and error pages
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .enumerate()
            .map(|(i, a)| format!("  {}. {}", i + 1, a))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for FallbackExhaustedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "all {} fallback candidates failed:\n{}",
            self.attempts.len(),
            self.summary()
        )
    }
}

impl std::error::Error for FallbackExhaustedError {}

/// Failure of a whole `chat` / `chat_stream` call
#[derive(Debug, thiserror::Error)]
pub enum FailoverError {
    #[error("no providers configured")]
    NoProviders,

    #[error("request canceled by caller after {} attempt(s)", .attempts.len())]
    Canceled { attempts: Vec<FallbackAttempt> },

    /// A failure that would repeat on every other candidate
    #[error("{provider} failed with non-retriable {reason}: {source}")]
    NonRetriable {
        provider: String,
        reason: FailoverReason,
        #[source]
        source: ProviderError,
        attempts: Vec<FallbackAttempt>,
    },

    /// A streaming candidate failed after chunks reached the caller;
    /// switching providers would splice two answers together
    #[error("{provider} failed after streaming output ({reason}): {source}")]
    StreamInterrupted {
        provider: String,
        reason: FailoverReason,
        #[source]
        source: ProviderError,
        attempts: Vec<FallbackAttempt>,
    },

    #[error(transparent)]
    Exhausted(#[from] FallbackExhaustedError),
}

impl FailoverError {
    /// Attempts made before the call ended
    pub fn attempts(&self) -> &[FallbackAttempt] {
        match self {
            FailoverError::NoProviders => &[],
            FailoverError::Canceled { attempts } => attempts,
            FailoverError::NonRetriable { attempts, .. } => attempts,
            FailoverError::StreamInterrupted { attempts, .. } => attempts,
            FailoverError::Exhausted(e) => e.attempts(),
        }
    }

    /// Classified reason of the failure that ended the call early
    pub fn reason(&self) -> Option<FailoverReason> {
        match self {
            FailoverError::NonRetriable { reason, .. }
            | FailoverError::StreamInterrupted { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, FailoverError::Canceled { .. })
    }
}

/// A successful call: the value, who served it, and how we got there
#[derive(Debug, Clone)]
pub struct Routed<T> {
    pub value: T,
    pub provider: String,
    pub attempts: Vec<FallbackAttempt>,
}

impl<T> Routed<T> {
    /// True when the primary candidate did not serve the request
    pub fn used_fallback(&self) -> bool {
        self.attempts.len() > 1
    }
}
