//! Failure classification
//!
//! Maps a `ProviderError` to a `FailoverReason` and decides whether trying a
//! different candidate can help. Classification is type-based first (HTTP
//! status, explicit variants) and only falls back to body-text markers when the
//! status alone is ambiguous or absent.

use crate::provider::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a target failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    RateLimit,
    Timeout,
    ServerError,
    AuthError,
    InvalidRequest,
    ContentPolicy,
    Unknown,
}

impl FailoverReason {
    /// All reasons, in declaration order
    pub const ALL: [FailoverReason; 7] = [
        FailoverReason::RateLimit,
        FailoverReason::Timeout,
        FailoverReason::ServerError,
        FailoverReason::AuthError,
        FailoverReason::InvalidRequest,
        FailoverReason::ContentPolicy,
        FailoverReason::Unknown,
    ];

    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            FailoverReason::RateLimit => "rate_limit",
            FailoverReason::Timeout => "timeout",
            FailoverReason::ServerError => "server_error",
            FailoverReason::AuthError => "auth_error",
            FailoverReason::InvalidRequest => "invalid_request",
            FailoverReason::ContentPolicy => "content_policy",
            FailoverReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub reason: FailoverReason,
    pub retriable: bool,
}

impl Classification {
    fn retriable(reason: FailoverReason) -> Self {
        Self {
            reason,
            retriable: true,
        }
    }

    fn fatal(reason: FailoverReason) -> Self {
        Self {
            reason,
            retriable: false,
        }
    }

    /// Whether the failing credential should be quarantined
    ///
    /// Only retriable failures that indicate the key or its upstream is
    /// saturated qualify. A timeout says little about the key itself.
    pub fn should_cooldown(&self) -> bool {
        self.retriable
            && matches!(
                self.reason,
                FailoverReason::RateLimit | FailoverReason::ServerError
            )
    }
}

const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
    "quota",
    "throttl",
    "overloaded",
];

const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout", "deadline exceeded"];

const CONTENT_POLICY_MARKERS: &[&str] = &[
    "content_policy",
    "content policy",
    "content_filter",
    "content filter",
    "safety system",
    "flagged",
];

const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "forbidden",
    "invalid api key",
    "invalid_api_key",
    "authentication",
    "permission denied",
];

const INVALID_REQUEST_MARKERS: &[&str] = &[
    "invalid request",
    "invalid_request",
    "bad request",
    "validation",
    "context_length_exceeded",
];

const SERVER_ERROR_MARKERS: &[&str] = &[
    "server error",
    "bad gateway",
    "service unavailable",
];

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| haystack.contains(m))
}

/// Classify a provider failure
///
/// `provider` and `model` are only used for tracing; the result depends on
/// `error` alone.
pub fn classify(error: &ProviderError, provider: &str, model: &str) -> Classification {
    let classification = match error {
        ProviderError::Http { status, message } => classify_http(*status, message),
        ProviderError::Timeout { .. } => Classification::retriable(FailoverReason::Timeout),
        ProviderError::Network(message) => {
            if contains_any(&message.to_lowercase(), TIMEOUT_MARKERS) {
                Classification::retriable(FailoverReason::Timeout)
            } else {
                // Connection refused/reset: the next candidate may be reachable.
                Classification::retriable(FailoverReason::Unknown)
            }
        }
        ProviderError::ContentPolicy(_) => Classification::fatal(FailoverReason::ContentPolicy),
        ProviderError::CredentialsExhausted(_) => {
            Classification::retriable(FailoverReason::RateLimit)
        }
        ProviderError::Other(message) => classify_text(message),
    };

    tracing::debug!(
        provider = %provider,
        model = %model,
        reason = %classification.reason,
        retriable = classification.retriable,
        error = %error,
        "Classified provider failure"
    );

    classification
}

fn classify_http(status: u16, message: &str) -> Classification {
    classify_status(status, &message.to_lowercase()).unwrap_or_else(|| classify_text(message))
}

/// Statuses with a fixed meaning; anything else is decided by the body text
fn classify_status(status: u16, lower: &str) -> Option<Classification> {
    let classification = match status {
        429 => Classification::retriable(FailoverReason::RateLimit),
        408 => Classification::retriable(FailoverReason::Timeout),
        401 | 403 => Classification::fatal(FailoverReason::AuthError),
        400 | 422 => {
            if contains_any(lower, CONTENT_POLICY_MARKERS) {
                Classification::fatal(FailoverReason::ContentPolicy)
            } else {
                Classification::fatal(FailoverReason::InvalidRequest)
            }
        }
        500..=599 => Classification::retriable(FailoverReason::ServerError),
        _ => return None,
    };
    Some(classification)
}

/// Words that mark the following number as an HTTP status
const STATUS_CONTEXT: &[&str] = &["status", "code", "error", "returned"];

/// HTTP status quoted in error text, e.g. "status 429", "HTTP/1.1 503",
/// `{"code": 401}`
///
/// A number counts only as a standalone three-digit token right after a
/// status word, so token counts, request ids and model versions never match.
fn status_in_text(lower: &str) -> Option<u16> {
    let tokens: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || "\"'`:,;=()[]{}".contains(c))
        .filter(|t| !t.is_empty())
        .collect();

    tokens.iter().enumerate().skip(1).find_map(|(i, token)| {
        let token = token.trim_end_matches(['.', '!']);
        if token.len() != 3 || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let prev = tokens[i - 1];
        let after_status_word =
            prev.starts_with("http") || STATUS_CONTEXT.iter().any(|w| prev.ends_with(w));
        if !after_status_word {
            return None;
        }
        token
            .parse::<u16>()
            .ok()
            .filter(|status| (100..=599).contains(status))
    })
}

/// Classification from free-form error text, used when no status is available
fn classify_text(message: &str) -> Classification {
    let lower = message.to_lowercase();

    if let Some(classification) = status_in_text(&lower).and_then(|s| classify_status(s, &lower))
    {
        return classification;
    }

    if contains_any(&lower, RATE_LIMIT_MARKERS) {
        Classification::retriable(FailoverReason::RateLimit)
    } else if contains_any(&lower, TIMEOUT_MARKERS) {
        Classification::retriable(FailoverReason::Timeout)
    } else if contains_any(&lower, CONTENT_POLICY_MARKERS) {
        Classification::fatal(FailoverReason::ContentPolicy)
    } else if contains_any(&lower, AUTH_MARKERS) {
        Classification::fatal(FailoverReason::AuthError)
    } else if contains_any(&lower, INVALID_REQUEST_MARKERS) {
        Classification::fatal(FailoverReason::InvalidRequest)
    } else if contains_any(&lower, SERVER_ERROR_MARKERS) {
        Classification::retriable(FailoverReason::ServerError)
    } else {
        Classification::retriable(FailoverReason::Unknown)
    }
}
