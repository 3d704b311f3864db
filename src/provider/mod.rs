//! Provider client capability consumed by the failover engine
//!
//! The engine never speaks a provider's wire format. Concrete clients
//! (OpenAI-compatible, Anthropic-compatible, local inference servers, ...) live
//! in the surrounding host and are handed to the engine as `Arc<dyn ChatClient>`.
//! This module only defines the narrow request/response envelope and the error
//! shape those clients report back, which is what the classifier inspects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether a provider is hosted remotely or runs self-hosted inference
///
/// Local inference is slower but cheap to retry, so it gets a longer
/// per-attempt deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Remote,
    Local,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Remote => "remote",
            ProviderKind::Local => "local",
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

/// Provider-neutral chat request
///
/// Only `model` is interpreted by the engine (for logging and attempt records).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct UnifiedRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl UnifiedRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }
}

/// Provider-neutral chat response
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct UnifiedResponse {
    pub model: String,
    pub content: String,
}

/// One incremental piece of a streamed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            delta: String::new(),
            done: true,
        }
    }
}

/// Sink for incremental tokens produced by `ChatClient::chat_stream`
pub trait StreamHandler: Send + Sync {
    fn on_chunk(&self, chunk: StreamChunk);
}

impl StreamHandler for tokio::sync::mpsc::UnboundedSender<StreamChunk> {
    fn on_chunk(&self, chunk: StreamChunk) {
        // A dropped receiver means the caller stopped listening; nothing to do.
        let _ = self.send(chunk);
    }
}

/// Forwards chunks and remembers whether any reached the caller
pub(crate) struct TrackingHandler<'a> {
    inner: &'a dyn StreamHandler,
    emitted: AtomicBool,
}

impl<'a> TrackingHandler<'a> {
    pub(crate) fn new(inner: &'a dyn StreamHandler) -> Self {
        Self {
            inner,
            emitted: AtomicBool::new(false),
        }
    }

    pub(crate) fn emitted(&self) -> bool {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl StreamHandler for TrackingHandler<'_> {
    fn on_chunk(&self, chunk: StreamChunk) {
        self.emitted.store(true, Ordering::Relaxed);
        self.inner.on_chunk(chunk);
    }
}

/// Errors reported by provider clients
///
/// Carries the HTTP status and body text when the upstream answered, so the
/// classifier can key off both.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Request timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Content policy violation: {0}")]
    ContentPolicy(String),

    /// Every credential of a rotating provider is quarantined
    #[error("Credentials exhausted: {0}")]
    CredentialsExhausted(String),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Chat capability of one upstream provider
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, request: &UnifiedRequest) -> Result<UnifiedResponse, ProviderError>;

    async fn chat_stream(
        &self,
        request: &UnifiedRequest,
        handler: &dyn StreamHandler,
    ) -> Result<(), ProviderError>;
}
