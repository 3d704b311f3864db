//! Per-call request IDs for log correlation
//!
//! Every `LoadBalancer::chat` / `chat_stream` call opens a tracing span
//! carrying a fresh `RequestId`, so all attempt, cooldown and classification
//! events of one call can be grouped.

use uuid::Uuid;

/// Request ID wrapper type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a new random request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
