//! Per-provider bookkeeping owned by the load balancer

use crate::failover::FailoverReason;
use crate::provider::{ChatClient, ProviderKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub(crate) struct ProviderCounters {
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_success: Option<SystemTime>,
    pub last_failure: Option<SystemTime>,
}

/// A registered provider: its client plus request counters
///
/// Counters sit behind their own lock so updating them never blocks the
/// provider map, and the guard is never held across a client call.
pub(crate) struct ProviderState {
    pub name: String,
    pub kind: ProviderKind,
    pub client: Arc<dyn ChatClient>,
    counters: RwLock<ProviderCounters>,
}

impl ProviderState {
    pub fn new(name: String, kind: ProviderKind, client: Arc<dyn ChatClient>) -> Self {
        Self {
            name,
            kind,
            client,
            counters: RwLock::new(ProviderCounters::default()),
        }
    }

    pub async fn begin_request(&self) {
        let mut counters = self.counters.write().await;
        counters.request_count = counters.request_count.saturating_add(1);
    }

    pub async fn record_success(&self) {
        let mut counters = self.counters.write().await;
        counters.success_count = counters.success_count.saturating_add(1);
        counters.last_success = Some(SystemTime::now());
    }

    pub async fn record_failure(&self) {
        let mut counters = self.counters.write().await;
        counters.failure_count = counters.failure_count.saturating_add(1);
        counters.last_failure = Some(SystemTime::now());
    }

    pub async fn counters(&self) -> ProviderCounters {
        self.counters.read().await.clone()
    }
}

/// Read model of one provider returned by `LoadBalancer::get_stats`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStats {
    pub name: String,
    pub kind: ProviderKind,
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_success: Option<SystemTime>,
    pub last_failure: Option<SystemTime>,
    /// Consecutive failures since the last success
    pub consecutive_errors: u32,
    pub cooldown_remaining_ms: u64,
    pub available: bool,
    pub last_reason: Option<FailoverReason>,
}
