//! Per-target cooldown tracking
//!
//! Each target (provider name or profile name) has an independent record of
//! consecutive failures and a cooldown deadline. While the deadline lies in the
//! future the target is unavailable.
//!
//! - failure k → cooldown of `base(reason) * 2^(k-1)`, capped at `max_cooldown`
//! - one success → record reset, immediately available again
//!
//! Uses `tokio::time::Instant` so paused-clock tests can advance time.

use crate::failover::classifier::FailoverReason;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default ceiling for any single cooldown window
pub const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(300);

/// Backoff policy: a base duration per reason plus a hard ceiling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownPolicy {
    rate_limit: Duration,
    timeout: Duration,
    server_error: Duration,
    auth_error: Duration,
    invalid_request: Duration,
    content_policy: Duration,
    unknown: Duration,
    max_cooldown: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            rate_limit: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            server_error: Duration::from_secs(5),
            auth_error: Duration::from_secs(60),
            invalid_request: Duration::from_secs(5),
            content_policy: Duration::from_secs(5),
            unknown: Duration::from_secs(5),
            max_cooldown: DEFAULT_MAX_COOLDOWN,
        }
    }
}

impl CooldownPolicy {
    /// Override the base duration for one reason
    pub fn with_base(mut self, reason: FailoverReason, base: Duration) -> Self {
        *self.base_mut(reason) = base;
        self
    }

    /// Override the ceiling
    pub fn with_max_cooldown(mut self, max_cooldown: Duration) -> Self {
        self.max_cooldown = max_cooldown;
        self
    }

    pub fn base(&self, reason: FailoverReason) -> Duration {
        match reason {
            FailoverReason::RateLimit => self.rate_limit,
            FailoverReason::Timeout => self.timeout,
            FailoverReason::ServerError => self.server_error,
            FailoverReason::AuthError => self.auth_error,
            FailoverReason::InvalidRequest => self.invalid_request,
            FailoverReason::ContentPolicy => self.content_policy,
            FailoverReason::Unknown => self.unknown,
        }
    }

    fn base_mut(&mut self, reason: FailoverReason) -> &mut Duration {
        match reason {
            FailoverReason::RateLimit => &mut self.rate_limit,
            FailoverReason::Timeout => &mut self.timeout,
            FailoverReason::ServerError => &mut self.server_error,
            FailoverReason::AuthError => &mut self.auth_error,
            FailoverReason::InvalidRequest => &mut self.invalid_request,
            FailoverReason::ContentPolicy => &mut self.content_policy,
            FailoverReason::Unknown => &mut self.unknown,
        }
    }

    pub fn max_cooldown(&self) -> Duration {
        self.max_cooldown
    }

    /// Cooldown for the `consecutive_failures`-th failure in a row (1-indexed)
    ///
    /// `base * 2^(n-1)` with saturating arithmetic, never above `max_cooldown`.
    /// `n = 0` is treated as `n = 1`.
    pub fn backoff(&self, reason: FailoverReason, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(31);
        let base_ms = u64::try_from(self.base(reason).as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_cooldown.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(
            base_ms
                .saturating_mul(2_u64.saturating_pow(exponent))
                .min(max_ms),
        )
    }
}

/// Cooldown state for one target
///
/// Fields are private so the failure/deadline invariants can only change
/// through the tracker.
#[derive(Debug, Clone)]
pub struct CooldownRecord {
    consecutive_failures: u32,
    cooldown_until: Instant,
    last_reason: FailoverReason,
}

impl CooldownRecord {
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn cooldown_until(&self) -> Instant {
        self.cooldown_until
    }

    pub fn last_reason(&self) -> FailoverReason {
        self.last_reason
    }

    fn is_available_at(&self, now: Instant) -> bool {
        now >= self.cooldown_until
    }
}

/// Tracks cooldown windows for any number of named targets
///
/// Cloning is cheap and shares state.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    records: Arc<RwLock<HashMap<String, CooldownRecord>>>,
    policy: Arc<CooldownPolicy>,
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(CooldownPolicy::default())
    }
}

impl CooldownTracker {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &CooldownPolicy {
        &self.policy
    }

    /// True iff the target has no record or its cooldown has elapsed
    pub async fn is_available(&self, name: &str) -> bool {
        let now = Instant::now();
        let records = self.records.read().await;
        records
            .get(name)
            .map(|r| r.is_available_at(now))
            .unwrap_or(true)
    }

    /// Time left until the target becomes available (zero when available)
    pub async fn cooldown_remaining(&self, name: &str) -> Duration {
        let now = Instant::now();
        let records = self.records.read().await;
        records
            .get(name)
            .map(|r| r.cooldown_until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Current consecutive failure count
    pub async fn error_count(&self, name: &str) -> u32 {
        let records = self.records.read().await;
        records
            .get(name)
            .map(|r| r.consecutive_failures)
            .unwrap_or(0)
    }

    /// Reason recorded with the most recent failure, if the target has failed
    /// since its last success
    pub async fn last_reason(&self, name: &str) -> Option<FailoverReason> {
        let records = self.records.read().await;
        records
            .get(name)
            .filter(|r| r.consecutive_failures > 0)
            .map(|r| r.last_reason)
    }

    /// Remaining cooldown and last failure reason of a cooling target
    ///
    /// Both values come from one read of the record, so they always agree.
    /// `None` when the target is available.
    pub async fn cooldown_status(&self, name: &str) -> Option<(Duration, FailoverReason)> {
        let now = Instant::now();
        let records = self.records.read().await;
        records
            .get(name)
            .filter(|r| !r.is_available_at(now))
            .map(|r| (r.cooldown_until.saturating_duration_since(now), r.last_reason))
    }

    /// Record a success: resets failures and clears any cooldown
    pub async fn mark_success(&self, name: &str) {
        let mut records = self.records.write().await;

        if let Some(record) = records.remove(name) {
            if record.consecutive_failures > 0 {
                tracing::info!(
                    target_name = %name,
                    previous_failures = record.consecutive_failures,
                    last_reason = %record.last_reason,
                    "Target recovered, cooldown cleared"
                );
            }
        }
    }

    /// Record a failure and start (or extend) the cooldown window
    ///
    /// Returns the cooldown applied by this failure.
    pub async fn mark_failure(&self, name: &str, reason: FailoverReason) -> Duration {
        let now = Instant::now();
        let mut records = self.records.write().await;

        let record = records
            .entry(name.to_string())
            .or_insert_with(|| CooldownRecord {
                consecutive_failures: 0,
                cooldown_until: now,
                last_reason: reason,
            });

        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_reason = reason;

        let backoff = self.policy.backoff(reason, record.consecutive_failures);
        let candidate = now + backoff;
        // A shorter-based reason must not pull an existing deadline forward.
        if candidate > record.cooldown_until {
            record.cooldown_until = candidate;
        }

        let remaining = record.cooldown_until.saturating_duration_since(now);
        tracing::warn!(
            target_name = %name,
            reason = %reason,
            consecutive_failures = record.consecutive_failures,
            cooldown_ms = remaining.as_millis() as u64,
            "Target placed on cooldown"
        );

        remaining
    }

    /// Snapshot of every tracked target
    pub async fn snapshot(&self) -> HashMap<String, CooldownRecord> {
        self.records.read().await.clone()
    }
}
