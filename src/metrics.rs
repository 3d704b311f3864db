//! Prometheus metrics for the failover engine
//!
//! Tracks:
//! - Attempts per provider and outcome
//! - Attempt latency per provider
//! - Cooldowns started, by reason
//! - Requests where every candidate failed
//! - Credential profiles quarantined, per provider
//!
//! All label values come from configuration (provider names) or closed enums,
//! so cardinality is bounded.

use crate::failover::FailoverReason;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Outcome label for `relaygate_attempts_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
    /// Provider was on cooldown and not called
    Skipped,
    /// Provider named in the order but never registered
    Unregistered,
    /// Caller canceled while this attempt was in flight
    Canceled,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure => "failure",
            AttemptOutcome::Skipped => "skipped",
            AttemptOutcome::Unregistered => "unregistered",
            AttemptOutcome::Canceled => "canceled",
        }
    }
}

/// Metrics collector for the failover engine
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    attempts_total: IntCounterVec,
    attempt_duration: HistogramVec,
    cooldowns_total: IntCounterVec,
    fallback_exhausted: IntCounter,
    profile_cooldowns_total: IntCounterVec,
    metrics_recording_failures: IntCounterVec,
}

impl Metrics {
    /// Create a collector with its own registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Cardinality: N providers x 5 outcomes
        let attempts_total = IntCounterVec::new(
            Opts::new(
                "relaygate_attempts_total",
                "Provider attempts made during failover, by provider and outcome",
            ),
            &["provider", "outcome"],
        )?;

        let attempt_duration = HistogramVec::new(
            HistogramOpts::new(
                "relaygate_attempt_duration_ms",
                "Latency of a single provider attempt in milliseconds",
            )
            .buckets(vec![
                10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 15000.0, 60000.0,
            ]),
            &["provider"],
        )?;

        // Cardinality: 7 reasons
        let cooldowns_total = IntCounterVec::new(
            Opts::new(
                "relaygate_cooldowns_total",
                "Provider cooldown windows started, by failure reason",
            ),
            &["reason"],
        )?;

        let fallback_exhausted = IntCounter::with_opts(Opts::new(
            "relaygate_fallback_exhausted_total",
            "Requests where every candidate provider failed or was skipped",
        ))?;

        let profile_cooldowns_total = IntCounterVec::new(
            Opts::new(
                "relaygate_profile_cooldowns_total",
                "Credential profiles placed on cooldown, by provider",
            ),
            &["provider"],
        )?;

        let metrics_recording_failures = IntCounterVec::new(
            Opts::new(
                "relaygate_metrics_recording_failures_total",
                "Metrics recording operation failures by operation. \
                Indicates Prometheus internal errors; requests are unaffected.",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(attempts_total.clone()))?;
        registry.register(Box::new(attempt_duration.clone()))?;
        registry.register(Box::new(cooldowns_total.clone()))?;
        registry.register(Box::new(fallback_exhausted.clone()))?;
        registry.register(Box::new(profile_cooldowns_total.clone()))?;
        registry.register(Box::new(metrics_recording_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            attempts_total,
            attempt_duration,
            cooldowns_total,
            fallback_exhausted,
            profile_cooldowns_total,
            metrics_recording_failures,
        })
    }

    /// Count one attempt against a provider
    pub fn record_attempt(
        &self,
        provider: &str,
        outcome: AttemptOutcome,
    ) -> Result<(), prometheus::Error> {
        self.attempts_total
            .get_metric_with_label_values(&[provider, outcome.as_str()])?
            .inc();
        Ok(())
    }

    /// Observe attempt latency
    ///
    /// # Errors
    ///
    /// Returns an error if `duration_ms` is NaN, infinite or negative, since
    /// such values corrupt every histogram percentile.
    pub fn record_attempt_duration(
        &self,
        provider: &str,
        duration_ms: f64,
    ) -> Result<(), prometheus::Error> {
        if !duration_ms.is_finite() {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be finite (not NaN or Infinity), got: {}",
                duration_ms
            )));
        }
        if duration_ms < 0.0 {
            return Err(prometheus::Error::Msg(format!(
                "Histogram value must be non-negative, got: {}",
                duration_ms
            )));
        }

        self.attempt_duration
            .get_metric_with_label_values(&[provider])?
            .observe(duration_ms);
        Ok(())
    }

    /// Count a provider cooldown window
    pub fn record_cooldown(&self, reason: FailoverReason) -> Result<(), prometheus::Error> {
        self.cooldowns_total
            .get_metric_with_label_values(&[reason.as_str()])?
            .inc();
        Ok(())
    }

    pub fn record_fallback_exhausted(&self) {
        self.fallback_exhausted.inc();
    }

    pub fn fallback_exhausted_count(&self) -> u64 {
        self.fallback_exhausted.get()
    }

    /// Count a credential profile quarantine
    pub fn record_profile_cooldown(&self, provider: &str) -> Result<(), prometheus::Error> {
        self.profile_cooldowns_total
            .get_metric_with_label_values(&[provider])?
            .inc();
        Ok(())
    }

    /// Count a failed `record_*` call
    ///
    /// `operation` is the name of the method that failed, e.g. "record_attempt".
    pub fn metrics_recording_failure(&self, operation: &str) {
        self.metrics_recording_failures
            .with_label_values(&[operation])
            .inc();
    }

    /// Total recording failures across all operations
    pub fn metrics_recording_failures_count(&self) -> u64 {
        self.registry
            .gather()
            .iter()
            .find(|mf| mf.name() == "relaygate_metrics_recording_failures_total")
            .map(|mf| {
                mf.get_metric()
                    .iter()
                    .map(|m| m.counter.value.unwrap_or(0.0) as u64)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Log-and-count a `record_*` failure; metrics never fail a request
    pub(crate) fn report(&self, operation: &str, result: Result<(), prometheus::Error>) {
        if let Err(e) = result {
            tracing::error!(
                error = %e,
                operation = operation,
                "Metrics recording failed (non-fatal). Request will continue."
            );
            self.metrics_recording_failure(operation);
        }
    }

    /// Encode every metric in Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or produces invalid UTF-8.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    metric_family_count = metric_count,
                    "Prometheus text encoder failed"
                );
                prometheus::Error::Msg(format!(
                    "Failed to encode {} metric families: {}",
                    metric_count, e
                ))
            })?;

        String::from_utf8(buffer).map_err(|e| {
            let valid_up_to = e.utf8_error().valid_up_to();
            tracing::error!(
                invalid_byte_index = valid_up_to,
                "Prometheus encoder produced invalid UTF-8"
            );
            prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8 at byte {}: {}",
                valid_up_to, e
            ))
        })
    }
}
