//! Inter-provider load balancing and failover
//!
//! `LoadBalancer` owns one `ProviderState` per registered provider and a shared
//! `CooldownTracker`. Each `chat` / `chat_stream` call walks the caller's
//! ordered candidate list:
//!
//! - providers in cooldown are skipped (recorded, not counted as failures)
//! - unregistered names are recorded and skipped
//! - retriable failures start a cooldown and move on to the next candidate
//! - non-retriable failures and caller cancellation end the call immediately
//! - a stream that already emitted chunks is never failed over
//!
//! Every visited candidate leaves one `FallbackAttempt`. No lock is held while
//! a provider client is awaited.
//!
//! Production code is in this file, tests are organized in sibling modules:
//! - tests_failover: candidate walk, early abort and exhaustion
//! - tests_deadlines: per-kind timeouts and cancellation

mod state;

pub use state::ProviderStats;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::failover::{
    CooldownTracker, FailoverError, FallbackAttempt, FallbackExhaustedError, Routed, classify,
};
use crate::metrics::{AttemptOutcome, Metrics};
use crate::provider::{
    ChatClient, ProviderError, ProviderKind, StreamHandler, TrackingHandler, UnifiedRequest,
    UnifiedResponse,
};
use crate::request_id::RequestId;
use futures::FutureExt;
use futures::future::BoxFuture;
use state::ProviderState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Default per-attempt deadline for remote providers
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default per-attempt deadline for local inference
pub const DEFAULT_LOCAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-attempt deadlines by provider kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancerConfig {
    pub remote_timeout: Duration,
    pub local_timeout: Duration,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            local_timeout: DEFAULT_LOCAL_TIMEOUT,
        }
    }
}

impl BalancerConfig {
    pub fn timeout_for(&self, kind: ProviderKind) -> Duration {
        match kind {
            ProviderKind::Remote => self.remote_timeout,
            ProviderKind::Local => self.local_timeout,
        }
    }
}

/// Ordered failover across registered providers
pub struct LoadBalancer {
    providers: RwLock<HashMap<String, Arc<ProviderState>>>,
    cooldowns: CooldownTracker,
    config: BalancerConfig,
    metrics: Arc<Metrics>,
}

impl LoadBalancer {
    pub fn new(cooldowns: CooldownTracker, config: BalancerConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            cooldowns,
            config,
            metrics,
        }
    }

    /// Build an empty balancer with the tracker, deadlines and metrics from
    /// `config`; clients are registered by the host afterwards
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let metrics = Metrics::new()
            .map_err(|e| AppError::Internal(format!("Failed to create metrics: {}", e)))?;
        Ok(Self::new(
            CooldownTracker::new(config.cooldown_policy()),
            config.balancer_config(),
            Arc::new(metrics),
        ))
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Register a remote provider
    pub async fn register_provider(&self, name: impl Into<String>, client: Arc<dyn ChatClient>) {
        self.register_provider_with_kind(name, ProviderKind::Remote, client)
            .await;
    }

    /// Register a provider; an existing registration under the same name is replaced
    pub async fn register_provider_with_kind(
        &self,
        name: impl Into<String>,
        kind: ProviderKind,
        client: Arc<dyn ChatClient>,
    ) {
        let name = name.into();
        let state = Arc::new(ProviderState::new(name.clone(), kind, client));
        let previous = self.providers.write().await.insert(name.clone(), state);

        if previous.is_some() {
            tracing::warn!(provider = %name, kind = kind.as_str(), "Provider re-registered, counters reset");
        } else {
            tracing::info!(provider = %name, kind = kind.as_str(), "Provider registered");
        }
    }

    /// Registered provider names, sorted
    pub async fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Send `request` to the first candidate in `provider_order` that succeeds
    pub async fn chat<S: AsRef<str>>(
        &self,
        cancel: &CancellationToken,
        request: &UnifiedRequest,
        provider_order: &[S],
    ) -> Result<Routed<UnifiedResponse>, FailoverError> {
        self.run_failover(
            cancel,
            request,
            provider_order,
            move |client| async move { client.chat(request).await }.boxed(),
            || true,
        )
        .await
    }

    /// Streaming variant of `chat`; chunks go to `handler`
    ///
    /// Failover only happens before the first chunk. A candidate that fails
    /// after emitting output ends the call with
    /// [`FailoverError::StreamInterrupted`], so the handler only ever sees
    /// chunks from one provider.
    pub async fn chat_stream<S: AsRef<str>>(
        &self,
        cancel: &CancellationToken,
        request: &UnifiedRequest,
        handler: &dyn StreamHandler,
        provider_order: &[S],
    ) -> Result<Routed<()>, FailoverError> {
        let tracking = TrackingHandler::new(handler);
        let tracking = &tracking;
        self.run_failover(
            cancel,
            request,
            provider_order,
            move |client| async move { client.chat_stream(request, tracking).await }.boxed(),
            || !tracking.emitted(),
        )
        .await
    }

    async fn run_failover<'a, T, S: AsRef<str>>(
        &self,
        cancel: &CancellationToken,
        request: &UnifiedRequest,
        provider_order: &[S],
        mut call: impl FnMut(Arc<dyn ChatClient>) -> BoxFuture<'a, Result<T, ProviderError>>,
        can_fail_over: impl Fn() -> bool,
    ) -> Result<Routed<T>, FailoverError> {
        if provider_order.is_empty() {
            return Err(FailoverError::NoProviders);
        }

        let request_id = RequestId::new();
        let span = tracing::info_span!(
            "failover",
            request_id = %request_id,
            model = %request.model,
            candidates = provider_order.len()
        );

        async move {
            let model = request.model.as_str();
            let mut attempts = Vec::with_capacity(provider_order.len());

            for (index, name) in provider_order.iter().enumerate() {
                let name = name.as_ref();

                if cancel.is_cancelled() {
                    tracing::info!(
                        attempt = index,
                        "Request canceled before next candidate"
                    );
                    return Err(FailoverError::Canceled { attempts });
                }

                if let Some((remaining, reason)) = self.cooldowns.cooldown_status(name).await {
                    tracing::debug!(
                        provider = %name,
                        attempt = index,
                        cooldown_ms = remaining.as_millis() as u64,
                        "Skipping provider on cooldown"
                    );
                    self.count(name, AttemptOutcome::Skipped);
                    attempts.push(FallbackAttempt::skipped(
                        name,
                        model,
                        Some(reason),
                        remaining,
                    ));
                    continue;
                }

                let Some(state) = self.providers.read().await.get(name).cloned() else {
                    tracing::warn!(
                        provider = %name,
                        attempt = index,
                        "Provider in failover order is not registered"
                    );
                    self.count(name, AttemptOutcome::Unregistered);
                    attempts.push(FallbackAttempt::failed(
                        name,
                        model,
                        format!("provider {} is not registered", name),
                        None,
                        Duration::ZERO,
                    ));
                    continue;
                };

                let deadline = self.config.timeout_for(state.kind);
                state.begin_request().await;
                let started = Instant::now();

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = tokio::time::timeout(deadline, call(Arc::clone(&state.client))) => Some(result),
                };

                let elapsed = started.elapsed();
                self.metrics.report(
                    "record_attempt_duration",
                    self.metrics
                        .record_attempt_duration(name, elapsed.as_secs_f64() * 1000.0),
                );

                let result = match outcome {
                    None => {
                        tracing::info!(
                            provider = %name,
                            attempt = index,
                            duration_ms = elapsed.as_millis() as u64,
                            "Request canceled during provider call"
                        );
                        self.count(name, AttemptOutcome::Canceled);
                        attempts.push(FallbackAttempt::failed(
                            name,
                            model,
                            "canceled by caller".to_string(),
                            None,
                            elapsed,
                        ));
                        return Err(FailoverError::Canceled { attempts });
                    }
                    Some(Ok(result)) => result,
                    Some(Err(_)) => Err(ProviderError::Timeout { after: deadline }),
                };

                match result {
                    Ok(value) => {
                        self.cooldowns.mark_success(name).await;
                        state.record_success().await;
                        self.count(name, AttemptOutcome::Success);
                        attempts.push(FallbackAttempt::succeeded(name, model, elapsed));

                        if index > 0 {
                            tracing::info!(
                                provider = %name,
                                attempt = index,
                                duration_ms = elapsed.as_millis() as u64,
                                "Request served by fallback provider"
                            );
                        } else {
                            tracing::debug!(
                                provider = %name,
                                duration_ms = elapsed.as_millis() as u64,
                                "Request served by primary provider"
                            );
                        }

                        return Ok(Routed {
                            value,
                            provider: name.to_string(),
                            attempts,
                        });
                    }
                    Err(error) => {
                        let classification = classify(&error, name, model);
                        state.record_failure().await;
                        self.count(name, AttemptOutcome::Failure);
                        attempts.push(FallbackAttempt::failed(
                            name,
                            model,
                            error.to_string(),
                            Some(classification.reason),
                            elapsed,
                        ));

                        if !classification.retriable {
                            tracing::error!(
                                provider = %name,
                                attempt = index,
                                reason = %classification.reason,
                                error = %error,
                                "Non-retriable provider failure, aborting failover"
                            );
                            return Err(FailoverError::NonRetriable {
                                provider: name.to_string(),
                                reason: classification.reason,
                                source: error,
                                attempts,
                            });
                        }

                        let cooldown = self
                            .cooldowns
                            .mark_failure(name, classification.reason)
                            .await;
                        self.metrics.report(
                            "record_cooldown",
                            self.metrics.record_cooldown(classification.reason),
                        );

                        if !can_fail_over() {
                            tracing::error!(
                                provider = %name,
                                attempt = index,
                                reason = %classification.reason,
                                cooldown_ms = cooldown.as_millis() as u64,
                                error = %error,
                                "Provider failed mid-stream, not failing over"
                            );
                            return Err(FailoverError::StreamInterrupted {
                                provider: name.to_string(),
                                reason: classification.reason,
                                source: error,
                                attempts,
                            });
                        }

                        tracing::warn!(
                            provider = %name,
                            attempt = index,
                            reason = %classification.reason,
                            cooldown_ms = cooldown.as_millis() as u64,
                            duration_ms = elapsed.as_millis() as u64,
                            error = %error,
                            "Provider failed, trying next candidate"
                        );
                    }
                }
            }

            let exhausted = FallbackExhaustedError::new(attempts);
            self.metrics.record_fallback_exhausted();
            tracing::error!(
                all_skipped = exhausted.all_skipped(),
                "All fallback candidates failed:\n{}",
                exhausted.summary()
            );
            Err(FailoverError::Exhausted(exhausted))
        }
        .instrument(span)
        .await
    }

    fn count(&self, provider: &str, outcome: AttemptOutcome) {
        self.metrics.report(
            "record_attempt",
            self.metrics.record_attempt(provider, outcome),
        );
    }

    /// Counters and cooldown state for every registered provider
    pub async fn get_stats(&self) -> HashMap<String, ProviderStats> {
        let providers: Vec<Arc<ProviderState>> =
            self.providers.read().await.values().cloned().collect();

        let mut stats = HashMap::with_capacity(providers.len());
        for state in providers {
            let counters = state.counters().await;
            let name = state.name.clone();
            stats.insert(
                name.clone(),
                ProviderStats {
                    kind: state.kind,
                    request_count: counters.request_count,
                    success_count: counters.success_count,
                    failure_count: counters.failure_count,
                    last_success: counters.last_success,
                    last_failure: counters.last_failure,
                    consecutive_errors: self.cooldowns.error_count(&name).await,
                    cooldown_remaining_ms: self.cooldowns.cooldown_remaining(&name).await.as_millis()
                        as u64,
                    available: self.cooldowns.is_available(&name).await,
                    last_reason: self.cooldowns.last_reason(&name).await,
                    name,
                },
            );
        }
        stats
    }
}

#[cfg(test)]
mod tests_failover;
