//! Credential rotation within one provider
//!
//! Picks which API-key profile backs the next request and quarantines keys
//! that hit rate limits or server errors.
//!
//! Production code is in this file, tests are organized in sibling modules:
//! - tests_strategies: round-robin, least-used and random selection
//! - tests_cooldown: quarantine, degraded mode and reset

mod client;
mod profile;

pub use client::{KeyedClient, RotatingClient};
pub use profile::{Profile, ProfileStatus};
pub(crate) use profile::mask_key;

use crate::failover::{Classification, classify};
use crate::metrics::Metrics;
use crate::provider::ProviderError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default quarantine applied to a failing profile
pub const DEFAULT_PROFILE_COOLDOWN: Duration = Duration::from_secs(60);

/// How the next profile is chosen among available ones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    LeastUsed,
    Random,
}

impl RotationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationStrategy::RoundRobin => "round_robin",
            RotationStrategy::LeastUsed => "least_used",
            RotationStrategy::Random => "random",
        }
    }
}

/// Rotation behaviour for one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationConfig {
    /// When false, profile 0 is always used
    pub enabled: bool,
    pub strategy: RotationStrategy,
    /// Fixed quarantine applied by `handle_error`
    pub cooldown_period: Duration,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RotationStrategy::default(),
            cooldown_period: DEFAULT_PROFILE_COOLDOWN,
        }
    }
}

/// Errors returned by `RotationManager::get_next_profile`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RotationError {
    #[error("no profiles available")]
    NoProfiles,

    #[error("primary profile on cooldown ({}ms remaining)", .remaining.as_millis())]
    PrimaryOnCooldown { remaining: Duration },

    #[error("all profiles on cooldown (next available in {}ms)", .next_available_in.as_millis())]
    AllOnCooldown { next_available_in: Duration },
}

impl From<RotationError> for ProviderError {
    fn from(err: RotationError) -> Self {
        match err {
            RotationError::NoProfiles => ProviderError::Other(err.to_string()),
            RotationError::PrimaryOnCooldown { .. } | RotationError::AllOnCooldown { .. } => {
                ProviderError::CredentialsExhausted(err.to_string())
            }
        }
    }
}

struct RotationState {
    profiles: Vec<Profile>,
    /// Pool index where the next round-robin scan starts
    cursor: usize,
    rng: StdRng,
}

/// Manages the credential pool of one logical provider
pub struct RotationManager {
    provider: String,
    config: RotationConfig,
    state: RwLock<RotationState>,
    metrics: Option<Arc<Metrics>>,
}

impl RotationManager {
    /// Create an empty manager; the RNG is seeded once from the OS
    pub fn new(provider: impl Into<String>, config: RotationConfig) -> Self {
        Self::with_rng(provider, config, StdRng::from_os_rng())
    }

    /// Create an empty manager with a deterministic RNG
    pub fn with_seed(provider: impl Into<String>, config: RotationConfig, seed: u64) -> Self {
        Self::with_rng(provider, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(provider: impl Into<String>, config: RotationConfig, rng: StdRng) -> Self {
        Self {
            provider: provider.into(),
            config,
            state: RwLock::new(RotationState {
                profiles: Vec::new(),
                cursor: 0,
                rng,
            }),
            metrics: None,
        }
    }

    /// Seed the pool before the manager is shared
    pub fn with_profiles(mut self, profiles: impl IntoIterator<Item = Profile>) -> Self {
        self.state.get_mut().profiles.extend(profiles);
        self
    }

    /// Count profile quarantines in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Append a profile to the pool
    ///
    /// Names are not checked for duplicates; config validation does that.
    pub async fn add_profile(&self, profile: Profile) {
        let mut state = self.state.write().await;
        tracing::debug!(
            provider = %self.provider,
            profile = %profile.name(),
            priority = profile.priority(),
            pool_size = state.profiles.len() + 1,
            "Profile added to rotation pool"
        );
        state.profiles.push(profile);
    }

    /// Choose the profile for the next request
    ///
    /// Returns a snapshot; outcomes are reported back by name through
    /// `record_success` / `handle_error`.
    pub async fn get_next_profile(&self) -> Result<Profile, RotationError> {
        let now = Instant::now();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if state.profiles.is_empty() {
            return Err(RotationError::NoProfiles);
        }

        if !self.config.enabled {
            let primary = &mut state.profiles[0];
            if !primary.is_available_at(now) {
                let remaining = primary.cooldown_remaining_at(now);
                tracing::warn!(
                    provider = %self.provider,
                    profile = %primary.name(),
                    remaining_ms = remaining.as_millis() as u64,
                    "Rotation disabled and primary profile is on cooldown"
                );
                return Err(RotationError::PrimaryOnCooldown { remaining });
            }
            primary.last_used = Some(now);
            return Ok(primary.clone());
        }

        let available: Vec<usize> = state
            .profiles
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_available_at(now))
            .map(|(i, _)| i)
            .collect();

        if available.is_empty() {
            let next_available_in = state
                .profiles
                .iter()
                .map(|p| p.cooldown_remaining_at(now))
                .min()
                .unwrap_or(Duration::ZERO);
            tracing::warn!(
                provider = %self.provider,
                pool_size = state.profiles.len(),
                next_available_ms = next_available_in.as_millis() as u64,
                "All profiles on cooldown"
            );
            return Err(RotationError::AllOnCooldown { next_available_in });
        }

        let index = match self.config.strategy {
            RotationStrategy::RoundRobin => {
                let len = state.profiles.len();
                // `available` is non-empty, so some offset hits an available profile.
                let index = (0..len)
                    .map(|offset| (state.cursor + offset) % len)
                    .find(|i| state.profiles[*i].is_available_at(now))
                    .unwrap_or(available[0]);
                state.cursor = (index + 1) % len;
                index
            }
            RotationStrategy::LeastUsed => available
                .iter()
                .copied()
                .min_by_key(|i| state.profiles[*i].request_count)
                .unwrap_or(available[0]),
            RotationStrategy::Random => available[state.rng.random_range(0..available.len())],
        };

        let profile = &mut state.profiles[index];
        profile.last_used = Some(now);

        tracing::debug!(
            provider = %self.provider,
            profile = %profile.name(),
            strategy = self.config.strategy.as_str(),
            available = available.len(),
            request_count = profile.request_count,
            "Selected credential profile"
        );

        Ok(profile.clone())
    }

    /// Classify a failure and quarantine the profile when it warrants it
    pub async fn handle_error(&self, profile_name: &str, error: &ProviderError) -> Classification {
        let classification = classify(error, &self.provider, "");

        if !classification.should_cooldown() {
            return classification;
        }

        let until = Instant::now() + self.config.cooldown_period;
        let mut state = self.state.write().await;
        match state.profiles.iter_mut().find(|p| p.name() == profile_name) {
            Some(profile) => {
                profile.cooldown_until = Some(until);
                profile.last_error = Some(classification.reason);
                tracing::warn!(
                    provider = %self.provider,
                    profile = %profile_name,
                    reason = %classification.reason,
                    cooldown_ms = self.config.cooldown_period.as_millis() as u64,
                    "Profile placed on cooldown"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.report(
                        "record_profile_cooldown",
                        metrics.record_profile_cooldown(&self.provider),
                    );
                }
            }
            None => {
                tracing::warn!(
                    provider = %self.provider,
                    profile = %profile_name,
                    "Attempted to cool down unknown profile"
                );
            }
        }

        classification
    }

    /// Record a successful request on a profile
    pub async fn record_success(&self, profile_name: &str) {
        let mut state = self.state.write().await;
        match state.profiles.iter_mut().find(|p| p.name() == profile_name) {
            Some(profile) => {
                profile.request_count = profile.request_count.saturating_add(1);
                profile.last_error = None;
            }
            None => {
                tracing::warn!(
                    provider = %self.provider,
                    profile = %profile_name,
                    "Attempted to record success for unknown profile"
                );
            }
        }
    }

    /// Zero all counters and lift every cooldown
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        for profile in state.profiles.iter_mut() {
            profile.request_count = 0;
            profile.cooldown_until = None;
            profile.last_error = None;
            profile.last_used = None;
        }
        state.cursor = 0;
        tracing::info!(
            provider = %self.provider,
            pool_size = state.profiles.len(),
            "Rotation pool reset"
        );
    }

    pub async fn get_status(&self) -> Vec<ProfileStatus> {
        let now = Instant::now();
        let state = self.state.read().await;
        state
            .profiles
            .iter()
            .map(|p| ProfileStatus::of(p, now))
            .collect()
    }

    pub async fn get_profile_by_name(&self, name: &str) -> Option<Profile> {
        let state = self.state.read().await;
        state.profiles.iter().find(|p| p.name() == name).cloned()
    }

    pub async fn get_profile_count(&self) -> usize {
        self.state.read().await.profiles.len()
    }

    pub async fn get_available_count(&self) -> usize {
        let now = Instant::now();
        let state = self.state.read().await;
        state
            .profiles
            .iter()
            .filter(|p| p.is_available_at(now))
            .count()
    }
}

#[cfg(test)]
mod tests_cooldown;
#[cfg(test)]
mod tests_strategies;

/// Shared test helper: manager with `n` profiles named `key-0..key-n`
#[cfg(test)]
pub(crate) async fn manager_with_profiles(strategy: RotationStrategy, n: usize) -> RotationManager {
    let manager = RotationManager::with_seed(
        "test-provider",
        RotationConfig {
            strategy,
            ..RotationConfig::default()
        },
        7,
    );
    for i in 0..n {
        manager
            .add_profile(Profile::new(format!("key-{}", i), format!("sk-test-{:08}", i)))
            .await;
    }
    manager
}
