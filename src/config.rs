//! Configuration management for relaygate
//!
//! Parses TOML configuration files and builds the engine components
//! (cooldown policy, balancer deadlines, rotation managers) from them.

use crate::balancer::BalancerConfig;
use crate::error::{AppError, AppResult};
use crate::failover::{CooldownPolicy, FailoverReason};
use crate::metrics::Metrics;
use crate::provider::ProviderKind;
use crate::rotation::{Profile, RotationConfig, RotationManager, RotationStrategy, mask_key};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Longest per-attempt deadline accepted, in seconds
const MAX_TIMEOUT_SECONDS: u64 = 3600;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Candidate order and per-attempt deadlines
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FailoverConfig {
    /// Primary first, then fallbacks
    #[serde(default)]
    provider_order: Vec<String>,
    #[serde(default = "default_remote_timeout")]
    remote_timeout_seconds: u64,
    #[serde(default = "default_local_timeout")]
    local_timeout_seconds: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            provider_order: Vec::new(),
            remote_timeout_seconds: default_remote_timeout(),
            local_timeout_seconds: default_local_timeout(),
        }
    }
}

impl FailoverConfig {
    pub fn provider_order(&self) -> &[String] {
        &self.provider_order
    }

    pub fn remote_timeout_seconds(&self) -> u64 {
        self.remote_timeout_seconds
    }

    pub fn local_timeout_seconds(&self) -> u64 {
        self.local_timeout_seconds
    }
}

fn default_remote_timeout() -> u64 {
    60
}

fn default_local_timeout() -> u64 {
    300
}

/// Base cooldown per failure reason, in seconds
///
/// The n-th consecutive failure cools a provider for `base * 2^(n-1)`,
/// never longer than `max_cooldown_seconds`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CooldownConfig {
    #[serde(default = "default_rate_limit_cooldown")]
    rate_limit_seconds: u64,
    #[serde(default = "default_timeout_cooldown")]
    timeout_seconds: u64,
    #[serde(default = "default_short_cooldown")]
    server_error_seconds: u64,
    #[serde(default = "default_auth_cooldown")]
    auth_error_seconds: u64,
    #[serde(default = "default_short_cooldown")]
    invalid_request_seconds: u64,
    #[serde(default = "default_short_cooldown")]
    content_policy_seconds: u64,
    #[serde(default = "default_short_cooldown")]
    unknown_seconds: u64,
    #[serde(default = "default_max_cooldown")]
    max_cooldown_seconds: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            rate_limit_seconds: default_rate_limit_cooldown(),
            timeout_seconds: default_timeout_cooldown(),
            server_error_seconds: default_short_cooldown(),
            auth_error_seconds: default_auth_cooldown(),
            invalid_request_seconds: default_short_cooldown(),
            content_policy_seconds: default_short_cooldown(),
            unknown_seconds: default_short_cooldown(),
            max_cooldown_seconds: default_max_cooldown(),
        }
    }
}

impl CooldownConfig {
    pub fn base_seconds(&self, reason: FailoverReason) -> u64 {
        match reason {
            FailoverReason::RateLimit => self.rate_limit_seconds,
            FailoverReason::Timeout => self.timeout_seconds,
            FailoverReason::ServerError => self.server_error_seconds,
            FailoverReason::AuthError => self.auth_error_seconds,
            FailoverReason::InvalidRequest => self.invalid_request_seconds,
            FailoverReason::ContentPolicy => self.content_policy_seconds,
            FailoverReason::Unknown => self.unknown_seconds,
        }
    }

    pub fn max_cooldown_seconds(&self) -> u64 {
        self.max_cooldown_seconds
    }
}

fn default_rate_limit_cooldown() -> u64 {
    30
}

fn default_timeout_cooldown() -> u64 {
    10
}

fn default_auth_cooldown() -> u64 {
    60
}

fn default_short_cooldown() -> u64 {
    5
}

fn default_max_cooldown() -> u64 {
    300
}

/// One upstream provider
///
/// Fields are private; values are only trusted after `Config::validate`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    name: String,
    #[serde(default)]
    kind: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rotation: Option<RotationSettings>,
    #[serde(default)]
    profiles: Vec<ProfileConfig>,
}

impl ProviderConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn profiles(&self) -> &[ProfileConfig] {
        &self.profiles
    }

    /// Rotation settings, defaulted when the table is omitted
    pub fn rotation_config(&self) -> RotationConfig {
        self.rotation
            .as_ref()
            .map(RotationSettings::to_rotation_config)
            .unwrap_or_default()
    }

    /// Profiles ordered by priority, highest first; equal priorities keep
    /// file order
    pub fn profiles_by_priority(&self) -> Vec<&ProfileConfig> {
        let mut profiles: Vec<&ProfileConfig> = self.profiles.iter().collect();
        profiles.sort_by(|a, b| b.priority.cmp(&a.priority));
        profiles
    }

    /// Build the credential pool for this provider
    ///
    /// Profiles enter the pool in [`Self::profiles_by_priority`] order and
    /// quarantines are counted in `metrics`. Returns `None` when the provider
    /// has no profiles.
    pub fn rotation_manager(&self, metrics: &Arc<Metrics>) -> Option<RotationManager> {
        if self.profiles.is_empty() {
            return None;
        }

        Some(
            RotationManager::new(self.name.clone(), self.rotation_config())
                .with_profiles(self.profiles_by_priority().into_iter().map(|p| {
                    Profile::new(p.name.clone(), p.api_key.clone()).with_priority(p.priority)
                }))
                .with_metrics(Arc::clone(metrics)),
        )
    }
}

/// `[providers.rotation]` table
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RotationSettings {
    #[serde(default = "default_rotation_enabled")]
    enabled: bool,
    #[serde(default)]
    strategy: RotationStrategy,
    #[serde(default = "default_profile_cooldown")]
    cooldown_seconds: u64,
}

impl RotationSettings {
    fn to_rotation_config(&self) -> RotationConfig {
        RotationConfig {
            enabled: self.enabled,
            strategy: self.strategy,
            cooldown_period: Duration::from_secs(self.cooldown_seconds),
        }
    }
}

fn default_rotation_enabled() -> bool {
    true
}

fn default_profile_cooldown() -> u64 {
    60
}

/// `[[providers.profiles]]` entry
#[derive(Clone, Deserialize, Serialize)]
pub struct ProfileConfig {
    name: String,
    api_key: String,
    #[serde(default = "default_priority")]
    priority: u8,
}

impl ProfileConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// The api key with all but its last four characters hidden
    pub fn masked_key(&self) -> String {
        mask_key(&self.api_key)
    }
}

impl std::fmt::Debug for ProfileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileConfig")
            .field("name", &self.name)
            .field("api_key", &"<redacted>")
            .field("priority", &self.priority)
            .finish()
    }
}

fn default_priority() -> u8 {
    1
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Read, parse and validation failures map to distinct `AppError`
    /// variants so callers can tell a missing file from a bad value.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Look up a provider by name
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn cooldown_policy(&self) -> CooldownPolicy {
        FailoverReason::ALL.iter().fold(
            CooldownPolicy::default().with_max_cooldown(Duration::from_secs(
                self.cooldown.max_cooldown_seconds,
            )),
            |policy, reason| {
                policy.with_base(
                    *reason,
                    Duration::from_secs(self.cooldown.base_seconds(*reason)),
                )
            },
        )
    }

    pub fn balancer_config(&self) -> BalancerConfig {
        BalancerConfig {
            remote_timeout: Duration::from_secs(self.failover.remote_timeout_seconds),
            local_timeout: Duration::from_secs(self.failover.local_timeout_seconds),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> AppResult<()> {
        for (label, value) in [
            ("remote_timeout_seconds", self.failover.remote_timeout_seconds),
            ("local_timeout_seconds", self.failover.local_timeout_seconds),
        ] {
            if value == 0 || value > MAX_TIMEOUT_SECONDS {
                return Err(AppError::Config(format!(
                    "failover.{} must be between 1 and {} seconds, got {}",
                    label, MAX_TIMEOUT_SECONDS, value
                )));
            }
        }

        let max = self.cooldown.max_cooldown_seconds;
        if max == 0 {
            return Err(AppError::Config(
                "cooldown.max_cooldown_seconds must be greater than 0".to_string(),
            ));
        }
        for reason in FailoverReason::ALL {
            let base = self.cooldown.base_seconds(reason);
            if base == 0 || base > max {
                return Err(AppError::Config(format!(
                    "cooldown.{}_seconds must be between 1 and max_cooldown_seconds ({}), got {}",
                    reason.as_str(),
                    max,
                    base
                )));
            }
        }

        let mut provider_names = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(AppError::Config(
                    "provider name must not be empty".to_string(),
                ));
            }
            if !provider_names.insert(provider.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate provider name '{}'",
                    provider.name
                )));
            }
            Self::validate_provider(provider)?;
        }

        for name in &self.failover.provider_order {
            if !provider_names.contains(name.as_str()) {
                return Err(AppError::Config(format!(
                    "failover.provider_order references unknown provider '{}'. \
                    Configured providers: [{}]",
                    name,
                    self.providers
                        .iter()
                        .map(|p| p.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
        }

        if !LOG_LEVELS.contains(&self.observability.log_level.as_str()) {
            return Err(AppError::Config(format!(
                "observability.log_level '{}' is not one of: {}",
                self.observability.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }

    fn validate_provider(provider: &ProviderConfig) -> AppResult<()> {
        let mut profile_names = HashSet::new();
        for profile in &provider.profiles {
            if !profile_names.insert(profile.name.as_str()) {
                return Err(AppError::Config(format!(
                    "provider '{}' has duplicate profile name '{}'",
                    provider.name, profile.name
                )));
            }
            if profile.api_key.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "profile '{}' of provider '{}' has an empty api_key",
                    profile.name, provider.name
                )));
            }
        }

        if let Some(rotation) = &provider.rotation {
            if rotation.enabled && provider.profiles.is_empty() {
                return Err(AppError::Config(format!(
                    "provider '{}' enables rotation but has no profiles",
                    provider.name
                )));
            }
            if rotation.cooldown_seconds == 0 {
                return Err(AppError::Config(format!(
                    "provider '{}' rotation.cooldown_seconds must be greater than 0",
                    provider.name
                )));
            }
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
