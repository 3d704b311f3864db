//! Credential profiles
//!
//! A profile is one API key of a logical provider. Selection state
//! (request count, cooldown, last error) lives on the profile itself and is
//! only mutated through `RotationManager`.

use crate::failover::FailoverReason;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// One credential within a provider's pool
#[derive(Clone)]
pub struct Profile {
    name: String,
    api_key: String,
    priority: u8,
    pub(crate) request_count: u64,
    pub(crate) cooldown_until: Option<Instant>,
    pub(crate) last_error: Option<FailoverReason>,
    pub(crate) last_used: Option<Instant>,
}

impl Profile {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            priority: 1,
            request_count: 0,
            cooldown_until: None,
            last_error: None,
            last_used: None,
        }
    }

    /// Set the priority (higher = earlier in the pool when built from config)
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn last_error(&self) -> Option<FailoverReason> {
        self.last_error
    }

    pub fn last_used(&self) -> Option<Instant> {
        self.last_used
    }

    pub fn is_available_at(&self, now: Instant) -> bool {
        self.cooldown_until.is_none_or(|until| now >= until)
    }

    pub fn cooldown_remaining_at(&self, now: Instant) -> Duration {
        self.cooldown_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Key with everything but the last four characters hidden
    pub fn masked_key(&self) -> String {
        mask_key(&self.api_key)
    }
}

// Never print the raw key.
impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("api_key", &self.masked_key())
            .field("priority", &self.priority)
            .field("request_count", &self.request_count)
            .field("cooldown_until", &self.cooldown_until)
            .field("last_error", &self.last_error)
            .finish()
    }
}

pub(crate) fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

/// Read model of one profile for dashboards
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileStatus {
    pub name: String,
    pub masked_key: String,
    pub priority: u8,
    pub request_count: u64,
    pub available: bool,
    pub cooldown_remaining_ms: u64,
    pub last_error: Option<FailoverReason>,
}

impl ProfileStatus {
    pub(crate) fn of(profile: &Profile, now: Instant) -> Self {
        Self {
            name: profile.name.clone(),
            masked_key: profile.masked_key(),
            priority: profile.priority,
            request_count: profile.request_count,
            available: profile.is_available_at(now),
            cooldown_remaining_ms: profile.cooldown_remaining_at(now).as_millis() as u64,
            last_error: profile.last_error,
        }
    }
}
