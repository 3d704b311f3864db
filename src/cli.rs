//! Command-line interface for relaygate
//!
//! Provides argument parsing, subcommand handling and the reports printed by
//! `check` and `providers`.

use crate::config::Config;
use crate::failover::FailoverReason;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Provider routing and failover engine for AI agent hosts
#[derive(Parser)]
#[command(name = "relaygate")]
#[command(version)]
#[command(about = "Provider routing and failover engine for AI agent hosts")]
#[command(
    long_about = "relaygate decides which upstream provider and which API key serve each \
    LLM request, backs off failing targets and fails over along a configured chain."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Validate the configuration and print the failover plan
    Check,
    /// Print configured providers, rotation settings and masked keys as JSON
    Providers,
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# relaygate configuration
# =======================

# ─────────────────────────────────────────────────────────────────────────────
# FAILOVER
# ─────────────────────────────────────────────────────────────────────────────

[failover]
# Providers tried for each request, primary first
provider_order = ["openai", "anthropic", "ollama"]

# Per-attempt deadline for hosted providers (1-3600)
remote_timeout_seconds = 60

# Per-attempt deadline for local inference servers (1-3600)
local_timeout_seconds = 300

# ─────────────────────────────────────────────────────────────────────────────
# COOLDOWN
# ─────────────────────────────────────────────────────────────────────────────
#
# The n-th consecutive failure of a provider cools it down for
# base * 2^(n-1) seconds, never longer than max_cooldown_seconds.
# One success clears the streak.

[cooldown]
rate_limit_seconds = 30
timeout_seconds = 10
server_error_seconds = 5
auth_error_seconds = 60
invalid_request_seconds = 5
content_policy_seconds = 5
unknown_seconds = 5
max_cooldown_seconds = 300

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDERS
# ─────────────────────────────────────────────────────────────────────────────
#
# kind: "remote" (default) or "local"
#
# A provider with several API keys rotates between them. Keys that hit rate
# limits or server errors are quarantined for rotation.cooldown_seconds.
#
# strategy: "round_robin", "least_used" or "random"
# priority: higher = earlier in the pool (used first when rotation is disabled)

[[providers]]
name = "openai"
kind = "remote"

[providers.rotation]
enabled = true
strategy = "round_robin"
cooldown_seconds = 60

[[providers.profiles]]
name = "primary"
api_key = "sk-replace-me-primary"
priority = 2

[[providers.profiles]]
name = "secondary"
api_key = "sk-replace-me-secondary"
priority = 1

[[providers]]
name = "anthropic"
kind = "remote"

[[providers.profiles]]
name = "default"
api_key = "sk-ant-replace-me"

[[providers]]
name = "ollama"
kind = "local"

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# trace, debug, info, warn or error (RUST_LOG overrides)
log_level = "info"
"#
}

/// Human-readable failover plan for `relaygate check`
pub fn render_plan(config: &Config) -> String {
    let balancer = config.balancer_config();
    let mut out = String::new();

    let _ = writeln!(out, "Failover order:");
    if config.failover.provider_order().is_empty() {
        let _ = writeln!(out, "  (empty: every request fails with no providers configured)");
    }
    for (i, name) in config.failover.provider_order().iter().enumerate() {
        // Order entries are validated against the provider list.
        let Some(provider) = config.provider(name) else {
            continue;
        };
        let rotation = provider.rotation_config();
        let _ = writeln!(
            out,
            "  {}. {} ({}, timeout {}s, {} profile(s){})",
            i + 1,
            provider.name(),
            provider.kind().as_str(),
            balancer.timeout_for(provider.kind()).as_secs(),
            provider.profiles().len(),
            if provider.profiles().is_empty() {
                String::new()
            } else if rotation.enabled {
                format!(", rotation {}", rotation.strategy.as_str())
            } else {
                ", rotation disabled".to_string()
            }
        );
    }

    let policy = config.cooldown_policy();
    let _ = writeln!(
        out,
        "\nCooldown schedule (max {}s):",
        policy.max_cooldown().as_secs()
    );
    for reason in FailoverReason::ALL {
        let steps: Vec<String> = (1..=4)
            .map(|n| format!("{}s", policy.backoff(reason, n).as_secs()))
            .collect();
        let _ = writeln!(out, "  {:<16} {}", reason.as_str(), steps.join(" -> "));
    }

    out
}

/// One configured provider, as printed by `relaygate providers`
#[derive(Debug, Serialize)]
pub struct ProviderReport {
    pub kind: &'static str,
    /// 1-based place in the failover order, `None` when not in the order
    pub order_position: Option<usize>,
    pub timeout_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationReport>,
    pub profiles: Vec<ProfileReport>,
}

#[derive(Debug, Serialize)]
pub struct RotationReport {
    pub enabled: bool,
    pub strategy: &'static str,
    pub cooldown_seconds: u64,
}

/// A credential profile with its key masked
#[derive(Debug, Serialize)]
pub struct ProfileReport {
    pub name: String,
    pub priority: u8,
    pub api_key: String,
}

/// Describe every configured provider from the configuration alone
///
/// Profiles are listed in pool order (highest priority first).
pub fn provider_report(config: &Config) -> BTreeMap<String, ProviderReport> {
    let balancer = config.balancer_config();

    config
        .providers
        .iter()
        .map(|provider| {
            let order_position = config
                .failover
                .provider_order()
                .iter()
                .position(|name| name == provider.name())
                .map(|i| i + 1);
            let rotation = (!provider.profiles().is_empty()).then(|| {
                let rotation = provider.rotation_config();
                RotationReport {
                    enabled: rotation.enabled,
                    strategy: rotation.strategy.as_str(),
                    cooldown_seconds: rotation.cooldown_period.as_secs(),
                }
            });
            let profiles = provider
                .profiles_by_priority()
                .into_iter()
                .map(|p| ProfileReport {
                    name: p.name().to_string(),
                    priority: p.priority(),
                    api_key: p.masked_key(),
                })
                .collect();

            (
                provider.name().to_string(),
                ProviderReport {
                    kind: provider.kind().as_str(),
                    order_position,
                    timeout_seconds: balancer.timeout_for(provider.kind()).as_secs(),
                    rotation,
                    profiles,
                },
            )
        })
        .collect()
}
