//! relaygate - provider routing and failover engine
//!
//! Decides, for every outbound LLM request of an agent host, which upstream
//! provider and which API key serve it:
//!
//! - [`rotation`]: rotates API-key profiles within one provider and
//!   quarantines keys that are rate limited or erroring
//! - [`balancer`]: walks an ordered provider chain, skipping providers in
//!   cooldown and aborting early on errors another provider cannot fix
//! - [`failover`]: error classification and exponential cooldown tracking
//!   shared by both layers
//!
//! Provider wire formats are out of scope; clients implement
//! [`provider::ChatClient`] and are registered with the balancer.

pub mod balancer;
pub mod cli;
pub mod config;
pub mod error;
pub mod failover;
pub mod metrics;
pub mod provider;
pub mod request_id;
pub mod rotation;
pub mod telemetry;

pub use balancer::{BalancerConfig, LoadBalancer, ProviderStats};
pub use error::{AppError, AppResult};
pub use failover::{
    Classification, CooldownPolicy, CooldownTracker, FailoverError, FailoverReason,
    FallbackAttempt, FallbackExhaustedError, Routed, classify,
};
pub use provider::{
    ChatClient, ChatMessage, ProviderError, ProviderKind, StreamChunk, StreamHandler,
    UnifiedRequest, UnifiedResponse,
};
pub use rotation::{
    KeyedClient, Profile, ProfileStatus, RotatingClient, RotationConfig, RotationError,
    RotationManager, RotationStrategy,
};
