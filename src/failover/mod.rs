//! Failure classification, cooldown tracking and failover outcomes
//!
//! The building blocks shared by the load balancer (provider level) and the
//! rotation manager (credential level).

pub mod attempt;
pub mod classifier;
pub mod cooldown;

pub use attempt::{FailoverError, FallbackAttempt, FallbackExhaustedError, Routed};
pub use classifier::{Classification, FailoverReason, classify};
pub use cooldown::{CooldownPolicy, CooldownRecord, CooldownTracker};
