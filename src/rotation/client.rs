//! A `ChatClient` backed by a rotating credential pool
//!
//! Wraps a key-aware client so a provider with several API keys can be
//! registered with the load balancer like any other provider. A quarantined
//! key is retried with the next profile; once the whole pool is cooling the
//! failure surfaces as `ProviderError::CredentialsExhausted`, which the load
//! balancer treats as a rate limit on the whole provider.

use super::{Profile, RotationManager};
use crate::provider::{
    ChatClient, ProviderError, StreamHandler, TrackingHandler, UnifiedRequest, UnifiedResponse,
};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Provider client that authenticates with an explicit credential
#[async_trait]
pub trait KeyedClient: Send + Sync {
    async fn chat(
        &self,
        profile: &Profile,
        request: &UnifiedRequest,
    ) -> Result<UnifiedResponse, ProviderError>;

    async fn chat_stream(
        &self,
        profile: &Profile,
        request: &UnifiedRequest,
        handler: &dyn StreamHandler,
    ) -> Result<(), ProviderError>;
}

pub struct RotatingClient {
    manager: Arc<RotationManager>,
    inner: Arc<dyn KeyedClient>,
}

impl RotatingClient {
    pub fn new(manager: Arc<RotationManager>, inner: Arc<dyn KeyedClient>) -> Self {
        Self { manager, inner }
    }

    pub fn manager(&self) -> &Arc<RotationManager> {
        &self.manager
    }

    /// Call `attempt` with successive profiles until one succeeds, a
    /// non-quarantining error occurs, or every profile has been tried once
    async fn run<'f, T>(
        &self,
        mut attempt: impl FnMut(Profile) -> BoxFuture<'f, Result<T, ProviderError>> + Send,
        can_retry: impl Fn() -> bool + Send + Sync,
    ) -> Result<T, ProviderError> {
        let pool_size = self.manager.get_profile_count().await.max(1);
        let mut last_error = None;

        for _ in 0..pool_size {
            let profile = match self.manager.get_next_profile().await {
                Ok(profile) => profile,
                // Keep the upstream error when a retry exhausted the pool.
                Err(e) => return Err(last_error.unwrap_or_else(|| e.into())),
            };
            let name = profile.name().to_string();

            match attempt(profile).await {
                Ok(value) => {
                    self.manager.record_success(&name).await;
                    return Ok(value);
                }
                Err(error) => {
                    let classification = self.manager.handle_error(&name, &error).await;
                    if !classification.should_cooldown() || !can_retry() {
                        return Err(error);
                    }
                    tracing::info!(
                        provider = %self.manager.provider(),
                        profile = %name,
                        reason = %classification.reason,
                        "Retrying with next credential profile"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::CredentialsExhausted(format!(
                "no usable profile for {}",
                self.manager.provider()
            ))
        }))
    }
}

#[async_trait]
impl ChatClient for RotatingClient {
    async fn chat(&self, request: &UnifiedRequest) -> Result<UnifiedResponse, ProviderError> {
        let inner = Arc::clone(&self.inner);
        self.run(
            move |profile| {
                let inner = Arc::clone(&inner);
                async move { inner.chat(&profile, request).await }.boxed()
            },
            || true,
        )
        .await
    }

    async fn chat_stream(
        &self,
        request: &UnifiedRequest,
        handler: &dyn StreamHandler,
    ) -> Result<(), ProviderError> {
        let inner = Arc::clone(&self.inner);
        let tracking = TrackingHandler::new(handler);
        let tracking = &tracking;

        // Once tokens reached the caller, switching keys would duplicate output.
        self.run(
            move |profile| {
                let inner = Arc::clone(&inner);
                async move { inner.chat_stream(&profile, request, tracking).await }.boxed()
            },
            || !tracking.emitted(),
        )
        .await
    }
}
