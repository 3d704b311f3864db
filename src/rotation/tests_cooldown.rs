//! Quarantine and degraded-mode tests for RotationManager

use super::*;
use crate::failover::FailoverReason;

#[tokio::test(start_paused = true)]
async fn test_rate_limit_quarantines_profile_for_cooldown_period() {
    let manager = manager_with_profiles(RotationStrategy::RoundRobin, 2).await;

    let classification = manager
        .handle_error("key-0", &ProviderError::http(429, "rate limit exceeded"))
        .await;

    assert_eq!(classification.reason, FailoverReason::RateLimit);
    assert!(classification.retriable);
    assert_eq!(manager.get_available_count().await, 1);

    let profile = manager.get_profile_by_name("key-0").await.unwrap();
    assert_eq!(profile.last_error(), Some(FailoverReason::RateLimit));

    tokio::time::advance(DEFAULT_PROFILE_COOLDOWN - Duration::from_millis(1)).await;
    assert_eq!(manager.get_available_count().await, 1);

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(manager.get_available_count().await, 2);
}

#[tokio::test]
async fn test_non_saturation_errors_do_not_quarantine() {
    let manager = manager_with_profiles(RotationStrategy::RoundRobin, 2).await;

    let auth = manager
        .handle_error("key-0", &ProviderError::http(401, "invalid api key"))
        .await;
    assert_eq!(auth.reason, FailoverReason::AuthError);
    assert!(!auth.retriable);

    let timeout = manager
        .handle_error(
            "key-1",
            &ProviderError::Timeout {
                after: Duration::from_secs(5),
            },
        )
        .await;
    assert_eq!(timeout.reason, FailoverReason::Timeout);

    assert_eq!(manager.get_available_count().await, 2);
    let profile = manager.get_profile_by_name("key-0").await.unwrap();
    assert_eq!(profile.last_error(), None);
}

#[tokio::test]
async fn test_all_profiles_on_cooldown() {
    let manager = manager_with_profiles(RotationStrategy::LeastUsed, 2).await;
    manager
        .handle_error("key-0", &ProviderError::http(429, ""))
        .await;
    manager
        .handle_error("key-1", &ProviderError::http(500, ""))
        .await;

    let err = manager.get_next_profile().await.unwrap_err();
    assert!(matches!(err, RotationError::AllOnCooldown { .. }));
    assert!(err.to_string().starts_with("all profiles on cooldown"));
}

#[tokio::test]
async fn test_disabled_rotation_with_cooled_primary_errors() {
    let manager = RotationManager::with_seed(
        "openai",
        RotationConfig {
            enabled: false,
            ..RotationConfig::default()
        },
        3,
    );
    manager.add_profile(Profile::new("primary", "sk-primary-0001")).await;
    manager.add_profile(Profile::new("backup", "sk-backup-0002")).await;

    manager
        .handle_error("primary", &ProviderError::http(429, ""))
        .await;

    let err = manager.get_next_profile().await.unwrap_err();
    assert!(matches!(err, RotationError::PrimaryOnCooldown { .. }));
    assert!(err.to_string().starts_with("primary profile on cooldown"));
}

#[tokio::test]
async fn test_record_success_counts_and_clears_last_error() {
    let manager = manager_with_profiles(RotationStrategy::RoundRobin, 1).await;
    manager
        .handle_error("key-0", &ProviderError::http(503, ""))
        .await;
    manager.record_success("key-0").await;
    manager.record_success("key-0").await;

    let profile = manager.get_profile_by_name("key-0").await.unwrap();
    assert_eq!(profile.request_count(), 2);
    assert_eq!(profile.last_error(), None);
}

#[tokio::test]
async fn test_unknown_profile_names_are_ignored() {
    let manager = manager_with_profiles(RotationStrategy::RoundRobin, 1).await;
    manager.record_success("ghost").await;
    let c = manager
        .handle_error("ghost", &ProviderError::http(429, ""))
        .await;

    assert_eq!(c.reason, FailoverReason::RateLimit);
    assert_eq!(manager.get_available_count().await, 1);
    assert!(manager.get_profile_by_name("ghost").await.is_none());
}

#[tokio::test]
async fn test_reset_lifts_cooldowns_and_counters() {
    let manager = manager_with_profiles(RotationStrategy::RoundRobin, 3).await;
    manager.get_next_profile().await.unwrap();
    manager.record_success("key-0").await;
    manager
        .handle_error("key-1", &ProviderError::http(429, ""))
        .await;
    manager
        .handle_error("key-2", &ProviderError::http(429, ""))
        .await;

    manager.reset().await;

    assert_eq!(manager.get_available_count().await, 3);
    assert_eq!(manager.get_profile_count().await, 3);
    let status = manager.get_status().await;
    assert!(status.iter().all(|s| s.request_count == 0 && s.available));
    // Cursor is back at the start of the pool
    assert_eq!(manager.get_next_profile().await.unwrap().name(), "key-0");
}

#[tokio::test(start_paused = true)]
async fn test_status_reports_masked_keys_and_remaining_cooldown() {
    let manager = manager_with_profiles(RotationStrategy::RoundRobin, 2).await;
    manager
        .handle_error("key-1", &ProviderError::http(429, ""))
        .await;

    let status = manager.get_status().await;
    assert_eq!(status.len(), 2);

    assert_eq!(status[0].name, "key-0");
    assert_eq!(status[0].masked_key, "****0000");
    assert!(status[0].available);
    assert_eq!(status[0].cooldown_remaining_ms, 0);

    assert!(!status[1].available);
    assert_eq!(
        status[1].cooldown_remaining_ms,
        DEFAULT_PROFILE_COOLDOWN.as_millis() as u64
    );
    assert_eq!(status[1].last_error, Some(FailoverReason::RateLimit));

    let json = serde_json::to_value(&status[1]).unwrap();
    assert_eq!(json["last_error"], "rate_limit");
    assert!(json.get("api_key").is_none());
}

#[tokio::test]
async fn test_profile_cooldown_is_counted_in_metrics() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let manager = RotationManager::with_seed("openai", RotationConfig::default(), 9)
        .with_metrics(Arc::clone(&metrics));
    manager.add_profile(Profile::new("a", "sk-aaaaaaaaaa")).await;

    manager.handle_error("a", &ProviderError::http(429, "")).await;

    let output = metrics.gather().unwrap();
    assert!(output.contains("relaygate_profile_cooldowns_total"));
    assert!(output.contains(r#"provider="openai""#));
}
