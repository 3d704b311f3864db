//! Candidate walk tests for LoadBalancer

use super::test_support::{Scripted, balancer};
use super::*;
use crate::failover::FailoverReason;

fn request() -> UnifiedRequest {
    UnifiedRequest::new("gpt-4o").with_message(crate::provider::ChatMessage::user("hi"))
}

#[tokio::test]
async fn test_primary_success_has_single_attempt() {
    let lb = balancer();
    let primary = Scripted::ok("from primary");
    lb.register_provider("primary", primary.clone()).await;

    let routed = lb
        .chat(&CancellationToken::new(), &request(), &["primary"])
        .await
        .unwrap();

    assert_eq!(routed.value.content, "from primary");
    assert_eq!(routed.provider, "primary");
    assert_eq!(routed.attempts.len(), 1);
    assert!(routed.attempts[0].is_success());
    assert!(!routed.used_fallback());
}

#[tokio::test(start_paused = true)]
async fn test_skip_fail_succeed_records_every_attempt() {
    let lb = balancer();
    let a = Scripted::ok("a");
    let b = Scripted::err(ProviderError::http(503, "overloaded"));
    let c = Scripted::ok("c");
    lb.register_provider("a", a.clone()).await;
    lb.register_provider("b", b.clone()).await;
    lb.register_provider("c", c.clone()).await;
    lb.cooldowns()
        .mark_failure("a", FailoverReason::RateLimit)
        .await;

    let routed = lb
        .chat(&CancellationToken::new(), &request(), &["a", "b", "c"])
        .await
        .unwrap();

    assert_eq!(routed.value.content, "c");
    assert_eq!(routed.provider, "c");
    assert_eq!(a.call_count(), 0);

    let attempts = &routed.attempts;
    assert_eq!(attempts.len(), 3);
    assert!(attempts[0].skipped);
    assert_eq!(attempts[0].reason, Some(FailoverReason::RateLimit));
    assert!(!attempts[1].skipped);
    assert_eq!(attempts[1].reason, Some(FailoverReason::ServerError));
    assert_eq!(attempts[1].error.as_deref(), Some("HTTP 503: overloaded"));
    assert!(attempts[2].is_success());
    assert!(routed.used_fallback());

    // b is now cooling, c recovered, a still cooling
    assert!(!lb.cooldowns().is_available("b").await);
    assert!(lb.cooldowns().is_available("c").await);
    assert!(!lb.cooldowns().is_available("a").await);
}

#[tokio::test]
async fn test_non_retriable_error_stops_failover() {
    let lb = balancer();
    let a = Scripted::err(ProviderError::http(401, "invalid api key"));
    let b = Scripted::ok("b");
    lb.register_provider("a", a.clone()).await;
    lb.register_provider("b", b.clone()).await;

    let err = lb
        .chat(&CancellationToken::new(), &request(), &["a", "b"])
        .await
        .unwrap_err();

    assert_eq!(b.call_count(), 0);
    assert_eq!(err.reason(), Some(FailoverReason::AuthError));
    match &err {
        FailoverError::NonRetriable {
            provider, source, ..
        } => {
            assert_eq!(provider, "a");
            assert_eq!(source.status(), Some(401));
        }
        other => panic!("expected NonRetriable, got {:?}", other),
    }
    assert_eq!(err.attempts().len(), 1);
    // Non-retriable failures are the request's problem, not a reason to cool down
    assert!(lb.cooldowns().is_available("a").await);
}

#[tokio::test]
async fn test_empty_order_touches_nothing() {
    let lb = balancer();
    let a = Scripted::ok("a");
    lb.register_provider("a", a.clone()).await;

    let err = lb
        .chat(&CancellationToken::new(), &request(), &[] as &[&str])
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "no providers configured");
    assert_eq!(a.call_count(), 0);
    assert_eq!(lb.get_stats().await["a"].request_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_all_cooling_yields_exhausted_with_only_skips() {
    let lb = balancer();
    let a = Scripted::ok("a");
    let b = Scripted::ok("b");
    lb.register_provider("a", a.clone()).await;
    lb.register_provider("b", b.clone()).await;
    lb.cooldowns().mark_failure("a", FailoverReason::Timeout).await;
    lb.cooldowns()
        .mark_failure("b", FailoverReason::ServerError)
        .await;

    let err = lb
        .chat(&CancellationToken::new(), &request(), &["a", "b"])
        .await
        .unwrap_err();

    let FailoverError::Exhausted(exhausted) = err else {
        panic!("expected exhaustion");
    };
    assert_eq!(exhausted.attempts().len(), 2);
    assert!(exhausted.all_skipped());
    assert_eq!(
        exhausted.attempts()[0].reason,
        Some(FailoverReason::Timeout)
    );
    assert_eq!(
        exhausted.attempts()[1].reason,
        Some(FailoverReason::ServerError)
    );
    for attempt in exhausted.attempts() {
        let message = attempt.error.as_deref().unwrap();
        assert!(message.starts_with("on cooldown for another"));
        assert!(!message.ends_with(" 0ms"));
    }
    assert_eq!(a.call_count() + b.call_count(), 0);
    assert_eq!(lb.metrics().fallback_exhausted_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_candidate_failing_aggregates_in_order() {
    let lb = balancer();
    lb.register_provider("a", Scripted::err(ProviderError::http(429, "")))
        .await;
    lb.register_provider("b", Scripted::err(ProviderError::Network("connection reset".into())))
        .await;

    let err = lb
        .chat(&CancellationToken::new(), &request(), &["a", "b"])
        .await
        .unwrap_err();

    let attempts = err.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].provider, "a");
    assert_eq!(attempts[0].reason, Some(FailoverReason::RateLimit));
    assert_eq!(attempts[1].provider, "b");
    assert_eq!(attempts[1].reason, Some(FailoverReason::Unknown));
    assert!(err.to_string().starts_with("all 2 fallback candidates failed"));
}

#[tokio::test]
async fn test_unregistered_provider_is_recorded_and_passed_over() {
    let lb = balancer();
    let b = Scripted::ok("b");
    lb.register_provider("b", b.clone()).await;

    let routed = lb
        .chat(&CancellationToken::new(), &request(), &["ghost", "b"])
        .await
        .unwrap();

    assert_eq!(routed.provider, "b");
    assert_eq!(routed.attempts[0].provider, "ghost");
    assert!(!routed.attempts[0].skipped);
    assert_eq!(routed.attempts[0].reason, None);
    assert!(
        routed.attempts[0]
            .error
            .as_deref()
            .unwrap()
            .contains("not registered")
    );
    // An unknown name never enters the cooldown tracker
    assert!(lb.cooldowns().snapshot().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_success_after_failure_clears_cooldown() {
    let lb = balancer();
    let a = Scripted::new(vec![
        Err(ProviderError::http(500, "boom")),
        Ok("recovered".to_string()),
    ]);
    lb.register_provider("a", a.clone()).await;

    lb.chat(&CancellationToken::new(), &request(), &["a"])
        .await
        .unwrap_err();
    assert_eq!(lb.cooldowns().error_count("a").await, 1);

    tokio::time::advance(Duration::from_secs(5)).await;
    let routed = lb
        .chat(&CancellationToken::new(), &request(), &["a"])
        .await
        .unwrap();

    assert_eq!(routed.value.content, "recovered");
    assert_eq!(lb.cooldowns().error_count("a").await, 0);
    assert!(lb.cooldowns().is_available("a").await);
}

#[tokio::test(start_paused = true)]
async fn test_stats_reflect_counters_and_cooldown() {
    let lb = balancer();
    lb.register_provider("ok", Scripted::ok("fine")).await;
    lb.register_provider_with_kind(
        "flaky",
        ProviderKind::Local,
        Scripted::err(ProviderError::http(502, "bad gateway")),
    )
    .await;

    lb.chat(&CancellationToken::new(), &request(), &["flaky", "ok"])
        .await
        .unwrap();

    let stats = lb.get_stats().await;
    assert_eq!(stats.len(), 2);

    let flaky = &stats["flaky"];
    assert_eq!(flaky.kind, ProviderKind::Local);
    assert_eq!(flaky.request_count, 1);
    assert_eq!(flaky.failure_count, 1);
    assert_eq!(flaky.success_count, 0);
    assert!(flaky.last_failure.is_some());
    assert_eq!(flaky.consecutive_errors, 1);
    assert!(!flaky.available);
    assert_eq!(flaky.cooldown_remaining_ms, 5_000);
    assert_eq!(flaky.last_reason, Some(FailoverReason::ServerError));

    let ok = &stats["ok"];
    assert_eq!(ok.success_count, 1);
    assert!(ok.last_success.is_some());
    assert!(ok.available);
    assert_eq!(ok.consecutive_errors, 0);
}

#[tokio::test]
async fn test_stream_forwards_chunks_and_reports_provider() {
    let lb = balancer();
    lb.register_provider("a", Scripted::err(ProviderError::http(503, "")))
        .await;
    lb.register_provider("b", Scripted::ok("streamed")).await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let routed = lb
        .chat_stream(&CancellationToken::new(), &request(), &tx, &["a", "b"])
        .await
        .unwrap();

    assert_eq!(routed.provider, "b");
    assert_eq!(routed.attempts.len(), 2);
    assert_eq!(rx.recv().await.unwrap().delta, "streamed");
    assert!(rx.recv().await.unwrap().done);
}

#[tokio::test]
async fn test_reregistering_replaces_client() {
    let lb = balancer();
    lb.register_provider("a", Scripted::err(ProviderError::http(401, "")))
        .await;
    lb.register_provider("a", Scripted::ok("second")).await;

    let routed = lb
        .chat(&CancellationToken::new(), &request(), &["a"])
        .await
        .unwrap();
    assert_eq!(routed.value.content, "second");
    assert_eq!(lb.provider_names().await, vec!["a".to_string()]);
}
