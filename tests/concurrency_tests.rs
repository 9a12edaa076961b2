//! Concurrent use of a shared engine.

use std::sync::Arc;

use serde_json::json;

use mender::clock::RecordingSleeper;
use mender::logging::MemoryLogger;
use mender::{Category, ErrorContext, ErrorReport, RecoveryAction, RecoveryEngine, RecoveryRule};

fn shared_engine(rules: Vec<RecoveryRule>) -> Arc<RecoveryEngine> {
    let mut builder = RecoveryEngine::builder()
        .logger(Arc::new(MemoryLogger::new()))
        .sleeper(Arc::new(RecordingSleeper::new()));
    for rule in rules {
        builder = builder.rule(rule);
    }
    Arc::new(builder.build())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_count_every_occurrence() {
    let engine = shared_engine(vec![]);
    let calls = 200;

    let handles: Vec<_> = (0..calls)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .handle_error(
                        ErrorReport::new("LookupError", format!("order {} not found", i)),
                        ErrorContext::new(),
                    )
                    .await
            })
        })
        .collect();

    let mut pattern_ids = Vec::with_capacity(calls);
    let mut observed_counts = Vec::with_capacity(calls);
    for handle in handles {
        let outcome = handle.await.unwrap();
        observed_counts.push(outcome.occurrence_count);
        pattern_ids.push(outcome.pattern_id);
    }

    // Every call saw a distinct count, so no increment was lost or shared
    observed_counts.sort_unstable();
    assert_eq!(observed_counts, (1..=calls as u64).collect::<Vec<_>>());

    pattern_ids.dedup();
    assert_eq!(pattern_ids.len(), 1);
    let pattern = engine.pattern(&pattern_ids[0]).unwrap();
    assert_eq!(pattern.occurrence_count, calls as u64);

    let stats = engine.get_statistics();
    assert_eq!(stats.total_patterns, 1);
    assert_eq!(stats.total_instances, calls);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_breaker_failures_are_not_lost() {
    let engine = shared_engine(vec![RecoveryRule::new(
        Category::ExternalService,
        RecoveryAction::CircuitBreak,
    )
    .with_circuit_breaker_threshold(50)]);
    let mut context = ErrorContext::new();
    context.insert("service_key".to_string(), json!("search-api"));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let engine = engine.clone();
            let context = context.clone();
            tokio::spawn(async move {
                engine
                    .handle_error(
                        ErrorReport::new("GatewayError", "search api unavailable"),
                        context,
                    )
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(!handle.await.unwrap().success);
    }

    let stats = engine.get_statistics();
    let breaker = &stats.circuit_breaker_snapshot["search-api"];
    assert_eq!(breaker.failure_count, 100);
    assert!(breaker.is_open());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_engines_share_nothing() {
    let first = shared_engine(vec![]);
    let second = shared_engine(vec![]);

    first
        .handle_error(
            ErrorReport::new("ValueError", "invalid input"),
            ErrorContext::new(),
        )
        .await;

    assert_eq!(first.get_statistics().total_patterns, 1);
    assert_eq!(second.get_statistics().total_patterns, 0);
}
