//! Integration tests for the recovery engine.
//!
//! These drive the public API end-to-end: signature stability, pattern
//! aggregation, circuit breaking, retry backoff, escalation, and the
//! classification scenarios operators rely on.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mender::clock::{ManualClock, RecordingSleeper};
use mender::error::{ErrorClassifier, SignatureNormalizer};
use mender::logging::{EventLevel, MemoryLogger};
use mender::notification::{Alert, AlertError, AlertSink, MemoryAlertSink};
use mender::recovery::{CircuitState, RecoveryRuleEngine};
use mender::{
    Category, ErrorContext, ErrorReport, HandlingState, RecoveryAction, RecoveryEngine,
    RecoveryRule, Severity,
};

struct TestEngine {
    engine: RecoveryEngine,
    logger: MemoryLogger,
    sleeper: RecordingSleeper,
    alerts: MemoryAlertSink,
    clock: ManualClock,
}

fn test_engine(rules: Vec<RecoveryRule>) -> TestEngine {
    let logger = MemoryLogger::new();
    let clock = ManualClock::default();
    let sleeper = RecordingSleeper::with_clock(clock.clone());
    let alerts = MemoryAlertSink::new();

    let mut builder = RecoveryEngine::builder()
        .logger(Arc::new(logger.clone()))
        .clock(Arc::new(clock.clone()))
        .sleeper(Arc::new(sleeper.clone()))
        .alert_sink(Arc::new(alerts.clone()));
    for rule in rules {
        builder = builder.rule(rule);
    }

    TestEngine {
        engine: builder.build(),
        logger,
        sleeper,
        alerts,
        clock,
    }
}

fn context(pairs: &[(&str, serde_json::Value)]) -> ErrorContext {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ============================================================================
// Signature Normalization
// ============================================================================

#[test]
fn test_signature_ignores_incidental_values() {
    let normalizer = SignatureNormalizer::default();
    let variants = [
        (
            "order 123 for alice@example.com failed, trace 3f2b1c4d-aaaa-4bbb-8ccc-0123456789ab",
            "order 98765 for bob.smith@corp.io failed, trace 00000000-1111-4222-8333-444455556666",
        ),
        ("retry 1 of 3", "retry 2 of 3"),
        ("User 7 not found", "user 1000 NOT FOUND"),
    ];

    for (a, b) in variants {
        assert_eq!(
            normalizer.normalize("LookupError", a),
            normalizer.normalize("LookupError", b),
            "{:?} vs {:?}",
            a,
            b
        );
    }
}

#[test]
fn test_signature_keeps_error_type_and_bounds_length() {
    let normalizer = SignatureNormalizer::default();
    assert_ne!(
        normalizer.normalize("KeyError", "missing"),
        normalizer.normalize("LookupError", "missing")
    );

    let long_message = "x".repeat(1_000);
    assert_eq!(
        normalizer.normalize("Error", &long_message).chars().count(),
        200
    );
}

// ============================================================================
// Pattern Aggregation
// ============================================================================

#[tokio::test]
async fn test_messages_differing_in_numbers_share_a_pattern() {
    let t = test_engine(vec![]);

    let first = t
        .engine
        .handle_error(
            ErrorReport::new("LookupError", "order 123 not found"),
            ErrorContext::new(),
        )
        .await;
    let second = t
        .engine
        .handle_error(
            ErrorReport::new("LookupError", "order 987 not found"),
            ErrorContext::new(),
        )
        .await;

    assert_eq!(first.pattern_id, second.pattern_id);
    assert_eq!((first.occurrence_count, second.occurrence_count), (1, 2));
    let pattern = t.engine.pattern(&first.pattern_id).unwrap();
    assert_eq!(pattern.occurrence_count, 2);
    assert_eq!(pattern.message, "order 123 not found");
    assert_eq!(t.engine.instances_for_pattern(&pattern.pattern_id).len(), 2);
}

#[tokio::test]
async fn test_occurrence_count_and_max_severity_over_sequence() {
    let t = test_engine(vec![]);
    // Signatures are truncated, so these share one pattern while the
    // trailing keyword still drives each call's severity.
    let prefix = "checkout step failed ".repeat(12);
    let messages = [
        format!("{}retrying", prefix),
        format!("{}fatal", prefix),
        format!("{}minor", prefix),
        format!("{}retrying", prefix),
    ];

    let mut outcomes = Vec::new();
    for message in &messages {
        outcomes.push(
            t.engine
                .handle_error(ErrorReport::new("CheckoutError", message.as_str()), ErrorContext::new())
                .await,
        );
    }

    let severities: Vec<Severity> = outcomes
        .iter()
        .map(|o| o.classification.severity)
        .collect();
    assert_eq!(
        severities,
        vec![Severity::Medium, Severity::Critical, Severity::Low, Severity::Medium]
    );
    assert!(outcomes.iter().all(|o| o.pattern_id == outcomes[0].pattern_id));

    let pattern = t.engine.pattern(&outcomes[0].pattern_id).unwrap();
    assert_eq!(pattern.occurrence_count, messages.len() as u64);
    assert_eq!(pattern.severity, Severity::Critical);
    // Action was fixed when the pattern was first seen at medium severity
    assert_eq!(pattern.recovery_action, RecoveryAction::ManualIntervention);
}

#[tokio::test]
async fn test_repeat_updates_last_seen() {
    let classifier = ErrorClassifier::new();
    assert_eq!(
        classifier.classify("WorkerError", "job stalled").severity,
        Severity::Medium
    );

    let t = test_engine(vec![]);
    let report = || ErrorReport::new("WorkerError", "job stalled");
    t.engine.handle_error(report(), ErrorContext::new()).await;
    t.clock.advance(Duration::from_secs(5));
    t.engine.handle_error(report(), ErrorContext::new()).await;

    let pattern = t.engine.pattern_for("WorkerError", "job stalled").unwrap();
    assert_eq!(pattern.occurrence_count, 2);
    assert_eq!(pattern.severity, Severity::Medium);
    assert_eq!(
        pattern.last_seen - pattern.first_seen,
        chrono::Duration::seconds(5)
    );
}

// ============================================================================
// Circuit Breaking
// ============================================================================

#[tokio::test]
async fn test_circuit_opens_after_threshold_and_stays_open() {
    let threshold = 3;
    let t = test_engine(vec![RecoveryRule::new(
        Category::ExternalService,
        RecoveryAction::CircuitBreak,
    )
    .with_circuit_breaker_threshold(threshold)]);
    let ctx = context(&[("service_key", json!("payments"))]);

    for call in 1..=10u32 {
        let outcome = t
            .engine
            .handle_error(
                ErrorReport::new("GatewayError", "payments upstream timed out"),
                ctx.clone(),
            )
            .await;

        assert!(!outcome.success, "circuit break never resolves the call");
        assert_eq!(outcome.action, RecoveryAction::CircuitBreak);
        let expected = if call > threshold {
            CircuitState::Open
        } else {
            CircuitState::Closed
        };
        assert_eq!(t.engine.circuit_state("payments"), expected, "call {}", call);
    }

    let stats = t.engine.get_statistics();
    let breaker = &stats.circuit_breaker_snapshot["payments"];
    assert_eq!(breaker.failure_count, 10);
    assert_eq!(breaker.threshold, threshold);
}

#[tokio::test]
async fn test_open_circuit_blocks_retry_until_reset() {
    let t = test_engine(vec![
        RecoveryRule::new(Category::ExternalService, RecoveryAction::CircuitBreak)
            .with_circuit_breaker_threshold(0),
        RecoveryRule::new(Category::Infrastructure, RecoveryAction::Retry).with_retry(2, 1.0),
    ]);
    let ctx = context(&[("service", json!("orders-db"))]);

    t.engine
        .handle_error(
            ErrorReport::new("GatewayError", "orders service unavailable"),
            ctx.clone(),
        )
        .await;
    assert!(t.engine.is_circuit_open("orders-db"));

    let blocked = t
        .engine
        .handle_error(ErrorReport::new("DbError", "connection reset"), ctx.clone())
        .await;
    assert!(!blocked.success);
    assert!(blocked.detail.contains("circuit breaker open"));
    assert!(t.sleeper.delays().is_empty());

    assert!(t.engine.reset_circuit_breaker("orders-db"));
    let retried = t
        .engine
        .handle_error(ErrorReport::new("DbError", "connection reset"), ctx)
        .await;
    assert!(retried.success);
    assert_eq!(t.sleeper.delays(), vec![Duration::from_secs(1)]);
}

// ============================================================================
// Retry Backoff
// ============================================================================

#[tokio::test]
async fn test_retry_schedule_is_zero_one_two() {
    let t = test_engine(vec![]);

    let outcome = t
        .engine
        .handle_error(
            ErrorReport::new("OperationalError", "database connection lost"),
            ErrorContext::new(),
        )
        .await;

    assert_eq!(outcome.action, RecoveryAction::Retry);
    assert!(outcome.success);
    assert_eq!(
        t.sleeper.delays(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert_eq!(t.sleeper.total(), Duration::from_secs(3));
}

#[tokio::test]
async fn test_retry_with_operation_reports_exhaustion() {
    let t = test_engine(vec![]);
    let op = |_attempt: u32| async move { Err::<(), _>("still down") };

    let outcome = t
        .engine
        .handle_error_with_retry(
            ErrorReport::new("OperationalError", "database connection lost"),
            ErrorContext::new(),
            &op,
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.state, HandlingState::Failed);
    assert_eq!(
        outcome.error.as_deref(),
        Some("retry exhausted after 3 attempts: still down")
    );
    assert_eq!(t.sleeper.total(), Duration::from_secs(3));
}

#[tokio::test]
async fn test_retry_backoff_is_cancellable() {
    // Real sleeper: dropping the future must abandon the 1s backoff.
    let engine = RecoveryEngine::builder()
        .logger(Arc::new(MemoryLogger::new()))
        .build();
    let op = |_attempt: u32| async move { Err::<(), _>("down") };

    let result = tokio::time::timeout(
        Duration::from_millis(20),
        engine.handle_error_with_retry(
            ErrorReport::new("OperationalError", "database connection lost"),
            ErrorContext::new(),
            &op,
        ),
    )
    .await;

    assert!(result.is_err());
}

// ============================================================================
// Escalation
// ============================================================================

#[tokio::test]
async fn test_escalate_fails_and_logs_critical_once_per_call() {
    let t = test_engine(vec![]);

    for call in 1..=3 {
        let outcome = t
            .engine
            .handle_error(
                ErrorReport::new("RuntimeError", "Authentication failed for user"),
                context(&[("user_id", json!("u-7"))]),
            )
            .await;

        assert_eq!(outcome.action, RecoveryAction::Escalate);
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("escalated for manual intervention")
        );
        assert_eq!(t.logger.entries_at(EventLevel::Critical).len(), call);
    }

    let entry = &t.logger.entries_at(EventLevel::Critical)[2];
    assert_eq!(entry.fields["occurrence_count"], json!(3));
    assert_eq!(entry.fields["severity"], json!("critical"));
    assert_eq!(t.alerts.alerts().len(), 3);
    assert_eq!(t.alerts.alerts()[0].severity, Severity::Critical);
}

struct UnreachablePager;

#[async_trait::async_trait]
impl AlertSink for UnreachablePager {
    fn name(&self) -> &str {
        "pager"
    }

    async fn notify(&self, _alert: &Alert) -> Result<(), AlertError> {
        Err(AlertError::Delivery("pager gateway unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_alert_delivery_failure_does_not_change_escalation() {
    let logger = MemoryLogger::new();
    let engine = RecoveryEngine::builder()
        .logger(Arc::new(logger.clone()))
        .sleeper(Arc::new(RecordingSleeper::new()))
        .alert_sink(Arc::new(UnreachablePager))
        .build();

    let outcome = engine
        .handle_error(
            ErrorReport::new("RuntimeError", "Authentication failed"),
            ErrorContext::new(),
        )
        .await;

    assert_eq!(outcome.action, RecoveryAction::Escalate);
    assert!(!outcome.success);
    assert_eq!(
        outcome.error.as_deref(),
        Some("escalated for manual intervention")
    );
    assert_eq!(logger.entries_at(EventLevel::Critical).len(), 1);
    assert!(logger.entries_at(EventLevel::Error).is_empty());
}

// ============================================================================
// Classification Scenarios
// ============================================================================

#[tokio::test]
async fn test_authentication_failure_is_critical() {
    let t = test_engine(vec![]);
    let outcome = t
        .engine
        .handle_error(
            ErrorReport::new("RuntimeError", "Authentication failed for user"),
            ErrorContext::new(),
        )
        .await;

    assert_eq!(outcome.classification.category, Category::Authentication);
    assert_eq!(outcome.classification.severity, Severity::Critical);
}

#[tokio::test]
async fn test_validation_error_is_ignored_successfully() {
    let t = test_engine(vec![]);
    let outcome = t
        .engine
        .handle_error(
            ErrorReport::new("ValueError", "Validation error: field required"),
            ErrorContext::new(),
        )
        .await;

    assert_eq!(outcome.classification.category, Category::Validation);
    assert_eq!(outcome.classification.severity, Severity::Low);
    assert_eq!(
        RecoveryRuleEngine::default_action(Category::Validation, Severity::Low),
        RecoveryAction::Ignore
    );
    assert_eq!(outcome.action, RecoveryAction::Ignore);
    assert!(outcome.success);
}

#[tokio::test]
async fn test_minor_keyword_cannot_downgrade_security() {
    let t = test_engine(vec![]);
    let outcome = t
        .engine
        .handle_error(
            ErrorReport::new("RequestError", "minor sql injection attempt blocked"),
            ErrorContext::new(),
        )
        .await;

    assert_eq!(outcome.classification.category, Category::Security);
    assert_eq!(outcome.classification.severity, Severity::Critical);
    assert_eq!(outcome.action, RecoveryAction::Escalate);
}

// ============================================================================
// Fallback and Restart
// ============================================================================

#[tokio::test]
async fn test_fallback_returns_context_payload() {
    let t = test_engine(vec![]);
    let outcome = t
        .engine
        .handle_error(
            ErrorReport::new("SlowQuery", "report generation too slow"),
            context(&[("fallback_data", json!({"cached": true}))]),
        )
        .await;

    assert_eq!(outcome.action, RecoveryAction::Fallback);
    assert!(outcome.success);
    assert_eq!(outcome.data, Some(json!({"cached": true})));
}

#[tokio::test]
async fn test_restart_service_uses_configured_delay() {
    let t = test_engine(vec![RecoveryRule::new(
        Category::Infrastructure,
        RecoveryAction::RestartService,
    )]);
    let outcome = t
        .engine
        .handle_error(
            ErrorReport::new("PoolError", "connection pool exhausted"),
            context(&[("service", json!("inventory"))]),
        )
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.detail, "service inventory restarted");
    assert_eq!(t.sleeper.delays(), vec![Duration::from_secs(2)]);
    assert_eq!(t.logger.entries_at(EventLevel::Warning).len(), 1);
}

// ============================================================================
// Statistics
// ============================================================================

#[tokio::test]
async fn test_statistics_are_consistent_and_read_only() {
    let t = test_engine(vec![RecoveryRule::new(
        Category::Validation,
        RecoveryAction::Ignore,
    )]);
    let reports = [
        ErrorReport::new("ValueError", "invalid email"),
        ErrorReport::new("ValueError", "invalid email"),
        ErrorReport::new("RuntimeError", "login failed"),
        ErrorReport::new("OperationalError", "sql syntax error near 42"),
    ];
    for report in reports {
        t.engine.handle_error(report, ErrorContext::new()).await;
    }

    let stats = t.engine.get_statistics();
    assert_eq!(stats.total_patterns, 3);
    assert_eq!(stats.total_instances, 4);
    assert_eq!(stats.active_rules, 1);
    assert_eq!(stats.circuit_breakers, 0);
    assert_eq!(stats.breakdown_by_severity.values().sum::<usize>(), 3);
    assert_eq!(stats.breakdown_by_recovery_action["escalate"], 1);
    assert_eq!(stats.recent_patterns.len(), 3);
    assert_eq!(t.engine.get_statistics(), stats);

    let json: serde_json::Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
    assert_eq!(json["total_instances"], 4);
}
