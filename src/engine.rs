//! The recovery engine: one entry point for every failure.
//!
//! [`RecoveryEngine::handle_error`] walks each report through a fixed
//! pipeline:
//!
//! ```text
//! Received -> Normalized -> Classified -> Registered -> InstanceRecorded
//!          -> ActionResolved -> ActionExecuted -> Resolved | Failed
//! ```
//!
//! All state (patterns, instances, rules, breakers, handlers) is owned by the
//! engine instance, so independent engines never share anything.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::config::EngineConfig;
use crate::error::{Classification, ErrorClassifier, SignatureNormalizer};
use crate::logging::{Logger, TracingLogger};
use crate::metrics::{EngineStatistics, StatisticsReporter};
use crate::notification::AlertSink;
use crate::recovery::executor::context_str;
use crate::recovery::{
    CircuitBreakerTable, CircuitState, RecoveryAction, RecoveryExecutor, RecoveryHandler,
    RecoveryRule, RecoveryRuleEngine, RetryableOperation,
};
use crate::registry::{ErrorContext, ErrorInstance, ErrorPattern, InstanceLedger, PatternRegistry};

/// A failure as reported by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Short type name of the failure (e.g. `TimeoutError`)
    pub error_type: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
}

impl ErrorReport {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            stack_trace: None,
            user_id: None,
            request_id: None,
        }
    }

    /// Builds a report from a Rust error, using its unqualified type name.
    ///
    /// ```
    /// use mender::ErrorReport;
    ///
    /// let err = "x".parse::<u32>().unwrap_err();
    /// let report = ErrorReport::from_error(&err);
    /// assert_eq!(report.error_type, "ParseIntError");
    /// ```
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        Self::new(short_type_name::<E>(), err.to_string())
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Pipeline stage of a single `handle_error` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlingState {
    Received,
    Normalized,
    Classified,
    Registered,
    InstanceRecorded,
    ActionResolved,
    ActionExecuted,
    /// Recovery succeeded and the instance was marked resolved.
    Resolved,
    /// Recovery did not succeed; the instance stays unresolved.
    Failed,
}

impl HandlingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandlingState::Resolved | HandlingState::Failed)
    }
}

impl fmt::Display for HandlingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandlingState::Received => "received",
            HandlingState::Normalized => "normalized",
            HandlingState::Classified => "classified",
            HandlingState::Registered => "registered",
            HandlingState::InstanceRecorded => "instance_recorded",
            HandlingState::ActionResolved => "action_resolved",
            HandlingState::ActionExecuted => "action_executed",
            HandlingState::Resolved => "resolved",
            HandlingState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of handling one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Whether the failure counts as recovered
    pub success: bool,
    /// Human-readable reason when `success` is false
    pub error: Option<String>,
    /// What the recovery action reported
    pub detail: String,
    pub action: RecoveryAction,
    /// Custom handler the pattern routes to, if any
    pub custom_handler: Option<String>,
    pub pattern_id: String,
    /// The pattern's occurrence count including this call
    pub occurrence_count: u64,
    pub instance_id: String,
    pub signature: String,
    pub classification: Classification,
    /// Payload from the action (fallback data, breaker snapshot, ...)
    pub data: Option<Value>,
    /// Terminal state, always `Resolved` or `Failed`
    pub state: HandlingState,
}

/// Builder for [`RecoveryEngine`].
pub struct RecoveryEngineBuilder {
    config: EngineConfig,
    classifier: Option<ErrorClassifier>,
    logger: Arc<dyn Logger>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for RecoveryEngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            classifier: None,
            logger: Arc::new(TracingLogger),
            alert_sink: None,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl RecoveryEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration, including its startup rules.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Appends a startup rule after any from the configuration.
    pub fn rule(mut self, rule: RecoveryRule) -> Self {
        self.config.rules.push(rule);
        self
    }

    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> RecoveryEngine {
        let config = self.config;
        let patterns = Arc::new(match config.max_patterns {
            Some(limit) => PatternRegistry::with_capacity_limit(limit),
            None => PatternRegistry::new(),
        });
        let instances = Arc::new(InstanceLedger::new());
        let rules = Arc::new(RecoveryRuleEngine::with_rules(config.rules.clone()));
        let breakers = Arc::new(CircuitBreakerTable::new(
            config.default_circuit_breaker_threshold,
        ));

        let mut executor =
            RecoveryExecutor::new(rules.clone(), breakers.clone(), config.executor_settings())
                .with_logger(self.logger)
                .with_clock(self.clock.clone())
                .with_sleeper(self.sleeper);
        if let Some(sink) = self.alert_sink {
            executor = executor.with_alert_sink(sink);
        }

        let reporter = StatisticsReporter::new(
            patterns.clone(),
            instances.clone(),
            rules.clone(),
            breakers.clone(),
        )
        .with_recent_limit(config.recent_patterns_limit);

        info!(
            rules = config.rules.len(),
            max_patterns = ?config.max_patterns,
            "Recovery engine initialized"
        );

        RecoveryEngine {
            normalizer: SignatureNormalizer::new(config.max_signature_length),
            classifier: self.classifier.unwrap_or_default(),
            patterns,
            instances,
            rules,
            breakers,
            executor,
            reporter,
            clock: self.clock,
            config,
        }
    }
}

/// Classifies failures, tracks them and runs their recovery.
///
/// Safe to share across tasks behind an `Arc`; every method takes `&self`.
pub struct RecoveryEngine {
    normalizer: SignatureNormalizer,
    classifier: ErrorClassifier,
    patterns: Arc<PatternRegistry>,
    instances: Arc<InstanceLedger>,
    rules: Arc<RecoveryRuleEngine>,
    breakers: Arc<CircuitBreakerTable>,
    executor: RecoveryExecutor,
    reporter: StatisticsReporter,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl fmt::Debug for RecoveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryEngine")
            .field("config", &self.config)
            .field("patterns", &self.patterns.len())
            .field("instances", &self.instances.len())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryEngine {
    /// Engine with default configuration, tracing logger and real time.
    pub fn new() -> Self {
        RecoveryEngineBuilder::new().build()
    }

    pub fn builder() -> RecoveryEngineBuilder {
        RecoveryEngineBuilder::new()
    }

    pub fn from_config(config: EngineConfig) -> Self {
        RecoveryEngineBuilder::new().config(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handles a failure, running the pattern's recovery action in advisory
    /// mode: a `Retry` paces its backoff schedule without re-running anything.
    ///
    /// Never fails. Internal faults come back as a failed [`Outcome`].
    pub async fn handle_error(&self, report: ErrorReport, context: ErrorContext) -> Outcome {
        self.handle(report, context, None).await
    }

    /// Like [`handle_error`](Self::handle_error), but a `Retry` re-invokes
    /// `operation` each round and succeeds on its first `Ok`.
    ///
    /// Dropping the returned future abandons any in-progress backoff.
    pub async fn handle_error_with_retry<O>(
        &self,
        report: ErrorReport,
        context: ErrorContext,
        operation: &O,
    ) -> Outcome
    where
        O: RetryableOperation,
    {
        self.handle(report, context, Some(operation)).await
    }

    async fn handle(
        &self,
        report: ErrorReport,
        context: ErrorContext,
        operation: Option<&dyn RetryableOperation>,
    ) -> Outcome {
        let mut state = HandlingState::Received;

        let signature = self.normalizer.normalize(&report.error_type, &report.message);
        advance(&mut state, HandlingState::Normalized);

        let classification = self.classifier.classify(&report.error_type, &report.message);
        advance(&mut state, HandlingState::Classified);

        let now = self.clock.now();
        let pattern = self.patterns.upsert(
            &signature,
            &report.message,
            &classification,
            now,
            |category, severity| self.rules.resolve_action(category, severity),
        );
        advance(&mut state, HandlingState::Registered);

        let instance = self.record_instance(&pattern, &report, &context, now);
        advance(&mut state, HandlingState::InstanceRecorded);

        // Stored on the pattern at creation; repeats keep it.
        debug!(
            pattern_id = %pattern.pattern_id,
            action = %pattern.recovery_action,
            handler = ?pattern.custom_handler,
            occurrences = pattern.occurrence_count,
            "Resolved recovery action"
        );
        advance(&mut state, HandlingState::ActionResolved);

        let result = self
            .executor
            .execute(&pattern, &instance, &context, operation)
            .await;
        advance(&mut state, HandlingState::ActionExecuted);

        if result.success {
            let label = pattern
                .custom_handler
                .clone()
                .unwrap_or_else(|| pattern.recovery_action.to_string());
            self.instances.mark_resolved(
                &instance.instance_id,
                format!("Recovered automatically via {}", label),
            );
            advance(&mut state, HandlingState::Resolved);
        } else {
            advance(&mut state, HandlingState::Failed);
        }

        Outcome {
            success: result.success,
            error: (!result.success).then(|| result.detail.clone()),
            detail: result.detail,
            action: pattern.recovery_action,
            custom_handler: pattern.custom_handler,
            pattern_id: pattern.pattern_id,
            occurrence_count: pattern.occurrence_count,
            instance_id: instance.instance_id,
            signature,
            classification,
            data: result.data,
            state,
        }
    }

    fn record_instance(
        &self,
        pattern: &ErrorPattern,
        report: &ErrorReport,
        context: &ErrorContext,
        now: chrono::DateTime<chrono::Utc>,
    ) -> ErrorInstance {
        let mut instance = ErrorInstance::new(pattern.pattern_id.clone(), now, context.clone());
        instance.stack_trace = report
            .stack_trace
            .clone()
            .or_else(|| context_str(context, "stack_trace"));
        instance.user_id = report
            .user_id
            .clone()
            .or_else(|| context_str(context, "user_id"));
        instance.request_id = report
            .request_id
            .clone()
            .or_else(|| context_str(context, "request_id"));
        self.instances.append(instance.clone());
        instance
    }

    /// Read-only snapshot of engine statistics.
    pub fn get_statistics(&self) -> EngineStatistics {
        self.reporter.report()
    }

    /// Appends a rule. Only patterns created afterwards pick it up, and only
    /// if no earlier enabled rule covers the same category.
    pub fn add_recovery_rule(&self, rule: RecoveryRule) {
        debug!(
            category = %rule.category,
            action = %rule.recovery_action,
            enabled = rule.enabled,
            "Adding recovery rule"
        );
        self.rules.add_rule(rule);
    }

    pub fn recovery_rules(&self) -> Vec<RecoveryRule> {
        self.rules.rules()
    }

    /// Registers a handler that rules can route to by `name`.
    /// Re-registering a name replaces the previous handler.
    pub fn register_custom_handler<H>(&self, name: impl Into<String>, handler: H)
    where
        H: RecoveryHandler + 'static,
    {
        let name = name.into();
        if self
            .executor
            .register_handler(name.clone(), Arc::new(handler))
            .is_some()
        {
            debug!(handler = %name, "Replaced custom recovery handler");
        } else {
            debug!(handler = %name, "Registered custom recovery handler");
        }
    }

    pub fn custom_handler_names(&self) -> Vec<String> {
        self.executor.custom_handler_names()
    }

    /// Closes the breaker for `key`. Returns false if there is none.
    pub fn reset_circuit_breaker(&self, key: &str) -> bool {
        self.breakers.reset(key)
    }

    pub fn circuit_state(&self, key: &str) -> CircuitState {
        self.breakers.state(key)
    }

    pub fn is_circuit_open(&self, key: &str) -> bool {
        self.breakers.is_open(key)
    }

    /// Marks an instance resolved out of band, e.g. after a manual fix.
    pub fn mark_resolved(&self, instance_id: &str, notes: impl Into<String>) -> bool {
        self.instances.mark_resolved(instance_id, notes)
    }

    /// Pattern for the signature `error_type` and `message` normalize to.
    pub fn pattern_for(&self, error_type: &str, message: &str) -> Option<ErrorPattern> {
        self.patterns
            .get(&self.normalizer.normalize(error_type, message))
    }

    pub fn pattern(&self, pattern_id: &str) -> Option<ErrorPattern> {
        self.patterns.get_by_id(pattern_id)
    }

    pub fn instance(&self, instance_id: &str) -> Option<ErrorInstance> {
        self.instances.get(instance_id)
    }

    pub fn instances_for_pattern(&self, pattern_id: &str) -> Vec<ErrorInstance> {
        self.instances.instances_for_pattern(pattern_id)
    }
}

fn advance(state: &mut HandlingState, next: HandlingState) {
    trace!(from = %state, to = %next, "handle_error transition");
    *state = next;
}
