//! Recovery action handlers.
//!
//! The executor runs the action stored on a pattern (or the custom handler
//! that replaces it) and turns whatever happens into an [`ActionResult`].
//! Nothing escapes: handler errors and panics become failed results and are
//! reported through the [`Logger`].

use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    ActionResult, CircuitBreakerTable, RecoveryAction, RecoveryError, RecoveryHandler,
    RecoveryRuleEngine, RetryStrategy, RetryableOperation,
};
use crate::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::logging::{EventLevel, LogFields, Logger, TracingLogger};
use crate::notification::{Alert, AlertSink};
use crate::registry::{ErrorContext, ErrorInstance, ErrorPattern};

/// Context key naming the dependency whose circuit breaker applies.
pub const CONTEXT_SERVICE_KEY: &str = "service_key";
/// Generic service context key, used when a more specific one is absent.
pub const CONTEXT_SERVICE: &str = "service";
/// Context key naming the service to restart.
pub const CONTEXT_SERVICE_NAME: &str = "service_name";
/// Context key carrying the payload a `Fallback` returns.
pub const CONTEXT_FALLBACK_DATA: &str = "fallback_data";

pub(crate) fn context_str(context: &ErrorContext, key: &str) -> Option<String> {
    context.get(key).map(|value| match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// The breaker key for a call: `service_key`, then `service`, then the signature.
pub fn service_key(pattern: &ErrorPattern, context: &ErrorContext) -> String {
    context_str(context, CONTEXT_SERVICE_KEY)
        .or_else(|| context_str(context, CONTEXT_SERVICE))
        .unwrap_or_else(|| pattern.signature.clone())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Tunables that apply when no rule overrides them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Retry schedule for categories without a rule.
    pub retry: RetryStrategy,
    /// Simulated pause while a service "restarts".
    pub restart_delay: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            retry: RetryStrategy::default(),
            restart_delay: Duration::from_secs(2),
        }
    }
}

/// Runs recovery actions against shared rule and breaker state.
pub struct RecoveryExecutor {
    rules: Arc<RecoveryRuleEngine>,
    breakers: Arc<CircuitBreakerTable>,
    handlers: RwLock<HashMap<String, Arc<dyn RecoveryHandler>>>,
    settings: ExecutorSettings,
    logger: Arc<dyn Logger>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RecoveryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryExecutor")
            .field("settings", &self.settings)
            .field("custom_handlers", &self.custom_handler_names())
            .field("alert_sink", &self.alert_sink.as_ref().map(|s| s.name()))
            .finish_non_exhaustive()
    }
}

impl RecoveryExecutor {
    /// Creates an executor that logs through `tracing` and uses real time.
    pub fn new(
        rules: Arc<RecoveryRuleEngine>,
        breakers: Arc<CircuitBreakerTable>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            rules,
            breakers,
            handlers: RwLock::new(HashMap::new()),
            settings,
            logger: Arc::new(TracingLogger),
            alert_sink: None,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Registers a custom handler, returning the one it replaced.
    pub fn register_handler(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn RecoveryHandler>,
    ) -> Option<Arc<dyn RecoveryHandler>> {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), handler)
    }

    /// Names of all registered custom handlers, sorted.
    pub fn custom_handler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn RecoveryHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Executes the recovery for one occurrence.
    ///
    /// `operation` is the protected call a `Retry` re-runs; without it the
    /// retry loop only paces and counts attempts.
    pub async fn execute(
        &self,
        pattern: &ErrorPattern,
        instance: &ErrorInstance,
        context: &ErrorContext,
        operation: Option<&dyn RetryableOperation>,
    ) -> ActionResult {
        let label = pattern
            .custom_handler
            .clone()
            .unwrap_or_else(|| pattern.recovery_action.to_string());

        let attempt = AssertUnwindSafe(self.dispatch(pattern, instance, context, operation))
            .catch_unwind()
            .await;

        let error = match attempt {
            Ok(Ok(result)) => return result,
            Ok(Err(err)) => err,
            Err(payload) => RecoveryError::Panicked {
                action: label.clone(),
                message: panic_message(payload.as_ref()),
            },
        };

        let mut fields = LogFields::new();
        fields.insert("pattern_id".into(), json!(pattern.pattern_id));
        fields.insert("instance_id".into(), json!(instance.instance_id));
        fields.insert("action".into(), json!(label));
        fields.insert("error".into(), json!(error.to_string()));
        self.logger
            .log(EventLevel::Error, "Recovery action failed", &fields);

        ActionResult::failure(error.to_string())
    }

    async fn dispatch(
        &self,
        pattern: &ErrorPattern,
        instance: &ErrorInstance,
        context: &ErrorContext,
        operation: Option<&dyn RetryableOperation>,
    ) -> Result<ActionResult, RecoveryError> {
        if let Some(name) = &pattern.custom_handler {
            match self.handler(name) {
                Some(handler) => {
                    debug!(handler = %name, pattern_id = %pattern.pattern_id, "Running custom handler");
                    return handler.recover(pattern, instance, context).await;
                }
                None => warn!(
                    handler = %name,
                    fallback = %pattern.recovery_action,
                    "Custom handler not registered, using built-in action"
                ),
            }
        }

        match pattern.recovery_action {
            RecoveryAction::Retry => self.retry(pattern, context, operation).await,
            RecoveryAction::Fallback => Ok(self.fallback(pattern, context)),
            RecoveryAction::CircuitBreak => Ok(self.circuit_break(pattern, context)),
            RecoveryAction::Escalate => Ok(self.escalate(pattern, instance, context).await),
            RecoveryAction::RestartService => Ok(self.restart_service(pattern, context).await),
            RecoveryAction::Ignore => Ok(ActionResult::success("error ignored")),
            RecoveryAction::ManualIntervention => {
                Ok(ActionResult::failure("manual intervention required"))
            }
        }
    }

    async fn retry(
        &self,
        pattern: &ErrorPattern,
        context: &ErrorContext,
        operation: Option<&dyn RetryableOperation>,
    ) -> Result<ActionResult, RecoveryError> {
        let rule = self.rules.matching_rule(pattern.category);
        let strategy = RetryStrategy::for_rule(rule.as_ref(), &self.settings.retry);
        let max = strategy.max_attempts;

        let key = service_key(pattern, context);
        if self.breakers.is_open(&key) {
            return Ok(ActionResult::failure(format!(
                "circuit breaker open for {}; retry not sanctioned",
                key
            )));
        }
        if max == 0 {
            return Ok(ActionResult::failure("no retry attempts configured"));
        }

        let mut last_error = String::new();
        for attempt in 0..max {
            let delay = strategy.delay_before(attempt);
            if !delay.is_zero() {
                debug!(attempt = attempt + 1, max, delay_ms = delay.as_millis() as u64, "Backing off");
                self.sleeper.sleep(delay).await;
            }

            match operation {
                Some(op) => match op.attempt(attempt).await {
                    Ok(()) => {
                        return Ok(ActionResult::success(format!(
                            "operation succeeded on attempt {}/{}",
                            attempt + 1,
                            max
                        ))
                        .with_data(json!({ "attempts": attempt + 1 })));
                    }
                    Err(err) => {
                        debug!(attempt = attempt + 1, max, error = %err, "Retry attempt failed");
                        last_error = err;
                    }
                },
                // Advisory mode: nothing to re-run, so retry is sanctioned
                // once the full schedule has been paced out.
                None if attempt + 1 == max => {
                    return Ok(ActionResult::success(format!(
                        "retry sanctioned after {} attempts",
                        max
                    ))
                    .with_data(json!({ "attempts": max })));
                }
                None => {}
            }
        }

        Ok(ActionResult::failure(format!(
            "retry exhausted after {} attempts: {}",
            max, last_error
        ))
        .with_data(json!({ "attempts": max })))
    }

    fn fallback(&self, pattern: &ErrorPattern, context: &ErrorContext) -> ActionResult {
        let key = service_key(pattern, context);
        let circuit_open = self.breakers.is_open(&key);

        let result = match context.get(CONTEXT_FALLBACK_DATA) {
            Some(data) => ActionResult::success("served fallback data").with_data(data.clone()),
            None => ActionResult::success("serving degraded default response").with_data(json!({
                "status": "degraded",
                "message": "Service temporarily degraded, serving default response",
                "circuit_open": circuit_open,
            })),
        };
        if circuit_open {
            ActionResult {
                detail: format!("{} (circuit open for {})", result.detail, key),
                ..result
            }
        } else {
            result
        }
    }

    fn circuit_break(&self, pattern: &ErrorPattern, context: &ErrorContext) -> ActionResult {
        let key = service_key(pattern, context);
        let threshold = self
            .rules
            .matching_rule(pattern.category)
            .map(|r| r.circuit_breaker_threshold);

        let breaker = self.breakers.record_failure(&key, threshold, self.clock.now());
        let data = json!({
            "service_key": key,
            "state": breaker.state,
            "failure_count": breaker.failure_count,
            "threshold": breaker.threshold,
        });

        let detail = if breaker.is_open() {
            format!("circuit breaker open for {}", key)
        } else {
            format!(
                "recording failure for {} ({}/{})",
                key, breaker.failure_count, breaker.threshold
            )
        };
        ActionResult::failure(detail).with_data(data)
    }

    async fn escalate(
        &self,
        pattern: &ErrorPattern,
        instance: &ErrorInstance,
        context: &ErrorContext,
    ) -> ActionResult {
        let mut fields = LogFields::new();
        fields.insert("pattern_id".into(), json!(pattern.pattern_id));
        fields.insert("instance_id".into(), json!(instance.instance_id));
        fields.insert("signature".into(), json!(pattern.signature));
        fields.insert("category".into(), json!(pattern.category));
        fields.insert("severity".into(), json!(pattern.severity));
        fields.insert("occurrence_count".into(), json!(pattern.occurrence_count));
        fields.insert("context".into(), json!(context));
        self.logger.log(
            EventLevel::Critical,
            "Error escalated for manual intervention",
            &fields,
        );

        if let Some(sink) = &self.alert_sink {
            let alert = Alert {
                pattern_id: pattern.pattern_id.clone(),
                severity: pattern.severity,
                summary: format!(
                    "{} {} error seen {} time(s): {}",
                    pattern.severity, pattern.category, pattern.occurrence_count, pattern.message
                ),
                raised_at: self.clock.now(),
            };
            if let Err(err) = sink.notify(&alert).await {
                warn!(sink = sink.name(), error = %err, "Failed to deliver escalation alert");
            }
        }

        ActionResult::failure("escalated for manual intervention")
    }

    async fn restart_service(&self, pattern: &ErrorPattern, context: &ErrorContext) -> ActionResult {
        let service = context_str(context, CONTEXT_SERVICE_NAME)
            .or_else(|| context_str(context, CONTEXT_SERVICE))
            .unwrap_or_else(|| "unknown".to_string());

        let mut fields = LogFields::new();
        fields.insert("service".into(), json!(service));
        fields.insert("pattern_id".into(), json!(pattern.pattern_id));
        self.logger
            .log(EventLevel::Warning, "Restarting service", &fields);

        self.sleeper.sleep(self.settings.restart_delay).await;

        ActionResult::success(format!("service {} restarted", service))
            .with_data(json!({ "service": service }))
    }
}
