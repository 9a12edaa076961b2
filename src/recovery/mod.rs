//! Recovery actions and the machinery that executes them.
//!
//! A pattern's [`RecoveryAction`] is chosen once by the [`RecoveryRuleEngine`]
//! when the pattern is first seen, then executed by the [`RecoveryExecutor`]
//! on every occurrence. Built-in actions can be replaced per rule by a
//! registered [`RecoveryHandler`].

pub mod backoff;
pub mod circuit_breaker;
pub mod executor;
pub mod rules;

pub use backoff::RetryStrategy;
pub use circuit_breaker::{CircuitBreakerState, CircuitBreakerTable, CircuitState};
pub use executor::{ExecutorSettings, RecoveryExecutor};
pub use rules::{RecoveryRule, RecoveryRuleEngine, ResolvedAction};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use thiserror::Error;

use crate::registry::{ErrorContext, ErrorInstance, ErrorPattern};

/// What the engine does about a pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Retry with exponential backoff.
    Retry,
    /// Serve degraded data instead of failing.
    Fallback,
    /// Count the failure against the dependency's circuit breaker.
    CircuitBreak,
    /// Raise a critical log entry and alert; never resolves the call.
    Escalate,
    /// Accept the failure as harmless.
    Ignore,
    /// Restart the affected service.
    RestartService,
    /// Leave it for a human.
    ManualIntervention,
}

impl RecoveryAction {
    /// All actions, in declaration order.
    pub const ALL: [RecoveryAction; 7] = [
        RecoveryAction::Retry,
        RecoveryAction::Fallback,
        RecoveryAction::CircuitBreak,
        RecoveryAction::Escalate,
        RecoveryAction::Ignore,
        RecoveryAction::RestartService,
        RecoveryAction::ManualIntervention,
    ];

    /// Stable snake_case name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Retry => "retry",
            RecoveryAction::Fallback => "fallback",
            RecoveryAction::CircuitBreak => "circuit_break",
            RecoveryAction::Escalate => "escalate",
            RecoveryAction::Ignore => "ignore",
            RecoveryAction::RestartService => "restart_service",
            RecoveryAction::ManualIntervention => "manual_intervention",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single recovery attempt produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Whether the call counts as recovered.
    pub success: bool,
    /// Human-readable description of what happened.
    pub detail: String,
    /// Optional payload handed back to the caller (fallback data, etc.).
    pub data: Option<Value>,
}

impl ActionResult {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
            data: None,
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
            data: None,
        }
    }

    /// Attaches a payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Errors raised while executing a recovery action.
///
/// These never reach callers of `handle_error`; the engine converts them
/// into a failed outcome and logs them.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// A custom handler reported a failure of its own.
    #[error("recovery handler '{name}' failed: {reason}")]
    Handler { name: String, reason: String },

    /// A handler or executor panicked.
    #[error("recovery action {action} panicked: {message}")]
    Panicked { action: String, message: String },

    /// The executor could not carry out the action.
    #[error("recovery action {action} could not run: {reason}")]
    Execution { action: RecoveryAction, reason: String },
}

/// Pluggable replacement for a built-in recovery action.
///
/// Register one with `RecoveryEngine::register_custom_handler` and name it in
/// a [`RecoveryRule::custom_handler`] to route a category to it.
#[async_trait]
pub trait RecoveryHandler: Send + Sync {
    async fn recover(
        &self,
        pattern: &ErrorPattern,
        instance: &ErrorInstance,
        context: &ErrorContext,
    ) -> Result<ActionResult, RecoveryError>;
}

#[async_trait]
impl<F> RecoveryHandler for F
where
    F: Fn(&ErrorPattern, &ErrorInstance, &ErrorContext) -> Result<ActionResult, RecoveryError>
        + Send
        + Sync,
{
    async fn recover(
        &self,
        pattern: &ErrorPattern,
        instance: &ErrorInstance,
        context: &ErrorContext,
    ) -> Result<ActionResult, RecoveryError> {
        (self)(pattern, instance, context)
    }
}

/// The protected operation a `Retry` re-executes.
///
/// `attempt` is zero-based. Any `Fn(u32) -> impl Future<Output = Result<(), E>>`
/// closure qualifies.
#[async_trait]
pub trait RetryableOperation: Send + Sync {
    async fn attempt(&self, attempt: u32) -> Result<(), String>;
}

#[async_trait]
impl<F, Fut, E> RetryableOperation for F
where
    F: Fn(u32) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: fmt::Display + 'static,
{
    async fn attempt(&self, attempt: u32) -> Result<(), String> {
        (self)(attempt).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_match_serde() {
        for action in RecoveryAction::ALL {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action));
        }
    }

    #[test]
    fn test_action_result_builders() {
        let ok = ActionResult::success("done").with_data(serde_json::json!({"k": 1}));
        assert!(ok.success);
        assert_eq!(ok.detail, "done");
        assert_eq!(ok.data, Some(serde_json::json!({"k": 1})));

        let failed = ActionResult::failure("nope");
        assert!(!failed.success);
        assert!(failed.data.is_none());
    }

    #[test]
    fn test_recovery_error_display() {
        let err = RecoveryError::Handler {
            name: "page-oncall".to_string(),
            reason: "webhook 500".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "recovery handler 'page-oncall' failed: webhook 500"
        );

        let err = RecoveryError::Execution {
            action: RecoveryAction::RestartService,
            reason: "no orchestrator".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "recovery action restart_service could not run: no orchestrator"
        );
    }

    #[tokio::test]
    async fn test_closure_is_retryable_operation() {
        let op = |attempt: u32| async move {
            if attempt == 0 {
                Err("first attempt fails")
            } else {
                Ok(())
            }
        };
        assert_eq!(
            op.attempt(0).await,
            Err("first attempt fails".to_string())
        );
        assert_eq!(op.attempt(1).await, Ok(()));
    }
}
