//! Recovery rules and action resolution.
//!
//! Resolution is two-tier: the first *enabled* rule registered for a category
//! wins; categories without one fall back to a built-in table keyed by
//! `(category, severity)`. Rules are append-only, so a later rule for an
//! already-covered category is shadowed until the earlier one is disabled.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

use super::RecoveryAction;
use crate::error::{Category, Severity};

/// Operator-supplied recovery policy for one category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRule {
    pub category: Category,
    pub recovery_action: RecoveryAction,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Base delay for exponential backoff.
    ///
    /// Later rounds double it but never wait longer than the larger of this
    /// value and the engine's `max_retry_delay_seconds`.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: f64,
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Name of a registered custom handler that replaces `recovery_action`.
    #[serde(default)]
    pub custom_handler: Option<String>,
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_seconds() -> f64 {
    1.0
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

impl RecoveryRule {
    /// Creates an enabled rule with default retry and breaker parameters.
    pub fn new(category: Category, recovery_action: RecoveryAction) -> Self {
        Self {
            category,
            recovery_action,
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            enabled: true,
            custom_handler: None,
        }
    }

    /// Sets the attempt count and base backoff delay.
    pub fn with_retry(mut self, max_attempts: u32, delay_seconds: f64) -> Self {
        self.max_retry_attempts = max_attempts;
        self.retry_delay_seconds = delay_seconds;
        self
    }

    /// Sets how many failures a breaker tolerates before opening.
    pub fn with_circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker_threshold = threshold;
        self
    }

    /// Routes this category to a registered custom handler.
    pub fn with_custom_handler(mut self, name: impl Into<String>) -> Self {
        self.custom_handler = Some(name.into());
        self
    }

    /// Marks the rule inactive. Disabled rules never match.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// The outcome of resolving a pattern's action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAction {
    pub action: RecoveryAction,
    pub custom_handler: Option<String>,
}

impl ResolvedAction {
    /// A built-in action with no custom handler.
    pub fn builtin(action: RecoveryAction) -> Self {
        Self {
            action,
            custom_handler: None,
        }
    }
}

/// Ordered rule list with built-in defaults.
#[derive(Debug, Default)]
pub struct RecoveryRuleEngine {
    rules: RwLock<Vec<RecoveryRule>>,
}

impl RecoveryRuleEngine {
    /// Creates an engine with no rules, so every category uses the built-in table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine seeded with `rules`, in priority order.
    pub fn with_rules(rules: Vec<RecoveryRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    /// Appends a rule. It only takes effect for categories no earlier enabled rule covers.
    pub fn add_rule(&self, rule: RecoveryRule) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rule);
    }

    /// Copy of all rules in registration order.
    pub fn rules(&self) -> Vec<RecoveryRule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of enabled rules.
    pub fn active_rule_count(&self) -> usize {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.enabled)
            .count()
    }

    /// The first enabled rule for `category`, if any.
    pub fn matching_rule(&self, category: Category) -> Option<RecoveryRule> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.enabled && r.category == category)
            .cloned()
    }

    /// Resolves the action for a newly seen pattern.
    pub fn resolve_action(&self, category: Category, severity: Severity) -> ResolvedAction {
        match self.matching_rule(category) {
            Some(rule) => ResolvedAction {
                action: rule.recovery_action,
                custom_handler: rule.custom_handler,
            },
            None => ResolvedAction::builtin(Self::default_action(category, severity)),
        }
    }

    /// The built-in action for categories no rule covers.
    pub fn default_action(category: Category, severity: Severity) -> RecoveryAction {
        if severity == Severity::Critical {
            return RecoveryAction::Escalate;
        }
        match category {
            Category::Infrastructure => RecoveryAction::Retry,
            Category::ExternalService => RecoveryAction::CircuitBreak,
            Category::Validation => RecoveryAction::Ignore,
            Category::Performance => RecoveryAction::Fallback,
            _ => RecoveryAction::ManualIntervention,
        }
    }
}
