//! Pattern and instance bookkeeping.
//!
//! The [`PatternRegistry`] keeps one [`ErrorPattern`] per signature with
//! aggregate counters; the [`InstanceLedger`] keeps every individual
//! occurrence. Both are safe to share across tasks.

pub mod ledger;

pub use ledger::{ErrorContext, ErrorInstance, InstanceLedger};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::error::{Category, Classification, Severity};
use crate::recovery::{RecoveryAction, ResolvedAction};

/// Aggregate state for one recurring error shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub pattern_id: String,
    /// Canonical signature; unique within a registry.
    pub signature: String,
    /// The literal message of the first occurrence.
    pub message: String,
    pub category: Category,
    /// Highest severity seen so far. Never decreases.
    pub severity: Severity,
    pub occurrence_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Resolved once at creation and kept for the pattern's lifetime.
    pub recovery_action: RecoveryAction,
    /// Custom handler replacing `recovery_action`, if a rule named one.
    pub custom_handler: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Thread-safe map from signature to [`ErrorPattern`].
///
/// Writes go through a single lock, so occurrence counts for one signature
/// are totally ordered. With a capacity set, inserting into a full registry
/// evicts the least recently seen pattern.
#[derive(Debug, Default)]
pub struct PatternRegistry {
    patterns: RwLock<HashMap<String, ErrorPattern>>,
    max_patterns: Option<usize>,
}

impl PatternRegistry {
    /// Creates an unbounded registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding at most `max_patterns` patterns. Zero means unbounded.
    pub fn with_capacity_limit(max_patterns: usize) -> Self {
        Self {
            patterns: RwLock::default(),
            max_patterns: Some(max_patterns).filter(|&n| n > 0),
        }
    }

    /// Records an occurrence of `signature` and returns the updated pattern.
    ///
    /// On first sight the pattern is created with the action returned by
    /// `resolve`; afterwards `resolve` is not called.
    pub fn upsert<F>(
        &self,
        signature: &str,
        message: &str,
        classification: &Classification,
        now: DateTime<Utc>,
        resolve: F,
    ) -> ErrorPattern
    where
        F: FnOnce(Category, Severity) -> ResolvedAction,
    {
        let mut patterns = self.patterns.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(pattern) = patterns.get_mut(signature) {
            pattern.occurrence_count += 1;
            pattern.last_seen = now;
            if classification.severity > pattern.severity {
                debug!(
                    pattern_id = %pattern.pattern_id,
                    from = %pattern.severity,
                    to = %classification.severity,
                    "Raising pattern severity"
                );
                pattern.severity = classification.severity;
            }
            return pattern.clone();
        }

        if let Some(limit) = self.max_patterns {
            while patterns.len() >= limit {
                let Some(oldest) = patterns
                    .values()
                    .min_by_key(|p| p.last_seen)
                    .map(|p| p.signature.clone())
                else {
                    break;
                };
                patterns.remove(&oldest);
                debug!(signature = %oldest, "Evicted least recently seen pattern");
            }
        }

        let resolved = resolve(classification.category, classification.severity);
        let mut metadata = BTreeMap::new();
        metadata.insert("matched_by".to_string(), classification.matched_by.clone());
        metadata.insert(
            "initial_severity".to_string(),
            classification.severity.to_string(),
        );

        let pattern = ErrorPattern {
            pattern_id: uuid::Uuid::new_v4().to_string(),
            signature: signature.to_string(),
            message: message.to_string(),
            category: classification.category,
            severity: classification.severity,
            occurrence_count: 1,
            first_seen: now,
            last_seen: now,
            recovery_action: resolved.action,
            custom_handler: resolved.custom_handler,
            metadata,
        };
        patterns.insert(signature.to_string(), pattern.clone());
        pattern
    }

    pub fn get(&self, signature: &str) -> Option<ErrorPattern> {
        self.patterns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(signature)
            .cloned()
    }

    pub fn get_by_id(&self, pattern_id: &str) -> Option<ErrorPattern> {
        self.patterns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|p| p.pattern_id == pattern_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.patterns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every pattern, taken under a single read lock.
    pub fn snapshot(&self) -> Vec<ErrorPattern> {
        self.patterns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
