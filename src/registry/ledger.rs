//! Append-only record of individual error occurrences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Caller-supplied key/value context attached to an occurrence.
pub type ErrorContext = HashMap<String, Value>;

/// One call to `handle_error`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInstance {
    pub instance_id: String,
    /// Id of the [`ErrorPattern`](super::ErrorPattern) this occurrence matched.
    pub pattern_id: String,
    pub timestamp: DateTime<Utc>,
    pub context: ErrorContext,
    pub stack_trace: Option<String>,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
    pub resolved: bool,
    pub resolution_notes: Option<String>,
}

impl ErrorInstance {
    /// Creates an unresolved instance with a fresh id.
    pub fn new(
        pattern_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        context: ErrorContext,
    ) -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            pattern_id: pattern_id.into(),
            timestamp,
            context,
            stack_trace: None,
            user_id: None,
            request_id: None,
            resolved: false,
            resolution_notes: None,
        }
    }
}

/// Thread-safe, append-only list of [`ErrorInstance`]s.
///
/// Instances are never removed; the only mutation allowed after append is
/// marking one resolved. The ledger therefore grows with every call, even
/// when the pattern registry is capped, and lookups scan it linearly.
#[derive(Debug, Default)]
pub struct InstanceLedger {
    instances: RwLock<Vec<ErrorInstance>>,
}

impl InstanceLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an instance and returns its id.
    pub fn append(&self, instance: ErrorInstance) -> String {
        let id = instance.instance_id.clone();
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(instance);
        id
    }

    /// Marks an instance resolved. Returns false if no such instance exists.
    pub fn mark_resolved(&self, instance_id: &str, notes: impl Into<String>) -> bool {
        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Recent instances are the likely target
        match instances
            .iter_mut()
            .rev()
            .find(|i| i.instance_id == instance_id)
        {
            Some(instance) => {
                instance.resolved = true;
                instance.resolution_notes = Some(notes.into());
                true
            }
            None => false,
        }
    }

    /// Looks up one instance by id.
    pub fn get(&self, instance_id: &str) -> Option<ErrorInstance> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|i| i.instance_id == instance_id)
            .cloned()
    }

    /// All instances of one pattern, oldest first.
    pub fn instances_for_pattern(&self, pattern_id: &str) -> Vec<ErrorInstance> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|i| i.pattern_id == pattern_id)
            .cloned()
            .collect()
    }

    /// Number of recorded instances.
    pub fn len(&self) -> usize {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of instances marked resolved.
    pub fn resolved_count(&self) -> usize {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|i| i.resolved)
            .count()
    }

    /// Copy of the whole ledger, taken under a single read lock.
    pub fn snapshot(&self) -> Vec<ErrorInstance> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
