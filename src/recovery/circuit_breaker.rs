//! Per-dependency circuit breakers.
//!
//! Each service key gets a breaker that counts failures recorded against it.
//! Once the count exceeds the breaker's threshold the circuit *opens* and
//! stays open: there is no cooldown or half-open trial call. Only an explicit
//! [`CircuitBreakerTable::reset`] closes it again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Circuit breaker state for a single service key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy: further attempts are sanctioned.
    Closed,
    /// Tripped: further attempts are refused until reset.
    Open,
}

/// Snapshot of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    /// Failures tolerated before the circuit opens.
    pub threshold: u32,
}

impl CircuitBreakerState {
    fn new(threshold: u32) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            threshold,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}

/// Thread-safe map from service key to breaker.
#[derive(Debug)]
pub struct CircuitBreakerTable {
    breakers: Mutex<HashMap<String, CircuitBreakerState>>,
    default_threshold: u32,
}

impl Default for CircuitBreakerTable {
    fn default() -> Self {
        Self::new(5)
    }
}

impl CircuitBreakerTable {
    /// Creates an empty table whose breakers default to `default_threshold`.
    pub fn new(default_threshold: u32) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            default_threshold,
        }
    }

    pub fn default_threshold(&self) -> u32 {
        self.default_threshold
    }

    /// Records a failure against `key` and returns the updated breaker.
    ///
    /// A breaker is created on first use with `threshold`, or the table
    /// default when `None`. The threshold is fixed from then on.
    pub fn record_failure(
        &self,
        key: &str,
        threshold: Option<u32>,
        now: DateTime<Utc>,
    ) -> CircuitBreakerState {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let breaker = breakers
            .entry(key.to_string())
            .or_insert_with(|| CircuitBreakerState::new(threshold.unwrap_or(self.default_threshold)));

        breaker.failure_count = breaker.failure_count.saturating_add(1);
        breaker.last_failure = Some(now);
        if breaker.failure_count > breaker.threshold && breaker.state == CircuitState::Closed {
            breaker.state = CircuitState::Open;
            warn!(
                service_key = %key,
                failures = breaker.failure_count,
                threshold = breaker.threshold,
                "Circuit breaker opened"
            );
        }
        breaker.clone()
    }

    /// Current breaker for `key`, if one exists.
    pub fn get(&self, key: &str) -> Option<CircuitBreakerState> {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// State for `key`; keys never seen are `Closed`.
    pub fn state(&self, key: &str) -> CircuitState {
        self.get(key)
            .map(|b| b.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn is_open(&self, key: &str) -> bool {
        self.state(key) == CircuitState::Open
    }

    /// Administratively closes the breaker for `key` and clears its count.
    ///
    /// Returns false if no breaker exists for `key`.
    pub fn reset(&self, key: &str) -> bool {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        match breakers.get_mut(key) {
            Some(breaker) => {
                breaker.state = CircuitState::Closed;
                breaker.failure_count = 0;
                info!(service_key = %key, "Circuit breaker reset");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every breaker, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, CircuitBreakerState> {
        self.breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
