//! Alert delivery for escalated errors.
//!
//! The engine does not page anyone itself. When an escalation happens it
//! hands an [`Alert`] to whatever [`AlertSink`] was injected (chat, ticketing,
//! an on-call pager) and carries on regardless of delivery success.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::error::Severity;

/// A request to notify humans about an escalated pattern.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// The pattern that triggered the escalation.
    pub pattern_id: String,
    /// Severity of the pattern at escalation time.
    pub severity: Severity,
    /// One-line human-readable summary.
    pub summary: String,
    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
}

/// Errors that can occur while delivering an alert.
#[derive(Debug, Error)]
pub enum AlertError {
    /// The sink's backend rejected or could not receive the alert.
    #[error("alert delivery failed: {0}")]
    Delivery(String),

    /// The sink is not configured to accept alerts of this kind.
    #[error("alert rejected: {0}")]
    Rejected(String),
}

/// Destination for escalation alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Returns the name of this sink (e.g., "pager", "chat")
    fn name(&self) -> &str;

    /// Deliver an alert.
    async fn notify(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Collects alerts in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryAlertSink {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All alerts delivered so far.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn notify(&self, alert: &Alert) -> Result<(), AlertError> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert.clone());
        Ok(())
    }
}
