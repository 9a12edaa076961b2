//! Statistics over the engine's bookkeeping.
//!
//! This module aggregates the pattern registry, instance ledger and circuit
//! breaker table into a single read-only [`EngineStatistics`] snapshot for
//! dashboards and export. Building a snapshot never mutates engine state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Category, Severity};
use crate::recovery::{CircuitBreakerState, CircuitBreakerTable, RecoveryAction, RecoveryRuleEngine};
use crate::registry::{ErrorPattern, InstanceLedger, PatternRegistry};

/// Default number of patterns listed in [`EngineStatistics::recent_patterns`].
pub const DEFAULT_RECENT_PATTERNS: usize = 10;

/// Condensed view of a pattern for the recent list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub pattern_id: String,
    pub signature: String,
    pub category: Category,
    pub severity: Severity,
    pub occurrence_count: u64,
    pub last_seen: DateTime<Utc>,
    pub recovery_action: RecoveryAction,
}

impl From<&ErrorPattern> for PatternSummary {
    fn from(pattern: &ErrorPattern) -> Self {
        Self {
            pattern_id: pattern.pattern_id.clone(),
            signature: pattern.signature.clone(),
            category: pattern.category,
            severity: pattern.severity,
            occurrence_count: pattern.occurrence_count,
            last_seen: pattern.last_seen,
            recovery_action: pattern.recovery_action,
        }
    }
}

/// Point-in-time statistics for a recovery engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    /// Distinct signatures currently tracked
    pub total_patterns: usize,
    /// Occurrences recorded in the ledger
    pub total_instances: usize,
    /// Occurrences whose recovery succeeded
    pub resolved_instances: usize,
    /// Enabled recovery rules
    pub active_rules: usize,
    /// Service keys with a breaker
    pub circuit_breakers: usize,
    /// Pattern count per category
    pub breakdown_by_category: BTreeMap<String, usize>,
    /// Pattern count per severity
    pub breakdown_by_severity: BTreeMap<String, usize>,
    /// Pattern count per recovery action
    pub breakdown_by_recovery_action: BTreeMap<String, usize>,
    /// Every breaker, keyed by service key
    pub circuit_breaker_snapshot: BTreeMap<String, CircuitBreakerState>,
    /// Most recently seen patterns, newest first
    pub recent_patterns: Vec<PatternSummary>,
}

impl EngineStatistics {
    /// Share of recorded occurrences that were resolved, in `[0, 1]`.
    pub fn resolution_rate(&self) -> f64 {
        if self.total_instances == 0 {
            return 0.0;
        }
        self.resolved_instances as f64 / self.total_instances as f64
    }

    /// Number of breakers currently open.
    pub fn open_circuits(&self) -> usize {
        self.circuit_breaker_snapshot
            .values()
            .filter(|b| b.is_open())
            .count()
    }

    /// Category with the most patterns. Ties go to the alphabetically first.
    pub fn busiest_category(&self) -> Option<&str> {
        self.breakdown_by_category
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, _)| name.as_str())
    }

    /// Pretty-printed JSON snapshot.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Builds [`EngineStatistics`] from shared engine state.
#[derive(Debug, Clone)]
pub struct StatisticsReporter {
    patterns: Arc<PatternRegistry>,
    instances: Arc<InstanceLedger>,
    rules: Arc<RecoveryRuleEngine>,
    breakers: Arc<CircuitBreakerTable>,
    recent_limit: usize,
}

impl StatisticsReporter {
    pub fn new(
        patterns: Arc<PatternRegistry>,
        instances: Arc<InstanceLedger>,
        rules: Arc<RecoveryRuleEngine>,
        breakers: Arc<CircuitBreakerTable>,
    ) -> Self {
        Self {
            patterns,
            instances,
            rules,
            breakers,
            recent_limit: DEFAULT_RECENT_PATTERNS,
        }
    }

    /// Sets how many patterns the recent list holds.
    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    /// Takes a snapshot.
    ///
    /// Each source is copied under its own lock and the locks are released
    /// before aggregation, so counts from different sources may be off by
    /// calls that landed in between.
    pub fn report(&self) -> EngineStatistics {
        let patterns = self.patterns.snapshot();
        let circuit_breaker_snapshot = self.breakers.snapshot();

        let mut breakdown_by_category = BTreeMap::new();
        let mut breakdown_by_severity = BTreeMap::new();
        let mut breakdown_by_recovery_action = BTreeMap::new();
        for pattern in &patterns {
            *breakdown_by_category
                .entry(pattern.category.to_string())
                .or_insert(0) += 1;
            *breakdown_by_severity
                .entry(pattern.severity.to_string())
                .or_insert(0) += 1;
            *breakdown_by_recovery_action
                .entry(pattern.recovery_action.to_string())
                .or_insert(0) += 1;
        }

        let mut recent: Vec<&ErrorPattern> = patterns.iter().collect();
        recent.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.signature.cmp(&b.signature))
        });
        let recent_patterns = recent
            .into_iter()
            .take(self.recent_limit)
            .map(PatternSummary::from)
            .collect();

        EngineStatistics {
            total_patterns: patterns.len(),
            total_instances: self.instances.len(),
            resolved_instances: self.instances.resolved_count(),
            active_rules: self.rules.active_rule_count(),
            circuit_breakers: circuit_breaker_snapshot.len(),
            breakdown_by_category,
            breakdown_by_severity,
            breakdown_by_recovery_action,
            circuit_breaker_snapshot,
            recent_patterns,
        }
    }
}

/// Format statistics for display.
pub fn format_statistics(stats: &EngineStatistics) -> String {
    let mut output = String::from("## Error Recovery Statistics\n\n");

    output.push_str("### Summary\n");
    output.push_str(&format!(
        "- **Patterns**: {} ({} occurrences, {} resolved)\n",
        stats.total_patterns, stats.total_instances, stats.resolved_instances
    ));
    output.push_str(&format!(
        "- **Resolution Rate**: {:.1}%\n",
        stats.resolution_rate() * 100.0
    ));
    output.push_str(&format!("- **Active Rules**: {}\n", stats.active_rules));
    output.push_str(&format!(
        "- **Circuit Breakers**: {} ({} open)\n",
        stats.circuit_breakers,
        stats.open_circuits()
    ));

    let sections = [
        ("By Category", &stats.breakdown_by_category),
        ("By Severity", &stats.breakdown_by_severity),
        ("By Recovery Action", &stats.breakdown_by_recovery_action),
    ];
    for (title, breakdown) in sections {
        if breakdown.is_empty() {
            continue;
        }
        output.push_str(&format!("\n### {}\n", title));
        for (name, count) in breakdown {
            output.push_str(&format!("- {}: {}\n", name, count));
        }
    }

    if !stats.recent_patterns.is_empty() {
        output.push_str("\n### Recent Patterns\n");
        for pattern in &stats.recent_patterns {
            output.push_str(&format!(
                "- `{}` {}/{} x{} -> {}\n",
                pattern.signature,
                pattern.category,
                pattern.severity,
                pattern.occurrence_count,
                pattern.recovery_action
            ));
        }
    }

    output
}
