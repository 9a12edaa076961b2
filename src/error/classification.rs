//! Classification types for the recovery engine
//!
//! Every handled error is placed in exactly one [`Category`] and assigned a
//! [`Severity`]. The category decides which recovery rule applies; severity
//! only ever ratchets upwards for a given pattern.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The domain an error belongs to, determining the default recovery strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Identity could not be established (bad credentials, expired session).
    Authentication,
    /// Identity is known but lacks the required permission.
    Authorization,
    /// Caller-supplied input was rejected.
    Validation,
    /// Domain rule violations and programming errors in business code.
    BusinessLogic,
    /// Databases, connections, queues and other owned infrastructure.
    Infrastructure,
    /// Downstream APIs and third-party services.
    ExternalService,
    /// Slowness, resource pressure and latency budget violations.
    Performance,
    /// Suspected attacks or integrity violations.
    Security,
    /// Nothing matched.
    Unknown,
}

impl Category {
    /// All categories, in declaration order.
    pub const ALL: [Category; 9] = [
        Category::Authentication,
        Category::Authorization,
        Category::Validation,
        Category::BusinessLogic,
        Category::Infrastructure,
        Category::ExternalService,
        Category::Performance,
        Category::Security,
        Category::Unknown,
    ];

    /// Stable snake_case name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Authentication => "authentication",
            Category::Authorization => "authorization",
            Category::Validation => "validation",
            Category::BusinessLogic => "business_logic",
            Category::Infrastructure => "infrastructure",
            Category::ExternalService => "external_service",
            Category::Performance => "performance",
            Category::Security => "security",
            Category::Unknown => "unknown",
        }
    }

    /// Returns true for categories whose severity is pinned to `Critical`.
    pub fn is_security_sensitive(&self) -> bool {
        matches!(
            self,
            Category::Security | Category::Authentication | Category::Authorization
        )
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How urgently an error needs attention. Totally ordered: `Low < Medium < High < Critical`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, lowest first.
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Stable snake_case name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of classifying one error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// The category of the error.
    pub category: Category,
    /// The severity assigned to this occurrence.
    pub severity: Severity,
    /// Which heuristic produced the category (e.g. `"keyword:authentication"`).
    pub matched_by: String,
}

impl Classification {
    /// Creates a new classification.
    pub fn new(category: Category, severity: Severity, matched_by: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            matched_by: matched_by.into(),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.severity)
    }
}
