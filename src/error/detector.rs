//! Heuristic error classifier
//!
//! This module provides regex-based pattern matching to place an error into a
//! [`Category`] and then derive its [`Severity`]. Category patterns are tried
//! in order and the first match wins, so earlier patterns take precedence even
//! when a later one would also match.

use regex::Regex;

use super::{Category, Classification, Severity};

/// Which part of an error a pattern inspects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchTarget {
    /// The error's type name (e.g. `PermissionError`).
    ErrorType,
    /// The error's message text.
    Message,
}

/// A pattern that assigns a category when it matches.
#[derive(Debug)]
pub struct ClassificationPattern {
    /// The compiled regex pattern.
    regex: Regex,
    /// What the regex is applied to.
    target: MatchTarget,
    /// The category to assign when this pattern matches.
    category: Category,
    /// A short label recorded in [`Classification::matched_by`].
    description: String,
}

impl ClassificationPattern {
    /// Creates a new classification pattern.
    ///
    /// # Panics
    /// Panics if the regex pattern is invalid. Use [`ClassificationPattern::try_new`]
    /// for patterns that come from configuration.
    pub fn new(
        pattern: &str,
        target: MatchTarget,
        category: Category,
        description: impl Into<String>,
    ) -> Self {
        Self::try_new(pattern, target, category, description).expect("Invalid regex pattern")
    }

    /// Creates a new classification pattern, returning an error for an invalid regex.
    pub fn try_new(
        pattern: &str,
        target: MatchTarget,
        category: Category,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            target,
            category,
            description: description.into(),
        })
    }

    /// Returns the category this pattern assigns.
    pub fn category(&self) -> Category {
        self.category
    }

    /// Returns what this pattern is matched against.
    pub fn target(&self) -> MatchTarget {
        self.target
    }

    /// Returns the description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Checks if this pattern matches the given error.
    pub fn matches(&self, error_type: &str, message: &str) -> bool {
        match self.target {
            MatchTarget::ErrorType => self.regex.is_match(error_type),
            MatchTarget::Message => self.regex.is_match(message),
        }
    }
}

/// Classifies errors into a `(Category, Severity)` pair.
///
/// Classification runs in two independent passes: the category is resolved
/// first from the ordered pattern list, then severity is derived with
/// category-aware overrides that keyword hints cannot undo.
#[derive(Debug)]
pub struct ErrorClassifier {
    /// Category patterns, in priority order.
    patterns: Vec<ClassificationPattern>,
    critical_keywords: Regex,
    low_keywords: Regex,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Creates a classifier with the built-in category patterns.
    pub fn new() -> Self {
        Self::with_patterns(Self::default_patterns())
    }

    /// Creates a classifier with custom category patterns.
    pub fn with_patterns(patterns: Vec<ClassificationPattern>) -> Self {
        Self {
            patterns,
            critical_keywords: Regex::new(r"(?i)\b(critical|fatal|severe)\b")
                .expect("Invalid regex pattern"),
            low_keywords: Regex::new(r"(?i)\b(warning|minor)\b").expect("Invalid regex pattern"),
        }
    }

    /// Returns the built-in category patterns.
    fn default_patterns() -> Vec<ClassificationPattern> {
        vec![
            // Type-level match beats any message keyword
            ClassificationPattern::new(
                r"(?i)(permission|accessdenied|forbidden)",
                MatchTarget::ErrorType,
                Category::Authorization,
                "type:permission_denied",
            ),
            ClassificationPattern::new(
                r"(?i)\b(authenticat\w*|unauthenticated|unauthori[sz]ed|login|log\s+in|credentials?|password|session\s+expired|token\s+expired|invalid\s+token)\b",
                MatchTarget::Message,
                Category::Authentication,
                "keyword:authentication",
            ),
            ClassificationPattern::new(
                r"(?i)\b(authori[sz]\w*|permissions?|forbidden|access\s+denied|not\s+allowed|insufficient\s+privileges?)\b",
                MatchTarget::Message,
                Category::Authorization,
                "keyword:authorization",
            ),
            ClassificationPattern::new(
                r"(?i)\b(security|attack\w*|injection|xss|csrf|malicious|intrusion|brute[\s\-]?force|tamper\w*|suspicious)\b",
                MatchTarget::Message,
                Category::Security,
                "keyword:security",
            ),
            ClassificationPattern::new(
                r"(?i)\b(validat\w*|invalid\w*|required|missing\s+fields?|malformed|must\s+be|out\s+of\s+range)\b",
                MatchTarget::Message,
                Category::Validation,
                "keyword:validation",
            ),
            ClassificationPattern::new(
                r"(?i)\b(databases?|dbs?|connect\w*|sql\w*|deadlocks?|quer(?:y|ies)|pools?)\b",
                MatchTarget::Message,
                Category::Infrastructure,
                "keyword:infrastructure",
            ),
            ClassificationPattern::new(
                r"(?i)\b(timed?\s*outs?|external\w*|apis?|services?|upstreams?|gateways?|third[\s\-]party)\b",
                MatchTarget::Message,
                Category::ExternalService,
                "keyword:external_service",
            ),
            ClassificationPattern::new(
                r"(?i)\b(performance|slow\w*|latenc(?:y|ies)|too\s+long|throughput)\b",
                MatchTarget::Message,
                Category::Performance,
                "keyword:performance",
            ),
            // Type-level fallback for programming errors in business code
            ClassificationPattern::new(
                r"(?i)^(value|type|attribute)(error|exception)$",
                MatchTarget::ErrorType,
                Category::BusinessLogic,
                "type:business_logic",
            ),
        ]
    }

    /// Adds a custom pattern. It is tried after every existing pattern.
    pub fn add_pattern(&mut self, pattern: ClassificationPattern) {
        self.patterns.push(pattern);
    }

    /// Returns the number of patterns configured.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Returns a reference to all configured patterns.
    pub fn patterns(&self) -> &[ClassificationPattern] {
        &self.patterns
    }

    /// Classifies an error by type name and message.
    pub fn classify(&self, error_type: &str, message: &str) -> Classification {
        let (category, matched_by) = self
            .patterns
            .iter()
            .find(|p| p.matches(error_type, message))
            .map(|p| (p.category, p.description.as_str()))
            .unwrap_or((Category::Unknown, "default"));

        Classification::new(category, self.severity_for(category, message), matched_by)
    }

    /// Resolves only the category of an error.
    pub fn category_for(&self, error_type: &str, message: &str) -> Category {
        self.classify(error_type, message).category
    }

    /// Derives severity for an already-categorised error.
    ///
    /// Security-adjacent categories are always `Critical`, so a coincidental
    /// "minor" in the message can never down-rate them.
    pub fn severity_for(&self, category: Category, message: &str) -> Severity {
        if category.is_security_sensitive() {
            return Severity::Critical;
        }
        match category {
            Category::Infrastructure | Category::ExternalService => Severity::High,
            Category::Validation => Severity::Low,
            _ if self.critical_keywords.is_match(message) => Severity::Critical,
            _ if self.low_keywords.is_match(message) => Severity::Low,
            _ => Severity::Medium,
        }
    }
}
