//! Signature normalization
//!
//! Turns an error's type and message into a stable key so that occurrences
//! differing only in incidental literal values (ids, numbers, addresses) are
//! counted as the same pattern.

use regex::Regex;

/// Default upper bound on signature length, in characters.
pub const DEFAULT_MAX_SIGNATURE_LENGTH: usize = 200;

const UUID_PLACEHOLDER: &str = "<uuid>";
const EMAIL_PLACEHOLDER: &str = "<email>";
const NUMBER_PLACEHOLDER: &str = "<n>";

/// Produces canonical `error_type:normalized_message` signatures.
#[derive(Debug)]
pub struct SignatureNormalizer {
    uuid: Regex,
    email: Regex,
    digits: Regex,
    max_length: usize,
}

impl Default for SignatureNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIGNATURE_LENGTH)
    }
}

impl SignatureNormalizer {
    /// Creates a normalizer that truncates signatures to `max_length` characters.
    pub fn new(max_length: usize) -> Self {
        Self {
            uuid: Regex::new(
                r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
            )
            .expect("Invalid regex pattern"),
            email: Regex::new(r"[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}")
                .expect("Invalid regex pattern"),
            digits: Regex::new(r"[0-9]+").expect("Invalid regex pattern"),
            max_length,
        }
    }

    /// Returns the configured maximum signature length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Normalizes an error into its signature.
    ///
    /// UUIDs and emails are replaced before digit runs; they contain digits
    /// themselves and must be recognised while still intact.
    pub fn normalize(&self, error_type: &str, message: &str) -> String {
        let lowered = message.to_lowercase();
        let without_uuids = self.uuid.replace_all(&lowered, UUID_PLACEHOLDER);
        let without_emails = self.email.replace_all(&without_uuids, EMAIL_PLACEHOLDER);
        let normalized = self.digits.replace_all(&without_emails, NUMBER_PLACEHOLDER);

        format!("{}:{}", error_type, normalized)
            .chars()
            .take(self.max_length)
            .collect()
    }
}
