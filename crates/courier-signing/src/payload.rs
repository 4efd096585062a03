//! Canonical webhook payload.

use chrono::{SecondsFormat, Utc};
use courier_common::{Category, Priority, MAX_EXPANDED_CHARS, MAX_INPUT_CHARS};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// The outbound payload body. Immutable once built.
///
/// Serialization order is declaration order and is the canonical order the
/// signature is computed over, so verification is deterministic: the bytes
/// posted to the destination are exactly the bytes that were signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub input: String,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub priority: Priority,
    /// RFC 3339 / ISO-8601, UTC.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expanded: Option<String>,
    /// Unique per signing operation; defends against replay together with
    /// the timestamp window.
    pub nonce: String,
}

impl WebhookPayload {
    /// Builds a payload with capped field lengths, a fresh timestamp, and a
    /// cryptographically random nonce.
    pub fn new(
        input: impl Into<String>,
        category: Category,
        subcategory: Option<String>,
        priority: Priority,
        expanded: Option<String>,
    ) -> Self {
        let mut nonce_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut nonce_bytes);

        Self {
            input: truncate_chars(input.into(), MAX_INPUT_CHARS),
            category,
            subcategory,
            priority,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            expanded: expanded.map(|e| truncate_chars(e, MAX_EXPANDED_CHARS)),
            nonce: hex::encode(nonce_bytes),
        }
    }

    /// The canonical JSON serialization, used both as the HTTP body and as
    /// the signature input.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn truncate_chars(s: String, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s;
    }
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_input_and_expanded_lengths() {
        let payload = WebhookPayload::new(
            "x".repeat(MAX_INPUT_CHARS + 100),
            Category::Note,
            None,
            Priority::Medium,
            Some("y".repeat(MAX_EXPANDED_CHARS + 100)),
        );
        assert_eq!(payload.input.chars().count(), MAX_INPUT_CHARS);
        assert_eq!(payload.expanded.unwrap().chars().count(), MAX_EXPANDED_CHARS);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(10);
        assert_eq!(truncate_chars(s, 4), "é".repeat(4));
    }

    #[test]
    fn nonce_is_unique_per_payload() {
        let a = WebhookPayload::new("a", Category::Task, None, Priority::High, None);
        let b = WebhookPayload::new("a", Category::Task, None, Priority::High, None);
        assert_ne!(a.nonce, b.nonce);
        assert_eq!(a.nonce.len(), 32);
    }

    #[test]
    fn canonical_json_is_deterministic() {
        let payload = WebhookPayload::new(
            "hello",
            Category::Idea,
            Some("product".into()),
            Priority::Low,
            None,
        );
        assert_eq!(payload.canonical_json().unwrap(), payload.canonical_json().unwrap());
    }

    #[test]
    fn absent_optional_fields_are_omitted() {
        let payload = WebhookPayload::new("hello", Category::Idea, None, Priority::Low, None);
        let json = payload.canonical_json().unwrap();
        assert!(!json.contains("subcategory"));
        assert!(!json.contains("expanded"));
    }
}
