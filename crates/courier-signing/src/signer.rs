//! HMAC-SHA256 signing and verification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::payload::WebhookPayload;

type HmacSha256 = Hmac<Sha256>;

/// Prefix used in the signature header: `X-Webhook-Signature: sha256=<hex>`.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Default replay window applied to payload timestamps.
pub const DEFAULT_TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    #[error("malformed timestamp: {0}")]
    Malformed(String),

    #[error("timestamp outside tolerance: skew {skew_ms}ms exceeds {tolerance_ms}ms")]
    OutsideTolerance { skew_ms: i64, tolerance_ms: i64 },
}

/// A payload plus its signature, ready for dispatch.
///
/// `body` is the canonical serialization captured at signing time; the
/// executor posts these exact bytes, so the wire body always matches the
/// signature. `signature` is `None` when no secret is configured: the
/// payload is sent unsigned and the degraded mode is surfaced through the
/// status API.
#[derive(Debug, Clone)]
pub struct SignedPayload {
    pub payload: WebhookPayload,
    pub body: String,
    pub signature: Option<String>,
}

impl SignedPayload {
    /// Signs a finalized payload. The signature is computed last, over the
    /// canonical serialization of every other field.
    pub fn build(payload: WebhookPayload, secret: Option<&[u8]>) -> Result<Self, SigningError> {
        let body = payload.canonical_json()?;
        let signature = match secret {
            Some(secret) => Some(sign_bytes(body.as_bytes(), secret)?),
            None => None,
        };
        Ok(Self { payload, body, signature })
    }

    /// Signature header value, when signed.
    pub fn signature_header(&self) -> Option<String> {
        self.signature.as_ref().map(|s| format!("{SIGNATURE_PREFIX}{s}"))
    }
}

/// Computes the hex-encoded HMAC-SHA256 of the payload's canonical JSON.
pub fn sign(payload: &WebhookPayload, secret: &[u8]) -> Result<String, SigningError> {
    let body = payload.canonical_json()?;
    sign_bytes(body.as_bytes(), secret)
}

fn sign_bytes(body: &[u8], secret: &[u8]) -> Result<String, SigningError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Recomputes the payload signature and compares in constant time.
///
/// Accepts the raw hex digest or the `sha256=`-prefixed header form. Any
/// malformed input verifies as false rather than erroring.
pub fn verify(payload: &WebhookPayload, signature: &str, secret: &[u8]) -> bool {
    let Ok(expected_hex) = sign(payload, secret) else {
        return false;
    };
    let provided = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);

    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(&provided).into()
}

/// Rejects timestamps older or further in the future than the tolerance.
pub fn validate_timestamp(timestamp: &str, tolerance: Duration) -> Result<(), TimestampError> {
    let parsed = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| TimestampError::Malformed(e.to_string()))?
        .with_timezone(&Utc);

    let skew_ms = (Utc::now() - parsed).num_milliseconds().abs();
    let tolerance_ms = tolerance.as_millis() as i64;
    if skew_ms > tolerance_ms {
        return Err(TimestampError::OutsideTolerance { skew_ms, tolerance_ms });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::SecondsFormat;
    use courier_common::{Category, Priority};

    use super::*;

    fn test_payload() -> WebhookPayload {
        WebhookPayload::new(
            "capture the meeting notes",
            Category::Note,
            Some("work".into()),
            Priority::Medium,
            Some("expanded form of the notes".into()),
        )
    }

    #[test]
    fn sign_verify_roundtrip() {
        let payload = test_payload();
        let signature = sign(&payload, b"secret-key").unwrap();
        assert!(verify(&payload, &signature, b"secret-key"));
    }

    #[test]
    fn header_form_verifies() {
        let payload = test_payload();
        let signed = SignedPayload::build(payload.clone(), Some(b"secret-key")).unwrap();
        let header = signed.signature_header().unwrap();
        assert!(header.starts_with(SIGNATURE_PREFIX));
        assert!(verify(&payload, &header, b"secret-key"));
    }

    #[test]
    fn mutated_payload_fails_verification() {
        let payload = test_payload();
        let signature = sign(&payload, b"secret-key").unwrap();

        let mut tampered = payload.clone();
        tampered.input.push('!');
        assert!(!verify(&tampered, &signature, b"secret-key"));

        let mut tampered = payload;
        tampered.nonce = tampered.nonce.replace('0', "1");
        assert!(!verify(&tampered, &signature, b"secret-key"));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let payload = test_payload();
        let signature = sign(&payload, b"secret-key").unwrap();
        assert!(!verify(&payload, &signature, b"other-key"));
    }

    #[test]
    fn malformed_signature_is_false_not_error() {
        let payload = test_payload();
        assert!(!verify(&payload, "not-hex!!", b"secret-key"));
        assert!(!verify(&payload, "abcd", b"secret-key"));
    }

    #[test]
    fn stored_body_is_the_signed_serialization() {
        let signed = SignedPayload::build(test_payload(), Some(b"secret-key")).unwrap();
        assert_eq!(signed.body, signed.payload.canonical_json().unwrap());
        assert!(verify(&signed.payload, signed.signature.as_deref().unwrap(), b"secret-key"));
    }

    #[test]
    fn unsigned_build_when_no_secret() {
        let signed = SignedPayload::build(test_payload(), None).unwrap();
        assert!(signed.signature.is_none());
        assert!(signed.signature_header().is_none());
    }

    #[test]
    fn fresh_timestamp_within_tolerance() {
        let payload = test_payload();
        assert!(validate_timestamp(&payload.timestamp, DEFAULT_TIMESTAMP_TOLERANCE).is_ok());
    }

    #[test]
    fn stale_timestamp_rejected() {
        let old = (Utc::now() - chrono::Duration::minutes(10))
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let err = validate_timestamp(&old, DEFAULT_TIMESTAMP_TOLERANCE).unwrap_err();
        assert!(matches!(err, TimestampError::OutsideTolerance { .. }));
    }

    #[test]
    fn future_timestamp_rejected() {
        let future = (Utc::now() + chrono::Duration::minutes(10))
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let err = validate_timestamp(&future, DEFAULT_TIMESTAMP_TOLERANCE).unwrap_err();
        assert!(matches!(err, TimestampError::OutsideTolerance { .. }));
    }

    #[test]
    fn garbage_timestamp_rejected() {
        let err = validate_timestamp("yesterday", DEFAULT_TIMESTAMP_TOLERANCE).unwrap_err();
        assert!(matches!(err, TimestampError::Malformed(_)));
    }
}
