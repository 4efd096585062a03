//! Outbound payload construction and authentication.
//!
//! Builds the canonical webhook payload (length caps, timestamp, random
//! nonce), signs it with HMAC-SHA256, and provides the verification half of
//! the contract: constant-time signature comparison and a replay window
//! check on the payload timestamp.

mod payload;
mod signer;

pub use payload::WebhookPayload;
pub use signer::{
    sign, validate_timestamp, verify, SignedPayload, SigningError, TimestampError,
    DEFAULT_TIMESTAMP_TOLERANCE, SIGNATURE_PREFIX,
};
