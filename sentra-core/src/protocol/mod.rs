//! Device-bound request signing.
//!
//! ```text
//! v1\n{UNIX_TS}\n{METHOD}\n{PATH}\n{MACHINE_ID}\n{RAW BODY}
//! ```
//!
//! The message is signed with the device's Ed25519 key. The server checks the
//! timestamp window, requires a nonce, verifies against the key registered for
//! the (user, machine) pair and rejects nonces seen in the last ten minutes.

pub mod validate;

use crate::crypto::b64_decode;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

pub const SIGNATURE_VERSION: &str = "v1";

pub const HEADER_MACHINE_ID: &str = "X-Sentra-Machine-ID";
pub const HEADER_TIMESTAMP: &str = "X-Sentra-Timestamp";
pub const HEADER_NONCE: &str = "X-Sentra-Nonce";
pub const HEADER_SIGNATURE: &str = "X-Sentra-Signature";
pub const HEADER_IDEMPOTENCY_KEY: &str = "X-Idempotency-Key";

/// Requests may be at most this far in the future.
pub const MAX_CLOCK_SKEW_SECS: i64 = 30;
/// Requests may be at most this old.
pub const MAX_REQUEST_AGE_SECS: i64 = 300;
/// How long a nonce stays in the replay cache.
pub const NONCE_TTL_SECS: u64 = 600;

/// Build the canonical string-to-sign.
pub fn canonical_message(
    timestamp: i64,
    method: &str,
    path: &str,
    machine_id: &str,
    body: &[u8],
) -> Vec<u8> {
    let head = format!(
        "{}\n{}\n{}\n{}\n{}\n",
        SIGNATURE_VERSION,
        timestamp,
        method.to_ascii_uppercase(),
        path,
        machine_id
    );
    let mut message = Vec::with_capacity(head.len() + body.len());
    message.extend_from_slice(head.as_bytes());
    message.extend_from_slice(body);
    message
}

/// Headers attached to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub machine_id: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}

impl SignedHeaders {
    /// `(name, value)` pairs ready to attach to an HTTP request.
    pub fn pairs(&self) -> [(&'static str, String); 4] {
        [
            (HEADER_MACHINE_ID, self.machine_id.clone()),
            (HEADER_TIMESTAMP, self.timestamp.to_string()),
            (HEADER_NONCE, self.nonce.clone()),
            (HEADER_SIGNATURE, self.signature.clone()),
        ]
    }
}

/// Device authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceAuthError {
    #[error("Missing device signature headers")]
    MissingHeaders,
    #[error("Invalid machine id")]
    InvalidMachineId,
    #[error("Invalid timestamp")]
    InvalidTimestamp,
    #[error("Request timestamp outside accepted window")]
    StaleTimestamp,
    #[error("Missing request nonce")]
    MissingNonce,
    #[error("Invalid device public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Nonce has been reused")]
    NonceReused,
}

/// Parse a timestamp header and check it against `now`.
pub fn check_timestamp(raw: &str, now: i64) -> Result<i64, DeviceAuthError> {
    let ts: i64 = raw
        .trim()
        .parse()
        .map_err(|_| DeviceAuthError::InvalidTimestamp)?;
    let age = now - ts;
    if age < -MAX_CLOCK_SKEW_SECS || age > MAX_REQUEST_AGE_SECS {
        return Err(DeviceAuthError::StaleTimestamp);
    }
    Ok(ts)
}

/// Decode a base64url public key into an Ed25519 verifying key.
pub fn parse_public_key(public_key_b64: &str) -> Result<VerifyingKey, DeviceAuthError> {
    let raw = b64_decode(public_key_b64).map_err(|_| DeviceAuthError::InvalidPublicKey)?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| DeviceAuthError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| DeviceAuthError::InvalidPublicKey)
}

/// Verify a device signature over the canonical message.
pub fn verify_signature(
    public_key_b64: &str,
    timestamp: i64,
    method: &str,
    path: &str,
    machine_id: &str,
    body: &[u8],
    signature_b64: &str,
) -> Result<(), DeviceAuthError> {
    let verifying_key = parse_public_key(public_key_b64)?;
    let sig_bytes: [u8; 64] = b64_decode(signature_b64)
        .map_err(|_| DeviceAuthError::InvalidSignature)?
        .try_into()
        .map_err(|_| DeviceAuthError::InvalidSignature)?;
    let signature = Signature::from_bytes(&sig_bytes);

    let message = canonical_message(timestamp, method, path, machine_id, body);
    verifying_key
        .verify(&message, &signature)
        .map_err(|_| DeviceAuthError::InvalidSignature)
}

/// Key under which a nonce is remembered for replay detection.
pub fn replay_key(user_id: &str, machine_id: &str, nonce: &str) -> String {
    format!("{}\n{}\n{}", user_id.trim(), machine_id, nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::DeviceIdentity;

    #[test]
    fn test_canonical_message_layout() {
        let msg = canonical_message(1_700_000_000, "post", "/push", "m-1", b"{\"v\":1}");
        assert_eq!(
            String::from_utf8(msg).unwrap(),
            "v1\n1700000000\nPOST\n/push\nm-1\n{\"v\":1}"
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DeviceAuthError::StaleTimestamp.to_string(),
            "Request timestamp outside accepted window"
        );
        assert_eq!(DeviceAuthError::NonceReused.to_string(), "Nonce has been reused");
        let boxed: Box<dyn std::error::Error> = Box::new(DeviceAuthError::InvalidSignature);
        assert_eq!(boxed.to_string(), "Invalid signature");
    }

    #[test]
    fn test_timestamp_window() {
        let now = 1_700_000_000;
        assert_eq!(check_timestamp(&(now - 10).to_string(), now), Ok(now - 10));
        assert_eq!(check_timestamp(&(now + 30).to_string(), now), Ok(now + 30));
        assert_eq!(check_timestamp(&(now - 300).to_string(), now), Ok(now - 300));

        assert_eq!(
            check_timestamp(&(now - 600).to_string(), now),
            Err(DeviceAuthError::StaleTimestamp)
        );
        assert_eq!(
            check_timestamp(&(now + 31).to_string(), now),
            Err(DeviceAuthError::StaleTimestamp)
        );
        assert_eq!(
            check_timestamp("yesterday", now),
            Err(DeviceAuthError::InvalidTimestamp)
        );
    }

    #[test]
    fn test_signature_binds_every_field() {
        let identity = DeviceIdentity::generate();
        let pk = identity.public_key_b64();
        let ts = 1_700_000_000;
        let sig = identity.sign(&canonical_message(ts, "POST", "/push", "m-1", b"body"));

        assert!(verify_signature(&pk, ts, "POST", "/push", "m-1", b"body", &sig).is_ok());
        assert!(verify_signature(&pk, ts + 1, "POST", "/push", "m-1", b"body", &sig).is_err());
        assert!(verify_signature(&pk, ts, "GET", "/push", "m-1", b"body", &sig).is_err());
        assert!(verify_signature(&pk, ts, "POST", "/export", "m-1", b"body", &sig).is_err());
        assert!(verify_signature(&pk, ts, "POST", "/push", "m-2", b"body", &sig).is_err());
        assert!(verify_signature(&pk, ts, "POST", "/push", "m-1", b"bodx", &sig).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let signer = DeviceIdentity::generate();
        let other = DeviceIdentity::generate();
        let sig = signer.sign(&canonical_message(1, "POST", "/push", "m", b""));

        assert_eq!(
            verify_signature(&other.public_key_b64(), 1, "POST", "/push", "m", b"", &sig),
            Err(DeviceAuthError::InvalidSignature)
        );
    }

    #[test]
    fn test_malformed_inputs() {
        assert_eq!(
            parse_public_key("not*base64").unwrap_err(),
            DeviceAuthError::InvalidPublicKey
        );
        assert_eq!(
            parse_public_key("AAAA").unwrap_err(),
            DeviceAuthError::InvalidPublicKey
        );
        let identity = DeviceIdentity::generate();
        assert_eq!(
            verify_signature(&identity.public_key_b64(), 1, "POST", "/", "m", b"", "AAAA"),
            Err(DeviceAuthError::InvalidSignature)
        );
    }

    #[test]
    fn test_replay_key_format() {
        assert_eq!(replay_key(" u ", "m", "n"), "u\nm\nn");
    }
}
