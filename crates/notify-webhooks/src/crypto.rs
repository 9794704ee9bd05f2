//! Cryptographic operations for endpoint secrets and payload signing.
//!
//! - AES-256-GCM encryption/decryption for endpoint secrets at rest
//! - HMAC-SHA256 signing of outbound delivery bodies
//!
//! # Receiver contract
//!
//! Every delivery is a `POST` carrying:
//!
//! | Header | Value |
//! |---|---|
//! | `X-Webhook-Signature` | lowercase hex HMAC-SHA256 (64 chars) |
//! | `X-Webhook-Timestamp` | Unix seconds used when signing |
//! | `X-Event-ID` | idempotency key shared by every delivery of one event |
//! | `X-Event-Type` | event name, e.g. `plan.changed` |
//!
//! The signed message is the ASCII timestamp, a single `.`, then the raw
//! request body bytes exactly as received:
//!
//! ```text
//! signature = hex(HMAC_SHA256(key = secret, msg = "{timestamp}.{body}"))
//! ```
//!
//! Receivers must recompute the signature over the unparsed body, compare it
//! in constant time, and reject timestamps further than their skew window
//! from their own clock ([`DEFAULT_TOLERANCE_SECS`] is a sensible default).
//! A rotated secret invalidates the previous one immediately.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::WebhookError;

/// Header carrying the hex signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
/// Header carrying the Unix timestamp that was signed.
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";
/// Header carrying the event idempotency key.
pub const EVENT_ID_HEADER: &str = "X-Event-ID";
/// Header carrying the event type.
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";

/// Default acceptable clock skew for receivers, in seconds.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Prefix for generated endpoint secrets.
pub const SECRET_PREFIX: &str = "whsec_";

/// Nonce size for AES-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Random bytes in a generated secret.
const SECRET_BYTES: usize = 32;

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Secret generation
// ---------------------------------------------------------------------------

/// Generate a fresh endpoint signing secret (`whsec_` + 64 hex chars).
#[must_use]
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{SECRET_PREFIX}{}", hex::encode(bytes))
}

// ---------------------------------------------------------------------------
// AES-256-GCM encryption/decryption (for secrets at rest)
// ---------------------------------------------------------------------------

/// Encrypt a plaintext secret to a base64-encoded string for storage.
///
/// Format: base64(nonce || ciphertext || auth_tag)
pub fn encrypt_secret(plaintext: &str, key: &[u8]) -> Result<String, WebhookError> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&result))
}

/// Decrypt a base64-encoded secret from storage back to plaintext.
pub fn decrypt_secret(encoded: &str, key: &[u8]) -> Result<String, WebhookError> {
    let cipher = cipher_for(key)?;

    let encrypted = BASE64
        .decode(encoded)
        .map_err(|e| WebhookError::EncryptionFailed(format!("Base64 decode failed: {e}")))?;

    if encrypted.len() < NONCE_SIZE + 1 {
        return Err(WebhookError::EncryptionFailed(
            "Invalid encrypted data format".to_string(),
        ));
    }

    let nonce = Nonce::from_slice(&encrypted[..NONCE_SIZE]);
    let plaintext = cipher
        .decrypt(nonce, &encrypted[NONCE_SIZE..])
        .map_err(|e| WebhookError::EncryptionFailed(e.to_string()))?;

    String::from_utf8(plaintext).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, WebhookError> {
    if key.len() != 32 {
        return Err(WebhookError::EncryptionFailed(format!(
            "Invalid key length: expected 32 bytes, got {}",
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| WebhookError::EncryptionFailed(e.to_string()))
}

// ---------------------------------------------------------------------------
// HMAC-SHA256 payload signing
// ---------------------------------------------------------------------------

/// Sign a delivery body: hex HMAC-SHA256 over `{timestamp}.{body}`.
#[must_use]
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    hex::encode(mac_for(secret, timestamp, body).finalize().into_bytes())
}

/// Verify a signature produced by [`sign`] using constant-time comparison.
#[must_use]
pub fn verify(secret: &str, timestamp: i64, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    mac_for(secret, timestamp, body)
        .verify_slice(&expected)
        .is_ok()
}

/// Verify a signature and reject timestamps outside `tolerance_secs` of `now`.
///
/// This is the check receivers are expected to perform.
#[must_use]
pub fn verify_with_tolerance(
    secret: &str,
    timestamp: i64,
    body: &[u8],
    signature_hex: &str,
    now: i64,
    tolerance_secs: i64,
) -> bool {
    if (now - timestamp).abs() > tolerance_secs {
        return false;
    }
    verify(secret, timestamp, body, signature_hex)
}

fn mac_for(secret: &str, timestamp: i64, body: &[u8]) -> HmacSha256 {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

/// Constant-time byte comparison.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
