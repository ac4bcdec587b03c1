//! Signed enrollment result envelope.
//!
//! The fleet service wraps the [`EnrollmentResult`] in a MAC'd envelope
//! keyed by the shared secret, so only the instance that initiated the
//! enrollment can accept it. Wire format (v1, JSON):
//!
//! ```json
//! { "version": 1, "timestamp": 1700000000, "mac": "...", "payload": "<base64 JSON>" }
//! ```
//!
//! The MAC covers the timestamp and the payload bytes. Timestamp equality
//! with the in-flight request is the engine's replay check, not ours; this
//! module only guarantees the envelope is authentic and intact.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use fleetlink_core::EnrollmentResult;

use crate::identity::Secret;

type HmacSha256 = Hmac<Sha256>;

/// Current envelope wire version.
const ENVELOPE_VERSION: u32 = 1;

/// Domain separation prefix for envelope MACs.
const ENVELOPE_DOMAIN: &[u8] = b"FLEETLINK-RESULT-v1:";

/// Errors raised while opening or sealing a result envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum EnvelopeError {
    /// The envelope is not valid JSON or is missing fields.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// The envelope version is not supported by this agent.
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),

    /// The MAC does not verify under the shared secret.
    #[error("envelope integrity check failed")]
    BadMac,

    /// The payload decodes but is not a valid enrollment result.
    #[error("invalid enrollment result payload: {0}")]
    BadPayload(String),
}

/// A MAC'd envelope carrying an [`EnrollmentResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    version: u32,
    timestamp: i64,
    mac: String,
    payload: String,
}

impl ResultEnvelope {
    /// Seal an enrollment result under the shared secret.
    ///
    /// Used by the fleet service and by test harnesses; the instance side
    /// only ever opens envelopes.
    #[must_use]
    pub fn seal(result: &EnrollmentResult, secret: &Secret) -> Self {
        let payload_bytes =
            serde_json::to_vec(result).expect("enrollment result always serializes");
        let payload = URL_SAFE_NO_PAD.encode(&payload_bytes);
        let mac = compute_mac(secret, result.timestamp, payload.as_bytes());
        Self {
            version: ENVELOPE_VERSION,
            timestamp: result.timestamp,
            mac,
            payload,
        }
    }

    /// Serialize the envelope to wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("envelope always serializes")
    }

    /// Open an envelope received on the predicted queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid envelope, the version
    /// is unsupported, the MAC does not verify, or the payload is not an
    /// enrollment result.
    pub fn open(bytes: &[u8], secret: &Secret) -> Result<EnrollmentResult, EnvelopeError> {
        let envelope: Self =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        if envelope.version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(envelope.version));
        }

        // Verify the MAC before touching the payload.
        let expected = compute_mac(secret, envelope.timestamp, envelope.payload.as_bytes());
        let ok: bool = expected.as_bytes().ct_eq(envelope.mac.as_bytes()).into();
        if !ok {
            return Err(EnvelopeError::BadMac);
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(&envelope.payload)
            .map_err(|e| EnvelopeError::BadPayload(e.to_string()))?;
        let result: EnrollmentResult = serde_json::from_slice(&payload_bytes)
            .map_err(|e| EnvelopeError::BadPayload(e.to_string()))?;

        // The outer timestamp is MAC'd; require the payload to agree so a
        // mismatched splice cannot pass the engine's replay check.
        if result.timestamp != envelope.timestamp {
            return Err(EnvelopeError::BadPayload(
                "payload timestamp disagrees with envelope".to_string(),
            ));
        }

        Ok(result)
    }
}

fn compute_mac(secret: &Secret, timestamp: i64, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(ENVELOPE_DOMAIN);
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b":");
    mac.update(payload);
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}
