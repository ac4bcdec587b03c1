//! Identity derivation and request verifiers.
//!
//! All derivations are keyed HMAC-SHA256 with domain separation so a tag
//! computed for one purpose is never valid for another:
//! - The public token identifies the instance without revealing the secret.
//! - The verifier additionally binds a timestamp, so a captured request
//!   cannot be replayed on a different timestamp.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Domain separation prefix for public token derivation.
const TOKEN_DOMAIN: &[u8] = b"FLEETLINK-IDENTITY-v1:";

/// Domain separation prefix for request verifiers.
const VERIFIER_DOMAIN: &[u8] = b"FLEETLINK-VERIFIER-v1:";

/// Namespace tag for agent identity strings.
const IDENTITY_NAMESPACE: &str = "fl";

/// Role tag for instance agents.
const IDENTITY_ROLE: &str = "instance";

/// The shared launch secret.
///
/// Zeroized on drop; no `Debug` implementation, so it cannot leak into
/// logs by accident.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret string.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Access the raw secret bytes for keying.
    ///
    /// The returned reference should not be stored.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

fn keyed_mac(secret: &Secret, parts: &[&[u8]]) -> [u8; 32] {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Derive the public identity token for a `(token_id, secret)` pair.
///
/// Deterministic and one-way: the same inputs always yield the same
/// token, and the token reveals nothing about the secret.
#[must_use]
pub fn derive_public_token(token_id: u64, secret: &Secret) -> String {
    let tag = keyed_mac(secret, &[TOKEN_DOMAIN, token_id.to_string().as_bytes()]);
    URL_SAFE_NO_PAD.encode(tag)
}

/// Format the stable agent identity string for an instance.
///
/// `fl-instance-{token_id}-{public_token}`. Used both as the envelope
/// identity on published requests and as the predicted response queue
/// name; both sides compute it independently.
#[must_use]
pub fn agent_identity(token_id: u64, secret: &Secret) -> String {
    format!(
        "{IDENTITY_NAMESPACE}-{IDENTITY_ROLE}-{token_id}-{}",
        derive_public_token(token_id, secret)
    )
}

/// Predict the name of the exclusive enrollment response queue.
///
/// Identical to [`agent_identity`]; kept as its own entry point because
/// the two uses are conceptually distinct.
#[must_use]
pub fn predict_queue_name(token_id: u64, secret: &Secret) -> String {
    agent_identity(token_id, secret)
}

/// Create the request verifier binding `token_id` and `timestamp` to the
/// shared secret.
///
/// Any change to the timestamp changes the verifier, which is what makes
/// the timestamp usable as a replay nonce.
#[must_use]
pub fn create_verifier(token_id: u64, secret: &Secret, timestamp: i64) -> String {
    let tag = keyed_mac(
        secret,
        &[
            VERIFIER_DOMAIN,
            token_id.to_string().as_bytes(),
            b":",
            timestamp.to_string().as_bytes(),
        ],
    );
    URL_SAFE_NO_PAD.encode(tag)
}

/// Check a received verifier in constant time.
#[must_use]
pub fn verify_verifier(token_id: u64, secret: &Secret, timestamp: i64, verifier: &str) -> bool {
    let expected = create_verifier(token_id, secret, timestamp);
    expected.as_bytes().ct_eq(verifier.as_bytes()).into()
}
