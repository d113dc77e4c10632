//! Webhook signature verification.
//!
//! The sender signs the raw request body with HMAC-SHA256 under the shared
//! secret and sends `sha256=<hex digest>` in [`SIGNATURE_HEADER`].

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const PREFIX: &str = "sha256=";

fn digest(secret: &[u8], body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// `sha256=<hex>` signature of `body` under `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> Option<String> {
    digest(secret, body).map(|d| format!("{PREFIX}{}", hex::encode(d)))
}

/// Whether `signature` is a valid signature of `body` under `secret`.
///
/// An empty secret verifies nothing.
pub fn verify(secret: &[u8], body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(provided) = signature.strip_prefix(PREFIX) else {
        return false;
    };
    let Ok(provided) = hex::decode(provided) else {
        return false;
    };
    let Some(expected) = digest(secret, body) else {
        return false;
    };
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(provided.as_slice()).into()
}
