use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::core::error::SyncError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Check an inbound webhook signature: hex-encoded HMAC-SHA256 of the
/// request body, sent as `sha256=<hex>`. The raw received bytes are
/// hashed, never a re-encoded copy of the parsed payload, so the byte
/// layout matches what the sender signed.
///
/// Returns `Ok(false)` on a clean mismatch. A missing or undecodable
/// header is an error, reported before any comparison happens.
pub fn verify_signature(
    headers: &HeaderMap,
    body: &[u8],
    secret: &str,
) -> Result<bool, SyncError> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(SyncError::MalformedSignatureHeader)?;
    let hex_digest = header
        .strip_prefix("sha256=")
        .ok_or(SyncError::MalformedSignatureHeader)?;
    let claimed = hex::decode(hex_digest).map_err(|_| SyncError::MalformedSignatureHeader)?;

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return Ok(false);
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    Ok(constant_time_eq(&claimed, &expected))
}

/// Constant-time comparison to prevent timing side channels.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
