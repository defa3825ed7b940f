use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Generate a hex encoded HMAC-SHA256 of `payload` keyed with `secret`.
///
/// This is the scheme payment providers use for webhook and checkout
/// signatures: `hex(HMAC-SHA256(payload, secret))`.
pub fn sign_hmac_sha256(secret: &str, payload: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(payload);
    let result = mac.finalize();

    Ok(hex::encode(result.into_bytes()))
}

/// Verify a hex encoded HMAC-SHA256 signature using constant-time comparison
pub fn verify_hmac_sha256(
    secret: &str,
    payload: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected_signature = sign_hmac_sha256(secret, payload)?;

    let expected_bytes = expected_signature.as_bytes();
    let signature_bytes = signature.trim().as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(signature_bytes).into())
}
