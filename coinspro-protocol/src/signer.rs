//! Handshake signature.

use crate::error::ProtocolError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs the handshake string `nonce ++ user_id ++ api_key` with the API secret.
///
/// Returns the lowercase hex HMAC-SHA256 digest.
pub fn sign(
    nonce: &str,
    user_id: &str,
    api_key: &str,
    secret: &str,
) -> Result<String, ProtocolError> {
    if secret.is_empty() {
        return Err(ProtocolError::MissingSecret);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| ProtocolError::MissingSecret)?;
    mac.update(nonce.as_bytes());
    mac.update(user_id.as_bytes());
    mac.update(api_key.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
