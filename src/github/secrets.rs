//! Sealed-box encryption for destination secrets.
//!
//! The secrets API only accepts values encrypted against the repository's
//! (or environment's) X25519 public key. The sealed value is base64-encoded
//! on the wire; plaintext never leaves the process.

use crate::error::MigrationError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use crypto_box::aead::OsRng;

/// Seal `plaintext` against a base64-encoded X25519 public key, returning
/// the base64-encoded sealed box.
pub fn seal_secret(public_key_b64: &str, plaintext: &str) -> Result<String, MigrationError> {
    let key_bytes = BASE64
        .decode(public_key_b64)
        .map_err(|e| MigrationError::validation("Invalid secrets public key", e.to_string()))?;

    let key_array: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
        MigrationError::validation(
            "Invalid secrets public key",
            format!("expected 32 bytes, got {}", key_bytes.len()),
        )
    })?;
    let public_key = crypto_box::PublicKey::from(key_array);

    let sealed = public_key
        .seal(&mut OsRng, plaintext.as_bytes())
        .map_err(|e| MigrationError::unknown("secret sealing", e.to_string()))?;

    Ok(BASE64.encode(sealed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto_box::SecretKey;

    #[test]
    fn test_seal_produces_decryptable_box() {
        let secret_key = SecretKey::generate(&mut OsRng);
        let public_b64 = BASE64.encode(secret_key.public_key().as_bytes());

        let sealed_b64 = seal_secret(&public_b64, "hunter2").unwrap();
        let sealed = BASE64.decode(&sealed_b64).unwrap();

        let opened = secret_key.unseal(&sealed).unwrap();
        assert_eq!(opened, b"hunter2");
    }

    #[test]
    fn test_seal_is_randomized() {
        let secret_key = SecretKey::generate(&mut OsRng);
        let public_b64 = BASE64.encode(secret_key.public_key().as_bytes());

        let a = seal_secret(&public_b64, "same-value").unwrap();
        let b = seal_secret(&public_b64, "same-value").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_seal_rejects_bad_key() {
        assert!(seal_secret("not-base64!!!", "v").is_err());
        let short = BASE64.encode([0u8; 16]);
        assert!(seal_secret(&short, "v").is_err());
    }
}
