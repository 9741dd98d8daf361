//! AES-256-GCM envelope for credential payloads at rest.
//!
//! Every sealed payload gets a fresh random nonce. The row stored in SQLite is
//! a single base64 string over `nonce || ciphertext || tag`, with a 16-byte
//! nonce and a 16-byte GCM tag, so one opaque column round-trips everything
//! needed to open the envelope later.
//!
//! The master key is 32 bytes (256 bits), supplied as 64 hex characters from
//! an environment variable. It never touches disk.

use aes_gcm::{
    aead::{consts::U16, Aead, AeadCore, KeyInit, OsRng},
    aes::Aes256,
    AesGcm, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes. 16 rather than the GCM-default 12: the wire
/// format predates this implementation and every stored row leads with a
/// 16-byte nonce.
const NONCE_SIZE: usize = 16;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// AES-256-GCM parameterized with the 16-byte nonce the envelope format uses.
type EnvelopeCipher = AesGcm<Aes256, U16>;

/// 256-bit master key for sealing and opening credential envelopes.
#[derive(Clone)]
pub struct EnvelopeKey([u8; KEY_SIZE]);

impl EnvelopeKey {
    /// Parses the master key from its 64-character hex form.
    ///
    /// Fails if the string is not exactly 64 hex characters. This is a
    /// configuration error and is meant to abort startup, not be retried.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let trimmed = hex.trim();
        if trimmed.len() != KEY_SIZE * 2 || !trimmed.is_ascii() {
            return Err(anyhow!(
                "Encryption key must be {} hex characters ({} bytes), got {} characters",
                KEY_SIZE * 2,
                KEY_SIZE,
                trimmed.len()
            ));
        }

        let mut key = [0u8; KEY_SIZE];
        for (i, byte) in key.iter_mut().enumerate() {
            let pair = &trimmed[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| anyhow!("Encryption key contains non-hex characters: '{}'", pair))?;
        }
        Ok(Self(key))
    }
}

/// Errors from opening a stored envelope.
///
/// The two cases need different operator responses: a malformed blob means
/// the stored row was corrupted outside this code path, while an
/// authentication failure usually means the deployment's key changed.
#[derive(Debug, Error)]
pub enum OpenError {
    /// Not valid base64, too short to hold a nonce and tag, or the decrypted
    /// payload is not UTF-8.
    #[error("envelope is malformed: {0}")]
    Malformed(String),

    /// The GCM tag did not verify. The blob was modified, or it was sealed
    /// with a different key.
    #[error("envelope authentication failed (tampered data or wrong key)")]
    TamperedOrWrongKey,
}

/// Seals plaintext into a storable envelope.
///
/// # Arguments
/// * `plaintext` - Serialized credential payload
/// * `key` - Master key
///
/// # Returns
/// * `Ok(String)` - Base64 over `nonce || ciphertext || tag`
/// * `Err` - If encryption fails
///
/// # Security
/// - Uses a cryptographically secure random nonce (never reuse)
/// - Authenticated encryption (tampering detected on open)
pub fn seal(plaintext: &str, key: &EnvelopeKey) -> Result<String> {
    let cipher = EnvelopeCipher::new_from_slice(&key.0)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    // Generate random nonce (never reuse!)
    let nonce = EnvelopeCipher::generate_nonce(&mut OsRng);

    // Encrypt; the aead API appends the tag to the ciphertext
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(&blob))
}

/// Opens a stored envelope back into plaintext.
///
/// # Arguments
/// * `blob` - Base64 over `nonce || ciphertext || tag`
/// * `key` - Master key (must match the one used to seal)
///
/// # Returns
/// * `Ok(String)` - Decrypted payload
/// * `Err(OpenError)` - Malformed blob, or tag verification failure
pub fn open(blob: &str, key: &EnvelopeKey) -> Result<String, OpenError> {
    let bytes = BASE64
        .decode(blob.trim())
        .map_err(|e| OpenError::Malformed(format!("invalid base64: {}", e)))?;

    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(OpenError::Malformed(format!(
            "blob is {} bytes, need at least {} for nonce and tag",
            bytes.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }

    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);

    let cipher = EnvelopeCipher::new_from_slice(&key.0)
        .map_err(|_| OpenError::TamperedOrWrongKey)?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| OpenError::TamperedOrWrongKey)?;

    String::from_utf8(plaintext)
        .map_err(|_| OpenError::Malformed("decrypted payload is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> EnvelopeKey {
        EnvelopeKey::from_hex(&"ab".repeat(32)).unwrap()
    }

    #[test]
    fn test_key_from_hex() {
        // Valid 64-character hex key
        assert!(EnvelopeKey::from_hex(&"0f".repeat(32)).is_ok());

        // Surrounding whitespace is tolerated (keys come from env vars)
        assert!(EnvelopeKey::from_hex(&format!(" {}\n", "0f".repeat(32))).is_ok());

        // Too short
        assert!(EnvelopeKey::from_hex(&"0f".repeat(16)).is_err());

        // Too long
        assert!(EnvelopeKey::from_hex(&"0f".repeat(64)).is_err());

        // Right length, not hex
        assert!(EnvelopeKey::from_hex(&"zz".repeat(32)).is_err());

        // Non-ASCII input must not panic
        assert!(EnvelopeKey::from_hex(&"é".repeat(32)).is_err());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let plaintext = r#"{"access_token":"my-secret-access-token-12345"}"#;

        let blob = seal(plaintext, &key).expect("seal failed");
        assert_ne!(blob, plaintext);

        let opened = open(&blob, &key).expect("open failed");
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_blob_layout() {
        let key = test_key();
        let plaintext = "twelve bytes";

        let blob = seal(plaintext, &key).unwrap();
        let bytes = BASE64.decode(&blob).unwrap();

        // nonce || ciphertext || tag, with ciphertext the same length as
        // the plaintext (GCM is a stream construction)
        assert_eq!(bytes.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_unique_nonces() {
        let key = test_key();
        let plaintext = "same-plaintext";

        let blob1 = seal(plaintext, &key).unwrap();
        let blob2 = seal(plaintext, &key).unwrap();

        // Random nonces make every envelope distinct
        assert_ne!(blob1, blob2);

        assert_eq!(open(&blob1, &key).unwrap(), plaintext);
        assert_eq!(open(&blob2, &key).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = test_key();
        let key2 = EnvelopeKey::from_hex(&"cd".repeat(32)).unwrap();

        let blob = seal("secret", &key1).unwrap();

        assert!(matches!(
            open(&blob, &key2),
            Err(OpenError::TamperedOrWrongKey)
        ));
    }

    #[test]
    fn test_tampered_blob_fails() {
        let key = test_key();
        let blob = seal("secret", &key).unwrap();
        let bytes = BASE64.decode(&blob).unwrap();

        // Flip one bit anywhere in the blob: nonce, ciphertext, or tag.
        // The tag check must catch all of them.
        for position in [0, NONCE_SIZE, bytes.len() - 1] {
            let mut tampered = bytes.clone();
            tampered[position] ^= 0x01;
            let tampered_blob = BASE64.encode(&tampered);
            assert!(
                matches!(
                    open(&tampered_blob, &key),
                    Err(OpenError::TamperedOrWrongKey)
                ),
                "tampering at byte {} was not detected",
                position
            );
        }
    }

    #[test]
    fn test_malformed_blob_fails() {
        let key = test_key();

        // Not base64 at all
        assert!(matches!(
            open("not-valid-base64!@#$", &key),
            Err(OpenError::Malformed(_))
        ));

        // Valid base64, but too short to hold nonce + tag
        let short = BASE64.encode([0u8; NONCE_SIZE + TAG_SIZE - 1]);
        assert!(matches!(open(&short, &key), Err(OpenError::Malformed(_))));
    }
}
