//! AES-256-GCM authenticated encryption.
//!
//! Used for the keystore envelope and for sealing Shamir shares under an
//! ML-KEM shared secret. Nonces are 96 bits, drawn from OS entropy, and
//! **must never be reused** with the same key.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use keycore_types::{KeycoreError, Result};
use rand::rngs::OsRng;
use rand::RngCore;

/// Length of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

// ---------------------------------------------------------------------------
// AeadNonce
// ---------------------------------------------------------------------------

/// 96-bit (12-byte) AES-GCM nonce.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AeadNonce([u8; 12]);

impl AeadNonce {
    /// Fixed byte length of an AES-GCM nonce.
    pub const LEN: usize = 12;

    /// Creates an [`AeadNonce`] from raw bytes.
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Parses a nonce from a slice, rejecting any length other than 12.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 12] = bytes.try_into().map_err(|_| KeycoreError::CryptoError {
            reason: format!("AES-GCM nonce must be 12 bytes, got {}", bytes.len()),
        })?;
        Ok(Self(arr))
    }

    /// Returns the underlying 12-byte array.
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

/// Generates a fresh random nonce from OS entropy.
pub fn generate_aead_nonce() -> AeadNonce {
    let mut bytes = [0u8; 12];
    OsRng.fill_bytes(&mut bytes);
    AeadNonce(bytes)
}

// ---------------------------------------------------------------------------
// Encrypt / Decrypt
// ---------------------------------------------------------------------------

/// Encrypts `plaintext` with AES-256-GCM.
///
/// Returns the ciphertext with the 16-byte tag appended. `aad` is
/// authenticated but not encrypted; pass `&[]` if unused.
pub fn encrypt_aes_gcm(
    key: &[u8; 32],
    nonce: &AeadNonce,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let payload = Payload { msg: plaintext, aad };

    cipher
        .encrypt(Nonce::from_slice(&nonce.0), payload)
        .map_err(|e| KeycoreError::CryptoError {
            reason: format!("AES-256-GCM encryption failed: {e}"),
        })
}

/// Decrypts `ciphertext` (tag appended) with AES-256-GCM.
///
/// # Errors
///
/// Returns [`KeycoreError::CryptoError`] if tag verification fails
/// (wrong key, wrong nonce, tampered ciphertext, or wrong AAD). Callers
/// that know the key came from a password map this to
/// [`KeycoreError::InvalidPassword`].
pub fn decrypt_aes_gcm(
    key: &[u8; 32],
    nonce: &AeadNonce,
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(Nonce::from_slice(&nonce.0), payload)
        .map_err(|e| KeycoreError::CryptoError {
            reason: format!("AES-256-GCM decryption failed: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() -> std::result::Result<(), KeycoreError> {
        let key = [0x42u8; 32];
        let nonce = generate_aead_nonce();
        let plaintext = b"hello keystore";

        let ct = encrypt_aes_gcm(&key, &nonce, plaintext, b"meta")?;
        assert_eq!(ct.len(), plaintext.len() + TAG_LEN);

        let pt = decrypt_aes_gcm(&key, &nonce, &ct, b"meta")?;
        assert_eq!(pt.as_slice(), plaintext.as_slice());
        Ok(())
    }

    #[test]
    fn wrong_key_or_aad_fails() -> std::result::Result<(), KeycoreError> {
        let key = [0x42u8; 32];
        let nonce = generate_aead_nonce();
        let ct = encrypt_aes_gcm(&key, &nonce, b"secret", b"aad")?;

        assert!(decrypt_aes_gcm(&[0x43u8; 32], &nonce, &ct, b"aad").is_err());
        assert!(decrypt_aes_gcm(&key, &nonce, &ct, b"other").is_err());
        assert!(decrypt_aes_gcm(&key, &generate_aead_nonce(), &ct, b"aad").is_err());
        Ok(())
    }

    #[test]
    fn tampered_ciphertext_fails() -> std::result::Result<(), KeycoreError> {
        let key = [0x42u8; 32];
        let nonce = generate_aead_nonce();
        let mut ct = encrypt_aes_gcm(&key, &nonce, b"secret", b"")?;
        if let Some(byte) = ct.first_mut() {
            *byte ^= 0xFF;
        }
        assert!(decrypt_aes_gcm(&key, &nonce, &ct, b"").is_err());
        Ok(())
    }

    #[test]
    fn nonce_from_slice_checks_length() {
        assert!(AeadNonce::from_slice(&[0u8; 12]).is_ok());
        assert!(AeadNonce::from_slice(&[0u8; 24]).is_err());
    }
}
