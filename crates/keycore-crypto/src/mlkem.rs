//! ML-KEM-768 sealing of secret shares to a validator.
//!
//! Each share is encrypted under a fresh KEM encapsulation:
//!
//! 1. `(ss, kem_ct) = ML-KEM-768.Encaps(validator_pk)`
//! 2. `key = SHA256(ss)`
//! 3. `ct = AES-256-GCM(key, nonce, share, aad = validator_id)`
//!
//! Only the holder of the validator's decapsulation key can recover the
//! share. Binding the validator ID as AAD stops a sealed share being
//! replayed to a different validator record.

use keycore_types::{KeycoreError, Result};
use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as PqPublicKey, SecretKey as PqSecretKey, SharedSecret as _,
};
use zeroize::{Zeroize, Zeroizing};

use crate::aead::{decrypt_aes_gcm, encrypt_aes_gcm, generate_aead_nonce, AeadNonce};
use crate::hash::sha256;

/// Key pair for ML-KEM-768.
pub struct KemKeyPair {
    /// Encapsulation key (1184 bytes).
    pub public_key: Vec<u8>,
    secret_key: Vec<u8>,
}

impl KemKeyPair {
    /// Generates a fresh key pair from OS randomness.
    pub fn generate() -> Self {
        let (pk, sk) = mlkem768::keypair();
        Self {
            public_key: pk.as_bytes().to_vec(),
            secret_key: sk.as_bytes().to_vec(),
        }
    }

    /// Returns the decapsulation key bytes.
    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }
}

impl Drop for KemKeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

// KemKeyPair does not implement Clone/Debug to prevent leakage.

/// A share sealed to one validator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedShare {
    /// ML-KEM-768 ciphertext (1088 bytes).
    pub kem_ciphertext: Vec<u8>,
    /// AES-256-GCM ciphertext of the share, tag appended.
    pub ciphertext: Vec<u8>,
    /// AES-GCM nonce.
    pub nonce: AeadNonce,
}

/// Seals `share` to the validator owning `kem_public_key`.
pub fn seal_share(kem_public_key: &[u8], validator_id: &str, share: &[u8]) -> Result<SealedShare> {
    let pk = mlkem768::PublicKey::from_bytes(kem_public_key).map_err(|e| KeycoreError::CryptoError {
        reason: format!("invalid ML-KEM-768 public key: {e:?}"),
    })?;
    let (ss, kem_ct) = mlkem768::encapsulate(&pk);

    let mut key = sha256(ss.as_bytes());
    let nonce = generate_aead_nonce();
    let result = encrypt_aes_gcm(&key, &nonce, share, validator_id.as_bytes());
    key.zeroize();

    Ok(SealedShare {
        kem_ciphertext: kem_ct.as_bytes().to_vec(),
        ciphertext: result?,
        nonce,
    })
}

/// Opens a share sealed by [`seal_share`].
///
/// # Errors
///
/// Returns [`KeycoreError::CryptoError`] if the KEM material is
/// malformed or AEAD verification fails.
pub fn open_share(
    kem_secret_key: &[u8],
    validator_id: &str,
    sealed: &SealedShare,
) -> Result<Zeroizing<Vec<u8>>> {
    let sk = mlkem768::SecretKey::from_bytes(kem_secret_key).map_err(|e| KeycoreError::CryptoError {
        reason: format!("invalid ML-KEM-768 secret key: {e:?}"),
    })?;
    let ct = mlkem768::Ciphertext::from_bytes(&sealed.kem_ciphertext).map_err(|e| {
        KeycoreError::CryptoError {
            reason: format!("invalid ML-KEM-768 ciphertext: {e:?}"),
        }
    })?;
    let ss = mlkem768::decapsulate(&ct, &sk);

    let mut key = sha256(ss.as_bytes());
    let result = decrypt_aes_gcm(&key, &sealed.nonce, &sealed.ciphertext, validator_id.as_bytes());
    key.zeroize();
    result.map(Zeroizing::new)
}
