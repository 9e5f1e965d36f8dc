//! ML-DSA-65 (FIPS 204) post-quantum signatures.
//!
//! The private key is stored as the 32-byte key-generation seed `ξ`;
//! the expanded signing key is rebuilt on demand with
//! `ML-DSA.KeyGen_internal(ξ)`. Public keys are the 1952-byte encoded
//! verifying key.

use keycore_types::{KeycoreError, Result};
use ml_dsa::signature::{Signer, Verifier};
use ml_dsa::{EncodedSignature, EncodedVerifyingKey, KeyGen, MlDsa65, Signature, VerifyingKey, B32};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

use crate::hd_keys::KeyProvenance;
use crate::hkdf::hkdf_sha512;

/// Length of the stored private seed.
pub const SEED_LEN: usize = 32;

const KEYGEN_INFO: &[u8] = b"mldsa-keygen";

/// Expands derived seed bytes into the ML-DSA key-generation seed.
///
/// HKDF-SHA512 under the `mldsa-keygen` label is the deterministic path;
/// if it fails the seed comes from the OS RNG and the provenance says so.
pub fn derive_seed(derived: &[u8]) -> ([u8; SEED_LEN], KeyProvenance) {
    match hkdf_sha512(derived, &[], KEYGEN_INFO, SEED_LEN).and_then(|okm| okm.to_array32()) {
        Ok(seed) => (seed, KeyProvenance::Direct),
        Err(e) => {
            tracing::warn!(error = %e, "ML-DSA deterministic seed failed, using OS randomness");
            let mut seed = [0u8; SEED_LEN];
            OsRng.fill_bytes(&mut seed);
            (seed, KeyProvenance::Random)
        }
    }
}

fn seed_array(seed: &[u8]) -> Result<[u8; SEED_LEN]> {
    seed.try_into().map_err(|_| KeycoreError::CryptoError {
        reason: format!("ML-DSA seed must be {SEED_LEN} bytes, got {}", seed.len()),
    })
}

/// Returns the encoded verifying key for a stored seed.
pub fn public_key(seed: &[u8]) -> Result<Vec<u8>> {
    let mut xi = seed_array(seed)?;
    let kp = MlDsa65::key_gen_internal(&B32::from(xi));
    xi.zeroize();
    Ok(kp.verifying_key().encode().to_vec())
}

/// Signs `message` (deterministic variant, empty context).
pub fn sign(seed: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut xi = seed_array(seed)?;
    let kp = MlDsa65::key_gen_internal(&B32::from(xi));
    xi.zeroize();
    let sig: Signature<MlDsa65> = kp.signing_key().try_sign(message).map_err(|e| {
        KeycoreError::CryptoError {
            reason: format!("ML-DSA signing failed: {e}"),
        }
    })?;
    Ok(sig.encode().to_vec())
}

/// Verifies an encoded signature under an encoded verifying key.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(enc_vk) = EncodedVerifyingKey::<MlDsa65>::try_from(public_key) else {
        return false;
    };
    let Ok(enc_sig) = EncodedSignature::<MlDsa65>::try_from(signature) else {
        return false;
    };
    let vk = VerifyingKey::<MlDsa65>::decode(&enc_vk);
    match Signature::<MlDsa65>::decode(&enc_sig) {
        Some(sig) => vk.verify(message, &sig).is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_key() -> std::result::Result<(), KeycoreError> {
        let (seed_a, prov) = derive_seed(&[9u8; 32]);
        let (seed_b, _) = derive_seed(&[9u8; 32]);
        assert_eq!(prov, KeyProvenance::Direct);
        assert_eq!(seed_a, seed_b);
        assert_eq!(public_key(&seed_a)?, public_key(&seed_b)?);
        assert_eq!(public_key(&seed_a)?.len(), 1952);
        Ok(())
    }

    #[test]
    fn sign_and_verify() -> std::result::Result<(), KeycoreError> {
        let (seed, _) = derive_seed(&[1u8; 32]);
        let pk = public_key(&seed)?;
        let sig = sign(&seed, b"post-quantum")?;
        assert!(verify(&pk, b"post-quantum", &sig));
        assert!(!verify(&pk, b"pre-quantum", &sig));
        assert!(!verify(&pk[..10], b"post-quantum", &sig));
        Ok(())
    }

    #[test]
    fn seed_length_checked() {
        assert!(public_key(&[0u8; 31]).is_err());
    }
}
