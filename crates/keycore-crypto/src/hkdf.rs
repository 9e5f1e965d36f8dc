//! HKDF key derivation (RFC 5869).
//!
//! Every per-algorithm private key is expanded from the BIP39 seed with
//! HKDF-SHA512 under a fixed salt and a domain-specific `info` string,
//! so the same mnemonic always yields the same key set. HKDF-SHA256 is
//! also exposed for the BLS KeyGen construction in [`crate::bls`].

use hkdf::Hkdf;
use keycore_types::{KeycoreError, Result};
use sha2::{Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

// Cap well below the RFC limit; nothing here needs more than one
// BLS KeyGen block.
const MAX_OUTPUT_LEN: usize = 64;

// ---------------------------------------------------------------------------
// HkdfOutput
// ---------------------------------------------------------------------------

/// Variable-length key material derived by HKDF. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct HkdfOutput {
    bytes: Vec<u8>,
}

impl HkdfOutput {
    /// Returns the derived key material as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies the first 32 bytes into a fixed array.
    ///
    /// # Errors
    ///
    /// Returns [`KeycoreError::CryptoError`] if fewer than 32 bytes were
    /// derived.
    pub fn to_array32(&self) -> Result<[u8; 32]> {
        self.bytes
            .get(..32)
            .and_then(|s| <[u8; 32]>::try_from(s).ok())
            .ok_or_else(|| KeycoreError::CryptoError {
                reason: format!("HKDF output has {} bytes, need 32", self.bytes.len()),
            })
    }

    /// Returns the length of the derived key material.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the output is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// HkdfOutput does not implement Clone/Debug to prevent leakage.

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

fn check_len(output_len: usize) -> Result<()> {
    if output_len == 0 || output_len > MAX_OUTPUT_LEN {
        return Err(KeycoreError::CryptoError {
            reason: format!("HKDF output length must be in 1..={MAX_OUTPUT_LEN}, got {output_len}"),
        });
    }
    Ok(())
}

/// Derives key material using HKDF-SHA512.
///
/// An empty `salt` is treated as absent (RFC 5869 §3.1).
///
/// # Errors
///
/// Returns [`KeycoreError::CryptoError`] if `output_len` is 0 or
/// greater than 64.
pub fn hkdf_sha512(ikm: &[u8], salt: &[u8], info: &[u8], output_len: usize) -> Result<HkdfOutput> {
    check_len(output_len)?;
    let salt_opt = (!salt.is_empty()).then_some(salt);
    let hk = Hkdf::<Sha512>::new(salt_opt, ikm);

    let mut okm = vec![0u8; output_len];
    hk.expand(info, &mut okm).map_err(|e| KeycoreError::CryptoError {
        reason: format!("HKDF-SHA512 expansion failed: {e}"),
    })?;
    Ok(HkdfOutput { bytes: okm })
}

/// Derives key material using HKDF-SHA256.
///
/// # Errors
///
/// Same conditions as [`hkdf_sha512`].
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8], output_len: usize) -> Result<HkdfOutput> {
    check_len(output_len)?;
    let salt_opt = (!salt.is_empty()).then_some(salt);
    let hk = Hkdf::<Sha256>::new(salt_opt, ikm);

    let mut okm = vec![0u8; output_len];
    hk.expand(info, &mut okm).map_err(|e| KeycoreError::CryptoError {
        reason: format!("HKDF-SHA256 expansion failed: {e}"),
    })?;
    Ok(HkdfOutput { bytes: okm })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha512_is_deterministic_and_domain_separated() -> std::result::Result<(), KeycoreError> {
        let seed = [0x42u8; 64];
        let a1 = hkdf_sha512(&seed, b"salt", b"lux-ec-key/account/0", 32)?;
        let a2 = hkdf_sha512(&seed, b"salt", b"lux-ec-key/account/0", 32)?;
        let b = hkdf_sha512(&seed, b"salt", b"lux-bls-key/account/0", 32)?;
        let c = hkdf_sha512(&seed, b"salt", b"lux-ec-key/account/1", 32)?;
        assert_eq!(a1.as_bytes(), a2.as_bytes());
        assert_ne!(a1.as_bytes(), b.as_bytes());
        assert_ne!(a1.as_bytes(), c.as_bytes());
        Ok(())
    }

    #[test]
    fn output_len_bounds() {
        assert!(hkdf_sha512(&[1; 32], b"s", b"i", 0).is_err());
        assert!(hkdf_sha512(&[1; 32], b"s", b"i", 65).is_err());
        assert!(hkdf_sha256(&[1; 32], b"s", b"i", 64).is_ok());
    }

    #[test]
    fn to_array32_requires_enough_bytes() -> std::result::Result<(), KeycoreError> {
        let short = hkdf_sha512(&[1; 32], b"s", b"i", 16)?;
        assert!(short.to_array32().is_err());
        let long = hkdf_sha512(&[1; 32], b"s", b"i", 48)?;
        assert_eq!(&long.to_array32()?[..], &long.as_bytes()[..32]);
        Ok(())
    }

    /// RFC 5869 Test Case 1 (HKDF-SHA256).
    #[test]
    fn rfc5869_test_vector_1() -> std::result::Result<(), KeycoreError> {
        let ikm = [0x0bu8; 22];
        let salt: Vec<u8> = (0x00u8..=0x0c).collect();
        let info: Vec<u8> = (0xf0u8..=0xf9).collect();

        let out = hkdf_sha256(&ikm, &salt, &info, 42)?;
        assert_eq!(
            hex::encode(out.as_bytes()),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
        Ok(())
    }
}
