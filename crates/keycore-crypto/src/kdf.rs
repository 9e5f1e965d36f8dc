//! Argon2id password-based key derivation for the local keystore.
//!
//! Turns a user password and a random per-keystore salt into the 256-bit
//! AES-GCM key that seals `keystore.enc`. Parameters are fixed for files
//! written by this crate ([`Argon2Params::KEYSTORE`]) but callers may pass
//! lighter values in tests.

use keycore_types::{KeycoreError, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Salt length written into every keystore envelope.
pub const SALT_LEN: usize = 32;

// RFC 9106 recommends ≥ 16 bytes; the argon2 crate itself enforces ≥ 8.
const MIN_SALT_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Argon2Params
// ---------------------------------------------------------------------------

/// Tuning parameters for Argon2id.
///
/// | Parameter | Keystore | Meaning |
/// |-----------|----------|---------|
/// | `m_cost`  | 65 536   | Memory usage in KiB (64 MiB) |
/// | `t_cost`  | 3        | Number of passes |
/// | `p_cost`  | 4        | Lanes |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Argon2Params {
    /// Memory cost in KiB. Must be ≥ 8 × `p_cost`.
    pub m_cost: u32,
    /// Time cost (number of passes). Must be ≥ 1.
    pub t_cost: u32,
    /// Parallelism degree. Must be ≥ 1.
    pub p_cost: u32,
}

impl Argon2Params {
    /// Parameters used for every keystore this crate writes.
    pub const KEYSTORE: Self = Self {
        m_cost: 64 * 1024,
        t_cost: 3,
        p_cost: 4,
    };
}

impl Default for Argon2Params {
    fn default() -> Self {
        Self::KEYSTORE
    }
}

// ---------------------------------------------------------------------------
// DerivedKey
// ---------------------------------------------------------------------------

/// 256-bit key derived by Argon2id. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; 32]);

impl DerivedKey {
    /// Fixed byte length of the derived key.
    pub const LEN: usize = 32;

    /// Returns the raw 32-byte key material.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// DerivedKey does not implement Clone/Debug to prevent leakage.

// ---------------------------------------------------------------------------
// Salt / derivation
// ---------------------------------------------------------------------------

/// Generates a fresh random salt of [`SALT_LEN`] bytes.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derives a 256-bit key from a password and salt using Argon2id v1.3.
///
/// # Errors
///
/// - [`KeycoreError::ConfigError`] if parameters are invalid
///   (e.g. `t_cost = 0`, salt too short).
/// - [`KeycoreError::CryptoError`] if the Argon2 computation fails.
pub fn argon2id_derive_key(
    password: &[u8],
    salt: &[u8],
    params: &Argon2Params,
) -> Result<DerivedKey> {
    if salt.len() < MIN_SALT_LEN {
        return Err(KeycoreError::ConfigError {
            reason: format!(
                "salt must be at least {MIN_SALT_LEN} bytes, got {}",
                salt.len()
            ),
        });
    }

    let argon2_params = argon2::Params::new(
        params.m_cost,
        params.t_cost,
        params.p_cost,
        Some(DerivedKey::LEN),
    )
    .map_err(|e| KeycoreError::ConfigError {
        reason: format!("invalid Argon2 parameters: {e}"),
    })?;

    let argon2 = argon2::Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2_params,
    );

    let mut output = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| KeycoreError::CryptoError {
            reason: format!("Argon2id derivation failed: {e}"),
        })?;

    Ok(DerivedKey(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> Argon2Params {
        Argon2Params {
            m_cost: 256,
            t_cost: 1,
            p_cost: 1,
        }
    }

    #[test]
    fn keystore_params_are_pinned() {
        let p = Argon2Params::default();
        assert_eq!((p.m_cost, p.t_cost, p.p_cost), (65_536, 3, 4));
    }

    #[test]
    fn derive_key_is_deterministic() -> std::result::Result<(), KeycoreError> {
        let salt = b"0123456789abcdef";
        let key1 = argon2id_derive_key(b"pw1", salt, &test_params())?;
        let key2 = argon2id_derive_key(b"pw1", salt, &test_params())?;
        assert_eq!(key1.as_bytes(), key2.as_bytes());
        assert_ne!(key1.as_bytes(), &[0u8; 32]);
        Ok(())
    }

    #[test]
    fn password_and_salt_both_matter() -> std::result::Result<(), KeycoreError> {
        let base = argon2id_derive_key(b"pw1", b"salt_aaaaaaa_aaa", &test_params())?;
        let other_pw = argon2id_derive_key(b"pw2", b"salt_aaaaaaa_aaa", &test_params())?;
        let other_salt = argon2id_derive_key(b"pw1", b"salt_bbbbbbb_bbb", &test_params())?;
        assert_ne!(base.as_bytes(), other_pw.as_bytes());
        assert_ne!(base.as_bytes(), other_salt.as_bytes());
        Ok(())
    }

    #[test]
    fn salt_too_short_rejected() {
        assert!(matches!(
            argon2id_derive_key(b"pw", b"short", &test_params()),
            Err(KeycoreError::ConfigError { .. })
        ));
    }

    #[test]
    fn zero_costs_rejected() {
        let no_time = Argon2Params {
            t_cost: 0,
            ..test_params()
        };
        let no_lanes = Argon2Params {
            p_cost: 0,
            ..test_params()
        };
        assert!(argon2id_derive_key(b"pw", b"0123456789abcdef", &no_time).is_err());
        assert!(argon2id_derive_key(b"pw", b"0123456789abcdef", &no_lanes).is_err());
    }

    #[test]
    fn generated_salts_differ() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
