//! Shamir secret sharing over the prime field `p = 2^256 - 189`.
//!
//! A secret is the constant term of a random polynomial of degree
//! `K - 1`; share `i` is `(i, f(i))` for `i = 1..=N`. Any `K` shares
//! recover `f(0)` by Lagrange interpolation at zero, fewer reveal
//! nothing.
//!
//! Shares are encoded as `index (1 byte) ‖ y (32 bytes big-endian)`.

use std::collections::BTreeSet;

use keycore_types::{KeycoreError, Result, MAX_SHARES};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::hash::sha256;

/// Decimal form of the field prime.
pub const FIELD_PRIME: &str =
    "115792089237316195423570985008687907853269984665640564039457584007913129639747";

/// Encoded share length.
pub const SHARE_LEN: usize = 33;

/// Returns the field prime as a big integer.
pub fn field_prime() -> Result<BigUint> {
    BigUint::parse_bytes(FIELD_PRIME.as_bytes(), 10).ok_or_else(|| KeycoreError::CryptoError {
        reason: "failed to parse Shamir field prime".into(),
    })
}

// ---------------------------------------------------------------------------
// Share
// ---------------------------------------------------------------------------

/// One point `(index, y)` on the sharing polynomial. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Share {
    index: u8,
    y: [u8; 32],
}

impl Share {
    /// Returns the 1-based evaluation point.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Encodes as `index ‖ y`.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Vec::with_capacity(SHARE_LEN);
        out.push(self.index);
        out.extend_from_slice(&self.y);
        Zeroizing::new(out)
    }

    /// Parses `index ‖ y`, rejecting index 0 and the wrong length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SHARE_LEN {
            return Err(KeycoreError::CryptoError {
                reason: format!("Shamir share must be {SHARE_LEN} bytes, got {}", bytes.len()),
            });
        }
        if bytes[0] == 0 {
            return Err(KeycoreError::CryptoError {
                reason: "Shamir share index 0 would reveal the secret".into(),
            });
        }
        let mut y = [0u8; 32];
        y.copy_from_slice(&bytes[1..]);
        Ok(Self { index: bytes[0], y })
    }
}

// Share does not implement Clone/Debug to prevent leakage.

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn to_32_bytes(value: &BigUint) -> [u8; 32] {
    let raw = value.to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - raw.len()..].copy_from_slice(&raw);
    out
}

fn random_field_element(prime: &BigUint) -> BigUint {
    let mut buf = [0u8; 32];
    loop {
        OsRng.fill_bytes(&mut buf);
        let candidate = BigUint::from_bytes_be(&buf);
        if &candidate < prime {
            buf.zeroize();
            return candidate;
        }
    }
}

/// Evaluates `coeffs[0] + coeffs[1]·x + … mod prime` by Horner's rule.
pub fn evaluate(coeffs: &[BigUint], x: &BigUint, prime: &BigUint) -> BigUint {
    coeffs
        .iter()
        .rev()
        .fold(BigUint::default(), |acc, c| (acc * x + c) % prime)
}

/// Interpolates the polynomial through `points` and evaluates it at 0.
///
/// The basis for point `i` is `∏_{j≠i} (0 - x_j) / (x_i - x_j)`, with the
/// inverse computed by Fermat's little theorem.
///
/// # Errors
///
/// Returns [`KeycoreError::CryptoError`] if two points share an x
/// coordinate.
pub fn interpolate_at_zero(points: &[(BigUint, BigUint)], prime: &BigUint) -> Result<BigUint> {
    let exponent = prime - BigUint::from(2u32);
    let mut secret = BigUint::default();

    for (i, (xi, yi)) in points.iter().enumerate() {
        let mut num = BigUint::from(1u32);
        let mut den = BigUint::from(1u32);
        for (j, (xj, _)) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            let xj = xj % prime;
            let xi = xi % prime;
            if xi == xj {
                return Err(KeycoreError::CryptoError {
                    reason: format!("duplicate interpolation point x = {xi}"),
                });
            }
            num = (num * ((prime - &xj) % prime)) % prime;
            den = (den * ((prime + &xi - &xj) % prime)) % prime;
        }
        let basis = (num * den.modpow(&exponent, prime)) % prime;
        secret = (secret + (yi % prime) * basis) % prime;
    }
    Ok(secret)
}

// ---------------------------------------------------------------------------
// Split / reconstruct
// ---------------------------------------------------------------------------

/// Splits `secret` into `total` shares, any `threshold` of which recover
/// it.
///
/// A secret whose integer value is not below the field prime is replaced
/// by its SHA-256 digest before sharing, so reconstruction then yields
/// the digest. Every secret this crate distributes is 32 bytes of
/// entropy or a scalar, which practically always fits.
///
/// # Errors
///
/// Returns [`KeycoreError::InvalidShareConfig`] unless
/// `1 ≤ threshold ≤ total ≤ 255`.
pub fn split(secret: &[u8], threshold: usize, total: usize) -> Result<Vec<Share>> {
    if threshold == 0 || threshold > total || total > MAX_SHARES {
        return Err(KeycoreError::InvalidShareConfig {
            reason: format!("cannot split into {threshold}-of-{total} shares"),
        });
    }
    let prime = field_prime()?;

    let mut constant = BigUint::from_bytes_be(secret);
    if constant >= prime {
        tracing::warn!("secret does not fit the Shamir field, sharing its SHA-256 digest");
        constant = BigUint::from_bytes_be(&sha256(secret));
    }

    let mut coeffs = Vec::with_capacity(threshold);
    coeffs.push(constant);
    for _ in 1..threshold {
        coeffs.push(random_field_element(&prime));
    }

    let shares = (1..=total)
        .map(|i| {
            let index = i as u8;
            let y = evaluate(&coeffs, &BigUint::from(index), &prime);
            Share {
                index,
                y: to_32_bytes(&y),
            }
        })
        .collect();
    Ok(shares)
}

/// Recovers the 32-byte secret from at least `threshold` shares.
///
/// Only the first `threshold` shares are used.
///
/// # Errors
///
/// - [`KeycoreError::CryptoError`] if fewer than `threshold` shares are
///   supplied, or indices repeat.
pub fn reconstruct(shares: &[Share], threshold: usize) -> Result<Zeroizing<[u8; 32]>> {
    if threshold == 0 || shares.len() < threshold {
        return Err(KeycoreError::CryptoError {
            reason: format!("need {threshold} shares to reconstruct, got {}", shares.len()),
        });
    }

    let mut seen = BTreeSet::new();
    for share in shares {
        if !seen.insert(share.index) {
            return Err(KeycoreError::CryptoError {
                reason: format!("duplicate share index {}", share.index),
            });
        }
    }

    let prime = field_prime()?;
    let points: Vec<(BigUint, BigUint)> = shares[..threshold]
        .iter()
        .map(|s| (BigUint::from(s.index), BigUint::from_bytes_be(&s.y)))
        .collect();
    let secret = interpolate_at_zero(&points, &prime)?;
    Ok(Zeroizing::new(to_32_bytes(&secret)))
}
