//! BLS12-381 signatures (minimal-pubkey-size variant) with proof of
//! possession and trusted-dealer threshold signing.
//!
//! - Public keys live in G1 (48 bytes compressed).
//! - Signatures live in G2 (96 bytes compressed), hashing messages to
//!   the curve with the IETF `POP` ciphersuite tags.
//! - Secret keys are canonical 32-byte big-endian scalars.
//!
//! Key construction from seed material follows the IETF BLS `KeyGen`
//! procedure (HKDF-SHA256, 48-byte output reduced mod `r`), wrapped in an
//! explicit fallback chain whose chosen path is reported as a
//! [`KeyProvenance`].
//!
//! For distributed keys a trusted dealer samples a random polynomial,
//! hands each validator `f(i)`, and publishes only `f(0)·G1`. Partial
//! signatures are combined with Lagrange coefficients at `x = 0`.

use std::collections::BTreeSet;

use blstrs::{pairing, G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use ff::Field;
use group::prime::PrimeCurveAffine;
use group::{Curve, Group};
use hmac::{Hmac, Mac};
use keycore_types::{KeycoreError, Result};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hash::sha256;
use crate::hd_keys::KeyProvenance;
use crate::hkdf::hkdf_sha256;

/// Length of a secret scalar.
pub const SECRET_KEY_LEN: usize = 32;
/// Length of a compressed G1 public key.
pub const PUBLIC_KEY_LEN: usize = 48;
/// Length of a compressed G2 signature.
pub const SIGNATURE_LEN: usize = 96;
/// Length of an encoded [`SignatureShare`] (`index ‖ signature`).
pub const SIGNATURE_SHARE_LEN: usize = 1 + SIGNATURE_LEN;

const SIGN_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";
const POP_DST: &[u8] = b"BLS_POP_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";
const KEYGEN_SALT: &[u8] = b"BLS-SIG-KEYGEN-SALT-";
const EXPAND_TAG: &[u8] = b"bls-key-expand";

// Group order r of BLS12-381.
const CURVE_ORDER_HEX: &[u8] = b"73eda753299d7d483339d80809a1d80553bda402fffe5bfeffffffff00000001";

// ---------------------------------------------------------------------------
// Secret keys
// ---------------------------------------------------------------------------

/// A BLS secret scalar in canonical big-endian form. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct BlsSecretKey([u8; SECRET_KEY_LEN]);

impl BlsSecretKey {
    /// Parses a canonical scalar, rejecting zero and values ≥ `r`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SECRET_KEY_LEN] = bytes.try_into().map_err(|_| KeycoreError::CryptoError {
            reason: format!("BLS secret key must be {SECRET_KEY_LEN} bytes, got {}", bytes.len()),
        })?;
        let scalar = parse_scalar(&arr)?;
        if bool::from(scalar.is_zero()) {
            return Err(KeycoreError::CryptoError {
                reason: "BLS secret key is zero".into(),
            });
        }
        Ok(Self(arr))
    }

    /// Returns the raw scalar bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.0
    }

    fn scalar(&self) -> Result<Scalar> {
        parse_scalar(&self.0)
    }

    /// Computes the compressed G1 public key.
    pub fn public_key(&self) -> Result<[u8; PUBLIC_KEY_LEN]> {
        Ok((G1Projective::generator() * self.scalar()?).to_affine().to_compressed())
    }

    /// Signs `message` under the standard signing tag.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LEN]> {
        let h = G2Projective::hash_to_curve(message, SIGN_DST, &[]);
        Ok((h * self.scalar()?).to_affine().to_compressed())
    }

    /// Produces a proof of possession: a signature over the key's own
    /// compressed public key under the PoP tag.
    pub fn prove_possession(&self) -> Result<[u8; SIGNATURE_LEN]> {
        let pk = self.public_key()?;
        let h = G2Projective::hash_to_curve(&pk, POP_DST, &[]);
        Ok((h * self.scalar()?).to_affine().to_compressed())
    }

    fn from_scalar(scalar: &Scalar) -> Self {
        Self(scalar.to_bytes_be())
    }
}

// BlsSecretKey does not implement Clone/Debug to prevent leakage.

fn parse_scalar(bytes: &[u8; 32]) -> Result<Scalar> {
    Option::<Scalar>::from(Scalar::from_bytes_be(bytes)).ok_or_else(|| KeycoreError::CryptoError {
        reason: "BLS scalar is not canonical".into(),
    })
}

fn curve_order() -> Result<BigUint> {
    BigUint::parse_bytes(CURVE_ORDER_HEX, 16).ok_or_else(|| KeycoreError::CryptoError {
        reason: "failed to parse BLS12-381 group order".into(),
    })
}

/// IETF BLS `KeyGen(IKM)` with empty `key_info`.
///
/// # Errors
///
/// Returns [`KeycoreError::CryptoError`] if `ikm` is shorter than 32
/// bytes.
pub fn key_gen(ikm: &[u8]) -> Result<BlsSecretKey> {
    if ikm.len() < 32 {
        return Err(KeycoreError::CryptoError {
            reason: format!("BLS KeyGen needs at least 32 bytes of IKM, got {}", ikm.len()),
        });
    }
    let order = curve_order()?;

    let mut ikm_prime = Vec::with_capacity(ikm.len() + 1);
    ikm_prime.extend_from_slice(ikm);
    ikm_prime.push(0);

    // L = 48, key_info = "" → info = I2OSP(L, 2).
    let info = [0u8, 48];
    let mut salt = KEYGEN_SALT.to_vec();
    loop {
        salt = sha256(&salt).to_vec();
        let okm = hkdf_sha256(&ikm_prime, &salt, &info, 48)?;
        let sk = BigUint::from_bytes_be(okm.as_bytes()) % &order;
        if sk != BigUint::default() {
            let raw = sk.to_bytes_be();
            let mut out = [0u8; SECRET_KEY_LEN];
            out[SECRET_KEY_LEN - raw.len()..].copy_from_slice(&raw);
            ikm_prime.zeroize();
            return Ok(BlsSecretKey(out));
        }
    }
}

/// Builds a BLS secret key from derived seed bytes.
///
/// Tries `KeyGen(raw)`, then `KeyGen(HMAC-SHA256(raw, "bls-key-expand"))`,
/// then a fresh random scalar. The path taken is returned alongside the
/// key and logged.
pub fn derive_secret_key(raw: &[u8]) -> (BlsSecretKey, KeyProvenance) {
    match key_gen(raw) {
        Ok(sk) => return (sk, KeyProvenance::Direct),
        Err(e) => tracing::warn!(error = %e, "BLS key rejected raw seed bytes, expanding"),
    }

    if let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(raw) {
        mac.update(EXPAND_TAG);
        let mut expanded: [u8; 32] = mac.finalize().into_bytes().into();
        let result = key_gen(&expanded);
        expanded.zeroize();
        match result {
            Ok(sk) => return (sk, KeyProvenance::Expanded),
            Err(e) => tracing::warn!(error = %e, "BLS expansion failed, using random key"),
        }
    }

    (random_secret_key(), KeyProvenance::Random)
}

/// Samples a uniformly random non-zero secret key.
pub fn random_secret_key() -> BlsSecretKey {
    loop {
        let s = Scalar::random(OsRng);
        if !bool::from(s.is_zero()) {
            return BlsSecretKey::from_scalar(&s);
        }
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

fn parse_public_key(bytes: &[u8]) -> Result<G1Affine> {
    let arr: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| KeycoreError::CryptoError {
        reason: format!("BLS public key must be {PUBLIC_KEY_LEN} bytes, got {}", bytes.len()),
    })?;
    let pk = Option::<G1Affine>::from(G1Affine::from_compressed(&arr)).ok_or_else(|| {
        KeycoreError::CryptoError {
            reason: "BLS public key is not a valid G1 point".into(),
        }
    })?;
    if bool::from(pk.is_identity()) {
        return Err(KeycoreError::CryptoError {
            reason: "BLS public key is the identity".into(),
        });
    }
    Ok(pk)
}

fn parse_signature(bytes: &[u8]) -> Result<G2Affine> {
    let arr: [u8; SIGNATURE_LEN] = bytes.try_into().map_err(|_| KeycoreError::CryptoError {
        reason: format!("BLS signature must be {SIGNATURE_LEN} bytes, got {}", bytes.len()),
    })?;
    Option::<G2Affine>::from(G2Affine::from_compressed(&arr)).ok_or_else(|| {
        KeycoreError::CryptoError {
            reason: "BLS signature is not a valid G2 point".into(),
        }
    })
}

fn verify_with_dst(public_key: &[u8], message: &[u8], signature: &[u8], dst: &[u8]) -> bool {
    let (Ok(pk), Ok(sig)) = (parse_public_key(public_key), parse_signature(signature)) else {
        return false;
    };
    let h = G2Projective::hash_to_curve(message, dst, &[]).to_affine();
    pairing(&pk, &h) == pairing(&G1Affine::generator(), &sig)
}

/// Verifies a BLS signature over `message`.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    verify_with_dst(public_key, message, signature, SIGN_DST)
}

/// Verifies a proof of possession for `public_key`.
pub fn verify_possession(public_key: &[u8], proof: &[u8]) -> bool {
    verify_with_dst(public_key, public_key, proof, POP_DST)
}

// ---------------------------------------------------------------------------
// Trusted-dealer threshold keys
// ---------------------------------------------------------------------------

/// One validator's slice of a dealt BLS key.
pub struct SecretShare {
    /// 1-based evaluation point.
    pub index: u8,
    /// `f(index)` as a secret key.
    pub secret: BlsSecretKey,
}

/// Output of [`deal`]. The polynomial itself is discarded.
pub struct DealtKey {
    /// `f(0)·G1`, the key every aggregated signature verifies under.
    pub group_public_key: [u8; PUBLIC_KEY_LEN],
    /// `f(i)·G1` for each share, used to check partial signatures.
    pub share_public_keys: Vec<(u8, [u8; PUBLIC_KEY_LEN])>,
    /// One secret share per validator, indices `1..=total`.
    pub shares: Vec<SecretShare>,
}

/// Deals a fresh random K-of-N BLS key.
///
/// The group secret `f(0)` is never materialized outside the local
/// coefficient vector, which is dropped before returning.
pub fn deal(threshold: usize, total: usize) -> Result<DealtKey> {
    if threshold == 0 || threshold > total || total > usize::from(u8::MAX) {
        return Err(KeycoreError::InvalidShareConfig {
            reason: format!("cannot deal {threshold}-of-{total} BLS shares"),
        });
    }

    let coeffs: Vec<Scalar> = (0..threshold)
        .map(|i| {
            if i == 0 {
                loop {
                    let s = Scalar::random(OsRng);
                    if !bool::from(s.is_zero()) {
                        break s;
                    }
                }
            } else {
                Scalar::random(OsRng)
            }
        })
        .collect();

    let group_public_key = (G1Projective::generator() * coeffs[0]).to_affine().to_compressed();

    let mut shares = Vec::with_capacity(total);
    let mut share_public_keys = Vec::with_capacity(total);
    for i in 1..=total {
        let index = i as u8;
        let x = Scalar::from(u64::from(index));
        // Horner evaluation of f(x).
        let y = coeffs.iter().rev().fold(Scalar::ZERO, |acc, c| acc * x + c);
        let secret = BlsSecretKey::from_scalar(&y);
        share_public_keys.push((index, secret.public_key()?));
        shares.push(SecretShare { index, secret });
    }

    Ok(DealtKey {
        group_public_key,
        share_public_keys,
        shares,
    })
}

/// A partial signature produced by one share holder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureShare {
    /// Evaluation point of the share that signed.
    pub index: u8,
    /// Compressed G2 partial signature.
    pub signature: [u8; SIGNATURE_LEN],
}

impl SignatureShare {
    /// Encodes as `index ‖ signature`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SIGNATURE_SHARE_LEN);
        out.push(self.index);
        out.extend_from_slice(&self.signature);
        out
    }

    /// Parses `index ‖ signature`, rejecting index 0 and points that are
    /// not on G2.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIGNATURE_SHARE_LEN {
            return Err(KeycoreError::CryptoError {
                reason: format!(
                    "signature share must be {SIGNATURE_SHARE_LEN} bytes, got {}",
                    bytes.len()
                ),
            });
        }
        if bytes[0] == 0 {
            return Err(KeycoreError::CryptoError {
                reason: "signature share index 0 is reserved".into(),
            });
        }
        parse_signature(&bytes[1..])?;
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&bytes[1..]);
        Ok(Self {
            index: bytes[0],
            signature,
        })
    }
}

/// Signs `message` with one dealt share.
pub fn sign_share(share: &SecretShare, message: &[u8]) -> Result<SignatureShare> {
    Ok(SignatureShare {
        index: share.index,
        signature: share.secret.sign(message)?,
    })
}

/// Lagrange coefficient at 0 for `xi` over the scalar field.
fn lagrange_at_zero(xi: u8, points: &[u8]) -> Result<Scalar> {
    let x_i = Scalar::from(u64::from(xi));
    let mut num = Scalar::ONE;
    let mut den = Scalar::ONE;
    for &xj in points.iter().filter(|&&xj| xj != xi) {
        let x_j = Scalar::from(u64::from(xj));
        num *= x_j;
        den *= x_j - x_i;
    }
    let inv = Option::<Scalar>::from(den.invert()).ok_or_else(|| KeycoreError::CryptoError {
        reason: "duplicate share index in Lagrange basis".into(),
    })?;
    Ok(num * inv)
}

/// Combines `threshold` partial signatures into a group signature.
///
/// # Checks performed
///
/// 1. At least `threshold` shares are supplied.
/// 2. No share has index 0 and no index appears twice.
/// 3. Every share is a valid G2 point and, when `share_public_keys` is
///    given, verifies under its own share public key.
/// 4. The combined signature verifies under `group_public_key`.
///
/// Only the first `threshold` shares are combined.
///
/// # Errors
///
/// Returns [`KeycoreError::CryptoError`] if any check fails.
pub fn aggregate(
    shares: &[SignatureShare],
    threshold: usize,
    group_public_key: &[u8],
    share_public_keys: Option<&[(u8, [u8; PUBLIC_KEY_LEN])]>,
    message: &[u8],
) -> Result<[u8; SIGNATURE_LEN]> {
    if threshold == 0 || shares.len() < threshold {
        return Err(KeycoreError::CryptoError {
            reason: format!("need {threshold} signature shares, got {}", shares.len()),
        });
    }

    let mut seen = BTreeSet::new();
    for share in shares {
        if share.index == 0 {
            return Err(KeycoreError::CryptoError {
                reason: "signature share index 0 is reserved".into(),
            });
        }
        if !seen.insert(share.index) {
            return Err(KeycoreError::CryptoError {
                reason: format!("duplicate signature share index {}", share.index),
            });
        }
        parse_signature(&share.signature)?;
        if let Some(pks) = share_public_keys {
            let (_, pk) = pks
                .iter()
                .find(|(idx, _)| *idx == share.index)
                .ok_or_else(|| KeycoreError::CryptoError {
                    reason: format!("no public key for signature share {}", share.index),
                })?;
            if !verify(pk, message, &share.signature) {
                return Err(KeycoreError::CryptoError {
                    reason: format!("signature share {} does not verify", share.index),
                });
            }
        }
    }

    let chosen = &shares[..threshold];
    let points: Vec<u8> = chosen.iter().map(|s| s.index).collect();
    let mut acc = G2Projective::identity();
    for share in chosen {
        let sig = G2Projective::from(parse_signature(&share.signature)?);
        acc += sig * lagrange_at_zero(share.index, &points)?;
    }
    let signature = acc.to_affine().to_compressed();

    if !verify(group_public_key, message, &signature) {
        return Err(KeycoreError::CryptoError {
            reason: "aggregated signature does not verify under the group key".into(),
        });
    }
    Ok(signature)
}
