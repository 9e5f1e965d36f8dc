//! secp256k1 ECDSA keys, Ethereum-style addresses, and recoverable
//! signatures.
//!
//! The transaction key and the Ringtail placeholder key both live on
//! this curve. Signatures are produced over a caller-supplied 32-byte
//! digest and encoded as `r ‖ s ‖ v` (65 bytes) so the signer's public
//! key can be recovered by the verifier.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use keycore_types::{KeycoreError, Result};

use crate::hash::keccak256;

/// Length of a serialized recoverable signature.
pub const SIGNATURE_LEN: usize = 65;

/// Length of a compressed SEC1 public key.
pub const PUBLIC_KEY_LEN: usize = 33;

fn signing_key(private_key: &[u8]) -> Result<SigningKey> {
    SigningKey::from_slice(private_key).map_err(|e| KeycoreError::CryptoError {
        reason: format!("invalid secp256k1 private key: {e}"),
    })
}

/// Computes the compressed (33-byte) public key for a 32-byte scalar.
///
/// # Errors
///
/// Returns [`KeycoreError::CryptoError`] if the scalar is zero or not
/// below the curve order.
pub fn public_key(private_key: &[u8]) -> Result<Vec<u8>> {
    let sk = signing_key(private_key)?;
    Ok(sk.verifying_key().to_encoded_point(true).as_bytes().to_vec())
}

/// Derives the `0x`-prefixed Ethereum-style address for a SEC1 public
/// key (compressed or uncompressed).
///
/// Address = last 20 bytes of `Keccak256(uncompressed_xy)`.
pub fn address(public_key: &[u8]) -> Result<String> {
    let vk = VerifyingKey::from_sec1_bytes(public_key).map_err(|e| KeycoreError::CryptoError {
        reason: format!("invalid secp256k1 public key: {e}"),
    })?;
    let uncompressed = vk.to_encoded_point(false);
    // Drop the 0x04 tag byte.
    let digest = keccak256(&uncompressed.as_bytes()[1..]);
    Ok(format!("0x{}", hex::encode(&digest[12..])))
}

/// Signs a 32-byte digest, returning `r ‖ s ‖ v` with `v ∈ {0, 1}`.
pub fn sign_digest(private_key: &[u8], digest: &[u8; 32]) -> Result<Vec<u8>> {
    let sk = signing_key(private_key)?;
    let (sig, recid) = sk
        .sign_prehash_recoverable(digest)
        .map_err(|e| KeycoreError::CryptoError {
            reason: format!("secp256k1 signing failed: {e}"),
        })?;

    let mut out = Vec::with_capacity(SIGNATURE_LEN);
    out.extend_from_slice(&sig.to_bytes());
    out.push(recid.to_byte());
    Ok(out)
}

/// Recovers the compressed public key that produced `signature` over
/// `digest`.
pub fn recover(digest: &[u8; 32], signature: &[u8]) -> Result<Vec<u8>> {
    if signature.len() != SIGNATURE_LEN {
        return Err(KeycoreError::CryptoError {
            reason: format!(
                "secp256k1 signature must be {SIGNATURE_LEN} bytes, got {}",
                signature.len()
            ),
        });
    }
    let sig = Signature::from_slice(&signature[..64]).map_err(|e| KeycoreError::CryptoError {
        reason: format!("malformed secp256k1 signature: {e}"),
    })?;
    let recid = RecoveryId::from_byte(signature[64]).ok_or_else(|| KeycoreError::CryptoError {
        reason: format!("invalid recovery id {}", signature[64]),
    })?;
    let vk = VerifyingKey::recover_from_prehash(digest, &sig, recid).map_err(|e| {
        KeycoreError::CryptoError {
            reason: format!("secp256k1 recovery failed: {e}"),
        }
    })?;
    Ok(vk.to_encoded_point(true).as_bytes().to_vec())
}

/// Returns `true` if `signature` over `digest` recovers to `public_key`.
pub fn verify_digest(public_key: &[u8], digest: &[u8; 32], signature: &[u8]) -> bool {
    let Ok(expected) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    match recover(digest, signature) {
        Ok(recovered) => recovered == expected.to_encoded_point(true).as_bytes(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Private key 1 maps to the generator; its address is well known.
    #[test]
    fn scalar_one_has_known_address() -> std::result::Result<(), KeycoreError> {
        let mut sk = [0u8; 32];
        sk[31] = 1;
        let pk = public_key(&sk)?;
        assert_eq!(pk.len(), PUBLIC_KEY_LEN);
        assert_eq!(
            address(&pk)?,
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
        Ok(())
    }

    #[test]
    fn sign_then_recover() -> std::result::Result<(), KeycoreError> {
        let sk = [0x11u8; 32];
        let digest = crate::hash::sha256(b"transfer 10 LUX");
        let sig = sign_digest(&sk, &digest)?;
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert!(sig[64] <= 1);

        let pk = public_key(&sk)?;
        assert_eq!(recover(&digest, &sig)?, pk);
        assert!(verify_digest(&pk, &digest, &sig));

        let other = crate::hash::sha256(b"transfer 11 LUX");
        assert!(!verify_digest(&pk, &other, &sig));
        Ok(())
    }

    #[test]
    fn zero_scalar_rejected() {
        assert!(public_key(&[0u8; 32]).is_err());
    }
}
