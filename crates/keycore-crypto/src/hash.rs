//! SHA-256 and Keccak-256 helpers.
//!
//! SHA-256 is used for key-derivation salts, node IDs, checksums, and the
//! ML-KEM share key. Keccak-256 (the pre-standard SHA-3 padding) is used
//! for Ethereum-style addresses.

use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// Computes the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Computes the Keccak-256 digest of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_abc() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    /// Keccak-256 of the empty string differs from SHA3-256.
    #[test]
    fn keccak256_empty() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
