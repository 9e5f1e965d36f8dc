//! Cryptographic primitives for the keycore key backends.
//!
//! This crate is the **sole** location for all cryptographic operations.
//! Backends call into it; they never touch a cipher or curve directly.
//!
//! # Modules
//!
//! - [`mnemonic`]: BIP39 generation, validation, and seed derivation
//! - [`hkdf`]: HKDF-SHA512 domain-separated key derivation
//! - [`hd_keys`]: multi-algorithm HD key sets derived from one seed
//! - [`secp256k1`]: ECDSA keys, Ethereum-style addresses, recoverable signatures
//! - [`bls`]: BLS12-381 keys, proof of possession, trusted-dealer threshold signing
//! - [`mldsa`]: ML-DSA-65 post-quantum signatures
//! - [`mlkem`]: ML-KEM-768 hybrid sealing of secret shares
//! - [`shamir`]: Shamir secret sharing over a 256-bit prime field
//! - [`kdf`]: Argon2id password-based key derivation
//! - [`aead`]: AES-256-GCM authenticated encryption
//! - [`hash`]: SHA-256 and Keccak-256
//! - [`memlock`]: OS memory locking for long-lived secrets

pub mod aead;
pub mod bls;
pub mod hash;
pub mod hd_keys;
pub mod hkdf;
pub mod kdf;
pub mod memlock;
pub mod mldsa;
pub mod mlkem;
pub mod mnemonic;
pub mod secp256k1;
pub mod shamir;

pub use hd_keys::{derive_all, derive_all_with_account, DerivationProvenance, HdKeySet, KeyProvenance};
