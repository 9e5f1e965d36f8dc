//! BIP39 mnemonic generation, validation, and seed derivation.
//!
//! Restricts BIP39 to 24-word (256-bit entropy) English mnemonics. Word
//! packing and checksums come from the `bip39` crate:
//!
//! 1. **Generation**: 256 bits of OS entropy → 24 BIP39 words.
//! 2. **Validation**: exactly 24 words, every word known, checksum
//!    intact.
//! 3. **Seed derivation**: PBKDF2-HMAC-SHA512 with 2048 rounds,
//!    salt = `"mnemonic" + passphrase`, producing a 64-byte seed.
//!
//! Reference: <https://github.com/bitcoin/bips/blob/master/bip-0039.mediawiki>

use bip39::Language;
use hmac::Hmac;
use keycore_types::{KeycoreError, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Number of words in every mnemonic this crate produces or accepts.
pub const WORD_COUNT: usize = 24;

// ---------------------------------------------------------------------------
// Mnemonic
// ---------------------------------------------------------------------------

/// A validated BIP39 mnemonic phrase (24 words, single-space separated).
///
/// The inner string is zeroized on drop to prevent sensitive data from
/// lingering in memory.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Mnemonic(String);

impl Mnemonic {
    /// Validates `phrase` and returns it in normalized form (lowercase,
    /// single spaces).
    ///
    /// # Errors
    ///
    /// Returns [`KeycoreError::InvalidMnemonic`] if validation fails.
    pub fn parse(phrase: &str) -> Result<Self> {
        let mut normalized = phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        if let Err(e) = validate_mnemonic(&normalized) {
            normalized.zeroize();
            return Err(e);
        }
        Ok(Self(normalized))
    }

    /// Returns the mnemonic phrase as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the individual words as a vector of string slices.
    pub fn words(&self) -> Vec<&str> {
        self.0.split_whitespace().collect()
    }

    /// Returns the number of words in the mnemonic.
    pub fn word_count(&self) -> usize {
        self.0.split_whitespace().count()
    }

    /// Recovers the 256-bit entropy this mnemonic encodes.
    pub fn to_entropy(&self) -> Result<Entropy> {
        mnemonic_to_entropy(&self.0)
    }

    /// Derives the 64-byte BIP39 seed with the given passphrase.
    pub fn to_seed(&self, passphrase: &str) -> Result<Seed> {
        mnemonic_to_seed(&self.0, passphrase)
    }
}

// Mnemonic does not implement Clone/Debug to prevent leakage.

// ---------------------------------------------------------------------------
// Entropy / Seed
// ---------------------------------------------------------------------------

/// The 256 bits of entropy behind a 24-word mnemonic.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Entropy([u8; 32]);

impl Entropy {
    /// Wraps raw entropy bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw entropy.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// A 64-byte seed derived from a BIP39 mnemonic via PBKDF2-HMAC-SHA512.
///
/// This seed is the input keying material for every per-algorithm
/// derivation in [`crate::hd_keys`]. Automatically zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed([u8; 64]);

impl Seed {
    /// Fixed byte length of a BIP39 seed.
    pub const LEN: usize = 64;

    /// Creates a [`Seed`] from a raw 64-byte array.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Returns the raw 64-byte seed.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

// Seed does not implement Clone/Debug to prevent leakage.

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Generates a new random 24-word BIP39 mnemonic from 256 bits of OS
/// entropy.
///
/// # Errors
///
/// Returns [`KeycoreError::CryptoError`] if the OS RNG fails.
pub fn generate_mnemonic() -> Result<Mnemonic> {
    let mut entropy = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut entropy)
        .map_err(|e| KeycoreError::CryptoError {
            reason: format!("OS RNG failure: {e}"),
        })?;

    let result = entropy_to_mnemonic(&entropy);

    entropy.zeroize();
    result
}

/// Converts raw 256-bit entropy into a 24-word BIP39 mnemonic.
///
/// Deterministic core of generation; also used to rebuild a mnemonic
/// from entropy recovered out of secret shares.
pub fn entropy_to_mnemonic(entropy: &[u8; 32]) -> Result<Mnemonic> {
    let mnemonic = bip39::Mnemonic::from_entropy_in(Language::English, entropy).map_err(|e| {
        KeycoreError::CryptoError {
            reason: format!("BIP39 encoding failed: {e}"),
        }
    })?;
    Ok(Mnemonic(mnemonic.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validates a BIP39 mnemonic phrase.
///
/// # Checks performed
///
/// 1. Exactly 24 words.
/// 2. Every word exists in the BIP39 English wordlist.
/// 3. The 8-bit checksum matches `SHA-256(entropy)`.
///
/// # Errors
///
/// Returns [`KeycoreError::InvalidMnemonic`] if any check fails.
pub fn validate_mnemonic(words: &str) -> Result<()> {
    mnemonic_to_entropy(words).map(|_| ())
}

/// Returns `true` if `words` is a valid 24-word mnemonic.
pub fn is_valid_mnemonic(words: &str) -> bool {
    validate_mnemonic(words).is_ok()
}

/// Recovers the entropy encoded by a mnemonic, verifying its checksum.
///
/// # Errors
///
/// Returns [`KeycoreError::InvalidMnemonic`] if the word count, a word,
/// or the checksum is wrong.
pub fn mnemonic_to_entropy(words: &str) -> Result<Entropy> {
    let count = words.split_whitespace().count();
    if count != WORD_COUNT {
        return Err(KeycoreError::InvalidMnemonic {
            reason: format!("BIP39 mnemonic must be {WORD_COUNT} words, got {count}"),
        });
    }

    let mnemonic = bip39::Mnemonic::parse_in_normalized(Language::English, words).map_err(|e| {
        KeycoreError::InvalidMnemonic {
            reason: e.to_string(),
        }
    })?;

    let raw = Zeroizing::new(mnemonic.to_entropy());
    let entropy: [u8; 32] = raw.as_slice().try_into().map_err(|_| KeycoreError::InvalidMnemonic {
        reason: format!("expected 32 bytes of entropy, got {}", raw.len()),
    })?;
    Ok(Entropy(entropy))
}

// ---------------------------------------------------------------------------
// Seed derivation
// ---------------------------------------------------------------------------

/// Derives a 64-byte seed from a BIP39 mnemonic and optional passphrase.
///
/// # Process (BIP39 spec)
///
/// - **Password**: the mnemonic sentence.
/// - **Salt**: `"mnemonic"` concatenated with `passphrase`.
/// - **Algorithm**: PBKDF2-HMAC-SHA512, 2048 rounds, 64-byte output.
///
/// # Errors
///
/// Returns [`KeycoreError::CryptoError`] if PBKDF2 computation fails.
pub fn mnemonic_to_seed(mnemonic: &str, passphrase: &str) -> Result<Seed> {
    let mut salt = Vec::with_capacity(8 + passphrase.len());
    salt.extend_from_slice(b"mnemonic");
    salt.extend_from_slice(passphrase.as_bytes());

    let mut output = [0u8; 64];
    pbkdf2::pbkdf2::<Hmac<Sha512>>(mnemonic.as_bytes(), &salt, 2048, &mut output).map_err(
        |e| KeycoreError::CryptoError {
            reason: format!("PBKDF2-HMAC-SHA512 failed: {e}"),
        },
    )?;

    salt.zeroize();

    Ok(Seed(output))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
