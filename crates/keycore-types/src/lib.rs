//! Core shared types for the keycore key-management workspace.
//!
//! This crate defines every type that crosses a crate boundary: backend
//! identifiers, key metadata, signing requests and responses, threshold
//! share parameters, configuration, and the central error enum. No other
//! crate defines shared types.

pub mod config;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ---------------------------------------------------------------------------
// BackendType
// ---------------------------------------------------------------------------

/// Identifies a key storage backend.
///
/// The string form (see [`BackendType::as_str`]) is stable: it is written
/// into public `info.json` records and accepted by [`FromStr`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendType {
    /// Encrypted file storage (Argon2id + AES-256-GCM).
    Software,
    /// macOS Keychain.
    Keychain,
    /// Linux Secret Service (GNOME Keyring, KWallet).
    SecretService,
    /// YubiKey PIV token.
    Yubikey,
    /// Zymbit hardware security module.
    Zymbit,
    /// Mobile wallet pairing; signing happens on the remote device.
    #[serde(rename = "walletconnect")]
    WalletConnect,
    /// Ledger hardware wallet.
    Ledger,
    /// Keys supplied through environment variables.
    Env,
    /// Threshold-distributed keys held by K-Chain validators.
    #[serde(rename = "kchain")]
    KChain,
}

impl BackendType {
    /// All backend identifiers, in registry preference order for display.
    pub const ALL: [BackendType; 9] = [
        Self::Software,
        Self::Keychain,
        Self::SecretService,
        Self::Yubikey,
        Self::Zymbit,
        Self::WalletConnect,
        Self::Ledger,
        Self::Env,
        Self::KChain,
    ];

    /// Returns the stable string identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::Keychain => "keychain",
            Self::SecretService => "secret-service",
            Self::Yubikey => "yubikey",
            Self::Zymbit => "zymbit",
            Self::WalletConnect => "walletconnect",
            Self::Ledger => "ledger",
            Self::Env => "env",
            Self::KChain => "kchain",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = KeycoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| KeycoreError::ConfigError {
                reason: format!("unknown backend type '{s}'"),
            })
    }
}

// ---------------------------------------------------------------------------
// KeyInfo
// ---------------------------------------------------------------------------

/// Non-secret description of a stored key, suitable for listing without
/// unlocking anything.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Key set name (unique per backend).
    pub name: String,
    /// `0x`-prefixed secp256k1 address, empty if unknown.
    pub address: String,
    /// `NodeID-<hex>` identity, empty if unknown.
    pub node_id: String,
    /// Whether the secret material is stored encrypted.
    pub encrypted: bool,
    /// Whether the key currently requires an unlock before use.
    pub locked: bool,
    /// Creation time, if recorded.
    pub created_at: Option<DateTime<Utc>>,
    /// Backend that owns the key.
    pub backend: BackendType,
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// What a signature is for. Shown to the user by interactive backends.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignKind {
    /// A chain transaction.
    #[default]
    Transaction,
    /// An arbitrary message.
    Message,
    /// An authentication challenge.
    Auth,
}

impl fmt::Display for SignKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transaction => write!(f, "transaction"),
            Self::Message => write!(f, "message"),
            Self::Auth => write!(f, "auth"),
        }
    }
}

/// Which key of an HD key set signs a request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignAlgorithm {
    /// ECDSA over secp256k1, recoverable, signs `data_hash`.
    #[default]
    Secp256k1,
    /// BLS12-381 (G1 public keys, G2 signatures), signs `data`.
    Bls,
    /// Ringtail placeholder, currently secp256k1 over `data_hash`.
    Ringtail,
    /// ML-DSA-65, signs `data`.
    MlDsa,
}

impl fmt::Display for SignAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secp256k1 => write!(f, "secp256k1"),
            Self::Bls => write!(f, "bls"),
            Self::Ringtail => write!(f, "ringtail"),
            Self::MlDsa => write!(f, "ml-dsa"),
        }
    }
}

/// A request to sign data with a named key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    /// Purpose of the signature.
    pub kind: SignKind,
    /// Chain the signature is bound to (0 when not applicable).
    pub chain_id: u64,
    /// Human-readable description for interactive approval.
    pub description: String,
    /// Raw data to sign.
    pub data: Vec<u8>,
    /// 32-byte digest of `data`; signed by digest-based algorithms.
    pub data_hash: [u8; 32],
    /// Which key of the set signs.
    pub algorithm: SignAlgorithm,
}

impl SignRequest {
    /// Creates a secp256k1 request for `data` with a caller-computed digest.
    pub fn new(kind: SignKind, data: Vec<u8>, data_hash: [u8; 32]) -> Self {
        Self {
            kind,
            data,
            data_hash,
            ..Self::default()
        }
    }

    /// Selects the signing algorithm.
    pub fn with_algorithm(mut self, algorithm: SignAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sets the chain id.
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    /// Sets the description shown to approvers.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Result of a successful signing operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    /// Encoded signature (format depends on the algorithm).
    pub signature: Vec<u8>,
    /// Public key that verifies `signature`.
    pub public_key: Vec<u8>,
    /// Address of the signer, empty when the algorithm has none.
    pub address: String,
}

// ---------------------------------------------------------------------------
// CreateKeyOptions
// ---------------------------------------------------------------------------

/// Options for creating or importing a key set.
///
/// Mnemonic and password are zeroized when the options are dropped.
#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub struct CreateKeyOptions {
    /// Existing mnemonic to import; a fresh one is generated when absent.
    pub mnemonic: Option<String>,
    /// Encryption password (software backend).
    pub password: Option<String>,
    /// Request biometric protection where the platform supports it.
    pub use_biometrics: bool,
    /// Hardware slot (e.g. YubiKey PIV slot).
    pub hardware_slot: Option<u32>,
    /// Import an existing key rather than generating one.
    pub import_only: bool,
    /// HD account index used for derivation.
    pub account_index: u32,
}

// CreateKeyOptions does not implement Clone/Debug to prevent leakage.

impl CreateKeyOptions {
    /// Options carrying only a password.
    pub fn with_password(password: &str) -> Self {
        let mut opts = Self::default();
        opts.password = Some(password.to_owned());
        opts
    }

    /// Options importing `mnemonic` and encrypting with `password`.
    pub fn import(mnemonic: &str, password: &str) -> Self {
        let mut opts = Self::default();
        opts.mnemonic = Some(mnemonic.to_owned());
        opts.password = Some(password.to_owned());
        opts.import_only = true;
        opts
    }

    /// Returns the password if present and non-empty.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// Returns the mnemonic if present and non-empty.
    pub fn mnemonic(&self) -> Option<&str> {
        self.mnemonic.as_deref().filter(|m| !m.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// ShareConfig
// ---------------------------------------------------------------------------

/// Largest supported share count: share indices are encoded in one byte.
pub const MAX_SHARES: usize = 255;

/// Threshold secret-sharing parameters.
///
/// `total` shares are produced, one per entry of `validators`; any
/// `threshold` of them reconstruct the secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareConfig {
    /// Total number of shares (N).
    pub total: usize,
    /// Shares required to reconstruct or sign (K).
    pub threshold: usize,
    /// Validator network addresses, one per share.
    pub validators: Vec<String>,
}

impl ShareConfig {
    /// Creates a config with `validators.len()` shares.
    pub fn new(threshold: usize, validators: Vec<String>) -> Self {
        Self {
            total: validators.len(),
            threshold,
            validators,
        }
    }

    /// Checks `N ≥ 2`, `1 ≤ K ≤ N`, one validator per share, and
    /// `N ≤ 255`.
    ///
    /// # Errors
    ///
    /// Returns [`KeycoreError::InvalidShareConfig`] naming the violated
    /// constraint.
    pub fn validate(&self) -> Result<()> {
        if self.total < 2 {
            return Err(KeycoreError::InvalidShareConfig {
                reason: format!("N must be >= 2, got {}", self.total),
            });
        }
        if self.threshold < 1 || self.threshold > self.total {
            return Err(KeycoreError::InvalidShareConfig {
                reason: format!(
                    "K must satisfy 1 <= K <= N, got K={} N={}",
                    self.threshold, self.total
                ),
            });
        }
        if self.validators.len() != self.total {
            return Err(KeycoreError::InvalidShareConfig {
                reason: format!(
                    "validator count must equal N, got {} for N={}",
                    self.validators.len(),
                    self.total
                ),
            });
        }
        if self.total > MAX_SHARES {
            return Err(KeycoreError::InvalidShareConfig {
                reason: format!("N must be <= {MAX_SHARES}, got {}", self.total),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// KeycoreError
// ---------------------------------------------------------------------------

/// Coarse classification of a [`KeycoreError`].
///
/// Lets callers decide how to react (prompt for a password, pick another
/// backend, retry against another validator subset) without matching on
/// every variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Rejected before any I/O or crypto: bad input or missing settings.
    Configuration,
    /// Wrong or missing credential.
    Authentication,
    /// Backend missing or unusable on this system.
    Availability,
    /// Key lifecycle conflict (exists / not found / cancelled).
    Lifecycle,
    /// Validator network failure; retry against another subset.
    Distributed,
    /// Persisted state is corrupt and will not be auto-repaired.
    Fatal,
    /// Internal failure of a primitive or I/O layer.
    Internal,
}

/// Central error type for the keycore workspace.
///
/// All crates convert their internal errors into variants of this enum.
/// Variants that concern a named key carry that name so every message
/// says which key failed.
#[derive(Debug, Error)]
pub enum KeycoreError {
    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    ConfigError {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A mnemonic phrase failed word-list or checksum validation.
    #[error("invalid mnemonic: {reason}")]
    InvalidMnemonic {
        /// Which check failed.
        reason: String,
    },

    /// Threshold parameters violate `N ≥ 2`, `1 ≤ K ≤ N`, or the
    /// validator count.
    #[error("invalid share config: {reason}")]
    InvalidShareConfig {
        /// Which constraint was violated.
        reason: String,
    },

    /// An operation needs a password and none was supplied.
    #[error("password required for key '{name}'")]
    NoPassword {
        /// Key name.
        name: String,
    },

    /// The supplied password does not decrypt the keystore.
    #[error("invalid password for key '{name}'")]
    InvalidPassword {
        /// Key name.
        name: String,
    },

    /// The key has no active session and no credential is available.
    #[error("key '{name}' is locked, unlock it first")]
    KeyLocked {
        /// Key name.
        name: String,
    },

    /// Authentication with an external authority failed.
    #[error("authentication failed: {reason}")]
    AuthFailed {
        /// Failure description.
        reason: String,
    },

    /// No backend of this type is registered.
    #[error("key backend not found: {backend}")]
    BackendNotFound {
        /// Requested backend.
        backend: BackendType,
    },

    /// The backend is registered but reports itself unavailable.
    #[error("key backend not supported on this platform: {backend}")]
    BackendNotSupported {
        /// Requested backend.
        backend: BackendType,
    },

    /// The backend is available in principle but its service or device
    /// could not be used.
    #[error("key backend {backend} unavailable: {reason}")]
    BackendUnavailable {
        /// Backend that failed.
        backend: BackendType,
        /// Failure description.
        reason: String,
    },

    /// The backend does not implement this operation.
    #[error("{backend} backend does not support {operation}")]
    UnsupportedOperation {
        /// Backend asked.
        backend: BackendType,
        /// Operation name.
        operation: String,
    },

    /// A key with this name already exists.
    #[error("key already exists: {name}")]
    KeyExists {
        /// Key name.
        name: String,
    },

    /// No key with this name exists.
    #[error("key not found: {name}")]
    KeyNotFound {
        /// Key name.
        name: String,
    },

    /// A remote approver rejected or abandoned the signing request.
    #[error("signing cancelled: {reason}")]
    SigningCancelled {
        /// Failure description.
        reason: String,
    },

    /// A validator could not be reached or answered with an error.
    #[error("validator {validator} unreachable: {reason}")]
    ValidatorUnreachable {
        /// Validator address.
        validator: String,
        /// Failure description.
        reason: String,
    },

    /// Fewer than K valid shares could be gathered.
    #[error("insufficient shares for key '{name}': got {got}, need {need}")]
    InsufficientShares {
        /// Key name.
        name: String,
        /// Valid shares gathered.
        got: usize,
        /// Threshold K.
        need: usize,
    },

    /// Storing a share on a validator failed.
    #[error("failed to store share on validator {validator}: {reason}")]
    ShareStoreFailed {
        /// Validator address.
        validator: String,
        /// Failure description.
        reason: String,
    },

    /// Retrieving a share from a validator failed.
    #[error("failed to retrieve share from validator {validator}: {reason}")]
    ShareRetrieveFailed {
        /// Validator address.
        validator: String,
        /// Failure description.
        reason: String,
    },

    /// Threshold signing could not produce a valid signature.
    #[error("threshold signing failed for key '{name}': {reason}")]
    ThresholdSigningFailed {
        /// Key name.
        name: String,
        /// Failure description.
        reason: String,
    },

    /// The key is not known to the distributed backend.
    #[error("key '{name}' is not distributed to validators")]
    KeyNotDistributed {
        /// Key name.
        name: String,
    },

    /// A JSON-RPC error object returned by a remote service.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
        /// Optional error data, JSON-encoded.
        data: Option<String>,
    },

    /// The on-disk keystore envelope is malformed or has an unknown version.
    #[error("corrupt keystore for key '{name}': {reason}")]
    CorruptKeystore {
        /// Key name.
        name: String,
        /// What is wrong with the envelope.
        reason: String,
    },

    /// A cryptographic primitive failed.
    #[error("crypto error: {reason}")]
    CryptoError {
        /// Failure description.
        reason: String,
    },

    /// A filesystem or OS credential-store operation failed.
    #[error("storage error: {reason}")]
    StorageError {
        /// Failure description.
        reason: String,
    },

    /// Encoding or decoding structured data failed.
    #[error("serialization error: {reason}")]
    SerializationError {
        /// Failure description.
        reason: String,
    },

    /// A transport-level network operation failed.
    #[error("network error: {reason}")]
    NetworkError {
        /// Failure description.
        reason: String,
    },
}

impl KeycoreError {
    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigError { .. }
            | Self::InvalidMnemonic { .. }
            | Self::InvalidShareConfig { .. }
            | Self::NoPassword { .. } => ErrorKind::Configuration,
            Self::InvalidPassword { .. } | Self::KeyLocked { .. } | Self::AuthFailed { .. } => {
                ErrorKind::Authentication
            }
            Self::BackendNotFound { .. }
            | Self::BackendNotSupported { .. }
            | Self::BackendUnavailable { .. }
            | Self::UnsupportedOperation { .. } => ErrorKind::Availability,
            Self::KeyExists { .. } | Self::KeyNotFound { .. } | Self::SigningCancelled { .. } => {
                ErrorKind::Lifecycle
            }
            Self::ValidatorUnreachable { .. }
            | Self::InsufficientShares { .. }
            | Self::ShareStoreFailed { .. }
            | Self::ShareRetrieveFailed { .. }
            | Self::ThresholdSigningFailed { .. }
            | Self::KeyNotDistributed { .. }
            | Self::Rpc { .. }
            | Self::NetworkError { .. } => ErrorKind::Distributed,
            Self::CorruptKeystore { .. } => ErrorKind::Fatal,
            Self::CryptoError { .. }
            | Self::StorageError { .. }
            | Self::SerializationError { .. } => ErrorKind::Internal,
        }
    }

    /// Wraps an I/O error as a storage error with context.
    pub fn storage(context: &str, err: impl fmt::Display) -> Self {
        Self::StorageError {
            reason: format!("{context}: {err}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Result alias
// ---------------------------------------------------------------------------

/// Convenience result type using [`KeycoreError`].
pub type Result<T> = std::result::Result<T, KeycoreError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
