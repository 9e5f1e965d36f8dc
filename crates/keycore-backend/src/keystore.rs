//! On-disk layout shared by the file-backed backends.
//!
//! Each key set lives in its own directory under the data directory:
//!
//! ```text
//! <data_dir>/<name>/
//!   keystore.enc      encrypted envelope (software backend only)
//!   info.json         public record, readable without a password
//!   ec/public.key     hex secp256k1 public key
//!   bls/public.key    hex BLS public key
//!   bls/pop.key       hex BLS proof of possession
//!   rt/public.key     hex Ringtail public key
//!   mldsa/public.key  hex ML-DSA-65 public key
//! ```
//!
//! # Envelope format (v1)
//!
//! ```json
//! {
//!   "version": 1,
//!   "salt": "<hex 32 bytes>",
//!   "nonce": "<hex 12 bytes>",
//!   "ciphertext": "<hex, AES-256-GCM tag appended>",
//!   "created_at": 1735689600
//! }
//! ```
//!
//! All files are written to a temporary sibling and renamed into place,
//! so a failed write never leaves a truncated keystore behind.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use keycore_crypto::aead::{decrypt_aes_gcm, encrypt_aes_gcm, generate_aead_nonce, AeadNonce};
use keycore_crypto::kdf::{argon2id_derive_key, generate_salt, Argon2Params, SALT_LEN};
use keycore_crypto::HdKeySet;
use keycore_types::{BackendType, KeycoreError, Result};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Encrypted key set file name.
pub const KEYSTORE_FILE: &str = "keystore.enc";

/// Public record file name.
pub const INFO_FILE: &str = "info.json";

/// Public key file name inside each algorithm directory.
pub const PUBLIC_KEY_FILE: &str = "public.key";

/// BLS proof-of-possession file name.
pub const POP_FILE: &str = "pop.key";

/// secp256k1 key directory.
pub const EC_KEY_DIR: &str = "ec";

/// BLS key directory.
pub const BLS_KEY_DIR: &str = "bls";

/// Ringtail key directory.
pub const RINGTAIL_KEY_DIR: &str = "rt";

/// ML-DSA key directory.
pub const MLDSA_KEY_DIR: &str = "mldsa";

/// Current envelope version.
pub const ENVELOPE_VERSION: u32 = 1;

/// Additional authenticated data binding ciphertexts to this format.
pub(crate) const KEYSTORE_AAD: &[u8] = b"keycore-keystore-v1";

#[cfg(unix)]
const PRIVATE_MODE: u32 = 0o600;
#[cfg(unix)]
const PUBLIC_MODE: u32 = 0o644;

// ---------------------------------------------------------------------------
// Key names and directories
// ---------------------------------------------------------------------------

/// Rejects names that are empty or could escape the data directory.
///
/// # Errors
///
/// Returns [`KeycoreError::ConfigError`] for empty names, names with
/// path separators, and names starting with `.`.
pub fn validate_key_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(KeycoreError::ConfigError {
            reason: format!("invalid key name '{name}'"),
        });
    }
    Ok(())
}

/// Returns `<data_dir>/<name>` after validating `name`.
pub fn key_dir(data_dir: &Path, name: &str) -> Result<PathBuf> {
    validate_key_name(name)?;
    Ok(data_dir.join(name))
}

/// Creates `dir` (and parents), owner-only on unix.
pub fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| KeycoreError::storage(&format!("failed to create {}", dir.display()), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| KeycoreError::storage(&format!("failed to restrict {}", dir.display()), e))?;
    }
    Ok(())
}

/// Lists the key directory names directly under `data_dir`, sorted.
/// A missing data directory yields an empty list.
pub fn list_key_names(data_dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(data_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(KeycoreError::storage("failed to read key directory", e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| KeycoreError::storage("failed to read key directory", e))?;
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_dir && validate_key_name(&name).is_ok() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Writes `bytes` to `path` through a temporary file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], private: bool) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes)
        .map_err(|e| KeycoreError::storage(&format!("failed to write {}", tmp_path.display()), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if private { PRIVATE_MODE } else { PUBLIC_MODE };
        if let Err(e) = fs::set_permissions(&tmp_path, fs::Permissions::from_mode(mode)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(KeycoreError::storage("failed to set file permissions", e));
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        KeycoreError::storage(&format!("failed to rename into {}", path.display()), e)
    })
}

// ---------------------------------------------------------------------------
// KeystoreEnvelope
// ---------------------------------------------------------------------------

/// Argon2id(password, salt) as a zeroizing 32-byte key.
pub fn derive_envelope_key(password: &str, salt: &[u8], params: &Argon2Params) -> Result<Zeroizing<[u8; 32]>> {
    let derived = argon2id_derive_key(password.as_bytes(), salt, params)?;
    Ok(Zeroizing::new(*derived.as_bytes()))
}

/// Current time truncated to the whole seconds the envelope stores.
fn now_seconds() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

#[derive(Serialize, Deserialize)]
struct EnvelopeFile {
    version: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
    created_at: i64,
}

/// A key set encrypted under an Argon2id-derived key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeystoreEnvelope {
    /// Argon2id salt.
    pub salt: [u8; SALT_LEN],
    /// AES-256-GCM nonce.
    pub nonce: AeadNonce,
    /// AES-256-GCM ciphertext of the canonical key-set encoding.
    pub ciphertext: Vec<u8>,
    /// When the envelope was written.
    pub created_at: DateTime<Utc>,
}

impl KeystoreEnvelope {
    /// Encrypts `key_set` under `password`.
    ///
    /// # Process
    ///
    /// 1. Generate a random 32-byte salt.
    /// 2. Derive a 256-bit key via Argon2id(password, salt, params).
    /// 3. Encode the key set canonically.
    /// 4. Encrypt with AES-256-GCM under a fresh nonce.
    ///
    /// Returns the envelope together with the derived key so the caller
    /// can start a session without running Argon2id a second time.
    pub fn seal(
        key_set: &HdKeySet,
        password: &str,
        params: &Argon2Params,
    ) -> Result<(Self, Zeroizing<[u8; 32]>)> {
        let salt = generate_salt();
        let key = derive_envelope_key(password, &salt, params)?;
        let envelope = Self::seal_with_key(key_set, salt, &key)?;
        Ok((envelope, key))
    }

    /// Encrypts `key_set` with a key already derived from `salt`
    /// (steps 3 and 4 of [`seal`](Self::seal)).
    pub fn seal_with_key(key_set: &HdKeySet, salt: [u8; SALT_LEN], key: &[u8; 32]) -> Result<Self> {
        let plaintext = key_set.to_canonical_bytes()?;
        let nonce = generate_aead_nonce();
        let ciphertext = encrypt_aes_gcm(key, &nonce, &plaintext, KEYSTORE_AAD)?;
        Ok(Self {
            salt,
            nonce,
            ciphertext,
            created_at: now_seconds(),
        })
    }

    /// Derives the envelope key for `password` from the stored salt.
    pub fn derive_key(&self, password: &str, params: &Argon2Params) -> Result<Zeroizing<[u8; 32]>> {
        derive_envelope_key(password, &self.salt, params)
    }

    /// Decrypts and parses the key set with an already-derived key.
    ///
    /// # Errors
    ///
    /// - [`KeycoreError::InvalidPassword`] if AEAD verification fails.
    /// - [`KeycoreError::CorruptKeystore`] if the plaintext does not parse.
    pub fn open(&self, name: &str, key: &[u8; 32]) -> Result<HdKeySet> {
        let plaintext = decrypt_aes_gcm(key, &self.nonce, &self.ciphertext, KEYSTORE_AAD)
            .map(Zeroizing::new)
            .map_err(|_| KeycoreError::InvalidPassword {
                name: name.to_owned(),
            })?;
        HdKeySet::from_canonical_bytes(&plaintext).map_err(|e| KeycoreError::CorruptKeystore {
            name: name.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Encodes the envelope as JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let file = EnvelopeFile {
            version: ENVELOPE_VERSION,
            salt: hex::encode(self.salt),
            nonce: hex::encode(self.nonce.as_bytes()),
            ciphertext: hex::encode(&self.ciphertext),
            created_at: self.created_at.timestamp(),
        };
        serde_json::to_vec_pretty(&file).map_err(|e| KeycoreError::SerializationError {
            reason: format!("failed to encode keystore envelope: {e}"),
        })
    }

    /// Parses an envelope, rejecting unknown versions and malformed
    /// fields.
    ///
    /// # Errors
    ///
    /// Returns [`KeycoreError::CorruptKeystore`] naming `name`.
    pub fn from_json(name: &str, bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| KeycoreError::CorruptKeystore {
            name: name.to_owned(),
            reason,
        };

        let file: EnvelopeFile =
            serde_json::from_slice(bytes).map_err(|e| corrupt(format!("invalid JSON: {e}")))?;
        if file.version != ENVELOPE_VERSION {
            return Err(corrupt(format!(
                "unsupported version {} (expected {ENVELOPE_VERSION})",
                file.version
            )));
        }

        let salt_vec = hex::decode(&file.salt).map_err(|e| corrupt(format!("invalid salt hex: {e}")))?;
        let salt: [u8; SALT_LEN] = salt_vec
            .as_slice()
            .try_into()
            .map_err(|_| corrupt(format!("salt must be {SALT_LEN} bytes, got {}", salt_vec.len())))?;
        let nonce_vec = hex::decode(&file.nonce).map_err(|e| corrupt(format!("invalid nonce hex: {e}")))?;
        let nonce = AeadNonce::from_slice(&nonce_vec).map_err(|e| corrupt(e.to_string()))?;
        let ciphertext =
            hex::decode(&file.ciphertext).map_err(|e| corrupt(format!("invalid ciphertext hex: {e}")))?;
        let created_at = DateTime::from_timestamp(file.created_at, 0)
            .ok_or_else(|| corrupt(format!("invalid created_at {}", file.created_at)))?;

        Ok(Self {
            salt,
            nonce,
            ciphertext,
            created_at,
        })
    }

    /// Writes the envelope into `key_dir`, owner-readable only.
    pub fn write(&self, key_dir: &Path) -> Result<()> {
        write_atomic(&key_dir.join(KEYSTORE_FILE), &self.to_json()?, true)
    }

    /// Reads the envelope from `key_dir`.
    ///
    /// # Errors
    ///
    /// - [`KeycoreError::KeyNotFound`] if there is no keystore file.
    /// - [`KeycoreError::CorruptKeystore`] if it does not parse.
    pub fn read(key_dir: &Path, name: &str) -> Result<Self> {
        let path = key_dir.join(KEYSTORE_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KeycoreError::KeyNotFound {
                    name: name.to_owned(),
                })
            }
            Err(e) => return Err(KeycoreError::storage("failed to read keystore", e)),
        };
        Self::from_json(name, &bytes)
    }
}

// ---------------------------------------------------------------------------
// Public records
// ---------------------------------------------------------------------------

/// Non-secret `info.json` record written next to every stored key set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInfo {
    /// Key set name.
    pub name: String,
    /// `0x`-prefixed secp256k1 address.
    pub ec_address: String,
    /// `NodeID-…` identity.
    pub node_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Backend that owns the secret half.
    pub backend: BackendType,
}

impl PublicInfo {
    /// Builds the record for `key_set` owned by `backend`.
    pub fn for_key_set(key_set: &HdKeySet, backend: BackendType) -> Self {
        Self {
            name: key_set.name.clone(),
            ec_address: key_set.ec_address.clone(),
            node_id: key_set.node_id.clone(),
            created_at: Utc::now(),
            backend,
        }
    }

    /// Writes `info.json` into `key_dir`.
    pub fn write(&self, key_dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| KeycoreError::SerializationError {
            reason: format!("failed to encode public info for '{}': {e}", self.name),
        })?;
        write_atomic(&key_dir.join(INFO_FILE), &json, false)
    }

    /// Reads `info.json` from `key_dir`. A missing or unreadable record
    /// yields `None`.
    pub fn read(key_dir: &Path) -> Option<Self> {
        let bytes = fs::read(key_dir.join(INFO_FILE)).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(dir = %key_dir.display(), error = %e, "ignoring malformed info.json");
                None
            }
        }
    }
}

/// Writes the hex public key files for every algorithm in `key_set`.
pub fn write_public_keys(key_dir: &Path, key_set: &HdKeySet) -> Result<()> {
    let files: [(&str, &str, &[u8]); 5] = [
        (EC_KEY_DIR, PUBLIC_KEY_FILE, &key_set.ec_public_key),
        (BLS_KEY_DIR, PUBLIC_KEY_FILE, &key_set.bls_public_key),
        (BLS_KEY_DIR, POP_FILE, &key_set.bls_pop),
        (RINGTAIL_KEY_DIR, PUBLIC_KEY_FILE, &key_set.ringtail_public_key),
        (MLDSA_KEY_DIR, PUBLIC_KEY_FILE, &key_set.mldsa_public_key),
    ];
    for (dir, file, bytes) in files {
        if bytes.is_empty() {
            continue;
        }
        let dir = key_dir.join(dir);
        fs::create_dir_all(&dir)
            .map_err(|e| KeycoreError::storage(&format!("failed to create {}", dir.display()), e))?;
        write_atomic(&dir.join(file), hex::encode(bytes).as_bytes(), false)?;
    }
    Ok(())
}

fn read_hex_file(path: &Path) -> Result<Vec<u8>> {
    match fs::read_to_string(path) {
        Ok(text) => hex::decode(text.trim()).map_err(|e| KeycoreError::SerializationError {
            reason: format!("invalid hex in {}: {e}", path.display()),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(KeycoreError::storage(&format!("failed to read {}", path.display()), e)),
    }
}

/// Reads the public half of a key set from its public key files and
/// `info.json`. Absent files leave the matching fields empty.
///
/// # Errors
///
/// - [`KeycoreError::KeyNotFound`] if `key_dir` does not exist.
pub fn read_public_keys(key_dir: &Path, name: &str) -> Result<HdKeySet> {
    if !key_dir.is_dir() {
        return Err(KeycoreError::KeyNotFound {
            name: name.to_owned(),
        });
    }

    let mut ks = HdKeySet::empty(name);
    ks.ec_public_key = read_hex_file(&key_dir.join(EC_KEY_DIR).join(PUBLIC_KEY_FILE))?;
    ks.bls_public_key = read_hex_file(&key_dir.join(BLS_KEY_DIR).join(PUBLIC_KEY_FILE))?;
    ks.bls_pop = read_hex_file(&key_dir.join(BLS_KEY_DIR).join(POP_FILE))?;
    ks.ringtail_public_key = read_hex_file(&key_dir.join(RINGTAIL_KEY_DIR).join(PUBLIC_KEY_FILE))?;
    ks.mldsa_public_key = read_hex_file(&key_dir.join(MLDSA_KEY_DIR).join(PUBLIC_KEY_FILE))?;

    if let Some(info) = PublicInfo::read(key_dir) {
        ks.ec_address = info.ec_address;
        ks.node_id = info.node_id;
    } else if !ks.ec_public_key.is_empty() {
        ks.ec_address = keycore_crypto::secp256k1::address(&ks.ec_public_key)?;
    }
    if ks.node_id.is_empty() && !ks.bls_public_key.is_empty() {
        ks.node_id = keycore_crypto::hd_keys::node_id_from_bls(&ks.bls_public_key);
    }
    Ok(ks)
}

/// Removes `key_dir` and everything in it. Missing directories are fine.
pub fn remove_key_dir(key_dir: &Path) -> Result<()> {
    match fs::remove_dir_all(key_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KeycoreError::storage(
            &format!("failed to remove {}", key_dir.display()),
            e,
        )),
    }
}
