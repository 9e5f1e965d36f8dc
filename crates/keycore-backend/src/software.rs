//! Password-encrypted local file backend.
//!
//! Key sets are encrypted at rest under an Argon2id-derived key with
//! AES-256-GCM (see [`crate::keystore`]). Per key name the backend moves
//! through:
//!
//! ```text
//! Unknown --create_key--> Locked <--unlock / lock--> Unlocked --delete_key--> Unknown
//! ```
//!
//! "Unlocked" means the [`SessionStore`] holds the derived envelope key.
//! While the session lives, `load_key` and `sign` need no password.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use keycore_crypto::kdf::{generate_salt, Argon2Params, SALT_LEN};
use keycore_crypto::mnemonic::{generate_mnemonic, validate_mnemonic};
use keycore_crypto::{derive_all_with_account, HdKeySet};
use keycore_types::config::{EnvOverrides, KeycoreConfig, DEFAULT_SESSION_TIMEOUT};
use keycore_types::{
    BackendType, CreateKeyOptions, KeyInfo, KeycoreError, Result, SignRequest, SignResponse,
};
use zeroize::Zeroizing;

use crate::backend::KeyBackend;
use crate::keystore::{self, derive_envelope_key, KeystoreEnvelope, PublicInfo, KEYSTORE_FILE};
use crate::session::SessionStore;

/// Display name of the software backend.
pub const SOFTWARE_BACKEND_NAME: &str = "Software (Encrypted Files)";

// ---------------------------------------------------------------------------
// SoftwareBackend
// ---------------------------------------------------------------------------

/// Encrypted file storage under `<data_dir>/<name>/keystore.enc`.
///
/// # Invariants
///
/// - Nothing secret is written unencrypted; the envelope is fully built
///   in memory before any file is touched.
/// - The session for a key only ever holds the 32-byte envelope key,
///   never the decrypted key set.
/// - Argon2id parameters are fixed to [`Argon2Params::KEYSTORE`]; the
///   override exists only under `cfg(test)` or the `test-util` feature.
pub struct SoftwareBackend {
    data_dir: PathBuf,
    sessions: SessionStore,
    argon2_params: Argon2Params,
    password_fallback: Option<Zeroizing<String>>,
}

impl SoftwareBackend {
    /// Creates a backend storing keys under `data_dir`, reading overrides
    /// from the process environment.
    ///
    /// `LUX_KEY_PASSWORD`, if set, becomes the fallback password and
    /// `LUX_KEY_SESSION_TIMEOUT` replaces the default session timeout.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_env(data_dir, &EnvOverrides::from_env())
    }

    /// Creates a backend storing keys under `data_dir` with explicit
    /// environment overrides.
    pub fn with_env(data_dir: impl Into<PathBuf>, env: &EnvOverrides) -> Self {
        Self {
            data_dir: data_dir.into(),
            sessions: SessionStore::new(env.session_timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT)),
            argon2_params: Argon2Params::KEYSTORE,
            password_fallback: env.password.clone().map(Zeroizing::new),
        }
    }

    /// Creates a backend from `config`, honoring its data directory and
    /// session timeout.
    pub fn from_config(config: &KeycoreConfig) -> Self {
        let mut backend = Self::new(&config.data_dir);
        backend.sessions = SessionStore::new(config.session_timeout);
        backend
    }

    /// Overrides the Argon2id cost. Only compiled for tests and the
    /// `test-util` feature.
    #[cfg(any(test, feature = "test-util"))]
    pub fn with_argon2_params(mut self, params: Argon2Params) -> Self {
        self.argon2_params = params;
        self
    }

    /// Replaces the fallback password used when none is supplied.
    pub fn with_password_fallback(mut self, password: Option<&str>) -> Self {
        self.password_fallback = password.filter(|p| !p.is_empty()).map(|p| Zeroizing::new(p.to_owned()));
        self
    }

    /// Returns the data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the session table.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Changes the inactivity timeout for unlocked keys.
    pub async fn set_session_timeout(&self, timeout: Duration) {
        self.sessions.set_timeout(timeout).await;
    }

    /// Reads the public half of a key set without a password.
    pub async fn load_public(&self, name: &str) -> Result<HdKeySet> {
        let dir = keystore::key_dir(&self.data_dir, name)?;
        keystore::read_public_keys(&dir, name)
    }

    /// Returns `hex(SHA256(ec_priv ‖ bls_priv)[..8])` for an unlocked key.
    pub async fn get_key_checksum(&self, name: &str) -> Result<String> {
        self.load_key(name, None).await?.checksum()
    }

    // -- Internals --------------------------------------------------------

    async fn derive_key(
        &self,
        password: Zeroizing<String>,
        salt: [u8; SALT_LEN],
    ) -> Result<Zeroizing<[u8; 32]>> {
        let params = self.argon2_params;
        tokio::task::spawn_blocking(move || derive_envelope_key(&password, &salt, &params))
            .await
            .map_err(|e| KeycoreError::CryptoError {
                reason: format!("key derivation task failed: {e}"),
            })?
    }

    /// Opens the keystore with the session key, if a session exists.
    async fn load_with_session(&self, name: &str, dir: &Path) -> Result<Option<HdKeySet>> {
        let Some(cached) = self.sessions.get(name).await else {
            return Ok(None);
        };
        let key: Zeroizing<[u8; 32]> = match <[u8; 32]>::try_from(cached.as_slice()) {
            Ok(key) => Zeroizing::new(key),
            Err(_) => {
                self.sessions.clear(name).await;
                return Ok(None);
            }
        };

        let envelope = KeystoreEnvelope::read(dir, name)?;
        match envelope.open(name, &key) {
            Ok(ks) => Ok(Some(ks)),
            Err(KeycoreError::InvalidPassword { .. }) => {
                // Keystore was re-encrypted since the session started.
                self.sessions.clear(name).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl KeyBackend for SoftwareBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }

    fn name(&self) -> &str {
        SOFTWARE_BACKEND_NAME
    }

    fn available(&self) -> bool {
        true
    }

    fn requires_password(&self) -> bool {
        true
    }

    fn requires_hardware(&self) -> bool {
        false
    }

    fn supports_remote_signing(&self) -> bool {
        false
    }

    async fn initialize(&self, _config: &KeycoreConfig) -> Result<()> {
        keystore::create_private_dir(&self.data_dir)?;
        tracing::debug!(dir = %self.data_dir.display(), "software backend initialized");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.sessions.clear_all().await;
        Ok(())
    }

    /// Creates a key set and stores it encrypted. The new key starts
    /// locked.
    ///
    /// # Errors
    ///
    /// - [`KeycoreError::KeyExists`] if a key directory already exists.
    /// - [`KeycoreError::NoPassword`] if `options` carries no password.
    /// - [`KeycoreError::InvalidMnemonic`] for an imported phrase that
    ///   fails validation.
    async fn create_key(&self, name: &str, options: &CreateKeyOptions) -> Result<HdKeySet> {
        let dir = keystore::key_dir(&self.data_dir, name)?;
        if dir.exists() {
            return Err(KeycoreError::KeyExists {
                name: name.to_owned(),
            });
        }
        let password = options.password().ok_or_else(|| KeycoreError::NoPassword {
            name: name.to_owned(),
        })?;

        let key_set = match options.mnemonic() {
            Some(phrase) => {
                validate_mnemonic(phrase)?;
                derive_all_with_account(name, phrase, options.account_index)?
            }
            None => {
                let phrase = generate_mnemonic()?;
                derive_all_with_account(name, phrase.as_str(), options.account_index)?
            }
        };

        self.save_key(&key_set, Some(password)).await?;
        tracing::info!(name = %name, address = %key_set.ec_address, "software key created");
        Ok(key_set)
    }

    /// Loads and decrypts a key set.
    ///
    /// Without an explicit password an unexpired session is used; failing
    /// that, the fallback password. An explicit password is always
    /// checked against the keystore.
    ///
    /// # Errors
    ///
    /// - [`KeycoreError::KeyLocked`] if no session and no password exist.
    /// - [`KeycoreError::KeyNotFound`] if no keystore exists.
    /// - [`KeycoreError::InvalidPassword`] if the password is wrong.
    /// - [`KeycoreError::CorruptKeystore`] if the envelope is malformed.
    async fn load_key(&self, name: &str, password: Option<&str>) -> Result<HdKeySet> {
        let dir = keystore::key_dir(&self.data_dir, name)?;
        let explicit = password.filter(|p| !p.is_empty());

        if explicit.is_none() {
            if let Some(ks) = self.load_with_session(name, &dir).await? {
                return Ok(ks);
            }
        }

        let password = match explicit {
            Some(p) => Zeroizing::new(p.to_owned()),
            None => match &self.password_fallback {
                Some(p) => p.clone(),
                None => {
                    return Err(KeycoreError::KeyLocked {
                        name: name.to_owned(),
                    })
                }
            },
        };

        let envelope = KeystoreEnvelope::read(&dir, name)?;
        let key = self.derive_key(password, envelope.salt).await?;
        let key_set = match envelope.open(name, &key) {
            Ok(ks) => ks,
            Err(e) => {
                if matches!(e, KeycoreError::InvalidPassword { .. }) {
                    tracing::warn!(name = %name, "wrong password for software key");
                }
                return Err(e);
            }
        };

        let status = self.sessions.set(name, key.to_vec()).await;
        tracing::info!(name = %name, memory_locked = status.memory_locked, "software key unlocked");
        Ok(key_set)
    }

    /// Encrypts and writes `key_set`, replacing any previous keystore of
    /// the same name. Any session for the name is ended.
    ///
    /// # Process
    ///
    /// 1. Require a password and private key material.
    /// 2. Derive the envelope key with a fresh salt (blocking pool).
    /// 3. Encrypt the canonical encoding in memory.
    /// 4. Write `keystore.enc`, the public key files and `info.json`.
    async fn save_key(&self, key_set: &HdKeySet, password: Option<&str>) -> Result<()> {
        let name = key_set.name.as_str();
        let dir = keystore::key_dir(&self.data_dir, name)?;
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| KeycoreError::NoPassword {
                name: name.to_owned(),
            })?;
        if !key_set.has_private_keys() {
            return Err(KeycoreError::ConfigError {
                reason: format!("key set '{name}' has no private keys to store"),
            });
        }

        let salt = generate_salt();
        let key = self.derive_key(Zeroizing::new(password.to_owned()), salt).await?;
        let envelope = KeystoreEnvelope::seal_with_key(key_set, salt, &key)?;

        keystore::create_private_dir(&dir)?;
        envelope.write(&dir)?;
        keystore::write_public_keys(&dir, key_set)?;
        PublicInfo::for_key_set(key_set, BackendType::Software).write(&dir)?;

        self.sessions.clear(name).await;
        tracing::info!(name = %name, dir = %dir.display(), "keystore written");
        Ok(())
    }

    async fn delete_key(&self, name: &str) -> Result<()> {
        let dir = keystore::key_dir(&self.data_dir, name)?;
        self.sessions.clear(name).await;
        if !dir.exists() {
            return Err(KeycoreError::KeyNotFound {
                name: name.to_owned(),
            });
        }
        keystore::remove_key_dir(&dir)?;
        tracing::info!(name = %name, "software key deleted");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        let mut keys = Vec::new();
        for name in keystore::list_key_names(&self.data_dir)? {
            let dir = self.data_dir.join(&name);
            if !dir.join(KEYSTORE_FILE).is_file() {
                continue;
            }
            let info = PublicInfo::read(&dir);
            keys.push(KeyInfo {
                address: info.as_ref().map(|i| i.ec_address.clone()).unwrap_or_default(),
                node_id: info.as_ref().map(|i| i.node_id.clone()).unwrap_or_default(),
                created_at: info.as_ref().map(|i| i.created_at),
                encrypted: true,
                locked: !self.sessions.is_active(&name).await,
                backend: BackendType::Software,
                name,
            });
        }
        Ok(keys)
    }

    async fn lock(&self, name: &str) -> Result<()> {
        if self.sessions.clear(name).await {
            tracing::info!(name = %name, "software key locked");
        }
        Ok(())
    }

    async fn unlock(&self, name: &str, password: &str) -> Result<()> {
        self.load_key(name, Some(password)).await.map(|_| ())
    }

    async fn is_locked(&self, name: &str) -> bool {
        !self.sessions.is_active(name).await
    }

    async fn sign(&self, name: &str, request: &SignRequest) -> Result<SignResponse> {
        let key_set = self.load_key(name, None).await?;
        let response = key_set.sign(request)?;
        tracing::debug!(name = %name, algorithm = %request.algorithm, "signed with software key");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light_backend(dir: &Path) -> SoftwareBackend {
        SoftwareBackend::new(dir)
            .with_argon2_params(Argon2Params {
                m_cost: 256,
                t_cost: 1,
                p_cost: 1,
            })
            .with_password_fallback(None)
    }

    #[tokio::test]
    async fn production_backend_uses_keystore_cost() {
        let backend = SoftwareBackend::with_env("/nonexistent", &EnvOverrides::default());
        assert_eq!(backend.argon2_params, Argon2Params::KEYSTORE);
    }

    #[tokio::test]
    async fn env_session_timeout_is_applied() {
        let mut env = EnvOverrides::default();
        env.session_timeout = Some(Duration::from_secs(90));
        let backend = SoftwareBackend::with_env("/nonexistent", &env);
        assert_eq!(backend.sessions().timeout().await, Duration::from_secs(90));

        let defaulted = SoftwareBackend::with_env("/nonexistent", &EnvOverrides::default());
        assert_eq!(defaulted.sessions().timeout().await, DEFAULT_SESSION_TIMEOUT);
    }

    #[tokio::test]
    async fn capability_flags() {
        let backend = light_backend(Path::new("/nonexistent"));
        assert_eq!(backend.backend_type(), BackendType::Software);
        assert!(backend.available());
        assert!(backend.requires_password());
        assert!(!backend.requires_hardware());
        assert!(!backend.supports_remote_signing());
    }

    #[tokio::test]
    async fn missing_password_is_no_password() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let backend = light_backend(dir.path());
        let result = backend.create_key("node", &CreateKeyOptions::default()).await;
        assert!(matches!(result, Err(KeycoreError::NoPassword { .. })));
        assert!(!dir.path().join("node").exists());
        Ok(())
    }

    #[tokio::test]
    async fn locked_without_password_is_key_locked() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let backend = light_backend(dir.path());
        backend.create_key("node", &CreateKeyOptions::with_password("pw1")).await?;

        assert!(backend.is_locked("node").await);
        assert!(matches!(
            backend.load_key("node", None).await,
            Err(KeycoreError::KeyLocked { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn fallback_password_unlocks() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let backend = light_backend(dir.path()).with_password_fallback(Some("pw1"));
        let created = backend.create_key("node", &CreateKeyOptions::with_password("pw1")).await?;

        let loaded = backend.load_key("node", None).await?;
        assert_eq!(loaded.ec_address, created.ec_address);
        assert!(!backend.is_locked("node").await);
        Ok(())
    }
}
