//! OS credential store backends.
//!
//! The secret half of a key set is stored as hex of its canonical
//! encoding in the platform store (Secret Service on Linux through
//! `secret-tool`, the login Keychain on macOS through `security`). The
//! public half goes to the usual key directory, with `info.json` naming
//! the owning backend so listings stay separate from the software
//! backend's keys.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use keycore_crypto::mnemonic::{generate_mnemonic, validate_mnemonic};
use keycore_crypto::{derive_all_with_account, HdKeySet};
use keycore_types::config::KeycoreConfig;
use keycore_types::{
    BackendType, CreateKeyOptions, KeyInfo, KeycoreError, Result, SignRequest, SignResponse,
};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use zeroize::Zeroizing;

use crate::backend::KeyBackend;
use crate::keystore::{self, PublicInfo};
use crate::session::SessionStore;

/// `application` attribute used for Secret Service items.
pub const SECRET_SERVICE_APPLICATION: &str = "lux-cli";

/// Keychain service name.
pub const KEYCHAIN_SERVICE: &str = "io.lux.cli";

fn item_label(name: &str) -> String {
    format!("Lux Key: {name}")
}

/// Whether `program` is an executable file on `PATH`.
fn find_in_path(program: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| dir.join(program).is_file())
}

// ---------------------------------------------------------------------------
// SecretStore
// ---------------------------------------------------------------------------

/// A place to keep one secret string per key name.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Backend type this store provides.
    fn backend_type(&self) -> BackendType;

    /// Whether the store can be reached on this system.
    fn available(&self) -> bool;

    /// Stores (or replaces) the secret for `name`.
    async fn store(&self, name: &str, secret: &str) -> Result<()>;

    /// Returns the secret for `name`, or `None` if there is none.
    async fn lookup(&self, name: &str) -> Result<Option<Zeroizing<String>>>;

    /// Removes the secret for `name`. Missing entries are not an error.
    async fn delete(&self, name: &str) -> Result<()>;
}

async fn run(
    backend: BackendType,
    mut command: Command,
    stdin: Option<&str>,
) -> Result<std::process::Output> {
    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let unavailable = |reason: String| KeycoreError::BackendUnavailable { backend, reason };

    let mut child = command
        .spawn()
        .map_err(|e| unavailable(format!("failed to start credential helper: {e}")))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())
            .await
            .map_err(|e| unavailable(format!("failed to write to credential helper: {e}")))?;
        drop(pipe);
    }

    child
        .wait_with_output()
        .await
        .map_err(|e| unavailable(format!("credential helper failed: {e}")))
}

fn helper_failed(operation: &str, output: &std::process::Output) -> KeycoreError {
    KeycoreError::StorageError {
        reason: format!(
            "{operation} failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    }
}

/// Secret Service through the `secret-tool` command.
#[derive(Clone, Debug, Default)]
pub struct SecretToolStore;

impl SecretToolStore {
    fn command(action: &str) -> Command {
        let mut cmd = Command::new("secret-tool");
        cmd.arg(action);
        cmd
    }
}

#[async_trait]
impl SecretStore for SecretToolStore {
    fn backend_type(&self) -> BackendType {
        BackendType::SecretService
    }

    fn available(&self) -> bool {
        cfg!(target_os = "linux") && find_in_path("secret-tool")
    }

    async fn store(&self, name: &str, secret: &str) -> Result<()> {
        let mut cmd = Self::command("store");
        cmd.args(["--label", &item_label(name)])
            .args(["application", SECRET_SERVICE_APPLICATION, "key", name]);
        let output = run(self.backend_type(), cmd, Some(secret)).await?;
        if !output.status.success() {
            return Err(helper_failed("secret-tool store", &output));
        }
        Ok(())
    }

    async fn lookup(&self, name: &str) -> Result<Option<Zeroizing<String>>> {
        let mut cmd = Self::command("lookup");
        cmd.args(["application", SECRET_SERVICE_APPLICATION, "key", name]);
        let output = run(self.backend_type(), cmd, None).await?;
        let stdout = Zeroizing::new(output.stdout);
        if !output.status.success() || stdout.is_empty() {
            return Ok(None);
        }
        Ok(Some(Zeroizing::new(String::from_utf8_lossy(&stdout).trim().to_owned())))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut cmd = Self::command("clear");
        cmd.args(["application", SECRET_SERVICE_APPLICATION, "key", name]);
        let output = run(self.backend_type(), cmd, None).await?;
        if !output.status.success() {
            tracing::debug!(name = %name, status = %output.status, "secret-tool clear reported failure");
        }
        Ok(())
    }
}

/// macOS login Keychain through the `security` command.
#[derive(Clone, Debug, Default)]
pub struct MacSecurityStore;

impl MacSecurityStore {
    fn account(name: &str) -> String {
        format!("lux-key-{name}")
    }

    fn command(action: &str, name: &str) -> Command {
        let mut cmd = Command::new("security");
        cmd.arg(action)
            .args(["-a", &Self::account(name)])
            .args(["-s", KEYCHAIN_SERVICE]);
        cmd
    }

    /// `security -i`, which reads its commands from stdin. The secret
    /// travels in [`Self::store_script`] and never appears in argv.
    fn interactive_command() -> Command {
        let mut cmd = Command::new("security");
        cmd.arg("-i");
        cmd
    }

    /// The `add-generic-password` line fed to [`Self::interactive_command`].
    ///
    /// Names that would break the quoted line are refused.
    fn store_script(name: &str, secret: &str) -> Result<Zeroizing<String>> {
        keystore::validate_key_name(name)?;
        if name.chars().any(|c| c == '"' || c.is_control()) {
            return Err(KeycoreError::ConfigError {
                reason: format!("key name {name:?} cannot be stored in the keychain"),
            });
        }
        if !secret.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(KeycoreError::ConfigError {
                reason: "keychain secrets must be hex".into(),
            });
        }
        Ok(Zeroizing::new(format!(
            "add-generic-password -a \"{}\" -s \"{}\" -l \"{}\" -w \"{}\" -U -T \"\"\n",
            Self::account(name),
            KEYCHAIN_SERVICE,
            item_label(name),
            secret
        )))
    }
}

#[async_trait]
impl SecretStore for MacSecurityStore {
    fn backend_type(&self) -> BackendType {
        BackendType::Keychain
    }

    fn available(&self) -> bool {
        cfg!(target_os = "macos") && find_in_path("security")
    }

    async fn store(&self, name: &str, secret: &str) -> Result<()> {
        let script = Self::store_script(name, secret)?;
        let output = run(self.backend_type(), Self::interactive_command(), Some(script.as_str())).await?;
        if !output.status.success() {
            return Err(helper_failed("security add-generic-password", &output));
        }
        Ok(())
    }

    async fn lookup(&self, name: &str) -> Result<Option<Zeroizing<String>>> {
        let mut cmd = Self::command("find-generic-password", name);
        cmd.arg("-w");
        let output = run(self.backend_type(), cmd, None).await?;
        let stdout = Zeroizing::new(output.stdout);
        if !output.status.success() || stdout.is_empty() {
            return Ok(None);
        }
        Ok(Some(Zeroizing::new(String::from_utf8_lossy(&stdout).trim().to_owned())))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let cmd = Self::command("delete-generic-password", name);
        let output = run(self.backend_type(), cmd, None).await?;
        if !output.status.success() {
            tracing::debug!(name = %name, status = %output.status, "security delete reported failure");
        }
        Ok(())
    }
}

/// In-process store standing in for a platform store.
pub struct MemorySecretStore {
    backend_type: BackendType,
    available: bool,
    secrets: tokio::sync::RwLock<std::collections::HashMap<String, Zeroizing<String>>>,
}

impl MemorySecretStore {
    /// Creates an empty, available store reporting `backend_type`.
    pub fn new(backend_type: BackendType) -> Self {
        Self {
            backend_type,
            available: true,
            secrets: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Sets what [`SecretStore::available`] reports.
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Number of stored secrets.
    pub async fn len(&self) -> usize {
        self.secrets.read().await.len()
    }

    /// Returns `true` if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    fn available(&self) -> bool {
        self.available
    }

    async fn store(&self, name: &str, secret: &str) -> Result<()> {
        self.secrets
            .write()
            .await
            .insert(name.to_owned(), Zeroizing::new(secret.to_owned()));
        Ok(())
    }

    async fn lookup(&self, name: &str) -> Result<Option<Zeroizing<String>>> {
        Ok(self.secrets.read().await.get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.secrets.write().await.remove(name);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PlatformBackend
// ---------------------------------------------------------------------------

/// Key backend over a [`SecretStore`].
///
/// Unlocked keys are cached as their canonical encoding in the
/// backend's [`SessionStore`], so repeated signing does not prompt the
/// OS store each time.
pub struct PlatformBackend {
    store: Arc<dyn SecretStore>,
    data_dir: PathBuf,
    sessions: SessionStore,
}

impl PlatformBackend {
    /// Uses `store` for secrets and `data_dir` for public records.
    pub fn new(store: Arc<dyn SecretStore>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            data_dir: data_dir.into(),
            sessions: SessionStore::default(),
        }
    }

    /// Secret Service backend (Linux).
    pub fn secret_service(data_dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(SecretToolStore), data_dir)
    }

    /// Keychain backend (macOS).
    pub fn keychain(data_dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(MacSecurityStore), data_dir)
    }

    /// The credential store native to this platform, if there is one.
    pub fn native(config: &KeycoreConfig) -> Option<Self> {
        let backend = if cfg!(target_os = "macos") {
            Self::keychain(&config.data_dir)
        } else if cfg!(target_os = "linux") {
            Self::secret_service(&config.data_dir)
        } else {
            return None;
        };
        Some(backend.with_session_store(SessionStore::new(config.session_timeout)))
    }

    /// Replaces the session table.
    pub fn with_session_store(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }

    /// Returns the data directory holding public records.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the session table.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn owns(&self, dir: &Path) -> bool {
        PublicInfo::read(dir).is_some_and(|info| info.backend == self.store.backend_type())
    }

    async fn cache(&self, name: &str, key_set: &HdKeySet) -> Result<()> {
        let encoded = key_set.to_canonical_bytes()?;
        let status = self.sessions.set(name, encoded.to_vec()).await;
        tracing::debug!(name = %name, memory_locked = status.memory_locked, "platform key cached");
        Ok(())
    }
}

#[async_trait]
impl KeyBackend for PlatformBackend {
    fn backend_type(&self) -> BackendType {
        self.store.backend_type()
    }

    fn name(&self) -> &str {
        match self.store.backend_type() {
            BackendType::Keychain => "macOS Keychain",
            BackendType::SecretService => "Linux Secret Service",
            _ => "Platform Credential Store",
        }
    }

    fn available(&self) -> bool {
        self.store.available()
    }

    fn requires_password(&self) -> bool {
        false
    }

    fn requires_hardware(&self) -> bool {
        false
    }

    fn supports_remote_signing(&self) -> bool {
        false
    }

    async fn initialize(&self, _config: &KeycoreConfig) -> Result<()> {
        if !self.store.available() {
            return Err(KeycoreError::BackendUnavailable {
                backend: self.backend_type(),
                reason: "credential store not reachable".into(),
            });
        }
        keystore::create_private_dir(&self.data_dir)
    }

    async fn close(&self) -> Result<()> {
        self.sessions.clear_all().await;
        Ok(())
    }

    /// Creates a key set, stores its secret half in the platform store
    /// and leaves it unlocked.
    ///
    /// # Errors
    ///
    /// - [`KeycoreError::KeyExists`] if this backend already owns `name`.
    /// - [`KeycoreError::InvalidMnemonic`] for an invalid imported phrase.
    async fn create_key(&self, name: &str, options: &CreateKeyOptions) -> Result<HdKeySet> {
        let dir = keystore::key_dir(&self.data_dir, name)?;
        if self.owns(&dir) || self.store.lookup(name).await?.is_some() {
            return Err(KeycoreError::KeyExists {
                name: name.to_owned(),
            });
        }

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

        self.save_key(&key_set, None).await?;
        self.cache(name, &key_set).await?;
        tracing::info!(name = %name, backend = %self.backend_type(), address = %key_set.ec_address, "platform key created");
        Ok(key_set)
    }

    async fn load_key(&self, name: &str, _password: Option<&str>) -> Result<HdKeySet> {
        keystore::validate_key_name(name)?;
        if let Some(encoded) = self.sessions.get(name).await {
            return HdKeySet::from_canonical_bytes(&encoded);
        }

        let secret = self.store.lookup(name).await?.ok_or_else(|| KeycoreError::KeyNotFound {
            name: name.to_owned(),
        })?;
        let encoded = Zeroizing::new(hex::decode(secret.as_str()).map_err(|e| KeycoreError::CorruptKeystore {
            name: name.to_owned(),
            reason: format!("stored secret is not hex: {e}"),
        })?);
        let key_set = HdKeySet::from_canonical_bytes(&encoded).map_err(|e| KeycoreError::CorruptKeystore {
            name: name.to_owned(),
            reason: e.to_string(),
        })?;

        let status = self.sessions.set(name, encoded.to_vec()).await;
        tracing::info!(name = %name, memory_locked = status.memory_locked, "platform key unlocked");
        Ok(key_set)
    }

    /// Writes the secret half to the platform store and the public
    /// half to the key directory. `password` is not used.
    async fn save_key(&self, key_set: &HdKeySet, _password: Option<&str>) -> Result<()> {
        let name = key_set.name.as_str();
        let dir = keystore::key_dir(&self.data_dir, name)?;
        if !key_set.has_private_keys() {
            return Err(KeycoreError::ConfigError {
                reason: format!("key set '{name}' has no private keys to store"),
            });
        }

        let encoded = key_set.to_canonical_bytes()?;
        let secret = Zeroizing::new(hex::encode(encoded.as_slice()));
        self.store.store(name, &secret).await?;

        keystore::create_private_dir(&dir)?;
        keystore::write_public_keys(&dir, key_set)?;
        PublicInfo::for_key_set(key_set, self.backend_type()).write(&dir)?;

        self.sessions.clear(name).await;
        tracing::info!(name = %name, backend = %self.backend_type(), "platform key stored");
        Ok(())
    }

    async fn delete_key(&self, name: &str) -> Result<()> {
        let dir = keystore::key_dir(&self.data_dir, name)?;
        self.sessions.clear(name).await;

        let stored = self.store.lookup(name).await?.is_some();
        let owned = self.owns(&dir);
        if !stored && !owned {
            return Err(KeycoreError::KeyNotFound {
                name: name.to_owned(),
            });
        }

        self.store.delete(name).await?;
        if owned {
            keystore::remove_key_dir(&dir)?;
        }
        tracing::info!(name = %name, backend = %self.backend_type(), "platform key deleted");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        let backend = self.backend_type();
        let mut keys = Vec::new();
        for name in keystore::list_key_names(&self.data_dir)? {
            let Some(info) = PublicInfo::read(&self.data_dir.join(&name)) else {
                continue;
            };
            if info.backend != backend {
                continue;
            }
            keys.push(KeyInfo {
                locked: !self.sessions.is_active(&name).await,
                name,
                address: info.ec_address,
                node_id: info.node_id,
                encrypted: true,
                created_at: Some(info.created_at),
                backend,
            });
        }
        Ok(keys)
    }

    async fn lock(&self, name: &str) -> Result<()> {
        if self.sessions.clear(name).await {
            tracing::info!(name = %name, "platform key locked");
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
        self.load_key(name, None).await?.sign(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MNEMONIC_B: &str = "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo \
                              zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo vote";

    fn backend(dir: &Path) -> (Arc<MemorySecretStore>, PlatformBackend) {
        let store = Arc::new(MemorySecretStore::new(BackendType::SecretService));
        let backend = PlatformBackend::new(store.clone(), dir);
        (store, backend)
    }

    #[test]
    fn keychain_secret_stays_out_of_argv() -> std::result::Result<(), KeycoreError> {
        let secret = "00aa11bb22cc33dd";
        let cmd = MacSecurityStore::interactive_command();
        let argv: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(argv, ["-i"]);
        assert!(argv.iter().all(|a| !a.contains(secret)));

        let script = MacSecurityStore::store_script("node", secret)?;
        assert!(script.starts_with("add-generic-password -a \"lux-key-node\""));
        assert!(script.contains(&format!("-w \"{secret}\"")));
        assert!(script.ends_with('\n'));
        Ok(())
    }

    #[test]
    fn keychain_script_refuses_unquotable_input() {
        assert!(MacSecurityStore::store_script("no\"de", "00").is_err());
        assert!(MacSecurityStore::store_script("no\nde", "00").is_err());
        assert!(MacSecurityStore::store_script("node", "00\" -x \"").is_err());
    }

    #[tokio::test]
    async fn create_load_and_lock() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let (store, backend) = backend(dir.path());

        let created = backend.create_key("node", &CreateKeyOptions::import(MNEMONIC_B, "")).await?;
        assert_eq!(store.len().await, 1);
        assert!(!backend.is_locked("node").await);

        backend.lock("node").await?;
        assert!(backend.is_locked("node").await);

        let loaded = backend.load_key("node", None).await?;
        assert_eq!(loaded.ec_address, created.ec_address);
        assert_eq!(loaded.bls_private_key, created.bls_private_key);
        assert!(!backend.is_locked("node").await);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_and_missing_keys() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let (_store, backend) = backend(dir.path());

        backend.create_key("node", &CreateKeyOptions::default()).await?;
        assert!(matches!(
            backend.create_key("node", &CreateKeyOptions::default()).await,
            Err(KeycoreError::KeyExists { .. })
        ));
        assert!(matches!(
            backend.load_key("ghost", None).await,
            Err(KeycoreError::KeyNotFound { .. })
        ));
        assert!(matches!(
            backend.delete_key("ghost").await,
            Err(KeycoreError::KeyNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn listing_only_shows_own_keys() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let (store, backend) = backend(dir.path());

        backend.create_key("mine", &CreateKeyOptions::default()).await?;
        let foreign = derive_all_with_account("theirs", MNEMONIC_B, 0)?;
        let foreign_dir = dir.path().join("theirs");
        keystore::create_private_dir(&foreign_dir)?;
        PublicInfo::for_key_set(&foreign, BackendType::Software).write(&foreign_dir)?;

        let keys = backend.list_keys().await?;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, "mine");
        assert_eq!(keys[0].backend, BackendType::SecretService);

        backend.delete_key("mine").await?;
        assert!(store.is_empty().await);
        assert!(backend.list_keys().await?.is_empty());
        assert!(foreign_dir.exists());
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_secret_is_reported() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let (store, backend) = backend(dir.path());
        store.store("node", "not-hex").await?;
        assert!(matches!(
            backend.load_key("node", None).await,
            Err(KeycoreError::CorruptKeystore { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_store_fails_initialize() {
        let store = Arc::new(MemorySecretStore::new(BackendType::Keychain).with_available(false));
        let backend = PlatformBackend::new(store, "/nonexistent");
        assert!(!backend.available());
        assert_eq!(backend.backend_type(), BackendType::Keychain);
        let config = KeycoreConfig::with_data_dir("/nonexistent");
        assert!(matches!(
            backend.initialize(&config).await,
            Err(KeycoreError::BackendUnavailable { .. })
        ));
    }
}
