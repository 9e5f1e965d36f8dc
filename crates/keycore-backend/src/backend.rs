//! The key backend contract.
//!
//! Every storage or signing mechanism (encrypted files, OS credential
//! stores, environment variables, remote wallets, validator networks)
//! implements [`KeyBackend`]. Capability flags are plain synchronous
//! methods so a caller can choose a backend without triggering any I/O.

use async_trait::async_trait;
use keycore_crypto::HdKeySet;
use keycore_types::config::KeycoreConfig;
use keycore_types::{BackendType, CreateKeyOptions, KeyInfo, Result, SignRequest, SignResponse};

/// Trait for pluggable key backends.
///
/// Implementations guard their own state; every method takes `&self`
/// and may be called concurrently.
#[async_trait]
pub trait KeyBackend: Send + Sync {
    /// Stable backend identifier.
    fn backend_type(&self) -> BackendType;

    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Whether the backend can be used on this system right now.
    fn available(&self) -> bool;

    /// Whether loading a key needs a password.
    fn requires_password(&self) -> bool;

    /// Whether the backend needs an attached device.
    fn requires_hardware(&self) -> bool;

    /// Whether signing happens outside this process.
    fn supports_remote_signing(&self) -> bool;

    /// Whether the backend only reports itself available after a
    /// successful [`initialize`](Self::initialize), as network backends do.
    fn connects_on_initialize(&self) -> bool {
        false
    }

    /// Prepares the backend (directories, connections, persisted state).
    async fn initialize(&self, config: &KeycoreConfig) -> Result<()>;

    /// Releases resources and wipes every cached secret.
    async fn close(&self) -> Result<()>;

    /// Creates (or imports, when `options` carries a mnemonic) a key set
    /// and persists it.
    async fn create_key(&self, name: &str, options: &CreateKeyOptions) -> Result<HdKeySet>;

    /// Loads a key set, unlocking it with `password` when needed.
    async fn load_key(&self, name: &str, password: Option<&str>) -> Result<HdKeySet>;

    /// Persists `key_set` under its own name.
    async fn save_key(&self, key_set: &HdKeySet, password: Option<&str>) -> Result<()>;

    /// Removes a key and any session it has.
    async fn delete_key(&self, name: &str) -> Result<()>;

    /// Lists stored keys without unlocking anything.
    async fn list_keys(&self) -> Result<Vec<KeyInfo>>;

    /// Ends the key's session, if any.
    async fn lock(&self, name: &str) -> Result<()>;

    /// Starts a session for the key.
    async fn unlock(&self, name: &str, password: &str) -> Result<()>;

    /// Whether the key currently needs an unlock before use.
    async fn is_locked(&self, name: &str) -> bool;

    /// Signs `request` with the named key.
    async fn sign(&self, name: &str, request: &SignRequest) -> Result<SignResponse>;
}
