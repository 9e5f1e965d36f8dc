//! Backend registry and default-backend selection.
//!
//! A [`BackendRegistry`] is an explicit object created at startup and
//! passed to whoever needs it; there is no process-global table, so
//! independent registries can coexist (e.g. in parallel tests).

use std::collections::HashMap;
use std::sync::Arc;

use keycore_types::config::KeycoreConfig;
use keycore_types::{BackendType, KeycoreError, Result};
use tokio::sync::RwLock;

use crate::backend::KeyBackend;

/// Platform credential stores preferred over the software backend, most
/// preferred first.
pub fn platform_preference() -> Vec<BackendType> {
    if cfg!(target_os = "macos") {
        vec![BackendType::Keychain]
    } else if cfg!(target_os = "linux") {
        vec![BackendType::SecretService]
    } else {
        Vec::new()
    }
}

/// How [`BackendRegistry::resolve_default`] picked its backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultChoice {
    /// The explicit default set through [`BackendRegistry::set_default`].
    Explicit,
    /// The first available backend from the platform preference list.
    Platform,
    /// The software backend, because nothing preferred was usable.
    Fallback,
}

fn display_rank(t: BackendType) -> usize {
    BackendType::ALL
        .iter()
        .position(|x| *x == t)
        .unwrap_or(BackendType::ALL.len())
}

#[derive(Default)]
struct RegistryState {
    backends: HashMap<BackendType, Arc<dyn KeyBackend>>,
    default_backend: Option<BackendType>,
    active: HashMap<BackendType, Arc<dyn KeyBackend>>,
}

/// The set of key backends a process can use.
///
/// One reader/writer lock guards all registry state. Lookups share it;
/// registration and default changes take it exclusively. Backend calls
/// made by [`initialize_all`](Self::initialize_all) and friends run
/// outside the lock.
pub struct BackendRegistry {
    state: RwLock<RegistryState>,
    preference: Vec<BackendType>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Creates an empty registry using this platform's preference order.
    pub fn new() -> Self {
        Self::with_preference(platform_preference())
    }

    /// Creates an empty registry with an explicit preference order.
    pub fn with_preference(preference: Vec<BackendType>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            preference,
        }
    }

    /// Registers `backend`, replacing any backend of the same type.
    pub async fn register(&self, backend: Arc<dyn KeyBackend>) {
        let backend_type = backend.backend_type();
        let previous = self
            .state
            .write()
            .await
            .backends
            .insert(backend_type, backend);
        if previous.is_some() {
            tracing::debug!(backend = %backend_type, "replaced registered backend");
        } else {
            tracing::debug!(backend = %backend_type, "registered backend");
        }
    }

    /// Returns the backend of type `backend_type` if it is registered
    /// and available.
    ///
    /// # Errors
    ///
    /// - [`KeycoreError::BackendNotFound`] if it is not registered.
    /// - [`KeycoreError::BackendNotSupported`] if it reports itself
    ///   unavailable.
    pub async fn get(&self, backend_type: BackendType) -> Result<Arc<dyn KeyBackend>> {
        let state = self.state.read().await;
        let backend = state
            .backends
            .get(&backend_type)
            .ok_or(KeycoreError::BackendNotFound {
                backend: backend_type,
            })?;
        if !backend.available() {
            return Err(KeycoreError::BackendNotSupported {
                backend: backend_type,
            });
        }
        Ok(Arc::clone(backend))
    }

    /// Returns every registered backend that is currently available.
    pub async fn list_available(&self) -> Vec<Arc<dyn KeyBackend>> {
        let state = self.state.read().await;
        let mut available: Vec<Arc<dyn KeyBackend>> = state
            .backends
            .values()
            .filter(|b| b.available())
            .cloned()
            .collect();
        available.sort_by_key(|b| display_rank(b.backend_type()));
        available
    }

    /// Makes `backend_type` the explicit default.
    ///
    /// # Errors
    ///
    /// Returns [`KeycoreError::BackendNotFound`] if it is not registered.
    pub async fn set_default(&self, backend_type: BackendType) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.backends.contains_key(&backend_type) {
            return Err(KeycoreError::BackendNotFound {
                backend: backend_type,
            });
        }
        state.default_backend = Some(backend_type);
        tracing::info!(backend = %backend_type, "default key backend set");
        Ok(())
    }

    /// Returns the default backend.
    ///
    /// See [`resolve_default`](Self::resolve_default).
    pub async fn get_default(&self) -> Result<Arc<dyn KeyBackend>> {
        self.resolve_default().await.map(|(backend, _)| backend)
    }

    /// Picks the default backend and reports how it was chosen.
    ///
    /// Order: the explicit default if available, then the first
    /// available backend in the preference order, then the software
    /// backend.
    ///
    /// # Errors
    ///
    /// Returns [`KeycoreError::BackendNotFound`] if none of these is
    /// registered.
    pub async fn resolve_default(&self) -> Result<(Arc<dyn KeyBackend>, DefaultChoice)> {
        let state = self.state.read().await;

        if let Some(explicit) = state.default_backend {
            match state.backends.get(&explicit) {
                Some(b) if b.available() => return Ok((Arc::clone(b), DefaultChoice::Explicit)),
                _ => tracing::debug!(backend = %explicit, "explicit default backend unavailable"),
            }
        }

        for preferred in &self.preference {
            if let Some(b) = state.backends.get(preferred) {
                if b.available() {
                    return Ok((Arc::clone(b), DefaultChoice::Platform));
                }
                tracing::debug!(backend = %preferred, "preferred backend unavailable");
            }
        }

        state
            .backends
            .get(&BackendType::Software)
            .map(|b| (Arc::clone(b), DefaultChoice::Fallback))
            .ok_or(KeycoreError::BackendNotFound {
                backend: BackendType::Software,
            })
    }

    /// Initializes every available backend, plus those that connect on
    /// initialization. Failures are logged and the backend is skipped.
    /// Returns the backends now active.
    pub async fn initialize_all(&self, config: &KeycoreConfig) -> Vec<BackendType> {
        let candidates: Vec<Arc<dyn KeyBackend>> = {
            let state = self.state.read().await;
            let mut candidates: Vec<Arc<dyn KeyBackend>> = state
                .backends
                .values()
                .filter(|b| b.available() || b.connects_on_initialize())
                .cloned()
                .collect();
            candidates.sort_by_key(|b| display_rank(b.backend_type()));
            candidates
        };

        let mut initialized = Vec::new();
        for backend in candidates {
            let backend_type = backend.backend_type();
            match backend.initialize(config).await {
                Ok(()) => {
                    tracing::info!(backend = %backend_type, "key backend initialized");
                    initialized.push(backend);
                }
                Err(e) => {
                    tracing::warn!(backend = %backend_type, error = %e, "key backend failed to initialize");
                }
            }
        }

        let mut state = self.state.write().await;
        for backend in initialized {
            state.active.insert(backend.backend_type(), backend);
        }
        let mut active: Vec<BackendType> = state.active.keys().copied().collect();
        active.sort_by_key(|t| display_rank(*t));
        active
    }

    /// Returns the types of the initialized backends.
    pub async fn active(&self) -> Vec<BackendType> {
        let mut active: Vec<BackendType> = self.state.read().await.active.keys().copied().collect();
        active.sort_by_key(|t| display_rank(*t));
        active
    }

    /// Closes every active backend, wiping their sessions.
    pub async fn close_all(&self) {
        let active: Vec<Arc<dyn KeyBackend>> = {
            let mut state = self.state.write().await;
            state.active.drain().map(|(_, b)| b).collect()
        };
        for backend in active {
            if let Err(e) = backend.close().await {
                tracing::warn!(backend = %backend.backend_type(), error = %e, "failed to close key backend");
            }
        }
    }

    /// Locks every listed key on every active backend.
    pub async fn lock_all(&self) {
        let active: Vec<Arc<dyn KeyBackend>> = self.state.read().await.active.values().cloned().collect();
        for backend in active {
            let keys = match backend.list_keys().await {
                Ok(keys) => keys,
                Err(e) => {
                    tracing::warn!(backend = %backend.backend_type(), error = %e, "cannot list keys to lock");
                    continue;
                }
            };
            for key in keys {
                if let Err(e) = backend.lock(&key.name).await {
                    tracing::warn!(backend = %backend.backend_type(), name = %key.name, error = %e, "failed to lock key");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keycore_crypto::HdKeySet;
    use keycore_types::{CreateKeyOptions, KeyInfo, SignRequest, SignResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Stub {
        backend_type: BackendType,
        available: bool,
        connects: bool,
        fail_init: bool,
        locks: AtomicUsize,
    }

    impl Stub {
        fn new(backend_type: BackendType, available: bool) -> Arc<Self> {
            Arc::new(Self {
                backend_type,
                available,
                connects: false,
                fail_init: false,
                locks: AtomicUsize::new(0),
            })
        }

        fn connecting(backend_type: BackendType) -> Arc<Self> {
            Arc::new(Self {
                backend_type,
                available: false,
                connects: true,
                fail_init: false,
                locks: AtomicUsize::new(0),
            })
        }

        fn failing(backend_type: BackendType) -> Arc<Self> {
            Arc::new(Self {
                backend_type,
                available: true,
                connects: false,
                fail_init: true,
                locks: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl KeyBackend for Stub {
        fn backend_type(&self) -> BackendType {
            self.backend_type
        }
        fn name(&self) -> &str {
            "stub"
        }
        fn available(&self) -> bool {
            self.available
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
        fn connects_on_initialize(&self) -> bool {
            self.connects
        }
        async fn initialize(&self, _config: &KeycoreConfig) -> Result<()> {
            if self.fail_init {
                return Err(KeycoreError::BackendUnavailable {
                    backend: self.backend_type,
                    reason: "stub refuses".into(),
                });
            }
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        async fn create_key(&self, name: &str, _options: &CreateKeyOptions) -> Result<HdKeySet> {
            Ok(HdKeySet::empty(name))
        }
        async fn load_key(&self, name: &str, _password: Option<&str>) -> Result<HdKeySet> {
            Ok(HdKeySet::empty(name))
        }
        async fn save_key(&self, _key_set: &HdKeySet, _password: Option<&str>) -> Result<()> {
            Ok(())
        }
        async fn delete_key(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn list_keys(&self) -> Result<Vec<KeyInfo>> {
            Ok(vec![
                KeyInfo {
                    name: "a".into(),
                    address: String::new(),
                    node_id: String::new(),
                    encrypted: false,
                    locked: false,
                    created_at: None,
                    backend: self.backend_type,
                },
                KeyInfo {
                    name: "b".into(),
                    address: String::new(),
                    node_id: String::new(),
                    encrypted: false,
                    locked: false,
                    created_at: None,
                    backend: self.backend_type,
                },
            ])
        }
        async fn lock(&self, _name: &str) -> Result<()> {
            self.locks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn unlock(&self, _name: &str, _password: &str) -> Result<()> {
            Ok(())
        }
        async fn is_locked(&self, _name: &str) -> bool {
            false
        }
        async fn sign(&self, _name: &str, _request: &SignRequest) -> Result<SignResponse> {
            Err(KeycoreError::UnsupportedOperation {
                backend: self.backend_type,
                operation: "sign".into(),
            })
        }
    }

    #[tokio::test]
    async fn default_falls_back_to_software() -> std::result::Result<(), KeycoreError> {
        let registry = BackendRegistry::with_preference(vec![BackendType::SecretService]);
        registry.register(Stub::new(BackendType::SecretService, false)).await;
        registry.register(Stub::new(BackendType::Software, true)).await;

        let (backend, choice) = registry.resolve_default().await?;
        assert_eq!(backend.backend_type(), BackendType::Software);
        assert_eq!(choice, DefaultChoice::Fallback);
        Ok(())
    }

    #[tokio::test]
    async fn available_platform_store_is_preferred() -> std::result::Result<(), KeycoreError> {
        let registry = BackendRegistry::with_preference(vec![BackendType::Keychain]);
        registry.register(Stub::new(BackendType::Software, true)).await;
        registry.register(Stub::new(BackendType::Keychain, true)).await;

        let (backend, choice) = registry.resolve_default().await?;
        assert_eq!(backend.backend_type(), BackendType::Keychain);
        assert_eq!(choice, DefaultChoice::Platform);
        Ok(())
    }

    #[tokio::test]
    async fn explicit_default_wins_when_available() -> std::result::Result<(), KeycoreError> {
        let registry = BackendRegistry::with_preference(vec![BackendType::Keychain]);
        registry.register(Stub::new(BackendType::Keychain, true)).await;
        registry.register(Stub::new(BackendType::Env, true)).await;
        registry.set_default(BackendType::Env).await?;

        let (backend, choice) = registry.resolve_default().await?;
        assert_eq!(backend.backend_type(), BackendType::Env);
        assert_eq!(choice, DefaultChoice::Explicit);
        Ok(())
    }

    #[tokio::test]
    async fn empty_registry_has_no_default() {
        let registry = BackendRegistry::with_preference(Vec::new());
        assert!(matches!(
            registry.get_default().await,
            Err(KeycoreError::BackendNotFound {
                backend: BackendType::Software
            })
        ));
        assert!(matches!(
            registry.set_default(BackendType::Ledger).await,
            Err(KeycoreError::BackendNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn get_distinguishes_missing_from_unavailable() {
        let registry = BackendRegistry::with_preference(Vec::new());
        registry.register(Stub::new(BackendType::Yubikey, false)).await;

        assert!(matches!(
            registry.get(BackendType::Yubikey).await,
            Err(KeycoreError::BackendNotSupported { .. })
        ));
        assert!(matches!(
            registry.get(BackendType::Zymbit).await,
            Err(KeycoreError::BackendNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn register_replaces_same_type() -> std::result::Result<(), KeycoreError> {
        let registry = BackendRegistry::with_preference(Vec::new());
        registry.register(Stub::new(BackendType::Env, false)).await;
        registry.register(Stub::new(BackendType::Env, true)).await;
        assert!(registry.get(BackendType::Env).await?.available());
        assert_eq!(registry.list_available().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn initialize_skips_failures_and_lock_all_reaches_active() {
        let registry = BackendRegistry::with_preference(Vec::new());
        let software = Stub::new(BackendType::Software, true);
        registry.register(software.clone()).await;
        registry.register(Stub::failing(BackendType::KChain)).await;
        registry.register(Stub::new(BackendType::Ledger, false)).await;

        let config = KeycoreConfig::with_data_dir("/nonexistent");
        let active = registry.initialize_all(&config).await;
        assert_eq!(active, vec![BackendType::Software]);

        registry.lock_all().await;
        assert_eq!(software.locks.load(Ordering::SeqCst), 2);

        registry.close_all().await;
        assert!(registry.active().await.is_empty());
    }

    #[tokio::test]
    async fn initialize_reaches_backends_that_connect_on_initialize() {
        let registry = BackendRegistry::with_preference(Vec::new());
        registry.register(Stub::new(BackendType::Software, true)).await;
        registry.register(Stub::connecting(BackendType::KChain)).await;
        registry.register(Stub::new(BackendType::Ledger, false)).await;

        let config = KeycoreConfig::with_data_dir("/nonexistent");
        let active = registry.initialize_all(&config).await;
        assert!(active.contains(&BackendType::KChain));
        assert!(!active.contains(&BackendType::Ledger));
    }
}
