//! Read-only backend fed by environment variables.
//!
//! `LUX_MNEMONIC` takes priority; otherwise `LUX_PRIVATE_KEY` (hex, `0x`
//! optional) supplies the secp256k1 key and `LUX_BLS_KEY` an optional BLS
//! key. The backend exposes a single key named [`ENV_KEY_NAME`] and is
//! never locked.

use std::collections::HashMap;

use async_trait::async_trait;
use keycore_crypto::bls::BlsSecretKey;
use keycore_crypto::hd_keys::node_id_from_bls;
use keycore_crypto::{derive_all, HdKeySet};
use keycore_types::config::{EnvOverrides, KeycoreConfig};
use keycore_types::{
    BackendType, CreateKeyOptions, KeyInfo, KeycoreError, Result, SignRequest, SignResponse,
};
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::backend::KeyBackend;

/// Name under which the environment key is listed.
pub const ENV_KEY_NAME: &str = "env";

/// Environment-variable key backend.
pub struct EnvBackend {
    env: EnvOverrides,
    // Canonical encodings of key sets already built from the environment.
    cache: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

// EnvBackend does not implement Debug to prevent leakage.

impl EnvBackend {
    /// Reads the process environment once.
    pub fn from_env() -> Self {
        Self::new(EnvOverrides::from_env())
    }

    /// Uses already-collected overrides.
    pub fn new(env: EnvOverrides) -> Self {
        Self {
            env,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn unsupported(&self, operation: &str) -> KeycoreError {
        KeycoreError::UnsupportedOperation {
            backend: BackendType::Env,
            operation: operation.to_owned(),
        }
    }

    fn build(&self, name: &str) -> Result<HdKeySet> {
        if let Some(phrase) = &self.env.mnemonic {
            return derive_all(name, phrase);
        }

        let bls = match &self.env.bls_key_hex {
            Some(raw) => match hex::decode(raw) {
                Ok(bytes) => Some(Zeroizing::new(bytes)),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring LUX_BLS_KEY: not valid hex");
                    None
                }
            },
            None => None,
        };

        let Some(ec_hex) = &self.env.private_key_hex else {
            return match bls {
                Some(raw) => bls_only(name, &raw),
                None => Err(KeycoreError::KeyNotFound {
                    name: name.to_owned(),
                }),
            };
        };
        let ec = Zeroizing::new(hex::decode(ec_hex).map_err(|e| KeycoreError::ConfigError {
            reason: format!("LUX_PRIVATE_KEY is not valid hex: {e}"),
        })?);

        HdKeySet::from_private_keys(name, &ec, bls.as_deref().map(|b| b.as_slice()))
    }
}

/// A key set holding only a BLS key (`LUX_BLS_KEY` without
/// `LUX_PRIVATE_KEY`).
fn bls_only(name: &str, raw: &[u8]) -> Result<HdKeySet> {
    let sk = BlsSecretKey::from_bytes(raw)?;
    let mut ks = HdKeySet::empty(name);
    ks.bls_public_key = sk.public_key()?.to_vec();
    ks.bls_pop = sk.prove_possession()?.to_vec();
    ks.bls_private_key = sk.as_bytes().to_vec();
    ks.node_id = node_id_from_bls(&ks.bls_public_key);
    Ok(ks)
}

#[async_trait]
impl KeyBackend for EnvBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Env
    }

    fn name(&self) -> &str {
        "Environment Variables"
    }

    fn available(&self) -> bool {
        self.env.has_key_material()
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
        if !self.available() {
            return Err(KeycoreError::BackendUnavailable {
                backend: BackendType::Env,
                reason: "no key material in environment".into(),
            });
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cache.write().await.clear();
        Ok(())
    }

    async fn create_key(&self, _name: &str, _options: &CreateKeyOptions) -> Result<HdKeySet> {
        Err(self.unsupported("create_key"))
    }

    /// Builds the key set from the environment on first use and serves
    /// it from the cache afterwards. `password` is ignored.
    async fn load_key(&self, name: &str, _password: Option<&str>) -> Result<HdKeySet> {
        if let Some(encoded) = self.cache.read().await.get(name) {
            return HdKeySet::from_canonical_bytes(encoded);
        }

        let key_set = self.build(name)?;
        let encoded = key_set.to_canonical_bytes()?;
        self.cache.write().await.insert(name.to_owned(), encoded);
        tracing::debug!(name = %name, address = %key_set.ec_address, "loaded key from environment");
        Ok(key_set)
    }

    async fn save_key(&self, _key_set: &HdKeySet, _password: Option<&str>) -> Result<()> {
        Err(self.unsupported("save_key"))
    }

    async fn delete_key(&self, _name: &str) -> Result<()> {
        Err(self.unsupported("delete_key"))
    }

    async fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        if !self.available() {
            return Ok(Vec::new());
        }
        let key_set = self.load_key(ENV_KEY_NAME, None).await?;
        Ok(vec![KeyInfo {
            name: ENV_KEY_NAME.to_owned(),
            address: key_set.ec_address.clone(),
            node_id: key_set.node_id.clone(),
            encrypted: false,
            locked: false,
            created_at: None,
            backend: BackendType::Env,
        }])
    }

    async fn lock(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn unlock(&self, _name: &str, _password: &str) -> Result<()> {
        Ok(())
    }

    async fn is_locked(&self, _name: &str) -> bool {
        false
    }

    async fn sign(&self, name: &str, request: &SignRequest) -> Result<SignResponse> {
        self.load_key(name, None).await?.sign(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keycore_crypto::hash::keccak256;
    use keycore_types::{SignAlgorithm, SignKind};

    const MNEMONIC_A: &str = "abandon abandon abandon abandon abandon abandon abandon abandon \
                              abandon abandon abandon abandon abandon abandon abandon abandon \
                              abandon abandon abandon abandon abandon abandon abandon art";

    fn backend(vars: &[(&str, &str)]) -> EnvBackend {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        EnvBackend::new(EnvOverrides::from_lookup(|k| vars.get(k).cloned()))
    }

    #[tokio::test]
    async fn unavailable_without_material() {
        let b = backend(&[]);
        assert!(!b.available());
        assert!(b.list_keys().await.map(|k| k.is_empty()).unwrap_or(false));
        assert!(b.initialize(&KeycoreConfig::with_data_dir("/nonexistent")).await.is_err());
    }

    #[tokio::test]
    async fn mnemonic_takes_priority() -> std::result::Result<(), KeycoreError> {
        let with_both = backend(&[
            ("LUX_MNEMONIC", MNEMONIC_A),
            ("LUX_PRIVATE_KEY", "0x0101010101010101010101010101010101010101010101010101010101010101"),
        ]);
        let from_phrase = derive_all(ENV_KEY_NAME, MNEMONIC_A)?;
        let loaded = with_both.load_key(ENV_KEY_NAME, None).await?;
        assert_eq!(loaded.ec_address, from_phrase.ec_address);
        assert_eq!(loaded.bls_public_key, from_phrase.bls_public_key);
        Ok(())
    }

    #[tokio::test]
    async fn private_key_with_bad_bls_key_still_loads() -> std::result::Result<(), KeycoreError> {
        let b = backend(&[
            ("LUX_PRIVATE_KEY", "0x0101010101010101010101010101010101010101010101010101010101010101"),
            ("LUX_BLS_KEY", "zz"),
        ]);
        let ks = b.load_key(ENV_KEY_NAME, None).await?;
        assert!(!ks.ec_address.is_empty());
        assert!(ks.bls_private_key.is_empty());

        let keys = b.list_keys().await?;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, ENV_KEY_NAME);
        assert!(!keys[0].locked);
        Ok(())
    }

    #[tokio::test]
    async fn bls_key_alone_is_usable() -> std::result::Result<(), KeycoreError> {
        let b = backend(&[(
            "LUX_BLS_KEY",
            "0x0d3f2c1b0a09080706050403020100f0e0d0c0b0a09080706050403020100a0b",
        )]);
        assert!(b.available());
        let ks = b.load_key(ENV_KEY_NAME, None).await?;
        assert!(ks.ec_private_key.is_empty());
        assert!(ks.node_id.starts_with("NodeID-"));
        Ok(())
    }

    #[tokio::test]
    async fn write_operations_are_unsupported() {
        let b = backend(&[("LUX_MNEMONIC", MNEMONIC_A)]);
        assert!(matches!(
            b.create_key("x", &CreateKeyOptions::default()).await,
            Err(KeycoreError::UnsupportedOperation { .. })
        ));
        assert!(matches!(
            b.save_key(&HdKeySet::empty("x"), None).await,
            Err(KeycoreError::UnsupportedOperation { .. })
        ));
        assert!(!b.is_locked(ENV_KEY_NAME).await);
    }

    #[tokio::test]
    async fn signs_with_cached_key() -> std::result::Result<(), KeycoreError> {
        let b = backend(&[("LUX_MNEMONIC", MNEMONIC_A)]);
        let request = SignRequest::new(SignKind::Message, b"hello".to_vec(), keccak256(b"hello"));
        let first = b.sign(ENV_KEY_NAME, &request).await?;
        let second = b.sign(ENV_KEY_NAME, &request.clone().with_algorithm(SignAlgorithm::Bls)).await?;
        assert!(!first.signature.is_empty());
        assert!(!second.signature.is_empty());
        Ok(())
    }
}
