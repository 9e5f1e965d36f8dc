//! Integration tests for the software backend and backend registry.
//!
//! All tests use deterministic BIP39 mnemonics (all-zero and all-FF
//! entropy), fixed passwords and light Argon2id parameters. Salts and
//! nonces are random but never affect an assertion.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use keycore_backend::keystore::{KEYSTORE_FILE, INFO_FILE};
use keycore_backend::platform::MemorySecretStore;
use keycore_backend::registry::DefaultChoice;
use keycore_backend::{BackendRegistry, KeyBackend, PlatformBackend, SoftwareBackend};
use keycore_crypto::hash::keccak256;
use keycore_crypto::hd_keys::verify_signature;
use keycore_crypto::kdf::Argon2Params;
use keycore_crypto::derive_all;
use keycore_types::config::KeycoreConfig;
use keycore_types::{BackendType, CreateKeyOptions, KeycoreError, SignAlgorithm, SignKind, SignRequest};

// ---------------------------------------------------------------------------
// Test constants (deterministic BIP39 mnemonics)
// ---------------------------------------------------------------------------

/// BIP39 mnemonic from all-zero (0x00) 256-bit entropy.
const MNEMONIC_A: &str = "abandon abandon abandon abandon abandon abandon \
                          abandon abandon abandon abandon abandon abandon \
                          abandon abandon abandon abandon abandon abandon \
                          abandon abandon abandon abandon abandon art";

/// BIP39 mnemonic from all-0xFF 256-bit entropy.
const MNEMONIC_B: &str = "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo \
                          zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo vote";

const PW1: &str = "correct horse battery staple";
const PW2: &str = "wrong password entirely";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type TestResult = std::result::Result<(), KeycoreError>;

fn tempdir() -> std::result::Result<tempfile::TempDir, KeycoreError> {
    tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))
}

fn backend(dir: &Path) -> SoftwareBackend {
    SoftwareBackend::new(dir)
        .with_argon2_params(Argon2Params {
            m_cost: 256,
            t_cost: 1,
            p_cost: 1,
        })
        .with_password_fallback(None)
}

// ---------------------------------------------------------------------------
// 1. Create → Lock → Load cycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_lock_load_cycle() -> TestResult {
    let dir = tempdir()?;
    let b = backend(dir.path());

    let created = b.create_key("validator", &CreateKeyOptions::with_password(PW1)).await?;
    assert!(dir.path().join("validator").join(KEYSTORE_FILE).is_file());

    b.lock("validator").await?;
    assert!(b.is_locked("validator").await);

    let loaded = b.load_key("validator", Some(PW1)).await?;
    assert_eq!(loaded.ec_address, created.ec_address);
    assert_eq!(loaded.node_id, created.node_id);
    assert!(!b.is_locked("validator").await);

    b.lock("validator").await?;
    assert!(matches!(
        b.load_key("validator", Some(PW2)).await,
        Err(KeycoreError::InvalidPassword { .. })
    ));
    assert!(b.is_locked("validator").await);
    Ok(())
}

#[tokio::test]
async fn wrong_password_fails_even_while_unlocked() -> TestResult {
    let dir = tempdir()?;
    let b = backend(dir.path());
    b.create_key("validator", &CreateKeyOptions::with_password(PW1)).await?;
    b.unlock("validator", PW1).await?;

    assert!(matches!(
        b.load_key("validator", Some(PW2)).await,
        Err(KeycoreError::InvalidPassword { .. })
    ));
    // Session from the correct password is untouched.
    assert!(b.load_key("validator", None).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn same_mnemonic_same_address_different_ciphertext() -> TestResult {
    let dir = tempdir()?;
    let b = backend(dir.path());

    let k1 = b.create_key("one", &CreateKeyOptions::import(MNEMONIC_A, PW1)).await?;
    let k2 = b.create_key("two", &CreateKeyOptions::import(MNEMONIC_A, PW2)).await?;
    assert_eq!(k1.ec_address, k2.ec_address);
    assert_eq!(k1.bls_public_key, k2.bls_public_key);

    let c1 = std::fs::read(dir.path().join("one").join(KEYSTORE_FILE))
        .map_err(|e| KeycoreError::storage("read", e))?;
    let c2 = std::fs::read(dir.path().join("two").join(KEYSTORE_FILE))
        .map_err(|e| KeycoreError::storage("read", e))?;
    assert_ne!(c1, c2);
    Ok(())
}

#[tokio::test]
async fn imported_key_matches_direct_derivation() -> TestResult {
    let dir = tempdir()?;
    let b = backend(dir.path());
    let imported = b.create_key("node", &CreateKeyOptions::import(MNEMONIC_B, PW1)).await?;
    let derived = derive_all("node", MNEMONIC_B)?;
    assert_eq!(imported.ec_address, derived.ec_address);
    assert_eq!(imported.mldsa_public_key, derived.mldsa_public_key);
    Ok(())
}

#[tokio::test]
async fn account_index_changes_every_key() -> TestResult {
    let dir = tempdir()?;
    let b = backend(dir.path());

    let mut opts = CreateKeyOptions::import(MNEMONIC_A, PW1);
    opts.account_index = 1;
    let second = b.create_key("acct1", &opts).await?;
    let first = b.create_key("acct0", &CreateKeyOptions::import(MNEMONIC_A, PW1)).await?;

    assert_ne!(first.ec_address, second.ec_address);
    assert_ne!(first.node_id, second.node_id);

    let reloaded = b.load_key("acct1", Some(PW1)).await?;
    assert_eq!(reloaded.account_index, 1);
    assert_eq!(reloaded.ec_address, second.ec_address);
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Error paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_and_invalid_inputs() -> TestResult {
    let dir = tempdir()?;
    let b = backend(dir.path());
    b.create_key("node", &CreateKeyOptions::with_password(PW1)).await?;

    assert!(matches!(
        b.create_key("node", &CreateKeyOptions::with_password(PW1)).await,
        Err(KeycoreError::KeyExists { .. })
    ));
    assert!(matches!(
        b.create_key("bad", &CreateKeyOptions::import("abandon abandon abandon", PW1)).await,
        Err(KeycoreError::InvalidMnemonic { .. })
    ));
    assert!(!dir.path().join("bad").exists());
    assert!(matches!(
        b.load_key("ghost", Some(PW1)).await,
        Err(KeycoreError::KeyNotFound { .. })
    ));
    assert!(matches!(
        b.delete_key("ghost").await,
        Err(KeycoreError::KeyNotFound { .. })
    ));
    assert!(matches!(
        b.create_key("../escape", &CreateKeyOptions::with_password(PW1)).await,
        Err(KeycoreError::ConfigError { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn corrupt_keystore_is_reported() -> TestResult {
    let dir = tempdir()?;
    let b = backend(dir.path());
    b.create_key("node", &CreateKeyOptions::with_password(PW1)).await?;

    std::fs::write(dir.path().join("node").join(KEYSTORE_FILE), b"{\"version\":1")
        .map_err(|e| KeycoreError::storage("write", e))?;
    assert!(matches!(
        b.load_key("node", Some(PW1)).await,
        Err(KeycoreError::CorruptKeystore { .. })
    ));
    Ok(())
}

// ---------------------------------------------------------------------------
// 3. Listing, public data, deletion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_public_and_delete() -> TestResult {
    let dir = tempdir()?;
    let b = backend(dir.path());
    let created = b.create_key("alpha", &CreateKeyOptions::import(MNEMONIC_A, PW1)).await?;
    b.create_key("beta", &CreateKeyOptions::import(MNEMONIC_B, PW1)).await?;
    b.unlock("beta", PW1).await?;

    let keys = b.list_keys().await?;
    let names: Vec<&str> = keys.iter().map(|k| k.name.as_str()).collect();
    assert_eq!(names, ["alpha", "beta"]);
    assert!(keys[0].locked);
    assert!(!keys[1].locked);
    assert_eq!(keys[0].address, created.ec_address);
    assert!(keys.iter().all(|k| k.encrypted && k.backend == BackendType::Software));
    assert!(dir.path().join("alpha").join(INFO_FILE).is_file());

    let public = b.load_public("alpha").await?;
    assert!(!public.has_private_keys());
    assert_eq!(public.ec_public_key, created.ec_public_key);
    assert_eq!(public.bls_pop, created.bls_pop);
    assert_eq!(public.ringtail_public_key, created.ringtail_public_key);
    assert_eq!(public.mldsa_public_key, created.mldsa_public_key);
    assert_eq!(public.node_id, created.node_id);

    b.delete_key("beta").await?;
    assert!(b.is_locked("beta").await);
    assert_eq!(b.list_keys().await?.len(), 1);
    assert!(!dir.path().join("beta").exists());
    Ok(())
}

#[tokio::test]
async fn checksum_requires_unlock() -> TestResult {
    let dir = tempdir()?;
    let b = backend(dir.path());
    let created = b.create_key("node", &CreateKeyOptions::import(MNEMONIC_A, PW1)).await?;

    assert!(matches!(
        b.get_key_checksum("node").await,
        Err(KeycoreError::KeyLocked { .. })
    ));
    b.unlock("node", PW1).await?;
    let checksum = b.get_key_checksum("node").await?;
    assert_eq!(checksum, created.checksum()?);
    assert_eq!(checksum.len(), 16);
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Sessions and signing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn session_expiry_relocks() -> TestResult {
    let dir = tempdir()?;
    let b = backend(dir.path());
    b.set_session_timeout(Duration::from_millis(80)).await;
    b.create_key("node", &CreateKeyOptions::with_password(PW1)).await?;
    b.unlock("node", PW1).await?;
    assert!(!b.is_locked("node").await);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(b.is_locked("node").await);
    assert!(matches!(
        b.load_key("node", None).await,
        Err(KeycoreError::KeyLocked { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn sign_with_each_algorithm() -> TestResult {
    let dir = tempdir()?;
    let b = backend(dir.path());
    let created = b.create_key("node", &CreateKeyOptions::import(MNEMONIC_A, PW1)).await?;

    let data = b"transfer 10 LUX".to_vec();
    let request = SignRequest::new(SignKind::Transaction, data.clone(), keccak256(&data));
    assert!(matches!(
        b.sign("node", &request).await,
        Err(KeycoreError::KeyLocked { .. })
    ));

    b.unlock("node", PW1).await?;
    for algorithm in [
        SignAlgorithm::Secp256k1,
        SignAlgorithm::Bls,
        SignAlgorithm::Ringtail,
        SignAlgorithm::MlDsa,
    ] {
        let req = request.clone().with_algorithm(algorithm);
        let resp = b.sign("node", &req).await?;
        assert!(
            verify_signature(algorithm, &resp.public_key, &req, &resp.signature),
            "{algorithm} signature does not verify"
        );
    }

    let resp = b.sign("node", &request).await?;
    assert_eq!(resp.address, created.ec_address);
    Ok(())
}

// ---------------------------------------------------------------------------
// 5. Registry with real backends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registry_falls_back_to_software() -> TestResult {
    let dir = tempdir()?;
    let registry = BackendRegistry::with_preference(vec![BackendType::SecretService]);

    let unreachable = Arc::new(MemorySecretStore::new(BackendType::SecretService).with_available(false));
    registry
        .register(Arc::new(PlatformBackend::new(unreachable, dir.path())))
        .await;
    registry.register(Arc::new(backend(dir.path()))).await;

    let (default, choice) = registry.resolve_default().await?;
    assert_eq!(default.backend_type(), BackendType::Software);
    assert_eq!(choice, DefaultChoice::Fallback);

    let active = registry
        .initialize_all(&KeycoreConfig::with_data_dir(dir.path()))
        .await;
    assert_eq!(active, vec![BackendType::Software]);

    default.create_key("node", &CreateKeyOptions::with_password(PW1)).await?;
    default.unlock("node", PW1).await?;
    registry.lock_all().await;
    assert!(default.is_locked("node").await);
    Ok(())
}
