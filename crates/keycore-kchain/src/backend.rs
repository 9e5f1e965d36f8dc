//! Threshold-distributed key backend over K-Chain validators.
//!
//! A distributed secret is split K-of-N with Shamir sharing, each share
//! is sealed to its validator with ML-KEM-768 + AES-256-GCM, and the
//! sealed shares are pushed through [`ValidatorRpc`]. Only non-secret
//! metadata ([`DistributedKeyInfo`]) stays local.
//!
//! BLS keys are dealt directly into shares; their secret is never
//! assembled here, and signing aggregates partial signatures requested
//! from the validators.
//!
//! # Share payload
//!
//! A decrypted share is `index ‖ y_1 ‖ … ‖ y_c`: one index byte followed
//! by one 32-byte field element per 16-byte chunk of the secret. Every
//! chunk is below the field prime, so secrets of any length come back
//! exactly. A single-chunk payload is exactly a Shamir share encoding.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use keycore_backend::KeyBackend;
use keycore_crypto::aead::AeadNonce;
use keycore_crypto::bls::{self, BlsSecretKey, SecretShare, SignatureShare, PUBLIC_KEY_LEN};
use keycore_crypto::hd_keys::node_id_from_bls;
use keycore_crypto::mlkem::{self, KemKeyPair, SealedShare};
use keycore_crypto::mnemonic::{
    entropy_to_mnemonic, generate_mnemonic, mnemonic_to_entropy, validate_mnemonic,
};
use keycore_crypto::shamir::{self, Share};
use keycore_crypto::{derive_all_with_account, HdKeySet};
use keycore_types::config::{KeycoreConfig, DEFAULT_RPC_TIMEOUT, DEFAULT_SIGNING_TIMEOUT};
use keycore_types::{
    BackendType, CreateKeyOptions, KeyInfo, KeycoreError, Result, ShareConfig, SignAlgorithm,
    SignRequest, SignResponse,
};
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::rpc::{KChainRpcClient, ValidatorRpc};
use crate::types::{
    DeleteShareParams, EncryptedShare, RequestSignatureShareParams, RetrieveShareParams,
    StoreShareParams,
};

/// Algorithm name sent with signature share requests for BLS keys.
pub const SIGNATURE_ALGORITHM_BLS: &str = "bls-sig";

/// Width of one shared field element.
const ELEMENT_LEN: usize = 32;

/// Secrets are shared in chunks of this size.
const CHUNK_LEN: usize = 16;

// ---------------------------------------------------------------------------
// DistributedKeyInfo
// ---------------------------------------------------------------------------

/// What a distributed key holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistributedKeyKind {
    /// An opaque secret, returned as-is by reconstruction.
    Generic,
    /// A secp256k1 private key saved from a key set without a mnemonic.
    PrivateKey,
    /// The mnemonic entropy of an HD key set.
    KeySet {
        /// Account index the key set was derived with.
        account_index: u32,
    },
    /// A dealt BLS key; only the group public key is known locally.
    Bls,
}

/// Local, non-secret record of a distributed key.
#[derive(Clone, Debug)]
pub struct DistributedKeyInfo {
    /// Key name, also the K-Chain key id.
    pub name: String,
    /// What the shares encode.
    pub kind: DistributedKeyKind,
    /// Threshold, share count and validator per share.
    pub share_config: ShareConfig,
    /// Group public key of a BLS key.
    pub group_public_key: Option<[u8; PUBLIC_KEY_LEN]>,
    /// Per-share BLS public keys, used to check partial signatures.
    pub share_public_keys: Vec<(u8, [u8; PUBLIC_KEY_LEN])>,
    /// Address of the key set, empty when unknown.
    pub address: String,
    /// Node identity, empty when unknown.
    pub node_id: String,
    /// When distribution completed.
    pub created_at: DateTime<Utc>,
    secret_len: usize,
}

impl DistributedKeyInfo {
    fn new(name: &str, kind: DistributedKeyKind, share_config: ShareConfig) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            share_config,
            group_public_key: None,
            share_public_keys: Vec::new(),
            address: String::new(),
            node_id: String::new(),
            created_at: Utc::now(),
            secret_len: 0,
        }
    }

    fn payload_len(&self) -> usize {
        1 + self.secret_len.div_ceil(CHUNK_LEN) * ELEMENT_LEN
    }
}

// ---------------------------------------------------------------------------
// Share payloads
// ---------------------------------------------------------------------------

/// Splits `secret` chunk by chunk and packs the results per share index.
fn split_payloads(secret: &[u8], threshold: usize, total: usize) -> Result<Vec<Zeroizing<Vec<u8>>>> {
    let chunks = secret.len().div_ceil(CHUNK_LEN);
    let mut payloads: Vec<Zeroizing<Vec<u8>>> = (1..=total)
        .map(|index| {
            let mut payload = Zeroizing::new(Vec::with_capacity(1 + chunks * ELEMENT_LEN));
            payload.push(index as u8);
            payload
        })
        .collect();

    for chunk in secret.chunks(CHUNK_LEN) {
        let shares = shamir::split(chunk, threshold, total)?;
        for (payload, share) in payloads.iter_mut().zip(&shares) {
            payload.extend_from_slice(&share.to_bytes()[1..]);
        }
    }
    Ok(payloads)
}

/// Interpolates every chunk of a `secret_len`-byte secret from
/// `threshold` payloads and concatenates them.
fn join_payloads(
    payloads: &[Zeroizing<Vec<u8>>],
    secret_len: usize,
    threshold: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let mut secret = Zeroizing::new(Vec::with_capacity(secret_len));
    for c in 0..secret_len.div_ceil(CHUNK_LEN) {
        let chunk_len = (secret_len - c * CHUNK_LEN).min(CHUNK_LEN);
        let start = 1 + c * ELEMENT_LEN;
        let shares = payloads
            .iter()
            .map(|payload| {
                let mut encoded = Zeroizing::new(Vec::with_capacity(shamir::SHARE_LEN));
                encoded.push(payload[0]);
                encoded.extend_from_slice(&payload[start..start + ELEMENT_LEN]);
                Share::from_bytes(&encoded)
            })
            .collect::<Result<Vec<Share>>>()?;
        let value = shamir::reconstruct(&shares, threshold)?;
        secret.extend_from_slice(&value[ELEMENT_LEN - chunk_len..]);
    }
    Ok(secret)
}

/// Encodes a dealt BLS share as `index ‖ secret`.
pub fn encode_bls_share(share: &SecretShare) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(1 + bls::SECRET_KEY_LEN));
    out.push(share.index);
    out.extend_from_slice(share.secret.as_bytes());
    out
}

/// Parses `index ‖ secret` back into a BLS share.
pub fn decode_bls_share(bytes: &[u8]) -> Result<SecretShare> {
    if bytes.len() != 1 + bls::SECRET_KEY_LEN || bytes[0] == 0 {
        return Err(KeycoreError::CryptoError {
            reason: format!("malformed BLS share payload ({} bytes)", bytes.len()),
        });
    }
    Ok(SecretShare {
        index: bytes[0],
        secret: BlsSecretKey::from_bytes(&bytes[1..])?,
    })
}

/// Seals a payload into its `shareData` wire form.
pub fn seal_payload(
    kem_public_key: &[u8],
    validator_id: &str,
    index: u8,
    payload: &[u8],
) -> Result<EncryptedShare> {
    let sealed = mlkem::seal_share(kem_public_key, validator_id, payload)?;
    Ok(EncryptedShare {
        index,
        kem_ciphertext: hex::encode(&sealed.kem_ciphertext),
        ciphertext: hex::encode(&sealed.ciphertext),
        nonce: hex::encode(sealed.nonce.as_bytes()),
        validator_id: validator_id.to_owned(),
    })
}

/// Opens a sealed share with the validator's decapsulation key.
pub fn open_payload(kem_secret_key: &[u8], share: &EncryptedShare) -> Result<Zeroizing<Vec<u8>>> {
    let sealed = SealedShare {
        kem_ciphertext: unhex("kemCiphertext", &share.kem_ciphertext)?,
        ciphertext: unhex("ciphertext", &share.ciphertext)?,
        nonce: AeadNonce::from_slice(&unhex("nonce", &share.nonce)?)?,
    };
    mlkem::open_share(kem_secret_key, &share.validator_id, &sealed)
}

fn unhex(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| KeycoreError::SerializationError {
        reason: format!("share field {field} is not hex: {e}"),
    })
}

fn parse_signature_share(share_data: &str) -> Result<SignatureShare> {
    SignatureShare::from_bytes(&unhex("shareData", share_data)?)
}

// ---------------------------------------------------------------------------
// Validator KEM keys
// ---------------------------------------------------------------------------

enum ValidatorKey {
    /// Key pair generated here; shares sealed to it can be reopened
    /// locally.
    Held(KemKeyPair),
    /// Encapsulation key published by the validator itself.
    Published(Vec<u8>),
}

impl ValidatorKey {
    fn public_key(&self) -> &[u8] {
        match self {
            Self::Held(pair) => &pair.public_key,
            Self::Published(pk) => pk,
        }
    }
}

// ---------------------------------------------------------------------------
// KChainBackend
// ---------------------------------------------------------------------------

/// Key backend whose secrets live only as shares on K-Chain validators.
pub struct KChainBackend {
    rpc: RwLock<Arc<dyn ValidatorRpc>>,
    rpc_timeout: Duration,
    signing_timeout: Duration,
    api_key: Option<String>,
    connected: AtomicBool,
    default_share_config: ShareConfig,
    keys: RwLock<HashMap<String, DistributedKeyInfo>>,
    validator_keys: RwLock<HashMap<String, ValidatorKey>>,
}

// KChainBackend does not implement Debug to prevent leakage.

impl KChainBackend {
    /// Backend talking to the configured K-Chain endpoint.
    pub fn new(config: &KeycoreConfig) -> Self {
        Self {
            rpc: RwLock::new(Arc::new(KChainRpcClient::from_config(config))),
            rpc_timeout: config.rpc_timeout,
            signing_timeout: config.signing_timeout,
            api_key: config.kchain_api_key.clone(),
            connected: AtomicBool::new(false),
            default_share_config: config.default_share_config(),
            keys: RwLock::new(HashMap::new()),
            validator_keys: RwLock::new(HashMap::new()),
        }
    }

    /// Backend over any validator transport.
    pub fn with_rpc(rpc: Arc<dyn ValidatorRpc>, default_share_config: ShareConfig) -> Self {
        Self {
            rpc: RwLock::new(rpc),
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            signing_timeout: DEFAULT_SIGNING_TIMEOUT,
            api_key: None,
            connected: AtomicBool::new(false),
            default_share_config,
            keys: RwLock::new(HashMap::new()),
            validator_keys: RwLock::new(HashMap::new()),
        }
    }

    /// Points the backend at a different K-Chain endpoint. The backend
    /// is unavailable until the next [`KeyBackend::initialize`].
    pub async fn set_endpoint(&self, endpoint: &str) {
        let mut client =
            KChainRpcClient::new(endpoint, self.rpc_timeout).with_signing_timeout(self.signing_timeout);
        if let Some(key) = &self.api_key {
            client = client.with_api_key(key.clone());
        }
        *self.rpc.write().await = Arc::new(client);
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!(endpoint = %endpoint, "kchain endpoint changed");
    }

    /// Share config used by [`KeyBackend::save_key`].
    pub fn default_share_config(&self) -> &ShareConfig {
        &self.default_share_config
    }

    /// Uses a validator-published ML-KEM-768 encapsulation key for future
    /// shares sent to `validator`.
    ///
    /// Shares sealed to a published key can only be opened by that
    /// validator, so generic keys distributed to it cannot be
    /// reconstructed here. BLS keys need this: each validator must open
    /// its own share to sign.
    pub async fn register_validator_key(&self, validator: &str, public_key: Vec<u8>) {
        self.validator_keys
            .write()
            .await
            .insert(validator.to_owned(), ValidatorKey::Published(public_key));
        tracing::debug!(validator = %validator, "registered validator KEM key");
    }

    /// Local record of a distributed key.
    pub async fn key_info(&self, name: &str) -> Option<DistributedKeyInfo> {
        self.keys.read().await.get(name).cloned()
    }

    async fn rpc(&self) -> Arc<dyn ValidatorRpc> {
        Arc::clone(&*self.rpc.read().await)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.available() {
            Ok(())
        } else {
            Err(KeycoreError::BackendUnavailable {
                backend: BackendType::KChain,
                reason: "not connected to K-Chain".into(),
            })
        }
    }

    async fn distributed(&self, name: &str) -> Result<DistributedKeyInfo> {
        self.key_info(name).await.ok_or_else(|| KeycoreError::KeyNotDistributed {
            name: name.to_owned(),
        })
    }

    /// Public key for sealing to `validator`, generating and keeping a
    /// key pair on first use.
    async fn validator_public_key(&self, validator: &str) -> Vec<u8> {
        if let Some(key) = self.validator_keys.read().await.get(validator) {
            return key.public_key().to_vec();
        }
        let mut keys = self.validator_keys.write().await;
        let key = keys.entry(validator.to_owned()).or_insert_with(|| {
            tracing::debug!(validator = %validator, "generated KEM key pair for validator");
            ValidatorKey::Held(KemKeyPair::generate())
        });
        key.public_key().to_vec()
    }

    async fn open(&self, validator: &str, index: u8, share_data: &str) -> Result<Zeroizing<Vec<u8>>> {
        let share: EncryptedShare =
            serde_json::from_str(share_data).map_err(|e| KeycoreError::SerializationError {
                reason: format!("share from {validator} is not valid JSON: {e}"),
            })?;
        if share.validator_id != validator || share.index != index {
            return Err(KeycoreError::CryptoError {
                reason: format!(
                    "share {}@{} returned where {index}@{validator} was expected",
                    share.index, share.validator_id
                ),
            });
        }
        match self.validator_keys.read().await.get(validator) {
            Some(ValidatorKey::Held(pair)) => open_payload(pair.secret_key_bytes(), &share),
            Some(ValidatorKey::Published(_)) => Err(KeycoreError::CryptoError {
                reason: format!("share is sealed to {validator}'s own key"),
            }),
            None => Err(KeycoreError::CryptoError {
                reason: format!("no KEM key held for {validator}"),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Distribution
    // -----------------------------------------------------------------------

    /// Distributes `secret` K-of-N across `config.validators`.
    ///
    /// [`reconstruct_key`](Self::reconstruct_key) returns exactly these
    /// bytes, whatever their length or value.
    ///
    /// # Process
    ///
    /// 1. Validate the share config (before any I/O).
    /// 2. Split the secret and seal each share to its validator.
    /// 3. Store all shares concurrently.
    /// 4. Record metadata only if every store succeeded. Otherwise
    ///    delete the shares that did land (one retry) and fail.
    ///
    /// # Errors
    ///
    /// - [`KeycoreError::InvalidShareConfig`] for a bad config.
    /// - [`KeycoreError::KeyExists`] if `name` is already distributed.
    /// - [`KeycoreError::ShareStoreFailed`] naming a validator that
    ///   refused or could not be reached.
    pub async fn distribute_key(&self, name: &str, secret: &[u8], config: &ShareConfig) -> Result<()> {
        if secret.is_empty() {
            return Err(KeycoreError::CryptoError {
                reason: "cannot distribute an empty secret".into(),
            });
        }
        let info = DistributedKeyInfo::new(name, DistributedKeyKind::Generic, config.clone());
        self.distribute_secret(info, secret).await
    }

    /// Deals a fresh K-of-N BLS key straight into validator shares and
    /// returns its group public key.
    ///
    /// Validators must have published their KEM keys through
    /// [`register_validator_key`](Self::register_validator_key) to be
    /// able to sign with their shares.
    pub async fn distribute_bls_key(&self, name: &str, config: &ShareConfig) -> Result<[u8; PUBLIC_KEY_LEN]> {
        validate_share_config(config)?;
        self.ensure_connected()?;
        self.ensure_new(name).await?;

        let dealt = bls::deal(config.threshold, config.total)?;
        let payloads: Vec<Zeroizing<Vec<u8>>> = dealt.shares.iter().map(encode_bls_share).collect();
        self.store_all(name, config, &payloads).await?;

        let mut info = DistributedKeyInfo::new(name, DistributedKeyKind::Bls, config.clone());
        info.group_public_key = Some(dealt.group_public_key);
        info.share_public_keys = dealt.share_public_keys.clone();
        info.node_id = node_id_from_bls(&dealt.group_public_key);
        self.keys.write().await.insert(name.to_owned(), info);

        tracing::info!(
            name = %name,
            threshold = config.threshold,
            total = config.total,
            "BLS key dealt to validators"
        );
        Ok(dealt.group_public_key)
    }

    async fn distribute_secret(&self, mut info: DistributedKeyInfo, secret: &[u8]) -> Result<()> {
        info.secret_len = secret.len();
        let config = &info.share_config;
        validate_share_config(config)?;
        self.ensure_connected()?;
        self.ensure_new(&info.name).await?;

        let payloads = split_payloads(secret, config.threshold, config.total)?;
        self.store_all(&info.name, config, &payloads).await?;

        tracing::info!(
            name = %info.name,
            threshold = config.threshold,
            total = config.total,
            "key distributed to validators"
        );
        self.keys.write().await.insert(info.name.clone(), info);
        Ok(())
    }

    async fn ensure_new(&self, name: &str) -> Result<()> {
        if self.keys.read().await.contains_key(name) {
            return Err(KeycoreError::KeyExists {
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    async fn store_all(&self, name: &str, config: &ShareConfig, payloads: &[Zeroizing<Vec<u8>>]) -> Result<()> {
        let mut requests = Vec::with_capacity(config.total);
        for (i, (validator, payload)) in config.validators.iter().zip(payloads).enumerate() {
            let index = (i + 1) as u8;
            let public_key = self.validator_public_key(validator).await;
            let sealed = seal_payload(&public_key, validator, index, payload)?;
            let share_data = serde_json::to_string(&sealed).map_err(|e| {
                KeycoreError::SerializationError {
                    reason: format!("share encoding failed: {e}"),
                }
            })?;
            requests.push(StoreShareParams {
                key_id: name.to_owned(),
                share_index: index,
                share_data,
                validator_id: validator.clone(),
            });
        }

        let rpc = self.rpc().await;
        let rpc = rpc.as_ref();
        let mut pending: FuturesUnordered<_> = requests
            .into_iter()
            .map(|params| async move {
                let validator = params.validator_id.clone();
                let outcome = match rpc.store_share(params).await {
                    Ok(result) if result.stored => Ok(()),
                    Ok(_) => Err("validator did not store the share".to_owned()),
                    Err(e) => Err(e.to_string()),
                };
                (validator, outcome)
            })
            .collect();

        let mut stored = Vec::with_capacity(config.total);
        let mut failures = Vec::new();
        while let Some((validator, outcome)) = pending.next().await {
            match outcome {
                Ok(()) => {
                    tracing::debug!(name = %name, validator = %validator, "share stored");
                    stored.push(validator);
                }
                Err(reason) => {
                    tracing::warn!(name = %name, validator = %validator, reason = %reason, "share store failed");
                    failures.push((validator, reason));
                }
            }
        }
        drop(pending);

        let failed = failures.len();
        let Some((validator, reason)) = failures.into_iter().next() else {
            return Ok(());
        };
        remove_shares(rpc, name, &stored).await;
        Err(KeycoreError::ShareStoreFailed {
            validator,
            reason: format!("{reason} ({failed} of {} stores failed)", config.total),
        })
    }

    // -----------------------------------------------------------------------
    // Reconstruction
    // -----------------------------------------------------------------------

    /// Gathers shares from the validators and rebuilds the secret.
    ///
    /// Validators are queried concurrently; the first K shares that
    /// decrypt and parse are used and the remaining requests are dropped.
    ///
    /// # Errors
    ///
    /// - [`KeycoreError::KeyNotDistributed`] for an unknown name.
    /// - [`KeycoreError::UnsupportedOperation`] for BLS keys.
    /// - [`KeycoreError::InsufficientShares`] if fewer than K shares
    ///   could be obtained.
    pub async fn reconstruct_key(&self, name: &str) -> Result<Zeroizing<Vec<u8>>> {
        let info = self.distributed(name).await?;
        if info.kind == DistributedKeyKind::Bls {
            return Err(KeycoreError::UnsupportedOperation {
                backend: BackendType::KChain,
                operation: "reconstruction of a threshold BLS key".into(),
            });
        }
        self.ensure_connected()?;

        let payloads = self.gather_payloads(&info).await?;
        let secret = join_payloads(&payloads, info.secret_len, info.share_config.threshold)?;
        tracing::debug!(name = %name, "key reconstructed from shares");
        Ok(secret)
    }

    async fn gather_payloads(&self, info: &DistributedKeyInfo) -> Result<Vec<Zeroizing<Vec<u8>>>> {
        let threshold = info.share_config.threshold;
        let rpc = self.rpc().await;
        let rpc = rpc.as_ref();
        let mut pending: FuturesUnordered<_> = info
            .share_config
            .validators
            .iter()
            .enumerate()
            .map(|(i, validator)| async move {
                let params = RetrieveShareParams {
                    key_id: info.name.clone(),
                    share_id: None,
                    validator_id: Some(validator.clone()),
                };
                ((i + 1) as u8, validator, rpc.retrieve_share(params).await)
            })
            .collect();

        let mut payloads = Vec::with_capacity(threshold);
        while let Some((index, validator, result)) = pending.next().await {
            let opened = match result {
                Ok(found) => self.open(validator, index, &found.share_data).await,
                Err(e) => Err(KeycoreError::ShareRetrieveFailed {
                    validator: validator.clone(),
                    reason: e.to_string(),
                }),
            };
            match opened {
                Ok(payload) if payload.len() == info.payload_len() && payload[0] == index => {
                    payloads.push(payload);
                }
                Ok(_) => {
                    tracing::warn!(name = %info.name, validator = %validator, "discarding malformed share");
                }
                Err(e) => {
                    tracing::warn!(name = %info.name, validator = %validator, error = %e, "share unavailable");
                }
            }
            if payloads.len() == threshold {
                break;
            }
        }

        if payloads.len() < threshold {
            return Err(KeycoreError::InsufficientShares {
                name: info.name.clone(),
                got: payloads.len(),
                need: threshold,
            });
        }
        Ok(payloads)
    }

    // -----------------------------------------------------------------------
    // Threshold signing
    // -----------------------------------------------------------------------

    async fn threshold_sign(&self, info: &DistributedKeyInfo, group_public_key: &[u8], message: &[u8]) -> Result<[u8; bls::SIGNATURE_LEN]> {
        let threshold = info.share_config.threshold;
        let encoded_message = hex::encode(message);
        let rpc = self.rpc().await;
        let rpc = rpc.as_ref();
        let mut pending: FuturesUnordered<_> = info
            .share_config
            .validators
            .iter()
            .enumerate()
            .map(|(i, validator)| {
                let params = RequestSignatureShareParams {
                    key_id: info.name.clone(),
                    message: encoded_message.clone(),
                    validator_id: validator.clone(),
                    algorithm: SIGNATURE_ALGORITHM_BLS.to_owned(),
                };
                async move { ((i + 1) as u8, validator, rpc.request_signature_share(params).await) }
            })
            .collect();

        let mut shares: Vec<SignatureShare> = Vec::with_capacity(threshold);
        while let Some((index, validator, result)) = pending.next().await {
            let parsed = result.and_then(|r| parse_signature_share(&r.share_data));
            match parsed {
                Ok(share) if share.index != index => {
                    tracing::warn!(
                        name = %info.name,
                        validator = %validator,
                        got = share.index,
                        "rejecting signature share with wrong index"
                    );
                }
                Ok(share) if !share_verifies(info, &share, message) => {
                    tracing::warn!(name = %info.name, validator = %validator, "rejecting invalid signature share");
                }
                Ok(share) => shares.push(share),
                Err(e) => {
                    tracing::warn!(name = %info.name, validator = %validator, error = %e, "no signature share");
                }
            }
            if shares.len() == threshold {
                break;
            }
        }
        drop(pending);

        if shares.len() < threshold {
            return Err(KeycoreError::ThresholdSigningFailed {
                name: info.name.clone(),
                reason: format!("got {} of {threshold} signature shares", shares.len()),
            });
        }

        bls::aggregate(
            &shares,
            threshold,
            group_public_key,
            Some(info.share_public_keys.as_slice()),
            message,
        )
        .map_err(|e| KeycoreError::ThresholdSigningFailed {
            name: info.name.clone(),
            reason: e.to_string(),
        })
    }
}

fn share_verifies(info: &DistributedKeyInfo, share: &SignatureShare, message: &[u8]) -> bool {
    info.share_public_keys
        .iter()
        .find(|(index, _)| *index == share.index)
        .is_some_and(|(_, pk)| bls::verify(pk, message, &share.signature))
}

/// [`ShareConfig::validate`] plus distinct validators.
fn validate_share_config(config: &ShareConfig) -> Result<()> {
    config.validate()?;
    let mut seen = HashSet::with_capacity(config.validators.len());
    if let Some(dup) = config.validators.iter().find(|v| !seen.insert(v.as_str())) {
        return Err(KeycoreError::InvalidShareConfig {
            reason: format!("validator {dup} listed more than once"),
        });
    }
    Ok(())
}

/// Deletes `name`'s share on each validator, retrying failures once.
/// Returns the validators that still hold a share.
async fn remove_shares(rpc: &dyn ValidatorRpc, name: &str, validators: &[String]) -> Vec<String> {
    let mut remaining = validators.to_vec();
    for _attempt in 0..2 {
        if remaining.is_empty() {
            break;
        }
        let mut pending: FuturesUnordered<_> = remaining
            .iter()
            .map(|validator| async move {
                let params = DeleteShareParams {
                    key_id: name.to_owned(),
                    share_id: None,
                    validator_id: Some(validator.clone()),
                };
                (validator.clone(), rpc.delete_share(params).await)
            })
            .collect();

        let mut failed = Vec::new();
        while let Some((validator, result)) = pending.next().await {
            if let Err(e) = result {
                tracing::debug!(name = %name, validator = %validator, error = %e, "share delete failed");
                failed.push(validator);
            }
        }
        drop(pending);
        remaining = failed;
    }

    if !remaining.is_empty() {
        tracing::warn!(name = %name, validators = ?remaining, "shares left on validators");
    }
    remaining
}

#[async_trait]
impl KeyBackend for KChainBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::KChain
    }

    fn name(&self) -> &str {
        "K-Chain Distributed Secrets"
    }

    fn available(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connects_on_initialize(&self) -> bool {
        true
    }

    fn requires_password(&self) -> bool {
        false
    }

    fn requires_hardware(&self) -> bool {
        false
    }

    fn supports_remote_signing(&self) -> bool {
        true
    }

    /// Probes `health`; the backend is available only once the service
    /// reports healthy.
    async fn initialize(&self, _config: &KeycoreConfig) -> Result<()> {
        let health = self.rpc().await.health().await;
        match health {
            Ok(h) if h.healthy => {
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!(version = %h.version, validators = h.validators.len(), "connected to K-Chain");
                Ok(())
            }
            Ok(_) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(KeycoreError::BackendUnavailable {
                    backend: BackendType::KChain,
                    reason: "K-Chain reports unhealthy".into(),
                })
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(KeycoreError::BackendUnavailable {
                    backend: BackendType::KChain,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Drops (and zeroizes) every held validator KEM key.
    async fn close(&self) -> Result<()> {
        self.validator_keys.write().await.clear();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Derives a key set. Nothing is distributed until
    /// [`save_key`](KeyBackend::save_key).
    async fn create_key(&self, name: &str, options: &CreateKeyOptions) -> Result<HdKeySet> {
        self.ensure_connected()?;
        self.ensure_new(name).await?;
        match options.mnemonic() {
            Some(phrase) => {
                validate_mnemonic(phrase)?;
                derive_all_with_account(name, phrase, options.account_index)
            }
            None => {
                let phrase = generate_mnemonic()?;
                derive_all_with_account(name, phrase.as_str(), options.account_index)
            }
        }
    }

    /// Rebuilds a distributed key set. A BLS key yields a public-only set
    /// carrying the group public key. `password` is ignored.
    async fn load_key(&self, name: &str, _password: Option<&str>) -> Result<HdKeySet> {
        let info = self.key_info(name).await.ok_or_else(|| KeycoreError::KeyNotFound {
            name: name.to_owned(),
        })?;

        match info.kind {
            DistributedKeyKind::Bls => {
                let mut key_set = HdKeySet::empty(name);
                key_set.bls_public_key = info.group_public_key.map(|pk| pk.to_vec()).unwrap_or_default();
                key_set.node_id = info.node_id;
                Ok(key_set)
            }
            DistributedKeyKind::Generic | DistributedKeyKind::PrivateKey => {
                let secret = self.reconstruct_key(name).await?;
                HdKeySet::from_private_keys(name, &secret, None)
            }
            DistributedKeyKind::KeySet { account_index } => {
                let secret = self.reconstruct_key(name).await?;
                let mut entropy = Zeroizing::new([0u8; 32]);
                if secret.len() != entropy.len() {
                    return Err(KeycoreError::CryptoError {
                        reason: format!("reconstructed {} bytes of entropy", secret.len()),
                    });
                }
                entropy.copy_from_slice(&secret);
                let phrase = entropy_to_mnemonic(&entropy)?;
                derive_all_with_account(name, phrase.as_str(), account_index)
            }
        }
    }

    /// Distributes a key set with the default share config.
    ///
    /// The mnemonic entropy is shared when the set has a mnemonic;
    /// otherwise only the secp256k1 private key is. `password` is
    /// ignored.
    async fn save_key(&self, key_set: &HdKeySet, _password: Option<&str>) -> Result<()> {
        let config = self.default_share_config.clone();
        let name = key_set.name.as_str();

        if let Some(phrase) = key_set.mnemonic.as_deref() {
            let entropy = mnemonic_to_entropy(phrase)?;
            let mut info = DistributedKeyInfo::new(
                name,
                DistributedKeyKind::KeySet {
                    account_index: key_set.account_index,
                },
                config,
            );
            info.address = key_set.ec_address.clone();
            info.node_id = key_set.node_id.clone();
            return self.distribute_secret(info, entropy.as_bytes()).await;
        }

        if key_set.ec_private_key.len() != ELEMENT_LEN {
            return Err(KeycoreError::UnsupportedOperation {
                backend: BackendType::KChain,
                operation: "saving a key set without private key material".into(),
            });
        }
        let mut info = DistributedKeyInfo::new(name, DistributedKeyKind::PrivateKey, config);
        info.address = key_set.ec_address.clone();
        info.node_id = key_set.node_id.clone();
        self.distribute_secret(info, key_set.ec_private_key.as_slice()).await
    }

    /// Forgets the key locally and asks every validator to drop its
    /// share. Validator failures are logged, not returned.
    async fn delete_key(&self, name: &str) -> Result<()> {
        let info = self.keys.write().await.remove(name).ok_or_else(|| KeycoreError::KeyNotFound {
            name: name.to_owned(),
        })?;
        let rpc = self.rpc().await;
        remove_shares(rpc.as_ref(), name, &info.share_config.validators).await;
        tracing::info!(name = %name, "distributed key deleted");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        let keys = self.keys.read().await;
        let mut infos: Vec<KeyInfo> = keys
            .values()
            .map(|info| KeyInfo {
                name: info.name.clone(),
                address: info.address.clone(),
                node_id: info.node_id.clone(),
                encrypted: true,
                locked: false,
                created_at: Some(info.created_at),
                backend: BackendType::KChain,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
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

    /// Threshold-signs `request.data` with a distributed BLS key.
    ///
    /// # Errors
    ///
    /// - [`KeycoreError::KeyNotDistributed`] for an unknown name.
    /// - [`KeycoreError::UnsupportedOperation`] for non-BLS keys or a
    ///   non-BLS algorithm.
    /// - [`KeycoreError::ThresholdSigningFailed`] when fewer than K valid
    ///   signature shares arrive or aggregation fails.
    async fn sign(&self, name: &str, request: &SignRequest) -> Result<SignResponse> {
        let info = self.distributed(name).await?;
        let group_public_key = match (info.kind, info.group_public_key) {
            (DistributedKeyKind::Bls, Some(pk)) if request.algorithm == SignAlgorithm::Bls => pk,
            _ => {
                return Err(KeycoreError::UnsupportedOperation {
                    backend: BackendType::KChain,
                    operation: format!("{} signing with a non-BLS distributed key", request.algorithm),
                })
            }
        };
        self.ensure_connected()?;

        let signature = self.threshold_sign(&info, &group_public_key, &request.data).await?;
        tracing::debug!(name = %name, "threshold signature aggregated");
        Ok(SignResponse {
            signature: signature.to_vec(),
            public_key: group_public_key.to_vec(),
            address: String::new(),
        })
    }
}
