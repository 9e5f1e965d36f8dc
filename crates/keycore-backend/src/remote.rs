//! Signing delegated to a paired remote wallet.
//!
//! A key name is paired with an account on a remote signer (a mobile
//! wallet reached through a relay, or any JSON-RPC signing endpoint).
//! Pairings are persisted in `<data_dir>/sessions.json`. No private key
//! material ever reaches this process: `load_key` returns a public-only
//! key set and `sign` forwards the request for approval.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keycore_crypto::HdKeySet;
use keycore_types::config::KeycoreConfig;
use keycore_types::{
    BackendType, CreateKeyOptions, KeyInfo, KeycoreError, Result, SignAlgorithm, SignKind,
    SignRequest, SignResponse,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::backend::KeyBackend;
use crate::keystore;

/// Pairing record file name.
pub const SESSIONS_FILE: &str = "sessions.json";

/// How long a pairing stays valid.
pub const PAIRING_LIFETIME_DAYS: i64 = 7;

/// EIP-191 message signing.
pub const METHOD_PERSONAL_SIGN: &str = "personal_sign";

/// Transaction signing without broadcast.
pub const METHOD_SIGN_TRANSACTION: &str = "eth_signTransaction";

/// EIP-1193 "user rejected request" error code.
const USER_REJECTED: i64 = 4001;

// ---------------------------------------------------------------------------
// RemoteAccount
// ---------------------------------------------------------------------------

/// A remote account paired with a local key name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAccount {
    /// `0x`-prefixed account address on the remote wallet.
    pub address: String,
    /// Chain the pairing was approved for.
    pub chain_id: u64,
    /// JSON-RPC endpoint that relays requests to the wallet.
    pub endpoint: String,
    /// Wallet name reported at pairing time.
    #[serde(default)]
    pub peer_name: String,
    /// When the pairing was approved.
    pub paired_at: DateTime<Utc>,
    /// When the pairing lapses.
    pub expires_at: DateTime<Utc>,
}

impl RemoteAccount {
    /// A pairing made now, valid for [`PAIRING_LIFETIME_DAYS`].
    pub fn new(address: impl Into<String>, chain_id: u64, endpoint: impl Into<String>) -> Self {
        let paired_at = Utc::now();
        Self {
            address: address.into(),
            chain_id,
            endpoint: endpoint.into(),
            peer_name: String::new(),
            paired_at,
            expires_at: paired_at + chrono::Duration::days(PAIRING_LIFETIME_DAYS),
        }
    }

    /// Sets the wallet name.
    pub fn with_peer_name(mut self, peer_name: impl Into<String>) -> Self {
        self.peer_name = peer_name.into();
        self
    }

    /// Whether the pairing has lapsed.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

// ---------------------------------------------------------------------------
// RemoteSigner
// ---------------------------------------------------------------------------

/// Transport to a remote wallet.
#[async_trait]
pub trait RemoteSigner: Send + Sync {
    /// Sends one JSON-RPC request for `account` and returns its result.
    async fn request(&self, account: &RemoteAccount, method: &str, params: Value) -> Result<Value>;
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// JSON-RPC 2.0 over HTTP POST to the account's endpoint.
///
/// Each request waits at most the interactive signing timeout, since a
/// human has to approve it on the wallet.
pub struct HttpRemoteSigner {
    client: Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpRemoteSigner {
    /// Creates a signer whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl RemoteSigner for HttpRemoteSigner {
    async fn request(&self, account: &RemoteAccount, method: &str, params: Value) -> Result<Value> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let resp = self
            .client
            .post(&account.endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    KeycoreError::SigningCancelled {
                        reason: format!("no approval from wallet within {:?}", self.timeout),
                    }
                } else {
                    KeycoreError::NetworkError {
                        reason: format!("remote signer request failed: {e}"),
                    }
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(KeycoreError::NetworkError {
                reason: format!("remote signer returned {status}: {text}"),
            });
        }

        let parsed: RpcResponse = resp.json().await.map_err(|e| KeycoreError::SerializationError {
            reason: format!("remote signer response parse error: {e}"),
        })?;

        if let Some(err) = parsed.error {
            return Err(KeycoreError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data.map(|d| d.to_string()),
            });
        }
        parsed.result.ok_or_else(|| KeycoreError::SerializationError {
            reason: "remote signer response has neither result nor error".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// RemoteSignerBackend
// ---------------------------------------------------------------------------

/// Key backend whose keys live on paired remote wallets.
pub struct RemoteSignerBackend {
    data_dir: PathBuf,
    signer: Arc<dyn RemoteSigner>,
    accounts: RwLock<HashMap<String, RemoteAccount>>,
}

impl RemoteSignerBackend {
    /// Creates a backend persisting pairings under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>, signer: Arc<dyn RemoteSigner>) -> Self {
        Self {
            data_dir: data_dir.into(),
            signer,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    /// HTTP transport with the configured signing timeout.
    pub fn from_config(config: &KeycoreConfig) -> Self {
        Self::new(
            &config.data_dir,
            Arc::new(HttpRemoteSigner::new(config.signing_timeout)),
        )
    }

    fn sessions_path(&self) -> PathBuf {
        self.data_dir.join(SESSIONS_FILE)
    }

    fn unsupported(&self, operation: &str) -> KeycoreError {
        KeycoreError::UnsupportedOperation {
            backend: BackendType::WalletConnect,
            operation: operation.to_owned(),
        }
    }

    /// Pairs `name` with `account`, replacing any earlier pairing.
    pub async fn pair(&self, name: &str, account: RemoteAccount) -> Result<()> {
        keystore::validate_key_name(name)?;
        let mut accounts = self.accounts.write().await;
        tracing::info!(
            name = %name,
            address = %account.address,
            chain_id = account.chain_id,
            peer = %account.peer_name,
            "remote wallet paired"
        );
        accounts.insert(name.to_owned(), account);
        persist(&self.data_dir, &self.sessions_path(), &accounts)
    }

    /// Returns the pairing for `name`, if any.
    pub async fn account(&self, name: &str) -> Option<RemoteAccount> {
        self.accounts.read().await.get(name).cloned()
    }

    async fn live_account(&self, name: &str) -> Result<RemoteAccount> {
        let account = self.account(name).await.ok_or_else(|| KeycoreError::KeyNotFound {
            name: name.to_owned(),
        })?;
        if account.is_expired() {
            return Err(KeycoreError::KeyLocked {
                name: name.to_owned(),
            });
        }
        Ok(account)
    }
}

fn load_sessions(path: &Path) -> Result<HashMap<String, RemoteAccount>> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| KeycoreError::SerializationError {
            reason: format!("malformed {}: {e}", path.display()),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(KeycoreError::storage(&format!("failed to read {}", path.display()), e)),
    }
}

fn persist(dir: &Path, path: &Path, accounts: &HashMap<String, RemoteAccount>) -> Result<()> {
    keystore::create_private_dir(dir)?;
    let json = serde_json::to_vec_pretty(accounts).map_err(|e| KeycoreError::SerializationError {
        reason: format!("failed to encode pairings: {e}"),
    })?;
    keystore::write_atomic(path, &json, true)
}

/// Builds the wallet method and parameters for `request`.
fn remote_call(account: &RemoteAccount, request: &SignRequest) -> (&'static str, Value) {
    match request.kind {
        SignKind::Transaction => {
            let tx = serde_json::from_slice::<Value>(&request.data)
                .unwrap_or_else(|_| Value::String(format!("0x{}", hex::encode(&request.data))));
            (METHOD_SIGN_TRANSACTION, json!([tx]))
        }
        SignKind::Message | SignKind::Auth => (
            METHOD_PERSONAL_SIGN,
            json!([format!("0x{}", hex::encode(&request.data)), account.address]),
        ),
    }
}

fn decode_signature(result: &Value) -> Result<Vec<u8>> {
    let text = result.as_str().ok_or_else(|| KeycoreError::SerializationError {
        reason: format!("remote signature is not a string: {result}"),
    })?;
    hex::decode(text.trim_start_matches("0x")).map_err(|e| KeycoreError::SerializationError {
        reason: format!("remote signature is not hex: {e}"),
    })
}

#[async_trait]
impl KeyBackend for RemoteSignerBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::WalletConnect
    }

    fn name(&self) -> &str {
        "Remote Wallet"
    }

    fn available(&self) -> bool {
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

    /// Reloads persisted pairings.
    async fn initialize(&self, _config: &KeycoreConfig) -> Result<()> {
        let loaded = load_sessions(&self.sessions_path())?;
        tracing::debug!(count = loaded.len(), "remote pairings loaded");
        *self.accounts.write().await = loaded;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let accounts = self.accounts.read().await;
        if accounts.is_empty() {
            return Ok(());
        }
        persist(&self.data_dir, &self.sessions_path(), &accounts)
    }

    async fn create_key(&self, _name: &str, _options: &CreateKeyOptions) -> Result<HdKeySet> {
        Err(self.unsupported("create_key (pair a wallet instead)"))
    }

    /// Returns a key set carrying only the paired address.
    async fn load_key(&self, name: &str, _password: Option<&str>) -> Result<HdKeySet> {
        let account = self.live_account(name).await?;
        let mut ks = HdKeySet::empty(name);
        ks.ec_address = account.address;
        Ok(ks)
    }

    async fn save_key(&self, _key_set: &HdKeySet, _password: Option<&str>) -> Result<()> {
        Err(self.unsupported("save_key"))
    }

    async fn delete_key(&self, name: &str) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.remove(name).is_none() {
            return Err(KeycoreError::KeyNotFound {
                name: name.to_owned(),
            });
        }
        tracing::info!(name = %name, "remote pairing removed");
        persist(&self.data_dir, &self.sessions_path(), &accounts)
    }

    async fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        let accounts = self.accounts.read().await;
        let mut keys: Vec<KeyInfo> = accounts
            .iter()
            .map(|(name, account)| KeyInfo {
                name: name.clone(),
                address: account.address.clone(),
                node_id: String::new(),
                encrypted: false,
                locked: account.is_expired(),
                created_at: Some(account.paired_at),
                backend: BackendType::WalletConnect,
            })
            .collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(keys)
    }

    async fn lock(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn unlock(&self, name: &str, _password: &str) -> Result<()> {
        self.live_account(name).await.map(|_| ())
    }

    async fn is_locked(&self, name: &str) -> bool {
        self.account(name).await.map_or(true, |a| a.is_expired())
    }

    /// Forwards `request` to the paired wallet and waits for approval.
    ///
    /// # Errors
    ///
    /// - [`KeycoreError::KeyNotFound`] if `name` is not paired.
    /// - [`KeycoreError::KeyLocked`] if the pairing has expired.
    /// - [`KeycoreError::UnsupportedOperation`] for non-secp256k1 requests.
    /// - [`KeycoreError::SigningCancelled`] if the user rejects or the
    ///   approval times out.
    async fn sign(&self, name: &str, request: &SignRequest) -> Result<SignResponse> {
        if request.algorithm != SignAlgorithm::Secp256k1 {
            return Err(self.unsupported(&format!("sign with {}", request.algorithm)));
        }
        let account = self.live_account(name).await?;
        let (method, params) = remote_call(&account, request);

        tracing::info!(name = %name, method, kind = %request.kind, "awaiting remote approval");
        let result = match self.signer.request(&account, method, params).await {
            Ok(result) => result,
            Err(KeycoreError::Rpc { code, message, .. }) if code == USER_REJECTED => {
                return Err(KeycoreError::SigningCancelled { reason: message });
            }
            Err(e) => return Err(e),
        };

        Ok(SignResponse {
            signature: decode_signature(&result)?,
            public_key: Vec::new(),
            address: account.address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockSigner {
        calls: Mutex<Vec<(String, Value)>>,
        reject: bool,
    }

    #[async_trait]
    impl RemoteSigner for MockSigner {
        async fn request(&self, _account: &RemoteAccount, method: &str, params: Value) -> Result<Value> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((method.to_owned(), params));
            }
            if self.reject {
                return Err(KeycoreError::Rpc {
                    code: USER_REJECTED,
                    message: "User rejected the request.".into(),
                    data: None,
                });
            }
            Ok(Value::String(format!("0x{}", "ab".repeat(65))))
        }
    }

    const ADDRESS: &str = "0x9858effd232b4033e47d90003d41ec34ecaeda94";

    fn request(kind: SignKind, data: &[u8]) -> SignRequest {
        SignRequest::new(kind, data.to_vec(), [0u8; 32])
    }

    #[tokio::test]
    async fn message_uses_personal_sign() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let signer = Arc::new(MockSigner::default());
        let backend = RemoteSignerBackend::new(dir.path(), signer.clone());
        backend.pair("phone", RemoteAccount::new(ADDRESS, 96369, "http://relay.invalid")).await?;

        let resp = backend.sign("phone", &request(SignKind::Message, b"hi")).await?;
        assert_eq!(resp.signature.len(), 65);
        assert_eq!(resp.address, ADDRESS);

        let calls = signer.calls.lock().map(|c| c.clone()).unwrap_or_default();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, METHOD_PERSONAL_SIGN);
        assert_eq!(calls[0].1, json!(["0x6869", ADDRESS]));
        Ok(())
    }

    #[tokio::test]
    async fn transaction_uses_sign_transaction() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let signer = Arc::new(MockSigner::default());
        let backend = RemoteSignerBackend::new(dir.path(), signer.clone());
        backend.pair("phone", RemoteAccount::new(ADDRESS, 1, "http://relay.invalid")).await?;

        let tx = br#"{"to":"0x0000000000000000000000000000000000000001","value":"0x1"}"#;
        backend.sign("phone", &request(SignKind::Transaction, tx)).await?;

        let calls = signer.calls.lock().map(|c| c.clone()).unwrap_or_default();
        assert_eq!(calls[0].0, METHOD_SIGN_TRANSACTION);
        assert_eq!(calls[0].1[0]["value"], json!("0x1"));
        Ok(())
    }

    #[tokio::test]
    async fn rejection_is_cancellation() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let signer = Arc::new(MockSigner {
            reject: true,
            ..MockSigner::default()
        });
        let backend = RemoteSignerBackend::new(dir.path(), signer);
        backend.pair("phone", RemoteAccount::new(ADDRESS, 1, "http://relay.invalid")).await?;

        assert!(matches!(
            backend.sign("phone", &request(SignKind::Auth, b"challenge")).await,
            Err(KeycoreError::SigningCancelled { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn expired_pairing_is_locked() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let backend = RemoteSignerBackend::new(dir.path(), Arc::new(MockSigner::default()));
        let mut account = RemoteAccount::new(ADDRESS, 1, "http://relay.invalid");
        account.expires_at = account.paired_at - chrono::Duration::seconds(1);
        backend.pair("old", account).await?;

        assert!(backend.is_locked("old").await);
        assert!(backend.is_locked("never-paired").await);
        assert!(matches!(
            backend.load_key("old", None).await,
            Err(KeycoreError::KeyLocked { .. })
        ));
        assert!(matches!(
            backend.sign("never-paired", &request(SignKind::Message, b"x")).await,
            Err(KeycoreError::KeyNotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn pairings_survive_restart() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let first = RemoteSignerBackend::new(dir.path(), Arc::new(MockSigner::default()));
        first
            .pair("phone", RemoteAccount::new(ADDRESS, 1, "http://relay.invalid").with_peer_name("Rainbow"))
            .await?;

        let second = RemoteSignerBackend::new(dir.path(), Arc::new(MockSigner::default()));
        second.initialize(&KeycoreConfig::with_data_dir(dir.path())).await?;
        let ks = second.load_key("phone", None).await?;
        assert_eq!(ks.ec_address, ADDRESS);
        assert!(!ks.has_private_keys());
        assert_eq!(second.account("phone").await.map(|a| a.peer_name), Some("Rainbow".into()));

        second.delete_key("phone").await?;
        assert!(second.list_keys().await?.is_empty());
        assert!(matches!(
            second.create_key("x", &CreateKeyOptions::default()).await,
            Err(KeycoreError::UnsupportedOperation { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn non_ecdsa_requests_are_refused() -> std::result::Result<(), KeycoreError> {
        let dir = tempfile::tempdir().map_err(|e| KeycoreError::storage("tempdir", e))?;
        let backend = RemoteSignerBackend::new(dir.path(), Arc::new(MockSigner::default()));
        backend.pair("phone", RemoteAccount::new(ADDRESS, 1, "http://relay.invalid")).await?;
        let req = request(SignKind::Message, b"x").with_algorithm(SignAlgorithm::Bls);
        assert!(matches!(
            backend.sign("phone", &req).await,
            Err(KeycoreError::UnsupportedOperation { .. })
        ));
        Ok(())
    }
}
