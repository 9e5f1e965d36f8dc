//! JSON-RPC 2.0 client for the K-Chain key service.
//!
//! Every call is an HTTP POST of one request envelope to
//! `{endpoint}/ext/kchain/rpc`; method names are `kchain.<method>`.
//! The per-validator share operations the threshold backend depends on
//! are grouped in the [`ValidatorRpc`] trait so they can be served by
//! something other than HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keycore_types::config::{KeycoreConfig, DEFAULT_SIGNING_TIMEOUT};
use keycore_types::{KeycoreError, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{
    AlgorithmInfo, CreateKeyParams, CreateKeyResult, DecryptParams, DecryptResult,
    DeleteKeyParams, DeleteKeyResult, DeleteShareParams, DeleteShareResult, DistributeKeyParams,
    DistributeKeyResult, EncryptParams, EncryptResult, HealthResult, KeyMetadata, ListKeysParams,
    ListKeysResult, PublicKeyResult, RequestSignatureShareParams, RequestSignatureShareResult,
    ReshareKeyParams, ReshareKeyResult, RetrieveShareParams, RetrieveShareResult, RpcRequest,
    RpcResponse, SignParams, SignResult, StoreShareParams, StoreShareResult, ThresholdSignParams,
    ThresholdSignResult, UpdateKeyParams, VerifyParams, VerifyResult,
};

/// Path of the K-Chain RPC handler below the node endpoint.
pub const RPC_PATH: &str = "/ext/kchain/rpc";

/// Method namespace.
const METHOD_PREFIX: &str = "kchain.";

// ---------------------------------------------------------------------------
// ValidatorRpc
// ---------------------------------------------------------------------------

/// Share storage and partial signing on the validator set.
///
/// Requests name the target validator through their `validator_id`
/// field; the implementation routes them.
#[async_trait]
pub trait ValidatorRpc: Send + Sync {
    /// Service health, including per-validator reachability.
    async fn health(&self) -> Result<HealthResult>;

    /// Stores one sealed share on its validator.
    async fn store_share(&self, params: StoreShareParams) -> Result<StoreShareResult>;

    /// Fetches the sealed share a validator holds for a key.
    async fn retrieve_share(&self, params: RetrieveShareParams) -> Result<RetrieveShareResult>;

    /// Removes a validator's share of a key.
    async fn delete_share(&self, params: DeleteShareParams) -> Result<DeleteShareResult>;

    /// Asks a validator to sign a message with its share.
    async fn request_signature_share(
        &self,
        params: RequestSignatureShareParams,
    ) -> Result<RequestSignatureShareResult>;
}

// ---------------------------------------------------------------------------
// KChainRpcClient
// ---------------------------------------------------------------------------

/// HTTP client for one K-Chain endpoint.
pub struct KChainRpcClient {
    client: Client,
    endpoint: String,
    url: String,
    api_key: Option<String>,
    timeout: Duration,
    signing_timeout: Duration,
    next_id: AtomicU64,
}

// Debug omits the API key.
impl std::fmt::Debug for KChainRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KChainRpcClient")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("signing_timeout", &self.signing_timeout)
            .finish_non_exhaustive()
    }
}

impl KChainRpcClient {
    /// Creates a client for `endpoint` (scheme, host and port).
    ///
    /// `timeout` bounds ordinary calls; signing calls use
    /// [`DEFAULT_SIGNING_TIMEOUT`] unless changed with
    /// [`with_signing_timeout`](Self::with_signing_timeout).
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let endpoint = endpoint.trim_end_matches('/').to_owned();
        Self {
            client: Client::new(),
            url: format!("{endpoint}{RPC_PATH}"),
            endpoint,
            api_key: None,
            timeout,
            signing_timeout: DEFAULT_SIGNING_TIMEOUT,
            next_id: AtomicU64::new(1),
        }
    }

    /// Timeout for calls that wait on signatures.
    pub fn with_signing_timeout(mut self, timeout: Duration) -> Self {
        self.signing_timeout = timeout;
        self
    }

    /// Sends `Authorization: Bearer <api_key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Client for the configured endpoint, API key and timeouts.
    pub fn from_config(config: &KeycoreConfig) -> Self {
        let client = Self::new(&config.kchain_endpoint, config.rpc_timeout)
            .with_signing_timeout(config.signing_timeout);
        match &config.kchain_api_key {
            Some(key) => client.with_api_key(key.clone()),
            None => client,
        }
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Performs one JSON-RPC call.
    ///
    /// `method` is given without the `kchain.` prefix.
    ///
    /// # Errors
    ///
    /// - [`KeycoreError::NetworkError`] on transport failure, timeout or
    ///   a non-2xx status that carries no RPC error.
    /// - [`KeycoreError::Rpc`] when the service answers with an error
    ///   object.
    /// - [`KeycoreError::SerializationError`] if the result does not
    ///   match the expected shape.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, self.timeout).await
    }

    /// [`call`](Self::call) bounded by the signing timeout.
    pub async fn call_signing<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, params, self.signing_timeout).await
    }

    async fn call_with_timeout<P, R>(&self, method: &str, params: P, timeout: Duration) -> Result<R>
    where
        P: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        let full_method = format!("{METHOD_PREFIX}{method}");
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: &full_method,
            params,
        };

        let mut request = self.client.post(&self.url).timeout(timeout).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| KeycoreError::NetworkError {
            reason: format!("{full_method} to {}: {e}", self.endpoint),
        })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| KeycoreError::NetworkError {
            reason: format!("{full_method} response read failed: {e}"),
        })?;

        let parsed: RpcResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(KeycoreError::SerializationError {
                    reason: format!("{full_method} response parse error: {e}"),
                })
            }
            Err(_) => {
                return Err(KeycoreError::NetworkError {
                    reason: format!("{full_method} returned {status}: {text}"),
                })
            }
        };

        if let Some(err) = parsed.error {
            tracing::debug!(method = %full_method, code = err.code, "kchain rpc error");
            return Err(KeycoreError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data.map(|d| d.to_string()),
            });
        }
        if !status.is_success() {
            return Err(KeycoreError::NetworkError {
                reason: format!("{full_method} returned {status}"),
            });
        }

        serde_json::from_value(parsed.result.unwrap_or(Value::Null)).map_err(|e| {
            KeycoreError::SerializationError {
                reason: format!("{full_method} result has unexpected shape: {e}"),
            }
        })
    }

    // -----------------------------------------------------------------------
    // Key management
    // -----------------------------------------------------------------------

    pub async fn list_keys(&self, params: ListKeysParams) -> Result<ListKeysResult> {
        self.call("listKeys", params).await
    }

    pub async fn get_key_by_id(&self, id: &str) -> Result<KeyMetadata> {
        self.call("getKeyByID", json!({ "id": id })).await
    }

    pub async fn get_key_by_name(&self, name: &str) -> Result<KeyMetadata> {
        self.call("getKeyByName", json!({ "name": name })).await
    }

    pub async fn create_key(&self, params: CreateKeyParams) -> Result<CreateKeyResult> {
        self.call("createKey", params).await
    }

    pub async fn update_key(&self, params: UpdateKeyParams) -> Result<KeyMetadata> {
        self.call("updateKey", params).await
    }

    pub async fn delete_key(&self, id: &str, force: bool) -> Result<DeleteKeyResult> {
        self.call(
            "deleteKey",
            DeleteKeyParams {
                id: id.to_owned(),
                force,
            },
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Remote key operations
    // -----------------------------------------------------------------------

    pub async fn encrypt(&self, params: EncryptParams) -> Result<EncryptResult> {
        self.call("encrypt", params).await
    }

    pub async fn decrypt(&self, params: DecryptParams) -> Result<DecryptResult> {
        self.call("decrypt", params).await
    }

    pub async fn sign(&self, params: SignParams) -> Result<SignResult> {
        self.call_signing("sign", params).await
    }

    pub async fn verify(&self, params: VerifyParams) -> Result<VerifyResult> {
        self.call("verify", params).await
    }

    /// `format` defaults to the service's native encoding when `None`.
    pub async fn get_public_key(&self, key_id: &str, format: Option<&str>) -> Result<PublicKeyResult> {
        let mut params = json!({ "keyId": key_id });
        if let Some(format) = format {
            params["format"] = json!(format);
        }
        self.call("getPublicKey", params).await
    }

    pub async fn list_algorithms(&self) -> Result<Vec<AlgorithmInfo>> {
        #[derive(Deserialize)]
        struct ListAlgorithmsResult {
            #[serde(default)]
            algorithms: Vec<AlgorithmInfo>,
        }
        let result: ListAlgorithmsResult = self.call("listAlgorithms", json!({})).await?;
        Ok(result.algorithms)
    }

    // -----------------------------------------------------------------------
    // Server-side threshold operations
    // -----------------------------------------------------------------------

    pub async fn distribute_key(&self, params: DistributeKeyParams) -> Result<DistributeKeyResult> {
        self.call("distributeKey", params).await
    }

    /// Collects up to `threshold` shares of a key in one call.
    pub async fn gather_shares(&self, key_id: &str, threshold: usize) -> Result<Vec<RetrieveShareResult>> {
        #[derive(Deserialize)]
        struct GatherSharesResult {
            #[serde(default)]
            shares: Vec<RetrieveShareResult>,
        }
        let result: GatherSharesResult = self
            .call("gatherShares", json!({ "keyId": key_id, "threshold": threshold }))
            .await?;
        Ok(result.shares)
    }

    pub async fn threshold_sign(&self, params: ThresholdSignParams) -> Result<ThresholdSignResult> {
        self.call_signing("thresholdSign", params).await
    }

    pub async fn reshare_key(&self, params: ReshareKeyParams) -> Result<ReshareKeyResult> {
        self.call("reshareKey", params).await
    }
}

#[async_trait]
impl ValidatorRpc for KChainRpcClient {
    async fn health(&self) -> Result<HealthResult> {
        self.call("health", json!({})).await
    }

    async fn store_share(&self, params: StoreShareParams) -> Result<StoreShareResult> {
        self.call("storeShare", params).await
    }

    async fn retrieve_share(&self, params: RetrieveShareParams) -> Result<RetrieveShareResult> {
        self.call("retrieveShare", params).await
    }

    async fn delete_share(&self, params: DeleteShareParams) -> Result<DeleteShareResult> {
        self.call("deleteShare", params).await
    }

    async fn request_signature_share(
        &self,
        params: RequestSignatureShareParams,
    ) -> Result<RequestSignatureShareResult> {
        self.call_signing("requestSignatureShare", params).await
    }
}
