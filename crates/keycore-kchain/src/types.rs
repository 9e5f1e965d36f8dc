//! K-Chain JSON-RPC request and response bodies.
//!
//! Field names follow the wire format (camelCase). Binary payloads that
//! travel inside these structs are hex strings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a, P: Serialize> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: P,
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// Error object of a failed call.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Key metadata
// ---------------------------------------------------------------------------

/// A key as K-Chain describes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    pub id: String,
    pub name: String,
    pub algorithm: String,
    pub key_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub distributed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_shares: Option<usize>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListKeysParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListKeysResult {
    #[serde(default)]
    pub keys: Vec<KeyMetadata>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyParams {
    pub name: String,
    pub algorithm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_shares: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyResult {
    pub key: KeyMetadata,
    pub public_key: String,
    #[serde(default)]
    pub share_ids: Vec<String>,
}

/// Partial update; absent fields are left unchanged.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateKeyParams {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeleteKeyParams {
    pub id: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteKeyResult {
    pub success: bool,
    #[serde(default)]
    pub deleted_shares: usize,
}

// ---------------------------------------------------------------------------
// Remote (non-distributed) key operations
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptParams {
    pub key_id: String,
    pub plaintext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aad: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptResult {
    pub ciphertext: String,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptParams {
    pub key_id: String,
    pub ciphertext: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aad: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DecryptResult {
    pub plaintext: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignParams {
    pub key_id: String,
    pub message: String,
    pub algorithm: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub prehashed: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResult {
    pub signature: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub share_proofs: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub message: String,
    pub signature: String,
    pub algorithm: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub prehashed: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResult {
    pub valid: bool,
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PublicKeyResult {
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub algorithm: String,
    pub format: String,
}

/// One entry of `kchain.listAlgorithms`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub security_level: u32,
    #[serde(default)]
    pub key_size: Option<usize>,
    #[serde(default)]
    pub signature_size: Option<usize>,
    pub post_quantum: bool,
    pub threshold_support: bool,
    pub description: String,
    #[serde(default)]
    pub standards: Vec<String>,
}

// ---------------------------------------------------------------------------
// Distribution
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeKeyParams {
    pub key_id: String,
    pub threshold: usize,
    pub total_parts: usize,
    pub validators: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeKeyResult {
    pub success: bool,
    #[serde(default)]
    pub share_ids: Vec<String>,
    #[serde(default)]
    pub group_public_key: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSignParams {
    pub key_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub share_ids: Vec<String>,
    pub algorithm: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSignResult {
    pub signature: String,
    pub group_public_key: String,
    #[serde(default)]
    pub participant_ids: Vec<String>,
    #[serde(default)]
    pub proofs: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReshareKeyParams {
    pub key_id: String,
    pub new_threshold: usize,
    pub new_total_parts: usize,
    pub new_validators: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReshareKeyResult {
    pub success: bool,
    #[serde(default)]
    pub new_share_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Per-validator share operations
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreShareParams {
    pub key_id: String,
    pub share_index: u8,
    /// JSON-encoded [`EncryptedShare`].
    pub share_data: String,
    pub validator_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreShareResult {
    pub share_id: String,
    pub stored: bool,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveShareParams {
    pub key_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveShareResult {
    pub share_id: String,
    pub share_index: u8,
    pub share_data: String,
    pub validator_id: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteShareParams {
    pub key_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteShareResult {
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSignatureShareParams {
    pub key_id: String,
    /// Hex-encoded message.
    pub message: String,
    pub validator_id: String,
    pub algorithm: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSignatureShareResult {
    pub share_id: String,
    /// Hex-encoded `index ‖ signature`.
    pub share_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
}

/// Result of `kchain.health`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResult {
    pub healthy: bool,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub uptime: i64,
    #[serde(default)]
    pub validators: HashMap<String, bool>,
    #[serde(default)]
    pub latency: HashMap<String, i64>,
}

// ---------------------------------------------------------------------------
// EncryptedShare
// ---------------------------------------------------------------------------

/// A share sealed to one validator, as carried in `shareData`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedShare {
    /// 1-based share index.
    pub index: u8,
    /// ML-KEM-768 ciphertext, hex.
    pub kem_ciphertext: String,
    /// AES-256-GCM ciphertext with tag, hex.
    pub ciphertext: String,
    /// AES-GCM nonce, hex.
    pub nonce: String,
    /// Validator the share is sealed to; bound as AEAD associated data.
    pub validator_id: String,
}
