//! Multi-algorithm key sets derived from one BIP39 mnemonic.
//!
//! # Derivation
//!
//! ```text
//! seed   = BIP39_seed(mnemonic, "")
//! salt   = SHA256("lux-hd-key-derivation")
//! raw_d  = HKDF-SHA512(seed, salt, info = "<domain>/account/<index>")[..32]
//! ```
//!
//! | Domain             | Key                                      |
//! |--------------------|------------------------------------------|
//! | `lux-ec-key`       | secp256k1 scalar, used directly          |
//! | `lux-bls-key`      | BLS KeyGen input (see [`crate::bls`])    |
//! | `lux-ringtail-key` | secp256k1 scalar (Ringtail placeholder)  |
//! | `lux-mldsa-key`    | ML-DSA seed input (see [`crate::mldsa`]) |
//!
//! The same `(mnemonic, account_index)` always yields byte-identical key
//! sets, and distinct domains make the four private keys independent.

use std::fmt;

use keycore_types::{KeycoreError, Result, SignAlgorithm, SignRequest, SignResponse};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::bls::{self, BlsSecretKey};
use crate::hash::sha256;
use crate::hkdf::hkdf_sha512;
use crate::mnemonic::Mnemonic;
use crate::{mldsa, secp256k1};

/// HKDF domain for the secp256k1 transaction key.
pub const DOMAIN_EC: &str = "lux-ec-key";
/// HKDF domain for the BLS consensus key.
pub const DOMAIN_BLS: &str = "lux-bls-key";
/// HKDF domain for the Ringtail key.
pub const DOMAIN_RINGTAIL: &str = "lux-ringtail-key";
/// HKDF domain for the ML-DSA key.
pub const DOMAIN_MLDSA: &str = "lux-mldsa-key";

const DERIVATION_SALT_LABEL: &[u8] = b"lux-hd-key-derivation";

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Which path of a key-construction fallback chain produced a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyProvenance {
    /// Built straight from the derived bytes.
    Direct,
    /// Built from a keyed-hash expansion of the derived bytes.
    Expanded,
    /// The deterministic paths failed; the key is random and will not
    /// be reproduced by re-deriving.
    Random,
}

impl KeyProvenance {
    /// Whether re-deriving from the same mnemonic reproduces the key.
    pub fn is_deterministic(&self) -> bool {
        !matches!(self, Self::Random)
    }
}

impl fmt::Display for KeyProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Expanded => write!(f, "expanded"),
            Self::Random => write!(f, "random"),
        }
    }
}

/// Fallback paths taken while deriving one key set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivationProvenance {
    /// BLS key construction path.
    pub bls: KeyProvenance,
    /// ML-DSA seed path.
    pub mldsa: KeyProvenance,
}

// ---------------------------------------------------------------------------
// HdKeySet
// ---------------------------------------------------------------------------

/// Every key belonging to one logical identity.
///
/// Private fields may be empty for public-only sets (loaded from public
/// key files, remote signers, or BLS threshold stubs). All byte fields
/// are zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct HdKeySet {
    /// Key set name.
    pub name: String,
    /// Normalized mnemonic, present only right after creation.
    pub mnemonic: Option<String>,
    /// HD account index used for derivation.
    pub account_index: u32,

    /// secp256k1 scalar (32 bytes).
    pub ec_private_key: Vec<u8>,
    /// Compressed secp256k1 public key (33 bytes).
    pub ec_public_key: Vec<u8>,
    /// `0x`-prefixed Ethereum-style address.
    pub ec_address: String,

    /// BLS scalar (32 bytes).
    pub bls_private_key: Vec<u8>,
    /// Compressed G1 public key (48 bytes).
    pub bls_public_key: Vec<u8>,
    /// Proof of possession (96 bytes).
    pub bls_pop: Vec<u8>,

    /// Ringtail placeholder scalar (32 bytes).
    pub ringtail_private_key: Vec<u8>,
    /// Ringtail placeholder public key (33 bytes).
    pub ringtail_public_key: Vec<u8>,

    /// ML-DSA-65 key-generation seed (32 bytes).
    pub mldsa_private_key: Vec<u8>,
    /// ML-DSA-65 encoded verifying key.
    pub mldsa_public_key: Vec<u8>,

    /// `NodeID-<hex(SHA256(bls_public_key)[..20])>`.
    pub node_id: String,

    /// Fallback paths taken, when this set was freshly derived.
    #[zeroize(skip)]
    pub provenance: Option<DerivationProvenance>,
}

// HdKeySet does not implement Clone to prevent leakage; Debug is redacted.

/// Derives the full key set for account 0.
pub fn derive_all(name: &str, mnemonic: &str) -> Result<HdKeySet> {
    derive_all_with_account(name, mnemonic, 0)
}

fn derive_domain_key(seed: &[u8], salt: &[u8; 32], domain: &str, account_index: u32) -> Result<[u8; 32]> {
    let info = format!("{domain}/account/{account_index}");
    hkdf_sha512(seed, salt, info.as_bytes(), 32)?.to_array32()
}

/// Computes the node identity for a BLS public key.
pub fn node_id_from_bls(bls_public_key: &[u8]) -> String {
    let digest = sha256(bls_public_key);
    format!("NodeID-{}", hex::encode(&digest[..20]))
}

/// Derives the full key set for `account_index`.
///
/// # Errors
///
/// - [`KeycoreError::InvalidMnemonic`] before any derivation if the
///   phrase fails BIP39 validation.
/// - [`KeycoreError::CryptoError`] if a derived scalar is rejected by
///   secp256k1 (probability ≈ 2⁻¹²⁸).
pub fn derive_all_with_account(name: &str, mnemonic: &str, account_index: u32) -> Result<HdKeySet> {
    let mnemonic = Mnemonic::parse(mnemonic)?;
    let seed = mnemonic.to_seed("")?;
    let salt = sha256(DERIVATION_SALT_LABEL);

    let mut ec_raw = derive_domain_key(seed.as_bytes(), &salt, DOMAIN_EC, account_index)?;
    let mut bls_raw = derive_domain_key(seed.as_bytes(), &salt, DOMAIN_BLS, account_index)?;
    let mut rt_raw = derive_domain_key(seed.as_bytes(), &salt, DOMAIN_RINGTAIL, account_index)?;
    let mut mldsa_raw = derive_domain_key(seed.as_bytes(), &salt, DOMAIN_MLDSA, account_index)?;

    let mut ks = HdKeySet::empty(name);
    ks.mnemonic = Some(mnemonic.as_str().to_owned());
    ks.account_index = account_index;

    let result = (|| -> Result<DerivationProvenance> {
        ks.ec_public_key = secp256k1::public_key(&ec_raw)?;
        ks.ec_address = secp256k1::address(&ks.ec_public_key)?;
        ks.ec_private_key = ec_raw.to_vec();

        let (bls_sk, bls_prov) = bls::derive_secret_key(&bls_raw);
        ks.bls_public_key = bls_sk.public_key()?.to_vec();
        ks.bls_pop = bls_sk.prove_possession()?.to_vec();
        ks.bls_private_key = bls_sk.as_bytes().to_vec();
        ks.node_id = node_id_from_bls(&ks.bls_public_key);

        ks.ringtail_public_key = secp256k1::public_key(&rt_raw)?;
        ks.ringtail_private_key = rt_raw.to_vec();

        let (mut mldsa_seed, mldsa_prov) = mldsa::derive_seed(&mldsa_raw);
        let pk = mldsa::public_key(&mldsa_seed);
        ks.mldsa_private_key = mldsa_seed.to_vec();
        mldsa_seed.zeroize();
        ks.mldsa_public_key = pk?;

        Ok(DerivationProvenance {
            bls: bls_prov,
            mldsa: mldsa_prov,
        })
    })();

    ec_raw.zeroize();
    bls_raw.zeroize();
    rt_raw.zeroize();
    mldsa_raw.zeroize();

    let provenance = result?;
    if !provenance.bls.is_deterministic() || !provenance.mldsa.is_deterministic() {
        tracing::warn!(
            name = %name,
            bls = %provenance.bls,
            mldsa = %provenance.mldsa,
            "key set contains non-reproducible keys"
        );
    }
    ks.provenance = Some(provenance);

    tracing::debug!(name = %name, account_index, address = %ks.ec_address, "derived key set");
    Ok(ks)
}

impl HdKeySet {
    /// A key set with only a name; every key field empty.
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            mnemonic: None,
            account_index: 0,
            ec_private_key: Vec::new(),
            ec_public_key: Vec::new(),
            ec_address: String::new(),
            bls_private_key: Vec::new(),
            bls_public_key: Vec::new(),
            bls_pop: Vec::new(),
            ringtail_private_key: Vec::new(),
            ringtail_public_key: Vec::new(),
            mldsa_private_key: Vec::new(),
            mldsa_public_key: Vec::new(),
            node_id: String::new(),
            provenance: None,
        }
    }

    /// Builds a key set from a raw secp256k1 scalar and an optional BLS
    /// scalar, as supplied out of band (e.g. environment variables).
    ///
    /// An unusable BLS scalar is logged and left out.
    ///
    /// # Errors
    ///
    /// Returns [`KeycoreError::CryptoError`] if the secp256k1 scalar is
    /// invalid.
    pub fn from_private_keys(name: &str, ec_private_key: &[u8], bls_private_key: Option<&[u8]>) -> Result<Self> {
        let mut ks = Self::empty(name);
        ks.ec_public_key = secp256k1::public_key(ec_private_key)?;
        ks.ec_address = secp256k1::address(&ks.ec_public_key)?;
        ks.ec_private_key = ec_private_key.to_vec();

        if let Some(raw) = bls_private_key {
            match BlsSecretKey::from_bytes(raw) {
                Ok(sk) => {
                    ks.bls_public_key = sk.public_key()?.to_vec();
                    ks.bls_pop = sk.prove_possession()?.to_vec();
                    ks.bls_private_key = sk.as_bytes().to_vec();
                    ks.node_id = node_id_from_bls(&ks.bls_public_key);
                }
                Err(e) => tracing::warn!(name = %name, error = %e, "ignoring unusable BLS key"),
            }
        }
        Ok(ks)
    }

    /// Whether any private key material is present.
    pub fn has_private_keys(&self) -> bool {
        !(self.ec_private_key.is_empty()
            && self.bls_private_key.is_empty()
            && self.ringtail_private_key.is_empty()
            && self.mldsa_private_key.is_empty())
    }

    /// Returns the derivation provenance, if this set was freshly derived.
    pub fn provenance(&self) -> Option<DerivationProvenance> {
        self.provenance
    }

    /// Short fingerprint of the EC and BLS private keys:
    /// `hex(SHA256(ec_priv ‖ bls_priv)[..8])`.
    ///
    /// # Errors
    ///
    /// Returns [`KeycoreError::CryptoError`] if the EC private key is
    /// absent.
    pub fn checksum(&self) -> Result<String> {
        if self.ec_private_key.is_empty() {
            return Err(KeycoreError::CryptoError {
                reason: format!("key set '{}' has no private key to fingerprint", self.name),
            });
        }
        let mut buf = Zeroizing::new(Vec::with_capacity(64));
        buf.extend_from_slice(&self.ec_private_key);
        buf.extend_from_slice(&self.bls_private_key);
        Ok(hex::encode(&sha256(&buf)[..8]))
    }

    /// Copies the public half into a new set; private fields empty.
    pub fn public_copy(&self) -> Self {
        let mut ks = Self::empty(&self.name);
        ks.account_index = self.account_index;
        ks.ec_public_key = self.ec_public_key.clone();
        ks.ec_address = self.ec_address.clone();
        ks.bls_public_key = self.bls_public_key.clone();
        ks.bls_pop = self.bls_pop.clone();
        ks.ringtail_public_key = self.ringtail_public_key.clone();
        ks.mldsa_public_key = self.mldsa_public_key.clone();
        ks.node_id = self.node_id.clone();
        ks
    }

    fn require(&self, key: &[u8], algorithm: SignAlgorithm) -> Result<()> {
        if key.is_empty() {
            return Err(KeycoreError::CryptoError {
                reason: format!("key set '{}' has no {algorithm} private key", self.name),
            });
        }
        Ok(())
    }

    /// Signs `request` with the key selected by `request.algorithm`.
    ///
    /// | Algorithm   | Signs       | Signature              | Address     |
    /// |-------------|-------------|------------------------|-------------|
    /// | secp256k1   | `data_hash` | 65-byte `r ‖ s ‖ v`    | EC address  |
    /// | BLS         | `data`      | 96-byte G2 point       | node ID     |
    /// | Ringtail    | `data_hash` | 65-byte `r ‖ s ‖ v`    | empty       |
    /// | ML-DSA-65   | `data`      | encoded ML-DSA sig     | empty       |
    pub fn sign(&self, request: &SignRequest) -> Result<SignResponse> {
        match request.algorithm {
            SignAlgorithm::Secp256k1 => {
                self.require(&self.ec_private_key, request.algorithm)?;
                Ok(SignResponse {
                    signature: secp256k1::sign_digest(&self.ec_private_key, &request.data_hash)?,
                    public_key: self.ec_public_key.clone(),
                    address: self.ec_address.clone(),
                })
            }
            SignAlgorithm::Bls => {
                self.require(&self.bls_private_key, request.algorithm)?;
                let sk = BlsSecretKey::from_bytes(&self.bls_private_key)?;
                Ok(SignResponse {
                    signature: sk.sign(&request.data)?.to_vec(),
                    public_key: self.bls_public_key.clone(),
                    address: self.node_id.clone(),
                })
            }
            SignAlgorithm::Ringtail => {
                self.require(&self.ringtail_private_key, request.algorithm)?;
                Ok(SignResponse {
                    signature: secp256k1::sign_digest(&self.ringtail_private_key, &request.data_hash)?,
                    public_key: self.ringtail_public_key.clone(),
                    address: String::new(),
                })
            }
            SignAlgorithm::MlDsa => {
                self.require(&self.mldsa_private_key, request.algorithm)?;
                Ok(SignResponse {
                    signature: mldsa::sign(&self.mldsa_private_key, &request.data)?,
                    public_key: self.mldsa_public_key.clone(),
                    address: String::new(),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Canonical encoding
    // -----------------------------------------------------------------------

    /// Serializes the key set (without the mnemonic) to canonical JSON
    /// with hex-encoded key fields.
    pub fn to_canonical_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        let record = KeySetRecord {
            name: self.name.clone(),
            account_index: self.account_index,
            ec_private_key: hex::encode(&self.ec_private_key),
            ec_public_key: hex::encode(&self.ec_public_key),
            ec_address: self.ec_address.clone(),
            bls_private_key: hex::encode(&self.bls_private_key),
            bls_public_key: hex::encode(&self.bls_public_key),
            bls_pop: hex::encode(&self.bls_pop),
            ringtail_private_key: hex::encode(&self.ringtail_private_key),
            ringtail_public_key: hex::encode(&self.ringtail_public_key),
            mldsa_private_key: hex::encode(&self.mldsa_private_key),
            mldsa_public_key: hex::encode(&self.mldsa_public_key),
            node_id: self.node_id.clone(),
        };
        serde_json::to_vec(&record)
            .map(Zeroizing::new)
            .map_err(|e| KeycoreError::SerializationError {
                reason: format!("failed to encode key set '{}': {e}", self.name),
            })
    }

    /// Parses the encoding produced by [`to_canonical_bytes`](Self::to_canonical_bytes).
    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        let record: KeySetRecord = serde_json::from_slice(bytes).map_err(|e| KeycoreError::SerializationError {
            reason: format!("failed to decode key set: {e}"),
        })?;

        let decode = |field: &str, value: &str| -> Result<Vec<u8>> {
            hex::decode(value).map_err(|e| KeycoreError::SerializationError {
                reason: format!("invalid hex in key set field {field}: {e}"),
            })
        };

        let mut ks = Self::empty(&record.name);
        ks.account_index = record.account_index;
        ks.ec_private_key = decode("ec_private_key", &record.ec_private_key)?;
        ks.ec_public_key = decode("ec_public_key", &record.ec_public_key)?;
        ks.ec_address = record.ec_address.clone();
        ks.bls_private_key = decode("bls_private_key", &record.bls_private_key)?;
        ks.bls_public_key = decode("bls_public_key", &record.bls_public_key)?;
        ks.bls_pop = decode("bls_pop", &record.bls_pop)?;
        ks.ringtail_private_key = decode("ringtail_private_key", &record.ringtail_private_key)?;
        ks.ringtail_public_key = decode("ringtail_public_key", &record.ringtail_public_key)?;
        ks.mldsa_private_key = decode("mldsa_private_key", &record.mldsa_private_key)?;
        ks.mldsa_public_key = decode("mldsa_public_key", &record.mldsa_public_key)?;
        ks.node_id = record.node_id.clone();
        Ok(ks)
    }
}

impl fmt::Debug for HdKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdKeySet")
            .field("name", &self.name)
            .field("account_index", &self.account_index)
            .field("ec_address", &self.ec_address)
            .field("node_id", &self.node_id)
            .field("has_private_keys", &self.has_private_keys())
            .finish_non_exhaustive()
    }
}

/// On-the-wire form of [`HdKeySet`]; zeroized on drop.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct KeySetRecord {
    name: String,
    #[serde(default)]
    account_index: u32,
    ec_private_key: String,
    ec_public_key: String,
    ec_address: String,
    bls_private_key: String,
    bls_public_key: String,
    bls_pop: String,
    ringtail_private_key: String,
    ringtail_public_key: String,
    mldsa_private_key: String,
    mldsa_public_key: String,
    node_id: String,
}

/// Verifies a signature produced by [`HdKeySet::sign`].
pub fn verify_signature(algorithm: SignAlgorithm, public_key: &[u8], request: &SignRequest, signature: &[u8]) -> bool {
    match algorithm {
        SignAlgorithm::Secp256k1 | SignAlgorithm::Ringtail => {
            secp256k1::verify_digest(public_key, &request.data_hash, signature)
        }
        SignAlgorithm::Bls => bls::verify(public_key, &request.data, signature),
        SignAlgorithm::MlDsa => mldsa::verify(public_key, &request.data, signature),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keycore_types::SignKind;

    const ABANDON_ART: &str = "abandon abandon abandon abandon abandon abandon \
                               abandon abandon abandon abandon abandon abandon \
                               abandon abandon abandon abandon abandon abandon \
                               abandon abandon abandon abandon abandon art";

    #[test]
    fn derivation_is_reproducible() -> std::result::Result<(), KeycoreError> {
        let a = derive_all("node", ABANDON_ART)?;
        let b = derive_all("node", ABANDON_ART)?;
        assert_eq!(*a.to_canonical_bytes()?, *b.to_canonical_bytes()?);
        assert_eq!(
            a.provenance(),
            Some(DerivationProvenance {
                bls: KeyProvenance::Direct,
                mldsa: KeyProvenance::Direct,
            })
        );
        Ok(())
    }

    #[test]
    fn domains_are_separated() -> std::result::Result<(), KeycoreError> {
        let ks = derive_all("node", ABANDON_ART)?;
        let keys = [
            &ks.ec_private_key,
            &ks.bls_private_key,
            &ks.ringtail_private_key,
            &ks.mldsa_private_key,
        ];
        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                assert_ne!(keys[i], keys[j]);
            }
        }
        assert_ne!(ks.ec_public_key, ks.ringtail_public_key);
        Ok(())
    }

    #[test]
    fn account_index_changes_every_key() -> std::result::Result<(), KeycoreError> {
        let a0 = derive_all_with_account("node", ABANDON_ART, 0)?;
        let a1 = derive_all_with_account("node", ABANDON_ART, 1)?;
        assert_ne!(a0.ec_private_key, a1.ec_private_key);
        assert_ne!(a0.bls_private_key, a1.bls_private_key);
        assert_ne!(a0.node_id, a1.node_id);
        assert_eq!(a1.account_index, 1);
        Ok(())
    }

    #[test]
    fn invalid_mnemonic_rejected() {
        assert!(matches!(
            derive_all("node", "abandon abandon abandon"),
            Err(KeycoreError::InvalidMnemonic { .. })
        ));
    }

    #[test]
    fn node_id_and_pop_are_consistent() -> std::result::Result<(), KeycoreError> {
        let ks = derive_all("node", ABANDON_ART)?;
        assert!(ks.node_id.starts_with("NodeID-"));
        assert_eq!(ks.node_id.len(), "NodeID-".len() + 40);
        assert_eq!(ks.node_id, node_id_from_bls(&ks.bls_public_key));
        assert!(bls::verify_possession(&ks.bls_public_key, &ks.bls_pop));
        assert_eq!(ks.ec_address, secp256k1::address(&ks.ec_public_key)?);
        Ok(())
    }

    #[test]
    fn every_algorithm_signs_and_verifies() -> std::result::Result<(), KeycoreError> {
        let ks = derive_all("node", ABANDON_ART)?;
        let data = b"payload".to_vec();
        let hash = sha256(&data);
        for algorithm in [
            SignAlgorithm::Secp256k1,
            SignAlgorithm::Bls,
            SignAlgorithm::Ringtail,
            SignAlgorithm::MlDsa,
        ] {
            let req = SignRequest::new(SignKind::Message, data.clone(), hash).with_algorithm(algorithm);
            let resp = ks.sign(&req)?;
            assert!(verify_signature(algorithm, &resp.public_key, &req, &resp.signature));
        }

        let ec = ks.sign(&SignRequest::new(SignKind::Transaction, data.clone(), hash))?;
        assert_eq!(ec.address, ks.ec_address);
        let bls_resp = ks.sign(&SignRequest::new(SignKind::Message, data, hash).with_algorithm(SignAlgorithm::Bls))?;
        assert_eq!(bls_resp.address, ks.node_id);
        Ok(())
    }

    #[test]
    fn canonical_encoding_roundtrip_drops_mnemonic() -> std::result::Result<(), KeycoreError> {
        let ks = derive_all_with_account("node", ABANDON_ART, 3)?;
        assert!(ks.mnemonic.is_some());
        let bytes = ks.to_canonical_bytes()?;
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("abandon"));

        let back = HdKeySet::from_canonical_bytes(&bytes)?;
        assert!(back.mnemonic.is_none());
        assert_eq!(back.account_index, 3);
        assert_eq!(back.ec_private_key, ks.ec_private_key);
        assert_eq!(back.mldsa_public_key, ks.mldsa_public_key);
        assert_eq!(back.checksum()?, ks.checksum()?);
        Ok(())
    }

    #[test]
    fn public_copy_cannot_sign() -> std::result::Result<(), KeycoreError> {
        let ks = derive_all("node", ABANDON_ART)?;
        let public = ks.public_copy();
        assert!(!public.has_private_keys());
        assert_eq!(public.ec_address, ks.ec_address);
        assert!(public.sign(&SignRequest::default()).is_err());
        assert!(public.checksum().is_err());
        Ok(())
    }

    #[test]
    fn from_private_keys_ignores_bad_bls() -> std::result::Result<(), KeycoreError> {
        let ks = HdKeySet::from_private_keys("env", &[0x22u8; 32], Some(&[0xFFu8; 32]))?;
        assert!(ks.bls_public_key.is_empty());
        assert!(ks.ec_address.starts_with("0x"));

        let bls = bls::key_gen(&[5u8; 32])?;
        let with_bls = HdKeySet::from_private_keys("env", &[0x22u8; 32], Some(bls.as_bytes()))?;
        assert!(with_bls.node_id.starts_with("NodeID-"));
        Ok(())
    }

    #[test]
    fn debug_redacts_secrets() -> std::result::Result<(), KeycoreError> {
        let ks = derive_all("node", ABANDON_ART)?;
        let dbg = format!("{ks:?}");
        assert!(!dbg.contains(&hex::encode(&ks.ec_private_key)));
        assert!(!dbg.contains("abandon"));
        Ok(())
    }
}
