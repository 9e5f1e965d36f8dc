//! Cross-module tests for the primitives backends build on.
//!
//! Vectors:
//! - BIP39: all-zero / all-FF entropy, TREZOR seed vector
//! - secp256k1: scalar 1 → well-known Ethereum address
//! - Keystore flow: Argon2id + AES-256-GCM, right and wrong password
//! - Threshold flows: Shamir over mnemonic entropy, ML-KEM share sealing,
//!   trusted-dealer BLS aggregation

use keycore_crypto::aead::{decrypt_aes_gcm, encrypt_aes_gcm, generate_aead_nonce};
use keycore_crypto::bls::{self, SignatureShare};
use keycore_crypto::kdf::{argon2id_derive_key, generate_salt, Argon2Params};
use keycore_crypto::mlkem::{open_share, seal_share, KemKeyPair};
use keycore_crypto::mnemonic::{entropy_to_mnemonic, mnemonic_to_entropy, mnemonic_to_seed};
use keycore_crypto::shamir::{self, Share};
use keycore_crypto::{derive_all, secp256k1, HdKeySet};
use keycore_types::KeycoreError;

const MNEMONIC_A: &str = "abandon abandon abandon abandon abandon abandon \
                          abandon abandon abandon abandon abandon abandon \
                          abandon abandon abandon abandon abandon abandon \
                          abandon abandon abandon abandon abandon art";

const MNEMONIC_B: &str = "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo \
                          zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo vote";

fn light_params() -> Argon2Params {
    Argon2Params {
        m_cost: 256,
        t_cost: 1,
        p_cost: 1,
    }
}

// ===================================================================
// BIP39
// ===================================================================

#[test]
fn bip39_entropy_vectors() -> std::result::Result<(), KeycoreError> {
    assert_eq!(entropy_to_mnemonic(&[0u8; 32])?.as_str(), MNEMONIC_A.split_whitespace().collect::<Vec<_>>().join(" "));
    assert_eq!(entropy_to_mnemonic(&[0xFFu8; 32])?.as_str(), MNEMONIC_B.split_whitespace().collect::<Vec<_>>().join(" "));
    Ok(())
}

#[test]
fn bip39_trezor_seed() -> std::result::Result<(), KeycoreError> {
    let seed = mnemonic_to_seed(MNEMONIC_A, "TREZOR")?;
    assert_eq!(
        hex::encode(seed.as_bytes()),
        "bda85446c68413707090a52022edd26a1c9462295029f2e60cd7c4f2bbd3097170af7a4d73245cafa9c3cca8d561a7c3de6f5d4a10be8ed2a5e608d68f92fcc8"
    );
    Ok(())
}

#[test]
fn different_mnemonics_different_identities() -> std::result::Result<(), KeycoreError> {
    let a = derive_all("a", MNEMONIC_A)?;
    let b = derive_all("b", MNEMONIC_B)?;
    assert_ne!(a.ec_address, b.ec_address);
    assert_ne!(a.node_id, b.node_id);
    assert_ne!(a.mldsa_public_key, b.mldsa_public_key);
    Ok(())
}

// ===================================================================
// secp256k1
// ===================================================================

#[test]
fn secp256k1_generator_address() -> std::result::Result<(), KeycoreError> {
    let mut one = [0u8; 32];
    one[31] = 1;
    let pk = secp256k1::public_key(&one)?;
    assert_eq!(
        hex::encode(&pk),
        "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
    );
    assert_eq!(secp256k1::address(&pk)?, "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");
    Ok(())
}

// ===================================================================
// Keystore encryption
// ===================================================================

#[test]
fn keystore_encrypt_decrypt_with_password() -> std::result::Result<(), KeycoreError> {
    let ks = derive_all("node", MNEMONIC_A)?;
    let plaintext = ks.to_canonical_bytes()?;

    let salt = generate_salt();
    let nonce = generate_aead_nonce();
    let key = argon2id_derive_key(b"pw1", &salt, &light_params())?;
    let ciphertext = encrypt_aes_gcm(key.as_bytes(), &nonce, &plaintext, &[])?;

    let same = argon2id_derive_key(b"pw1", &salt, &light_params())?;
    let decrypted = decrypt_aes_gcm(same.as_bytes(), &nonce, &ciphertext, &[])?;
    let restored = HdKeySet::from_canonical_bytes(&decrypted)?;
    assert_eq!(restored.ec_address, ks.ec_address);

    let wrong = argon2id_derive_key(b"pw2", &salt, &light_params())?;
    assert!(decrypt_aes_gcm(wrong.as_bytes(), &nonce, &ciphertext, &[]).is_err());
    Ok(())
}

// ===================================================================
// Threshold flows
// ===================================================================

/// Mnemonic entropy split 3-of-5; any three sealed shares rebuild the
/// same key set.
#[test]
fn shamir_entropy_rebuilds_key_set() -> std::result::Result<(), KeycoreError> {
    let original = derive_all("node", MNEMONIC_B)?;
    let entropy = mnemonic_to_entropy(MNEMONIC_B)?;

    let validators: Vec<(String, KemKeyPair)> = (1..=5)
        .map(|i| (format!("validator-{i}"), KemKeyPair::generate()))
        .collect();

    let shares = shamir::split(entropy.as_bytes(), 3, 5)?;
    let sealed: Vec<_> = shares
        .iter()
        .zip(&validators)
        .map(|(share, (id, kp))| seal_share(&kp.public_key, id, &share.to_bytes()))
        .collect::<Result<_, _>>()?;

    // Validators 1 and 3 are gone.
    let mut recovered = Vec::new();
    for i in [1usize, 3, 4] {
        let (id, kp) = &validators[i];
        let opened = open_share(kp.secret_key_bytes(), id, &sealed[i])?;
        recovered.push(Share::from_bytes(&opened)?);
    }

    // Only K-1 shares: refused.
    assert!(shamir::reconstruct(&recovered[..2], 3).is_err());

    let secret = shamir::reconstruct(&recovered, 3)?;
    let mnemonic = entropy_to_mnemonic(&secret)?;
    let rebuilt = derive_all("node", mnemonic.as_str())?;
    assert_eq!(rebuilt.ec_address, original.ec_address);
    assert_eq!(rebuilt.node_id, original.node_id);
    Ok(())
}

#[test]
fn dealt_bls_key_signs_through_encoded_shares() -> std::result::Result<(), KeycoreError> {
    let dealt = bls::deal(3, 5)?;
    let message = b"checkpoint 1000";

    let encoded: Vec<Vec<u8>> = dealt
        .shares
        .iter()
        .rev()
        .map(|s| bls::sign_share(s, message).map(|p| p.to_bytes()))
        .collect::<Result<_, _>>()?;
    let parsed: Vec<SignatureShare> = encoded
        .iter()
        .map(|b| SignatureShare::from_bytes(b))
        .collect::<Result<_, _>>()?;

    let sig = bls::aggregate(
        &parsed,
        3,
        &dealt.group_public_key,
        Some(&dealt.share_public_keys),
        message,
    )?;
    assert!(bls::verify(&dealt.group_public_key, message, &sig));
    assert!(!bls::verify(&dealt.group_public_key, b"checkpoint 1001", &sig));
    Ok(())
}
