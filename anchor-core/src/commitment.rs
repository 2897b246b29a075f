//! Commitment generation and confidential amount encryption
//!
//! This module provides:
//! - Per-record random salts
//! - SHA-256 commitments over `biz_id ++ amount ++ salt`
//! - AES-256-CBC amount encryption with a fresh IV per call
//! - Amount digests for post-decryption integrity checks

use crate::error::CryptoError;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// Salt size in bytes (hex encoded to twice this length)
pub const SALT_SIZE: usize = 16;

/// Generate a fresh salt: 16 random bytes, hex encoded
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compute the commitment for a transaction
///
/// SHA-256 over the plain concatenation of the three inputs, lowercase hex.
pub fn compute_commitment(biz_id: &str, amount: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(biz_id.as_bytes());
    hasher.update(amount.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute a commitment and compare it with `expected`
pub fn verify_commitment(biz_id: &str, amount: &str, salt: &str, expected: &str) -> bool {
    compute_commitment(biz_id, amount, salt).eq_ignore_ascii_case(expected)
}

/// SHA-256 hex of a plaintext amount
pub fn amount_digest(amount: &str) -> String {
    hex::encode(Sha256::digest(amount.as_bytes()))
}

/// Check a decrypted amount against its recorded digest
pub fn verify_amount_digest(amount: &str, expected: &str) -> Result<(), CryptoError> {
    if amount_digest(amount).eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(CryptoError::IntegrityCheck)
    }
}

/// Encrypt an amount with AES-256-CBC
///
/// Output is `hex(IV || ciphertext)`; the IV is random per call.
pub fn encrypt_amount(key: &[u8], plaintext: &str) -> Result<String, CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }

    let mut iv = [0u8; BLOCK_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    let blocks = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut out = Vec::with_capacity(BLOCK_SIZE + blocks.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&blocks);
    Ok(hex::encode(out))
}

/// Decrypt an amount produced by [`encrypt_amount`]
pub fn decrypt_amount(key: &[u8], ciphertext: &str) -> Result<String, CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }

    let raw = hex::decode(ciphertext).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;

    // IV plus at least one block
    if raw.len() < 2 * BLOCK_SIZE || raw.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidBlockSize(raw.len()));
    }

    let (iv, blocks) = raw.split_at(BLOCK_SIZE);
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    let plain = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(blocks)
        .map_err(|_| CryptoError::PaddingError)?;

    String::from_utf8(plain).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}
