//! Property-based tests for commitment invariants
//!
//! - Determinism: same (biz_id, amount, salt) → same commitment
//! - Sensitivity: changing any input changes the commitment
//! - Confidentiality round trip: decrypt(encrypt(x)) == x, with a fresh IV per call
//! - Tamper detection: a flipped ciphertext byte never yields the original amount

use anchor_core::commitment::{
    amount_digest, compute_commitment, decrypt_amount, encrypt_amount, generate_salt,
    verify_amount_digest, verify_commitment, BLOCK_SIZE,
};
use anchor_core::CryptoError;
use proptest::prelude::*;

/// Strategy for business ids
fn biz_id_strategy() -> impl Strategy<Value = String> {
    "TX[0-9]{8,16}"
}

/// Strategy for decimal amounts with up to two fraction digits
fn amount_strategy() -> impl Strategy<Value = String> {
    (1u64..10_000_000_000u64, any::<bool>()).prop_map(|(units, cents)| {
        if cents {
            format!("{}.{:02}", units / 100, units % 100)
        } else {
            units.to_string()
        }
    })
}

/// Strategy for 32-byte keys
fn key_strategy() -> impl Strategy<Value = [u8; 32]> {
    prop::array::uniform32(any::<u8>())
}

proptest! {
    #[test]
    fn prop_commitment_deterministic(biz_id in biz_id_strategy(), amount in amount_strategy(), salt in "[0-9a-f]{32}") {
        let h1 = compute_commitment(&biz_id, &amount, &salt);
        let h2 = compute_commitment(&biz_id, &amount, &salt);
        prop_assert_eq!(&h1, &h2);
        prop_assert_eq!(h1.len(), 64);
        prop_assert!(h1.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        prop_assert!(verify_commitment(&biz_id, &amount, &salt, &h1));
    }

    #[test]
    fn prop_commitment_sensitive_to_amount(biz_id in biz_id_strategy(), a in amount_strategy(), b in amount_strategy()) {
        prop_assume!(a != b);
        let salt = generate_salt();
        prop_assert_ne!(
            compute_commitment(&biz_id, &a, &salt),
            compute_commitment(&biz_id, &b, &salt)
        );
    }

    #[test]
    fn prop_encrypt_decrypt_roundtrip(key in key_strategy(), amount in amount_strategy()) {
        let c1 = encrypt_amount(&key, &amount).unwrap();
        let c2 = encrypt_amount(&key, &amount).unwrap();
        prop_assert_ne!(&c1, &c2);
        prop_assert_eq!(decrypt_amount(&key, &c1).unwrap(), amount.clone());
        prop_assert_eq!(decrypt_amount(&key, &c2).unwrap(), amount);

        let raw_len = c1.len() / 2;
        prop_assert_eq!(raw_len % BLOCK_SIZE, 0);
        prop_assert!(raw_len >= 2 * BLOCK_SIZE);
    }

    #[test]
    fn prop_flipped_byte_detected(key in key_strategy(), amount in amount_strategy(), pos in any::<prop::sample::Index>(), bit in 0u8..8) {
        let cipher = encrypt_amount(&key, &amount).unwrap();
        let mut raw = hex::decode(&cipher).unwrap();
        // only ciphertext blocks, the IV alone can be rewritten undetectably
        let idx = BLOCK_SIZE + pos.index(raw.len() - BLOCK_SIZE);
        raw[idx] ^= 1 << bit;

        let digest = amount_digest(&amount);
        match decrypt_amount(&key, &hex::encode(raw)) {
            Ok(plain) => prop_assert!(verify_amount_digest(&plain, &digest).is_err()),
            Err(e) => prop_assert!(matches!(e, CryptoError::PaddingError | CryptoError::InvalidEncoding(_))),
        }
    }

    #[test]
    fn prop_misaligned_ciphertext_rejected(key in key_strategy(), amount in amount_strategy(), cut in 1usize..BLOCK_SIZE) {
        let cipher = encrypt_amount(&key, &amount).unwrap();
        let raw = hex::decode(&cipher).unwrap();
        let truncated = hex::encode(&raw[..raw.len() - cut]);
        prop_assert_eq!(
            decrypt_amount(&key, &truncated).unwrap_err(),
            CryptoError::InvalidBlockSize(raw.len() - cut)
        );
    }
}
