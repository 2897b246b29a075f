//! Amount encryption key material

use crate::commitment::KEY_SIZE;
use crate::error::CryptoError;
use crate::{Error, Result};
use std::fmt;

/// AES-256 key used for amount encryption
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build from a slice, rejecting anything but 32 bytes
    pub fn from_slice(bytes: &[u8]) -> std::result::Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(key))
    }

    /// Parse a 64-char hex key
    pub fn from_hex(value: &str) -> std::result::Result<Self, CryptoError> {
        let bytes =
            hex::decode(value.trim()).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(***)")
    }
}

/// Where the encryption key comes from
pub trait KeySource {
    /// Load the key
    fn load(&self) -> Result<EncryptionKey>;
}

/// Reads a hex key from an environment variable
#[derive(Debug, Clone)]
pub struct EnvKeySource {
    var: String,
}

impl EnvKeySource {
    /// Source backed by `var`
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl KeySource for EnvKeySource {
    fn load(&self) -> Result<EncryptionKey> {
        let value = std::env::var(&self.var)
            .map_err(|_| Error::Config(format!("{} is not set", self.var)))?;
        Ok(EncryptionKey::from_hex(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hex() {
        let key = EncryptionKey::from_hex(&"ab".repeat(32)).unwrap();
        assert_eq!(key.as_bytes(), &[0xab; 32]);
    }

    #[test]
    fn test_from_hex_wrong_length() {
        assert_eq!(
            EncryptionKey::from_hex(&"ab".repeat(16)).unwrap_err(),
            CryptoError::InvalidKeyLength(16)
        );
        assert!(matches!(
            EncryptionKey::from_hex("zz"),
            Err(CryptoError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_debug_redacted() {
        let key = EncryptionKey::from_bytes([0x42; 32]);
        assert_eq!(format!("{:?}", key), "EncryptionKey(***)");
    }

    #[test]
    fn test_env_source_missing_var() {
        let source = EnvKeySource::new("ANCHOR_TEST_KEY_THAT_IS_NEVER_SET");
        assert!(matches!(source.load(), Err(Error::Config(_))));
    }
}
