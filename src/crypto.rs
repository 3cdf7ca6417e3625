//! At-rest protection for stored hook credentials (AES-256-GCM).
//!
//! Sealed values are `0x01 || nonce || ciphertext+tag`, bound to the hook's
//! instance id through the AAD. Anything not starting with the version byte
//! is a value written before a key was configured and reads back verbatim.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_SEALED_LEN: usize = 1 + NONCE_LEN + TAG_LEN;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("stored credential is encrypted but no key is configured")]
    MissingKey,
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("stored credential is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CryptoKey(Vec<u8>);

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(bytes.len()));
        }
        Ok(Self(bytes))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey([REDACTED])")
    }
}

pub fn is_sealed(value: &[u8]) -> bool {
    value.len() >= MIN_SEALED_LEN && value[0] == VERSION_ENCRYPTED
}

pub fn encrypt_bytes(key: &CryptoKey, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = key
        .cipher()
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut sealed = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
    sealed.push(VERSION_ENCRYPTED);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

pub fn decrypt_bytes(key: &CryptoKey, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.first() != Some(&VERSION_ENCRYPTED) {
        return Ok(sealed.to_vec());
    }
    if sealed.len() < MIN_SEALED_LEN {
        return Err(CryptoError::InvalidFormat);
    }

    let (nonce, ciphertext) = sealed[1..].split_at(NONCE_LEN);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Seals and opens credential strings, with or without a configured key.
#[derive(Debug, Clone, Default)]
pub struct CredentialCipher {
    key: Option<CryptoKey>,
}

impl CredentialCipher {
    pub fn new(key: Option<CryptoKey>) -> Self {
        Self { key }
    }

    pub fn from_key_bytes(bytes: Option<Vec<u8>>) -> Result<Self, CryptoError> {
        Ok(Self::new(bytes.map(CryptoKey::new).transpose()?))
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn seal(&self, aad: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
        match &self.key {
            Some(key) => encrypt_bytes(key, aad.as_bytes(), value.as_bytes()),
            None => Ok(value.as_bytes().to_vec()),
        }
    }

    pub fn open(&self, aad: &str, stored: &[u8]) -> Result<String, CryptoError> {
        let bytes = match (&self.key, is_sealed(stored)) {
            (Some(key), true) => decrypt_bytes(key, aad.as_bytes(), stored)?,
            (None, true) => return Err(CryptoError::MissingKey),
            (_, false) => stored.to_vec(),
        };
        String::from_utf8(bytes).map_err(|_| CryptoError::InvalidUtf8)
    }
}
