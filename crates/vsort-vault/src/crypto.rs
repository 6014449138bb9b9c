//! AES-256-GCM helpers.
//!
//! Every call to [`encrypt`] draws a fresh random 96-bit nonce from the OS
//! RNG. Callers never supply a nonce, so a key/nonce pair is never reused.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::{Result, VaultError};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

pub type VaultKey = [u8; KEY_LEN];
pub type VaultNonce = [u8; NONCE_LEN];

/// Fresh random 256-bit key.
pub fn generate_key() -> VaultKey {
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&Aes256Gcm::generate_key(OsRng));
    key
}

/// Encrypt with a freshly generated nonce. Returns `(nonce, ciphertext)`.
pub fn encrypt(key: &VaultKey, plaintext: &[u8]) -> Result<(VaultNonce, Vec<u8>)> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| VaultError::Encrypt)?;
    let mut out = [0u8; NONCE_LEN];
    out.copy_from_slice(&nonce);
    Ok((out, ciphertext))
}

/// Authenticated decryption. Any tag mismatch is an error and no bytes
/// are returned.
pub fn decrypt(key: &VaultKey, nonce: &VaultNonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| VaultError::Decrypt)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn parse_key(key_hex: &str) -> Result<VaultKey> {
    let mut key = [0u8; KEY_LEN];
    hex::decode_to_slice(key_hex.trim(), &mut key)
        .map_err(|e| VaultError::InvalidKey(format!("key: {}", e)))?;
    Ok(key)
}

pub fn parse_nonce(nonce_hex: &str) -> Result<VaultNonce> {
    let mut nonce = [0u8; NONCE_LEN];
    hex::decode_to_slice(nonce_hex.trim(), &mut nonce)
        .map_err(|e| VaultError::InvalidKey(format!("nonce: {}", e)))?;
    Ok(nonce)
}
