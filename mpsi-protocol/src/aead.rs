//! AES-256-GCM sealing under single-use keys.
//!
//! The nonce is derived from the key (`SHA-256(key)[..12]`), so every key
//! must seal at most one plaintext. All keys used by the protocol are
//! derived per slot, which keeps that precondition.

use crate::error::{PsiError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
/// Bytes added to every plaintext by the GCM tag.
pub const TAG_SIZE: usize = 16;

pub type AeadKey = [u8; KEY_SIZE];

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// `SHA-256(material)`.
pub fn derive_key(material: &[u8]) -> AeadKey {
    sha256(&[material])
}

/// `SHA-256(base || slot)`, one key per slot of a map.
pub fn derive_slot_key(base: &AeadKey, slot: u64) -> AeadKey {
    sha256(&[base, &slot.to_be_bytes()])
}

fn cipher_and_nonce(key: &AeadKey) -> (Aes256Gcm, [u8; NONCE_SIZE]) {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&sha256(&[key])[..NONCE_SIZE]);
    (cipher, nonce)
}

pub fn seal(plaintext: &[u8], key: &AeadKey) -> Result<Vec<u8>> {
    let (cipher, nonce) = cipher_and_nonce(key);
    cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| PsiError::CryptoError(format!("AES-GCM seal failed: {e}")))
}

/// # Errors
/// Returns `PsiError::AuthenticationFailed` on a wrong key or a modified
/// ciphertext.
pub fn open(ciphertext: &[u8], key: &AeadKey) -> Result<Vec<u8>> {
    let (cipher, nonce) = cipher_and_nonce(key);
    cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .map_err(|_| PsiError::AuthenticationFailed)
}
