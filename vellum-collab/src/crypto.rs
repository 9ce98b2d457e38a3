//! Room-key encryption for transport payloads.
//!
//! One symmetric key per room, shared out-of-band by all participants.
//! Every message gets a fresh random 12-byte IV (AES-256-GCM). The key
//! protects the wire only — never the persisted document.
//!
//! Decryption failure is not an error path: [`RoomKey::open`] returns
//! `None` and the caller degrades the message to `INVALID_RESPONSE`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

/// IV length for AES-GCM.
pub const IV_LEN: usize = 12;

/// Room key length in bytes.
pub const KEY_LEN: usize = 32;

/// The symmetric secret shared by all participants of one room.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomKey {
    bytes: [u8; KEY_LEN],
}

impl std::fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RoomKey(..)")
    }
}

/// An encrypted message: `(initializationVector, ciphertext)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

/// Encryption-side failures. Decryption never errors — it degrades.
#[derive(Debug, Clone)]
pub enum CryptoError {
    EncryptFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EncryptFailed => write!(f, "Encryption failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

impl RoomKey {
    /// Generate a fresh random room key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Encrypt a payload with a fresh random IV.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedMessage, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.bytes));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;

        Ok(SealedMessage { iv, ciphertext })
    }

    /// Decrypt a payload. Any failure — wrong key, short IV, tampered or
    /// truncated ciphertext — yields `None`.
    pub fn open(&self, iv: &[u8], ciphertext: &[u8]) -> Option<Vec<u8>> {
        if iv.len() != IV_LEN {
            return None;
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.bytes));
        cipher.decrypt(Nonce::from_slice(iv), ciphertext).ok()
    }

    /// Seal into a single blob: IV ‖ ciphertext. Used for asset storage.
    pub fn seal_blob(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let sealed = self.seal(plaintext)?;
        let mut blob = Vec::with_capacity(IV_LEN + sealed.ciphertext.len());
        blob.extend_from_slice(&sealed.iv);
        blob.extend_from_slice(&sealed.ciphertext);
        Ok(blob)
    }

    /// Open an IV-prefixed blob.
    pub fn open_blob(&self, blob: &[u8]) -> Option<Vec<u8>> {
        if blob.len() < IV_LEN {
            return None;
        }
        self.open(&blob[..IV_LEN], &blob[IV_LEN..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = RoomKey::generate();
        let sealed = key.seal(b"scene update").unwrap();
        assert_eq!(key.open(&sealed.iv, &sealed.ciphertext).unwrap(), b"scene update");
    }

    #[test]
    fn test_fresh_iv_per_message() {
        let key = RoomKey::generate();
        let a = key.seal(b"same").unwrap();
        let b = key.seal(b"same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_degrades_to_none() {
        let key = RoomKey::generate();
        let mut sealed = key.seal(b"payload").unwrap();
        sealed.ciphertext[0] ^= 0xFF;
        assert!(key.open(&sealed.iv, &sealed.ciphertext).is_none());
    }

    #[test]
    fn test_wrong_key_degrades_to_none() {
        let sealed = RoomKey::generate().seal(b"payload").unwrap();
        assert!(RoomKey::generate().open(&sealed.iv, &sealed.ciphertext).is_none());
    }

    #[test]
    fn test_bad_iv_length_degrades_to_none() {
        let key = RoomKey::generate();
        let sealed = key.seal(b"payload").unwrap();
        assert!(key.open(&sealed.iv[..4], &sealed.ciphertext).is_none());
    }

    #[test]
    fn test_blob_roundtrip_and_truncation() {
        let key = RoomKey::generate();
        let blob = key.seal_blob(b"asset bytes").unwrap();
        assert_eq!(key.open_blob(&blob).unwrap(), b"asset bytes");
        assert!(key.open_blob(&blob[..IV_LEN - 1]).is_none());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = RoomKey::from_bytes([7u8; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "RoomKey(..)");
    }
}
