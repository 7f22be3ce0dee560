//! Optional payload encryption for WebSocket frames.
//!
//! Wire format when sealed: base64(nonce || ciphertext), 12 byte random nonce
//! per message, ChaCha20-Poly1305 with the configured 32 byte key.
use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use crate::config::EncryptionConfig;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("key must be base64 encoded")]
    KeyEncoding(#[from] base64::DecodeError),
    #[error("key must be 32 bytes, got {0}")]
    KeyLength(usize),
    #[error("frame is not valid base64")]
    FrameEncoding,
    #[error("frame is shorter than a nonce")]
    Truncated,
    #[error("frame failed authentication")]
    Authentication,
    #[error("decrypted frame is not UTF-8")]
    NotText,
}

#[derive(Clone)]
pub enum PayloadCipher {
    /// Frames are the JSON text itself
    Plain,
    Sealed(ChaCha20Poly1305),
}

impl fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadCipher::Plain => f.write_str("PayloadCipher::Plain"),
            PayloadCipher::Sealed(_) => f.write_str("PayloadCipher::Sealed"),
        }
    }
}

impl PayloadCipher {
    pub fn from_config(config: &EncryptionConfig) -> Result<Self, CipherError> {
        if !config.enabled {
            return Ok(PayloadCipher::Plain);
        }
        let key = base64::decode(config.key.trim())?;
        Self::from_key(&key)
    }

    pub fn from_key(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_LEN {
            return Err(CipherError::KeyLength(key.len()));
        }
        Ok(PayloadCipher::Sealed(ChaCha20Poly1305::new(Key::from_slice(key))))
    }

    pub fn encrypt(&self, json: &str) -> String {
        match self {
            PayloadCipher::Plain => json.to_string(),
            PayloadCipher::Sealed(cipher) => {
                let mut nonce = [0u8; NONCE_LEN];
                rand::thread_rng().fill_bytes(&mut nonce);
                // Encryption only fails for plaintexts beyond the AEAD size limit
                let sealed = cipher
                    .encrypt(Nonce::from_slice(&nonce), json.as_bytes())
                    .unwrap_or_default();
                let mut frame = Vec::with_capacity(NONCE_LEN + sealed.len());
                frame.extend_from_slice(&nonce);
                frame.extend_from_slice(&sealed);
                base64::encode(frame)
            }
        }
    }

    pub fn decrypt(&self, wire: &str) -> Result<String, CipherError> {
        match self {
            PayloadCipher::Plain => Ok(wire.to_string()),
            PayloadCipher::Sealed(cipher) => {
                let frame = base64::decode(wire.trim()).map_err(|_| CipherError::FrameEncoding)?;
                if frame.len() < NONCE_LEN {
                    return Err(CipherError::Truncated);
                }
                let (nonce, sealed) = frame.split_at(NONCE_LEN);
                let plain = cipher
                    .decrypt(Nonce::from_slice(nonce), sealed)
                    .map_err(|_| CipherError::Authentication)?;
                String::from_utf8(plain).map_err(|_| CipherError::NotText)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed() -> PayloadCipher {
        PayloadCipher::from_key(&[42u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn test_plain_is_identity() {
        let cipher = PayloadCipher::Plain;
        assert_eq!(cipher.encrypt(r#"{"type":"close"}"#), r#"{"type":"close"}"#);
        assert_eq!(cipher.decrypt("anything").unwrap(), "anything");
    }

    #[test]
    fn test_sealed_uses_fresh_nonce() {
        let cipher = sealed();
        let a = cipher.encrypt("hello");
        let b = cipher.encrypt("hello");
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), "hello");
        assert_eq!(cipher.decrypt(&b).unwrap(), "hello");
    }

    #[test]
    fn test_sealed_rejects_tampering() {
        let cipher = sealed();
        let mut frame = base64::decode(cipher.encrypt("hello")).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        assert!(matches!(
            cipher.decrypt(&base64::encode(frame)),
            Err(CipherError::Authentication)
        ));
    }

    #[test]
    fn test_sealed_rejects_short_and_garbage_frames() {
        let cipher = sealed();
        assert!(matches!(cipher.decrypt(&base64::encode([1u8; 4])), Err(CipherError::Truncated)));
        assert!(matches!(cipher.decrypt("%%%"), Err(CipherError::FrameEncoding)));
    }

    #[test]
    fn test_wrong_key_length() {
        assert!(matches!(PayloadCipher::from_key(&[0u8; 16]), Err(CipherError::KeyLength(16))));
    }

    #[test]
    fn test_disabled_config_is_plain() {
        let config = EncryptionConfig { enabled: false, key: String::new() };
        assert!(matches!(PayloadCipher::from_config(&config), Ok(PayloadCipher::Plain)));
    }
}
