//! Authenticated encryption for artifact ids and payloads, plus PKCE and webhook digests.
//!
//! Every artifact kind owns its own [`CryptoBox`], keyed by the SHA-256 of a
//! configured secret. Sealed values are `base64url(nonce || ciphertext || tag)`
//! without padding, so they can travel in query strings and form fields unchanged.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine as _, engine::general_purpose};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::ArtifactSecret;
use crate::errors::CryptoError;

const NONCE_SIZE: usize = 12;

type HmacSha256 = Hmac<Sha256>;

/// Symmetric sealing box for one artifact kind
#[derive(Clone)]
pub struct CryptoBox {
    cipher: Aes256Gcm,
}

impl CryptoBox {
    /// Derive the AES-256 key from a configured secret
    pub fn new(secret: &ArtifactSecret) -> Self {
        Self::from_secret(secret.expose())
    }

    pub fn from_secret(secret: &str) -> Self {
        let key = Sha256::digest(secret.as_bytes());
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Seal `plaintext` under a fresh random nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Open a sealed value. Malformed input, a foreign key and tampering all
    /// produce the same [`CryptoError::DecryptionFailed`].
    pub fn decrypt(&self, sealed: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = general_purpose::URL_SAFE_NO_PAD
            .decode(sealed.trim())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        if raw.len() <= NONCE_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_str(&self, sealed: &str) -> Result<String, CryptoError> {
        let plaintext = self.decrypt(sealed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoBox")
    }
}

/// SHA-256 digest encoded as base64url without padding (PKCE `S256`)
pub fn sha256_base64url(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// HMAC-SHA256 tag encoded as base64 without padding
pub fn hmac_sha256(text: &str, secret: &str) -> Result<String, CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    mac.update(text.as_bytes());
    Ok(general_purpose::STANDARD_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Compare two secrets without leaking where they differ or their lengths.
///
/// Both sides are MACed under a throwaway key and the tags are checked with
/// `verify_slice`, which compares in constant time.
pub fn secure_eq(expected: &str, provided: &str) -> bool {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    let Ok(mut expected_mac) = <HmacSha256 as Mac>::new_from_slice(&key) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    let expected_tag = expected_mac.finalize().into_bytes();

    let Ok(mut provided_mac) = <HmacSha256 as Mac>::new_from_slice(&key) else {
        return false;
    };
    provided_mac.update(provided.as_bytes());
    provided_mac.verify_slice(&expected_tag).is_ok()
}
