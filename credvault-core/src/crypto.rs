use aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce as AesNonce};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use ring::pbkdf2;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{Result, VaultError};

pub const KEY_SIZE: usize = 32; // 256 bits
pub const SALT_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// Floor below which PBKDF2 offers too little stretching for stored
/// credentials.
pub const PBKDF2_MIN_ITERATIONS: u32 = 100_000;
pub const PBKDF2_DEFAULT_ITERATIONS: u32 = 120_000;

/// Secrets are operational credentials, not bulk payloads.
pub const MAX_PLAINTEXT_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_SIZE],
}

impl EncryptionKey {
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(VaultError::Encryption(format!(
                "Invalid key size: expected {}, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Derives a per-record key from the vault master secret with
    /// PBKDF2-HMAC-SHA256. The salt must be freshly generated per record.
    pub fn derive_from_secret(master_secret: &str, salt: &[u8], iterations: u32) -> Result<Self> {
        if master_secret.is_empty() {
            return Err(VaultError::KeyDerivation(
                "master secret must not be empty".to_string(),
            ));
        }

        if salt.len() != SALT_SIZE {
            return Err(VaultError::KeyDerivation(format!(
                "Invalid salt size: expected {}, got {}",
                SALT_SIZE,
                salt.len()
            )));
        }

        if iterations < PBKDF2_MIN_ITERATIONS {
            return Err(VaultError::KeyDerivation(format!(
                "Iteration count {} below minimum {}",
                iterations, PBKDF2_MIN_ITERATIONS
            )));
        }

        let iterations = NonZeroU32::new(iterations)
            .ok_or_else(|| VaultError::KeyDerivation("iteration count must be non-zero".to_string()))?;

        let mut key = [0u8; KEY_SIZE];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            master_secret.as_bytes(),
            &mut key,
        );

        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl Default for EncryptionAlgorithm {
    fn default() -> Self {
        EncryptionAlgorithm::Aes256Gcm
    }
}

/// AEAD output with the authentication tag detached from the ciphertext,
/// so the two can be stored in separate record fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedSecret {
    pub algorithm: EncryptionAlgorithm,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

pub struct CredentialCrypto {
    algorithm: EncryptionAlgorithm,
}

impl CredentialCrypto {
    pub fn new(algorithm: EncryptionAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> EncryptionAlgorithm {
        self.algorithm
    }

    pub fn encrypt(&self, key: &EncryptionKey, plaintext: &[u8]) -> Result<EncryptedSecret> {
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(VaultError::Encryption(format!(
                "Plaintext of {} bytes exceeds maximum {}",
                plaintext.len(),
                MAX_PLAINTEXT_SIZE
            )));
        }

        match self.algorithm {
            EncryptionAlgorithm::Aes256Gcm => self.encrypt_aes_gcm(key, plaintext),
            EncryptionAlgorithm::ChaCha20Poly1305 => self.encrypt_chacha20poly1305(key, plaintext),
        }
    }

    /// Any failure on the decrypt path is an integrity failure: a tampered
    /// tag, ciphertext, nonce, or metadata must never yield plaintext.
    pub fn decrypt(&self, key: &EncryptionKey, encrypted: &EncryptedSecret) -> Result<Vec<u8>> {
        if encrypted.algorithm != self.algorithm
            || encrypted.nonce.len() != NONCE_SIZE
            || encrypted.tag.len() != TAG_SIZE
        {
            return Err(VaultError::Integrity);
        }

        match self.algorithm {
            EncryptionAlgorithm::Aes256Gcm => self.decrypt_aes_gcm(key, encrypted),
            EncryptionAlgorithm::ChaCha20Poly1305 => self.decrypt_chacha20poly1305(key, encrypted),
        }
    }

    fn encrypt_aes_gcm(&self, key: &EncryptionKey, plaintext: &[u8]) -> Result<EncryptedSecret> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut combined = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        let tag = combined.split_off(combined.len() - TAG_SIZE);

        Ok(EncryptedSecret {
            algorithm: EncryptionAlgorithm::Aes256Gcm,
            nonce: nonce.to_vec(),
            ciphertext: combined,
            tag,
        })
    }

    fn decrypt_aes_gcm(&self, key: &EncryptionKey, encrypted: &EncryptedSecret) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| VaultError::Integrity)?;

        let nonce = AesNonce::from_slice(&encrypted.nonce);
        let mut combined =
            Vec::with_capacity(encrypted.ciphertext.len() + encrypted.tag.len());
        combined.extend_from_slice(&encrypted.ciphertext);
        combined.extend_from_slice(&encrypted.tag);

        cipher
            .decrypt(nonce, combined.as_slice())
            .map_err(|_| VaultError::Integrity)
    }

    fn encrypt_chacha20poly1305(
        &self,
        key: &EncryptionKey,
        plaintext: &[u8],
    ) -> Result<EncryptedSecret> {
        let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let mut combined = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| VaultError::Encryption(e.to_string()))?;
        let tag = combined.split_off(combined.len() - TAG_SIZE);

        Ok(EncryptedSecret {
            algorithm: EncryptionAlgorithm::ChaCha20Poly1305,
            nonce: nonce.to_vec(),
            ciphertext: combined,
            tag,
        })
    }

    fn decrypt_chacha20poly1305(
        &self,
        key: &EncryptionKey,
        encrypted: &EncryptedSecret,
    ) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|_| VaultError::Integrity)?;

        let nonce = chacha20poly1305::Nonce::from_slice(&encrypted.nonce);
        let mut combined =
            Vec::with_capacity(encrypted.ciphertext.len() + encrypted.tag.len());
        combined.extend_from_slice(&encrypted.ciphertext);
        combined.extend_from_slice(&encrypted.tag);

        cipher
            .decrypt(nonce, combined.as_slice())
            .map_err(|_| VaultError::Integrity)
    }

    pub fn generate_salt() -> Vec<u8> {
        let mut salt = vec![0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        salt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let key1 = EncryptionKey::generate();
        let key2 = EncryptionKey::generate();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let salt = CredentialCrypto::generate_salt();

        let key1 = EncryptionKey::derive_from_secret("master", &salt, PBKDF2_MIN_ITERATIONS)
            .unwrap();
        let key2 = EncryptionKey::derive_from_secret("master", &salt, PBKDF2_MIN_ITERATIONS)
            .unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_derivation_rejects_bad_parameters() {
        let salt = CredentialCrypto::generate_salt();

        assert!(matches!(
            EncryptionKey::derive_from_secret("", &salt, PBKDF2_MIN_ITERATIONS),
            Err(VaultError::KeyDerivation(_))
        ));
        assert!(matches!(
            EncryptionKey::derive_from_secret("master", &salt[..8], PBKDF2_MIN_ITERATIONS),
            Err(VaultError::KeyDerivation(_))
        ));
        assert!(matches!(
            EncryptionKey::derive_from_secret("master", &salt, PBKDF2_MIN_ITERATIONS - 1),
            Err(VaultError::KeyDerivation(_))
        ));
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        for algorithm in [
            EncryptionAlgorithm::Aes256Gcm,
            EncryptionAlgorithm::ChaCha20Poly1305,
        ] {
            let key = EncryptionKey::generate();
            let crypto = CredentialCrypto::new(algorithm);
            let plaintext = b"svc-account:hunter2";

            let encrypted = crypto.encrypt(&key, plaintext).unwrap();
            assert_ne!(encrypted.ciphertext, plaintext);
            assert_eq!(encrypted.nonce.len(), NONCE_SIZE);
            assert_eq!(encrypted.tag.len(), TAG_SIZE);

            let decrypted = crypto.decrypt(&key, &encrypted).unwrap();
            assert_eq!(decrypted, plaintext);
        }
    }

    #[test]
    fn test_nonce_unique_per_call() {
        let key = EncryptionKey::generate();
        let crypto = CredentialCrypto::new(EncryptionAlgorithm::Aes256Gcm);

        let first = crypto.encrypt(&key, b"same input").unwrap();
        let second = crypto.encrypt(&key, b"same input").unwrap();

        assert_ne!(first.nonce, second.nonce);
    }

    #[test]
    fn test_wrong_key_fails_with_integrity() {
        let key1 = EncryptionKey::generate();
        let key2 = EncryptionKey::generate();
        let crypto = CredentialCrypto::new(EncryptionAlgorithm::Aes256Gcm);

        let encrypted = crypto.encrypt(&key1, b"secret").unwrap();
        let result = crypto.decrypt(&key2, &encrypted);

        assert!(matches!(result, Err(VaultError::Integrity)));
    }

    #[test]
    fn test_tampered_ciphertext_fails_with_integrity() {
        let key = EncryptionKey::generate();
        let crypto = CredentialCrypto::new(EncryptionAlgorithm::Aes256Gcm);

        let mut encrypted = crypto.encrypt(&key, b"banking-network login").unwrap();
        encrypted.ciphertext[0] ^= 0x01;

        assert!(matches!(
            crypto.decrypt(&key, &encrypted),
            Err(VaultError::Integrity)
        ));
    }

    #[test]
    fn test_tampered_tag_fails_with_integrity() {
        let key = EncryptionKey::generate();
        let crypto = CredentialCrypto::new(EncryptionAlgorithm::ChaCha20Poly1305);

        let mut encrypted = crypto.encrypt(&key, b"api-key payload").unwrap();
        encrypted.tag[0] ^= 0x01;

        assert!(matches!(
            crypto.decrypt(&key, &encrypted),
            Err(VaultError::Integrity)
        ));
    }

    #[test]
    fn test_algorithm_mismatch_fails_with_integrity() {
        let key = EncryptionKey::generate();
        let aes = CredentialCrypto::new(EncryptionAlgorithm::Aes256Gcm);
        let chacha = CredentialCrypto::new(EncryptionAlgorithm::ChaCha20Poly1305);

        let encrypted = aes.encrypt(&key, b"secret").unwrap();
        assert!(matches!(
            chacha.decrypt(&key, &encrypted),
            Err(VaultError::Integrity)
        ));
    }

    #[test]
    fn test_oversized_plaintext_rejected() {
        let key = EncryptionKey::generate();
        let crypto = CredentialCrypto::new(EncryptionAlgorithm::Aes256Gcm);
        let oversized = vec![0u8; MAX_PLAINTEXT_SIZE + 1];

        assert!(matches!(
            crypto.encrypt(&key, &oversized),
            Err(VaultError::Encryption(_))
        ));
    }
}
