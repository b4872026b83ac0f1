pub mod crypto;
pub mod errors;
pub mod models;
pub mod repository;

pub use crypto::{CredentialCrypto, EncryptedSecret, EncryptionAlgorithm, EncryptionKey};
pub use errors::{Result, VaultError};
pub use models::{
    CredentialHeader, CredentialMetadata, CredentialRecord, CredentialStatus, CredentialType,
    EncryptionMetadata, RotationPolicy, SecretPayload,
};
pub use repository::CredentialStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_encryption_flow() {
        let salt = CredentialCrypto::generate_salt();
        let key = EncryptionKey::derive_from_secret(
            "vault-master-secret",
            &salt,
            crypto::PBKDF2_DEFAULT_ITERATIONS,
        )
        .unwrap();
        let crypto = CredentialCrypto::new(EncryptionAlgorithm::Aes256Gcm);

        let plaintext = b"member-77:s3cret";

        let encrypted = crypto.encrypt(&key, plaintext).unwrap();
        assert_ne!(encrypted.ciphertext, plaintext);

        let decrypted = crypto.decrypt(&key, &encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_master_secret_fails() {
        let salt = CredentialCrypto::generate_salt();
        let key1 = EncryptionKey::derive_from_secret(
            "right-secret",
            &salt,
            crypto::PBKDF2_DEFAULT_ITERATIONS,
        )
        .unwrap();
        let key2 = EncryptionKey::derive_from_secret(
            "wrong-secret",
            &salt,
            crypto::PBKDF2_DEFAULT_ITERATIONS,
        )
        .unwrap();
        let crypto = CredentialCrypto::new(EncryptionAlgorithm::Aes256Gcm);

        let encrypted = crypto.encrypt(&key1, b"api key material").unwrap();
        assert!(crypto.decrypt(&key2, &encrypted).is_err());
    }
}
