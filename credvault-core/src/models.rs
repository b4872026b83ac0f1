use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::crypto::EncryptionAlgorithm;
use crate::errors::{Result, VaultError};

/// Closed set of credential kinds. Each variant carries its own payload
/// validation rule; an open string type is deliberately not accepted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialType {
    ApiKey,
    ServiceAccount,
    BankingLogin,
    DatabaseSecret,
    Other,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialType::ApiKey => "api-key",
            CredentialType::ServiceAccount => "service-account",
            CredentialType::BankingLogin => "banking-login",
            CredentialType::DatabaseSecret => "database-secret",
            CredentialType::Other => "other",
        }
    }

    pub fn validate_payload(&self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(VaultError::Validation(
                "credential payload must not be empty".to_string(),
            ));
        }

        match self {
            CredentialType::ApiKey => {
                let text = std::str::from_utf8(payload).map_err(|_| {
                    VaultError::Validation("API key must be valid UTF-8".to_string())
                })?;
                if text.chars().any(char::is_whitespace) {
                    return Err(VaultError::Validation(
                        "API key must not contain whitespace".to_string(),
                    ));
                }
            }
            CredentialType::ServiceAccount => {
                let value: serde_json::Value =
                    serde_json::from_slice(payload).map_err(|_| {
                        VaultError::Validation(
                            "service account payload must be JSON".to_string(),
                        )
                    })?;
                if !value.is_object() {
                    return Err(VaultError::Validation(
                        "service account payload must be a JSON object".to_string(),
                    ));
                }
            }
            CredentialType::BankingLogin => {
                let text = std::str::from_utf8(payload).map_err(|_| {
                    VaultError::Validation("banking login must be valid UTF-8".to_string())
                })?;
                if !text.contains(':') {
                    return Err(VaultError::Validation(
                        "banking login must use member-id:password form".to_string(),
                    ));
                }
            }
            CredentialType::DatabaseSecret | CredentialType::Other => {}
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RotationPolicy {
    Manual,
    Scheduled,
    OnExpiryOnly,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        RotationPolicy::Manual
    }
}

/// Non-sensitive descriptive fields, displayable without decryption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialMetadata {
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Everything required to decrypt a record's ciphertext. Persisted in the
/// same envelope as the ciphertext, never separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    pub algorithm: EncryptionAlgorithm,
    pub nonce: Vec<u8>,
    pub tag: Vec<u8>,
    pub kdf_salt: Vec<u8>,
    pub kdf_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub credential_type: CredentialType,
    pub ciphertext: Vec<u8>,
    pub encryption: EncryptionMetadata,
    pub metadata: CredentialMetadata,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rotation_policy: RotationPolicy,
    pub last_rotated: DateTime<Utc>,
    pub version: u64,
}

/// Bulk-listing view of a record: everything except the ciphertext and the
/// encryption metadata. Callers fetch by id for payload access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialHeader {
    pub id: Uuid,
    pub credential_type: CredentialType,
    pub metadata: CredentialMetadata,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rotation_policy: RotationPolicy,
    pub last_rotated: DateTime<Utc>,
    pub version: u64,
}

impl From<&CredentialRecord> for CredentialHeader {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            id: record.id,
            credential_type: record.credential_type,
            metadata: record.metadata.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            rotation_policy: record.rotation_policy,
            last_rotated: record.last_rotated,
            version: record.version,
        }
    }
}

/// Listing entry with expiry-derived fields computed at read time.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    #[serde(flatten)]
    pub header: CredentialHeader,
    pub days_until_expiration: Option<i64>,
    pub needs_rotation: bool,
}

/// Decrypted secret bytes, wiped on drop.
#[derive(Debug)]
pub struct SecretPayload {
    bytes: Vec<u8>,
}

impl SecretPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for SecretPayload {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_validation() {
        let kind = CredentialType::ApiKey;

        assert!(kind.validate_payload(b"sk-live-1234abcd").is_ok());
        assert!(kind.validate_payload(b"").is_err());
        assert!(kind.validate_payload(b"has space").is_err());
        assert!(kind.validate_payload(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_service_account_requires_json_object() {
        let kind = CredentialType::ServiceAccount;

        assert!(kind
            .validate_payload(br#"{"client_email":"jobs@example.iam","private_key":"..."}"#)
            .is_ok());
        assert!(kind.validate_payload(b"not json").is_err());
        assert!(kind.validate_payload(br#"["array"]"#).is_err());
    }

    #[test]
    fn test_banking_login_requires_separator() {
        let kind = CredentialType::BankingLogin;

        assert!(kind.validate_payload(b"member-77:s3cret").is_ok());
        assert!(kind.validate_payload(b"no-separator").is_err());
    }

    #[test]
    fn test_database_secret_only_rejects_empty() {
        assert!(CredentialType::DatabaseSecret
            .validate_payload(b"postgres://u:p@host/db")
            .is_ok());
        assert!(CredentialType::DatabaseSecret.validate_payload(b"").is_err());
    }

    #[test]
    fn test_header_serialization_omits_secret_fields() {
        let header = CredentialHeader {
            id: Uuid::new_v4(),
            credential_type: CredentialType::ApiKey,
            metadata: CredentialMetadata::default(),
            created_at: Utc::now(),
            expires_at: None,
            rotation_policy: RotationPolicy::Manual,
            last_rotated: Utc::now(),
            version: 1,
        };

        let json = serde_json::to_string(&header).unwrap();
        assert!(!json.contains("ciphertext"));
        assert!(!json.contains("nonce"));
        assert!(!json.contains("kdf_salt"));
    }
}
