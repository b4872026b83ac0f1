use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authorization failure. Carries the permission that was missing but
    /// never the resource id, so the error shape is identical whether or
    /// not the resource exists.
    #[error("Access denied: missing permission {permission}")]
    Denied { permission: String },

    #[error("Credential not found: {id}")]
    NotFound { id: String },

    #[error("Credential already exists: {id}")]
    Conflict { id: String },

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Authentication-tag or hash-chain verification failure. Surfaced
    /// verbatim; a failed tag is a security event, not a recoverable error.
    #[error("Integrity check failed")]
    Integrity,

    #[error("Audit log error: {0}")]
    AuditWrite(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;
