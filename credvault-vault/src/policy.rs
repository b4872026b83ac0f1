use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use credvault_core::crypto::{PBKDF2_DEFAULT_ITERATIONS, PBKDF2_MIN_ITERATIONS};
use credvault_core::{EncryptionAlgorithm, Result, VaultError};

/// Closed role set. Misspelled roles fail at deserialization, not at
/// authorization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
        }
    }
}

/// `resource:action` permission tokens. Attached to roles only, never to
/// individual principals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "credential:manage")]
    CredentialManage,
    #[serde(rename = "credential:read")]
    CredentialRead,
    #[serde(rename = "credential:use")]
    CredentialUse,
    #[serde(rename = "credential:delete")]
    CredentialDelete,
    #[serde(rename = "audit:read")]
    AuditRead,
    #[serde(rename = "audit:manage")]
    AuditManage,
    #[serde(rename = "job:read")]
    JobRead,
    #[serde(rename = "data:view")]
    DataView,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::CredentialManage => "credential:manage",
            Permission::CredentialRead => "credential:read",
            Permission::CredentialUse => "credential:use",
            Permission::CredentialDelete => "credential:delete",
            Permission::AuditRead => "audit:read",
            Permission::AuditManage => "audit:manage",
            Permission::JobRead => "job:read",
            Permission::DataView => "data:view",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub encryption_algorithm: EncryptionAlgorithm,
    pub kdf_iterations: u32,
    pub require_mfa: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_numbers: bool,
    pub require_special_chars: bool,
    pub max_age_days: u32,
    pub reuse_prevention_count: u32,
}

impl PasswordPolicy {
    pub fn check(&self, candidate: &str) -> Result<()> {
        if candidate.len() < self.min_length {
            return Err(VaultError::Validation(format!(
                "password shorter than {} characters",
                self.min_length
            )));
        }
        if self.require_uppercase && !candidate.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(VaultError::Validation(
                "password requires an uppercase character".to_string(),
            ));
        }
        if self.require_lowercase && !candidate.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(VaultError::Validation(
                "password requires a lowercase character".to_string(),
            ));
        }
        if self.require_numbers && !candidate.chars().any(|c| c.is_ascii_digit()) {
            return Err(VaultError::Validation(
                "password requires a digit".to_string(),
            ));
        }
        if self.require_special_chars && candidate.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(VaultError::Validation(
                "password requires a special character".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceFlags {
    pub pci_dss: bool,
    pub gdpr: bool,
    pub soc2: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPolicy {
    pub enabled: bool,
    /// When set, an operation and its audit entry succeed or fail together,
    /// read operations included.
    pub audit_all_access: bool,
    pub retention_days: u32,
    pub immutable: bool,
    pub real_time_alerts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPolicy {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub window_secs: u64,
    pub max_requests: u32,
}

/// Process-wide policy, loaded once at startup and immutable thereafter.
/// Tests construct fresh instances instead of sharing a global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyStore {
    pub security: SecurityPolicy,
    pub password: PasswordPolicy,
    pub compliance: ComplianceFlags,
    pub audit: AuditPolicy,
    pub session: SessionPolicy,
    pub rate_limit: RateLimitPolicy,
    pub roles: HashMap<Role, HashSet<Permission>>,
}

impl Default for PolicyStore {
    fn default() -> Self {
        let mut roles = HashMap::new();
        roles.insert(
            Role::Admin,
            HashSet::from([
                Permission::CredentialManage,
                Permission::CredentialRead,
                Permission::CredentialUse,
                Permission::CredentialDelete,
                Permission::AuditRead,
                Permission::AuditManage,
                Permission::JobRead,
                Permission::DataView,
            ]),
        );
        roles.insert(
            Role::Operator,
            HashSet::from([
                Permission::CredentialManage,
                Permission::CredentialRead,
                Permission::CredentialUse,
                Permission::JobRead,
                Permission::DataView,
            ]),
        );
        roles.insert(
            Role::Viewer,
            HashSet::from([
                Permission::CredentialRead,
                Permission::JobRead,
                Permission::DataView,
            ]),
        );

        Self {
            security: SecurityPolicy {
                encryption_algorithm: EncryptionAlgorithm::Aes256Gcm,
                kdf_iterations: PBKDF2_DEFAULT_ITERATIONS,
                require_mfa: true,
            },
            password: PasswordPolicy {
                min_length: 12,
                require_uppercase: true,
                require_lowercase: true,
                require_numbers: true,
                require_special_chars: true,
                max_age_days: 90,
                reuse_prevention_count: 5,
            },
            compliance: ComplianceFlags {
                pci_dss: true,
                gdpr: true,
                soc2: true,
            },
            audit: AuditPolicy {
                enabled: true,
                audit_all_access: true,
                retention_days: 365,
                immutable: true,
                real_time_alerts: true,
            },
            session: SessionPolicy { timeout_secs: 3600 },
            rate_limit: RateLimitPolicy {
                window_secs: 60,
                max_requests: 100,
            },
            roles,
        }
    }
}

impl PolicyStore {
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&Self::default())?)
            // Add config file if it exists
            .add_source(File::with_name("credvault.toml").required(false))
            .add_source(File::with_name("/etc/credvault/config.toml").required(false))
            // Override with environment variables
            .add_source(Environment::with_prefix("CREDVAULT").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn validate(&self) -> Result<()> {
        if self.security.kdf_iterations < PBKDF2_MIN_ITERATIONS {
            return Err(VaultError::InvalidConfiguration(format!(
                "kdf_iterations must be at least {}",
                PBKDF2_MIN_ITERATIONS
            )));
        }
        if self.audit.retention_days == 0 {
            return Err(VaultError::InvalidConfiguration(
                "audit retention_days must be greater than 0".to_string(),
            ));
        }
        if self.roles.is_empty() {
            return Err(VaultError::InvalidConfiguration(
                "role table must not be empty".to_string(),
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(VaultError::InvalidConfiguration(
                "rate limit max_requests must be greater than 0".to_string(),
            ));
        }
        if self.password.min_length < 8 {
            return Err(VaultError::InvalidConfiguration(
                "password min_length must be at least 8".to_string(),
            ));
        }

        Ok(())
    }

    /// Roles absent from the table have no permissions; absence is not an
    /// error.
    pub fn permissions_for(&self, role: Role) -> HashSet<Permission> {
        self.roles.get(&role).cloned().unwrap_or_default()
    }

    pub fn security(&self) -> &SecurityPolicy {
        &self.security
    }

    pub fn password_policy(&self) -> &PasswordPolicy {
        &self.password
    }

    pub fn compliance(&self) -> &ComplianceFlags {
        &self.compliance
    }

    pub fn audit_policy(&self) -> &AuditPolicy {
        &self.audit
    }

    pub fn session_timeout_secs(&self) -> u64 {
        self.session.timeout_secs
    }

    pub fn rate_limit(&self) -> &RateLimitPolicy {
        &self.rate_limit
    }
}
