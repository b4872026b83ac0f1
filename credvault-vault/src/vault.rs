use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use credvault_core::{
    crypto::EncryptedSecret, CredentialCrypto, CredentialHeader, CredentialMetadata,
    CredentialRecord, CredentialStatus, CredentialStore, CredentialType, EncryptionKey,
    EncryptionMetadata, Result, RotationPolicy, VaultError,
};

use crate::access::AccessControl;
use crate::audit::{AuditAction, AuditEntry, AuditFilter, AuditLog, AuditOutcome};
use crate::events::{EventPublisher, VaultEvent};
use crate::policy::{Permission, PolicyStore, Role};

const ROTATE_MAX_ATTEMPTS: u32 = 3;
const ROTATION_WARNING_DAYS: i64 = 7;

/// The authenticated actor, resolved by the transport layer. Exactly one
/// role per principal.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub credential_type: CredentialType,
    pub data: Vec<u8>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rotation_policy: RotationPolicy,
    pub metadata: CredentialMetadata,
}

impl StoreRequest {
    pub fn new(credential_type: CredentialType, data: Vec<u8>) -> Self {
        Self {
            credential_type,
            data,
            expires_at: None,
            rotation_policy: RotationPolicy::default(),
            metadata: CredentialMetadata::default(),
        }
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct MasterSecret(String);

/// Orchestrates policy, access control, crypto, storage, and audit. Every
/// request path, denied and failed ones included, terminates in exactly one
/// audit write.
pub struct CredentialVault {
    policy: Arc<PolicyStore>,
    access: AccessControl,
    store: Arc<CredentialStore>,
    audit: Arc<dyn AuditLog>,
    events: EventPublisher,
    crypto: CredentialCrypto,
    master_secret: MasterSecret,
}

impl CredentialVault {
    pub fn new(
        policy: Arc<PolicyStore>,
        store: Arc<CredentialStore>,
        audit: Arc<dyn AuditLog>,
        master_secret: impl Into<String>,
    ) -> Result<Self> {
        policy.validate()?;

        let master_secret = master_secret.into();
        if master_secret.is_empty() {
            return Err(VaultError::InvalidConfiguration(
                "master secret must not be empty".to_string(),
            ));
        }

        let crypto = CredentialCrypto::new(policy.security().encryption_algorithm);
        let access = AccessControl::new(policy.clone());

        Ok(Self {
            policy,
            access,
            store,
            audit,
            events: EventPublisher::default(),
            crypto,
            master_secret: MasterSecret(master_secret),
        })
    }

    pub fn policy(&self) -> &PolicyStore {
        &self.policy
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }

    pub async fn store(&self, principal: &Principal, request: StoreRequest) -> Result<Uuid> {
        if !self.access.allows(principal.role, Permission::CredentialManage) {
            return Err(self
                .deny(principal, AuditAction::Create, Permission::CredentialManage, "*")
                .await);
        }

        let now = Utc::now();
        let result = self
            .build_record(&request, now)
            .and_then(|record| self.store.create(record));

        match result {
            Ok(id) => {
                let entry = AuditEntry::new(
                    &principal.id,
                    principal.role,
                    AuditAction::Create,
                    id.to_string(),
                    AuditOutcome::Success,
                )
                .with_detail("credential_type", request.credential_type.as_str());

                if let Err(audit_err) = self.write_audit(entry, false).await {
                    // A record must never outlive a lost audit entry
                    if let Err(cleanup) = self.store.delete(id) {
                        tracing::error!(
                            credential_id = %id,
                            "rollback of unaudited credential failed: {cleanup}"
                        );
                    }
                    return Err(audit_err);
                }

                self.events.publish(VaultEvent::CredentialCreated {
                    id,
                    credential_type: request.credential_type,
                });
                tracing::info!(credential_id = %id, "credential stored");
                Ok(id)
            }
            Err(err) => {
                let entry = AuditEntry::new(
                    &principal.id,
                    principal.role,
                    AuditAction::Create,
                    "*",
                    AuditOutcome::Failure,
                )
                .with_detail("error", err.to_string());
                self.write_audit(entry, false).await?;
                Err(err)
            }
        }
    }

    pub async fn list_all(&self, principal: &Principal) -> Result<Vec<CredentialStatus>> {
        let allowed = self.access.allows(principal.role, Permission::CredentialRead)
            || (self.access.allows(principal.role, Permission::JobRead)
                && self.access.allows(principal.role, Permission::DataView));
        if !allowed {
            return Err(self
                .deny(principal, AuditAction::List, Permission::CredentialRead, "*")
                .await);
        }

        let now = Utc::now();
        match self.store.list() {
            Ok(headers) => {
                let statuses: Vec<CredentialStatus> = headers
                    .into_iter()
                    .map(|header| credential_status(header, now))
                    .collect();

                // One audit entry for the whole call, not one per record
                let entry = AuditEntry::new(
                    &principal.id,
                    principal.role,
                    AuditAction::List,
                    "*",
                    AuditOutcome::Success,
                )
                .with_detail("count", statuses.len().to_string());
                self.write_audit(entry, true).await?;

                for status in &statuses {
                    if status.needs_rotation {
                        self.events.publish(VaultEvent::CredentialExpiring {
                            id: status.header.id,
                            days_until_expiration: status.days_until_expiration.unwrap_or(0),
                        });
                    }
                }

                Ok(statuses)
            }
            Err(err) => {
                let entry = AuditEntry::new(
                    &principal.id,
                    principal.role,
                    AuditAction::List,
                    "*",
                    AuditOutcome::Failure,
                )
                .with_detail("error", err.to_string());
                self.write_audit(entry, true).await?;
                Err(err)
            }
        }
    }

    pub async fn retrieve(
        &self,
        principal: &Principal,
        id: Uuid,
    ) -> Result<credvault_core::SecretPayload> {
        let allowed = self.access.allows(principal.role, Permission::CredentialUse)
            || self.access.allows(principal.role, Permission::CredentialManage);
        if !allowed {
            return Err(self
                .deny(
                    principal,
                    AuditAction::Read,
                    Permission::CredentialUse,
                    &id.to_string(),
                )
                .await);
        }

        let result = self
            .store
            .get(id)
            .and_then(|record| self.decrypt_record(&record));

        match result {
            Ok(payload) => {
                let entry = AuditEntry::new(
                    &principal.id,
                    principal.role,
                    AuditAction::Read,
                    id.to_string(),
                    AuditOutcome::Success,
                );
                self.write_audit(entry, true).await?;
                Ok(payload)
            }
            Err(err) => {
                // Integrity failures are a security event; never masked
                let entry = AuditEntry::new(
                    &principal.id,
                    principal.role,
                    AuditAction::Read,
                    id.to_string(),
                    AuditOutcome::Failure,
                )
                .with_detail("error", err.to_string());
                self.write_audit(entry, true).await?;
                Err(err)
            }
        }
    }

    pub async fn rotate(&self, principal: &Principal, id: Uuid) -> Result<()> {
        if !self.access.allows(principal.role, Permission::CredentialManage) {
            return Err(self
                .deny(
                    principal,
                    AuditAction::Rotate,
                    Permission::CredentialManage,
                    &id.to_string(),
                )
                .await);
        }

        match self.execute_rotate(id) {
            Ok(version) => {
                let entry = AuditEntry::new(
                    &principal.id,
                    principal.role,
                    AuditAction::Rotate,
                    id.to_string(),
                    AuditOutcome::Success,
                )
                .with_detail("version", version.to_string());
                self.write_audit(entry, false).await?;

                self.events.publish(VaultEvent::CredentialRotated { id });
                tracing::info!(credential_id = %id, version, "credential rotated");
                Ok(())
            }
            Err(err) => {
                let entry = AuditEntry::new(
                    &principal.id,
                    principal.role,
                    AuditAction::Rotate,
                    id.to_string(),
                    AuditOutcome::Failure,
                )
                .with_detail("error", err.to_string());
                self.write_audit(entry, false).await?;
                Err(err)
            }
        }
    }

    pub async fn update_metadata(
        &self,
        principal: &Principal,
        id: Uuid,
        metadata: CredentialMetadata,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if !self.access.allows(principal.role, Permission::CredentialManage) {
            return Err(self
                .deny(
                    principal,
                    AuditAction::Update,
                    Permission::CredentialManage,
                    &id.to_string(),
                )
                .await);
        }

        let result = self.store.get(id).and_then(|record| {
            if let Some(expiry) = expires_at {
                if expiry <= record.created_at {
                    return Err(VaultError::Validation(
                        "expiry must be after creation".to_string(),
                    ));
                }
            }
            self.store.update(id, record.version, move |rec| {
                rec.metadata = metadata;
                rec.expires_at = expires_at;
            })
        });

        match result {
            Ok(updated) => {
                let entry = AuditEntry::new(
                    &principal.id,
                    principal.role,
                    AuditAction::Update,
                    id.to_string(),
                    AuditOutcome::Success,
                )
                .with_detail("version", updated.version.to_string());
                self.write_audit(entry, false).await?;
                Ok(())
            }
            Err(err) => {
                let entry = AuditEntry::new(
                    &principal.id,
                    principal.role,
                    AuditAction::Update,
                    id.to_string(),
                    AuditOutcome::Failure,
                )
                .with_detail("error", err.to_string());
                self.write_audit(entry, false).await?;
                Err(err)
            }
        }
    }

    /// Irreversible. A repeat delete surfaces `NotFound`.
    pub async fn delete(&self, principal: &Principal, id: Uuid) -> Result<()> {
        if !self.access.allows(principal.role, Permission::CredentialDelete) {
            return Err(self
                .deny(
                    principal,
                    AuditAction::Delete,
                    Permission::CredentialDelete,
                    &id.to_string(),
                )
                .await);
        }

        match self.store.delete(id) {
            Ok(()) => {
                let entry = AuditEntry::new(
                    &principal.id,
                    principal.role,
                    AuditAction::Delete,
                    id.to_string(),
                    AuditOutcome::Success,
                );
                self.write_audit(entry, false).await?;
                tracing::info!(credential_id = %id, "credential deleted");
                Ok(())
            }
            Err(err) => {
                let entry = AuditEntry::new(
                    &principal.id,
                    principal.role,
                    AuditAction::Delete,
                    id.to_string(),
                    AuditOutcome::Failure,
                )
                .with_detail("error", err.to_string());
                self.write_audit(entry, false).await?;
                Err(err)
            }
        }
    }

    pub async fn query_audit(
        &self,
        principal: &Principal,
        filter: AuditFilter,
    ) -> Result<Vec<AuditEntry>> {
        if !self.access.allows(principal.role, Permission::AuditRead) {
            return Err(self
                .deny(principal, AuditAction::Read, Permission::AuditRead, "*")
                .await);
        }

        self.audit.query(filter).await
    }

    /// Retention expiry is the sole deletion path for audit data, and is
    /// itself logged.
    pub async fn purge_expired_audit(&self, principal: &Principal) -> Result<usize> {
        if !self.access.allows(principal.role, Permission::AuditManage) {
            return Err(self
                .deny(principal, AuditAction::Purge, Permission::AuditManage, "*")
                .await);
        }

        let retention_days = self.policy.audit_policy().retention_days;
        let purged = self.audit.purge_expired(retention_days).await?;

        let entry = AuditEntry::new(
            &principal.id,
            principal.role,
            AuditAction::Purge,
            "*",
            AuditOutcome::Success,
        )
        .with_detail("purged", purged.to_string())
        .with_detail("retention_days", retention_days.to_string());
        self.write_audit(entry, false).await?;

        Ok(purged)
    }

    fn build_record(&self, request: &StoreRequest, now: DateTime<Utc>) -> Result<CredentialRecord> {
        request.credential_type.validate_payload(&request.data)?;

        if let Some(expires_at) = request.expires_at {
            if expires_at <= now {
                return Err(VaultError::Validation(
                    "expiry must be in the future".to_string(),
                ));
            }
        }

        // Fresh salt and key per record; the master secret never touches disk
        let salt = CredentialCrypto::generate_salt();
        let iterations = self.policy.security().kdf_iterations;
        let key = EncryptionKey::derive_from_secret(&self.master_secret.0, &salt, iterations)?;
        let encrypted = self.crypto.encrypt(&key, &request.data)?;

        Ok(CredentialRecord {
            id: Uuid::new_v4(),
            credential_type: request.credential_type,
            ciphertext: encrypted.ciphertext,
            encryption: EncryptionMetadata {
                algorithm: encrypted.algorithm,
                nonce: encrypted.nonce,
                tag: encrypted.tag,
                kdf_salt: salt,
                kdf_iterations: iterations,
            },
            metadata: request.metadata.clone(),
            created_at: now,
            expires_at: request.expires_at,
            rotation_policy: request.rotation_policy,
            last_rotated: now,
            version: 1,
        })
    }

    fn decrypt_record(&self, record: &CredentialRecord) -> Result<credvault_core::SecretPayload> {
        let key = EncryptionKey::derive_from_secret(
            &self.master_secret.0,
            &record.encryption.kdf_salt,
            record.encryption.kdf_iterations,
        )?;

        let crypto = CredentialCrypto::new(record.encryption.algorithm);
        let plaintext = crypto.decrypt(
            &key,
            &EncryptedSecret {
                algorithm: record.encryption.algorithm,
                nonce: record.encryption.nonce.clone(),
                ciphertext: record.ciphertext.clone(),
                tag: record.encryption.tag.clone(),
            },
        )?;

        Ok(credvault_core::SecretPayload::new(plaintext))
    }

    fn execute_rotate(&self, id: Uuid) -> Result<u64> {
        // The replacement key is derived once per logical rotation; retries
        // re-read and re-encrypt but never burn another derivation.
        let salt = CredentialCrypto::generate_salt();
        let iterations = self.policy.security().kdf_iterations;
        let key = EncryptionKey::derive_from_secret(&self.master_secret.0, &salt, iterations)?;

        let mut attempts = 0;
        loop {
            attempts += 1;

            let record = self.store.get(id)?;
            let payload = self.decrypt_record(&record)?;
            let encrypted = self.crypto.encrypt(&key, payload.as_bytes())?;

            let now = Utc::now();
            let encryption = EncryptionMetadata {
                algorithm: encrypted.algorithm,
                nonce: encrypted.nonce,
                tag: encrypted.tag,
                kdf_salt: salt.clone(),
                kdf_iterations: iterations,
            };
            let ciphertext = encrypted.ciphertext;

            match self.store.update(id, record.version, move |rec| {
                rec.ciphertext = ciphertext;
                rec.encryption = encryption;
                rec.last_rotated = now;
            }) {
                Ok(updated) => return Ok(updated.version),
                Err(VaultError::VersionConflict { .. }) if attempts < ROTATE_MAX_ATTEMPTS => {
                    tracing::warn!(
                        credential_id = %id,
                        attempts,
                        "version conflict during rotation, retrying"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// The caller-visible denial never names the resource; the audit trail
    /// records the requested target for compliance review.
    async fn deny(
        &self,
        principal: &Principal,
        requested: AuditAction,
        permission: Permission,
        resource_id: &str,
    ) -> VaultError {
        let entry = AuditEntry::new(
            &principal.id,
            principal.role,
            AuditAction::AccessDenied,
            resource_id,
            AuditOutcome::Denied,
        )
        .with_detail("requested", action_name(requested))
        .with_detail("permission", permission.as_str());

        if let Err(audit_err) = self.write_audit(entry, false).await {
            return audit_err;
        }

        self.events.publish(VaultEvent::AccessDenied {
            principal_id: principal.id.clone(),
            permission: permission.as_str().to_string(),
        });

        VaultError::Denied {
            permission: permission.as_str().to_string(),
        }
    }

    /// Mutations fail together with their audit entry; reads do too once
    /// `audit_all_access` is set.
    async fn write_audit(&self, entry: AuditEntry, is_read: bool) -> Result<()> {
        match self.audit.record(entry).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if !is_read || self.policy.audit_policy().audit_all_access {
                    Err(match err {
                        VaultError::AuditWrite(_) => err,
                        other => VaultError::AuditWrite(other.to_string()),
                    })
                } else {
                    tracing::warn!("audit write failed on read path: {err}");
                    Ok(())
                }
            }
        }
    }
}

fn action_name(action: AuditAction) -> &'static str {
    match action {
        AuditAction::Create => "create",
        AuditAction::Read => "read",
        AuditAction::List => "list",
        AuditAction::Update => "update",
        AuditAction::Delete => "delete",
        AuditAction::Rotate => "rotate",
        AuditAction::AccessDenied => "access-denied",
        AuditAction::Purge => "purge",
    }
}

fn credential_status(header: CredentialHeader, now: DateTime<Utc>) -> CredentialStatus {
    let days_until_expiration = header.expires_at.map(|expires_at| {
        let secs = (expires_at - now).num_seconds();
        secs.div_euclid(86_400) + i64::from(secs.rem_euclid(86_400) > 0)
    });
    let needs_rotation = days_until_expiration.map_or(false, |days| days <= ROTATION_WARNING_DAYS);

    CredentialStatus {
        header,
        days_until_expiration,
        needs_rotation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn header(expires_at: Option<DateTime<Utc>>) -> CredentialHeader {
        let now = Utc::now();
        CredentialHeader {
            id: Uuid::new_v4(),
            credential_type: CredentialType::ApiKey,
            metadata: CredentialMetadata::default(),
            created_at: now,
            expires_at,
            rotation_policy: RotationPolicy::Manual,
            last_rotated: now,
            version: 1,
        }
    }

    #[test]
    fn test_days_until_expiration_rounds_up() {
        let now = Utc::now();

        let status = credential_status(header(Some(now + Duration::days(5))), now);
        assert_eq!(status.days_until_expiration, Some(5));
        assert!(status.needs_rotation);

        let status = credential_status(
            header(Some(now + Duration::days(4) + Duration::hours(1))),
            now,
        );
        assert_eq!(status.days_until_expiration, Some(5));
    }

    #[test]
    fn test_far_expiry_does_not_need_rotation() {
        let now = Utc::now();
        let status = credential_status(header(Some(now + Duration::days(30))), now);

        assert_eq!(status.days_until_expiration, Some(30));
        assert!(!status.needs_rotation);
    }

    #[test]
    fn test_expired_credential_needs_rotation() {
        let now = Utc::now();
        let status = credential_status(header(Some(now - Duration::days(2))), now);

        assert_eq!(status.days_until_expiration, Some(-2));
        assert!(status.needs_rotation);
    }

    #[test]
    fn test_no_expiry_means_no_rotation_pressure() {
        let status = credential_status(header(None), Utc::now());

        assert_eq!(status.days_until_expiration, None);
        assert!(!status.needs_rotation);
    }
}
