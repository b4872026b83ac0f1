pub mod access;
pub mod audit;
pub mod events;
pub mod policy;
pub mod vault;

pub use access::AccessControl;
pub use audit::{
    AuditAction, AuditEntry, AuditFilter, AuditLog, AuditOutcome, FileAuditLog, MemoryAuditLog,
};
pub use events::{EventPublisher, VaultEvent};
pub use policy::{Permission, PolicyStore, Role};
pub use vault::{CredentialVault, Principal, StoreRequest};
