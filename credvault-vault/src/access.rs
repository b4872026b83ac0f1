use std::sync::Arc;

use credvault_core::{Result, VaultError};

use crate::policy::{Permission, PolicyStore, Role};

/// Pure authorization over the PolicyStore role table. No I/O, no side
/// effects; the vault audits decisions, not this layer.
#[derive(Clone)]
pub struct AccessControl {
    policy: Arc<PolicyStore>,
}

impl AccessControl {
    pub fn new(policy: Arc<PolicyStore>) -> Self {
        Self { policy }
    }

    pub fn allows(&self, role: Role, permission: Permission) -> bool {
        self.policy.permissions_for(role).contains(&permission)
    }

    pub fn require(&self, role: Role, permission: Permission) -> Result<()> {
        if self.allows(role, permission) {
            Ok(())
        } else {
            Err(VaultError::Denied {
                permission: permission.as_str().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access() -> AccessControl {
        AccessControl::new(Arc::new(PolicyStore::default()))
    }

    #[test]
    fn test_admin_allowed() {
        let access = access();
        assert!(access.allows(Role::Admin, Permission::CredentialManage));
        assert!(access.allows(Role::Admin, Permission::AuditManage));
    }

    #[test]
    fn test_viewer_denied_manage() {
        let access = access();
        assert!(!access.allows(Role::Viewer, Permission::CredentialManage));
        assert!(matches!(
            access.require(Role::Viewer, Permission::CredentialManage),
            Err(VaultError::Denied { .. })
        ));
    }

    #[test]
    fn test_authorization_is_deterministic() {
        let access = access();

        for _ in 0..10 {
            assert!(access.allows(Role::Operator, Permission::CredentialUse));
            assert!(!access.allows(Role::Viewer, Permission::CredentialDelete));
        }
    }

    #[test]
    fn test_role_without_table_entry_denied_everywhere() {
        let mut policy = PolicyStore::default();
        policy.roles.remove(&Role::Operator);
        let access = AccessControl::new(Arc::new(policy));

        assert!(!access.allows(Role::Operator, Permission::CredentialRead));
        assert!(!access.allows(Role::Operator, Permission::JobRead));
    }
}
