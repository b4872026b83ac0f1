use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use credvault_core::CredentialType;

/// Domain events forwarded to the notification layer and the warehouse
/// sync. Delivery is best-effort; no subscriber can block or fail a vault
/// operation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum VaultEvent {
    #[serde(rename = "credential.created")]
    CredentialCreated {
        id: Uuid,
        credential_type: CredentialType,
    },
    #[serde(rename = "credential.rotated")]
    CredentialRotated { id: Uuid },
    #[serde(rename = "credential.expiring")]
    CredentialExpiring {
        id: Uuid,
        days_until_expiration: i64,
    },
    #[serde(rename = "access.denied")]
    AccessDenied {
        principal_id: String,
        permission: String,
    },
}

pub struct EventPublisher {
    tx: broadcast::Sender<VaultEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send errors mean no subscriber is listening; that is not a failure.
    pub fn publish(&self, event: VaultEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(128)
    }
}
