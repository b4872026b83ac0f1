use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use credvault_core::{Result, VaultError};

use crate::policy::Role;

/// Detail keys that may carry secret material are redacted at write time,
/// never lazily at query time.
const SENSITIVE_KEYS: &[&str] = &["secret", "password", "token", "key", "plaintext", "data"];
const REDACTED: &str = "[redacted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditAction {
    Create,
    Read,
    List,
    Update,
    Delete,
    Rotate,
    AccessDenied,
    Purge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// One appended line per vault operation. `entry_hash` chains over
/// `prev_hash` and the entry body, so any in-place edit of stored history
/// breaks verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub principal_id: String,
    pub role: Role,
    pub action: AuditAction,
    pub resource_id: String,
    pub outcome: AuditOutcome,
    #[serde(default)]
    pub detail: BTreeMap<String, String>,
    #[serde(default)]
    pub prev_hash: String,
    #[serde(default)]
    pub entry_hash: String,
}

impl AuditEntry {
    pub fn new(
        principal_id: impl Into<String>,
        role: Role,
        action: AuditAction,
        resource_id: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            principal_id: principal_id.into(),
            role,
            action,
            resource_id: resource_id.into(),
            outcome,
            detail: BTreeMap::new(),
            prev_hash: String::new(),
            entry_hash: String::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }

    fn mask(&mut self) {
        for (key, value) in self.detail.iter_mut() {
            let lowered = key.to_lowercase();
            if SENSITIVE_KEYS.iter().any(|s| lowered.contains(s)) {
                *value = REDACTED.to_string();
            }
        }
    }

    fn seal(&mut self, prev_hash: &str) -> Result<()> {
        self.prev_hash = prev_hash.to_string();
        self.entry_hash = chain_hash(prev_hash, self)?;
        Ok(())
    }
}

fn chain_hash(prev_hash: &str, entry: &AuditEntry) -> Result<String> {
    let mut unsealed = entry.clone();
    unsealed.prev_hash.clear();
    unsealed.entry_hash.clear();

    let body = serde_json::to_vec(&unsealed)
        .map_err(|e| VaultError::AuditWrite(e.to_string()))?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(&body);
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

fn verify_entries(entries: &[AuditEntry]) -> Result<()> {
    for (index, entry) in entries.iter().enumerate() {
        if index > 0 && entry.prev_hash != entries[index - 1].entry_hash {
            return Err(VaultError::Integrity);
        }
        if chain_hash(&entry.prev_hash, entry)? != entry.entry_hash {
            return Err(VaultError::Integrity);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub principal_id: Option<String>,
    pub action: Option<AuditAction>,
    pub outcome: Option<AuditOutcome>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(ref principal_id) = self.principal_id {
            if &entry.principal_id != principal_id {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(outcome) = self.outcome {
            if entry.outcome != outcome {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if entry.timestamp > end {
                return false;
            }
        }
        true
    }
}

fn apply_filter(entries: Vec<AuditEntry>, filter: &AuditFilter) -> Vec<AuditEntry> {
    let mut matched: Vec<AuditEntry> = entries
        .into_iter()
        .filter(|entry| filter.matches(entry))
        .collect();
    matched.sort_by_key(|entry| entry.timestamp);

    if let Some(limit) = filter.limit {
        matched.truncate(limit);
    }
    matched
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append-only write. The triggering operation fails when this fails.
    async fn record(&self, entry: AuditEntry) -> Result<()>;
    /// Entries ordered by timestamp ascending.
    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>>;
    /// The sole deletion path for audit data.
    async fn purge_expired(&self, retention_days: u32) -> Result<usize>;
    async fn verify_chain(&self) -> Result<()>;
}

/// In-memory log for tests and embedded use.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: parking_lot::Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, mut entry: AuditEntry) -> Result<()> {
        entry.mask();

        let mut entries = self.entries.lock();
        let prev_hash = entries
            .last()
            .map(|e| e.entry_hash.clone())
            .unwrap_or_default();
        entry.seal(&prev_hash)?;
        entries.push(entry);
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        Ok(apply_filter(self.entries.lock().clone(), &filter))
    }

    async fn purge_expired(&self, retention_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.timestamp >= cutoff);
        Ok(before - entries.len())
    }

    async fn verify_chain(&self) -> Result<()> {
        verify_entries(&self.entries.lock())
    }
}

struct FileState {
    file: tokio::fs::File,
    last_hash: String,
}

/// JSONL append log. Each line is one sealed entry; the chain head is
/// recovered from the last line on open.
pub struct FileAuditLog {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileAuditLog {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let last_hash = match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse_entries(&content)?
                .last()
                .map(|entry| entry.entry_hash.clone())
                .unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(VaultError::AuditWrite(e.to_string())),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| VaultError::AuditWrite(e.to_string()))?;

        Ok(Self {
            path,
            state: Mutex::new(FileState { file, last_hash }),
        })
    }

    async fn read_entries(&self) -> Result<Vec<AuditEntry>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => parse_entries(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(VaultError::AuditWrite(e.to_string())),
        }
    }
}

fn parse_entries(content: &str) -> Result<Vec<AuditEntry>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| VaultError::AuditWrite(e.to_string()))
        })
        .collect()
}

#[async_trait]
impl AuditLog for FileAuditLog {
    async fn record(&self, mut entry: AuditEntry) -> Result<()> {
        entry.mask();

        let mut state = self.state.lock().await;
        let prev_hash = state.last_hash.clone();
        entry.seal(&prev_hash)?;

        let line =
            serde_json::to_string(&entry).map_err(|e| VaultError::AuditWrite(e.to_string()))?;

        state
            .file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| VaultError::AuditWrite(e.to_string()))?;
        state
            .file
            .write_all(b"\n")
            .await
            .map_err(|e| VaultError::AuditWrite(e.to_string()))?;
        state
            .file
            .flush()
            .await
            .map_err(|e| VaultError::AuditWrite(e.to_string()))?;

        state.last_hash = entry.entry_hash;
        Ok(())
    }

    async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditEntry>> {
        let _state = self.state.lock().await;
        Ok(apply_filter(self.read_entries().await?, &filter))
    }

    async fn purge_expired(&self, retention_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days as i64);

        let mut state = self.state.lock().await;
        let entries = self.read_entries().await?;
        let before = entries.len();

        let retained: Vec<AuditEntry> = entries
            .into_iter()
            .filter(|entry| entry.timestamp >= cutoff)
            .collect();
        let purged = before - retained.len();

        if purged > 0 {
            let mut content = String::new();
            for entry in &retained {
                let line = serde_json::to_string(entry)
                    .map_err(|e| VaultError::AuditWrite(e.to_string()))?;
                content.push_str(&line);
                content.push('\n');
            }

            tokio::fs::write(&self.path, content)
                .await
                .map_err(|e| VaultError::AuditWrite(e.to_string()))?;

            state.file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| VaultError::AuditWrite(e.to_string()))?;
        }

        Ok(purged)
    }

    async fn verify_chain(&self) -> Result<()> {
        let _state = self.state.lock().await;
        verify_entries(&self.read_entries().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: AuditAction, outcome: AuditOutcome) -> AuditEntry {
        AuditEntry::new("ops-runner", Role::Operator, action, "*", outcome)
    }

    #[tokio::test]
    async fn test_sensitive_detail_masked_at_write() {
        let log = MemoryAuditLog::new();

        log.record(
            entry(AuditAction::Create, AuditOutcome::Success)
                .with_detail("api_key", "sk-live-1234")
                .with_detail("credential_type", "api-key"),
        )
        .await
        .unwrap();

        let entries = log.query(AuditFilter::default()).await.unwrap();
        assert_eq!(entries[0].detail["api_key"], REDACTED);
        assert_eq!(entries[0].detail["credential_type"], "api-key");
    }

    #[tokio::test]
    async fn test_chain_verifies_and_detects_tampering() {
        let log = MemoryAuditLog::new();

        for _ in 0..3 {
            log.record(entry(AuditAction::Read, AuditOutcome::Success))
                .await
                .unwrap();
        }
        log.verify_chain().await.unwrap();

        log.entries.lock()[1].resource_id = "forged".to_string();
        assert!(matches!(
            log.verify_chain().await,
            Err(VaultError::Integrity)
        ));
    }

    #[tokio::test]
    async fn test_query_filters_and_orders_ascending() {
        let log = MemoryAuditLog::new();

        log.record(entry(AuditAction::Create, AuditOutcome::Success))
            .await
            .unwrap();
        log.record(entry(AuditAction::Read, AuditOutcome::Failure))
            .await
            .unwrap();
        log.record(entry(AuditAction::Read, AuditOutcome::Success))
            .await
            .unwrap();

        let reads = log
            .query(AuditFilter {
                action: Some(AuditAction::Read),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(reads.len(), 2);
        assert!(reads[0].timestamp <= reads[1].timestamp);

        let failures = log
            .query(AuditFilter {
                outcome: Some(AuditOutcome::Failure),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
    }

    #[tokio::test]
    async fn test_purge_only_removes_expired() {
        let log = MemoryAuditLog::new();

        log.record(entry(AuditAction::Create, AuditOutcome::Success))
            .await
            .unwrap();
        log.entries.lock()[0].timestamp = Utc::now() - Duration::days(400);
        log.record(entry(AuditAction::Read, AuditOutcome::Success))
            .await
            .unwrap();

        let purged = log.purge_expired(365).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(log.query(AuditFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_log_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let log = FileAuditLog::new(&path).await.unwrap();
            log.record(entry(AuditAction::Create, AuditOutcome::Success))
                .await
                .unwrap();
            log.record(entry(AuditAction::Delete, AuditOutcome::Denied))
                .await
                .unwrap();
            log.verify_chain().await.unwrap();
        }

        // Reopen: chain head recovered from the last line
        let log = FileAuditLog::new(&path).await.unwrap();
        log.record(entry(AuditAction::Read, AuditOutcome::Success))
            .await
            .unwrap();
        log.verify_chain().await.unwrap();

        let entries = log.query(AuditFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 3);
    }
}
