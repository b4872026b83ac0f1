use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{Result, VaultError};
use crate::models::{CredentialHeader, CredentialRecord};

const FORMAT_VERSION: u32 = 1;
const FILE_EXTENSION: &str = "cred";

/// On-disk envelope: record fields and ciphertext persist together in one
/// write, with a hash over the ciphertext checked on every read.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StoredEnvelope {
    record: CredentialRecord,
    ciphertext_hash: [u8; 32],
    format_version: u32,
}

/// File-per-record credential storage. Mutations on a single id serialize
/// through a per-id lock; distinct ids never contend. Lost updates are
/// detected with the record's version counter, not prevented with a global
/// lock.
pub struct CredentialStore {
    base_path: PathBuf,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CredentialStore {
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;

        Ok(Self {
            base_path,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn create(&self, record: CredentialRecord) -> Result<Uuid> {
        let id = record.id;
        let lock = self.record_lock(id);
        let _guard = lock.lock();

        let path = self.record_path(id);
        if path.exists() {
            return Err(VaultError::Conflict { id: id.to_string() });
        }

        self.write_envelope(&path, &record)?;
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Result<CredentialRecord> {
        let path = self.record_path(id);
        if !path.exists() {
            return Err(VaultError::NotFound { id: id.to_string() });
        }

        let file = File::open(&path)?;
        let reader = BufReader::new(file);
        let envelope: StoredEnvelope = bincode::deserialize_from(reader)
            .map_err(|e| VaultError::Serialization(e.to_string()))?;

        let computed = blake3::hash(&envelope.record.ciphertext);
        if computed.as_bytes() != &envelope.ciphertext_hash {
            return Err(VaultError::Integrity);
        }

        Ok(envelope.record)
    }

    /// Bulk listing never exposes ciphertext or encryption metadata.
    pub fn list(&self) -> Result<Vec<CredentialHeader>> {
        let mut headers = Vec::new();

        for entry in std::fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file()
                && path.extension().and_then(|s| s.to_str()) == Some(FILE_EXTENSION)
            {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Ok(id) = Uuid::parse_str(stem) {
                        match self.get(id) {
                            Ok(record) => headers.push(CredentialHeader::from(&record)),
                            Err(err) => {
                                tracing::warn!(credential_id = %id, "skipping unreadable record: {err}");
                                continue;
                            }
                        }
                    }
                }
            }
        }

        headers.sort_by_key(|h| h.created_at);
        Ok(headers)
    }

    /// Applies `mutator` and bumps the version, provided `expected_version`
    /// still matches. `id` and `created_at` are immutable and restored after
    /// the mutator runs.
    pub fn update<F>(&self, id: Uuid, expected_version: u64, mutator: F) -> Result<CredentialRecord>
    where
        F: FnOnce(&mut CredentialRecord),
    {
        let lock = self.record_lock(id);
        let _guard = lock.lock();

        let mut record = self.get(id)?;
        if record.version != expected_version {
            return Err(VaultError::VersionConflict {
                id: id.to_string(),
                expected: expected_version,
                actual: record.version,
            });
        }

        let created_at = record.created_at;
        mutator(&mut record);
        record.id = id;
        record.created_at = created_at;
        record.version += 1;

        self.write_envelope(&self.record_path(id), &record)?;
        Ok(record)
    }

    /// Deleting an absent record is an error, not a no-op; a second delete
    /// signals a logic fault upstream.
    pub fn delete(&self, id: Uuid) -> Result<()> {
        let lock = self.record_lock(id);
        let _guard = lock.lock();

        let path = self.record_path(id);
        if !path.exists() {
            return Err(VaultError::NotFound { id: id.to_string() });
        }

        self.secure_delete(&path)?;
        self.locks.lock().remove(&id);
        Ok(())
    }

    fn record_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.base_path.join(format!("{}.{}", id, FILE_EXTENSION))
    }

    fn write_envelope(&self, path: &Path, record: &CredentialRecord) -> Result<()> {
        let envelope = StoredEnvelope {
            ciphertext_hash: *blake3::hash(&record.ciphertext).as_bytes(),
            record: record.clone(),
            format_version: FORMAT_VERSION,
        };

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, &envelope)
            .map_err(|e| VaultError::Serialization(e.to_string()))?;

        Ok(())
    }

    fn secure_delete(&self, path: &Path) -> Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;

        let file_len = file.metadata()?.len();
        let mut rng = rand::thread_rng();
        let mut buffer = vec![0u8; 4096];

        // Overwrite with random data before unlinking
        for _ in 0..3 {
            let mut writer = BufWriter::new(&file);
            let mut written = 0u64;

            while written < file_len {
                rng.fill_bytes(&mut buffer);
                let to_write = std::cmp::min(buffer.len(), (file_len - written) as usize);
                writer.write_all(&buffer[..to_write])?;
                written += to_write as u64;
            }

            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        std::fs::remove_file(path)?;
        Ok(())
    }
}
