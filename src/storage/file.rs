//! Durable single-file persistence.
//!
//! The whole key space lives in memory and is rewritten to disk on every
//! mutation (temp file + rename). Layout:
//!
//! ```text
//! magic "DSF\0" | version u8 | payload length u64 LE | MessagePack payload | crc32 u32 LE
//! ```

use super::persistence::{entry_size, Persistence, PersistenceError, PersistenceInfo};
use crate::error::{Result, StoreError};
use fs2::FileExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the data file.
const FILE_MAGIC: &[u8; 4] = b"DSF\0";

/// Current data file format version.
const FILE_VERSION: u8 = 1;

/// Magic, version byte and payload length.
const HEADER_LEN: u64 = 4 + 1 + 8;

const CHECKSUM_LEN: u64 = 4;

struct FileState {
    entries: BTreeMap<String, Value>,
    current_size: u64,
}

/// File-backed [`Persistence`] for a single writer.
pub struct FilePersistence {
    path: PathBuf,
    limit_size: u64,
    state: Mutex<FileState>,
    _lock_file: File,
}

impl FilePersistence {
    /// Open the data file at `path`, creating it on first write.
    ///
    /// Fails with [`StoreError::Locked`] while another handle holds the file.
    pub fn open(path: impl AsRef<Path>, limit_size: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let lock_file = Self::acquire_lock(&path)?;

        let entries = if path.exists() {
            Self::read_file(&path)?
        } else {
            BTreeMap::new()
        };
        let current_size = entries.iter().map(|(k, v)| entry_size(k, v)).sum();

        tracing::debug!(path = %path.display(), keys = entries.len(), "opened file persistence");

        Ok(Self {
            path,
            limit_size,
            state: Mutex::new(FileState {
                entries,
                current_size,
            }),
            _lock_file: lock_file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.with_extension("lock"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }

    fn read_file(path: &Path) -> Result<BTreeMap<String, Value>> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != FILE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid data file magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != FILE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported data file version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);

        let available = file
            .metadata()?
            .len()
            .saturating_sub(HEADER_LEN + CHECKSUM_LEN);
        if len > available {
            return Err(StoreError::InvalidFormat(format!(
                "Payload length {} exceeds file size",
                len
            )));
        }

        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&payload);
        if expected != got {
            return Err(StoreError::ChecksumMismatch { expected, got });
        }

        Ok(rmp_serde::from_slice(&payload)?)
    }

    fn write_file(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        let payload = rmp_serde::to_vec(entries)?;
        let tmp_path = self.path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        file.write_all(FILE_MAGIC)?;
        file.write_all(&[FILE_VERSION])?;
        file.write_all(&(payload.len() as u64).to_le_bytes())?;
        file.write_all(&payload)?;
        file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
        file.sync_all()?;

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl Persistence for FilePersistence {
    fn get(&self, key: &str) -> std::result::Result<Option<Value>, PersistenceError> {
        Ok(self.state.lock().entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> std::result::Result<(), PersistenceError> {
        let mut state = self.state.lock();

        let previous_size = state
            .entries
            .get(key)
            .map(|old| entry_size(key, old))
            .unwrap_or(0);
        let incoming = entry_size(key, &value);
        let projected = state.current_size.saturating_sub(previous_size) + incoming;
        if projected > self.limit_size {
            return Err(PersistenceError::QuotaExceeded {
                current_size: state.current_size,
                limit_size: self.limit_size,
            });
        }

        let previous = state.entries.insert(key.to_string(), value);
        if let Err(e) = self.write_file(&state.entries) {
            // Keep memory in step with what is on disk.
            match previous {
                Some(old) => state.entries.insert(key.to_string(), old),
                None => state.entries.remove(key),
            };
            return Err(PersistenceError::Other(e.to_string()));
        }

        state.current_size = projected;
        Ok(())
    }

    fn remove(&self, key: &str) -> std::result::Result<(), PersistenceError> {
        let mut state = self.state.lock();

        let Some(old) = state.entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.write_file(&state.entries) {
            state.entries.insert(key.to_string(), old);
            return Err(PersistenceError::Other(e.to_string()));
        }

        let freed = entry_size(key, &old);
        state.current_size = state.current_size.saturating_sub(freed);
        Ok(())
    }

    fn info(&self) -> std::result::Result<PersistenceInfo, PersistenceError> {
        let state = self.state.lock();
        Ok(PersistenceInfo {
            keys: state.entries.keys().cloned().collect(),
            current_size: state.current_size,
            limit_size: self.limit_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_reopen_preserves_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.dsf");

        {
            let persistence = FilePersistence::open(&path, 1024 * 1024).unwrap();
            persistence.set("a", json!({"n": 1, "list": [1.5, "x", null]})).unwrap();
            persistence.set("b", json!(true)).unwrap();
            persistence.remove("b").unwrap();
        }

        let persistence = FilePersistence::open(&path, 1024 * 1024).unwrap();
        assert_eq!(
            persistence.get("a").unwrap(),
            Some(json!({"n": 1, "list": [1.5, "x", null]}))
        );
        assert_eq!(persistence.get("b").unwrap(), None);
        assert_eq!(persistence.info().unwrap().keys, vec!["a".to_string()]);
    }

    #[test]
    fn test_second_handle_is_locked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.dsf");

        let _first = FilePersistence::open(&path, 1024).unwrap();
        let second = FilePersistence::open(&path, 1024);
        assert!(matches!(second, Err(StoreError::Locked)));
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.dsf");

        {
            let persistence = FilePersistence::open(&path, 1024).unwrap();
            persistence.set("key", json!("value")).unwrap();
        }

        let mut bytes = fs::read(&path).unwrap();
        let payload_start = 4 + 1 + 8;
        bytes[payload_start + 1] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let result = FilePersistence::open(&path, 1024);
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.dsf");
        fs::write(&path, b"nope, not a data file").unwrap();

        let result = FilePersistence::open(&path, 1024);
        assert!(matches!(result, Err(StoreError::InvalidFormat(_))));
    }

    #[test]
    fn test_oversized_length_header_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.dsf");

        {
            let persistence = FilePersistence::open(&path, 1024).unwrap();
            persistence.set("key", json!("value")).unwrap();
        }

        let mut bytes = fs::read(&path).unwrap();
        bytes[5..13].copy_from_slice(&u64::MAX.to_le_bytes());
        fs::write(&path, bytes).unwrap();

        let result = FilePersistence::open(&path, 1024);
        assert!(matches!(result, Err(StoreError::InvalidFormat(_))));
    }

    #[test]
    fn test_quota_enforced() {
        let dir = TempDir::new().unwrap();
        let persistence = FilePersistence::open(dir.path().join("data.dsf"), 16).unwrap();

        persistence.set("k", json!("short")).unwrap();
        let result = persistence.set("other", json!("definitely too long"));
        assert!(matches!(result, Err(PersistenceError::QuotaExceeded { .. })));
        assert_eq!(persistence.get("other").unwrap(), None);
    }
}
