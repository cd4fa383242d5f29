//! Single-file store.
//!
//! Layout: magic, version byte, payload length (u32 LE), MessagePack map,
//! CRC32 of the payload (u32 LE). Every write replaces the whole file via a
//! temp file and rename.
//!
//! A file that cannot be decoded does not prevent opening: reads fail with
//! [`ClientError::Corruption`] until the next write replaces it.

use super::KeyValueStore;
use crate::error::{ClientError, Result};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the token file.
const TOKEN_FILE_MAGIC: &[u8; 4] = b"TOK\0";

/// Current token file format version.
const TOKEN_FILE_VERSION: u8 = 1;

/// Values are tiny; anything bigger is a damaged length field.
const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// File-backed store holding an exclusive lock for its lifetime.
pub struct FileStore {
    /// Path to the token file.
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Cached contents, written through on every change.
    values: RwLock<BTreeMap<String, String>>,

    /// Why the file on disk could not be decoded, until it is rewritten.
    damage: RwLock<Option<String>>,
}

impl FileStore {
    /// Open the file at `path`, creating parent directories as needed.
    /// A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = Self::acquire_lock(&path)?;

        let (values, damage) = if path.exists() {
            match Self::read_file(&path) {
                Ok(values) => (values, None),
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "identity file unreadable, it will be replaced on the next write"
                    );
                    (BTreeMap::new(), Some(err.to_string()))
                }
            }
        } else {
            (BTreeMap::new(), None)
        };

        tracing::debug!(path = %path.display(), entries = values.len(), "opened identity store");

        Ok(Self {
            path,
            _lock_file: lock_file,
            values: RwLock::new(values),
            damage: RwLock::new(damage),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(Self::sibling(path, ".lock"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| ClientError::Locked)?;

        Ok(lock_file)
    }

    fn sibling(path: &Path, suffix: &str) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }

    fn read_file(path: &Path) -> Result<BTreeMap<String, String>> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != TOKEN_FILE_MAGIC {
            return Err(ClientError::InvalidFormat("Invalid token file magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != TOKEN_FILE_VERSION {
            return Err(ClientError::InvalidFormat(format!(
                "Unsupported token file version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_PAYLOAD_BYTES {
            return Err(ClientError::Corruption("Token file payload too large".into()));
        }

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        if u32::from_le_bytes(checksum_bytes) != crc32fast::hash(&encoded) {
            return Err(ClientError::Corruption("Token file checksum mismatch".into()));
        }

        Ok(rmp_serde::from_slice(&encoded)?)
    }

    fn write_file(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let encoded = rmp_serde::to_vec(values)?;
        let tmp_path = Self::sibling(&self.path, ".tmp");

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;

            file.write_all(TOKEN_FILE_MAGIC)?;
            file.write_all(&[TOKEN_FILE_VERSION])?;
            file.write_all(&(encoded.len() as u32).to_le_bytes())?;
            file.write_all(&encoded)?;
            file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(detail) = self.damage.read().as_ref() {
            return Err(ClientError::Corruption(detail.clone()));
        }
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write();
        let mut updated = values.clone();
        updated.insert(key.to_string(), value.to_string());
        self.write_file(&updated)?;
        *values = updated;
        self.damage.write().take();
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut values = self.values.write();
        if !values.contains_key(key) {
            return Ok(());
        }
        let mut updated = values.clone();
        updated.remove(key);
        self.write_file(&updated)?;
        *values = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity.bin");

        {
            let store = FileStore::open(&path).unwrap();
            store.set("connection_token", "abc-123").unwrap();
            store.set("other", "x").unwrap();
            store.delete("other").unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("connection_token").unwrap().as_deref(), Some("abc-123"));
        assert_eq!(store.get("other").unwrap(), None);
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity.bin");

        let _first = FileStore::open(&path).unwrap();
        let second = FileStore::open(&path);
        assert!(matches!(second, Err(ClientError::Locked)));
    }

    #[test]
    fn test_corrupt_payload_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity.bin");

        {
            let store = FileStore::open(&path).unwrap();
            store.set("connection_token", "abc-123").unwrap();
        }

        // Flip one payload byte
        let mut bytes = fs::read(&path).unwrap();
        let idx = 4 + 1 + 4 + 2;
        bytes[idx] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let store = FileStore::open(&path).unwrap();
        let result = store.get("connection_token");
        assert!(matches!(result, Err(ClientError::Corruption(_))));
    }

    #[test]
    fn test_write_replaces_damaged_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity.bin");
        fs::write(&path, b"garbage").unwrap();

        {
            let store = FileStore::open(&path).unwrap();
            assert!(store.get("connection_token").is_err());
            store.set("connection_token", "fresh-1").unwrap();
            assert_eq!(store.get("connection_token").unwrap().as_deref(), Some("fresh-1"));
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("connection_token").unwrap().as_deref(), Some("fresh-1"));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("identity.bin");
        fs::write(&path, b"NOPE\x01\x00\x00\x00\x00").unwrap();

        let store = FileStore::open(&path).unwrap();
        let err = store.get("connection_token").unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state").join("identity.bin");

        let store = FileStore::open(&path).unwrap();
        store.set("k", "v").unwrap();
        assert!(path.exists());
    }
}
