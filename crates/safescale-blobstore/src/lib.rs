//! Blob storage (collaborator of C4): a `bucket`/`key` byte store.
//!
//! `safescale-metadata` persists each resource row as a JSON blob through
//! this trait rather than owning file I/O itself, the same separation the
//! teacher draws between `JsonStore`'s disk format and the domain stores
//! (`ApiKeyStore`, `ConfigStore`, `SecretStore`) built on top of it.
//! [`FilesystemBlobStore`] snapshots every write straight to disk, exactly
//! like `JsonStore::save`; [`InMemoryBlobStore`] exists for tests that don't
//! want a temp directory.

#![forbid(unsafe_code)]

use parking_lot::RwLock;
use safescale_error::{Result, SafeScaleError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where resource rows and property payloads live. Implementations must be
/// safe to share across the tokio runtime's worker threads.
pub trait BlobStore: Send + Sync {
    fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    fn write(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<()>;
    /// Idempotent: deleting an absent key is not an error.
    fn delete(&self, bucket: &str, key: &str) -> Result<()>;
    /// Invoke `cb` once per key in `bucket` starting with `prefix`, in
    /// lexicographic order. A `cb` error aborts iteration and is returned.
    fn list(&self, bucket: &str, prefix: &str, cb: &mut dyn FnMut(&str) -> Result<()>)
        -> Result<()>;
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

/// Snapshots every write to `{root}/{bucket}/{key}`. Directories are created
/// on demand, mirroring `JsonStore`'s `create_dir_all` on save.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(sanitize_key(key))
    }
}

impl BlobStore for FilesystemBlobStore {
    fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(bucket, key);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SafeScaleError::not_found(format!("{bucket}/{key}"))
            } else {
                SafeScaleError::not_available(format!(
                    "reading {}: {e}",
                    path.display()
                ))
            }
        })
    }

    fn write(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(bucket, key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SafeScaleError::not_available(format!("creating {}: {e}", parent.display()))
            })?;
        }
        std::fs::write(&path, bytes).map_err(|e| {
            SafeScaleError::not_available(format!("writing {}: {e}", path.display()))
        })?;
        debug!(bucket, key, bytes = bytes.len(), "blob written");
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.path_for(bucket, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SafeScaleError::not_available(format!(
                "deleting {}: {e}",
                path.display()
            ))),
        }
    }

    fn list(
        &self,
        bucket: &str,
        prefix: &str,
        cb: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<()> {
        let dir = self.root.join(bucket);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(SafeScaleError::not_available(format!(
                    "listing {}: {e}",
                    dir.display()
                )))
            }
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                SafeScaleError::not_available(format!("reading directory entry: {e}"))
            })?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        for key in &keys {
            cb(key)?;
        }
        Ok(())
    }
}

/// In-memory `BlobStore` for unit tests that don't need a temp directory.
#[derive(Default)]
pub struct InMemoryBlobStore {
    data: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.data
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| SafeScaleError::not_found(format!("{bucket}/{key}")))
    }

    fn write(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<()> {
        self.data
            .write()
            .insert((bucket.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.data
            .write()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    fn list(
        &self,
        bucket: &str,
        prefix: &str,
        cb: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<()> {
        let keys: Vec<String> = self
            .data
            .read()
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        for key in &keys {
            cb(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_store_roundtrips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemBlobStore::new(dir.path());
        store.write("hosts", "h1", b"{}").expect("write");
        assert_eq!(store.read("hosts", "h1").unwrap(), b"{}");
    }

    #[test]
    fn filesystem_store_read_missing_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemBlobStore::new(dir.path());
        let err = store.read("hosts", "ghost").unwrap_err();
        assert_eq!(err.kind, safescale_error::ErrorKind::NotFound);
    }

    #[test]
    fn filesystem_store_delete_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemBlobStore::new(dir.path());
        store.write("hosts", "h1", b"{}").expect("write");
        store.delete("hosts", "h1").expect("first delete");
        store.delete("hosts", "h1").expect("second delete is a no-op");
    }

    #[test]
    fn filesystem_store_lists_sorted_by_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemBlobStore::new(dir.path());
        store.write("hosts", "web-2", b"{}").unwrap();
        store.write("hosts", "web-1", b"{}").unwrap();
        store.write("hosts", "db-1", b"{}").unwrap();

        let mut seen = Vec::new();
        store
            .list("hosts", "web-", &mut |key| {
                seen.push(key.to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec!["web-1", "web-2"]);
    }

    #[test]
    fn in_memory_store_roundtrips_and_lists() {
        let store = InMemoryBlobStore::new();
        store.write("networks", "n1", b"abc").unwrap();
        store.write("networks", "n2", b"def").unwrap();
        assert_eq!(store.read("networks", "n1").unwrap(), b"abc");

        let mut count = 0;
        store
            .list("networks", "", &mut |_| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 2);

        store.delete("networks", "n1").unwrap();
        assert!(store.read("networks", "n1").is_err());
    }
}
