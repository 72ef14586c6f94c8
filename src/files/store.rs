//! File access for a single project tree: atomic writes, SHA-256
//! checksums, and frontmatter-preserving rewrites.
//!
//! All paths are POSIX-style strings relative to the project root; the
//! store is the only component that touches absolute paths.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use serde_yaml::Mapping;

use crate::error::{CoreError, Result};
use crate::markdown::frontmatter;

/// Files larger than this are hashed on the blocking pool.
const BLOCKING_HASH_THRESHOLD: u64 = 256 * 1024;

/// One SHA-256 implementation for the whole engine so checksums stay
/// comparable between the scanner, the store, and the index.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub len: u64,
    /// mtime, unix millis
    pub modified_ms: i64,
    /// ctime where the platform reports one, unix millis
    pub created_ms: Option<i64>,
}

impl FileStat {
    pub fn modified_secs(&self) -> i64 {
        self.modified_ms / 1000
    }

    pub fn created_secs(&self) -> Option<i64> {
        self.created_ms.map(|ms| ms / 1000)
    }

    pub(crate) fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let to_ms = |t: std::time::SystemTime| {
            t.duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0)
        };
        FileStat {
            len: meta.len(),
            modified_ms: meta.modified().map(to_ms).unwrap_or(0),
            created_ms: meta.created().ok().map(to_ms),
        }
    }
}

#[async_trait]
pub trait FileStore: Send + Sync {
    fn root(&self) -> &Path;

    async fn read(&self, path: &str) -> Result<(Vec<u8>, String)>;
    async fn read_to_string(&self, path: &str) -> Result<(String, String)>;
    /// Write via tmp file + fsync + rename; returns the checksum of the
    /// written bytes.
    async fn write_atomic(&self, path: &str, bytes: &[u8]) -> Result<String>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn rename(&self, old: &str, new: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> bool;
    async fn stat(&self, path: &str) -> Result<FileStat>;
    async fn compute_checksum(&self, path: &str) -> Result<String>;
    /// Frontmatter mapping plus the body exactly as it appears on disk.
    async fn read_frontmatter(&self, path: &str) -> Result<(Mapping, String)>;
    /// Update only the given keys, preserving unknown keys and the body
    /// verbatim; returns the post-write checksum.
    async fn write_frontmatter(&self, path: &str, updates: &Mapping) -> Result<String>;
}

pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: PathBuf) -> Self {
        LocalFileStore { root }
    }

    fn abs(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn read(&self, path: &str) -> Result<(Vec<u8>, String)> {
        let abs = self.abs(path);
        let bytes = tokio::fs::read(&abs)
            .await
            .map_err(|e| CoreError::file_op(&abs, e))?;
        let checksum = hash(bytes.clone()).await;
        Ok((bytes, checksum))
    }

    async fn read_to_string(&self, path: &str) -> Result<(String, String)> {
        let (bytes, checksum) = self.read(path).await?;
        let content = String::from_utf8(bytes).map_err(|e| {
            CoreError::file_op(
                self.abs(path),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        Ok((content, checksum))
    }

    async fn write_atomic(&self, path: &str, bytes: &[u8]) -> Result<String> {
        use tokio::io::AsyncWriteExt;

        let abs = self.abs(path);
        let map_err = |e| CoreError::file_op(&abs, e);

        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(map_err)?;
        }

        let tmp = abs.with_extension(match abs.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{ext}.tmp"),
            None => "tmp".to_string(),
        });

        let mut file = tokio::fs::File::create(&tmp).await.map_err(map_err)?;
        file.write_all(bytes).await.map_err(map_err)?;
        file.sync_all().await.map_err(map_err)?;
        drop(file);
        tokio::fs::rename(&tmp, &abs).await.map_err(map_err)?;

        Ok(hash(bytes.to_vec()).await)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let abs = self.abs(path);
        match tokio::fs::remove_file(&abs).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::file_op(abs, e)),
        }
    }

    async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let from = self.abs(old);
        let to = self.abs(new);
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::file_op(parent, e))?;
        }
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| CoreError::file_op(from, e))
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::try_exists(self.abs(path)).await.unwrap_or(false)
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let abs = self.abs(path);
        let meta = tokio::fs::metadata(&abs)
            .await
            .map_err(|e| CoreError::file_op(abs, e))?;
        Ok(FileStat::from_metadata(&meta))
    }

    async fn compute_checksum(&self, path: &str) -> Result<String> {
        let (_, checksum) = self.read(path).await?;
        Ok(checksum)
    }

    async fn read_frontmatter(&self, path: &str) -> Result<(Mapping, String)> {
        let (content, _) = self.read_to_string(path).await?;
        let (mapping, body) =
            frontmatter::split(&content).map_err(|reason| CoreError::parse(path, reason))?;
        Ok((mapping.unwrap_or_default(), body.to_string()))
    }

    async fn write_frontmatter(&self, path: &str, updates: &Mapping) -> Result<String> {
        let (mut mapping, body) = self.read_frontmatter(path).await?;
        frontmatter::merge(&mut mapping, updates);
        let content =
            frontmatter::compose(&mapping, &body).map_err(|reason| CoreError::parse(path, reason))?;
        self.write_atomic(path, content.as_bytes()).await
    }
}

/// Hash on the blocking pool above a size threshold; inline below it.
async fn hash(bytes: Vec<u8>) -> String {
    if bytes.len() as u64 > BLOCKING_HASH_THRESHOLD {
        tokio::task::spawn_blocking(move || checksum_bytes(&bytes))
            .await
            .unwrap_or_default()
    } else {
        checksum_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    fn store() -> (tempfile::TempDir, LocalFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn checksum_matches_known_vector() {
        assert_eq!(
            checksum_bytes(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (_dir, store) = store();
        let written = store.write_atomic("notes/a.md", b"content").await.unwrap();
        let (bytes, read_checksum) = store.read("notes/a.md").await.unwrap();
        assert_eq!(bytes, b"content");
        assert_eq!(written, read_checksum);
    }

    #[tokio::test]
    async fn write_leaves_no_tmp_file_behind() {
        let (dir, store) = store();
        store.write_atomic("a.md", b"x").await.unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["a.md"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.write_atomic("a.md", b"x").await.unwrap();
        store.delete("a.md").await.unwrap();
        store.delete("a.md").await.unwrap();
        assert!(!store.exists("a.md").await);
    }

    #[tokio::test]
    async fn frontmatter_update_preserves_unknown_keys_and_body() {
        let (_dir, store) = store();
        store
            .write_atomic(
                "a.md",
                b"---\ntitle: Keep\ncustom: value\n---\n\nBody stays.\n",
            )
            .await
            .unwrap();

        let mut updates = Mapping::new();
        updates.insert(Value::from("permalink"), Value::from("a-1"));
        store.write_frontmatter("a.md", &updates).await.unwrap();

        let (mapping, body) = store.read_frontmatter("a.md").await.unwrap();
        assert_eq!(mapping.get("title"), Some(&Value::from("Keep")));
        assert_eq!(
            mapping.get("custom"),
            Some(&Value::from("value"))
        );
        assert_eq!(mapping.get("permalink"), Some(&Value::from("a-1")));
        assert_eq!(body, "\nBody stays.\n");
    }

    #[tokio::test]
    async fn write_frontmatter_returns_post_write_checksum() {
        let (_dir, store) = store();
        store.write_atomic("a.md", b"no frontmatter\n").await.unwrap();

        let mut updates = Mapping::new();
        updates.insert(Value::from("permalink"), Value::from("a"));
        let checksum = store.write_frontmatter("a.md", &updates).await.unwrap();

        let recomputed = store.compute_checksum("a.md").await.unwrap();
        assert_eq!(checksum, recomputed);
    }
}
