//! Blob storage for uploaded file payloads.
//!
//! The metadata store never sees file bytes; records only carry blob keys.
//! This module defines the capability the rest of the service needs from a
//! blob backend, plus a local-disk implementation.

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid blob key")]
    InvalidKey,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// A byte range requested for a read, parsed from an HTTP `Range` header
/// value. Offsets are inclusive, mirroring the header syntax.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-` or `bytes=start-end`.
    From { start: u64, end: Option<u64> },
    /// `bytes=-n`: the trailing `n` bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Parse a single-range `Range` header value. Multi-range requests and
    /// malformed values yield `None`; callers fall back to the full body.
    pub fn parse(header: &str) -> Option<Self> {
        let spec = header.strip_prefix("bytes=")?.trim();
        if spec.contains(',') {
            return None;
        }
        let (start, end) = spec.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());
        if start.is_empty() {
            return end.parse().ok().map(ByteRange::Suffix);
        }
        let start = start.parse().ok()?;
        let end = if end.is_empty() {
            None
        } else {
            Some(end.parse().ok()?)
        };
        Some(ByteRange::From { start, end })
    }

    /// Resolve to inclusive `(start, end)` offsets within a blob of
    /// `total_len` bytes, or `None` when the range is unsatisfiable.
    pub fn resolve(self, total_len: u64) -> Option<(u64, u64)> {
        if total_len == 0 {
            return None;
        }
        match self {
            ByteRange::From { start, end } => {
                if start >= total_len {
                    return None;
                }
                let end = end.unwrap_or(total_len - 1).min(total_len - 1);
                if end < start {
                    return None;
                }
                Some((start, end))
            }
            ByteRange::Suffix(n) => {
                if n == 0 {
                    return None;
                }
                Some((total_len.saturating_sub(n), total_len - 1))
            }
        }
    }
}

/// An opened blob ready to stream out, with the metadata needed to build a
/// response around it.
pub struct BlobReader {
    /// Handle positioned at the first requested byte.
    pub file: File,
    /// Number of bytes the reader should yield (the range length when a
    /// range was applied).
    pub len: u64,
    /// Total size of the blob.
    pub total_len: u64,
    /// Offset of the first yielded byte when a range was applied.
    pub range_start: Option<u64>,
    /// Content type, when the backend can tell.
    pub content_type: Option<String>,
}

/// Capabilities required from a blob backend.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob under `key`, returning the number of bytes written.
    async fn put(&self, key: &str, content_type: Option<&str>, data: Bytes) -> BlobResult<u64>;

    /// Open a blob for reading, optionally restricted to a byte range.
    /// `None` when no blob exists under `key`. An unsatisfiable range falls
    /// back to the full blob.
    async fn get(&self, key: &str, range: Option<ByteRange>) -> BlobResult<Option<BlobReader>>;

    /// Remove a batch of blobs. Already-missing blobs are not an error, so
    /// cleanup can be retried.
    async fn delete(&self, keys: &[String]) -> BlobResult<()>;
}

const MAX_BLOB_KEY_LEN: usize = 1024;

/// Blob store backed by a local directory. Keys map to relative paths beneath
/// `base_path`; callers supply keys that already include a per-upload prefix.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    base_path: PathBuf,
}

impl FsBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Reject keys that could escape `base_path`.
    fn ensure_key_safe(key: &str) -> BlobResult<()> {
        if key.is_empty() || key.len() > MAX_BLOB_KEY_LEN {
            return Err(BlobError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(BlobError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(BlobError::InvalidKey);
        }
        Ok(())
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    /// Recursively remove empty directories up to (but not including) the
    /// base path. Stops at the first non-empty or missing directory.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    /// Write to a temp file, fsync, then rename into place so a crashed
    /// upload never leaves a half-written blob under a live key.
    async fn put(&self, key: &str, _content_type: Option<&str>, data: Bytes) -> BlobResult<u64> {
        Self::ensure_key_safe(key)?;
        let file_path = self.blob_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BlobError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = file.write_all(&data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BlobError::Io(err));
            }
        }

        Ok(data.len() as u64)
    }

    async fn get(&self, key: &str, range: Option<ByteRange>) -> BlobResult<Option<BlobReader>> {
        Self::ensure_key_safe(key)?;
        let path = self.blob_path(key);
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(BlobError::Io(err)),
        };
        let total_len = file.metadata().await?.len();
        let content_type = mime_guess::from_path(&path)
            .first()
            .map(|mime| mime.essence_str().to_string());

        let resolved = range.and_then(|r| r.resolve(total_len));
        let (offset, len, range_start) = match resolved {
            Some((start, end)) => (start, end - start + 1, Some(start)),
            None => (0, total_len, None),
        };
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }

        Ok(Some(BlobReader {
            file,
            len,
            total_len,
            range_start,
            content_type,
        }))
    }

    async fn delete(&self, keys: &[String]) -> BlobResult<()> {
        for key in keys {
            // Keys come from stored records; a corrupted entry should not
            // abort cleanup of the rest of the batch.
            if Self::ensure_key_safe(key).is_err() {
                debug!("skipping invalid blob key {:?}", key);
                continue;
            }
            let path = self.blob_path(key);
            match fs::remove_file(&path).await {
                Ok(_) => debug!("removed blob {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("blob {} already missing", path.display());
                }
                Err(err) => return Err(BlobError::Io(err)),
            }
            if let Some(parent) = path.parent() {
                self.prune_empty_dirs(parent).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (FsBlobStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FsBlobStore::new(dir.path()), dir)
    }

    async fn read_all(reader: &mut BlobReader) -> Vec<u8> {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        (&mut reader.file)
            .take(reader.len)
            .read_to_end(&mut buf)
            .await
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn put_then_get() {
        let (store, _dir) = setup();
        let size = store
            .put("drops/1/a.txt", Some("text/plain"), Bytes::from_static(b"hello world"))
            .await
            .unwrap();
        assert_eq!(size, 11);

        let mut reader = store.get("drops/1/a.txt", None).await.unwrap().unwrap();
        assert_eq!(reader.len, 11);
        assert_eq!(reader.total_len, 11);
        assert_eq!(reader.range_start, None);
        assert_eq!(reader.content_type.as_deref(), Some("text/plain"));
        assert_eq!(read_all(&mut reader).await, b"hello world");
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let (store, _dir) = setup();
        assert!(store.get("drops/1/nope.txt", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let (store, _dir) = setup();
        store
            .put("drops/1/a.txt", None, Bytes::from_static(b"one"))
            .await
            .unwrap();
        store
            .put("drops/1/a.txt", None, Bytes::from_static(b"two!"))
            .await
            .unwrap();

        let mut reader = store.get("drops/1/a.txt", None).await.unwrap().unwrap();
        assert_eq!(read_all(&mut reader).await, b"two!");
    }

    #[tokio::test]
    async fn get_with_range() {
        let (store, _dir) = setup();
        store
            .put("drops/1/a.txt", None, Bytes::from_static(b"hello world"))
            .await
            .unwrap();

        let range = ByteRange::parse("bytes=6-10").unwrap();
        let mut reader = store
            .get("drops/1/a.txt", Some(range))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reader.len, 5);
        assert_eq!(reader.total_len, 11);
        assert_eq!(reader.range_start, Some(6));
        assert_eq!(read_all(&mut reader).await, b"world");
    }

    #[tokio::test]
    async fn get_with_unsatisfiable_range_falls_back_to_full() {
        let (store, _dir) = setup();
        store
            .put("drops/1/a.txt", None, Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let range = ByteRange::parse("bytes=10-20").unwrap();
        let mut reader = store
            .get("drops/1/a.txt", Some(range))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reader.range_start, None);
        assert_eq!(read_all(&mut reader).await, b"abc");
    }

    #[tokio::test]
    async fn delete_removes_blobs_and_tolerates_missing() {
        let (store, dir) = setup();
        store
            .put("drops/1/a.txt", None, Bytes::from_static(b"a"))
            .await
            .unwrap();
        store
            .put("drops/1/b.txt", None, Bytes::from_static(b"b"))
            .await
            .unwrap();

        let keys = vec![
            "drops/1/a.txt".to_string(),
            "drops/1/b.txt".to_string(),
            "drops/1/missing.txt".to_string(),
        ];
        store.delete(&keys).await.unwrap();
        store.delete(&keys).await.unwrap();

        assert!(store.get("drops/1/a.txt", None).await.unwrap().is_none());
        // The per-upload directory is pruned once emptied.
        assert!(!dir.path().join("drops/1").exists());
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let (store, _dir) = setup();
        for key in ["", "/etc/passwd", "../escape", "a/../../b", "a\\b"] {
            let err = store.put(key, None, Bytes::from_static(b"x")).await;
            assert!(matches!(err, Err(BlobError::InvalidKey)), "key {key:?}");
        }
    }

    #[test]
    fn parse_range_forms() {
        assert_eq!(
            ByteRange::parse("bytes=0-4"),
            Some(ByteRange::From { start: 0, end: Some(4) })
        );
        assert_eq!(
            ByteRange::parse("bytes=6-"),
            Some(ByteRange::From { start: 6, end: None })
        );
        assert_eq!(ByteRange::parse("bytes=-5"), Some(ByteRange::Suffix(5)));
        assert_eq!(ByteRange::parse("bytes=0-4,6-8"), None);
        assert_eq!(ByteRange::parse("items=0-4"), None);
        assert_eq!(ByteRange::parse("bytes=x-y"), None);
    }

    #[test]
    fn resolve_clamps_and_rejects() {
        let from = |start, end| ByteRange::From { start, end };
        assert_eq!(from(0, Some(4)).resolve(11), Some((0, 4)));
        assert_eq!(from(6, None).resolve(11), Some((6, 10)));
        assert_eq!(from(0, Some(100)).resolve(11), Some((0, 10)));
        assert_eq!(from(11, None).resolve(11), None);
        assert_eq!(from(4, Some(2)).resolve(11), None);
        assert_eq!(ByteRange::Suffix(5).resolve(11), Some((6, 10)));
        assert_eq!(ByteRange::Suffix(100).resolve(11), Some((0, 10)));
        assert_eq!(ByteRange::Suffix(0).resolve(11), None);
        assert_eq!(from(0, None).resolve(0), None);
    }
}
