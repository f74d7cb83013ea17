//! Durable catalog storage with an in-memory fast path
//!
//! One gzip blob and one metadata file live in the catalog directory. The
//! blob is also kept in RAM after every successful write (and at open, best
//! effort), so readers normally never touch the disk.

use crate::error::{KegError, KegResult};
use crate::fsutil;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const INDEX_FILE: &str = "index-light.json.gz";
const META_FILE: &str = "meta.json";

/// Bookkeeping persisted next to the catalog blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogMeta {
    /// Local content identity: `sha256:<hex>` of the stored blob
    pub etag: String,
    pub generated_at: Option<DateTime<Utc>>,
    pub count: usize,
    pub size_bytes: u64,
    pub sha256: String,
    /// Validator from the last 200 response; sent back as If-None-Match
    #[serde(skip_serializing_if = "String::is_empty")]
    pub upstream_etag: String,
    pub last_success: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl CatalogMeta {
    /// Most recent of `last_checked` and `last_success`
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_checked.max(self.last_success)
    }

    /// Record a network check at `now` without touching anything else.
    pub fn touch_checked(&mut self, now: DateTime<Utc>) {
        self.last_checked = Some(now);
        self.normalize();
    }

    /// Restore `last_success <= last_checked`.
    fn normalize(&mut self) {
        if let Some(success) = self.last_success {
            if self.last_checked.map_or(true, |checked| checked < success) {
                self.last_checked = Some(success);
            }
        }
    }
}

/// In-memory copy of the stored blob
#[derive(Debug, Clone)]
pub struct HotIndex {
    pub data: Arc<[u8]>,
    pub etag: String,
    pub generated_at: Option<DateTime<Utc>>,
    pub size: u64,
}

/// Seekable view over the stored blob, from RAM or from disk
#[derive(Debug)]
pub enum IndexReader {
    Memory(Cursor<Arc<[u8]>>),
    Disk(File),
}

impl Read for IndexReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Memory(c) => c.read(buf),
            Self::Disk(f) => f.read(buf),
        }
    }
}

impl Seek for IndexReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Memory(c) => c.seek(pos),
            Self::Disk(f) => f.seek(pos),
        }
    }
}

/// Result of [`CatalogStore::open_index_gz`]
#[derive(Debug)]
pub struct OpenedIndex {
    pub reader: IndexReader,
    pub etag: String,
    pub generated_at: Option<DateTime<Utc>>,
    pub size: u64,
}

impl OpenedIndex {
    pub fn is_memory(&self) -> bool {
        matches!(self.reader, IndexReader::Memory(_))
    }
}

pub struct CatalogStore {
    dir: PathBuf,
    index_path: PathBuf,
    meta_path: PathBuf,
    hot: RwLock<Option<HotIndex>>,
}

impl CatalogStore {
    /// Open the store rooted at `dir`, loading any existing blob into RAM.
    ///
    /// A missing or unreadable blob is not an error; the store simply starts cold.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let store = Self {
            index_path: dir.join(INDEX_FILE),
            meta_path: dir.join(META_FILE),
            dir,
            hot: RwLock::new(None),
        };
        match store.load_hot() {
            Ok(Some(hot)) => {
                debug!("Loaded catalog into memory ({} bytes)", hot.size);
                store.set_hot(Some(hot));
            }
            Ok(None) => debug!("No catalog at {}", store.index_path.display()),
            Err(e) => debug!("Catalog not loaded into memory: {}", e),
        }
        store
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn has_index(&self) -> bool {
        self.index_path.is_file()
    }

    /// The in-memory blob, if one is loaded
    pub fn get_hot(&self) -> Option<HotIndex> {
        match self.hot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Open the stored blob, preferring RAM and falling back to the file.
    pub fn open_index_gz(&self, cancel: &CancellationToken) -> KegResult<OpenedIndex> {
        if cancel.is_cancelled() {
            return Err(KegError::Cancelled);
        }
        if let Some(hot) = self.get_hot() {
            return Ok(OpenedIndex {
                reader: IndexReader::Memory(Cursor::new(hot.data)),
                etag: hot.etag,
                generated_at: hot.generated_at,
                size: hot.size,
            });
        }

        let file = match File::open(&self.index_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(KegError::CatalogNotFound(self.index_path.clone()))
            }
            Err(e) => {
                return Err(KegError::io(
                    format!("opening {}", self.index_path.display()),
                    e,
                ))
            }
        };
        let size = file
            .metadata()
            .map_err(|e| KegError::io(format!("inspecting {}", self.index_path.display()), e))?
            .len();
        let meta = self.read_meta()?.unwrap_or_default();

        Ok(OpenedIndex {
            reader: IndexReader::Disk(file),
            etag: meta.etag,
            generated_at: meta.generated_at,
            size,
        })
    }

    /// Atomically replace the blob with `reader`'s content, then the metadata,
    /// then reload the in-memory copy.
    ///
    /// `etag`, `sha256` and `size_bytes` in the stored metadata always describe
    /// the bytes actually written; the caller's values for them are ignored.
    pub fn write_index_gz(&self, reader: &mut dyn Read, meta: &CatalogMeta) -> KegResult<CatalogMeta> {
        let written = fsutil::write_file_atomic(&self.index_path, reader)?;

        let mut meta = meta.clone();
        if !meta.sha256.is_empty() && meta.sha256 != written.sha256 {
            debug!(
                "Caller digest {} differs from stored content {}",
                meta.sha256, written.sha256
            );
        }
        meta.etag = content_etag(&written.sha256);
        meta.sha256 = written.sha256;
        meta.size_bytes = written.bytes;
        meta.normalize();
        self.write_meta(&meta)?;

        match self.load_hot() {
            Ok(hot) => self.set_hot(hot),
            Err(e) => {
                warn!("Catalog written but not reloaded into memory: {}", e);
                self.set_hot(None);
            }
        }
        debug!(
            "Stored catalog {} ({} items, {} bytes)",
            meta.etag, meta.count, meta.size_bytes
        );
        Ok(meta)
    }

    /// Read metadata. Missing or corrupt metadata reads as `None`.
    pub fn read_meta(&self) -> KegResult<Option<CatalogMeta>> {
        let raw = match fs::read(&self.meta_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KegError::io(
                    format!("reading {}", self.meta_path.display()),
                    e,
                ))
            }
        };
        match serde_json::from_slice::<CatalogMeta>(&raw) {
            Ok(mut meta) => {
                meta.normalize();
                Ok(Some(meta))
            }
            Err(e) => {
                debug!("Ignoring corrupt {}: {}", self.meta_path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn write_meta(&self, meta: &CatalogMeta) -> KegResult<()> {
        let mut meta = meta.clone();
        meta.normalize();
        fsutil::write_json_atomic(&self.meta_path, &meta)
    }

    fn load_hot(&self) -> KegResult<Option<HotIndex>> {
        let data = match fs::read(&self.index_path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KegError::io(
                    format!("reading {}", self.index_path.display()),
                    e,
                ))
            }
        };

        let meta = self.read_meta()?.unwrap_or_default();
        let etag = if meta.etag.is_empty() {
            content_etag(&hex::encode(Sha256::digest(&data)))
        } else {
            meta.etag
        };

        Ok(Some(HotIndex {
            size: data.len() as u64,
            data: data.into(),
            etag,
            generated_at: meta.generated_at,
        }))
    }

    fn set_hot(&self, hot: Option<HotIndex>) {
        match self.hot.write() {
            Ok(mut guard) => *guard = hot,
            Err(poisoned) => *poisoned.into_inner() = hot,
        }
    }

    #[cfg(test)]
    pub(crate) fn clear_hot(&self) {
        self.set_hot(None);
    }
}

/// Local ETag for a blob with the given hex digest
fn content_etag(sha256: &str) -> String {
    format!("sha256:{}", sha256)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn meta(etag: &str) -> CatalogMeta {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        CatalogMeta {
            etag: etag.to_string(),
            generated_at: Some(at),
            count: 3,
            sha256: etag.trim_start_matches("sha256:").to_string(),
            upstream_etag: "\"up-1\"".to_string(),
            last_success: Some(at),
            last_checked: Some(at),
            ..CatalogMeta::default()
        }
    }

    fn etag_of(data: &[u8]) -> String {
        format!("sha256:{}", hex::encode(Sha256::digest(data)))
    }

    fn read_all(opened: OpenedIndex) -> Vec<u8> {
        let mut reader = opened.reader;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        buf
    }

    struct FailingReader {
        sent: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"part");
            Ok(4)
        }
    }

    #[test]
    fn open_before_write_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open(dir.path().join("catalog"));

        assert!(store.get_hot().is_none());
        assert!(!store.has_index());
        let err = store.open_index_gz(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, KegError::CatalogNotFound(_)));
        assert!(store.read_meta().unwrap().is_none());
    }

    #[test]
    fn write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open(dir.path());
        let blob = b"\x1f\x8bgzip-ish bytes".to_vec();

        let stored = store
            .write_index_gz(&mut &blob[..], &meta("sha256:aaa"))
            .unwrap();
        assert_eq!(stored.size_bytes, blob.len() as u64);
        assert_eq!(stored.etag, etag_of(&blob));

        let hot = store.get_hot().unwrap();
        assert_eq!(&hot.data[..], &blob[..]);
        assert_eq!(hot.etag, stored.etag);
        assert_eq!(hot.size, blob.len() as u64);

        let opened = store.open_index_gz(&CancellationToken::new()).unwrap();
        assert!(opened.is_memory());
        assert_eq!(opened.etag, stored.etag);
        assert_eq!(opened.generated_at, stored.generated_at);
        assert_eq!(opened.size, blob.len() as u64);
        assert_eq!(read_all(opened), blob);

        assert_eq!(store.read_meta().unwrap().unwrap(), stored);
    }

    #[test]
    fn falls_back_to_disk_with_persisted_meta() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open(dir.path());
        store
            .write_index_gz(&mut &b"on-disk"[..], &meta("sha256:bbb"))
            .unwrap();
        store.clear_hot();

        let opened = store.open_index_gz(&CancellationToken::new()).unwrap();
        assert!(!opened.is_memory());
        assert_eq!(opened.etag, etag_of(b"on-disk"));
        assert_eq!(opened.size, 7);
        assert_eq!(read_all(opened), b"on-disk");
    }

    #[test]
    fn reopen_loads_hot_copy() {
        let dir = TempDir::new().unwrap();
        CatalogStore::open(dir.path())
            .write_index_gz(&mut &b"persisted"[..], &meta("sha256:ccc"))
            .unwrap();

        let reopened = CatalogStore::open(dir.path());
        let hot = reopened.get_hot().unwrap();
        assert_eq!(&hot.data[..], b"persisted");
        assert_eq!(hot.etag, etag_of(b"persisted"));
    }

    #[test]
    fn hot_etag_derived_from_content_without_meta() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(INDEX_FILE), b"orphan").unwrap();

        let store = CatalogStore::open(dir.path());
        let expected = format!("sha256:{}", hex::encode(Sha256::digest(b"orphan")));
        assert_eq!(store.get_hot().unwrap().etag, expected);
    }

    #[test]
    fn failed_write_keeps_previous_catalog() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open(dir.path());
        store
            .write_index_gz(&mut &b"good"[..], &meta("sha256:good"))
            .unwrap();

        let err = store
            .write_index_gz(&mut FailingReader { sent: false }, &meta("sha256:bad"))
            .unwrap_err();
        assert!(matches!(err, KegError::Io { .. }));

        assert_eq!(read_all(store.open_index_gz(&CancellationToken::new()).unwrap()), b"good");
        assert_eq!(fs::read(store.index_path()).unwrap(), b"good");
        assert_eq!(store.read_meta().unwrap().unwrap().etag, etag_of(b"good"));

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn stored_identity_comes_from_content() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open(dir.path());

        let stored = store
            .write_index_gz(&mut &b"payload"[..], &meta("sha256:not-the-content"))
            .unwrap();

        let digest = hex::encode(Sha256::digest(b"payload"));
        assert_eq!(stored.sha256, digest);
        assert_eq!(stored.etag, format!("sha256:{}", digest));
        assert_eq!(stored.upstream_etag, "\"up-1\"");
        assert_eq!(store.read_meta().unwrap().unwrap(), stored);
        assert_eq!(store.get_hot().unwrap().etag, stored.etag);
    }

    #[test]
    fn cancelled_open_is_refused() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open(dir.path());
        store
            .write_index_gz(&mut &b"blob"[..], &meta("sha256:x"))
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            store.open_index_gz(&cancel),
            Err(KegError::Cancelled)
        ));
    }

    #[test]
    fn corrupt_meta_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(META_FILE), b"{ not json").unwrap();
        assert!(CatalogStore::open(dir.path()).read_meta().unwrap().is_none());
    }

    #[test]
    fn meta_keeps_success_not_after_checked() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open(dir.path());
        let mut m = meta("sha256:x");
        m.last_checked = Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        store.write_meta(&m).unwrap();

        let read = store.read_meta().unwrap().unwrap();
        assert_eq!(read.last_checked, read.last_success);
    }

    #[test]
    fn touch_checked_only_moves_checked() {
        let mut m = meta("sha256:x");
        let later = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        m.touch_checked(later);
        assert_eq!(m.last_checked, Some(later));
        assert_eq!(m.last_activity(), Some(later));
        assert_eq!(m.etag, "sha256:x");
        assert!(m.last_success < m.last_checked);
    }

    #[test]
    fn upstream_etag_omitted_when_empty() {
        let json = serde_json::to_string(&CatalogMeta::default()).unwrap();
        assert!(!json.contains("upstream_etag"));
    }
}
