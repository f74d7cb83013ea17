//! Crash-safe file replacement
//!
//! Every persisted artifact is written to a uniquely named temp file in the
//! destination directory, synced, renamed over the target, and the directory
//! is synced. Readers see either the old file or the new one.

use crate::error::{KegError, KegResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Size and content hash of a file written by [`write_file_atomic`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub bytes: u64,
    /// Lowercase hex SHA-256 of exactly the bytes that reached the file
    pub sha256: String,
}

/// Stream `reader` into `path` atomically, hashing the bytes on the way.
///
/// On any failure the temp file is removed and `path` is left untouched.
pub fn write_file_atomic(path: &Path, reader: &mut dyn Read) -> KegResult<WrittenFile> {
    let tmp = temp_beside(path)?;
    let tmp_path = tmp.path().to_path_buf();
    let mut out = HashingFile {
        file: tmp,
        hasher: Sha256::new(),
    };
    let bytes = io::copy(reader, &mut out)
        .map_err(|e| KegError::io(format!("writing {}", tmp_path.display()), e))?;
    let sha256 = hex::encode(out.hasher.finalize());
    commit(out.file, path)?;
    Ok(WrittenFile { bytes, sha256 })
}

struct HashingFile {
    file: NamedTempFile,
    hasher: Sha256,
}

impl Write for HashingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Serialize `value` as JSON and replace `path` atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> KegResult<()> {
    let mut tmp = temp_beside(path)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")
        .map_err(|e| KegError::io(format!("writing {}", tmp.path().display()), e))?;
    commit(tmp, path)
}

fn temp_beside(path: &Path) -> KegResult<NamedTempFile> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir)
        .map_err(|e| KegError::io(format!("creating directory {}", dir.display()), e))?;
    let prefix = format!(
        ".{}.",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("keg")
    );
    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| KegError::io(format!("creating temp file in {}", dir.display()), e))
}

fn commit(mut tmp: NamedTempFile, path: &Path) -> KegResult<()> {
    tmp.flush()
        .map_err(|e| KegError::io(format!("flushing {}", tmp.path().display()), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| KegError::io(format!("syncing {}", tmp.path().display()), e))?;
    tmp.persist(path)
        .map_err(|e| KegError::io(format!("renaming into {}", path.display()), e.error))?;
    fsync_dir(parent_dir(path))
}

/// Sync a directory so a completed rename survives a crash.
#[cfg(unix)]
pub fn fsync_dir(dir: &Path) -> KegResult<()> {
    fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| KegError::io(format!("syncing directory {}", dir.display()), e))
}

#[cfg(not(unix))]
pub fn fsync_dir(_dir: &Path) -> KegResult<()> {
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
