use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::Config;
use crate::error::{ArcaError, Result};
use crate::manifest::{self, manifest_key, FileRecord};
use crate::platform;
use crate::pool::WorkerPool;
use crate::storage::{self, ObjectStore};

/// Counters for one restore run.
#[derive(Debug, Default)]
pub struct RestoreStats {
    pub files_restored: u64,
    pub bytes_restored: u64,
    /// Destinations that already existed and were left untouched.
    pub skipped_existing: u64,
    pub errors: u64,
}

impl RestoreStats {
    /// `true` when any per-file error occurred (skips excluded).
    pub fn is_partial(&self) -> bool {
        self.errors > 0
    }
}

/// Restore the manifest identified by `timestamp` into `dest`.
pub fn run(config: &Config, timestamp: &str, dest: &Path) -> Result<RestoreStats> {
    let store: Arc<dyn ObjectStore> = storage::store_from_config(&config.oss)?.into();
    run_with_store(store, timestamp, dest, config.workers)
}

/// Restore against an explicit store handle.
pub fn run_with_store(
    store: Arc<dyn ObjectStore>,
    timestamp: &str,
    dest: &Path,
    workers: usize,
) -> Result<RestoreStats> {
    let key = manifest_key(timestamp);

    // The manifest itself is stored compressed; fetch then decode it to a
    // scratch file so both passes can stream it from disk.
    let compressed = NamedTempFile::new()?;
    store.get_object_to_file(&key, compressed.path())?;

    let scratch = tempfile::tempdir()?;
    let manifest_path = scratch.path().join("manifest");
    codec::decompress_to_path(compressed.path(), &manifest_path)?;
    drop(compressed);

    let mut total_files: u64 = 0;
    let mut total_bytes: u64 = 0;
    manifest::scan(&manifest_path, |record| {
        total_files += 1;
        total_bytes += record.size;
        Ok(())
    })?;
    info!(
        files = total_files,
        bytes = total_bytes,
        "starting restore"
    );

    std::fs::create_dir_all(dest)?;

    let restored_files = Arc::new(AtomicU64::new(0));
    let restored_bytes = Arc::new(AtomicU64::new(0));
    let skipped = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));

    let pool = WorkerPool::new(workers);

    manifest::scan(&manifest_path, |record| {
        let rel = match sanitized_rel_path(&record.path) {
            Ok(rel) => rel,
            Err(e) => {
                warn!("[Error] {e}");
                errors.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        };
        let dst = dest.join(rel);

        let store = Arc::clone(&store);
        let restored_files = Arc::clone(&restored_files);
        let restored_bytes = Arc::clone(&restored_bytes);
        let skipped = Arc::clone(&skipped);
        let errors = Arc::clone(&errors);

        pool.submit(move || match restore_one(&store, &record, &dst) {
            Ok(written) => {
                restored_files.fetch_add(1, Ordering::Relaxed);
                let done = restored_bytes.fetch_add(written, Ordering::Relaxed) + written;
                debug!(
                    "({done}/{total_bytes} bytes) restored {}",
                    record.path
                );
            }
            Err(e) if e.is_target_exists() => {
                skipped.fetch_add(1, Ordering::Relaxed);
                warn!("[Error] skipped {}: {e}", record.path);
            }
            Err(e) => {
                errors.fetch_add(1, Ordering::Relaxed);
                warn!("[Error] could not restore {}: {e}", record.path);
            }
        })?;
        Ok(())
    })?;

    pool.join();

    let stats = RestoreStats {
        files_restored: restored_files.load(Ordering::Relaxed),
        bytes_restored: restored_bytes.load(Ordering::Relaxed),
        skipped_existing: skipped.load(Ordering::Relaxed),
        errors: errors.load(Ordering::Relaxed),
    };
    info!(
        files = stats.files_restored,
        bytes = stats.bytes_restored,
        skipped = stats.skipped_existing,
        errors = stats.errors,
        "restore finished"
    );
    Ok(stats)
}

/// Download one chunk, decompress it into place, restore the mtime.
fn restore_one(store: &Arc<dyn ObjectStore>, record: &FileRecord, dst: &Path) -> Result<u64> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = NamedTempFile::new()?;
    store.get_object_to_file(&record.chunk_key, tmp.path())?;

    let written = codec::decompress_to_path(tmp.path(), dst)?;

    if let Err(e) = platform::set_file_mtime(dst, record.mod_time) {
        warn!("could not restore mtime for {}: {e}", dst.display());
    }

    Ok(written)
}

/// Validate a manifest path and convert it to a native relative path.
///
/// Manifests are trusted for content but not for path shape: absolute
/// paths and parent traversal must never escape the restore root.
fn sanitized_rel_path(raw: &str) -> Result<PathBuf> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return Err(ArcaError::Other(format!(
            "refusing to restore absolute path: {raw}"
        )));
    }
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArcaError::Other(format!(
                    "refusing to restore unsafe path: {raw}"
                )));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(ArcaError::Other(format!(
            "refusing to restore empty path: {raw}"
        )));
    }
    Ok(out)
}
