use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cache::HashCache;
use crate::chunkset::RemoteChunkSet;
use crate::codec;
use crate::config::Config;
use crate::error::Result;
use crate::manifest::{self, manifest_key, manifest_timestamp, FileRecord, ManifestWriter};
use crate::pool::WorkerPool;
use crate::storage::{self, ObjectStore};
use crate::walker;

/// Counters for one backup run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupStats {
    pub files_indexed: u64,
    pub bytes_indexed: u64,
    pub cache_hits: u64,
    pub index_errors: u64,
    /// Unique chunks actually uploaded this run.
    pub chunks_uploaded: u64,
    /// Original (uncompressed) bytes behind the uploaded chunks.
    pub bytes_uploaded: u64,
    pub upload_errors: u64,
}

/// Result of a backup run.
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    /// Remote key the manifest was stored under; quote its timestamp back
    /// to restore this snapshot.
    pub manifest_key: String,
    pub stats: BackupStats,
    /// `true` when any per-file error occurred; the process should exit
    /// non-zero even though the snapshot was written.
    pub is_partial: bool,
}

/// Run a full backup as configured.
pub fn run(config: &Config) -> Result<BackupOutcome> {
    let store: Arc<dyn ObjectStore> = storage::store_from_config(&config.oss)?.into();
    run_with_store(config.root(), store, config.workers)
}

/// Backup against an explicit store handle. All state is threaded through
/// locals, so independent runs can coexist in one process.
pub fn run_with_store(
    root: &Path,
    store: Arc<dyn ObjectStore>,
    workers: usize,
) -> Result<BackupOutcome> {
    let chunk_set = RemoteChunkSet::fetch(&store)?;

    let mut cache = HashCache::open_under_root(root)?;

    // The manifest lives in the system temp dir for the duration of the
    // run; the reserved name keeps it out of the walk even if the temp dir
    // is inside the source root. Dropping the handle deletes it.
    let manifest_tmp = tempfile::Builder::new()
        .prefix(".__ossIndex_special_.manifest.")
        .suffix(".dat")
        .tempfile()?;

    let mut writer = ManifestWriter::create(manifest_tmp.path())?;
    let index_stats = walker::build_index(root, &mut cache, &mut writer)?;
    writer.finish()?;
    drop(cache);

    let upload = upload_missing_chunks(root, manifest_tmp.path(), &chunk_set, &store, workers)?;

    // Chunks first, then the manifest: a stored manifest never references
    // a chunk this run failed to attempt.
    let timestamp = manifest_timestamp(Utc::now());
    let key = manifest_key(&timestamp);
    let (compressed, compressed_size) = codec::compress_to_temp(manifest_tmp.path())?;
    store.put_object_from_file(&key, compressed.path())?;
    info!(key = %key, bytes = compressed_size, "uploaded manifest");

    let stats = BackupStats {
        files_indexed: index_stats.files_indexed,
        bytes_indexed: index_stats.bytes_indexed,
        cache_hits: index_stats.cache_hits,
        index_errors: index_stats.errors,
        chunks_uploaded: upload.uploaded,
        bytes_uploaded: upload.bytes,
        upload_errors: upload.errors,
    };
    let is_partial = stats.index_errors > 0 || stats.upload_errors > 0;

    Ok(BackupOutcome {
        manifest_key: key,
        stats,
        is_partial,
    })
}

#[derive(Debug, Default)]
struct UploadSummary {
    uploaded: u64,
    bytes: u64,
    errors: u64,
}

/// Two streaming passes over the on-disk manifest: first for counts, then
/// to fan uploads out to the pool. The manifest can outgrow memory for
/// huge trees, so it is never buffered.
fn upload_missing_chunks(
    root: &Path,
    manifest_path: &Path,
    chunk_set: &RemoteChunkSet,
    store: &Arc<dyn ObjectStore>,
    workers: usize,
) -> Result<UploadSummary> {
    let mut pending_count: u64 = 0;
    let mut pending_bytes: u64 = 0;
    manifest::scan(manifest_path, |record| {
        if !chunk_set.contains(&record.chunk_key) {
            pending_count += 1;
            pending_bytes += record.size;
        }
        Ok(())
    })?;

    if pending_count == 0 {
        info!("all chunks already present remotely, nothing to upload");
        return Ok(UploadSummary::default());
    }
    info!(
        chunks = pending_count,
        bytes = pending_bytes,
        "uploading missing chunks"
    );

    let uploaded = Arc::new(AtomicU64::new(0));
    let bytes = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(AtomicU64::new(0));

    let pool = WorkerPool::new(workers);
    // Two records sharing a chunk key collapse to one PUT; identical
    // overwrites would be harmless but are wasted transfer.
    let mut enqueued: HashSet<String> = HashSet::new();
    let mut position: u64 = 0;

    manifest::scan(manifest_path, |record| {
        if chunk_set.contains(&record.chunk_key) {
            return Ok(());
        }
        if !enqueued.insert(record.chunk_key.clone()) {
            return Ok(());
        }
        position += 1;

        let src = root.join(walker::from_posix(&record.path));
        let store = Arc::clone(store);
        let uploaded = Arc::clone(&uploaded);
        let bytes = Arc::clone(&bytes);
        let errors = Arc::clone(&errors);
        let total = pending_count;
        let pos = position;

        pool.submit(move || match upload_one(&store, &record, &src) {
            Ok(compressed_size) => {
                uploaded.fetch_add(1, Ordering::Relaxed);
                bytes.fetch_add(record.size, Ordering::Relaxed);
                debug!(
                    "[{pos}/{total}] uploaded {} ({} -> {} bytes)",
                    record.path, record.size, compressed_size
                );
            }
            Err(e) => {
                errors.fetch_add(1, Ordering::Relaxed);
                warn!("[Error] upload failed for {}: {e}", record.path);
            }
        })?;
        Ok(())
    })?;

    pool.join();

    Ok(UploadSummary {
        uploaded: uploaded.load(Ordering::Relaxed),
        bytes: bytes.load(Ordering::Relaxed),
        errors: errors.load(Ordering::Relaxed),
    })
}

fn upload_one(store: &Arc<dyn ObjectStore>, record: &FileRecord, src: &Path) -> Result<u64> {
    let (tmp, compressed_size) = codec::compress_to_temp(src)?;
    store.put_object_from_file(&record.chunk_key, tmp.path())?;
    Ok(compressed_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::CHUNK_KEY_PREFIX;
    use crate::manifest::MANIFEST_KEY_PREFIX;
    use crate::testutil::MemoryStore;

    fn memory_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new())
    }

    fn backup(root: &Path, store: &Arc<MemoryStore>) -> BackupOutcome {
        let handle: Arc<dyn ObjectStore> = Arc::clone(store) as Arc<dyn ObjectStore>;
        run_with_store(root, handle, 4).unwrap()
    }

    #[test]
    fn single_file_uploads_one_chunk_and_one_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
        let store = memory_store();

        let outcome = backup(dir.path(), &store);

        assert_eq!(outcome.stats.files_indexed, 1);
        assert_eq!(outcome.stats.chunks_uploaded, 1);
        assert!(!outcome.is_partial);
        assert_eq!(store.puts_with_prefix(CHUNK_KEY_PREFIX), 1);
        assert_eq!(store.puts_with_prefix(MANIFEST_KEY_PREFIX), 1);

        let chunk_keys = store.keys_with_prefix(CHUNK_KEY_PREFIX);
        assert!(chunk_keys[0].starts_with(
            "chunk/sha512/e7c22b994c59d9cf2b48e549b1e24666636045930d3da7c1acb299d1c3b7f931"
        ));
        assert!(store.object_bytes(&outcome.manifest_key).is_some());
    }

    #[test]
    fn duplicate_content_is_uploaded_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"hello\n").unwrap();
        let store = memory_store();

        let outcome = backup(dir.path(), &store);

        assert_eq!(outcome.stats.files_indexed, 2);
        assert_eq!(outcome.stats.chunks_uploaded, 1);
        assert_eq!(store.puts_with_prefix(CHUNK_KEY_PREFIX), 1);
    }

    #[test]
    fn unchanged_rerun_uploads_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"hello\n").unwrap();
        let store = memory_store();

        backup(dir.path(), &store);
        let second = backup(dir.path(), &store);

        assert_eq!(second.stats.chunks_uploaded, 0);
        assert_eq!(second.stats.cache_hits, 2);
        // One chunk PUT total, but one manifest PUT per run.
        assert_eq!(store.puts_with_prefix(CHUNK_KEY_PREFIX), 1);
        assert_eq!(store.puts_with_prefix(MANIFEST_KEY_PREFIX), 2);
    }

    #[test]
    fn rerun_emits_identical_manifest_body() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"world\n").unwrap();
        let store = memory_store();

        let first = backup(dir.path(), &store);
        let second = backup(dir.path(), &store);

        assert_ne!(first.manifest_key, second.manifest_key);
        assert_eq!(
            store.object_bytes(&first.manifest_key).unwrap(),
            store.object_bytes(&second.manifest_key).unwrap()
        );
    }

    #[test]
    fn appended_content_uploads_exactly_one_new_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"hello\n").unwrap();
        let store = memory_store();

        backup(dir.path(), &store);
        std::fs::write(&file, b"hello\nworld\n").unwrap();
        let second = backup(dir.path(), &store);

        assert_eq!(second.stats.chunks_uploaded, 1);
        assert_eq!(store.puts_with_prefix(CHUNK_KEY_PREFIX), 2);
        assert_eq!(store.keys_with_prefix(CHUNK_KEY_PREFIX).len(), 2);
    }

    #[test]
    fn manifest_decompresses_to_valid_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
        let store = memory_store();

        let outcome = backup(dir.path(), &store);

        let out = tempfile::tempdir().unwrap();
        let compressed = out.path().join("manifest.deflate");
        std::fs::write(
            &compressed,
            store.object_bytes(&outcome.manifest_key).unwrap(),
        )
        .unwrap();
        let plain = out.path().join("manifest");
        codec::decompress_to_path(&compressed, &plain).unwrap();

        let mut records = Vec::new();
        manifest::scan(&plain, |r| {
            records.push(r);
            Ok(())
        })
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "a.txt");
        assert_eq!(records[0].size, 6);
    }

    #[test]
    fn failed_upload_is_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.txt"), b"fine").unwrap();
        let store = memory_store();
        let handle: Arc<dyn ObjectStore> = Arc::clone(&store) as Arc<dyn ObjectStore>;
        let chunk_set = RemoteChunkSet::fetch(&*handle).unwrap();

        // A manifest referencing a source file that vanished between the
        // walk and the upload pass.
        let manifest_path = dir.path().join("manifest");
        let mut writer = ManifestWriter::create(&manifest_path).unwrap();
        writer
            .append(&FileRecord {
                path: "ok.txt".into(),
                chunk_key: "chunk/sha512/aa.deflate".into(),
                size: 4,
                mod_time: 1,
                creation_time: 0,
            })
            .unwrap();
        writer
            .append(&FileRecord {
                path: "gone.txt".into(),
                chunk_key: "chunk/sha512/bb.deflate".into(),
                size: 9,
                mod_time: 1,
                creation_time: 0,
            })
            .unwrap();
        writer.finish().unwrap();

        let summary =
            upload_missing_chunks(dir.path(), &manifest_path, &chunk_set, &handle, 2).unwrap();

        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(store.puts_with_prefix(CHUNK_KEY_PREFIX), 1);
    }
}
