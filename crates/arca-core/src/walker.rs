use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use crate::cache::{HashCache, RESERVED_PREFIX};
use crate::error::Result;
use crate::hash;
use crate::manifest::{FileRecord, ManifestWriter};
use crate::platform;

/// Wall-clock cadence at which the manifest writer and the cache
/// transaction are flushed together. Per-file commits would dominate the
/// walk; a crash loses at most this much cache state, which the next run
/// re-derives by rehashing.
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Counters produced by one indexing pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    pub files_indexed: u64,
    pub bytes_indexed: u64,
    pub cache_hits: u64,
    /// Files that could not be read or hashed and were skipped.
    pub errors: u64,
}

/// Should this basename be excluded as one of our own artifacts?
///
/// Covers the cache database and temp manifests, plus the SQLite side
/// files that live next to the cache while its transaction is open.
pub fn is_reserved_name(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// Convert a path relative to the source root into its manifest form
/// (forward slashes on every platform).
pub fn to_posix(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Convert a manifest-form relative path back into a native path.
pub fn from_posix(rel: &str) -> PathBuf {
    rel.split('/').collect()
}

/// Walk the source tree and emit one manifest record per regular file.
///
/// Single-threaded by design: this stage exclusively owns the cache handle
/// and the manifest writer. Symlinks are followed; non-regular files and
/// directories produce no record. Per-file failures are logged and counted,
/// never fatal.
pub fn build_index(
    root: &Path,
    cache: &mut HashCache,
    writer: &mut ManifestWriter,
) -> Result<IndexStats> {
    let root = root.canonicalize()?;
    let started = Instant::now();
    let mut last_flush = Instant::now();
    let mut stats = IndexStats::default();

    info!(root = %root.display(), "indexing source tree");
    cache.begin()?;

    let walk = WalkBuilder::new(&root)
        .follow_links(true)
        .hidden(false)
        .ignore(false)
        .git_global(false)
        .git_ignore(false)
        .git_exclude(false)
        .parents(false)
        .sort_by_file_name(std::ffi::OsStr::cmp)
        .build();

    for entry in walk {
        if last_flush.elapsed() >= FLUSH_INTERVAL {
            writer.flush()?;
            cache.flush()?;
            last_flush = Instant::now();
        }

        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("[Error] walk entry skipped: {e}");
                stats.errors += 1;
                continue;
            }
        };

        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if is_reserved_name(&name) {
            continue;
        }

        match index_file(&root, entry.path(), cache, writer) {
            Ok(outcome) => {
                stats.files_indexed += 1;
                stats.bytes_indexed += outcome.size;
                if outcome.from_cache {
                    stats.cache_hits += 1;
                }
            }
            Err(e) => {
                warn!("[Error] file could not be processed: {e}");
                stats.errors += 1;
            }
        }
    }

    writer.flush()?;
    cache.commit()?;

    info!(
        files = stats.files_indexed,
        cache_hits = stats.cache_hits,
        errors = stats.errors,
        elapsed = ?started.elapsed(),
        "finished indexing"
    );
    Ok(stats)
}

struct IndexedFile {
    size: u64,
    from_cache: bool,
}

fn index_file(
    root: &Path,
    path: &Path,
    cache: &mut HashCache,
    writer: &mut ManifestWriter,
) -> Result<IndexedFile> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let rel_path = to_posix(rel);

    // Follows symlinks, matching the walk itself.
    let metadata = std::fs::metadata(path)?;
    let size = metadata.len();
    let times = platform::file_times(&metadata);

    let (chunk_key, from_cache) = match cache.lookup(&rel_path, times.mtime_ns, size)? {
        Some(key) => (key, true),
        None => {
            let key = hash::chunk_key_for_file(path)?;
            (key, false)
        }
    };

    writer.append(&FileRecord {
        path: rel_path.clone(),
        chunk_key: chunk_key.clone(),
        size,
        mod_time: times.mtime_ns,
        creation_time: times.creation_ns,
    })?;

    if !from_cache {
        cache.insert(&rel_path, times.mtime_ns, size, &chunk_key)?;
        debug!(path = %rel_path, "hashed");
    }

    Ok(IndexedFile { size, from_cache })
}
