use std::fs::Metadata;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// File timestamps in nanoseconds since the Unix epoch.
///
/// `creation_ns` is 0 on filesystems/platforms that do not expose a birth
/// time; it is carried in the manifest but never consulted for cache
/// validity or restore.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStamps {
    pub mtime_ns: i64,
    pub creation_ns: i64,
}

pub fn file_times(metadata: &Metadata) -> FileStamps {
    #[cfg(unix)]
    let mtime_ns = {
        use std::os::unix::fs::MetadataExt;
        metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec()
    };
    #[cfg(not(unix))]
    let mtime_ns = metadata
        .modified()
        .ok()
        .map(system_time_nanos)
        .unwrap_or_default();

    let creation_ns = metadata
        .created()
        .ok()
        .map(system_time_nanos)
        .unwrap_or_default();

    FileStamps {
        mtime_ns,
        creation_ns,
    }
}

fn system_time_nanos(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    }
}

/// Convert epoch nanoseconds back into a `SystemTime`, pre-epoch values
/// included.
pub fn system_time_from_nanos(ns: i64) -> SystemTime {
    if ns >= 0 {
        UNIX_EPOCH + Duration::from_nanos(ns as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos(ns.unsigned_abs())
    }
}

/// Set a file's modification time, leaving atime untouched.
///
/// Goes through an opened descriptor (`File::set_times`). A read-only
/// handle is enough for futimens on Unix; Windows wants the handle opened
/// for writing, so that is the fallback.
pub fn set_file_mtime(path: &Path, mtime_ns: i64) -> std::io::Result<()> {
    let times = std::fs::FileTimes::new().set_modified(system_time_from_nanos(mtime_ns));

    let read_attempt = std::fs::File::open(path).and_then(|f| f.set_times(times));
    match read_attempt {
        Ok(()) => Ok(()),
        Err(_) => std::fs::OpenOptions::new()
            .write(true)
            .open(path)?
            .set_times(times),
    }
}
