use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ArcaError, Result};

/// Remote namespace for uploaded manifests.
pub const MANIFEST_KEY_PREFIX: &str = "indexes/";

/// Suffix for manifest keys (compressed NDJSON).
pub const MANIFEST_KEY_SUFFIX: &str = ".dat.deflate";

/// Large read buffer so pathologically long paths never split a line.
const SCAN_BUF_SIZE: usize = 1024 * 1024;

/// One manifest line: the chunk that holds a logical path's content.
///
/// Serialized as a single JSON object per line with the wire field names
/// `Path`, `ChunkKey`, `Size`, `ModTime`, `CreationTime`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "ChunkKey")]
    pub chunk_key: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "ModTime")]
    pub mod_time: i64,
    #[serde(rename = "CreationTime")]
    pub creation_time: i64,
}

/// Buffered NDJSON writer for a manifest file.
///
/// Owned by the walker thread for the duration of a run; flushed together
/// with the hash-cache transaction and closed before uploads begin.
pub struct ManifestWriter {
    inner: BufWriter<File>,
}

impl ManifestWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: BufWriter::with_capacity(4096, file),
        })
    }

    pub fn append(&mut self, record: &FileRecord) -> Result<()> {
        serde_json::to_writer(&mut self.inner, record)
            .map_err(|e| ArcaError::Other(format!("manifest encode: {e}")))?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flush and close the underlying file.
    pub fn finish(mut self) -> Result<()> {
        self.flush()
    }
}

/// Stream a manifest file, invoking `f` for every record.
///
/// Empty lines are tolerated; a malformed line aborts the scan with its
/// line number.
pub fn scan<F>(path: &Path, mut f: F) -> Result<()>
where
    F: FnMut(FileRecord) -> Result<()>,
{
    let reader = BufReader::with_capacity(SCAN_BUF_SIZE, File::open(path)?);

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: FileRecord =
            serde_json::from_str(&line).map_err(|e| ArcaError::ManifestParse {
                line: idx + 1,
                message: e.to_string(),
            })?;
        f(record)?;
    }

    Ok(())
}

/// Format an instant as a filename-safe manifest timestamp: RFC 3339 UTC
/// with nanosecond precision and colons replaced by underscores
/// (e.g. `2026-08-02T12_00_00.123456789Z`). The user quotes this value back
/// verbatim to select a manifest for restore.
pub fn manifest_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Nanos, true)
        .replace(':', "_")
}

/// Derive the remote object key for a manifest timestamp.
pub fn manifest_key(timestamp: &str) -> String {
    format!("{MANIFEST_KEY_PREFIX}{timestamp}{MANIFEST_KEY_SUFFIX}")
}
