use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;

use crate::error::{ArcaError, Result};

/// Fixed speed-biased compression level. Not recorded in chunks or
/// manifests: keys are derived from the uncompressed bytes and DEFLATE is
/// self-describing, so the level may change between releases without
/// breaking reads.
const COMPRESSION_LEVEL: u32 = 3;

/// Stream-compress `src` into a temporary file.
///
/// Returns the temp file handle and the compressed size in bytes. The
/// artifact is deleted when the returned handle is dropped.
pub fn compress_to_temp(src: &Path) -> Result<(NamedTempFile, u64)> {
    let file = File::open(src)?;
    let mut reader = BufReader::new(file);

    let tmp = NamedTempFile::new()?;
    let mut encoder = DeflateEncoder::new(
        BufWriter::new(tmp.as_file()),
        Compression::new(COMPRESSION_LEVEL),
    );

    io::copy(&mut reader, &mut encoder)
        .map_err(|e| ArcaError::Compression(format!("compress {}: {e}", src.display())))?;
    encoder
        .finish()
        .map_err(|e| ArcaError::Compression(format!("compress {}: {e}", src.display())))?
        .flush()?;

    let compressed_size = tmp.as_file().metadata()?.len();
    Ok((tmp, compressed_size))
}

/// Stream-decompress the raw DEFLATE file at `src` into `dst`.
///
/// Parent directories are created as needed. `dst` is opened with an
/// exclusive create: an existing destination is never overwritten and maps
/// to [`ArcaError::RestoreTargetExists`]. On any other failure the partial
/// output is removed before returning.
pub fn decompress_to_path(src: &Path, dst: &Path) -> Result<u64> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let out = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dst)
    {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(ArcaError::RestoreTargetExists(dst.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let result = (|| -> Result<u64> {
        let mut decoder = DeflateDecoder::new(BufReader::new(File::open(src)?));
        let mut writer = BufWriter::new(out);
        let written = io::copy(&mut decoder, &mut writer)
            .map_err(|e| ArcaError::Compression(format!("decompress to {}: {e}", dst.display())))?;
        writer.flush()?;
        Ok(written)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(dst);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_decompress_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let payload = b"the quick brown fox jumps over the lazy dog\n".repeat(100);
        std::fs::write(&src, &payload).unwrap();

        let (tmp, compressed_size) = compress_to_temp(&src).unwrap();
        assert!(compressed_size > 0);
        assert!(compressed_size < payload.len() as u64);

        let dst = dir.path().join("out.bin");
        let written = decompress_to_path(tmp.path(), &dst).unwrap();
        assert_eq!(written, payload.len() as u64);
        assert_eq!(std::fs::read(&dst).unwrap(), payload);
    }

    #[test]
    fn empty_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("empty");
        std::fs::write(&src, b"").unwrap();

        let (tmp, _) = compress_to_temp(&src).unwrap();
        let dst = dir.path().join("restored");
        decompress_to_path(tmp.path(), &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"");
    }

    #[test]
    fn decompress_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::write(&src, b"data").unwrap();

        let (tmp, _) = compress_to_temp(&src).unwrap();
        let dst = dir.path().join("a/b/c/out");
        decompress_to_path(tmp.path(), &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"data");
    }

    #[test]
    fn decompress_refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::write(&src, b"new").unwrap();

        let (tmp, _) = compress_to_temp(&src).unwrap();
        let dst = dir.path().join("out");
        std::fs::write(&dst, b"old").unwrap();

        let err = decompress_to_path(tmp.path(), &dst).unwrap_err();
        assert!(err.is_target_exists());
        // The pre-existing content is untouched.
        assert_eq!(std::fs::read(&dst).unwrap(), b"old");
    }

    #[test]
    fn output_is_raw_deflate_without_framing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::write(&src, b"framing check").unwrap();

        let (tmp, size) = compress_to_temp(&src).unwrap();
        let bytes = std::fs::read(tmp.path()).unwrap();
        assert_eq!(bytes.len() as u64, size);
        // zlib streams start with 0x78, gzip with 0x1f 0x8b; raw DEFLATE
        // for this input starts with neither.
        assert_ne!(bytes[0], 0x78);
        assert_ne!(&bytes[..2.min(bytes.len())], &[0x1f, 0x8b][..]);
    }

    #[test]
    fn failed_decompress_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage");
        std::fs::write(&garbage, b"\xff\xff\xff\xff not deflate \x00\x01").unwrap();

        let dst = dir.path().join("out");
        assert!(decompress_to_path(&garbage, &dst).is_err());
        assert!(!dst.exists());
    }
}
