use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha512};

use crate::error::{ArcaError, Result};

/// Remote namespace for content chunks. Every chunk key starts with this.
pub const CHUNK_KEY_PREFIX: &str = "chunk/sha512/";

/// Suffix shared by all chunk keys (chunks are stored as raw DEFLATE).
pub const CHUNK_KEY_SUFFIX: &str = ".deflate";

const READ_BUF_SIZE: usize = 64 * 1024;

/// Compute the lowercase hex SHA-512 digest of a file's byte content.
pub fn sha512_hex(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| ArcaError::Hash {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut hasher = Sha512::new();
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| ArcaError::Hash {
            path: path.display().to_string(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Derive the remote object key for a content digest.
///
/// The key is a pure function of the uncompressed file bytes, so two files
/// with identical content always map to the same remote object.
pub fn chunk_key(digest: &str) -> String {
    format!("{CHUNK_KEY_PREFIX}{digest}{CHUNK_KEY_SUFFIX}")
}

/// Hash a file and return its chunk key in one step.
pub fn chunk_key_for_file(path: &Path) -> Result<String> {
    Ok(chunk_key(&sha512_hex(path)?))
}
