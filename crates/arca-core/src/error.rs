use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArcaError>;

#[derive(Debug, Error)]
pub enum ArcaError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("source root '{0}' is not available or not a directory")]
    SourcePathMissing(String),

    #[error("hash cache error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote listing failed: {0}")]
    RemoteList(String),

    #[error("remote upload failed for '{key}': {message}")]
    RemotePut { key: String, message: String },

    #[error("remote download failed for '{key}': {message}")]
    RemoteGet { key: String, message: String },

    #[error("hashing failed for '{path}': {source}")]
    Hash {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("compression error: {0}")]
    Compression(String),

    #[error("manifest parse error at line {line}: {message}")]
    ManifestParse { line: usize, message: String },

    #[error("restore target already exists: '{0}'")]
    RestoreTargetExists(String),

    #[error("{0}")]
    Other(String),
}

impl ArcaError {
    /// `true` for the one per-file condition restore treats as a skip
    /// rather than a failure.
    pub fn is_target_exists(&self) -> bool {
        matches!(self, ArcaError::RestoreTargetExists(_))
    }
}
