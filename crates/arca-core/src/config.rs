use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ArcaError, Result};

fn default_workers() -> usize {
    12
}

/// Top-level configuration document (`config.yaml`, or `-c <name>` →
/// `<name>.yaml`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Absolute path of the directory tree to back up.
    pub file_root_path: String,

    /// Worker-pool width for uploads and downloads.
    #[serde(default = "default_workers")]
    pub workers: usize,

    pub oss: OssConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OssConfig {
    /// Object-store endpoint. An `https://` (or `http://`) endpoint selects
    /// the S3-compatible HTTP backend; a bare or `file://` path selects the
    /// local directory backend.
    pub api_prefix: String,
    pub bucket_name: String,
    pub oss_key: String,
    pub oss_secret: String,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry settings for transient remote failures (429, 5xx, transport).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            retry_max_delay_ms: 10_000,
        }
    }
}

impl Config {
    /// Load and validate a config file by name (without extension),
    /// searched in the working directory. `None` means `config`.
    pub fn load(name: Option<&str>) -> Result<Self> {
        let name = match name {
            Some(n) if !n.is_empty() => n,
            _ => "config",
        };

        let candidates = [
            PathBuf::from(format!("{name}.yaml")),
            PathBuf::from(format!("{name}.yml")),
        ];
        let path = candidates
            .iter()
            .find(|p| p.exists())
            .ok_or_else(|| ArcaError::Config(format!("config file '{name}.yaml' not found")))?;

        Self::load_path(path)
    }

    pub fn load_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ArcaError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| ArcaError::Config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unusable configuration before any remote or cache work begins.
    pub fn validate(&self) -> Result<()> {
        let root = Path::new(&self.file_root_path);
        match std::fs::metadata(root) {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                return Err(ArcaError::SourcePathMissing(self.file_root_path.clone()));
            }
        }

        if self.workers == 0 {
            return Err(ArcaError::Config("workers must be at least 1".into()));
        }

        let oss = &self.oss;
        if oss.api_prefix.is_empty()
            || oss.bucket_name.is_empty()
            || oss.oss_key.is_empty()
            || oss.oss_secret.is_empty()
        {
            return Err(ArcaError::Config(
                "oss config is incomplete: api_prefix, bucket_name, oss_key and oss_secret are required"
                    .into(),
            ));
        }

        Ok(())
    }

    pub fn root(&self) -> &Path {
        Path::new(&self.file_root_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, root: &str) -> PathBuf {
        let path = dir.join("config.yaml");
        let body = format!(
            r#"file_root_path: {root}
oss:
  api_prefix: https://oss.example.com
  bucket_name: backups
  oss_key: key
  oss_secret: secret
"#
        );
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &dir.path().display().to_string());

        let config = Config::load_path(&path).unwrap();
        assert_eq!(config.workers, 12);
        assert_eq!(config.oss.bucket_name, "backups");
        assert_eq!(config.oss.retry.max_retries, 3);
    }

    #[test]
    fn rejects_missing_source_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "/no/such/dir");

        let err = Config::load_path(&path).unwrap_err();
        assert!(matches!(err, ArcaError::SourcePathMissing(_)));
    }

    #[test]
    fn rejects_source_root_that_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let path = write_config(dir.path(), &file.display().to_string());

        let err = Config::load_path(&path).unwrap_err();
        assert!(matches!(err, ArcaError::SourcePathMissing(_)));
    }

    #[test]
    fn rejects_empty_oss_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let body = format!(
            r#"file_root_path: {}
oss:
  api_prefix: https://oss.example.com
  bucket_name: backups
  oss_key: ''
  oss_secret: secret
"#,
            dir.path().display()
        );
        std::fs::write(&path, body).unwrap();

        let err = Config::load_path(&path).unwrap_err();
        assert!(matches!(err, ArcaError::Config(_)));
    }

    #[test]
    fn rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "file_root_path: /tmp\nbogus: 1\noss: {api_prefix: a, bucket_name: b, oss_key: c, oss_secret: d}\n").unwrap();

        let err = Config::load_path(&path).unwrap_err();
        assert!(matches!(err, ArcaError::Config(_)));
    }
}
