use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{ArcaError, Result};
use crate::storage::{ListPage, ObjectStore};

/// Object store backed by a local directory tree.
///
/// Keys map to relative paths under the root. Used for `file://` and bare
/// path endpoints, and for on-disk integration tests.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Reject storage keys that could escape the store root.
    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(ArcaError::Other("unsafe storage key: empty".into()));
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(ArcaError::Other(format!("unsafe storage key: '{key}'")));
        }
        for component in Path::new(key).components() {
            if component == Component::ParentDir {
                return Err(ArcaError::Other(format!(
                    "unsafe storage key: parent traversal '{key}'"
                )));
            }
        }
        Ok(())
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn collect_keys(&self, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.collect_keys(&entry.path(), keys)?;
            } else if file_type.is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn list_page(&self, prefix: &str, page_size: usize, marker: Option<&str>) -> Result<ListPage> {
        let mut keys = Vec::new();
        self.collect_keys(&self.root, &mut keys)
            .map_err(|e| ArcaError::RemoteList(e.to_string()))?;

        keys.retain(|k| k.starts_with(prefix));
        keys.sort_unstable();
        if let Some(marker) = marker {
            keys.retain(|k| k.as_str() > marker);
        }

        let truncated = keys.len() > page_size;
        keys.truncate(page_size);
        let next_marker = if truncated { keys.last().cloned() } else { None };

        Ok(ListPage {
            keys,
            next_marker,
            truncated,
        })
    }

    fn put_object_from_file(&self, key: &str, src: &Path) -> Result<()> {
        let dst = self.resolve(key)?;
        let parent = dst.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        // Copy + rename so a concurrent reader never observes a partial object.
        let tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| ArcaError::RemotePut {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        fs::copy(src, tmp.path()).map_err(|e| ArcaError::RemotePut {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        tmp.persist(&dst).map_err(|e| ArcaError::RemotePut {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    fn get_object_to_file(&self, key: &str, dst: &Path) -> Result<()> {
        let src = self.resolve(key)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&src, dst).map_err(|e| ArcaError::RemoteGet {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}
