pub mod local_backend;
pub mod oss_backend;
pub(crate) mod retry;

use std::path::Path;
use std::sync::Arc;

use crate::config::OssConfig;
use crate::error::Result;

/// One page of a paginated object listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Marker to pass back for the next page; meaningful only while
    /// `truncated` is `true`.
    pub next_marker: Option<String>,
    pub truncated: bool,
}

/// Abstract object store the pipelines depend on.
///
/// Keys are `/`-separated strings (e.g. `chunk/sha512/<hex>.deflate`).
/// Implementations must be safe for concurrent use: upload and download
/// workers share one handle across the pool.
pub trait ObjectStore: Send + Sync {
    /// List up to `page_size` keys under `prefix`, starting after `marker`.
    fn list_page(&self, prefix: &str, page_size: usize, marker: Option<&str>) -> Result<ListPage>;

    /// Upload a local file under `key`, overwriting any existing object.
    fn put_object_from_file(&self, key: &str, src: &Path) -> Result<()>;

    /// Download the object at `key` into a local file, replacing it.
    fn get_object_to_file(&self, key: &str, dst: &Path) -> Result<()>;
}

impl ObjectStore for Arc<dyn ObjectStore> {
    fn list_page(&self, prefix: &str, page_size: usize, marker: Option<&str>) -> Result<ListPage> {
        (**self).list_page(prefix, page_size, marker)
    }
    fn put_object_from_file(&self, key: &str, src: &Path) -> Result<()> {
        (**self).put_object_from_file(key, src)
    }
    fn get_object_to_file(&self, key: &str, dst: &Path) -> Result<()> {
        (**self).get_object_to_file(key, dst)
    }
}

/// Build a store from the `oss` config section.
///
/// An `http(s)://` endpoint selects the S3-compatible HTTP backend. A bare
/// path or `file://` URL selects the local directory backend rooted at
/// `<path>/<bucket_name>` — handy for tests and on-disk mirrors.
pub fn store_from_config(cfg: &OssConfig) -> Result<Box<dyn ObjectStore>> {
    let endpoint = cfg.api_prefix.trim();

    if let Some(path) = endpoint.strip_prefix("file://") {
        let root = Path::new(path).join(&cfg.bucket_name);
        return Ok(Box::new(local_backend::LocalStore::new(&root)?));
    }
    if !endpoint.contains("://") && (endpoint.starts_with('/') || endpoint.starts_with('.')) {
        let root = Path::new(endpoint).join(&cfg.bucket_name);
        return Ok(Box::new(local_backend::LocalStore::new(&root)?));
    }

    Ok(Box::new(oss_backend::OssBackend::new(
        endpoint,
        &cfg.bucket_name,
        &cfg.oss_key,
        &cfg.oss_secret,
        cfg.retry.clone(),
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;

    fn oss_config(api_prefix: &str) -> OssConfig {
        OssConfig {
            api_prefix: api_prefix.to_string(),
            bucket_name: "bucket".to_string(),
            oss_key: "key".to_string(),
            oss_secret: "secret".to_string(),
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn bare_path_selects_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = oss_config(&dir.path().display().to_string());
        assert!(store_from_config(&cfg).is_ok());
        assert!(dir.path().join("bucket").is_dir());
    }

    #[test]
    fn file_url_selects_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = oss_config(&format!("file://{}", dir.path().display()));
        assert!(store_from_config(&cfg).is_ok());
    }

    #[test]
    fn https_endpoint_selects_http_backend() {
        let cfg = oss_config("https://oss-cn-hangzhou.aliyuncs.com");
        assert!(store_from_config(&cfg).is_ok());
    }

    #[test]
    fn schemeless_host_selects_http_backend() {
        let cfg = oss_config("oss-cn-hangzhou.aliyuncs.com");
        assert!(store_from_config(&cfg).is_ok());
    }
}
