use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use rusty_s3::actions::{ListObjectsV2, S3Action};
use rusty_s3::{Bucket, Credentials, UrlStyle};

use crate::config::RetryConfig;
use crate::error::{ArcaError, Result};
use crate::storage::retry::{retry_http, HttpRetryError};
use crate::storage::{ListPage, ObjectStore};

/// Validity window for presigned request URLs.
const PRESIGN_DURATION: Duration = Duration::from_secs(3600);

/// S3-compatible HTTP object store (OSS-style endpoints).
///
/// All requests are presigned and executed over a shared blocking agent;
/// `ureq::Agent` is internally reference-counted, so one backend handle
/// serves a whole worker pool.
pub struct OssBackend {
    bucket: Bucket,
    credentials: Credentials,
    agent: ureq::Agent,
    retry: RetryConfig,
}

impl OssBackend {
    pub fn new(
        endpoint: &str,
        bucket_name: &str,
        access_key: &str,
        secret_key: &str,
        retry: RetryConfig,
    ) -> Result<Self> {
        let endpoint = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        let base_url = endpoint
            .parse()
            .map_err(|e| ArcaError::Config(format!("invalid endpoint '{endpoint}': {e}")))?;

        let bucket = Bucket::new(
            base_url,
            UrlStyle::Path,
            bucket_name.to_string(),
            // Region only participates in the signature; OSS-style
            // endpoints carry the region in the host name.
            "us-east-1".to_string(),
        )
        .map_err(|e| ArcaError::Config(format!("invalid bucket '{bucket_name}': {e}")))?;

        let credentials = Credentials::new(access_key, secret_key);

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();

        Ok(Self {
            bucket,
            credentials,
            agent,
            retry,
        })
    }
}

impl ObjectStore for OssBackend {
    fn list_page(&self, prefix: &str, page_size: usize, marker: Option<&str>) -> Result<ListPage> {
        let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
        action.query_mut().insert("prefix", prefix);
        action
            .query_mut()
            .insert("max-keys", page_size.to_string());
        if let Some(marker) = marker {
            action.query_mut().insert("continuation-token", marker);
        }
        let url = action.sign(PRESIGN_DURATION);

        let parsed = retry_http(&self.retry, &format!("LIST {prefix}"), || {
            let resp = self
                .agent
                .get(url.as_str())
                .call()
                .map_err(HttpRetryError::http)?;
            let mut body = Vec::new();
            resp.into_reader()
                .read_to_end(&mut body)
                .map_err(HttpRetryError::BodyIo)?;
            let body = std::str::from_utf8(&body)
                .map_err(|e| HttpRetryError::Permanent(format!("bad listing response: {e}")))?;
            ListObjectsV2::parse_response(body)
                .map_err(|e| HttpRetryError::Permanent(format!("bad listing response: {e}")))
        })
        .map_err(|e| ArcaError::RemoteList(format!("LIST {prefix}: {e}")))?;

        let keys = parsed
            .contents
            .into_iter()
            .map(|obj| obj.key)
            .filter(|k| !k.ends_with('/'))
            .collect();
        let next_marker = parsed.next_continuation_token;
        let truncated = next_marker.is_some();

        Ok(ListPage {
            keys,
            next_marker,
            truncated,
        })
    }

    fn put_object_from_file(&self, key: &str, src: &Path) -> Result<()> {
        let url = self
            .bucket
            .put_object(Some(&self.credentials), key)
            .sign(PRESIGN_DURATION);

        let content_length = std::fs::metadata(src)?.len();

        retry_http(&self.retry, &format!("PUT {key}"), || {
            let file = File::open(src).map_err(HttpRetryError::BodyIo)?;
            self.agent
                .put(url.as_str())
                .set("Content-Length", &content_length.to_string())
                .send(file)
                .map_err(HttpRetryError::http)?;
            Ok(())
        })
        .map_err(|e| ArcaError::RemotePut {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    fn get_object_to_file(&self, key: &str, dst: &Path) -> Result<()> {
        let url = self
            .bucket
            .get_object(Some(&self.credentials), key)
            .sign(PRESIGN_DURATION);

        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }

        retry_http(&self.retry, &format!("GET {key}"), || {
            let resp = self
                .agent
                .get(url.as_str())
                .call()
                .map_err(HttpRetryError::http)?;
            let file = File::create(dst).map_err(HttpRetryError::BodyIo)?;
            let mut writer = BufWriter::new(file);
            io::copy(&mut resp.into_reader(), &mut writer).map_err(HttpRetryError::BodyIo)?;
            writer.flush().map_err(HttpRetryError::BodyIo)?;
            Ok(())
        })
        .map_err(|e| ArcaError::RemoteGet {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemeless_endpoint_gets_https() {
        let backend = OssBackend::new(
            "oss-cn-hangzhou.aliyuncs.com",
            "bucket",
            "ak",
            "sk",
            RetryConfig::default(),
        );
        assert!(backend.is_ok());
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        let backend = OssBackend::new("http://[::1", "bucket", "ak", "sk", RetryConfig::default());
        assert!(backend.is_err());
    }
}
