//! In-memory object store for unit tests. Thread-safe via `Mutex`; keeps
//! a log of PUT keys so upload-count properties are assertable.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{ArcaError, Result};
use crate::storage::{ListPage, ObjectStore};

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    puts: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording a PUT.
    pub fn insert_bytes(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn object_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// All PUT keys, in completion order.
    pub fn put_log(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    /// Number of PUTs whose key starts with `prefix`.
    pub fn puts_with_prefix(&self, prefix: &str) -> usize {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.starts_with(prefix))
            .count()
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl ObjectStore for MemoryStore {
    fn list_page(&self, prefix: &str, page_size: usize, marker: Option<&str>) -> Result<ListPage> {
        let objects = self.objects.lock().unwrap();
        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| marker.is_none_or(|m| k.as_str() > m))
            .take(page_size + 1)
            .cloned()
            .collect();

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
        let data = std::fs::read(src).map_err(|e| ArcaError::RemotePut {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data);
        self.puts.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn get_object_to_file(&self, key: &str, dst: &Path) -> Result<()> {
        let data = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| ArcaError::RemoteGet {
                key: key.to_string(),
                message: "no such object".to_string(),
            })?;
        std::fs::write(dst, data).map_err(|e| ArcaError::RemoteGet {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_log_records_every_put() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::write(&src, b"x").unwrap();

        let store = MemoryStore::new();
        store.put_object_from_file("a", &src).unwrap();
        store.put_object_from_file("a", &src).unwrap();

        assert_eq!(store.object_count(), 1);
        assert_eq!(store.put_log(), vec!["a", "a"]);
    }

    #[test]
    fn list_page_respects_marker_and_size() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.insert_bytes(&format!("p/{i}"), b"x");
        }

        let first = store.list_page("p/", 2, None).unwrap();
        assert_eq!(first.keys, vec!["p/0", "p/1"]);
        assert!(first.truncated);

        let second = store
            .list_page("p/", 2, first.next_marker.as_deref())
            .unwrap();
        assert_eq!(second.keys, vec!["p/2", "p/3"]);
        assert!(second.truncated);

        let third = store
            .list_page("p/", 2, second.next_marker.as_deref())
            .unwrap();
        assert_eq!(third.keys, vec!["p/4"]);
        assert!(!third.truncated);
        assert!(third.next_marker.is_none());
    }
}
