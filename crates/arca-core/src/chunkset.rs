use std::collections::HashSet;

use tracing::info;

use crate::error::Result;
use crate::hash::CHUNK_KEY_PREFIX;
use crate::storage::ObjectStore;

/// Page size for the remote chunk listing.
pub const LIST_PAGE_SIZE: usize = 1000;

/// Snapshot of the chunk keys present on the remote at run start.
///
/// Built once per backup run by a paginated bulk listing — vastly cheaper
/// than a per-file existence probe. The snapshot may miss objects uploaded
/// by a concurrent actor after capture; a false negative only costs a
/// re-upload of an identical content-keyed object, which the store treats
/// as an idempotent overwrite.
pub struct RemoteChunkSet {
    keys: HashSet<String>,
}

impl RemoteChunkSet {
    /// Enumerate every key under the chunk namespace. A listing failure is
    /// fatal to the run: uploading against unknown remote state is pointless.
    pub fn fetch(store: &dyn ObjectStore) -> Result<Self> {
        let mut keys = HashSet::new();
        let mut marker: Option<String> = None;

        loop {
            let page = store.list_page(CHUNK_KEY_PREFIX, LIST_PAGE_SIZE, marker.as_deref())?;
            keys.extend(page.keys);
            if !page.truncated {
                break;
            }
            marker = page.next_marker;
        }

        info!(chunks = keys.len(), "fetched remote chunk list");
        Ok(Self { keys })
    }

    pub fn contains(&self, chunk_key: &str) -> bool {
        self.keys.contains(chunk_key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
