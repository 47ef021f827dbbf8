//! Lock-free live spec snapshot.
//!
//! [`LiveSpec`] wraps [`arc_swap::ArcSwap`] to provide lock-free reads and
//! atomic swaps. When the population job rewrites the blobs, the serving path
//! swaps in the new document without blocking concurrent `search()` calls.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde_json::Value;

use crate::store::{BlobStore, StoreError, SPEC_BLOB};

/// A live, atomically-swappable spec document.
///
/// Readers call [`current()`](Self::current) for a lock-free snapshot.
/// Writers call [`update()`](Self::update) for an atomic swap.
#[derive(Clone)]
pub struct LiveSpec {
    inner: Arc<ArcSwap<Value>>,
}

impl LiveSpec {
    /// Create a new live spec with the given initial document.
    pub fn new(spec: Value) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(spec)),
        }
    }

    /// Load the initial document from the blob store.
    ///
    /// Fails with the store's operator-facing error if `spec.json` is absent.
    pub fn from_store(store: &dyn BlobStore) -> Result<Self, StoreError> {
        Ok(Self::new(store.get(SPEC_BLOB)?))
    }

    /// Get a lock-free snapshot of the current document.
    pub fn current(&self) -> Arc<Value> {
        self.inner.load_full()
    }

    /// Atomically replace the document with a new version.
    ///
    /// Readers holding an older snapshot are unaffected.
    pub fn update(&self, new_spec: Value) {
        self.inner.store(Arc::new(new_spec));
    }

    /// Re-read the document from the blob store and swap it in.
    pub fn refresh(&self, store: &dyn BlobStore) -> Result<(), StoreError> {
        self.update(store.get(SPEC_BLOB)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DirBlobStore;
    use serde_json::json;

    #[test]
    fn update_swaps_atomically() {
        let live = LiveSpec::new(json!({ "paths": {} }));
        let old = live.current();

        live.update(json!({ "paths": { "/zones": {} } }));

        assert!(old["paths"].as_object().unwrap().is_empty());
        assert!(live.current()["paths"].get("/zones").is_some());
    }

    #[test]
    fn clone_shares_underlying_data() {
        let live = LiveSpec::new(json!({}));
        let cloned = live.clone();
        live.update(json!({ "v": 2 }));
        assert_eq!(cloned.current()["v"], 2);
    }

    #[test]
    fn from_store_requires_the_spec_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirBlobStore::new(dir.path());
        assert!(matches!(
            LiveSpec::from_store(&store),
            Err(StoreError::Missing { .. })
        ));

        store.put(SPEC_BLOB, &json!({ "paths": {} })).unwrap();
        let live = LiveSpec::from_store(&store).unwrap();
        assert!(live.current().get("paths").is_some());
    }

    #[test]
    fn refresh_picks_up_rewritten_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirBlobStore::new(dir.path());
        store.put(SPEC_BLOB, &json!({ "rev": 1 })).unwrap();

        let live = LiveSpec::from_store(&store).unwrap();
        store.put(SPEC_BLOB, &json!({ "rev": 2 })).unwrap();
        live.refresh(&store).unwrap();

        assert_eq!(live.current()["rev"], 2);
    }
}
