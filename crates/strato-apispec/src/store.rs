//! Blob store access for spec snapshots.
//!
//! The population job writes two JSON blobs keyed by fixed names. The search
//! path depends on `spec.json` existing; its absence is a fatal, operator-
//! visible error — this module never self-heals or lazily fetches.

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

/// Fixed blob key for the flattened API specification.
pub const SPEC_BLOB: &str = "spec.json";

/// Fixed blob key for the product list.
pub const PRODUCTS_BLOB: &str = "products.json";

/// Errors from blob store access.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested blob does not exist.
    ///
    /// For `spec.json` this means the population job has never run; the
    /// message tells the operator exactly that.
    #[error(
        "blob '{key}' not found in the store — run the spec population job \
         before serving search requests"
    )]
    Missing {
        /// The blob key that was requested.
        key: String,
    },

    /// Reading the blob failed.
    #[error("failed to read blob '{key}': {source}")]
    Io {
        /// The blob key.
        key: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The blob exists but is not valid JSON.
    #[error("blob '{key}' is corrupt: {source}")]
    Corrupt {
        /// The blob key.
        key: String,
        /// Underlying parse error.
        source: serde_json::Error,
    },
}

/// Read/write access to named JSON blobs.
pub trait BlobStore: Send + Sync {
    /// Fetch and parse a blob by key.
    fn get(&self, key: &str) -> Result<Value, StoreError>;

    /// Write a blob by key, replacing any existing value.
    fn put(&self, key: &str, value: &Value) -> Result<(), StoreError>;
}

/// Directory-backed blob store: each key is a file under the root.
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BlobStore for DirBlobStore {
    fn get(&self, key: &str) -> Result<Value, StoreError> {
        let path = self.root.join(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::Missing { key: key.into() })
            }
            Err(e) => {
                return Err(StoreError::Io {
                    key: key.into(),
                    source: e,
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            key: key.into(),
            source: e,
        })
    }

    fn put(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.root).map_err(|e| StoreError::Io {
            key: key.into(),
            source: e,
        })?;
        let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Corrupt {
            key: key.into(),
            source: e,
        })?;
        std::fs::write(self.root.join(key), bytes).map_err(|e| StoreError::Io {
            key: key.into(),
            source: e,
        })
    }
}
