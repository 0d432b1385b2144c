//! Object storage for uploaded file bytes.
//!
//! The backend is chosen by configuration: local filesystem (default), S3,
//! or process memory. One `opendal` operator is built lazily per bucket and
//! reused for the lifetime of the store.

use std::path::PathBuf;

use dashmap::DashMap;
use opendal::{Operator, services};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::errors::{ObjectResult, ObjectStoreError};
use crate::storage::kv_store::StoreFuture;

/// Byte store addressed by `(bucket, key)`.
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` at `key`, replacing any existing object.
    ///
    /// # Errors
    /// Returns an error if the key is invalid or the backend write fails.
    fn put(&self, bucket: String, key: String, bytes: Vec<u8>) -> StoreFuture<'_, ObjectResult<()>>;

    /// Read the object at `key`.
    ///
    /// # Errors
    /// Returns [`ObjectStoreError::NotFound`] if no object exists, or a backend error.
    fn get(&self, bucket: String, key: String) -> StoreFuture<'_, ObjectResult<Vec<u8>>>;

    /// Delete the object at `key`. Deleting a missing object succeeds.
    ///
    /// # Errors
    /// Returns an error if the key is invalid or the backend delete fails.
    fn delete(&self, bucket: String, key: String) -> StoreFuture<'_, ObjectResult<()>>;
}

/// Object backend selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum ObjectBackendConfig {
    /// Local directory; each bucket is a subdirectory of `root`.
    Fs {
        /// Root directory.
        root: PathBuf,
    },
    /// S3 or an S3-compatible service.
    S3 {
        /// Region name.
        region: String,
        /// Custom endpoint for S3-compatible services.
        endpoint: Option<String>,
        /// Access key id; the default credential chain is used when unset.
        access_key_id: Option<String>,
        /// Secret access key.
        secret_access_key: Option<String>,
    },
    /// Process memory; contents are lost on exit.
    Memory,
}

impl Default for ObjectBackendConfig {
    fn default() -> Self {
        Self::Fs {
            root: PathBuf::from("./uploads"),
        }
    }
}

impl ObjectBackendConfig {
    /// Short backend name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Fs { .. } => "fs",
            Self::S3 { .. } => "s3",
            Self::Memory => "memory",
        }
    }
}

/// [`ObjectStore`] implementation on top of `opendal`.
pub struct OpendalObjectStore {
    backend: ObjectBackendConfig,
    operators: DashMap<String, Operator>,
}

impl OpendalObjectStore {
    /// Create a store for the given backend.
    #[must_use]
    pub fn new(backend: ObjectBackendConfig) -> Self {
        info!("Initializing {} object store", backend.name());
        Self {
            backend,
            operators: DashMap::new(),
        }
    }

    /// Memory-backed store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(ObjectBackendConfig::Memory)
    }

    fn operator(&self, bucket: &str) -> ObjectResult<Operator> {
        validate_bucket(bucket)?;
        if let Some(op) = self.operators.get(bucket) {
            return Ok(op.clone());
        }

        let op = match &self.backend {
            ObjectBackendConfig::Fs { root } => {
                // The fs service creates the bucket directory on build.
                let dir = root.join(bucket);
                debug!("Creating filesystem operator at {}", dir.display());
                let dir = dir.to_str().ok_or_else(|| {
                    ObjectStoreError::Configuration(format!(
                        "non UTF-8 storage root: {}",
                        dir.display()
                    ))
                })?;
                Operator::new(services::Fs::default().root(dir))?.finish()
            }
            ObjectBackendConfig::S3 {
                region,
                endpoint,
                access_key_id,
                secret_access_key,
            } => {
                debug!("Creating S3 operator for bucket {bucket}");
                let mut builder = services::S3::default().bucket(bucket).region(region);
                if let Some(ep) = endpoint {
                    builder = builder.endpoint(ep);
                }
                if let Some(key_id) = access_key_id {
                    builder = builder.access_key_id(key_id);
                }
                if let Some(secret) = secret_access_key {
                    builder = builder.secret_access_key(secret);
                }
                Operator::new(builder)?.finish()
            }
            ObjectBackendConfig::Memory => Operator::new(services::Memory::default())?.finish(),
        };

        Ok(self
            .operators
            .entry(bucket.to_string())
            .or_insert(op)
            .clone())
    }
}

fn validate_bucket(bucket: &str) -> ObjectResult<()> {
    if bucket.is_empty() || bucket.contains('/') || bucket.contains('\\') || bucket.starts_with('.')
    {
        return Err(ObjectStoreError::InvalidKey(format!("bucket {bucket:?}")));
    }
    Ok(())
}

/// Reject keys that are empty or could escape the bucket root.
fn validate_key(key: &str) -> ObjectResult<()> {
    let escapes = key
        .split(['/', '\\'])
        .any(|segment| segment == ".." || segment == ".");
    if key.trim().is_empty() || key.starts_with('/') || key.ends_with('/') || escapes {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

impl ObjectStore for OpendalObjectStore {
    fn put(&self, bucket: String, key: String, bytes: Vec<u8>) -> StoreFuture<'_, ObjectResult<()>> {
        Box::pin(async move {
            validate_key(&key)?;
            let op = self.operator(&bucket)?;
            let size = bytes.len();
            op.write(&key, bytes).await?;
            debug!("Stored {size} bytes at {bucket}/{key}");
            Ok(())
        })
    }

    fn get(&self, bucket: String, key: String) -> StoreFuture<'_, ObjectResult<Vec<u8>>> {
        Box::pin(async move {
            validate_key(&key)?;
            let op = self.operator(&bucket)?;
            let buffer = op.read(&key).await.map_err(|e| {
                if e.kind() == opendal::ErrorKind::NotFound {
                    ObjectStoreError::NotFound(format!("{bucket}/{key}"))
                } else {
                    ObjectStoreError::from(e)
                }
            })?;
            Ok(buffer.to_vec())
        })
    }

    fn delete(&self, bucket: String, key: String) -> StoreFuture<'_, ObjectResult<()>> {
        Box::pin(async move {
            validate_key(&key)?;
            let op = self.operator(&bucket)?;
            op.delete(&key).await?;
            debug!("Deleted {bucket}/{key}");
            Ok(())
        })
    }
}
