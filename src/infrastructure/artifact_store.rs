//! Keyed JSON-document persistence between pipeline stages.
//!
//! Each stage writes exactly one named artifact and the next stage loads it
//! back, so the store is the only stateful boundary in the pipeline. Writes
//! replace the whole document; there are no partial or streaming updates.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("artifact '{key}' not found")]
    NotFound { key: String },

    #[error("artifact '{key}' could not be accessed: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact '{key}' holds invalid JSON: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact '{key}' could not be encoded: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable keyed storage for stage outputs.
///
/// `save` overwrites any prior value for the key and must be atomic at the
/// whole-document level: a reader never observes a half-written artifact.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save_value(&self, key: &str, value: Value) -> Result<(), StoreError>;
    async fn load_value(&self, key: &str) -> Result<Value, StoreError>;
    async fn exists(&self, key: &str) -> bool;
}

/// Serialize and persist a typed artifact.
pub async fn save<T: Serialize>(
    store: &dyn ArtifactStore,
    key: &str,
    artifact: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(artifact).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.save_value(key, value).await
}

/// Load and deserialize a typed artifact.
pub async fn load<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    key: &str,
) -> Result<T, StoreError> {
    let value = store.load_value(key).await?;
    serde_json::from_value(value).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })
}

/// File-backed store: one pretty-printed `<key>.json` document per artifact
/// inside the store directory. Writes go through a temp file and a rename so
/// a crash mid-write leaves the previous document intact.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn io_err(key: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl ArtifactStore for JsonFileStore {
    async fn save_value(&self, key: &str, value: Value) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::io_err(key, e))?;

        let body = serde_json::to_string_pretty(&value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;

        let path = self.document_path(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        tokio::fs::write(&tmp, body.as_bytes())
            .await
            .map_err(|e| Self::io_err(key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Self::io_err(key, e))?;

        debug!("saved artifact '{}' to {}", key, path.display());
        Ok(())
    }

    async fn load_value(&self, key: &str) -> Result<Value, StoreError> {
        let path = self.document_path(key);
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(Self::io_err(key, e)),
        };
        serde_json::from_str(&body).map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })
    }

    async fn exists(&self, key: &str) -> bool {
        self.document_path(key).exists()
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn save_value(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.documents
            .lock()
            .expect("store mutex poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn load_value(&self, key: &str) -> Result<Value, StoreError> {
        self.documents
            .lock()
            .expect("store mutex poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn exists(&self, key: &str) -> bool {
        self.documents
            .lock()
            .expect("store mutex poisoned")
            .contains_key(key)
    }
}
