use crate::errors::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// A blob store keyed by name, addressed relative to some backend-specific root.
/// Concrete backends are external collaborators; the core only depends on this
/// interface and ships the local filesystem implementation below (no third-party
/// credentials required, and needed for the core's own tests). Networked backends
/// (S3, Azure Blob, GCS) are a documented extension point: implement this trait
/// and register it in `StateStore::for_base_path`.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Reads the named blob, returning `None` if it doesn't exist.
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Writes (replacing) the named blob.
    async fn write(&self, name: &str, contents: &[u8]) -> Result<()>;
}

/// Stores blobs as files under `base_path` on the local filesystem.
pub struct LocalFileStateBackend {
    base_path: std::path::PathBuf,
}

impl LocalFileStateBackend {
    pub fn new(base_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn path_for(&self, name: &str) -> std::path::PathBuf {
        self.base_path.join(name)
    }
}

#[async_trait]
impl StateBackend for LocalFileStateBackend {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, name: &str, contents: &[u8]) -> Result<()> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }
}

/// Picks a `StateBackend` based on `base_path`'s scheme prefix. Only the local
/// filesystem is implemented in the core; `s3://`, `azure://` and `gs://` are
/// recognized but fall through to an error until a concrete backend for them is
/// registered, matching the spec's "interface only" stance on networked backends.
pub fn backend_for_base_path(base_path: &str) -> Result<Arc<dyn StateBackend>> {
    if let Some(local_path) = base_path
        .strip_prefix("s3://")
        .or_else(|| base_path.strip_prefix("azure://"))
        .or_else(|| base_path.strip_prefix("gs://"))
    {
        let _ = local_path;
        return Err(crate::errors::Error::PipelineError(format!(
            "no StateBackend registered for {base_path:?}; only the local filesystem backend ships with the core"
        )));
    }

    Ok(Arc::new(LocalFileStateBackend::new(base_path)))
}

/// Named-file state load/save with merge-on-write. Cheaply clonable (the
/// backend is an `Arc`), so the runner can hand a second handle to its
/// target-stdout capture task while keeping its own.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StateBackend>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self { backend }
    }

    pub fn for_base_path(base_path: &str) -> Result<Self> {
        Ok(Self::new(backend_for_base_path(base_path)?))
    }

    /// Returns the named blob parsed as JSON, or `{}` if it doesn't exist.
    pub async fn load(&self, name: &str) -> Result<Value> {
        match self.backend.read(name).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Value::Object(Map::new())),
        }
    }

    /// Shallow-merges `state` over whatever is currently stored under `name`
    /// (top-level keys only; `state`'s keys win) and writes the result back.
    pub async fn save(&self, name: &str, state: &Value) -> Result<()> {
        let mut merged = match self.load(name).await? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        if let Value::Object(updates) = state {
            merged.extend(updates.clone());
        }

        let bytes = serde_json::to_vec(&Value::Object(merged))?;
        self.backend.write(name, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn load_missing_blob_returns_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(Arc::new(LocalFileStateBackend::new(dir.path())));
        assert_eq!(store.load("missing.json").await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn save_merges_new_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(Arc::new(LocalFileStateBackend::new(dir.path())));

        store.save("x.json", &json!({"a": 1})).await.unwrap();
        store.save("x.json", &json!({"b": 2})).await.unwrap();

        assert_eq!(store.load("x.json").await.unwrap(), json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn save_overwrites_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(Arc::new(LocalFileStateBackend::new(dir.path())));

        store.save("x.json", &json!({"a": 1})).await.unwrap();
        store.save("x.json", &json!({"a": 2})).await.unwrap();

        assert_eq!(store.load("x.json").await.unwrap(), json!({"a": 2}));
    }

    #[test]
    fn unsupported_schemes_are_rejected_with_a_clear_error() {
        let err = backend_for_base_path("s3://bucket/path").unwrap_err();
        assert!(err.to_string().contains("s3://bucket/path"));
    }

    #[test]
    fn unscoped_paths_use_the_local_filesystem() {
        assert!(backend_for_base_path("/tmp/state").is_ok());
    }
}
