use anyhow::Result;
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{
    ObjectStore, PutPayload, aws::AmazonS3Builder, azure::MicrosoftAzureBuilder,
    local::LocalFileSystem, memory::InMemory,
};
use std::sync::Arc;
use url::Url;

use crate::config::StorageConfig;
use crate::error::RelayError;
use crate::model::ArtifactMeta;

/// Create an object store from a DSN string
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>> {
    let url =
        Url::parse(dsn).map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", dsn, e))?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(anyhow::anyhow!(
                    "File DSN must specify a path: file:///path/to/storage"
                ));
            }
            std::fs::create_dir_all(path)?;
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => {
            let builder = create_s3_builder_from_dsn(&url)?;
            Ok(Arc::new(builder.build()?))
        }
        "az" | "azure" => {
            let builder = create_azure_builder_from_dsn(&url)?;
            Ok(Arc::new(builder.build()?))
        }
        scheme => Err(anyhow::anyhow!(
            "Unsupported storage scheme: {}. Supported: file, memory, s3, az",
            scheme
        )),
    }
}

/// Create an S3 builder from a DSN
/// DSN format: s3://[access_key:secret_key@]host[:port]/bucket
pub fn create_s3_builder_from_dsn(dsn: &Url) -> Result<AmazonS3Builder> {
    let host = dsn
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("Missing S3 host in DSN"))?;
    let port = dsn.port();
    let bucket = dsn.path().trim_start_matches('/');

    if bucket.is_empty() {
        return Err(anyhow::anyhow!(
            "S3 DSN must specify a bucket: s3://host/bucket"
        ));
    }

    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_region("us-east-1");

    let access_key = dsn.username();
    let secret_key = dsn.password().unwrap_or("");

    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    // Custom endpoint for S3-compatible stores (MinIO, etc)
    if !host.contains("amazonaws.com") {
        let scheme = if port == Some(443) { "https" } else { "http" };
        let endpoint = match port {
            Some(p) => format!("{scheme}://{host}:{p}"),
            None => format!("{scheme}://{host}"),
        };
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false);
    }

    if let Ok(env_region) = std::env::var("AWS_DEFAULT_REGION") {
        builder = builder.with_region(env_region);
    }

    Ok(builder)
}

/// Create an Azure Blob builder from a DSN
/// DSN format: az://account/container
///
/// Credentials come from the usual `AZURE_*` environment variables.
pub fn create_azure_builder_from_dsn(dsn: &Url) -> Result<MicrosoftAzureBuilder> {
    let account = dsn.host_str().ok_or_else(|| {
        anyhow::anyhow!("Azure DSN must specify an account: az://account/container")
    })?;
    let container = dsn.path().trim_matches('/');

    if container.is_empty() {
        return Err(anyhow::anyhow!(
            "Azure DSN must specify a container: az://account/container"
        ));
    }

    Ok(MicrosoftAzureBuilder::from_env()
        .with_account(account)
        .with_container_name(container))
}

/// Outcome of deleting a single artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Removed by someone else between listing and deleting
    AlreadyGone,
}

/// Error returned by [`ArtifactStore::fetch`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("artifact {0} no longer exists")]
    Vanished(String),
    #[error("failed to read artifact {name}: {source}")]
    Store {
        name: String,
        #[source]
        source: object_store::Error,
    },
}

/// Artifact-level view of an object store, scoped to an optional prefix.
///
/// Artifact names are the final path segment. Listing walks the prefix
/// recursively, so reads and deletes of listed artifacts go through their full
/// location rather than the name.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
    prefix: Option<ObjectPath>,
}

impl ArtifactStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<&str>) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(ObjectPath::from);
        Self { store, prefix }
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, RelayError> {
        let dsn = config
            .dsn
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| RelayError::config("storage.dsn is not set"))?;
        let store = create_object_store_from_dsn(dsn)
            .map_err(|e| RelayError::config(format!("invalid storage configuration: {e}")))?;
        Ok(Self::new(store, config.prefix.as_deref()))
    }

    fn location(&self, name: &str) -> ObjectPath {
        match &self.prefix {
            Some(prefix) => prefix.child(name),
            None => ObjectPath::from(name),
        }
    }

    /// List every artifact under the prefix.
    pub async fn list(&self) -> Result<Vec<ArtifactMeta>, RelayError> {
        let objects: Vec<_> = self
            .store
            .list(self.prefix.as_ref())
            .try_collect()
            .await
            .map_err(|e| RelayError::connection("object store", e))?;

        Ok(objects
            .into_iter()
            .filter_map(|meta| {
                let name = meta.location.filename()?.to_string();
                Some(ArtifactMeta {
                    name,
                    location: meta.location.to_string(),
                    last_modified: meta.last_modified.with_timezone(&Utc),
                    size: meta.size as u64,
                })
            })
            .collect())
    }

    /// Read the full content of the artifact named `name` directly under the prefix.
    pub async fn fetch(&self, name: &str) -> Result<Bytes, FetchError> {
        self.get(&self.location(name), name).await
    }

    /// Read the full content of a listed artifact.
    pub async fn fetch_artifact(&self, artifact: &ArtifactMeta) -> Result<Bytes, FetchError> {
        let location = ObjectPath::parse(&artifact.location).map_err(|e| FetchError::Store {
            name: artifact.name.clone(),
            source: e.into(),
        })?;
        self.get(&location, &artifact.name).await
    }

    async fn get(&self, location: &ObjectPath, name: &str) -> Result<Bytes, FetchError> {
        let result = match self.store.get(location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(FetchError::Vanished(name.to_string()));
            }
            Err(source) => {
                return Err(FetchError::Store {
                    name: name.to_string(),
                    source,
                });
            }
        };
        result.bytes().await.map_err(|source| FetchError::Store {
            name: name.to_string(),
            source,
        })
    }

    /// Write an artifact, replacing any existing object with the same name.
    ///
    /// A single put is atomic: readers observe the old object or the complete
    /// new one, never a partial write.
    pub async fn put(&self, name: &str, content: Bytes) -> Result<(), object_store::Error> {
        self.store
            .put(&self.location(name), PutPayload::from(content))
            .await?;
        Ok(())
    }

    /// Delete a listed artifact at its full location.
    pub async fn delete(
        &self,
        artifact: &ArtifactMeta,
    ) -> Result<DeleteOutcome, object_store::Error> {
        let location = ObjectPath::parse(&artifact.location)?;
        match self.store.delete(&location).await {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(object_store::Error::NotFound { .. }) => Ok(DeleteOutcome::AlreadyGone),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_memory_object_store() {
        let object_store = create_object_store_from_dsn("memory://").unwrap();
        assert!(Arc::strong_count(&object_store) == 1);
    }

    #[test]
    fn test_create_filesystem_object_store() {
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_string_lossy();
        let dsn = format!("file://{path}");

        let object_store = create_object_store_from_dsn(&dsn).unwrap();
        assert!(Arc::strong_count(&object_store) == 1);
    }

    #[test]
    fn test_invalid_dsn() {
        let result = create_object_store_from_dsn("not-a-url");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid storage DSN")
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        let result = create_object_store_from_dsn("gcs://bucket/prefix");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Unsupported storage scheme")
        );
    }

    #[test]
    fn test_file_dsn_without_path() {
        let result = create_object_store_from_dsn("file://");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("File DSN must specify a path")
        );
    }

    #[test]
    fn test_s3_dsn_parsing() {
        let result = create_s3_builder_from_dsn(
            &Url::parse("s3://access:secret@localhost:9000/bucket").unwrap(),
        );
        assert!(result.is_ok());

        let result = create_s3_builder_from_dsn(&Url::parse("s3://localhost:9000/").unwrap());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must specify a bucket")
        );
    }

    #[test]
    fn test_azure_dsn_parsing() {
        let result =
            create_azure_builder_from_dsn(&Url::parse("az://exportsaccount/exports").unwrap());
        assert!(result.is_ok());

        let result = create_azure_builder_from_dsn(&Url::parse("az://exportsaccount/").unwrap());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must specify a container")
        );
    }

    #[test]
    fn test_from_config_requires_dsn() {
        let result = ArtifactStore::from_config(&StorageConfig::default());
        assert!(matches!(result, Err(RelayError::Config(_))));
    }

    #[tokio::test]
    async fn test_put_list_fetch_delete_with_prefix() {
        let inner: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let store = ArtifactStore::new(inner.clone(), Some("/exports/"));

        store
            .put("Orders_20240201_120000.csv", Bytes::from_static(b"id\n1\n"))
            .await
            .unwrap();
        // Objects outside the prefix are not artifacts
        inner
            .put(&ObjectPath::from("other/ignored.csv"), PutPayload::from_static(b"x"))
            .await
            .unwrap();

        let artifacts = store.list().await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "Orders_20240201_120000.csv");
        assert_eq!(artifacts[0].location, "exports/Orders_20240201_120000.csv");
        assert_eq!(artifacts[0].size, 5);

        let content = store.fetch("Orders_20240201_120000.csv").await.unwrap();
        assert_eq!(&content[..], b"id\n1\n");

        assert_eq!(store.delete(&artifacts[0]).await.unwrap(), DeleteOutcome::Deleted);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nested_artifact_is_read_and_deleted_at_its_location() {
        let inner: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let store = ArtifactStore::new(inner.clone(), Some("exports"));
        inner
            .put(
                &ObjectPath::from("exports/archive/old.csv"),
                PutPayload::from_static(b"id\n1\n"),
            )
            .await
            .unwrap();

        let artifacts = store.list().await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].name, "old.csv");
        assert_eq!(artifacts[0].location, "exports/archive/old.csv");

        let content = store.fetch_artifact(&artifacts[0]).await.unwrap();
        assert_eq!(&content[..], b"id\n1\n");

        assert_eq!(store.delete(&artifacts[0]).await.unwrap(), DeleteOutcome::Deleted);
        let remaining: Vec<_> = inner.list(None).try_collect().await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_reported_as_vanished() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let local = LocalFileSystem::new_with_prefix(temp_dir.path()).unwrap();
        let store = ArtifactStore::new(Arc::new(local), None);

        assert!(matches!(
            store.fetch("gone.csv").await,
            Err(FetchError::Vanished(name)) if name == "gone.csv"
        ));
        let gone = ArtifactMeta {
            name: "gone.csv".to_string(),
            location: "gone.csv".to_string(),
            last_modified: Utc::now(),
            size: 0,
        };
        assert!(matches!(
            store.fetch_artifact(&gone).await,
            Err(FetchError::Vanished(_))
        ));
        assert_eq!(store.delete(&gone).await.unwrap(), DeleteOutcome::AlreadyGone);
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_artifact() {
        let store = ArtifactStore::new(Arc::new(InMemory::new()), None);

        store.put("a.csv", Bytes::from_static(b"old")).await.unwrap();
        store.put("a.csv", Bytes::from_static(b"new")).await.unwrap();

        assert_eq!(&store.fetch("a.csv").await.unwrap()[..], b"new");
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
