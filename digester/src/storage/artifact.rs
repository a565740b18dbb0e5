use super::{DigestStream, LazyStore, Storage, StorageError};
use crate::errors::Dependency;
use crate::id::JobId;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::TryStreamExt;
use object_store::path::Path;
use std::io::Write;

const KEY_SUFFIX: &str = ".log.gz";

/// Stores digests as gzip objects under `<id>.log.gz`.
pub struct ObjectStorage {
    store: LazyStore,
}

impl ObjectStorage {
    pub fn new(store: LazyStore) -> Self {
        ObjectStorage { store }
    }

    fn path(id: &JobId) -> Path {
        Path::from(format!("{id}{KEY_SUFFIX}"))
    }
}

fn backend(source: object_store::Error) -> StorageError {
    StorageError::Backend {
        dependency: Dependency::Storage,
        source,
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn get(&self, id: &JobId) -> Result<DigestStream, StorageError> {
        let client = self.store.client().await.map_err(backend)?;
        match client.get(&Self::path(id)).await {
            Ok(result) => Ok(Box::pin(result.into_stream().map_err(backend))),
            Err(object_store::Error::NotFound { .. }) => Err(StorageError::NotFound(id.clone())),
            Err(e) => Err(backend(e)),
        }
    }

    async fn exists(&self, id: &JobId) -> Result<bool, StorageError> {
        let client = self.store.client().await.map_err(backend)?;
        match client.head(&Self::path(id)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(backend(e)),
        }
    }

    async fn store(&self, id: &JobId, data: Bytes) -> Result<(), StorageError> {
        let compressed = compress(&data)?;
        let client = self.store.client().await.map_err(backend)?;
        client
            .put(&Self::path(id), Bytes::from(compressed).into())
            .await
            .map_err(backend)?;

        tracing::debug!(
            %id,
            bucket = self.store.bucket(),
            raw_bytes = data.len(),
            "Stored digest"
        );
        Ok(())
    }
}
