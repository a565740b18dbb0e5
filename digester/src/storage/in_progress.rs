use super::{DigestStream, Marker, ProgressMarker, Storage, StorageError};
use crate::id::JobId;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Decorates a `Storage` with awareness of progress markers.
///
/// Reads check the marker first and fail with `StorageError::InProgress`
/// while it exists, even if a digest is also present. Writes go straight to
/// the wrapped store and leave the marker alone: callers unmark explicitly,
/// and only after `store` succeeded. A failed upload therefore keeps the job
/// in progress.
///
/// Marker and digest live in separate objects with no transaction between
/// them. A crash after a successful store but before unmarking leaves the
/// job in progress until the marker is removed by hand.
pub struct InProgress {
    marker: Arc<ProgressMarker>,
    inner: Arc<dyn Storage>,
}

impl InProgress {
    pub fn new(marker: Arc<ProgressMarker>, inner: Arc<dyn Storage>) -> Self {
        InProgress { marker, inner }
    }

    async fn check_in_progress(&self, id: &JobId) -> Result<(), StorageError> {
        if self.marker.is_marked(id).await? {
            return Err(StorageError::InProgress(id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for InProgress {
    async fn get(&self, id: &JobId) -> Result<DigestStream, StorageError> {
        self.check_in_progress(id).await?;
        self.inner.get(id).await
    }

    async fn exists(&self, id: &JobId) -> Result<bool, StorageError> {
        self.check_in_progress(id).await?;
        self.inner.exists(id).await
    }

    async fn store(&self, id: &JobId, data: Bytes) -> Result<(), StorageError> {
        self.inner.store(id, data).await
    }
}

#[async_trait]
impl Marker for InProgress {
    async fn mark(&self, id: &JobId) -> Result<(), StorageError> {
        self.marker.mark(id).await
    }

    async fn unmark(&self, id: &JobId) -> Result<(), StorageError> {
        self.marker.unmark(id).await
    }
}
