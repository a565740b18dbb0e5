use super::{LazyStore, Marker, StorageError};
use crate::errors::Dependency;
use crate::id::{JobId, canonical};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::path::Path;
use std::time::Duration;

const IN_PROGRESS_SUFFIX: &str = "_in_progress";

/// Marks digests as being produced with a `<id>_in_progress` object.
///
/// The marker body is the time it was written. It is only there for
/// operators; nothing reads it back.
pub struct ProgressMarker {
    store: LazyStore,
    check_timeout: Duration,
    now: fn() -> DateTime<Utc>,
}

impl ProgressMarker {
    pub fn new(store: LazyStore, check_timeout: Duration) -> Self {
        ProgressMarker {
            store,
            check_timeout,
            now: Utc::now,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_clock(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    fn path(id: &JobId) -> Path {
        Path::from(format!("{id}{IN_PROGRESS_SUFFIX}"))
    }

    /// Checks for the marker. Anything other than a definite answer from the
    /// store, including a timeout, is an error and must not be read as
    /// "not in progress".
    pub async fn is_marked(&self, id: &JobId) -> Result<bool, StorageError> {
        let client = self.store.client().await.map_err(backend)?;
        let head = tokio::time::timeout(self.check_timeout, client.head(&Self::path(id)))
            .await
            .map_err(|_| StorageError::Timeout {
                dependency: Dependency::Marker,
            })?;

        match head {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(backend(e)),
        }
    }
}

fn backend(source: object_store::Error) -> StorageError {
    StorageError::Backend {
        dependency: Dependency::Marker,
        source,
    }
}

#[async_trait]
impl Marker for ProgressMarker {
    async fn mark(&self, id: &JobId) -> Result<(), StorageError> {
        let client = self.store.client().await.map_err(backend)?;
        let body = Bytes::from(canonical((self.now)()));
        client
            .put(&Self::path(id), body.into())
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn unmark(&self, id: &JobId) -> Result<(), StorageError> {
        let client = self.store.client().await.map_err(backend)?;
        match client.delete(&Self::path(id)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(backend(e)),
        }
    }
}
