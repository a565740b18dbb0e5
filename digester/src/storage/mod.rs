//! Digest storage over an object store.
//!
//! There is no database. The digest bucket is the artifact cache and the
//! progress bucket holds one marker object per job in flight. A job is
//! `Absent` (neither object), `InProgress` (marker present) or `Present`
//! (digest present, marker gone).

mod artifact;
mod client;
mod in_progress;
mod marker;

pub use artifact::ObjectStorage;
pub use client::{LazyStore, LazyStores, StoreFactory};
pub use in_progress::InProgress;
pub use marker::ProgressMarker;

use crate::errors::{Dependency, ErrorKind};
use crate::id::JobId;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Stored digest body, streamed as it is read from the bucket. The bytes are
/// the gzip encoded digest. Dropping the stream closes it.
pub type DigestStream = BoxStream<'static, Result<Bytes, StorageError>>;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("digest {0} is being created")]
    InProgress(JobId),

    #[error("digest {0} was not found")]
    NotFound(JobId),

    #[error("{dependency} request timed out")]
    Timeout { dependency: Dependency },

    #[error("{dependency} failure: {source}")]
    Backend {
        dependency: Dependency,
        #[source]
        source: object_store::Error,
    },

    #[error("could not compress digest: {0}")]
    Compression(#[from] std::io::Error),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::InProgress(_) => ErrorKind::InProgress,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Dependency,
        }
    }

    pub fn dependency(&self) -> Dependency {
        match self {
            StorageError::Timeout { dependency } | StorageError::Backend { dependency, .. } => {
                *dependency
            }
            StorageError::InProgress(_) => Dependency::Marker,
            StorageError::NotFound(_) | StorageError::Compression(_) => Dependency::Storage,
        }
    }
}

/// Access to finished digests
#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns the stored digest for the given id.
    async fn get(&self, id: &JobId) -> Result<DigestStream, StorageError>;

    /// Returns true if the digest exists, without downloading its body.
    async fn exists(&self, id: &JobId) -> Result<bool, StorageError>;

    /// Stores the digest, overwriting any previous copy.
    async fn store(&self, id: &JobId, data: Bytes) -> Result<(), StorageError>;
}

/// Flags digests as being produced. Both operations are idempotent.
#[async_trait]
pub trait Marker: Send + Sync {
    async fn mark(&self, id: &JobId) -> Result<(), StorageError>;

    async fn unmark(&self, id: &JobId) -> Result<(), StorageError>;
}
