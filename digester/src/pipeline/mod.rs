//! Builds a digest from the raw flow logs of a time window.
//!
//! The stages are lazy streams chained together: the source enumerator
//! lists candidate objects, the time window drops keys outside
//! `[start, stop]`, the prefetch policy downloads what is left under a
//! concurrency and byte budget, and the assembler decodes and concatenates
//! the bodies in listing order.

mod assembler;
mod filter;
mod prefetch;
mod source;

pub use assembler::assemble;
pub use filter::{TimeWindow, key_timestamp};
pub use prefetch::{Fetched, PrefetchPolicy};
pub use source::SourceEnumerator;

use crate::config::{PrefetchConfig, SourceConfig};
use crate::id::TimeRange;
use crate::histogram;
use crate::metrics_defs::{DIGEST_BYTES, DIGEST_PRODUCE_DURATION};
use crate::storage::LazyStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Instant;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source bucket unavailable: {0}")]
    Client(#[source] object_store::Error),

    #[error("could not list source objects: {0}")]
    List(#[source] object_store::Error),

    #[error("could not fetch {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("could not decompress {key}: {source}")]
    Decompress {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// The assembled, uncompressed digest body.
#[derive(Clone, Debug, PartialEq)]
pub struct Digest {
    bytes: Bytes,
    objects: usize,
}

impl Digest {
    pub fn new(bytes: Bytes, objects: usize) -> Self {
        Digest { bytes, objects }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Number of source objects that went into the digest
    pub fn objects(&self) -> usize {
        self.objects
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, range: TimeRange) -> Result<Digest, PipelineError>;
}

pub struct DigestPipeline {
    source: LazyStore,
    enumerator: SourceEnumerator,
    prefetch: PrefetchPolicy,
}

impl DigestPipeline {
    pub fn new(source: LazyStore, config: &SourceConfig, prefetch: &PrefetchConfig) -> Self {
        DigestPipeline {
            source,
            enumerator: SourceEnumerator::new(config),
            prefetch: PrefetchPolicy::new(prefetch),
        }
    }
}

#[async_trait]
impl Producer for DigestPipeline {
    async fn produce(&self, range: TimeRange) -> Result<Digest, PipelineError> {
        let started = Instant::now();
        let client = self.source.client().await.map_err(PipelineError::Client)?;

        let listed = self.enumerator.list(client.as_ref(), &range);
        let filtered = TimeWindow::new(&range).apply(listed);
        let fetched = self.prefetch.fetch_all(client.clone(), filtered);
        let digest = assemble(fetched).await?;

        histogram!(DIGEST_PRODUCE_DURATION).record(started.elapsed().as_secs_f64());
        histogram!(DIGEST_BYTES).record(digest.len() as f64);
        tracing::info!(
            bucket = self.source.bucket(),
            objects = digest.objects(),
            bytes = digest.len(),
            "Assembled digest"
        );
        Ok(digest)
    }
}
