use crate::id::{JobId, TimeRange};
use crate::pipeline::{Digest, PipelineError, Producer};
use crate::queuer::{QueueError, Queuer};
use crate::storage::{DigestStream, LazyStore, StorageError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use flate2::read::MultiGzDecoder;
use futures::StreamExt;
use futures::stream::BoxStream;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore, PutMultipartOpts,
    PutOptions, PutPayload, PutResult,
};
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

pub async fn collect(mut stream: DigestStream) -> Result<Bytes, StorageError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk?);
    }
    Ok(body.freeze())
}

pub fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::new();
    MultiGzDecoder::new(data).read_to_end(&mut decoded).unwrap();
    decoded
}

/// A store whose client can never be built
pub fn unconfigured_store(bucket: &str) -> LazyStore {
    LazyStore::new(
        bucket,
        Arc::new(|_bucket: &str| -> Result<Arc<dyn ObjectStore>, object_store::Error> {
            Err(object_store::Error::NotImplemented)
        }),
    )
}

/// Flow log object key as delivered by AWS
pub fn source_key(account: &str, region: &str, at: DateTime<Utc>) -> String {
    format!(
        "AWSLogs/{account}/vpcflowlogs/{region}/{}/{account}_vpcflowlogs_{region}_fl-0123abcd_{}_9f8e7d6c.log.gz",
        at.format("%Y/%m/%d"),
        at.format("%Y%m%dT%H%MZ"),
    )
}

pub async fn put_object(store: &dyn ObjectStore, key: &str, body: impl Into<Bytes>) {
    store
        .put(&Path::from(key), PutPayload::from(body.into()))
        .await
        .unwrap();
}

/// In-memory store with injectable failures and delays
#[derive(Debug, Default)]
pub struct FaultyStore {
    pub inner: InMemory,
    fail_puts: bool,
    fail_gets: bool,
    get_delay: Option<Duration>,
}

impl FaultyStore {
    pub fn failing_puts() -> Self {
        FaultyStore {
            fail_puts: true,
            ..Default::default()
        }
    }

    pub fn failing_gets() -> Self {
        FaultyStore {
            fail_gets: true,
            ..Default::default()
        }
    }

    /// Reads and HEAD requests stall for `delay` before answering
    pub fn slow_gets(delay: Duration) -> Self {
        FaultyStore {
            get_delay: Some(delay),
            ..Default::default()
        }
    }
}

impl fmt::Display for FaultyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaultyStore({})", self.inner)
    }
}

fn injected() -> object_store::Error {
    object_store::Error::Generic {
        store: "FaultyStore",
        source: "injected failure".into(),
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        if self.fail_puts {
            return Err(injected());
        }
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        if self.fail_puts {
            return Err(injected());
        }
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(
        &self,
        location: &Path,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        if let Some(delay) = self.get_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_gets {
            return Err(injected());
        }
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> object_store::Result<()> {
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

/// Records every queued job and answers with a fixed outcome
#[derive(Default)]
pub struct RecordingQueuer {
    pub jobs: Mutex<Vec<(JobId, DateTime<Utc>, DateTime<Utc>)>>,
    pub fail: bool,
}

impl RecordingQueuer {
    pub fn failing() -> Self {
        RecordingQueuer {
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Queuer for RecordingQueuer {
    async fn queue(
        &self,
        id: &JobId,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.jobs.lock().await.push((id.clone(), start, stop));
        if self.fail {
            return Err(QueueError::UnexpectedStatus {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                attempts: 1,
            });
        }
        Ok(())
    }
}

/// Producer returning a canned digest, counting invocations
pub struct StaticProducer {
    pub calls: AtomicUsize,
    body: Option<Bytes>,
    stall: bool,
}

impl StaticProducer {
    pub fn new(body: &'static [u8]) -> Self {
        StaticProducer {
            calls: AtomicUsize::new(0),
            body: Some(Bytes::from_static(body)),
            stall: false,
        }
    }

    pub fn failing() -> Self {
        StaticProducer {
            calls: AtomicUsize::new(0),
            body: None,
            stall: false,
        }
    }

    /// Never finishes producing
    pub fn stalled() -> Self {
        StaticProducer {
            calls: AtomicUsize::new(0),
            body: None,
            stall: true,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Producer for StaticProducer {
    async fn produce(&self, _range: TimeRange) -> Result<Digest, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall {
            std::future::pending::<()>().await;
        }
        match &self.body {
            Some(body) => Ok(Digest::new(body.clone(), 1)),
            None => Err(PipelineError::List(injected())),
        }
    }
}
