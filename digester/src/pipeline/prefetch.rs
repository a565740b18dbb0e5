use super::PipelineError;
use crate::config::PrefetchConfig;
use bytes::Bytes;
use flate2::read::MultiGzDecoder;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore};
use std::io::Read;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A downloaded source object, still as stored. Holds its share of the
/// byte budget until dropped.
#[derive(Debug)]
pub struct Fetched {
    pub key: Path,
    pub body: Bytes,
    _permit: OwnedSemaphorePermit,
}

impl Fetched {
    /// Appends the decoded body to `out`.
    pub fn decode_into(&self, out: &mut Vec<u8>) -> Result<(), PipelineError> {
        decode_into(&self.key, &self.body, out)
    }
}

/// Bounds how many source objects are downloaded at once and how many
/// listed bytes may be held between the start of a fetch and assembly.
/// Bodies stay compressed until the assembler decodes them, so the held
/// bytes never exceed the listed sizes.
///
/// Budget permits are taken in enumeration order before a fetch starts, so
/// a large object waits for earlier ones to be assembled instead of
/// starving. An object larger than the whole budget takes all of it. The
/// budget is shared by every digest produced by this process.
#[derive(Clone, Debug)]
pub struct PrefetchPolicy {
    budget: Arc<Semaphore>,
    max_bytes: u32,
    max_concurrent: usize,
}

impl PrefetchPolicy {
    pub fn new(config: &PrefetchConfig) -> Self {
        let max_bytes = u32::try_from(config.max_bytes).unwrap_or(u32::MAX).max(1);
        PrefetchPolicy {
            budget: Arc::new(Semaphore::new(max_bytes as usize)),
            max_bytes,
            max_concurrent: config.max_concurrent.max(1),
        }
    }

    /// Bytes of budget an object of the given listed size will hold.
    fn weight(&self, size: u64) -> u32 {
        u32::try_from(size).unwrap_or(u32::MAX).min(self.max_bytes)
    }

    pub fn fetch_all<'a>(
        &self,
        client: Arc<dyn ObjectStore>,
        objects: BoxStream<'a, Result<ObjectMeta, PipelineError>>,
    ) -> BoxStream<'a, Result<Fetched, PipelineError>> {
        let policy = self.clone();
        objects
            .and_then(move |meta| {
                let budget = policy.budget.clone();
                let weight = policy.weight(meta.size as u64);
                async move {
                    let permit = budget
                        .acquire_many_owned(weight)
                        .await
                        .expect("prefetch budget is never closed");
                    Ok::<_, PipelineError>((meta, permit))
                }
            })
            .map_ok(move |(meta, permit)| fetch(client.clone(), meta, permit))
            .try_buffered(self.max_concurrent)
            .boxed()
    }
}

async fn fetch(
    client: Arc<dyn ObjectStore>,
    meta: ObjectMeta,
    permit: OwnedSemaphorePermit,
) -> Result<Fetched, PipelineError> {
    let fetch_error = |source| PipelineError::Fetch {
        key: meta.location.to_string(),
        source,
    };
    let body = client
        .get(&meta.location)
        .await
        .map_err(fetch_error)?
        .bytes()
        .await
        .map_err(fetch_error)?;

    Ok(Fetched {
        key: meta.location,
        body,
        _permit: permit,
    })
}

/// Flow logs are normally delivered gzip compressed. Anything without the
/// gzip magic is passed through untouched.
fn decode_into(key: &Path, raw: &[u8], out: &mut Vec<u8>) -> Result<(), PipelineError> {
    if !raw.starts_with(&GZIP_MAGIC) {
        out.extend_from_slice(raw);
        return Ok(());
    }
    MultiGzDecoder::new(raw)
        .read_to_end(out)
        .map_err(|source| PipelineError::Decompress {
            key: key.to_string(),
            source,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{FaultyStore, put_object};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use futures::stream;
    use object_store::memory::InMemory;
    use std::io::Write;
    use std::time::Duration;

    fn policy(max_bytes: u64, max_concurrent: usize) -> PrefetchPolicy {
        PrefetchPolicy::new(&PrefetchConfig {
            max_bytes,
            max_concurrent,
        })
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn listing(store: &dyn ObjectStore) -> BoxStream<'_, Result<ObjectMeta, PipelineError>> {
        store.list(None).map_err(PipelineError::List).boxed()
    }

    #[test]
    fn test_weight_is_capped_by_budget() {
        let policy = policy(100, 1);
        assert_eq!(policy.weight(10), 10);
        assert_eq!(policy.weight(100), 100);
        assert_eq!(policy.weight(10_000), 100);
        assert_eq!(policy.weight(u64::MAX), 100);
    }

    #[tokio::test]
    async fn test_fetch_preserves_order_and_decodes() {
        let memory = Arc::new(InMemory::new());
        put_object(memory.as_ref(), "a.log.gz", gzip(b"first\n")).await;
        put_object(memory.as_ref(), "b.log", "second\n").await;
        put_object(memory.as_ref(), "c.log.gz", gzip(b"third\n")).await;

        let fetched: Vec<_> = policy(1024, 3)
            .fetch_all(memory.clone(), listing(memory.as_ref()))
            .try_collect()
            .await
            .unwrap();

        assert_eq!(fetched[0].body, gzip(b"first\n"));
        assert_eq!(fetched[1].key, Path::from("b.log"));

        let mut decoded = Vec::new();
        for object in &fetched {
            object.decode_into(&mut decoded).unwrap();
        }
        assert_eq!(decoded, b"first\nsecond\nthird\n");
    }

    #[tokio::test]
    async fn test_held_bytes_stay_within_budget() {
        let memory = Arc::new(InMemory::new());
        let line = vec![b'a'; 1_000_000];
        for key in ["1.log.gz", "2.log.gz", "3.log.gz"] {
            put_object(memory.as_ref(), key, gzip(&line)).await;
        }

        let budget = 16 * 1024;
        let held: Vec<_> = policy(budget, 3)
            .fetch_all(memory.clone(), listing(memory.as_ref()))
            .try_collect()
            .await
            .unwrap();

        let held_bytes: u64 = held.iter().map(|f| f.body.len() as u64).sum();
        assert_eq!(held.len(), 3);
        assert!(held_bytes <= budget, "{held_bytes} bytes held");

        let mut decoded = Vec::new();
        held[0].decode_into(&mut decoded).unwrap();
        assert_eq!(decoded.len(), 1_000_000);
    }

    #[tokio::test]
    async fn test_oversized_objects_still_fetch() {
        let memory = Arc::new(InMemory::new());
        put_object(memory.as_ref(), "big-1", vec![b'x'; 4096]).await;
        put_object(memory.as_ref(), "big-2", vec![b'y'; 4096]).await;

        // Each object takes the whole budget, so they flow one at a time
        let mut fetched = policy(16, 4).fetch_all(memory.clone(), listing(memory.as_ref()));
        let first = fetched.try_next().await.unwrap().unwrap();
        assert_eq!(first.body.len(), 4096);
        drop(first);
        let second = fetched.try_next().await.unwrap().unwrap();
        assert_eq!(second.body[0], b'y');
        assert!(fetched.try_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_budget_applies_backpressure() {
        let memory = Arc::new(InMemory::new());
        put_object(memory.as_ref(), "1", vec![0; 10]).await;
        put_object(memory.as_ref(), "2", vec![0; 10]).await;

        let policy = policy(10, 4);
        let mut fetched = policy.fetch_all(memory.clone(), listing(memory.as_ref()));

        let held = fetched.try_next().await.unwrap().unwrap();
        assert_eq!(policy.budget.available_permits(), 0);

        // The second object cannot start while the first is held
        let blocked = tokio::time::timeout(Duration::from_millis(50), fetched.try_next()).await;
        assert!(blocked.is_err());

        drop(held);
        let second = fetched.try_next().await.unwrap().unwrap();
        assert_eq!(second.key, Path::from("2"));
        drop(second);
        assert_eq!(policy.budget.available_permits(), 10);
    }

    #[tokio::test]
    async fn test_fetch_error_aborts() {
        let faulty = Arc::new(FaultyStore::failing_gets());
        put_object(&faulty.inner, "a.log", "body").await;

        let result: Result<Vec<_>, _> = policy(1024, 2)
            .fetch_all(faulty.clone(), listing(faulty.as_ref()))
            .try_collect()
            .await;

        assert!(matches!(result, Err(PipelineError::Fetch { key, .. }) if key == "a.log"));
    }

    #[tokio::test]
    async fn test_corrupt_gzip_is_a_decompress_error() {
        let memory = Arc::new(InMemory::new());
        put_object(memory.as_ref(), "broken.log.gz", vec![0x1f, 0x8b, 0, 1, 2, 3]).await;

        let fetched: Vec<_> = policy(1024, 1)
            .fetch_all(memory.clone(), listing(memory.as_ref()))
            .try_collect()
            .await
            .unwrap();

        let result = fetched[0].decode_into(&mut Vec::new());
        assert!(matches!(result, Err(PipelineError::Decompress { key, .. }) if key == "broken.log.gz"));
    }

    #[tokio::test]
    async fn test_items_pass_in_order_from_plain_streams() {
        let memory = Arc::new(InMemory::new());
        put_object(memory.as_ref(), "z", "last").await;
        put_object(memory.as_ref(), "a", "first").await;

        let metas: Vec<_> = memory.list(None).try_collect().await.unwrap();
        // Feed the objects in reverse listing order
        let reversed = stream::iter(metas.into_iter().rev().map(Ok)).boxed();

        let fetched: Vec<_> = policy(1024, 2)
            .fetch_all(memory.clone(), reversed)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(fetched[0].body, "last");
        assert_eq!(fetched[1].body, "first");
    }
}
