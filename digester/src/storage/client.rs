use crate::config::StorageConfig;
use object_store::ObjectStore;
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub type StoreFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn ObjectStore>, object_store::Error> + Send + Sync>;

struct LazyStoreInner {
    bucket: String,
    factory: StoreFactory,
    client: OnceCell<Arc<dyn ObjectStore>>,
}

/// Object store client for a single bucket, built on first use.
///
/// Concurrent first callers wait on the same initialization; the factory
/// runs at most once per successful build. A failed build is retried by the
/// next caller.
#[derive(Clone)]
pub struct LazyStore {
    inner: Arc<LazyStoreInner>,
}

impl LazyStore {
    pub fn new(bucket: impl Into<String>, factory: StoreFactory) -> Self {
        LazyStore {
            inner: Arc::new(LazyStoreInner {
                bucket: bucket.into(),
                factory,
                client: OnceCell::new(),
            }),
        }
    }

    /// An S3 client configured from the storage section.
    pub fn s3(bucket: impl Into<String>, config: &StorageConfig) -> Self {
        let config = config.clone();
        LazyStore::new(
            bucket,
            Arc::new(move |bucket: &str| -> Result<Arc<dyn ObjectStore>, object_store::Error> {
                let mut builder = AmazonS3Builder::from_env()
                    .with_region(config.region.clone())
                    .with_bucket_name(bucket);
                if !config.use_iam {
                    require_static_keys(&builder)?;
                }
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.with_endpoint(endpoint.clone()).with_allow_http(true);
                }
                tracing::info!(bucket, region = %config.region, "Creating object store client");
                Ok(Arc::new(builder.build()?) as Arc<dyn ObjectStore>)
            }),
        )
    }

    /// Wraps an already constructed client.
    pub fn from_store(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        LazyStore {
            inner: Arc::new(LazyStoreInner {
                bucket: bucket.into(),
                factory: Arc::new(unconfigured),
                client: OnceCell::from(store),
            }),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.inner.bucket
    }

    pub async fn client(&self) -> Result<Arc<dyn ObjectStore>, object_store::Error> {
        self.inner
            .client
            .get_or_try_init(|| async { (self.inner.factory)(&self.inner.bucket) })
            .await
            .cloned()
    }
}

fn unconfigured(bucket: &str) -> Result<Arc<dyn ObjectStore>, object_store::Error> {
    tracing::error!(bucket, "Object store client was not preconfigured");
    Err(object_store::Error::NotImplemented)
}

/// Hands out one `LazyStore` per bucket name so that components pointed at
/// the same bucket share a client.
pub struct LazyStores {
    make: Box<dyn Fn(&str) -> LazyStore + Send + Sync>,
    stores: HashMap<String, LazyStore>,
}

impl LazyStores {
    pub fn new<F>(make: F) -> Self
    where
        F: Fn(&str) -> LazyStore + Send + Sync + 'static,
    {
        LazyStores {
            make: Box::new(make),
            stores: HashMap::new(),
        }
    }

    pub fn s3(config: &StorageConfig) -> Self {
        let config = config.clone();
        LazyStores::new(move |bucket| LazyStore::s3(bucket, &config))
    }

    pub fn bucket(&mut self, name: &str) -> LazyStore {
        self.stores
            .entry(name.to_string())
            .or_insert_with(|| (self.make)(name))
            .clone()
    }
}

/// Without IAM the environment has to provide a static key pair. With IAM
/// the builder falls back to the default AWS credential chain.
fn require_static_keys(builder: &AmazonS3Builder) -> Result<(), object_store::Error> {
    let missing = [
        AmazonS3ConfigKey::AccessKeyId,
        AmazonS3ConfigKey::SecretAccessKey,
    ]
    .into_iter()
    .any(|key| builder.get_config_value(&key).is_none());

    if missing {
        return Err(object_store::Error::Generic {
            store: "S3",
            source: "use_iam is false but AWS_ACCESS_KEY_ID or AWS_SECRET_ACCESS_KEY is unset"
                .into(),
        });
    }
    Ok(())
}
