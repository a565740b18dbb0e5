use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Empty bucket name for {0}")]
    EmptyBucket(&'static str),

    #[error("Prefetch limit {0} must be greater than 0")]
    InvalidPrefetchLimit(&'static str),

    #[error("Retry policy needs at least one attempt")]
    InvalidRetryAttempts,

    #[error("Empty dispatch topic")]
    EmptyTopic,
}

/// Digester configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    pub storage: StorageConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
    pub dispatch: DispatchConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if self.storage.digest_bucket.is_empty() {
            return Err(ValidationError::EmptyBucket("digests"));
        }
        if self.storage.progress_bucket.is_empty() {
            return Err(ValidationError::EmptyBucket("progress markers"));
        }
        if self.source.bucket.is_empty() {
            return Err(ValidationError::EmptyBucket("source logs"));
        }

        if self.prefetch.max_bytes == 0 {
            return Err(ValidationError::InvalidPrefetchLimit("max_bytes"));
        }
        if self.prefetch.max_concurrent == 0 {
            return Err(ValidationError::InvalidPrefetchLimit("max_concurrent"));
        }

        if self.dispatch.topic.is_empty() {
            return Err(ValidationError::EmptyTopic);
        }
        if self.dispatch.retry.max_attempts == 0 {
            return Err(ValidationError::InvalidRetryAttempts);
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// Object store settings shared by the digest, progress and source buckets.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub region: String,
    /// When false, a static key pair must be set in the standard AWS
    /// environment variables. When true, the default AWS credential chain
    /// is used (environment, web identity, container or instance role).
    #[serde(default = "default_use_iam")]
    pub use_iam: bool,
    /// Overrides the S3 endpoint, e.g. for S3 compatible stores.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub digest_bucket: String,
    pub progress_bucket: String,
    /// Upper bound on the marker check made before every read.
    #[serde(default = "default_progress_timeout_secs")]
    pub progress_timeout_secs: u64,
}

fn default_use_iam() -> bool {
    true
}

fn default_progress_timeout_secs() -> u64 {
    5
}

/// Where the raw VPC flow logs live. Listing is narrowed to the
/// `AWSLogs/<account>/vpcflowlogs/<region>/<date>` prefixes when both
/// accounts and regions are given.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub bucket: String,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub regions: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PrefetchConfig {
    pub max_bytes: u64,
    pub max_concurrent: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        PrefetchConfig {
            max_bytes: 100 * 1024 * 1024,
            max_concurrent: 8,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DispatchConfig {
    /// Base URL of the streaming appliance
    pub endpoint: Url,
    pub topic: String,
    #[serde(default = "default_event")]
    pub event: String,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_event() -> String {
    "event".into()
}

fn default_dispatch_timeout_secs() -> u64 {
    10
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 5,
            backoff_ms: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
listener:
    host: "0.0.0.0"
    port: 3000
storage:
    region: us-east-1
    digest_bucket: digests
    progress_bucket: digests-progress
source:
    bucket: flow-logs
    accounts: ["123456789012"]
    regions: ["us-east-1", "us-west-2"]
dispatch:
    endpoint: "http://stream-appliance:8080"
    topic: digests
"#;

    #[test]
    fn test_parse_valid_config() {
        let config: Config = serde_yaml::from_str(VALID).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.listener.port, 3000);
        assert!(config.storage.use_iam);
        assert_eq!(config.storage.endpoint, None);
        assert_eq!(config.storage.progress_timeout_secs, 5);
        assert_eq!(config.source.regions.len(), 2);
        assert_eq!(config.prefetch, PrefetchConfig::default());
        assert_eq!(config.dispatch.endpoint.as_str(), "http://stream-appliance:8080/");
        assert_eq!(config.dispatch.event, "event");
        assert_eq!(config.dispatch.retry, RetryConfig::default());
    }

    #[test]
    fn test_invalid_dispatch_url() {
        let yaml = VALID.replace("http://stream-appliance:8080", "not a url");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let base: Config = serde_yaml::from_str(VALID).unwrap();

        let mut config = base.clone();
        config.listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = base.clone();
        config.storage.progress_bucket = String::new();
        assert_eq!(
            config.validate(),
            Err(ValidationError::EmptyBucket("progress markers"))
        );

        let mut config = base.clone();
        config.prefetch.max_concurrent = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidPrefetchLimit("max_concurrent"))
        );

        let mut config = base.clone();
        config.dispatch.retry.max_attempts = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidRetryAttempts));

        let mut config = base;
        config.dispatch.topic = String::new();
        assert_eq!(config.validate(), Err(ValidationError::EmptyTopic));
    }
}
