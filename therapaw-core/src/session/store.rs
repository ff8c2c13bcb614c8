//! Object storage adapter for the durable session tier.

use async_trait::async_trait;
use opendal::services::S3;
use opendal::{ErrorKind, Operator};
use thiserror::Error;

use crate::config::StorageConfig;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object storage error: {0}")]
    Backend(#[from] opendal::Error),
}

/// Put/get by key against a remote object store.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError>;

    /// `Ok(None)` when no object exists under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// DigitalOcean Spaces (or any S3-compatible service) through opendal.
///
/// Objects are written to `<prefix><key>.json`. Spaces buckets default to
/// private ACLs, which is what session objects need.
#[derive(Debug, Clone)]
pub struct SpacesStore {
    operator: Operator,
    prefix: String,
}

impl SpacesStore {
    /// Build from config. `Ok(None)` when any required credential is missing.
    pub fn from_config(config: &StorageConfig) -> Result<Option<Self>, StoreError> {
        if !config.is_durable_store_configured() {
            return Ok(None);
        }

        let (Some(bucket), Some(region), Some(endpoint), Some(key), Some(secret)) = (
            config.bucket.as_deref(),
            config.region.as_deref(),
            config.endpoint_url(),
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
        ) else {
            return Ok(None);
        };

        let builder = S3::default()
            .bucket(bucket)
            .region(region)
            .endpoint(&endpoint)
            .access_key_id(key)
            .secret_access_key(secret)
            .disable_config_load()
            .disable_ec2_metadata();

        let operator = Operator::new(builder)?.finish();
        tracing::info!(bucket = bucket, endpoint = %endpoint, "Durable session store configured");

        Ok(Some(Self::with_operator(operator, &config.prefix)))
    }

    /// Wrap an existing operator (any opendal service).
    pub fn with_operator(operator: Operator, prefix: &str) -> Self {
        Self {
            operator,
            prefix: prefix.to_string(),
        }
    }

    pub fn object_path(&self, key: &str) -> String {
        format!("{}{}.json", self.prefix, key)
    }
}

#[async_trait]
impl DurableStore for SpacesStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        let path = self.object_path(key);
        if self.operator.info().full_capability().write_with_content_type {
            self.operator
                .write_with(&path, body)
                .content_type("application/json")
                .await?;
        } else {
            self.operator.write(&path, body).await?;
        }
        tracing::debug!(path = %path, "Session object written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.object_path(key);
        match self.operator.read(&path).await {
            Ok(buffer) => {
                let bytes = buffer.to_vec();
                if bytes.is_empty() {
                    return Ok(None);
                }
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &str {
        "spaces"
    }
}
