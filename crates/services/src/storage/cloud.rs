//! Bucket-backed storage over `object_store`. Credentials come from the
//! environment (service-account JSON for GCS, the usual AWS variables for
//! S3) and never appear in URLs.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::{
    aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder, path::Path as ObjectPath, Attribute,
    Attributes, ObjectStore, ObjectStoreExt, PutOptions, PutPayload,
};
use tracing::debug;

use super::{content_type_for_path, StorageBackend, StorageError};

pub struct CloudStorage {
    store: Arc<dyn ObjectStore>,
    public_base: String,
}

impl CloudStorage {
    pub fn gcs(bucket: &str) -> Result<Self, StorageError> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        Ok(Self {
            store: Arc::new(store),
            public_base: format!("https://storage.googleapis.com/{bucket}"),
        })
    }

    pub fn s3(bucket: &str) -> Result<Self, StorageError> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        Ok(Self {
            store: Arc::new(store),
            public_base: format!("https://{bucket}.s3.amazonaws.com"),
        })
    }
}

#[async_trait]
impl StorageBackend for CloudStorage {
    async fn save(&self, data: &[u8], path: &str) -> Result<String, StorageError> {
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            content_type_for_path(path).into(),
        );
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(
                &ObjectPath::from(path),
                PutPayload::from(data.to_vec()),
                options,
            )
            .await?;
        debug!("Uploaded object {}", path);
        Ok(path.to_string())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let result = self.store.get(&ObjectPath::from(path)).await?;
        Ok(result.bytes().await?.to_vec())
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        match self.store.delete(&ObjectPath::from(path)).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        match self.store.head(&ObjectPath::from(path)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base, path)
    }
}
