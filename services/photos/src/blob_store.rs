use crate::config::BlobConfig;
use crate::error::{PhotoError, Result};
use crate::photo::Photo;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Standard alphabet, padded or not
const IMAGE_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Binary object store addressed by key
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Write `data` at `key` and return the object's public URL
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String>;
}

/// Public URL of an object: `{base}/{bucket}/{key}`, with the key percent-encoded
pub fn public_url(base: &str, bucket: &str, key: &str) -> String {
    format!(
        "{}/{}/{}",
        base.trim_end_matches('/'),
        bucket,
        urlencoding::encode(key)
    )
}

/// S3 (or S3-compatible) blob backend
pub struct S3BlobBackend {
    client: S3Client,
    bucket: String,
    public_url_base: String,
}

impl S3BlobBackend {
    /// Create a new S3 backend
    pub async fn new(config: &BlobConfig) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob backend initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            public_url_base: config.public_url_base(),
        })
    }
}

#[async_trait]
impl BlobBackend for S3BlobBackend {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                PhotoError::Store(format!(
                    "failed to upload {key} to S3: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(public_url(&self.public_url_base, &self.bucket, key))
    }
}

/// An object held by [`MemoryBlobBackend`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// In-process blob backend for local runs and tests
#[derive(Default)]
pub struct MemoryBlobBackend {
    objects: RwLock<HashMap<String, StoredObject>>,
    bucket: String,
    public_url_base: String,
}

impl MemoryBlobBackend {
    pub fn new(public_url_base: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            bucket: bucket.into(),
            public_url_base: public_url_base.into(),
        }
    }

    pub fn from_config(config: &BlobConfig) -> Self {
        Self::new(config.public_url_base(), config.bucket.clone())
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl BlobBackend for MemoryBlobBackend {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(public_url(&self.public_url_base, &self.bucket, key))
    }
}

/// Persists a photo's image and swaps the payload for its URL
#[derive(Clone)]
pub struct ImageStore {
    backend: Arc<dyn BlobBackend>,
    upload_timeout: Duration,
}

impl ImageStore {
    pub fn new(backend: Arc<dyn BlobBackend>, upload_timeout: Duration) -> Self {
        Self {
            backend,
            upload_timeout,
        }
    }

    /// Blob key for a photo: `<id>.png`
    pub fn image_key(photo_id: &str) -> String {
        format!("{photo_id}.png")
    }

    /// Decode the base64 image, upload it and point `photo.image` at it.
    ///
    /// The photo is only modified once the upload has completed.
    #[instrument(skip(self, photo), fields(photo_id = %photo.id))]
    pub async fn store(&self, photo: &mut Photo) -> Result<String> {
        let data = IMAGE_BASE64
            .decode(photo.image.as_bytes())
            .map_err(|e| PhotoError::Decode(format!("image is not valid base64: {e}")))?;

        let key = Self::image_key(&photo.id);
        let size_bytes = data.len();

        debug!(key = %key, size_bytes, "Uploading image");

        let started = Instant::now();
        let upload = self.backend.put(&key, data, PNG_CONTENT_TYPE);
        let url = match tokio::time::timeout(self.upload_timeout, upload).await {
            Ok(result) => result?,
            Err(_) => {
                metrics::counter!("photos.blob.timeouts").increment(1);
                warn!(key = %key, timeout = ?self.upload_timeout, "Image upload timed out");
                return Err(PhotoError::Store(format!(
                    "upload of {key} timed out after {}s",
                    self.upload_timeout.as_secs()
                )));
            }
        };

        metrics::histogram!("photos.blob.upload_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!("photos.blob.uploaded").increment(1);

        info!(key = %key, size_bytes, url = %url, "Image uploaded successfully");

        photo.image = url.clone();
        Ok(url)
    }
}
