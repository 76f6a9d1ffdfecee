use crate::codec::DEFAULT_MAX_DECOMPRESSED_BYTES;
use crate::geo_filter::{HECTOMETER_LAT, HECTOMETER_LNG};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the photo service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Document store configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Blob store configuration
    #[serde(default)]
    pub blob: BlobConfig,
    /// Proximity filter configuration
    #[serde(default)]
    pub geo: GeoConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Start the Prometheus exporter
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Largest accepted body after gunzip, in bytes
    #[serde(default = "default_max_decompressed_bytes")]
    pub max_decompressed_bytes: usize,
}

/// Which document store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentBackend {
    Postgres,
    Memory,
}

/// Which blob store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackendKind {
    S3,
    Memory,
}

/// Document store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Backend implementation
    #[serde(default = "default_document_backend")]
    pub backend: DocumentBackend,
    /// PostgreSQL connection URL (required for the postgres backend)
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Blob store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    /// Backend implementation
    #[serde(default = "default_blob_backend")]
    pub backend: BlobBackendKind,
    /// Bucket holding the photo images
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base of the public image URLs; `{base}/{bucket}/{key}`
    pub public_url_base: Option<String>,
    /// Upper bound for a single image upload in seconds
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

/// Bounding-box half-widths in degrees
#[derive(Debug, Clone, Deserialize)]
pub struct GeoConfig {
    #[serde(default = "default_lat_tolerance")]
    pub lat_tolerance: f32,
    #[serde(default = "default_lng_tolerance")]
    pub lng_tolerance: f32,
}

// Default value functions
fn default_service_name() -> String {
    "photo-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024 // 32MB
}

fn default_max_decompressed_bytes() -> usize {
    DEFAULT_MAX_DECOMPRESSED_BYTES
}

fn default_document_backend() -> DocumentBackend {
    DocumentBackend::Postgres
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_blob_backend() -> BlobBackendKind {
    BlobBackendKind::S3
}

fn default_bucket() -> String {
    "photos".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_upload_timeout_secs() -> u64 {
    50
}

fn default_lat_tolerance() -> f32 {
    HECTOMETER_LAT
}

fn default_lng_tolerance() -> f32 {
    HECTOMETER_LNG
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/photos").required(false))
            .add_source(config::File::with_name("/etc/photos/photos").required(false))
            // Override with environment variables
            // PHOTOS__BLOB__BUCKET -> blob.bucket
            .add_source(
                config::Environment::with_prefix("PHOTOS")
                    .separator("__")
                    .try_parsing(true),
            );

        // Deployments that only export BUCKET_NAME keep working
        if let Ok(bucket) = std::env::var("BUCKET_NAME") {
            builder = builder.set_default("blob.bucket", bucket)?;
        }

        let config = builder.build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.database.backend == DocumentBackend::Postgres && self.database.url.is_none() {
            anyhow::bail!("database.url is required for the postgres backend");
        }
        if self.blob.bucket.is_empty() {
            anyhow::bail!("blob.bucket must not be empty");
        }
        Ok(())
    }

    /// Get image upload timeout as Duration
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.blob.upload_timeout_secs)
    }
}

impl DatabaseConfig {
    /// Get connection acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl BlobConfig {
    /// Base used to build public image URLs
    pub fn public_url_base(&self) -> String {
        match (&self.public_url_base, &self.endpoint_url) {
            (Some(base), _) => base.trim_end_matches('/').to_string(),
            (None, Some(endpoint)) => endpoint.trim_end_matches('/').to_string(),
            (None, None) => format!("https://s3.{}.amazonaws.com", self.region),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            metrics_enabled: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
            max_decompressed_bytes: default_max_decompressed_bytes(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_document_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            run_migrations: true,
        }
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: default_blob_backend(),
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            public_url_base: None,
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            lat_tolerance: default_lat_tolerance(),
            lng_tolerance: default_lng_tolerance(),
        }
    }
}
