use crate::config::DatabaseConfig;
use crate::error::{PhotoError, Result};
use crate::photo::Photo;
use async_trait::async_trait;
use futures::TryStreamExt;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A schema-less stored document
pub type Document = Value;

/// Keyed collection of JSON documents
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// Fetch a document by key
    async fn get(&self, key: &str) -> Result<Option<Document>>;

    /// Create or overwrite the document at `key`
    async fn set(&self, key: &str, document: Document) -> Result<()>;

    /// Overwrite the given top-level fields of an existing document.
    /// Fails with `NotFound` when there is no document at `key`.
    async fn update(&self, key: &str, fields: Map<String, Value>) -> Result<()>;

    /// Remove the document at `key`
    async fn delete(&self, key: &str) -> Result<()>;

    /// Every document in key order
    async fn list_all(&self) -> Result<Vec<(String, Document)>>;

    /// Check connectivity
    async fn ping(&self) -> Result<()>;
}

/// PostgreSQL-backed collection storing documents as JSONB.
///
/// Each call acquires its own pooled connection; it goes back to the pool
/// when the call returns, on success or error.
pub struct PgDocumentCollection {
    pool: PgPool,
}

impl PgDocumentCollection {
    /// Create a new collection with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| PhotoError::Store("database.url is not configured".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(url)
            .await
            .map_err(|e| PhotoError::Store(format!("failed to connect to PostgreSQL: {e}")))?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PhotoError::Store(format!("failed to run migrations: {e}")))?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl DocumentCollection for PgDocumentCollection {
    async fn get(&self, key: &str) -> Result<Option<Document>> {
        let mut conn = self.pool.acquire().await?;

        let row: Option<(Value,)> = sqlx::query_as("SELECT document FROM photos WHERE id = $1")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(|(document,)| document))
    }

    async fn set(&self, key: &str, document: Document) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            INSERT INTO photos (id, document, created_at, updated_at)
            VALUES ($1, $2, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE
            SET document = EXCLUDED.document, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(&document)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn update(&self, key: &str, fields: Map<String, Value>) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        let result = sqlx::query(
            r#"
            UPDATE photos
            SET document = document || $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(key)
        .bind(Value::Object(fields))
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PhotoError::NotFound(key.to_string()));
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query("DELETE FROM photos WHERE id = $1")
            .bind(key)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<(String, Document)>> {
        let mut conn = self.pool.acquire().await?;

        let mut rows = sqlx::query_as::<_, (String, Value)>(
            "SELECT id, document FROM photos ORDER BY id",
        )
        .fetch(&mut *conn);

        let mut documents = Vec::new();
        while let Some(row) = rows.try_next().await? {
            documents.push(row);
        }

        Ok(documents)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-process collection for local runs and tests
#[derive(Default)]
pub struct MemoryDocumentCollection {
    documents: RwLock<BTreeMap<String, Document>>,
}

impl MemoryDocumentCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document without any checks
    pub fn insert_raw(&self, key: impl Into<String>, document: Document) {
        self.documents.write().insert(key.into(), document);
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl DocumentCollection for MemoryDocumentCollection {
    async fn get(&self, key: &str) -> Result<Option<Document>> {
        Ok(self.documents.read().get(key).cloned())
    }

    async fn set(&self, key: &str, document: Document) -> Result<()> {
        self.documents.write().insert(key.to_string(), document);
        Ok(())
    }

    async fn update(&self, key: &str, fields: Map<String, Value>) -> Result<()> {
        let mut documents = self.documents.write();
        let document = documents
            .get_mut(key)
            .ok_or_else(|| PhotoError::NotFound(key.to_string()))?;

        match document {
            Value::Object(existing) => existing.extend(fields),
            other => *other = Value::Object(fields),
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.documents.write().remove(key);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<(String, Document)>> {
        Ok(self
            .documents
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Read a stored document back into a photo
pub fn decode_document(key: &str, document: Document) -> Result<Photo> {
    serde_json::from_value(document)
        .map_err(|e| PhotoError::Serialization(format!("document {key} is malformed: {e}")))
}

/// Decode every document, skipping the ones that are malformed
pub fn decode_documents(documents: Vec<(String, Document)>) -> Vec<Photo> {
    let mut photos = Vec::with_capacity(documents.len());

    for (key, document) in documents {
        match decode_document(&key, document) {
            Ok(photo) => photos.push(photo),
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping malformed photo document");
                metrics::counter!("photos.documents.skipped").increment(1);
            }
        }
    }

    photos
}

/// Photo persistence on top of a document collection
#[derive(Clone)]
pub struct PhotoRepository {
    collection: Arc<dyn DocumentCollection>,
}

impl PhotoRepository {
    pub fn new(collection: Arc<dyn DocumentCollection>) -> Self {
        Self { collection }
    }

    /// All readable photos in store order
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Photo>> {
        let documents = self.collection.list_all().await?;
        let total = documents.len();
        let photos = decode_documents(documents);

        debug!(total, decoded = photos.len(), "Photo documents fetched");

        Ok(photos)
    }

    /// Upsert the photo under its id
    #[instrument(skip(self, photo), fields(photo_id = %photo.id))]
    pub async fn create(&self, photo: &Photo) -> Result<()> {
        let document = serde_json::to_value(photo)?;
        self.collection.set(&photo.id, document).await?;

        debug!("Photo document written");
        Ok(())
    }

    /// Overwrite title, image and coordinates of an existing photo
    #[instrument(skip(self, photo), fields(photo_id = %photo.id))]
    pub async fn update(&self, photo: &Photo) -> Result<()> {
        if self.collection.get(&photo.id).await?.is_none() {
            return Err(PhotoError::NotFound(photo.id.clone()));
        }

        let mut fields = Map::new();
        fields.insert("title".to_string(), Value::from(photo.title.clone()));
        fields.insert("image".to_string(), Value::from(photo.image.clone()));
        fields.insert("latitude".to_string(), Value::from(photo.latitude));
        fields.insert("longitude".to_string(), Value::from(photo.longitude));

        self.collection.update(&photo.id, fields).await?;

        debug!("Photo document updated");
        Ok(())
    }

    /// Remove an existing photo
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        if self.collection.get(id).await?.is_none() {
            return Err(PhotoError::NotFound(id.to_string()));
        }

        self.collection.delete(id).await?;

        debug!("Photo document deleted");
        Ok(())
    }

    /// Check that the underlying collection is reachable
    pub async fn ping(&self) -> Result<()> {
        self.collection.ping().await
    }
}
