use crate::blob_store::ImageStore;
use crate::codec::{self, IdPolicy, DEFAULT_MAX_DECOMPRESSED_BYTES};
use crate::document_store::PhotoRepository;
use crate::error::{PhotoError, Result};
use crate::geo_filter::GeoFilter;
use crate::photo::Photo;
use tracing::{info, instrument};

/// Per-request orchestration of decoding, image upload and document writes.
///
/// Holds no mutable state; every operation goes to the stores directly, so
/// concurrent requests never contend inside the service.
#[derive(Clone)]
pub struct PhotoService {
    photos: PhotoRepository,
    images: ImageStore,
    filter: GeoFilter,
    max_decompressed_bytes: usize,
}

impl PhotoService {
    pub fn new(photos: PhotoRepository, images: ImageStore, filter: GeoFilter) -> Self {
        Self {
            photos,
            images,
            filter,
            max_decompressed_bytes: DEFAULT_MAX_DECOMPRESSED_BYTES,
        }
    }

    /// Cap the size a gzip request body may inflate to
    pub fn with_body_limit(mut self, max_decompressed_bytes: usize) -> Self {
        self.max_decompressed_bytes = max_decompressed_bytes;
        self
    }

    /// Photos inside the bounding box around (`lat`, `lng`), in store order
    #[instrument(skip(self))]
    pub async fn nearby(&self, lat: f32, lng: f32) -> Result<Vec<Photo>> {
        let photos = self.photos.list().await?;
        let nearby = self.filter.retain_nearby(photos, lat, lng);

        metrics::counter!("photos.listed").increment(1);
        info!(count = nearby.len(), "Nearby photos listed");

        Ok(nearby)
    }

    /// Encoded list response for the photos around (`lat`, `lng`)
    pub async fn list(&self, lat: f32, lng: f32) -> Result<Vec<u8>> {
        let nearby = self.nearby(lat, lng).await?;
        codec::encode_list(nearby)
    }

    /// Decode, upload the image, then write the document.
    ///
    /// The document is only written once the image is stored. If the
    /// document write fails the uploaded image is left behind.
    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    pub async fn create(&self, body: &[u8], content_encoding: Option<&str>) -> Result<Photo> {
        let mut photo = codec::decode_photo(
            body,
            content_encoding,
            IdPolicy::Generate,
            self.max_decompressed_bytes,
        )
        .await?;

        self.images.store(&mut photo).await?;
        self.photos.create(&photo).await?;

        metrics::counter!("photos.created").increment(1);
        info!(photo_id = %photo.id, "Photo created");

        Ok(photo)
    }

    /// Overwrite an existing photo's fields.
    ///
    /// `image` is stored as given; no upload happens here.
    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    pub async fn update(&self, body: &[u8], content_encoding: Option<&str>) -> Result<Photo> {
        let photo = codec::decode_photo(
            body,
            content_encoding,
            IdPolicy::Require,
            self.max_decompressed_bytes,
        )
        .await?;

        self.photos.update(&photo).await?;

        metrics::counter!("photos.updated").increment(1);
        info!(photo_id = %photo.id, "Photo updated");

        Ok(photo)
    }

    /// Remove an existing photo
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(PhotoError::missing_field("id"));
        }

        self.photos.delete(id).await?;

        metrics::counter!("photos.deleted").increment(1);
        info!(photo_id = %id, "Photo deleted");

        Ok(())
    }

    /// Readiness of the document store
    pub async fn ping(&self) -> Result<()> {
        self.photos.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::{BlobBackend, MemoryBlobBackend, MockBlobBackend, PNG_CONTENT_TYPE};
    use crate::document_store::{
        DocumentCollection, MemoryDocumentCollection, MockDocumentCollection,
    };
    use async_trait::async_trait;
    use crate::geo_filter::HECTOMETER_LAT;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::assert_err;

    const BASE: &str = "https://storage.example.com";

    struct Harness {
        documents: Arc<MemoryDocumentCollection>,
        blobs: Arc<MemoryBlobBackend>,
        service: PhotoService,
    }

    fn harness() -> Harness {
        let documents = Arc::new(MemoryDocumentCollection::new());
        let blobs = Arc::new(MemoryBlobBackend::new(BASE, "bucket"));
        let service = PhotoService::new(
            PhotoRepository::new(documents.clone()),
            ImageStore::new(blobs.clone(), Duration::from_secs(50)),
            GeoFilter::default(),
        );
        Harness {
            documents,
            blobs,
            service,
        }
    }

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn p1_body() -> Vec<u8> {
        body(json!({
            "id": "p1",
            "title": "t",
            "image": "aGVsbG8=",
            "latitude": 35.0,
            "longitude": 139.0
        }))
    }

    #[tokio::test]
    async fn test_create_stores_blob_then_document() {
        let h = harness();

        let photo = h.service.create(&p1_body(), None).await.unwrap();
        assert_eq!(photo.image, "https://storage.example.com/bucket/p1.png");

        assert_eq!(h.documents.len(), 1);
        let stored = h.documents.get("p1").await.unwrap().unwrap();
        assert_eq!(stored["id"], "p1");
        assert_eq!(stored["image"], "https://storage.example.com/bucket/p1.png");
        assert_ne!(stored["image"], "aGVsbG8=");

        let blob = h.blobs.object("p1.png").unwrap();
        assert_eq!(blob.data, b"hello");
        assert_eq!(blob.content_type, PNG_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_create_assigns_id_when_missing() {
        let h = harness();
        let request = body(json!({
            "title": "t",
            "image": "aGVsbG8=",
            "latitude": 35.0,
            "longitude": 139.0
        }));

        let photo = h.service.create(&request, None).await.unwrap();

        assert!(!photo.id.is_empty());
        assert!(h.blobs.object(&format!("{}.png", photo.id)).is_some());
        assert!(h.documents.get(&photo.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_blob_failure_writes_no_document() {
        let documents = Arc::new(MemoryDocumentCollection::new());
        let mut blobs = MockBlobBackend::new();
        blobs
            .expect_put()
            .times(1)
            .returning(|_, _, _| Err(PhotoError::Store("bucket unavailable".to_string())));
        let service = PhotoService::new(
            PhotoRepository::new(documents.clone()),
            ImageStore::new(Arc::new(blobs), Duration::from_secs(50)),
            GeoFilter::default(),
        );

        let err = assert_err!(service.create(&p1_body(), None).await);

        assert!(matches!(err, PhotoError::Store(_)));
        assert!(documents.is_empty());
    }

    struct StalledBackend;

    #[async_trait]
    impl BlobBackend for StalledBackend {
        async fn put(&self, _key: &str, _data: Vec<u8>, _content_type: &str) -> Result<String> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_upload_timeout_writes_no_document() {
        let documents = Arc::new(MemoryDocumentCollection::new());
        let service = PhotoService::new(
            PhotoRepository::new(documents.clone()),
            ImageStore::new(Arc::new(StalledBackend), Duration::from_secs(50)),
            GeoFilter::default(),
        );

        let err = assert_err!(service.create(&p1_body(), None).await);

        assert!(matches!(err, PhotoError::Store(_)), "got {err:?}");
        assert!(documents.is_empty());
    }

    #[tokio::test]
    async fn test_create_document_failure_leaves_blob() {
        let blobs = Arc::new(MemoryBlobBackend::new(BASE, "bucket"));
        let mut documents = MockDocumentCollection::new();
        documents
            .expect_set()
            .times(1)
            .returning(|_, _| Err(PhotoError::Store("collection unavailable".to_string())));
        let service = PhotoService::new(
            PhotoRepository::new(Arc::new(documents)),
            ImageStore::new(blobs.clone(), Duration::from_secs(50)),
            GeoFilter::default(),
        );

        let err = assert_err!(service.create(&p1_body(), None).await);

        assert!(matches!(err, PhotoError::Store(_)));
        assert_eq!(blobs.object("p1.png").unwrap().data, b"hello");
    }

    #[tokio::test]
    async fn test_create_rejects_oversized_gzip_body() {
        let h = harness();
        let service = h.service.clone().with_body_limit(16);

        let raw = p1_body();
        let mut encoder = async_compression::tokio::bufread::GzipEncoder::new(raw.as_slice());
        let mut compressed = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut encoder, &mut compressed)
            .await
            .unwrap();

        let err = assert_err!(service.create(&compressed, Some("gzip")).await);

        assert!(matches!(err, PhotoError::Decode(_)));
        assert!(h.blobs.is_empty());
        assert!(h.documents.is_empty());
    }

    #[tokio::test]
    async fn test_create_bad_image_writes_nothing() {
        let h = harness();
        let request = body(json!({
            "id": "p1",
            "title": "t",
            "image": "%%%",
            "latitude": 35.0,
            "longitude": 139.0
        }));

        let err = assert_err!(h.service.create(&request, None).await);

        assert!(matches!(err, PhotoError::Decode(_)));
        assert!(h.blobs.is_empty());
        assert!(h.documents.is_empty());
    }

    #[tokio::test]
    async fn test_list_returns_photo_at_query_point() {
        let h = harness();
        h.service.create(&p1_body(), None).await.unwrap();

        let photos = h.service.nearby(35.0, 139.0).await.unwrap();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].id, "p1");

        let far = h
            .service
            .nearby(35.0 + HECTOMETER_LAT + 0.0001, 139.0)
            .await
            .unwrap();
        assert!(far.is_empty());
    }

    #[tokio::test]
    async fn test_list_encodes_response() {
        let h = harness();
        h.service.create(&p1_body(), None).await.unwrap();

        let bytes = h.service.list(35.0, 139.0).await.unwrap();
        let photos = codec::decode_list(&bytes).unwrap();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].image, "https://storage.example.com/bucket/p1.png");
    }

    #[tokio::test]
    async fn test_update_keeps_image_verbatim() {
        let h = harness();
        h.service.create(&p1_body(), None).await.unwrap();
        let uploads_before = h.blobs.len();

        let request = body(json!({
            "id": "p1",
            "title": "renamed",
            "image": "https://storage.example.com/bucket/p1.png",
            "latitude": 35.0,
            "longitude": 139.0
        }));
        h.service.update(&request, None).await.unwrap();

        let stored = h.documents.get("p1").await.unwrap().unwrap();
        assert_eq!(stored["title"], "renamed");
        assert_eq!(stored["image"], "https://storage.example.com/bucket/p1.png");
        assert_eq!(h.blobs.len(), uploads_before);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let h = harness();

        let err = assert_err!(h.service.update(&p1_body(), None).await);

        assert!(matches!(err, PhotoError::NotFound(_)));
        assert!(h.documents.is_empty());
    }

    #[tokio::test]
    async fn test_update_requires_id() {
        let h = harness();
        let request = body(json!({
            "title": "t",
            "image": "https://storage.example.com/bucket/p1.png",
            "latitude": 35.0,
            "longitude": 139.0
        }));

        let err = assert_err!(h.service.update(&request, None).await);
        assert!(matches!(err, PhotoError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete() {
        let h = harness();
        h.service.create(&p1_body(), None).await.unwrap();

        h.service.delete("p1").await.unwrap();
        assert!(h.documents.is_empty());

        let err = assert_err!(h.service.delete("p1").await);
        assert!(matches!(err, PhotoError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_empty_id() {
        let h = harness();
        let err = assert_err!(h.service.delete("").await);
        assert!(matches!(err, PhotoError::Validation(_)));
    }
}
