//! Photo Catalog Service
//!
//! Backend for geotagged photos: clients upload photos, list the ones near a
//! coordinate, and update or delete existing entries.
//!
//! ## Features
//!
//! - **Proximity Listing**: a fixed bounding box around the query point,
//!   evaluated in-process after fetching the whole collection
//! - **Image Persistence**: base64 images are written to the blob store as
//!   `<id>.png` under a bounded upload time before any document is written
//! - **Document Storage**: one JSON document per photo, keyed by id, in
//!   PostgreSQL (JSONB) or in memory
//! - **Compressed Uploads**: gzip request bodies, declared or not
//!
//! ## Architecture
//!
//! ```text
//!   HTTP /photos
//!        │
//!        ▼
//! ┌──────────────┐    ┌──────────────┐
//! │ Routes       │───▶│ Codec        │
//! └──────────────┘    └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ Photo        │───▶│ Image        │───▶│ Blob Backend │
//! │ Service      │    │ Store        │    │ (S3/memory)  │
//! └──────────────┘    └──────────────┘    └──────────────┘
//!        │
//!        ├──────────────────┐
//!        ▼                  ▼
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ Geo          │    │ Photo        │───▶│ Document     │
//! │ Filter       │    │ Repository   │    │ Collection   │
//! └──────────────┘    └──────────────┘    └──────────────┘
//! ```

pub mod blob_store;
pub mod codec;
pub mod config;
pub mod document_store;
pub mod error;
pub mod geo_filter;
pub mod photo;
pub mod routes;
pub mod service;

pub use blob_store::{BlobBackend, ImageStore, MemoryBlobBackend, S3BlobBackend};
pub use codec::{decode_photo, encode_list, IdPolicy};
pub use config::Config;
pub use document_store::{
    DocumentCollection, MemoryDocumentCollection, PgDocumentCollection, PhotoRepository,
};
pub use error::{PhotoError, Result};
pub use geo_filter::GeoFilter;
pub use photo::{ListResponse, Photo};
pub use routes::{create_router, start_api_server, AppState};
pub use service::PhotoService;
