//! Request body decoding and list response encoding.
//!
//! Bodies arrive as JSON, usually gzip-compressed. Decompression happens
//! fully before parsing; validation then checks the required fields in a
//! fixed order so the first missing one is the one reported.

use crate::error::{PhotoError, Result};
use crate::photo::{ListResponse, Photo};
use async_compression::tokio::bufread::GzipDecoder;
use serde::Deserialize;
use std::borrow::Cow;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};
use uuid::Uuid;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Default cap on a gunzipped request body
pub const DEFAULT_MAX_DECOMPRESSED_BYTES: usize = 32 * 1024 * 1024;

/// What to do when the body carries no `id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    /// Assign a fresh time-ordered id (creates)
    Generate,
    /// Reject the body (updates)
    Require,
}

/// Inbound body before validation
#[derive(Debug, Deserialize)]
struct PhotoPayload {
    id: Option<String>,
    title: Option<String>,
    image: Option<String>,
    latitude: Option<f32>,
    longitude: Option<f32>,
}

impl PhotoPayload {
    fn into_photo(self, policy: IdPolicy) -> Result<Photo> {
        let title = required_text(self.title, "title")?;
        let image = required_text(self.image, "image")?;
        let latitude = self
            .latitude
            .ok_or_else(|| PhotoError::missing_field("latitude"))?;
        let longitude = self
            .longitude
            .ok_or_else(|| PhotoError::missing_field("longitude"))?;

        let id = match self.id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => match policy {
                IdPolicy::Generate => new_photo_id(),
                IdPolicy::Require => return Err(PhotoError::missing_field("id")),
            },
        };

        Ok(Photo {
            id,
            title,
            image,
            latitude,
            longitude,
        })
    }
}

fn required_text(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PhotoError::missing_field(field))
}

/// Generate a time-ordered unique photo id
pub fn new_photo_id() -> String {
    Uuid::now_v7().to_string()
}

/// Decode a request body into a validated photo.
///
/// A gzip body may inflate to at most `max_decompressed_bytes`.
#[instrument(skip(body), fields(size_bytes = body.len()))]
pub async fn decode_photo(
    body: &[u8],
    content_encoding: Option<&str>,
    policy: IdPolicy,
    max_decompressed_bytes: usize,
) -> Result<Photo> {
    let raw = decompress(body, content_encoding, max_decompressed_bytes).await?;

    let payload: PhotoPayload = serde_json::from_slice(&raw)
        .map_err(|e| PhotoError::Decode(format!("malformed photo body: {e}")))?;

    let photo = payload.into_photo(policy)?;
    debug!(photo_id = %photo.id, "Photo body decoded");

    Ok(photo)
}

/// Gunzip the body when declared or detected, otherwise pass it through
async fn decompress<'a>(
    body: &'a [u8],
    content_encoding: Option<&str>,
    limit: usize,
) -> Result<Cow<'a, [u8]>> {
    let encoding = content_encoding.map(|e| e.trim().to_ascii_lowercase());

    let gzipped = match encoding.as_deref() {
        Some("gzip") | Some("x-gzip") => true,
        // Clients have always gzipped without declaring it
        None | Some("") | Some("identity") => body.starts_with(&GZIP_MAGIC),
        Some(other) => {
            return Err(PhotoError::Decode(format!(
                "unsupported content encoding `{other}`"
            )))
        }
    };

    if !gzipped {
        return Ok(Cow::Borrowed(body));
    }

    // One byte past the limit is enough to tell an oversized body apart
    let mut decoder = GzipDecoder::new(body).take(limit as u64 + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .await
        .map_err(|e| PhotoError::Decode(format!("failed to decompress body: {e}")))?;

    if out.len() > limit {
        return Err(PhotoError::Decode(format!(
            "decompressed body exceeds {limit} bytes"
        )));
    }

    Ok(Cow::Owned(out))
}

/// Encode photos as `{"photos":[...]}` in the given order
pub fn encode_list(photos: Vec<Photo>) -> Result<Vec<u8>> {
    serde_json::to_vec(&ListResponse { photos })
        .map_err(|e| PhotoError::Serialization(format!("failed to encode photo list: {e}")))
}

/// Decode a list response produced by [`encode_list`]
#[cfg(test)]
pub(crate) fn decode_list(bytes: &[u8]) -> Result<Vec<Photo>> {
    let response: ListResponse = serde_json::from_slice(bytes)
        .map_err(|e| PhotoError::Decode(format!("malformed photo list: {e}")))?;
    Ok(response.photos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_compression::tokio::bufread::GzipEncoder;
    use serde_json::json;

    const LIMIT: usize = DEFAULT_MAX_DECOMPRESSED_BYTES;

    fn full_body() -> serde_json::Value {
        json!({
            "id": "p1",
            "title": "t",
            "image": "aGVsbG8=",
            "latitude": 35.0,
            "longitude": 139.0
        })
    }

    async fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzipEncoder::new(bytes);
        let mut out = Vec::new();
        encoder.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_decode_plain_body() {
        let body = serde_json::to_vec(&full_body()).unwrap();
        let photo = decode_photo(&body, None, IdPolicy::Generate, LIMIT).await.unwrap();

        assert_eq!(
            photo,
            Photo {
                id: "p1".to_string(),
                title: "t".to_string(),
                image: "aGVsbG8=".to_string(),
                latitude: 35.0,
                longitude: 139.0,
            }
        );
    }

    #[tokio::test]
    async fn test_decode_declared_gzip_body() {
        let body = gzip(&serde_json::to_vec(&full_body()).unwrap()).await;
        let photo = decode_photo(&body, Some("gzip"), IdPolicy::Generate, LIMIT)
            .await
            .unwrap();
        assert_eq!(photo.id, "p1");
        assert_eq!(photo.title, "t");
    }

    #[tokio::test]
    async fn test_decode_undeclared_gzip_body() {
        let body = gzip(&serde_json::to_vec(&full_body()).unwrap()).await;
        let photo = decode_photo(&body, None, IdPolicy::Generate, LIMIT).await.unwrap();
        assert_eq!(photo.longitude, 139.0);
    }

    #[tokio::test]
    async fn test_decompression_failure_is_decode_error() {
        let body = serde_json::to_vec(&full_body()).unwrap();
        let err = decode_photo(&body, Some("gzip"), IdPolicy::Generate, LIMIT)
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoError::Decode(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_decompression_is_bounded() {
        let mut body = full_body();
        body["title"] = json!("a".repeat(4096));
        let raw = serde_json::to_vec(&body).unwrap();
        let compressed = gzip(&raw).await;
        assert!(compressed.len() < 512);

        let err = decode_photo(&compressed, Some("gzip"), IdPolicy::Generate, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoError::Decode(_)), "got {err:?}");
        assert!(err.to_string().contains("exceeds 1024 bytes"));

        // Exactly at the limit is accepted
        let photo = decode_photo(&compressed, None, IdPolicy::Generate, raw.len())
            .await
            .unwrap();
        assert_eq!(photo.title.len(), 4096);
    }

    #[tokio::test]
    async fn test_unsupported_encoding() {
        let body = serde_json::to_vec(&full_body()).unwrap();
        let err = decode_photo(&body, Some("br"), IdPolicy::Generate, LIMIT)
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoError::Decode(_)));
        assert!(err.to_string().contains("br"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_decode_error() {
        let err = decode_photo(b"{not json", None, IdPolicy::Generate, LIMIT)
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoError::Decode(_)));
    }

    #[tokio::test]
    async fn test_missing_required_field_is_named() {
        for field in ["title", "image", "latitude", "longitude"] {
            let mut body = full_body();
            body.as_object_mut().unwrap().remove(field);
            let bytes = serde_json::to_vec(&body).unwrap();

            let err = decode_photo(&bytes, None, IdPolicy::Generate, LIMIT)
                .await
                .unwrap_err();

            assert!(matches!(err, PhotoError::Validation(_)), "field {field}");
            assert!(
                err.to_string().contains(&format!("`{field}`")),
                "expected {field} in {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_empty_strings_count_as_missing() {
        for field in ["title", "image"] {
            let mut body = full_body();
            body[field] = json!("");
            let bytes = serde_json::to_vec(&body).unwrap();

            let err = decode_photo(&bytes, None, IdPolicy::Generate, LIMIT)
                .await
                .unwrap_err();
            assert!(err.to_string().contains(&format!("`{field}`")));
        }
    }

    #[tokio::test]
    async fn test_zero_coordinates_are_present() {
        let mut body = full_body();
        body["latitude"] = json!(0.0);
        body["longitude"] = json!(0.0);
        let bytes = serde_json::to_vec(&body).unwrap();

        let photo = decode_photo(&bytes, None, IdPolicy::Generate, LIMIT).await.unwrap();
        assert_eq!(photo.latitude, 0.0);
        assert_eq!(photo.longitude, 0.0);
    }

    #[tokio::test]
    async fn test_generated_ids_differ() {
        let mut body = full_body();
        body.as_object_mut().unwrap().remove("id");
        let bytes = serde_json::to_vec(&body).unwrap();

        let first = decode_photo(&bytes, None, IdPolicy::Generate, LIMIT).await.unwrap();
        let second = decode_photo(&bytes, None, IdPolicy::Generate, LIMIT).await.unwrap();

        assert!(!first.id.is_empty());
        assert!(!second.id.is_empty());
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_required_id_policy() {
        let mut body = full_body();
        body["id"] = json!("");
        let bytes = serde_json::to_vec(&body).unwrap();

        let err = decode_photo(&bytes, None, IdPolicy::Require, LIMIT)
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoError::Validation(_)));
        assert!(err.to_string().contains("`id`"));
    }

    #[test]
    fn test_encode_list_shape_and_order() {
        let photos: Vec<Photo> = ["b", "a", "c"]
            .iter()
            .map(|id| Photo {
                id: id.to_string(),
                title: format!("title {id}"),
                image: format!("https://example.com/bucket/{id}.png"),
                latitude: 35.0,
                longitude: 139.0,
            })
            .collect();

        let bytes = encode_list(photos.clone()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["photos"].as_array().unwrap().len(), 3);
        assert_eq!(value["photos"][0]["id"], "b");

        assert_eq!(decode_list(&bytes).unwrap(), photos);
    }

    #[test]
    fn test_encode_empty_list() {
        let bytes = encode_list(Vec::new()).unwrap();
        assert_eq!(bytes, br#"{"photos":[]}"#);
    }
}
