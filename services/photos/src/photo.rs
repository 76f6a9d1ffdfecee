use serde::{Deserialize, Serialize};

/// A geotagged photo as stored in the document collection.
///
/// On the way in `image` carries the base64 payload; once the image has been
/// written to the blob store it holds the public URL instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub title: String,
    pub image: String,
    pub latitude: f32,
    pub longitude: f32,
}

/// Body of a list response
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub photos: Vec<Photo>,
}
