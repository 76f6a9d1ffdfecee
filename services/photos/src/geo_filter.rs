use crate::config::GeoConfig;
use crate::photo::Photo;
use tracing::trace;

/// Degrees of latitude per hectometer in Japan
pub const HECTOMETER_LAT: f32 = 0.0009013;
/// Degrees of longitude per hectometer in Japan
pub const HECTOMETER_LNG: f32 = 0.0010966;

/// Bounding-box proximity test around a query point.
///
/// The box is axis-aligned with fixed half-widths, so it only approximates a
/// physical radius near the latitude the tolerances were chosen for. Bounds
/// are inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFilter {
    lat_tolerance: f32,
    lng_tolerance: f32,
}

impl GeoFilter {
    pub fn new(lat_tolerance: f32, lng_tolerance: f32) -> Self {
        Self {
            lat_tolerance,
            lng_tolerance,
        }
    }

    pub fn from_config(config: &GeoConfig) -> Self {
        Self::new(config.lat_tolerance, config.lng_tolerance)
    }

    /// Whether the photo lies inside the box centred on (`lat`, `lng`)
    pub fn includes(&self, photo: &Photo, lat: f32, lng: f32) -> bool {
        let check_lat =
            photo.latitude <= lat + self.lat_tolerance && photo.latitude >= lat - self.lat_tolerance;
        let check_lng = photo.longitude <= lng + self.lng_tolerance
            && photo.longitude >= lng - self.lng_tolerance;

        trace!(photo_id = %photo.id, check_lat, check_lng, "Area check");

        check_lat && check_lng
    }

    /// Keep only the photos inside the box, preserving order
    pub fn retain_nearby(&self, photos: Vec<Photo>, lat: f32, lng: f32) -> Vec<Photo> {
        photos
            .into_iter()
            .filter(|p| self.includes(p, lat, lng))
            .collect()
    }
}

impl Default for GeoFilter {
    fn default() -> Self {
        Self::new(HECTOMETER_LAT, HECTOMETER_LNG)
    }
}
