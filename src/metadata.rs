use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Field paths used by query clauses and aggregations against the metadata index.
pub mod fields {
    pub const STORAGE_PATH: &str = "storagePath";
    pub const COLLECTION_ID: &str = "collectionID";
    pub const DATE_TAKEN: &str = "imageMetadata.dateTaken";
    pub const YEAR_TAKEN: &str = "imageMetadata.yearTaken";
    pub const MONTH_TAKEN: &str = "imageMetadata.monthTaken";
    pub const HOUR_TAKEN: &str = "imageMetadata.hourTaken";
    pub const DAY_OF_WEEK_TAKEN: &str = "imageMetadata.dayOfWeekTaken";
    pub const SITE_CODE: &str = "imageMetadata.siteCode";
    pub const POSITION: &str = "imageMetadata.position";
    pub const ELEVATION: &str = "imageMetadata.elevation";
    pub const ALTITUDE: &str = "imageMetadata.altitude";
    pub const FILE_TYPE: &str = "imageMetadata.fileType";
}

/// A latitude/longitude pair, serialized in the geo_point object form.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct Speed {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct Rotation {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// Parsed metadata for one image or video. Produced by the (external)
/// metadata extractor; this crate only derives the date fields and indexes it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub date_taken: DateTime<Utc>,
    pub year_taken: i32,
    pub month_taken: u32,
    pub hour_taken: u32,
    pub day_of_year_taken: u32,
    /// Monday = 1 through Sunday = 7.
    pub day_of_week_taken: u32,
    #[serde(default)]
    pub site_code: Vec<String>,
    pub position: GeoPoint,
    pub elevation: f64,
    pub drone_maker: Option<String>,
    pub camera_model: Option<String>,
    pub speed: Speed,
    pub rotation: Rotation,
    pub altitude: f64,
    pub file_type: String,
    pub focal_length: Option<f64>,
    pub width: f64,
    pub height: f64,
}

impl ImageMetadata {
    /// Builds a metadata record with all date-derived fields computed from
    /// the capture timestamp. Remaining fields start neutral and are filled
    /// in by the caller.
    pub fn new(date_taken: DateTime<Utc>, position: GeoPoint) -> Self {
        Self {
            date_taken,
            year_taken: date_taken.year(),
            month_taken: date_taken.month(),
            hour_taken: date_taken.hour(),
            day_of_year_taken: date_taken.ordinal(),
            day_of_week_taken: date_taken.weekday().number_from_monday(),
            site_code: Vec::new(),
            position,
            elevation: 0.0,
            drone_maker: None,
            camera_model: None,
            speed: Speed::default(),
            rotation: Rotation::default(),
            altitude: 0.0,
            file_type: String::new(),
            focal_length: None,
            width: 0.0,
            height: 0.0,
        }
    }
}

/// One record per image/video in the metadata index. Created at upload time
/// and immutable afterwards; collection-level state changes go through the
/// collections index instead.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexedImageDocument {
    pub storage_path: String,
    #[serde(rename = "collectionID")]
    pub collection_id: String,
    pub image_metadata: ImageMetadata,
}

impl IndexedImageDocument {
    pub fn new(storage_path: String, collection_id: String, image_metadata: ImageMetadata) -> Self {
        Self {
            storage_path,
            collection_id,
            image_metadata,
        }
    }

    /// Deterministic document ID derived from the remote storage path, so
    /// re-indexing the same path overwrites rather than duplicates.
    pub fn id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.storage_path.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
