use serde_json::{json, Value};

/// The fixed logical index namespaces.
pub const INDEX_USERS: &str = "users";
pub const INDEX_METADATA: &str = "metadata";
pub const INDEX_COLLECTIONS: &str = "collections";
pub const INDEX_SITES: &str = "sites";

/// Mapping for the users index: one document per username holding settings.
pub fn users_index_mapping() -> Value {
    json!({
        "properties": {
            "username": { "type": "keyword" },
            "settings": {
                "type": "object",
                "properties": {
                    "dateFormat": { "type": "keyword" },
                    "timeFormat": { "type": "keyword" },
                    "positionFormat": { "type": "keyword" },
                    "distanceUnits": { "type": "keyword" },
                }
            }
        }
    })
}

/// Mapping for the metadata index: one document per indexed image/video.
pub fn metadata_index_mapping() -> Value {
    json!({
        "properties": {
            "storagePath": { "type": "keyword" },
            "collectionID": { "type": "keyword" },
            "imageMetadata": {
                "type": "object",
                "properties": {
                    "dateTaken": { "type": "date", "format": "strict_date_optional_time" },
                    "yearTaken": { "type": "integer" },
                    "monthTaken": { "type": "integer" },
                    "hourTaken": { "type": "integer" },
                    "dayOfYearTaken": { "type": "integer" },
                    "dayOfWeekTaken": { "type": "integer" },
                    "siteCode": { "type": "keyword" },
                    "position": { "type": "geo_point" },
                    "elevation": { "type": "double" },
                    "droneMaker": { "type": "keyword" },
                    "cameraModel": { "type": "keyword" },
                    "speed": {
                        "type": "object",
                        "properties": {
                            "x": { "type": "double" },
                            "y": { "type": "double" },
                            "z": { "type": "double" },
                        }
                    },
                    "rotation": {
                        "type": "object",
                        "properties": {
                            "roll": { "type": "double" },
                            "pitch": { "type": "double" },
                            "yaw": { "type": "double" },
                        }
                    },
                    "altitude": { "type": "double" },
                    "fileType": { "type": "keyword" },
                    "focalLength": { "type": "double" },
                    "width": { "type": "double" },
                    "height": { "type": "double" },
                }
            }
        }
    })
}

/// Mapping for the collections index. Permissions and uploads are nested so
/// their per-entry fields stay associated.
pub fn collections_index_mapping() -> Value {
    json!({
        "properties": {
            "name": { "type": "keyword" },
            "organization": { "type": "keyword" },
            "contactInfo": { "type": "keyword" },
            "description": { "type": "text" },
            "id": { "type": "keyword" },
            "permissions": {
                "type": "nested",
                "properties": {
                    "username": { "type": "keyword" },
                    "read": { "type": "boolean" },
                    "upload": { "type": "boolean" },
                    "owner": { "type": "boolean" },
                }
            },
            "uploads": {
                "type": "nested",
                "properties": {
                    "uploadUser": { "type": "keyword" },
                    "uploadDate": { "type": "date", "format": "strict_date_optional_time" },
                    "imageCount": { "type": "integer" },
                    "uploadPath": { "type": "keyword" },
                    "storageMethod": { "type": "keyword" },
                }
            }
        }
    })
}

/// Mapping for the sites index. The boundary is a geo_shape so image
/// positions can be intersected against it.
pub fn sites_index_mapping() -> Value {
    json!({
        "properties": {
            "name": { "type": "keyword" },
            "code": { "type": "keyword" },
            "boundary": { "type": "geo_shape" },
            "type": { "type": "keyword" },
            "details": { "type": "keyword" },
        }
    })
}

/// The document created for a first-time user.
pub fn new_user_document(username: &str) -> Value {
    json!({
        "username": username,
        "settings": {
            "dateFormat": "MonthDayYear",
            "timeFormat": "Time24Hour",
            "positionFormat": "LatLong",
            "distanceUnits": "Meters",
        }
    })
}
