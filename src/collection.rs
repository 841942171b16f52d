use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One user's access to a collection. Owner implies upload, upload implies read.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Permission {
    pub username: String,
    pub read: bool,
    pub upload: bool,
    pub owner: bool,
}

impl Permission {
    pub fn owner_of(username: &str) -> Self {
        Self {
            username: username.to_string(),
            read: true,
            upload: true,
            owner: true,
        }
    }
}

/// An immutable log entry describing one completed bulk transfer, appended to
/// the owning collection document via a scripted update.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub upload_user: String,
    pub upload_date: DateTime<Utc>,
    pub image_count: i64,
    pub upload_path: String,
    pub storage_method: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageCollection {
    pub name: String,
    pub organization: String,
    pub contact_info: String,
    pub description: String,
    pub id: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub uploads: Vec<UploadRecord>,
}

impl ImageCollection {
    pub fn owner(&self) -> Option<&str> {
        self.permissions
            .iter()
            .find(|p| p.owner)
            .map(|p| p.username.as_str())
    }

    pub fn can_upload(&self, username: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p.username == username && (p.upload || p.owner))
    }

    pub fn can_read(&self, username: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p.username == username && (p.read || p.upload || p.owner))
    }

    /// The document body used when the collection is first created. Uploads
    /// start empty and are only ever touched by the scripted append.
    pub fn to_create_document(&self) -> Value {
        json!({
            "name": self.name,
            "organization": self.organization,
            "contactInfo": self.contact_info,
            "description": self.description,
            "id": self.id,
            "permissions": self.permissions,
            "uploads": [],
        })
    }

    /// The partial document used on subsequent saves. The uploads field is
    /// deliberately absent so a save can never clobber a concurrent upload.
    pub fn to_update_document(&self) -> Value {
        json!({
            "name": self.name,
            "organization": self.organization,
            "contactInfo": self.contact_info,
            "description": self.description,
            "id": self.id,
            "permissions": self.permissions,
        })
    }
}
