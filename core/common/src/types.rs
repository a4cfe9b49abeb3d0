//! Table objects and their property bags.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Numeric identifier of a remote table.
pub type TableId = u32;

/// Local divergence marker of a table object.
///
/// Drives both the push phase and the download conflict rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadStatus {
    /// Object matches the last known server version.
    UpToDate,
    /// Created locally, never pushed.
    New,
    /// Previously synced, changed locally.
    Updated,
    /// Owner deleted the object locally; remote delete pending.
    Deleted,
    /// Non-owner dropped the object locally; access revocation pending.
    Removed,
    /// Confirmed absent locally and remotely; purge on the next pass.
    NoRowsDeleted,
}

impl UploadStatus {
    /// Whether the object carries local changes that must not be overwritten.
    pub fn is_pending(&self) -> bool {
        !matches!(self, Self::UpToDate)
    }

    /// Push priority. Lower runs first.
    pub fn push_priority(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::Updated => 1,
            Self::Deleted => 2,
            Self::Removed => 3,
            Self::NoRowsDeleted => 4,
            Self::UpToDate => u8::MAX,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UpToDate => "up-to-date",
            Self::New => "new",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Removed => "removed",
            Self::NoRowsDeleted => "no-rows-deleted",
        };
        f.write_str(name)
    }
}

/// Value of a single property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Boolean(bool),
    Number(f64),
    String(String),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

/// A named property entry.
///
/// Local properties never leave the device: they are excluded from upload
/// payloads and from etag comparison, and survive remote overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub value: PropertyValue,
    #[serde(default)]
    pub local: bool,
}

impl Property {
    /// A property that is synchronized with the remote.
    pub fn synced(value: impl Into<PropertyValue>) -> Self {
        Self {
            value: value.into(),
            local: false,
        }
    }

    /// A device-only property.
    pub fn local(value: impl Into<PropertyValue>) -> Self {
        Self {
            value: value.into(),
            local: true,
        }
    }
}

/// A single synchronized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableObject {
    /// Client-generated, globally unique identifier.
    pub uuid: String,
    /// Table the object belongs to.
    pub table_id: TableId,
    /// Whether the object carries a binary blob.
    pub is_file: bool,
    /// Server version marker, `None` until the first successful sync.
    pub etag: Option<String>,
    /// Whether the current principal owns the object.
    pub belongs_to_user: bool,
    /// Purchase gating access, informational only.
    pub purchase: Option<String>,
    /// Property bag.
    pub properties: BTreeMap<String, Property>,
    /// Local divergence marker.
    pub upload_status: UploadStatus,
}

impl TableObject {
    /// Create a new, never synced object with a fresh uuid.
    pub fn new(table_id: TableId) -> Self {
        Self::with_uuid(uuid::Uuid::new_v4().to_string(), table_id)
    }

    /// Create a new, never synced object with the given uuid.
    pub fn with_uuid(uuid: impl Into<String>, table_id: TableId) -> Self {
        Self {
            uuid: uuid.into(),
            table_id,
            is_file: false,
            etag: None,
            belongs_to_user: true,
            purchase: None,
            properties: BTreeMap::new(),
            upload_status: UploadStatus::New,
        }
    }

    /// Get the value of a property.
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name).map(|p| &p.value)
    }

    /// Properties that are sent to the remote.
    pub fn upload_properties(&self) -> BTreeMap<String, PropertyValue> {
        self.properties
            .iter()
            .filter(|(_, p)| !p.local)
            .map(|(name, p)| (name.clone(), p.value.clone()))
            .collect()
    }

    /// Device-only properties.
    pub fn local_properties(&self) -> impl Iterator<Item = (&String, &Property)> {
        self.properties.iter().filter(|(_, p)| p.local)
    }

    /// Copy the device-only properties of `previous` into this object.
    ///
    /// Synced properties with the same name win over local ones.
    pub fn keep_local_properties(&mut self, previous: &TableObject) {
        for (name, property) in previous.local_properties() {
            self.properties
                .entry(name.clone())
                .or_insert_with(|| property.clone());
        }
    }

    /// Whether the synced content of both objects is identical.
    pub fn same_upload_content(&self, other: &TableObject) -> bool {
        self.upload_properties() == other.upload_properties()
    }
}
