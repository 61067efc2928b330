//! Record identity and the metadata shared by every synced family.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::now_secs;

/// Client-generated stable identifier, using UUID v7 (time-sortable).
///
/// Assigned once at creation and never sent to the server as an identity;
/// the server hands out its own [`ServerId`] on the first successful create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId(Uuid);

impl LocalId {
    /// Create a new unique local ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Server-assigned identifier, opaque to the client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The five synchronized record collections.
///
/// Everything but [`Family::Tasks`] nests under a task/list and syncs only
/// after the parent record holds a confirmed server id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    Tasks,
    ChecklistItems,
    Notifications,
    ShareLinks,
    ShareMemberships,
}

impl Family {
    /// The dependent families that sync after tasks/lists.
    pub const CHILDREN: [Self; 4] = [
        Self::ChecklistItems,
        Self::Notifications,
        Self::ShareLinks,
        Self::ShareMemberships,
    ];

    /// Wire path segment for this family.
    pub const fn path(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::ChecklistItems => "checklist-items",
            Self::Notifications => "notifications",
            Self::ShareLinks => "share-links",
            Self::ShareMemberships => "share-memberships",
        }
    }

    /// Parent family, if this one nests under another.
    pub const fn parent(self) -> Option<Self> {
        match self {
            Self::Tasks => None,
            _ => Some(Self::Tasks),
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Tasks => 0,
            Self::ChecklistItems => 1,
            Self::Notifications => 2,
            Self::ShareLinks => 3,
            Self::ShareMemberships => 4,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Sync metadata carried by every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Client-generated stable identifier
    pub local_id: LocalId,
    /// Server identity; `None` while the record is pending creation
    pub server_id: Option<ServerId>,
    /// Authoritative mutation instant (whole seconds)
    pub updated_at: DateTime<Utc>,
    /// Soft delete flag, propagated to the server as a tombstone
    pub deleted: bool,
    /// Last `updated_at` acknowledged by the remote side
    pub synced_at: Option<DateTime<Utc>>,
}

impl SyncMeta {
    /// Metadata for a record created locally, pending its first upload.
    #[must_use]
    pub fn new_local() -> Self {
        Self {
            local_id: LocalId::new(),
            server_id: None,
            updated_at: now_secs(),
            deleted: false,
            synced_at: None,
        }
    }

    /// Metadata for a record first seen in a remote delta.
    #[must_use]
    pub fn from_remote(server_id: ServerId, updated_at: DateTime<Utc>) -> Self {
        Self {
            local_id: LocalId::new(),
            server_id: Some(server_id),
            updated_at,
            deleted: false,
            synced_at: Some(updated_at),
        }
    }

    /// A record is dirty when it has never been uploaded, or was edited
    /// after the last instant the remote side acknowledged.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.server_id.is_none() || self.synced_at.map_or(true, |at| self.updated_at > at)
    }

    /// Record a successful upload acknowledgement.
    pub fn mark_synced(&mut self, server_id: ServerId, updated_at: DateTime<Utc>) {
        self.server_id = Some(server_id);
        self.updated_at = updated_at;
        self.synced_at = Some(updated_at);
    }

    /// Record that the remote side overwrote this record's fields.
    pub fn mark_overwritten(&mut self, server_id: ServerId, updated_at: DateTime<Utc>) {
        self.server_id = Some(server_id);
        self.updated_at = updated_at;
        self.deleted = false;
        self.synced_at = Some(updated_at);
    }

    /// Stamp a local edit.
    pub fn touch(&mut self) {
        self.updated_at = now_secs();
    }

    /// Tombstone the record locally. Flags it deleted and stamps the edit
    /// in one step, so the deletion is dirty and propagates on the next
    /// upload phase.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
        self.touch();
    }
}

impl Default for SyncMeta {
    fn default() -> Self {
        Self::new_local()
    }
}

/// One decoded upsert from a delta page or create/update acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteUpsert {
    pub id: ServerId,
    pub updated_at: DateTime<Utc>,
    /// Full wire object, including the family's domain fields
    pub body: Value,
}

impl RemoteUpsert {
    /// Decode a raw wire object, requiring string `id` and `updatedAt` keys.
    pub fn decode(raw: &Value) -> Result<Self> {
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Decoding("record is missing a string `id`".to_string()))?;
        let updated_at = raw
            .get("updatedAt")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Decoding(format!("record {id} is missing `updatedAt`")))?;
        Ok(Self {
            id: ServerId::new(id),
            updated_at: crate::util::parse_instant(updated_at)?,
            body: raw.clone(),
        })
    }
}

/// A deletion marker from a delta page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub id: ServerId,
    pub deleted_at: DateTime<Utc>,
}

/// Behavior shared by all five synced record families.
pub trait SyncRecord: Clone + Send + Sync + 'static {
    /// Which collection this record type belongs to.
    const FAMILY: Family;

    fn meta(&self) -> &SyncMeta;
    fn meta_mut(&mut self) -> &mut SyncMeta;

    /// Build a new local record from a remote upsert.
    fn from_remote(upsert: &RemoteUpsert) -> Result<Self>;

    /// Replace this record's domain fields from a remote upsert.
    fn apply_remote(&mut self, upsert: &RemoteUpsert) -> Result<()>;

    /// Wire payload for create/update calls.
    fn payload(&self) -> Result<Value>;

    /// Local id of the parent record, when known. `None` for tasks/lists.
    fn parent_local_id(&self) -> Option<&LocalId> {
        None
    }

    /// Server id of the parent record, once confirmed. `None` for tasks/lists.
    fn parent_server_id(&self) -> Option<&ServerId> {
        None
    }

    /// Adopt the parent's freshly assigned server id. No-op for tasks/lists.
    fn adopt_parent_server_id(&mut self, _id: &ServerId) {}

    fn local_id(&self) -> LocalId {
        self.meta().local_id
    }

    fn server_id(&self) -> Option<&ServerId> {
        self.meta().server_id.as_ref()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.meta().updated_at
    }

    fn is_deleted(&self) -> bool {
        self.meta().deleted
    }

    fn is_dirty(&self) -> bool {
        self.meta().is_dirty()
    }
}

/// Deserialize a family's domain fields out of a wire object.
///
/// Unknown keys (`id`, `updatedAt`, server-side extras) are ignored; a
/// missing required field surfaces as a decoding error for the page.
pub(crate) fn decode_fields<T: DeserializeOwned>(body: &Value) -> Result<T> {
    serde_json::from_value(body.clone())
        .map_err(|error| Error::Decoding(format!("malformed record body: {error}")))
}

/// Stamp a serialized payload with the record's authoritative instant.
pub(crate) fn stamp_payload(payload: &mut Value, meta: &SyncMeta) {
    if let Value::Object(object) = payload {
        object.insert(
            "updatedAt".to_string(),
            Value::String(crate::util::format_instant(meta.updated_at)),
        );
    }
}
