//! Task/list record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{decode_fields, stamp_payload, RemoteUpsert, SyncMeta, SyncRecord};
use crate::error::Result;
use crate::models::Family;

/// Completion state for a task.
///
/// `None` is used by list-style records that have no checkbox at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Completion {
    #[default]
    None,
    Unchecked,
    Checked,
}

/// A task or list, the parent family for every other synced collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub meta: SyncMeta,
    pub name: String,
    pub details: String,
    pub completion: Completion,
    /// Due instant; interpreted as date-only when `has_due_time` is false
    pub due_at: Option<DateTime<Utc>>,
    pub has_due_time: bool,
    pub important: bool,
    pub pinned: bool,
    pub archived: bool,
    /// Folder reference by server-side folder key
    pub folder: Option<String>,
    pub member_count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskFields {
    name: String,
    #[serde(default)]
    details: String,
    #[serde(default)]
    completion: Completion,
    #[serde(default)]
    due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    has_due_time: bool,
    #[serde(default)]
    important: bool,
    #[serde(default)]
    pinned: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    folder: Option<String>,
    #[serde(default)]
    member_count: u32,
}

impl TaskRecord {
    /// Create a new local task, pending its first upload.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: SyncMeta::new_local(),
            name: name.into(),
            details: String::new(),
            completion: Completion::Unchecked,
            due_at: None,
            has_due_time: false,
            important: false,
            pinned: false,
            archived: false,
            folder: None,
            member_count: 1,
        }
    }

    fn fields(&self) -> TaskFields {
        TaskFields {
            name: self.name.clone(),
            details: self.details.clone(),
            completion: self.completion,
            due_at: self.due_at,
            has_due_time: self.has_due_time,
            important: self.important,
            pinned: self.pinned,
            archived: self.archived,
            folder: self.folder.clone(),
            member_count: self.member_count,
        }
    }

    fn assign(&mut self, fields: TaskFields) {
        self.name = fields.name;
        self.details = fields.details;
        self.completion = fields.completion;
        self.due_at = fields.due_at;
        self.has_due_time = fields.has_due_time;
        self.important = fields.important;
        self.pinned = fields.pinned;
        self.archived = fields.archived;
        self.folder = fields.folder;
        self.member_count = fields.member_count;
    }
}

impl SyncRecord for TaskRecord {
    const FAMILY: Family = Family::Tasks;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn from_remote(upsert: &RemoteUpsert) -> Result<Self> {
        let fields: TaskFields = decode_fields(&upsert.body)?;
        let mut record = Self::new(String::new());
        record.meta = SyncMeta::from_remote(upsert.id.clone(), upsert.updated_at);
        record.assign(fields);
        Ok(record)
    }

    fn apply_remote(&mut self, upsert: &RemoteUpsert) -> Result<()> {
        let fields: TaskFields = decode_fields(&upsert.body)?;
        self.assign(fields);
        self.meta
            .mark_overwritten(upsert.id.clone(), upsert.updated_at);
        Ok(())
    }

    fn payload(&self) -> Result<Value> {
        let mut payload = serde_json::to_value(self.fields())?;
        stamp_payload(&mut payload, &self.meta);
        Ok(payload)
    }
}
