//! Checklist item record model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{decode_fields, stamp_payload, RemoteUpsert, SyncMeta, SyncRecord};
use crate::error::{Error, Result};
use crate::models::{Family, LocalId, ServerId};

/// A checklist entry nested under a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItemRecord {
    pub meta: SyncMeta,
    /// Parent task by local id; set for locally created items
    pub parent_local: Option<LocalId>,
    /// Parent task by confirmed server id; required before upload
    pub parent_server: Option<ServerId>,
    pub title: String,
    pub done: bool,
    /// Position within the parent's checklist
    pub order: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChecklistItemFields {
    task_id: ServerId,
    title: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    order: i64,
}

impl ChecklistItemRecord {
    /// Create a new local checklist item under a not-necessarily-synced task.
    #[must_use]
    pub fn new(parent: LocalId, title: impl Into<String>, order: i64) -> Self {
        Self {
            meta: SyncMeta::new_local(),
            parent_local: Some(parent),
            parent_server: None,
            title: title.into(),
            done: false,
            order,
        }
    }

    fn fields(&self) -> Result<ChecklistItemFields> {
        let task_id = self.parent_server.clone().ok_or_else(|| {
            Error::Invariant(format!(
                "checklist item {} has no confirmed parent server id",
                self.meta.local_id
            ))
        })?;
        Ok(ChecklistItemFields {
            task_id,
            title: self.title.clone(),
            done: self.done,
            order: self.order,
        })
    }
}

impl SyncRecord for ChecklistItemRecord {
    const FAMILY: Family = Family::ChecklistItems;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn from_remote(upsert: &RemoteUpsert) -> Result<Self> {
        let fields: ChecklistItemFields = decode_fields(&upsert.body)?;
        Ok(Self {
            meta: SyncMeta::from_remote(upsert.id.clone(), upsert.updated_at),
            parent_local: None,
            parent_server: Some(fields.task_id),
            title: fields.title,
            done: fields.done,
            order: fields.order,
        })
    }

    fn apply_remote(&mut self, upsert: &RemoteUpsert) -> Result<()> {
        let fields: ChecklistItemFields = decode_fields(&upsert.body)?;
        self.parent_server = Some(fields.task_id);
        self.title = fields.title;
        self.done = fields.done;
        self.order = fields.order;
        self.meta
            .mark_overwritten(upsert.id.clone(), upsert.updated_at);
        Ok(())
    }

    fn payload(&self) -> Result<Value> {
        let mut payload = serde_json::to_value(self.fields()?)?;
        stamp_payload(&mut payload, &self.meta);
        Ok(payload)
    }

    fn parent_local_id(&self) -> Option<&LocalId> {
        self.parent_local.as_ref()
    }

    fn parent_server_id(&self) -> Option<&ServerId> {
        self.parent_server.as_ref()
    }

    fn adopt_parent_server_id(&mut self, id: &ServerId) {
        self.parent_server = Some(id.clone());
    }
}
