//! Notification record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{decode_fields, stamp_payload, RemoteUpsert, SyncMeta, SyncRecord};
use crate::error::{Error, Result};
use crate::models::{Family, LocalId, ServerId};

/// What kind of alert a notification represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    Reminder,
    DueSoon,
    Overdue,
}

/// A scheduled alert nested under a task. The engine only replicates these;
/// actual local scheduling lives outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub meta: SyncMeta,
    pub parent_local: Option<LocalId>,
    pub parent_server: Option<ServerId>,
    pub kind: NotificationKind,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationFields {
    task_id: ServerId,
    kind: NotificationKind,
    fire_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Create a new local notification under a not-necessarily-synced task.
    #[must_use]
    pub fn new(parent: LocalId, kind: NotificationKind, fire_at: DateTime<Utc>) -> Self {
        Self {
            meta: SyncMeta::new_local(),
            parent_local: Some(parent),
            parent_server: None,
            kind,
            fire_at,
        }
    }

    fn fields(&self) -> Result<NotificationFields> {
        let task_id = self.parent_server.clone().ok_or_else(|| {
            Error::Invariant(format!(
                "notification {} has no confirmed parent server id",
                self.meta.local_id
            ))
        })?;
        Ok(NotificationFields {
            task_id,
            kind: self.kind,
            fire_at: self.fire_at,
        })
    }
}

impl SyncRecord for NotificationRecord {
    const FAMILY: Family = Family::Notifications;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn from_remote(upsert: &RemoteUpsert) -> Result<Self> {
        let fields: NotificationFields = decode_fields(&upsert.body)?;
        Ok(Self {
            meta: SyncMeta::from_remote(upsert.id.clone(), upsert.updated_at),
            parent_local: None,
            parent_server: Some(fields.task_id),
            kind: fields.kind,
            fire_at: fields.fire_at,
        })
    }

    fn apply_remote(&mut self, upsert: &RemoteUpsert) -> Result<()> {
        let fields: NotificationFields = decode_fields(&upsert.body)?;
        self.parent_server = Some(fields.task_id);
        self.kind = fields.kind;
        self.fire_at = fields.fire_at;
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
