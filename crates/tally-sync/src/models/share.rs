//! Share link and share membership record models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::{decode_fields, stamp_payload, RemoteUpsert, SyncMeta, SyncRecord};
use crate::error::{Error, Result};
use crate::models::{Family, LocalId, ServerId};

/// What a share link grants to whoever opens it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShareScope {
    View,
    Edit,
}

/// Role of a principal on a shared list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MemberRole {
    Owner,
    Edit,
    ViewOnly,
    Closed,
}

/// An invite link scoped to one task/list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLinkRecord {
    pub meta: SyncMeta,
    pub parent_local: Option<LocalId>,
    pub parent_server: Option<ServerId>,
    pub scope: ShareScope,
    pub revoked: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShareLinkFields {
    task_id: ServerId,
    scope: ShareScope,
    #[serde(default)]
    revoked: bool,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl ShareLinkRecord {
    /// Create a new local share link under a not-necessarily-synced list.
    #[must_use]
    pub fn new(parent: LocalId, scope: ShareScope) -> Self {
        Self {
            meta: SyncMeta::new_local(),
            parent_local: Some(parent),
            parent_server: None,
            scope,
            revoked: false,
            expires_at: None,
        }
    }

    fn fields(&self) -> Result<ShareLinkFields> {
        let task_id = self.parent_server.clone().ok_or_else(|| {
            Error::Invariant(format!(
                "share link {} has no confirmed parent server id",
                self.meta.local_id
            ))
        })?;
        Ok(ShareLinkFields {
            task_id,
            scope: self.scope,
            revoked: self.revoked,
            expires_at: self.expires_at,
        })
    }
}

impl SyncRecord for ShareLinkRecord {
    const FAMILY: Family = Family::ShareLinks;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn from_remote(upsert: &RemoteUpsert) -> Result<Self> {
        let fields: ShareLinkFields = decode_fields(&upsert.body)?;
        Ok(Self {
            meta: SyncMeta::from_remote(upsert.id.clone(), upsert.updated_at),
            parent_local: None,
            parent_server: Some(fields.task_id),
            scope: fields.scope,
            revoked: fields.revoked,
            expires_at: fields.expires_at,
        })
    }

    fn apply_remote(&mut self, upsert: &RemoteUpsert) -> Result<()> {
        let fields: ShareLinkFields = decode_fields(&upsert.body)?;
        self.parent_server = Some(fields.task_id);
        self.scope = fields.scope;
        self.revoked = fields.revoked;
        self.expires_at = fields.expires_at;
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

/// A principal's membership on a shared list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareMembershipRecord {
    pub meta: SyncMeta,
    pub list_local: Option<LocalId>,
    pub list_server: Option<ServerId>,
    pub principal_id: String,
    pub role: MemberRole,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShareMembershipFields {
    list_id: ServerId,
    principal_id: String,
    role: MemberRole,
}

impl ShareMembershipRecord {
    /// Create a new local membership under a not-necessarily-synced list.
    #[must_use]
    pub fn new(list: LocalId, principal_id: impl Into<String>, role: MemberRole) -> Self {
        Self {
            meta: SyncMeta::new_local(),
            list_local: Some(list),
            list_server: None,
            principal_id: principal_id.into(),
            role,
        }
    }

    fn fields(&self) -> Result<ShareMembershipFields> {
        let list_id = self.list_server.clone().ok_or_else(|| {
            Error::Invariant(format!(
                "share membership {} has no confirmed list server id",
                self.meta.local_id
            ))
        })?;
        Ok(ShareMembershipFields {
            list_id,
            principal_id: self.principal_id.clone(),
            role: self.role,
        })
    }
}

impl SyncRecord for ShareMembershipRecord {
    const FAMILY: Family = Family::ShareMemberships;

    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }

    fn from_remote(upsert: &RemoteUpsert) -> Result<Self> {
        let fields: ShareMembershipFields = decode_fields(&upsert.body)?;
        Ok(Self {
            meta: SyncMeta::from_remote(upsert.id.clone(), upsert.updated_at),
            list_local: None,
            list_server: Some(fields.list_id),
            principal_id: fields.principal_id,
            role: fields.role,
        })
    }

    fn apply_remote(&mut self, upsert: &RemoteUpsert) -> Result<()> {
        let fields: ShareMembershipFields = decode_fields(&upsert.body)?;
        self.list_server = Some(fields.list_id);
        self.principal_id = fields.principal_id;
        self.role = fields.role;
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
        self.list_local.as_ref()
    }

    fn parent_server_id(&self) -> Option<&ServerId> {
        self.list_server.as_ref()
    }

    fn adopt_parent_server_id(&mut self, id: &ServerId) {
        self.list_server = Some(id.clone());
    }
}
