//! Remote service adapter boundary.
//!
//! The engine consumes a [`RemoteClient`]; it never owns transport concerns
//! beyond the contract below. Credentials come from a [`TokenProvider`]
//! supplied by the external auth collaborator.

mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

pub use http::HttpRemoteClient;

use crate::error::Result;
use crate::models::{Family, RemoteUpsert, ServerId};

/// Raw delta page as returned by the remote service, prior to decoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaDto {
    #[serde(default)]
    pub upserts: Vec<Value>,
    #[serde(default)]
    pub deletes: Vec<TombstoneDto>,
    /// Cursor the page was requested with, echoed back
    #[serde(default)]
    pub since: Option<String>,
    /// Server clock at page assembly; becomes the next cursor
    pub now: String,
}

/// Raw deletion marker within a delta page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TombstoneDto {
    pub id: String,
    pub deleted_at: String,
}

/// Network transport for one remote collection per family.
///
/// All calls are asynchronous and carry a bearer credential; none of them
/// retry internally except the single post-refresh retry after an expired
/// credential (see [`TokenProvider`]).
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch one delta page for a family, optionally since a cursor.
    /// `None` forces a full re-sync window.
    async fn fetch_delta(&self, family: Family, since: Option<DateTime<Utc>>) -> Result<DeltaDto>;

    /// Create a record; the response carries the server-assigned id.
    async fn create(&self, family: Family, payload: &Value) -> Result<RemoteUpsert>;

    /// Update a record by server id.
    async fn update(&self, family: Family, id: &ServerId, payload: &Value) -> Result<RemoteUpsert>;

    /// Delete a record by server id. Idempotent: re-deleting succeeds.
    async fn delete(&self, family: Family, id: &ServerId) -> Result<()>;
}

/// External token-refresh collaborator.
///
/// Acquisition and refresh mechanics live outside this crate; the engine
/// only asks for the current bearer token and, on an auth failure, for a
/// refreshed one before retrying the failed call once.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;

    async fn refresh_token(&self) -> Result<String>;
}
