//! Local persistence boundary.
//!
//! The engine treats durable storage as a generic transactional record
//! store: one shelf per record family plus the per-family sync cursors,
//! persisted together so cursors survive restarts alongside the records
//! they describe. Writes are expected to flow through a single write path;
//! reads may observe a snapshot.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;

use crate::error::Result;
use crate::models::{Family, LocalId, SyncRecord};

/// Storage for one record family.
#[async_trait]
pub trait LocalStore<R: SyncRecord>: Send + Sync {
    /// All records of the family, tombstoned ones included.
    async fn fetch_all(&self) -> Result<Vec<R>>;

    async fn get(&self, id: LocalId) -> Result<Option<R>>;

    async fn upsert(&self, record: R) -> Result<()>;

    /// Physically remove a record (remote tombstone observed or local
    /// tombstone acknowledged).
    async fn delete(&self, id: LocalId) -> Result<()>;

    /// Transactional: either every record is written or none are.
    async fn save_batch(&self, records: Vec<R>) -> Result<()>;
}

/// Per-family sync cursor persistence.
///
/// Lives in the same durable store as the records so a crash never leaves a
/// cursor ahead of the applied data.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn cursor(&self, family: Family) -> Result<Option<DateTime<Utc>>>;

    async fn set_cursor(&self, family: Family, at: DateTime<Utc>) -> Result<()>;

    async fn clear_cursor(&self, family: Family) -> Result<()>;
}

/// The full store surface the coordinator needs: one shelf per family plus
/// the cursors.
pub trait SyncStore:
    LocalStore<crate::models::TaskRecord>
    + LocalStore<crate::models::ChecklistItemRecord>
    + LocalStore<crate::models::NotificationRecord>
    + LocalStore<crate::models::ShareLinkRecord>
    + LocalStore<crate::models::ShareMembershipRecord>
    + CursorStore
{
}

impl<S> SyncStore for S where
    S: LocalStore<crate::models::TaskRecord>
        + LocalStore<crate::models::ChecklistItemRecord>
        + LocalStore<crate::models::NotificationRecord>
        + LocalStore<crate::models::ShareLinkRecord>
        + LocalStore<crate::models::ShareMembershipRecord>
        + CursorStore
{
}
