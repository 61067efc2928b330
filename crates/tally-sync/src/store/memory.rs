//! In-memory reference store.
//!
//! Implements every shelf plus the cursor table behind `tokio` locks:
//! reads snapshot, writes serialize per shelf. Primarily for tests and as
//! an embedding example; production apps bring their own durable store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{CursorStore, LocalStore};
use crate::error::Result;
use crate::models::{
    ChecklistItemRecord, Family, LocalId, NotificationRecord, ShareLinkRecord,
    ShareMembershipRecord, SyncRecord, TaskRecord,
};

#[derive(Debug)]
struct Shelf<R> {
    records: RwLock<HashMap<LocalId, R>>,
}

impl<R: SyncRecord> Shelf<R> {
    fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    async fn fetch_all(&self) -> Vec<R> {
        let mut records: Vec<R> = self.records.read().await.values().cloned().collect();
        // Stable iteration order keeps runs deterministic.
        records.sort_by_key(SyncRecord::local_id);
        records
    }

    async fn get(&self, id: LocalId) -> Option<R> {
        self.records.read().await.get(&id).cloned()
    }

    async fn upsert(&self, record: R) {
        self.records.write().await.insert(record.local_id(), record);
    }

    async fn delete(&self, id: LocalId) {
        self.records.write().await.remove(&id);
    }

    async fn save_batch(&self, batch: Vec<R>) {
        let mut records = self.records.write().await;
        for record in batch {
            records.insert(record.local_id(), record);
        }
    }
}

/// Non-durable store holding all five families and their cursors.
#[derive(Debug)]
pub struct MemoryStore {
    tasks: Shelf<TaskRecord>,
    checklist_items: Shelf<ChecklistItemRecord>,
    notifications: Shelf<NotificationRecord>,
    share_links: Shelf<ShareLinkRecord>,
    share_memberships: Shelf<ShareMembershipRecord>,
    cursors: RwLock<HashMap<Family, DateTime<Utc>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Shelf::new(),
            checklist_items: Shelf::new(),
            notifications: Shelf::new(),
            share_links: Shelf::new(),
            share_memberships: Shelf::new(),
            cursors: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! impl_local_store {
    ($record:ty, $shelf:ident) => {
        #[async_trait]
        impl LocalStore<$record> for MemoryStore {
            async fn fetch_all(&self) -> Result<Vec<$record>> {
                Ok(self.$shelf.fetch_all().await)
            }

            async fn get(&self, id: LocalId) -> Result<Option<$record>> {
                Ok(self.$shelf.get(id).await)
            }

            async fn upsert(&self, record: $record) -> Result<()> {
                self.$shelf.upsert(record).await;
                Ok(())
            }

            async fn delete(&self, id: LocalId) -> Result<()> {
                self.$shelf.delete(id).await;
                Ok(())
            }

            async fn save_batch(&self, records: Vec<$record>) -> Result<()> {
                self.$shelf.save_batch(records).await;
                Ok(())
            }
        }
    };
}

impl_local_store!(TaskRecord, tasks);
impl_local_store!(ChecklistItemRecord, checklist_items);
impl_local_store!(NotificationRecord, notifications);
impl_local_store!(ShareLinkRecord, share_links);
impl_local_store!(ShareMembershipRecord, share_memberships);

#[async_trait]
impl CursorStore for MemoryStore {
    async fn cursor(&self, family: Family) -> Result<Option<DateTime<Utc>>> {
        Ok(self.cursors.read().await.get(&family).copied())
    }

    async fn set_cursor(&self, family: Family, at: DateTime<Utc>) -> Result<()> {
        self.cursors.write().await.insert(family, at);
        Ok(())
    }

    async fn clear_cursor(&self, family: Family) -> Result<()> {
        self.cursors.write().await.remove(&family);
        Ok(())
    }
}
