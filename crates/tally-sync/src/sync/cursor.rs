//! Monotonic cursor facade over the durable cursor table.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::Family;
use crate::store::CursorStore;

/// Wraps a [`CursorStore`] with the engine's cursor discipline: a cursor
/// only moves forward, and may be reset explicitly to force a full re-sync.
#[derive(Debug, Clone)]
pub struct Cursors<S> {
    store: Arc<S>,
}

impl<S: CursorStore> Cursors<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn get(&self, family: Family) -> Result<Option<DateTime<Utc>>> {
        self.store.cursor(family).await
    }

    /// Advance the cursor to `at`, unless it is already at or past it.
    /// Returns the effective cursor after the call.
    pub async fn advance(&self, family: Family, at: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let current = self.store.cursor(family).await?;
        match current {
            Some(existing) if existing >= at => {
                tracing::debug!("cursor for {family} already at {existing}, not rewinding");
                Ok(existing)
            }
            _ => {
                self.store.set_cursor(family, at).await?;
                Ok(at)
            }
        }
    }

    /// Drop the cursor so the next run fetches the full collection. Used
    /// when a caller judges the cursor stale or corrupt.
    pub async fn reset(&self, family: Family) -> Result<()> {
        tracing::info!("resetting sync cursor for {family}");
        self.store.clear_cursor(family).await
    }
}
