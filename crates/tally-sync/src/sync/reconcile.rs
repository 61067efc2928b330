//! Identity reconciliation between local records and a decoded delta page.
//!
//! The matching key is the server id. A local record without one is pending
//! creation: it is never matched against the remote collection and always
//! lands in `local_only`.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::changeset::ChangeSet;
use crate::models::{LocalId, RemoteUpsert, ServerId, SyncRecord, Tombstone};

/// Partition of one family's records against one delta page.
#[derive(Debug, Clone)]
pub struct MatchOutcome<R> {
    /// Local record paired with the remote upsert for the same server id
    pub matched: Vec<(R, RemoteUpsert)>,
    /// Upserts with no local counterpart: new records to insert
    pub remote_only: Vec<RemoteUpsert>,
    /// Local records pending creation
    pub local_only: Vec<R>,
    /// Local records the page tombstoned
    pub tombstoned: Vec<(R, Tombstone)>,
    /// Tombstones for records never seen locally: nothing to do
    pub unmatched_tombstones: Vec<Tombstone>,
    /// Locals sharing an already-claimed server id; first match kept
    pub duplicates: Vec<LocalId>,
}

/// Match local records against a decoded page by server id.
///
/// Two local records sharing one server id is a consistency fault: it is
/// logged, the first match is kept, and the run continues.
pub fn reconcile<R: SyncRecord>(locals: Vec<R>, changes: &ChangeSet) -> MatchOutcome<R> {
    let mut by_server: HashMap<ServerId, R> = HashMap::new();
    let mut local_only = Vec::new();
    let mut duplicates = Vec::new();

    for record in locals {
        let Some(server_id) = record.server_id().cloned() else {
            local_only.push(record);
            continue;
        };
        match by_server.entry(server_id) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(slot) => {
                tracing::warn!(
                    "duplicate server id {} in {} (local {}), keeping first match",
                    slot.key(),
                    R::FAMILY,
                    record.local_id(),
                );
                duplicates.push(record.local_id());
            }
        }
    }

    let mut matched = Vec::new();
    let mut remote_only = Vec::new();
    for upsert in &changes.upserts {
        match by_server.remove(&upsert.id) {
            Some(record) => matched.push((record, upsert.clone())),
            None => remote_only.push(upsert.clone()),
        }
    }

    let mut tombstoned = Vec::new();
    let mut unmatched_tombstones = Vec::new();
    for tombstone in &changes.deletes {
        match by_server.remove(&tombstone.id) {
            Some(record) => tombstoned.push((record, tombstone.clone())),
            None => unmatched_tombstones.push(tombstone.clone()),
        }
    }

    // Whatever is left in `by_server` was untouched by this page and
    // requires no action.

    MatchOutcome {
        matched,
        remote_only,
        local_only,
        tombstoned,
        unmatched_tombstones,
        duplicates,
    }
}
