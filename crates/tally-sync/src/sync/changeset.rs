//! Delta page decoding.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{RemoteUpsert, ServerId, Tombstone};
use crate::remote::DeltaDto;
use crate::util::parse_instant;

/// One decoded delta page: upserts and deletes partitioned disjointly by id,
/// plus the cursor window the server described.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub upserts: Vec<RemoteUpsert>,
    pub deletes: Vec<Tombstone>,
    /// Cursor the page was fetched with, if any
    pub window_start: Option<DateTime<Utc>>,
    /// Server clock at page assembly; the next cursor once the page applies
    pub window_end: DateTime<Utc>,
}

impl ChangeSet {
    /// Decode a raw delta payload.
    ///
    /// Any malformed timestamp or record aborts the whole page: the caller
    /// must not apply a partially decoded page or advance the cursor.
    pub fn decode(dto: DeltaDto) -> Result<Self> {
        let window_end = parse_instant(&dto.now)?;
        let window_start = dto.since.as_deref().map(parse_instant).transpose()?;

        let mut deletes = Vec::with_capacity(dto.deletes.len());
        for raw in dto.deletes {
            deletes.push(Tombstone {
                id: ServerId::new(raw.id),
                deleted_at: parse_instant(&raw.deleted_at)?,
            });
        }
        let deleted_ids: HashSet<&ServerId> = deletes.iter().map(|t| &t.id).collect();

        let mut by_id: HashMap<ServerId, RemoteUpsert> = HashMap::new();
        for raw in &dto.upserts {
            let upsert = RemoteUpsert::decode(raw)?;
            // An id present in both partitions resolves as a delete.
            if deleted_ids.contains(&upsert.id) {
                tracing::debug!("upsert for {} shadowed by tombstone in same page", upsert.id);
                continue;
            }
            match by_id.get(&upsert.id) {
                Some(existing) if existing.updated_at >= upsert.updated_at => {}
                _ => {
                    by_id.insert(upsert.id.clone(), upsert);
                }
            }
        }

        let mut upserts: Vec<RemoteUpsert> = by_id.into_values().collect();
        upserts.sort_by(|a, b| (a.updated_at, &a.id).cmp(&(b.updated_at, &b.id)));

        Ok(Self {
            upserts,
            deletes,
            window_start,
            window_end,
        })
    }
}
