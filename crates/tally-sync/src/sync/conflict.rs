//! Last-write-wins conflict resolution.
//!
//! Wall-clock ordering loses true causality (no vector clocks); that is an
//! accepted limitation for a single-user, multi-device store.

use chrono::{DateTime, Utc};

/// Decision for one matched local/remote record pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Local is newer; keep it and let the upload phase push it
    UseLocal,
    /// Remote is newer; overwrite local fields
    UseRemote,
    /// Equal instants: already synced, no write on either side
    Noop,
    /// Remote tombstone: delete locally, regardless of timestamps
    Delete,
}

/// Compare one timestamped pair. Pure: the decision depends only on the two
/// instants and the tombstone flag.
#[must_use]
pub fn resolve(
    local_at: DateTime<Utc>,
    remote_at: DateTime<Utc>,
    remote_tombstone: bool,
) -> Resolution {
    if remote_tombstone {
        // Tombstones are terminal and beat any local edit.
        return Resolution::Delete;
    }
    match remote_at.cmp(&local_at) {
        std::cmp::Ordering::Greater => Resolution::UseRemote,
        std::cmp::Ordering::Less => Resolution::UseLocal,
        std::cmp::Ordering::Equal => Resolution::Noop,
    }
}
