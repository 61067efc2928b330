//! The bidirectional sync engine.
//!
//! One run per family: fetch a delta page, decode it into a [`ChangeSet`],
//! reconcile identities, resolve conflicts last-write-wins, persist, advance
//! the cursor, then upload locally dirty records. The
//! [`SyncCoordinator`] sequences the parent family before its dependents.

mod changeset;
mod conflict;
mod coordinator;
mod cursor;
mod reconcile;

pub use changeset::ChangeSet;
pub use conflict::{resolve, Resolution};
pub use coordinator::{
    RecordFailure, RunReport, SincePolicy, SyncCoordinator, SyncOutcome, TriggerOutcome,
};
pub use cursor::Cursors;
pub use reconcile::{reconcile, MatchOutcome};
