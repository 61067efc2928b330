//! tally-sync - client-side sync engine for Tally
//!
//! Reconciles the local, offline-capable task store with the remote Tally
//! service across five record families: tasks/lists, checklist items,
//! notifications, share links, and share memberships. The engine performs
//! incremental delta fetches, last-write-wins conflict resolution, tombstone
//! propagation, and client/server identity reconciliation, with dependent
//! families syncing only after their parent list holds a confirmed server id.
//!
//! This crate is a library consumed by the higher-level task and account
//! services; it exposes no UI or CLI surface. Network transport and durable
//! storage are injected via the [`remote::RemoteClient`] and
//! [`store::LocalStore`] adapter traits.

pub mod config;
pub mod error;
pub mod models;
pub mod remote;
pub mod store;
pub mod sync;
mod util;

pub use error::{Error, Result};
pub use models::{Family, LocalId, ServerId};
pub use sync::{SincePolicy, SyncCoordinator, SyncOutcome};
