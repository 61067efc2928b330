//! Record models for the five synchronized families.

mod checklist;
mod notification;
mod record;
mod share;
mod task;

pub use checklist::ChecklistItemRecord;
pub use notification::{NotificationKind, NotificationRecord};
pub use record::{Family, LocalId, RemoteUpsert, ServerId, SyncMeta, SyncRecord, Tombstone};
pub use share::{MemberRole, ShareLinkRecord, ShareMembershipRecord, ShareScope};
pub use task::{Completion, TaskRecord};
