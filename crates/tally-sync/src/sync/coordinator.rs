//! Sync orchestration: one run per family, parent before dependents.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use super::changeset::ChangeSet;
use super::conflict::{resolve, Resolution};
use super::cursor::Cursors;
use super::reconcile::reconcile;
use crate::error::{Error, Result};
use crate::models::{
    ChecklistItemRecord, Family, LocalId, NotificationRecord, ServerId, ShareLinkRecord,
    ShareMembershipRecord, SyncRecord, TaskRecord,
};
use crate::remote::RemoteClient;
use crate::store::{LocalStore, SyncStore};

/// Where a run starts fetching from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SincePolicy {
    /// Incremental: fetch since the family's persisted cursor
    #[default]
    FromCursor,
    /// Full re-sync: ignore the cursor (stale or corrupt)
    Full,
}

/// One record that failed to upload or violated a sync invariant. Failures
/// are isolated per record and never block siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub local_id: LocalId,
    pub server_id: Option<ServerId>,
    pub message: String,
}

/// Terminal result of one family's sync run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub family: Family,
    /// Remote upserts applied locally (inserts and overwrites)
    pub pulled_upserts: usize,
    /// Remote tombstones applied locally
    pub pulled_deletes: usize,
    pub pushed_creates: usize,
    pub pushed_updates: usize,
    pub pushed_deletes: usize,
    /// Matched pairs with equal instants: already synced
    pub noops: usize,
    /// Records queued for a later run (parent pending or failed)
    pub skipped: Vec<LocalId>,
    pub failures: Vec<RecordFailure>,
    /// Cursor after the run
    pub cursor: Option<DateTime<Utc>>,
    /// Server ids assigned to local records by this run's creates
    pub assigned: Vec<(LocalId, ServerId)>,
}

impl SyncOutcome {
    fn new(family: Family) -> Self {
        Self {
            family,
            pulled_upserts: 0,
            pulled_deletes: 0,
            pushed_creates: 0,
            pushed_updates: 0,
            pushed_deletes: 0,
            noops: 0,
            skipped: Vec::new(),
            failures: Vec::new(),
            cursor: None,
            assigned: Vec::new(),
        }
    }

    /// Whether every record made it through.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of a non-blocking sync trigger.
#[derive(Debug)]
pub enum TriggerOutcome {
    /// The run executed (including any coalesced re-runs)
    Ran(SyncOutcome),
    /// A run was already in flight; one deferred re-run was queued
    Coalesced,
}

/// Result of a full `sync_all` pass across every family.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<SyncOutcome>,
    /// Families whose run aborted, with the page-level error
    pub errors: Vec<(Family, Error)>,
}

impl RunReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn outcome(&self, family: Family) -> Option<&SyncOutcome> {
        self.outcomes.iter().find(|o| o.family == family)
    }
}

/// Confirmed and failed parents, gating the dependent families' uploads.
#[derive(Debug, Default)]
struct ParentGate {
    /// Parents holding a confirmed server id
    confirmed: HashSet<ServerId>,
    /// Parents whose own upload failed this run
    failed: HashSet<ServerId>,
}

enum Eligibility {
    Ready,
    /// Parent still pending creation; stay queued locally
    Waiting,
    /// Parent upload failed this run; fail-fast for its children
    ParentFailed,
    /// Parent server id references nothing we know about
    Orphaned,
}

fn upload_eligibility<R: SyncRecord>(record: &R, parents: Option<&ParentGate>) -> Eligibility {
    if R::FAMILY.parent().is_none() {
        return Eligibility::Ready;
    }
    let Some(parent) = record.parent_server_id() else {
        return Eligibility::Waiting;
    };
    if let Some(gate) = parents {
        if gate.failed.contains(parent) {
            return Eligibility::ParentFailed;
        }
        if !gate.confirmed.contains(parent) {
            return Eligibility::Orphaned;
        }
    }
    Eligibility::Ready
}

struct FamilyLock {
    mutex: Mutex<()>,
    /// A trigger arrived while a run held the mutex; coalesce to one re-run
    pending: AtomicBool,
}

impl FamilyLock {
    fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            pending: AtomicBool::new(false),
        }
    }
}

enum Push {
    Created(ServerId),
    Updated,
    Deleted,
    /// Local-only tombstone purged without a network call
    Purged,
}

/// Orchestrates sync runs against an injected remote client and local store.
///
/// One run per family executes at a time; independent families may run
/// concurrently, with the parent family always sequenced before its
/// dependents inside [`SyncCoordinator::sync_all`]. A started run proceeds
/// to completion or failure; newer triggers only queue a follow-up.
pub struct SyncCoordinator<C, S> {
    remote: Arc<C>,
    store: Arc<S>,
    cursors: Cursors<S>,
    locks: [FamilyLock; 5],
}

impl<C, S> SyncCoordinator<C, S>
where
    C: RemoteClient,
    S: SyncStore,
{
    pub fn new(remote: Arc<C>, store: Arc<S>) -> Self {
        Self {
            remote,
            cursors: Cursors::new(Arc::clone(&store)),
            store,
            locks: std::array::from_fn(|_| FamilyLock::new()),
        }
    }

    /// Explicit cursor reset; the next run for `family` fetches everything.
    pub async fn force_full_resync(&self, family: Family) -> Result<()> {
        self.cursors.reset(family).await
    }

    /// Run one family's sync, serializing with any other trigger source
    /// targeting the same family.
    pub async fn sync_family<R>(&self, policy: SincePolicy) -> Result<SyncOutcome>
    where
        R: SyncRecord,
        S: LocalStore<R>,
    {
        self.sync_family_gated::<R>(policy, None).await
    }

    /// Non-blocking trigger. If a run for the family is already in flight
    /// the trigger coalesces into a single deferred re-run executed by the
    /// in-flight holder.
    pub async fn trigger<R>(&self) -> Result<TriggerOutcome>
    where
        R: SyncRecord,
        S: LocalStore<R>,
    {
        let lock = self.lock_for(R::FAMILY);
        if let Ok(_guard) = lock.mutex.try_lock() {
            let outcome = self.run_and_drain::<R>(SincePolicy::FromCursor, None).await?;
            return Ok(TriggerOutcome::Ran(outcome));
        }

        lock.pending.store(true, Ordering::SeqCst);
        // The holder may have drained and released between the failed
        // acquisition and the flag store, leaving the flag orphaned.
        // Re-check: if the lock is free now, this trigger runs the
        // deferred pass itself.
        if let Ok(_guard) = lock.mutex.try_lock() {
            lock.pending.store(false, Ordering::SeqCst);
            let outcome = self.run_and_drain::<R>(SincePolicy::FromCursor, None).await?;
            return Ok(TriggerOutcome::Ran(outcome));
        }
        tracing::debug!("{} sync already running, coalescing trigger", R::FAMILY);
        Ok(TriggerOutcome::Coalesced)
    }

    /// Sync every family once: tasks/lists first, then the dependent
    /// families concurrently, gated on their parents.
    pub async fn sync_all(&self, policy: SincePolicy) -> Result<RunReport> {
        let mut report = RunReport::default();

        let parent = match self.sync_family_gated::<TaskRecord>(policy, None).await {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                tracing::warn!("tasks sync aborted: {error}");
                report.errors.push((Family::Tasks, error));
                None
            }
        };

        if let Some(outcome) = &parent {
            self.adopt_parents::<ChecklistItemRecord>(&outcome.assigned)
                .await?;
            self.adopt_parents::<NotificationRecord>(&outcome.assigned)
                .await?;
            self.adopt_parents::<ShareLinkRecord>(&outcome.assigned)
                .await?;
            self.adopt_parents::<ShareMembershipRecord>(&outcome.assigned)
                .await?;
        }
        let gate = self.parent_gate(parent.as_ref()).await?;
        if let Some(outcome) = parent {
            report.outcomes.push(outcome);
        }

        let (checklist, notifications, links, memberships) = tokio::join!(
            self.sync_family_gated::<ChecklistItemRecord>(policy, Some(&gate)),
            self.sync_family_gated::<NotificationRecord>(policy, Some(&gate)),
            self.sync_family_gated::<ShareLinkRecord>(policy, Some(&gate)),
            self.sync_family_gated::<ShareMembershipRecord>(policy, Some(&gate)),
        );
        for (family, result) in Family::CHILDREN
            .into_iter()
            .zip([checklist, notifications, links, memberships])
        {
            match result {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(error) => {
                    tracing::warn!("{family} sync aborted: {error}");
                    report.errors.push((family, error));
                }
            }
        }
        Ok(report)
    }

    const fn lock_for(&self, family: Family) -> &FamilyLock {
        &self.locks[family.index()]
    }

    #[cfg(test)]
    fn flag_pending(&self, family: Family) {
        self.lock_for(family).pending.store(true, Ordering::SeqCst);
    }

    async fn sync_family_gated<R>(
        &self,
        policy: SincePolicy,
        parents: Option<&ParentGate>,
    ) -> Result<SyncOutcome>
    where
        R: SyncRecord,
        S: LocalStore<R>,
    {
        let _guard = self.lock_for(R::FAMILY).mutex.lock().await;
        self.run_and_drain::<R>(policy, parents).await
    }

    /// Run one sync pass, then drain any triggers that coalesced while it
    /// was in flight. The caller must hold the family's mutex.
    async fn run_and_drain<R>(
        &self,
        policy: SincePolicy,
        parents: Option<&ParentGate>,
    ) -> Result<SyncOutcome>
    where
        R: SyncRecord,
        S: LocalStore<R>,
    {
        let lock = self.lock_for(R::FAMILY);
        let mut outcome = self.run_family::<R>(policy, parents).await?;
        while lock.pending.swap(false, Ordering::SeqCst) {
            outcome = self.run_family::<R>(SincePolicy::FromCursor, parents).await?;
        }
        Ok(outcome)
    }

    /// One sync run: fetch, decode, reconcile, resolve, persist, advance
    /// the cursor, then upload. The cursor moves only after the entire page
    /// applied, so a crash mid-run is safe to replay.
    async fn run_family<R>(
        &self,
        policy: SincePolicy,
        parents: Option<&ParentGate>,
    ) -> Result<SyncOutcome>
    where
        R: SyncRecord,
        S: LocalStore<R>,
    {
        let family = R::FAMILY;
        let since = match policy {
            SincePolicy::Full => None,
            SincePolicy::FromCursor => self.cursors.get(family).await?,
        };
        tracing::debug!("starting {family} sync (since: {since:?})");

        let page = self.remote.fetch_delta(family, since).await?;
        let changes = ChangeSet::decode(page)?;
        let locals: Vec<R> = <S as LocalStore<R>>::fetch_all(self.store.as_ref()).await?;
        let matches = reconcile(locals, &changes);

        let mut outcome = SyncOutcome::new(family);
        for local_id in matches.duplicates {
            outcome.failures.push(RecordFailure {
                local_id,
                server_id: None,
                message: "duplicate server id, record skipped".to_string(),
            });
        }

        let mut to_save: Vec<R> = Vec::new();
        for upsert in &matches.remote_only {
            to_save.push(R::from_remote(upsert)?);
            outcome.pulled_upserts += 1;
        }
        for (mut local, upsert) in matches.matched {
            match resolve(local.updated_at(), upsert.updated_at, false) {
                Resolution::UseRemote => {
                    local.apply_remote(&upsert)?;
                    to_save.push(local);
                    outcome.pulled_upserts += 1;
                }
                Resolution::UseLocal => {
                    // The upload phase pushes it if it is still dirty.
                }
                Resolution::Noop => {
                    outcome.noops += 1;
                    if local.meta().synced_at != Some(upsert.updated_at) {
                        // Equal instants mean already synced; record the
                        // acknowledgement so the upload phase agrees.
                        local.meta_mut().synced_at = Some(upsert.updated_at);
                        to_save.push(local);
                    }
                }
                Resolution::Delete => {
                    // Tombstones are reconciled separately below.
                }
            }
        }
        let mut to_delete: Vec<LocalId> = Vec::new();
        for (local, tombstone) in matches.tombstoned {
            if resolve(local.updated_at(), tombstone.deleted_at, true) == Resolution::Delete {
                to_delete.push(local.local_id());
                outcome.pulled_deletes += 1;
            }
        }

        <S as LocalStore<R>>::save_batch(self.store.as_ref(), to_save).await?;
        for id in to_delete {
            <S as LocalStore<R>>::delete(self.store.as_ref(), id).await?;
        }
        outcome.cursor = Some(self.cursors.advance(family, changes.window_end).await?);

        self.upload_phase::<R>(parents, &mut outcome).await?;

        tracing::info!(
            "{family} sync complete: {} pulled, {} deleted, {} created, {} updated, {} noop, {} skipped, {} failed",
            outcome.pulled_upserts,
            outcome.pulled_deletes,
            outcome.pushed_creates,
            outcome.pushed_updates,
            outcome.noops,
            outcome.skipped.len(),
            outcome.failures.len(),
        );
        Ok(outcome)
    }

    /// Push every dirty record: creates for records pending creation,
    /// updates for local edits past the last acknowledged instant, deletes
    /// for local tombstones. Failures are isolated per record; only
    /// persistence and auth errors abort the run.
    async fn upload_phase<R>(
        &self,
        parents: Option<&ParentGate>,
        outcome: &mut SyncOutcome,
    ) -> Result<()>
    where
        R: SyncRecord,
        S: LocalStore<R>,
    {
        let locals: Vec<R> = <S as LocalStore<R>>::fetch_all(self.store.as_ref()).await?;
        for mut record in locals {
            if !record.is_dirty() {
                continue;
            }
            if !record.is_deleted() {
                match upload_eligibility(&record, parents) {
                    Eligibility::Ready => {}
                    Eligibility::Waiting => {
                        outcome.skipped.push(record.local_id());
                        continue;
                    }
                    Eligibility::ParentFailed => {
                        tracing::debug!(
                            "skipping {} {}: parent upload failed this run",
                            R::FAMILY,
                            record.local_id(),
                        );
                        outcome.skipped.push(record.local_id());
                        continue;
                    }
                    Eligibility::Orphaned => {
                        tracing::warn!(
                            "orphaned {} {}: parent server id is unknown",
                            R::FAMILY,
                            record.local_id(),
                        );
                        outcome.failures.push(RecordFailure {
                            local_id: record.local_id(),
                            server_id: record.server_id().cloned(),
                            message: "orphaned child record, parent unknown".to_string(),
                        });
                        continue;
                    }
                }
            }

            let local_id = record.local_id();
            let server_id = record.server_id().cloned();
            match self.push_record(&mut record).await {
                Ok(Push::Created(assigned)) => {
                    outcome.pushed_creates += 1;
                    outcome.assigned.push((local_id, assigned));
                }
                Ok(Push::Updated) => outcome.pushed_updates += 1,
                Ok(Push::Deleted) => outcome.pushed_deletes += 1,
                Ok(Push::Purged) => {}
                Err(error) if error.aborts_run() => return Err(error),
                Err(error) => {
                    tracing::warn!("upload failed for {} {local_id}: {error}", R::FAMILY);
                    outcome.failures.push(RecordFailure {
                        local_id,
                        server_id,
                        message: error.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn push_record<R>(&self, record: &mut R) -> Result<Push>
    where
        R: SyncRecord,
        S: LocalStore<R>,
    {
        let family = R::FAMILY;

        if record.is_deleted() {
            let Some(server_id) = record.server_id().cloned() else {
                // Never reached the server; nothing to propagate.
                <S as LocalStore<R>>::delete(self.store.as_ref(), record.local_id()).await?;
                return Ok(Push::Purged);
            };
            self.remote.delete(family, &server_id).await?;
            <S as LocalStore<R>>::delete(self.store.as_ref(), record.local_id()).await?;
            return Ok(Push::Deleted);
        }

        let payload: Value = record.payload()?;
        let creating = record.server_id().is_none();
        let ack = match record.server_id().cloned() {
            None => self.remote.create(family, &payload).await?,
            Some(id) => self.remote.update(family, &id, &payload).await?,
        };
        record.meta_mut().mark_synced(ack.id.clone(), ack.updated_at);
        <S as LocalStore<R>>::upsert(self.store.as_ref(), record.clone()).await?;

        Ok(if creating {
            Push::Created(ack.id)
        } else {
            Push::Updated
        })
    }

    /// Back-fill freshly assigned parent server ids onto queued children.
    async fn adopt_parents<R>(&self, assigned: &[(LocalId, ServerId)]) -> Result<()>
    where
        R: SyncRecord,
        S: LocalStore<R>,
    {
        if assigned.is_empty() {
            return Ok(());
        }
        let by_parent: HashMap<LocalId, &ServerId> =
            assigned.iter().map(|(local, server)| (*local, server)).collect();

        let mut adopted: Vec<R> = Vec::new();
        for mut record in <S as LocalStore<R>>::fetch_all(self.store.as_ref()).await? {
            if record.parent_server_id().is_some() {
                continue;
            }
            let Some(parent_local) = record.parent_local_id() else {
                continue;
            };
            if let Some(server_id) = by_parent.get(parent_local) {
                record.adopt_parent_server_id(server_id);
                adopted.push(record);
            }
        }
        if !adopted.is_empty() {
            tracing::debug!("adopting parent ids for {} {} records", adopted.len(), R::FAMILY);
            <S as LocalStore<R>>::save_batch(self.store.as_ref(), adopted).await?;
        }
        Ok(())
    }

    async fn parent_gate(&self, parent: Option<&SyncOutcome>) -> Result<ParentGate> {
        let tasks: Vec<TaskRecord> =
            <S as LocalStore<TaskRecord>>::fetch_all(self.store.as_ref()).await?;
        let confirmed = tasks
            .iter()
            .filter_map(|task| task.server_id().cloned())
            .collect();
        let failed = parent.map_or_else(HashSet::new, |outcome| {
            outcome
                .failures
                .iter()
                .filter_map(|failure| failure.server_id.clone())
                .collect()
        });
        Ok(ParentGate { confirmed, failed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteUpsert;
    use crate::remote::{DeltaDto, TombstoneDto};
    use crate::store::{CursorStore, MemoryStore};
    use crate::util::{format_instant, parse_instant};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct MockState {
        pages: HashMap<Family, VecDeque<DeltaDto>>,
        now: String,
        created: Vec<(Family, Value)>,
        updated: Vec<(Family, String, Value)>,
        deleted: Vec<(Family, String)>,
        fetch_since: Vec<(Family, Option<DateTime<Utc>>)>,
        fail_fetch: bool,
        fail_create_names: HashSet<String>,
        fail_update_ids: HashSet<String>,
        auth_expired: bool,
        next_id: u32,
    }

    struct MockRemote {
        state: StdMutex<MockState>,
        block_next_fetch: AtomicBool,
        fetch_blocked: AtomicBool,
        release_fetch: Notify,
    }

    impl MockRemote {
        fn new(now: &str) -> Arc<Self> {
            Arc::new(Self {
                state: StdMutex::new(MockState {
                    now: now.to_string(),
                    ..MockState::default()
                }),
                block_next_fetch: AtomicBool::new(false),
                fetch_blocked: AtomicBool::new(false),
                release_fetch: Notify::new(),
            })
        }

        fn push_page(&self, family: Family, page: DeltaDto) {
            let mut state = self.state.lock().unwrap();
            state.pages.entry(family).or_default().push_back(page);
        }

        fn with_state<T>(&self, read: impl FnOnce(&mut MockState) -> T) -> T {
            read(&mut self.state.lock().unwrap())
        }

        fn ack(id: &str, payload: &Value) -> Result<RemoteUpsert> {
            let updated_at = payload["updatedAt"].as_str().unwrap();
            Ok(RemoteUpsert {
                id: ServerId::new(id),
                updated_at: parse_instant(updated_at)?,
                body: payload.clone(),
            })
        }
    }

    #[async_trait::async_trait]
    impl RemoteClient for MockRemote {
        async fn fetch_delta(
            &self,
            family: Family,
            since: Option<DateTime<Utc>>,
        ) -> Result<DeltaDto> {
            if self.block_next_fetch.swap(false, Ordering::SeqCst) {
                self.fetch_blocked.store(true, Ordering::SeqCst);
                self.release_fetch.notified().await;
            }
            let mut state = self.state.lock().unwrap();
            state.fetch_since.push((family, since));
            if state.fail_fetch {
                return Err(Error::Transport("simulated network failure".to_string()));
            }
            let now = state.now.clone();
            Ok(state
                .pages
                .get_mut(&family)
                .and_then(VecDeque::pop_front)
                .unwrap_or(DeltaDto {
                    upserts: vec![],
                    deletes: vec![],
                    since: None,
                    now,
                }))
        }

        async fn create(&self, family: Family, payload: &Value) -> Result<RemoteUpsert> {
            let mut state = self.state.lock().unwrap();
            if state.auth_expired {
                return Err(Error::Auth("credential expired".to_string()));
            }
            let label = payload
                .get("name")
                .or_else(|| payload.get("title"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if state.fail_create_names.contains(label) {
                return Err(Error::Transport("simulated create failure".to_string()));
            }
            state.next_id += 1;
            let id = format!("srv-{}", state.next_id);
            state.created.push((family, payload.clone()));
            Self::ack(&id, payload)
        }

        async fn update(
            &self,
            family: Family,
            id: &ServerId,
            payload: &Value,
        ) -> Result<RemoteUpsert> {
            let mut state = self.state.lock().unwrap();
            if state.fail_update_ids.contains(id.as_str()) {
                return Err(Error::Transport("simulated update failure".to_string()));
            }
            state
                .updated
                .push((family, id.as_str().to_string(), payload.clone()));
            Self::ack(id.as_str(), payload)
        }

        async fn delete(&self, family: Family, id: &ServerId) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.deleted.push((family, id.as_str().to_string()));
            Ok(())
        }
    }

    type TestCoordinator = SyncCoordinator<MockRemote, MemoryStore>;

    fn harness(remote: &Arc<MockRemote>) -> (Arc<TestCoordinator>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let coordinator = Arc::new(SyncCoordinator::new(
            Arc::clone(remote),
            Arc::clone(&store),
        ));
        (coordinator, store)
    }

    fn instant(raw: &str) -> DateTime<Utc> {
        parse_instant(raw).unwrap()
    }

    fn synced_task(name: &str, server_id: &str, at: &str) -> TaskRecord {
        let mut task = TaskRecord::new(name);
        task.meta.mark_synced(ServerId::new(server_id), instant(at));
        task
    }

    fn task_upsert(id: &str, at: &str, name: &str) -> Value {
        json!({"id": id, "updatedAt": at, "name": name})
    }

    fn page(upserts: Vec<Value>, deletes: Vec<(&str, &str)>, now: &str) -> DeltaDto {
        DeltaDto {
            upserts,
            deletes: deletes
                .into_iter()
                .map(|(id, at)| TombstoneDto {
                    id: id.to_string(),
                    deleted_at: at.to_string(),
                })
                .collect(),
            since: None,
            now: now.to_string(),
        }
    }

    #[tokio::test]
    async fn test_offline_create_syncs_once() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        let task = TaskRecord::new("buy milk");
        store.upsert(task.clone()).await.unwrap();

        let outcome = coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        assert_eq!(outcome.pushed_creates, 1);
        assert_eq!(outcome.assigned.len(), 1);
        assert_eq!(outcome.assigned[0].0, task.local_id());

        let tasks: Vec<TaskRecord> = store.fetch_all().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].server_id(), Some(&ServerId::new("srv-1")));
        assert!(!tasks[0].is_dirty());

        // The next delta echoes our own record back; nothing duplicates.
        remote.push_page(
            Family::Tasks,
            page(
                vec![task_upsert(
                    "srv-1",
                    &format_instant(tasks[0].updated_at()),
                    "buy milk",
                )],
                vec![],
                "2025-01-02T11:00:00Z",
            ),
        );
        let outcome = coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        assert_eq!(outcome.noops, 1);
        assert_eq!(outcome.pulled_upserts, 0);
        assert_eq!(outcome.pushed_creates, 0);
        let tasks: Vec<TaskRecord> = store.fetch_all().await.unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_remote_newer_overwrites_local_edit() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        let mut task = synced_task("old name", "srv-1", "2025-01-02T08:00:00Z");
        task.name = "local edit".to_string();
        task.meta.updated_at = instant("2025-01-02T08:30:00Z");
        store.upsert(task).await.unwrap();

        remote.push_page(
            Family::Tasks,
            page(
                vec![task_upsert("srv-1", "2025-01-02T09:00:00Z", "remote edit")],
                vec![],
                "2025-01-02T10:00:00Z",
            ),
        );
        let outcome = coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();

        assert_eq!(outcome.pulled_upserts, 1);
        assert_eq!(outcome.pushed_updates, 0);
        let tasks: Vec<TaskRecord> = store.fetch_all().await.unwrap();
        assert_eq!(tasks[0].name, "remote edit");
        assert!(!tasks[0].is_dirty());
        assert!(remote.with_state(|s| s.updated.is_empty()));
    }

    #[tokio::test]
    async fn test_local_newer_uploads_over_stale_remote() {
        let remote = MockRemote::new("2025-01-02T11:00:00Z");
        let (coordinator, store) = harness(&remote);

        let mut task = synced_task("old name", "srv-1", "2025-01-02T08:00:00Z");
        task.name = "local edit".to_string();
        task.meta.updated_at = instant("2025-01-02T10:00:00Z");
        store.upsert(task).await.unwrap();

        remote.push_page(
            Family::Tasks,
            page(
                vec![task_upsert("srv-1", "2025-01-02T09:00:00Z", "remote edit")],
                vec![],
                "2025-01-02T11:00:00Z",
            ),
        );
        let outcome = coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();

        assert_eq!(outcome.pulled_upserts, 0);
        assert_eq!(outcome.pushed_updates, 1);
        let pushed = remote.with_state(|s| s.updated.clone());
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].2["name"], "local edit");

        let tasks: Vec<TaskRecord> = store.fetch_all().await.unwrap();
        assert_eq!(tasks[0].name, "local edit");
        assert!(!tasks[0].is_dirty());
    }

    #[tokio::test]
    async fn test_equal_instants_touch_nothing() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        store
            .upsert(synced_task("settled", "srv-1", "2025-01-02T09:00:00Z"))
            .await
            .unwrap();
        remote.push_page(
            Family::Tasks,
            page(
                vec![task_upsert("srv-1", "2025-01-02T09:00:00Z", "settled")],
                vec![],
                "2025-01-02T10:00:00Z",
            ),
        );

        let outcome = coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        assert_eq!(outcome.noops, 1);
        assert_eq!(outcome.pulled_upserts, 0);
        assert!(remote.with_state(|s| s.updated.is_empty()));
    }

    #[tokio::test]
    async fn test_tombstone_beats_dirty_local() {
        let remote = MockRemote::new("2025-01-02T10:30:00Z");
        let (coordinator, store) = harness(&remote);

        let mut task = synced_task("doomed", "srv-3", "2025-01-02T08:00:00Z");
        task.name = "edited after delete".to_string();
        task.meta.updated_at = instant("2025-01-02T10:00:00Z");
        store.upsert(task).await.unwrap();

        remote.push_page(
            Family::Tasks,
            page(
                vec![],
                vec![("srv-3", "2025-01-02T09:00:00Z")],
                "2025-01-02T10:30:00Z",
            ),
        );
        let outcome = coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();

        assert_eq!(outcome.pulled_deletes, 1);
        let tasks: Vec<TaskRecord> = store.fetch_all().await.unwrap();
        assert!(tasks.is_empty());
        // The dead record is never pushed back up.
        assert!(remote.with_state(|s| s.updated.is_empty() && s.deleted.is_empty()));
    }

    #[tokio::test]
    async fn test_reapplying_a_page_is_idempotent() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        let upserts = vec![
            task_upsert("srv-1", "2025-01-02T09:00:00Z", "alpha"),
            task_upsert("srv-2", "2025-01-02T09:30:00Z", "beta"),
        ];
        remote.push_page(
            Family::Tasks,
            page(upserts.clone(), vec![], "2025-01-02T10:00:00Z"),
        );
        remote.push_page(Family::Tasks, page(upserts, vec![], "2025-01-02T10:00:00Z"));

        coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        let first: Vec<TaskRecord> = store.fetch_all().await.unwrap();

        coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        let second: Vec<TaskRecord> = store.fetch_all().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.cursor(Family::Tasks).await.unwrap(), Some(instant("2025-01-02T10:00:00Z")));
    }

    #[tokio::test]
    async fn test_split_and_combined_pages_converge() {
        let remote_split = MockRemote::new("2025-01-02T10:00:00Z");
        let (split_coordinator, split_store) = harness(&remote_split);
        remote_split.push_page(
            Family::Tasks,
            page(
                vec![task_upsert("srv-1", "2025-01-02T08:00:00Z", "alpha")],
                vec![],
                "2025-01-02T09:00:00Z",
            ),
        );
        remote_split.push_page(
            Family::Tasks,
            page(
                vec![task_upsert("srv-2", "2025-01-02T09:30:00Z", "beta")],
                vec![("srv-9", "2025-01-02T09:45:00Z")],
                "2025-01-02T10:00:00Z",
            ),
        );
        split_coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        split_coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();

        let remote_combined = MockRemote::new("2025-01-02T10:00:00Z");
        let (combined_coordinator, combined_store) = harness(&remote_combined);
        remote_combined.push_page(
            Family::Tasks,
            page(
                vec![
                    task_upsert("srv-1", "2025-01-02T08:00:00Z", "alpha"),
                    task_upsert("srv-2", "2025-01-02T09:30:00Z", "beta"),
                ],
                vec![("srv-9", "2025-01-02T09:45:00Z")],
                "2025-01-02T10:00:00Z",
            ),
        );
        combined_coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();

        let project = |records: Vec<TaskRecord>| {
            let mut rows: Vec<(Option<ServerId>, String)> = records
                .into_iter()
                .map(|t| (t.server_id().cloned(), t.name))
                .collect();
            rows.sort();
            rows
        };
        let split: Vec<TaskRecord> = split_store.fetch_all().await.unwrap();
        let combined: Vec<TaskRecord> = combined_store.fetch_all().await.unwrap();
        assert_eq!(project(split), project(combined));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_cursor_alone() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        let settled = store.cursor(Family::Tasks).await.unwrap();
        assert_eq!(settled, Some(instant("2025-01-02T10:00:00Z")));

        remote.with_state(|s| s.fail_fetch = true);
        let result = coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(store.cursor(Family::Tasks).await.unwrap(), settled);
    }

    #[tokio::test]
    async fn test_cursor_feeds_next_fetch() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, _store) = harness(&remote);

        coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        coordinator
            .sync_family::<TaskRecord>(SincePolicy::Full)
            .await
            .unwrap();

        let since = remote.with_state(|s| s.fetch_since.clone());
        assert_eq!(since[0].1, None);
        assert_eq!(since[1].1, Some(instant("2025-01-02T10:00:00Z")));
        // A full re-sync ignores the cursor.
        assert_eq!(since[2].1, None);
    }

    #[tokio::test]
    async fn test_duplicate_server_id_is_reported() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        let first = synced_task("first", "srv-1", "2025-01-02T09:00:00Z");
        let second = synced_task("second", "srv-1", "2025-01-02T09:00:00Z");
        store.upsert(first).await.unwrap();
        store.upsert(second.clone()).await.unwrap();

        let outcome = coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].local_id, second.local_id());
        assert!(outcome.failures[0].message.contains("duplicate"));
    }

    #[tokio::test]
    async fn test_upload_failure_does_not_block_siblings() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        store.upsert(TaskRecord::new("fine")).await.unwrap();
        store.upsert(TaskRecord::new("cursed")).await.unwrap();
        remote.with_state(|s| {
            s.fail_create_names.insert("cursed".to_string());
        });

        let outcome = coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        assert_eq!(outcome.pushed_creates, 1);
        assert_eq!(outcome.failures.len(), 1);

        let tasks: Vec<TaskRecord> = store.fetch_all().await.unwrap();
        let fine = tasks.iter().find(|t| t.name == "fine").unwrap();
        let cursed = tasks.iter().find(|t| t.name == "cursed").unwrap();
        assert!(fine.server_id().is_some());
        // The failed record stays queued for the next run.
        assert!(cursed.server_id().is_none());
        assert!(cursed.is_dirty());
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_the_run() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        store.upsert(TaskRecord::new("pending")).await.unwrap();
        store.upsert(TaskRecord::new("also pending")).await.unwrap();
        remote.with_state(|s| s.auth_expired = true);

        let result = coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await;
        assert!(matches!(result, Err(Error::Auth(_))));
        assert!(remote.with_state(|s| s.created.is_empty()));
    }

    #[tokio::test]
    async fn test_local_delete_propagates_then_purges() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        let mut synced = synced_task("shipped", "srv-1", "2025-01-02T08:00:00Z");
        synced.meta.mark_deleted();
        store.upsert(synced).await.unwrap();

        let mut never_uploaded = TaskRecord::new("draft");
        never_uploaded.meta.mark_deleted();
        store.upsert(never_uploaded).await.unwrap();

        let outcome = coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        assert_eq!(outcome.pushed_deletes, 1);
        assert_eq!(
            remote.with_state(|s| s.deleted.clone()),
            vec![(Family::Tasks, "srv-1".to_string())]
        );
        // The draft never reached the server; no create, no delete call.
        assert!(remote.with_state(|s| s.created.is_empty()));
        let tasks: Vec<TaskRecord> = store.fetch_all().await.unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_sync_all_creates_parent_before_child() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        let task = TaskRecord::new("groceries");
        let item = ChecklistItemRecord::new(task.local_id(), "eggs", 0);
        store.upsert(task).await.unwrap();
        store.upsert(item).await.unwrap();

        let report = coordinator.sync_all(SincePolicy::FromCursor).await.unwrap();
        assert!(report.is_success());

        let created = remote.with_state(|s| s.created.clone());
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].0, Family::Tasks);
        assert_eq!(created[1].0, Family::ChecklistItems);
        assert_eq!(created[1].1["taskId"], "srv-1");

        let items: Vec<ChecklistItemRecord> = store.fetch_all().await.unwrap();
        assert_eq!(items[0].parent_server, Some(ServerId::new("srv-1")));
        assert!(!items[0].is_dirty());
    }

    #[tokio::test]
    async fn test_sync_all_keeps_child_queued_when_parent_create_fails() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        let task = TaskRecord::new("doomed");
        let item = ChecklistItemRecord::new(task.local_id(), "eggs", 0);
        store.upsert(task).await.unwrap();
        store.upsert(item.clone()).await.unwrap();
        remote.with_state(|s| {
            s.fail_create_names.insert("doomed".to_string());
        });

        let report = coordinator.sync_all(SincePolicy::FromCursor).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.outcome(Family::Tasks).unwrap().failures.len(), 1);

        let checklist = report.outcome(Family::ChecklistItems).unwrap();
        assert_eq!(checklist.skipped, vec![item.local_id()]);
        assert!(remote.with_state(|s| {
            s.created.iter().all(|(family, _)| *family == Family::Tasks)
        }));

        // Still queued locally, untouched.
        let items: Vec<ChecklistItemRecord> = store.fetch_all().await.unwrap();
        assert!(items[0].is_dirty());
        assert!(items[0].parent_server.is_none());
    }

    #[tokio::test]
    async fn test_sync_all_skips_children_of_failed_parent_update() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        let mut task = synced_task("list", "srv-1", "2025-01-02T08:00:00Z");
        task.meta.updated_at = instant("2025-01-02T09:00:00Z");
        store.upsert(task.clone()).await.unwrap();

        let mut item = ChecklistItemRecord::new(task.local_id(), "eggs", 0);
        item.adopt_parent_server_id(&ServerId::new("srv-1"));
        store.upsert(item.clone()).await.unwrap();
        remote.with_state(|s| {
            s.fail_update_ids.insert("srv-1".to_string());
        });

        let report = coordinator.sync_all(SincePolicy::FromCursor).await.unwrap();
        let checklist = report.outcome(Family::ChecklistItems).unwrap();
        assert_eq!(checklist.skipped, vec![item.local_id()]);
        assert!(remote.with_state(|s| s.created.is_empty()));
    }

    #[tokio::test]
    async fn test_orphaned_child_fails_without_stopping_the_run() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        let mut orphan = ChecklistItemRecord::new(LocalId::new(), "ghost", 0);
        orphan.adopt_parent_server_id(&ServerId::new("srv-404"));
        store.upsert(orphan.clone()).await.unwrap();
        store.upsert(TaskRecord::new("healthy")).await.unwrap();

        let report = coordinator.sync_all(SincePolicy::FromCursor).await.unwrap();
        assert!(report.is_success());

        let checklist = report.outcome(Family::ChecklistItems).unwrap();
        assert_eq!(checklist.failures.len(), 1);
        assert_eq!(checklist.failures[0].local_id, orphan.local_id());
        assert!(checklist.failures[0].message.contains("orphaned"));
        assert_eq!(report.outcome(Family::Tasks).unwrap().pushed_creates, 1);
    }

    #[tokio::test]
    async fn test_trigger_coalesces_while_run_in_flight() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, _store) = harness(&remote);

        remote.block_next_fetch.store(true, Ordering::SeqCst);
        let in_flight = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move {
                coordinator
                    .sync_family::<TaskRecord>(SincePolicy::FromCursor)
                    .await
            }
        });
        while !remote.fetch_blocked.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        let trigger = coordinator.trigger::<TaskRecord>().await.unwrap();
        assert!(matches!(trigger, TriggerOutcome::Coalesced));

        remote.release_fetch.notify_one();
        in_flight.await.unwrap().unwrap();

        // One original run plus exactly one coalesced re-run.
        assert_eq!(remote.with_state(|s| s.fetch_since.len()), 2);

        let idle = coordinator.trigger::<TaskRecord>().await.unwrap();
        assert!(matches!(idle, TriggerOutcome::Ran(_)));
    }

    #[tokio::test]
    async fn test_trigger_drains_a_leftover_pending_flag() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, _store) = harness(&remote);

        // A pending flag with no holder left to drain it must not strand
        // the deferred run; the next trigger executes it.
        coordinator.flag_pending(Family::Tasks);
        let outcome = coordinator.trigger::<TaskRecord>().await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Ran(_)));
        // The requested pass plus the drained deferred pass.
        assert_eq!(remote.with_state(|s| s.fetch_since.len()), 2);
    }

    #[tokio::test]
    async fn test_force_full_resync_clears_cursor() {
        let remote = MockRemote::new("2025-01-02T10:00:00Z");
        let (coordinator, store) = harness(&remote);

        coordinator
            .sync_family::<TaskRecord>(SincePolicy::FromCursor)
            .await
            .unwrap();
        assert!(store.cursor(Family::Tasks).await.unwrap().is_some());

        coordinator.force_full_resync(Family::Tasks).await.unwrap();
        assert_eq!(store.cursor(Family::Tasks).await.unwrap(), None);
    }
}
