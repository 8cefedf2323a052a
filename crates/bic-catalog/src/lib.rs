//! Backup index catalog engine (§2-§5) — the foreground-facing facade
//! over `bic-store`.
//!
//! [`Catalog`] owns one [`bic_store::Handle`] and runs every public
//! operation through the §4.2 "do-in-use" scope and the §4.3
//! transaction/interruption core, so callers never reach for `rusqlite`
//! or `bic_store` directly. The individual algorithms live in their own
//! modules ([`aggregates`], [`newest`], [`purge`], [`mutation`],
//! [`query`]) and operate on a bare `&Connection`/`&InterruptScope` —
//! `Catalog` is the thin layer that wraps them in the concurrency
//! contract.

pub mod aggregates;
pub mod error;
pub mod model;
pub mod mutation;
pub mod newest;
pub mod purge;
pub mod query;

pub use error::{CatalogError, Result};
pub use model::*;

use std::time::Duration;

use bic_store::{Handle, InterruptScope, TxnTimeout};
use bic_types::{EntrySortMode, EntitySortMode, EntryKind, Mode, Ordering, State, StorageSortMode};

use mutation::{AddEntryParams, NewEntity, NewStorage};
use query::{EntityFilter, EntryFilter, StorageFilter};

/// Foreground entry point (§4). Cheap to construct one per handle; all
/// the actual state lives in the wrapped [`Handle`]/[`bic_concurrency::EngineContext`].
pub struct Catalog {
    handle: Handle,
    timeout: TxnTimeout,
}

impl Catalog {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            timeout: TxnTimeout::WaitForever,
        }
    }

    pub fn with_timeout(handle: Handle, timeout: TxnTimeout) -> Self {
        Self { handle, timeout }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn handle_mut(&mut self) -> &mut Handle {
        &mut self.handle
    }

    /// Runs `body` inside the do-in-use scope (§4.2) and the
    /// transaction/interruption scope (§4.3). `is_worker` suppresses the
    /// trigger-raise a foreground call would otherwise send (the worker
    /// never needs to interrupt itself).
    fn run<R>(&self, is_worker: bool, mut body: impl FnMut(&InterruptScope) -> Result<R>) -> Result<R> {
        if let Some(msg) = &self.handle.upgrade_error {
            return Err(CatalogError::Upgrade(msg.clone()));
        }
        let ctx = self.handle.ctx.clone();
        let ctx_for_scope = ctx.clone();
        let conn = self.handle.conn();
        let timeout = self.timeout;
        ctx.do_in_use(is_worker, move || {
            bic_store::interruptable_scope(conn, &ctx_for_scope, timeout, &mut body)
        })
    }

    // ---- identity & entity lifecycle (§4.1, §4.9) ----

    pub fn new_uuid(&self, job_uuid: &str) -> Result<i64> {
        self.run(false, |scope| mutation::new_uuid(scope.conn(), job_uuid))
    }

    pub fn new_entity(&self, params: NewEntity<'_>) -> Result<i64> {
        self.run(false, |scope| {
            mutation::new_entity(
                scope.conn(),
                NewEntity {
                    job_uuid: params.job_uuid,
                    schedule_uuid: params.schedule_uuid,
                    host_name: params.host_name,
                    user_name: params.user_name,
                    archive_type: params.archive_type,
                    created: params.created,
                    locked: params.locked,
                },
            )
        })
    }

    pub fn delete_entity(&self, entity_id: i64) -> Result<bool> {
        self.run(false, |scope| mutation::delete_entity(scope, entity_id))
    }

    pub fn lock_entity(&self, entity_id: i64) -> Result<()> {
        self.run(false, |scope| mutation::lock_entity(scope.conn(), entity_id))
    }

    pub fn unlock_entity(&self, entity_id: i64) -> Result<()> {
        self.run(false, |scope| mutation::unlock_entity(scope.conn(), entity_id))
    }

    pub fn assign_entity_to_uuid(&self, entity_id: i64, new_job_uuid: &str) -> Result<()> {
        self.run(false, |scope| {
            mutation::assign_entity_to_uuid(scope.conn(), entity_id, new_job_uuid)
        })
    }

    // ---- storage lifecycle (§4.9, §4.6) ----

    pub fn new_storage(&self, params: NewStorage<'_>) -> Result<i64> {
        self.run(false, |scope| {
            mutation::new_storage(
                scope.conn(),
                NewStorage {
                    entity_id: params.entity_id,
                    host_name: params.host_name,
                    user_name: params.user_name,
                    name: params.name,
                    created: params.created,
                    size: params.size,
                    state: params.state,
                    mode: params.mode,
                },
            )
        })
    }

    pub fn update_storage_infos(
        &self,
        storage_id: i64,
        size: i64,
        state: State,
        last_checked: i64,
        error_message: &str,
    ) -> Result<()> {
        self.run(false, |scope| {
            mutation::update_storage_infos(scope.conn(), storage_id, size, state, last_checked, error_message)
        })
    }

    pub fn delete_storage(&self, storage_id: i64) -> Result<()> {
        self.run(false, |scope| purge::delete_storage(scope, &self.handle.ctx, storage_id))
    }

    pub fn assign_storage_to_entity(&self, storage_id: i64, new_entity_id: i64) -> Result<()> {
        self.run(false, |scope| {
            mutation::assign_storage_to_entity(scope.conn(), storage_id, new_entity_id)
        })
    }

    // ---- entry ingest (§4.9) ----

    pub fn add_file(&self, params: AddEntryParams<'_>, offset: i64, fragment_size: i64) -> Result<i64> {
        self.run(false, |scope| mutation::add_file(scope.conn(), params.clone(), offset, fragment_size))
    }

    pub fn add_image(
        &self,
        params: AddEntryParams<'_>,
        file_system_type: &str,
        block_size: i64,
        offset: i64,
        fragment_size: i64,
    ) -> Result<i64> {
        self.run(false, |scope| {
            mutation::add_image(scope.conn(), params.clone(), file_system_type, block_size, offset, fragment_size)
        })
    }

    pub fn add_directory(&self, params: AddEntryParams<'_>, path_name: &str) -> Result<i64> {
        self.run(false, |scope| mutation::add_directory(scope.conn(), params.clone(), path_name))
    }

    pub fn add_link(&self, params: AddEntryParams<'_>, destination_name: &str) -> Result<i64> {
        self.run(false, |scope| mutation::add_link(scope.conn(), params.clone(), destination_name))
    }

    pub fn add_hardlink(&self, params: AddEntryParams<'_>) -> Result<i64> {
        self.run(false, |scope| mutation::add_hardlink(scope.conn(), params.clone()))
    }

    pub fn add_special(&self, params: AddEntryParams<'_>, special_type: &str, major: i64, minor: i64) -> Result<i64> {
        self.run(false, |scope| mutation::add_special(scope.conn(), params.clone(), special_type, major, minor))
    }

    pub fn skip_entry(&self, entity_id: i64, storage_id: i64, name: &str, reason: &str) -> Result<i64> {
        self.run(false, |scope| mutation::skip_entry(scope.conn(), entity_id, storage_id, name, reason))
    }

    pub fn record_history(
        &self,
        entity_id: i64,
        started: i64,
        duration: i64,
        entry_count: u64,
        entry_size: u64,
        error_count: u64,
    ) -> Result<i64> {
        self.run(false, |scope| {
            mutation::record_history(scope.conn(), entity_id, started, duration, entry_count, entry_size, error_count)
        })
    }

    // ---- aggregates (§4.4) ----

    pub fn recompute_storage_aggregates(&self, storage_id: i64) -> Result<Aggregates> {
        self.run(false, |scope| aggregates::recompute_storage_aggregates(scope.conn(), storage_id))
    }

    pub fn recompute_entity_aggregates(&self, entity_id: i64) -> Result<Aggregates> {
        self.run(false, |scope| aggregates::recompute_entity_aggregates(scope.conn(), entity_id))
    }

    pub fn uuid_aggregates_on_demand(&self, uuid_id: i64) -> Result<Aggregates> {
        self.run(false, |scope| aggregates::uuid_aggregates_on_demand(scope.conn(), uuid_id))
    }

    pub fn recompute_directory_subtree(&self, storage_id: i64, directory_entry_id: i64, path_prefix: &str) -> Result<()> {
        self.run(false, |scope| {
            aggregates::recompute_directory_subtree(scope.conn(), storage_id, directory_entry_id, path_prefix)
        })
    }

    // ---- newest-version index (§4.5) ----

    pub fn add_to_newest(&self, storage_id: i64, max_wait: Duration) -> Result<u64> {
        self.run(false, |scope| newest::add_to_newest(scope, storage_id, max_wait))
    }

    pub fn remove_from_newest(&self, storage_id: i64, max_wait: Duration) -> Result<u64> {
        self.run(false, |scope| newest::remove_from_newest(scope, storage_id, max_wait))
    }

    // ---- purge engine (§4.6); `is_worker = true` since these are the
    // maintenance worker's own bulk passes ----

    pub fn clear_storage(&self, storage_id: i64, max_wait: Duration) -> Result<u64> {
        let _guard = self.handle.ctx.lock_clear_storage();
        self.run(true, |scope| purge::clear_storage(scope, storage_id, max_wait))
    }

    pub fn purge_storage(&self, storage_id: i64, max_wait: Duration) -> Result<()> {
        let _guard = self.handle.ctx.lock_clear_storage();
        self.run(true, |scope| purge::purge_storage(scope, storage_id, max_wait))
    }

    pub fn prune_storage(&self, storage_id: i64, max_wait: Duration) -> Result<bool> {
        self.run(true, |scope| purge::prune_storage(scope, storage_id, max_wait))
    }

    pub fn prune_entity(&self, entity_id: i64, max_wait: Duration) -> Result<bool> {
        self.run(true, |scope| purge::prune_entity(scope, entity_id, max_wait))
    }

    pub fn prune_uuid(&self, uuid_id: i64) -> Result<bool> {
        self.run(true, |scope| purge::prune_uuid(scope, uuid_id))
    }

    // ---- query surface (§4.8); read-only, no transaction needed ----

    pub fn find_uuid(&self, id: i64) -> Result<UuidRow> {
        query::find_uuid(self.handle.conn(), id)
    }

    pub fn find_uuid_by_job_uuid(&self, job_uuid: &str) -> Result<UuidRow> {
        query::find_uuid_by_job_uuid(self.handle.conn(), job_uuid)
    }

    pub fn find_entity(&self, id: i64) -> Result<EntityRow> {
        query::find_entity(self.handle.conn(), id)
    }

    pub fn find_storage_by_id(&self, id: i64) -> Result<StorageRow> {
        query::find_storage_by_id(self.handle.conn(), id)
    }

    pub fn find_entry(&self, id: i64) -> Result<EntryRow> {
        query::find_entry(self.handle.conn(), id)
    }

    pub fn find_newest_by_name(&self, name: &str) -> Result<NewestEntryRow> {
        query::find_newest_by_name(self.handle.conn(), name)
    }

    pub fn list_entities(
        &self,
        filter: &EntityFilter,
        sort: Option<EntitySortMode>,
        order: Ordering,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<EntityRow>> {
        query::list_entities(self.handle.conn(), filter, sort, order, offset, limit)
    }

    pub fn list_storages(
        &self,
        filter: &StorageFilter,
        sort: Option<StorageSortMode>,
        order: Ordering,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<StorageRow>> {
        query::list_storages(self.handle.conn(), filter, sort, order, offset, limit)
    }

    pub fn list_entries(
        &self,
        filter: &EntryFilter,
        sort: Option<EntrySortMode>,
        order: Ordering,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<EntryRow>> {
        query::list_entries(self.handle.conn(), filter, sort, order, offset, limit)
    }

    pub fn list_entries_of_kind(
        &self,
        filter: EntryFilter,
        kind: EntryKind,
        sort: Option<EntrySortMode>,
        order: Ordering,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<EntryRow>> {
        query::list_entries_of_kind(self.handle.conn(), filter, kind, sort, order, offset, limit)
    }

    pub fn list_history(&self, entity_id: i64, offset: i64, limit: i64) -> Result<Vec<HistoryRow>> {
        query::list_history(self.handle.conn(), entity_id, offset, limit)
    }
}

// Re-exported for callers building filters/params without reaching into
// the submodules directly.
pub use mutation::{AddEntryParams as EntryParams, NewEntity as NewEntityParams, NewStorage as NewStorageParams};
pub use query::{EntityFilter as EntityQuery, EntryFilter as EntryQuery, IdFilter, StorageFilter as StorageQuery};

#[cfg(test)]
mod tests {
    use super::*;
    use bic_concurrency::EngineContext;
    use bic_store::{BusyCallback, Handle, OpenFlags, OpenMode, RetryForever};
    use bic_types::ArchiveType;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn open_catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.sqlite");
        let handle = Handle::open(
            &path,
            OpenMode::Create,
            OpenFlags::default(),
            EngineContext::new(),
            Arc::new(RetryForever) as Arc<dyn BusyCallback>,
        )
        .unwrap();
        (dir, Catalog::new(handle))
    }

    #[test]
    fn new_entity_then_new_storage_then_add_file_updates_entity_aggregates() {
        let (_dir, cat) = open_catalog();
        let entity_id = cat
            .new_entity(NewEntity {
                job_uuid: "job-1",
                schedule_uuid: "",
                host_name: "h",
                user_name: "u",
                archive_type: ArchiveType::Full,
                created: 1000,
                locked: false,
            })
            .unwrap();
        let storage_id = cat
            .new_storage(NewStorage {
                entity_id,
                host_name: "h",
                user_name: "u",
                name: "vol-1",
                created: 1000,
                size: 0,
                state: State::Ok,
                mode: Mode::Auto,
            })
            .unwrap();
        cat.add_file(
            AddEntryParams {
                entity_id,
                uuid_id: 0,
                storage_id,
                name: "/a",
                time_last_access: 1,
                time_modified: 1,
                time_last_changed: 1,
                user_id: 0,
                group_id: 0,
                permission: 0,
                size: 50,
            },
            0,
            50,
        )
        .unwrap();

        let entity = cat.find_entity(entity_id).unwrap();
        assert_eq!(entity.aggregates.file_count, 1);
        assert_eq!(entity.aggregates.file_size, 50);
    }

    #[test]
    fn delete_entity_then_recreate_yields_distinct_id() {
        let (_dir, cat) = open_catalog();
        let params = || NewEntity {
            job_uuid: "job-2",
            schedule_uuid: "",
            host_name: "h",
            user_name: "u",
            archive_type: ArchiveType::Full,
            created: 1,
            locked: false,
        };
        let first = cat.new_entity(params()).unwrap();
        cat.delete_entity(first).unwrap();
        let second = cat.new_entity(params()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn directory_ancestor_aggregate_is_bumped_by_nested_file() {
        let (_dir, cat) = open_catalog();
        let entity_id = cat
            .new_entity(NewEntity {
                job_uuid: "job-3",
                schedule_uuid: "",
                host_name: "h",
                user_name: "u",
                archive_type: ArchiveType::Full,
                created: 1,
                locked: false,
            })
            .unwrap();
        let storage_id = cat
            .new_storage(NewStorage {
                entity_id,
                host_name: "h",
                user_name: "u",
                name: "vol-2",
                created: 1,
                size: 0,
                state: State::Ok,
                mode: Mode::Auto,
            })
            .unwrap();
        cat.add_directory(
            AddEntryParams {
                entity_id,
                uuid_id: 0,
                storage_id,
                name: "/d",
                time_last_access: 1,
                time_modified: 1,
                time_last_changed: 1,
                user_id: 0,
                group_id: 0,
                permission: 0,
                size: 0,
            },
            "/d",
        )
        .unwrap();
        cat.add_file(
            AddEntryParams {
                entity_id,
                uuid_id: 0,
                storage_id,
                name: "/d/a",
                time_last_access: 2,
                time_modified: 2,
                time_last_changed: 2,
                user_id: 0,
                group_id: 0,
                permission: 0,
                size: 50,
            },
            0,
            50,
        )
        .unwrap();

        let dir_entry: i64 = cat
            .handle()
            .conn()
            .query_row(
                "SELECT totalEntryCount FROM directoryEntries de JOIN entries e ON e.id = de.entryId WHERE e.name = '/d'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(dir_entry, 1);
    }

    fn make_entity(cat: &Catalog, job_uuid: &str) -> i64 {
        cat.new_entity(NewEntity {
            job_uuid,
            schedule_uuid: "",
            host_name: "h",
            user_name: "u",
            archive_type: ArchiveType::Full,
            created: 1,
            locked: false,
        })
        .unwrap()
    }

    fn make_storage(cat: &Catalog, entity_id: i64, name: &str) -> i64 {
        cat.new_storage(NewStorage {
            entity_id,
            host_name: "h",
            user_name: "u",
            name,
            created: 1,
            size: 0,
            state: State::Ok,
            mode: Mode::Auto,
        })
        .unwrap()
    }

    fn add_file_named(cat: &Catalog, entity_id: i64, storage_id: i64, name: &str, size: i64, time_last_changed: i64) {
        cat.add_file(
            AddEntryParams {
                entity_id,
                uuid_id: 0,
                storage_id,
                name,
                time_last_access: time_last_changed,
                time_modified: time_last_changed,
                time_last_changed,
                user_id: 0,
                group_id: 0,
                permission: 0,
                size,
            },
            0,
            size,
        )
        .unwrap();
    }

    /// §8 scenario 2 ("Ingest & newest"): the newest entry by name
    /// tracks whichever live storage last wrote it, and reverts when
    /// that storage is removed.
    #[test]
    fn newest_by_name_reverts_after_deleting_the_newer_storage() {
        let (_dir, cat) = open_catalog();
        let entity_id = make_entity(&cat, "job-newest");
        let s1 = make_storage(&cat, entity_id, "vol-1");
        add_file_named(&cat, entity_id, s1, "/x", 10, 5);

        let newest = cat.find_newest_by_name("/x").unwrap();
        assert_eq!(newest.entry_id, cat.find_entry(newest.entry_id).unwrap().id);
        assert_eq!(newest.size, 10);

        let s2 = make_storage(&cat, entity_id, "vol-2");
        add_file_named(&cat, entity_id, s2, "/x", 12, 7);
        let newest = cat.find_newest_by_name("/x").unwrap();
        assert_eq!(newest.size, 12);

        cat.delete_storage(s2).unwrap();
        cat.clear_storage(s2, Duration::from_millis(10)).unwrap();

        let newest = cat.find_newest_by_name("/x").unwrap();
        assert_eq!(newest.size, 10, "newest should revert to the entry still backed by vol-1");
    }

    /// §8 invariant: ties on `time_last_changed` break toward the higher
    /// entry id.
    #[test]
    fn newest_tie_break_prefers_higher_entry_id() {
        let (_dir, cat) = open_catalog();
        let entity_id = make_entity(&cat, "job-tie");
        let s1 = make_storage(&cat, entity_id, "vol-1");
        let s2 = make_storage(&cat, entity_id, "vol-2");
        add_file_named(&cat, entity_id, s1, "/y", 1, 100);
        add_file_named(&cat, entity_id, s2, "/y", 1, 100);

        let newest = cat.find_newest_by_name("/y").unwrap();
        let e1 = cat
            .handle()
            .conn()
            .query_row(
                "SELECT e.id FROM entries e JOIN entryFragments ef ON ef.entryId = e.id WHERE ef.storageId = ?1",
                [s1],
                |r| r.get::<_, i64>(0),
            )
            .unwrap();
        let e2 = cat
            .handle()
            .conn()
            .query_row(
                "SELECT e.id FROM entries e JOIN entryFragments ef ON ef.entryId = e.id WHERE ef.storageId = ?1",
                [s2],
                |r| r.get::<_, i64>(0),
            )
            .unwrap();
        assert_eq!(newest.entry_id, e1.max(e2));
    }

    /// §8 boundary: adding >= SINGLE_STEP_PURGE_LIMIT fragments to a
    /// storage and then deleting it must leave no referential errors and
    /// an empty fragment set, even though the purge runs in bounded
    /// batches.
    #[test]
    fn deleting_storage_with_more_than_one_purge_batch_of_fragments_leaves_no_orphans() {
        let (_dir, cat) = open_catalog();
        let entity_id = make_entity(&cat, "job-bulk");
        let storage_id = make_storage(&cat, entity_id, "vol-bulk");

        let count = (purge::SINGLE_STEP_PURGE_LIMIT + 10) as usize;
        for i in 0..count {
            add_file_named(&cat, entity_id, storage_id, &format!("/bulk/{i}"), 1, i as i64);
        }

        cat.delete_storage(storage_id).unwrap();
        cat.clear_storage(storage_id, Duration::from_millis(10)).unwrap();
        cat.purge_storage(storage_id, Duration::from_millis(10)).unwrap();

        assert!(matches!(cat.find_storage_by_id(storage_id), Err(CatalogError::NotFound)));

        let orphan_fragments: i64 = cat
            .handle()
            .conn()
            .query_row("SELECT COUNT(*) FROM entryFragments WHERE storageId = ?1", [storage_id], |r| r.get(0))
            .unwrap();
        assert_eq!(orphan_fragments, 0);

        let surviving_entries: i64 = cat
            .handle()
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM entries e \
                 WHERE e.name LIKE '/bulk/%' \
                 AND NOT EXISTS (SELECT 1 FROM entryFragments ef WHERE ef.entryId = e.id)",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(surviving_entries, 0, "entries with no surviving fragment must be purged too");
    }

    /// §8 invariant / scenario 5: a locked entity is never purged
    /// regardless of emptiness, and becomes eligible once unlocked.
    #[test]
    fn locked_entity_survives_prune_until_unlocked() {
        let (_dir, cat) = open_catalog();
        let entity_id = make_entity(&cat, "job-locked");
        let storage_id = make_storage(&cat, entity_id, "vol-locked");
        cat.lock_entity(entity_id).unwrap();

        cat.delete_storage(storage_id).unwrap();
        cat.clear_storage(storage_id, Duration::from_millis(10)).unwrap();
        cat.purge_storage(storage_id, Duration::from_millis(10)).unwrap();
        assert!(!cat.prune_entity(entity_id, Duration::from_millis(10)).unwrap());
        assert!(cat.find_entity(entity_id).is_ok(), "locked entity must survive prune_entity");

        cat.unlock_entity(entity_id).unwrap();
        let pruned = cat.prune_entity(entity_id, Duration::from_millis(10)).unwrap();
        assert!(pruned);
        assert!(matches!(cat.find_entity(entity_id), Err(CatalogError::NotFound)));
    }

    /// §8 round-trip: `update_storage_infos` is idempotent.
    #[test]
    fn update_storage_infos_is_idempotent() {
        let (_dir, cat) = open_catalog();
        let entity_id = make_entity(&cat, "job-idem");
        let storage_id = make_storage(&cat, entity_id, "vol-idem");

        cat.update_storage_infos(storage_id, 42, State::Ok, 99, "").unwrap();
        let first = cat.find_storage_by_id(storage_id).unwrap();
        cat.update_storage_infos(storage_id, 42, State::Ok, 99, "").unwrap();
        let second = cat.find_storage_by_id(storage_id).unwrap();
        assert_eq!(first, second);
    }

    /// §8 invariant: aggregates of an entity equal the sum over its
    /// storages' aggregates once every storage is recomputed.
    #[test]
    fn entity_aggregates_equal_sum_over_its_storages() {
        let (_dir, cat) = open_catalog();
        let entity_id = make_entity(&cat, "job-sum");
        let s1 = make_storage(&cat, entity_id, "vol-a");
        let s2 = make_storage(&cat, entity_id, "vol-b");
        add_file_named(&cat, entity_id, s1, "/a", 100, 1);
        add_file_named(&cat, entity_id, s2, "/b", 200, 2);

        let agg1 = cat.recompute_storage_aggregates(s1).unwrap();
        let agg2 = cat.recompute_storage_aggregates(s2).unwrap();
        let entity_agg = cat.recompute_entity_aggregates(entity_id).unwrap();

        assert_eq!(entity_agg.entry_count, agg1.entry_count + agg2.entry_count);
        assert_eq!(entity_agg.entry_size, agg1.entry_size + agg2.entry_size);
    }
}
