//! Initial cleanup pass (§4.7 step 3).
//!
//! Runs once, right after legacy import, before the main loop starts.
//! Every step here is best-effort: a failure is logged and the pass
//! moves on to the next step rather than aborting startup (§7:
//! "initial-cleanup steps log and continue").

use rusqlite::params;
use tracing::{debug, warn};

use bic_catalog::Catalog;

/// Tally of rows touched by each cleanup step, useful for an operator
/// report and for tests.
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct CleanupReport {
    pub duplicate_meta_rows_removed: u64,
    pub update_rows_reverted: u64,
    pub create_rows_purged: u64,
    pub empty_named_storages_deleted: u64,
    pub entity_locks_reset: u64,
    pub empty_job_uuids_deleted: u64,
    /// Storages pruned by the final sweep. Pruning an entity cascades to
    /// its now-empty uuid automatically (see [`bic_catalog::purge::prune_entity`]),
    /// so there is no separate uuid counter here.
    pub storages_pruned: u64,
    pub entities_pruned: u64,
}

/// Runs every step of the initial cleanup pass (§4.7 step 3) against
/// `catalog`, logging and continuing past any individual failure.
pub fn run_initial_cleanup(catalog: &Catalog) -> CleanupReport {
    let mut report = CleanupReport::default();
    let conn = catalog.handle().conn();

    match dedupe_meta_rows(conn) {
        Ok(n) => report.duplicate_meta_rows_removed = n,
        Err(e) => warn!(error = %e, "initial cleanup: dedupe meta rows failed"),
    }

    match revert_incomplete_updates(conn) {
        Ok(n) => report.update_rows_reverted = n,
        Err(e) => warn!(error = %e, "initial cleanup: revert incomplete updates failed"),
    }

    match purge_incomplete_creates(conn) {
        Ok(n) => report.create_rows_purged = n,
        Err(e) => warn!(error = %e, "initial cleanup: purge incomplete creates failed"),
    }

    match delete_empty_named_storages(conn) {
        Ok(n) => report.empty_named_storages_deleted = n,
        Err(e) => warn!(error = %e, "initial cleanup: delete empty-named storages failed"),
    }

    match reset_entity_locks(conn) {
        Ok(n) => report.entity_locks_reset = n,
        Err(e) => warn!(error = %e, "initial cleanup: reset entity locks failed"),
    }

    match delete_empty_job_uuids(conn) {
        Ok(n) => report.empty_job_uuids_deleted = n,
        Err(e) => warn!(error = %e, "initial cleanup: delete empty job uuids failed"),
    }

    prune_everything_empty(catalog, &mut report);

    debug!(?report, "initial cleanup finished");
    report
}

fn dedupe_meta_rows(conn: &rusqlite::Connection) -> rusqlite::Result<u64> {
    Ok(conn.execute(
        "DELETE FROM meta WHERE rowid NOT IN (SELECT MIN(rowid) FROM meta GROUP BY name)",
        [],
    )? as u64)
}

/// Rows left in `UPDATE` when the process died mid-check revert to
/// `UPDATE_REQUESTED` so the worker picks them up again (§4.7 state
/// machine: "On initial cleanup, rows in update revert to
/// update-requested").
fn revert_incomplete_updates(conn: &rusqlite::Connection) -> rusqlite::Result<u64> {
    Ok(conn.execute(
        "UPDATE storages SET state = 'UPDATE_REQUESTED' WHERE state = 'UPDATE'",
        [],
    )? as u64)
}

/// Rows left in `CREATE` never finished being written and are purged
/// outright (§4.7: "rows in create are purged; they were never
/// completed").
fn purge_incomplete_creates(conn: &rusqlite::Connection) -> rusqlite::Result<u64> {
    Ok(conn.execute("DELETE FROM storages WHERE state = 'CREATE'", [])? as u64)
}

fn delete_empty_named_storages(conn: &rusqlite::Connection) -> rusqlite::Result<u64> {
    Ok(conn.execute("DELETE FROM storages WHERE name = ''", [])? as u64)
}

fn reset_entity_locks(conn: &rusqlite::Connection) -> rusqlite::Result<u64> {
    Ok(conn.execute(
        "UPDATE entities SET lockedCount = 0 WHERE lockedCount != 0",
        [],
    )? as u64)
}

fn delete_empty_job_uuids(conn: &rusqlite::Connection) -> rusqlite::Result<u64> {
    Ok(conn.execute("DELETE FROM uuids WHERE jobUuid = ''", params![])? as u64)
}

/// Sweeps every storage/entity/uuid that is now empty as a result of the
/// steps above, in child-to-parent order so pruning cascades correctly.
fn prune_everything_empty(catalog: &Catalog, report: &mut CleanupReport) {
    let storage_ids: Vec<i64> = {
        let conn = catalog.handle().conn();
        let mut stmt = match conn.prepare("SELECT id FROM storages WHERE deletedFlag = 0") {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!(error = %e, "initial cleanup: could not list storages to prune");
                return;
            }
        };
        match stmt.query_map([], |r| r.get::<_, i64>(0)) {
            Ok(rows) => rows.flatten().collect(),
            Err(e) => {
                warn!(error = %e, "initial cleanup: could not list storages to prune");
                return;
            }
        }
    };

    for storage_id in storage_ids {
        match catalog.prune_storage(storage_id, crate::worker::DEFAULT_CLEANUP_WAIT) {
            Ok(true) => report.storages_pruned += 1,
            Ok(false) => {}
            Err(e) => warn!(storage_id, error = %e, "initial cleanup: prune_storage failed"),
        }
    }

    let entity_ids: Vec<i64> = {
        let conn = catalog.handle().conn();
        let mut stmt = match conn.prepare("SELECT id FROM entities WHERE deletedFlag = 0 AND id != 1") {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!(error = %e, "initial cleanup: could not list entities to prune");
                return;
            }
        };
        match stmt.query_map([], |r| r.get::<_, i64>(0)) {
            Ok(rows) => rows.flatten().collect(),
            Err(e) => {
                warn!(error = %e, "initial cleanup: could not list entities to prune");
                return;
            }
        }
    };

    for entity_id in entity_ids {
        match catalog.prune_entity(entity_id, crate::worker::DEFAULT_CLEANUP_WAIT) {
            Ok(true) => report.entities_pruned += 1,
            Ok(false) => {}
            Err(e) => warn!(entity_id, error = %e, "initial cleanup: prune_entity failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bic_concurrency::EngineContext;
    use bic_store::{BusyCallback, Handle, OpenFlags, OpenMode, RetryForever};
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
    fn reverts_update_state_and_purges_create_state() {
        let (_dir, cat) = open_catalog();
        let conn = cat.handle().conn();
        conn.execute(
            "INSERT INTO storages(entityId, uuidId, name, state) VALUES (1, 1, 'a', 'UPDATE')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO storages(entityId, uuidId, name, state) VALUES (1, 1, 'b', 'CREATE')",
            [],
        )
        .unwrap();

        let report = run_initial_cleanup(&cat);
        assert_eq!(report.update_rows_reverted, 1);
        assert_eq!(report.create_rows_purged, 1);

        let remaining: i64 = cat
            .handle()
            .conn()
            .query_row("SELECT COUNT(*) FROM storages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[test]
    fn dedupe_is_a_no_op_once_name_is_the_primary_key() {
        // `meta.name` is already a primary key in the current schema, so
        // this step only matters for catalogs carried over from a store
        // revision that lacked the constraint; here it should simply
        // report zero rows removed.
        let (_dir, cat) = open_catalog();
        let report = run_initial_cleanup(&cat);
        assert_eq!(report.duplicate_meta_rows_removed, 0);
    }
}
