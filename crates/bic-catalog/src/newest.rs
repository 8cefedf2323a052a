//! Newest-version index maintenance (§4.5).
//!
//! Maintains `entriesNewest`, the "latest entry by `time-last-changed`
//! for each name still reachable through a non-deleted storage"
//! projection (§3 invariant 2). Both passes below are chunked and
//! yield via `interrupt_operation` between batches so the operator
//! sees no stalls during a large ingest or a large delete.

use bic_store::InterruptScope;
use rusqlite::params;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::Result;

/// Rows processed per batch before yielding (§4.5: "both passes are
/// chunked").
pub const NEWEST_BATCH_SIZE: i64 = 1024;

/// On ingest: for each distinct name introduced by `storage_id`, upsert
/// `entriesNewest` if the incoming entry's `time_last_changed` exceeds
/// the current newest (ties broken by the higher entry id).
pub fn add_to_newest(scope: &InterruptScope<'_>, storage_id: i64, max_wait: Duration) -> Result<u64> {
    let conn = scope.conn();
    let names: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT e.name FROM entries e \
             JOIN entryFragments ef ON ef.entryId = e.id \
             WHERE ef.storageId = ?1 \
             UNION \
             SELECT DISTINCT e.name FROM entries e \
             JOIN directoryEntries de ON de.entryId = e.id \
             WHERE de.storageId = ?1 \
             UNION \
             SELECT DISTINCT e.name FROM entries e \
             JOIN linkEntries le ON le.entryId = e.id \
             WHERE le.storageId = ?1 \
             UNION \
             SELECT DISTINCT e.name FROM entries e \
             JOIN specialEntries se ON se.entryId = e.id \
             WHERE se.storageId = ?1",
        )?;
        let rows = stmt.query_map(params![storage_id], |r| r.get::<_, String>(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };

    let mut updated = 0u64;
    for (i, chunk) in names.chunks(NEWEST_BATCH_SIZE as usize).enumerate() {
        for name in chunk {
            if upsert_newest_for_name(conn, name, storage_id)? {
                updated += 1;
            }
        }
        debug!(storage_id, batch = i, "add_to_newest batch complete");
        scope.interrupt_operation(max_wait)?;
    }
    info!(storage_id, names = names.len(), updated, "add_to_newest finished");
    Ok(updated)
}

/// Finds the best (highest time_last_changed, tie-broken by entry id)
/// candidate entry for `name` among non-deleted storages, and writes it
/// to `entriesNewest` if it beats the current row (or there is none).
fn upsert_newest_for_name(conn: &rusqlite::Connection, name: &str, _hint_storage_id: i64) -> Result<bool> {
    let candidate = find_newest_candidate(conn, name)?;
    let Some(candidate) = candidate else {
        // Nothing live references this name anymore; make sure no stale row remains.
        conn.execute("DELETE FROM entriesNewest WHERE name = ?1", params![name])?;
        return Ok(false);
    };

    let current: Option<(i64, i64)> = conn
        .query_row(
            "SELECT entryId, timeLastChanged FROM entriesNewest WHERE name = ?1",
            params![name],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .ok();

    let should_write = match current {
        None => true,
        Some((cur_id, cur_tlc)) => {
            candidate.time_last_changed > cur_tlc
                || (candidate.time_last_changed == cur_tlc && candidate.entry_id > cur_id)
        }
    };

    if should_write {
        conn.execute(
            "INSERT INTO entriesNewest(name, entryId, uuidId, entityId, type, \
                timeLastAccess, timeModified, timeLastChanged, userId, groupId, permission, size) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
             ON CONFLICT(name) DO UPDATE SET \
                entryId = excluded.entryId, uuidId = excluded.uuidId, entityId = excluded.entityId, \
                type = excluded.type, timeLastAccess = excluded.timeLastAccess, \
                timeModified = excluded.timeModified, timeLastChanged = excluded.timeLastChanged, \
                userId = excluded.userId, groupId = excluded.groupId, permission = excluded.permission, \
                size = excluded.size",
            params![
                name,
                candidate.entry_id,
                candidate.uuid_id,
                candidate.entity_id,
                candidate.kind,
                candidate.time_last_access,
                candidate.time_modified,
                candidate.time_last_changed,
                candidate.user_id,
                candidate.group_id,
                candidate.permission,
                candidate.size,
            ],
        )?;
    }
    Ok(should_write)
}

/// Per-name entry point used by the mutation surface (§4.9) when a
/// single entry is added outside of a whole-storage batch: re-evaluates
/// just this one name against §4.5's tie-break rule. Returns whether
/// the row changed.
pub fn upsert_newest_for_single(conn: &rusqlite::Connection, name: &str) -> Result<bool> {
    upsert_newest_for_name(conn, name, 0)
}

struct Candidate {
    entry_id: i64,
    uuid_id: i64,
    entity_id: i64,
    kind: String,
    time_last_access: i64,
    time_modified: i64,
    time_last_changed: i64,
    user_id: i64,
    group_id: i64,
    permission: i64,
    size: i64,
}

/// Scans every non-deleted storage for the best entry with this name.
/// Ties on `timeLastChanged` break toward the higher entry id (§4.5).
fn find_newest_candidate(conn: &rusqlite::Connection, name: &str) -> Result<Option<Candidate>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.uuidId, e.entityId, e.type, \
                e.timeLastAccess, e.timeModified, e.timeLastChanged, \
                e.userId, e.groupId, e.permission, e.size \
         FROM entries e \
         WHERE e.name = ?1 \
         AND ( \
            EXISTS (SELECT 1 FROM entryFragments ef JOIN storages s ON s.id = ef.storageId \
                    WHERE ef.entryId = e.id AND s.deletedFlag = 0) \
            OR EXISTS (SELECT 1 FROM directoryEntries de JOIN storages s ON s.id = de.storageId \
                    WHERE de.entryId = e.id AND s.deletedFlag = 0) \
            OR EXISTS (SELECT 1 FROM linkEntries le JOIN storages s ON s.id = le.storageId \
                    WHERE le.entryId = e.id AND s.deletedFlag = 0) \
            OR EXISTS (SELECT 1 FROM specialEntries se JOIN storages s ON s.id = se.storageId \
                    WHERE se.entryId = e.id AND s.deletedFlag = 0) \
         ) \
         ORDER BY e.timeLastChanged DESC, e.id DESC \
         LIMIT 1",
    )?;
    let mut rows = stmt.query(params![name])?;
    if let Some(row) = rows.next()? {
        Ok(Some(Candidate {
            entry_id: row.get(0)?,
            uuid_id: row.get(1)?,
            entity_id: row.get(2)?,
            kind: row.get(3)?,
            time_last_access: row.get(4)?,
            time_modified: row.get(5)?,
            time_last_changed: row.get(6)?,
            user_id: row.get(7)?,
            group_id: row.get(8)?,
            permission: row.get(9)?,
            size: row.get(10)?,
        }))
    } else {
        Ok(None)
    }
}

/// On storage removal: for each name owned by `storage_id`, drop the
/// `entriesNewest` row (if it pointed here) then rescan remaining
/// non-deleted storages for the new maximum and reinsert (§4.5).
pub fn remove_from_newest(scope: &InterruptScope<'_>, storage_id: i64, max_wait: Duration) -> Result<u64> {
    let conn = scope.conn();
    let names: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT e.name FROM entries e \
             JOIN entryFragments ef ON ef.entryId = e.id WHERE ef.storageId = ?1 \
             UNION \
             SELECT DISTINCT e.name FROM entries e \
             JOIN directoryEntries de ON de.entryId = e.id WHERE de.storageId = ?1 \
             UNION \
             SELECT DISTINCT e.name FROM entries e \
             JOIN linkEntries le ON le.entryId = e.id WHERE le.storageId = ?1 \
             UNION \
             SELECT DISTINCT e.name FROM entries e \
             JOIN specialEntries se ON se.entryId = e.id WHERE se.storageId = ?1",
        )?;
        let rows = stmt.query_map(params![storage_id], |r| r.get::<_, String>(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };

    let mut reshuffled = 0u64;
    for (i, chunk) in names.chunks(NEWEST_BATCH_SIZE as usize).enumerate() {
        for name in chunk {
            conn.execute(
                "DELETE FROM entriesNewest WHERE name = ?1",
                params![name],
            )?;
            if upsert_newest_for_name(conn, name, storage_id)? {
                reshuffled += 1;
            } else {
                // find_newest_candidate found nothing; entriesNewest row
                // for this name is gone, which is correct.
            }
        }
        debug!(storage_id, batch = i, "remove_from_newest batch complete");
        scope.interrupt_operation(max_wait)?;
    }
    info!(storage_id, names = names.len(), reshuffled, "remove_from_newest finished");
    Ok(reshuffled)
}
