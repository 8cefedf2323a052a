//! Purge engine (§4.6) — the hardest algorithm in the crate.
//!
//! Removes rows belonging to a storage (or matching an arbitrary
//! filter) without ever blocking foreground work for more than one
//! batch. Every public entry point here takes an
//! [`bic_store::InterruptScope`] so it can yield between batches.

use std::time::Duration;

use bic_store::InterruptScope;
use rusqlite::params;
use tracing::info;

use crate::aggregates::{recompute_entity_aggregates, recompute_storage_aggregates};
use crate::error::Result;
use crate::newest::remove_from_newest;

/// Default rows deleted per batch (§6 tunables).
pub const SINGLE_STEP_PURGE_LIMIT: i64 = 4096;

/// Default yield budget between batches (§6 tunables: inter-batch yield).
pub const DEFAULT_INTERRUPT_WAIT: Duration = Duration::from_secs(2);

/// Bounded-batch delete (§4.6): repeatedly deletes up to `limit` rows
/// matching `where_clause` from `table`, yielding between batches.
/// Returns `(total_deleted, drained)` where `drained` is `false` if
/// interruption stopped the loop before the filter was exhausted.
pub fn purge(
    scope: &InterruptScope<'_>,
    table: &str,
    where_clause: &str,
    params: &[&dyn rusqlite::ToSql],
    limit: i64,
    max_wait: Duration,
) -> Result<(u64, bool)> {
    let conn = scope.conn();
    let mut total = 0u64;
    loop {
        let sql = format!(
            "DELETE FROM {table} WHERE rowid IN (SELECT rowid FROM {table} WHERE {where_clause} LIMIT {limit})"
        );
        let deleted = conn.execute(&sql, params)? as u64;
        total += deleted;
        if deleted == 0 {
            return Ok((total, true));
        }
        if scope.interrupt_operation(max_wait).is_err() {
            return Ok((total, false));
        }
    }
}

/// Collects every entry id owned by `storage_id`, across fragments and
/// the non-fragmenting kinds (§4.6 step 1).
fn collect_owned_entry_ids(conn: &rusqlite::Connection, storage_id: i64) -> Result<Vec<i64>> {
    let mut ids = std::collections::BTreeSet::new();
    let mut collect = |sql: &str| -> Result<()> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![storage_id], |r| r.get::<_, i64>(0))?;
        for row in rows {
            ids.insert(row?);
        }
        Ok(())
    };
    collect("SELECT DISTINCT entryId FROM entryFragments WHERE storageId = ?1")?;
    collect("SELECT entryId FROM directoryEntries WHERE storageId = ?1")?;
    collect("SELECT entryId FROM linkEntries WHERE storageId = ?1")?;
    collect("SELECT entryId FROM specialEntries WHERE storageId = ?1")?;
    Ok(ids.into_iter().collect())
}

/// Chunk size for `entryId IN (...)` statements (§4.6 step 3: "each
/// chunk is a single IN(...) statement to bound parser cost").
const ID_CHUNK_SIZE: usize = 512;

fn id_in_clause(ids: &[i64]) -> String {
    let joined = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("({joined})")
}

/// Clears every row belonging to `storage_id`, in the exact order
/// required to preserve referential closure (§4.6).
pub fn clear_storage(scope: &InterruptScope<'_>, storage_id: i64, max_wait: Duration) -> Result<u64> {
    let conn = scope.conn();
    let mut total_deleted = 0u64;

    // Step 1: collect owned entry ids.
    let entry_ids = collect_owned_entry_ids(conn, storage_id)?;

    // Step 6, run ahead of steps 2-5: remove_from_newest finds the names
    // owned by this storage by joining entries to entryFragments/
    // directoryEntries/linkEntries/specialEntries WHERE storageId, so it
    // must run while those rows still exist. find_newest_candidate
    // already excludes deletedFlag=1 storages, so running this before
    // the storage's own rows are purged is still correct (the storage
    // itself is not yet gone from `storages`, but its rows are what
    // makes a name "owned" here).
    remove_from_newest(scope, storage_id, max_wait)?;

    // Step 2: purge fragments for this storage.
    let (n, _) = purge(
        scope,
        "entryFragments",
        "storageId = ?1",
        &[&storage_id],
        SINGLE_STEP_PURGE_LIMIT,
        max_wait,
    )?;
    total_deleted += n;

    // Steps 3-5: purge FTS projections, type-specific rows, and entry
    // rows, chunked by id.
    for chunk in entry_ids.chunks(ID_CHUNK_SIZE) {
        let in_clause = id_in_clause(chunk);

        conn.execute(
            &format!("DELETE FROM FTS_entries WHERE rowid IN {in_clause}"),
            [],
        )?;

        // file/image/hardlink rows only if no surviving fragment anywhere.
        conn.execute(
            &format!(
                "DELETE FROM fileEntries WHERE entryId IN {in_clause} \
                 AND NOT EXISTS (SELECT 1 FROM entryFragments ef WHERE ef.entryId = fileEntries.entryId)"
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "DELETE FROM imageEntries WHERE entryId IN {in_clause} \
                 AND NOT EXISTS (SELECT 1 FROM entryFragments ef WHERE ef.entryId = imageEntries.entryId)"
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "DELETE FROM hardlinkEntries WHERE entryId IN {in_clause} \
                 AND NOT EXISTS (SELECT 1 FROM entryFragments ef WHERE ef.entryId = hardlinkEntries.entryId)"
            ),
            [],
        )?;

        conn.execute(
            &format!("DELETE FROM directoryEntries WHERE storageId = ?1 AND entryId IN {in_clause}"),
            params![storage_id],
        )?;
        conn.execute(
            &format!("DELETE FROM linkEntries WHERE storageId = ?1 AND entryId IN {in_clause}"),
            params![storage_id],
        )?;
        conn.execute(
            &format!("DELETE FROM specialEntries WHERE storageId = ?1 AND entryId IN {in_clause}"),
            params![storage_id],
        )?;

        // Step 5: purge Entry rows that no longer have any surviving
        // fragment/sub-row anywhere.
        conn.execute(
            &format!(
                "DELETE FROM entries WHERE id IN {in_clause} \
                 AND NOT EXISTS (SELECT 1 FROM entryFragments ef WHERE ef.entryId = entries.id) \
                 AND NOT EXISTS (SELECT 1 FROM directoryEntries de WHERE de.entryId = entries.id) \
                 AND NOT EXISTS (SELECT 1 FROM linkEntries le WHERE le.entryId = entries.id) \
                 AND NOT EXISTS (SELECT 1 FROM specialEntries se WHERE se.entryId = entries.id)"
            ),
            [],
        )?;

        total_deleted += chunk.len() as u64;
        if scope.interrupt_operation(max_wait).is_err() {
            break;
        }
    }

    // Step 7: zero this storage's aggregates and recompute the parent entity.
    recompute_storage_aggregates(conn, storage_id)?;
    let entity_id: i64 = conn.query_row(
        "SELECT entityId FROM storages WHERE id = ?1",
        params![storage_id],
        |r| r.get(0),
    )?;
    recompute_entity_aggregates(conn, entity_id)?;

    info!(storage_id, total_deleted, "clear_storage finished");
    Ok(total_deleted)
}

/// Strong deletion: clears the storage, then removes its FTS and row
/// entries (§4.6 "purging a storage").
pub fn purge_storage(scope: &InterruptScope<'_>, storage_id: i64, max_wait: Duration) -> Result<()> {
    clear_storage(scope, storage_id, max_wait)?;
    let conn = scope.conn();
    conn.execute("DELETE FROM FTS_storages WHERE rowid = ?1", params![storage_id])?;
    conn.execute("DELETE FROM storages WHERE id = ?1", params![storage_id])?;
    info!(storage_id, "storage purged");
    Ok(())
}

/// Deletes `storage_id` only if it's in state `ok` and empty (§4.6
/// "pruning"). Cascades upward by pruning the parent entity after a
/// successful removal.
pub fn prune_storage(scope: &InterruptScope<'_>, storage_id: i64, max_wait: Duration) -> Result<bool> {
    let conn = scope.conn();
    let row: Option<(String, i64, i64)> = conn
        .query_row(
            "SELECT state, totalEntryCount, entityId FROM storages WHERE id = ?1",
            params![storage_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .ok();
    let Some((state, entry_count, entity_id)) = row else {
        return Ok(false);
    };
    if state != "OK" || entry_count != 0 {
        return Ok(false);
    }
    purge_storage(scope, storage_id, max_wait)?;
    prune_entity(scope, entity_id, max_wait)?;
    Ok(true)
}

/// Deletes `entity_id` only if unlocked, not the default entity, and
/// empty (§4.6, §3 invariant 6).
pub fn prune_entity(scope: &InterruptScope<'_>, entity_id: i64, max_wait: Duration) -> Result<bool> {
    let conn = scope.conn();
    if entity_id == bic_types::IndexId::DEFAULT_ENTITY {
        return Ok(false);
    }
    let row: Option<(i64, i64, i64)> = conn
        .query_row(
            "SELECT lockedCount, totalEntryCount, \
                    (SELECT COUNT(*) FROM storages WHERE entityId = entities.id) \
             FROM entities WHERE id = ?1",
            params![entity_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .ok();
    let Some((locked_count, entry_count, storage_count)) = row else {
        return Ok(false);
    };
    if locked_count > 0 || entry_count != 0 || storage_count != 0 {
        return Ok(false);
    }
    let uuid_id: i64 = conn.query_row(
        "SELECT uuidId FROM entities WHERE id = ?1",
        params![entity_id],
        |r| r.get(0),
    )?;
    conn.execute("DELETE FROM entities WHERE id = ?1", params![entity_id])?;
    info!(entity_id, "entity pruned");
    prune_uuid(scope, uuid_id)?;
    Ok(true)
}

/// Deletes `uuid_id` only if it has no remaining entities (§4.6, §3
/// invariant 5/6).
pub fn prune_uuid(scope: &InterruptScope<'_>, uuid_id: i64) -> Result<bool> {
    let conn = scope.conn();
    let remaining: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entities WHERE uuidId = ?1",
        params![uuid_id],
        |r| r.get(0),
    )?;
    if remaining != 0 {
        return Ok(false);
    }
    conn.execute("DELETE FROM FTS_uuids WHERE rowid = ?1", params![uuid_id])?;
    conn.execute("DELETE FROM uuids WHERE id = ?1", params![uuid_id])?;
    info!(uuid_id, "uuid pruned");
    Ok(true)
}

/// User-visible `delete_storage` (§4.6 "deletion policy"): marks the
/// storage deleted, decrements the parent entity's aggregates by the
/// storage's stored totals, prunes the entity if it becomes empty, and
/// signals the worker. Does not reclaim any rows — that's the worker's
/// job via [`clear_storage`]/[`purge_storage`].
pub fn delete_storage(
    scope: &InterruptScope<'_>,
    ctx: &bic_concurrency::EngineContext,
    storage_id: i64,
) -> Result<()> {
    let conn = scope.conn();
    let (entity_id, agg): (i64, crate::model::Aggregates) = {
        let row = conn.query_row(
            "SELECT entityId, totalEntryCount, totalEntrySize, totalFileCount, totalFileSize, \
                    totalImageCount, totalImageSize, totalDirectoryCount, totalLinkCount, \
                    totalHardlinkCount, totalHardlinkSize, totalSpecialCount \
             FROM storages WHERE id = ?1",
            params![storage_id],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    crate::model::Aggregates {
                        entry_count: r.get::<_, i64>(1)? as u64,
                        entry_size: r.get::<_, i64>(2)? as u64,
                        file_count: r.get::<_, i64>(3)? as u64,
                        file_size: r.get::<_, i64>(4)? as u64,
                        image_count: r.get::<_, i64>(5)? as u64,
                        image_size: r.get::<_, i64>(6)? as u64,
                        directory_count: r.get::<_, i64>(7)? as u64,
                        link_count: r.get::<_, i64>(8)? as u64,
                        hardlink_count: r.get::<_, i64>(9)? as u64,
                        hardlink_size: r.get::<_, i64>(10)? as u64,
                        special_count: r.get::<_, i64>(11)? as u64,
                        ..Default::default()
                    },
                ))
            },
        )?;
        row
    };

    conn.execute(
        "UPDATE storages SET deletedFlag = 1 WHERE id = ?1",
        params![storage_id],
    )?;
    conn.execute(
        "UPDATE entities SET \
            totalEntryCount = MAX(totalEntryCount - ?2, 0), \
            totalEntrySize = MAX(totalEntrySize - ?3, 0), \
            totalFileCount = MAX(totalFileCount - ?4, 0), \
            totalFileSize = MAX(totalFileSize - ?5, 0), \
            totalImageCount = MAX(totalImageCount - ?6, 0), \
            totalImageSize = MAX(totalImageSize - ?7, 0), \
            totalDirectoryCount = MAX(totalDirectoryCount - ?8, 0), \
            totalLinkCount = MAX(totalLinkCount - ?9, 0), \
            totalHardlinkCount = MAX(totalHardlinkCount - ?10, 0), \
            totalHardlinkSize = MAX(totalHardlinkSize - ?11, 0), \
            totalSpecialCount = MAX(totalSpecialCount - ?12, 0) \
         WHERE id = ?1",
        params![
            entity_id,
            agg.entry_count as i64,
            agg.entry_size as i64,
            agg.file_count as i64,
            agg.file_size as i64,
            agg.image_count as i64,
            agg.image_size as i64,
            agg.directory_count as i64,
            agg.link_count as i64,
            agg.hardlink_count as i64,
            agg.hardlink_size as i64,
            agg.special_count as i64,
        ],
    )?;

    let entry_count: i64 = conn.query_row(
        "SELECT totalEntryCount FROM entities WHERE id = ?1",
        params![entity_id],
        |r| r.get(0),
    )?;
    let storage_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM storages WHERE entityId = ?1 AND deletedFlag = 0",
        params![entity_id],
        |r| r.get(0),
    )?;
    if entry_count == 0 && storage_count == 0 {
        prune_entity(scope, entity_id, DEFAULT_INTERRUPT_WAIT)?;
    }

    ctx.raise_trigger();
    info!(storage_id, entity_id, "storage marked deleted");
    Ok(())
}
