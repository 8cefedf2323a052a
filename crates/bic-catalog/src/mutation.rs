//! Mutation surface (§4.9).
//!
//! Every function here runs against a plain `&Connection` — callers are
//! expected to invoke these from inside a [`bic_store::interruptable_scope`]
//! (see the root crate's facade), the same way [`crate::aggregates`] and
//! [`crate::newest`] do. Functions that need to cooperate with the
//! purge engine's yielding (entity/uuid pruning after an assign) take an
//! explicit [`bic_store::InterruptScope`] instead.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use bic_types::{ArchiveType, EntryKind, Mode, State};

use crate::aggregates::{recompute_entity_aggregates, recompute_storage_aggregates};
use crate::error::Result;
use crate::newest::upsert_newest_for_single;

/// Finds the uuid row for `job_uuid`, creating it if absent (§3 "created
/// on first ingest for a job UUID").
pub fn new_uuid(conn: &Connection, job_uuid: &str) -> Result<i64> {
    if let Some(id) = conn
        .query_row("SELECT id FROM uuids WHERE jobUuid = ?1", [job_uuid], |r| r.get::<_, i64>(0))
        .optional()?
    {
        return Ok(id);
    }
    conn.execute("INSERT INTO uuids(jobUuid) VALUES (?1)", [job_uuid])?;
    let id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO FTS_uuids(rowid, jobUuid) VALUES (?1, ?2)",
        params![id, job_uuid],
    )?;
    info!(uuid_id = id, job_uuid, "uuid created");
    Ok(id)
}

pub struct NewEntity<'a> {
    pub job_uuid: &'a str,
    pub schedule_uuid: &'a str,
    pub host_name: &'a str,
    pub user_name: &'a str,
    pub archive_type: ArchiveType,
    pub created: i64,
    pub locked: bool,
}

/// Creates a new run of `job_uuid` (§3 "created when a backup run
/// starts"), creating the uuid row first if this is the job's first
/// run.
pub fn new_entity(conn: &Connection, p: NewEntity<'_>) -> Result<i64> {
    let uuid_id = new_uuid(conn, p.job_uuid)?;
    conn.execute(
        "INSERT INTO entities(jobUuid, uuidId, scheduleUuid, hostName, userName, archiveType, created, lockedCount, deletedFlag) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
        params![
            p.job_uuid,
            uuid_id,
            p.schedule_uuid,
            p.host_name,
            p.user_name,
            p.archive_type.to_string(),
            p.created,
            if p.locked { 1 } else { 0 },
        ],
    )?;
    let id = conn.last_insert_rowid();
    info!(entity_id = id, uuid_id, "entity created");
    Ok(id)
}

/// Marks `entity_id` deleted and, if it is already empty and unlocked,
/// removes it immediately via [`crate::purge::prune_entity`] (§8
/// round-trip: `new_entity -> delete_entity -> new_entity` must yield a
/// distinct id).
pub fn delete_entity(scope: &bic_store::InterruptScope<'_>, entity_id: i64) -> Result<bool> {
    let conn = scope.conn();
    conn.execute("UPDATE entities SET deletedFlag = 1 WHERE id = ?1", [entity_id])?;
    crate::purge::prune_entity(scope, entity_id, crate::purge::DEFAULT_INTERRUPT_WAIT)
}

pub fn lock_entity(conn: &Connection, entity_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE entities SET lockedCount = lockedCount + 1 WHERE id = ?1",
        [entity_id],
    )?;
    Ok(())
}

/// Decrements the lock count, floored at zero (unlocking an already
/// unlocked entity is a no-op, not an error).
pub fn unlock_entity(conn: &Connection, entity_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE entities SET lockedCount = MAX(lockedCount - 1, 0) WHERE id = ?1",
        [entity_id],
    )?;
    Ok(())
}

pub struct NewStorage<'a> {
    pub entity_id: i64,
    pub host_name: &'a str,
    pub user_name: &'a str,
    pub name: &'a str,
    pub created: i64,
    pub size: i64,
    pub state: State,
    pub mode: Mode,
}

pub fn new_storage(conn: &Connection, p: NewStorage<'_>) -> Result<i64> {
    let uuid_id: i64 = conn.query_row("SELECT uuidId FROM entities WHERE id = ?1", [p.entity_id], |r| r.get(0))?;
    conn.execute(
        "INSERT INTO storages(entityId, uuidId, hostName, userName, name, created, size, state, mode, lastChecked, errorMessage, deletedFlag) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, '', 0)",
        params![
            p.entity_id,
            uuid_id,
            p.host_name,
            p.user_name,
            p.name,
            p.created,
            p.size,
            p.state.to_string(),
            p.mode.to_string(),
        ],
    )?;
    let id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO FTS_storages(rowid, name) VALUES (?1, ?2)",
        params![id, p.name],
    )?;
    info!(storage_id = id, entity_id = p.entity_id, "storage created");
    Ok(id)
}

/// Updates a storage's checked-in state (§8: must be idempotent — a
/// second call with identical arguments changes nothing observable).
pub fn update_storage_infos(
    conn: &Connection,
    storage_id: i64,
    size: i64,
    state: State,
    last_checked: i64,
    error_message: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE storages SET size = ?2, state = ?3, lastChecked = ?4, errorMessage = ?5 WHERE id = ?1",
        params![storage_id, size, state.to_string(), last_checked, error_message],
    )?;
    Ok(())
}

/// Common fields shared by every entry kind (§3 Entry, §4.9).
#[derive(Clone, Debug)]
pub struct AddEntryParams<'a> {
    pub entity_id: i64,
    pub uuid_id: i64,
    pub storage_id: i64,
    pub name: &'a str,
    pub time_last_access: i64,
    pub time_modified: i64,
    pub time_last_changed: i64,
    pub user_id: i64,
    pub group_id: i64,
    pub permission: i64,
    pub size: i64,
}

fn find_or_create_entry(conn: &Connection, kind: EntryKind, p: &AddEntryParams<'_>) -> Result<i64> {
    if let Some(id) = conn
        .query_row(
            "SELECT id FROM entries WHERE entityId = ?1 AND type = ?2 AND name = ?3",
            params![p.entity_id, kind.to_string(), p.name],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO entries(entityId, uuidId, type, name, timeLastAccess, timeModified, timeLastChanged, userId, groupId, permission, size) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            p.entity_id,
            p.uuid_id,
            kind.to_string(),
            p.name,
            p.time_last_access,
            p.time_modified,
            p.time_last_changed,
            p.user_id,
            p.group_id,
            p.permission,
            p.size,
        ],
    )?;
    let id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO FTS_entries(rowid, name) VALUES (?1, ?2)",
        params![id, p.name],
    )?;
    Ok(id)
}

/// Ancestor directory prefixes of `name`, nearest-parent last excluded
/// (the leaf itself is never its own ancestor). `/d/a` -> `["/d"]`;
/// `/x` (no parent) -> `[]`.
fn ancestor_prefixes(name: &str) -> Vec<String> {
    let trimmed = name.trim_start_matches('/');
    let mut segments: Vec<&str> = trimmed.split('/').collect();
    segments.pop();
    let mut prefixes = Vec::with_capacity(segments.len());
    let mut acc = String::new();
    for seg in segments {
        acc.push('/');
        acc.push_str(seg);
        prefixes.push(acc.clone());
    }
    prefixes
}

/// Bumps `DirectoryEntry.total_entry_count`/`total_entry_size` (and the
/// `*_newest` counterparts if `name` is currently the newest entry by
/// that name) for every ancestor of `name` that has a directory row in
/// `storage_id` (§4.9, §3 invariant 4).
fn bump_directory_ancestors(conn: &Connection, storage_id: i64, name: &str, size: i64) -> Result<()> {
    let is_newest: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM entriesNewest en JOIN entries e ON e.id = en.entryId WHERE e.name = ?1)",
        [name],
        |r| r.get(0),
    )?;
    for prefix in ancestor_prefixes(name) {
        let dir_entry_id: Option<i64> = conn
            .query_row(
                "SELECT de.entryId FROM directoryEntries de JOIN entries e ON e.id = de.entryId \
                 WHERE de.storageId = ?1 AND e.name = ?2",
                params![storage_id, prefix],
                |r| r.get(0),
            )
            .optional()?;
        let Some(dir_entry_id) = dir_entry_id else {
            continue;
        };
        if is_newest {
            conn.execute(
                "UPDATE directoryEntries SET \
                    totalEntryCount = totalEntryCount + 1, totalEntrySize = totalEntrySize + ?3, \
                    totalEntryCountNewest = totalEntryCountNewest + 1, totalEntrySizeNewest = totalEntrySizeNewest + ?3 \
                 WHERE storageId = ?1 AND entryId = ?2",
                params![storage_id, dir_entry_id, size],
            )?;
        } else {
            conn.execute(
                "UPDATE directoryEntries SET \
                    totalEntryCount = totalEntryCount + 1, totalEntrySize = totalEntrySize + ?3 \
                 WHERE storageId = ?1 AND entryId = ?2",
                params![storage_id, dir_entry_id, size],
            )?;
        }
    }
    Ok(())
}

/// Common tail of every add-entry call: refresh the newest-index entry
/// for this name, bump ancestor directories, and recompute the
/// storage's and entity's aggregates. The newest-index refresh must run
/// first: `bump_directory_ancestors` decides whether to bump the
/// `*_newest` counters by checking whether `name` is currently the
/// newest entry, and on a name's first insert that's only true once
/// `upsert_newest_for_single` has written its `entriesNewest` row.
/// Recomputing on every call keeps §3 invariant 3 trivially true after
/// each public call at the cost of O(rows) work per ingested entry; a
/// high-throughput ingest path would batch this the way §4.5's
/// whole-storage passes do.
fn finish_add(conn: &Connection, p: &AddEntryParams<'_>) -> Result<()> {
    upsert_newest_for_single(conn, p.name)?;
    bump_directory_ancestors(conn, p.storage_id, p.name, p.size)?;
    recompute_storage_aggregates(conn, p.storage_id)?;
    recompute_entity_aggregates(conn, p.entity_id)?;
    Ok(())
}

pub fn add_file(conn: &Connection, p: AddEntryParams<'_>, offset: i64, fragment_size: i64) -> Result<i64> {
    let entry_id = find_or_create_entry(conn, EntryKind::File, &p)?;
    conn.execute("INSERT OR IGNORE INTO fileEntries(entryId) VALUES (?1)", [entry_id])?;
    conn.execute(
        "INSERT INTO entryFragments(entryId, storageId, offset, size) VALUES (?1, ?2, ?3, ?4)",
        params![entry_id, p.storage_id, offset, fragment_size],
    )?;
    finish_add(conn, &p)?;
    Ok(entry_id)
}

pub fn add_image(
    conn: &Connection,
    p: AddEntryParams<'_>,
    file_system_type: &str,
    block_size: i64,
    offset: i64,
    fragment_size: i64,
) -> Result<i64> {
    let entry_id = find_or_create_entry(conn, EntryKind::Image, &p)?;
    conn.execute(
        "INSERT OR IGNORE INTO imageEntries(entryId, fileSystemType, blockSize, size) VALUES (?1, ?2, ?3, ?4)",
        params![entry_id, file_system_type, block_size, p.size],
    )?;
    conn.execute(
        "INSERT INTO entryFragments(entryId, storageId, offset, size) VALUES (?1, ?2, ?3, ?4)",
        params![entry_id, p.storage_id, offset, fragment_size],
    )?;
    finish_add(conn, &p)?;
    Ok(entry_id)
}

pub fn add_directory(conn: &Connection, p: AddEntryParams<'_>, path_name: &str) -> Result<i64> {
    let entry_id = find_or_create_entry(conn, EntryKind::Directory, &p)?;
    conn.execute(
        "INSERT OR IGNORE INTO directoryEntries(entryId, storageId, pathName, totalEntryCount, totalEntrySize, totalEntryCountNewest, totalEntrySizeNewest) \
         VALUES (?1, ?2, ?3, 0, 0, 0, 0)",
        params![entry_id, p.storage_id, path_name],
    )?;
    finish_add(conn, &p)?;
    Ok(entry_id)
}

pub fn add_link(conn: &Connection, p: AddEntryParams<'_>, destination_name: &str) -> Result<i64> {
    let entry_id = find_or_create_entry(conn, EntryKind::Link, &p)?;
    conn.execute(
        "INSERT OR IGNORE INTO linkEntries(entryId, storageId, destinationName) VALUES (?1, ?2, ?3)",
        params![entry_id, p.storage_id, destination_name],
    )?;
    finish_add(conn, &p)?;
    Ok(entry_id)
}

pub fn add_hardlink(conn: &Connection, p: AddEntryParams<'_>) -> Result<i64> {
    let entry_id = find_or_create_entry(conn, EntryKind::Hardlink, &p)?;
    conn.execute(
        "INSERT OR IGNORE INTO hardlinkEntries(entryId, size) VALUES (?1, ?2)",
        params![entry_id, p.size],
    )?;
    conn.execute(
        "INSERT INTO entryFragments(entryId, storageId, offset, size) VALUES (?1, ?2, 0, ?3)",
        params![entry_id, p.storage_id, p.size],
    )?;
    finish_add(conn, &p)?;
    Ok(entry_id)
}

pub fn add_special(
    conn: &Connection,
    p: AddEntryParams<'_>,
    special_type: &str,
    major: i64,
    minor: i64,
) -> Result<i64> {
    let entry_id = find_or_create_entry(conn, EntryKind::Special, &p)?;
    conn.execute(
        "INSERT OR IGNORE INTO specialEntries(entryId, storageId, specialType, major, minor) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![entry_id, p.storage_id, special_type, major, minor],
    )?;
    finish_add(conn, &p)?;
    Ok(entry_id)
}

pub fn skip_entry(conn: &Connection, entity_id: i64, storage_id: i64, name: &str, reason: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO skippedEntries(entityId, storageId, name, reason) VALUES (?1, ?2, ?3, ?4)",
        params![entity_id, storage_id, name, reason],
    )?;
    Ok(conn.last_insert_rowid())
}

#[allow(clippy::too_many_arguments)]
pub fn record_history(
    conn: &Connection,
    entity_id: i64,
    started: i64,
    duration: i64,
    entry_count: u64,
    entry_size: u64,
    error_count: u64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO history(entityId, started, duration, entryCount, entrySize, errorCount) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![entity_id, started, duration, entry_count as i64, entry_size as i64, error_count as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Moves a storage to a different entity (§4.9 "assign operations"),
/// rewriting the denormalized `entityId`/`uuidId` back-edges on the
/// storage and every entry it owns, then re-running the aggregate
/// maintainer on both the old and new parent entities.
pub fn assign_storage_to_entity(conn: &Connection, storage_id: i64, new_entity_id: i64) -> Result<()> {
    let old_entity_id: i64 = conn.query_row("SELECT entityId FROM storages WHERE id = ?1", [storage_id], |r| r.get(0))?;
    let new_uuid_id: i64 = conn.query_row("SELECT uuidId FROM entities WHERE id = ?1", [new_entity_id], |r| r.get(0))?;
    conn.execute(
        "UPDATE storages SET entityId = ?2, uuidId = ?3 WHERE id = ?1",
        params![storage_id, new_entity_id, new_uuid_id],
    )?;
    conn.execute(
        "UPDATE entries SET entityId = ?2, uuidId = ?3 WHERE id IN ( \
            SELECT entryId FROM entryFragments WHERE storageId = ?1 \
            UNION SELECT entryId FROM directoryEntries WHERE storageId = ?1 \
            UNION SELECT entryId FROM linkEntries WHERE storageId = ?1 \
            UNION SELECT entryId FROM specialEntries WHERE storageId = ?1)",
        params![storage_id, new_entity_id, new_uuid_id],
    )?;
    recompute_storage_aggregates(conn, storage_id)?;
    recompute_entity_aggregates(conn, old_entity_id)?;
    recompute_entity_aggregates(conn, new_entity_id)?;
    info!(storage_id, old_entity_id, new_entity_id, "storage reassigned");
    Ok(())
}

/// Moves an entity (and everything it owns) to a different job uuid
/// (§4.9), creating the destination uuid row if this is its first
/// entity.
pub fn assign_entity_to_uuid(conn: &Connection, entity_id: i64, new_job_uuid: &str) -> Result<()> {
    let new_uuid_id = new_uuid(conn, new_job_uuid)?;
    conn.execute(
        "UPDATE entities SET uuidId = ?2, jobUuid = ?3 WHERE id = ?1",
        params![entity_id, new_uuid_id, new_job_uuid],
    )?;
    conn.execute(
        "UPDATE storages SET uuidId = ?2 WHERE entityId = ?1",
        params![entity_id, new_uuid_id],
    )?;
    conn.execute(
        "UPDATE entries SET uuidId = ?2 WHERE entityId = ?1",
        params![entity_id, new_uuid_id],
    )?;
    info!(entity_id, new_uuid_id, "entity reassigned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestor_prefixes_of_top_level_name_is_empty() {
        assert!(ancestor_prefixes("/x").is_empty());
    }

    #[test]
    fn ancestor_prefixes_of_nested_name() {
        assert_eq!(ancestor_prefixes("/d/a"), vec!["/d".to_string()]);
        assert_eq!(
            ancestor_prefixes("/d/sub/a"),
            vec!["/d".to_string(), "/d/sub".to_string()]
        );
    }
}
