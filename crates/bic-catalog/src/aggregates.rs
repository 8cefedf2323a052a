//! Aggregate maintainer (§4.4).
//!
//! Recomputes per-storage and per-entity counts/sizes from the rows
//! that actually exist, for both the "all" and "newest" variants. Every
//! function here is idempotent and safe to call on partial/interrupted
//! state — it never assumes the aggregates it's about to overwrite were
//! consistent.

use rusqlite::Connection;
use tracing::warn;

use crate::error::Result;
use crate::model::Aggregates;

/// Clamps a `SUM`/`TOTAL` read that came back negative to zero, logging
/// at warn (§4.4, §9 open question: "preserve the clamp; log at warn").
fn clamp_nonneg(id_desc: &str, field: &str, value: f64) -> u64 {
    if value < 0.0 {
        warn!(id = id_desc, field, value, "aggregate read negative, clamping to zero");
        0
    } else {
        value as u64
    }
}

fn count_u64(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql], id_desc: &str, field: &str) -> Result<u64> {
    let value: f64 = conn.query_row(sql, params, |r| r.get(0))?;
    Ok(clamp_nonneg(id_desc, field, value))
}

/// Recomputes the aggregates for one storage from its fragments and
/// non-fragmenting sub-rows (§4.4 step 1).
pub fn recompute_storage_aggregates(conn: &Connection, storage_id: i64) -> Result<Aggregates> {
    let id_desc = format!("storage:{storage_id}");
    let mut agg = Aggregates::default();

    agg.file_count = count_u64(
        conn,
        "SELECT COUNT(DISTINCT ef.entryId) FROM entryFragments ef \
         JOIN entries e ON e.id = ef.entryId \
         WHERE ef.storageId = ?1 AND e.type = 'FILE'",
        &[&storage_id],
        &id_desc,
        "file_count",
    )?;
    agg.file_size = count_u64(
        conn,
        "SELECT COALESCE(TOTAL(ef.size), 0) FROM entryFragments ef \
         JOIN entries e ON e.id = ef.entryId \
         WHERE ef.storageId = ?1 AND e.type = 'FILE'",
        &[&storage_id],
        &id_desc,
        "file_size",
    )?;

    agg.image_count = count_u64(
        conn,
        "SELECT COUNT(DISTINCT ef.entryId) FROM entryFragments ef \
         JOIN entries e ON e.id = ef.entryId \
         WHERE ef.storageId = ?1 AND e.type = 'IMAGE'",
        &[&storage_id],
        &id_desc,
        "image_count",
    )?;
    agg.image_size = count_u64(
        conn,
        "SELECT COALESCE(TOTAL(ef.size), 0) FROM entryFragments ef \
         JOIN entries e ON e.id = ef.entryId \
         WHERE ef.storageId = ?1 AND e.type = 'IMAGE'",
        &[&storage_id],
        &id_desc,
        "image_size",
    )?;

    agg.hardlink_count = count_u64(
        conn,
        "SELECT COUNT(DISTINCT ef.entryId) FROM entryFragments ef \
         JOIN entries e ON e.id = ef.entryId \
         WHERE ef.storageId = ?1 AND e.type = 'HARDLINK'",
        &[&storage_id],
        &id_desc,
        "hardlink_count",
    )?;
    agg.hardlink_size = count_u64(
        conn,
        "SELECT COALESCE(TOTAL(ef.size), 0) FROM entryFragments ef \
         JOIN entries e ON e.id = ef.entryId \
         WHERE ef.storageId = ?1 AND e.type = 'HARDLINK'",
        &[&storage_id],
        &id_desc,
        "hardlink_size",
    )?;

    agg.directory_count = count_u64(
        conn,
        "SELECT COUNT(*) FROM directoryEntries WHERE storageId = ?1",
        &[&storage_id],
        &id_desc,
        "directory_count",
    )?;
    agg.link_count = count_u64(
        conn,
        "SELECT COUNT(*) FROM linkEntries WHERE storageId = ?1",
        &[&storage_id],
        &id_desc,
        "link_count",
    )?;
    agg.special_count = count_u64(
        conn,
        "SELECT COUNT(*) FROM specialEntries WHERE storageId = ?1",
        &[&storage_id],
        &id_desc,
        "special_count",
    )?;

    agg.entry_count = agg.file_count
        + agg.image_count
        + agg.directory_count
        + agg.link_count
        + agg.hardlink_count
        + agg.special_count;
    agg.entry_size = agg.file_size + agg.image_size + agg.hardlink_size;

    // Newest variants: restrict to entries that `entriesNewest` currently
    // points at (§3 invariant 3, §4.5).
    agg.file_count_newest = count_u64(
        conn,
        "SELECT COUNT(DISTINCT ef.entryId) FROM entryFragments ef \
         JOIN entries e ON e.id = ef.entryId \
         JOIN entriesNewest en ON en.entryId = e.id \
         WHERE ef.storageId = ?1 AND e.type = 'FILE'",
        &[&storage_id],
        &id_desc,
        "file_count_newest",
    )?;
    agg.file_size_newest = count_u64(
        conn,
        "SELECT COALESCE(TOTAL(ef.size), 0) FROM entryFragments ef \
         JOIN entries e ON e.id = ef.entryId \
         JOIN entriesNewest en ON en.entryId = e.id \
         WHERE ef.storageId = ?1 AND e.type = 'FILE'",
        &[&storage_id],
        &id_desc,
        "file_size_newest",
    )?;
    agg.image_count_newest = count_u64(
        conn,
        "SELECT COUNT(DISTINCT ef.entryId) FROM entryFragments ef \
         JOIN entries e ON e.id = ef.entryId \
         JOIN entriesNewest en ON en.entryId = e.id \
         WHERE ef.storageId = ?1 AND e.type = 'IMAGE'",
        &[&storage_id],
        &id_desc,
        "image_count_newest",
    )?;
    agg.image_size_newest = count_u64(
        conn,
        "SELECT COALESCE(TOTAL(ef.size), 0) FROM entryFragments ef \
         JOIN entries e ON e.id = ef.entryId \
         JOIN entriesNewest en ON en.entryId = e.id \
         WHERE ef.storageId = ?1 AND e.type = 'IMAGE'",
        &[&storage_id],
        &id_desc,
        "image_size_newest",
    )?;
    agg.hardlink_count_newest = count_u64(
        conn,
        "SELECT COUNT(DISTINCT ef.entryId) FROM entryFragments ef \
         JOIN entries e ON e.id = ef.entryId \
         JOIN entriesNewest en ON en.entryId = e.id \
         WHERE ef.storageId = ?1 AND e.type = 'HARDLINK'",
        &[&storage_id],
        &id_desc,
        "hardlink_count_newest",
    )?;
    agg.hardlink_size_newest = count_u64(
        conn,
        "SELECT COALESCE(TOTAL(ef.size), 0) FROM entryFragments ef \
         JOIN entries e ON e.id = ef.entryId \
         JOIN entriesNewest en ON en.entryId = e.id \
         WHERE ef.storageId = ?1 AND e.type = 'HARDLINK'",
        &[&storage_id],
        &id_desc,
        "hardlink_size_newest",
    )?;
    agg.directory_count_newest = count_u64(
        conn,
        "SELECT COUNT(*) FROM directoryEntries de \
         JOIN entriesNewest en ON en.entryId = de.entryId \
         WHERE de.storageId = ?1",
        &[&storage_id],
        &id_desc,
        "directory_count_newest",
    )?;
    agg.link_count_newest = count_u64(
        conn,
        "SELECT COUNT(*) FROM linkEntries le \
         JOIN entriesNewest en ON en.entryId = le.entryId \
         WHERE le.storageId = ?1",
        &[&storage_id],
        &id_desc,
        "link_count_newest",
    )?;
    agg.special_count_newest = count_u64(
        conn,
        "SELECT COUNT(*) FROM specialEntries se \
         JOIN entriesNewest en ON en.entryId = se.entryId \
         WHERE se.storageId = ?1",
        &[&storage_id],
        &id_desc,
        "special_count_newest",
    )?;
    agg.entry_count_newest = agg.file_count_newest
        + agg.image_count_newest
        + agg.directory_count_newest
        + agg.link_count_newest
        + agg.hardlink_count_newest
        + agg.special_count_newest;
    agg.entry_size_newest = agg.file_size_newest + agg.image_size_newest + agg.hardlink_size_newest;

    write_storage_aggregates(conn, storage_id, &agg)?;
    Ok(agg)
}

fn write_storage_aggregates(conn: &Connection, storage_id: i64, agg: &Aggregates) -> Result<()> {
    conn.execute(
        "UPDATE storages SET \
            totalEntryCount = ?2, totalEntrySize = ?3, \
            totalFileCount = ?4, totalFileSize = ?5, \
            totalImageCount = ?6, totalImageSize = ?7, \
            totalDirectoryCount = ?8, totalLinkCount = ?9, \
            totalHardlinkCount = ?10, totalHardlinkSize = ?11, \
            totalSpecialCount = ?12, \
            totalEntryCountNewest = ?13, totalEntrySizeNewest = ?14, \
            totalFileCountNewest = ?15, totalFileSizeNewest = ?16, \
            totalImageCountNewest = ?17, totalImageSizeNewest = ?18, \
            totalDirectoryCountNewest = ?19, totalLinkCountNewest = ?20, \
            totalHardlinkCountNewest = ?21, totalHardlinkSizeNewest = ?22, \
            totalSpecialCountNewest = ?23 \
         WHERE id = ?1",
        rusqlite::params![
            storage_id,
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
            agg.entry_count_newest as i64,
            agg.entry_size_newest as i64,
            agg.file_count_newest as i64,
            agg.file_size_newest as i64,
            agg.image_count_newest as i64,
            agg.image_size_newest as i64,
            agg.directory_count_newest as i64,
            agg.link_count_newest as i64,
            agg.hardlink_count_newest as i64,
            agg.hardlink_size_newest as i64,
            agg.special_count_newest as i64,
        ],
    )?;
    Ok(())
}

/// Recomputes one entity's aggregates as the sum over its storages
/// (§4.4 "after a storage update, recompute its parent entity").
pub fn recompute_entity_aggregates(conn: &Connection, entity_id: i64) -> Result<Aggregates> {
    let id_desc = format!("entity:{entity_id}");
    let mut agg = Aggregates::default();

    macro_rules! sum_col {
        ($col:literal, $field:ident) => {
            agg.$field = count_u64(
                conn,
                concat!("SELECT COALESCE(TOTAL(", $col, "), 0) FROM storages WHERE entityId = ?1"),
                &[&entity_id],
                &id_desc,
                $col,
            )?;
        };
    }

    sum_col!("totalEntryCount", entry_count);
    sum_col!("totalEntrySize", entry_size);
    sum_col!("totalFileCount", file_count);
    sum_col!("totalFileSize", file_size);
    sum_col!("totalImageCount", image_count);
    sum_col!("totalImageSize", image_size);
    sum_col!("totalDirectoryCount", directory_count);
    sum_col!("totalLinkCount", link_count);
    sum_col!("totalHardlinkCount", hardlink_count);
    sum_col!("totalHardlinkSize", hardlink_size);
    sum_col!("totalSpecialCount", special_count);

    sum_col!("totalEntryCountNewest", entry_count_newest);
    sum_col!("totalEntrySizeNewest", entry_size_newest);
    sum_col!("totalFileCountNewest", file_count_newest);
    sum_col!("totalFileSizeNewest", file_size_newest);
    sum_col!("totalImageCountNewest", image_count_newest);
    sum_col!("totalImageSizeNewest", image_size_newest);
    sum_col!("totalDirectoryCountNewest", directory_count_newest);
    sum_col!("totalLinkCountNewest", link_count_newest);
    sum_col!("totalHardlinkCountNewest", hardlink_count_newest);
    sum_col!("totalHardlinkSizeNewest", hardlink_size_newest);
    sum_col!("totalSpecialCountNewest", special_count_newest);

    conn.execute(
        "UPDATE entities SET \
            totalEntryCount = ?2, totalEntrySize = ?3, \
            totalFileCount = ?4, totalFileSize = ?5, \
            totalImageCount = ?6, totalImageSize = ?7, \
            totalDirectoryCount = ?8, totalLinkCount = ?9, \
            totalHardlinkCount = ?10, totalHardlinkSize = ?11, \
            totalSpecialCount = ?12, \
            totalEntryCountNewest = ?13, totalEntrySizeNewest = ?14, \
            totalFileCountNewest = ?15, totalFileSizeNewest = ?16, \
            totalImageCountNewest = ?17, totalImageSizeNewest = ?18, \
            totalDirectoryCountNewest = ?19, totalLinkCountNewest = ?20, \
            totalHardlinkCountNewest = ?21, totalHardlinkSizeNewest = ?22, \
            totalSpecialCountNewest = ?23 \
         WHERE id = ?1",
        rusqlite::params![
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
            agg.entry_count_newest as i64,
            agg.entry_size_newest as i64,
            agg.file_count_newest as i64,
            agg.file_size_newest as i64,
            agg.image_count_newest as i64,
            agg.image_size_newest as i64,
            agg.directory_count_newest as i64,
            agg.link_count_newest as i64,
            agg.hardlink_count_newest as i64,
            agg.hardlink_size_newest as i64,
            agg.special_count_newest as i64,
        ],
    )?;
    Ok(agg)
}

/// UUID-level aggregates, computed on demand from the entities that
/// belong to this job uuid (§4.4: never stored).
pub fn uuid_aggregates_on_demand(conn: &Connection, uuid_id: i64) -> Result<Aggregates> {
    let id_desc = format!("uuid:{uuid_id}");
    let mut agg = Aggregates::default();

    macro_rules! sum_col {
        ($col:literal, $field:ident) => {
            agg.$field = count_u64(
                conn,
                concat!("SELECT COALESCE(TOTAL(", $col, "), 0) FROM entities WHERE uuidId = ?1"),
                &[&uuid_id],
                &id_desc,
                $col,
            )?;
        };
    }

    sum_col!("totalEntryCount", entry_count);
    sum_col!("totalEntrySize", entry_size);
    sum_col!("totalFileCount", file_count);
    sum_col!("totalFileSize", file_size);
    sum_col!("totalImageCount", image_count);
    sum_col!("totalImageSize", image_size);
    sum_col!("totalDirectoryCount", directory_count);
    sum_col!("totalLinkCount", link_count);
    sum_col!("totalHardlinkCount", hardlink_count);
    sum_col!("totalHardlinkSize", hardlink_size);
    sum_col!("totalSpecialCount", special_count);

    sum_col!("totalEntryCountNewest", entry_count_newest);
    sum_col!("totalEntrySizeNewest", entry_size_newest);
    sum_col!("totalFileCountNewest", file_count_newest);
    sum_col!("totalFileSizeNewest", file_size_newest);
    sum_col!("totalImageCountNewest", image_count_newest);
    sum_col!("totalImageSizeNewest", image_size_newest);
    sum_col!("totalDirectoryCountNewest", directory_count_newest);
    sum_col!("totalLinkCountNewest", link_count_newest);
    sum_col!("totalHardlinkCountNewest", hardlink_count_newest);
    sum_col!("totalHardlinkSizeNewest", hardlink_size_newest);
    sum_col!("totalSpecialCountNewest", special_count_newest);

    Ok(agg)
}

/// Recomputes the subtree aggregate for one (storage, directory) pair
/// (§3 invariant 4): the sum of sizes of entries in this storage whose
/// name starts with the directory's path prefix.
pub fn recompute_directory_subtree(
    conn: &Connection,
    storage_id: i64,
    directory_entry_id: i64,
    path_prefix: &str,
) -> Result<()> {
    let like_pattern = format!("{}%", path_prefix.replace('%', "\\%").replace('_', "\\_"));
    let id_desc = format!("directory:{directory_entry_id}@storage:{storage_id}");

    let count = count_u64(
        conn,
        "SELECT COUNT(*) FROM entries e \
         JOIN entryFragments ef ON ef.entryId = e.id \
         WHERE ef.storageId = ?1 AND e.name LIKE ?2 ESCAPE '\\'",
        &[&storage_id, &like_pattern],
        &id_desc,
        "total_entry_count",
    )?;
    let size = count_u64(
        conn,
        "SELECT COALESCE(TOTAL(ef.size), 0) FROM entries e \
         JOIN entryFragments ef ON ef.entryId = e.id \
         WHERE ef.storageId = ?1 AND e.name LIKE ?2 ESCAPE '\\'",
        &[&storage_id, &like_pattern],
        &id_desc,
        "total_entry_size",
    )?;
    let count_newest = count_u64(
        conn,
        "SELECT COUNT(*) FROM entries e \
         JOIN entryFragments ef ON ef.entryId = e.id \
         JOIN entriesNewest en ON en.entryId = e.id \
         WHERE ef.storageId = ?1 AND e.name LIKE ?2 ESCAPE '\\'",
        &[&storage_id, &like_pattern],
        &id_desc,
        "total_entry_count_newest",
    )?;
    let size_newest = count_u64(
        conn,
        "SELECT COALESCE(TOTAL(ef.size), 0) FROM entries e \
         JOIN entryFragments ef ON ef.entryId = e.id \
         JOIN entriesNewest en ON en.entryId = e.id \
         WHERE ef.storageId = ?1 AND e.name LIKE ?2 ESCAPE '\\'",
        &[&storage_id, &like_pattern],
        &id_desc,
        "total_entry_size_newest",
    )?;

    conn.execute(
        "UPDATE directoryEntries SET \
            totalEntryCount = ?3, totalEntrySize = ?4, \
            totalEntryCountNewest = ?5, totalEntrySizeNewest = ?6 \
         WHERE entryId = ?1 AND storageId = ?2",
        rusqlite::params![directory_entry_id, storage_id, count as i64, size as i64, count_newest as i64, size_newest as i64],
    )?;
    Ok(())
}
