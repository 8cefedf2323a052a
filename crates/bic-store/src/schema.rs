//! Versioned DDL bundle for the catalog schema (§3, §6).
//!
//! `meta.version` must equal [`INDEX_VERSION`] for the engine build;
//! see [`crate::handle::Handle::open`] for the mismatch policy (§3
//! invariant 7).

use rusqlite::Connection;

use crate::error::Result;

/// The schema version this build of the engine understands.
pub const INDEX_VERSION: i64 = 7;

/// Creates every table and FTS projection listed in §6, idempotently.
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = OFF;

        CREATE TABLE IF NOT EXISTS meta (
            name  TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS uuids (
            id       INTEGER PRIMARY KEY,
            jobUuid  TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS entities (
            id                  INTEGER PRIMARY KEY,
            jobUuid             TEXT NOT NULL,
            uuidId              INTEGER NOT NULL,
            scheduleUuid        TEXT NOT NULL DEFAULT '',
            hostName            TEXT NOT NULL DEFAULT '',
            userName            TEXT NOT NULL DEFAULT '',
            archiveType         TEXT NOT NULL DEFAULT 'FULL',
            created             INTEGER NOT NULL DEFAULT 0,
            lockedCount         INTEGER NOT NULL DEFAULT 0,
            deletedFlag         INTEGER NOT NULL DEFAULT 0,

            totalEntryCount        INTEGER NOT NULL DEFAULT 0,
            totalEntrySize         INTEGER NOT NULL DEFAULT 0,
            totalFileCount         INTEGER NOT NULL DEFAULT 0,
            totalFileSize          INTEGER NOT NULL DEFAULT 0,
            totalImageCount        INTEGER NOT NULL DEFAULT 0,
            totalImageSize         INTEGER NOT NULL DEFAULT 0,
            totalDirectoryCount    INTEGER NOT NULL DEFAULT 0,
            totalLinkCount         INTEGER NOT NULL DEFAULT 0,
            totalHardlinkCount     INTEGER NOT NULL DEFAULT 0,
            totalHardlinkSize      INTEGER NOT NULL DEFAULT 0,
            totalSpecialCount      INTEGER NOT NULL DEFAULT 0,

            totalEntryCountNewest      INTEGER NOT NULL DEFAULT 0,
            totalEntrySizeNewest       INTEGER NOT NULL DEFAULT 0,
            totalFileCountNewest       INTEGER NOT NULL DEFAULT 0,
            totalFileSizeNewest        INTEGER NOT NULL DEFAULT 0,
            totalImageCountNewest      INTEGER NOT NULL DEFAULT 0,
            totalImageSizeNewest       INTEGER NOT NULL DEFAULT 0,
            totalDirectoryCountNewest  INTEGER NOT NULL DEFAULT 0,
            totalLinkCountNewest       INTEGER NOT NULL DEFAULT 0,
            totalHardlinkCountNewest   INTEGER NOT NULL DEFAULT 0,
            totalHardlinkSizeNewest    INTEGER NOT NULL DEFAULT 0,
            totalSpecialCountNewest    INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_entities_uuid ON entities(uuidId);
        CREATE INDEX IF NOT EXISTS idx_entities_job_uuid ON entities(jobUuid);
        CREATE INDEX IF NOT EXISTS idx_entities_deleted ON entities(deletedFlag);

        CREATE TABLE IF NOT EXISTS storages (
            id              INTEGER PRIMARY KEY,
            entityId        INTEGER NOT NULL,
            uuidId          INTEGER NOT NULL,
            hostName        TEXT NOT NULL DEFAULT '',
            userName        TEXT NOT NULL DEFAULT '',
            name            TEXT NOT NULL,
            created         INTEGER NOT NULL DEFAULT 0,
            size            INTEGER NOT NULL DEFAULT 0,
            state           TEXT NOT NULL DEFAULT 'NONE',
            mode            TEXT NOT NULL DEFAULT 'AUTO',
            lastChecked     INTEGER NOT NULL DEFAULT 0,
            errorMessage    TEXT NOT NULL DEFAULT '',
            deletedFlag     INTEGER NOT NULL DEFAULT 0,

            totalEntryCount     INTEGER NOT NULL DEFAULT 0,
            totalEntrySize      INTEGER NOT NULL DEFAULT 0,
            totalFileCount      INTEGER NOT NULL DEFAULT 0,
            totalFileSize       INTEGER NOT NULL DEFAULT 0,
            totalImageCount     INTEGER NOT NULL DEFAULT 0,
            totalImageSize      INTEGER NOT NULL DEFAULT 0,
            totalDirectoryCount INTEGER NOT NULL DEFAULT 0,
            totalLinkCount      INTEGER NOT NULL DEFAULT 0,
            totalHardlinkCount  INTEGER NOT NULL DEFAULT 0,
            totalHardlinkSize   INTEGER NOT NULL DEFAULT 0,
            totalSpecialCount   INTEGER NOT NULL DEFAULT 0,

            totalEntryCountNewest     INTEGER NOT NULL DEFAULT 0,
            totalEntrySizeNewest      INTEGER NOT NULL DEFAULT 0,
            totalFileCountNewest      INTEGER NOT NULL DEFAULT 0,
            totalFileSizeNewest       INTEGER NOT NULL DEFAULT 0,
            totalImageCountNewest     INTEGER NOT NULL DEFAULT 0,
            totalImageSizeNewest      INTEGER NOT NULL DEFAULT 0,
            totalDirectoryCountNewest INTEGER NOT NULL DEFAULT 0,
            totalLinkCountNewest      INTEGER NOT NULL DEFAULT 0,
            totalHardlinkCountNewest  INTEGER NOT NULL DEFAULT 0,
            totalHardlinkSizeNewest   INTEGER NOT NULL DEFAULT 0,
            totalSpecialCountNewest   INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_storages_entity ON storages(entityId);
        CREATE INDEX IF NOT EXISTS idx_storages_uuid ON storages(uuidId);
        CREATE INDEX IF NOT EXISTS idx_storages_deleted_state ON storages(deletedFlag, state);
        CREATE INDEX IF NOT EXISTS idx_storages_name ON storages(name);

        CREATE TABLE IF NOT EXISTS entries (
            id              INTEGER PRIMARY KEY,
            entityId        INTEGER NOT NULL,
            uuidId          INTEGER NOT NULL,
            type            TEXT NOT NULL,
            name            TEXT NOT NULL,
            timeLastAccess  INTEGER NOT NULL DEFAULT 0,
            timeModified    INTEGER NOT NULL DEFAULT 0,
            timeLastChanged INTEGER NOT NULL DEFAULT 0,
            userId          INTEGER NOT NULL DEFAULT 0,
            groupId         INTEGER NOT NULL DEFAULT 0,
            permission      INTEGER NOT NULL DEFAULT 0,
            size            INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_entries_entity ON entries(entityId);
        CREATE INDEX IF NOT EXISTS idx_entries_uuid ON entries(uuidId);
        CREATE INDEX IF NOT EXISTS idx_entries_name ON entries(name);
        CREATE INDEX IF NOT EXISTS idx_entries_entity_type_name ON entries(entityId, type, name);

        CREATE TABLE IF NOT EXISTS fileEntries (
            entryId INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS imageEntries (
            entryId     INTEGER PRIMARY KEY,
            fileSystemType TEXT NOT NULL DEFAULT '',
            blockSize   INTEGER NOT NULL DEFAULT 0,
            size        INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS directoryEntries (
            entryId            INTEGER NOT NULL,
            storageId          INTEGER NOT NULL,
            pathName           TEXT NOT NULL,
            totalEntryCount        INTEGER NOT NULL DEFAULT 0,
            totalEntrySize         INTEGER NOT NULL DEFAULT 0,
            totalEntryCountNewest  INTEGER NOT NULL DEFAULT 0,
            totalEntrySizeNewest   INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (entryId, storageId)
        );
        CREATE INDEX IF NOT EXISTS idx_directory_storage ON directoryEntries(storageId);
        CREATE INDEX IF NOT EXISTS idx_directory_path ON directoryEntries(storageId, pathName);

        CREATE TABLE IF NOT EXISTS linkEntries (
            entryId     INTEGER NOT NULL,
            storageId   INTEGER NOT NULL,
            destinationName TEXT NOT NULL DEFAULT '',
            PRIMARY KEY (entryId, storageId)
        );
        CREATE INDEX IF NOT EXISTS idx_link_storage ON linkEntries(storageId);

        CREATE TABLE IF NOT EXISTS hardlinkEntries (
            entryId PRIMARY KEY,
            size    INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS specialEntries (
            entryId     INTEGER NOT NULL,
            storageId   INTEGER NOT NULL,
            specialType TEXT NOT NULL DEFAULT '',
            major       INTEGER NOT NULL DEFAULT 0,
            minor       INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (entryId, storageId)
        );
        CREATE INDEX IF NOT EXISTS idx_special_storage ON specialEntries(storageId);

        CREATE TABLE IF NOT EXISTS entryFragments (
            id          INTEGER PRIMARY KEY,
            entryId     INTEGER NOT NULL,
            storageId   INTEGER NOT NULL,
            offset      INTEGER NOT NULL DEFAULT 0,
            size        INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_fragments_entry ON entryFragments(entryId);
        CREATE INDEX IF NOT EXISTS idx_fragments_storage ON entryFragments(storageId);

        CREATE TABLE IF NOT EXISTS entriesNewest (
            name            TEXT PRIMARY KEY,
            entryId         INTEGER NOT NULL,
            uuidId          INTEGER NOT NULL,
            entityId        INTEGER NOT NULL,
            type            TEXT NOT NULL,
            timeLastAccess  INTEGER NOT NULL DEFAULT 0,
            timeModified    INTEGER NOT NULL DEFAULT 0,
            timeLastChanged INTEGER NOT NULL DEFAULT 0,
            userId          INTEGER NOT NULL DEFAULT 0,
            groupId         INTEGER NOT NULL DEFAULT 0,
            permission      INTEGER NOT NULL DEFAULT 0,
            size            INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_newest_entry ON entriesNewest(entryId);

        CREATE TABLE IF NOT EXISTS skippedEntries (
            id          INTEGER PRIMARY KEY,
            entityId    INTEGER NOT NULL,
            storageId   INTEGER NOT NULL,
            name        TEXT NOT NULL,
            reason      TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_skipped_entity ON skippedEntries(entityId);

        CREATE TABLE IF NOT EXISTS history (
            id          INTEGER PRIMARY KEY,
            entityId    INTEGER NOT NULL,
            started     INTEGER NOT NULL DEFAULT 0,
            duration    INTEGER NOT NULL DEFAULT 0,
            entryCount  INTEGER NOT NULL DEFAULT 0,
            entrySize   INTEGER NOT NULL DEFAULT 0,
            errorCount  INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_history_entity ON history(entityId);

        CREATE VIRTUAL TABLE IF NOT EXISTS FTS_entries USING fts5(
            name, content='entries', content_rowid='id'
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS FTS_storages USING fts5(
            name, content='storages', content_rowid='id'
        );
        CREATE VIRTUAL TABLE IF NOT EXISTS FTS_uuids USING fts5(
            jobUuid, content='uuids', content_rowid='id'
        );
        "#,
    )?;

    set_version_if_absent(conn, INDEX_VERSION)?;
    ensure_default_entity(conn)?;
    Ok(())
}

fn set_version_if_absent(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO meta(name, value) VALUES ('version', ?1)",
        [version.to_string()],
    )?;
    Ok(())
}

/// Reserves the default-entity row (§3, §9) with id
/// [`bic_types::IndexId::DEFAULT_ENTITY`] if it is not already present.
fn ensure_default_entity(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO uuids(id, jobUuid) VALUES (1, '')",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO entities(id, jobUuid, uuidId, archiveType) \
         VALUES (1, '', 1, 'FULL')",
        [],
    )?;
    Ok(())
}

/// Reads `meta.version`, if present.
pub fn read_version(conn: &Connection) -> Result<Option<i64>> {
    let result = conn.query_row(
        "SELECT value FROM meta WHERE name = 'version'",
        [],
        |row| row.get::<_, String>(0),
    );
    match result {
        Ok(v) => Ok(v.parse::<i64>().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn write_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO meta(name, value) VALUES ('version', ?1) \
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        [version.to_string()],
    )?;
    Ok(())
}
