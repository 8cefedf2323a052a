//! Legacy catalog import (§4.7 step 2).
//!
//! On startup the worker scans the directory holding the live catalog
//! file for siblings named `<base>.oldNNN` — catalogs left behind by an
//! earlier schema version that were never folded into the current one.
//! Each is opened read-write (so the dispatch below can renumber rows
//! before they're merged in), `meta.version` is read, and the version
//! selects an import path. Versions 1 through 6 are the source's
//! disabled (`#if 0`) migration bodies: the dispatch table is kept so
//! the interface stays stable, but calling one of them is
//! `version-unknown` rather than a silent success. Only the current
//! schema version actually merges rows.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bic_catalog::{
    mutation::{AddEntryParams, NewEntity, NewStorage},
    Catalog,
};
use bic_concurrency::EngineContext;
use bic_store::{BusyCallback, Handle, OpenFlags, OpenMode, RetryForever};
use bic_types::{ArchiveType, Mode, State};
use tracing::{info, warn};

use crate::config::MaintenanceConfig;
use crate::error::{MaintenanceError, Result};

/// One legacy sibling discovered next to the live catalog file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyFile {
    pub path: PathBuf,
    pub sequence: u32,
}

/// Outcome of importing a single legacy file.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct LegacyImportOutcome {
    pub path: String,
    pub schema_version: Option<i64>,
    pub imported_entities: u64,
    pub imported_storages: u64,
    pub imported_entries: u64,
    pub succeeded: bool,
}

/// Summary returned after scanning and importing every sibling found
/// (§4.7: "compute storage/entity/UUID aggregates" happens per file, as
/// part of each [`LegacyImportOutcome`]).
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct LegacyImportReport {
    pub files: Vec<LegacyImportOutcome>,
}

/// Finds every `<base>.oldNNN` sibling of `catalog_path` (§6 "Legacy
/// files"), sorted by sequence number so imports are deterministic.
pub fn scan_legacy_siblings(catalog_path: &Path) -> Result<Vec<LegacyFile>> {
    let dir = catalog_path.parent().unwrap_or_else(|| Path::new("."));
    let base_name = catalog_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let prefix = format!("{base_name}.old");

    let mut found = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(found),
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(suffix) = name.strip_prefix(&prefix) else {
            continue;
        };
        if suffix.is_empty() || suffix.ends_with(".fail") {
            continue;
        }
        if let Ok(sequence) = suffix.parse::<u32>() {
            found.push(LegacyFile {
                path: dir.join(&name),
                sequence,
            });
        }
    }
    found.sort_by_key(|f| f.sequence);
    Ok(found)
}

/// Runs the legacy-import pass over every sibling of `main.handle().path()`
/// (§4.7 step 2). Each file is deleted on success or renamed to
/// `.fail` on failure, never both, so a failed import is always left
/// for an operator to inspect.
pub fn import_legacy_catalogs(main: &Catalog, config: &MaintenanceConfig) -> Result<LegacyImportReport> {
    let siblings = scan_legacy_siblings(main.handle().path())?;
    let mut report = LegacyImportReport::default();
    if siblings.is_empty() {
        return Ok(report);
    }

    info!(count = siblings.len(), "legacy import: siblings discovered");
    let started = Instant::now();
    let mut last_report = started;

    for (i, sibling) in siblings.iter().enumerate() {
        let outcome = import_one_legacy_file(main, &sibling.path);
        match &outcome {
            Ok(ok) => {
                let _ = fs::remove_file(&sibling.path);
                info!(path = %sibling.path.display(), entities = ok.imported_entities,
                      storages = ok.imported_storages, entries = ok.imported_entries,
                      "legacy import: file imported and removed");
                report.files.push(ok.clone());
            }
            Err(err) => {
                let fail_path = append_fail_suffix(&sibling.path);
                if let Err(rename_err) = fs::rename(&sibling.path, &fail_path) {
                    warn!(path = %sibling.path.display(), error = %rename_err,
                          "legacy import: failed to rename broken catalog to .fail");
                }
                warn!(path = %sibling.path.display(), error = %err, "legacy import: file failed");
                report.files.push(LegacyImportOutcome {
                    path: sibling.path.display().to_string(),
                    succeeded: false,
                    ..Default::default()
                });
            }
        }

        if last_report.elapsed() >= config.progress_log_interval() {
            let fraction = (i + 1) as f64 / siblings.len() as f64;
            info!(
                progress = format!("{:.1}%", fraction * 100.0),
                elapsed_secs = started.elapsed().as_secs(),
                "legacy import: progress"
            );
            last_report = Instant::now();
        }
    }

    Ok(report)
}

fn append_fail_suffix(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".fail");
    path.with_file_name(name)
}

fn import_one_legacy_file(main: &Catalog, path: &Path) -> Result<LegacyImportOutcome> {
    let old = Handle::open(
        path,
        OpenMode::ReadWrite,
        OpenFlags::default(),
        EngineContext::new(),
        Arc::new(RetryForever) as Arc<dyn BusyCallback>,
    )?;
    let version = old.schema_version()?;

    let counts = match version {
        Some(v) if v == bic_store::schema::INDEX_VERSION => import_current(main, old.conn())?,
        Some(v) => {
            // v1..v6: the source's disabled (#if 0) migration bodies.
            // Required interface, unimplemented: surface version-unknown
            // rather than silently doing nothing (§9 open question).
            return Err(MaintenanceError::VersionUnknown {
                path: path.to_path_buf(),
                version: v,
            })
        }
        None => {
            return Err(MaintenanceError::VersionUnknown {
                path: path.to_path_buf(),
                version: -1,
            })
        }
    };

    Ok(LegacyImportOutcome {
        path: path.display().to_string(),
        schema_version: version,
        imported_entities: counts.entities,
        imported_storages: counts.storages,
        imported_entries: counts.entries,
        succeeded: true,
    })
}

#[derive(Default)]
struct ImportCounts {
    entities: u64,
    storages: u64,
    entries: u64,
}

/// Merges every live row of an old catalog that is already on the
/// current schema (the one path the source's dispatch table actually
/// implements) into `main`, remapping entity/storage ids as it goes and
/// letting the ordinary mutation surface rebuild aggregates and the
/// newest-version index as rows land.
fn import_current(main: &Catalog, old: &rusqlite::Connection) -> Result<ImportCounts> {
    let mut counts = ImportCounts::default();
    let mut entity_id_map: HashMap<i64, i64> = HashMap::new();
    entity_id_map.insert(bic_types::IndexId::DEFAULT_ENTITY, bic_types::IndexId::DEFAULT_ENTITY);

    let mut entity_stmt = old.prepare(
        "SELECT id, jobUuid, scheduleUuid, hostName, userName, archiveType, created, lockedCount \
         FROM entities WHERE deletedFlag = 0 AND id != ?1",
    )?;
    struct OldEntity {
        old_id: i64,
        job_uuid: String,
        schedule_uuid: String,
        host_name: String,
        user_name: String,
        archive_type: String,
        created: i64,
        locked_count: i64,
    }
    let old_entities = entity_stmt
        .query_map([bic_types::IndexId::DEFAULT_ENTITY], |r| {
            Ok(OldEntity {
                old_id: r.get(0)?,
                job_uuid: r.get(1)?,
                schedule_uuid: r.get(2)?,
                host_name: r.get(3)?,
                user_name: r.get(4)?,
                archive_type: r.get(5)?,
                created: r.get(6)?,
                locked_count: r.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(entity_stmt);

    for oe in &old_entities {
        let archive_type = ArchiveType::parse(&oe.archive_type).unwrap_or(ArchiveType::Normal);
        let new_id = main.new_entity(NewEntity {
            job_uuid: &oe.job_uuid,
            schedule_uuid: &oe.schedule_uuid,
            host_name: &oe.host_name,
            user_name: &oe.user_name,
            archive_type,
            created: oe.created,
            locked: oe.locked_count > 0,
        })?;
        entity_id_map.insert(oe.old_id, new_id);
        counts.entities += 1;
    }

    let mut storage_stmt = old.prepare(
        "SELECT id, entityId, hostName, userName, name, created, size, state, mode \
         FROM storages WHERE deletedFlag = 0",
    )?;
    struct OldStorage {
        old_id: i64,
        entity_id: i64,
        host_name: String,
        user_name: String,
        name: String,
        created: i64,
        size: i64,
        state: String,
        mode: String,
    }
    let old_storages = storage_stmt
        .query_map([], |r| {
            Ok(OldStorage {
                old_id: r.get(0)?,
                entity_id: r.get(1)?,
                host_name: r.get(2)?,
                user_name: r.get(3)?,
                name: r.get(4)?,
                created: r.get(5)?,
                size: r.get(6)?,
                state: r.get(7)?,
                mode: r.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(storage_stmt);

    let mut storage_id_map: HashMap<i64, i64> = HashMap::new();
    for os in &old_storages {
        let Some(&new_entity_id) = entity_id_map.get(&os.entity_id) else {
            warn!(old_storage_id = os.old_id, "legacy import: storage references unknown entity, skipped");
            continue;
        };
        let state = State::parse(&os.state).unwrap_or(State::None);
        let mode = Mode::parse(&os.mode).unwrap_or(Mode::Auto);
        let new_id = main.new_storage(NewStorage {
            entity_id: new_entity_id,
            host_name: &os.host_name,
            user_name: &os.user_name,
            name: &os.name,
            created: os.created,
            size: os.size,
            state,
            mode,
        })?;
        storage_id_map.insert(os.old_id, new_id);
        counts.storages += 1;
    }

    counts.entries = import_entries(main, old, &entity_id_map, &storage_id_map)?;

    for &new_id in storage_id_map.values() {
        main.recompute_storage_aggregates(new_id)?;
    }
    for &new_id in entity_id_map.values() {
        main.recompute_entity_aggregates(new_id)?;
    }

    Ok(counts)
}

fn import_entries(
    main: &Catalog,
    old: &rusqlite::Connection,
    entity_id_map: &HashMap<i64, i64>,
    storage_id_map: &HashMap<i64, i64>,
) -> Result<u64> {
    let mut imported = 0u64;

    let mut frag_stmt = old.prepare(
        "SELECT e.id, e.entityId, e.name, e.timeLastAccess, e.timeModified, e.timeLastChanged, \
                e.userId, e.groupId, e.permission, e.size, ef.storageId, ef.offset, ef.size \
         FROM entries e JOIN entryFragments ef ON ef.entryId = e.id WHERE e.type = 'FILE'",
    )?;
    struct OldFragmentEntry {
        entity_id: i64,
        name: String,
        time_last_access: i64,
        time_modified: i64,
        time_last_changed: i64,
        user_id: i64,
        group_id: i64,
        permission: i64,
        size: i64,
        storage_id: i64,
        offset: i64,
        fragment_size: i64,
    }
    let rows = frag_stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                OldFragmentEntry {
                    entity_id: r.get(1)?,
                    name: r.get(2)?,
                    time_last_access: r.get(3)?,
                    time_modified: r.get(4)?,
                    time_last_changed: r.get(5)?,
                    user_id: r.get(6)?,
                    group_id: r.get(7)?,
                    permission: r.get(8)?,
                    size: r.get(9)?,
                    storage_id: r.get(10)?,
                    offset: r.get(11)?,
                    fragment_size: r.get(12)?,
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(frag_stmt);

    for (_old_entry_id, row) in rows {
        let (Some(&new_entity_id), Some(&new_storage_id)) =
            (entity_id_map.get(&row.entity_id), storage_id_map.get(&row.storage_id))
        else {
            continue;
        };
        main.add_file(
            AddEntryParams {
                entity_id: new_entity_id,
                uuid_id: 0,
                storage_id: new_storage_id,
                name: &row.name,
                time_last_access: row.time_last_access,
                time_modified: row.time_modified,
                time_last_changed: row.time_last_changed,
                user_id: row.user_id,
                group_id: row.group_id,
                permission: row.permission,
                size: row.size,
            },
            row.offset,
            row.fragment_size,
        )?;
        imported += 1;
    }

    let mut dir_stmt = old.prepare(
        "SELECT e.entityId, e.name, e.timeLastAccess, e.timeModified, e.timeLastChanged, \
                e.userId, e.groupId, e.permission, de.storageId, de.pathName \
         FROM entries e JOIN directoryEntries de ON de.entryId = e.id WHERE e.type = 'DIRECTORY'",
    )?;
    let dirs = dir_stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, i64>(5)?,
                r.get::<_, i64>(6)?,
                r.get::<_, i64>(7)?,
                r.get::<_, i64>(8)?,
                r.get::<_, String>(9)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(dir_stmt);

    for (old_entity, name, tla, tm, tlc, uid, gid, perm, old_storage, path_name) in dirs {
        let (Some(&new_entity_id), Some(&new_storage_id)) =
            (entity_id_map.get(&old_entity), storage_id_map.get(&old_storage))
        else {
            continue;
        };
        main.add_directory(
            AddEntryParams {
                entity_id: new_entity_id,
                uuid_id: 0,
                storage_id: new_storage_id,
                name: &name,
                time_last_access: tla,
                time_modified: tm,
                time_last_changed: tlc,
                user_id: uid,
                group_id: gid,
                permission: perm,
                size: 0,
            },
            &path_name,
        )?;
        imported += 1;
    }

    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn scan_finds_only_oldnnn_siblings() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("catalog.sqlite");
        fs::write(dir.path().join("catalog.sqlite.old001"), b"x").unwrap();
        fs::write(dir.path().join("catalog.sqlite.old002"), b"x").unwrap();
        fs::write(dir.path().join("catalog.sqlite.old002.fail"), b"x").unwrap();
        fs::write(dir.path().join("catalog.sqlite.wal"), b"x").unwrap();

        let found = scan_legacy_siblings(&base).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].sequence, 1);
        assert_eq!(found[1].sequence, 2);
    }

    #[test]
    fn scan_over_missing_directory_is_empty() {
        let found = scan_legacy_siblings(Path::new("/nonexistent/path/catalog.sqlite")).unwrap();
        assert!(found.is_empty());
    }
}
