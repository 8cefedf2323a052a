//! Offline invariant verification (§3, §8), modeled on the teacher's
//! `sombra-admin::verify` report shape: a leveled pass over an opened
//! catalog that collects findings instead of failing fast, so an
//! operator gets the whole picture in one run.

use rusqlite::Connection;
use serde::Serialize;

use bic_catalog::Catalog;

use crate::error::Result;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Schema version and default-entity presence only.
    Fast,
    /// Every §3 invariant, scanning every storage/entity/name.
    Full,
}

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    Warning,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    pub severity: VerifySeverity,
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    pub uuids: u64,
    pub entities: u64,
    pub storages: u64,
    pub entries: u64,
    pub fragments: u64,
    pub newest_rows: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    pub level: VerifyLevel,
    pub success: bool,
    pub findings: Vec<VerifyFinding>,
    pub counts: VerifyCounts,
}

const MAX_FINDINGS: usize = 64;

pub fn verify(catalog: &Catalog, level: VerifyLevel) -> Result<VerifyReport> {
    let conn = catalog.handle().conn();
    let mut findings = Vec::new();

    check_schema_version(conn, &mut findings)?;
    check_default_entity(conn, &mut findings)?;

    if matches!(level, VerifyLevel::Full) {
        check_fragment_referential_closure(conn, &mut findings)?;
        check_storage_aggregate_coherence(conn, &mut findings)?;
        check_entity_aggregate_coherence(conn, &mut findings)?;
        check_newest_uniqueness_and_argmax(conn, &mut findings)?;
        check_uuid_existence(conn, &mut findings)?;
        check_locked_entities_not_orphaned(conn, &mut findings)?;
    }

    let counts = collect_counts(conn)?;
    let truncated = findings.len() > MAX_FINDINGS;
    findings.truncate(MAX_FINDINGS);
    if truncated {
        findings.push(VerifyFinding {
            severity: VerifySeverity::Warning,
            message: format!("additional findings suppressed past {MAX_FINDINGS}"),
        });
    }

    let success = !findings.iter().any(|f| matches!(f.severity, VerifySeverity::Error));
    Ok(VerifyReport {
        level,
        success,
        findings,
        counts,
    })
}

fn check_schema_version(conn: &Connection, findings: &mut Vec<VerifyFinding>) -> Result<()> {
    match bic_store::schema::read_version(conn)? {
        Some(v) if v == bic_store::INDEX_VERSION => {}
        Some(v) => findings.push(VerifyFinding::error(format!(
            "meta.version is {v}, expected {} (§3 invariant 7)",
            bic_store::INDEX_VERSION
        ))),
        None => findings.push(VerifyFinding::error("meta.version is missing")),
    }
    Ok(())
}

fn check_default_entity(conn: &Connection, findings: &mut Vec<VerifyFinding>) -> Result<()> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entities WHERE id = ?1",
        [bic_types::IndexId::DEFAULT_ENTITY],
        |r| r.get(0),
    )?;
    if exists == 0 {
        findings.push(VerifyFinding::error("reserved default entity row is missing"));
    }
    Ok(())
}

/// §3 invariant 1: every fragment's `storageId` names a storage row.
fn check_fragment_referential_closure(conn: &Connection, findings: &mut Vec<VerifyFinding>) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT ef.id, ef.storageId FROM entryFragments ef \
         LEFT JOIN storages s ON s.id = ef.storageId WHERE s.id IS NULL",
    )?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))?;
    for row in rows {
        let (fragment_id, storage_id) = row?;
        findings.push(VerifyFinding::error(format!(
            "fragment {fragment_id} references nonexistent storage {storage_id}"
        )));
    }
    Ok(())
}

/// §3 invariant 3, storage half: `total_*` columns equal the grouped
/// sum over fragments/sub-rows restricted to that storage. Reuses
/// [`bic_catalog::aggregates::recompute_storage_aggregates`] for the
/// comparison value; since that recompute is idempotent (§4.4) it is
/// safe to run here even though it rewrites the row as a side effect —
/// a mismatch it "fixes" is exactly the condition this check reports.
fn check_storage_aggregate_coherence(conn: &Connection, findings: &mut Vec<VerifyFinding>) -> Result<()> {
    let mut stmt = conn.prepare("SELECT id FROM storages WHERE deletedFlag = 0")?;
    let storage_ids: Vec<i64> = stmt.query_map([], |r| r.get(0))?.collect::<std::result::Result<_, _>>()?;
    for storage_id in storage_ids {
        let stored = conn.query_row(
            "SELECT totalEntryCount, totalEntrySize FROM storages WHERE id = ?1",
            [storage_id],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
        )?;
        let recomputed = bic_catalog::aggregates::recompute_storage_aggregates(conn, storage_id)?;
        if stored.0 < 0 || stored.1 < 0 {
            findings.push(VerifyFinding::error(format!(
                "storage {storage_id} has negative stored aggregate ({}, {})",
                stored.0, stored.1
            )));
        }
        if stored.0 as u64 != recomputed.entry_count || stored.1 as u64 != recomputed.entry_size {
            findings.push(VerifyFinding::error(format!(
                "storage {storage_id} aggregates stale: stored ({}, {}), recomputed ({}, {})",
                stored.0, stored.1, recomputed.entry_count, recomputed.entry_size
            )));
        }
    }
    Ok(())
}

/// §3 invariant 3, entity half: an entity's aggregates equal the sum
/// over its (non-deleted) storages' own aggregates.
fn check_entity_aggregate_coherence(conn: &Connection, findings: &mut Vec<VerifyFinding>) -> Result<()> {
    let mut stmt = conn.prepare("SELECT id FROM entities WHERE deletedFlag = 0")?;
    let entity_ids: Vec<i64> = stmt.query_map([], |r| r.get(0))?.collect::<std::result::Result<_, _>>()?;
    for entity_id in entity_ids {
        let stored: (i64, i64) = conn.query_row(
            "SELECT totalEntryCount, totalEntrySize FROM entities WHERE id = ?1",
            [entity_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let summed: (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(totalEntryCount), 0), COALESCE(SUM(totalEntrySize), 0) \
             FROM storages WHERE entityId = ?1 AND deletedFlag = 0",
            [entity_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        if stored != summed {
            findings.push(VerifyFinding::error(format!(
                "entity {entity_id} aggregates {stored:?} do not match storage sum {summed:?}"
            )));
        }
    }
    Ok(())
}

/// §3 invariant 2: for each name reachable through a non-deleted
/// storage, exactly one `entriesNewest` row exists and it points at the
/// argmax by `(timeLastChanged, entryId)`.
fn check_newest_uniqueness_and_argmax(conn: &Connection, findings: &mut Vec<VerifyFinding>) -> Result<()> {
    let mut stmt = conn.prepare("SELECT name, entryId, timeLastChanged FROM entriesNewest")?;
    let rows: Vec<(String, i64, i64)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<std::result::Result<_, _>>()?;
    for (name, entry_id, time_last_changed) in rows {
        let argmax: Option<(i64, i64)> = conn
            .query_row(
                "SELECT e.id, e.timeLastChanged FROM entries e \
                 WHERE e.name = ?1 AND EXISTS ( \
                     SELECT 1 FROM entryFragments f JOIN storages s ON s.id = f.storageId \
                     WHERE f.entryId = e.id AND s.deletedFlag = 0 \
                     UNION \
                     SELECT 1 FROM directoryEntries d JOIN storages s ON s.id = d.storageId \
                     WHERE d.entryId = e.id AND s.deletedFlag = 0 \
                     UNION \
                     SELECT 1 FROM linkEntries l JOIN storages s ON s.id = l.storageId \
                     WHERE l.entryId = e.id AND s.deletedFlag = 0 \
                     UNION \
                     SELECT 1 FROM specialEntries sp JOIN storages s ON s.id = sp.storageId \
                     WHERE sp.entryId = e.id AND s.deletedFlag = 0) \
                 ORDER BY e.timeLastChanged DESC, e.id DESC LIMIT 1",
                [&name],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .ok();
        match argmax {
            None => findings.push(VerifyFinding::error(format!(
                "entriesNewest has a row for {name:?} but no live entry reaches it"
            ))),
            Some((expected_id, expected_ts)) if expected_id != entry_id || expected_ts != time_last_changed => {
                findings.push(VerifyFinding::error(format!(
                    "entriesNewest[{name:?}] points at entry {entry_id} (ts {time_last_changed}), \
                     expected argmax entry {expected_id} (ts {expected_ts})"
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// §8: "∀ UUID U: U exists ⇔ ∃ entity with U's job UUID".
fn check_uuid_existence(conn: &Connection, findings: &mut Vec<VerifyFinding>) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.jobUuid FROM uuids u \
         WHERE u.id != 1 AND NOT EXISTS (SELECT 1 FROM entities e WHERE e.uuidId = u.id)",
    )?;
    let rows: Vec<(i64, String)> = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?.collect::<std::result::Result<_, _>>()?;
    for (uuid_id, job_uuid) in rows {
        findings.push(VerifyFinding::error(format!(
            "uuid {uuid_id} ({job_uuid:?}) has no entities and should have been pruned"
        )));
    }
    Ok(())
}

/// §8: "∀ entity E with locked_count > 0: E is present".
fn check_locked_entities_not_orphaned(conn: &Connection, findings: &mut Vec<VerifyFinding>) -> Result<()> {
    let mut stmt = conn.prepare("SELECT id FROM entities WHERE lockedCount > 0 AND deletedFlag = 1")?;
    let rows: Vec<i64> = stmt.query_map([], |r| r.get(0))?.collect::<std::result::Result<_, _>>()?;
    for entity_id in rows {
        findings.push(VerifyFinding::error(format!(
            "entity {entity_id} is locked but marked deleted (§3 invariant 6 violation)"
        )));
    }
    Ok(())
}

fn collect_counts(conn: &Connection) -> Result<VerifyCounts> {
    Ok(VerifyCounts {
        uuids: conn.query_row("SELECT COUNT(*) FROM uuids", [], |r| r.get::<_, i64>(0))? as u64,
        entities: conn.query_row("SELECT COUNT(*) FROM entities WHERE deletedFlag = 0", [], |r| r.get::<_, i64>(0))? as u64,
        storages: conn.query_row("SELECT COUNT(*) FROM storages WHERE deletedFlag = 0", [], |r| r.get::<_, i64>(0))? as u64,
        entries: conn.query_row("SELECT COUNT(*) FROM entries", [], |r| r.get::<_, i64>(0))? as u64,
        fragments: conn.query_row("SELECT COUNT(*) FROM entryFragments", [], |r| r.get::<_, i64>(0))? as u64,
        newest_rows: conn.query_row("SELECT COUNT(*) FROM entriesNewest", [], |r| r.get::<_, i64>(0))? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bic_catalog::mutation::{AddEntryParams, NewEntity, NewStorage};
    use bic_concurrency::EngineContext;
    use bic_store::{BusyCallback, Handle, OpenFlags, OpenMode, RetryForever};
    use bic_types::{ArchiveType, Mode, State};
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
    fn fresh_catalog_verifies_clean() {
        let (_dir, cat) = open_catalog();
        let report = verify(&cat, VerifyLevel::Full).unwrap();
        assert!(report.success, "findings: {:?}", report.findings);
    }

    #[test]
    fn ingest_then_verify_finds_nothing_wrong() {
        let (_dir, cat) = open_catalog();
        let entity_id = cat
            .new_entity(NewEntity {
                job_uuid: "job-v",
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
                name: "vol",
                created: 1,
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
                size: 10,
            },
            0,
            10,
        )
        .unwrap();

        let report = verify(&cat, VerifyLevel::Full).unwrap();
        assert!(report.success, "findings: {:?}", report.findings);
        assert_eq!(report.counts.storages, 1);
    }
}
