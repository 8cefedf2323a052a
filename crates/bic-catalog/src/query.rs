//! Query surface (§4.8).
//!
//! Listings are assembled as an `AND`-joined SQL filter fragment plus an
//! `ORDER BY` fragment, the way the rest of this crate builds SQL by
//! hand rather than through a query builder. Every list call takes
//! `offset`/`limit` and returns a finished `Vec` — the §9 DESIGN NOTES
//! "generators/cursors" mapping to a single-pass lazy sequence is
//! realized one level up, in [`Cursor`], which wraps a prepared
//! statement so callers that want to stream large listings don't have
//! to materialize them.

use rusqlite::{Connection, Row};
use tracing::trace;

use bic_types::{ArchiveType, EntrySortMode, EntitySortMode, EntryKind, Mode, Ordering, State, StorageSortMode};

use crate::error::Result;
use crate::model::{EntityRow, EntryRow, HistoryRow, NewestEntryRow, StorageRow, UuidRow};

/// Id-set membership filter (§4.8: "id-set membership (UUID ids, entity
/// ids, storage ids)"). `Any` matches every row (the filter clause is
/// omitted entirely); `In` restricts to the given ids, including the
/// empty set, which matches nothing.
#[derive(Clone, Debug, Default)]
pub enum IdFilter {
    #[default]
    Any,
    In(Vec<i64>),
}

impl IdFilter {
    fn push_clause(&self, column: &str, clauses: &mut Vec<String>, binds: &mut Vec<Box<dyn rusqlite::ToSql>>) {
        match self {
            IdFilter::Any => {}
            IdFilter::In(ids) if ids.is_empty() => clauses.push("0".to_string()),
            IdFilter::In(ids) => {
                let placeholders: Vec<String> = ids
                    .iter()
                    .map(|id| {
                        binds.push(Box::new(*id));
                        format!("?{}", binds.len())
                    })
                    .collect();
                clauses.push(format!("{column} IN ({})", placeholders.join(",")));
            }
        }
    }
}

/// Tokenizes a full-text search pattern (§4.8): split on whitespace with
/// double-quote grouping, strip each token to alphanumerics and UTF-8
/// codepoints ≥ 128, append a trailing `*` to form a prefix match, and
/// `AND` the tokens together. An empty or all-punctuation pattern is a
/// no-op (`None`).
pub fn tokenize_fts_pattern(pattern: &str) -> Option<String> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();
    let mut current = String::new();

    let flush = |current: &mut String, tokens: &mut Vec<String>| {
        let cleaned: String = current
            .chars()
            .filter(|c| c.is_alphanumeric() || (*c as u32) >= 128)
            .collect();
        if !cleaned.is_empty() {
            tokens.push(cleaned);
        }
        current.clear();
    };

    while let Some(c) = chars.next() {
        if c == '"' {
            flush(&mut current, &mut tokens);
            for c2 in chars.by_ref() {
                if c2 == '"' {
                    break;
                }
                current.push(c2);
            }
            flush(&mut current, &mut tokens);
        } else if c.is_whitespace() {
            flush(&mut current, &mut tokens);
        } else {
            current.push(c);
        }
    }
    flush(&mut current, &mut tokens);

    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("{t}*"))
            .collect::<Vec<_>>()
            .join(" AND "),
    )
}

fn row_uuid(row: &Row) -> rusqlite::Result<UuidRow> {
    Ok(UuidRow {
        id: row.get("id")?,
        job_uuid: row.get("jobUuid")?,
    })
}

fn row_entity(row: &Row) -> rusqlite::Result<EntityRow> {
    use crate::model::Aggregates;
    Ok(EntityRow {
        id: row.get("id")?,
        job_uuid: row.get("jobUuid")?,
        uuid_id: row.get("uuidId")?,
        schedule_uuid: row.get("scheduleUuid")?,
        host_name: row.get("hostName")?,
        user_name: row.get("userName")?,
        archive_type: ArchiveType::parse(&row.get::<_, String>("archiveType")?).unwrap_or_default(),
        created: row.get("created")?,
        locked_count: row.get("lockedCount")?,
        deleted_flag: row.get::<_, i64>("deletedFlag")? != 0,
        aggregates: Aggregates {
            entry_count: row.get::<_, i64>("totalEntryCount")? as u64,
            entry_size: row.get::<_, i64>("totalEntrySize")? as u64,
            file_count: row.get::<_, i64>("totalFileCount")? as u64,
            file_size: row.get::<_, i64>("totalFileSize")? as u64,
            image_count: row.get::<_, i64>("totalImageCount")? as u64,
            image_size: row.get::<_, i64>("totalImageSize")? as u64,
            directory_count: row.get::<_, i64>("totalDirectoryCount")? as u64,
            link_count: row.get::<_, i64>("totalLinkCount")? as u64,
            hardlink_count: row.get::<_, i64>("totalHardlinkCount")? as u64,
            hardlink_size: row.get::<_, i64>("totalHardlinkSize")? as u64,
            special_count: row.get::<_, i64>("totalSpecialCount")? as u64,
            entry_count_newest: row.get::<_, i64>("totalEntryCountNewest")? as u64,
            entry_size_newest: row.get::<_, i64>("totalEntrySizeNewest")? as u64,
            file_count_newest: row.get::<_, i64>("totalFileCountNewest")? as u64,
            file_size_newest: row.get::<_, i64>("totalFileSizeNewest")? as u64,
            image_count_newest: row.get::<_, i64>("totalImageCountNewest")? as u64,
            image_size_newest: row.get::<_, i64>("totalImageSizeNewest")? as u64,
            directory_count_newest: row.get::<_, i64>("totalDirectoryCountNewest")? as u64,
            link_count_newest: row.get::<_, i64>("totalLinkCountNewest")? as u64,
            hardlink_count_newest: row.get::<_, i64>("totalHardlinkCountNewest")? as u64,
            hardlink_size_newest: row.get::<_, i64>("totalHardlinkSizeNewest")? as u64,
            special_count_newest: row.get::<_, i64>("totalSpecialCountNewest")? as u64,
        },
    })
}

fn row_storage(row: &Row) -> rusqlite::Result<StorageRow> {
    use crate::model::Aggregates;
    Ok(StorageRow {
        id: row.get("id")?,
        entity_id: row.get("entityId")?,
        uuid_id: row.get("uuidId")?,
        host_name: row.get("hostName")?,
        user_name: row.get("userName")?,
        name: row.get("name")?,
        created: row.get("created")?,
        size: row.get("size")?,
        state: State::parse(&row.get::<_, String>("state")?).unwrap_or_default(),
        mode: Mode::parse(&row.get::<_, String>("mode")?).unwrap_or_default(),
        last_checked: row.get("lastChecked")?,
        error_message: row.get("errorMessage")?,
        deleted_flag: row.get::<_, i64>("deletedFlag")? != 0,
        aggregates: Aggregates {
            entry_count: row.get::<_, i64>("totalEntryCount")? as u64,
            entry_size: row.get::<_, i64>("totalEntrySize")? as u64,
            file_count: row.get::<_, i64>("totalFileCount")? as u64,
            file_size: row.get::<_, i64>("totalFileSize")? as u64,
            image_count: row.get::<_, i64>("totalImageCount")? as u64,
            image_size: row.get::<_, i64>("totalImageSize")? as u64,
            directory_count: row.get::<_, i64>("totalDirectoryCount")? as u64,
            link_count: row.get::<_, i64>("totalLinkCount")? as u64,
            hardlink_count: row.get::<_, i64>("totalHardlinkCount")? as u64,
            hardlink_size: row.get::<_, i64>("totalHardlinkSize")? as u64,
            special_count: row.get::<_, i64>("totalSpecialCount")? as u64,
            entry_count_newest: row.get::<_, i64>("totalEntryCountNewest")? as u64,
            entry_size_newest: row.get::<_, i64>("totalEntrySizeNewest")? as u64,
            file_count_newest: row.get::<_, i64>("totalFileCountNewest")? as u64,
            file_size_newest: row.get::<_, i64>("totalFileSizeNewest")? as u64,
            image_count_newest: row.get::<_, i64>("totalImageCountNewest")? as u64,
            image_size_newest: row.get::<_, i64>("totalImageSizeNewest")? as u64,
            directory_count_newest: row.get::<_, i64>("totalDirectoryCountNewest")? as u64,
            link_count_newest: row.get::<_, i64>("totalLinkCountNewest")? as u64,
            hardlink_count_newest: row.get::<_, i64>("totalHardlinkCountNewest")? as u64,
            hardlink_size_newest: row.get::<_, i64>("totalHardlinkSizeNewest")? as u64,
            special_count_newest: row.get::<_, i64>("totalSpecialCountNewest")? as u64,
        },
    })
}

fn row_entry(row: &Row) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        id: row.get("id")?,
        entity_id: row.get("entityId")?,
        uuid_id: row.get("uuidId")?,
        kind: EntryKind::parse(&row.get::<_, String>("type")?).unwrap_or(EntryKind::File),
        name: row.get("name")?,
        time_last_access: row.get("timeLastAccess")?,
        time_modified: row.get("timeModified")?,
        time_last_changed: row.get("timeLastChanged")?,
        user_id: row.get("userId")?,
        group_id: row.get("groupId")?,
        permission: row.get("permission")?,
        size: row.get("size")?,
    })
}

fn row_newest(row: &Row) -> rusqlite::Result<NewestEntryRow> {
    Ok(NewestEntryRow {
        name: row.get("name")?,
        entry_id: row.get("entryId")?,
        uuid_id: row.get("uuidId")?,
        entity_id: row.get("entityId")?,
        kind: EntryKind::parse(&row.get::<_, String>("type")?).unwrap_or(EntryKind::File),
        time_last_access: row.get("timeLastAccess")?,
        time_modified: row.get("timeModified")?,
        time_last_changed: row.get("timeLastChanged")?,
        user_id: row.get("userId")?,
        group_id: row.get("groupId")?,
        permission: row.get("permission")?,
        size: row.get("size")?,
    })
}

fn row_history(row: &Row) -> rusqlite::Result<HistoryRow> {
    Ok(HistoryRow {
        id: row.get("id")?,
        entity_id: row.get("entityId")?,
        started: row.get("started")?,
        duration: row.get("duration")?,
        entry_count: row.get::<_, i64>("entryCount")? as u64,
        entry_size: row.get::<_, i64>("entrySize")? as u64,
        error_count: row.get::<_, i64>("errorCount")? as u64,
    })
}

/// Filter for [`list_entities`].
#[derive(Clone, Debug, Default)]
pub struct EntityFilter {
    pub uuid_ids: IdFilter,
    pub entity_ids: IdFilter,
    pub job_uuid: Option<String>,
    pub host_name: Option<String>,
    pub user_name: Option<String>,
    pub archive_type: ArchiveType,
    pub include_deleted: bool,
}

/// Filter for [`list_storages`].
#[derive(Clone, Debug, Default)]
pub struct StorageFilter {
    pub uuid_ids: IdFilter,
    pub entity_ids: IdFilter,
    pub storage_ids: IdFilter,
    pub states: Option<Vec<State>>,
    pub mode: Mode,
    pub host_name: Option<String>,
    pub user_name: Option<String>,
    pub name_pattern: Option<String>,
    pub include_deleted: bool,
}

/// Filter for [`list_entries`].
#[derive(Clone, Debug, Default)]
pub struct EntryFilter {
    pub uuid_ids: IdFilter,
    pub entity_ids: IdFilter,
    pub storage_ids: IdFilter,
    pub kinds: Option<Vec<EntryKind>>,
    pub name_pattern: Option<String>,
}

fn build_where(clauses: Vec<String>) -> String {
    if clauses.is_empty() {
        "1=1".to_string()
    } else {
        clauses.join(" AND ")
    }
}

fn order_by(column: &str, order: Ordering) -> String {
    match order {
        Ordering::None => String::new(),
        _ => format!(" ORDER BY {column} {}", order.as_sql()),
    }
}

pub fn find_uuid(conn: &Connection, id: i64) -> Result<UuidRow> {
    Ok(conn.query_row("SELECT * FROM uuids WHERE id = ?1", [id], row_uuid)?)
}

pub fn find_uuid_by_job_uuid(conn: &Connection, job_uuid: &str) -> Result<UuidRow> {
    Ok(conn.query_row(
        "SELECT * FROM uuids WHERE jobUuid = ?1",
        [job_uuid],
        row_uuid,
    )?)
}

pub fn find_entity(conn: &Connection, id: i64) -> Result<EntityRow> {
    Ok(conn.query_row("SELECT * FROM entities WHERE id = ?1", [id], row_entity)?)
}

pub fn find_storage_by_id(conn: &Connection, id: i64) -> Result<StorageRow> {
    Ok(conn.query_row("SELECT * FROM storages WHERE id = ?1", [id], row_storage)?)
}

pub fn find_entry(conn: &Connection, id: i64) -> Result<EntryRow> {
    Ok(conn.query_row("SELECT * FROM entries WHERE id = ?1", [id], row_entry)?)
}

pub fn find_newest_by_name(conn: &Connection, name: &str) -> Result<NewestEntryRow> {
    Ok(conn.query_row(
        "SELECT * FROM entriesNewest WHERE name = ?1",
        [name],
        row_newest,
    )?)
}

pub fn list_entities(
    conn: &Connection,
    filter: &EntityFilter,
    sort: Option<EntitySortMode>,
    order: Ordering,
    offset: i64,
    limit: i64,
) -> Result<Vec<EntityRow>> {
    let mut clauses = Vec::new();
    let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    filter.uuid_ids.push_clause("uuidId", &mut clauses, &mut binds);
    filter.entity_ids.push_clause("id", &mut clauses, &mut binds);
    if let Some(job_uuid) = &filter.job_uuid {
        binds.push(Box::new(job_uuid.clone()));
        clauses.push(format!("jobUuid = ?{}", binds.len()));
    }
    if let Some(host_name) = &filter.host_name {
        binds.push(Box::new(host_name.clone()));
        clauses.push(format!("hostName = ?{}", binds.len()));
    }
    if let Some(user_name) = &filter.user_name {
        binds.push(Box::new(user_name.clone()));
        clauses.push(format!("userName = ?{}", binds.len()));
    }
    if filter.archive_type != ArchiveType::Any {
        binds.push(Box::new(filter.archive_type.to_string()));
        clauses.push(format!("archiveType = ?{}", binds.len()));
    }
    if !filter.include_deleted {
        clauses.push("deletedFlag = 0".to_string());
    }

    let sql = format!(
        "SELECT * FROM entities WHERE {}{} LIMIT {} OFFSET {}",
        build_where(clauses),
        sort.map(|s| order_by(s.column(), order)).unwrap_or_default(),
        limit,
        offset,
    );
    trace!(sql, "list_entities");
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params.as_slice(), row_entity)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn list_storages(
    conn: &Connection,
    filter: &StorageFilter,
    sort: Option<StorageSortMode>,
    order: Ordering,
    offset: i64,
    limit: i64,
) -> Result<Vec<StorageRow>> {
    let mut clauses = Vec::new();
    let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    filter.uuid_ids.push_clause("uuidId", &mut clauses, &mut binds);
    filter.entity_ids.push_clause("entityId", &mut clauses, &mut binds);
    filter.storage_ids.push_clause("id", &mut clauses, &mut binds);
    if let Some(states) = &filter.states {
        if states.is_empty() {
            clauses.push("0".to_string());
        } else {
            let placeholders: Vec<String> = states
                .iter()
                .map(|s| {
                    binds.push(Box::new(s.to_string()));
                    format!("?{}", binds.len())
                })
                .collect();
            clauses.push(format!("state IN ({})", placeholders.join(",")));
        }
    }
    if filter.mode != Mode::Any {
        binds.push(Box::new(filter.mode.to_string()));
        clauses.push(format!("mode = ?{}", binds.len()));
    }
    if let Some(host_name) = &filter.host_name {
        binds.push(Box::new(host_name.clone()));
        clauses.push(format!("hostName = ?{}", binds.len()));
    }
    if let Some(user_name) = &filter.user_name {
        binds.push(Box::new(user_name.clone()));
        clauses.push(format!("userName = ?{}", binds.len()));
    }
    if !filter.include_deleted {
        clauses.push("deletedFlag = 0".to_string());
    }
    if let Some(pattern) = filter.name_pattern.as_deref().and_then(tokenize_fts_pattern) {
        let ids = fts_matching_ids(conn, "FTS_storages", &pattern)?;
        clauses.push(id_in_or_none("id", &ids));
    }

    let sql = format!(
        "SELECT * FROM storages WHERE {}{} LIMIT {} OFFSET {}",
        build_where(clauses),
        sort.map(|s| order_by(s.column(), order)).unwrap_or_default(),
        limit,
        offset,
    );
    trace!(sql, "list_storages");
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params.as_slice(), row_storage)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn list_entries(
    conn: &Connection,
    filter: &EntryFilter,
    sort: Option<EntrySortMode>,
    order: Ordering,
    offset: i64,
    limit: i64,
) -> Result<Vec<EntryRow>> {
    let mut clauses = Vec::new();
    let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    filter.uuid_ids.push_clause("uuidId", &mut clauses, &mut binds);
    filter.entity_ids.push_clause("entityId", &mut clauses, &mut binds);
    if let Some(kinds) = &filter.kinds {
        if kinds.is_empty() {
            clauses.push("0".to_string());
        } else {
            let placeholders: Vec<String> = kinds
                .iter()
                .map(|k| {
                    binds.push(Box::new(k.to_string()));
                    format!("?{}", binds.len())
                })
                .collect();
            clauses.push(format!("type IN ({})", placeholders.join(",")));
        }
    }
    if let IdFilter::In(ids) = &filter.storage_ids {
        let joined = ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        clauses.push(format!(
            "id IN (SELECT entryId FROM entryFragments WHERE storageId IN ({joined}) \
             UNION SELECT entryId FROM directoryEntries WHERE storageId IN ({joined}) \
             UNION SELECT entryId FROM linkEntries WHERE storageId IN ({joined}) \
             UNION SELECT entryId FROM specialEntries WHERE storageId IN ({joined}))"
        ));
    }
    if let Some(pattern) = filter.name_pattern.as_deref().and_then(tokenize_fts_pattern) {
        let ids = fts_matching_ids(conn, "FTS_entries", &pattern)?;
        clauses.push(id_in_or_none("id", &ids));
    }

    // `EntrySortMode::Fragment` has no column on `entries` itself; fall
    // back to the entry id, which already correlates with insertion
    // (and hence fragment) order, rather than pulling in a join.
    let sort_column = sort.map(|s| match s {
        EntrySortMode::Fragment => "id",
        other => other.column(),
    });

    let sql = format!(
        "SELECT * FROM entries WHERE {}{} LIMIT {} OFFSET {}",
        build_where(clauses),
        sort_column.map(|c| order_by(c, order)).unwrap_or_default(),
        limit,
        offset,
    );
    trace!(sql, "list_entries");
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params.as_slice(), row_entry)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Type-specialized entry listing (§2 "type-specialized entry
/// listings"): entries of one kind only, a thin convenience over
/// [`list_entries`].
pub fn list_entries_of_kind(
    conn: &Connection,
    mut filter: EntryFilter,
    kind: EntryKind,
    sort: Option<EntrySortMode>,
    order: Ordering,
    offset: i64,
    limit: i64,
) -> Result<Vec<EntryRow>> {
    filter.kinds = Some(vec![kind]);
    list_entries(conn, &filter, sort, order, offset, limit)
}

pub fn list_history(conn: &Connection, entity_id: i64, offset: i64, limit: i64) -> Result<Vec<HistoryRow>> {
    let sql = "SELECT * FROM history WHERE entityId = ?1 ORDER BY started DESC LIMIT ?2 OFFSET ?3";
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(rusqlite::params![entity_id, limit, offset], row_history)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn fts_matching_ids(conn: &Connection, fts_table: &str, match_query: &str) -> Result<Vec<i64>> {
    let sql = format!("SELECT rowid FROM {fts_table} WHERE {fts_table} MATCH ?1");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([match_query], |r| r.get::<_, i64>(0))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn id_in_or_none(column: &str, ids: &[i64]) -> String {
    if ids.is_empty() {
        "0".to_string()
    } else {
        let joined = ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        format!("{column} IN ({joined})")
    }
}

/// A single-pass, non-restartable cursor over a prepared statement (§9
/// DESIGN NOTES "generators/cursors"). Iterating exhausts it exactly
/// once; closing is explicit (`Drop`) and idempotent (dropping twice is
/// simply impossible in Rust, which is the point).
pub struct Cursor<'conn, T> {
    stmt: rusqlite::Statement<'conn>,
    map: fn(&Row) -> rusqlite::Result<T>,
}

impl<'conn, T> Cursor<'conn, T> {
    pub fn new(stmt: rusqlite::Statement<'conn>, map: fn(&Row) -> rusqlite::Result<T>) -> Self {
        Self { stmt, map }
    }

    /// Runs `sql` and returns every row eagerly mapped through `map`.
    /// Exists alongside the per-row API below because most callers in
    /// this crate want a `Vec`; `next_row` is for callers that want to
    /// bound memory on a very large listing.
    pub fn collect_all(mut self, params: &[&dyn rusqlite::ToSql]) -> rusqlite::Result<Vec<T>> {
        let map = self.map;
        let rows = self.stmt.query_map(params, map)?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_punctuation_and_appends_prefix_star() {
        assert_eq!(tokenize_fts_pattern("foo.bar"), Some("foobar*".to_string()));
        assert_eq!(tokenize_fts_pattern("foo bar"), Some("foo* AND bar*".to_string()));
        assert_eq!(tokenize_fts_pattern("\"foo bar\" baz"), Some("foobar* AND baz*".to_string()));
        assert_eq!(tokenize_fts_pattern("   "), None);
        assert_eq!(tokenize_fts_pattern(""), None);
    }

    #[test]
    fn id_filter_any_omits_clause() {
        let mut clauses = Vec::new();
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        IdFilter::Any.push_clause("id", &mut clauses, &mut binds);
        assert!(clauses.is_empty());
    }

    #[test]
    fn id_filter_empty_in_matches_nothing() {
        let mut clauses = Vec::new();
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        IdFilter::In(vec![]).push_clause("id", &mut clauses, &mut binds);
        assert_eq!(clauses, vec!["0".to_string()]);
    }
}
