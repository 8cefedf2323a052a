//! Row types mirroring §3's data model. These are plain DTOs returned
//! by the query surface; the tables themselves live in
//! `bic_store::schema`.

use serde::Serialize;

use bic_types::{ArchiveType, EntryKind, Mode, State};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UuidRow {
    pub id: i64,
    pub job_uuid: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityRow {
    pub id: i64,
    pub job_uuid: String,
    pub uuid_id: i64,
    pub schedule_uuid: String,
    pub host_name: String,
    pub user_name: String,
    pub archive_type: ArchiveType,
    pub created: i64,
    pub locked_count: i64,
    pub deleted_flag: bool,
    pub aggregates: Aggregates,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StorageRow {
    pub id: i64,
    pub entity_id: i64,
    pub uuid_id: i64,
    pub host_name: String,
    pub user_name: String,
    pub name: String,
    pub created: i64,
    pub size: i64,
    pub state: State,
    pub mode: Mode,
    pub last_checked: i64,
    pub error_message: String,
    pub deleted_flag: bool,
    pub aggregates: Aggregates,
}

/// Per-kind counts/sizes, "all" and "newest" variants (§3 invariant 3).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Aggregates {
    pub entry_count: u64,
    pub entry_size: u64,
    pub file_count: u64,
    pub file_size: u64,
    pub image_count: u64,
    pub image_size: u64,
    pub directory_count: u64,
    pub link_count: u64,
    pub hardlink_count: u64,
    pub hardlink_size: u64,
    pub special_count: u64,

    pub entry_count_newest: u64,
    pub entry_size_newest: u64,
    pub file_count_newest: u64,
    pub file_size_newest: u64,
    pub image_count_newest: u64,
    pub image_size_newest: u64,
    pub directory_count_newest: u64,
    pub link_count_newest: u64,
    pub hardlink_count_newest: u64,
    pub hardlink_size_newest: u64,
    pub special_count_newest: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntryRow {
    pub id: i64,
    pub entity_id: i64,
    pub uuid_id: i64,
    pub kind: EntryKind,
    pub name: String,
    pub time_last_access: i64,
    pub time_modified: i64,
    pub time_last_changed: i64,
    pub user_id: i64,
    pub group_id: i64,
    pub permission: i64,
    pub size: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FragmentRow {
    pub id: i64,
    pub entry_id: i64,
    pub storage_id: i64,
    pub offset: i64,
    pub size: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DirectoryEntryRow {
    pub entry_id: i64,
    pub storage_id: i64,
    pub path_name: String,
    pub total_entry_count: u64,
    pub total_entry_size: u64,
    pub total_entry_count_newest: u64,
    pub total_entry_size_newest: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewestEntryRow {
    pub name: String,
    pub entry_id: i64,
    pub uuid_id: i64,
    pub entity_id: i64,
    pub kind: EntryKind,
    pub time_last_access: i64,
    pub time_modified: i64,
    pub time_last_changed: i64,
    pub user_id: i64,
    pub group_id: i64,
    pub permission: i64,
    pub size: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryRow {
    pub id: i64,
    pub entity_id: i64,
    pub started: i64,
    pub duration: i64,
    pub entry_count: u64,
    pub entry_size: u64,
    pub error_count: u64,
}
