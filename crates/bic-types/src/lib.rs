#![forbid(unsafe_code)]
//! Identifier and closed-enum type model for the backup index catalog.
//!
//! Every externally visible catalog row id is an [`IndexId`]: a tagged
//! 64-bit value that carries its own row type. Two sentinels exist,
//! [`IndexId::NONE`] and [`IndexId::ANY`], used as "no id" and "wildcard
//! in filters" respectively.

use std::fmt;

/// The type tag carried by an [`IndexId`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum IndexType {
    None,
    Any,
    Uuid,
    Entity,
    Storage,
    Entry,
    File,
    Image,
    Directory,
    Link,
    Hardlink,
    Special,
    History,
}

impl IndexType {
    /// Parses the canonical textual form used on the wire (§6), case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "NONE" => IndexType::None,
            "ANY" => IndexType::Any,
            "UUID" => IndexType::Uuid,
            "ENTITY" => IndexType::Entity,
            "STORAGE" => IndexType::Storage,
            "ENTRY" => IndexType::Entry,
            "FILE" => IndexType::File,
            "IMAGE" => IndexType::Image,
            "DIRECTORY" => IndexType::Directory,
            "LINK" => IndexType::Link,
            "HARDLINK" => IndexType::Hardlink,
            "SPECIAL" => IndexType::Special,
            "HISTORY" => IndexType::History,
            _ => return None,
        })
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexType::None => "NONE",
            IndexType::Any => "ANY",
            IndexType::Uuid => "UUID",
            IndexType::Entity => "ENTITY",
            IndexType::Storage => "STORAGE",
            IndexType::Entry => "ENTRY",
            IndexType::File => "FILE",
            IndexType::Image => "IMAGE",
            IndexType::Directory => "DIRECTORY",
            IndexType::Link => "LINK",
            IndexType::Hardlink => "HARDLINK",
            IndexType::Special => "SPECIAL",
            IndexType::History => "HISTORY",
        };
        write!(f, "{s}")
    }
}

/// A tagged catalog row id (§4.1).
///
/// Passing the wrong variant to a typed API is a programming error: in
/// debug builds it trips a `debug_assert!`, in release it surfaces as
/// [`TypeError::WrongType`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum IndexId {
    None,
    Any,
    Uuid(i64),
    Entity(i64),
    Storage(i64),
    Entry(i64),
    File(i64),
    Image(i64),
    Directory(i64),
    Link(i64),
    Hardlink(i64),
    Special(i64),
    History(i64),
}

impl IndexId {
    pub const NONE: IndexId = IndexId::None;
    pub const ANY: IndexId = IndexId::Any;

    /// The reserved id of the "default entity" (§3, §9): storages not
    /// grouped under a specific backup run live here. The core only
    /// reserves the constant; whether/when to use it is a policy
    /// decision owned by the caller.
    pub const DEFAULT_ENTITY: i64 = 1;

    pub fn ty(self) -> IndexType {
        match self {
            IndexId::None => IndexType::None,
            IndexId::Any => IndexType::Any,
            IndexId::Uuid(_) => IndexType::Uuid,
            IndexId::Entity(_) => IndexType::Entity,
            IndexId::Storage(_) => IndexType::Storage,
            IndexId::Entry(_) => IndexType::Entry,
            IndexId::File(_) => IndexType::File,
            IndexId::Image(_) => IndexType::Image,
            IndexId::Directory(_) => IndexType::Directory,
            IndexId::Link(_) => IndexType::Link,
            IndexId::Hardlink(_) => IndexType::Hardlink,
            IndexId::Special(_) => IndexType::Special,
            IndexId::History(_) => IndexType::History,
        }
    }

    /// The raw row id, if this is a concrete (non-sentinel) id.
    pub fn raw(self) -> Option<i64> {
        match self {
            IndexId::None | IndexId::Any => None,
            IndexId::Uuid(v)
            | IndexId::Entity(v)
            | IndexId::Storage(v)
            | IndexId::Entry(v)
            | IndexId::File(v)
            | IndexId::Image(v)
            | IndexId::Directory(v)
            | IndexId::Link(v)
            | IndexId::Hardlink(v)
            | IndexId::Special(v)
            | IndexId::History(v) => Some(v),
        }
    }

    pub fn is_none(self) -> bool {
        matches!(self, IndexId::None)
    }

    pub fn is_any(self) -> bool {
        matches!(self, IndexId::Any)
    }

    /// Asserts this id carries `expected`, returning the raw row id.
    ///
    /// Debug builds panic (contract violation); release builds return
    /// [`TypeError::WrongType`] so a misuse never corrupts the catalog
    /// silently.
    pub fn expect_raw(self, expected: IndexType) -> Result<i64, TypeError> {
        debug_assert_eq!(
            self.ty(),
            expected,
            "IndexId type mismatch: expected {expected}, got {}",
            self.ty()
        );
        if self.ty() != expected {
            return Err(TypeError::WrongType {
                expected,
                actual: self.ty(),
            });
        }
        self.raw().ok_or(TypeError::WrongType {
            expected,
            actual: self.ty(),
        })
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw() {
            Some(raw) => write!(f, "{}:{}", self.ty(), raw),
            None => write!(f, "{}", self.ty()),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TypeError {
    #[error("expected id of type {expected}, got {actual}")]
    WrongType {
        expected: IndexType,
        actual: IndexType,
    },
}

/// Storage/entity lifecycle state (§6).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, serde::Serialize, serde::Deserialize)]
pub enum State {
    #[default]
    None,
    Ok,
    Create,
    UpdateRequested,
    Update,
    Error,
}

impl State {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "NONE" => State::None,
            "OK" => State::Ok,
            "CREATE" => State::Create,
            "UPDATE_REQUESTED" => State::UpdateRequested,
            "UPDATE" => State::Update,
            "ERROR" => State::Error,
            _ => return None,
        })
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::None => "NONE",
            State::Ok => "OK",
            State::Create => "CREATE",
            State::UpdateRequested => "UPDATE_REQUESTED",
            State::Update => "UPDATE",
            State::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// Storage acquisition mode (§6).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, serde::Serialize, serde::Deserialize)]
pub enum Mode {
    Manual,
    #[default]
    Auto,
    Any,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "MANUAL" => Mode::Manual,
            "AUTO" => Mode::Auto,
            "*" | "ANY" => Mode::Any,
            _ => return None,
        })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Manual => "MANUAL",
            Mode::Auto => "AUTO",
            Mode::Any => "*",
        };
        write!(f, "{s}")
    }
}

/// Entity archive type (§3).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, serde::Serialize, serde::Deserialize)]
pub enum ArchiveType {
    Normal,
    #[default]
    Full,
    Incremental,
    Differential,
    Continuous,
    ContinuousDeleted,
    Any,
}

impl ArchiveType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "NORMAL" => ArchiveType::Normal,
            "FULL" => ArchiveType::Full,
            "INCREMENTAL" => ArchiveType::Incremental,
            "DIFFERENTIAL" => ArchiveType::Differential,
            "CONTINUOUS" => ArchiveType::Continuous,
            "CONTINUOUS_DELETED" => ArchiveType::ContinuousDeleted,
            "ANY" | "*" => ArchiveType::Any,
            _ => return None,
        })
    }
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArchiveType::Normal => "NORMAL",
            ArchiveType::Full => "FULL",
            ArchiveType::Incremental => "INCREMENTAL",
            ArchiveType::Differential => "DIFFERENTIAL",
            ArchiveType::Continuous => "CONTINUOUS",
            ArchiveType::ContinuousDeleted => "CONTINUOUS_DELETED",
            ArchiveType::Any => "ANY",
        };
        write!(f, "{s}")
    }
}

/// Entry kind (§3). Distinct from [`IndexType`] in that it only spans
/// the entry sub-kinds, never uuid/entity/storage/history.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, serde::Serialize, serde::Deserialize)]
pub enum EntryKind {
    File,
    Image,
    Directory,
    Link,
    Hardlink,
    Special,
}

impl EntryKind {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "FILE" => EntryKind::File,
            "IMAGE" => EntryKind::Image,
            "DIRECTORY" => EntryKind::Directory,
            "LINK" => EntryKind::Link,
            "HARDLINK" => EntryKind::Hardlink,
            "SPECIAL" => EntryKind::Special,
            _ => return None,
        })
    }

    pub fn as_index_type(self) -> IndexType {
        match self {
            EntryKind::File => IndexType::File,
            EntryKind::Image => IndexType::Image,
            EntryKind::Directory => IndexType::Directory,
            EntryKind::Link => IndexType::Link,
            EntryKind::Hardlink => IndexType::Hardlink,
            EntryKind::Special => IndexType::Special,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryKind::File => "FILE",
            EntryKind::Image => "IMAGE",
            EntryKind::Directory => "DIRECTORY",
            EntryKind::Link => "LINK",
            EntryKind::Hardlink => "HARDLINK",
            EntryKind::Special => "SPECIAL",
        };
        write!(f, "{s}")
    }
}

/// Result ordering direction for list calls (§6).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum Ordering {
    Ascending,
    Descending,
    #[default]
    None,
}

impl Ordering {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "ASCENDING" => Ordering::Ascending,
            "DESCENDING" => Ordering::Descending,
            "NONE" => Ordering::None,
            _ => return None,
        })
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Ordering::Ascending => "ASC",
            Ordering::Descending => "DESC",
            Ordering::None => "",
        }
    }
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Ordering::Ascending => "ASCENDING",
            Ordering::Descending => "DESCENDING",
            Ordering::None => "NONE",
        };
        write!(f, "{s}")
    }
}

/// Sort modes for entity listings (§6).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum EntitySortMode {
    JobUuid,
    Created,
}

impl EntitySortMode {
    pub fn column(self) -> &'static str {
        match self {
            EntitySortMode::JobUuid => "jobUuid",
            EntitySortMode::Created => "created",
        }
    }
}

/// Sort modes for storage listings (§6).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum StorageSortMode {
    Name,
    Size,
    Created,
    State,
}

impl StorageSortMode {
    pub fn column(self) -> &'static str {
        match self {
            StorageSortMode::Name => "name",
            StorageSortMode::Size => "size",
            StorageSortMode::Created => "created",
            StorageSortMode::State => "state",
        }
    }
}

/// Sort modes for entry listings (§6).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum EntrySortMode {
    Archive,
    Name,
    Type,
    Size,
    Fragment,
    LastChanged,
}

impl EntrySortMode {
    pub fn column(self) -> &'static str {
        match self {
            EntrySortMode::Archive => "archiveType",
            EntrySortMode::Name => "name",
            EntrySortMode::Type => "type",
            EntrySortMode::Size => "size",
            EntrySortMode::Fragment => "fragmentOffset",
            EntrySortMode::LastChanged => "timeLastChanged",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_id_roundtrips_type() {
        let id = IndexId::Storage(42);
        assert_eq!(id.ty(), IndexType::Storage);
        assert_eq!(id.raw(), Some(42));
        assert_eq!(id.expect_raw(IndexType::Storage).unwrap(), 42);
        assert!(id.expect_raw(IndexType::Entity).is_err());
    }

    #[test]
    fn sentinels_have_no_raw() {
        assert_eq!(IndexId::NONE.raw(), None);
        assert_eq!(IndexId::ANY.raw(), None);
        assert!(IndexId::NONE.is_none());
        assert!(IndexId::ANY.is_any());
    }

    #[test]
    fn state_parse_is_case_insensitive() {
        assert_eq!(State::parse("update_requested"), Some(State::UpdateRequested));
        assert_eq!(State::parse("UPDATE_REQUESTED"), Some(State::UpdateRequested));
        assert_eq!(State::parse("bogus"), None);
    }

    #[test]
    fn enum_display_is_canonical_upper_case() {
        assert_eq!(State::Ok.to_string(), "OK");
        assert_eq!(Mode::Auto.to_string(), "AUTO");
        assert_eq!(ArchiveType::Full.to_string(), "FULL");
        assert_eq!(Ordering::Ascending.to_string(), "ASCENDING");
    }
}
