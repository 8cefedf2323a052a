#![forbid(unsafe_code)]
//! The relational store adapter (§1 Non-goals, §4.2, §4.3).
//!
//! This is the only crate in the workspace that names `rusqlite`
//! directly. Everything above it — `bic-catalog`, `bic-maintenance`,
//! `bic-cli` — talks to [`Handle`] and the [`txn`] transaction
//! primitives. The store itself (its on-disk format, its query planner,
//! its locking) is treated as an external collaborator whose interface
//! this crate wraps, per the spec's explicit Non-goals.

pub mod error;
pub mod handle;
pub mod schema;
pub mod txn;

pub use error::{Result, StoreError};
pub use handle::{BusyCallback, ForwardResult, ForwardingChannel, Handle, OpenFlags, OpenMode, RetryForever};
pub use schema::INDEX_VERSION;
pub use txn::{begin, end, interruptable_scope, rollback, InterruptScope, TxnTimeout};

#[cfg(test)]
mod tests {
    use super::*;
    use bic_concurrency::EngineContext;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn open_create_installs_schema_and_default_entity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        let handle = Handle::open(
            &path,
            OpenMode::Create,
            OpenFlags::default(),
            EngineContext::new(),
            Arc::new(RetryForever),
        )
        .unwrap();
        assert_eq!(handle.schema_version().unwrap(), Some(INDEX_VERSION));
        let default_entity_count: i64 = handle
            .conn()
            .query_row("SELECT COUNT(*) FROM entities WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(default_entity_count, 1);
    }

    #[test]
    fn open_create_deletes_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        std::fs::write(&path, b"not a real database").unwrap();
        let handle = Handle::open(
            &path,
            OpenMode::Create,
            OpenFlags::default(),
            EngineContext::new(),
            Arc::new(RetryForever),
        )
        .unwrap();
        assert_eq!(handle.schema_version().unwrap(), Some(INDEX_VERSION));
    }
}
