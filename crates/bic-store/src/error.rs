use std::path::PathBuf;

/// Failures surfaced by the store adapter. `bic-catalog` folds this into
/// its own `store-error` kind (§7); the variants here exist so a caller
/// that only depends on `bic-store` (e.g. a standalone import tool)
/// still gets a useful error type.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("operation interrupted")]
    Interrupted,

    #[error("schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
}

pub type Result<T> = std::result::Result<T, StoreError>;
