use std::path::PathBuf;

/// Failures surfaced by the maintenance worker (§7). Wraps the catalog's
/// own error kind for anything that runs through [`bic_catalog::Catalog`]
/// and adds the worker-specific `version-unknown` outcome for a legacy
/// file whose `meta.version` the import dispatch does not recognize.
#[derive(thiserror::Error, Debug)]
pub enum MaintenanceError {
    #[error(transparent)]
    Catalog(#[from] bic_catalog::CatalogError),

    #[error(transparent)]
    Store(#[from] bic_store::StoreError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("legacy catalog {path} reports schema version {version}, no import path known")]
    VersionUnknown { path: PathBuf, version: i64 },

    #[error("operation interrupted")]
    Interrupted,
}

impl From<MaintenanceError> for bic_catalog::CatalogError {
    fn from(err: MaintenanceError) -> Self {
        match err {
            MaintenanceError::Catalog(e) => e,
            MaintenanceError::Store(e) => bic_catalog::CatalogError::Store(e),
            MaintenanceError::Sqlite(e) => bic_catalog::CatalogError::Store(e.into()),
            MaintenanceError::Interrupted => bic_catalog::CatalogError::Interrupted,
            MaintenanceError::Io { path, source } => bic_catalog::CatalogError::Store(
                bic_store::StoreError::Io { path, source },
            ),
            MaintenanceError::VersionUnknown { .. } => bic_catalog::CatalogError::VersionUnknown,
        }
    }
}

pub type Result<T> = std::result::Result<T, MaintenanceError>;
