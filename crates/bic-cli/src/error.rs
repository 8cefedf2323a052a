//! CLI-facing error type, folding the catalog/maintenance error kinds
//! (§7) into one enum the binary can print with `{}`  and exit
//! non-zero on.

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Catalog(#[from] bic_catalog::CatalogError),

    #[error(transparent)]
    Maintenance(#[from] bic_maintenance::MaintenanceError),

    #[error(transparent)]
    Store(#[from] bic_store::StoreError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
