//! Error kinds surfaced to callers (§7).

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("not found")]
    NotFound,

    #[error("legacy catalog schema version could not be identified")]
    VersionUnknown,

    #[error("operation interrupted")]
    Interrupted,

    #[error("store error: {0}")]
    Store(#[from] bic_store::StoreError),

    #[error("forwarding result missing expected parameter: {0}")]
    ExpectedParameter(&'static str),

    #[error("a prior migration failed: {0}")]
    Upgrade(String),

    #[error("type error: {0}")]
    Type(#[from] bic_types::TypeError),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

impl From<rusqlite::Error> for CatalogError {
    fn from(e: rusqlite::Error) -> Self {
        if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            CatalogError::NotFound
        } else {
            CatalogError::Store(bic_store::StoreError::from(e))
        }
    }
}
