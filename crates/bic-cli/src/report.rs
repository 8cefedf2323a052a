//! Aggregate reporting (§2 "Query Surface", modeled on the teacher's
//! `sombra-admin::stats` report shape): a single snapshot struct an
//! operator can print as text or serialize to JSON.

use serde::Serialize;

use bic_catalog::Catalog;

use crate::error::Result;

#[derive(Clone, Debug, Serialize)]
pub struct CatalogReport {
    pub schema_version: Option<i64>,
    pub uuid_count: u64,
    pub entity_count: u64,
    pub storage_count: u64,
    pub entry_count: u64,
    pub deleted_storage_count: u64,
    pub deleted_entity_count: u64,
    pub newest_row_count: u64,
    pub locked_entity_count: u64,
}

pub fn report(catalog: &Catalog) -> Result<CatalogReport> {
    let conn = catalog.handle().conn();
    let count = |sql: &str| -> Result<u64> { Ok(conn.query_row(sql, [], |r| r.get::<_, i64>(0))? as u64) };

    Ok(CatalogReport {
        schema_version: bic_store::schema::read_version(conn)?,
        uuid_count: count("SELECT COUNT(*) FROM uuids")?,
        entity_count: count("SELECT COUNT(*) FROM entities WHERE deletedFlag = 0")?,
        storage_count: count("SELECT COUNT(*) FROM storages WHERE deletedFlag = 0")?,
        entry_count: count("SELECT COUNT(*) FROM entries")?,
        deleted_storage_count: count("SELECT COUNT(*) FROM storages WHERE deletedFlag = 1")?,
        deleted_entity_count: count("SELECT COUNT(*) FROM entities WHERE deletedFlag = 1")?,
        newest_row_count: count("SELECT COUNT(*) FROM entriesNewest")?,
        locked_entity_count: count("SELECT COUNT(*) FROM entities WHERE lockedCount > 0")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bic_catalog::mutation::NewEntity;
    use bic_concurrency::EngineContext;
    use bic_store::{BusyCallback, Handle, OpenFlags, OpenMode, RetryForever};
    use bic_types::ArchiveType;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn report_reflects_fresh_catalog() {
        let dir = tempdir().unwrap();
        let handle = Handle::open(
            dir.path().join("catalog.sqlite"),
            OpenMode::Create,
            OpenFlags::default(),
            EngineContext::new(),
            Arc::new(RetryForever) as Arc<dyn BusyCallback>,
        )
        .unwrap();
        let cat = Catalog::new(handle);
        let r = report(&cat).unwrap();
        assert_eq!(r.schema_version, Some(bic_store::INDEX_VERSION));
        // the reserved default entity (§3, §9) counts as one entity.
        assert_eq!(r.entity_count, 1);

        cat.new_entity(NewEntity {
            job_uuid: "job-report",
            schedule_uuid: "",
            host_name: "h",
            user_name: "u",
            archive_type: ArchiveType::Full,
            created: 1,
            locked: false,
        })
        .unwrap();
        let r2 = report(&cat).unwrap();
        assert_eq!(r2.entity_count, 2);
        assert_eq!(r2.uuid_count, 2);
    }
}
