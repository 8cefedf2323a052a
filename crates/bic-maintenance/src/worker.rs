//! Maintenance worker main loop (§4.7 step 4).
//!
//! The worker is a single long-lived loop, not a pool: there is exactly
//! one background thread contending for the clear-storage lock with
//! itself, so the only real synchronization concern is foreground work
//! (handled by [`bic_concurrency::EngineContext::do_in_use`] further
//! down the stack, in every [`Catalog`] call this module makes).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::OptionalExtension;
use tracing::{debug, info, warn};

use bic_catalog::Catalog;
use bic_concurrency::EngineContext;

use crate::cleanup::{self, CleanupReport};
use crate::config::MaintenanceConfig;
use crate::error::Result;
use crate::legacy::{self, LegacyImportReport};

/// Yield budget used by the initial cleanup's prune sweep; it runs
/// before the main loop so there is no foreground contention yet, but
/// the call still goes through the ordinary interruptable scope.
pub const DEFAULT_CLEANUP_WAIT: Duration = Duration::from_secs(2);

/// Caller-supplied predicate over wall time (§2 "Maintenance Worker",
/// glossary "Maintenance window"). Mirrors the [`bic_concurrency::PauseCallback`]
/// pattern: a small trait instead of a bare closure so it can be shared
/// via `Arc` across the worker and whatever schedules it.
pub trait MaintenanceWindow: Send + Sync {
    /// `now_unix` is seconds since the epoch. Returns whether the worker
    /// may run a purge/prune cycle right now.
    fn is_maintenance_time(&self, now_unix: i64) -> bool;
}

/// A window that is always open — the default for callers who don't
/// want to restrict maintenance to specific hours.
pub struct AlwaysOpen;
impl MaintenanceWindow for AlwaysOpen {
    fn is_maintenance_time(&self, _now_unix: i64) -> bool {
        true
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Report returned after the worker's one-time startup sequence (legacy
/// import + initial cleanup), before it enters the main loop.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct StartupReport {
    pub legacy_import: LegacyImportReport,
    pub cleanup: CleanupReport,
}

/// Owns the catalog handle the worker operates on and drives its
/// lifecycle (§4.7): startup sequence, then the main loop until quit.
pub struct MaintenanceWorker {
    catalog: Catalog,
    ctx: EngineContext,
    config: MaintenanceConfig,
    window: Arc<dyn MaintenanceWindow>,
}

impl MaintenanceWorker {
    pub fn new(catalog: Catalog, config: MaintenanceConfig, window: Arc<dyn MaintenanceWindow>) -> Self {
        let ctx = catalog.handle().ctx.clone();
        Self { catalog, ctx, config, window }
    }

    pub fn with_default_window(catalog: Catalog, config: MaintenanceConfig) -> Self {
        Self::new(catalog, config, Arc::new(AlwaysOpen))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Runs legacy import then the initial cleanup pass (§4.7 steps 2-3).
    /// Call once before [`Self::run`].
    pub fn startup(&self) -> Result<StartupReport> {
        let legacy_import = legacy::import_legacy_catalogs(&self.catalog, &self.config)?;
        let cleanup = cleanup::run_initial_cleanup(&self.catalog);
        Ok(StartupReport { legacy_import, cleanup })
    }

    /// The main loop (§4.7 step 4): runs until the engine-wide quit flag
    /// is set. Intended to be the body of the worker's dedicated thread.
    pub fn run(&self) -> Result<()> {
        info!("maintenance worker: entering main loop");
        while !self.ctx.quit_requested() {
            if self.window.is_maintenance_time(now_unix()) {
                let processed = self.run_cycle()?;
                if processed == 0 {
                    self.ctx.sleep_with_trigger(self.config.maintenance_sleep());
                }
            } else {
                self.ctx.sleep_with_trigger(self.config.maintenance_sleep());
            }
        }
        info!("maintenance worker: quit requested, exiting main loop");
        Ok(())
    }

    /// Processes deleted storages one at a time until none remain, the
    /// maintenance window closes, or quit is requested. Returns the
    /// number of storages purged in this cycle.
    fn run_cycle(&self) -> Result<u64> {
        let mut processed = 0u64;
        loop {
            if self.ctx.quit_requested() {
                break;
            }
            if !self.window.is_maintenance_time(now_unix()) {
                break;
            }
            let Some(storage_id) = self.pick_deleted_storage()? else {
                break;
            };

            debug!(storage_id, "maintenance worker: purging deleted storage");
            self.catalog
                .purge_storage(storage_id, self.config.inter_batch_yield())?;
            if let Ok(entity_id) = self.entity_of_storage(storage_id) {
                if let Err(e) = self.catalog.prune_entity(entity_id, self.config.inter_batch_yield()) {
                    warn!(entity_id, error = %e, "maintenance worker: prune_entity failed");
                }
            }
            processed += 1;

            // Yield between storages (§4.3, §5 "WAIT_NOT_IN_USE"): give
            // any foreground thread that started work during this
            // storage's purge a chance to finish before the worker picks
            // up the next candidate.
            if self.ctx.is_foreground_in_use() {
                self.ctx.wait_not_in_use();
            }
        }
        if processed > 0 {
            info!(processed, "maintenance worker: cycle finished");
        }
        Ok(processed)
    }

    fn pick_deleted_storage(&self) -> Result<Option<i64>> {
        let conn = self.catalog.handle().conn();
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM storages WHERE deletedFlag = 1 AND state != 'UPDATE' LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn entity_of_storage(&self, storage_id: i64) -> Result<i64> {
        let conn = self.catalog.handle().conn();
        let entity_id: i64 = conn.query_row(
            "SELECT entityId FROM storages WHERE id = ?1",
            [storage_id],
            |r| r.get(0),
        )?;
        Ok(entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bic_catalog::mutation::{AddEntryParams, NewEntity, NewStorage};
    use bic_concurrency::EngineContext as Ctx;
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
            Ctx::new(),
            Arc::new(RetryForever) as Arc<dyn BusyCallback>,
        )
        .unwrap();
        (dir, Catalog::new(handle))
    }

    #[test]
    fn cycle_purges_deleted_storage_and_prunes_empty_entity() {
        let (_dir, cat) = open_catalog();
        let entity_id = cat
            .new_entity(NewEntity {
                job_uuid: "job-9",
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
        cat.delete_storage(storage_id).unwrap();

        let worker = MaintenanceWorker::with_default_window(cat, MaintenanceConfig::default());
        let processed = worker.run_cycle().unwrap();
        assert_eq!(processed, 1);

        let remaining: i64 = worker
            .catalog()
            .handle()
            .conn()
            .query_row("SELECT COUNT(*) FROM storages WHERE id = ?1", [storage_id], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
        let entity_remaining: i64 = worker
            .catalog()
            .handle()
            .conn()
            .query_row("SELECT COUNT(*) FROM entities WHERE id = ?1", [entity_id], |r| r.get(0))
            .unwrap();
        assert_eq!(entity_remaining, 0);
    }

    #[test]
    fn closed_window_runs_nothing() {
        struct NeverOpen;
        impl MaintenanceWindow for NeverOpen {
            fn is_maintenance_time(&self, _now_unix: i64) -> bool {
                false
            }
        }
        let (_dir, cat) = open_catalog();
        let worker = MaintenanceWorker::new(cat, MaintenanceConfig::default(), Arc::new(NeverOpen));
        let processed = worker.run_cycle().unwrap();
        assert_eq!(processed, 0);
    }
}
