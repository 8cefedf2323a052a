//! Tunable constants for the maintenance worker (§6, §4.7).
//!
//! Mirrors the way `bic-catalog`'s own modules carry their defaults as
//! `pub const` values (see [`bic_catalog::purge::SINGLE_STEP_PURGE_LIMIT`]),
//! but the worker's knobs are also meant to be loaded from an operator
//! config file, so they live on a `serde`-deserializable struct instead.

use std::time::Duration;

/// Runtime knobs for [`crate::worker::MaintenanceWorker`] (§6 "Tunable
/// constants").
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Rows deleted per batch inside the purge engine.
    pub purge_batch_size: i64,
    /// Max time, in seconds, a bulk purge waits for the engine to go
    /// idle before giving up and returning an `interrupted` error.
    pub bulk_purge_timeout_secs: u64,
    /// How long the worker sleeps between maintenance cycles outside a
    /// maintenance window, observed in 10-second ticks.
    pub maintenance_sleep_secs: u64,
    /// Yield budget passed to `interrupt_operation` between purge
    /// batches and between storages.
    pub inter_batch_yield_secs: u64,
    /// Minimum interval between legacy-import progress log lines.
    pub progress_log_interval_secs: u64,
    /// Minimum progress delta (fraction of total steps, e.g. `0.001` for
    /// 0.1%) required before a progress line is emitted even if the
    /// interval has elapsed.
    pub progress_min_step_delta: f64,
    /// How often the initial-cleanup pass is allowed to re-run (the
    /// worker only runs it once per process, this is for callers who
    /// want to schedule it periodically themselves).
    pub index_cleanup_period_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            purge_batch_size: bic_catalog::purge::SINGLE_STEP_PURGE_LIMIT,
            bulk_purge_timeout_secs: 5 * 120,
            maintenance_sleep_secs: 120,
            inter_batch_yield_secs: 2,
            progress_log_interval_secs: 60,
            progress_min_step_delta: 0.001,
            index_cleanup_period_secs: 4 * 60 * 60,
        }
    }
}

impl MaintenanceConfig {
    pub fn bulk_purge_timeout(&self) -> Duration {
        Duration::from_secs(self.bulk_purge_timeout_secs)
    }

    pub fn maintenance_sleep(&self) -> Duration {
        Duration::from_secs(self.maintenance_sleep_secs)
    }

    pub fn inter_batch_yield(&self) -> Duration {
        Duration::from_secs(self.inter_batch_yield_secs)
    }

    pub fn progress_log_interval(&self) -> Duration {
        Duration::from_secs(self.progress_log_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tunables() {
        let cfg = MaintenanceConfig::default();
        assert_eq!(cfg.purge_batch_size, 4096);
        assert_eq!(cfg.bulk_purge_timeout_secs, 600);
        assert_eq!(cfg.maintenance_sleep_secs, 120);
        assert_eq!(cfg.inter_batch_yield_secs, 2);
        assert_eq!(cfg.progress_log_interval_secs, 60);
        assert_eq!(cfg.index_cleanup_period_secs, 14_400);
    }

    #[test]
    fn deserializes_from_partial_toml() {
        let cfg: MaintenanceConfig = toml::from_str("maintenance_sleep_secs = 30\n").unwrap();
        assert_eq!(cfg.maintenance_sleep_secs, 30);
        assert_eq!(cfg.purge_batch_size, MaintenanceConfig::default().purge_batch_size);
    }
}
