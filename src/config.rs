//! Operator-facing configuration (§6 "Tunable constants", ambient stack
//! §A.4): a `serde`-deserializable TOML file the CLI loads with `toml`,
//! the same pairing the teacher's own CLI config loading uses.

use std::path::Path;

use serde::{Deserialize, Serialize};

use bic_maintenance::MaintenanceConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path to the catalog file. Overridable by the CLI's `--db` flag.
    pub db_path: Option<String>,
    /// Tunables consumed by [`bic_maintenance::MaintenanceWorker`].
    pub maintenance: MaintenanceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            maintenance: MaintenanceConfig::default(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl AppConfig {
    /// Loads an `AppConfig` from a TOML file. Missing fields fall back
    /// to [`MaintenanceConfig::default`] via `#[serde(default)]`, so an
    /// operator only needs to override the knobs they care about.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().display().to_string();
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path_str, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = AppConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.maintenance.purge_batch_size, cfg.maintenance.purge_batch_size);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bic.toml");
        std::fs::write(&path, "db_path = \"/tmp/catalog.sqlite\"\n\n[maintenance]\nmaintenance_sleep_secs = 30\n").unwrap();
        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.db_path.as_deref(), Some("/tmp/catalog.sqlite"));
        assert_eq!(cfg.maintenance.maintenance_sleep_secs, 30);
        assert_eq!(cfg.maintenance.purge_batch_size, MaintenanceConfig::default().purge_batch_size);
    }
}
