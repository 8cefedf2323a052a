//! Binary entry point for the `bic` administrative CLI.
//!
//! A thin shell over [`bic_catalog::Catalog`] and
//! [`bic_maintenance::MaintenanceWorker`] (§1, §6): it opens a catalog,
//! runs one-shot admin operations, and can drive the maintenance worker
//! standalone. It is not the master-forwarding RPC protocol of §6 -
//! only a stable local command set.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use bic::config::AppConfig;
use bic_catalog::mutation::{AddEntryParams, NewEntity, NewStorage};
use bic_catalog::query::{EntityFilter, EntryFilter, IdFilter, StorageFilter};
use bic_catalog::Catalog;
use bic_maintenance::{AlwaysOpen, MaintenanceWorker};
use bic_types::{ArchiveType, EntitySortMode, Mode, Ordering as SortOrder, State};

#[derive(Parser, Debug)]
#[command(name = "bic", version, about = "Backup index catalog engine CLI", disable_help_subcommand = true)]
struct Cli {
    /// Path to the catalog file. Overrides `db_path` from `--config`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to an `AppConfig` TOML file (§A.4).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Create a fresh catalog file, deleting any existing one (§4.2 `OpenMode::Create`).
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    create: bool,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates (or finds) the uuid row for a job UUID (§4.9).
    NewUuid { job_uuid: String },

    /// Starts a new run of a job (§4.9).
    NewEntity {
        job_uuid: String,
        #[arg(long, default_value = "")]
        schedule_uuid: String,
        #[arg(long, default_value = "")]
        host: String,
        #[arg(long, default_value = "")]
        user: String,
        #[arg(long, default_value = "full")]
        archive_type: String,
        #[arg(long)]
        created: i64,
        #[arg(long, action = clap::ArgAction::SetTrue)]
        locked: bool,
    },

    /// Registers a new storage artifact under an entity (§4.9).
    NewStorage {
        entity_id: i64,
        #[arg(long, default_value = "")]
        host: String,
        #[arg(long, default_value = "")]
        user: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        created: i64,
        #[arg(long, default_value_t = 0)]
        size: i64,
        #[arg(long, default_value = "ok")]
        state: String,
        #[arg(long, default_value = "auto")]
        mode: String,
    },

    /// Ingests one file entry with a single fragment (§4.9).
    AddFile {
        entity_id: i64,
        storage_id: i64,
        name: String,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long)]
        size: i64,
        #[arg(long, default_value_t = 0)]
        time_last_access: i64,
        #[arg(long, default_value_t = 0)]
        time_modified: i64,
        #[arg(long, default_value_t = 0)]
        time_last_changed: i64,
    },

    /// Marks a storage deleted; the worker reclaims it later (§4.6).
    DeleteStorage { storage_id: i64 },

    /// Increments an entity's lock count (§4.9, §3 invariant 6).
    LockEntity { entity_id: i64 },

    /// Decrements an entity's lock count.
    UnlockEntity { entity_id: i64 },

    /// Lists entities, optionally filtered by job UUID (§4.8).
    ListEntities {
        #[arg(long)]
        job_uuid: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Lists storages, optionally filtered by entity (§4.8).
    ListStorages {
        #[arg(long)]
        entity_id: Option<i64>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Lists entries, optionally filtered by entity/storage/name pattern (§4.8).
    ListEntries {
        #[arg(long)]
        entity_id: Option<i64>,
        #[arg(long)]
        storage_id: Option<i64>,
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Checks the §3/§8 invariants against the open catalog.
    Verify {
        #[arg(long, value_enum, default_value_t = VerifyLevelArg::Full)]
        level: VerifyLevelArg,
    },

    /// Prints an aggregate snapshot of the catalog.
    Report,

    /// Runs legacy import + initial cleanup once, then exits (§4.7 steps 2-3).
    WorkerStartup,

    /// Runs the maintenance worker's main loop until Ctrl-C (§4.7 step 4).
    WorkerRun,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::try_init().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let db_path = cli
        .db
        .clone()
        .or_else(|| config.db_path.clone().map(PathBuf::from))
        .ok_or("no catalog path given (pass --db or set db_path in --config)")?;

    let mode = if cli.create {
        bic::OpenMode::Create
    } else if db_path.exists() {
        bic::OpenMode::ReadWrite
    } else {
        bic::OpenMode::Create
    };
    let catalog = bic_cli::open_catalog(&db_path, mode)?;

    match cli.command {
        Command::NewUuid { job_uuid } => {
            let id = catalog.new_uuid(&job_uuid)?;
            print_value(cli.format, "uuid_id", id);
        }
        Command::NewEntity {
            job_uuid,
            schedule_uuid,
            host,
            user,
            archive_type,
            created,
            locked,
        } => {
            let archive_type = ArchiveType::parse(&archive_type)
                .ok_or_else(|| format!("unknown archive type {archive_type:?}"))?;
            let id = catalog.new_entity(NewEntity {
                job_uuid: &job_uuid,
                schedule_uuid: &schedule_uuid,
                host_name: &host,
                user_name: &user,
                archive_type,
                created,
                locked,
            })?;
            print_value(cli.format, "entity_id", id);
        }
        Command::NewStorage {
            entity_id,
            host,
            user,
            name,
            created,
            size,
            state,
            mode,
        } => {
            let state = State::parse(&state).ok_or_else(|| format!("unknown state {state:?}"))?;
            let mode = Mode::parse(&mode).ok_or_else(|| format!("unknown mode {mode:?}"))?;
            let id = catalog.new_storage(NewStorage {
                entity_id,
                host_name: &host,
                user_name: &user,
                name: &name,
                created,
                size,
                state,
                mode,
            })?;
            print_value(cli.format, "storage_id", id);
        }
        Command::AddFile {
            entity_id,
            storage_id,
            name,
            offset,
            size,
            time_last_access,
            time_modified,
            time_last_changed,
        } => {
            let id = catalog.add_file(
                AddEntryParams {
                    entity_id,
                    uuid_id: 0,
                    storage_id,
                    name: &name,
                    time_last_access,
                    time_modified,
                    time_last_changed,
                    user_id: 0,
                    group_id: 0,
                    permission: 0,
                    size,
                },
                offset,
                size,
            )?;
            print_value(cli.format, "entry_id", id);
        }
        Command::DeleteStorage { storage_id } => {
            catalog.delete_storage(storage_id)?;
            println!("storage {storage_id} marked deleted");
        }
        Command::LockEntity { entity_id } => {
            catalog.lock_entity(entity_id)?;
            println!("entity {entity_id} locked");
        }
        Command::UnlockEntity { entity_id } => {
            catalog.unlock_entity(entity_id)?;
            println!("entity {entity_id} unlocked");
        }
        Command::ListEntities { job_uuid, limit, offset } => {
            let filter = EntityFilter {
                job_uuid,
                ..Default::default()
            };
            let rows = catalog.list_entities(&filter, Some(EntitySortMode::Created), SortOrder::Ascending, offset, limit)?;
            print_rows(cli.format, &rows);
        }
        Command::ListStorages { entity_id, limit, offset } => {
            let filter = StorageFilter {
                entity_ids: entity_id.map(|id| IdFilter::In(vec![id])).unwrap_or_default(),
                ..Default::default()
            };
            let rows = catalog.list_storages(&filter, None, SortOrder::None, offset, limit)?;
            print_rows(cli.format, &rows);
        }
        Command::ListEntries {
            entity_id,
            storage_id,
            pattern,
            limit,
            offset,
        } => {
            let filter = EntryFilter {
                entity_ids: entity_id.map(|id| IdFilter::In(vec![id])).unwrap_or_default(),
                storage_ids: storage_id.map(|id| IdFilter::In(vec![id])).unwrap_or_default(),
                name_pattern: pattern,
                kinds: None,
            };
            let rows = catalog.list_entries(&filter, None, SortOrder::None, offset, limit)?;
            print_rows(cli.format, &rows);
        }
        Command::Verify { level } => {
            let level = match level {
                VerifyLevelArg::Fast => bic_cli::VerifyLevel::Fast,
                VerifyLevelArg::Full => bic_cli::VerifyLevel::Full,
            };
            let report = bic_cli::verify(&catalog, level)?;
            let success = report.success;
            print_report(cli.format, &report);
            if !success {
                std::process::exit(1);
            }
        }
        Command::Report => {
            let report = bic_cli::report(&catalog)?;
            print_report(cli.format, &report);
        }
        Command::WorkerStartup => {
            let worker = MaintenanceWorker::with_default_window(catalog, config.maintenance);
            let report = worker.startup()?;
            print_report(cli.format, &report);
        }
        Command::WorkerRun => {
            let ctx = catalog.handle().ctx.clone();
            let worker = MaintenanceWorker::new(catalog, config.maintenance, Arc::new(AlwaysOpen));
            worker.startup()?;

            let ctx_for_signal = ctx.clone();
            let runner = std::thread::spawn(move || worker.run());
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            rt.block_on(tokio::signal::ctrl_c())?;
            tracing::info!("ctrl-c received, requesting worker shutdown");
            ctx_for_signal.shutdown();
            runner.join().expect("worker thread panicked")?;
        }
    }

    Ok(())
}

fn print_value(format: OutputFormat, field: &str, id: i64) {
    match format {
        OutputFormat::Text => println!("{field}: {id}"),
        OutputFormat::Json => println!("{}", serde_json::json!({ field: id })),
    }
}

fn print_rows<T: std::fmt::Debug + serde::Serialize>(format: OutputFormat, rows: &[T]) {
    match format {
        OutputFormat::Text => {
            for row in rows {
                println!("{row:?}");
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows).unwrap_or_default()),
    }
}

fn print_report<T: std::fmt::Debug + serde::Serialize>(format: OutputFormat, report: &T) {
    match format {
        OutputFormat::Text => println!("{report:#?}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report).unwrap_or_default()),
    }
}
