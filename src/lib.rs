#![forbid(unsafe_code)]
//! # bic - Backup Index Catalog Engine
//!
//! `bic` is the persistent, relational catalog that tracks every backup
//! job, entity (backup run), storage artifact, and file-system entry
//! produced by a backup system. It supports concurrent ingest during
//! backup, point-in-time queries by operators and schedulers, and
//! long-running background hygiene (migration, orphan purge, aggregate
//! maintenance, newest-version tracking).
//!
//! ## Architecture
//!
//! The engine is a small workspace of crates, one per component family:
//!
//! - [`bic_types`] - the tagged `IndexId`/`IndexType` model and the
//!   closed textual enums (state, mode, archive type, sort modes).
//! - [`bic_concurrency`] - the process-wide in-use tracking and
//!   do-in-use scope that lets foreground work preempt the background
//!   worker.
//! - [`bic_store`] - the relational store adapter: opens the catalog
//!   file, owns the DDL, exposes the transaction/interruption core.
//! - [`bic_catalog`] - the core engine: aggregate maintainer, newest
//!   version index, purge engine, query surface, mutation surface.
//! - [`bic_maintenance`] - the background worker: legacy import,
//!   initial cleanup, the periodic purge/prune loop.
//! - [`bic_cli`] - admin/report support used by the `bic` binary
//!   (`src/bin/cli.rs`).
//!
//! This crate itself only wires the above together and hosts
//! [`config::AppConfig`], the operator-facing config file format.

pub mod config;

pub use bic_catalog::{Catalog, CatalogError};
pub use bic_concurrency::EngineContext;
pub use bic_maintenance::{MaintenanceConfig, MaintenanceError, MaintenanceWorker};
pub use bic_store::{Handle, OpenFlags, OpenMode, StoreError};
pub use bic_types::{IndexId, IndexType};
