#![forbid(unsafe_code)]
//! Support library for the `bic` administrative CLI.
//!
//! Plays the role the distilled spec calls out-of-scope RPC/CLI surface
//! (§1, §6 "Master-forwarding RPC"): a thin shell over [`bic_catalog`]
//! and [`bic_maintenance`], not a protocol. The root crate's binary
//! (`src/bin/cli.rs`) parses arguments with `clap` and calls into the
//! functions here; this crate stays free of `clap` so it can also be
//! used as a library by tests.

pub mod error;
pub mod open;
pub mod report;
pub mod verify;

pub use error::{CliError, Result};
pub use open::open_catalog;
pub use report::{report, CatalogReport};
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};
