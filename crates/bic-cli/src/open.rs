//! Shared "open a catalog" helper (§4.2), mirroring the teacher's
//! `sombra-admin::util::open_graph` pattern: every CLI subcommand opens
//! the same way instead of re-deriving `Handle::open` options.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use bic_catalog::Catalog;
use bic_concurrency::EngineContext;
use bic_store::{BusyCallback, Handle, OpenFlags, OpenMode};

use crate::error::Result;

/// Logs each busy-retry at debug rather than spinning silently, the
/// CLI's stand-in for the interactive "keep a UI responsive" callback
/// of §4.2.
struct LoggingBusyCallback;
impl BusyCallback for LoggingBusyCallback {
    fn on_busy(&self, retries: i32) -> bool {
        debug!(retries, "catalog busy, retrying");
        true
    }
}

pub fn open_catalog(path: impl AsRef<Path>, mode: OpenMode) -> Result<Catalog> {
    let handle = Handle::open(
        path,
        mode,
        OpenFlags::default(),
        EngineContext::new(),
        Arc::new(LoggingBusyCallback) as Arc<dyn BusyCallback>,
    )?;
    Ok(Catalog::new(handle))
}
