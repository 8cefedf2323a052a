//! Handle & session layer (§4.2): opens or creates the catalog file,
//! installs the busy handler, and owns the one `rusqlite::Connection`
//! used by all of this process's catalog access.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bic_concurrency::EngineContext;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::schema;

/// How the catalog file is opened (§4.2).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum OpenMode {
    Read,
    ReadWrite,
    /// Deletes any existing file first, then creates a fresh catalog.
    Create,
}

/// Optional open-time flags (§4.2).
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct OpenFlags {
    pub no_journal: bool,
    pub enable_foreign_keys: bool,
}

/// Invoked by the installed busy handler so a caller can keep a UI
/// responsive while the store waits for a lock (§4.2).
pub trait BusyCallback: Send + Sync {
    /// Called with the retry count; return `true` to keep retrying.
    fn on_busy(&self, retries: i32) -> bool;
}

/// A no-op busy callback that always retries forever (sqlite's default
/// behavior absent a caller-supplied one).
pub struct RetryForever;
impl BusyCallback for RetryForever {
    fn on_busy(&self, _retries: i32) -> bool {
        true
    }
}

/// Optional forwarding target for master-forwarding RPC (§6). The core
/// only defines the boundary; no transport is implemented here (§1
/// Non-goals).
pub trait ForwardingChannel: Send + Sync {
    fn forward(&self, command: &str, params: &[(&str, String)]) -> Result<ForwardResult>;
}

#[derive(Clone, Debug, Default)]
pub struct ForwardResult {
    pub fields: Vec<(String, String)>,
}

/// Owns the store connection, the engine context, and the optional
/// forwarding/busy/pause collaborators (§4.2).
pub struct Handle {
    pub(crate) conn: Connection,
    pub ctx: EngineContext,
    path: PathBuf,
    forwarding: Option<Arc<dyn ForwardingChannel>>,
    /// Set by the maintenance worker if a migration failed; all
    /// subsequent calls should short-circuit with `upgrade-error` (§7).
    pub upgrade_error: Option<String>,
}

impl Handle {
    /// Opens (or creates) the catalog file at `path` (§4.2).
    ///
    /// On [`OpenMode::Create`] any existing file at `path` is deleted
    /// first. Installs the busy handler so `busy` is invoked while the
    /// store waits for an exclusive lock.
    pub fn open(
        path: impl AsRef<Path>,
        mode: OpenMode,
        flags: OpenFlags,
        ctx: EngineContext,
        busy: Arc<dyn BusyCallback>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if mode == OpenMode::Create && path.exists() {
            fs::remove_file(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        }

        let conn = if mode == OpenMode::Read {
            Connection::open_with_flags(&path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?
        } else {
            Connection::open(&path)?
        };

        conn.busy_handler(Some(move |retries| busy.on_busy(retries)))?;

        if !flags.no_journal {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        if flags.enable_foreign_keys {
            conn.pragma_update(None, "foreign_keys", "ON")?;
        }

        if mode != OpenMode::Read {
            schema::create_schema(&conn)?;
        }

        info!(path = %path.display(), mode = ?mode, "opened catalog");

        Ok(Self {
            conn,
            ctx,
            path,
            forwarding: None,
            upgrade_error: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn set_forwarding(&mut self, channel: Arc<dyn ForwardingChannel>) {
        self.forwarding = Some(channel);
    }

    pub fn forwarding(&self) -> Option<&Arc<dyn ForwardingChannel>> {
        self.forwarding.as_ref()
    }

    /// Schema version currently stored in `meta.version`.
    pub fn schema_version(&self) -> Result<Option<i64>> {
        schema::read_version(&self.conn)
    }

    /// Closes out the handle. Closing a `rusqlite::Connection` already
    /// releases the busy handler and the file descriptor on drop; this
    /// method exists to make the close point explicit and idempotent at
    /// the call site per §4.2.
    pub fn close(self) {
        if let Err((_, err)) = self.conn.close() {
            warn!(error = %err, "error closing catalog connection");
        }
    }
}
