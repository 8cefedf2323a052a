//! Transaction & interruption core (§4.3).
//!
//! Transactions are exclusive at the store level (`BEGIN IMMEDIATE`).
//! [`interruptable_scope`] is the spine the purge engine and the
//! newest-version index build on: it begins a transaction, runs a body
//! that may call [`InterruptScope::interrupt_operation`] to yield to
//! foreground work, and always ends the transaction on the way out —
//! committing even when the body returned an error, because every
//! batch boundary already satisfies the §3 invariants.

use std::time::{Duration, Instant};

use bic_concurrency::EngineContext;
use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Acquisition timeout for a transaction (§5).
#[derive(Copy, Clone, Debug)]
pub enum TxnTimeout {
    /// Fail immediately on contention.
    NoWait,
    /// Wait indefinitely for the store lock.
    WaitForever,
    Millis(u64),
}

impl TxnTimeout {
    fn apply(self, conn: &Connection) -> Result<()> {
        let ms: u32 = match self {
            TxnTimeout::NoWait => 0,
            TxnTimeout::WaitForever => u32::MAX,
            TxnTimeout::Millis(ms) => ms.min(u32::MAX as u64) as u32,
        };
        conn.busy_timeout(Duration::from_millis(ms as u64))?;
        Ok(())
    }
}

pub fn begin(conn: &Connection, timeout: TxnTimeout) -> Result<()> {
    timeout.apply(conn)?;
    conn.execute_batch("BEGIN IMMEDIATE")?;
    Ok(())
}

pub fn end(conn: &Connection) -> Result<()> {
    conn.execute_batch("COMMIT")?;
    Ok(())
}

pub fn rollback(conn: &Connection) -> Result<()> {
    conn.execute_batch("ROLLBACK")?;
    Ok(())
}

/// Handed to the body of an [`interruptable_scope`]; the only way to
/// reach the live connection inside one.
pub struct InterruptScope<'a> {
    conn: &'a Connection,
    ctx: &'a EngineContext,
    timeout: TxnTimeout,
}

impl<'a> InterruptScope<'a> {
    pub fn conn(&self) -> &Connection {
        self.conn
    }

    /// Cooperative interruption point (§4.3, §5).
    ///
    /// If another thread is currently registered as in-use, this
    /// temporarily commits the open transaction, waits up to
    /// `max_wait` for the engine to go idle, then re-opens the
    /// transaction. Returns [`StoreError::Interrupted`] if a global
    /// quit is requested, or if re-opening the transaction fails.
    pub fn interrupt_operation(&self, max_wait: Duration) -> Result<()> {
        if self.ctx.quit_requested() {
            return Err(StoreError::Interrupted);
        }
        if !self.ctx.is_foreground_in_use() {
            return Ok(());
        }
        debug!(max_wait_ms = max_wait.as_millis(), "yielding for foreground work");
        end(self.conn)?;
        let became_idle = self.ctx.wait_idle(max_wait);
        if self.ctx.quit_requested() {
            return Err(StoreError::Interrupted);
        }
        if !became_idle {
            debug!("interrupt_operation: max_wait elapsed, resuming anyway");
        }
        begin(self.conn, self.timeout)?;
        Ok(())
    }
}

/// Runs `body` inside a transaction, always ending it (committing) on
/// the way out, and returns the body's own result.
///
/// Generic over the body's error type so callers above `bic-store` (the
/// catalog's `CatalogError`, the maintenance worker's own error enum)
/// can run their own fallible bodies through this scope without an
/// intermediate conversion at every call site — only `E: From<StoreError>`
/// is required, which every crate's error enum already provides via
/// `#[from]`.
pub fn interruptable_scope<R, E>(
    conn: &Connection,
    ctx: &EngineContext,
    timeout: TxnTimeout,
    mut body: impl FnMut(&InterruptScope) -> std::result::Result<R, E>,
) -> std::result::Result<R, E>
where
    E: From<StoreError>,
{
    let started = Instant::now();
    begin(conn, timeout).map_err(E::from)?;
    let scope = InterruptScope { conn, ctx, timeout };
    let result = body(&scope);
    end(conn).map_err(E::from)?;
    debug!(elapsed_ms = started.elapsed().as_millis(), ok = result.is_ok(), "interruptable scope finished");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use bic_concurrency::EngineContext;

    fn temp_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v INTEGER)")
            .unwrap();
        conn
    }

    #[test]
    fn scope_commits_on_ok() {
        let conn = temp_conn();
        let ctx = EngineContext::new();
        interruptable_scope(&conn, &ctx, TxnTimeout::NoWait, |scope| {
            scope.conn().execute("INSERT INTO t(v) VALUES (1)", [])?;
            Ok(())
        })
        .unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn scope_commits_even_on_body_error() {
        let conn = temp_conn();
        let ctx = EngineContext::new();
        let result: Result<()> = interruptable_scope(&conn, &ctx, TxnTimeout::NoWait, |scope| {
            scope.conn().execute("INSERT INTO t(v) VALUES (1)", [])?;
            Err(StoreError::Interrupted)
        });
        assert!(result.is_err());
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1, "partial batch work committed at the boundary");
    }

    #[test]
    fn interrupt_operation_is_noop_without_contention() {
        let conn = temp_conn();
        let ctx = EngineContext::new();
        interruptable_scope(&conn, &ctx, TxnTimeout::NoWait, |scope| {
            scope.interrupt_operation(Duration::from_millis(50))?;
            scope.conn().execute("INSERT INTO t(v) VALUES (2)", [])?;
            Ok(())
        })
        .unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
