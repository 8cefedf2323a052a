#![forbid(unsafe_code)]
//! Process-wide concurrency primitives shared by every open catalog
//! handle (§4.2, §5, DESIGN NOTES "Global mutable state").
//!
//! The in-use tracking, the worker's wait-until-idle spin, the
//! interruption trigger, and the clear-storage serialization lock all
//! live on one [`EngineContext`] value. Callers create it at `init` and
//! drop it at `done`; nothing here is a global singleton.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

/// Process-wide state shared by every handle opened against one
/// catalog. Cheap to clone (it's a handful of `Arc`s); clones refer to
/// the same underlying state.
#[derive(Clone)]
pub struct EngineContext {
    inner: Arc<Inner>,
}

struct Inner {
    in_use: Mutex<HashSet<ThreadId>>,
    idle_signal: Condvar,
    quit: AtomicBool,
    trigger: Mutex<bool>,
    trigger_signal: Condvar,
    clear_storage_lock: Mutex<()>,
    next_interrupt_id: AtomicU64,
}

/// Removes this thread's id from the in-use set on drop, panic included,
/// so `do_in_use` never leaks a registration (§4.2).
struct InUseGuard<'a> {
    inner: &'a Inner,
    id: ThreadId,
}

impl Drop for InUseGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.inner.in_use.lock();
        set.remove(&self.id);
        if set.is_empty() {
            self.inner.idle_signal.notify_all();
        }
        trace!("left in-use scope");
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineContext {
    /// Creates a fresh context (DESIGN NOTES: `init`).
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                in_use: Mutex::new(HashSet::new()),
                idle_signal: Condvar::new(),
                quit: AtomicBool::new(false),
                trigger: Mutex::new(false),
                trigger_signal: Condvar::new(),
                clear_storage_lock: Mutex::new(()),
                next_interrupt_id: AtomicU64::new(0),
            }),
        }
    }

    /// Tears the context down (DESIGN NOTES: `done`). Requests quit and
    /// wakes any thread parked on the trigger semaphore so it can exit.
    pub fn shutdown(&self) {
        self.request_quit();
        self.raise_trigger();
    }

    pub fn request_quit(&self) {
        self.inner.quit.store(true, AtomicOrdering::SeqCst);
        let _guard = self.inner.in_use.lock();
        self.inner.idle_signal.notify_all();
    }

    pub fn quit_requested(&self) -> bool {
        self.inner.quit.load(AtomicOrdering::SeqCst)
    }

    /// Wraps `body` in the "do-in-use" scope of §4.2: registers the
    /// calling thread, signals the worker to interrupt its current bulk
    /// step (unless `is_worker` — the worker never interrupts itself),
    /// runs `body`, then unregisters, regardless of how `body` returns
    /// — including a panic unwinding out of `body`, which is why the
    /// unregister lives on a drop guard rather than after the call.
    pub fn do_in_use<R>(&self, is_worker: bool, body: impl FnOnce() -> R) -> R {
        let id = std::thread::current().id();
        {
            let mut set = self.inner.in_use.lock();
            set.insert(id);
        }
        let _guard = InUseGuard { inner: &self.inner, id };
        if !is_worker {
            self.raise_trigger();
        }
        trace!(worker = is_worker, "entered in-use scope");
        body()
    }

    fn foreground_in_use(&self) -> bool {
        let set = self.inner.in_use.lock();
        let me = std::thread::current().id();
        set.iter().any(|id| *id != me)
    }

    /// Public view of [`EngineContext::foreground_in_use`], used by
    /// `interrupt_operation` to decide whether yielding is worthwhile at
    /// all (§4.3).
    pub fn is_foreground_in_use(&self) -> bool {
        self.foreground_in_use()
    }

    /// Waits up to `max` for all foreground threads to clear the in-use
    /// set. Returns `true` if idle (or quit) was observed, `false` if
    /// `max` elapsed first. Used by `interrupt_operation`'s
    /// sleep-until-idle step (§4.3, §5).
    pub fn wait_idle(&self, max: Duration) -> bool {
        let deadline = Instant::now() + max;
        loop {
            if self.quit_requested() {
                return true;
            }
            let mut set = self.inner.in_use.lock();
            let me = std::thread::current().id();
            if !set.iter().any(|id| *id != me) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let remaining = deadline - now;
            let _ = self.inner.idle_signal.wait_for(&mut set, remaining);
        }
    }

    /// `WAIT_NOT_IN_USE` (§5): the worker calls this before starting a
    /// maintenance cycle. Spins in 5-second checks until no foreground
    /// thread is registered, or quit is requested.
    pub fn wait_not_in_use(&self) {
        loop {
            if self.quit_requested() {
                return;
            }
            let mut set = self.inner.in_use.lock();
            if !set.iter().any(|id| *id != std::thread::current().id()) {
                return;
            }
            let timed_out = self
                .inner
                .idle_signal
                .wait_for(&mut set, Duration::from_secs(5))
                .timed_out();
            drop(set);
            if timed_out {
                debug!("WAIT_NOT_IN_USE tick: foreground still active");
            }
        }
    }

    /// Signals waiters on the maintenance-cycle sleep semaphore to wake
    /// early (§5: "sleeping ... via a semaphore with modification
    /// signal"). `delete_storage` and friends call this after marking a
    /// row deleted so the worker doesn't wait out its full sleep.
    pub fn raise_trigger(&self) {
        let mut flag = self.inner.trigger.lock();
        *flag = true;
        self.inner.trigger_signal.notify_all();
    }

    /// Sleeps up to `max` in 10-second ticks, waking early on
    /// [`EngineContext::raise_trigger`] or quit (§4.7 main loop).
    pub fn sleep_with_trigger(&self, max: Duration) {
        let deadline = Instant::now() + max;
        loop {
            if self.quit_requested() {
                return;
            }
            let mut flag = self.inner.trigger.lock();
            if *flag {
                *flag = false;
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let remaining = deadline - now;
            let tick = remaining.min(Duration::from_secs(10));
            let timed_out = self
                .inner
                .trigger_signal
                .wait_for(&mut flag, tick)
                .timed_out();
            if !timed_out && *flag {
                *flag = false;
                return;
            }
        }
    }

    /// Guards the cross-storage newest-index reshuffle (§5: "an
    /// additional write semaphore that serializes cross-storage newest
    /// index reshuffles"). Hold this for the duration of a clear-storage
    /// pass (§4.6 step 6 / §4.5).
    pub fn lock_clear_storage(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.inner.clear_storage_lock.lock()
    }

    /// Issues a monotonically increasing id for logging/tracing
    /// individual `interrupt_operation` calls.
    pub fn next_interrupt_id(&self) -> u64 {
        self.inner.next_interrupt_id.fetch_add(1, AtomicOrdering::Relaxed)
    }
}

/// Optional pause callback installed on a handle (§5: "pause callback
/// mechanism allows external pause during long copies without holding
/// locks"). Invoked between purge batches; returning `false` asks the
/// caller to keep going, `true` requests an early stop next chance it
/// gets (the caller decides how to honor it — this crate only carries
/// the hook).
pub trait PauseCallback: Send + Sync {
    fn should_pause(&self) -> bool {
        false
    }
}

/// A no-op pause callback, the default when a handle installs none.
pub struct NoPause;
impl PauseCallback for NoPause {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn do_in_use_unregisters_on_normal_return() {
        let ctx = EngineContext::new();
        let out = ctx.do_in_use(false, || 7);
        assert_eq!(out, 7);
        assert!(ctx.inner.in_use.lock().is_empty());
    }

    #[test]
    fn do_in_use_unregisters_on_panic() {
        let ctx = EngineContext::new();
        let ctx2 = ctx.clone();
        let result = std::panic::catch_unwind(move || {
            ctx2.do_in_use(false, || panic!("boom"));
        });
        assert!(result.is_err());
        assert!(ctx.inner.in_use.lock().is_empty());
    }

    #[test]
    fn wait_not_in_use_returns_once_foreground_clears() {
        let ctx = EngineContext::new();
        let barrier = Arc::new(Barrier::new(2));
        let ctx_fg = ctx.clone();
        let barrier_fg = barrier.clone();
        let handle = thread::spawn(move || {
            ctx_fg.do_in_use(false, || {
                barrier_fg.wait();
                thread::sleep(Duration::from_millis(50));
            });
        });
        barrier.wait();
        ctx.wait_not_in_use();
        handle.join().unwrap();
    }

    #[test]
    fn quit_unblocks_wait_not_in_use() {
        let ctx = EngineContext::new();
        let ctx_fg = ctx.clone();
        let started = Arc::new(Barrier::new(2));
        let started2 = started.clone();
        let handle = thread::spawn(move || {
            ctx_fg.do_in_use(false, || {
                started2.wait();
                thread::sleep(Duration::from_millis(200));
            });
        });
        started.wait();
        ctx.request_quit();
        ctx.wait_not_in_use();
        handle.join().unwrap();
    }

    #[test]
    fn sleep_with_trigger_wakes_early() {
        let ctx = EngineContext::new();
        let ctx2 = ctx.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            ctx2.raise_trigger();
        });
        let start = Instant::now();
        ctx.sleep_with_trigger(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }
}
