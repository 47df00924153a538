//! The spool thread.
//!
//! Each disk store runs one background thread. It sleeps for the spool
//! interval (or until woken), drains the spool, persists the index when a
//! flush was requested, and runs an expiry scan whenever the expiry deadline
//! has passed.
//!
//! ```text
//!            ┌──────────── running || flush_requested ────────────┐
//!            ▼                                                    │
//!   wait(spool_interval)  ── skipped if flush requested or stopping
//!            │
//!            ▼
//!   flush_check(requested)   drain spool; write index if requested
//!            │
//!     running? ──no──────────────────────────────────────────────┤
//!            │ yes                                                │
//!            ▼                                                    │
//!   deadline passed? ──yes──▶ expire_elements, next deadline ─────┘
//! ```
//!
//! A panic inside one step is caught and logged; the loop only ends once the
//! store stops it. Should the thread die anyway, [`SchedulerSignal::is_alive`]
//! turns false and the store stops accumulating spooled writes.

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Work the spool thread performs on behalf of a store.
pub(crate) trait SpoolTask: Send + Sync {
    /// Drains pending writes. `flush_requested` asks for the index to be
    /// persisted as well.
    fn flush_check(&self, flush_requested: bool);

    /// Removes expired elements.
    fn expire_elements(&self);
}

/// Coordination state shared between a store and its spool thread.
#[derive(Debug)]
pub(crate) struct SchedulerSignal {
    running: AtomicBool,
    flush_requested: AtomicBool,
    flushing: AtomicBool,
    alive: AtomicBool,
    wake_lock: Mutex<()>,
    wake: Condvar,
    spool_interval: Duration,
    expiry_interval: Option<Duration>,
}

impl SchedulerSignal {
    /// `expiry_interval` is `None` for stores whose elements never expire.
    pub(crate) fn new(spool_interval: Duration, expiry_interval: Option<Duration>) -> Self {
        Self {
            running: AtomicBool::new(true),
            flush_requested: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            spool_interval,
            expiry_interval,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Whether a requested flush has not completed yet.
    pub(crate) fn flush_pending(&self) -> bool {
        self.flush_requested.load(Ordering::SeqCst) || self.flushing.load(Ordering::SeqCst)
    }

    /// Asks for a flush and wakes the thread. Repeated requests before the
    /// thread wakes coalesce into one.
    pub(crate) fn request_flush(&self) {
        self.flush_requested.store(true, Ordering::SeqCst);
        let _guard = self.wake_lock.lock();
        self.wake.notify_all();
    }

    /// Tells the thread to finish and wakes it.
    pub(crate) fn stop(&self) {
        let _guard = self.wake_lock.lock();
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_all();
    }

    fn should_continue(&self) -> bool {
        self.is_running() || self.flush_requested.load(Ordering::SeqCst)
    }

    fn wait_for_work(&self) {
        let mut guard = self.wake_lock.lock();
        if self.is_running() && !self.flush_requested.load(Ordering::SeqCst) {
            self.wake.wait_for(&mut guard, self.spool_interval);
        }
    }

    fn begin_flush(&self) -> bool {
        self.flushing.store(true, Ordering::SeqCst);
        self.flush_requested.swap(false, Ordering::SeqCst)
    }

    fn end_flush(&self) {
        self.flushing.store(false, Ordering::SeqCst);
    }
}

struct AliveGuard<'a>(&'a SchedulerSignal);

impl Drop for AliveGuard<'_> {
    fn drop(&mut self) {
        self.0.flushing.store(false, Ordering::SeqCst);
        self.0.alive.store(false, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn guarded<F: FnOnce()>(store: &str, step: &str, f: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(
            store,
            step,
            panic = panic_message(payload.as_ref()),
            "spool thread step panicked; continuing"
        );
    }
}

/// Body of the spool thread. Returns once the store has stopped it and any
/// final requested flush has run.
pub(crate) fn run<T: SpoolTask + ?Sized>(store: &str, signal: &SchedulerSignal, task: &T) {
    let _alive = AliveGuard(signal);
    debug!(store, "spool thread started");

    let mut next_expiry = signal.expiry_interval.map(|interval| Instant::now() + interval);
    while signal.should_continue() {
        signal.wait_for_work();

        let requested = signal.begin_flush();
        guarded(store, "flush", || task.flush_check(requested));
        signal.end_flush();

        if !signal.is_running() {
            continue;
        }
        if let (Some(deadline), Some(interval)) = (next_expiry, signal.expiry_interval) {
            if Instant::now() >= deadline {
                guarded(store, "expiry", || task.expire_elements());
                next_expiry = Some(Instant::now() + interval);
            }
        }
    }

    debug!(store, "spool thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[derive(Default)]
    struct Recording {
        checks: AtomicUsize,
        requested: AtomicUsize,
        expiries: AtomicUsize,
        panic_on_flush: AtomicBool,
    }

    impl SpoolTask for Recording {
        fn flush_check(&self, flush_requested: bool) {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if flush_requested {
                self.requested.fetch_add(1, Ordering::SeqCst);
            }
            if self.panic_on_flush.swap(false, Ordering::SeqCst) {
                panic!("flush failed");
            }
        }

        fn expire_elements(&self) {
            self.expiries.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spawn(
        signal: &Arc<SchedulerSignal>,
        task: &Arc<Recording>,
    ) -> thread::JoinHandle<()> {
        let signal = Arc::clone(signal);
        let task = Arc::clone(task);
        thread::spawn(move || run("test", &signal, &*task))
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_stop_runs_final_requested_flush() {
        // long sleep interval: only an explicit wake-up can get us through
        let signal = Arc::new(SchedulerSignal::new(Duration::from_secs(60), None));
        let task = Arc::new(Recording::default());
        let handle = spawn(&signal, &task);

        signal.request_flush();
        signal.stop();
        handle.join().unwrap();

        assert!(task.requested.load(Ordering::SeqCst) >= 1);
        assert!(!signal.is_alive());
        assert!(!signal.flush_pending());
    }

    #[test]
    fn test_flush_request_wakes_thread() {
        let signal = Arc::new(SchedulerSignal::new(Duration::from_secs(60), None));
        let task = Arc::new(Recording::default());
        let handle = spawn(&signal, &task);

        signal.request_flush();
        wait_until(|| !signal.flush_pending());
        assert_eq!(task.requested.load(Ordering::SeqCst), 1);

        signal.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_expiry_runs_on_interval() {
        let signal = Arc::new(SchedulerSignal::new(
            Duration::from_millis(5),
            Some(Duration::from_millis(10)),
        ));
        let task = Arc::new(Recording::default());
        let handle = spawn(&signal, &task);

        wait_until(|| task.expiries.load(Ordering::SeqCst) >= 2);

        signal.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_panicking_step_does_not_kill_thread() {
        let signal = Arc::new(SchedulerSignal::new(Duration::from_millis(5), None));
        let task = Arc::new(Recording::default());
        task.panic_on_flush.store(true, Ordering::SeqCst);
        let handle = spawn(&signal, &task);

        wait_until(|| task.checks.load(Ordering::SeqCst) >= 3);
        assert!(signal.is_alive());

        signal.stop();
        handle.join().unwrap();
        assert!(!signal.is_alive());
    }
}
