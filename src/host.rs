//! Host event-loop adapter.
//!
//! Maps the scheduler's notion of "later" onto tokio. Every thread hosting
//! flows owns two FIFO queues:
//!
//! | Queue | Used for | Runs |
//! |-------|----------|------|
//! | microtasks | flow ticks, thenable adoption | before any turn |
//! | turns | unhandled-rejection checks | one at a time, after microtasks drain |
//!
//! Both queues are drained by a single local tokio task, spawned on demand,
//! so all flows on a thread must run inside a [`LocalSet`]; see
//! [`run_local`]. Timers use `tokio::time` and re-enter the queues when they
//! fire. A job never runs synchronously inside the call that queued it.

// ============================================================================
// Imports
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::runtime::Builder;
use tokio::task::{JoinHandle, LocalSet};
use tracing::trace;

use crate::error::Result;

// ============================================================================
// Types
// ============================================================================

/// A queued host callback.
type Job = Box<dyn FnOnce()>;

#[derive(Default)]
struct Host {
    microtasks: RefCell<VecDeque<Job>>,
    turns: RefCell<VecDeque<Job>>,
    drain_scheduled: Cell<bool>,
}

thread_local! {
    static HOST: Host = Host::default();
}

// ============================================================================
// Scheduling
// ============================================================================

/// Queues `job` to run as a microtask.
pub fn enqueue(job: impl FnOnce() + 'static) {
    HOST.with(|host| host.microtasks.borrow_mut().push_back(Box::new(job)));
    schedule_drain();
}

/// Queues `job` to run on a later turn, after pending microtasks.
pub fn defer_turn(job: impl FnOnce() + 'static) {
    HOST.with(|host| host.turns.borrow_mut().push_back(Box::new(job)));
    schedule_drain();
}

/// Queues `job` to run after `turns` turns have passed.
///
/// `turns == 0` degrades to [`enqueue`].
pub fn defer_turns(turns: usize, job: impl FnOnce() + 'static) {
    match turns {
        0 => enqueue(job),
        1 => defer_turn(job),
        n => defer_turn(move || defer_turns(n - 1, job)),
    }
}

/// Runs `job` once `delay` has elapsed.
///
/// A zero delay still yields to the tokio scheduler first, which lets I/O
/// and timers make progress between back-to-back polls.
pub fn set_timeout(delay: Duration, job: impl FnOnce() + 'static) -> TimerHandle {
    let handle = tokio::task::spawn_local(async move {
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        defer_turn(job);
    });

    TimerHandle { handle }
}

/// Cancellation handle for [`set_timeout`].
#[derive(Debug)]
pub struct TimerHandle {
    handle: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancels the timer. Has no effect once the callback was queued.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

// ============================================================================
// Drain Loop
// ============================================================================

fn schedule_drain() {
    let spawn = HOST.with(|host| !host.drain_scheduled.replace(true));
    if spawn {
        let guard = DrainGuard;
        tokio::task::spawn_local(async move {
            let _guard = guard;
            drain();
        });
    }
}

/// Clears the scheduled flag even when the drain task is dropped unrun,
/// e.g. with its `LocalSet`.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let _ = HOST.try_with(|host| host.drain_scheduled.set(false));
    }
}

fn drain() {
    let mut ran = 0usize;

    loop {
        let next = HOST.with(|host| {
            let microtask = host.microtasks.borrow_mut().pop_front();
            microtask.or_else(|| host.turns.borrow_mut().pop_front())
        });

        match next {
            Some(job) => {
                job();
                ran += 1;
            }
            None => break,
        }
    }

    trace!(jobs = ran, "Host queue drained");
}

// ============================================================================
// Entry Points
// ============================================================================

/// Runs `future` inside a fresh [`LocalSet`] on the current runtime.
///
/// Flows, promises and timers require a `LocalSet`; wrap async test bodies
/// and application entry points with this.
pub async fn run_local<F: Future>(future: F) -> F::Output {
    LocalSet::new().run_until(future).await
}

/// Builds a current-thread runtime and blocks on `future` inside a
/// [`LocalSet`].
///
/// # Errors
///
/// Returns [`Error::Io`](crate::Error::Io) if the runtime cannot be built.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = Builder::new_current_thread().enable_all().build()?;
    let local = LocalSet::new();
    Ok(local.block_on(&runtime, future))
}

/// Routes scheduler logs to the test harness, filtered by `RUST_LOG`.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webdriver_flow=warn")),
        )
        .with_target(false)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::rc::Rc;

    #[tokio::test]
    async fn test_microtasks_run_fifo_before_turns() {
        run_local(async {
            let log = Rc::new(RefCell::new(Vec::new()));

            let l = Rc::clone(&log);
            defer_turn(move || l.borrow_mut().push("turn"));
            for name in ["a", "b", "c"] {
                let l = Rc::clone(&log);
                enqueue(move || l.borrow_mut().push(name));
            }
            assert!(log.borrow().is_empty());

            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            assert_eq!(*log.borrow(), vec!["a", "b", "c", "turn"]);
        })
        .await;
    }

    #[tokio::test]
    async fn test_microtask_queued_from_turn_runs_before_next_turn() {
        run_local(async {
            let log = Rc::new(RefCell::new(Vec::new()));

            let l = Rc::clone(&log);
            defer_turn(move || {
                let inner = Rc::clone(&l);
                l.borrow_mut().push("turn 1");
                enqueue(move || inner.borrow_mut().push("micro"));
            });
            let l = Rc::clone(&log);
            defer_turn(move || l.borrow_mut().push("turn 2"));

            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
            assert_eq!(*log.borrow(), vec!["turn 1", "micro", "turn 2"]);
        })
        .await;
    }

    #[tokio::test]
    async fn test_set_timeout_fires_after_delay() {
        run_local(async {
            let fired = Rc::new(Cell::new(false));
            let f = Rc::clone(&fired);
            let _timer = set_timeout(Duration::from_millis(5), move || f.set(true));

            assert!(!fired.get());
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert!(fired.get());
        })
        .await;
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_fires() {
        run_local(async {
            let fired = Rc::new(Cell::new(false));
            let f = Rc::clone(&fired);
            let timer = set_timeout(Duration::from_millis(5), move || f.set(true));
            timer.cancel();

            tokio::time::sleep(Duration::from_millis(30)).await;
            assert!(!fired.get());
        })
        .await;
    }

    #[test]
    fn test_block_on_runs_local_futures() {
        let value = block_on(async {
            let (tx, rx) = tokio::sync::oneshot::channel();
            enqueue(move || {
                let _ = tx.send(42);
            });
            rx.await.expect("sender dropped")
        })
        .expect("runtime");
        assert_eq!(value, 42);
    }
}
