//! Wait-condition polling.
//!
//! A wait is a task whose completion promise is settled by a poller. Each
//! poll runs the condition as a child task of the wait, so work the
//! condition schedules drains before the next poll starts. Polling stops
//! when the wait's frame closes, including on cancellation and reset.

// ============================================================================
// Imports
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{CancelKind, Error, Result};
use crate::host::{self, TimerHandle};
use crate::identifiers::FrameId;
use crate::promise::{Deferred, Promise};
use crate::value::Value;

use super::ControlFlow;

// ============================================================================
// Types
// ============================================================================

type Condition = Box<dyn FnMut() -> Result<Value>>;

struct Poller {
    flow: ControlFlow,
    /// Frame of the wait task; every poll nests here.
    frame: FrameId,
    condition: Rc<RefCell<Condition>>,
    started: Instant,
    timeout: Option<Duration>,
    message: Option<String>,
    result: Deferred,
    /// Pending delay before the next poll.
    timer: RefCell<Option<TimerHandle>>,
}

// ============================================================================
// ControlFlow - Waiting
// ============================================================================

impl ControlFlow {
    /// Schedules a task that polls `condition` until it yields a truthy
    /// value.
    ///
    /// The condition may return a promise; its resolved value is tested.
    /// The wait fulfills with the first truthy value and rejects with the
    /// first condition failure. With a `timeout`, a falsy result after the
    /// deadline rejects with [`Error::WaitTimeout`]; `None` waits forever.
    pub fn wait<F, R>(
        &self,
        condition: F,
        timeout: Option<Duration>,
        message: Option<&str>,
    ) -> Promise
    where
        F: FnMut() -> Result<R> + 'static,
        R: Into<Value>,
    {
        let mut condition = condition;
        let condition: Condition = Box::new(move || condition().map(Into::into));
        let message = message.map(str::to_string);
        let description = message
            .clone()
            .unwrap_or_else(|| "<anonymous wait>".to_string());

        let flow = self.clone();
        self.execute_named(description, move || {
            let frame = flow
                .active_frame()
                .ok_or_else(|| Error::type_error("wait started outside a frame"))?;

            let poller = Rc::new(Poller {
                result: Deferred::in_flow(&flow),
                flow: flow.clone(),
                frame,
                condition: Rc::new(RefCell::new(condition)),
                started: Instant::now(),
                timeout,
                message,
                timer: RefCell::new(None),
            });

            let watcher = Rc::clone(&poller);
            flow.on_frame_close(frame, move |outcome| watcher.stop(outcome));

            let promise = poller.result.promise();
            Poller::poll(&poller);
            Ok(promise)
        })
    }

    /// Schedules a task that waits for `promise`.
    ///
    /// Without a `timeout` the task simply adopts the promise. Otherwise
    /// the promise races a timer; if the timer fires first the task rejects
    /// with [`Error::PromiseTimeout`] and a late settlement is ignored.
    pub fn wait_for(
        &self,
        promise: &Promise,
        timeout: Option<Duration>,
        message: Option<&str>,
    ) -> Promise {
        let promise = promise.clone();
        let message = message.map(str::to_string);
        let description = message
            .clone()
            .unwrap_or_else(|| "<anonymous wait>".to_string());

        let flow = self.clone();
        self.execute_named(description, move || {
            let Some(timeout) = timeout else {
                return Ok(promise);
            };

            let started = Instant::now();
            let result = Deferred::in_flow(&flow);

            let on_timeout = result.clone();
            let timer = host::set_timeout(timeout, move || {
                let elapsed_ms = elapsed_millis(started);
                debug!(elapsed_ms, "Timed out waiting for promise");
                on_timeout.reject(Error::promise_timeout(message, elapsed_ms));
            });

            let on_settle = result.clone();
            promise.subscribe_raw(move |outcome| {
                timer.cancel();
                on_settle.settle(outcome);
            });

            Ok(result.promise())
        })
    }
}

// ============================================================================
// Poller
// ============================================================================

impl Poller {
    /// Schedules the next condition check.
    fn poll(this: &Rc<Self>) {
        if !this.result.is_pending() {
            return;
        }
        if !this.flow.frame_is_open(this.frame) {
            this.result
                .reject(Error::cancelled(CancelKind::Explicit, None));
            return;
        }

        let condition = Rc::clone(&this.condition);
        let check = this.flow.schedule_task(
            None,
            Some(this.frame),
            Box::new(move || (condition.borrow_mut())()),
        );

        let poller = Rc::clone(this);
        check.subscribe_raw(move |outcome| Poller::on_result(&poller, outcome));
    }

    fn on_result(this: &Rc<Self>, outcome: Result<Value>) {
        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                this.result.reject(err);
                return;
            }
        };

        if value.is_truthy() {
            this.result.fulfill(value);
            return;
        }

        let elapsed = this.started.elapsed();
        if this.timeout.is_some_and(|timeout| elapsed >= timeout) {
            let elapsed_ms = elapsed_millis(this.started);
            debug!(elapsed_ms, "Wait condition timed out");
            this.result
                .reject(Error::wait_timeout(this.message.clone(), elapsed_ms));
            return;
        }

        trace!(frame = %this.frame, "Wait condition falsy, polling again");
        let poller = Rc::clone(this);
        let timer = host::set_timeout(this.flow.config().poll_interval, move || {
            Poller::poll(&poller);
        });
        *this.timer.borrow_mut() = Some(timer);
    }

    /// Ends polling once the wait's frame has closed.
    fn stop(&self, outcome: &Result<Value>) {
        if let Some(timer) = self.timer.borrow_mut().take() {
            timer.cancel();
        }
        if self.result.is_pending() {
            let reason = match outcome {
                Err(err) => err.clone(),
                Ok(_) => Error::cancelled(CancelKind::Explicit, None),
            };
            trace!(frame = %self.frame, "Wait frame closed, polling stopped");
            self.result.reject(reason);
        }
    }
}

fn elapsed_millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    use crate::error::Error;
    use crate::flow::ControlFlow;
    use crate::host::run_local;
    use crate::promise::{Deferred, delayed};
    use crate::value::Value;

    fn assert_timeout_message(message: &str, prefix: &str, suffix: &str) {
        let rest = message
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
            .unwrap_or_else(|| panic!("unexpected message: {message:?}"));
        assert!(!rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_wait_returns_first_truthy_value() {
        run_local(async {
            let flow = ControlFlow::new();
            let calls = Rc::new(Cell::new(0));
            let c = Rc::clone(&calls);

            let waited = flow.wait(
                move || {
                    c.set(c.get() + 1);
                    Ok(if c.get() >= 3 { Value::from("ready") } else { Value::Null })
                },
                None,
                None,
            );

            assert_eq!(waited.await.expect("resolved"), Value::from("ready"));
            assert_eq!(calls.get(), 3);
        })
        .await;
    }

    #[tokio::test]
    async fn test_wait_timeout_message() {
        run_local(async {
            let flow = ControlFlow::new();
            let waited = flow.wait(|| Ok(false), Some(Duration::ZERO), Some("always false"));

            let err = waited.await.expect_err("timed out");
            assert!(err.is_timeout());
            assert_timeout_message(
                &err.to_string(),
                "always false\nWait timed out after ",
                "ms",
            );
        })
        .await;
    }

    #[tokio::test]
    async fn test_wait_condition_error_stops_polling() {
        run_local(async {
            let flow = ControlFlow::new();
            let calls = Rc::new(Cell::new(0));
            let c = Rc::clone(&calls);

            let waited = flow.wait(
                move || {
                    c.set(c.get() + 1);
                    Err::<bool, _>(Error::application("condition exploded"))
                },
                Some(Duration::from_secs(5)),
                None,
            );

            let err = waited.await.expect_err("failed");
            assert_eq!(err.to_string(), "condition exploded");
            assert_eq!(calls.get(), 1);
        })
        .await;
    }

    #[tokio::test]
    async fn test_wait_condition_may_return_promise() {
        run_local(async {
            let flow = ControlFlow::new();
            let calls = Rc::new(Cell::new(0));
            let c = Rc::clone(&calls);

            let waited = flow.wait(
                move || {
                    c.set(c.get() + 1);
                    let ready = c.get() > 1;
                    Ok(delayed(Duration::from_millis(1)).then(move |_| Ok(ready)))
                },
                None,
                None,
            );

            assert_eq!(waited.await.expect("resolved"), Value::Bool(true));
            assert_eq!(calls.get(), 2);
        })
        .await;
    }

    #[tokio::test]
    async fn test_wait_drains_condition_subtasks_between_polls() {
        run_local(async {
            let flow = ControlFlow::new();
            let log = Rc::new(RefCell::new(Vec::new()));
            let polls = Rc::new(Cell::new(0));

            let (f, l, p) = (flow.clone(), Rc::clone(&log), Rc::clone(&polls));
            let waited = flow.wait(
                move || {
                    let n = p.get() + 1;
                    p.set(n);
                    l.borrow_mut().push(format!("poll {n}"));
                    let l2 = Rc::clone(&l);
                    f.execute(move || {
                        l2.borrow_mut().push(format!("sub {n}"));
                        Ok(())
                    });
                    Ok(n >= 2)
                },
                None,
                None,
            );

            waited.await.expect("resolved");
            assert_eq!(*log.borrow(), vec!["poll 1", "sub 1", "poll 2", "sub 2"]);
        })
        .await;
    }

    #[tokio::test]
    async fn test_wait_blocks_later_siblings() {
        run_local(async {
            let flow = ControlFlow::new();
            let ready = Rc::new(Cell::new(false));
            let log = Rc::new(RefCell::new(Vec::new()));

            let r = Rc::clone(&ready);
            flow.wait(move || Ok(r.get()), None, Some("flag"));
            let l = Rc::clone(&log);
            let after = flow.execute(move || {
                l.borrow_mut().push("after");
                Ok(())
            });

            tokio::time::sleep(Duration::from_millis(5)).await;
            assert!(log.borrow().is_empty());

            ready.set(true);
            after.await.expect("after");
            assert_eq!(*log.borrow(), vec!["after"]);
        })
        .await;
    }

    #[tokio::test]
    async fn test_wait_rejects_when_condition_subtask_fails() {
        run_local(async {
            let flow = ControlFlow::new();
            let calls = Rc::new(Cell::new(0));
            let (f, c) = (flow.clone(), Rc::clone(&calls));

            let waited = flow.wait(
                move || {
                    c.set(c.get() + 1);
                    f.execute(|| Err::<(), _>(Error::application("sub failed")));
                    Ok(false)
                },
                Some(Duration::from_secs(5)),
                None,
            );

            let err = waited.await.expect_err("failed");
            assert_eq!(err.to_string(), "sub failed");
            assert_eq!(calls.get(), 1);
        })
        .await;
    }

    #[tokio::test]
    async fn test_cancelled_wait_stops_polling() {
        run_local(async {
            let flow = ControlFlow::new();
            let calls = Rc::new(Cell::new(0));
            let c = Rc::clone(&calls);

            let waited = flow.wait(
                move || {
                    c.set(c.get() + 1);
                    Ok(false)
                },
                None,
                None,
            );

            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(calls.get() > 0);
            waited.cancel(None);
            let at_cancel = calls.get();

            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(calls.get(), at_cancel);
            assert!(flow.is_idle());
            assert!(waited.await.expect_err("cancelled").is_cancellation());
        })
        .await;
    }

    #[tokio::test]
    async fn test_reset_stops_polling() {
        run_local(async {
            let flow = ControlFlow::new();
            let calls = Rc::new(Cell::new(0));
            let c = Rc::clone(&calls);

            let waited = flow.wait(
                move || {
                    c.set(c.get() + 1);
                    Ok(false)
                },
                None,
                Some("never ready"),
            );

            tokio::time::sleep(Duration::from_millis(20)).await;
            flow.reset();
            let at_reset = calls.get();

            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(calls.get(), at_reset);
            assert!(flow.is_idle());
            assert!(waited.await.expect_err("reset").is_cancellation());
        })
        .await;
    }

    #[tokio::test]
    async fn test_wait_for_promise_resolves() {
        run_local(async {
            let flow = ControlFlow::new();
            let deferred = Deferred::in_flow(&flow);
            let waited = flow.wait_for(&deferred.promise(), Some(Duration::from_secs(5)), None);

            deferred.fulfill(7);
            assert_eq!(waited.await.expect("resolved"), Value::from(7));
        })
        .await;
    }

    #[tokio::test]
    async fn test_wait_for_promise_times_out() {
        run_local(async {
            let flow = ControlFlow::new();
            let deferred = Deferred::in_flow(&flow);
            let waited = flow.wait_for(
                &deferred.promise(),
                Some(Duration::from_millis(5)),
                Some("page load"),
            );

            let err = waited.await.expect_err("timed out");
            assert!(err.is_timeout());
            assert_timeout_message(
                &err.to_string(),
                "page load\nTimed out waiting for promise to resolve after ",
                "ms",
            );

            deferred.fulfill("late");
            flow.when_idle().await.expect("idle");
        })
        .await;
    }

    #[tokio::test]
    async fn test_wait_for_without_timeout_adopts() {
        run_local(async {
            let flow = ControlFlow::new();
            let deferred = Deferred::in_flow(&flow);
            let waited = flow.wait_for(&deferred.promise(), None, None);

            deferred.reject(Error::application("never loaded"));
            assert_eq!(
                waited.await.expect_err("rejected").to_string(),
                "never loaded"
            );
        })
        .await;
    }
}
