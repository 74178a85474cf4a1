//! Promise combinators.
//!
//! | Function | Resolves to |
//! |----------|-------------|
//! | [`when`] | the value, adopted into a promise |
//! | [`all`] | every input value, in input order |
//! | [`map`] | the mapped array, applied sequentially |
//! | [`filter`] | the retained items, compacted |
//! | [`fully_resolved`] | the value with nested promises replaced |
//! | [`checked_node_call`] | the result passed to an error-first callback |
//! | [`delayed`] | `undefined`, after a delay |
//! | [`from_future`] | the output of a Rust future |
//!
//! An input whose rejection settles the combined promise counts as handled.
//! Rejections of other inputs stay the caller's to handle.

// ============================================================================
// Imports
// ============================================================================

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::host;
use crate::value::Value;

use super::{Deferred, OnFulfilled, OnRejected, Promise};

// ============================================================================
// Predicates
// ============================================================================

/// Returns `true` if `value` is a promise of this library.
#[inline]
#[must_use]
pub fn is_promise(value: &Value) -> bool {
    matches!(value, Value::Promise(_))
}

/// Returns `true` if `value` is promise-like.
#[inline]
#[must_use]
pub fn has_callable_then(value: &Value) -> bool {
    value.has_callable_then()
}

// ============================================================================
// Adapters
// ============================================================================

/// Wraps `value` in a promise.
///
/// A library promise is returned as is; thenables are adopted.
pub fn when(value: impl Into<Value>) -> Promise {
    match value.into() {
        Value::Promise(promise) => promise,
        other => Promise::fulfilled(other),
    }
}

/// Wraps `value` in a promise and registers the given handlers on it.
pub fn when_with(
    value: impl Into<Value>,
    on_fulfilled: Option<OnFulfilled>,
    on_rejected: Option<OnRejected>,
) -> Promise {
    when(value).then_with(on_fulfilled, on_rejected)
}

/// Returns a promise fulfilled with `undefined` after `delay`.
pub fn delayed(delay: Duration) -> Promise {
    let deferred = Deferred::new();
    let promise = deferred.promise();
    let timer = host::set_timeout(delay, move || deferred.fulfill(Value::Undefined));
    promise.set_cancel_hook(move |_| timer.cancel());
    promise
}

/// Drives `future` on the local task set and settles a promise with its
/// output.
///
/// Cancelling the returned promise aborts the future.
pub fn from_future<F, R>(future: F) -> Promise
where
    F: Future<Output = Result<R>> + 'static,
    R: Into<Value>,
{
    let deferred = Deferred::new();
    let promise = deferred.promise();

    let handle = tokio::task::spawn_local(async move {
        match future.await {
            Ok(value) => deferred.fulfill(value),
            Err(err) => deferred.reject(err),
        }
    });
    promise.set_cancel_hook(move |_| handle.abort());
    promise
}

/// Error-first callback handed out by [`checked_node_call`].
pub type NodeCallback = Rc<dyn Fn(Option<Error>, Value)>;

/// Adapts an error-first callback API into a promise.
///
/// The first callback invocation wins; later ones are ignored. An `Err`
/// returned synchronously by `f` rejects the promise unless the callback
/// already ran.
pub fn checked_node_call<F>(f: F) -> Promise
where
    F: FnOnce(NodeCallback) -> Result<()>,
{
    let deferred = Deferred::new();
    let resolver = deferred.clone();
    let callback: NodeCallback = Rc::new(move |err, value| match err {
        Some(err) => resolver.reject(err),
        None => resolver.fulfill(value),
    });

    if let Err(err) = f(callback) {
        deferred.reject(err);
    }
    deferred.promise()
}

// ============================================================================
// all
// ============================================================================

/// Waits for every element of an array.
///
/// Fulfills with the values in input order, keeping holes. Rejects with the
/// first rejection to occur. Later rejections are not consumed and reach the
/// flow's unhandled rejection check like any other.
pub fn all(values: impl Into<Value>) -> Promise {
    let result = Deferred::new();
    let promise = result.promise();

    when(values).subscribe_raw(move |outcome| match outcome {
        Ok(Value::Array(items)) => collect_all(items, result),
        Ok(other) => result.reject(not_an_array(&other)),
        Err(err) => result.reject(err),
    });
    promise
}

fn collect_all(items: Vec<Option<Value>>, result: Deferred) {
    let pending: Vec<(usize, Value)> = items
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| match slot {
            Some(value) if value.has_callable_then() => Some((index, value.clone())),
            _ => None,
        })
        .collect();

    if pending.is_empty() {
        result.fulfill(Value::Array(items));
        return;
    }

    let slots = Rc::new(RefCell::new(items));
    let remaining = Rc::new(Cell::new(pending.len()));

    for (index, value) in pending {
        let slots = Rc::clone(&slots);
        let remaining = Rc::clone(&remaining);
        let result = result.clone();

        let input = when(value);
        let rejected = input.clone();
        input.observe(move |outcome| match outcome {
            Ok(value) => {
                slots.borrow_mut()[index] = Some(value);
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    let values = slots.borrow().clone();
                    result.fulfill(Value::Array(values));
                }
            }
            Err(err) => {
                if result.is_pending() {
                    rejected.mark_handled();
                    result.reject(err);
                }
            }
        });
    }
}

fn not_an_array(value: &Value) -> Error {
    Error::type_error(format!("expected an array, got {value:?}"))
}

// ============================================================================
// map / filter
// ============================================================================

/// Applies `f` to each element in order.
///
/// The input is resolved first. A promise returned by `f` is awaited before
/// the next index is processed. Holes are skipped and kept. Rejects on the
/// first failure.
pub fn map<F, R>(values: impl Into<Value>, f: F) -> Promise
where
    F: FnMut(Value, usize) -> Result<R> + 'static,
    R: Into<Value>,
{
    sequence(values.into(), Mode::Map, wrap(f))
}

/// Keeps the elements for which `f` is truthy.
///
/// Same sequencing as [`map`]; the output is compact.
pub fn filter<F, R>(values: impl Into<Value>, f: F) -> Promise
where
    F: FnMut(Value, usize) -> Result<R> + 'static,
    R: Into<Value>,
{
    sequence(values.into(), Mode::Filter, wrap(f))
}

type Step = Box<dyn FnMut(Value, usize) -> Result<Value>>;

fn wrap<F, R>(mut f: F) -> Step
where
    F: FnMut(Value, usize) -> Result<R> + 'static,
    R: Into<Value>,
{
    Box::new(move |value, index| f(value, index).map(Into::into))
}

#[derive(Clone, Copy)]
enum Mode {
    Map,
    Filter,
}

struct Sequence {
    mode: Mode,
    items: Vec<Option<Value>>,
    next: usize,
    step: Option<Step>,
    mapped: Vec<Option<Value>>,
    kept: Vec<Option<Value>>,
    result: Deferred,
}

impl Sequence {
    fn record(&mut self, index: usize, output: Value) {
        match self.mode {
            Mode::Map => self.mapped[index] = Some(output),
            Mode::Filter => {
                if output.is_truthy() {
                    self.kept.push(self.items[index].clone());
                }
            }
        }
    }

    fn finish(&mut self) -> Value {
        match self.mode {
            Mode::Map => Value::Array(std::mem::take(&mut self.mapped)),
            Mode::Filter => Value::Array(std::mem::take(&mut self.kept)),
        }
    }
}

fn sequence(values: Value, mode: Mode, step: Step) -> Promise {
    let result = Deferred::new();
    let promise = result.promise();

    when(values).subscribe_raw(move |outcome| match outcome {
        Ok(Value::Array(items)) => {
            let state = Rc::new(RefCell::new(Sequence {
                mode,
                mapped: vec![None; items.len()],
                kept: Vec::new(),
                items,
                next: 0,
                step: Some(step),
                result,
            }));
            advance(&state);
        }
        Ok(other) => result.reject(not_an_array(&other)),
        Err(err) => result.reject(err),
    });
    promise
}

/// Runs the sequence until it finishes or has to wait for a promise.
fn advance(state: &Rc<RefCell<Sequence>>) {
    loop {
        let next = {
            let mut seq = state.borrow_mut();
            while seq.next < seq.items.len() && seq.items[seq.next].is_none() {
                seq.next += 1;
            }
            let index = seq.next;
            seq.next += 1;
            match seq.items.get(index).cloned().flatten() {
                Some(value) => seq.step.take().map(|step| (index, value, step)),
                None => None,
            }
        };

        let Some((index, value, mut step)) = next else {
            let (result, output) = {
                let mut seq = state.borrow_mut();
                (seq.result.clone(), seq.finish())
            };
            result.fulfill(output);
            return;
        };

        let output = step(value, index);
        state.borrow_mut().step = Some(step);

        let output = match output {
            Ok(output) => output,
            Err(err) => {
                let result = state.borrow().result.clone();
                result.reject(err);
                return;
            }
        };

        if !output.has_callable_then() {
            state.borrow_mut().record(index, output);
            continue;
        }

        let pending = when(output);
        match pending.result() {
            Some(Ok(output)) => {
                pending.mark_handled();
                state.borrow_mut().record(index, output);
            }
            Some(Err(err)) => {
                pending.mark_handled();
                let result = state.borrow().result.clone();
                result.reject(err);
                return;
            }
            None => {
                let state = Rc::clone(state);
                pending.subscribe_raw(move |outcome| match outcome {
                    Ok(output) => {
                        state.borrow_mut().record(index, output);
                        advance(&state);
                    }
                    Err(err) => {
                        let result = state.borrow().result.clone();
                        result.reject(err);
                    }
                });
                return;
            }
        }
    }
}

// ============================================================================
// fully_resolved
// ============================================================================

type Done = Box<dyn FnOnce(Result<Value>)>;

/// Resolves `value` and every promise nested in its arrays and objects.
///
/// Children are walked depth-first, one at a time. Rejects with the first
/// failure met in that order; later children are left untouched.
pub fn fully_resolved(value: impl Into<Value>) -> Promise {
    let result = Deferred::new();
    let promise = result.promise();

    resolve_deep(
        value.into(),
        Box::new(move |outcome| match outcome {
            Ok(value) => result.fulfill(value),
            Err(err) => result.reject(err),
        }),
    );
    promise
}

fn resolve_deep(value: Value, done: Done) {
    match value {
        Value::Promise(_) | Value::Thenable(_) => {
            when(value).subscribe_raw(move |outcome| match outcome {
                Ok(value) => resolve_deep(value, done),
                Err(err) => done(Err(err)),
            });
        }
        Value::Array(items) => Children::walk(items, Box::new(Value::Array), done),
        Value::Object(entries) => {
            let (keys, values): (Vec<String>, Vec<Option<Value>>) = entries
                .into_iter()
                .map(|(key, value)| (key, Some(value)))
                .unzip();
            let rebuild = Box::new(move |values: Vec<Option<Value>>| {
                Value::Object(
                    keys.into_iter()
                        .zip(values)
                        .map(|(key, value)| (key, value.unwrap_or_default()))
                        .collect::<BTreeMap<_, _>>(),
                )
            });
            Children::walk(values, rebuild, done);
        }
        scalar => done(Ok(scalar)),
    }
}

/// Returns `true` if resolving `value` has to wait for a promise.
fn has_nested_promise(value: &Value) -> bool {
    match value {
        Value::Promise(_) | Value::Thenable(_) => true,
        Value::Array(items) => items.iter().flatten().any(has_nested_promise),
        Value::Object(entries) => entries.values().any(has_nested_promise),
        _ => false,
    }
}

type Rebuild = Box<dyn FnOnce(Vec<Option<Value>>) -> Value>;

/// Sequential walk over the children of one array or object.
struct Children {
    pending: std::vec::IntoIter<Option<Value>>,
    resolved: Vec<Option<Value>>,
    rebuild: Rebuild,
    done: Done,
}

impl Children {
    fn walk(children: Vec<Option<Value>>, rebuild: Rebuild, done: Done) {
        Self {
            resolved: Vec::with_capacity(children.len()),
            pending: children.into_iter(),
            rebuild,
            done,
        }
        .resume();
    }

    fn resume(mut self) {
        loop {
            match self.pending.next() {
                None => {
                    let Self {
                        resolved,
                        rebuild,
                        done,
                        ..
                    } = self;
                    done(Ok(rebuild(resolved)));
                    return;
                }
                Some(Some(child)) if has_nested_promise(&child) => {
                    resolve_deep(
                        child,
                        Box::new(move |outcome| match outcome {
                            Ok(value) => {
                                self.resolved.push(Some(value));
                                self.resume();
                            }
                            Err(err) => (self.done)(Err(err)),
                        }),
                    );
                    return;
                }
                Some(child) => self.resolved.push(child),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;

    use crate::flow::{ControlFlow, EventData, FlowEvent};
    use crate::host::run_local;

    fn delayed_value(ms: u64, value: i64) -> Promise {
        delayed(Duration::from_millis(ms)).then(move |_| Ok(value))
    }

    #[tokio::test]
    async fn test_all_preserves_order_and_holes() {
        run_local(async {
            let late = delayed_value(10, 1);
            let early = delayed_value(1, 2);
            let input = Value::sparse(vec![
                Some(Value::from(late)),
                None,
                Some(Value::from(early)),
                Some(Value::from("plain")),
            ]);

            let values = all(input).await.expect("all fulfilled");
            assert_eq!(
                values,
                Value::sparse(vec![
                    Some(Value::from(1)),
                    None,
                    Some(Value::from(2)),
                    Some(Value::from("plain")),
                ])
            );
        })
        .await;
    }

    #[tokio::test]
    async fn test_all_rejects_with_first_rejection_to_occur() {
        run_local(async {
            let first = Deferred::new();
            let second = Deferred::new();
            let combined = all(vec![first.promise(), second.promise()]);

            second.reject(Error::application("second"));
            first.reject(Error::application("first"));

            let err = combined.await.expect_err("rejected");
            assert_eq!(err.to_string(), "second");
        })
        .await;
    }

    #[tokio::test]
    async fn test_all_leaves_later_rejections_to_the_caller() {
        run_local(async {
            let flow = ControlFlow::new();
            let uncaught = Rc::new(RefCell::new(Vec::new()));
            let seen = Rc::clone(&uncaught);
            flow.on(FlowEvent::UncaughtException, move |data| {
                if let EventData::UncaughtException(err) = data {
                    seen.borrow_mut().push(err.to_string());
                }
            });

            let first = Deferred::in_flow(&flow);
            let second = Deferred::in_flow(&flow);
            let combined = all(vec![first.promise(), second.promise()]);

            second.reject(Error::application("second"));
            first.reject(Error::application("first"));

            assert_eq!(combined.await.expect_err("rejected").to_string(), "second");
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert_eq!(*uncaught.borrow(), vec!["first".to_string()]);
        })
        .await;
    }

    #[tokio::test]
    async fn test_all_of_empty_array() {
        run_local(async {
            let values = all(Value::Array(Vec::new())).await.expect("empty");
            assert_eq!(values, Value::Array(Vec::new()));
        })
        .await;
    }

    #[tokio::test]
    async fn test_map_keeps_index_order_with_out_of_order_promises() {
        run_local(async {
            let mapped = map(Value::array(vec![1, 2, 3]), |value, index| {
                let next = value.as_i64().unwrap_or_default() + 1;
                let delay = 10 - 3 * index as u64;
                Ok(delayed_value(delay, next))
            });

            assert_eq!(mapped.await.expect("mapped"), Value::array(vec![2, 3, 4]));
        })
        .await;
    }

    #[tokio::test]
    async fn test_map_runs_sequentially() {
        run_local(async {
            let log = Rc::new(RefCell::new(Vec::new()));
            let l = Rc::clone(&log);
            let mapped = map(Value::array(vec![1, 2, 3]), move |value, index| {
                l.borrow_mut().push(index);
                Ok(delayed(Duration::from_millis(1)).then(move |_| Ok(value)))
            });

            tokio::task::yield_now().await;
            assert_eq!(*log.borrow(), vec![0]);

            mapped.await.expect("mapped");
            assert_eq!(*log.borrow(), vec![0, 1, 2]);
        })
        .await;
    }

    #[tokio::test]
    async fn test_map_skips_holes() {
        run_local(async {
            let calls = Rc::new(Cell::new(0));
            let c = Rc::clone(&calls);
            let mapped = map(Value::sparse(vec![Some(1), None, Some(3)]), move |v, _| {
                c.set(c.get() + 1);
                Ok(v.as_i64().unwrap_or_default() * 10)
            });

            let value = mapped.await.expect("mapped");
            assert_eq!(calls.get(), 2);
            assert_eq!(value, Value::sparse(vec![Some(10), None, Some(30)]));
        })
        .await;
    }

    #[tokio::test]
    async fn test_map_rejects_on_first_failure() {
        run_local(async {
            let mapped = map(Value::array(vec![1, 2, 3]), |value, _| {
                if value == Value::from(2) {
                    Err(Error::application("two"))
                } else {
                    Ok(value)
                }
            });
            assert_eq!(mapped.await.expect_err("failed").to_string(), "two");
        })
        .await;
    }

    #[tokio::test]
    async fn test_filter_is_compact() {
        run_local(async {
            let kept = filter(
                Value::sparse(vec![Some(1), None, Some(2), Some(3), Some(4)]),
                |value, _| Ok(Promise::fulfilled(value.as_i64().unwrap_or_default() % 2 == 0)),
            );
            assert_eq!(kept.await.expect("filtered"), Value::array(vec![2, 4]));
        })
        .await;
    }

    #[tokio::test]
    async fn test_fully_resolved_replaces_nested_promises() {
        run_local(async {
            let nested = Value::object([
                ("title", Value::from(delayed_value(2, 7))),
                (
                    "items",
                    Value::array(vec![Value::from(Promise::fulfilled("a")), Value::from(1)]),
                ),
            ]);

            let value = fully_resolved(nested).await.expect("resolved");
            assert_eq!(value.to_json(), json!({"title": 7.0, "items": ["a", 1.0]}));
        })
        .await;
    }

    #[tokio::test]
    async fn test_fully_resolved_rejects_on_nested_failure() {
        run_local(async {
            let nested = Value::array(vec![Value::from(Promise::rejected(Error::application(
                "deep",
            )))]);
            let err = fully_resolved(nested).await.expect_err("rejected");
            assert_eq!(err.to_string(), "deep");
        })
        .await;
    }

    #[tokio::test]
    async fn test_fully_resolved_walks_depth_first() {
        run_local(async {
            let slow = Deferred::new();
            let later = Promise::rejected(Error::application("second"));
            later.then_catch(|_| Ok(()));

            let resolved = fully_resolved(Value::array(vec![
                Value::from(slow.promise()),
                Value::from(later),
            ]));

            tokio::task::yield_now().await;
            assert!(resolved.is_pending());
            slow.reject(Error::application("first"));
            assert_eq!(resolved.await.expect_err("rejected").to_string(), "first");
        })
        .await;
    }

    #[tokio::test]
    async fn test_when_with_registers_handlers() {
        run_local(async {
            let doubled = when_with(
                21,
                Some(Box::new(|value| {
                    Ok(Value::from(value.as_i64().unwrap_or_default() * 2))
                })),
                None,
            );
            assert_eq!(doubled.await.expect("doubled"), Value::from(42));

            let recovered = when_with(
                Promise::rejected(Error::application("nope")),
                None,
                Some(Box::new(|err| Ok(Value::from(format!("saw {err}"))))),
            );
            assert_eq!(recovered.await.expect("recovered"), Value::from("saw nope"));

            let passed = when_with("as is", None, None);
            assert_eq!(passed.await.expect("passed"), Value::from("as is"));
        })
        .await;
    }

    #[tokio::test]
    async fn test_checked_node_call_first_call_wins() {
        run_local(async {
            let promise = checked_node_call(|callback| {
                callback(None, Value::from("first"));
                callback(Some(Error::application("second")), Value::Undefined);
                Err(Error::application("sync failure"))
            });
            assert_eq!(promise.await.expect("first"), Value::from("first"));

            let failed = checked_node_call(|_| Err(Error::application("sync failure")));
            assert_eq!(failed.await.expect_err("failed").to_string(), "sync failure");
        })
        .await;
    }

    #[tokio::test]
    async fn test_when_is_identity_for_promises() {
        run_local(async {
            let promise = Promise::fulfilled(1);
            assert!(when(promise.clone()).ptr_eq(&promise));
            assert!(is_promise(&Value::from(promise)));
            assert!(!is_promise(&Value::from(1)));
        })
        .await;
    }

    #[tokio::test]
    async fn test_from_future_settles_with_output() {
        run_local(async {
            let promise = from_future(async { Ok::<_, Error>("from future") });
            assert_eq!(promise.await.expect("output"), Value::from("from future"));
        })
        .await;
    }

    proptest! {
        #[test]
        fn prop_map_preserves_order(values in proptest::collection::vec(-1000i64..1000, 0..20)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            let expected = Value::array(values.iter().map(|v| v + 1).collect::<Vec<_>>());

            let mapped = tokio::task::LocalSet::new().block_on(&runtime, async move {
                map(Value::array(values), |value, _| {
                    Ok(Promise::fulfilled(value.as_i64().unwrap_or_default() + 1))
                })
                .await
            });
            prop_assert_eq!(mapped.expect("mapped"), expected);
        }
    }
}
