//! Single-assignment async values.
//!
//! An [`AsyncValue`] is a reference-counted cell that transitions exactly
//! once from unavailable to a terminal state: a concrete payload or an
//! error. Callbacks registered with [`AsyncValue::and_then`] fire exactly
//! once, on the thread that performs the terminal transition, or inline on
//! the registering thread if the value is already terminal. *Indirect*
//! values additionally forward to another value, at which point their
//! waiters become waiters of the target.
//!
//! Transitions and callback registration are linearized through a small
//! per-value mutex; payloads are published through a write-once slot so
//! typed reads never take the lock.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::RuntimeError;

type Waiter = Box<dyn FnOnce() + Send>;

/// The terminal state of an async value.
#[derive(Clone)]
pub enum Outcome {
    /// A concrete payload.
    Concrete(Arc<dyn Any + Send + Sync>),
    /// An error.
    Error(Arc<RuntimeError>),
}

struct WaitState {
    done: bool,
    forwarded: bool,
    waiters: SmallVec<[Waiter; 2]>,
}

/// A reference-counted single-assignment future with a typed payload or an
/// error. Shared via `Arc`; the lifetime is the longest holder's.
pub struct AsyncValue {
    is_indirect: bool,
    state: Mutex<WaitState>,
    outcome: OnceLock<Outcome>,
}

impl AsyncValue {
    fn with_kind(is_indirect: bool) -> Arc<Self> {
        Arc::new(Self {
            is_indirect,
            state: Mutex::new(WaitState {
                done: false,
                forwarded: false,
                waiters: SmallVec::new(),
            }),
            outcome: OnceLock::new(),
        })
    }

    /// Creates an unavailable value to be completed later.
    pub fn unavailable() -> Arc<Self> {
        Self::with_kind(false)
    }

    /// Creates an indirect value that will forward to another value.
    pub fn indirect() -> Arc<Self> {
        Self::with_kind(true)
    }

    /// Creates a value that is already concrete.
    pub fn concrete<T: Send + Sync + 'static>(value: T) -> Arc<Self> {
        let av = Self::with_kind(false);
        av.set_value(value);
        av
    }

    /// Creates a value that is already an error.
    pub fn error(error: RuntimeError) -> Arc<Self> {
        Self::error_arc(Arc::new(error))
    }

    /// Creates an error value from a shared error.
    pub fn error_arc(error: Arc<RuntimeError>) -> Arc<Self> {
        let av = Self::with_kind(false);
        av.complete(Outcome::Error(error));
        av
    }

    /// `true` once the value is concrete or an error.
    pub fn is_available(&self) -> bool {
        self.outcome.get().is_some()
    }

    /// `true` if the value is terminal with a concrete payload.
    pub fn is_concrete(&self) -> bool {
        matches!(self.outcome.get(), Some(Outcome::Concrete(_)))
    }

    /// `true` if the value is terminal with an error.
    pub fn is_error(&self) -> bool {
        matches!(self.outcome.get(), Some(Outcome::Error(_)))
    }

    /// `true` if this value was created with [`AsyncValue::indirect`].
    pub fn is_indirect(&self) -> bool {
        self.is_indirect
    }

    /// `true` if the value is concrete with a payload of type `T`.
    pub fn is_type<T: Send + Sync + 'static>(&self) -> bool {
        matches!(self.outcome.get(), Some(Outcome::Concrete(payload)) if payload.is::<T>())
    }

    /// Borrows the concrete payload.
    ///
    /// Panics if the value is not concrete with a payload of type `T`;
    /// callers must have observed availability first.
    pub fn get<T: Send + Sync + 'static>(&self) -> &T {
        match self.outcome.get() {
            Some(Outcome::Concrete(payload)) => payload
                .downcast_ref::<T>()
                .expect("async value accessed with the wrong payload type"),
            _ => panic!("async value accessed before it became concrete"),
        }
    }

    /// The error of a terminal error value.
    ///
    /// Panics if the value is not in the error state.
    pub fn get_error(&self) -> Arc<RuntimeError> {
        match self.outcome.get() {
            Some(Outcome::Error(error)) => error.clone(),
            _ => panic!("async value is not an error"),
        }
    }

    /// The terminal outcome, if reached.
    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome.get().cloned()
    }

    /// Transitions to `Concrete`. Panics on a second terminal transition.
    pub fn set_value<T: Send + Sync + 'static>(&self, value: T) {
        self.complete(Outcome::Concrete(Arc::new(value)));
    }

    /// Transitions to `Error`. Panics on a second terminal transition.
    pub fn set_error(&self, error: RuntimeError) {
        self.complete(Outcome::Error(Arc::new(error)));
    }

    /// Transitions to `Error` sharing an existing error.
    pub fn set_error_arc(&self, error: Arc<RuntimeError>) {
        self.complete(Outcome::Error(error));
    }

    fn complete(&self, outcome: Outcome) {
        if self.outcome.set(outcome).is_err() {
            panic!("async value completed twice");
        }
        let waiters = {
            let mut state = self.state.lock();
            state.done = true;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            waiter();
        }
    }

    /// Runs `f` when the value reaches a terminal state. If it already has,
    /// `f` runs inline on the calling thread. Callers must not hold locks
    /// that `f` also takes.
    pub fn and_then(&self, f: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.state.lock();
            if !state.done {
                state.waiters.push(Box::new(f));
                return;
            }
        }
        f();
    }

    /// Forwards this indirect value to `target`: once `target` is terminal
    /// this value adopts its outcome and wakes its own waiters. Permitted
    /// exactly once, and only on indirect values. Producers must not build
    /// forwarding cycles.
    pub fn forward_to(self: Arc<Self>, target: Arc<AsyncValue>) {
        assert!(
            self.is_indirect,
            "only indirect async values can be forwarded"
        );
        {
            let mut state = self.state.lock();
            assert!(
                !state.forwarded && !state.done,
                "indirect async value forwarded twice"
            );
            state.forwarded = true;
        }
        let observed = target.clone();
        target.and_then(move || {
            let outcome = observed
                .outcome()
                .expect("forward target woke its waiters without an outcome");
            self.complete(outcome);
        });
    }
}

impl std::fmt::Debug for AsyncValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.outcome.get() {
            None => "unavailable",
            Some(Outcome::Concrete(_)) => "concrete",
            Some(Outcome::Error(_)) => "error",
        };
        f.debug_struct("AsyncValue")
            .field("state", &state)
            .field("indirect", &self.is_indirect)
            .finish()
    }
}

/// Runs `k` once every value in `values` has reached a terminal state.
/// With no values, `k` runs inline.
pub fn when_all(values: &[Arc<AsyncValue>], k: impl FnOnce() + Send + 'static) {
    if values.is_empty() {
        k();
        return;
    }
    let pending = Arc::new(AtomicUsize::new(values.len()));
    let continuation: Arc<Mutex<Option<Waiter>>> = Arc::new(Mutex::new(Some(Box::new(k))));
    for value in values {
        let pending = pending.clone();
        let continuation = continuation.clone();
        value.and_then(move || {
            if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                if let Some(k) = continuation.lock().take() {
                    k();
                }
            }
        });
    }
}

/// A typed view of an [`AsyncValue`].
pub struct AsyncValueRef<T> {
    value: Arc<AsyncValue>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> Clone for AsyncValueRef<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for AsyncValueRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}

impl<T: Send + Sync + 'static> AsyncValueRef<T> {
    /// An unavailable value to be emplaced later.
    pub fn unavailable() -> Self {
        Self::from_value(AsyncValue::unavailable())
    }

    /// An indirect value to be forwarded later.
    pub fn indirect() -> Self {
        Self::from_value(AsyncValue::indirect())
    }

    /// An already-concrete value.
    pub fn available(value: T) -> Self {
        Self::from_value(AsyncValue::concrete(value))
    }

    /// An already-errored value.
    pub fn error(error: RuntimeError) -> Self {
        Self::from_value(AsyncValue::error(error))
    }

    /// Adopts an untyped value as a typed view. The payload type is not
    /// checked until a typed read.
    pub fn from_value(value: Arc<AsyncValue>) -> Self {
        Self {
            value,
            _marker: std::marker::PhantomData,
        }
    }

    /// The underlying untyped value.
    pub fn value(&self) -> &Arc<AsyncValue> {
        &self.value
    }

    /// Consumes the view, returning the untyped value.
    pub fn into_value(self) -> Arc<AsyncValue> {
        self.value
    }

    /// See [`AsyncValue::is_available`].
    pub fn is_available(&self) -> bool {
        self.value.is_available()
    }

    /// See [`AsyncValue::is_concrete`].
    pub fn is_concrete(&self) -> bool {
        self.value.is_concrete()
    }

    /// See [`AsyncValue::is_error`].
    pub fn is_error(&self) -> bool {
        self.value.is_error()
    }

    /// Borrows the payload; panics unless concrete with type `T`.
    pub fn get(&self) -> &T {
        self.value.get::<T>()
    }

    /// See [`AsyncValue::get_error`].
    pub fn get_error(&self) -> Arc<RuntimeError> {
        self.value.get_error()
    }

    /// Completes the value with a payload.
    pub fn emplace(&self, value: T) {
        self.value.set_value(value);
    }

    /// Completes the value with an error.
    pub fn set_error(&self, error: RuntimeError) {
        self.value.set_error(error);
    }

    /// Forwards this (indirect) value to another value.
    pub fn forward(&self, target: AsyncValueRef<T>) {
        self.value.clone().forward_to(target.into_value());
    }

    /// See [`AsyncValue::and_then`].
    pub fn and_then(&self, f: impl FnOnce() + Send + 'static) {
        self.value.and_then(f);
    }
}

/// A zero-payload value used purely to order side-effecting operations.
/// When a chain is resolved, all side effects of its producer are visible.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Chain;

/// A chain that is already resolved.
pub fn ready_chain() -> AsyncValueRef<Chain> {
    AsyncValueRef::available(Chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn concrete_value_reads_back() {
        let av = AsyncValue::concrete(41i32);
        assert!(av.is_available());
        assert!(av.is_concrete());
        assert!(!av.is_error());
        assert!(av.is_type::<i32>());
        assert!(!av.is_type::<u64>());
        assert_eq!(*av.get::<i32>(), 41);
    }

    #[test]
    fn error_value_carries_error() {
        let av = AsyncValue::error(RuntimeError::Message("boom".into()));
        assert!(av.is_available());
        assert!(av.is_error());
        assert_eq!(av.get_error().to_string(), "boom");
    }

    #[test]
    fn and_then_runs_inline_when_terminal() {
        let av = AsyncValue::concrete(1u8);
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        av.and_then(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn and_then_defers_until_transition() {
        let av = AsyncValue::unavailable();
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        av.and_then(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        av.set_value(5i64);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn second_write_is_rejected() {
        let av = AsyncValue::unavailable();
        av.set_value(1i32);
        av.set_value(2i32);
    }

    #[test]
    fn indirect_forwards_waiters_and_reads() {
        let indirect = AsyncValue::indirect();
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        indirect.and_then(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });

        let target = AsyncValue::unavailable();
        indirect.clone().forward_to(target.clone());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!indirect.is_available());

        target.set_value("payload");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(indirect.is_concrete());
        assert_eq!(*indirect.get::<&str>(), "payload");
    }

    #[test]
    fn indirect_forward_to_terminal_resolves_inline() {
        let indirect = AsyncValue::indirect();
        indirect.clone().forward_to(AsyncValue::error(RuntimeError::Cancelled));
        assert!(indirect.is_error());
        assert_eq!(
            indirect.get_error().to_string(),
            RuntimeError::Cancelled.to_string()
        );
    }

    #[test]
    #[should_panic(expected = "forwarded twice")]
    fn double_forward_is_rejected() {
        let indirect = AsyncValue::indirect();
        indirect.clone().forward_to(AsyncValue::concrete(1i32));
        indirect.forward_to(AsyncValue::concrete(2i32));
    }

    #[test]
    #[should_panic(expected = "only indirect")]
    fn plain_values_cannot_forward() {
        let av = AsyncValue::unavailable();
        av.forward_to(AsyncValue::concrete(1i32));
    }

    #[test]
    fn when_all_waits_for_every_value() {
        let a = AsyncValue::unavailable();
        let b = AsyncValue::unavailable();
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        when_all(&[a.clone(), b.clone()], move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        a.set_value(1i32);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        b.set_error(RuntimeError::Cancelled);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn when_all_with_no_values_runs_inline() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        when_all(&[], move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn typed_ref_emplace_and_get() {
        let r = AsyncValueRef::<String>::unavailable();
        assert!(!r.is_available());
        r.emplace("ok".to_string());
        assert_eq!(r.get(), "ok");
        let copy = r.clone();
        assert!(copy.is_concrete());
    }

    #[test]
    fn ready_chain_is_concrete() {
        let chain = ready_chain();
        assert!(chain.is_concrete());
        assert_eq!(*chain.get(), Chain);
    }
}
