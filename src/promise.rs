//! # Promise Module
//!
//! Single-shot futures used by handler methods that finish their work later.
//!
//! ## Overview
//!
//! A [`Promise<T>`] settles exactly once, either with a value or with an
//! [`Error`]. Handler methods may return promises; the engine folds them into
//! the callback's deferred result, and the convenience functions hand them
//! back to the caller as [`Reply::Pending`](crate::Reply::Pending).
//!
//! ## Execution Model
//!
//! - [`Promise::new`] runs its executor on a `may` coroutine whose stack size
//!   comes from [`RuntimeConfig`](crate::runtime_config::RuntimeConfig).
//!   A panic inside the executor rejects the promise.
//! - Continuations registered with [`Promise::then`] and friends run on
//!   whichever thread or coroutine settles the promise.
//! - [`Promise::wait`] blocks the calling thread (or parks the calling
//!   coroutine) until settlement.
//!
//! ## Cancellation
//!
//! Cancellation is cooperative. [`Promise::cancel`] rejects a pending promise
//! with [`Error::Canceled`] and invokes the executor's `on_cancel` hook at
//! most once. Every waiter and continuation observes the cancellation error.
//!
//! ## Example
//!
//! ```rust
//! use callweave::Promise;
//!
//! let doubled = Promise::new(|resolver| resolver.resolve(21))
//!     .then(|n| n * 2);
//! assert_eq!(doubled.wait().unwrap(), 42);
//! ```

use crate::error::{CanceledError, Error};
use crate::runtime_config::RuntimeConfig;
use may::coroutine;
use may::sync::mpsc;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

type Continuation<T> = Box<dyn FnOnce(&Result<T, Error>) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

enum State<T> {
    Pending(Vec<Continuation<T>>),
    Settled(Result<T, Error>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    on_cancel: Mutex<Option<CancelHook>>,
}

/// A single-shot, clonable future.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.state.lock() {
            State::Pending(_) => "pending",
            State::Settled(Ok(_)) => "resolved",
            State::Settled(Err(_)) => "rejected",
        };
        write!(f, "Promise({state})")
    }
}

/// Settles a promise created by [`Promise::new`] or [`Promise::defer`].
pub struct Resolver<T> {
    promise: Promise<T>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Resolver<T> {
    /// Resolve with `value`. Ignored when already settled.
    pub fn resolve(&self, value: T) {
        self.promise.settle(Ok(value));
    }

    /// Reject with `err`. Ignored when already settled.
    pub fn reject(&self, err: impl Into<Error>) {
        self.promise.settle(Err(err.into()));
    }

    /// Settle with a ready result.
    pub fn settle(&self, result: Result<T, Error>) {
        self.promise.settle(result);
    }

    /// Register the hook invoked when the promise is canceled.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        if !self.promise.is_settled() {
            *self.promise.shared.on_cancel.lock() = Some(Box::new(hook));
        }
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.promise.is_settled()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    fn pending() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending(Vec::new())),
                on_cancel: Mutex::new(None),
            }),
        }
    }

    /// Already resolved promise.
    pub fn resolve(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// Already rejected promise.
    pub fn reject(err: impl Into<Error>) -> Self {
        Self::settled(Err(err.into()))
    }

    /// Already settled promise.
    pub fn settled(result: Result<T, Error>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Settled(result)),
                on_cancel: Mutex::new(None),
            }),
        }
    }

    /// Split producer: a pending promise plus the [`Resolver`] that settles it.
    #[must_use]
    pub fn defer() -> (Self, Resolver<T>) {
        let promise = Self::pending();
        let resolver = Resolver {
            promise: promise.clone(),
        };
        (promise, resolver)
    }

    /// Run `executor` on a coroutine and settle through its [`Resolver`].
    ///
    /// A panic inside the executor rejects the promise with [`Error::Panic`].
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T>) + Send + 'static,
    {
        let (promise, resolver) = Self::defer();
        let guard = resolver.clone();
        let stack_size = RuntimeConfig::global().stack_size;
        let job = move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || executor(resolver))) {
                let err = Error::from_panic(payload);
                error!(error = %err, "promise executor panicked");
                guard.reject(err);
            }
        };

        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The job is Send + 'static and owns everything it touches; panics are caught
        // inside the job and converted into a rejection.
        #[allow(unsafe_code)]
        let spawned = unsafe { coroutine::Builder::new().stack_size(stack_size).spawn(job) };
        if let Err(err) = spawned {
            error!(error = %err, stack_size, "failed to spawn promise executor");
            promise.settle(Err(Error::msg(format!("failed to spawn promise executor: {err}"))));
        }
        promise
    }

    fn settle(&self, result: Result<T, Error>) -> bool {
        let continuations = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Settled(_) => return false,
                State::Pending(waiting) => {
                    let waiting = std::mem::take(waiting);
                    *state = State::Settled(result.clone());
                    waiting
                }
            }
        };
        drop(self.shared.on_cancel.lock().take());
        for continuation in continuations {
            continuation(&result);
        }
        true
    }

    fn subscribe(&self, continuation: Continuation<T>) {
        let ready = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Settled(result) => result.clone(),
                State::Pending(waiting) => {
                    waiting.push(continuation);
                    return;
                }
            }
        };
        continuation(&ready);
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(&*self.shared.state.lock(), State::Settled(_))
    }

    /// The settled result, if any, without blocking.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<T, Error>> {
        match &*self.shared.state.lock() {
            State::Settled(result) => Some(result.clone()),
            State::Pending(_) => None,
        }
    }

    /// Block until the promise settles.
    pub fn wait(&self) -> Result<T, Error> {
        if let Some(result) = self.try_result() {
            return result;
        }
        let (tx, rx) = mpsc::channel();
        self.subscribe(Box::new(move |result: &Result<T, Error>| {
            if tx.send(result.clone()).is_err() {
                debug!("promise waiter dropped before settlement");
            }
        }));
        rx.recv().unwrap_or_else(|_| {
            Err(Error::Canceled(CanceledError {
                reason: "promise dropped before settlement".to_string(),
            }))
        })
    }

    /// Reject a pending promise with [`Error::Canceled`] and run its cancel hook.
    pub fn cancel(&self) {
        if self.is_settled() {
            return;
        }
        let hook = self.shared.on_cancel.lock().take();
        let canceled = self.settle(Err(Error::Canceled(CanceledError {
            reason: "canceled".to_string(),
        })));
        if canceled {
            if let Some(hook) = hook {
                hook();
            }
        }
    }

    /// Transform the resolved value.
    pub fn then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.then_try(move |value| Ok(f(value)))
    }

    /// Transform the resolved value with a fallible function.
    pub fn then_try<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        let (next, resolver) = Promise::defer();
        self.subscribe(Box::new(move |result: &Result<T, Error>| match result {
            Ok(value) => {
                let value = value.clone();
                let outcome = panic::catch_unwind(AssertUnwindSafe(move || f(value)))
                    .unwrap_or_else(|payload| Err(Error::from_panic(payload)));
                resolver.settle(outcome);
            }
            Err(err) => resolver.reject(err.clone()),
        }));
        next
    }

    /// Chain a continuation that itself returns a promise.
    pub fn and_then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let (next, resolver) = Promise::defer();
        self.subscribe(Box::new(move |result: &Result<T, Error>| match result {
            Ok(value) => {
                let value = value.clone();
                match panic::catch_unwind(AssertUnwindSafe(move || f(value))) {
                    Ok(inner) => {
                        inner.subscribe(Box::new(move |inner: &Result<U, Error>| {
                            resolver.settle(inner.clone());
                        }));
                    }
                    Err(payload) => resolver.reject(Error::from_panic(payload)),
                }
            }
            Err(err) => resolver.reject(err.clone()),
        }));
        next
    }

    /// Recover from a rejection.
    pub fn catch<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Result<T, Error> + Send + 'static,
    {
        let (next, resolver) = Promise::defer();
        self.subscribe(Box::new(move |result: &Result<T, Error>| match result {
            Ok(value) => resolver.resolve(value.clone()),
            Err(err) => {
                let err = err.clone();
                let outcome = panic::catch_unwind(AssertUnwindSafe(move || f(err)))
                    .unwrap_or_else(|payload| Err(Error::from_panic(payload)));
                resolver.settle(outcome);
            }
        }));
        next
    }

    /// Transform a rejection.
    pub fn map_err<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Error + Send + 'static,
    {
        self.catch(move |err| Err(f(err)))
    }

    /// Run `f` once settled, passing the result through unchanged.
    pub fn finally<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let (next, resolver) = Promise::defer();
        self.subscribe(Box::new(move |result: &Result<T, Error>| {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
                resolver.reject(Error::from_panic(payload));
            } else {
                resolver.settle(result.clone());
            }
        }));
        next
    }

    /// Resolve with every value, in order, once all promises resolve.
    ///
    /// Rejects with the first rejection observed.
    pub fn all(promises: Vec<Promise<T>>) -> Promise<Vec<T>> {
        if promises.is_empty() {
            return Promise::resolve(Vec::new());
        }
        let (all, resolver) = Promise::defer();
        let total = promises.len();
        let slots: Arc<Mutex<(Vec<Option<T>>, usize)>> =
            Arc::new(Mutex::new((vec![None; total], total)));
        for (index, promise) in promises.iter().enumerate() {
            let slots = Arc::clone(&slots);
            let resolver = resolver.clone();
            promise.subscribe(Box::new(move |result: &Result<T, Error>| match result {
                Ok(value) => {
                    let complete = {
                        let mut guard = slots.lock();
                        let (values, remaining) = &mut *guard;
                        if values[index].is_none() {
                            values[index] = Some(value.clone());
                            *remaining -= 1;
                        }
                        if *remaining == 0 {
                            Some(values.iter_mut().filter_map(Option::take).collect::<Vec<T>>())
                        } else {
                            None
                        }
                    };
                    if let Some(values) = complete {
                        resolver.resolve(values);
                    }
                }
                Err(err) => resolver.reject(err.clone()),
            }));
        }
        all
    }

    /// Settle with whichever promise settles first.
    pub fn race(promises: Vec<Promise<T>>) -> Promise<T> {
        let (first, resolver) = Promise::defer();
        for promise in &promises {
            let resolver = resolver.clone();
            promise.subscribe(Box::new(move |result: &Result<T, Error>| {
                resolver.settle(result.clone());
            }));
        }
        first
    }
}

impl Promise<()> {
    /// Resolve after `duration`, sleeping on a coroutine.
    pub fn delay(duration: Duration) -> Promise<()> {
        Promise::new(move |resolver| {
            coroutine::sleep(duration);
            resolver.resolve(());
        })
    }
}
