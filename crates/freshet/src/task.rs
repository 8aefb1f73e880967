// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The building blocks shared by every fetch task.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tick::Clock;
use tokio::sync::Notify;

use crate::{FetchError, TimeCache, serial::SerialStore};

/// Where a task is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Not started yet.
    Created,
    /// Working with the cache.
    Executing,
    /// Waiting for the remote service.
    AwaitingRemote,
    /// Done, successfully or not.
    Finished,
    /// Stopped by cancellation.
    Cancelled,
}

impl TaskState {
    /// Returns `true` for states a task never leaves.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

/// A cooperative cancellation signal.
///
/// Clones observe the same signal.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: Arc<CancellationInner>,
}

#[derive(Debug, Default)]
struct CancellationInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    /// Creates a signal that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels, waking everyone waiting in [`cancelled`][Self::cancelled].
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns `true` once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a concurrent cancel cannot slip between.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Returns `Err(FetchError::Cancelled)` once cancelled.
    pub(crate) fn check(&self) -> Result<(), FetchError> {
        if self.is_cancelled() { Err(FetchError::Cancelled) } else { Ok(()) }
    }
}

/// A unit of work a [`Scheduler`][crate::Scheduler] runs.
///
/// Tasks report their results through callbacks of their own; the scheduler only
/// needs to know when they are done.
pub trait Task: Send + Sync + 'static {
    /// A name for diagnostics.
    fn name(&self) -> &str;

    /// The current state.
    fn state(&self) -> TaskState;

    /// Requests cancellation.
    ///
    /// A task that has not started finishes right away. A running task stops at
    /// its next checkpoint, abandoning any outstanding remote request.
    fn cancel(&self);

    /// Runs the task to a terminal state.
    ///
    /// Starting a cancelled or finished task completes immediately without doing
    /// any work.
    fn start(self: Arc<Self>) -> BoxFuture<'static, ()>;
}

/// A slot a prerequisite task fills for its dependent.
///
/// # Examples
///
/// ```
/// use freshet::Handoff;
///
/// let handoff = Handoff::new();
/// handoff.put(vec!["http://abc.de/feed".to_string()]);
///
/// assert_eq!(handoff.take(), Some(vec!["http://abc.de/feed".to_string()]));
/// assert_eq!(handoff.take(), None);
/// ```
pub struct Handoff<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for Handoff<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Handoff<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff").field("filled", &self.slot.lock().is_some()).finish()
    }
}

impl<T> Handoff<T> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Fills the slot, replacing anything in it.
    pub fn put(&self, value: T) {
        *self.slot.lock() = Some(value);
    }

    /// Empties the slot.
    #[must_use]
    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }
}

/// Where a task gets its input from.
#[derive(Debug)]
pub(crate) enum Input<T> {
    /// Known when the task is built.
    Given(T),
    /// Produced by a prerequisite task.
    ///
    /// The scheduler runs the task only after its prerequisites, so the slot is
    /// filled by then. An empty slot means the prerequisite never finished.
    Prerequisite(Handoff<Result<T, FetchError>>),
}

impl<T> Input<T> {
    pub(crate) fn resolve(self) -> Result<T, FetchError> {
        match self {
            Self::Given(value) => Ok(value),
            Self::Prerequisite(handoff) => handoff.take().unwrap_or(Err(FetchError::Cancelled)),
        }
    }
}

/// Everything tasks share with the fetcher that built them.
pub(crate) struct Context<S, V> {
    pub(crate) store: SerialStore<S>,
    pub(crate) service: Arc<V>,
    pub(crate) clock: Clock,
    pub(crate) narrowing: TimeCache,
}

impl<S, V> Clone for Context<S, V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            service: Arc::clone(&self.service),
            clock: self.clock.clone(),
            narrowing: self.narrowing.clone(),
        }
    }
}

impl<S, V> fmt::Debug for Context<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("store", &self.store)
            .field("narrowing", &self.narrowing)
            .finish_non_exhaustive()
    }
}

/// Lifecycle bookkeeping common to all tasks.
#[derive(Debug)]
pub(crate) struct TaskCore {
    name: String,
    state: Mutex<TaskState>,
    cancellation: Cancellation,
}

impl TaskCore {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(TaskState::Created),
            cancellation: Cancellation::new(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub(crate) fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Moves from `Created` to `Executing`, unless cancelled or started before.
    pub(crate) fn begin(&self) -> bool {
        let mut state = self.state.lock();
        if *state != TaskState::Created || self.cancellation.is_cancelled() {
            return false;
        }
        *state = TaskState::Executing;
        true
    }

    /// Moves between the working states; terminal states are left alone.
    pub(crate) fn set(&self, next: TaskState) {
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = next;
        }
    }

    /// Cancels, returning `true` if the task had not started yet.
    pub(crate) fn cancel(&self) -> bool {
        self.cancellation.cancel();
        self.state() == TaskState::Created
    }

    /// Enters the terminal state matching `result`, exactly once.
    ///
    /// Returns `false` if the task was terminal already.
    pub(crate) fn terminate(&self, result: &Result<(), FetchError>) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        *state = match result {
            Err(FetchError::Cancelled) => TaskState::Cancelled,
            _ => TaskState::Finished,
        };
        true
    }
}
