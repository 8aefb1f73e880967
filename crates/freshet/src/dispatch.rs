// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Delivering results to callers on a target of their choosing.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::mpsc};

use crate::FetchError;

/// A unit of work handed to a [`Target`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Somewhere callbacks run.
///
/// Tasks never invoke caller callbacks inline; they hand them to the target the
/// caller chose. Targets must run jobs in the order they were dispatched.
pub trait Target: Send + Sync + 'static {
    /// Schedules `job` to run after every job dispatched before it.
    fn dispatch(&self, job: Job);
}

impl<T: Target + ?Sized> Target for Arc<T> {
    fn dispatch(&self, job: Job) {
        (**self).dispatch(job);
    }
}

/// A [`Target`] running jobs one at a time, in order, on a Tokio runtime.
///
/// Clones feed the same queue. The queue drains until every clone is dropped.
/// A panicking job is logged and does not stop the queue.
///
/// # Examples
///
/// ```
/// use freshet::{SerialQueue, Target};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queue = SerialQueue::new();
/// let (tx, rx) = tokio::sync::oneshot::channel();
///
/// queue.dispatch(Box::new(move || {
///     let _ = tx.send("ran");
/// }));
///
/// assert_eq!(rx.await.unwrap(), "ran");
/// # }
/// ```
#[derive(Clone)]
pub struct SerialQueue {
    jobs: mpsc::UnboundedSender<Job>,
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue").field("closed", &self.jobs.is_closed()).finish()
    }
}

impl SerialQueue {
    /// Creates a queue drained on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn new() -> Self {
        Self::with_handle(&Handle::current())
    }

    /// Creates a queue drained on the runtime behind `handle`.
    #[must_use]
    pub fn with_handle(handle: &Handle) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();

        handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::warn!("dispatched job panicked");
                }
            }
        });

        Self { jobs }
    }
}

impl Default for SerialQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Target for SerialQueue {
    fn dispatch(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            tracing::warn!("serial queue is gone, dropping job");
        }
    }
}

/// One delivery of results.
#[derive(Clone, Debug)]
pub struct Batch<T> {
    /// The delivered items.
    pub items: Vec<T>,
    /// A non-fatal error that accompanies the items.
    pub error: Option<FetchError>,
}

type BatchFn<T> = Box<dyn FnMut(Batch<T>) + Send>;
type DoneFn = Box<dyn FnOnce(Result<(), FetchError>) + Send>;

/// The callbacks of one request and the target they run on.
///
/// The batch callback is invoked zero or more times, typically once with cached
/// data and once with fresh data. The completion callback is invoked exactly once,
/// after every batch, also when the request is cancelled or fails.
pub struct Callbacks<T> {
    target: Arc<dyn Target>,
    batch: BatchFn<T>,
    done: DoneFn,
}

impl<T> fmt::Debug for Callbacks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Callbacks<T> {
    /// Creates callbacks running on `target`.
    pub fn new<B, D>(target: impl Target, batch: B, done: D) -> Self
    where
        B: FnMut(Batch<T>) + Send + 'static,
        D: FnOnce(Result<(), FetchError>) + Send + 'static,
    {
        Self {
            target: Arc::new(target),
            batch: Box::new(batch),
            done: Box::new(done),
        }
    }

    /// Creates callbacks that ignore everything, running on `target`.
    pub fn silent(target: impl Target) -> Self {
        Self::new(target, |_| {}, |_| {})
    }

    /// The target these callbacks run on.
    #[must_use]
    pub fn target(&self) -> Arc<dyn Target> {
        Arc::clone(&self.target)
    }
}

/// Hands results of one task to its callbacks, releasing them once finished.
pub(crate) struct Dispatcher<T> {
    target: Arc<dyn Target>,
    batch: Arc<Mutex<Option<BatchFn<T>>>>,
    done: Mutex<Option<DoneFn>>,
}

impl<T> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("finished", &self.done.lock().is_none())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Dispatcher<T> {
    pub(crate) fn new(callbacks: Callbacks<T>) -> Self {
        Self {
            target: callbacks.target,
            batch: Arc::new(Mutex::new(Some(callbacks.batch))),
            done: Mutex::new(Some(callbacks.done)),
        }
    }

    pub(crate) fn batch(&self, items: Vec<T>, error: Option<FetchError>) {
        let batch = Arc::clone(&self.batch);
        self.target.dispatch(Box::new(move || {
            if let Some(callback) = batch.lock().as_mut() {
                callback(Batch { items, error });
            }
        }));
    }

    /// Queues the completion callback and releases both callbacks after it ran.
    ///
    /// Returns `false` if the dispatcher had finished already.
    pub(crate) fn finish(&self, result: Result<(), FetchError>) -> bool {
        let Some(done) = self.done.lock().take() else {
            return false;
        };

        let batch = Arc::clone(&self.batch);
        self.target.dispatch(Box::new(move || {
            drop(batch.lock().take());
            done(result);
        }));
        true
    }
}
