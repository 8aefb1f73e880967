// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Running tasks in dependency order on a bounded pool.

use std::{fmt, sync::Arc};

use futures::{
    FutureExt,
    channel::oneshot,
    future::{BoxFuture, Shared, join_all},
};
use tokio::{runtime::Handle, sync::Semaphore};

use crate::Task;

/// Identifies a task within a [`TaskGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

struct Node {
    task: Arc<dyn Task>,
    after: Vec<usize>,
}

/// The tasks of one request and what each waits for.
///
/// Prerequisites must be added before their dependents, so a graph cannot have
/// cycles.
#[derive(Default)]
pub struct TaskGraph {
    nodes: Vec<Node>,
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(|node| (node.task.name(), &node.after)))
            .finish()
    }
}

impl TaskGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `task`, to run once every task in `after` is terminal.
    ///
    /// Identifiers of tasks not added yet are ignored.
    pub fn add(&mut self, task: Arc<dyn Task>, after: &[TaskId]) -> TaskId {
        let id = self.nodes.len();
        let mut prerequisites = Vec::with_capacity(after.len());

        for &TaskId(prerequisite) in after {
            if prerequisite >= id {
                tracing::warn!(task = task.name(), prerequisite, "ignoring unknown prerequisite");
                continue;
            }
            if !prerequisites.contains(&prerequisite) {
                prerequisites.push(prerequisite);
            }
        }

        self.nodes.push(Node {
            task,
            after: prerequisites,
        });
        TaskId(id)
    }

    /// The tasks in the order they were added.
    #[must_use]
    pub fn tasks(&self) -> Vec<Arc<dyn Task>> {
        self.nodes.iter().map(|node| Arc::clone(&node.task)).collect()
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Runs task graphs with a bound on how many tasks run at once.
///
/// The bound spans every graph run by the same scheduler. Clones share it.
#[derive(Clone, Debug)]
pub struct Scheduler {
    permits: Arc<Semaphore>,
    handle: Handle,
}

impl Scheduler {
    /// Creates a scheduler running at most `max_concurrency` tasks at once on
    /// the runtime behind `handle`. A bound of zero is treated as one.
    #[must_use]
    pub fn new(max_concurrency: usize, handle: Handle) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            handle,
        }
    }

    /// Spawns every task of `graph`, returning a future that completes once all
    /// of them have.
    ///
    /// A task starts after all its prerequisites are terminal, including
    /// prerequisites that failed, were cancelled or panicked.
    pub fn run(&self, graph: TaskGraph) -> BoxFuture<'static, ()> {
        let mut signals: Vec<Shared<oneshot::Receiver<()>>> = Vec::with_capacity(graph.len());
        let mut running = Vec::with_capacity(graph.len());

        for node in graph.nodes {
            let (done, signal) = oneshot::channel::<()>();
            let prerequisites: Vec<_> = node.after.iter().map(|&i| signals[i].clone()).collect();
            signals.push(signal.shared());

            let permits = Arc::clone(&self.permits);
            let task = node.task;

            running.push(self.handle.spawn(async move {
                // A dropped sender means the prerequisite is gone, which is terminal too.
                join_all(prerequisites).await;

                let _permit = permits.acquire_owned().await.ok();
                tracing::debug!(task = task.name(), "starting task");
                task.start().await;

                let _ = done.send(());
            }));
        }

        async move {
            for result in join_all(running).await {
                if let Err(error) = result {
                    tracing::warn!(%error, "task did not run to completion");
                }
            }
        }
        .boxed()
    }
}
