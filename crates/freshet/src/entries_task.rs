// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resolving entries from the cache and fetching the rest.

use std::{collections::HashSet, sync::Arc};

use freshet_store::{Entry, EntryLocator, FeedStore};
use futures::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;

use crate::{
    CachePolicy, FeedService, FetchError, Task, TaskState, Ttl,
    dispatch::{Callbacks, Dispatcher},
    fulfill,
    task::{Context, Input, TaskCore},
};

/// Resolves entry locators, from the cache first and remotely second.
///
/// Runs after the feeds task for the same urls, so entries always find their
/// feed cached. No guid is delivered twice by the same task.
pub(crate) struct EntriesTask<S, V> {
    core: TaskCore,
    input: Mutex<Option<Input<Vec<EntryLocator>>>>,
    policy: CachePolicy,
    reachable: bool,
    ctx: Context<S, V>,
    dispatcher: Dispatcher<Entry>,
    dispatched: Mutex<HashSet<String>>,
}

impl<S, V> EntriesTask<S, V>
where
    S: FeedStore,
    V: FeedService,
{
    pub(crate) fn new(
        name: impl Into<String>,
        input: Input<Vec<EntryLocator>>,
        policy: CachePolicy,
        reachable: bool,
        ctx: Context<S, V>,
        callbacks: Callbacks<Entry>,
    ) -> Self {
        Self {
            core: TaskCore::new(name),
            input: Mutex::new(Some(input)),
            policy,
            reachable,
            ctx,
            dispatcher: Dispatcher::new(callbacks),
            dispatched: Mutex::new(HashSet::new()),
        }
    }

    /// Drops entries delivered before, marking the rest as delivered.
    fn unseen(&self, entries: Vec<Entry>) -> Vec<Entry> {
        let mut dispatched = self.dispatched.lock();
        entries.into_iter().filter(|e| dispatched.insert(e.guid.clone())).collect()
    }

    fn deliver(&self, entries: Vec<Entry>) {
        let entries = self.unseen(entries);
        if !entries.is_empty() {
            self.dispatcher.batch(entries, None);
        }
    }

    async fn run(&self) -> Result<(), FetchError> {
        let input = self.input.lock().take().ok_or(FetchError::Cancelled)?;
        let locators = input.resolve()?;

        if locators.is_empty() {
            return Ok(());
        }

        let cancellation = self.core.cancellation();
        cancellation.check()?;

        let now = self.ctx.clock.system_time();
        let cached = self
            .ctx
            .store
            .read(|store| fulfill(store, &locators, self.policy.ttl, now, Some(&self.ctx.narrowing)))?;

        tracing::debug!(
            task = self.core.name(),
            cached = cached.entries.len(),
            missing = cached.missing.len(),
            ttl = %self.policy.ttl,
            "entries looked up"
        );

        self.deliver(cached.entries);

        if cached.missing.is_empty() {
            return Ok(());
        }

        if !self.reachable {
            return Err(FetchError::Offline);
        }

        cancellation.check()?;
        self.core.set(TaskState::AwaitingRemote);

        let reload = self.policy.ttl.is_zero();
        let response = tokio::select! {
            () = cancellation.cancelled() => return Err(FetchError::Cancelled),
            response = self.ctx.service.entries(&cached.missing, reload) => response,
        };

        self.core.set(TaskState::Executing);

        let remote = response.map_err(|error| {
            let error = FetchError::from(error);
            tracing::warn!(task = self.core.name(), count = cached.missing.len(), %error, "fetching entries failed");
            error
        })?;

        self.strip_redirects(&remote);

        let written = self.ctx.store.write(|store| store.update_entries(&remote)).err();
        if let Some(error) = &written {
            tracing::warn!(task = self.core.name(), %error, "writing entries failed");
        }

        // The stored representation is richer than the payload, so deliver what the
        // store has now.
        let (entries, error) = match self.ctx.store.read(|store| fulfill(store, &locators, Ttl::INFINITE, now, None)) {
            Ok(stored) => {
                let error = match written {
                    Some(error) => Some(FetchError::from(error)),
                    None if stored.missing.is_empty() => None,
                    None => Some(FetchError::MissingEntries(stored.missing)),
                };
                (stored.entries, error)
            }
            Err(error) => {
                tracing::warn!(task = self.core.name(), %error, "reading written entries failed");
                (remote, Some(FetchError::from(error)))
            }
        };

        cancellation.check()?;

        let Some(error) = error else {
            self.deliver(entries);
            return Ok(());
        };

        let delivered_before = !self.dispatched.lock().is_empty();
        let entries = self.unseen(entries);
        if entries.is_empty() && !delivered_before {
            return Err(error);
        }

        self.dispatcher.batch(entries, Some(error));
        Ok(())
    }

    /// Removes the feeds entries were redirected away from.
    fn strip_redirects(&self, remote: &[Entry]) {
        let mut originals: Vec<String> = Vec::new();
        for original in remote.iter().filter(|e| e.is_redirected()).filter_map(|e| e.original_url.as_ref()) {
            if !originals.contains(original) {
                originals.push(original.clone());
            }
        }

        if originals.is_empty() {
            return;
        }

        tracing::debug!(task = self.core.name(), urls = ?originals, "removing redirected feeds");
        if let Err(error) = self.ctx.store.remove(&originals) {
            tracing::warn!(task = self.core.name(), urls = ?originals, %error, "removing redirected feeds failed");
        }
    }

    fn finish(&self, result: Result<(), FetchError>) {
        if !self.core.terminate(&result) {
            return;
        }

        tracing::debug!(task = self.core.name(), ?result, "entries task finished");
        self.dispatcher.finish(result);
    }
}

impl<S, V> Task for EntriesTask<S, V>
where
    S: FeedStore,
    V: FeedService,
{
    fn name(&self) -> &str {
        self.core.name()
    }

    fn state(&self) -> TaskState {
        self.core.state()
    }

    fn cancel(&self) {
        if self.core.cancel() {
            self.finish(Err(FetchError::Cancelled));
        }
    }

    fn start(self: Arc<Self>) -> BoxFuture<'static, ()> {
        async move {
            if !self.core.begin() {
                self.finish(Err(FetchError::Cancelled));
                return;
            }

            let result = self.run().await;
            self.finish(result);
        }
        .boxed()
    }
}
