// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Making sure feeds are cached, refreshing them remotely when needed.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use freshet_store::{EntryLocator, Feed, FeedStore};
use futures::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;

use crate::{
    CachePolicy, FeedService, FetchError, Task, TaskState,
    dispatch::{Callbacks, Dispatcher},
    staleness,
    task::{Context, Handoff, Input, TaskCore},
};

/// Locators for the entries of the feeds a feeds task delivered.
pub(crate) type FeedLocators = Handoff<Result<Vec<EntryLocator>, FetchError>>;

/// Makes sure feeds are cached, then delivers them.
///
/// Fresh cached feeds are delivered first. Missing or stale feeds are fetched,
/// written back and delivered again from the store, with redirects reconciled.
/// When the service cannot help, stale feeds are delivered as a fallback.
pub(crate) struct FeedsTask<S, V> {
    core: TaskCore,
    input: Mutex<Option<Input<Vec<String>>>>,
    policy: CachePolicy,
    reachable: bool,
    ctx: Context<S, V>,
    dispatcher: Dispatcher<Feed>,
    delivered: Mutex<Vec<EntryLocator>>,
    output: Option<FeedLocators>,
}

impl<S, V> FeedsTask<S, V>
where
    S: FeedStore,
    V: FeedService,
{
    pub(crate) fn new(
        name: impl Into<String>,
        input: Input<Vec<String>>,
        policy: CachePolicy,
        reachable: bool,
        ctx: Context<S, V>,
        callbacks: Callbacks<Feed>,
    ) -> Self {
        Self {
            core: TaskCore::new(name),
            input: Mutex::new(Some(input)),
            policy,
            reachable,
            ctx,
            dispatcher: Dispatcher::new(callbacks),
            delivered: Mutex::new(Vec::new()),
            output: None,
        }
    }

    /// Publishes locators for the delivered feeds' entries when finishing.
    #[must_use]
    pub(crate) fn with_output(mut self, output: FeedLocators) -> Self {
        self.output = Some(output);
        self
    }

    fn deliver(&self, feeds: Vec<Feed>, error: Option<FetchError>) {
        if feeds.is_empty() && error.is_none() {
            return;
        }

        self.delivered
            .lock()
            .extend(feeds.iter().map(|feed| EntryLocator::new(feed.url.clone())));
        self.dispatcher.batch(feeds, error);
    }

    async fn run(&self) -> Result<(), FetchError> {
        let input = self.input.lock().take().ok_or(FetchError::Cancelled)?;
        let mut urls = input.resolve()?;
        dedup(&mut urls);

        if urls.is_empty() {
            return Ok(());
        }

        let cancellation = self.core.cancellation();
        cancellation.check()?;

        let cached = self.ctx.store.read(|store| store.feeds(&urls))?;
        let now = self.ctx.clock.system_time();
        let subtraction = staleness::subtract(cached, &urls, self.policy.ttl, now);

        tracing::debug!(
            task = self.core.name(),
            cached = subtraction.cached.len(),
            stale = subtraction.stale.len(),
            ttl = %self.policy.ttl,
            "feeds looked up"
        );

        self.deliver(subtraction.cached, None);

        let Some(missing) = subtraction.missing else {
            return Ok(());
        };
        let stale = subtraction.stale;

        if !self.reachable {
            return if stale.is_empty() {
                Err(FetchError::Offline)
            } else {
                self.deliver(stale, None);
                Ok(())
            };
        }

        cancellation.check()?;
        self.core.set(TaskState::AwaitingRemote);

        let locators: Vec<EntryLocator> = missing.iter().map(EntryLocator::new).collect();
        let response = tokio::select! {
            () = cancellation.cancelled() => return Err(FetchError::Cancelled),
            response = self.ctx.service.feeds(&locators, self.policy) => response,
        };

        self.core.set(TaskState::Executing);

        let feeds = match response {
            Ok(feeds) => feeds,
            Err(error) => {
                let error = FetchError::from(error);
                tracing::warn!(task = self.core.name(), urls = ?missing, %error, "fetching feeds failed");
                if stale.is_empty() {
                    return Err(error);
                }
                self.deliver(stale, Some(error));
                return Ok(());
            }
        };

        let redirects: HashMap<String, String> = feeds
            .iter()
            .filter(|feed| feed.is_redirected())
            .filter_map(|feed| feed.original_url.clone().map(|original| (feed.url.clone(), original)))
            .collect();

        if !redirects.is_empty() {
            let originals: Vec<String> = redirects.values().cloned().collect();
            if let Err(error) = self.ctx.store.remove(&originals) {
                tracing::warn!(task = self.core.name(), urls = ?originals, %error, "removing redirected feeds failed");
            }
        }

        let written: Vec<String> = feeds.iter().map(|feed| feed.url.clone()).collect();
        let stored = self.ctx.store.write(|store| {
            store.update_feeds(&feeds)?;
            store.feeds(&written)
        });

        cancellation.check()?;

        match stored {
            Ok(mut stored) => {
                for feed in &mut stored {
                    if let Some(original) = redirects.get(&feed.url) {
                        feed.original_url = Some(original.clone());
                    }
                }
                self.deliver(stored, None);
            }
            Err(error) => {
                tracing::warn!(task = self.core.name(), %error, "writing feeds failed");
                self.deliver(feeds, Some(error.into()));
            }
        }

        Ok(())
    }

    fn finish(&self, result: Result<(), FetchError>) {
        if !self.core.terminate(&result) {
            return;
        }

        tracing::debug!(task = self.core.name(), ?result, "feeds task finished");

        if let Some(output) = &self.output {
            let locators = EntryLocator::reduce(&self.delivered.lock());
            output.put(result.clone().map(|()| locators));
        }

        self.dispatcher.finish(result);
    }
}

impl<S, V> Task for FeedsTask<S, V>
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

fn dedup(urls: &mut Vec<String>) {
    let mut seen = HashSet::new();
    urls.retain(|url| seen.insert(url.clone()));
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use freshet_store::testing::{MockStore, StoreOp};
    use tick::{Clock, ClockControl};
    use tokio::sync::oneshot;

    use super::*;
    use crate::{
        Batch, CacheTtl, SerialQueue, TimeCache, Ttl,
        serial::SerialStore,
        testing::{MockService, ServiceCall},
    };

    const FEED: &str = "http://abc.de/feed";
    const HOUR: Duration = Duration::from_secs(3600);

    type Batches = Arc<Mutex<Vec<Batch<Feed>>>>;

    struct Harness {
        control: ClockControl,
        store: MockStore,
        service: MockService,
    }

    impl Harness {
        fn new() -> Self {
            let control = ClockControl::new_at(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000));
            let store = MockStore::new(control.to_clock());
            Self {
                control,
                store,
                service: MockService::new(),
            }
        }

        fn clock(&self) -> Clock {
            self.control.to_clock()
        }

        fn task(&self, urls: &[&str], ttl: Ttl, reachable: bool) -> (Arc<FeedsTask<MockStore, MockService>>, Batches, oneshot::Receiver<Result<(), FetchError>>) {
            let input = Input::Given(urls.iter().map(ToString::to_string).collect());
            self.task_with_input(input, ttl, reachable, None)
        }

        fn task_with_input(
            &self,
            input: Input<Vec<String>>,
            ttl: Ttl,
            reachable: bool,
            output: Option<FeedLocators>,
        ) -> (Arc<FeedsTask<MockStore, MockService>>, Batches, oneshot::Receiver<Result<(), FetchError>>) {
            let ctx = Context {
                store: SerialStore::new(self.store.clone()),
                service: Arc::new(self.service.clone()),
                clock: self.clock(),
                narrowing: TimeCache::new(self.clock(), HOUR),
            };

            let batches: Batches = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&batches);
            let (tx, rx) = oneshot::channel();
            let callbacks = Callbacks::new(
                SerialQueue::new(),
                move |batch| sink.lock().push(batch),
                move |result| {
                    let _ = tx.send(result);
                },
            );

            let mut task = FeedsTask::new("feeds", input, CachePolicy::new(ttl), reachable, ctx, callbacks);
            if let Some(output) = output {
                task = task.with_output(output);
            }
            (Arc::new(task), batches, rx)
        }

        fn seed(&self, feeds: &[Feed]) {
            let mut store = self.store.clone();
            store.update_feeds(feeds).unwrap();
            self.store.clear_operations();
        }
    }

    fn urls_of(batch: &Batch<Feed>) -> Vec<&str> {
        batch.items.iter().map(|f| f.url.as_str()).collect()
    }

    #[tokio::test]
    async fn cancel_before_start_touches_nothing() {
        let harness = Harness::new();
        let (task, batches, rx) = harness.task(&[FEED], CacheTtl::Medium.ttl(), true);

        task.cancel();
        assert_eq!(task.state(), TaskState::Cancelled);
        Arc::clone(&task).start().await;

        assert!(matches!(rx.await.unwrap(), Err(FetchError::Cancelled)));
        assert!(batches.lock().is_empty());
        assert!(harness.store.operations().is_empty());
        assert!(harness.service.calls().is_empty());
    }

    #[tokio::test]
    async fn fresh_cache_skips_remote() {
        let harness = Harness::new();
        harness.seed(&[Feed::new(FEED, "ABC")]);
        let (task, batches, rx) = harness.task(&[FEED], CacheTtl::Medium.ttl(), true);

        task.clone().start().await;

        assert!(rx.await.unwrap().is_ok());
        assert_eq!(task.state(), TaskState::Finished);
        assert_eq!(batches.lock().len(), 1);
        assert!(harness.service.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_feeds_are_fetched_written_and_delivered() {
        let harness = Harness::new();
        harness.service.add_feeds([Feed::new(FEED, "ABC")]);
        let (task, batches, rx) = harness.task(&[FEED], CacheTtl::Medium.ttl(), true);

        task.start().await;

        assert!(rx.await.unwrap().is_ok());
        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(urls_of(&batches[0]), vec![FEED]);
        assert!(batches[0].items[0].ts.is_some(), "delivered from the store");
        assert_eq!(harness.store.feed_count(), 1);
    }

    #[tokio::test]
    async fn stale_feeds_are_refreshed() {
        let harness = Harness::new();
        harness.seed(&[Feed::new(FEED, "Old")]);
        harness.control.advance(HOUR * 2);
        harness.service.add_feeds([Feed::new(FEED, "New")]);

        let (task, batches, rx) = harness.task(&[FEED], Ttl::new(HOUR), true);
        task.start().await;

        assert!(rx.await.unwrap().is_ok());
        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].items[0].title, "New");
    }

    #[tokio::test]
    async fn unreachable_falls_back_to_stale() {
        let harness = Harness::new();
        harness.seed(&[Feed::new(FEED, "Old")]);
        harness.control.advance(HOUR * 2);

        let (task, batches, rx) = harness.task(&[FEED], Ttl::new(HOUR), false);
        task.start().await;

        assert!(rx.await.unwrap().is_ok());
        assert_eq!(batches.lock()[0].items[0].title, "Old");
        assert!(harness.service.calls().is_empty());
    }

    #[tokio::test]
    async fn unreachable_without_fallback_is_offline() {
        let harness = Harness::new();
        let (task, batches, rx) = harness.task(&[FEED], Ttl::new(HOUR), false);
        task.start().await;

        assert!(matches!(rx.await.unwrap(), Err(FetchError::Offline)));
        assert!(batches.lock().is_empty());
    }

    #[tokio::test]
    async fn service_failure_falls_back_to_stale_with_error() {
        let harness = Harness::new();
        harness.seed(&[Feed::new(FEED, "Old")]);
        harness.control.advance(HOUR * 2);
        harness.service.fail_when(|call| matches!(call, ServiceCall::Feeds { .. }));

        let (task, batches, rx) = harness.task(&[FEED], Ttl::new(HOUR), true);
        task.start().await;

        assert!(rx.await.unwrap().is_ok());
        let batches = batches.lock();
        assert_eq!(batches[0].items[0].title, "Old");
        assert!(matches!(batches[0].error, Some(FetchError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn service_failure_without_fallback_fails() {
        let harness = Harness::new();
        harness.service.fail_when(|_| true);

        let (task, _batches, rx) = harness.task(&[FEED], Ttl::new(HOUR), true);
        task.start().await;

        assert!(matches!(rx.await.unwrap(), Err(FetchError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn redirects_replace_the_original_feed() {
        let harness = Harness::new();
        harness.seed(&[Feed::new("http://abc.de/old", "ABC")]);
        harness.control.advance(HOUR * 2);

        let mut moved = Feed::new(FEED, "ABC");
        moved.original_url = Some("http://abc.de/old".to_string());
        harness.service.add_feeds([moved]);

        let (task, batches, rx) = harness.task(&["http://abc.de/old"], Ttl::new(HOUR), true);
        task.start().await;

        assert!(rx.await.unwrap().is_ok());
        let batches = batches.lock();
        let delivered = &batches[0].items[0];
        assert_eq!(delivered.url, FEED);
        assert_eq!(delivered.original_url.as_deref(), Some("http://abc.de/old"));
        assert_eq!(harness.store.feed_count(), 1);
        assert!(
            harness
                .store
                .operations()
                .contains(&StoreOp::Remove(vec!["http://abc.de/old".to_string()]))
        );
    }

    #[tokio::test]
    async fn write_failure_delivers_remote_feeds_with_error() {
        let harness = Harness::new();
        harness.service.add_feeds([Feed::new(FEED, "ABC")]);
        harness.store.fail_when(|op| matches!(op, StoreOp::UpdateFeeds(_)));

        let (task, batches, rx) = harness.task(&[FEED], Ttl::new(HOUR), true);
        task.start().await;

        assert!(rx.await.unwrap().is_ok());
        let batches = batches.lock();
        assert_eq!(urls_of(&batches[0]), vec![FEED]);
        assert!(matches!(batches[0].error, Some(FetchError::Store(_))));
    }

    #[tokio::test]
    async fn cancel_abandons_outstanding_request() {
        let harness = Harness::new();
        harness.service.hang(true);

        let (task, batches, rx) = harness.task(&[FEED], Ttl::new(HOUR), true);
        let running = tokio::spawn(Arc::clone(&task).start());

        while harness.service.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(task.state(), TaskState::AwaitingRemote);
        task.cancel();

        running.await.unwrap();
        assert!(matches!(rx.await.unwrap(), Err(FetchError::Cancelled)));
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(batches.lock().is_empty());
    }

    #[tokio::test]
    async fn urls_from_prerequisite() {
        let harness = Harness::new();
        harness.seed(&[Feed::new(FEED, "ABC")]);

        let handoff = Handoff::new();
        handoff.put(Ok(vec![FEED.to_string(), FEED.to_string()]));
        let (task, batches, rx) = harness.task_with_input(Input::Prerequisite(handoff), CacheTtl::Medium.ttl(), true, None);
        task.start().await;

        assert!(rx.await.unwrap().is_ok());
        assert_eq!(batches.lock()[0].items.len(), 1);
    }

    #[tokio::test]
    async fn failed_prerequisite_fails_the_task() {
        let harness = Harness::new();
        let handoff = Handoff::new();
        handoff.put(Err(FetchError::Offline));

        let (task, _batches, rx) = harness.task_with_input(Input::Prerequisite(handoff), CacheTtl::Medium.ttl(), true, None);
        task.start().await;

        assert!(matches!(rx.await.unwrap(), Err(FetchError::Offline)));
        assert!(harness.store.operations().is_empty());
    }

    #[tokio::test]
    async fn output_lists_delivered_feeds() {
        let harness = Harness::new();
        harness.seed(&[Feed::new(FEED, "ABC")]);
        harness.service.add_feeds([Feed::new("http://other", "Other")]);

        let output = Handoff::new();
        let input = Input::Given(vec![FEED.to_string(), "http://other".to_string()]);
        let (task, _batches, rx) = harness.task_with_input(input, CacheTtl::Medium.ttl(), true, Some(output.clone()));
        task.start().await;

        assert!(rx.await.unwrap().is_ok());
        let locators = output.take().unwrap().unwrap();
        let urls: Vec<&str> = locators.iter().map(EntryLocator::url).collect();
        assert_eq!(urls, vec![FEED, "http://other"]);
    }
}
