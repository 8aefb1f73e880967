// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The public entry points: building a fetcher and submitting requests.

use std::{fmt, sync::Arc, time::Duration};

use freshet_store::{Entry, EntryLocator, Feed, FeedId, FeedStore};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tick::Clock;
use tokio::runtime::Handle;

use crate::{
    CacheTtl, FeedService, FetchError, Scheduler, Task, TaskGraph, TimeCache,
    dispatch::Callbacks,
    entries_task::EntriesTask,
    feeds_task::FeedsTask,
    policy::recommend,
    serial::SerialStore,
    task::{Context, Handoff, Input},
};

const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_FORCE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_NARROWING_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Fetches feeds and entries, from the cache first and the service second.
///
/// Every request runs as a small graph of tasks on a shared, bounded pool. The
/// feeds a request touches are always made available in the store before their
/// entries are written, since entries reference their feed.
///
/// Clones share the store, the service and the throttles.
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "test-util")]
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use freshet::{CacheTtl, Callbacks, Fetcher, SerialQueue, testing::MockService};
/// use freshet_store::{Feed, MemoryStore};
/// use tick::Clock;
///
/// let clock = Clock::new_frozen();
/// let service = MockService::new();
/// service.add_feeds([Feed::new("http://abc.de/feed", "ABC")]);
///
/// let fetcher = Fetcher::builder(clock.clone(), MemoryStore::new(clock), service).build();
///
/// let callbacks = Callbacks::new(
///     SerialQueue::new(),
///     |batch| println!("{} feeds", batch.items.len()),
///     |result| println!("done: {result:?}"),
/// );
/// fetcher
///     .fetch_feeds(["http://abc.de/feed"], CacheTtl::Medium, callbacks)
///     .finished()
///     .await;
/// # }
/// # #[cfg(not(feature = "test-util"))]
/// # fn main() {}
/// ```
pub struct Fetcher<S, V> {
    inner: Arc<Inner<S, V>>,
}

struct Inner<S, V> {
    ctx: Context<S, V>,
    scheduler: Scheduler,
    force: TimeCache,
    default_ttl: CacheTtl,
}

impl<S, V> Clone for Fetcher<S, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, V> fmt::Debug for Fetcher<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("store", &self.inner.ctx.store)
            .field("scheduler", &self.inner.scheduler)
            .field("force", &self.inner.force)
            .field("default_ttl", &self.inner.default_ttl)
            .finish_non_exhaustive()
    }
}

impl<S, V> Fetcher<S, V>
where
    S: FeedStore,
    V: FeedService,
{
    /// Creates a builder for a fetcher over `store` and `service`.
    pub fn builder(clock: Clock, store: S, service: V) -> FetcherBuilder<S, V> {
        FetcherBuilder::new(clock, store, service)
    }

    /// Fetches feeds, delivering cached ones first.
    ///
    /// `CacheTtl::None` forces a refresh, which is permitted for a single url
    /// once per force window. Other forced requests use the default tier.
    pub fn fetch_feeds<I, U>(&self, urls: I, ttl: CacheTtl, callbacks: Callbacks<Feed>) -> FetchHandle
    where
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        let urls = distinct(urls.into_iter().map(Into::into));
        let reachable = self.inner.ctx.service.is_reachable();
        let policy = recommend(ttl, reachable, &urls, &self.inner.force, self.inner.default_ttl);

        tracing::debug!(count = urls.len(), reachable, ttl = %policy.ttl, "fetching feeds");

        let mut graph = TaskGraph::new();
        graph.add(
            Arc::new(FeedsTask::new("feeds", Input::Given(urls), policy, reachable, self.inner.ctx.clone(), callbacks)),
            &[],
        );
        self.run(graph)
    }

    /// Fetches the entries the locators name.
    ///
    /// Their feeds are cached first if missing, without being delivered. With
    /// `force` the entries are refreshed remotely, subject to the force throttle.
    pub fn fetch_entries(&self, locators: &[EntryLocator], force: bool, callbacks: Callbacks<Entry>) -> FetchHandle {
        let urls = distinct(locators.iter().map(|l| l.url().to_owned()));
        let reachable = self.inner.ctx.service.is_reachable();

        let feeds_policy = recommend(CacheTtl::Forever, reachable, &urls, &self.inner.force, self.inner.default_ttl);
        let tier = if force { CacheTtl::None } else { self.inner.default_ttl };
        let policy = recommend(tier, reachable, &force_keys(locators), &self.inner.force, self.inner.default_ttl);

        tracing::debug!(count = locators.len(), feeds = urls.len(), reachable, force, ttl = %policy.ttl, "fetching entries");

        let feeds = FeedsTask::new(
            "feeds",
            Input::Given(urls),
            feeds_policy,
            reachable,
            self.inner.ctx.clone(),
            Callbacks::silent(callbacks.target()),
        );
        let entries = EntriesTask::new(
            "entries",
            Input::Given(locators.to_vec()),
            policy,
            reachable,
            self.inner.ctx.clone(),
            callbacks,
        );

        let mut graph = TaskGraph::new();
        let feeds = graph.add(Arc::new(feeds), &[]);
        graph.add(Arc::new(entries), &[feeds]);
        self.run(graph)
    }

    /// Fetches feeds and then all their entries.
    ///
    /// Only entries are delivered. Redirected feeds are followed, so entries come
    /// from wherever the feeds live now.
    pub fn fetch_feed_entries<I, U>(&self, urls: I, ttl: CacheTtl, callbacks: Callbacks<Entry>) -> FetchHandle
    where
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        let urls = distinct(urls.into_iter().map(Into::into));
        let reachable = self.inner.ctx.service.is_reachable();
        let policy = recommend(ttl, reachable, &urls, &self.inner.force, self.inner.default_ttl);

        tracing::debug!(count = urls.len(), reachable, ttl = %policy.ttl, "fetching feed entries");

        let locators = Handoff::new();
        let feeds = FeedsTask::new(
            "feeds",
            Input::Given(urls),
            policy,
            reachable,
            self.inner.ctx.clone(),
            Callbacks::silent(callbacks.target()),
        )
        .with_output(locators.clone());
        let entries = EntriesTask::new(
            "entries",
            Input::Prerequisite(locators),
            policy,
            reachable,
            self.inner.ctx.clone(),
            callbacks,
        );

        let mut graph = TaskGraph::new();
        let feeds = graph.add(Arc::new(feeds), &[]);
        graph.add(Arc::new(entries), &[feeds]);
        self.run(graph)
    }

    /// Resolves the store's identifier of a cached feed.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::FeedNotCached`] if the feed is not cached, or
    /// [`FetchError::Store`] if the store fails.
    pub fn feed_id(&self, url: &str) -> Result<FeedId, FetchError> {
        self.inner.ctx.store.feed_id(url).map_err(FetchError::from)
    }

    fn run(&self, graph: TaskGraph) -> FetchHandle {
        let tasks = graph.tasks();
        let done = self.inner.scheduler.run(graph).shared();
        FetchHandle { tasks, done }
    }
}

fn distinct(urls: impl Iterator<Item = String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for url in urls {
        if !unique.contains(&url) {
            unique.push(url);
        }
    }
    unique
}

/// One throttle key per distinct locator, so several locators of one feed count
/// as several items.
fn force_keys(locators: &[EntryLocator]) -> Vec<String> {
    let mut unique: Vec<&EntryLocator> = Vec::new();
    for locator in locators {
        if !unique.contains(&locator) {
            unique.push(locator);
        }
    }
    unique.into_iter().map(|l| l.url().to_owned()).collect()
}

/// Builder for a [`Fetcher`].
///
/// Created by [`Fetcher::builder`].
pub struct FetcherBuilder<S, V> {
    clock: Clock,
    store: S,
    service: V,
    max_concurrency: usize,
    force_window: Duration,
    narrowing_window: Duration,
    default_ttl: CacheTtl,
    runtime: Option<Handle>,
}

impl<S, V> fmt::Debug for FetcherBuilder<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherBuilder")
            .field("max_concurrency", &self.max_concurrency)
            .field("force_window", &self.force_window)
            .field("narrowing_window", &self.narrowing_window)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl<S, V> FetcherBuilder<S, V>
where
    S: FeedStore,
    V: FeedService,
{
    fn new(clock: Clock, store: S, service: V) -> Self {
        Self {
            clock,
            store,
            service,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            force_window: DEFAULT_FORCE_WINDOW,
            narrowing_window: DEFAULT_NARROWING_WINDOW,
            default_ttl: CacheTtl::default(),
            runtime: None,
        }
    }

    /// Sets how many tasks may run at once. Defaults to 4.
    #[must_use]
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets how often a forced refresh of the same url is permitted. Defaults to
    /// one day.
    #[must_use]
    pub fn force_window(mut self, window: Duration) -> Self {
        self.force_window = window;
        self
    }

    /// Sets how often a feed's stale entry window may be narrowed. Defaults to
    /// one hour.
    #[must_use]
    pub fn narrowing_window(mut self, window: Duration) -> Self {
        self.narrowing_window = window;
        self
    }

    /// Sets the tier used when a forced refresh is not permitted. Defaults to
    /// [`CacheTtl::Medium`].
    #[must_use]
    pub fn default_ttl(mut self, ttl: CacheTtl) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the runtime tasks are spawned on.
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Builds the fetcher.
    ///
    /// # Panics
    ///
    /// Panics if no runtime was set and this is called outside of a Tokio
    /// runtime context.
    #[must_use]
    pub fn build(self) -> Fetcher<S, V> {
        let handle = self.runtime.unwrap_or_else(Handle::current);

        let ctx = Context {
            store: SerialStore::new(self.store),
            service: Arc::new(self.service),
            narrowing: TimeCache::new(self.clock.clone(), self.narrowing_window),
            clock: self.clock.clone(),
        };

        Fetcher {
            inner: Arc::new(Inner {
                ctx,
                scheduler: Scheduler::new(self.max_concurrency, handle),
                force: TimeCache::new(self.clock, self.force_window),
                default_ttl: self.default_ttl,
            }),
        }
    }
}

/// A running request.
///
/// Dropping the handle does not cancel the request.
#[derive(Clone)]
pub struct FetchHandle {
    tasks: Vec<Arc<dyn Task>>,
    done: Shared<BoxFuture<'static, ()>>,
}

impl fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchHandle")
            .field("tasks", &self.tasks.iter().map(|t| (t.name(), t.state())).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FetchHandle {
    /// Cancels every task of the request.
    ///
    /// Each task still reports completion, with [`FetchError::Cancelled`] unless
    /// it was done already.
    pub fn cancel(&self) {
        for task in &self.tasks {
            task.cancel();
        }
    }

    /// Returns `true` once every task of the request is terminal.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.state().is_terminal())
    }

    /// Completes once every task of the request has run.
    ///
    /// Callbacks may still be queued on their target at that point.
    pub fn finished(&self) -> impl Future<Output = ()> + Send + 'static {
        self.done.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use freshet_store::{
        FeedStore,
        testing::{MockStore, StoreOp},
    };
    use parking_lot::Mutex;
    use tick::ClockControl;
    use tokio::sync::oneshot;

    use super::*;
    use crate::{
        Batch, SerialQueue, TaskState, Ttl,
        testing::{MockService, ServiceCall},
    };

    const FEED: &str = "http://abc.de/feed";
    const HOUR: Duration = Duration::from_secs(3600);

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    type Recorded<T> = (Callbacks<T>, Arc<Mutex<Vec<Batch<T>>>>, oneshot::Receiver<Result<(), FetchError>>);

    fn recorder<T: Send + 'static>() -> Recorded<T> {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let (tx, rx) = oneshot::channel();
        let callbacks = Callbacks::new(
            SerialQueue::new(),
            move |batch| sink.lock().push(batch),
            move |result| {
                let _ = tx.send(result);
            },
        );
        (callbacks, batches, rx)
    }

    struct Harness {
        control: ClockControl,
        store: MockStore,
        service: MockService,
        fetcher: Fetcher<MockStore, MockService>,
    }

    impl Harness {
        fn new() -> Self {
            let control = ClockControl::new_at(at(1_000_000));
            let store = MockStore::new(control.to_clock());
            let service = MockService::new();
            let fetcher = Fetcher::builder(control.to_clock(), store.clone(), service.clone()).build();
            Self {
                control,
                store,
                service,
                fetcher,
            }
        }
    }

    #[tokio::test]
    async fn cancel_before_start_finishes_once_without_io() {
        let harness = Harness::new();
        let (callbacks, batches, rx) = recorder();

        let handle = harness.fetcher.fetch_feeds([FEED], CacheTtl::Medium, callbacks);
        handle.cancel();
        assert!(handle.is_finished());
        handle.finished().await;

        assert!(matches!(rx.await.unwrap(), Err(FetchError::Cancelled)));
        assert!(batches.lock().is_empty());
        assert!(harness.store.operations().is_empty());
        assert!(harness.service.calls().is_empty());
    }

    #[tokio::test]
    async fn feeds_are_fetched_and_cached() {
        let harness = Harness::new();
        harness.service.add_feeds([Feed::new(FEED, "ABC")]);

        let (callbacks, batches, rx) = recorder();
        harness.fetcher.fetch_feeds([FEED, FEED], CacheTtl::Medium, callbacks).finished().await;

        assert!(rx.await.unwrap().is_ok());
        assert_eq!(batches.lock()[0].items.len(), 1);
        assert_eq!(harness.store.feed_count(), 1);

        let (callbacks, _, rx) = recorder::<Feed>();
        harness.fetcher.fetch_feeds([FEED], CacheTtl::Medium, callbacks).finished().await;
        assert!(rx.await.unwrap().is_ok());
        assert_eq!(harness.service.calls().len(), 1, "second request is answered by the cache");
    }

    #[tokio::test]
    async fn forced_refresh_is_throttled_per_url() {
        let harness = Harness::new();
        harness.service.add_feeds([Feed::new(FEED, "ABC")]);

        for _ in 0..2 {
            let (callbacks, _, rx) = recorder::<Feed>();
            harness.fetcher.fetch_feeds([FEED], CacheTtl::None, callbacks).finished().await;
            assert!(rx.await.unwrap().is_ok());
        }

        let policies: Vec<Ttl> = harness
            .service
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                ServiceCall::Feeds { policy, .. } => Some(policy.ttl),
                ServiceCall::Entries { .. } => None,
            })
            .collect();
        assert_eq!(policies, vec![Ttl::ZERO], "the second force is demoted and served from cache");

        harness.control.advance(DEFAULT_FORCE_WINDOW + HOUR);
        let (callbacks, _, rx) = recorder::<Feed>();
        harness.fetcher.fetch_feeds([FEED], CacheTtl::None, callbacks).finished().await;
        assert!(rx.await.unwrap().is_ok());
        assert_eq!(harness.service.calls().len(), 2);
    }

    #[tokio::test]
    async fn forcing_several_locators_of_one_feed_is_refused() {
        let harness = Harness::new();
        harness.service.add_feeds([Feed::new(FEED, "ABC")]);
        harness.service.add_entries([Entry::new(FEED, "a", "A", at(10)), Entry::new(FEED, "b", "B", at(20))]);

        let locators = [EntryLocator::new(FEED).with_guid("a"), EntryLocator::new(FEED).with_guid("b")];
        let (callbacks, _, rx) = recorder::<Entry>();
        harness.fetcher.fetch_entries(&locators, true, callbacks).finished().await;
        assert!(rx.await.unwrap().is_ok());

        let (callbacks, _, rx) = recorder::<Entry>();
        harness.fetcher.fetch_entries(&locators[..1], true, callbacks).finished().await;
        assert!(rx.await.unwrap().is_ok());

        let reloads: Vec<bool> = harness
            .service
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                ServiceCall::Entries { reload, .. } => Some(reload),
                ServiceCall::Feeds { .. } => None,
            })
            .collect();
        assert_eq!(reloads, vec![false, true], "only the single-locator force reaches the service");
    }

    #[tokio::test]
    async fn entries_wait_for_their_feeds() {
        let harness = Harness::new();
        harness.service.add_feeds([Feed::new(FEED, "ABC")]);
        harness.service.add_entries([Entry::new(FEED, "a", "A", at(10))]);

        let (callbacks, batches, rx) = recorder();
        let locators = [EntryLocator::new(FEED).with_guid("a")];
        harness.fetcher.fetch_entries(&locators, false, callbacks).finished().await;

        assert!(rx.await.unwrap().is_ok());
        assert_eq!(batches.lock()[0].items[0].guid, "a");

        let writes: Vec<StoreOp> = harness.store.operations().into_iter().filter(StoreOp::is_write).collect();
        assert_eq!(
            writes,
            vec![StoreOp::UpdateFeeds(vec![FEED.to_string()]), StoreOp::UpdateEntries(vec!["a".to_string()])]
        );
    }

    #[tokio::test]
    async fn unreachable_entries_are_offline() {
        let harness = Harness::new();
        harness.service.set_reachable(false);

        let (callbacks, batches, rx) = recorder::<Entry>();
        harness
            .fetcher
            .fetch_entries(&[EntryLocator::new(FEED)], false, callbacks)
            .finished()
            .await;

        assert!(matches!(rx.await.unwrap(), Err(FetchError::Offline)));
        assert!(batches.lock().is_empty());
        assert!(harness.service.calls().is_empty());
    }

    #[tokio::test]
    async fn feed_entries_follow_redirects() {
        let harness = Harness::new();
        let mut moved = Feed::new("http://abc.de/new", "ABC");
        moved.original_url = Some(FEED.to_string());
        harness.service.add_feeds([moved]);
        harness.service.add_entries([Entry::new("http://abc.de/new", "a", "A", at(10))]);

        let (callbacks, batches, rx) = recorder();
        harness.fetcher.fetch_feed_entries([FEED], CacheTtl::Medium, callbacks).finished().await;

        assert!(rx.await.unwrap().is_ok());
        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].items[0].url, "http://abc.de/new");

        let calls = harness.service.calls();
        let Some(ServiceCall::Entries { locators, .. }) = calls.last() else {
            panic!("expected an entries call last, got {calls:?}");
        };
        assert_eq!(locators[0].url(), "http://abc.de/new");
    }

    #[tokio::test]
    async fn cancel_reaches_every_task() {
        let harness = Harness::new();
        harness.service.hang(true);

        let (callbacks, _, rx) = recorder::<Entry>();
        let handle = harness.fetcher.fetch_feed_entries([FEED], CacheTtl::Medium, callbacks);

        while harness.service.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        handle.cancel();
        handle.finished().await;

        assert!(matches!(rx.await.unwrap(), Err(FetchError::Cancelled)));
        assert!(handle.tasks.iter().all(|t| t.state() == TaskState::Cancelled));
    }

    #[tokio::test]
    async fn feed_ids_are_resolved_once() {
        let harness = Harness::new();
        let mut store = harness.store.clone();
        store.update_feeds(&[Feed::new(FEED, "ABC")]).unwrap();
        harness.store.clear_operations();

        let first = harness.fetcher.feed_id(FEED).unwrap();
        assert_eq!(harness.fetcher.feed_id(FEED).unwrap(), first);
        assert_eq!(harness.store.operations().len(), 1);

        assert!(matches!(harness.fetcher.feed_id("http://unknown"), Err(FetchError::FeedNotCached(_))));
    }
}
