// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock service implementation for testing.
//!
//! This module provides `MockService`, a [`FeedService`] serving canned feeds and
//! entries that records all calls and supports failure injection.

use std::sync::Arc;

use freshet_store::{Entry, EntryLocator, Feed};
use parking_lot::Mutex;

use crate::{CachePolicy, FeedService, ServiceError};

/// Recorded service call with full context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    /// Feeds were requested.
    Feeds {
        /// The requested locators.
        locators: Vec<EntryLocator>,
        /// The policy of the request.
        policy: CachePolicy,
    },
    /// Entries were requested.
    Entries {
        /// The requested locators.
        locators: Vec<EntryLocator>,
        /// Whether the service was asked to bypass its caches.
        reload: bool,
    },
}

type FailPredicate = Box<dyn Fn(&ServiceCall) -> bool + Send + Sync>;

#[derive(Default)]
struct State {
    feeds: Vec<Feed>,
    entries: Vec<Entry>,
    calls: Vec<ServiceCall>,
    fail_when: Option<FailPredicate>,
    unreachable: bool,
    hang: bool,
}

/// A configurable mock service for testing.
///
/// Feeds answer locators naming their `url` or their `original_url`. Entries answer
/// guid locators by guid and windows by feed and `updated > since`.
///
/// Clones share the same state, so a test can hand one clone to the code under test
/// and inspect another.
///
/// # Examples
///
/// ```
/// use freshet::{FeedService, testing::{MockService, ServiceCall}};
/// use freshet_store::{Entry, EntryLocator};
/// use std::time::SystemTime;
///
/// # futures::executor::block_on(async {
/// let service = MockService::new();
/// service.add_entries([Entry::new("http://abc.de/feed", "abc-1", "Episode 1", SystemTime::now())]);
///
/// let entries = service.entries(&[EntryLocator::new("http://abc.de/feed")], false).await?;
/// assert_eq!(entries.len(), 1);
///
/// service.fail_when(|call| matches!(call, ServiceCall::Entries { .. }));
/// assert!(service.entries(&[EntryLocator::new("http://abc.de/feed")], false).await.is_err());
/// assert_eq!(service.calls().len(), 2);
/// # Ok::<(), freshet::ServiceError>(())
/// # }).unwrap();
/// ```
#[derive(Clone, Default)]
pub struct MockService {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockService")
            .field("feeds", &state.feeds.len())
            .field("entries", &state.entries.len())
            .field("calls", &state.calls)
            .field("fail_when", &state.fail_when.is_some())
            .field("unreachable", &state.unreachable)
            .field("hang", &state.hang)
            .finish()
    }
}

impl MockService {
    /// Creates a reachable service with nothing to serve.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds feeds to serve, replacing feeds with the same url.
    pub fn add_feeds(&self, feeds: impl IntoIterator<Item = Feed>) {
        let mut state = self.state.lock();
        for feed in feeds {
            state.feeds.retain(|f| f.url != feed.url);
            state.feeds.push(feed);
        }
    }

    /// Adds entries to serve, replacing entries with the same guid.
    pub fn add_entries(&self, entries: impl IntoIterator<Item = Entry>) {
        let mut state = self.state.lock();
        for entry in entries {
            state.entries.retain(|e| e.guid != entry.guid);
            state.entries.push(entry);
        }
    }

    /// Configures calls to fail when the predicate returns true.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&ServiceCall) -> bool + Send + Sync + 'static,
    {
        self.state.lock().fail_when = Some(Box::new(predicate));
    }

    /// Removes any failure predicate.
    pub fn clear_failures(&self) {
        self.state.lock().fail_when = None;
    }

    /// Sets what [`FeedService::is_reachable`] reports.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    /// Makes calls never complete, for testing cancellation.
    pub fn hang(&self, hang: bool) {
        self.state.lock().hang = hang;
    }

    /// Returns all recorded calls.
    #[must_use]
    pub fn calls(&self) -> Vec<ServiceCall> {
        self.state.lock().calls.clone()
    }

    /// Clears recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Records `call` and decides how it ends.
    fn record(&self, call: ServiceCall) -> Outcome {
        let mut state = self.state.lock();
        let failed = state.fail_when.as_ref().is_some_and(|predicate| predicate(&call));
        state.calls.push(call);

        if state.hang {
            Outcome::Hang
        } else if failed {
            Outcome::Fail
        } else {
            Outcome::Serve
        }
    }
}

enum Outcome {
    Serve,
    Fail,
    Hang,
}

impl Outcome {
    async fn resolve<T>(self, serve: impl FnOnce() -> T) -> Result<T, ServiceError> {
        match self {
            Self::Serve => Ok(serve()),
            Self::Fail => Err(ServiceError::from_message("injected failure")),
            Self::Hang => futures::future::pending().await,
        }
    }
}

impl FeedService for MockService {
    fn is_reachable(&self) -> bool {
        !self.state.lock().unreachable
    }

    async fn feeds(&self, locators: &[EntryLocator], policy: CachePolicy) -> Result<Vec<Feed>, ServiceError> {
        let outcome = self.record(ServiceCall::Feeds {
            locators: locators.to_vec(),
            policy,
        });

        outcome
            .resolve(|| {
                let state = self.state.lock();
                state
                    .feeds
                    .iter()
                    .filter(|feed| {
                        locators
                            .iter()
                            .any(|l| l.url() == feed.url || feed.original_url.as_deref() == Some(l.url()))
                    })
                    .cloned()
                    .collect()
            })
            .await
    }

    async fn entries(&self, locators: &[EntryLocator], reload: bool) -> Result<Vec<Entry>, ServiceError> {
        let outcome = self.record(ServiceCall::Entries {
            locators: locators.to_vec(),
            reload,
        });

        outcome
            .resolve(|| {
                let state = self.state.lock();
                state
                    .entries
                    .iter()
                    .filter(|entry| locators.iter().any(|l| serves(l, entry)))
                    .cloned()
                    .collect()
            })
            .await
    }
}

fn serves(locator: &EntryLocator, entry: &Entry) -> bool {
    match locator.guid() {
        Some(guid) => guid == entry.guid,
        None => {
            let from_feed = locator.url() == entry.url || entry.original_url.as_deref() == Some(locator.url());
            from_feed && entry.updated > locator.since()
        }
    }
}
