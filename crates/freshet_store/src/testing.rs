// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock store implementation for testing.
//!
//! This module provides `MockStore`, a [`MemoryStore`] wrapper that records all
//! operations and supports failure injection for testing error paths.

use std::sync::Arc;

use parking_lot::Mutex;
use tick::Clock;

use crate::{Entry, EntryLocator, Feed, FeedId, FeedStore, MemoryStore, Result, StoreError};

/// Recorded store operation with full context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Feeds were read by URL.
    Feeds(Vec<String>),
    /// Feeds were written; holds their URLs.
    UpdateFeeds(Vec<String>),
    /// Entries were read by guid.
    Entries(Vec<String>),
    /// Entries were read within locators.
    EntriesWithin(Vec<EntryLocator>),
    /// Entries were written; holds their guids.
    UpdateEntries(Vec<String>),
    /// Feeds were removed.
    Remove(Vec<String>),
    /// A feed identifier was resolved.
    FeedId(String),
}

impl StoreOp {
    /// Returns `true` for operations that modify the store.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::UpdateFeeds(_) | Self::UpdateEntries(_) | Self::Remove(_))
    }
}

type FailPredicate = Box<dyn Fn(&StoreOp) -> bool + Send + Sync>;

/// A configurable mock store for testing.
///
/// Clones share the same data, operation log and failure predicate, so a test can
/// hand one clone to the code under test and inspect another.
///
/// # Examples
///
/// ```
/// use freshet_store::{testing::{MockStore, StoreOp}, Feed, FeedStore};
/// use tick::Clock;
///
/// let mut store = MockStore::new(Clock::new_frozen());
/// store.update_feeds(&[Feed::new("http://abc.de/feed", "ABC")]).unwrap();
///
/// store.fail_when(|op| matches!(op, StoreOp::Feeds(_)));
/// assert!(store.feeds(&["http://abc.de/feed".to_string()]).is_err());
///
/// assert_eq!(store.operations().len(), 2);
/// ```
#[derive(Clone)]
pub struct MockStore {
    inner: Arc<Mutex<MemoryStore>>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
}

impl std::fmt::Debug for MockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore")
            .field("inner", &self.inner)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl MockStore {
    /// Creates an empty mock store stamping entities with `clock`.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStore::new(clock))),
            operations: Arc::new(Mutex::new(Vec::new())),
            fail_when: Arc::new(Mutex::new(None)),
        }
    }

    /// Seeds feeds and entries without recording operations.
    ///
    /// # Panics
    ///
    /// Panics if an entry references a feed that is neither seeded nor cached.
    #[must_use]
    pub fn seeded(self, feeds: &[Feed], entries: &[Entry]) -> Self {
        {
            let mut inner = self.inner.lock();
            inner.update_feeds(feeds).expect("seeding feeds never fails");
            inner.update_entries(entries).expect("seeded entries must reference seeded feeds");
        }
        self
    }

    /// Configures operations to fail when the predicate returns true.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Removes any failure predicate.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// Returns the number of cached feeds.
    #[must_use]
    pub fn feed_count(&self) -> usize {
        self.inner.lock().feed_count()
    }

    /// Returns the number of cached entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.inner.lock().entry_count()
    }

    fn record(&self, op: StoreOp) -> Result<()> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        let message = format!("injected failure: {op:?}");
        self.operations.lock().push(op);

        if fail {
            Err(StoreError::other(message))
        } else {
            Ok(())
        }
    }
}

impl FeedStore for MockStore {
    fn feeds(&self, urls: &[String]) -> Result<Vec<Feed>> {
        self.record(StoreOp::Feeds(urls.to_vec()))?;
        self.inner.lock().feeds(urls)
    }

    fn update_feeds(&mut self, feeds: &[Feed]) -> Result<()> {
        self.record(StoreOp::UpdateFeeds(feeds.iter().map(|f| f.url.clone()).collect()))?;
        self.inner.lock().update_feeds(feeds)
    }

    fn entries(&self, guids: &[String]) -> Result<Vec<Entry>> {
        self.record(StoreOp::Entries(guids.to_vec()))?;
        self.inner.lock().entries(guids)
    }

    fn entries_within(&self, locators: &[EntryLocator]) -> Result<Vec<Entry>> {
        self.record(StoreOp::EntriesWithin(locators.to_vec()))?;
        self.inner.lock().entries_within(locators)
    }

    fn update_entries(&mut self, entries: &[Entry]) -> Result<()> {
        self.record(StoreOp::UpdateEntries(entries.iter().map(|e| e.guid.clone()).collect()))?;
        self.inner.lock().update_entries(entries)
    }

    fn remove(&mut self, urls: &[String]) -> Result<()> {
        self.record(StoreOp::Remove(urls.to_vec()))?;
        self.inner.lock().remove(urls)
    }

    fn feed_id(&self, url: &str) -> Result<FeedId> {
        self.record(StoreOp::FeedId(url.to_string()))?;
        self.inner.lock().feed_id(url)
    }
}
