// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The cache contract between fetch orchestration and persistence.

use crate::{Entry, EntryLocator, Feed, FeedId, Result};

/// A persistent store of feeds and their entries.
///
/// Stores are consumed through a single serializing wrapper, so implementations
/// do not need interior synchronization: reads take `&self`, writes take `&mut self`.
/// Every entity a store returns has its `ts` set to the time it was last written.
///
/// Entries are stored with a reference to their feed. A feed must therefore be
/// written before any of its entries can be.
///
/// # Examples
///
/// ```
/// use freshet_store::{Feed, FeedStore, MemoryStore, StoreError};
/// use tick::Clock;
///
/// let mut store = MemoryStore::new(Clock::new_frozen());
/// store.update_feeds(&[Feed::new("http://abc.de/feed", "ABC")])?;
///
/// let id = store.feed_id("http://abc.de/feed")?;
/// assert_eq!(store.feeds(&["http://abc.de/feed".to_string()])?[0].id, Some(id));
///
/// store.remove(&["http://abc.de/feed".to_string()])?;
/// assert!(matches!(store.feed_id("http://abc.de/feed"), Err(StoreError::FeedNotCached { .. })));
/// # Ok::<(), StoreError>(())
/// ```
pub trait FeedStore: Send + 'static {
    /// Returns the cached feeds among `urls`. Unknown URLs are skipped.
    fn feeds(&self, urls: &[String]) -> Result<Vec<Feed>>;

    /// Inserts or replaces feeds, keyed by URL.
    fn update_feeds(&mut self, feeds: &[Feed]) -> Result<()>;

    /// Returns the cached entries with the given guids. Unknown guids are skipped.
    fn entries(&self, guids: &[String]) -> Result<Vec<Entry>>;

    /// Returns the cached entries that fall within any of `locators`.
    fn entries_within(&self, locators: &[EntryLocator]) -> Result<Vec<Entry>>;

    /// Inserts or replaces entries, keyed by guid.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::FeedNotCached`][crate::StoreError::FeedNotCached] if
    /// entries reference feeds that are not cached. Entries of cached feeds are
    /// written regardless.
    fn update_entries(&mut self, entries: &[Entry]) -> Result<()>;

    /// Removes feeds and all of their entries.
    fn remove(&mut self, urls: &[String]) -> Result<()>;

    /// Resolves the persistent identifier of a cached feed.
    ///
    /// # Errors
    ///
    /// Fails with [`StoreError::FeedNotCached`][crate::StoreError::FeedNotCached] if
    /// the feed is not cached.
    fn feed_id(&self, url: &str) -> Result<FeedId>;
}
