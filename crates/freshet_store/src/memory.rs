// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-memory store implementation.

use std::collections::{HashMap, HashSet};

use tick::Clock;

use crate::{Entry, EntryLocator, Feed, FeedId, FeedStore, Result, StoreError};

/// A [`FeedStore`] that keeps everything in memory.
///
/// Timestamps are taken from the injected [`Clock`], so tests can move time
/// deterministically. Feed identifiers are assigned sequentially, starting at one,
/// and survive updates of the same feed.
///
/// # Examples
///
/// ```
/// use freshet_store::{Entry, Feed, FeedStore, MemoryStore, StoreError};
/// use std::time::SystemTime;
/// use tick::Clock;
///
/// let mut store = MemoryStore::new(Clock::new_frozen());
///
/// let orphan = Entry::new("http://abc.de/feed", "abc-1", "One", SystemTime::UNIX_EPOCH);
/// let result = store.update_entries(&[orphan]);
/// assert!(matches!(result, Err(StoreError::FeedNotCached { urls }) if urls == ["http://abc.de/feed"]));
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    clock: Clock,
    feeds: HashMap<String, Feed>,
    entries: HashMap<String, Entry>,
    last_id: u64,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            feeds: HashMap::new(),
            entries: HashMap::new(),
            last_id: 0,
        }
    }

    /// Returns the number of cached feeds.
    #[must_use]
    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    /// Returns the number of cached entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn next_id(&mut self) -> FeedId {
        self.last_id += 1;
        FeedId::new(self.last_id)
    }
}

impl FeedStore for MemoryStore {
    fn feeds(&self, urls: &[String]) -> Result<Vec<Feed>> {
        let mut seen = HashSet::new();
        Ok(urls
            .iter()
            .filter(|url| seen.insert(url.as_str()))
            .filter_map(|url| self.feeds.get(url).cloned())
            .collect())
    }

    fn update_feeds(&mut self, feeds: &[Feed]) -> Result<()> {
        let now = self.clock.system_time();

        for feed in feeds {
            let id = match self.feeds.get(&feed.url).and_then(|cached| cached.id) {
                Some(id) => id,
                None => self.next_id(),
            };

            let stored = Feed {
                original_url: None,
                id: Some(id),
                ts: Some(now),
                ..feed.clone()
            };
            self.feeds.insert(stored.url.clone(), stored);
        }

        tracing::debug!(count = feeds.len(), "feeds written");
        Ok(())
    }

    fn entries(&self, guids: &[String]) -> Result<Vec<Entry>> {
        let mut seen = HashSet::new();
        Ok(guids
            .iter()
            .filter(|guid| seen.insert(guid.as_str()))
            .filter_map(|guid| self.entries.get(guid).cloned())
            .collect())
    }

    fn entries_within(&self, locators: &[EntryLocator]) -> Result<Vec<Entry>> {
        let mut guids = HashSet::new();
        let mut found = Vec::new();

        for locator in locators {
            if let Some(guid) = locator.guid() {
                if let Some(entry) = self.entries.get(guid)
                    && guids.insert(entry.guid.as_str())
                {
                    found.push(entry.clone());
                }
                continue;
            }

            for entry in self.entries.values() {
                if locator.matches(entry) && guids.insert(entry.guid.as_str()) {
                    found.push(entry.clone());
                }
            }
        }

        found.sort_by(|a, b| b.updated.cmp(&a.updated).then_with(|| a.guid.cmp(&b.guid)));
        Ok(found)
    }

    fn update_entries(&mut self, entries: &[Entry]) -> Result<()> {
        let now = self.clock.system_time();
        let mut missing: Vec<String> = Vec::new();
        let mut written = 0_usize;

        for entry in entries {
            if !self.feeds.contains_key(&entry.url) {
                if !missing.contains(&entry.url) {
                    missing.push(entry.url.clone());
                }
                continue;
            }

            let stored = Entry {
                original_url: None,
                ts: Some(now),
                ..entry.clone()
            };
            self.entries.insert(stored.guid.clone(), stored);
            written += 1;
        }

        tracing::debug!(count = written, "entries written");

        if missing.is_empty() {
            Ok(())
        } else {
            tracing::debug!(urls = ?missing, "entries reference uncached feeds");
            Err(StoreError::FeedNotCached { urls: missing })
        }
    }

    fn remove(&mut self, urls: &[String]) -> Result<()> {
        let doomed: HashSet<&str> = urls.iter().map(String::as_str).collect();

        self.feeds.retain(|url, _| !doomed.contains(url.as_str()));
        self.entries.retain(|_, entry| !doomed.contains(entry.url.as_str()));

        tracing::debug!(?urls, "feeds removed");
        Ok(())
    }

    fn feed_id(&self, url: &str) -> Result<FeedId> {
        self.feeds
            .get(url)
            .and_then(|feed| feed.id)
            .ok_or_else(|| StoreError::feed_not_cached([url]))
    }
}
