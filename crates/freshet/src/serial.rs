// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serialized store access and the feed identifier memo.

use std::{collections::HashMap, sync::Arc};

use freshet_store::{FeedId, FeedStore, StoreError};
use parking_lot::Mutex;

/// Serializes all access to one store, reads and writes alike.
///
/// Closures run synchronously under the lock and must not block on I/O of other
/// tasks. Feed identifiers are memoized across requests.
pub(crate) struct SerialStore<S> {
    store: Arc<Mutex<S>>,
    ids: Arc<Mutex<HashMap<String, FeedId>>>,
}

impl<S> Clone for SerialStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ids: Arc::clone(&self.ids),
        }
    }
}

impl<S> std::fmt::Debug for SerialStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialStore").field("ids", &self.ids.lock().len()).finish_non_exhaustive()
    }
}

impl<S: FeedStore> SerialStore<S> {
    pub(crate) fn new(store: S) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            ids: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&*self.store.lock())
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut *self.store.lock())
    }

    /// Removes feeds and forgets their memoized identifiers.
    ///
    /// The store lock is taken before the memo lock, here and in
    /// [`feed_id`][Self::feed_id], so a concurrent lookup cannot memoize a feed
    /// this removes.
    pub(crate) fn remove(&self, urls: &[String]) -> Result<(), StoreError> {
        let mut store = self.store.lock();
        let removed = store.remove(urls);

        let mut ids = self.ids.lock();
        for url in urls {
            ids.remove(url);
        }
        removed
    }

    pub(crate) fn feed_id(&self, url: &str) -> Result<FeedId, StoreError> {
        if let Some(id) = self.ids.lock().get(url) {
            return Ok(*id);
        }

        let store = self.store.lock();
        let id = store.feed_id(url)?;
        self.ids.lock().insert(url.to_owned(), id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use freshet_store::{
        Entry, EntryLocator, Feed,
        testing::{MockStore, StoreOp},
    };
    use tick::Clock;

    use super::*;

    #[test]
    fn feed_id_is_memoized() {
        let store = MockStore::new(Clock::new_frozen()).seeded(&[Feed::new("http://a", "A")], &[]);
        let serial = SerialStore::new(store.clone());

        let first = serial.feed_id("http://a").unwrap();
        let second = serial.feed_id("http://a").unwrap();

        assert_eq!(first, second);
        assert_eq!(store.operations(), vec![StoreOp::FeedId("http://a".to_string())]);
    }

    #[test]
    fn misses_are_not_memoized() {
        let store = MockStore::new(Clock::new_frozen());
        let serial = SerialStore::new(store.clone());

        assert!(serial.feed_id("http://a").is_err());
        serial.write(|s| s.update_feeds(&[Feed::new("http://a", "A")])).unwrap();
        assert!(serial.feed_id("http://a").is_ok());
    }

    #[test]
    fn remove_forgets_ids() {
        let store = MockStore::new(Clock::new_frozen()).seeded(&[Feed::new("http://a", "A")], &[]);
        let serial = SerialStore::new(store.clone());

        serial.feed_id("http://a").unwrap();
        serial.remove(&["http://a".to_string()]).unwrap();

        assert!(matches!(serial.feed_id("http://a"), Err(StoreError::FeedNotCached { .. })));
    }

    #[test]
    fn clones_share_the_store() {
        let serial = SerialStore::new(MockStore::new(Clock::new_frozen()));
        let clone = serial.clone();
        clone.write(|s| s.update_feeds(&[Feed::new("http://a", "A")])).unwrap();
        assert_eq!(serial.read(MockStore::feed_count), 1);
    }

    /// Resolves feed identifiers slowly, widening the window for interleavings.
    struct SlowStore(MockStore);

    impl FeedStore for SlowStore {
        fn feeds(&self, urls: &[String]) -> freshet_store::Result<Vec<Feed>> {
            self.0.feeds(urls)
        }

        fn update_feeds(&mut self, feeds: &[Feed]) -> freshet_store::Result<()> {
            self.0.update_feeds(feeds)
        }

        fn entries(&self, guids: &[String]) -> freshet_store::Result<Vec<Entry>> {
            self.0.entries(guids)
        }

        fn entries_within(&self, locators: &[EntryLocator]) -> freshet_store::Result<Vec<Entry>> {
            self.0.entries_within(locators)
        }

        fn update_entries(&mut self, entries: &[Entry]) -> freshet_store::Result<()> {
            self.0.update_entries(entries)
        }

        fn remove(&mut self, urls: &[String]) -> freshet_store::Result<()> {
            self.0.remove(urls)
        }

        fn feed_id(&self, url: &str) -> freshet_store::Result<FeedId> {
            thread::sleep(Duration::from_millis(200));
            self.0.feed_id(url)
        }
    }

    #[test]
    fn lookup_racing_remove_does_not_memoize_removed_feed() {
        let store = MockStore::new(Clock::new_frozen()).seeded(&[Feed::new("http://a", "A")], &[]);
        let serial = SerialStore::new(SlowStore(store));

        let lookup = {
            let serial = serial.clone();
            thread::spawn(move || serial.feed_id("http://a"))
        };
        thread::sleep(Duration::from_millis(50));
        serial.remove(&["http://a".to_string()]).unwrap();
        let _ = lookup.join().unwrap();

        assert!(matches!(serial.feed_id("http://a"), Err(StoreError::FeedNotCached { .. })));
    }
}
