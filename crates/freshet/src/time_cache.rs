// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Remembering when keys were last touched.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tick::Clock;

/// Remembers when keys were last touched and answers whether they are still fresh.
///
/// A `TimeCache` serves two purposes: throttling an action to once per window per
/// key, and remembering negative results for a short while. Keys never expire
/// explicitly; freshness is computed when a key is read.
///
/// Clones share the same keys.
///
/// # Examples
///
/// ```
/// use freshet::TimeCache;
/// use std::time::Duration;
/// use tick::ClockControl;
///
/// let control = ClockControl::new();
/// let throttle = TimeCache::new(control.to_clock(), Duration::from_secs(60));
///
/// assert!(throttle.touch("http://abc.de/feed"));
/// assert!(!throttle.touch("http://abc.de/feed"));
///
/// control.advance(Duration::from_secs(60));
/// assert!(throttle.touch("http://abc.de/feed"));
/// ```
#[derive(Debug, Clone)]
pub struct TimeCache {
    clock: Clock,
    ttl: Duration,
    touched: Arc<Mutex<HashMap<String, Instant>>>,
}

impl TimeCache {
    /// Creates an empty cache whose keys stay fresh for `ttl`.
    #[must_use]
    pub fn new(clock: Clock, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            touched: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// How long a touched key stays fresh.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Touches `key` unless it is still fresh.
    ///
    /// Returns `true` and records the current time if the key was never touched or
    /// was last touched at least `ttl` ago. Returns `false` otherwise, leaving the
    /// recorded time unchanged.
    pub fn touch(&self, key: &str) -> bool {
        let now = self.clock.instant();
        let mut touched = self.touched.lock();

        if touched.get(key).is_some_and(|last| self.fresh_at(*last, now)) {
            return false;
        }

        touched.insert(key.to_owned(), now);
        true
    }

    /// Returns `true` if `key` was touched less than `ttl` ago.
    #[must_use]
    pub fn is_fresh(&self, key: &str) -> bool {
        let now = self.clock.instant();
        self.touched.lock().get(key).is_some_and(|last| self.fresh_at(*last, now))
    }

    /// Returns `true` if `term` or any of its prefixes is fresh.
    ///
    /// Useful to skip lookups known to have no results: if "pod" found nothing a
    /// moment ago, "podcast" will not find anything either.
    ///
    /// # Examples
    ///
    /// ```
    /// use freshet::TimeCache;
    /// use std::time::Duration;
    /// use tick::Clock;
    ///
    /// let empty_terms = TimeCache::new(Clock::new_frozen(), Duration::from_secs(300));
    /// empty_terms.touch("pod");
    ///
    /// assert!(empty_terms.covers("podcast"));
    /// assert!(!empty_terms.covers("po"));
    /// ```
    #[must_use]
    pub fn covers(&self, term: &str) -> bool {
        let now = self.clock.instant();
        let touched = self.touched.lock();

        let mut prefix = term;
        loop {
            if touched.get(prefix).is_some_and(|last| self.fresh_at(*last, now)) {
                return true;
            }

            match prefix.char_indices().next_back() {
                Some((end, _)) if end > 0 => prefix = &prefix[..end],
                _ => return false,
            }
        }
    }

    fn fresh_at(&self, last: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last) < self.ttl
    }
}
