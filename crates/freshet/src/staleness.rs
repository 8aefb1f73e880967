// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Splitting cached items into fresh, stale and missing.

use std::{collections::HashSet, time::SystemTime};

use freshet_store::{Cachable, Entry};

use crate::Ttl;

/// The result of [`subtract`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subtraction<T> {
    /// Items good enough to answer with.
    pub cached: Vec<T>,
    /// Items too old to answer with, but usable as a fallback.
    pub stale: Vec<T>,
    /// Requested URLs that still need fetching, or `None` if nothing does.
    pub missing: Option<Vec<String>>,
}

/// Splits cached `items` answering some of `urls` by their age under `ttl`.
///
/// Entries never expire individually: they always land in `cached`. A feed URL is
/// satisfied by a fresh feed, or by its most recently cached entry being fresh.
/// Every requested URL is either satisfied or listed in `missing`, in request
/// order.
///
/// # Examples
///
/// ```
/// use freshet::{subtract, Ttl};
/// use freshet_store::Feed;
/// use std::time::{Duration, SystemTime};
///
/// let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);
/// let mut feed = Feed::new("http://abc.de/feed", "ABC");
/// feed.ts = Some(now - Duration::from_secs(7200));
///
/// let urls = vec!["http://abc.de/feed".to_string()];
/// let result = subtract(vec![feed], &urls, Ttl::new(Duration::from_secs(3600)), now);
///
/// assert!(result.cached.is_empty());
/// assert_eq!(result.stale.len(), 1);
/// assert_eq!(result.missing, Some(urls));
/// ```
#[must_use]
pub fn subtract<T: Cachable>(items: Vec<T>, urls: &[String], ttl: Ttl, now: SystemTime) -> Subtraction<T> {
    if items.is_empty() {
        return Subtraction {
            cached: Vec::new(),
            stale: Vec::new(),
            missing: (!urls.is_empty()).then(|| urls.to_vec()),
        };
    }

    let mut cached = Vec::new();
    let mut stale = Vec::new();
    let mut satisfied: HashSet<String> = HashSet::new();

    for item in items {
        if item.as_entry().is_some() {
            cached.push(item);
        } else if ttl.is_stale(item.ts(), now) {
            stale.push(item);
        } else {
            satisfied.insert(item.url().to_owned());
            cached.push(item);
        }
    }

    for url in urls {
        let candidates = cached.iter().filter_map(Cachable::as_entry).filter(|entry| entry.url == *url);
        if let Some(latest) = latest(candidates)
            && !ttl.is_stale(latest.ts, now)
        {
            satisfied.insert(url.clone());
        }
    }

    let mut seen = HashSet::new();
    let missing: Vec<String> = urls
        .iter()
        .filter(|url| !satisfied.contains(*url) && seen.insert(url.as_str()))
        .cloned()
        .collect();

    Subtraction {
        cached,
        stale,
        missing: (!missing.is_empty()).then_some(missing),
    }
}

/// Returns the most recently cached entry, or `None` if there are none.
///
/// Ties go to the entry seen first.
pub fn latest<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Option<&'a Entry> {
    entries.into_iter().reduce(|best, entry| if entry.ts > best.ts { entry } else { best })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use freshet_store::Feed;

    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000)
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    fn feed(url: &str, age: Duration) -> Feed {
        let mut feed = Feed::new(url, url);
        feed.ts = Some(now() - age);
        feed
    }

    fn entry(url: &str, guid: &str, age: Duration) -> Entry {
        let mut entry = Entry::new(url, guid, guid, SystemTime::UNIX_EPOCH);
        entry.ts = Some(now() - age);
        entry
    }

    #[test]
    fn nothing_cached_everything_missing() {
        let result = subtract(Vec::<Entry>::new(), &urls(&["http://a"]), Ttl::INFINITE, now());
        assert!(result.cached.is_empty());
        assert!(result.stale.is_empty());
        assert_eq!(result.missing, Some(urls(&["http://a"])));
    }

    #[test]
    fn nothing_cached_nothing_requested() {
        let result = subtract(Vec::<Feed>::new(), &[], Ttl::INFINITE, now());
        assert_eq!(result.missing, None);
    }

    #[test]
    fn fresh_entry_satisfies_its_feed() {
        let fresh = entry("http://a", "x", Duration::ZERO);
        let result = subtract(vec![fresh.clone()], &urls(&["http://a"]), Ttl::new(HOUR), now());
        assert_eq!(result.cached, vec![fresh]);
        assert!(result.stale.is_empty());
        assert_eq!(result.missing, None);
    }

    #[test]
    fn stale_feed_is_fallback_and_missing() {
        let old = feed("http://a", HOUR * 2);
        let result = subtract(vec![old.clone()], &urls(&["http://a"]), Ttl::new(HOUR), now());
        assert!(result.cached.is_empty());
        assert_eq!(result.stale, vec![old]);
        assert_eq!(result.missing, Some(urls(&["http://a"])));
    }

    #[test]
    fn old_entries_are_cached_but_do_not_satisfy() {
        let old = entry("http://a", "x", HOUR * 2);
        let result = subtract(vec![old.clone()], &urls(&["http://a"]), Ttl::new(HOUR), now());
        assert_eq!(result.cached, vec![old]);
        assert!(result.stale.is_empty());
        assert_eq!(result.missing, Some(urls(&["http://a"])));
    }

    #[test]
    fn latest_entry_decides() {
        let items = vec![
            entry("http://a", "old", HOUR * 5),
            entry("http://a", "new", Duration::from_secs(60)),
            entry("http://b", "old", HOUR * 5),
        ];
        let result = subtract(items, &urls(&["http://a", "http://b"]), Ttl::new(HOUR), now());
        assert_eq!(result.cached.len(), 3);
        assert_eq!(result.missing, Some(urls(&["http://b"])));
    }

    #[test]
    fn every_url_is_accounted_for_once() {
        let requested = urls(&["http://a", "http://b", "http://c", "http://d", "http://a"]);
        let items = vec![feed("http://a", Duration::ZERO), feed("http://b", HOUR * 3)];
        let result = subtract(items, &requested, Ttl::new(HOUR), now());

        let satisfied: HashSet<&str> = result.cached.iter().map(|f| f.url.as_str()).collect();
        let missing = result.missing.unwrap_or_default();

        for url in &requested {
            let in_satisfied = satisfied.contains(url.as_str());
            let in_missing = missing.iter().filter(|m| *m == url).count();
            assert!(in_satisfied ^ (in_missing == 1), "{url} must be accounted for exactly once");
        }
        assert_eq!(missing, urls(&["http://b", "http://c", "http://d"]));
    }

    #[test]
    fn entries_are_never_stale() {
        for age in [Duration::ZERO, HOUR, HOUR * 1000] {
            let result = subtract(vec![entry("http://a", "x", age)], &urls(&["http://a"]), Ttl::ZERO, now());
            assert!(result.stale.is_empty());
            assert_eq!(result.cached.len(), 1);
        }
    }

    #[test]
    fn latest_picks_max_ts() {
        let a = entry("http://a", "a", HOUR);
        let b = entry("http://a", "b", Duration::ZERO);
        let c = entry("http://a", "c", HOUR * 2);
        assert_eq!(latest([&a, &b, &c]).map(|e| e.guid.as_str()), Some("b"));
        assert!(latest(std::iter::empty()).is_none());
    }
}
