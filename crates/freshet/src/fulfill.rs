// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resolving entry locators against the store.

use std::{collections::HashSet, time::SystemTime};

use freshet_store::{Entry, EntryLocator, FeedStore, StoreError};

use crate::{TimeCache, Ttl, staleness};

/// The result of [`fulfill`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fulfillment {
    /// Cached entries answering the locators.
    pub entries: Vec<Entry>,
    /// Locators that still need a remote fetch.
    pub missing: Vec<EntryLocator>,
}

/// Resolves `locators` to cached entries and the locators still needing a fetch.
///
/// Guid locators are looked up exactly and never expire. Window locators are
/// answered from the store when the feed's most recently cached entry is fresh
/// under `ttl`.
///
/// When a single window remains to be fetched and its feed has cached entries,
/// the window is narrowed to "newer than the latest cached entry". The
/// `throttle`, if any, permits this once per window per feed; a refused narrowing
/// drops the locator, so the cached entries stand as the answer. A zero `ttl`
/// narrows without asking the throttle, the force having been permitted already.
///
/// Returned entries are never accompanied by the full request as missing: if
/// nothing useful was cached, no entries are returned.
///
/// # Errors
///
/// Returns the store's error if a lookup fails.
///
/// # Examples
///
/// ```
/// use freshet::{fulfill, Ttl};
/// use freshet_store::{EntryLocator, MemoryStore};
/// use tick::Clock;
///
/// let clock = Clock::new_frozen();
/// let store = MemoryStore::new(clock.clone());
/// let locators = [EntryLocator::new("http://abc.de/feed").with_guid("x")];
///
/// let result = fulfill(&store, &locators, Ttl::INFINITE, clock.system_time(), None)?;
/// assert!(result.entries.is_empty());
/// assert_eq!(result.missing, locators);
/// # Ok::<(), freshet_store::StoreError>(())
/// ```
pub fn fulfill<S>(
    store: &S,
    locators: &[EntryLocator],
    ttl: Ttl,
    now: SystemTime,
    throttle: Option<&TimeCache>,
) -> Result<Fulfillment, StoreError>
where
    S: FeedStore + ?Sized,
{
    let reduced = EntryLocator::reduce(locators);

    let guids: Vec<String> = reduced.iter().filter_map(|l| l.guid().map(str::to_owned)).collect();
    let resolved = if guids.is_empty() { Vec::new() } else { store.entries(&guids)? };
    let resolved_guids: HashSet<String> = resolved.iter().map(|e| e.guid.clone()).collect();

    let is_resolved = |locator: &EntryLocator| locator.guid().is_some_and(|g| resolved_guids.contains(g));

    if reduced.iter().all(is_resolved) {
        return Ok(Fulfillment {
            entries: resolved,
            missing: Vec::new(),
        });
    }

    let unresolved: Vec<EntryLocator> = reduced.iter().filter(|l| !is_resolved(*l)).cloned().collect();
    let within = store.entries_within(&unresolved)?;

    let mut merged = resolved;
    for entry in within {
        if !merged.iter().any(|e| e.guid == entry.guid) {
            merged.push(entry);
        }
    }

    let mut urls: Vec<String> = Vec::new();
    for locator in &unresolved {
        if !urls.iter().any(|url| url == locator.url()) {
            urls.push(locator.url().to_owned());
        }
    }

    let subtraction = staleness::subtract(merged, &urls, ttl, now);
    let missing_urls: HashSet<String> = subtraction.missing.unwrap_or_default().into_iter().collect();
    let entries = subtraction.cached;

    let mut needed: Vec<EntryLocator> = reduced
        .iter()
        .filter(|l| l.guid().is_some_and(|g| !resolved_guids.contains(g)) || missing_urls.contains(l.url()))
        .cloned()
        .collect();

    let guided: Vec<EntryLocator> = needed.iter().filter(|l| l.guid().is_some()).cloned().collect();
    if guided == reduced {
        return Ok(Fulfillment {
            entries: Vec::new(),
            missing: needed,
        });
    }

    narrow(&mut needed, &entries, ttl, now, throttle);

    if !entries.is_empty() && needed == reduced {
        tracing::debug!(count = entries.len(), "cached entries answer nothing requested");
        return Ok(Fulfillment {
            entries: Vec::new(),
            missing: needed,
        });
    }

    Ok(Fulfillment { entries, missing: needed })
}

fn narrow(needed: &mut Vec<EntryLocator>, entries: &[Entry], ttl: Ttl, now: SystemTime, throttle: Option<&TimeCache>) {
    let mut windows = needed.iter().enumerate().filter(|(_, l)| l.guid().is_none());
    let (Some((index, window)), None) = (windows.next(), windows.next()) else {
        return;
    };

    let url = window.url();
    let Some(latest) = staleness::latest(entries.iter().filter(|e| e.url == url)) else {
        return;
    };

    if !ttl.is_stale(latest.ts, now) {
        return;
    }

    let permitted = ttl.is_zero() || throttle.is_none_or(|t| t.touch(url));
    if permitted {
        tracing::debug!(url, since = ?latest.updated, "narrowing window to latest cached entry");
        needed[index] = EntryLocator::from_entry(latest).including();
    } else {
        tracing::debug!(url, "narrowing throttled, answering from cache");
        needed.remove(index);
    }
}
