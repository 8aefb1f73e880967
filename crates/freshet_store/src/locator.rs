// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Entry locators and their reduction.

use std::{
    collections::{HashMap, HashSet},
    hash::{Hash, Hasher},
    time::{Duration, SystemTime},
};

use crate::Entry;

/// Names the entries of a feed published after a point in time, or one exact entry.
///
/// A locator without a guid selects every entry of the feed at `url` whose `updated`
/// time is strictly after `since`. A locator with a guid selects exactly that entry;
/// it still carries the URL of the feed the entry belongs to.
///
/// Two locators are equal if they carry the same guid, or if neither carries a guid
/// and they share the same URL and `since`. The title is diagnostic only and never
/// takes part in comparisons.
///
/// # Examples
///
/// ```
/// use freshet_store::EntryLocator;
/// use std::time::{Duration, SystemTime};
///
/// let all = EntryLocator::new("http://abc.de/feed");
/// assert_eq!(all.since(), SystemTime::UNIX_EPOCH);
///
/// let recent = EntryLocator::new("http://abc.de/feed")
///     .with_since(SystemTime::UNIX_EPOCH + Duration::from_secs(3600));
/// assert_ne!(all, recent);
///
/// let exact = EntryLocator::new("http://abc.de/feed").with_guid("abc-1");
/// assert_eq!(exact.guid(), Some("abc-1"));
/// ```
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntryLocator {
    url: String,
    since: SystemTime,
    guid: Option<String>,
    title: Option<String>,
}

/// How [`EntryLocator::reduce_with`] picks one window per feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Reduction {
    /// Keep the earliest `since`, the broadest window.
    #[default]
    Expanding,
    /// Keep the latest `since`, the narrowest window.
    Narrowing,
}

impl EntryLocator {
    /// Creates a locator for all entries of a feed.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            since: SystemTime::UNIX_EPOCH,
            guid: None,
            title: None,
        }
    }

    /// Creates a locator for the entries published after the given entry.
    ///
    /// The locator carries no guid, so it names a window, not the entry itself.
    #[must_use]
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            url: entry.url.clone(),
            since: entry.updated,
            guid: None,
            title: Some(entry.title.clone()),
        }
    }

    /// Returns this locator with entries restricted to those published after `since`.
    #[must_use]
    pub fn with_since(mut self, since: SystemTime) -> Self {
        self.since = since;
        self
    }

    /// Returns this locator narrowed to the entry with `guid`.
    #[must_use]
    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    /// Returns this locator with a diagnostic title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Returns a copy whose window starts one second earlier.
    ///
    /// Windows compare strictly, so this makes an entity sitting exactly on the
    /// boundary part of the window again.
    #[must_use]
    pub fn including(&self) -> Self {
        let since = self
            .since
            .checked_sub(Duration::from_secs(1))
            .map_or(SystemTime::UNIX_EPOCH, |since| since.max(SystemTime::UNIX_EPOCH));

        Self {
            since,
            ..self.clone()
        }
    }

    /// The URL of the feed.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Entries must have been updated after this point.
    #[must_use]
    pub fn since(&self) -> SystemTime {
        self.since
    }

    /// The guid of the one entry this locator names, if any.
    #[must_use]
    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    /// The diagnostic title, if any.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Returns `true` if `entry` falls within this locator.
    #[must_use]
    pub fn matches(&self, entry: &Entry) -> bool {
        match &self.guid {
            Some(guid) => *guid == entry.guid,
            None => self.url == entry.url && entry.updated > self.since,
        }
    }

    /// Merges locators into the smallest set that covers the same entries.
    ///
    /// This is [`reduce_with`][Self::reduce_with] using [`Reduction::Expanding`].
    #[must_use]
    pub fn reduce(locators: &[Self]) -> Vec<Self> {
        Self::reduce_with(locators, Reduction::Expanding)
    }

    /// Merges locators, keeping one window per feed.
    ///
    /// Locators with a guid pass through, deduplicated by guid. Locators without a
    /// guid are grouped by URL and each group is represented by one locator, chosen
    /// by `reduction`. Guid locators come first, then the windows, each in the order
    /// they were first seen.
    ///
    /// # Examples
    ///
    /// ```
    /// use freshet_store::EntryLocator;
    /// use std::time::{Duration, SystemTime};
    ///
    /// let later = SystemTime::UNIX_EPOCH + Duration::from_secs(60);
    /// let locators = [
    ///     EntryLocator::new("http://abc.de/feed").with_since(later),
    ///     EntryLocator::new("http://abc.de/feed"),
    ///     EntryLocator::new("http://abc.de/feed").with_guid("abc-1"),
    /// ];
    ///
    /// let reduced = EntryLocator::reduce(&locators);
    /// assert_eq!(reduced, vec![locators[2].clone(), locators[1].clone()]);
    /// ```
    #[must_use]
    pub fn reduce_with(locators: &[Self], reduction: Reduction) -> Vec<Self> {
        let mut guids = HashSet::new();
        let mut exact = Vec::new();
        let mut order = Vec::new();
        let mut windows: HashMap<&str, &Self> = HashMap::new();

        for locator in locators {
            if let Some(guid) = locator.guid() {
                if guids.insert(guid) {
                    exact.push(locator.clone());
                }
                continue;
            }

            match windows.get(locator.url()) {
                None => {
                    order.push(locator.url());
                    windows.insert(locator.url(), locator);
                }
                Some(current) => {
                    let replace = match reduction {
                        Reduction::Expanding => locator.since < current.since,
                        Reduction::Narrowing => locator.since > current.since,
                    };
                    if replace {
                        windows.insert(locator.url(), locator);
                    }
                }
            }
        }

        exact.extend(order.into_iter().filter_map(|url| windows.get(url).map(|l| (*l).clone())));
        exact
    }
}

impl PartialEq for EntryLocator {
    fn eq(&self, other: &Self) -> bool {
        match (&self.guid, &other.guid) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.url == other.url && self.since == other.since,
            _ => false,
        }
    }
}

impl Eq for EntryLocator {}

impl Hash for EntryLocator {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.guid {
            Some(guid) => guid.hash(state),
            None => {
                self.url.hash(state);
                self.since.hash(state);
            }
        }
    }
}
