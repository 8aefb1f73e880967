// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{fmt, time::SystemTime};

/// Something a store can hold and timestamp.
///
/// Both feeds and entries are addressed by a feed URL: a feed by its own URL, an
/// entry by the URL of the feed it belongs to. The timestamp is assigned by the
/// store when the item is persisted and is `None` for items that never were.
pub trait Cachable {
    /// The feed URL this item belongs to.
    fn url(&self) -> &str;

    /// When the store last wrote this item, if it ever did.
    fn ts(&self) -> Option<SystemTime>;

    /// Returns the item as an entry, if it is one.
    ///
    /// Entries never expire individually; staleness for them is judged per feed.
    fn as_entry(&self) -> Option<&Entry> {
        None
    }
}

/// Opaque persistent identifier of a cached feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeedId(u64);

impl FeedId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feed#{}", self.0)
    }
}

/// A feed, as returned by the remote service or read back from a store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Feed {
    /// The canonical URL of the feed.
    pub url: String,
    /// Display title.
    pub title: String,
    /// Author or publisher.
    pub author: Option<String>,
    /// Link to the website of the feed.
    pub link: Option<String>,
    /// Description of the feed.
    pub summary: Option<String>,
    /// URL of the artwork.
    pub image: Option<String>,
    /// When the feed was last updated by its publisher.
    pub updated: Option<SystemTime>,
    /// The URL originally requested, if the service followed a redirect.
    ///
    /// Stores do not persist this field.
    pub original_url: Option<String>,
    /// Identifier assigned by the store.
    pub id: Option<FeedId>,
    /// When the store last wrote this feed.
    pub ts: Option<SystemTime>,
}

impl Feed {
    /// Creates a feed with a URL and a title; everything else is unset.
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if the service reached this feed through a redirect.
    #[must_use]
    pub fn is_redirected(&self) -> bool {
        self.original_url.as_deref().is_some_and(|original| original != self.url)
    }
}

impl Cachable for Feed {
    fn url(&self) -> &str {
        &self.url
    }

    fn ts(&self) -> Option<SystemTime> {
        self.ts
    }
}

/// Media attached to an entry, typically the audio file of a podcast episode.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Enclosure {
    /// Where the media lives.
    pub url: String,
    /// Size in bytes, when the publisher says so.
    pub length: Option<u64>,
    /// MIME type.
    pub kind: String,
}

/// An entry of a feed, for example a podcast episode.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Entry {
    /// URL of the feed this entry belongs to.
    pub url: String,
    /// Globally unique identifier of the entry.
    pub guid: String,
    /// Display title.
    pub title: String,
    /// When the entry was published or last updated.
    pub updated: SystemTime,
    /// Link to the web page of the entry.
    pub link: Option<String>,
    /// Show notes or description.
    pub summary: Option<String>,
    /// Author of the entry.
    pub author: Option<String>,
    /// Attached media.
    pub enclosure: Option<Enclosure>,
    /// The feed URL originally requested, if the service followed a redirect.
    ///
    /// Stores do not persist this field.
    pub original_url: Option<String>,
    /// When the store last wrote this entry.
    pub ts: Option<SystemTime>,
}

impl Entry {
    /// Creates an entry with its identifying fields; everything else is unset.
    pub fn new(url: impl Into<String>, guid: impl Into<String>, title: impl Into<String>, updated: SystemTime) -> Self {
        Self {
            url: url.into(),
            guid: guid.into(),
            title: title.into(),
            updated,
            link: None,
            summary: None,
            author: None,
            enclosure: None,
            original_url: None,
            ts: None,
        }
    }

    /// Returns `true` if the service reached the feed of this entry through a redirect.
    #[must_use]
    pub fn is_redirected(&self) -> bool {
        self.original_url.as_deref().is_some_and(|original| original != self.url)
    }
}

impl Cachable for Entry {
    fn url(&self) -> &str {
        &self.url
    }

    fn ts(&self) -> Option<SystemTime> {
        self.ts
    }

    fn as_entry(&self) -> Option<&Entry> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn feed_redirect_requires_different_url() {
        let mut feed = Feed::new("http://abc.de/feed", "ABC");
        assert!(!feed.is_redirected());

        feed.original_url = Some("http://abc.de/feed".to_string());
        assert!(!feed.is_redirected());

        feed.original_url = Some("http://abc.de/old".to_string());
        assert!(feed.is_redirected());
    }

    #[test]
    fn entry_is_cachable_as_entry() {
        let entry = Entry::new("http://abc.de/feed", "abc-1", "One", SystemTime::UNIX_EPOCH);
        assert_eq!(entry.url(), "http://abc.de/feed");
        assert!(entry.ts().is_none());
        assert_eq!(entry.as_entry().map(|e| e.guid.as_str()), Some("abc-1"));
    }

    #[test]
    fn feed_is_not_an_entry() {
        let mut feed = Feed::new("http://abc.de/feed", "ABC");
        feed.ts = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1));
        assert!(feed.as_entry().is_none());
        assert_eq!(feed.ts(), Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1)));
    }

    #[test]
    fn feed_id_display() {
        assert_eq!(FeedId::new(7).to_string(), "feed#7");
        assert_eq!(FeedId::new(7).get(), 7);
    }
}
