// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Time-to-live tiers and the per-request cache policy.

use std::{
    fmt,
    time::{Duration, SystemTime},
};

use crate::TimeCache;

const HOUR: Duration = Duration::from_secs(60 * 60);

/// How long cached data counts as fresh, possibly forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ttl(Option<Duration>);

impl Ttl {
    /// Nothing counts as fresh; forces a live fetch.
    pub const ZERO: Self = Self(Some(Duration::ZERO));

    /// Everything cached counts as fresh.
    pub const INFINITE: Self = Self(None);

    /// Creates a finite TTL.
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self(Some(duration))
    }

    /// Returns the duration, or `None` if infinite.
    #[must_use]
    pub const fn duration(self) -> Option<Duration> {
        self.0
    }

    /// Returns `true` for [`Ttl::ZERO`].
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0.is_some_and(|d| d.is_zero())
    }

    /// Returns `true` for [`Ttl::INFINITE`].
    #[must_use]
    pub const fn is_infinite(self) -> bool {
        self.0.is_none()
    }

    /// Returns `true` if something cached at `ts` is stale at `now`.
    ///
    /// Items that were never cached are stale. Items cached "in the future", as
    /// seen after a clock adjustment, count as cached just now. A zero TTL makes
    /// everything stale.
    ///
    /// # Examples
    ///
    /// ```
    /// use freshet::Ttl;
    /// use std::time::{Duration, SystemTime};
    ///
    /// let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);
    /// let hour = Ttl::new(Duration::from_secs(3600));
    ///
    /// assert!(!hour.is_stale(Some(now - Duration::from_secs(3600)), now));
    /// assert!(hour.is_stale(Some(now - Duration::from_secs(3601)), now));
    /// assert!(hour.is_stale(None, now));
    /// assert!(!Ttl::INFINITE.is_stale(Some(SystemTime::UNIX_EPOCH), now));
    /// ```
    #[must_use]
    pub fn is_stale(self, ts: Option<SystemTime>, now: SystemTime) -> bool {
        let Some(ts) = ts else {
            return true;
        };

        match self.0 {
            None => false,
            Some(limit) if limit.is_zero() => true,
            Some(limit) => now.duration_since(ts).unwrap_or_default() > limit,
        }
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(duration) => write!(f, "{}s", duration.as_secs()),
            None => f.write_str("infinite"),
        }
    }
}

/// The freshness a caller asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheTtl {
    /// Bypass the cache and fetch live, if permitted.
    None,
    /// One hour.
    Short,
    /// Eight hours.
    #[default]
    Medium,
    /// One day.
    Long,
    /// Whatever is cached is good enough.
    Forever,
}

impl CacheTtl {
    /// Returns the TTL of this tier.
    #[must_use]
    pub const fn ttl(self) -> Ttl {
        match self {
            Self::None => Ttl::ZERO,
            Self::Short => Ttl::new(HOUR),
            Self::Medium => Ttl::new(Duration::from_secs(8 * 60 * 60)),
            Self::Long => Ttl::new(Duration::from_secs(24 * 60 * 60)),
            Self::Forever => Ttl::INFINITE,
        }
    }
}

/// How the transport below the remote service should treat its own caches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransportCacheMode {
    /// Follow the caching rules of the protocol.
    #[default]
    UseProtocol,
    /// Fetch from the origin, ignoring intermediate caches.
    ReloadIgnoringCache,
    /// Only answer from caches, never load.
    ReturnCacheDontLoad,
}

/// The cache policy of one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CachePolicy {
    /// How long cached data counts as fresh.
    pub ttl: Ttl,
    /// What the transport should do with its own caches.
    pub transport: TransportCacheMode,
}

impl CachePolicy {
    /// Creates a policy that follows the protocol with the given TTL.
    #[must_use]
    pub const fn new(ttl: Ttl) -> Self {
        Self {
            ttl,
            transport: TransportCacheMode::UseProtocol,
        }
    }
}

/// Chooses the cache policy for a request.
///
/// `keys` name the distinct items the request involves: feed URLs for feed
/// requests, and the feed URL of each distinct locator for entry requests.
/// Forcing a live fetch is only honored for a single key, and at most once per
/// window of `force_throttle`. A refused force falls back to the `fallback` tier.
///
/// # Examples
///
/// ```
/// use freshet::{recommend, CacheTtl, TimeCache, TransportCacheMode, Ttl};
/// use std::time::Duration;
/// use tick::Clock;
///
/// let throttle = TimeCache::new(Clock::new_frozen(), Duration::from_secs(24 * 60 * 60));
/// let keys = ["http://abc.de/feed".to_string()];
///
/// let forced = recommend(CacheTtl::None, true, &keys, &throttle, CacheTtl::Medium);
/// assert_eq!(forced.ttl, Ttl::ZERO);
/// assert_eq!(forced.transport, TransportCacheMode::ReloadIgnoringCache);
///
/// // Once per window.
/// let again = recommend(CacheTtl::None, true, &keys, &throttle, CacheTtl::Medium);
/// assert_eq!(again.ttl, CacheTtl::Medium.ttl());
/// ```
#[must_use]
pub fn recommend(tier: CacheTtl, reachable: bool, keys: &[String], force_throttle: &TimeCache, fallback: CacheTtl) -> CachePolicy {
    if !reachable {
        return CachePolicy {
            ttl: Ttl::INFINITE,
            transport: TransportCacheMode::ReturnCacheDontLoad,
        };
    }

    let ttl = tier.ttl();
    if !ttl.is_zero() {
        return CachePolicy::new(ttl);
    }

    match keys {
        [key] if force_throttle.touch(key) => CachePolicy {
            ttl: Ttl::ZERO,
            transport: TransportCacheMode::ReloadIgnoringCache,
        },
        _ => {
            tracing::debug!(keys = keys.len(), fallback = %fallback.ttl(), "forced refresh refused");
            CachePolicy::new(fallback.ttl())
        }
    }
}
