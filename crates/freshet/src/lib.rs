// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Cache-first fetch orchestration for feeds and their entries.
//!
//! A feed aggregator asks for feeds by URL and for entries by [`EntryLocator`]. This
//! crate answers those requests from a [`FeedStore`] when the cached data is fresh
//! enough, fetches what is missing or stale from a [`FeedService`], writes the
//! results back and delivers them, cached data first.
//!
//! # Overview
//!
//! - [`Fetcher`] is the entry point. It turns each request into a small graph of
//!   tasks, one making sure feeds are cached and one resolving entries, and runs
//!   it on a bounded pool through a [`Scheduler`].
//! - Freshness is decided by a [`CachePolicy`], recommended from a [`CacheTtl`]
//!   tier. Forcing a refresh is throttled per URL by a [`TimeCache`].
//! - [`subtract`] splits cached items into fresh and stale and names what is
//!   missing. [`fulfill`] resolves entry locators against the store.
//! - Results arrive through [`Callbacks`], on a [`Target`] of the caller's
//!   choosing. The batch callback may run more than once. The completion callback
//!   runs exactly once, also when the request is cancelled through its
//!   [`FetchHandle`].
//!
//! When the service fails or is unreachable, stale feeds are delivered instead.
//! Partial results always reach the caller, with a non-fatal [`FetchError`] in the
//! [`Batch`] that carries them.
//!
//! # Example
//!
//! ```
//! # #[cfg(feature = "test-util")]
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use freshet::{Callbacks, Fetcher, SerialQueue, testing::MockService};
//! use freshet_store::{Entry, EntryLocator, Feed, MemoryStore};
//! use std::time::SystemTime;
//! use tick::Clock;
//!
//! let service = MockService::new();
//! service.add_feeds([Feed::new("http://abc.de/feed", "ABC")]);
//! service.add_entries([Entry::new("http://abc.de/feed", "abc-1", "Episode 1", SystemTime::UNIX_EPOCH)]);
//!
//! let clock = Clock::new_frozen();
//! let fetcher = Fetcher::builder(clock.clone(), MemoryStore::new(clock), service).build();
//!
//! let (tx, rx) = tokio::sync::oneshot::channel();
//! let callbacks = Callbacks::<Entry>::new(
//!     SerialQueue::new(),
//!     |batch| {
//!         for entry in batch.items {
//!             println!("{}", entry.title);
//!         }
//!     },
//!     move |result| {
//!         let _ = tx.send(result);
//!     },
//! );
//!
//! let locators = [EntryLocator::new("http://abc.de/feed").with_guid("abc-1")];
//! fetcher.fetch_entries(&locators, false, callbacks);
//!
//! assert!(rx.await.unwrap().is_ok());
//! # }
//! # #[cfg(not(feature = "test-util"))]
//! # fn main() {}
//! ```

mod dispatch;
mod entries_task;
mod error;
mod feeds_task;
mod fetcher;
mod fulfill;
mod policy;
mod scheduler;
mod serial;
mod service;
mod staleness;
mod task;
#[cfg(any(feature = "test-util", test))]
pub mod testing;
mod time_cache;

#[doc(inline)]
pub use dispatch::{Batch, Callbacks, Job, SerialQueue, Target};
#[doc(inline)]
pub use error::FetchError;
#[doc(inline)]
pub use fetcher::{FetchHandle, Fetcher, FetcherBuilder};
#[doc(inline)]
pub use freshet_store::{Entry, EntryLocator, Feed, FeedId, FeedStore};
#[doc(inline)]
pub use fulfill::{Fulfillment, fulfill};
#[doc(inline)]
pub use policy::{CachePolicy, CacheTtl, TransportCacheMode, Ttl, recommend};
#[doc(inline)]
pub use scheduler::{Scheduler, TaskGraph, TaskId};
#[doc(inline)]
pub use service::{FeedService, ServiceError};
#[doc(inline)]
pub use staleness::{Subtraction, latest, subtract};
#[doc(inline)]
pub use task::{Cancellation, Handoff, Task, TaskState};
#[doc(inline)]
pub use time_cache::TimeCache;
