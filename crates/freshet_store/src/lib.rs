// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Feed and entry entities, entry locators, and the cache contract consumed by `freshet`.
//!
//! This crate defines the [`FeedStore`] trait that persistent stores implement, the
//! [`Feed`] and [`Entry`] values they hold, and the [`EntryLocator`] used to ask for
//! entries within a time window or by their globally unique id.
//!
//! # Overview
//!
//! The store is a narrow contract: read feeds by URL, read entries by guid or within
//! locator windows, write both, and remove feeds together with their entries. Stores
//! stamp every entity they persist with a cache timestamp (`ts`), which the fetch
//! orchestration in `freshet` uses to decide what is fresh and what is stale.
//!
//! [`MemoryStore`] is a complete in-memory implementation, useful for tests and for
//! applications that do not need persistence.
//!
//! # Example
//!
//! ```
//! use freshet_store::{Entry, EntryLocator, Feed, FeedStore, MemoryStore};
//! use std::time::{Duration, SystemTime};
//! use tick::Clock;
//!
//! let clock = Clock::new_frozen_at(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000));
//! let mut store = MemoryStore::new(clock);
//!
//! store.update_feeds(&[Feed::new("http://abc.de/feed", "ABC")])?;
//!
//! let published = SystemTime::UNIX_EPOCH + Duration::from_secs(500);
//! store.update_entries(&[Entry::new("http://abc.de/feed", "abc-1", "Episode 1", published)])?;
//!
//! let entries = store.entries_within(&[EntryLocator::new("http://abc.de/feed")])?;
//! assert_eq!(entries.len(), 1);
//! assert!(entries[0].ts.is_some());
//! # Ok::<(), freshet_store::StoreError>(())
//! ```

mod entity;
mod error;
mod locator;
mod memory;
mod store;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use entity::{Cachable, Enclosure, Entry, Feed, FeedId};
#[doc(inline)]
pub use error::{Result, StoreError};
#[doc(inline)]
pub use locator::{EntryLocator, Reduction};
#[doc(inline)]
pub use memory::MemoryStore;
#[doc(inline)]
pub use store::FeedStore;
