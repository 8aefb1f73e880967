// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! This example fetches the entries of two podcasts twice, showing the second
//! request being answered from the cache.

use std::time::{Duration, SystemTime};

use freshet::{CachePolicy, CacheTtl, Callbacks, FeedService, Fetcher, SerialQueue, ServiceError};
use freshet_store::{Entry, EntryLocator, Feed, MemoryStore};
use tick::Clock;

/// A stand-in for an HTTP client and parser, serving a fixed catalogue.
struct Directory {
    feeds: Vec<Feed>,
    entries: Vec<Entry>,
}

impl Directory {
    fn new() -> Self {
        let published = |days: u64| SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + days * 86_400);

        Self {
            feeds: vec![
                Feed::new("https://example.com/daily.xml", "The Daily Something"),
                Feed::new("https://example.org/weekly.xml", "Weekly Nothing"),
            ],
            entries: vec![
                Entry::new("https://example.com/daily.xml", "daily-1", "Monday", published(0)),
                Entry::new("https://example.com/daily.xml", "daily-2", "Tuesday", published(1)),
                Entry::new("https://example.org/weekly.xml", "weekly-1", "Week one", published(0)),
            ],
        }
    }
}

impl FeedService for Directory {
    async fn feeds(&self, locators: &[EntryLocator], policy: CachePolicy) -> Result<Vec<Feed>, ServiceError> {
        tracing::info!(count = locators.len(), ?policy, "requesting feeds");
        tokio::time::sleep(Duration::from_millis(50)).await;

        Ok(self
            .feeds
            .iter()
            .filter(|f| locators.iter().any(|l| l.url() == f.url))
            .cloned()
            .collect())
    }

    async fn entries(&self, locators: &[EntryLocator], reload: bool) -> Result<Vec<Entry>, ServiceError> {
        tracing::info!(count = locators.len(), reload, "requesting entries");
        tokio::time::sleep(Duration::from_millis(50)).await;

        Ok(self
            .entries
            .iter()
            .filter(|e| locators.iter().any(|l| l.matches(e)))
            .cloned()
            .collect())
    }
}

async fn fetch(fetcher: &Fetcher<MemoryStore, Directory>, locators: &[EntryLocator]) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let callbacks = Callbacks::<Entry>::new(
        SerialQueue::new(),
        |batch| {
            for entry in &batch.items {
                println!("  {} ({})", entry.title, entry.url);
            }
            if let Some(error) = batch.error {
                println!("  partial: {error}");
            }
        },
        move |result| {
            println!("  done: {result:?}");
            let _ = tx.send(());
        },
    );

    fetcher.fetch_entries(locators, false, callbacks);
    let _ = rx.await;
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let clock = Clock::new_tokio();
    let fetcher = Fetcher::builder(clock.clone(), MemoryStore::new(clock), Directory::new())
        .default_ttl(CacheTtl::Short)
        .build();

    let locators = [
        EntryLocator::new("https://example.com/daily.xml"),
        EntryLocator::new("https://example.org/weekly.xml"),
    ];

    println!("first request:");
    fetch(&fetcher, &locators).await;

    println!("second request:");
    fetch(&fetcher, &locators).await;
}
