// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for store operations.

use thiserror::Error;

/// An error from a [`FeedStore`][crate::FeedStore] operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Entries referenced feeds that are not in the store, or a feed was looked up
    /// that is not in the store.
    ///
    /// Writes that fail with this error are partial: entries of known feeds have
    /// been written, the URLs listed here are the offending ones.
    #[error("feeds not cached: {}", urls.join(", "))]
    FeedNotCached {
        /// URLs of the feeds that are missing.
        urls: Vec<String>,
    },

    /// We are forwarding an error of unknown type from the underlying storage engine.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Creates an error for feeds missing from the store.
    pub fn feed_not_cached<I, U>(urls: I) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        Self::FeedNotCached {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an opaque storage error from any message or error.
    pub fn other(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(cause.into())
    }
}

/// A specialized [`Result`] type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(StoreError: Send, Sync);
    }

    #[test]
    fn feed_not_cached_lists_urls() {
        let error = StoreError::feed_not_cached(["http://a", "http://b"]);
        assert_eq!(error.to_string(), "feeds not cached: http://a, http://b");

        match error {
            StoreError::FeedNotCached { urls } => assert_eq!(urls, vec!["http://a", "http://b"]),
            StoreError::Other(_) => panic!("unexpected error variant"),
        }
    }

    #[test]
    fn other_is_transparent() {
        let error = StoreError::other("disk full");
        assert_eq!(error.to_string(), "disk full");
    }
}
