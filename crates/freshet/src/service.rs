// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The contract of the remote feed service.

use freshet_store::{Entry, EntryLocator, Feed};

use crate::CachePolicy;

/// An error from the remote service.
///
/// This is an opaque error type that can wrap any underlying error from a service
/// implementation. Use [`std::error::Error::source()`] to access the underlying
/// cause if needed.
///
/// # Example
///
/// ```
/// use freshet::ServiceError;
///
/// let error = ServiceError::from_message("503 Service Unavailable");
/// assert!(error.to_string().contains("503"));
/// ```
#[ohno::error]
pub struct ServiceError {}

impl ServiceError {
    /// Creates a new error from any type that can be converted to an error.
    pub fn from_message(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(cause)
    }
}

/// A remote service that resolves locators to feeds and entries.
///
/// Implementations own the transport and the parsing of payloads into entities.
/// Returned feeds and entries set `original_url` when the service followed a
/// redirect, so callers can reconcile their caches.
///
/// Futures returned by this trait are dropped when the request is cancelled;
/// implementations should abort outstanding I/O on drop.
pub trait FeedService: Send + Sync + 'static {
    /// Returns `false` if the service is known to be unreachable right now.
    fn is_reachable(&self) -> bool {
        true
    }

    /// Fetches the feeds the locators name.
    fn feeds(&self, locators: &[EntryLocator], policy: CachePolicy) -> impl Future<Output = Result<Vec<Feed>, ServiceError>> + Send;

    /// Fetches the entries within the locators.
    ///
    /// `reload` asks the service to bypass its own caches.
    fn entries(&self, locators: &[EntryLocator], reload: bool) -> impl Future<Output = Result<Vec<Entry>, ServiceError>> + Send;
}
