// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use freshet_store::{EntryLocator, StoreError};
use thiserror::Error;

use crate::ServiceError;

/// Why a fetch failed, or what went wrong alongside partial results.
///
/// The same type travels two ways. As the result of a request's completion
/// callback it means the request produced nothing. As the error of a
/// [`Batch`][crate::Batch] it is a secondary signal next to the delivered items.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The remote service is unreachable and nothing cached could stand in.
    #[error("offline: the remote service is unreachable")]
    Offline,

    /// The remote service failed.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(#[source] Arc<ServiceError>),

    /// Entries referenced feeds that are not cached; these were not written.
    #[error("feeds not cached: {}", .0.join(", "))]
    FeedNotCached(Vec<String>),

    /// Some locators resolved to nothing, neither from the cache nor remotely.
    #[error("{} requested entries could not be found", .0.len())]
    MissingEntries(Vec<EntryLocator>),

    /// The request was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The store failed.
    #[error("store failure: {0}")]
    Store(#[source] Arc<StoreError>),
}

impl FetchError {
    /// Returns `true` for [`FetchError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<StoreError> for FetchError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::FeedNotCached { urls } => Self::FeedNotCached(urls),
            other => Self::Store(Arc::new(other)),
        }
    }
}

impl From<ServiceError> for FetchError {
    fn from(error: ServiceError) -> Self {
        Self::ServiceUnavailable(Arc::new(error))
    }
}
