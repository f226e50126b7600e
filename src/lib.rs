//! # query-cache
//!
//! An async data-fetching cache: keyed entries with refcounting, staleness
//! and structural sharing; an observer layer that batches notifications and
//! drives background refetches (focus/reconnect/interval); and a retry
//! engine with cancellation, pausable backoff and resumable mutations.
//! Modeled on the query-cache shape popularized by TanStack Query, minus any
//! UI framework binding — this crate only manages the cache and the async
//! plumbing around it.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::FutureExt;
//! use query_cache::{Client, ClientConfig, Fetcher, IntoKey};
//!
//! # async fn run() -> Result<(), query_cache::QueryError> {
//! let client = Client::new(ClientConfig::default());
//!
//! let fetch_user: Fetcher<String> = Arc::new(|_ctx| {
//!     async { Ok("jane".to_string()) }.boxed()
//! });
//!
//! let user = client.fetch(["users", "1"].into_key(), fetch_user, None).await?;
//! assert_eq!(*user, "jane");
//! # Ok(())
//! # }
//! ```
//!
//! Mounted UIs subscribe through [`observer::EntryObserver`] (or
//! [`observer::multi::MultiEntryObserver`] /
//! [`observer::infinite::InfiniteEntryObserver`] for list/pagination cases)
//! rather than polling [`Client`] directly; [`Client`] itself is the
//! framework-agnostic facade those observers and one-off `fetch`/`mutate`
//! callers both sit on top of.

pub mod cancel;
pub mod client;
pub mod entry;
pub mod error;
pub mod focus;
pub mod hydrate;
pub mod key;
pub mod logger;
pub mod mutation;
pub mod notify;
pub mod observer;
pub mod online;
pub mod optimistic;
pub mod persistence;
pub mod retry;
pub mod sharing;
pub mod tracker;

pub use cancel::CancelToken;
pub use client::{
    CancelOptions, Client, ClientConfig, InvalidateOptions, RefetchOptions, RefetchType, ResetOptions,
};
pub use entry::{Entry, EntryDyn, EntryOptions, EntryState, FetchContext, FetchStatus, Fetcher, Status};
pub use error::{ErrorSeverity, QueryError};
pub use focus::FocusTracker;
pub use hydrate::{dehydrate, hydrate_entries, persist, restore, DehydrateOptions, DehydratedEntry, DehydratedMutation, DehydratedState};
pub use key::{IntoKey, Key, KeyHash};
pub use logger::{default_logger, Logger};
pub use mutation::{Mutation, MutationDyn, MutationFn, MutationId, MutationOptions, MutationState, MutationStatus};
pub use observer::{EntryObserver, EntryResult, ObserverOptions, Selector};
pub use online::OnlineTracker;
pub use optimistic::OptimisticManager;
pub use persistence::{MemoryBackend, StorageBackend};
pub use retry::{NetworkMode, Retry, RetryConfig, RetryDelay, Retryer};
pub use sharing::{share, share_arc, SharingMode};
