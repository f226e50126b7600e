//! `InfiniteEntryObserver<P>`: paginated fetching over a single cache entry
//! (§4.6). Pages accumulate in one `Entry<InfiniteData<P>>`; `fetchNextPage`/
//! `fetchPreviousPage` compute their page param from the accumulated data via
//! caller-supplied `getNextPageParam`/`getPreviousPageParam` callbacks.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::entry::{Entry, EntryOptions, Fetcher};
use crate::error::QueryError;
use crate::focus::FocusTracker;
use crate::key::Key;
use crate::observer::{EntryObserver, EntryResult, ObserverOptions};
use crate::online::OnlineTracker;

#[derive(Clone, Serialize, Deserialize)]
pub struct Page<P> {
    pub data: P,
    pub param: Value,
}

/// The accumulated set of fetched pages, stored as the entry's `data` (§4.6).
#[derive(Clone, Serialize, Deserialize)]
pub struct InfiniteData<P> {
    pub pages: Vec<Page<P>>,
}

impl<P: PartialEq> PartialEq for InfiniteData<P> {
    fn eq(&self, other: &Self) -> bool {
        self.pages.len() == other.pages.len()
            && self
                .pages
                .iter()
                .zip(other.pages.iter())
                .all(|(a, b)| a.data == b.data && a.param == b.param)
    }
}

impl<P> Default for InfiniteData<P> {
    fn default() -> Self {
        Self { pages: Vec::new() }
    }
}

pub type PageParamFn<P> = Arc<dyn Fn(&InfiniteData<P>) -> Option<Value> + Send + Sync>;
pub type PageFetcher<P> = Arc<dyn Fn(Value, CancelToken) -> BoxFuture<'static, Result<P, QueryError>> + Send + Sync>;

pub struct InfiniteEntryObserver<P> {
    observer: EntryObserver<InfiniteData<P>>,
    entry: Entry<InfiniteData<P>>,
    page_fetcher: PageFetcher<P>,
    initial_param: Value,
    get_next_page_param: PageParamFn<P>,
    get_previous_page_param: Option<PageParamFn<P>>,
}

impl<P: Send + Sync + PartialEq + Clone + Serialize + serde::de::DeserializeOwned + 'static> InfiniteEntryObserver<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entry: Entry<InfiniteData<P>>,
        page_fetcher: PageFetcher<P>,
        initial_param: Value,
        get_next_page_param: PageParamFn<P>,
        get_previous_page_param: Option<PageParamFn<P>>,
        options: ObserverOptions<InfiniteData<P>>,
    ) -> Self {
        let initial_param_for_fetch = initial_param.clone();
        let page_fetcher_for_entry = page_fetcher.clone();
        let entry_for_fetch = entry.clone();
        let entry_fetcher: Fetcher<InfiniteData<P>> = Arc::new(move |ctx| {
            let page_fetcher = page_fetcher_for_entry.clone();
            let initial_param = initial_param_for_fetch.clone();
            let existing = entry_for_fetch.state().data;
            Box::pin(async move {
                // Refetches every page already accumulated, in order, rather
                // than collapsing back to just the first page, so automatic
                // refetches (focus/reconnect/interval) don't drop pages the
                // caller already paged through.
                let params: Vec<Value> = match &existing {
                    Some(data) if !data.pages.is_empty() => data.pages.iter().map(|p| p.param.clone()).collect(),
                    _ => vec![initial_param],
                };
                let mut pages = Vec::with_capacity(params.len());
                for param in params {
                    let data = page_fetcher(param.clone(), ctx.cancel.clone()).await?;
                    pages.push(Page { data, param });
                }
                Ok(InfiniteData { pages })
            })
        });

        Self {
            observer: EntryObserver::new(entry.clone(), entry_fetcher, options),
            entry,
            page_fetcher,
            initial_param,
            get_next_page_param,
            get_previous_page_param,
        }
    }

    pub fn key(&self) -> &Key {
        self.observer.key()
    }

    pub fn subscribe(
        &self,
        focus: &FocusTracker,
        online: &OnlineTracker,
        listener: impl Fn(&EntryResult<InfiniteData<P>>) + Send + Sync + 'static,
    ) -> u64 {
        self.observer.subscribe(focus, online, listener)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.observer.unsubscribe(id)
    }

    /// Runs the underlying entry fetcher once, fetching the first page (or
    /// re-fetching every accumulated page, if any already exist). Used by
    /// `Client::fetch_infinite`/`prefetch_infinite`, which have no mounted
    /// observer to trigger a fetch on their behalf (§4.6, §6).
    pub async fn initial_fetch(&self) -> Result<Arc<InfiniteData<P>>, QueryError> {
        self.observer.refetch().await
    }

    pub fn get_current_result(&self) -> EntryResult<InfiniteData<P>> {
        self.observer.get_current_result()
    }

    pub fn has_next_page(&self) -> bool {
        match self.entry.state().data {
            Some(data) => (self.get_next_page_param)(&data).is_some(),
            None => true,
        }
    }

    pub fn has_previous_page(&self) -> bool {
        match (&self.get_previous_page_param, self.entry.state().data) {
            (Some(get_param), Some(data)) => get_param(&data).is_some(),
            _ => false,
        }
    }

    /// Fetches and appends the next page, if `getNextPageParam` yields one.
    pub async fn fetch_next_page(&self) -> Result<(), QueryError> {
        let current = self.entry.state().data.unwrap_or_default();
        let Some(param) = (self.get_next_page_param)(&current) else {
            return Ok(());
        };
        let cancel = CancelToken::new();
        let page_data = (self.page_fetcher)(param.clone(), cancel).await?;
        let mut pages = current.pages.clone();
        pages.push(Page { data: page_data, param });
        self.entry.set_data(InfiniteData { pages });
        Ok(())
    }

    /// Fetches and prepends the previous page, if `getPreviousPageParam` yields one.
    pub async fn fetch_previous_page(&self) -> Result<(), QueryError> {
        let Some(get_param) = &self.get_previous_page_param else {
            return Ok(());
        };
        let current = self.entry.state().data.unwrap_or_default();
        let Some(param) = get_param(&current) else {
            return Ok(());
        };
        let cancel = CancelToken::new();
        let page_data = (self.page_fetcher)(param.clone(), cancel).await?;
        let mut pages = vec![Page { data: page_data, param }];
        pages.extend(current.pages.clone());
        self.entry.set_data(InfiniteData { pages });
        Ok(())
    }

    /// Re-fetches every accumulated page from the start, in order (§4.6
    /// `refetch` semantics for infinite queries).
    pub async fn refetch_all(&self) -> Result<(), QueryError> {
        self.refetch_selective(|_, _| true).await
    }

    /// Re-fetches accumulated pages selectively: `should_refetch(page, index)`
    /// decides, per page, whether to re-run the fetch or keep the cached page
    /// as-is (§4.6 `refetchPage`, default `true` for every page).
    pub async fn refetch_selective(&self, should_refetch: impl Fn(&P, usize) -> bool) -> Result<(), QueryError> {
        let current = self.entry.state().data.unwrap_or_default();
        if current.pages.is_empty() {
            let cancel = CancelToken::new();
            let data = (self.page_fetcher)(self.initial_param.clone(), cancel).await?;
            self.entry.set_data(InfiniteData {
                pages: vec![Page {
                    data,
                    param: self.initial_param.clone(),
                }],
            });
            return Ok(());
        }
        let mut pages = Vec::with_capacity(current.pages.len());
        for (index, page) in current.pages.iter().enumerate() {
            if should_refetch(&page.data, index) {
                let cancel = CancelToken::new();
                let data = (self.page_fetcher)(page.param.clone(), cancel).await?;
                pages.push(Page {
                    data,
                    param: page.param.clone(),
                });
            } else {
                pages.push(page.clone());
            }
        }
        self.entry.set_data(InfiniteData { pages });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::IntoKey;
    use crate::logger::default_logger;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn make_entry() -> Entry<InfiniteData<Vec<u32>>> {
        Entry::new(
            "items".into_key(),
            EntryOptions::default(),
            Arc::new(OnlineTracker::new()),
            default_logger(),
            Arc::new(|_| {}),
        )
    }

    #[tokio::test]
    async fn accumulates_pages_and_reports_next_page_availability() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let page_fetcher: PageFetcher<Vec<u32>> = Arc::new(move |param, _cancel| {
            let calls = calls2.clone();
            Box::pin(async move {
                let page = param.as_u64().unwrap_or(0) as u32;
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![page * 10, page * 10 + 1])
            })
        });
        let get_next: PageParamFn<Vec<u32>> = Arc::new(|data| {
            if data.pages.len() >= 3 {
                None
            } else {
                Some(json!(data.pages.len() as u64))
            }
        });

        let observer = InfiniteEntryObserver::new(
            make_entry(),
            page_fetcher,
            json!(0),
            get_next,
            None,
            ObserverOptions::default(),
        );

        let focus = FocusTracker::new();
        let online = OnlineTracker::new();
        let _id = observer.subscribe(&focus, &online, |_| {});
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(observer.has_next_page());

        observer.fetch_next_page().await.unwrap();
        observer.fetch_next_page().await.unwrap();
        assert!(!observer.has_next_page());
        assert_eq!(observer.get_current_result().data.unwrap().pages.len(), 3);
    }
}
