//! Incremental page loading for list views.
//!
//! [`Paginator`] owns a [`PaginationState`] and drives a caller-supplied page
//! fetch function `(page_index, page_size) -> Result<Vec<T>>`. At most one
//! fetch is in flight per paginator; a call made while one is outstanding is
//! dropped, not queued. A page whose length differs from `page_size` marks the
//! end of data.
//!
//! Results that settle after [`Paginator::dispose`] or [`Paginator::reset`]
//! are discarded without touching the state.

use crate::retry::{run_with_backoff, RetryPolicy};
use crate::scroll::{ScrollMetrics, ScrollTrigger};
use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq)]
pub struct PaginationOptions {
    pub page_size: usize,
    /// How close to the end, in viewport lengths, a scroll has to get before
    /// the next page is requested.
    pub scroll_threshold: f64,
    pub enabled: bool,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            page_size: 20,
            scroll_threshold: 0.8,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaginationState<T> {
    pub items: Vec<T>,
    pub current_page: usize,
    pub is_loading_initial: bool,
    pub is_loading_more: bool,
    pub has_more: bool,
    pub last_error: Option<Arc<anyhow::Error>>,
}

impl<T> PaginationState<T> {
    fn with_items(items: Vec<T>) -> Self {
        Self {
            items,
            current_page: 0,
            is_loading_initial: false,
            is_loading_more: false,
            has_more: true,
            last_error: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading_initial || self.is_loading_more
    }

    /// What a list view should render for this state.
    pub fn phase(&self) -> ListPhase {
        if !self.items.is_empty() {
            return ListPhase::Ready {
                loading_more: self.is_loading_more,
            };
        }
        if self.is_loading() {
            ListPhase::InitialLoading
        } else if self.last_error.is_some() {
            ListPhase::Failed
        } else {
            ListPhase::Empty
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPhase {
    InitialLoading,
    Failed,
    Empty,
    Ready { loading_more: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    Disposed,
    InFlight,
    Exhausted,
    AlreadyLoaded,
    NotNearEnd,
}

/// What a paginator operation ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Loaded {
        page: usize,
        count: usize,
        has_more: bool,
    },
    Skipped(SkipReason),
    /// The fetch failed; the error is in `last_error`.
    Failed,
    /// The fetch settled after a reset or dispose and was ignored.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    Refresh,
    More,
}

#[derive(Debug)]
struct Inner<T> {
    state: PaginationState<T>,
    initial_items: Vec<T>,
    enabled: bool,
    alive: bool,
    in_flight: bool,
    // Bumped by reset so fetches started before it are recognised as stale.
    generation: u64,
}

impl<T> Inner<T> {
    fn settle(&mut self) {
        self.in_flight = false;
        self.state.is_loading_initial = false;
        self.state.is_loading_more = false;
    }
}

type SharedInner<T> = Mutex<Inner<T>>;

fn lock<T>(inner: &SharedInner<T>) -> MutexGuard<'_, Inner<T>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight flag if the fetch future is dropped before it settles.
struct InFlightGuard<'a, T> {
    inner: &'a SharedInner<T>,
    generation: u64,
    armed: bool,
}

impl<T> InFlightGuard<'_, T> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T> Drop for InFlightGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = lock(self.inner);
        if inner.alive && inner.generation == self.generation {
            debug!("Page fetch cancelled before settling");
            inner.settle();
        }
    }
}

pub struct Paginator<T, F> {
    fetch: Arc<F>,
    page_size: usize,
    trigger: ScrollTrigger,
    inner: Arc<SharedInner<T>>,
}

impl<T, F> Clone for Paginator<T, F> {
    fn clone(&self) -> Self {
        Self {
            fetch: Arc::clone(&self.fetch),
            page_size: self.page_size,
            trigger: self.trigger,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, F> Paginator<T, F> {
    pub fn new(fetch: F, options: PaginationOptions) -> Self {
        Self {
            fetch: Arc::new(fetch),
            page_size: options.page_size.max(1),
            trigger: ScrollTrigger::new(options.scroll_threshold),
            inner: Arc::new(Mutex::new(Inner {
                state: PaginationState::with_items(Vec::new()),
                initial_items: Vec::new(),
                enabled: options.enabled,
                alive: true,
                in_flight: false,
                generation: 0,
            })),
        }
    }

    /// Construct and run the initial load.
    pub async fn start<Fut>(fetch: F, options: PaginationOptions) -> Self
    where
        F: Fn(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let paginator = Self::new(fetch, options);
        paginator.activate().await;
        paginator
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn trigger(&self) -> ScrollTrigger {
        self.trigger
    }

    pub fn has_more(&self) -> bool {
        lock(&self.inner).state.has_more
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.inner).in_flight
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.inner).enabled
    }

    pub fn is_disposed(&self) -> bool {
        !lock(&self.inner).alive
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).state.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the owner as gone. Fetches still in flight will not touch the
    /// state when they settle, and later calls are skipped.
    pub fn dispose(&self) {
        let mut inner = lock(&self.inner);
        if inner.alive {
            debug!("Paginator disposed");
            inner.alive = false;
        }
    }

    async fn fetch_page<Fut>(&self, kind: FetchKind) -> FetchOutcome
    where
        F: Fn(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        let (page, generation) = {
            let mut inner = lock(&self.inner);

            if !inner.alive {
                return FetchOutcome::Skipped(SkipReason::Disposed);
            }
            if !inner.enabled {
                return FetchOutcome::Skipped(SkipReason::Disabled);
            }
            if inner.in_flight {
                debug!("Page fetch already in flight, skipping");
                return FetchOutcome::Skipped(SkipReason::InFlight);
            }

            let page = match kind {
                FetchKind::More if !inner.state.has_more => {
                    return FetchOutcome::Skipped(SkipReason::Exhausted);
                }
                FetchKind::More => {
                    inner.state.is_loading_more = true;
                    inner.state.current_page
                }
                FetchKind::Refresh => {
                    inner.state.has_more = true;
                    inner.state.last_error = None;
                    inner.state.is_loading_initial = true;
                    0
                }
            };
            inner.in_flight = true;
            (page, inner.generation)
        };

        let guard = InFlightGuard {
            inner: &self.inner,
            generation,
            armed: true,
        };

        debug!("Fetching page {} (size {})", page, self.page_size);
        let result = (self.fetch)(page, self.page_size).await;
        guard.disarm();

        let mut inner = lock(&self.inner);
        if !inner.alive || inner.generation != generation {
            debug!("Discarding stale result for page {}", page);
            return FetchOutcome::Discarded;
        }
        inner.settle();

        match result {
            Ok(items) => {
                let count = items.len();
                let has_more = count == self.page_size;
                match kind {
                    FetchKind::Refresh => {
                        inner.state.items = items;
                        inner.state.current_page = 1;
                    }
                    FetchKind::More => {
                        inner.state.items.extend(items);
                        inner.state.current_page = page + 1;
                    }
                }
                inner.state.has_more = has_more;
                inner.state.last_error = None;
                debug!(
                    "Loaded page {}: {} items, has_more={}",
                    page, count, has_more
                );
                FetchOutcome::Loaded {
                    page,
                    count,
                    has_more,
                }
            }
            Err(err) => {
                error!("Error loading page {}: {:#}", page, err);
                inner.state.last_error = Some(Arc::new(err));
                FetchOutcome::Failed
            }
        }
    }

    /// Fetch the page at the cursor and append it.
    pub async fn load_more<Fut>(&self) -> FetchOutcome
    where
        F: Fn(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        self.fetch_page(FetchKind::More).await
    }

    /// Fetch page 0 and replace the items with it.
    pub async fn refresh<Fut>(&self) -> FetchOutcome
    where
        F: Fn(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        self.fetch_page(FetchKind::Refresh).await
    }

    /// Initial load: refresh if enabled and nothing has been loaded yet.
    pub async fn activate<Fut>(&self) -> FetchOutcome
    where
        F: Fn(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        if !self.is_empty() {
            return FetchOutcome::Skipped(SkipReason::AlreadyLoaded);
        }
        self.refresh().await
    }

    pub async fn set_enabled<Fut>(&self, enabled: bool) -> FetchOutcome
    where
        F: Fn(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        lock(&self.inner).enabled = enabled;
        if !enabled {
            return FetchOutcome::Skipped(SkipReason::Disabled);
        }
        self.activate().await
    }

    /// The list reported it reached its end.
    pub async fn on_end_reached<Fut>(&self) -> FetchOutcome
    where
        F: Fn(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        self.load_more().await
    }

    /// Load the next page when `metrics` says the viewport is near the end.
    pub async fn on_scroll<Fut>(&self, metrics: ScrollMetrics) -> FetchOutcome
    where
        F: Fn(usize, usize) -> Fut,
        Fut: Future<Output = Result<Vec<T>>>,
    {
        if !self.trigger.should_load(&metrics) {
            return FetchOutcome::Skipped(SkipReason::NotNearEnd);
        }
        self.load_more().await
    }
}

impl<T: Clone, F> Paginator<T, F> {
    /// Seed the list. [`Paginator::reset`] restores these items.
    pub fn with_initial_items(self, items: Vec<T>) -> Self {
        {
            let mut inner = lock(&self.inner);
            inner.state.items = items.clone();
            inner.initial_items = items;
        }
        self
    }

    pub fn snapshot(&self) -> PaginationState<T> {
        lock(&self.inner).state.clone()
    }

    pub fn items(&self) -> Vec<T> {
        lock(&self.inner).state.items.clone()
    }

    /// Back to the initial state without fetching anything. A fetch still in
    /// flight is left to finish and its result is dropped.
    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        inner.state = PaginationState::with_items(inner.initial_items.clone());
        inner.in_flight = false;
        inner.generation = inner.generation.wrapping_add(1);
        debug!("Paginator reset");
    }
}

pub type BoxedPage<T> = Pin<Box<dyn Future<Output = Result<Vec<T>>> + Send>>;

pub type BoxedFetch<T> = Box<dyn Fn(usize, usize) -> BoxedPage<T> + Send + Sync>;

/// Wrap a page fetch function so each page request runs under `policy`.
pub fn retrying_fetch<T, F, Fut>(
    fetch: F,
    policy: RetryPolicy,
) -> impl Fn(usize, usize) -> BoxedPage<T> + Send + Sync + 'static
where
    F: Fn(usize, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    T: Send + 'static,
{
    let fetch = Arc::new(fetch);
    move |page, page_size| -> BoxedPage<T> {
        let fetch = Arc::clone(&fetch);
        let policy = policy.clone();
        Box::pin(async move {
            run_with_backoff(|| fetch(page, page_size), &policy)
                .await
                .into_result()
        })
    }
}

impl<T: Send + 'static> Paginator<T, BoxedFetch<T>> {
    /// Paginator whose page requests each run under `policy`.
    pub fn with_retry<F, Fut>(fetch: F, policy: RetryPolicy, options: PaginationOptions) -> Self
    where
        F: Fn(usize, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    {
        Self::new(Box::new(retrying_fetch(fetch, policy)), options)
    }
}
