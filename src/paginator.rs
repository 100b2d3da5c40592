//! Board page loading on top of [`PostsCache`]
//!
//! A [`BoardPaginator`] owns the view of one board: which page the reader has
//! reached, whether a load is running, and the last user-visible error.
//!
//! - Page 0 is fetched on first use, when the cached head is missing, and when
//!   the cache entry has expired. A stale entry is served as-is while page 0
//!   is refreshed in the background.
//! - Deeper pages load one at a time through [`BoardPaginator::load_more`],
//!   only after page 0 is in the cache.
//! - Page count comes from the live item list, so newly saved items extend
//!   pagination without a refetch.
//!
//! Loading flags are checked and set under one mutex before any await, so at
//! most one fetch per paginator is in flight.

use futures::future;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::task::JoinHandle;

use crate::aturi::{canonical_post_uri, image_index};
use crate::cache::{merge_page, PostsCache, RefreshOutcome};
use crate::client::PostSource;
use crate::config::{PaginationConfig, MAX_LOOKUP_BATCH};
use crate::error::{Error, Result};
use crate::models::{BoardItem, BoardPostsData, PostView, PostWithIndex};

/// Result of a load request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A fetch ran and its result was written to the cache
    Loaded,
    /// The page was already cached and not expired; no fetch ran
    Cached,
    /// Nothing to do, or another load is in flight
    Skipped,
    /// The fetch failed; cache and page state are unchanged
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    Initial,
    More,
    Background,
}

struct PagerState {
    items: Arc<Vec<(String, BoardItem)>>,
    enabled: bool,
    current_page: usize,
    is_loading: bool,
    is_loading_more: bool,
    is_refreshing: bool,
    error: Option<Arc<Error>>,
}

impl PagerState {
    fn busy(&self) -> bool {
        self.is_loading || self.is_loading_more || self.is_refreshing
    }

    fn flag(&mut self, kind: LoadKind) -> &mut bool {
        match kind {
            LoadKind::Initial => &mut self.is_loading,
            LoadKind::More => &mut self.is_loading_more,
            LoadKind::Background => &mut self.is_refreshing,
        }
    }
}

/// Clears the loading flag it was created for, also when the load is dropped
struct LoadGuard<'a> {
    state: &'a Mutex<PagerState>,
    kind: LoadKind,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state.flag(self.kind) = false;
    }
}

/// Read-only view of the paginator state
#[derive(Debug, Clone)]
pub struct PagerStatus {
    pub current_page: usize,
    pub total_pages: usize,
    pub has_more: bool,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub error: Option<Arc<Error>>,
}

pub struct BoardPaginator {
    board_key: String,
    cache: Arc<PostsCache>,
    source: Arc<dyn PostSource>,
    page_size: usize,
    batch_size: usize,
    state: Mutex<PagerState>,
}

impl BoardPaginator {
    pub fn new(
        board_key: impl Into<String>,
        items: Vec<(String, BoardItem)>,
        cache: Arc<PostsCache>,
        source: Arc<dyn PostSource>,
        config: &PaginationConfig,
    ) -> Self {
        Self {
            board_key: board_key.into(),
            cache,
            source,
            page_size: config.page_size.max(1),
            batch_size: config.lookup_batch_size.clamp(1, MAX_LOOKUP_BATCH),
            state: Mutex::new(PagerState {
                items: Arc::new(items),
                enabled: true,
                current_page: 0,
                is_loading: false,
                is_loading_more: false,
                is_refreshing: false,
                error: None,
            }),
        }
    }

    pub fn board_key(&self) -> &str {
        &self.board_key
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn lock(&self) -> MutexGuard<'_, PagerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the board's item list (items saved or removed since creation)
    pub fn set_items(&self, items: Vec<(String, BoardItem)>) {
        self.lock().items = Arc::new(items);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    pub fn item_count(&self) -> usize {
        self.lock().items.len()
    }

    pub fn current_page(&self) -> usize {
        self.lock().current_page
    }

    pub fn total_pages(&self) -> usize {
        self.lock().items.len().div_ceil(self.page_size)
    }

    pub fn has_more(&self) -> bool {
        let state = self.lock();
        state.current_page + 1 < state.items.len().div_ceil(self.page_size)
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    pub fn is_loading_more(&self) -> bool {
        self.lock().is_loading_more
    }

    /// Last user-visible load error, cleared by a successful load or `refresh`
    pub fn error(&self) -> Option<Arc<Error>> {
        self.lock().error.clone()
    }

    pub fn status(&self) -> PagerStatus {
        let state = self.lock();
        let total_pages = state.items.len().div_ceil(self.page_size);
        PagerStatus {
            current_page: state.current_page,
            total_pages,
            has_more: state.current_page + 1 < total_pages,
            is_loading: state.is_loading,
            is_loading_more: state.is_loading_more,
            error: state.error.clone(),
        }
    }

    /// Whether the cached head is past its soft freshness window
    pub async fn is_stale(&self) -> bool {
        self.cache
            .check_cache(&self.board_key)
            .await
            .map(|e| e.stale)
            .unwrap_or(false)
    }

    /// Cached posts of pages `0..=current_page`
    pub async fn posts(&self) -> Vec<(u32, PostView)> {
        let end = (self.current_page() + 1).saturating_mul(self.page_size);
        let Some(entry) = self.cache.get(&self.board_key).await else {
            return Vec::new();
        };
        entry
            .data
            .posts
            .iter()
            .take(end)
            .map(|p| (p.index, p.post.clone()))
            .collect()
    }

    /// Mark a load of `kind` as running, unless disabled, empty or busy
    fn begin(&self, kind: LoadKind) -> Option<LoadGuard<'_>> {
        let mut state = self.lock();
        if !state.enabled || state.items.is_empty() || state.busy() {
            return None;
        }
        *state.flag(kind) = true;
        Some(LoadGuard {
            state: &self.state,
            kind,
        })
    }

    fn record_error(&self, page: usize, err: Error) {
        tracing::warn!(
            transient = err.is_transient(),
            "Error loading page {} of {}: {}",
            page,
            self.board_key,
            err
        );
        self.lock().error = Some(Arc::new(err));
    }

    /// Load page 0 if it is missing from the cache or expired
    pub async fn load_initial(&self) -> LoadOutcome {
        let needs_load = match self.cache.check_cache(&self.board_key).await {
            None => true,
            Some(entry) => entry.expired || !entry.has_page(0),
        };
        if !needs_load {
            return LoadOutcome::Skipped;
        }

        let Some(_guard) = self.begin(LoadKind::Initial) else {
            return LoadOutcome::Skipped;
        };
        self.lock().current_page = 0;
        self.load_head().await
    }

    /// Load the page after `current_page`
    pub async fn load_more(&self) -> LoadOutcome {
        if !self.cache.has_cached_page(&self.board_key, 0).await || !self.has_more() {
            return LoadOutcome::Skipped;
        }
        let Some(_guard) = self.begin(LoadKind::More) else {
            return LoadOutcome::Skipped;
        };

        let next = {
            let mut state = self.lock();
            state.error = None;
            state.current_page + 1
        };

        let cached = self
            .cache
            .check_cache(&self.board_key)
            .await
            .is_some_and(|entry| entry.has_page(next) && !entry.expired);
        if cached {
            tracing::debug!("Page {} of {} served from cache", next, self.board_key);
            self.lock().current_page = next;
            return LoadOutcome::Cached;
        }

        match self.fetch_page(next).await {
            Ok(Some(data)) => {
                let posts: Vec<(u32, PostView)> = data.posts.into_iter().map(Into::into).collect();
                if !posts.is_empty()
                    && self
                        .cache
                        .append_board_posts(&self.board_key, posts, next)
                        .await
                        .is_none()
                {
                    tracing::debug!("Cache entry for {} vanished before page {} was stored", self.board_key, next);
                    return LoadOutcome::Skipped;
                }
                self.lock().current_page = next;
                LoadOutcome::Loaded
            }
            Ok(None) => {
                self.lock().current_page = next;
                LoadOutcome::Loaded
            }
            Err(e) => {
                self.record_error(next, e);
                LoadOutcome::Failed
            }
        }
    }

    /// Go back to page 0 and refetch it, bypassing the cache
    pub async fn refresh(&self) -> LoadOutcome {
        let Some(_guard) = self.begin(LoadKind::Initial) else {
            return LoadOutcome::Skipped;
        };
        {
            let mut state = self.lock();
            state.current_page = 0;
            state.error = None;
        }
        self.load_head().await
    }

    /// User-visible page-0 load; failures land in `error()`
    async fn load_head(&self) -> LoadOutcome {
        let prev = self.cache.check_cache(&self.board_key).await;
        self.lock().error = None;

        match self.fetch_page(0).await {
            Ok(Some(data)) => {
                let posts: Vec<(u32, PostView)> = data.posts.into_iter().map(Into::into).collect();
                self.cache
                    .set_board_posts(&self.board_key, posts, 0, self.page_size, data.total_items)
                    .await;
                LoadOutcome::Loaded
            }
            Ok(None) => {
                self.cache
                    .refresh_cache(&self.board_key, || future::ready(Ok::<_, Error>(None)), prev)
                    .await;
                LoadOutcome::Loaded
            }
            Err(e) => {
                self.record_error(0, e);
                LoadOutcome::Failed
            }
        }
    }

    /// Refresh page 0 in place when the cache reports it stale.
    /// Failures are absorbed by the cache and never reach `error()`.
    pub async fn refresh_if_stale(&self) -> LoadOutcome {
        let Some(entry) = self.cache.check_cache(&self.board_key).await else {
            return LoadOutcome::Skipped;
        };
        if !entry.stale {
            return LoadOutcome::Skipped;
        }
        let Some(_guard) = self.begin(LoadKind::Background) else {
            return LoadOutcome::Skipped;
        };

        match self
            .cache
            .refresh_cache(&self.board_key, || self.fetch_merged_head(), Some(entry))
            .await
        {
            RefreshOutcome::Failed => LoadOutcome::Failed,
            _ => LoadOutcome::Loaded,
        }
    }

    /// Page 0 merged in front of the deeper pages already cached
    async fn fetch_merged_head(&self) -> Result<Option<BoardPostsData>> {
        let Some(head) = self.fetch_page(0).await? else {
            return Ok(None);
        };
        let current = self.cache.get(&self.board_key).await;
        Ok(Some(merge_page(
            current.as_ref().map(|e| &e.data),
            head.posts,
            0,
            head.total_items,
        )))
    }

    /// Run [`refresh_if_stale`](Self::refresh_if_stale) on a background task
    pub fn spawn_background_refresh(self: &Arc<Self>) -> JoinHandle<LoadOutcome> {
        let pager = Arc::clone(self);
        tokio::spawn(async move { pager.refresh_if_stale().await })
    }

    /// Resolve the posts of one page of board items.
    ///
    /// Saved URLs are reduced to their post URI and de-duplicated before the
    /// lookup, which runs in batches of at most 25. The result is expanded back
    /// to one entry per item with the item's image index; items whose post
    /// could not be resolved are left out. `None` when the page is empty.
    pub async fn fetch_page(&self, page: usize) -> Result<Option<BoardPostsData>> {
        let items = Arc::clone(&self.lock().items);
        let start = page.saturating_mul(self.page_size);
        if start >= items.len() {
            return Ok(None);
        }
        let end = start.saturating_add(self.page_size).min(items.len());
        let page_items = &items[start..end];

        let mut seen = HashSet::new();
        let unique: Vec<String> = page_items
            .iter()
            .map(|(_, item)| canonical_post_uri(&item.url))
            .filter(|uri| seen.insert(*uri))
            .map(str::to_string)
            .collect();

        tracing::debug!(
            "Fetching page {} of {}: {} items ({} unique posts)",
            page,
            self.board_key,
            page_items.len(),
            unique.len()
        );

        let mut by_uri: HashMap<String, PostView> = HashMap::with_capacity(unique.len());
        for batch in unique.chunks(self.batch_size) {
            for post in self.source.get_posts(batch).await? {
                by_uri.insert(post.uri.clone(), post);
            }
        }

        let posts = page_items
            .iter()
            .filter_map(|(_, item)| {
                let post = by_uri.get(canonical_post_uri(&item.url))?;
                Some(PostWithIndex {
                    post: post.clone(),
                    index: image_index(&item.url),
                })
            })
            .collect();

        Ok(Some(BoardPostsData {
            posts,
            total_items: items.len(),
            loaded_pages: [page].into(),
        }))
    }
}
