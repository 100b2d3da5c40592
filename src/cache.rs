//! Board posts cache
//!
//! Maps a board key (`owner:rkey`) to the board's resolved posts, in the order
//! they were loaded, together with the set of pages fetched so far.
//!
//! - Entries are de-duplicated by `(post uri, image index)`.
//! - A page-0 write replaces the head and keeps previously loaded deeper
//!   pages behind it; later pages append.
//! - Freshness is derived from `updated_at`: an entry is stale after
//!   `stale_after` (served while refreshed in the background) and expired
//!   after `expire_after` (refetched before use). Flags are recomputed lazily
//!   by [`PostsCache::check_cache`], never by a timer.
//!
//! The whole map is persisted after every mutation.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{broadcast, RwLock};

use crate::clock::Clock;
use crate::models::{BoardPostsData, PostView, PostWithIndex};
use crate::storage::{encode_map, load_map, Storage};

/// Storage name of the persisted cache
pub const STORE_NAME: &str = "posts";
const STORE_VERSION: u32 = 1;

/// Freshness windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub stale_after: Duration,
    pub expire_after: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5 * 60),
            expire_after: Duration::from_secs(60 * 60),
        }
    }
}

impl CachePolicy {
    /// `(stale, expired)` for an entry written at `updated_at`
    fn classify(&self, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> (bool, bool) {
        let age = now - updated_at;
        let past = |window: Duration| age >= TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        (past(self.stale_after), past(self.expire_after))
    }
}

/// Cached posts of one board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheResult {
    pub board_key: String,
    pub data: BoardPostsData,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    pub stale: bool,
    pub expired: bool,
}

impl CacheResult {
    fn fresh(board_key: &str, data: BoardPostsData, now: DateTime<Utc>) -> Self {
        Self {
            board_key: board_key.to_string(),
            data,
            updated_at: now,
            stale: false,
            expired: false,
        }
    }

    pub fn has_page(&self, page: usize) -> bool {
        self.data.loaded_pages.contains(&page)
    }
}

/// Change notifications for cache subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// An entry was written or its freshness flags changed
    Updated { board_key: String },
    /// An entry was removed
    Removed { board_key: String },
    /// All entries were removed
    Cleared,
}

/// What [`PostsCache::refresh_cache`] did with the fetch result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Fresh data replaced the entry
    Replaced,
    /// No data; the previous entry was kept and marked expired
    Aged,
    /// No data and no previous entry; the entry was removed
    Removed,
    /// The fetch failed; nothing changed
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    /// Background refreshes whose fetch failed (state left untouched)
    pub refresh_failures: u64,
}

pub struct PostsCache {
    boards: RwLock<HashMap<String, CacheResult>>,
    storage: Storage,
    clock: Arc<dyn Clock>,
    policy: CachePolicy,
    events: broadcast::Sender<CacheEvent>,
    refresh_failures: AtomicU64,
}

impl PostsCache {
    /// Create an empty cache
    pub fn new(storage: Storage, clock: Arc<dyn Clock>, policy: CachePolicy) -> Self {
        Self::with_entries(HashMap::new(), storage, clock, policy)
    }

    /// Create a cache hydrated from persisted state
    pub async fn load(storage: Storage, clock: Arc<dyn Clock>, policy: CachePolicy) -> Self {
        let boards = load_map(&storage, STORE_NAME, STORE_VERSION).await;
        tracing::debug!("Loaded {} cached boards", boards.len());
        Self::with_entries(boards, storage, clock, policy)
    }

    fn with_entries(
        boards: HashMap<String, CacheResult>,
        storage: Storage,
        clock: Arc<dyn Clock>,
        policy: CachePolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            boards: RwLock::new(boards),
            storage,
            clock,
            policy,
            events,
            refresh_failures: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Store one page of posts, creating the entry if needed
    pub async fn set_board_posts(
        &self,
        board_key: &str,
        posts: Vec<(u32, PostView)>,
        page: usize,
        page_size: usize,
        total_items: usize,
    ) -> CacheResult {
        let incoming: Vec<PostWithIndex> = posts.into_iter().map(PostWithIndex::from).collect();
        let count = incoming.len();

        let mut boards = self.boards.write().await;
        let data = merge_page(boards.get(board_key).map(|e| &e.data), incoming, page, total_items);
        let entry = CacheResult::fresh(board_key, data, self.clock.now());
        boards.insert(board_key.to_string(), entry.clone());
        self.persist(&boards).await;
        drop(boards);

        tracing::debug!(
            "Cached page {} of {} ({} posts, page size {}, {} total)",
            page,
            board_key,
            count,
            page_size,
            entry.data.posts.len()
        );
        self.notify(CacheEvent::Updated {
            board_key: board_key.to_string(),
        });
        entry
    }

    /// Append a page to an existing entry. Never creates an entry.
    pub async fn append_board_posts(
        &self,
        board_key: &str,
        posts: Vec<(u32, PostView)>,
        page: usize,
    ) -> Option<CacheResult> {
        let mut boards = self.boards.write().await;
        let existing = boards.get(board_key)?;

        let incoming: Vec<PostWithIndex> = posts.into_iter().map(PostWithIndex::from).collect();
        let mut data = existing.data.clone();
        data.posts = append_unique(data.posts, incoming);
        data.loaded_pages.insert(page);

        let entry = CacheResult::fresh(&existing.board_key, data, self.clock.now());
        boards.insert(board_key.to_string(), entry.clone());
        self.persist(&boards).await;
        drop(boards);

        self.notify(CacheEvent::Updated {
            board_key: board_key.to_string(),
        });
        Some(entry)
    }

    /// Posts of one page, `[page * page_size, (page + 1) * page_size)`
    pub async fn get_board_posts(
        &self,
        board_key: &str,
        page: usize,
        page_size: usize,
    ) -> Vec<(u32, PostView)> {
        let boards = self.boards.read().await;
        let Some(entry) = boards.get(board_key) else {
            return Vec::new();
        };
        let start = page.saturating_mul(page_size);
        entry
            .data
            .posts
            .iter()
            .skip(start)
            .take(page_size)
            .map(|p| (p.index, p.post.clone()))
            .collect()
    }

    /// Raw entry, flags as last stored
    pub async fn get(&self, board_key: &str) -> Option<CacheResult> {
        self.boards.read().await.get(board_key).cloned()
    }

    /// Entry with `stale`/`expired` recomputed against the clock.
    /// Changed flags are written back.
    pub async fn check_cache(&self, board_key: &str) -> Option<CacheResult> {
        let now = self.clock.now();
        {
            let boards = self.boards.read().await;
            let entry = boards.get(board_key)?;
            let (stale, expired) = self.policy.classify(entry.updated_at, now);
            if stale == entry.stale && expired == entry.expired {
                return Some(entry.clone());
            }
        }

        // Re-check under the write lock, the entry may have been replaced
        let mut boards = self.boards.write().await;
        let entry = boards.get_mut(board_key)?;
        let (stale, expired) = self.policy.classify(entry.updated_at, now);
        if stale == entry.stale && expired == entry.expired {
            return Some(entry.clone());
        }
        entry.stale = stale;
        entry.expired = expired;
        let updated = entry.clone();
        self.persist(&boards).await;
        drop(boards);

        self.notify(CacheEvent::Updated {
            board_key: board_key.to_string(),
        });
        Some(updated)
    }

    /// Replace an entry with freshly fetched data.
    ///
    /// - `Ok(Some(data))`: entry replaced wholesale, fresh
    /// - `Ok(None)` with `prev`: `prev` kept, marked stale and expired
    /// - `Ok(None)` without `prev`: entry removed
    /// - `Err(_)`: nothing changes; the failure is logged and counted
    pub async fn refresh_cache<F, Fut, E>(
        &self,
        board_key: &str,
        fetch_fn: F,
        prev: Option<CacheResult>,
    ) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<BoardPostsData>, E>>,
        E: Display,
    {
        match fetch_fn().await {
            Ok(Some(data)) => {
                let entry = CacheResult::fresh(board_key, data, self.clock.now());
                let mut boards = self.boards.write().await;
                boards.insert(board_key.to_string(), entry);
                self.persist(&boards).await;
                drop(boards);
                self.notify(CacheEvent::Updated {
                    board_key: board_key.to_string(),
                });
                RefreshOutcome::Replaced
            }
            Ok(None) => match prev {
                Some(prev) => {
                    let aged = CacheResult {
                        stale: true,
                        expired: true,
                        ..prev
                    };
                    let mut boards = self.boards.write().await;
                    boards.insert(board_key.to_string(), aged);
                    self.persist(&boards).await;
                    drop(boards);
                    self.notify(CacheEvent::Updated {
                        board_key: board_key.to_string(),
                    });
                    RefreshOutcome::Aged
                }
                None => {
                    self.clear_entry(board_key).await;
                    RefreshOutcome::Removed
                }
            },
            Err(e) => {
                self.refresh_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Refresh of {} failed, keeping cached posts: {}", board_key, e);
                RefreshOutcome::Failed
            }
        }
    }

    pub async fn has_cached_page(&self, board_key: &str, page: usize) -> bool {
        self.boards
            .read()
            .await
            .get(board_key)
            .map(|e| e.has_page(page))
            .unwrap_or(false)
    }

    /// `ceil(total_items / page_size)`, 0 for a missing entry
    pub async fn get_total_pages(&self, board_key: &str, page_size: usize) -> usize {
        if page_size == 0 {
            return 0;
        }
        self.boards
            .read()
            .await
            .get(board_key)
            .map(|e| e.data.total_items.div_ceil(page_size))
            .unwrap_or(0)
    }

    pub async fn clear_entry(&self, board_key: &str) {
        let mut boards = self.boards.write().await;
        if boards.remove(board_key).is_none() {
            return;
        }
        self.persist(&boards).await;
        drop(boards);
        self.notify(CacheEvent::Removed {
            board_key: board_key.to_string(),
        });
    }

    pub async fn clear(&self) {
        let mut boards = self.boards.write().await;
        boards.clear();
        self.persist(&boards).await;
        drop(boards);
        self.notify(CacheEvent::Cleared);
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.boards.read().await.len(),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
        }
    }

    async fn persist(&self, boards: &HashMap<String, CacheResult>) {
        self.storage
            .save(STORE_NAME, encode_map(boards, STORE_VERSION))
            .await;
    }

    fn notify(&self, event: CacheEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Combine an incoming page with existing board data.
///
/// Page 0 goes in front of the existing posts it does not supersede; other
/// pages append what is not already present. Without existing data the
/// incoming page becomes the whole entry.
pub fn merge_page(
    existing: Option<&BoardPostsData>,
    incoming: Vec<PostWithIndex>,
    page: usize,
    total_items: usize,
) -> BoardPostsData {
    let Some(existing) = existing else {
        return BoardPostsData {
            posts: append_unique(Vec::new(), incoming),
            total_items,
            loaded_pages: [page].into(),
        };
    };

    let posts = if page == 0 {
        let head = append_unique(Vec::new(), incoming);
        let superseded: HashSet<(String, u32)> = head.iter().map(owned_key).collect();
        let rest = existing
            .posts
            .iter()
            .filter(|p| !superseded.contains(&owned_key(p)))
            .cloned();
        head.into_iter().chain(rest).collect()
    } else {
        append_unique(existing.posts.clone(), incoming)
    };

    let mut loaded_pages = existing.loaded_pages.clone();
    loaded_pages.insert(page);

    BoardPostsData {
        posts,
        total_items,
        loaded_pages,
    }
}

/// Append posts whose `(uri, index)` is not yet present, keeping order
fn append_unique(mut posts: Vec<PostWithIndex>, incoming: Vec<PostWithIndex>) -> Vec<PostWithIndex> {
    let mut seen: HashSet<(String, u32)> = posts.iter().map(owned_key).collect();
    for post in incoming {
        if seen.insert(owned_key(&post)) {
            posts.push(post);
        }
    }
    posts
}

fn owned_key(p: &PostWithIndex) -> (String, u32) {
    let (uri, index) = p.key();
    (uri.to_string(), index)
}
