pub mod aturi;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod paginator;
pub mod records;
pub mod storage;
pub mod stores;

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::aturi::AtUri;
use crate::cache::{CacheEvent, PostsCache};
use crate::client::{PostSource, XrpcClient};
use crate::clock::SystemClock;
use crate::config::Config;
use crate::models::board_key;
use crate::paginator::{BoardPaginator, LoadOutcome};
use crate::storage::Storage;
use crate::stores::{ActorProfilesStore, BoardItemsStore, BoardsStore, RecentBoards};

/// Load `owner`'s board `board_rkey` page by page and print a JSON summary
pub async fn run(config: Config, owner: &str, board_rkey: &str) -> Result<()> {
    let storage = Storage::from_config(&config.storage).await?;
    let cache = Arc::new(
        PostsCache::load(storage.clone(), Arc::new(SystemClock), config.cache.policy()).await,
    );
    log_cache_events(&cache);

    let client = XrpcClient::new(&config.client)?;
    tracing::info!("Using XRPC service {}", client.service_url());
    let source: Arc<dyn PostSource> = Arc::new(client);

    let boards = BoardsStore::load(storage.clone()).await;
    let board_items = BoardItemsStore::load(storage.clone()).await;
    let recent = RecentBoards::load(storage.clone()).await;
    let profiles = ActorProfilesStore::load(storage).await;

    let (listed_boards, listed_items) = tokio::try_join!(
        records::load_boards(source.as_ref(), owner, &config.records),
        records::load_board_items(source.as_ref(), owner, &config.records),
    )
    .with_context(|| format!("Failed to list records of {}", owner))?;
    tracing::info!(
        "Loaded {} boards and {} board items of {}",
        listed_boards.len(),
        listed_items.len(),
        owner
    );
    boards.replace_owner(owner, listed_boards).await;
    board_items.replace_all(listed_items).await;

    let board = boards
        .get_board(owner, board_rkey)
        .await
        .ok_or_else(|| anyhow!("Board {} not found in {}", board_rkey, owner))?;
    let key = board_key(owner, board_rkey);
    recent.add(&key).await;

    let items = board_items.items_in_board(owner, board_rkey).await;
    tracing::info!("Board '{}' has {} items", board.name, items.len());

    let pager = Arc::new(BoardPaginator::new(
        key.clone(),
        items,
        cache.clone(),
        source.clone(),
        &config.pagination,
    ));

    if pager.load_initial().await == LoadOutcome::Skipped && pager.is_stale().await {
        tracing::info!("Cached posts of {} are stale, refreshing", key);
        pager.spawn_background_refresh().await?;
    }
    while pager.has_more() {
        match pager.load_more().await {
            LoadOutcome::Loaded | LoadOutcome::Cached => {}
            LoadOutcome::Skipped | LoadOutcome::Failed => break,
        }
    }
    if let Some(err) = pager.error() {
        let hint = if err.is_transient() { " (temporary, try again)" } else { "" };
        return Err(anyhow!("Failed to load {}: {}{}", key, err, hint));
    }

    let owner_profile = profiles.fetch_profile(source.as_ref(), owner).await;

    let posts = pager.posts().await;
    let status = pager.status();
    let board_uri = AtUri::make(owner, &config.records.list_collection, board_rkey);
    let summary = json!({
        "board": pager.board_key(),
        "uri": board_uri.to_string(),
        "pageSize": pager.page_size(),
        "owner": owner_profile.as_ref().map(|p| p.handle.as_str()).unwrap_or(owner),
        "ownerName": owner_profile.as_ref().map(|p| p.name()),
        "name": board.name,
        "description": board.description,
        "items": pager.item_count(),
        "pages": status.total_pages,
        "posts": posts.len(),
        "images": posts.iter().map(|(_, p)| p.image_count()).sum::<usize>(),
        "stale": pager.is_stale().await,
        "entries": posts
            .iter()
            .map(|(index, post)| json!({
                "uri": post.uri,
                "author": post.author.handle,
                "image": index,
            }))
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let stats = cache.stats().await;
    tracing::info!(
        "Done: {} posts shown, {} boards cached, {} failed background refreshes",
        posts.len(),
        stats.entries,
        stats.refresh_failures
    );
    Ok(())
}

fn log_cache_events(cache: &PostsCache) {
    tokio::spawn(log_events(cache.subscribe()));
}

/// Log cache events at debug level until the cache is dropped.
/// Returns the number of events logged.
async fn log_events(mut events: broadcast::Receiver<CacheEvent>) -> usize {
    let mut logged = 0;
    loop {
        match events.recv().await {
            Ok(CacheEvent::Updated { board_key }) => tracing::debug!("Cache updated: {}", board_key),
            Ok(CacheEvent::Removed { board_key }) => tracing::debug!("Cache entry removed: {}", board_key),
            Ok(CacheEvent::Cleared) => tracing::debug!("Cache cleared"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Cache event log fell behind, {} events skipped", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        }
        logged += 1;
    }
    logged
}
