use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::models::BoardItem;
use crate::storage::{encode_map, load_map, Storage};

pub const STORE_NAME: &str = "board-items";
const STORE_VERSION: u32 = 1;

/// Board items keyed by rkey, across every board of the signed-in user
pub struct BoardItemsStore {
    items: RwLock<HashMap<String, BoardItem>>,
    storage: Storage,
}

impl BoardItemsStore {
    pub async fn load(storage: Storage) -> Self {
        let items = load_map(&storage, STORE_NAME, STORE_VERSION).await;
        Self {
            items: RwLock::new(items),
            storage,
        }
    }

    pub async fn set_item(&self, rkey: &str, item: BoardItem) {
        let mut items = self.items.write().await;
        items.insert(rkey.to_string(), item);
        self.persist(&items).await;
    }

    /// Insert many items with a single write
    pub async fn extend(&self, entries: Vec<(String, BoardItem)>) {
        let mut items = self.items.write().await;
        items.extend(entries);
        self.persist(&items).await;
    }

    /// Replace every item with a freshly enumerated set
    pub async fn replace_all(&self, entries: Vec<(String, BoardItem)>) {
        let mut items = self.items.write().await;
        *items = entries.into_iter().collect();
        self.persist(&items).await;
    }

    pub async fn remove_item(&self, rkey: &str) -> Option<BoardItem> {
        let mut items = self.items.write().await;
        let removed = items.remove(rkey);
        if removed.is_some() {
            self.persist(&items).await;
        }
        removed
    }

    pub async fn get_item(&self, rkey: &str) -> Option<BoardItem> {
        self.items.read().await.get(rkey).cloned()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Items of one board, ordered by rkey (creation order for TIDs)
    pub async fn items_in_board(&self, owner: &str, board_rkey: &str) -> Vec<(String, BoardItem)> {
        let mut matching: Vec<(String, BoardItem)> = self
            .items
            .read()
            .await
            .iter()
            .filter(|(_, item)| item.is_in_board(owner, board_rkey))
            .map(|(rkey, item)| (rkey.clone(), item.clone()))
            .collect();
        matching.sort_by(|a, b| a.0.cmp(&b.0));
        matching
    }

    /// Drop the local items of a deleted board. Returns the removed rkeys.
    pub async fn remove_items_in_board(&self, owner: &str, board_rkey: &str) -> Vec<String> {
        let mut items = self.items.write().await;
        let mut removed: Vec<String> = items
            .iter()
            .filter(|(_, item)| item.is_in_board(owner, board_rkey))
            .map(|(rkey, _)| rkey.clone())
            .collect();
        if removed.is_empty() {
            return removed;
        }
        for rkey in &removed {
            items.remove(rkey);
        }
        self.persist(&items).await;
        removed.sort();
        removed
    }

    async fn persist(&self, items: &HashMap<String, BoardItem>) {
        self.storage
            .save(STORE_NAME, encode_map(items, STORE_VERSION))
            .await;
    }
}
