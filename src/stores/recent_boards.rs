use tokio::sync::RwLock;

use crate::storage::Storage;

pub const STORE_NAME: &str = "recent-boards";

/// Recently opened boards, most recent first
pub struct RecentBoards {
    boards: RwLock<Vec<String>>,
    storage: Storage,
}

impl RecentBoards {
    pub async fn load(storage: Storage) -> Self {
        let boards = storage.load_json(STORE_NAME).await.unwrap_or_default();
        Self {
            boards: RwLock::new(boards),
            storage,
        }
    }

    /// Move `board_id` to the front
    pub async fn add(&self, board_id: &str) {
        let mut boards = self.boards.write().await;
        boards.retain(|id| id != board_id);
        boards.insert(0, board_id.to_string());
        self.persist(&boards).await;
    }

    pub async fn remove(&self, board_id: &str) {
        let mut boards = self.boards.write().await;
        boards.retain(|id| id != board_id);
        self.persist(&boards).await;
    }

    pub async fn clear(&self) {
        let mut boards = self.boards.write().await;
        boards.clear();
        self.persist(&boards).await;
    }

    pub async fn list(&self) -> Vec<String> {
        self.boards.read().await.clone()
    }

    async fn persist(&self, boards: &[String]) {
        let encoded = serde_json::to_string(boards).map_err(Into::into);
        self.storage.save(STORE_NAME, encoded).await;
    }
}
