use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::models::Board;
use crate::storage::Storage;

pub const STORE_NAME: &str = "boards";
const STORE_VERSION: u32 = 2;

type OwnerBoards = HashMap<String, BTreeMap<String, Board>>;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    boards: OwnerBoards,
}

/// Boards per owner DID, keyed by rkey
pub struct BoardsStore {
    boards: RwLock<OwnerBoards>,
    storage: Storage,
}

impl BoardsStore {
    pub async fn load(storage: Storage) -> Self {
        let boards = match storage.load_json::<Snapshot>(STORE_NAME).await {
            Some(snapshot) if snapshot.version == STORE_VERSION => snapshot.boards,
            Some(_) => {
                tracing::info!("Persisted '{}' has an outdated version, starting empty", STORE_NAME);
                HashMap::new()
            }
            None => HashMap::new(),
        };
        Self {
            boards: RwLock::new(boards),
            storage,
        }
    }

    pub async fn set_board(&self, owner: &str, rkey: &str, board: Board) {
        let mut boards = self.boards.write().await;
        boards
            .entry(owner.to_string())
            .or_default()
            .insert(rkey.to_string(), board);
        self.persist(&boards).await;
    }

    /// Returns false when the board was not present
    pub async fn remove_board(&self, owner: &str, rkey: &str) -> bool {
        let mut boards = self.boards.write().await;
        let removed = boards
            .get_mut(owner)
            .and_then(|owned| owned.remove(rkey))
            .is_some();
        if removed {
            self.persist(&boards).await;
        }
        removed
    }

    pub async fn get_board(&self, owner: &str, rkey: &str) -> Option<Board> {
        self.boards
            .read()
            .await
            .get(owner)
            .and_then(|owned| owned.get(rkey))
            .cloned()
    }

    pub async fn get_boards(&self, owner: &str) -> Option<BTreeMap<String, Board>> {
        self.boards.read().await.get(owner).cloned()
    }

    /// `(rkey, board)` pairs of one owner, ordered by rkey
    pub async fn entries(&self, owner: &str) -> Option<Vec<(String, Board)>> {
        self.get_boards(owner)
            .await
            .map(|owned| owned.into_iter().collect())
    }

    pub async fn all(&self) -> HashMap<String, BTreeMap<String, Board>> {
        self.boards.read().await.clone()
    }

    /// Drop one owner's boards, or every board when `owner` is `None`
    pub async fn clear_boards(&self, owner: Option<&str>) {
        let mut boards = self.boards.write().await;
        match owner {
            Some(owner) => {
                boards.remove(owner);
            }
            None => boards.clear(),
        }
        self.persist(&boards).await;
    }

    /// Replace one owner's boards with a freshly enumerated set
    pub async fn replace_owner(&self, owner: &str, entries: Vec<(String, Board)>) {
        let mut boards = self.boards.write().await;
        boards.insert(owner.to_string(), entries.into_iter().collect());
        self.persist(&boards).await;
    }

    async fn persist(&self, boards: &OwnerBoards) {
        let snapshot = Snapshot {
            version: STORE_VERSION,
            boards: boards.clone(),
        };
        let encoded = serde_json::to_string(&snapshot).map_err(Into::into);
        self.storage.save(STORE_NAME, encoded).await;
    }
}
