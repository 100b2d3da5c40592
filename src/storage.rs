//! Persisted client state
//!
//! Supports three backends:
//! - Memory: HashMap storage, lost on exit (tests, one-shot runs)
//! - File: one JSON document per store name under a directory
//! - Redis: GET/SET/DEL on `skyboards:<name>` keys, shared between instances
//!
//! Stores keep maps in memory and persist them through [`encode_map`] /
//! [`decode_map`], which write a map as an ordered list of `[key, value]` pairs.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    collections::HashMap,
    hash::Hash,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::RwLock;

use crate::error::Result;

/// Key/value string storage for persisted stores
#[derive(Clone)]
pub struct Storage {
    inner: StorageInner,
}

#[derive(Clone)]
enum StorageInner {
    Memory {
        items: Arc<RwLock<HashMap<String, String>>>,
    },
    File {
        dir: PathBuf,
    },
    Redis {
        conn: redis::aio::MultiplexedConnection,
    },
}

impl Storage {
    pub fn memory() -> Self {
        Self {
            inner: StorageInner::Memory {
                items: Arc::new(RwLock::new(HashMap::new())),
            },
        }
    }

    pub async fn file(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            inner: StorageInner::File { dir },
        })
    }

    pub async fn redis(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            inner: StorageInner::Redis { conn },
        })
    }

    /// Create storage from configuration
    /// Uses Redis if REDIS_URL is configured and reachable, otherwise the file backend
    pub async fn from_config(config: &crate::config::StorageConfig) -> Result<Self> {
        if let Some(url) = config.redis_url.as_deref() {
            match tokio::time::timeout(Duration::from_secs(5), Self::redis(url)).await {
                Ok(Ok(storage)) => {
                    tracing::info!("Using Redis-backed persisted state");
                    return Ok(storage);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Redis connection failed: {}. Falling back to file storage.", e);
                }
                Err(_) => {
                    tracing::warn!("Redis connection timed out. Falling back to file storage.");
                }
            }
        }
        tracing::info!("Using file-backed persisted state in {}", config.dir);
        Self::file(&config.dir).await
    }

    pub async fn get_item(&self, name: &str) -> Result<Option<String>> {
        match &self.inner {
            StorageInner::Memory { items } => Ok(items.read().await.get(name).cloned()),
            StorageInner::File { dir } => {
                match tokio::fs::read_to_string(file_path(dir, name)).await {
                    Ok(contents) => Ok(Some(contents)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            StorageInner::Redis { conn } => {
                let mut conn = conn.clone();
                let value: Option<String> = redis::cmd("GET")
                    .arg(redis_key(name))
                    .query_async(&mut conn)
                    .await?;
                Ok(value)
            }
        }
    }

    pub async fn set_item(&self, name: &str, value: String) -> Result<()> {
        match &self.inner {
            StorageInner::Memory { items } => {
                items.write().await.insert(name.to_string(), value);
            }
            StorageInner::File { dir } => {
                // Write then rename so readers never see a partial document
                let path = file_path(dir, name);
                let tmp = path.with_extension("json.tmp");
                tokio::fs::write(&tmp, value).await?;
                tokio::fs::rename(&tmp, &path).await?;
            }
            StorageInner::Redis { conn } => {
                let mut conn = conn.clone();
                let _: () = redis::cmd("SET")
                    .arg(redis_key(name))
                    .arg(value)
                    .query_async(&mut conn)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn remove_item(&self, name: &str) -> Result<()> {
        match &self.inner {
            StorageInner::Memory { items } => {
                items.write().await.remove(name);
            }
            StorageInner::File { dir } => match tokio::fs::remove_file(file_path(dir, name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
            StorageInner::Redis { conn } => {
                let mut conn = conn.clone();
                let _: () = redis::cmd("DEL")
                    .arg(redis_key(name))
                    .query_async(&mut conn)
                    .await?;
            }
        }
        Ok(())
    }

    /// Read and decode a JSON value, discarding corrupt state
    pub async fn load_json<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let raw = match self.get_item(name).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read persisted '{}': {}", name, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding unreadable persisted '{}': {}", name, e);
                None
            }
        }
    }

    /// Write an encoded value, logging failures
    /// Persistence is best-effort: in-memory state stays authoritative
    pub async fn save(&self, name: &str, encoded: Result<String>) {
        let result = match encoded {
            Ok(value) => self.set_item(name, value).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to persist '{}': {}", name, e);
        }
    }
}

fn file_path(dir: &Path, name: &str) -> PathBuf {
    // Store names are fixed identifiers; keep only safe characters anyway
    let safe: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    dir.join(format!("{}.json", safe))
}

fn redis_key(name: &str) -> String {
    format!("skyboards:{}", name)
}

/// Persisted form of a map: `{"version": n, "entries": [[key, value], ...]}`
#[derive(Debug, Serialize, Deserialize)]
struct MapEnvelope<K, V> {
    version: u32,
    entries: Vec<(K, V)>,
}

/// Encode a map as a list of key/value pairs, sorted by key so the
/// document is stable between writes
pub fn encode_map<K, V>(map: &HashMap<K, V>, version: u32) -> Result<String>
where
    K: Serialize + Ord + Eq + Hash,
    V: Serialize,
{
    let mut entries: Vec<(&K, &V)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    let envelope = MapEnvelope { version, entries };
    Ok(serde_json::to_string(&envelope)?)
}

/// Rebuild a map written by [`encode_map`].
/// Returns `None` for a version mismatch.
pub fn decode_map<K, V>(raw: &str, version: u32) -> Result<Option<HashMap<K, V>>>
where
    K: DeserializeOwned + Eq + Hash,
    V: DeserializeOwned,
{
    let envelope: MapEnvelope<K, V> = serde_json::from_str(raw)?;
    if envelope.version != version {
        return Ok(None);
    }
    Ok(Some(envelope.entries.into_iter().collect()))
}

/// Load a map store, starting empty on missing, corrupt or outdated state
pub async fn load_map<K, V>(storage: &Storage, name: &str, version: u32) -> HashMap<K, V>
where
    K: DeserializeOwned + Eq + Hash,
    V: DeserializeOwned,
{
    let raw = match storage.get_item(name).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return HashMap::new(),
        Err(e) => {
            tracing::warn!("Failed to read persisted '{}': {}", name, e);
            return HashMap::new();
        }
    };
    match decode_map(&raw, version) {
        Ok(Some(map)) => map,
        Ok(None) => {
            tracing::info!("Persisted '{}' has an outdated version, starting empty", name);
            HashMap::new()
        }
        Err(e) => {
            tracing::warn!("Discarding unreadable persisted '{}': {}", name, e);
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = Storage::memory();
        assert_eq!(storage.get_item("posts").await.unwrap(), None);

        assert_ok!(storage.set_item("posts", "[]".to_string()).await);
        assert_eq!(storage.get_item("posts").await.unwrap().as_deref(), Some("[]"));

        assert_ok!(storage.remove_item("posts").await);
        assert_eq!(storage.get_item("posts").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_storage() {
        let dir = std::env::temp_dir().join(format!("skyboards-test-{}", std::process::id()));
        let storage = Storage::file(&dir).await.unwrap();

        assert_ok!(storage.set_item("board-items", "{\"a\":1}".to_string()).await);
        assert_eq!(
            storage.get_item("board-items").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert_ok!(storage.remove_item("board-items").await);
        assert_ok!(storage.remove_item("board-items").await);
        assert_eq!(storage.get_item("board-items").await.unwrap(), None);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn test_map_codec() {
        let mut map = HashMap::new();
        map.insert("b".to_string(), vec![1, 2]);
        map.insert("a".to_string(), vec![3]);

        let raw = encode_map(&map, 1).unwrap();
        assert_eq!(raw, r#"{"version":1,"entries":[["a",[3]],["b",[1,2]]]}"#);

        let decoded: HashMap<String, Vec<i32>> = decode_map(&raw, 1).unwrap().unwrap();
        assert_eq!(decoded, map);

        let outdated: Option<HashMap<String, Vec<i32>>> = decode_map(&raw, 2).unwrap();
        assert!(outdated.is_none());
    }

    #[tokio::test]
    async fn test_load_map_discards_corrupt_state() {
        let storage = Storage::memory();
        storage.set_item("posts", "not json".to_string()).await.unwrap();
        let map: HashMap<String, u32> = load_map(&storage, "posts", 1).await;
        assert!(map.is_empty());
    }
}
