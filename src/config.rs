use serde::Deserialize;
use std::time::Duration;

/// Upper bound on identifiers per `getPosts` call enforced by the AppView
pub const MAX_LOOKUP_BATCH: usize = 25;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
    pub cache: CacheConfig,
    pub pagination: PaginationConfig,
    pub records: RecordsConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the XRPC service (AppView or PDS)
    #[serde(default = "default_service_url")]
    pub service_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Age after which an entry is refreshed in the background
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    /// Age after which an entry must be refetched before use
    #[serde(default = "default_expire_after")]
    pub expire_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Identifiers per post lookup call (capped at 25)
    #[serde(default = "default_lookup_batch_size")]
    pub lookup_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordsConfig {
    /// Collection NSID for board records
    #[serde(default = "default_list_collection")]
    pub list_collection: String,
    /// Collection NSID for board item records
    #[serde(default = "default_list_item_collection")]
    pub list_item_collection: String,
    /// Page size for listRecords enumeration
    #[serde(default = "default_list_records_limit")]
    pub list_records_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory for file-backed persisted state
    #[serde(default = "default_storage_dir")]
    pub dir: String,
    /// Redis URL for shared persisted state (optional)
    /// If not set, falls back to the file backend
    pub redis_url: Option<String>,
}

fn default_service_url() -> String { "https://public.api.bsky.app".to_string() }
fn default_user_agent() -> String { concat!("skyboards/", env!("CARGO_PKG_VERSION")).to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_stale_after() -> u64 { 5 * 60 } // 5 minutes
fn default_expire_after() -> u64 { 60 * 60 } // 1 hour
fn default_page_size() -> usize { 25 }
fn default_lookup_batch_size() -> usize { MAX_LOOKUP_BATCH }
fn default_list_collection() -> String { "app.skyboards.list".to_string() }
fn default_list_item_collection() -> String { "app.skyboards.list.item".to_string() }
fn default_list_records_limit() -> u32 { 100 }
fn default_storage_dir() -> String { ".skyboards".to_string() }

fn env_or<T: std::str::FromStr>(name: &str, default: fn() -> T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(default)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            client: ClientConfig {
                service_url: default_service_url(),
                user_agent: default_user_agent(),
                request_timeout_secs: default_request_timeout(),
            },
            cache: CacheConfig {
                stale_after_secs: default_stale_after(),
                expire_after_secs: default_expire_after(),
            },
            pagination: PaginationConfig {
                page_size: default_page_size(),
                lookup_batch_size: default_lookup_batch_size(),
            },
            records: RecordsConfig {
                list_collection: default_list_collection(),
                list_item_collection: default_list_item_collection(),
                list_records_limit: default_list_records_limit(),
            },
            storage: StorageConfig {
                dir: default_storage_dir(),
                redis_url: None,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            client: ClientConfig {
                service_url: env_or("SERVICE_URL", default_service_url),
                user_agent: env_or("USER_AGENT", default_user_agent),
                request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", default_request_timeout),
            },
            cache: CacheConfig {
                stale_after_secs: env_or("CACHE_STALE_AFTER_SECS", default_stale_after),
                expire_after_secs: env_or("CACHE_EXPIRE_AFTER_SECS", default_expire_after),
            },
            pagination: PaginationConfig {
                page_size: env_or("PAGE_SIZE", default_page_size).max(1),
                lookup_batch_size: env_or("LOOKUP_BATCH_SIZE", default_lookup_batch_size)
                    .clamp(1, MAX_LOOKUP_BATCH),
            },
            records: RecordsConfig {
                list_collection: env_or("LIST_COLLECTION", default_list_collection),
                list_item_collection: env_or("LIST_ITEM_COLLECTION", default_list_item_collection),
                list_records_limit: env_or("LIST_RECORDS_LIMIT", default_list_records_limit),
            },
            storage: StorageConfig {
                dir: env_or("STORAGE_DIR", default_storage_dir),
                redis_url: std::env::var("REDIS_URL").ok().filter(|u| !u.is_empty()),
            },
        }
    }
}

impl CacheConfig {
    pub fn policy(&self) -> crate::cache::CachePolicy {
        crate::cache::CachePolicy {
            stale_after: Duration::from_secs(self.stale_after_secs),
            expire_after: Duration::from_secs(self.expire_after_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cache_policy() {
        let config = Config::default();
        let policy = config.cache.policy();
        assert_eq!(policy.stale_after, Duration::from_secs(300));
        assert_eq!(policy.expire_after, Duration::from_secs(3600));
        assert_eq!(config.pagination.page_size, 25);
        assert_eq!(config.pagination.lookup_batch_size, MAX_LOOKUP_BATCH);
    }
}
