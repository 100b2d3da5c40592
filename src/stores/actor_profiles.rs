use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::RwLock;

use crate::client::PostSource;
use crate::models::ProfileView;
use crate::storage::{encode_map, load_map, Storage};

pub const STORE_NAME: &str = "actor-profiles";
const STORE_VERSION: u32 = 1;

/// Actor profiles by DID. Profiles are persisted; loading and error state
/// only live for the session.
pub struct ActorProfilesStore {
    profiles: RwLock<HashMap<String, ProfileView>>,
    loading: Mutex<HashSet<String>>,
    errors: RwLock<HashMap<String, String>>,
    storage: Storage,
}

/// Removes a DID from the loading set when the lookup ends or is dropped
struct LoadingGuard<'a> {
    loading: &'a Mutex<HashSet<String>>,
    did: &'a str,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.loading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(self.did);
    }
}

impl ActorProfilesStore {
    pub async fn load(storage: Storage) -> Self {
        let profiles = load_map(&storage, STORE_NAME, STORE_VERSION).await;
        Self {
            profiles: RwLock::new(profiles),
            loading: Mutex::new(HashSet::new()),
            errors: RwLock::new(HashMap::new()),
            storage,
        }
    }

    pub async fn set_profile(&self, did: &str, profile: ProfileView) {
        let mut profiles = self.profiles.write().await;
        profiles.insert(did.to_string(), profile);
        self.storage
            .save(STORE_NAME, encode_map(&profiles, STORE_VERSION))
            .await;
    }

    pub async fn get_profile(&self, did: &str) -> Option<ProfileView> {
        self.profiles.read().await.get(did).cloned()
    }

    pub fn is_loading(&self, did: &str) -> bool {
        self.loading
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(did)
    }

    /// Record or clear the last lookup error for `did`
    pub async fn set_error(&self, did: &str, error: Option<String>) {
        let mut errors = self.errors.write().await;
        match error {
            Some(error) => {
                errors.insert(did.to_string(), error);
            }
            None => {
                errors.remove(did);
            }
        }
    }

    pub async fn get_error(&self, did: &str) -> Option<String> {
        self.errors.read().await.get(did).cloned()
    }

    fn begin<'a>(&'a self, did: &'a str) -> Option<LoadingGuard<'a>> {
        let mut loading = self.loading.lock().unwrap_or_else(|e| e.into_inner());
        if !loading.insert(did.to_string()) {
            return None;
        }
        drop(loading);
        Some(LoadingGuard {
            loading: &self.loading,
            did,
        })
    }

    /// Cached profile of `did`, looked up through `source` on a miss.
    /// Returns `None` while another lookup of the same DID is running or when
    /// the lookup fails; the failure is readable through `get_error`.
    pub async fn fetch_profile(&self, source: &dyn PostSource, did: &str) -> Option<ProfileView> {
        if let Some(profile) = self.get_profile(did).await {
            return Some(profile);
        }
        let _guard = self.begin(did)?;
        self.set_error(did, None).await;

        match source.get_profile(did).await {
            Ok(profile) => {
                self.set_profile(did, profile.clone()).await;
                Some(profile)
            }
            Err(e) => {
                tracing::warn!(transient = e.is_transient(), "Failed to fetch profile of {}: {}", did, e);
                self.set_error(did, Some(e.to_string())).await;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RecordPage;
    use crate::error::{Error, Result};
    use crate::models::PostView;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn profile(did: &str) -> ProfileView {
        ProfileView {
            did: did.to_string(),
            handle: format!("{}.test", did.rsplit(':').next().unwrap_or_default()),
            display_name: None,
            description: None,
            avatar: None,
            banner: None,
            followers_count: None,
            follows_count: None,
            posts_count: None,
            indexed_at: None,
        }
    }

    #[derive(Default)]
    struct Profiles {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl PostSource for Profiles {
        async fn get_posts(&self, _uris: &[String]) -> Result<Vec<PostView>> {
            Ok(Vec::new())
        }

        async fn list_records(
            &self,
            _repo: &str,
            _collection: &str,
            _limit: u32,
            _cursor: Option<&str>,
        ) -> Result<RecordPage> {
            Ok(RecordPage { cursor: None, records: vec![] })
        }

        async fn get_profile(&self, actor: &str) -> Result<ProfileView> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Api {
                    status: 400,
                    message: "InvalidRequest: Profile not found".to_string(),
                });
            }
            Ok(profile(actor))
        }
    }

    #[tokio::test]
    async fn test_fetch_caches_and_persists() {
        let storage = Storage::memory();
        let store = ActorProfilesStore::load(storage.clone()).await;
        let source = Profiles::default();

        let fetched = store.fetch_profile(&source, "did:plc:alice").await.unwrap();
        assert_eq!(fetched.handle, "alice.test");
        assert!(store.fetch_profile(&source, "did:plc:alice").await.is_some());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(!store.is_loading("did:plc:alice"));

        let restored = ActorProfilesStore::load(storage).await;
        assert_eq!(restored.get_profile("did:plc:alice").await, Some(fetched));
    }

    #[tokio::test]
    async fn test_fetch_failure_sets_error_and_retries() {
        let store = ActorProfilesStore::load(Storage::memory()).await;
        let source = Profiles::default();
        source.fail.store(true, Ordering::SeqCst);

        assert!(store.fetch_profile(&source, "did:plc:bob").await.is_none());
        let error = store.get_error("did:plc:bob").await.unwrap();
        assert!(error.contains("Profile not found"));
        assert!(!store.is_loading("did:plc:bob"));

        source.fail.store(false, Ordering::SeqCst);
        assert!(store.fetch_profile(&source, "did:plc:bob").await.is_some());
        assert!(store.get_error("did:plc:bob").await.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_lookup_per_did() {
        let store = ActorProfilesStore::load(Storage::memory()).await;
        let source = Profiles::default();

        let guard = store.begin("did:plc:carol");
        assert!(guard.is_some());
        assert!(store.is_loading("did:plc:carol"));
        assert!(store.fetch_profile(&source, "did:plc:carol").await.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        drop(guard);
        assert!(store.fetch_profile(&source, "did:plc:carol").await.is_some());
    }
}
