use {
    crate::domain::store::ResultStore,
    chrono::Utc,
    serde::{Serialize, de::DeserializeOwned},
    std::{sync::Arc, time::Duration},
};

/// Best-effort memo of finished operations. Every failure degrades to "not
/// cached"; correctness rests on the lock and the compare-and-set update.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn ResultStore>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn ResultStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get_result(key, Utc::now()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "result cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "cached result does not decode, ignoring");
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) {
        self.put_with_ttl(key, value, self.ttl).await
    }

    pub async fn put_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "result not serializable, skipping cache");
                return;
            }
        };
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            tracing::warn!(key, "cache ttl out of range, skipping cache");
            return;
        };

        if let Err(e) = self.store.upsert_result(key, &raw, Utc::now() + ttl).await {
            tracing::warn!(key, error = %e, "result cache write failed");
        }
    }

    pub async fn purge_expired(&self) -> u64 {
        match self.store.purge_expired_results(Utc::now()).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "result cache purge failed");
                0
            }
        }
    }
}

/// `{kind}:{resource_id}:{state}`, where `state` names the fetched state
/// being applied.
pub fn cache_key(kind: &str, resource_id: &str, state: &str) -> String {
    format!("{kind}:{resource_id}:{state}")
}
