/// Profile snapshots per user id, fed by a live subscription (last write wins).
use serde::{Deserialize, Serialize};

use crate::store::{KeyedObservableStore, ReconcilePolicy, Reconciled, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl ProfileSnapshot {
    pub fn new(display_name: impl Into<String>, photo_url: Option<String>) -> Self {
        ProfileSnapshot {
            display_name: display_name.into(),
            photo_url,
        }
    }
}

pub struct ProfileCache {
    store: KeyedObservableStore<String, ProfileSnapshot>,
    fallback_name: String,
}

impl ProfileCache {
    pub fn new(fallback_name: impl Into<String>) -> Self {
        ProfileCache {
            store: KeyedObservableStore::new("profiles", ReconcilePolicy::ServerAuthoritative),
            fallback_name: fallback_name.into(),
        }
    }

    pub fn get(&self, user_id: &str) -> Option<ProfileSnapshot> {
        self.store.get(&user_id.to_string())
    }

    pub fn apply_server(&self, user_id: &str, snapshot: ProfileSnapshot) -> Reconciled {
        self.store.reconcile_from_server(user_id.to_string(), snapshot)
    }

    /// Display name for feed rows whose author profile has not arrived yet.
    pub fn display_name_or_fallback(&self, user_id: &str) -> String {
        self.get(user_id)
            .map(|p| p.display_name)
            .unwrap_or_else(|| self.fallback_name.clone())
    }

    pub fn subscribe<F>(&self, user_id: &str, callback: F) -> Subscription
    where
        F: Fn(&ProfileSnapshot) + Send + Sync + 'static,
    {
        self.store.subscribe(user_id.to_string(), callback)
    }

    pub fn store(&self) -> &KeyedObservableStore<String, ProfileSnapshot> {
        &self.store
    }
}
