/// Like state per post, with optimistic toggling.
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::store::{
    KeyedObservableStore, PendingWrite, ReconcilePolicy, Reconciled, Result, Settlement,
    Subscription,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LikeState {
    #[serde(rename = "isLiked")]
    pub is_liked: bool,
    pub likes: u64,
}

impl LikeState {
    pub fn new(is_liked: bool, likes: u64) -> Self {
        LikeState { is_liked, likes }
    }

    /// Flip `is_liked` and move `likes` by one, never below zero.
    pub fn toggled(&self) -> Self {
        if self.is_liked {
            LikeState {
                is_liked: false,
                likes: self.likes.saturating_sub(1),
            }
        } else {
            LikeState {
                is_liked: true,
                likes: self.likes.saturating_add(1),
            }
        }
    }
}

pub type LikeWrite = PendingWrite<String, LikeState>;

pub struct LikeStore {
    store: KeyedObservableStore<String, LikeState>,
}

impl LikeStore {
    pub fn new() -> Self {
        LikeStore {
            store: KeyedObservableStore::new("likes", ReconcilePolicy::RespectLock),
        }
    }

    /// Seed a post from a page fetch. Existing entries are left alone.
    pub fn init(&self, post_id: &str, state: LikeState) -> bool {
        self.store.init(post_id.to_string(), state)
    }

    pub fn get(&self, post_id: &str) -> Option<LikeState> {
        self.store.get(&post_id.to_string())
    }

    /// Optimistically toggle the like. Settle the returned write with the
    /// backend result via [`LikeStore::settle`].
    pub fn toggle(&self, post_id: &str) -> Result<LikeWrite> {
        self.store
            .begin_optimistic(&post_id.to_string(), LikeState::toggled)
    }

    pub fn settle<E: Display>(
        &self,
        write: LikeWrite,
        outcome: std::result::Result<Option<LikeState>, E>,
    ) -> Settlement {
        self.store.settle(write, outcome)
    }

    pub fn reconcile_from_server(&self, post_id: &str, state: LikeState) -> Reconciled {
        self.store.reconcile_from_server(post_id.to_string(), state)
    }

    pub fn subscribe<F>(&self, post_id: &str, callback: F) -> Subscription
    where
        F: Fn(&LikeState) + Send + Sync + 'static,
    {
        self.store.subscribe(post_id.to_string(), callback)
    }

    /// Underlying keyed store, for feed pumps and diagnostics.
    pub fn store(&self) -> &KeyedObservableStore<String, LikeState> {
        &self.store
    }
}
