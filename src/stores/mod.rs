/// Domain stores: one service object per cached concern.
///
/// Each store wraps a [`KeyedObservableStore`](crate::store::KeyedObservableStore)
/// with its own value type and reconciliation policy:
///
/// | Store | Value | Policy |
/// |-------|-------|--------|
/// | `likes` | [`LikeState`] | respect lock |
/// | `replies` | reply count | server authoritative |
/// | `blocked`, `followed` | [`IdSet`] | skip if equal (respects lock) |
/// | `profiles` | [`ProfileSnapshot`] | server authoritative, last write wins |
///
/// [`Stores`] is built once at app start and handed out by reference.
use std::sync::Arc;

use crate::config::CoreConfig;
use crate::payload::ValidatedEvent;
use crate::store::Reconciled;

pub mod id_set;
pub mod likes;
pub mod profiles;
pub mod replies;

pub use id_set::{IdSet, IdSetKind, IdSetStore, IdSetWrite};
pub use likes::{LikeState, LikeStore, LikeWrite};
pub use profiles::{ProfileCache, ProfileSnapshot};
pub use replies::ReplyCountStore;

#[derive(Clone)]
pub struct Stores {
    pub likes: Arc<LikeStore>,
    pub replies: Arc<ReplyCountStore>,
    pub blocked: Arc<IdSetStore>,
    pub followed: Arc<IdSetStore>,
    pub profiles: Arc<ProfileCache>,
}

impl Stores {
    pub fn new(config: &CoreConfig) -> Self {
        Stores {
            likes: Arc::new(LikeStore::new()),
            replies: Arc::new(ReplyCountStore::new()),
            blocked: Arc::new(IdSetStore::new(IdSetKind::Blocked)),
            followed: Arc::new(IdSetStore::new(IdSetKind::Followed)),
            profiles: Arc::new(ProfileCache::new(config.fallback_display_name.clone())),
        }
    }

    pub fn id_set(&self, kind: IdSetKind) -> &IdSetStore {
        match kind {
            IdSetKind::Blocked => &self.blocked,
            IdSetKind::Followed => &self.followed,
        }
    }

    /// Route a validated server event to its store's server entry point.
    pub fn dispatch(&self, event: ValidatedEvent) -> Reconciled {
        let outcome = match &event {
            ValidatedEvent::Like { post_id, state } => {
                self.likes.reconcile_from_server(post_id, *state)
            }
            ValidatedEvent::ReplyCount { post_id, count } => {
                self.replies.apply_server(post_id, *count)
            }
            ValidatedEvent::IdSet { kind, owner, ids } => {
                self.id_set(*kind).apply_server(owner, ids.clone())
            }
            ValidatedEvent::Profile { user_id, snapshot } => {
                self.profiles.apply_server(user_id, snapshot.clone())
            }
        };
        log::debug!("dispatch {:?} -> {:?}", event.key(), outcome);
        outcome
    }
}
