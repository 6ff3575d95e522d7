/// Sets of user ids owned by a user: blocked ids and followed ids.
///
/// Server pushes are equality-gated (an identical set never notifies) and
/// still respect a pending local add/remove.
use std::collections::BTreeSet;
use std::fmt::{self, Display};

use crate::store::{
    KeyedObservableStore, PendingWrite, ReconcilePolicy, Reconciled, Result, Settlement,
    Subscription,
};

pub type IdSet = BTreeSet<String>;
pub type IdSetWrite = PendingWrite<String, IdSet>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSetKind {
    Blocked,
    Followed,
}

impl IdSetKind {
    fn store_name(self) -> &'static str {
        match self {
            IdSetKind::Blocked => "blocked_ids",
            IdSetKind::Followed => "followed_ids",
        }
    }
}

impl Display for IdSetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_name())
    }
}

pub struct IdSetStore {
    kind: IdSetKind,
    store: KeyedObservableStore<String, IdSet>,
}

impl IdSetStore {
    pub fn new(kind: IdSetKind) -> Self {
        IdSetStore {
            kind,
            store: KeyedObservableStore::new(kind.store_name(), ReconcilePolicy::SkipIfEqual),
        }
    }

    pub fn kind(&self) -> IdSetKind {
        self.kind
    }

    pub fn init(&self, owner: &str, ids: IdSet) -> bool {
        self.store.init(owner.to_string(), ids)
    }

    pub fn get(&self, owner: &str) -> Option<IdSet> {
        self.store.get(&owner.to_string())
    }

    pub fn contains(&self, owner: &str, id: &str) -> bool {
        self.store
            .get(&owner.to_string())
            .map_or(false, |ids| ids.contains(id))
    }

    /// Optimistically add `id` (block / follow).
    pub fn add(&self, owner: &str, id: &str) -> Result<IdSetWrite> {
        self.store.begin_optimistic(&owner.to_string(), |ids| {
            let mut next = ids.clone();
            next.insert(id.to_string());
            next
        })
    }

    /// Optimistically remove `id` (unblock / unfollow).
    pub fn remove(&self, owner: &str, id: &str) -> Result<IdSetWrite> {
        self.store.begin_optimistic(&owner.to_string(), |ids| {
            let mut next = ids.clone();
            next.remove(id);
            next
        })
    }

    pub fn settle<E: Display>(
        &self,
        write: IdSetWrite,
        outcome: std::result::Result<Option<IdSet>, E>,
    ) -> Settlement {
        self.store.settle(write, outcome)
    }

    /// Server push of the whole set.
    pub fn apply_server(&self, owner: &str, ids: IdSet) -> Reconciled {
        self.store.reconcile_from_server(owner.to_string(), ids)
    }

    pub fn subscribe<F>(&self, owner: &str, callback: F) -> Subscription
    where
        F: Fn(&IdSet) + Send + Sync + 'static,
    {
        self.store.subscribe(owner.to_string(), callback)
    }

    pub fn store(&self) -> &KeyedObservableStore<String, IdSet> {
        &self.store
    }
}
