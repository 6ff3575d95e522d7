/// Reply counts per post. Server snapshots always win: the full reply list
/// fetch is the source of truth, so there is no lock here.
use crate::store::{KeyedObservableStore, ReconcilePolicy, Reconciled, Result, Subscription};

pub struct ReplyCountStore {
    store: KeyedObservableStore<String, u64>,
}

impl ReplyCountStore {
    pub fn new() -> Self {
        ReplyCountStore {
            store: KeyedObservableStore::new("reply_counts", ReconcilePolicy::ServerAuthoritative),
        }
    }

    pub fn init(&self, post_id: &str, count: u64) -> bool {
        self.store.init(post_id.to_string(), count)
    }

    pub fn get(&self, post_id: &str) -> Option<u64> {
        self.store.get(&post_id.to_string())
    }

    /// Local bump after posting a reply.
    pub fn increment(&self, post_id: &str) -> Result<u64> {
        self.store
            .update(&post_id.to_string(), |c| c.saturating_add(1))
    }

    /// Local drop after deleting a reply. Clamped at zero.
    pub fn decrement(&self, post_id: &str) -> Result<u64> {
        self.store
            .update(&post_id.to_string(), |c| c.saturating_sub(1))
    }

    pub fn apply_server(&self, post_id: &str, count: u64) -> Reconciled {
        self.store.reconcile_from_server(post_id.to_string(), count)
    }

    /// Counts from a full reply-list fetch.
    pub fn replace_all<I>(&self, counts: I) -> usize
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        self.store.replace_all(counts)
    }

    pub fn subscribe<F>(&self, post_id: &str, callback: F) -> Subscription
    where
        F: Fn(&u64) + Send + Sync + 'static,
    {
        self.store.subscribe(post_id.to_string(), callback)
    }

    pub fn store(&self) -> &KeyedObservableStore<String, u64> {
        &self.store
    }
}
