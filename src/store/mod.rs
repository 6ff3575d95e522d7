/// Keyed observable store: the in-memory cache every domain store builds on.
///
/// Each key maps to a record `{ value, locked }`. `locked` marks an outstanding
/// optimistic write: server snapshots arriving through
/// [`KeyedObservableStore::reconcile_from_server`] must not clobber it until the
/// key is `set`, `unlock`ed, or replaced by an authoritative full refresh.
///
/// Subscribers are per key. Every mutation queues its notification in an
/// outbox under the store mutex; the outbox is drained in mutation order by a
/// single thread at a time, after the mutex is released. A callback may call
/// back into the store: its own notifications are queued and delivered once
/// the current callback returns, never re-entrantly. Writes racing from other
/// threads are delivered by whichever thread is already draining, so
/// subscribers always observe the final value last.
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;

pub mod reconcile;

pub use reconcile::{decide, PendingWrite, ReconcilePolicy, Reconciled, Settlement};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Key not initialised: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

type Callback<V> = Arc<dyn Fn(&V) + Send + Sync>;

#[derive(Clone, Debug)]
struct Entry<V> {
    value: V,
    locked: bool,
    /// Stamp of the last write to `value`, from a store-wide counter that
    /// never repeats.
    generation: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    subscribers: HashMap<K, Vec<(u64, Callback<V>)>>,
    next_subscriber: u64,
    next_generation: u64,
    outbox: VecDeque<Pending<V>>,
    draining: bool,
}

impl<K: Eq + Hash, V> Inner<K, V> {
    fn callbacks(&self, key: &K) -> Vec<Callback<V>> {
        self.subscribers
            .get(key)
            .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Write `value` under a fresh generation, unlocked.
    fn write(&mut self, key: K, value: V) -> u64 {
        let generation = self.bump_generation();
        self.entries.insert(
            key,
            Entry {
                value,
                locked: false,
                generation,
            },
        );
        generation
    }

    /// Queue a notification for `key`. Keys nobody observes queue nothing.
    fn enqueue(&mut self, key: &K, value: V) -> usize {
        let callbacks = self.callbacks(key);
        let count = callbacks.len();
        if count > 0 {
            self.outbox.push_back(Pending { value, callbacks });
        }
        count
    }
}

/// A notification owed to the subscribers of one key.
struct Pending<V> {
    value: V,
    callbacks: Vec<Callback<V>>,
}

impl<V> Pending<V> {
    fn deliver(self) {
        for cb in &self.callbacks {
            cb(&self.value);
        }
    }
}

/// Clears the draining flag if a callback unwinds mid-delivery, so later
/// mutations can still drain.
struct DrainGuard<'a, K, V> {
    inner: &'a Mutex<Inner<K, V>>,
    armed: bool,
}

impl<K, V> Drop for DrainGuard<'_, K, V> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            state.draining = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle returned by `subscribe`. Dropping it (or calling
/// [`Subscription::unsubscribe`]) deregisters the callback; stored data is kept.
#[must_use = "dropping a Subscription immediately unsubscribes"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Deregister now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keep the callback registered for the lifetime of the store.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// KeyedObservableStore
// ---------------------------------------------------------------------------

pub struct KeyedObservableStore<K, V> {
    name: &'static str,
    policy: ReconcilePolicy,
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> KeyedObservableStore<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create an empty store. `name` only appears in log lines.
    pub fn new(name: &'static str, policy: ReconcilePolicy) -> Self {
        KeyedObservableStore {
            name,
            policy,
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                subscribers: HashMap::new(),
                next_subscriber: 0,
                next_generation: 0,
                outbox: VecDeque::new(),
                draining: false,
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    // A poisoned mutex only means a subscriber panicked elsewhere; the map
    // itself is never left half-written.
    fn state(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver queued notifications unless another frame is already draining.
    fn flush(&self) {
        {
            let mut state = self.state();
            if state.draining || state.outbox.is_empty() {
                return;
            }
            state.draining = true;
        }
        let mut guard = DrainGuard {
            inner: &self.inner,
            armed: true,
        };
        loop {
            let next = {
                let mut state = self.state();
                match state.outbox.pop_front() {
                    Some(pending) => pending,
                    None => {
                        // Cleared under the same lock as the empty check, so
                        // nothing can be queued and stranded in between.
                        state.draining = false;
                        guard.armed = false;
                        return;
                    }
                }
            };
            next.deliver();
        }
    }

    /// Current value, if the key has been initialised.
    pub fn get(&self, key: &K) -> Option<V> {
        self.state().entries.get(key).map(|e| e.value.clone())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.state().entries.contains_key(key)
    }

    /// Whether an optimistic write is outstanding for `key`.
    pub fn is_locked(&self, key: &K) -> bool {
        self.state().entries.get(key).map_or(false, |e| e.locked)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        self.state().entries.keys().cloned().collect()
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        self.state().subscribers.get(key).map_or(0, Vec::len)
    }

    /// Unconditionally overwrite `key`, clear its lock, and notify.
    ///
    /// Any optimistic write still pending on `key` is superseded.
    pub fn set(&self, key: K, value: V) {
        {
            let mut state = self.state();
            state.write(key.clone(), value.clone());
            let count = state.enqueue(&key, value);
            self.trace_notify(&key, count);
        }
        self.flush();
    }

    /// Insert `value` only if `key` has no entry yet. Returns `true` if inserted.
    ///
    /// Lists re-rendering with stale page data use this so they never clobber
    /// a value that is already live (and possibly locked).
    pub fn init(&self, key: K, value: V) -> bool {
        {
            let mut state = self.state();
            if state.entries.contains_key(&key) {
                return false;
            }
            state.write(key.clone(), value.clone());
            state.enqueue(&key, value);
        }
        self.flush();
        true
    }

    /// Mark `key` as having a pending optimistic write. The value is untouched.
    pub fn lock(&self, key: &K) -> Result<()> {
        let mut state = self.state();
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.locked = true;
                log::debug!("{}: locked {:?}", self.name, key);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("{:?}", key))),
        }
    }

    /// Clear the pending flag without touching the value. Returns the previous flag.
    pub fn unlock(&self, key: &K) -> bool {
        let mut state = self.state();
        match state.entries.get_mut(key) {
            Some(entry) => std::mem::replace(&mut entry.locked, false),
            None => false,
        }
    }

    /// Apply `f` to the current value as a confirmed local mutation and notify.
    /// The lock flag and generation are left as they were.
    pub fn update<F>(&self, key: &K, f: F) -> Result<V>
    where
        F: FnOnce(&V) -> V,
    {
        let value = {
            let mut state = self.state();
            let entry = state
                .entries
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(format!("{:?}", key)))?;
            entry.value = f(&entry.value);
            let value = entry.value.clone();
            state.enqueue(key, value.clone());
            value
        };
        self.flush();
        Ok(value)
    }

    /// Register `callback` for changes to `key`. Several subscribers per key
    /// are allowed; they are called in registration order.
    pub fn subscribe<F>(&self, key: K, callback: F) -> Subscription
    where
        F: Fn(&V) + Send + Sync + 'static,
    {
        let id = {
            let mut state = self.state();
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            state
                .subscribers
                .entry(key.clone())
                .or_default()
                .push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Inner<K, V>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut state = inner.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(subs) = state.subscribers.get_mut(&key) {
                        subs.retain(|(sid, _)| *sid != id);
                        if subs.is_empty() {
                            state.subscribers.remove(&key);
                        }
                    }
                }
            })),
        }
    }

    fn trace_notify(&self, key: &K, count: usize) {
        #[cfg(feature = "debug-logs")]
        log::trace!("{}: notifying {} subscriber(s) of {:?}", self.name, count, key);
        #[cfg(not(feature = "debug-logs"))]
        let _ = (key, count);
    }
}

impl<K, V> KeyedObservableStore<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + PartialEq + Send + 'static,
{
    /// Server snapshot entry point. Realtime pushes and refetches must come
    /// through here and nowhere else.
    pub fn reconcile_from_server(&self, key: K, value: V) -> Reconciled {
        {
            let mut state = self.state();
            let current = state.entries.get(&key);
            let outcome = decide(
                self.policy,
                current.map_or(false, |e| e.locked),
                current.map(|e| &e.value),
                &value,
            );
            match outcome {
                Reconciled::Applied => {
                    state.write(key.clone(), value.clone());
                    let count = state.enqueue(&key, value);
                    self.trace_notify(&key, count);
                }
                Reconciled::Deferred => {
                    log::debug!("{}: server value for {:?} deferred (locked)", self.name, key);
                    return outcome;
                }
                Reconciled::Unchanged => return outcome,
            }
        }
        self.flush();
        Reconciled::Applied
    }

    /// Equality-gated `set`: skips the write and the notification when the
    /// new value equals the stored one. Returns `true` if subscribers were notified.
    pub fn set_if_changed(&self, key: K, value: V) -> bool {
        {
            let mut state = self.state();
            let unchanged = state.entries.get(&key).map_or(false, |e| e.value == value);
            if unchanged {
                // Same clearing effect as `set`, minus the notification.
                let generation = state.bump_generation();
                if let Some(entry) = state.entries.get_mut(&key) {
                    entry.locked = false;
                    entry.generation = generation;
                }
                return false;
            }
            state.write(key.clone(), value.clone());
            state.enqueue(&key, value);
        }
        self.flush();
        true
    }

    /// Authoritative full refresh: upserts every entry and clears every lock,
    /// including locks on keys absent from the refresh (those keep their value,
    /// since a refresh may cover only the loaded page). Only keys whose value
    /// changed are notified. Returns that count.
    pub fn replace_all<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let count = {
            let mut state = self.state();
            let generation = state.bump_generation();
            for entry in state.entries.values_mut() {
                entry.locked = false;
                entry.generation = generation;
            }
            let mut changed = 0;
            for (key, value) in entries {
                let differs = state
                    .entries
                    .get(&key)
                    .map_or(true, |e| e.value != value);
                if differs {
                    state.write(key.clone(), value.clone());
                    state.enqueue(&key, value);
                    changed += 1;
                }
            }
            changed
        };
        log::debug!("{}: full refresh changed {} key(s)", self.name, count);
        self.flush();
        count
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(store: &KeyedObservableStore<String, u64>, key: &str) -> (Arc<AtomicUsize>, Subscription) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = store.subscribe(key.to_string(), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, sub)
    }

    #[test]
    fn test_get_absent_key() {
        let store: KeyedObservableStore<String, u64> =
            KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        assert_eq!(store.get(&"missing".to_string()), None);
        assert!(!store.is_locked(&"missing".to_string()));
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_notifies_in_order() {
        let store = KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = store.subscribe("k".to_string(), move |v: &u64| s.lock().unwrap().push(*v));

        store.set("k".to_string(), 1);
        store.set("k".to_string(), 2);
        store.set("k".to_string(), 3);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_lock_blocks_server_write() {
        let store = KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        store.set("k".to_string(), 10u64);
        store.lock(&"k".to_string()).unwrap();

        assert_eq!(store.reconcile_from_server("k".to_string(), 99), Reconciled::Deferred);
        assert_eq!(store.get(&"k".to_string()), Some(10));

        // A later authoritative set clears the lock and the server wins again.
        store.set("k".to_string(), 11);
        assert!(!store.is_locked(&"k".to_string()));
        assert_eq!(store.reconcile_from_server("k".to_string(), 12), Reconciled::Applied);
        assert_eq!(store.get(&"k".to_string()), Some(12));
    }

    #[test]
    fn test_lock_missing_key_is_not_found() {
        let store: KeyedObservableStore<String, u64> =
            KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        assert_eq!(
            store.lock(&"nope".to_string()),
            Err(StoreError::NotFound("\"nope\"".to_string()))
        );
    }

    #[test]
    fn test_unlock_returns_previous_flag() {
        let store = KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        store.set("k".to_string(), 1u64);
        assert!(!store.unlock(&"k".to_string()));
        store.lock(&"k".to_string()).unwrap();
        assert!(store.unlock(&"k".to_string()));
        assert_eq!(store.get(&"k".to_string()), Some(1));
    }

    #[test]
    fn test_unsubscribe_keeps_data() {
        let store = KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        let (hits, sub) = counting(&store, "k");

        store.set("k".to_string(), 1);
        sub.unsubscribe();
        store.set("k".to_string(), 2);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(store.subscriber_count(&"k".to_string()), 0);
        assert_eq!(store.get(&"k".to_string()), Some(2));
    }

    #[test]
    fn test_drop_subscription_unsubscribes() {
        let store = KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        {
            let (_hits, _sub) = counting(&store, "k");
            assert_eq!(store.subscriber_count(&"k".to_string()), 1);
        }
        assert_eq!(store.subscriber_count(&"k".to_string()), 0);
    }

    #[test]
    fn test_detached_subscription_survives() {
        let store = KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        let (hits, sub) = counting(&store, "k");
        sub.detach();
        store.set("k".to_string(), 5);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_can_reenter_store() {
        let store = Arc::new(KeyedObservableStore::new("test", ReconcilePolicy::RespectLock));
        let inner = Arc::clone(&store);
        let _sub = store.subscribe("a".to_string(), move |v: &u64| {
            // Reading and writing another key from inside a callback must not deadlock.
            let _ = inner.get(&"a".to_string());
            inner.set("b".to_string(), *v * 2);
        });

        store.set("a".to_string(), 21);
        assert_eq!(store.get(&"b".to_string()), Some(42));
    }

    #[test]
    fn test_set_if_changed_skips_equal() {
        let store = KeyedObservableStore::new("test", ReconcilePolicy::SkipIfEqual);
        let (hits, _sub) = counting(&store, "k");

        assert!(store.set_if_changed("k".to_string(), 3));
        assert!(!store.set_if_changed("k".to_string(), 3));
        assert!(store.set_if_changed("k".to_string(), 4));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_init_does_not_clobber() {
        let store = KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        assert!(store.init("k".to_string(), 1u64));
        assert!(!store.init("k".to_string(), 2));
        assert_eq!(store.get(&"k".to_string()), Some(1));
    }

    #[test]
    fn test_update_missing_key() {
        let store: KeyedObservableStore<String, u64> =
            KeyedObservableStore::new("test", ReconcilePolicy::ServerAuthoritative);
        assert!(matches!(
            store.update(&"k".to_string(), |v| v + 1),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_replace_all_clears_locks_and_notifies_changes() {
        let store = KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        store.set("a".to_string(), 1u64);
        store.set("b".to_string(), 2u64);
        store.set("c".to_string(), 3u64);
        store.lock(&"a".to_string()).unwrap();
        store.lock(&"c".to_string()).unwrap();
        let (hits_a, _sa) = counting(&store, "a");
        let (hits_b, _sb) = counting(&store, "b");

        let changed = store.replace_all(vec![("a".to_string(), 100), ("b".to_string(), 2)]);

        assert_eq!(changed, 1);
        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 0);
        assert_eq!(store.get(&"a".to_string()), Some(100));
        assert!(!store.is_locked(&"a".to_string()));
        // Absent from the refresh: value kept, lock cleared.
        assert_eq!(store.get(&"c".to_string()), Some(3));
        assert!(!store.is_locked(&"c".to_string()));
    }

    #[test]
    fn test_keys_are_independent() {
        let store = KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        let (hits, _sub) = counting(&store, "a");
        store.set("b".to_string(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_racing_writer_delivered_after_inflight_notification() {
        use std::sync::mpsc;
        use std::thread;

        let store = Arc::new(KeyedObservableStore::new("test", ReconcilePolicy::ServerAuthoritative));
        store.set("k".to_string(), 0u64);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        let s = Arc::clone(&seen);
        let _sub = store.subscribe("k".to_string(), move |v: &u64| {
            if *v == 1 {
                entered_tx.lock().unwrap().send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
            }
            s.lock().unwrap().push(*v);
        });

        let writer = Arc::clone(&store);
        let handle = thread::spawn(move || writer.reconcile_from_server("k".to_string(), 1));

        // Writer thread is parked inside its callback with value 1.
        entered_rx.recv().unwrap();
        store.set("k".to_string(), 2);
        assert_eq!(store.get(&"k".to_string()), Some(2));

        release_tx.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), Reconciled::Applied);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_panicking_subscriber_does_not_stall_delivery() {
        let store = KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        let _bad = store.subscribe("k".to_string(), |v: &u64| {
            if *v == 1 {
                panic!("subscriber bug");
            }
        });
        let (hits, _sub) = counting(&store, "k");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.set("k".to_string(), 1);
        }));
        assert!(result.is_err());

        store.set("k".to_string(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(&"k".to_string()), Some(2));
    }

    #[test]
    fn test_subscribe_with_send_only_key() {
        use std::cell::Cell;
        use std::marker::PhantomData;

        // Send but not Sync.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        struct LocalKey(u32, PhantomData<Cell<()>>);

        fn assert_send<T: Send>(_: &T) {}

        let store = KeyedObservableStore::new("test", ReconcilePolicy::RespectLock);
        let key = LocalKey(7, PhantomData);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = store.subscribe(key.clone(), move |_: &u64| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_send(&sub);

        store.set(key.clone(), 1);
        sub.unsubscribe();
        store.set(key.clone(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(store.subscriber_count(&key), 0);
    }
}
