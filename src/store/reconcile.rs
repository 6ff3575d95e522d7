/// Reconciliation policy and the two-phase optimistic write protocol.
///
/// A local mutation goes through `begin_optimistic` (lock + apply + notify),
/// and is later settled exactly once with `confirm` or `revert`. If another
/// mutation has replaced the optimistic value in the meantime, settlement is a
/// no-op and reports [`Settlement::Superseded`]: the newer write owns the key.
use std::fmt::{Debug, Display};
use std::hash::Hash;

use super::{Inner, KeyedObservableStore, Result, StoreError};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// How a store merges server snapshots with local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcilePolicy {
    /// Server values are ignored while the key is locked.
    #[default]
    RespectLock,
    /// Server values always overwrite; there is no lock semantics.
    ServerAuthoritative,
    /// Like `RespectLock`, but values equal to the stored one are dropped
    /// without notifying.
    SkipIfEqual,
}

/// Outcome of a server snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Applied,
    /// Key is locked by a pending local write.
    Deferred,
    /// Equality-gated and identical to the stored value.
    Unchanged,
}

/// Pure merge decision, shared by every store.
pub fn decide<V: PartialEq>(
    policy: ReconcilePolicy,
    locked: bool,
    current: Option<&V>,
    incoming: &V,
) -> Reconciled {
    match policy {
        ReconcilePolicy::ServerAuthoritative => Reconciled::Applied,
        ReconcilePolicy::RespectLock => {
            if locked {
                Reconciled::Deferred
            } else {
                Reconciled::Applied
            }
        }
        ReconcilePolicy::SkipIfEqual => {
            if locked {
                Reconciled::Deferred
            } else if current == Some(incoming) {
                Reconciled::Unchanged
            } else {
                Reconciled::Applied
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Two-phase optimistic writes
// ---------------------------------------------------------------------------

/// An outstanding optimistic write. Must be settled with
/// [`KeyedObservableStore::confirm`] or [`KeyedObservableStore::revert`].
///
/// Only the most recent write on a key can settle it. Earlier writes, and
/// writes overtaken by `set`, a server apply or a full refresh, settle as
/// [`Settlement::Superseded`] and leave the key untouched.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "an optimistic write must be confirmed or reverted"]
pub struct PendingWrite<K, V> {
    pub key: K,
    pub previous: V,
    pub optimistic: V,
    generation: u64,
}

impl<K, V> PendingWrite<K, V> {
    /// Write stamp; strictly increasing per store.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// How a pending write was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Confirmed,
    Reverted,
    /// The key changed since the write began; nothing was done.
    Superseded,
}

impl<K, V> KeyedObservableStore<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    V: Clone + PartialEq + Send + 'static,
{
    /// Phase one: lock `key`, replace its value with `f(previous)` and notify.
    pub fn begin_optimistic<F>(&self, key: &K, f: F) -> Result<PendingWrite<K, V>>
    where
        F: FnOnce(&V) -> V,
    {
        let write = {
            let mut state = self.state();
            let generation = state.bump_generation();
            let entry = state
                .entries
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(format!("{:?}", key)))?;
            let previous = entry.value.clone();
            let optimistic = f(&previous);
            entry.value = optimistic.clone();
            entry.locked = true;
            entry.generation = generation;
            state.enqueue(key, optimistic.clone());
            PendingWrite {
                key: key.clone(),
                previous,
                optimistic,
                generation,
            }
        };
        log::debug!(
            "{}: optimistic write #{} on {:?}",
            self.name,
            write.generation,
            key
        );
        self.flush();
        Ok(write)
    }

    /// Phase two (success): unlock, adopting `server_value` if the backend
    /// returned one that differs from the optimistic value.
    pub fn confirm(&self, write: PendingWrite<K, V>, server_value: Option<V>) -> Settlement {
        {
            let mut state = self.state();
            if !state.owns(&write) {
                log::debug!("{}: confirm on {:?} superseded", self.name, write.key);
                return Settlement::Superseded;
            }
            match server_value {
                Some(value) if value != write.optimistic => {
                    state.write(write.key.clone(), value.clone());
                    state.enqueue(&write.key, value);
                }
                _ => {
                    if let Some(entry) = state.entries.get_mut(&write.key) {
                        entry.locked = false;
                    }
                }
            }
        }
        self.flush();
        Settlement::Confirmed
    }

    /// Phase two (failure): restore the previous value and unlock.
    pub fn revert(&self, write: PendingWrite<K, V>) -> Settlement {
        {
            let mut state = self.state();
            if !state.owns(&write) {
                log::debug!("{}: revert on {:?} superseded", self.name, write.key);
                return Settlement::Superseded;
            }
            state.write(write.key.clone(), write.previous.clone());
            state.enqueue(&write.key, write.previous);
        }
        log::warn!("{}: optimistic write on {:?} rolled back", self.name, write.key);
        self.flush();
        Settlement::Reverted
    }

    /// Settle from a backend result: `Ok` confirms, `Err` reverts.
    pub fn settle<E: Display>(
        &self,
        write: PendingWrite<K, V>,
        outcome: std::result::Result<Option<V>, E>,
    ) -> Settlement {
        match outcome {
            Ok(server_value) => self.confirm(write, server_value),
            Err(e) => {
                log::warn!("{}: backend rejected write on {:?}: {}", self.name, write.key, e);
                self.revert(write)
            }
        }
    }
}

impl<K: Eq + Hash, V> Inner<K, V> {
    /// `write` is still the latest optimistic write on its key.
    fn owns(&self, write: &PendingWrite<K, V>) -> bool {
        self.entries
            .get(&write.key)
            .map_or(false, |e| e.locked && e.generation == write.generation)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
