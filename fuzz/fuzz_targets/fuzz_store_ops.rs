#![no_main]
use arbitrary::Arbitrary;
use challenge_core::store::{KeyedObservableStore, ReconcilePolicy, Reconciled};
use libfuzzer_sys::fuzz_target;

/// Random interleavings of local writes, locks and server snapshots.
///
/// Invariants:
/// - a locked key never takes a RespectLock server value
/// - `set` always clears the lock
/// - `Applied` always leaves the server value in place

#[derive(Arbitrary, Debug)]
enum Op {
    Set(u8, u8),
    Init(u8, u8),
    Lock(u8),
    Unlock(u8),
    Server(u8, u8),
}

#[derive(Arbitrary, Debug)]
struct StoreInput {
    policy: u8,
    ops: Vec<Op>,
}

fuzz_target!(|input: StoreInput| {
    if input.ops.len() > 512 {
        return;
    }

    let policy = match input.policy % 3 {
        0 => ReconcilePolicy::RespectLock,
        1 => ReconcilePolicy::ServerAuthoritative,
        _ => ReconcilePolicy::SkipIfEqual,
    };
    let store: KeyedObservableStore<u8, u8> = KeyedObservableStore::new("fuzz", policy);

    for op in input.ops {
        match op {
            Op::Set(k, v) => {
                store.set(k % 8, v);
                assert!(!store.is_locked(&(k % 8)));
            }
            Op::Init(k, v) => {
                store.init(k % 8, v);
            }
            Op::Lock(k) => {
                let _ = store.lock(&(k % 8));
            }
            Op::Unlock(k) => {
                store.unlock(&(k % 8));
            }
            Op::Server(k, v) => {
                let key = k % 8;
                let was_locked = store.is_locked(&key);
                let before = store.get(&key);
                match store.reconcile_from_server(key, v) {
                    Reconciled::Applied => assert_eq!(store.get(&key), Some(v)),
                    Reconciled::Deferred | Reconciled::Unchanged => {
                        assert_eq!(store.get(&key), before)
                    }
                }
                if was_locked && policy != ReconcilePolicy::ServerAuthoritative {
                    assert_eq!(store.get(&key), before);
                }
            }
        }
    }
});
