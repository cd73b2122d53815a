//! Fine-grained keyed locking for transaction imports.
//!
//! A [`KeyedLock`] coordinates importers by txid: a keyed acquisition
//! takes its whole key set atomically, so importers whose sets intersect
//! are serialized FIFO while disjoint importers run concurrently. An
//! exclusive acquisition (used for reorg rollbacks) waits for every keyed
//! holder to drain and blocks keyed acquisitions that arrive after it.
//!
//! Atomic full-set acquisition rules out lock-order cycles between
//! importers.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::types::Txid;

#[derive(Default)]
struct LockState {
    held: HashSet<Txid>,
    exclusive_active: bool,
    queue: VecDeque<Waiter>,
}

struct Waiter {
    /// The requested key set; None requests exclusive mode.
    keys: Option<BTreeSet<Txid>>,
    ready: oneshot::Sender<LockGuard>,
}

/// A keyed reader/writer-style coordinator with a global-exclusive mode.
#[derive(Clone, Default)]
pub struct KeyedLock {
    state: Arc<Mutex<LockState>>,
}

impl KeyedLock {
    /// Creates an uncontended lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires all of `keys` atomically, waiting FIFO behind any earlier
    /// waiter whose key set intersects and behind any queued exclusive
    /// acquisition.
    pub async fn lock_keys(&self, keys: BTreeSet<Txid>) -> LockGuard {
        let pending = {
            let mut state = self.state.lock().expect("lock state poisoned");
            let free = !state.exclusive_active
                && state.queue.is_empty()
                && keys.iter().all(|key| !state.held.contains(key));
            if free {
                state.held.extend(keys.iter().copied());
                None
            } else {
                let (ready, pending) = oneshot::channel();
                state.queue.push_back(Waiter {
                    keys: Some(keys.clone()),
                    ready,
                });
                Some(pending)
            }
        };

        match pending {
            None => LockGuard {
                lock: self.clone(),
                mode: Mode::Keys(keys),
            },
            Some(pending) => pending.await.unwrap_or(LockGuard {
                lock: self.clone(),
                mode: Mode::Defused,
            }),
        }
    }

    /// Acquires the lock in global-exclusive mode: waits for every keyed
    /// holder to drain, and keyed acquisitions arriving later queue behind
    /// it.
    pub async fn lock_exclusive(&self) -> LockGuard {
        let pending = {
            let mut state = self.state.lock().expect("lock state poisoned");
            let free =
                !state.exclusive_active && state.queue.is_empty() && state.held.is_empty();
            if free {
                state.exclusive_active = true;
                None
            } else {
                let (ready, pending) = oneshot::channel();
                state.queue.push_back(Waiter { keys: None, ready });
                Some(pending)
            }
        };

        match pending {
            None => LockGuard {
                lock: self.clone(),
                mode: Mode::Exclusive,
            },
            Some(pending) => pending.await.unwrap_or(LockGuard {
                lock: self.clone(),
                mode: Mode::Defused,
            }),
        }
    }

    /// Runs `body` under the given key set.
    pub async fn with_keys<T, F: std::future::Future<Output = T>>(
        &self,
        keys: BTreeSet<Txid>,
        body: F,
    ) -> T {
        let _guard = self.lock_keys(keys).await;
        body.await
    }

    /// Runs `body` in global-exclusive mode.
    pub async fn with_exclusive<T, F: std::future::Future<Output = T>>(&self, body: F) -> T {
        let _guard = self.lock_exclusive().await;
        body.await
    }

    fn release(&self, mode: &Mode) {
        let orphaned = {
            let mut state = self.state.lock().expect("lock state poisoned");
            match mode {
                Mode::Keys(keys) => {
                    for key in keys {
                        state.held.remove(key);
                    }
                }
                Mode::Exclusive => state.exclusive_active = false,
                Mode::Defused => return,
            }
            Self::drain(self, &mut state)
        };
        // Grants whose waiter vanished release outside the state lock,
        // re-entering this function with their own keys.
        drop(orphaned);
    }

    /// Grants queued waiters in FIFO order. A keyed waiter may overtake an
    /// earlier keyed waiter only if their key sets are disjoint; nothing
    /// overtakes a queued exclusive waiter.
    fn drain(&self, state: &mut LockState) -> Vec<LockGuard> {
        let mut orphaned = Vec::new();
        let mut blocked: HashSet<Txid> = HashSet::new();
        let mut index = 0;

        while index < state.queue.len() {
            if state.exclusive_active {
                break;
            }
            let grantable = match &state.queue[index].keys {
                Some(keys) => keys
                    .iter()
                    .all(|key| !state.held.contains(key) && !blocked.contains(key)),
                None => state.held.is_empty(),
            };

            if !grantable {
                match &state.queue[index].keys {
                    Some(keys) => {
                        blocked.extend(keys.iter().copied());
                        index += 1;
                        continue;
                    }
                    // An exclusive waiter that cannot run yet holds back
                    // everything queued behind it.
                    None => break,
                }
            }

            let waiter = state
                .queue
                .remove(index)
                .expect("indexed waiter exists");
            let mode = match waiter.keys {
                Some(keys) => {
                    state.held.extend(keys.iter().copied());
                    Mode::Keys(keys)
                }
                None => {
                    state.exclusive_active = true;
                    Mode::Exclusive
                }
            };
            let guard = LockGuard {
                lock: self.clone(),
                mode,
            };
            if let Err(guard) = waiter.ready.send(guard) {
                // The waiter was cancelled; undo its grant once we are
                // outside the state lock.
                orphaned.push(guard);
            }
        }

        orphaned
    }
}

enum Mode {
    Keys(BTreeSet<Txid>),
    Exclusive,
    /// The lock was torn down while waiting; nothing to release.
    Defused,
}

/// Holds a [`KeyedLock`] acquisition; releases on drop.
pub struct LockGuard {
    lock: KeyedLock,
    mode: Mode,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mode = std::mem::replace(&mut self.mode, Mode::Defused);
        self.lock.release(&mode);
    }
}
