//! Dependency bookkeeping for unconfirmed transactions whose parents are
//! not yet known locally.
//!
//! Conceptually a DAG of txid-by-txid edges, represented as two adjacency
//! maps (child to missing parents, parent to waiting children) so that
//! resolving a parent is linear in its number of children. No cycles can
//! occur because a transaction cannot be its own ancestor.
//!
//! Not thread-safe on its own; the synchronizer owns it behind a mutex.

use std::collections::{BTreeSet, HashMap};

use crate::types::Txid;

/// The set of transactions deferred on missing parents.
#[derive(Debug, Default)]
pub struct OrphanPool {
    /// Child txid to the parents it is still missing.
    deps: HashMap<Txid, BTreeSet<Txid>>,
    /// Missing parent txid to the children waiting on it.
    waiting: HashMap<Txid, Vec<Txid>>,
}

impl OrphanPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `child` is waiting on `parents`.
    pub fn mark(&mut self, child: Txid, parents: impl IntoIterator<Item = Txid>) {
        let deps = self.deps.entry(child).or_default();
        for parent in parents {
            if deps.insert(parent) {
                self.waiting.entry(parent).or_default().push(child);
            }
        }
    }

    /// Removes `parent` from every dependency set that mentions it and
    /// returns the children that became fully resolved.
    pub fn resolve(&mut self, parent: &Txid) -> Vec<Txid> {
        let children = match self.waiting.remove(parent) {
            Some(children) => children,
            None => return Vec::new(),
        };

        let mut resolved = Vec::new();
        for child in children {
            if let Some(deps) = self.deps.get_mut(&child) {
                deps.remove(parent);
                if deps.is_empty() {
                    self.deps.remove(&child);
                    resolved.push(child);
                }
            }
        }
        resolved
    }

    /// True if `txid` is currently deferred.
    pub fn contains(&self, txid: &Txid) -> bool {
        self.deps.contains_key(txid)
    }

    /// The parents `child` is still missing, if deferred.
    pub fn missing_parents(&self, child: &Txid) -> Option<&BTreeSet<Txid>> {
        self.deps.get(child)
    }

    /// Number of deferred transactions.
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    /// True when nothing is deferred.
    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(byte: u8) -> Txid {
        Txid::from([byte; 32])
    }

    /// The two maps must stay mirror images of each other.
    fn assert_symmetric(pool: &OrphanPool) {
        for (child, parents) in &pool.deps {
            for parent in parents {
                assert!(
                    pool.waiting
                        .get(parent)
                        .is_some_and(|children| children.contains(child)),
                    "deps edge {child} -> {parent} missing from waiting"
                );
            }
        }
        for (parent, children) in &pool.waiting {
            for child in children {
                assert!(
                    pool.deps
                        .get(child)
                        .is_some_and(|parents| parents.contains(parent)),
                    "waiting edge {parent} -> {child} missing from deps"
                );
            }
        }
    }

    #[test]
    fn resolve_returns_children_with_no_remaining_parents() {
        let mut pool = OrphanPool::new();
        pool.mark(txid(10), [txid(1), txid(2)]);
        pool.mark(txid(11), [txid(1)]);
        assert_symmetric(&pool);

        let resolved = pool.resolve(&txid(1));
        assert_eq!(resolved, vec![txid(11)]);
        assert!(pool.contains(&txid(10)));
        assert_symmetric(&pool);

        let resolved = pool.resolve(&txid(2));
        assert_eq!(resolved, vec![txid(10)]);
        assert!(pool.is_empty());
    }

    #[test]
    fn resolving_an_unknown_parent_is_a_no_op() {
        let mut pool = OrphanPool::new();
        pool.mark(txid(10), [txid(1)]);
        assert!(pool.resolve(&txid(9)).is_empty());
        assert_eq!(pool.len(), 1);
        assert_symmetric(&pool);
    }

    #[test]
    fn duplicate_marks_do_not_double_register() {
        let mut pool = OrphanPool::new();
        pool.mark(txid(10), [txid(1)]);
        pool.mark(txid(10), [txid(1), txid(2)]);
        assert_symmetric(&pool);
        assert_eq!(
            pool.missing_parents(&txid(10)).unwrap().len(),
            2,
            "parents deduplicated"
        );

        pool.resolve(&txid(1));
        let resolved = pool.resolve(&txid(2));
        assert_eq!(resolved, vec![txid(10)]);
        assert!(pool.is_empty());
    }
}
