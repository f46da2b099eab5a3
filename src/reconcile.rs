//! Diffing an observed, ordered collection against a fresh snapshot of candidates.
//!
//! A pass keeps the observed items that still pass the filter, in their existing order, and appends the newly
//! passing candidates in the order the snapshot presents them. Each pass yields a single
//! [`ReconciliationReport`] that callers apply to their own presentation layer.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

/// Items that can be reconciled by identity.
pub trait Keyed {
    /// The identity of an item within a collection
    type Key: Clone + Eq + Hash + std::fmt::Debug;

    /// Returns this item's identity.
    fn key(&self) -> Self::Key;
}

/// The result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationReport<T: Keyed> {
    /// Newly visible items, in candidate order
    pub added: Vec<T>,
    /// Items no longer visible, in their former order. Contains no duplicates.
    pub removed: Vec<T>,
    /// Retained items whose contents changed since the previous pass
    pub updated: Vec<T::Key>,
    /// The final order of the observed collection
    pub retained_order: Vec<T::Key>,
}

impl<T: Keyed> ReconciliationReport<T> {
    /// Returns `true` if the pass changed nothing observable.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    /// Returns `true` if the pass added or removed items.
    pub fn changes_membership(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// Filter predicate applied to candidates.
pub type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Maintains one observed collection.
///
/// The reconciler is the single writer of its collection. Readers get immutable snapshots through
/// [`snapshot`][Reconciler::snapshot] that are never partially updated.
pub struct Reconciler<T: Keyed> {
    observed: Arc<[T]>,
    candidates: Vec<T>,
    predicate: Predicate<T>,
}

impl<T: Keyed> std::fmt::Debug for Reconciler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("observed", &self.observed.len())
            .field("candidates", &self.candidates.len())
            .finish()
    }
}

impl<T: Keyed + Clone + PartialEq> Default for Reconciler<T> {
    fn default() -> Self {
        Reconciler::new(|_| true)
    }
}

impl<T: Keyed + Clone + PartialEq> Reconciler<T> {
    /// Creates an empty reconciler filtering candidates with `predicate`.
    pub fn new(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        Reconciler {
            observed: Arc::from(Vec::new()),
            candidates: Vec::new(),
            predicate: Box::new(predicate),
        }
    }

    /// The current observed collection.
    pub fn snapshot(&self) -> Arc<[T]> {
        self.observed.clone()
    }

    /// The last candidate snapshot, unfiltered.
    pub fn candidates(&self) -> &[T] {
        &self.candidates
    }

    /// Runs a pass against a new candidate snapshot.
    ///
    /// When a key occurs more than once in `candidates`, the first occurrence wins.
    pub fn reconcile(&mut self, candidates: Vec<T>) -> ReconciliationReport<T> {
        let mut seen = HashSet::with_capacity(candidates.len());
        self.candidates = candidates.into_iter().filter(|c| seen.insert(c.key())).collect();
        self.pass()
    }

    /// Replaces the filter and re-runs the pass against the last candidate snapshot.
    pub fn set_predicate(&mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> ReconciliationReport<T> {
        self.predicate = Box::new(predicate);
        self.pass()
    }

    fn pass(&mut self) -> ReconciliationReport<T> {
        let passing: Vec<&T> = self.candidates.iter().filter(|c| (self.predicate)(*c)).collect();
        let by_key: HashMap<T::Key, &T> = passing.iter().map(|c| (c.key(), *c)).collect();

        let mut next = Vec::with_capacity(passing.len());
        let mut removed = Vec::new();
        let mut updated = Vec::new();
        let mut kept = HashSet::with_capacity(self.observed.len());

        for old in self.observed.iter() {
            let key = old.key();
            match by_key.get(&key) {
                Some(fresh) => {
                    if *fresh != old {
                        updated.push(key.clone());
                    }
                    next.push((*fresh).clone());
                    kept.insert(key);
                }
                None => removed.push(old.clone()),
            }
        }

        let added: Vec<T> = passing
            .into_iter()
            .filter(|c| !kept.contains(&c.key()))
            .cloned()
            .collect();
        next.extend(added.iter().cloned());

        let retained_order = next.iter().map(|item| item.key()).collect();
        self.observed = Arc::from(next);

        tracing::trace!(
            added = added.len(),
            removed = removed.len(),
            updated = updated.len(),
            total = self.observed.len(),
            "reconciled"
        );

        ReconciliationReport {
            added,
            removed,
            updated,
            retained_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        key: char,
        named: bool,
        rev: u32,
    }

    impl Keyed for Item {
        type Key = char;

        fn key(&self) -> char {
            self.key
        }
    }

    fn item(key: char) -> Item {
        Item { key, named: true, rev: 0 }
    }

    fn keys(items: &[Item]) -> Vec<char> {
        items.iter().map(|i| i.key).collect()
    }

    #[test]
    fn keeps_order_and_appends_new() {
        let mut rec = Reconciler::default();
        rec.reconcile(vec![item('A'), item('B'), item('C')]);

        let report = rec.reconcile(vec![item('B'), item('C'), item('D')]);
        assert_eq!(keys(&report.removed), vec!['A']);
        assert_eq!(keys(&report.added), vec!['D']);
        assert_eq!(report.retained_order, vec!['B', 'C', 'D']);
        assert_eq!(keys(&rec.snapshot()), vec!['B', 'C', 'D']);
    }

    #[test]
    fn existing_order_wins_over_candidate_order() {
        let mut rec = Reconciler::default();
        rec.reconcile(vec![item('A'), item('B')]);
        let report = rec.reconcile(vec![item('C'), item('B'), item('A')]);
        assert_eq!(report.retained_order, vec!['A', 'B', 'C']);
        assert!(report.removed.is_empty());
    }

    #[test]
    fn predicate_change_reuses_last_candidates() {
        let mut rec = Reconciler::new(|i: &Item| i.named);
        let unnamed = Item {
            key: 'U',
            named: false,
            rev: 0,
        };
        let report = rec.reconcile(vec![item('A'), unnamed.clone(), item('B')]);
        assert_eq!(keys(&report.added), vec!['A', 'B']);

        let report = rec.set_predicate(|_| true);
        assert_eq!(report.added, vec![unnamed]);
        assert_eq!(report.retained_order, vec!['A', 'B', 'U']);

        let report = rec.set_predicate(|i: &Item| i.named);
        assert_eq!(keys(&report.removed), vec!['U']);
        assert!(report.added.is_empty());
    }

    #[test]
    fn reports_updates_for_changed_items() {
        let mut rec = Reconciler::default();
        rec.reconcile(vec![item('A'), item('B')]);
        let report = rec.reconcile(vec![item('A'), Item { rev: 1, ..item('B') }]);
        assert_eq!(report.updated, vec!['B']);
        assert!(!report.changes_membership());
        assert_eq!(rec.snapshot()[1].rev, 1);

        let report = rec.reconcile(vec![item('A'), Item { rev: 1, ..item('B') }]);
        assert!(report.is_empty());
    }

    #[test]
    fn duplicate_candidates_keep_first() {
        let mut rec = Reconciler::default();
        let report = rec.reconcile(vec![item('A'), Item { rev: 9, ..item('A') }]);
        assert_eq!(report.added, vec![item('A')]);
        assert_eq!(rec.candidates().len(), 1);
    }

    #[test]
    fn snapshots_are_stable_across_passes() {
        let mut rec = Reconciler::default();
        rec.reconcile(vec![item('A')]);
        let before = rec.snapshot();
        rec.reconcile(vec![item('B')]);
        assert_eq!(keys(&before), vec!['A']);
        assert_eq!(keys(&rec.snapshot()), vec!['B']);
    }
}
