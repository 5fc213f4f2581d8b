//! Lease bookkeeping for one queue pair.
//!
//! A [`LeaseLedger`] only ever lives inside the coordinator's mutex, so
//! every method here runs with the lock already held. Nothing outside this
//! crate can reach it; the public, locking operations are on
//! [`SharedThreadMerger`](crate::SharedThreadMerger).

use std::collections::BTreeMap;

use tracing::warn;

use tmerge_types::{CallerId, LeaseTerm};

/// Remaining lease terms by caller, plus the merged flag they protect.
///
/// A caller is present iff it has an outstanding term, possibly zero while
/// it waits to be reclaimed by an unmerge attempt.
#[derive(Debug, Default)]
pub(crate) struct LeaseLedger {
    terms: BTreeMap<CallerId, LeaseTerm>,
    merged: bool,
}

impl LeaseLedger {
    pub(crate) fn is_merged(&self) -> bool {
        self.merged
    }

    pub(crate) fn set_merged(&mut self, merged: bool) {
        self.merged = merged;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.terms.len()
    }

    pub(crate) fn term(&self, caller: CallerId) -> Option<LeaseTerm> {
        self.terms.get(&caller).copied()
    }

    /// True when no caller has a positive term left. Vacuously true for an
    /// empty ledger.
    pub(crate) fn all_terms_zero(&self) -> bool {
        self.terms.values().all(|&t| t == 0)
    }

    /// Overwrite the caller's term.
    pub(crate) fn set_term(&mut self, caller: CallerId, term: LeaseTerm) {
        self.terms.insert(caller, term);
    }

    /// Raise the caller's term to `term`; never lowers it. An absent caller
    /// is recorded with `term`.
    pub(crate) fn raise_term(&mut self, caller: CallerId, term: LeaseTerm) {
        let entry = self.terms.entry(caller).or_insert(0);
        if term > *entry {
            *entry = term;
        }
    }

    /// Take one unit off the caller's term. Absent or exhausted callers are
    /// left alone.
    pub(crate) fn decrement(&mut self, caller: CallerId) {
        match self.terms.get_mut(&caller) {
            Some(term) if *term > 0 => *term -= 1,
            Some(_) => warn!(caller = %caller, "lease already exhausted; decrement ignored"),
            None => warn!(caller = %caller, "decrement from unregistered caller ignored"),
        }
    }

    pub(crate) fn remove(&mut self, caller: CallerId) -> Option<LeaseTerm> {
        self.terms.remove(&caller)
    }

    pub(crate) fn entries(&self) -> Vec<(CallerId, LeaseTerm)> {
        self.terms.iter().map(|(&c, &t)| (c, t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn caller(raw: u64) -> CallerId {
        CallerId::from_raw(raw)
    }

    #[test]
    fn empty_ledger_is_all_zero_and_unmerged() {
        let ledger = LeaseLedger::default();
        assert!(ledger.is_empty());
        assert!(ledger.all_terms_zero());
        assert!(!ledger.is_merged());
    }

    #[test]
    fn set_term_overwrites() {
        let mut ledger = LeaseLedger::default();
        ledger.set_term(caller(1), 5);
        ledger.set_term(caller(1), 2);
        assert_eq!(ledger.term(caller(1)), Some(2));
    }

    #[test]
    fn raise_term_never_lowers() {
        let mut ledger = LeaseLedger::default();
        ledger.set_term(caller(1), 5);
        ledger.raise_term(caller(1), 2);
        assert_eq!(ledger.term(caller(1)), Some(5));
        ledger.raise_term(caller(1), 7);
        assert_eq!(ledger.term(caller(1)), Some(7));
    }

    #[test]
    fn raise_term_registers_absent_caller() {
        let mut ledger = LeaseLedger::default();
        ledger.raise_term(caller(3), 4);
        assert_eq!(ledger.term(caller(3)), Some(4));
    }

    #[test]
    fn decrement_stops_at_zero() {
        let mut ledger = LeaseLedger::default();
        ledger.set_term(caller(1), 1);
        ledger.decrement(caller(1));
        ledger.decrement(caller(1));
        assert_eq!(ledger.term(caller(1)), Some(0));
        assert!(ledger.all_terms_zero());
    }

    #[test]
    fn decrement_of_absent_caller_does_not_register_it() {
        let mut ledger = LeaseLedger::default();
        ledger.decrement(caller(9));
        assert!(ledger.is_empty());
    }

    #[test]
    fn all_zero_requires_every_caller() {
        let mut ledger = LeaseLedger::default();
        ledger.set_term(caller(1), 0);
        ledger.set_term(caller(2), 1);
        assert!(!ledger.all_terms_zero());
        ledger.decrement(caller(2));
        assert!(ledger.all_terms_zero());
        assert!(!ledger.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(u64, LeaseTerm),
        Raise(u64, LeaseTerm),
        Decrement(u64),
        Remove(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..4, 1u32..6).prop_map(|(c, t)| Op::Set(c, t)),
            (0u64..4, 1u32..6).prop_map(|(c, t)| Op::Raise(c, t)),
            (0u64..4).prop_map(Op::Decrement),
            (0u64..4).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn terms_track_a_simple_model(ops in prop::collection::vec(op(), 0..64)) {
            let mut ledger = LeaseLedger::default();
            let mut model: BTreeMap<u64, LeaseTerm> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Set(c, t) => {
                        ledger.set_term(caller(c), t);
                        model.insert(c, t);
                    }
                    Op::Raise(c, t) => {
                        ledger.raise_term(caller(c), t);
                        let e = model.entry(c).or_insert(0);
                        *e = (*e).max(t);
                    }
                    Op::Decrement(c) => {
                        ledger.decrement(caller(c));
                        if let Some(e) = model.get_mut(&c) {
                            *e = e.saturating_sub(1);
                        }
                    }
                    Op::Remove(c) => {
                        prop_assert_eq!(ledger.remove(caller(c)), model.remove(&c));
                    }
                }
                prop_assert_eq!(ledger.is_empty(), model.is_empty());
                prop_assert_eq!(ledger.all_terms_zero(), model.values().all(|&t| t == 0));
            }

            let expected: Vec<(CallerId, LeaseTerm)> =
                model.into_iter().map(|(c, t)| (caller(c), t)).collect();
            prop_assert_eq!(ledger.entries(), expected);
        }
    }
}
