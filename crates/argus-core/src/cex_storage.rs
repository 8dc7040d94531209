//! Memory of refuted counterexamples.
//!
//! When the same abstract counterexample is refuted twice, coverage along it
//! is the usual culprit: a node on the trace kept covering the part of the
//! graph that would have exposed the refinement. On a repeat every trace node
//! releases the nodes it covers and loses the ability to cover.

use crate::arg::Arg;
use crate::trace::{ArgTrace, TraceFingerprint};
use ahash::AHashSet;
use std::hash::Hash;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct CexStorage {
    seen: AHashSet<TraceFingerprint>,
}

impl CexStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct refuted traces.
    pub fn refuted(&self) -> usize {
        self.seen.len()
    }

    /// Record a refuted trace. Returns true if it was refuted before, in
    /// which case coverage along the trace has been disabled.
    pub fn observe<S, A: Hash>(&mut self, arg: &mut Arg<S, A>, trace: &ArgTrace<S, A>) -> bool {
        let fingerprint = trace.fingerprint();
        if self.seen.insert(fingerprint) {
            return false;
        }
        debug!(%fingerprint, len = trace.trace().len(), "counterexample refuted again, disabling coverage along it");
        for &node in trace.nodes() {
            if arg.contains(node) {
                arg.clear_covered_nodes(node);
                arg.disable_covering(node);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_releases_coverage_along_trace() {
        let mut arg: Arg<u8, char> = Arg::new();
        let root = arg.create_init_node(0, 0, false);
        let mid = arg.create_succ_node(root, 'a', 1, 0, false);
        let tgt = arg.create_succ_node(mid, 'b', 2, 0, true);
        let side = arg.create_succ_node(root, 'c', 1, 0, false);
        arg.cover(side, mid);

        let mut storage = CexStorage::new();
        let trace = arg.trace_to(tgt);
        assert!(!storage.observe(&mut arg, &trace));
        assert!(arg[side].is_covered());
        assert!(arg[mid].can_cover());

        assert!(storage.observe(&mut arg, &trace));
        assert!(!arg[side].is_covered());
        assert!(!arg[mid].can_cover());
        assert!(!arg[root].can_cover());
        assert!(arg[side].can_cover());
        assert_eq!(storage.refuted(), 1);
    }
}
