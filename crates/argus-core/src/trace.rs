//! Abstract counterexample traces and their fingerprints.

use crate::arg::NodeId;
use ahash::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

/// Fixed hash keys: fingerprints must not depend on the process.
const FINGERPRINT_SEEDS: RandomState = RandomState::with_seeds(
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

/// Content hash of a trace's action sequence.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceFingerprint(u64);

impl fmt::Debug for TraceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceFingerprint({:016x})", self.0)
    }
}

impl fmt::Display for TraceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Alternating sequence of states and actions: `s0 a0 s1 a1 ... sn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace<S, A> {
    states: Vec<S>,
    actions: Vec<A>,
}

impl<S, A> Trace<S, A> {
    /// Build a trace.
    ///
    /// # Panics
    ///
    /// Panics unless `states` holds exactly one more element than `actions`.
    pub fn new(states: Vec<S>, actions: Vec<A>) -> Self {
        assert_eq!(
            states.len(),
            actions.len() + 1,
            "a trace has one more state than actions"
        );
        Self { states, actions }
    }

    pub fn states(&self) -> &[S] {
        &self.states
    }

    pub fn actions(&self) -> &[A] {
        &self.actions
    }

    pub fn state(&self, i: usize) -> &S {
        &self.states[i]
    }

    pub fn action(&self, i: usize) -> &A {
        &self.actions[i]
    }

    /// Number of actions (steps) in the trace.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True for a trace consisting of a single state.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<S, A: Hash> Trace<S, A> {
    /// Fingerprint of the action sequence, identical across runs of the
    /// same build.
    pub fn fingerprint(&self) -> TraceFingerprint {
        let mut hasher = FINGERPRINT_SEEDS.build_hasher();
        hasher.write_u64(self.actions.len() as u64);
        for action in &self.actions {
            action.hash(&mut hasher);
        }
        TraceFingerprint(hasher.finish())
    }
}

/// A path of the reachability graph from an initial node to a target node.
#[derive(Debug, Clone)]
pub struct ArgTrace<S, A> {
    nodes: Vec<NodeId>,
    trace: Trace<S, A>,
}

impl<S, A> ArgTrace<S, A> {
    pub(crate) fn new(nodes: Vec<NodeId>, trace: Trace<S, A>) -> Self {
        debug_assert_eq!(nodes.len(), trace.states().len());
        Self { nodes, trace }
    }

    /// Graph nodes along the path, root first.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn node(&self, i: usize) -> NodeId {
        self.nodes[i]
    }

    pub fn trace(&self) -> &Trace<S, A> {
        &self.trace
    }

    /// The node the path ends in.
    pub fn target(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }
}

impl<S, A: Hash> ArgTrace<S, A> {
    pub fn fingerprint(&self) -> TraceFingerprint {
        self.trace.fingerprint()
    }
}
