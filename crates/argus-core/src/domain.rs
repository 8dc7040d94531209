//! Capabilities an abstract domain supplies to the engine.
//!
//! Each formalism adapter implements a handful of small traits instead of
//! extending a base type: [`Analysis`] bundles the initial states, the transfer
//! relation and the partial order; [`Lts`] enumerates enabled actions;
//! [`TargetPredicate`] marks property violations. [`MergeOperator`] and
//! [`Projection`] are optional tuning knobs with trivial defaults.

use crate::error::AnalysisResult;
use std::fmt::Debug;
use std::hash::Hash;

/// An abstract state.
pub trait State: Clone + Debug + Eq + Hash + Send + Sync {
    /// True if the state has no concretization (infeasible).
    fn is_bottom(&self) -> bool;
}

/// Label of an edge in the reachability graph.
pub trait Action: Clone + Debug + Eq + Hash + Send + Sync {}

/// Configuration deciding how coarse the abstraction is.
///
/// Precisions form a join-semilattice ordered by "at least as precise as".
pub trait Prec: Clone + Debug + Eq + Send + Sync {
    /// Least precision at least as precise as both `self` and `other`.
    fn join(&self, other: &Self) -> Self;

    /// True if `self` is at least as precise as `other`.
    fn refines(&self, other: &Self) -> bool;
}

/// The trivial precision, for domains that cannot be refined.
impl Prec for () {
    fn join(&self, _other: &Self) -> Self {}

    fn refines(&self, _other: &Self) -> bool {
        true
    }
}

/// Initial states, transfer relation and partial order of an abstract domain.
pub trait Analysis: Send + Sync {
    type State: State;
    type Action: Action;
    type Prec: Prec;

    /// Abstract initial states under `prec`. Empty only if the system is vacuous.
    fn initial_states(&self, prec: &Self::Prec) -> AnalysisResult<Vec<Self::State>>;

    /// Abstract successors of `state` along `action`.
    ///
    /// Must be monotonic in the precision: refining `prec` never removes a
    /// behavior that was reachable before. An empty result is a dead end.
    fn successors(
        &self,
        state: &Self::State,
        action: &Self::Action,
        prec: &Self::Prec,
    ) -> AnalysisResult<Vec<Self::State>>;

    /// True if every concretization of `a` is a concretization of `b`.
    fn is_leq(&self, a: &Self::State, b: &Self::State) -> bool;
}

/// Labelled transition system: which actions a state enables.
///
/// The returned order is canonical; expansion creates successors in this order.
pub trait Lts<S, A>: Send + Sync {
    fn enabled_actions(&self, state: &S) -> Vec<A>;
}

/// The property-violation predicate.
pub trait TargetPredicate<S>: Send + Sync {
    fn is_target(&self, state: &S) -> bool;
}

impl<S, F> TargetPredicate<S> for F
where
    F: Fn(&S) -> bool + Send + Sync,
{
    fn is_target(&self, state: &S) -> bool {
        self(state)
    }
}

/// Combines two sibling successors into one node.
pub trait MergeOperator<S>: Send + Sync {
    /// `Some(joined)` if `a` and `b` should be replaced by a single state.
    fn merge(&self, a: &S, b: &S) -> Option<S>;
}

/// Never merges: every successor gets its own node.
#[derive(Debug, Clone, Copy, Default)]
pub struct SepMerge;

impl<S> MergeOperator<S> for SepMerge {
    fn merge(&self, _a: &S, _b: &S) -> Option<S> {
        None
    }
}

/// Equivalence key of a state.
///
/// Coverage is only searched among nodes with the same key, and the priority
/// waitlist orders nodes by it (lower keys first).
pub trait Projection<S>: Send + Sync {
    fn key(&self, state: &S) -> u64;
}

impl<S, F> Projection<S> for F
where
    F: Fn(&S) -> u64 + Send + Sync,
{
    fn key(&self, state: &S) -> u64 {
        self(state)
    }
}

/// Puts every state into the same partition.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProjection;

impl<S> Projection<S> for NoProjection {
    fn key(&self, _state: &S) -> u64 {
        0
    }
}
