//! Counterexample analysis: feasibility checking, precision refinement and pruning.

use crate::arg::Arg;
use crate::cex_storage::CexStorage;
use crate::domain::Prec;
use crate::error::{AnalysisError, AnalysisResult};
use crate::trace::{ArgTrace, Trace};
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use tracing::{debug, info};

/// Outcome of checking an abstract trace against the concrete semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceStatus<W, R> {
    /// Some concrete execution follows the trace; `W` describes it.
    Feasible(W),
    /// No concrete execution follows the trace.
    Infeasible(R),
}

/// Evidence that a trace is infeasible.
pub trait Refutation: Debug {
    /// Position in the trace of the first state that needs a finer abstraction.
    /// The graph is pruned from the node at this position.
    fn prune_index(&self) -> usize;
}

/// Decides whether an abstract trace is concretely realizable.
pub trait TraceChecker<S, A>: Send + Sync {
    type Witness: Debug + Clone;
    type Refutation: Refutation;

    fn check(
        &self,
        trace: &Trace<S, A>,
    ) -> AnalysisResult<TraceStatus<Self::Witness, Self::Refutation>>;
}

/// Turns a refutation into a finer precision.
pub trait PrecRefiner<S, A, P, R>: Send + Sync {
    /// The result must refine `prec` and must exclude `trace` once the graph
    /// is rebuilt from the pruned node.
    fn refine(&self, prec: &P, trace: &Trace<S, A>, refutation: &R) -> AnalysisResult<P>;
}

/// Outcome of one refinement step.
#[derive(Debug, Clone)]
pub enum RefinerResult<S, A, P, W> {
    /// Every examined counterexample was spurious; the graph has been pruned.
    Spurious { refined_prec: P },
    /// A counterexample is concretely realizable.
    Unsafe { trace: ArgTrace<S, A>, witness: W },
}

/// How much of the graph a spurious counterexample invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PruneStrategy {
    /// Prune the subtree below the trace node at the refutation's prune index.
    #[default]
    Lazy,
    /// Discard the whole graph.
    Full,
}

/// Analyses the counterexamples of an unsafe graph.
pub trait Refiner {
    type State;
    type Action;
    type Prec;
    type Witness;

    /// Called only when `arg` contains an uncovered target node.
    fn refine(
        &mut self,
        arg: &mut Arg<Self::State, Self::Action>,
        prec: &Self::Prec,
    ) -> AnalysisResult<RefinerResult<Self::State, Self::Action, Self::Prec, Self::Witness>>;
}

fn prune<S, A>(arg: &mut Arg<S, A>, trace: &ArgTrace<S, A>, index: usize, strategy: PruneStrategy) {
    match strategy {
        PruneStrategy::Full => arg.prune_all(),
        PruneStrategy::Lazy => {
            let node = trace.node(index.min(trace.nodes().len() - 1));
            debug!(node = %node, index, "pruning graph");
            arg.prune(node);
        }
    }
}

fn no_cex() -> AnalysisError {
    AnalysisError::Domain("refinement requested for a graph without counterexamples".into())
}

/// Examines the first counterexample (shortest, then oldest) only.
pub struct SingleTraceRefiner<C, R, S, A, P> {
    checker: C,
    refiner: R,
    strategy: PruneStrategy,
    storage: CexStorage,
    _marker: PhantomData<fn() -> (S, A, P)>,
}

impl<C, R, S, A, P> SingleTraceRefiner<C, R, S, A, P> {
    pub fn new(checker: C, refiner: R, strategy: PruneStrategy) -> Self {
        Self {
            checker,
            refiner,
            strategy,
            storage: CexStorage::new(),
            _marker: PhantomData,
        }
    }
}

impl<C, R, S, A, P> Refiner for SingleTraceRefiner<C, R, S, A, P>
where
    C: TraceChecker<S, A>,
    R: PrecRefiner<S, A, P, C::Refutation>,
    S: Clone,
    A: Clone + Hash,
    P: Prec,
{
    type State = S;
    type Action = A;
    type Prec = P;
    type Witness = C::Witness;

    fn refine(
        &mut self,
        arg: &mut Arg<S, A>,
        prec: &P,
    ) -> AnalysisResult<RefinerResult<S, A, P, C::Witness>> {
        let cex = arg.cexs().first().copied().ok_or_else(no_cex)?;
        let arg_trace = arg.trace_to(cex);

        match self.checker.check(arg_trace.trace())? {
            TraceStatus::Feasible(witness) => {
                info!(len = arg_trace.trace().len(), "counterexample is feasible");
                Ok(RefinerResult::Unsafe {
                    trace: arg_trace,
                    witness,
                })
            }
            TraceStatus::Infeasible(refutation) => {
                let refined = self.refiner.refine(prec, arg_trace.trace(), &refutation)?;
                let fingerprint = arg_trace.fingerprint();
                let repeated = self.storage.observe(arg, &arg_trace);
                if repeated && refined == *prec {
                    return Err(AnalysisError::RefinementDivergence { fingerprint });
                }
                debug!(
                    len = arg_trace.trace().len(),
                    %fingerprint,
                    repeated,
                    refuted = self.storage.refuted(),
                    prune_index = refutation.prune_index(),
                    "counterexample is spurious"
                );
                prune(arg, &arg_trace, refutation.prune_index(), self.strategy);
                Ok(RefinerResult::Spurious {
                    refined_prec: refined,
                })
            }
        }
    }
}

/// Examines every counterexample of the graph and joins their refinements.
///
/// A single feasible counterexample makes the result unsafe; the graph is
/// then left untouched.
pub struct MultiTraceRefiner<C, R, S, A, P> {
    checker: C,
    refiner: R,
    strategy: PruneStrategy,
    storage: CexStorage,
    _marker: PhantomData<fn() -> (S, A, P)>,
}

impl<C, R, S, A, P> MultiTraceRefiner<C, R, S, A, P> {
    pub fn new(checker: C, refiner: R, strategy: PruneStrategy) -> Self {
        Self {
            checker,
            refiner,
            strategy,
            storage: CexStorage::new(),
            _marker: PhantomData,
        }
    }
}

impl<C, R, S, A, P> Refiner for MultiTraceRefiner<C, R, S, A, P>
where
    C: TraceChecker<S, A>,
    R: PrecRefiner<S, A, P, C::Refutation>,
    S: Clone,
    A: Clone + Hash,
    P: Prec,
{
    type State = S;
    type Action = A;
    type Prec = P;
    type Witness = C::Witness;

    fn refine(
        &mut self,
        arg: &mut Arg<S, A>,
        prec: &P,
    ) -> AnalysisResult<RefinerResult<S, A, P, C::Witness>> {
        let cexs = arg.cexs();
        if cexs.is_empty() {
            return Err(no_cex());
        }

        let mut spurious = Vec::with_capacity(cexs.len());
        let mut refined = prec.clone();
        for cex in cexs {
            let arg_trace = arg.trace_to(cex);
            match self.checker.check(arg_trace.trace())? {
                TraceStatus::Feasible(witness) => {
                    info!(len = arg_trace.trace().len(), "counterexample is feasible");
                    return Ok(RefinerResult::Unsafe {
                        trace: arg_trace,
                        witness,
                    });
                }
                TraceStatus::Infeasible(refutation) => {
                    let p = self.refiner.refine(prec, arg_trace.trace(), &refutation)?;
                    refined = refined.join(&p);
                    spurious.push((arg_trace, refutation.prune_index()));
                }
            }
        }

        let mut repeated = None;
        for (arg_trace, _) in &spurious {
            if self.storage.observe(arg, arg_trace) && repeated.is_none() {
                repeated = Some(arg_trace.fingerprint());
            }
        }
        if let Some(fingerprint) = repeated {
            if refined == *prec {
                return Err(AnalysisError::RefinementDivergence { fingerprint });
            }
        }

        debug!(
            count = spurious.len(),
            refuted = self.storage.refuted(),
            "all counterexamples are spurious"
        );
        for (arg_trace, index) in &spurious {
            prune(arg, arg_trace, *index, self.strategy);
            if self.strategy == PruneStrategy::Full {
                break;
            }
        }
        Ok(RefinerResult::Spurious {
            refined_prec: refined,
        })
    }
}
