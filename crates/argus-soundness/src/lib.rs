//! Soundness harness for the CEGAR engine.
//!
//! [`graph`] is a finite reference domain whose ground truth is a plain BFS.
//! The checks below verify graph invariants and replay traces; the property
//! suites in `tests/` drive random graphs through every configuration.

pub mod graph;

use argus_core::{
    AbstractorConfig, Analysis, Arg, BasicAbstractor, CegarChecker, CegarConfig, CegarError,
    IterationRecord, MultiTraceRefiner, Prec, PruneStrategy, SafetyResult, SingleTraceRefiner,
    StatsSink, StopCriterion, Trace,
};
use graph::{GEdge, GState, Graph, GraphAnalysis, GraphChecker, TrackRefiner, Tracked};
use std::collections::BTreeSet;
use std::sync::Arc;

pub type GraphResult = SafetyResult<GState, GEdge, Tracked, Vec<u32>>;

#[derive(Debug, Clone, Default)]
pub struct GraphConfig {
    pub abstractor: AbstractorConfig,
    pub prune: PruneStrategy,
    /// Refine with every counterexample of a fully explored graph.
    pub multi_trace: bool,
    pub cegar: CegarConfig,
    pub initial: Tracked,
}

pub fn check_graph(graph: &Arc<Graph>, config: &GraphConfig) -> Result<GraphResult, CegarError<Tracked>> {
    check_graph_with_sink(graph, config, &mut argus_core::NullSink)
}

pub fn check_graph_with_sink(
    graph: &Arc<Graph>,
    config: &GraphConfig,
    sink: &mut dyn StatsSink<Tracked>,
) -> Result<GraphResult, CegarError<Tracked>> {
    let analysis = GraphAnalysis::new(graph.clone());
    let mut abstractor_config = config.abstractor.clone();
    if config.multi_trace {
        abstractor_config.stop = StopCriterion::Full;
    }
    let abstractor = BasicAbstractor::new(analysis.clone(), analysis.clone(), analysis, abstractor_config);
    let checker = GraphChecker::new(graph.clone());
    if config.multi_trace {
        let refiner = MultiTraceRefiner::new(checker, TrackRefiner, config.prune);
        CegarChecker::new(abstractor, refiner, config.cegar.clone())
            .check_with_sink(config.initial.clone(), sink)
    } else {
        let refiner = SingleTraceRefiner::new(checker, TrackRefiner, config.prune);
        CegarChecker::new(abstractor, refiner, config.cegar.clone())
            .check_with_sink(config.initial.clone(), sink)
    }
}

/// Records the precision of every iteration.
#[derive(Debug, Clone, Default)]
pub struct PrecHistory<P> {
    pub precs: Vec<P>,
}

impl<P: Clone> StatsSink<P> for PrecHistory<P> {
    fn record(&mut self, record: &IterationRecord<'_, P>) {
        self.precs.push(record.prec.clone());
    }
}

impl<P: Prec> PrecHistory<P> {
    /// Every precision refines its predecessor.
    pub fn check_monotone(&self) -> Result<(), String> {
        for (i, pair) in self.precs.windows(2).enumerate() {
            if !pair[1].refines(&pair[0]) {
                return Err(format!(
                    "precision of iteration {} ({:?}) is coarser than {:?}",
                    i + 2,
                    pair[1],
                    pair[0]
                ));
            }
        }
        Ok(())
    }
}

/// No node is reachable twice from the initial nodes along child links.
pub fn check_acyclic<S, A>(arg: &Arg<S, A>) -> Result<(), String> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<_> = arg.init_nodes().to_vec();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            return Err(format!("node {id} reached twice"));
        }
        let Some(node) = arg.get(id) else {
            return Err(format!("dangling child {id}"));
        };
        stack.extend(node.children().iter().copied());
    }
    if seen.len() != arg.len() {
        return Err(format!(
            "{} nodes reachable from the initial nodes, {} live",
            seen.len(),
            arg.len()
        ));
    }
    Ok(())
}

/// Every uncovered node has been expanded.
pub fn check_exhausted<S, A>(arg: &Arg<S, A>) -> Result<(), String> {
    match arg.nodes().find(|n| !n.is_covered() && !n.is_expanded()) {
        Some(n) => Err(format!("node {} is neither covered nor expanded", n.id())),
        None => Ok(()),
    }
}

/// Covered nodes stand for no concrete state their coverer does not.
pub fn check_coverage(graph: &Graph, arg: &Arg<GState, GEdge>) -> Result<(), String> {
    for node in arg.nodes() {
        let Some(by) = node.covered_by() else { continue };
        let coverer = arg.get(by).ok_or_else(|| format!("{} covered by pruned {by}", node.id()))?;
        if !coverer.covered_nodes().contains(&node.id()) {
            return Err(format!("{by} does not list {} as covered", node.id()));
        }
        let (c, d) = (graph.concretize(node.state()), graph.concretize(coverer.state()));
        if !c.is_subset(&d) {
            return Err(format!(
                "{} ({}) covered by {by} ({}) but {:?} escapes",
                node.id(),
                node.state(),
                coverer.state(),
                c.difference(&d).collect::<Vec<_>>()
            ));
        }
    }
    Ok(())
}

/// Replay `trace` through the transfer relation under `prec`: the first
/// state must be initial and every later state a successor of its predecessor.
pub fn replay<D: Analysis>(
    analysis: &D,
    prec: &D::Prec,
    trace: &Trace<D::State, D::Action>,
) -> Result<(), String> {
    let init = analysis.initial_states(prec).map_err(|e| e.to_string())?;
    if !init.contains(trace.state(0)) {
        return Err(format!("{:?} is not initial", trace.state(0)));
    }
    for i in 0..trace.len() {
        let succ = analysis
            .successors(trace.state(i), trace.action(i), prec)
            .map_err(|e| e.to_string())?;
        if !succ.contains(trace.state(i + 1)) {
            return Err(format!(
                "step {i}: {:?} is not a successor of {:?} along {:?}",
                trace.state(i + 1),
                trace.state(i),
                trace.action(i)
            ));
        }
    }
    Ok(())
}

/// `path` is a concrete run from an initial state to a target.
pub fn check_witness(graph: &Graph, path: &[u32]) -> Result<(), String> {
    let (Some(first), Some(last)) = (path.first(), path.last()) else {
        return Err("empty witness".into());
    };
    if !graph.init().contains(first) {
        return Err(format!("witness starts at non-initial {first}"));
    }
    if let Some(w) = path.windows(2).find(|w| !graph.has_edge(w[0], w[1])) {
        return Err(format!("witness uses missing edge {} -> {}", w[0], w[1]));
    }
    if !graph.targets().contains(last) {
        return Err(format!("witness ends at non-target {last}"));
    }
    Ok(())
}
