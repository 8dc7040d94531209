//! Builds and extends the reachability graph under a fixed precision.

use crate::arg::{Arg, NodeId};
use crate::domain::{
    Analysis, Lts, MergeOperator, NoProjection, Projection, SepMerge, State as _,
    TargetPredicate,
};
use crate::error::{AnalysisError, AnalysisResult, Exhaustion};
use crate::waitlist::{SearchOrder, Waitlist};
use memory_stats::memory_stats;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Budgets are checked every this many waitlist pops.
const BUDGET_CHECK_INTERVAL: usize = 1000;

/// Returns current process memory usage in MB, or None if unavailable.
fn current_memory_mb() -> Option<usize> {
    memory_stats().map(|stats| stats.physical_mem / (1024 * 1024))
}

/// When the abstractor may stop before the waitlist runs dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopCriterion {
    /// Stop as soon as one uncovered target node exists.
    #[default]
    FirstCex,
    /// Stop once at least this many uncovered target nodes exist.
    AtLeast(usize),
    /// Explore until the waitlist is empty.
    Full,
}

impl StopCriterion {
    fn reached(self, cexs: usize) -> bool {
        match self {
            StopCriterion::FirstCex => cexs >= 1,
            StopCriterion::AtLeast(n) => cexs >= n.max(1),
            StopCriterion::Full => false,
        }
    }
}

/// Abstractor configuration. Limits of 0 mean unlimited.
#[derive(Debug, Clone)]
pub struct AbstractorConfig {
    pub search: SearchOrder,
    pub stop: StopCriterion,
    /// Maximum number of live graph nodes.
    pub max_nodes: usize,
    /// Wall-clock budget of a single abstraction run, in seconds.
    pub max_time_secs: u64,
    /// Memory limit in megabytes.
    pub memory_limit_mb: usize,
    /// Compute the successors of different actions in parallel.
    pub parallel: bool,
    /// Check domain contracts (order reflexivity, merge soundness) on every new state.
    pub validate_domain: bool,
}

impl Default for AbstractorConfig {
    fn default() -> Self {
        Self {
            search: SearchOrder::Bfs,
            stop: StopCriterion::FirstCex,
            max_nodes: 0,
            max_time_secs: 0,
            memory_limit_mb: 0,
            parallel: false,
            validate_domain: cfg!(debug_assertions),
        }
    }
}

/// Verdict of one abstraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbstractorResult {
    /// The graph is complete and contains no uncovered target.
    Safe,
    /// The graph contains at least one uncovered target.
    Unsafe,
}

impl AbstractorResult {
    pub fn is_safe(self) -> bool {
        self == AbstractorResult::Safe
    }

    pub fn is_unsafe(self) -> bool {
        self == AbstractorResult::Unsafe
    }
}

/// Counters accumulated over all runs of an abstractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbstractorStats {
    pub nodes_created: usize,
    pub nodes_covered: usize,
    pub expansions: usize,
    pub max_depth: usize,
}

/// Grows a reachability graph until it is complete or a stop criterion fires.
pub trait Abstractor {
    type State;
    type Action;
    type Prec;

    fn create_arg(&self) -> Arg<Self::State, Self::Action>;

    /// Extend `arg` under `prec`. Resumes from the graph's incomplete nodes,
    /// so a pruned graph is only re-explored where it was cut.
    fn check(
        &mut self,
        arg: &mut Arg<Self::State, Self::Action>,
        prec: &Self::Prec,
    ) -> AnalysisResult<AbstractorResult>;

    fn stats(&self) -> AbstractorStats;

    /// Absolute deadline shared with the caller. Passing it raises
    /// [`Exhaustion::Time`].
    fn set_deadline(&mut self, deadline: Option<Instant>);
}

/// Waitlist-driven abstractor over an [`Analysis`], an [`Lts`] and a [`TargetPredicate`].
pub struct BasicAbstractor<D: Analysis, L, T> {
    analysis: D,
    lts: L,
    target: T,
    merge: Box<dyn MergeOperator<D::State>>,
    projection: Box<dyn Projection<D::State>>,
    config: AbstractorConfig,
    stats: AbstractorStats,
    deadline: Option<Instant>,
}

impl<D, L, T> BasicAbstractor<D, L, T>
where
    D: Analysis,
    L: Lts<D::State, D::Action>,
    T: TargetPredicate<D::State>,
{
    pub fn new(analysis: D, lts: L, target: T, config: AbstractorConfig) -> Self {
        Self {
            analysis,
            lts,
            target,
            merge: Box::new(SepMerge),
            projection: Box::new(NoProjection),
            config,
            stats: AbstractorStats::default(),
            deadline: None,
        }
    }

    pub fn with_merge(mut self, merge: impl MergeOperator<D::State> + 'static) -> Self {
        self.merge = Box::new(merge);
        self
    }

    pub fn with_projection(mut self, projection: impl Projection<D::State> + 'static) -> Self {
        self.projection = Box::new(projection);
        self
    }

    pub fn analysis(&self) -> &D {
        &self.analysis
    }

    pub fn config(&self) -> &AbstractorConfig {
        &self.config
    }

    fn effective_deadline(&self, started: Instant) -> Option<Instant> {
        let local = (self.config.max_time_secs > 0)
            .then(|| started + Duration::from_secs(self.config.max_time_secs));
        match (self.deadline, local) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fails if one more node would exceed the node budget.
    fn reserve_node(&self, arg: &Arg<D::State, D::Action>) -> AnalysisResult<()> {
        if self.config.max_nodes > 0 && arg.len() >= self.config.max_nodes {
            info!(nodes = arg.len(), "reached node limit");
            return Err(Exhaustion::Nodes {
                limit: self.config.max_nodes,
            }
            .into());
        }
        Ok(())
    }

    fn check_budgets(
        &self,
        pops: usize,
        started: Instant,
        deadline: Option<Instant>,
    ) -> AnalysisResult<()> {
        if pops % BUDGET_CHECK_INTERVAL != 0 {
            return Ok(());
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                let limit_secs = deadline.saturating_duration_since(started).as_secs();
                info!(limit_secs, "reached time limit");
                return Err(Exhaustion::Time { limit_secs }.into());
            }
        }
        if self.config.memory_limit_mb > 0 {
            if let Some(mem_mb) = current_memory_mb() {
                if mem_mb >= self.config.memory_limit_mb {
                    info!(
                        memory_mb = mem_mb,
                        limit_mb = self.config.memory_limit_mb,
                        "reached memory limit"
                    );
                    return Err(Exhaustion::Memory {
                        limit_mb: self.config.memory_limit_mb,
                        used_mb: mem_mb,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn validate(&self, state: &D::State) -> AnalysisResult<()> {
        if self.config.validate_domain && !self.analysis.is_leq(state, state) {
            return Err(AnalysisError::Domain(format!(
                "partial order is not reflexive on {state:?}"
            )));
        }
        Ok(())
    }

    fn init(&mut self, arg: &mut Arg<D::State, D::Action>, prec: &D::Prec) -> AnalysisResult<()> {
        let states = self.analysis.initial_states(prec)?;
        for state in states {
            self.validate(&state)?;
            if state.is_bottom() {
                continue;
            }
            // After an initial node was pruned, only the missing ones are re-added.
            let subsumed = arg
                .init_nodes()
                .iter()
                .any(|&n| self.analysis.is_leq(&state, arg[n].state()));
            if subsumed {
                continue;
            }
            self.reserve_node(arg)?;
            let key = self.projection.key(&state);
            let target = self.target.is_target(&state);
            arg.create_init_node(state, key, target);
            self.stats.nodes_created += 1;
        }
        arg.set_initialized(true);
        debug!(init_nodes = arg.init_nodes().len(), "initialized graph");
        Ok(())
    }

    /// Fold `state` into `kept`, merging or deduplicating against earlier siblings.
    fn absorb(&self, kept: &mut SmallVec<[D::State; 4]>, state: D::State) -> AnalysisResult<()> {
        for existing in kept.iter_mut() {
            if *existing == state {
                return Ok(());
            }
            if let Some(merged) = self.merge.merge(existing, &state) {
                if self.config.validate_domain
                    && !(self.analysis.is_leq(existing, &merged)
                        && self.analysis.is_leq(&state, &merged))
                {
                    return Err(AnalysisError::Domain(format!(
                        "merge of {existing:?} and {state:?} is not an upper bound"
                    )));
                }
                *existing = merged;
                return Ok(());
            }
        }
        kept.push(state);
        Ok(())
    }

    /// Create the successors of `id`; returns the newly created nodes.
    fn expand(
        &mut self,
        arg: &mut Arg<D::State, D::Action>,
        id: NodeId,
        prec: &D::Prec,
    ) -> AnalysisResult<Vec<NodeId>> {
        let state = arg[id].state().clone();
        let actions = self.lts.enabled_actions(&state);
        let analysis = &self.analysis;
        let successors: Vec<(D::Action, Vec<D::State>)> = if self.config.parallel && actions.len() > 1
        {
            actions
                .into_par_iter()
                .map(|a| analysis.successors(&state, &a, prec).map(|s| (a, s)))
                .collect::<AnalysisResult<_>>()?
        } else {
            actions
                .into_iter()
                .map(|a| analysis.successors(&state, &a, prec).map(|s| (a, s)))
                .collect::<AnalysisResult<_>>()?
        };

        let mut created = Vec::new();
        for (action, states) in successors {
            let mut kept: SmallVec<[D::State; 4]> = SmallVec::new();
            for succ in states {
                self.validate(&succ)?;
                if succ.is_bottom() {
                    continue;
                }
                self.absorb(&mut kept, succ)?;
            }
            for succ in kept {
                // Re-expanding a node that lost part of its subtree keeps the surviving children.
                let exists = arg[id].children().iter().any(|&c| {
                    arg[c].in_action() == Some(&action) && arg[c].state() == &succ
                });
                if exists {
                    continue;
                }
                self.reserve_node(arg)?;
                let key = self.projection.key(&succ);
                let target = self.target.is_target(&succ);
                let child = arg.create_succ_node(id, action.clone(), succ, key, target);
                self.stats.nodes_created += 1;
                self.stats.max_depth = self.stats.max_depth.max(arg[child].depth());
                created.push(child);
            }
        }
        arg.set_expanded(id, true);
        self.stats.expansions += 1;
        trace!(node = %id, successors = created.len(), "expanded node");
        Ok(created)
    }

    fn try_cover(&mut self, arg: &mut Arg<D::State, D::Action>, id: NodeId) -> bool {
        let analysis = &self.analysis;
        match arg.find_coverer(id, |a, b| analysis.is_leq(a, b)) {
            Some(coverer) => {
                trace!(node = %id, coverer = %coverer, "covered node");
                arg.cover(id, coverer);
                self.stats.nodes_covered += 1;
                true
            }
            None => false,
        }
    }
}

impl<D, L, T> Abstractor for BasicAbstractor<D, L, T>
where
    D: Analysis,
    L: Lts<D::State, D::Action>,
    T: TargetPredicate<D::State>,
{
    type State = D::State;
    type Action = D::Action;
    type Prec = D::Prec;

    fn create_arg(&self) -> Arg<D::State, D::Action> {
        Arg::new()
    }

    fn check(
        &mut self,
        arg: &mut Arg<D::State, D::Action>,
        prec: &D::Prec,
    ) -> AnalysisResult<AbstractorResult> {
        let started = Instant::now();
        let deadline = self.effective_deadline(started);
        debug!(prec = ?prec, nodes = arg.len(), "abstraction started");

        if !arg.is_initialized() {
            self.init(arg, prec)?;
        }

        let mut waitlist = Waitlist::new(self.config.search);
        for id in arg.incomplete_nodes() {
            waitlist.push(id, arg[id].key());
        }

        trace!(queued = waitlist.len(), "resuming exploration");

        let mut cexs = arg.cexs().len();
        let mut pops = 0usize;
        if !self.config.stop.reached(cexs) {
            while let Some(id) = waitlist.pop() {
                self.check_budgets(pops, started, deadline)?;
                pops += 1;

                // The node may have been covered or expanded since it was queued.
                if !arg.get(id).is_some_and(|n| n.is_incomplete()) {
                    continue;
                }
                if self.try_cover(arg, id) {
                    continue;
                }

                for child in self.expand(arg, id, prec)? {
                    if arg[child].is_target() {
                        cexs += 1;
                    } else if !self.try_cover(arg, child) {
                        waitlist.push(child, arg[child].key());
                    }
                }
                if self.config.stop.reached(cexs) {
                    break;
                }
            }
        }

        let result = if arg.is_safe() {
            AbstractorResult::Safe
        } else {
            AbstractorResult::Unsafe
        };
        debug!(
            result = ?result,
            nodes = arg.len(),
            cexs,
            pops,
            time_ms = started.elapsed().as_millis() as u64,
            "abstraction finished"
        );
        Ok(result)
    }

    fn stats(&self) -> AbstractorStats {
        self.stats
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, Prec, State};

    /// Counter that wraps at `modulus`; the abstraction drops everything
    /// above `prec` to a single `Top` value.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum Counter {
        Val(u32),
        Top,
    }

    impl State for Counter {
        fn is_bottom(&self) -> bool {
            false
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Inc;
    impl Action for Inc {}

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Bound(u32);

    impl Prec for Bound {
        fn join(&self, other: &Self) -> Self {
            Bound(self.0.max(other.0))
        }

        fn refines(&self, other: &Self) -> bool {
            self.0 >= other.0
        }
    }

    struct CounterAnalysis {
        modulus: u32,
    }

    impl Analysis for CounterAnalysis {
        type State = Counter;
        type Action = Inc;
        type Prec = Bound;

        fn initial_states(&self, _prec: &Bound) -> AnalysisResult<Vec<Counter>> {
            Ok(vec![Counter::Val(0)])
        }

        fn successors(&self, s: &Counter, _a: &Inc, prec: &Bound) -> AnalysisResult<Vec<Counter>> {
            Ok(match s {
                Counter::Top => vec![Counter::Top],
                Counter::Val(v) => {
                    let next = (v + 1) % self.modulus;
                    if next > prec.0 {
                        vec![Counter::Top]
                    } else {
                        vec![Counter::Val(next)]
                    }
                }
            })
        }

        fn is_leq(&self, a: &Counter, b: &Counter) -> bool {
            a == b || *b == Counter::Top
        }
    }

    struct Always;
    impl Lts<Counter, Inc> for Always {
        fn enabled_actions(&self, _s: &Counter) -> Vec<Inc> {
            vec![Inc]
        }
    }

    fn abstractor(
        target: u32,
        config: AbstractorConfig,
    ) -> BasicAbstractor<CounterAnalysis, Always, impl TargetPredicate<Counter>> {
        BasicAbstractor::new(
            CounterAnalysis { modulus: 4 },
            Always,
            move |s: &Counter| matches!(s, Counter::Val(v) if *v == target) || *s == Counter::Top,
            config,
        )
    }

    #[test]
    fn test_safe_when_loop_closes_by_coverage() {
        // 0 -> 1 -> 2 -> 3 -> 0 (covered); target value 7 never occurs
        let mut abs = abstractor(7, AbstractorConfig::default());
        let mut arg = abs.create_arg();
        let result = abs.check(&mut arg, &Bound(10)).unwrap();
        assert_eq!(result, AbstractorResult::Safe);
        assert_eq!(arg.len(), 5);
        assert_eq!(arg.metrics().covered, 1);
        assert!(arg.is_complete());
    }

    #[test]
    fn test_unsafe_stops_at_first_cex() {
        let mut abs = abstractor(2, AbstractorConfig::default());
        let mut arg = abs.create_arg();
        let result = abs.check(&mut arg, &Bound(10)).unwrap();
        assert_eq!(result, AbstractorResult::Unsafe);
        let cexs = arg.cexs();
        assert_eq!(cexs.len(), 1);
        assert_eq!(arg[cexs[0]].depth(), 2);
        assert!(!arg[cexs[0]].is_expanded());
    }

    #[test]
    fn test_coarse_precision_reaches_top() {
        let mut abs = abstractor(9, AbstractorConfig::default());
        let mut arg = abs.create_arg();
        assert_eq!(abs.check(&mut arg, &Bound(1)).unwrap(), AbstractorResult::Unsafe);
        let cex = arg.cexs()[0];
        assert_eq!(arg[cex].state(), &Counter::Top);
    }

    #[test]
    fn test_node_limit_exhausts() {
        let config = AbstractorConfig {
            max_nodes: 2,
            ..Default::default()
        };
        let mut abs = abstractor(9, config);
        let mut arg = abs.create_arg();
        let err = abs.check(&mut arg, &Bound(10)).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::ResourceExhausted(Exhaustion::Nodes { limit: 2 })
        ));
    }

    #[test]
    fn test_graph_filling_node_limit_exactly_completes() {
        // 0 -> 1 -> 2 -> 3 -> 0 (covered) is five nodes
        let config = AbstractorConfig {
            max_nodes: 5,
            ..Default::default()
        };
        let mut abs = abstractor(7, config);
        let mut arg = abs.create_arg();
        assert_eq!(abs.check(&mut arg, &Bound(10)).unwrap(), AbstractorResult::Safe);
        assert_eq!(arg.len(), 5);

        let config = AbstractorConfig {
            max_nodes: 4,
            ..Default::default()
        };
        let mut abs = abstractor(7, config);
        let mut arg = abs.create_arg();
        let err = abs.check(&mut arg, &Bound(10)).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::ResourceExhausted(Exhaustion::Nodes { limit: 4 })
        ));
        assert_eq!(arg.len(), 4);
    }

    #[test]
    fn test_passed_deadline_exhausts() {
        let mut abs = abstractor(9, AbstractorConfig::default());
        abs.set_deadline(Some(Instant::now()));
        let mut arg = abs.create_arg();
        let err = abs.check(&mut arg, &Bound(10)).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::ResourceExhausted(Exhaustion::Time { .. })
        ));
    }

    #[test]
    fn test_resume_after_prune_only_reexplores_cut() {
        let mut abs = abstractor(2, AbstractorConfig::default());
        let mut arg = abs.create_arg();
        abs.check(&mut arg, &Bound(10)).unwrap();
        let cex = arg.cexs()[0];
        let parent = arg[cex].parent().unwrap();
        arg.prune(cex);
        let created_before = abs.stats().nodes_created;
        // the same precision recreates the same target under the same parent
        assert_eq!(abs.check(&mut arg, &Bound(10)).unwrap(), AbstractorResult::Unsafe);
        assert_eq!(abs.stats().nodes_created, created_before + 1);
        assert_eq!(arg[arg.cexs()[0]].parent(), Some(parent));
    }

    #[test]
    fn test_parallel_expansion_matches_sequential() {
        let run = |parallel| {
            let config = AbstractorConfig {
                parallel,
                stop: StopCriterion::Full,
                ..Default::default()
            };
            let mut abs = abstractor(7, config);
            let mut arg = abs.create_arg();
            abs.check(&mut arg, &Bound(10)).unwrap();
            arg.nodes().map(|n| n.state().clone()).collect::<Vec<_>>()
        };
        assert_eq!(run(false), run(true));
    }

    #[test]
    fn test_stop_criterion() {
        assert!(StopCriterion::FirstCex.reached(1));
        assert!(!StopCriterion::AtLeast(3).reached(2));
        assert!(StopCriterion::AtLeast(3).reached(3));
        assert!(!StopCriterion::Full.reached(100));
    }
}
