//! A finite transition graph abstracted by the set of states it tracks.
//!
//! Tracked states are kept exact; all others collapse into one summary
//! state. Counterexamples are checked edge by edge and refuted by tracking
//! the concrete state at the first mismatch, so every refinement is exact.

use argus_core::{
    Action, Analysis, AnalysisResult, Lts, Prec, PrecRefiner, Refutation, State,
    TargetPredicate, Trace, TraceChecker, TraceStatus,
};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A finite system over states `0..n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    n: u32,
    init: BTreeSet<u32>,
    edges: BTreeSet<(u32, u32)>,
    targets: BTreeSet<u32>,
}

impl Graph {
    /// Out-of-range states and duplicate edges are dropped.
    pub fn new(
        n: u32,
        init: impl IntoIterator<Item = u32>,
        edges: impl IntoIterator<Item = (u32, u32)>,
        targets: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            n,
            init: init.into_iter().filter(|&s| s < n).collect(),
            edges: edges
                .into_iter()
                .filter(|&(a, b)| a < n && b < n)
                .collect(),
            targets: targets.into_iter().filter(|&s| s < n).collect(),
        }
    }

    pub fn state_count(&self) -> u32 {
        self.n
    }

    pub fn init(&self) -> &BTreeSet<u32> {
        &self.init
    }

    pub fn edges(&self) -> &BTreeSet<(u32, u32)> {
        &self.edges
    }

    pub fn targets(&self) -> &BTreeSet<u32> {
        &self.targets
    }

    pub fn has_edge(&self, from: u32, to: u32) -> bool {
        self.edges.contains(&(from, to))
    }

    /// Concrete states an abstract state stands for.
    pub fn concretize(&self, state: &GState) -> BTreeSet<u32> {
        match state {
            GState::Known(s) => BTreeSet::from([*s]),
            GState::Any { except } => (0..self.n).filter(|s| !except.contains(s)).collect(),
        }
    }

    /// Shortest concrete path from an initial state to a target, by BFS.
    pub fn shortest_cex(&self) -> Option<Vec<u32>> {
        let mut parent: Vec<Option<u32>> = vec![None; self.n as usize];
        let mut seen = vec![false; self.n as usize];
        let mut queue = VecDeque::new();
        for &s in &self.init {
            seen[s as usize] = true;
            queue.push_back(s);
        }
        while let Some(s) = queue.pop_front() {
            if self.targets.contains(&s) {
                let mut path = vec![s];
                let mut cur = s;
                while let Some(p) = parent[cur as usize] {
                    path.push(p);
                    cur = p;
                }
                path.reverse();
                return Some(path);
            }
            for &(_, to) in self.edges.range((s, 0)..=(s, u32::MAX)) {
                if !seen[to as usize] {
                    seen[to as usize] = true;
                    parent[to as usize] = Some(s);
                    queue.push_back(to);
                }
            }
        }
        None
    }

    pub fn is_safe(&self) -> bool {
        self.shortest_cex().is_none()
    }

    /// Number of concrete states reachable from the initial ones.
    pub fn reachable_count(&self) -> usize {
        let mut seen: BTreeSet<u32> = self.init.clone();
        let mut stack: Vec<u32> = self.init.iter().copied().collect();
        while let Some(s) = stack.pop() {
            for &(_, to) in self.edges.range((s, 0)..=(s, u32::MAX)) {
                if seen.insert(to) {
                    stack.push(to);
                }
            }
        }
        seen.len()
    }
}

/// Abstract state: one tracked concrete state, or every state outside `except`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GState {
    Known(u32),
    Any { except: BTreeSet<u32> },
}

impl State for GState {
    fn is_bottom(&self) -> bool {
        false
    }
}

impl fmt::Display for GState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GState::Known(s) => write!(f, "s{s}"),
            GState::Any { except } => write!(f, "*\\{except:?}"),
        }
    }
}

/// A concrete edge of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GEdge {
    pub from: u32,
    pub to: u32,
}

impl Action for GEdge {}

/// States kept apart by the abstraction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tracked(pub BTreeSet<u32>);

impl Tracked {
    pub fn new(states: impl IntoIterator<Item = u32>) -> Self {
        Self(states.into_iter().collect())
    }

    pub fn tracks(&self, s: u32) -> bool {
        self.0.contains(&s)
    }

    fn abstract_state(&self, s: u32) -> GState {
        if self.tracks(s) {
            GState::Known(s)
        } else {
            GState::Any {
                except: self.0.clone(),
            }
        }
    }
}

impl Prec for Tracked {
    fn join(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).copied().collect())
    }

    fn refines(&self, other: &Self) -> bool {
        self.0.is_superset(&other.0)
    }
}

/// Analysis, enabled actions and target predicate of a [`Graph`].
#[derive(Debug, Clone)]
pub struct GraphAnalysis {
    graph: Arc<Graph>,
}

impl GraphAnalysis {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    fn enables(state: &GState, from: u32) -> bool {
        match state {
            GState::Known(s) => *s == from,
            GState::Any { except } => !except.contains(&from),
        }
    }
}

impl Analysis for GraphAnalysis {
    type State = GState;
    type Action = GEdge;
    type Prec = Tracked;

    fn initial_states(&self, prec: &Tracked) -> AnalysisResult<Vec<GState>> {
        let mut states: Vec<GState> = self
            .graph
            .init
            .iter()
            .filter(|s| prec.tracks(**s))
            .map(|&s| GState::Known(s))
            .collect();
        if self.graph.init.iter().any(|s| !prec.tracks(*s)) {
            states.push(GState::Any {
                except: prec.0.clone(),
            });
        }
        Ok(states)
    }

    fn successors(&self, state: &GState, action: &GEdge, prec: &Tracked) -> AnalysisResult<Vec<GState>> {
        if !Self::enables(state, action.from) || !self.graph.has_edge(action.from, action.to) {
            return Ok(Vec::new());
        }
        Ok(vec![prec.abstract_state(action.to)])
    }

    fn is_leq(&self, a: &GState, b: &GState) -> bool {
        match (a, b) {
            (GState::Known(x), GState::Known(y)) => x == y,
            (GState::Known(x), GState::Any { except }) => !except.contains(x),
            (GState::Any { .. }, GState::Known(_)) => false,
            (GState::Any { except: ea }, GState::Any { except: eb }) => eb.is_subset(ea),
        }
    }
}

impl Lts<GState, GEdge> for GraphAnalysis {
    fn enabled_actions(&self, state: &GState) -> Vec<GEdge> {
        self.graph
            .edges
            .iter()
            .filter(|(from, _)| Self::enables(state, *from))
            .map(|&(from, to)| GEdge { from, to })
            .collect()
    }
}

impl TargetPredicate<GState> for GraphAnalysis {
    fn is_target(&self, state: &GState) -> bool {
        match state {
            GState::Known(s) => self.graph.targets.contains(s),
            GState::Any { except } => self.graph.targets.iter().any(|t| !except.contains(t)),
        }
    }
}

/// States to start tracking, and where to cut the trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRefutation {
    pub track: BTreeSet<u32>,
    pub index: usize,
}

impl Refutation for TrackRefutation {
    fn prune_index(&self) -> usize {
        self.index
    }
}

/// Replays the concrete edges of a trace against the graph.
#[derive(Debug, Clone)]
pub struct GraphChecker {
    graph: Arc<Graph>,
}

impl GraphChecker {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    fn refute(track: impl IntoIterator<Item = u32>, index: usize) -> TraceStatus<Vec<u32>, TrackRefutation> {
        TraceStatus::Infeasible(TrackRefutation {
            track: track.into_iter().collect(),
            index,
        })
    }
}

impl TraceChecker<GState, GEdge> for GraphChecker {
    type Witness = Vec<u32>;
    type Refutation = TrackRefutation;

    fn check(&self, trace: &Trace<GState, GEdge>) -> AnalysisResult<TraceStatus<Vec<u32>, TrackRefutation>> {
        let g = &self.graph;
        let actions = trace.actions();
        let Some(first) = actions.first() else {
            // A lone initial state: some initial state it stands for must be a target.
            let candidates = g.concretize(trace.state(0));
            return Ok(match candidates.iter().find(|s| g.init.contains(s) && g.targets.contains(s)) {
                Some(&s) => TraceStatus::Feasible(vec![s]),
                None => Self::refute(candidates.intersection(&g.init).copied(), 0),
            });
        };

        if !g.init.contains(&first.from) {
            trace!(state = first.from, "trace starts outside the initial states");
            return Ok(Self::refute([first.from], 0));
        }
        let mut path = vec![first.from];
        for (i, pair) in actions.windows(2).enumerate() {
            if pair[0].to != pair[1].from {
                trace!(position = i + 1, state = pair[0].to, "trace breaks");
                return Ok(Self::refute([pair[0].to], i + 1));
            }
            path.push(pair[0].to);
        }
        let last = actions[actions.len() - 1].to;
        if !g.targets.contains(&last) {
            return Ok(Self::refute([last], actions.len()));
        }
        path.push(last);
        Ok(TraceStatus::Feasible(path))
    }
}

/// Tracks the states named by the refutation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackRefiner;

impl PrecRefiner<GState, GEdge, Tracked, TrackRefutation> for TrackRefiner {
    fn refine(
        &self,
        prec: &Tracked,
        _trace: &Trace<GState, GEdge>,
        refutation: &TrackRefutation,
    ) -> AnalysisResult<Tracked> {
        Ok(prec.join(&Tracked(refutation.track.clone())))
    }
}
