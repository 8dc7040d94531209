//! Concrete feasibility of CFA traces by explicit simulation.
//!
//! The checker runs the statements of the trace's edges over sets of concrete
//! valuations. Variables start unconstrained; a read of a variable with no
//! value yet forks over its type's range, and the chosen value is written back
//! into the earlier valuations where the variable was still unknown, so a
//! feasible run yields a consistent witness.

use crate::cfa::{Cfa, Stmt};
use crate::expl::ExplState;
use crate::expr::{Expr, Valuation, Value, VarId};
use crate::loc::{CfaAction, LocState};
use argus_core::{
    AnalysisError, AnalysisResult, Prod2State, Refutation, Trace, TraceChecker, TraceStatus,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Abstract state of the CFA analysis: location and explicit values.
pub type CfaState = Prod2State<LocState, ExplState>;

/// Upper bound on simultaneously explored valuations.
pub const DEFAULT_MAX_CONFIGS: usize = 1 << 16;

/// Which assumptions of an infeasible trace explain its infeasibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Only the assumption at which simulation got stuck.
    #[default]
    Forward,
    /// Every assumption up to and including the stuck one.
    Sequence,
    /// A deletion-minimal subset of those assumptions that is still infeasible.
    MinimalCore,
}

/// Concrete execution along a trace, one valuation per trace state.
///
/// Variables missing from a valuation may take any value of their type there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplWitness {
    pub states: Vec<Valuation>,
}

/// Variables that must be tracked at each trace state to exclude the trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarsRefutation {
    per_state: Vec<BTreeSet<VarId>>,
    prune_index: usize,
}

impl VarsRefutation {
    pub fn per_state(&self) -> &[BTreeSet<VarId>] {
        &self.per_state
    }

    /// Union over all trace states.
    pub fn vars(&self) -> BTreeSet<VarId> {
        self.per_state.iter().flatten().copied().collect()
    }
}

impl Refutation for VarsRefutation {
    fn prune_index(&self) -> usize {
        self.prune_index
    }
}

#[derive(Debug, Clone)]
struct Config {
    val: Valuation,
    /// Valuations at the trace states passed so far.
    history: Vec<Valuation>,
}

impl Config {
    fn bind(&mut self, var: VarId, value: Value) {
        self.val.insert(var, value);
        for past in self.history.iter_mut().rev() {
            if past.contains_key(&var) {
                break;
            }
            past.insert(var, value);
        }
    }
}

/// A statement of the trace together with the index of its edge.
struct Step<'a> {
    edge_pos: usize,
    stmt: &'a Stmt,
}

enum Run {
    Feasible(Config),
    Infeasible { failed_at: usize },
}

/// Explicit-state trace checker for CFA traces.
#[derive(Debug, Clone)]
pub struct ExplTraceChecker {
    cfa: Arc<Cfa>,
    strategy: Strategy,
    max_configs: usize,
}

impl ExplTraceChecker {
    pub fn new(cfa: Arc<Cfa>, strategy: Strategy) -> Self {
        Self {
            cfa,
            strategy,
            max_configs: DEFAULT_MAX_CONFIGS,
        }
    }

    pub fn with_max_configs(mut self, max_configs: usize) -> Self {
        self.max_configs = max_configs;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn steps<'a>(&'a self, actions: &[CfaAction]) -> Vec<Step<'a>> {
        actions
            .iter()
            .enumerate()
            .flat_map(|(edge_pos, action)| {
                self.cfa
                    .edge(action.edge)
                    .stmts
                    .iter()
                    .map(move |stmt| Step { edge_pos, stmt })
            })
            .collect()
    }

    fn too_many(&self) -> AnalysisError {
        AnalysisError::Solver(format!(
            "explicit simulation exceeded {} valuations",
            self.max_configs
        ))
    }

    /// All ways `expr` can evaluate from `cfg`, forking on unknown variables.
    fn resolve(&self, expr: &Expr, cfg: Config) -> AnalysisResult<Vec<(Config, Value)>> {
        let mut pending = vec![cfg];
        let mut out = Vec::new();
        while let Some(c) = pending.pop() {
            if let Some(value) = expr.eval(&c.val)? {
                out.push((c, value));
                continue;
            }
            let Some(var) = expr.vars().into_iter().find(|v| !c.val.contains_key(v)) else {
                return Err(AnalysisError::Domain(format!("cannot evaluate {expr}")));
            };
            let ty = self.cfa.var(var).ty;
            if ty.size() > self.max_configs as u64 {
                return Err(self.too_many());
            }
            let values: Vec<Value> = ty.values().collect();
            for value in values.into_iter().rev() {
                let mut forked = c.clone();
                forked.bind(var, value);
                pending.push(forked);
            }
            if pending.len() + out.len() > self.max_configs {
                return Err(self.too_many());
            }
        }
        Ok(out)
    }

    fn exec(&self, stmt: &Stmt, active: bool, mut cfg: Config, out: &mut Vec<Config>) -> AnalysisResult<()> {
        match stmt {
            Stmt::Assume(_) if !active => out.push(cfg),
            Stmt::Assume(cond) => {
                if let Some((var, value)) = cond.forced_binding(&cfg.val) {
                    if self.cfa.var(var).ty.contains(value) {
                        cfg.bind(var, value);
                        out.push(cfg);
                    }
                    return Ok(());
                }
                for (c, value) in self.resolve(cond, cfg)? {
                    if value.as_bool()? {
                        out.push(c);
                    }
                }
            }
            Stmt::Assign(var, expr) => {
                for (mut c, value) in self.resolve(expr, cfg)? {
                    c.val.insert(*var, value);
                    out.push(c);
                }
            }
            Stmt::Havoc(var) => {
                cfg.val.remove(var);
                out.push(cfg);
            }
        }
        Ok(())
    }

    /// Simulate `steps`, skipping assumptions for which `active` is false.
    fn run(&self, steps: &[Step<'_>], active: &dyn Fn(usize) -> bool) -> AnalysisResult<Run> {
        let mut configs = vec![Config {
            val: Valuation::new(),
            history: Vec::new(),
        }];
        for (i, step) in steps.iter().enumerate() {
            for c in &mut configs {
                while c.history.len() <= step.edge_pos {
                    c.history.push(c.val.clone());
                }
            }
            let mut next = Vec::new();
            for c in configs {
                self.exec(step.stmt, active(i), c, &mut next)?;
                if next.len() > self.max_configs {
                    return Err(self.too_many());
                }
            }
            if next.is_empty() {
                return Ok(Run::Infeasible { failed_at: i });
            }
            configs = next;
        }
        configs
            .into_iter()
            .next()
            .map(Run::Feasible)
            .ok_or_else(|| AnalysisError::Domain("simulation lost every valuation".into()))
    }

    /// Indices of the assumptions explaining why the prefix up to `failed_at` is infeasible.
    fn core(&self, steps: &[Step<'_>], failed_at: usize) -> AnalysisResult<BTreeSet<usize>> {
        let assumes = (0..=failed_at).filter(|&i| matches!(steps[i].stmt, Stmt::Assume(_)));
        Ok(match self.strategy {
            Strategy::Forward => BTreeSet::from([failed_at]),
            Strategy::Sequence => assumes.collect(),
            Strategy::MinimalCore => {
                let prefix = &steps[..=failed_at];
                let mut core: BTreeSet<usize> = assumes.collect();
                for candidate in core.clone() {
                    let mut trial = core.clone();
                    trial.remove(&candidate);
                    if let Run::Infeasible { .. } = self.run(prefix, &|i| trial.contains(&i))? {
                        core = trial;
                    }
                }
                core
            }
        })
    }

    /// Backward slice from the core: variables live at each trace state.
    fn slice(
        &self,
        steps: &[Step<'_>],
        n_states: usize,
        failed_at: usize,
        core: &BTreeSet<usize>,
    ) -> VarsRefutation {
        let fail_edge = steps[failed_at].edge_pos;
        let mut per_state = vec![BTreeSet::new(); n_states];
        let mut live = BTreeSet::new();
        let mut i = failed_at + 1;
        for k in (0..=fail_edge).rev() {
            while i > 0 && steps[i - 1].edge_pos == k {
                i -= 1;
                match steps[i].stmt {
                    Stmt::Assume(cond) if core.contains(&i) => live.extend(cond.vars()),
                    Stmt::Assume(_) => {}
                    Stmt::Assign(var, expr) => {
                        if live.remove(var) {
                            live.extend(expr.vars());
                        }
                    }
                    Stmt::Havoc(var) => {
                        live.remove(var);
                    }
                }
            }
            per_state[k] = live.clone();
        }
        let prune_index = per_state
            .iter()
            .position(|vars| !vars.is_empty())
            .unwrap_or((fail_edge + 1).min(n_states - 1));
        VarsRefutation {
            per_state,
            prune_index,
        }
    }
}

impl TraceChecker<CfaState, CfaAction> for ExplTraceChecker {
    type Witness = ExplWitness;
    type Refutation = VarsRefutation;

    fn check(
        &self,
        trace: &Trace<CfaState, CfaAction>,
    ) -> AnalysisResult<TraceStatus<ExplWitness, VarsRefutation>> {
        let steps = self.steps(trace.actions());
        let n_states = trace.states().len();
        match self.run(&steps, &|_| true)? {
            Run::Feasible(mut cfg) => {
                while cfg.history.len() < n_states {
                    cfg.history.push(cfg.val.clone());
                }
                debug!(len = trace.len(), "trace is feasible");
                Ok(TraceStatus::Feasible(ExplWitness {
                    states: cfg.history,
                }))
            }
            Run::Infeasible { failed_at } => {
                let core = self.core(&steps, failed_at)?;
                let refutation = self.slice(&steps, n_states, failed_at, &core);
                trace!(
                    failed_at,
                    core = ?core,
                    per_state = ?refutation.per_state,
                    "trace is infeasible"
                );
                debug!(
                    len = trace.len(),
                    prune_index = refutation.prune_index,
                    "trace is infeasible"
                );
                Ok(TraceStatus::Infeasible(refutation))
            }
        }
    }
}
