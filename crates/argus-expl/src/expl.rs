//! Explicit-value domain: tracked variables hold a concrete value or are unknown.

use crate::cfa::{Cfa, Stmt};
use crate::expr::{Valuation, Value, VarId};
use crate::loc::{CfaAction, LocState};
use argus_core::{Analysis, AnalysisError, AnalysisResult, MergeOperator, Prec, Prod2State, State};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

impl From<crate::expr::EvalError> for AnalysisError {
    fn from(e: crate::expr::EvalError) -> Self {
        AnalysisError::Domain(e.to_string())
    }
}

/// Values of the tracked variables; a missing variable is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExplState {
    Bottom,
    Val(Valuation),
}

impl ExplState {
    pub fn top() -> Self {
        ExplState::Val(Valuation::new())
    }

    pub fn valuation(&self) -> Option<&Valuation> {
        match self {
            ExplState::Bottom => None,
            ExplState::Val(v) => Some(v),
        }
    }

    pub fn get(&self, var: VarId) -> Option<Value> {
        self.valuation().and_then(|v| v.get(&var).copied())
    }
}

impl State for ExplState {
    fn is_bottom(&self) -> bool {
        matches!(self, ExplState::Bottom)
    }
}

impl fmt::Display for ExplState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplState::Bottom => write!(f, "bottom"),
            ExplState::Val(v) => {
                write!(f, "{{")?;
                for (i, (var, value)) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{var}={value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// The set of tracked variables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExplPrec(pub BTreeSet<VarId>);

impl ExplPrec {
    pub fn new(vars: impl IntoIterator<Item = VarId>) -> Self {
        ExplPrec(vars.into_iter().collect())
    }

    pub fn tracks(&self, var: VarId) -> bool {
        self.0.contains(&var)
    }

    pub fn vars(&self) -> &BTreeSet<VarId> {
        &self.0
    }
}

impl Prec for ExplPrec {
    fn join(&self, other: &Self) -> Self {
        ExplPrec(self.0.union(&other.0).copied().collect())
    }

    fn refines(&self, other: &Self) -> bool {
        self.0.is_superset(&other.0)
    }
}

/// Explicit-value analysis of the statements on CFA edges.
///
/// Havocs of tracked variables, and the initial values of tracked variables,
/// are enumerated when there are at most `max_enum` alternatives; otherwise
/// the variable becomes unknown.
#[derive(Debug, Clone)]
pub struct ExplAnalysis {
    cfa: Arc<Cfa>,
    max_enum: u64,
}

pub const DEFAULT_MAX_ENUM: u64 = 16;

impl ExplAnalysis {
    pub fn new(cfa: Arc<Cfa>) -> Self {
        Self {
            cfa,
            max_enum: DEFAULT_MAX_ENUM,
        }
    }

    pub fn with_max_enum(mut self, max_enum: u64) -> Self {
        self.max_enum = max_enum;
        self
    }

    fn enumerable(&self, var: VarId) -> bool {
        self.cfa.var(var).ty.size() <= self.max_enum
    }

    /// Apply one statement to every valuation in `vals`, forking on enumerated havocs.
    fn apply(
        &self,
        stmt: &Stmt,
        vals: SmallVec<[Valuation; 2]>,
        prec: &ExplPrec,
    ) -> AnalysisResult<SmallVec<[Valuation; 2]>> {
        let mut out = SmallVec::new();
        for mut val in vals {
            match stmt {
                Stmt::Assume(cond) => match cond.eval(&val)? {
                    Some(v) => {
                        if v.as_bool()? {
                            out.push(val);
                        }
                    }
                    None => {
                        if let Some((var, value)) = cond.forced_binding(&val) {
                            if !prec.tracks(var) {
                                out.push(val);
                            } else if self.cfa.var(var).ty.contains(value) {
                                val.insert(var, value);
                                out.push(val);
                            }
                        } else {
                            out.push(val);
                        }
                    }
                },
                Stmt::Assign(var, expr) => {
                    if prec.tracks(*var) {
                        match expr.eval(&val)? {
                            Some(value) => val.insert(*var, value),
                            None => val.remove(var),
                        };
                    }
                    out.push(val);
                }
                Stmt::Havoc(var) => {
                    if prec.tracks(*var) && self.enumerable(*var) {
                        for value in self.cfa.var(*var).ty.values() {
                            let mut forked = val.clone();
                            forked.insert(*var, value);
                            out.push(forked);
                        }
                    } else {
                        val.remove(var);
                        out.push(val);
                    }
                }
            }
        }
        Ok(out)
    }
}

impl Analysis for ExplAnalysis {
    type State = ExplState;
    type Action = CfaAction;
    type Prec = ExplPrec;

    fn initial_states(&self, prec: &ExplPrec) -> AnalysisResult<Vec<ExplState>> {
        let vars: Vec<VarId> = prec.0.iter().copied().filter(|v| self.enumerable(*v)).collect();
        let combos = vars
            .iter()
            .try_fold(1u64, |acc, v| acc.checked_mul(self.cfa.var(*v).ty.size()));
        if vars.is_empty() || combos.map_or(true, |n| n > self.max_enum) {
            return Ok(vec![ExplState::top()]);
        }
        let mut vals = vec![Valuation::new()];
        for var in vars {
            vals = vals
                .into_iter()
                .flat_map(|val| {
                    self.cfa.var(var).ty.values().map(move |value| {
                        let mut v = val.clone();
                        v.insert(var, value);
                        v
                    })
                })
                .collect();
        }
        Ok(vals.into_iter().map(ExplState::Val).collect())
    }

    fn successors(
        &self,
        state: &ExplState,
        action: &CfaAction,
        prec: &ExplPrec,
    ) -> AnalysisResult<Vec<ExplState>> {
        let ExplState::Val(val) = state else {
            return Ok(Vec::new());
        };
        let mut vals: SmallVec<[Valuation; 2]> = SmallVec::new();
        vals.push(val.clone());
        for stmt in &self.cfa.edge(action.edge).stmts {
            vals = self.apply(stmt, vals, prec)?;
            if vals.is_empty() {
                break;
            }
        }
        Ok(vals.into_iter().map(ExplState::Val).collect())
    }

    fn is_leq(&self, a: &ExplState, b: &ExplState) -> bool {
        match (a, b) {
            (ExplState::Bottom, _) => true,
            (_, ExplState::Bottom) => false,
            (ExplState::Val(a), ExplState::Val(b)) => {
                b.iter().all(|(var, value)| a.get(var) == Some(value))
            }
        }
    }
}

/// Merges sibling states at the same location by keeping their common bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplJoin;

impl MergeOperator<Prod2State<LocState, ExplState>> for ExplJoin {
    fn merge(
        &self,
        a: &Prod2State<LocState, ExplState>,
        b: &Prod2State<LocState, ExplState>,
    ) -> Option<Prod2State<LocState, ExplState>> {
        if a.first() != b.first() {
            return None;
        }
        let joined = match (a.second(), b.second()) {
            (ExplState::Bottom, other) | (other, ExplState::Bottom) => other.clone(),
            (ExplState::Val(x), ExplState::Val(y)) => ExplState::Val(
                x.iter()
                    .filter(|(var, value)| y.get(var) == Some(value))
                    .map(|(var, value)| (*var, *value))
                    .collect(),
            ),
        };
        Some(Prod2State::new(*a.first(), joined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::{EdgeId, Loc};
    use crate::expr::Expr;

    struct Fixture {
        cfa: Arc<Cfa>,
        x: VarId,
        flag: VarId,
    }

    /// l0 -[x := x + 1]-> l1 -[havoc x]-> l2 -[assume x == 2]-> l3 -[flag := x < 3]-> l4
    fn fixture() -> Fixture {
        let mut b = Cfa::builder();
        let x = b.int_var("x", 0, 3);
        let flag = b.bool_var("flag");
        let l: Vec<Loc> = (0..5).map(|i| b.loc(format!("l{i}"))).collect();
        b.edge(l[0], l[1], vec![Stmt::Assign(x, Expr::var(x) + Expr::int(1))]);
        b.edge(l[1], l[2], vec![Stmt::Havoc(x)]);
        b.edge(l[2], l[3], vec![Stmt::Assume(Expr::var(x).equals(Expr::int(2)))]);
        b.edge(l[3], l[4], vec![Stmt::Assign(flag, Expr::var(x).lt(Expr::int(3)))]);
        b.init_loc(l[0]).error_loc(l[4]);
        Fixture {
            cfa: Arc::new(b.build().unwrap()),
            x,
            flag,
        }
    }

    fn action(cfa: &Cfa, i: u32) -> CfaAction {
        let e = cfa.edge(EdgeId(i));
        CfaAction {
            edge: e.id,
            source: e.source,
            target: e.target,
        }
    }

    fn val(pairs: &[(VarId, Value)]) -> ExplState {
        ExplState::Val(pairs.iter().copied().collect())
    }

    #[test]
    fn test_untracked_variables_stay_unknown() {
        let f = fixture();
        let a = ExplAnalysis::new(f.cfa.clone());
        let prec = ExplPrec::default();
        let succ = a.successors(&val(&[]), &action(&f.cfa, 0), &prec).unwrap();
        assert_eq!(succ, vec![val(&[])]);
    }

    #[test]
    fn test_assign_and_assume() {
        let f = fixture();
        let a = ExplAnalysis::new(f.cfa.clone());
        let prec = ExplPrec::new([f.x, f.flag]);
        let s = val(&[(f.x, Value::Int(1))]);
        assert_eq!(
            a.successors(&s, &action(&f.cfa, 0), &prec).unwrap(),
            vec![val(&[(f.x, Value::Int(2))])]
        );
        // assume x == 2 is false for x = 1
        assert!(a.successors(&s, &action(&f.cfa, 2), &prec).unwrap().is_empty());
        // unknown x is bound by the equality
        assert_eq!(
            a.successors(&val(&[]), &action(&f.cfa, 2), &prec).unwrap(),
            vec![val(&[(f.x, Value::Int(2))])]
        );
        let s = val(&[(f.x, Value::Int(2))]);
        assert_eq!(
            a.successors(&s, &action(&f.cfa, 3), &prec).unwrap(),
            vec![val(&[(f.x, Value::Int(2)), (f.flag, Value::Bool(true))])]
        );
    }

    #[test]
    fn test_havoc_enumerates_small_domains() {
        let f = fixture();
        let prec = ExplPrec::new([f.x]);
        let enumerating = ExplAnalysis::new(f.cfa.clone());
        assert_eq!(enumerating.successors(&val(&[]), &action(&f.cfa, 1), &prec).unwrap().len(), 4);
        let coarse = ExplAnalysis::new(f.cfa.clone()).with_max_enum(2);
        assert_eq!(
            coarse.successors(&val(&[(f.x, Value::Int(0))]), &action(&f.cfa, 1), &prec).unwrap(),
            vec![val(&[])]
        );
    }

    #[test]
    fn test_initial_states_enumerate_tracked_variables() {
        let f = fixture();
        let a = ExplAnalysis::new(f.cfa.clone());
        assert_eq!(a.initial_states(&ExplPrec::default()).unwrap(), vec![ExplState::top()]);
        assert_eq!(a.initial_states(&ExplPrec::new([f.x, f.flag])).unwrap().len(), 8);
        let tight = ExplAnalysis::new(f.cfa.clone()).with_max_enum(4);
        assert_eq!(tight.initial_states(&ExplPrec::new([f.x, f.flag])).unwrap(), vec![ExplState::top()]);
    }

    #[test]
    fn test_order_and_merge() {
        let f = fixture();
        let a = ExplAnalysis::new(f.cfa.clone());
        let precise = val(&[(f.x, Value::Int(1)), (f.flag, Value::Bool(true))]);
        let coarse = val(&[(f.x, Value::Int(1))]);
        assert!(a.is_leq(&precise, &coarse));
        assert!(!a.is_leq(&coarse, &precise));
        assert!(a.is_leq(&ExplState::Bottom, &coarse));

        let l = LocState(Loc(0));
        let other = val(&[(f.x, Value::Int(1)), (f.flag, Value::Bool(false))]);
        let merged = ExplJoin
            .merge(&Prod2State::new(l, precise.clone()), &Prod2State::new(l, other))
            .unwrap();
        assert_eq!(merged.second(), &coarse);
        assert!(ExplJoin
            .merge(&Prod2State::new(l, precise.clone()), &Prod2State::new(LocState(Loc(1)), precise))
            .is_none());
    }

    #[test]
    fn test_prec_lattice() {
        let a = ExplPrec::new([VarId(0)]);
        let b = ExplPrec::new([VarId(1)]);
        let j = a.join(&b);
        assert!(j.refines(&a) && j.refines(&b));
        assert!(!a.refines(&b));
    }
}
