//! Location tracking: the control part of a CFA analysis.

use crate::cfa::{Cfa, EdgeId, Loc};
use argus_core::{Action, Analysis, AnalysisResult, Lts, Prod2State, Projection, State, TargetPredicate};
use std::sync::Arc;

/// A CFA edge taken by the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CfaAction {
    pub edge: EdgeId,
    pub source: Loc,
    pub target: Loc,
}

impl Action for CfaAction {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocState(pub Loc);

impl State for LocState {
    fn is_bottom(&self) -> bool {
        false
    }
}

/// Follows edges between locations. Has no precision to refine.
#[derive(Debug, Clone)]
pub struct LocAnalysis {
    cfa: Arc<Cfa>,
}

impl LocAnalysis {
    pub fn new(cfa: Arc<Cfa>) -> Self {
        Self { cfa }
    }
}

impl Analysis for LocAnalysis {
    type State = LocState;
    type Action = CfaAction;
    type Prec = ();

    fn initial_states(&self, _prec: &()) -> AnalysisResult<Vec<LocState>> {
        Ok(vec![LocState(self.cfa.init_loc())])
    }

    fn successors(&self, state: &LocState, action: &CfaAction, _prec: &()) -> AnalysisResult<Vec<LocState>> {
        if action.source != state.0 {
            return Ok(Vec::new());
        }
        Ok(vec![LocState(action.target)])
    }

    fn is_leq(&self, a: &LocState, b: &LocState) -> bool {
        a == b
    }
}

/// Enabled actions are the outgoing edges of the current location.
#[derive(Debug, Clone)]
pub struct CfaLts {
    cfa: Arc<Cfa>,
}

impl CfaLts {
    pub fn new(cfa: Arc<Cfa>) -> Self {
        Self { cfa }
    }
}

impl<S: Send + Sync> Lts<Prod2State<LocState, S>, CfaAction> for CfaLts {
    fn enabled_actions(&self, state: &Prod2State<LocState, S>) -> Vec<CfaAction> {
        let loc = state.first().0;
        self.cfa
            .outgoing(loc)
            .iter()
            .map(|&id| {
                let edge = self.cfa.edge(id);
                CfaAction {
                    edge: id,
                    source: edge.source,
                    target: edge.target,
                }
            })
            .collect()
    }
}

/// Targets are states at the error location.
#[derive(Debug, Clone, Copy)]
pub struct ErrorLoc(pub Loc);

impl<S: Send + Sync> TargetPredicate<Prod2State<LocState, S>> for ErrorLoc {
    fn is_target(&self, state: &Prod2State<LocState, S>) -> bool {
        state.first().0 == self.0
    }
}

/// Partitions states by location.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocProjection;

impl<S: Send + Sync> Projection<Prod2State<LocState, S>> for LocProjection {
    fn key(&self, state: &Prod2State<LocState, S>) -> u64 {
        u64::from(state.first().0 .0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::Stmt;

    fn two_loc_cfa() -> Arc<Cfa> {
        let mut b = Cfa::builder();
        let l0 = b.loc("l0");
        let l1 = b.loc("l1");
        b.edge(l0, l1, vec![]);
        b.edge(l0, l0, vec![Stmt::Assume(crate::expr::Expr::Bool(true))]);
        b.init_loc(l0).error_loc(l1);
        Arc::new(b.build().unwrap())
    }

    #[test]
    fn test_lts_follows_outgoing_edges() {
        let cfa = two_loc_cfa();
        let lts = CfaLts::new(cfa.clone());
        let s = Prod2State::new(LocState(Loc(0)), ());
        let actions = lts.enabled_actions(&s);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].target, Loc(1));
        assert!(lts.enabled_actions(&Prod2State::new(LocState(Loc(1)), ())).is_empty());
    }

    #[test]
    fn test_loc_successor_requires_matching_source() {
        let cfa = two_loc_cfa();
        let analysis = LocAnalysis::new(cfa);
        let action = CfaAction {
            edge: EdgeId(0),
            source: Loc(0),
            target: Loc(1),
        };
        assert_eq!(
            analysis.successors(&LocState(Loc(0)), &action, &()).unwrap(),
            vec![LocState(Loc(1))]
        );
        assert!(analysis.successors(&LocState(Loc(1)), &action, &()).unwrap().is_empty());
    }

    #[test]
    fn test_error_loc_and_projection() {
        let s = Prod2State::new(LocState(Loc(1)), ());
        assert!(ErrorLoc(Loc(1)).is_target(&s));
        assert_eq!(LocProjection.key(&s), 1);
    }
}
