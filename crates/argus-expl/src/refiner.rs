//! Turns variable refutations into a larger set of tracked variables.

use crate::checker::{CfaState, VarsRefutation};
use crate::expl::ExplPrec;
use crate::loc::CfaAction;
use argus_core::{AnalysisResult, PrecRefiner, Trace};
use tracing::debug;

/// Tracks every variable the refutation needs at any trace state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplRefiner;

impl PrecRefiner<CfaState, CfaAction, ExplPrec, VarsRefutation> for ExplRefiner {
    fn refine(
        &self,
        prec: &ExplPrec,
        _trace: &Trace<CfaState, CfaAction>,
        refutation: &VarsRefutation,
    ) -> AnalysisResult<ExplPrec> {
        let mut vars = prec.vars().clone();
        let before = vars.len();
        vars.extend(refutation.vars());
        debug!(added = vars.len() - before, tracked = vars.len(), "refined explicit precision");
        Ok(ExplPrec(vars))
    }
}
