//! Assembles the CFA analysis and runs it.

use crate::cfa::Cfa;
use crate::checker::{CfaState, ExplTraceChecker, ExplWitness, Strategy, DEFAULT_MAX_CONFIGS};
use crate::expl::{ExplAnalysis, ExplJoin, ExplPrec, DEFAULT_MAX_ENUM};
use crate::loc::{CfaAction, CfaLts, ErrorLoc, LocAnalysis, LocProjection};
use crate::refiner::ExplRefiner;
use argus_core::{
    AbstractorConfig, BasicAbstractor, CegarChecker, CegarConfig, CegarError, MultiTraceRefiner,
    Prod2Analysis, Prod2Prec, PruneStrategy, RefineSecond, SafetyResult, SingleTraceRefiner,
    StopCriterion,
};
use std::sync::Arc;
use tracing::info;

/// Precision of the CFA analysis: nothing for locations, tracked variables for values.
pub type CfaPrec = Prod2Prec<(), ExplPrec>;

pub type CfaAnalysis = Prod2Analysis<LocAnalysis, ExplAnalysis>;

pub type CfaResult = SafetyResult<CfaState, CfaAction, CfaPrec, ExplWitness>;

/// How many counterexamples one refinement looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Refinement {
    /// The shortest counterexample only.
    #[default]
    SingleTrace,
    /// Every counterexample of a fully explored graph.
    MultiTrace,
}

/// Configuration of [`check_cfa`].
#[derive(Debug, Clone)]
pub struct ExplConfig {
    pub strategy: Strategy,
    pub refinement: Refinement,
    pub prune: PruneStrategy,
    /// Join sibling states at the same location instead of keeping them apart.
    pub merge: bool,
    /// Largest domain enumerated on havoc and at initialization.
    pub max_enum: u64,
    /// Valuations the trace checker may hold at once before giving up.
    pub max_configs: usize,
    /// Variables tracked from the first iteration on.
    pub initial_vars: ExplPrec,
    pub abstractor: AbstractorConfig,
    pub cegar: CegarConfig,
}

impl Default for ExplConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Forward,
            refinement: Refinement::SingleTrace,
            prune: PruneStrategy::Lazy,
            merge: false,
            max_enum: DEFAULT_MAX_ENUM,
            max_configs: DEFAULT_MAX_CONFIGS,
            initial_vars: ExplPrec::default(),
            abstractor: AbstractorConfig::default(),
            cegar: CegarConfig::default(),
        }
    }
}

/// Decide whether `cfa`'s error location is reachable.
pub fn check_cfa(cfa: Arc<Cfa>, config: &ExplConfig) -> Result<CfaResult, CegarError<CfaPrec>> {
    let analysis = Prod2Analysis::new(
        LocAnalysis::new(cfa.clone()),
        ExplAnalysis::new(cfa.clone()).with_max_enum(config.max_enum),
    );
    let mut abstractor_config = config.abstractor.clone();
    if config.refinement == Refinement::MultiTrace {
        abstractor_config.stop = StopCriterion::Full;
    }
    let mut abstractor = BasicAbstractor::new(
        analysis,
        CfaLts::new(cfa.clone()),
        ErrorLoc(cfa.error_loc()),
        abstractor_config,
    )
    .with_projection(LocProjection);
    if config.merge {
        abstractor = abstractor.with_merge(ExplJoin);
    }
    let checker = ExplTraceChecker::new(cfa.clone(), config.strategy).with_max_configs(config.max_configs);
    let prec = Prod2Prec::new((), config.initial_vars.clone());

    info!(
        vars = cfa.vars().len(),
        locs = cfa.loc_count(),
        edges = cfa.edges().len(),
        strategy = ?config.strategy,
        refinement = ?config.refinement,
        "checking CFA"
    );
    match config.refinement {
        Refinement::SingleTrace => {
            let refiner = SingleTraceRefiner::new(checker, RefineSecond(ExplRefiner), config.prune);
            CegarChecker::new(abstractor, refiner, config.cegar.clone()).check(prec)
        }
        Refinement::MultiTrace => {
            let refiner = MultiTraceRefiner::new(checker, RefineSecond(ExplRefiner), config.prune);
            CegarChecker::new(abstractor, refiner, config.cegar.clone()).check(prec)
        }
    }
}
