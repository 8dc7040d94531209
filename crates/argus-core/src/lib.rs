//! Counterexample-guided abstraction refinement over abstract reachability graphs.
//!
//! The engine is generic over the abstract domain: a formalism plugs in an
//! [`Analysis`] (initial states, transfer relation, partial order), an [`Lts`]
//! (enabled actions), a [`TargetPredicate`], a [`TraceChecker`] and a
//! [`PrecRefiner`]. [`CegarChecker`] then alternates abstraction and refinement
//! until it proves the target unreachable or finds a feasible counterexample.

pub mod abstractor;
pub mod arg;
pub mod cegar;
pub mod cex_storage;
pub mod domain;
pub mod error;
pub mod prod;
pub mod refiner;
pub mod trace;
pub mod waitlist;

pub use abstractor::{
    Abstractor, AbstractorConfig, AbstractorResult, AbstractorStats, BasicAbstractor,
    StopCriterion,
};
pub use arg::{Arg, ArgEdge, ArgMetrics, ArgNode, NodeId};
pub use cegar::{
    CegarChecker, CegarConfig, CegarError, CegarErrorKind, CegarStatistics, IterationRecord,
    NullSink, SafetyResult, StatsSink,
};
pub use cex_storage::CexStorage;
pub use domain::{
    Action, Analysis, Lts, MergeOperator, NoProjection, Prec, Projection, SepMerge, State,
    TargetPredicate,
};
pub use error::{AnalysisError, AnalysisResult, Exhaustion};
pub use prod::{Prod2Analysis, Prod2Prec, Prod2State, RefineSecond};
pub use refiner::{
    MultiTraceRefiner, PrecRefiner, PruneStrategy, Refiner, RefinerResult, Refutation,
    SingleTraceRefiner, TraceChecker, TraceStatus,
};
pub use trace::{ArgTrace, Trace, TraceFingerprint};
pub use waitlist::{SearchOrder, Waitlist};
