//! Explicit-value CEGAR for control-flow automata.
//!
//! A [`Cfa`] is analysed with the product of a location domain and an
//! explicit-value domain whose precision is the set of tracked variables.
//! Spurious counterexamples are refuted by concrete simulation and add the
//! variables they depend on to the precision.

pub mod cfa;
pub mod checker;
pub mod config;
pub mod expl;
pub mod expr;
pub mod loc;
pub mod refiner;

pub use cfa::{Cfa, CfaBuilder, Edge, EdgeId, Loc, ModelError, Stmt, VarDecl, VarType};
pub use checker::{CfaState, ExplTraceChecker, ExplWitness, Strategy, VarsRefutation};
pub use config::{check_cfa, CfaAnalysis, CfaPrec, CfaResult, ExplConfig, Refinement};
pub use expl::{ExplAnalysis, ExplJoin, ExplPrec, ExplState};
pub use expr::{EvalError, Expr, Valuation, Value, VarId};
pub use loc::{CfaAction, CfaLts, ErrorLoc, LocAnalysis, LocProjection, LocState};
pub use refiner::ExplRefiner;
