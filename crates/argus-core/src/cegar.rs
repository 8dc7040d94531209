//! The abstraction-refinement loop.

use crate::abstractor::{Abstractor, AbstractorResult, AbstractorStats};
use crate::arg::{Arg, ArgMetrics};
use crate::domain::Prec;
use crate::error::{AnalysisError, Exhaustion};
use crate::refiner::{Refiner, RefinerResult};
use crate::trace::ArgTrace;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Loop configuration. Limits of 0 mean unlimited.
#[derive(Debug, Clone, Default)]
pub struct CegarConfig {
    /// Maximum number of abstraction-refinement iterations.
    pub max_iterations: usize,
    /// Wall-clock budget of the whole run, in seconds.
    pub max_time_secs: u64,
}

/// Statistics of a run.
#[derive(Debug, Clone, Default)]
pub struct CegarStatistics {
    pub elapsed: Duration,
    pub abstractor_time: Duration,
    pub refiner_time: Duration,
    pub iterations: usize,
    /// Metrics of the final graph.
    pub arg: ArgMetrics,
    pub abstractor: AbstractorStats,
}

impl fmt::Display for CegarStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "iterations: {}", self.iterations)?;
        writeln!(
            f,
            "time: {:.3}s (abstraction {:.3}s, refinement {:.3}s)",
            self.elapsed.as_secs_f64(),
            self.abstractor_time.as_secs_f64(),
            self.refiner_time.as_secs_f64()
        )?;
        writeln!(
            f,
            "graph: {} nodes, depth {}, {} covered, {} targets, branching {:.2}",
            self.arg.size,
            self.arg.depth,
            self.arg.covered,
            self.arg.targets,
            self.arg.mean_branching_factor
        )?;
        write!(
            f,
            "abstractor: {} nodes created, {} covered, {} expansions",
            self.abstractor.nodes_created, self.abstractor.nodes_covered, self.abstractor.expansions
        )
    }
}

/// Verdict of a run.
#[derive(Debug, Clone)]
pub enum SafetyResult<S, A, P, W> {
    /// No target is reachable; `arg` is a complete graph proving it under `prec`.
    Safe {
        arg: Arg<S, A>,
        prec: P,
        stats: CegarStatistics,
    },
    /// A target is reachable along `trace`; `witness` is the concrete execution.
    Unsafe {
        trace: ArgTrace<S, A>,
        witness: W,
        arg: Arg<S, A>,
        stats: CegarStatistics,
    },
    /// A resource budget ran out first.
    Unknown {
        reason: Exhaustion,
        arg: Arg<S, A>,
        prec: P,
        stats: CegarStatistics,
    },
}

impl<S, A, P, W> SafetyResult<S, A, P, W> {
    pub fn is_safe(&self) -> bool {
        matches!(self, SafetyResult::Safe { .. })
    }

    pub fn is_unsafe(&self) -> bool {
        matches!(self, SafetyResult::Unsafe { .. })
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, SafetyResult::Unknown { .. })
    }

    pub fn arg(&self) -> &Arg<S, A> {
        match self {
            SafetyResult::Safe { arg, .. }
            | SafetyResult::Unsafe { arg, .. }
            | SafetyResult::Unknown { arg, .. } => arg,
        }
    }

    pub fn stats(&self) -> &CegarStatistics {
        match self {
            SafetyResult::Safe { stats, .. }
            | SafetyResult::Unsafe { stats, .. }
            | SafetyResult::Unknown { stats, .. } => stats,
        }
    }

    pub fn trace(&self) -> Option<&ArgTrace<S, A>> {
        match self {
            SafetyResult::Unsafe { trace, .. } => Some(trace),
            _ => None,
        }
    }
}

/// Coarse classification of a [`CegarError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CegarErrorKind {
    Domain,
    Solver,
    Timeout,
    RefinementDivergence,
    ResourceExhausted,
}

/// A run that failed. Carries the last precision and the statistics so far.
#[derive(Debug, Error)]
#[error("iteration {iteration}: {source}")]
pub struct CegarError<P> {
    pub iteration: usize,
    pub last_prec: P,
    pub stats: CegarStatistics,
    #[source]
    pub source: AnalysisError,
}

impl<P> CegarError<P> {
    pub fn kind(&self) -> CegarErrorKind {
        match self.source {
            AnalysisError::Domain(_) => CegarErrorKind::Domain,
            AnalysisError::Solver(_) => CegarErrorKind::Solver,
            AnalysisError::Timeout(_) => CegarErrorKind::Timeout,
            AnalysisError::RefinementDivergence { .. } => CegarErrorKind::RefinementDivergence,
            AnalysisError::ResourceExhausted(_) => CegarErrorKind::ResourceExhausted,
        }
    }
}

/// What happened in one iteration.
#[derive(Debug)]
pub struct IterationRecord<'a, P> {
    pub iteration: usize,
    /// Precision the abstraction ran under.
    pub prec: &'a P,
    pub abstractor_result: AbstractorResult,
    /// Graph metrics after the abstraction and before pruning.
    pub arg: ArgMetrics,
    pub abstractor_time: Duration,
    pub refiner_time: Duration,
}

/// Receives one record per iteration.
pub trait StatsSink<P> {
    fn record(&mut self, record: &IterationRecord<'_, P>);
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl<P> StatsSink<P> for NullSink {
    fn record(&mut self, _record: &IterationRecord<'_, P>) {}
}

type CheckResult<Abs, Ref> = Result<
    SafetyResult<
        <Abs as Abstractor>::State,
        <Abs as Abstractor>::Action,
        <Abs as Abstractor>::Prec,
        <Ref as Refiner>::Witness,
    >,
    CegarError<<Abs as Abstractor>::Prec>,
>;

/// Alternates abstraction and refinement until a verdict is reached.
pub struct CegarChecker<Abs, Ref> {
    abstractor: Abs,
    refiner: Ref,
    config: CegarConfig,
}

impl<Abs, Ref> CegarChecker<Abs, Ref>
where
    Abs: Abstractor,
    Abs::Prec: Prec,
    Ref: Refiner<State = Abs::State, Action = Abs::Action, Prec = Abs::Prec>,
{
    pub fn new(abstractor: Abs, refiner: Ref, config: CegarConfig) -> Self {
        Self {
            abstractor,
            refiner,
            config,
        }
    }

    pub fn abstractor(&self) -> &Abs {
        &self.abstractor
    }

    pub fn refiner(&self) -> &Ref {
        &self.refiner
    }

    pub fn check(&mut self, prec: Abs::Prec) -> CheckResult<Abs, Ref> {
        self.check_with_sink(prec, &mut NullSink)
    }

    /// Run the loop from `initial_prec`, reporting every iteration to `sink`.
    pub fn check_with_sink(
        &mut self,
        initial_prec: Abs::Prec,
        sink: &mut dyn StatsSink<Abs::Prec>,
    ) -> CheckResult<Abs, Ref> {
        let started = Instant::now();
        let deadline = (self.config.max_time_secs > 0)
            .then(|| started + Duration::from_secs(self.config.max_time_secs));
        self.abstractor.set_deadline(deadline);

        let mut arg = self.abstractor.create_arg();
        let mut prec = initial_prec;
        let mut stats = CegarStatistics::default();
        info!(prec = ?prec, "CEGAR started");

        loop {
            if self.config.max_iterations > 0 && stats.iterations >= self.config.max_iterations {
                info!(iterations = stats.iterations, "reached iteration limit");
                let reason = Exhaustion::Iterations {
                    limit: self.config.max_iterations,
                };
                return Ok(self.unknown(reason, arg, prec, stats, started));
            }
            stats.iterations += 1;
            let iteration = stats.iterations;

            let t = Instant::now();
            let outcome = self.abstractor.check(&mut arg, &prec);
            let abstractor_time = t.elapsed();
            stats.abstractor_time += abstractor_time;
            let abstractor_result = match outcome {
                Ok(r) => r,
                Err(AnalysisError::ResourceExhausted(reason)) => {
                    return Ok(self.unknown(reason, arg, prec, stats, started));
                }
                Err(source) => return Err(self.fail(iteration, prec, stats, started, &arg, source)),
            };
            let metrics = arg.metrics();
            info!(
                iteration,
                result = ?abstractor_result,
                nodes = metrics.size,
                depth = metrics.depth,
                "abstraction done"
            );

            if abstractor_result.is_safe() {
                sink.record(&IterationRecord {
                    iteration,
                    prec: &prec,
                    abstractor_result,
                    arg: metrics,
                    abstractor_time,
                    refiner_time: Duration::ZERO,
                });
                let stats = self.finish(stats, started, &arg);
                info!(iterations = stats.iterations, "safe");
                return Ok(SafetyResult::Safe { arg, prec, stats });
            }

            let t = Instant::now();
            let refinement = self.refiner.refine(&mut arg, &prec);
            let refiner_time = t.elapsed();
            stats.refiner_time += refiner_time;
            sink.record(&IterationRecord {
                iteration,
                prec: &prec,
                abstractor_result,
                arg: metrics,
                abstractor_time,
                refiner_time,
            });

            match refinement {
                Ok(RefinerResult::Unsafe { trace, witness }) => {
                    let stats = self.finish(stats, started, &arg);
                    info!(
                        iterations = stats.iterations,
                        len = trace.trace().len(),
                        "unsafe"
                    );
                    return Ok(SafetyResult::Unsafe {
                        trace,
                        witness,
                        arg,
                        stats,
                    });
                }
                Ok(RefinerResult::Spurious { refined_prec }) => {
                    if !refined_prec.refines(&prec) {
                        let source = AnalysisError::Domain(format!(
                            "refined precision {refined_prec:?} is not finer than {prec:?}"
                        ));
                        return Err(self.fail(iteration, prec, stats, started, &arg, source));
                    }
                    debug!(iteration, prec = ?refined_prec, "precision refined");
                    prec = refined_prec;
                }
                Err(AnalysisError::ResourceExhausted(reason)) => {
                    return Ok(self.unknown(reason, arg, prec, stats, started));
                }
                Err(source) => return Err(self.fail(iteration, prec, stats, started, &arg, source)),
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!("reached time limit");
                    let reason = Exhaustion::Time {
                        limit_secs: self.config.max_time_secs,
                    };
                    return Ok(self.unknown(reason, arg, prec, stats, started));
                }
            }
        }
    }

    fn finish(
        &self,
        mut stats: CegarStatistics,
        started: Instant,
        arg: &Arg<Abs::State, Abs::Action>,
    ) -> CegarStatistics {
        stats.elapsed = started.elapsed();
        stats.arg = arg.metrics();
        stats.abstractor = self.abstractor.stats();
        stats
    }

    fn unknown(
        &self,
        reason: Exhaustion,
        arg: Arg<Abs::State, Abs::Action>,
        prec: Abs::Prec,
        stats: CegarStatistics,
        started: Instant,
    ) -> SafetyResult<Abs::State, Abs::Action, Abs::Prec, Ref::Witness> {
        let stats = self.finish(stats, started, &arg);
        info!(reason = %reason, iterations = stats.iterations, "unknown");
        SafetyResult::Unknown {
            reason,
            arg,
            prec,
            stats,
        }
    }

    fn fail(
        &self,
        iteration: usize,
        last_prec: Abs::Prec,
        stats: CegarStatistics,
        started: Instant,
        arg: &Arg<Abs::State, Abs::Action>,
        source: AnalysisError,
    ) -> CegarError<Abs::Prec> {
        CegarError {
            iteration,
            last_prec,
            stats: self.finish(stats, started, arg),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisResult;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Level(u32);

    impl Prec for Level {
        fn join(&self, other: &Self) -> Self {
            Level(self.0.max(other.0))
        }

        fn refines(&self, other: &Self) -> bool {
            self.0 >= other.0
        }
    }

    /// Unsafe below level `safe_at`, with a single target node.
    struct Scripted {
        safe_at: u32,
    }

    impl Abstractor for Scripted {
        type State = u32;
        type Action = ();
        type Prec = Level;

        fn create_arg(&self) -> Arg<u32, ()> {
            Arg::new()
        }

        fn check(&mut self, arg: &mut Arg<u32, ()>, prec: &Level) -> AnalysisResult<AbstractorResult> {
            arg.prune_all();
            let init = arg.create_init_node(0, 0, false);
            if prec.0 < self.safe_at {
                arg.create_succ_node(init, (), 1, 0, true);
                Ok(AbstractorResult::Unsafe)
            } else {
                arg.set_expanded(init, true);
                Ok(AbstractorResult::Safe)
            }
        }

        fn stats(&self) -> AbstractorStats {
            AbstractorStats::default()
        }

        fn set_deadline(&mut self, _deadline: Option<Instant>) {}
    }

    /// Raises the level by `step` on every refinement.
    struct Bump {
        step: i64,
    }

    impl Refiner for Bump {
        type State = u32;
        type Action = ();
        type Prec = Level;
        type Witness = ();

        fn refine(
            &mut self,
            _arg: &mut Arg<u32, ()>,
            prec: &Level,
        ) -> AnalysisResult<RefinerResult<u32, (), Level, ()>> {
            Ok(RefinerResult::Spurious {
                refined_prec: Level((i64::from(prec.0) + self.step) as u32),
            })
        }
    }

    /// Refines like `Bump { step: 1 }` until its solver fails at `fail_at`.
    struct SolverDown {
        fail_at: u32,
    }

    impl Refiner for SolverDown {
        type State = u32;
        type Action = ();
        type Prec = Level;
        type Witness = ();

        fn refine(
            &mut self,
            _arg: &mut Arg<u32, ()>,
            prec: &Level,
        ) -> AnalysisResult<RefinerResult<u32, (), Level, ()>> {
            if prec.0 >= self.fail_at {
                return Err(AnalysisError::Solver("backend crashed".into()));
            }
            Ok(RefinerResult::Spurious {
                refined_prec: Level(prec.0 + 1),
            })
        }
    }

    /// Transfer function that times out at every level.
    struct Stalled;

    impl Abstractor for Stalled {
        type State = u32;
        type Action = ();
        type Prec = Level;

        fn create_arg(&self) -> Arg<u32, ()> {
            Arg::new()
        }

        fn check(&mut self, _arg: &mut Arg<u32, ()>, _prec: &Level) -> AnalysisResult<AbstractorResult> {
            Err(AnalysisError::Timeout(Duration::from_millis(5)))
        }

        fn stats(&self) -> AbstractorStats {
            AbstractorStats::default()
        }

        fn set_deadline(&mut self, _deadline: Option<Instant>) {}
    }

    struct Recorder(Vec<(usize, Level)>);

    impl StatsSink<Level> for Recorder {
        fn record(&mut self, record: &IterationRecord<'_, Level>) {
            self.0.push((record.iteration, *record.prec));
        }
    }

    #[test]
    fn test_refines_until_safe() {
        let mut checker = CegarChecker::new(Scripted { safe_at: 3 }, Bump { step: 1 }, CegarConfig::default());
        let mut sink = Recorder(Vec::new());
        let result = checker.check_with_sink(Level(0), &mut sink).unwrap();
        assert!(result.is_safe());
        assert_eq!(result.stats().iterations, 4);
        let levels: Vec<u32> = sink.0.iter().map(|(_, p)| p.0).collect();
        assert_eq!(levels, vec![0, 1, 2, 3]);
        match result {
            SafetyResult::Safe { prec, arg, .. } => {
                assert_eq!(prec, Level(3));
                assert!(arg.is_complete());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_iteration_limit_gives_unknown() {
        let config = CegarConfig {
            max_iterations: 2,
            ..Default::default()
        };
        let mut checker = CegarChecker::new(Scripted { safe_at: 10 }, Bump { step: 1 }, config);
        match checker.check(Level(0)).unwrap() {
            SafetyResult::Unknown { reason, prec, stats, .. } => {
                assert_eq!(reason, Exhaustion::Iterations { limit: 2 });
                assert_eq!(prec, Level(2));
                assert_eq!(stats.iterations, 2);
            }
            other => panic!("expected unknown, got safe={}", other.is_safe()),
        }
    }

    #[test]
    fn test_weakened_precision_is_a_domain_error() {
        let mut checker = CegarChecker::new(Scripted { safe_at: 10 }, Bump { step: -1 }, CegarConfig::default());
        let err = checker.check(Level(5)).unwrap_err();
        assert_eq!(err.kind(), CegarErrorKind::Domain);
        assert_eq!(err.iteration, 1);
        assert_eq!(err.last_prec, Level(5));
    }

    #[test]
    fn test_solver_failure_in_refinement_is_fatal() {
        let mut checker = CegarChecker::new(Scripted { safe_at: 10 }, SolverDown { fail_at: 2 }, CegarConfig::default());
        let mut sink = Recorder(Vec::new());
        let err = checker.check_with_sink(Level(0), &mut sink).unwrap_err();
        assert_eq!(err.kind(), CegarErrorKind::Solver);
        assert_eq!(err.iteration, 3);
        assert_eq!(err.last_prec, Level(2));
        assert_eq!(err.stats.iterations, 3);
        // the failing iteration is still recorded
        assert_eq!(sink.0.last(), Some(&(3, Level(2))));
    }

    #[test]
    fn test_transfer_timeout_is_fatal() {
        let mut checker = CegarChecker::new(Stalled, Bump { step: 1 }, CegarConfig::default());
        let err = checker.check(Level(4)).unwrap_err();
        assert_eq!(err.kind(), CegarErrorKind::Timeout);
        assert_eq!(err.iteration, 1);
        assert_eq!(err.last_prec, Level(4));
        assert!(err.to_string().starts_with("iteration 1: solver timed out"));
    }

    #[test]
    fn test_statistics_display() {
        let stats = CegarStatistics {
            iterations: 3,
            ..Default::default()
        };
        assert!(stats.to_string().starts_with("iterations: 3"));
    }
}
