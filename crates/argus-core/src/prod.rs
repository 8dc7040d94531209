//! Product of two abstract domains sharing one action type.

use crate::domain::{Analysis, Prec, State};
use crate::error::AnalysisResult;
use crate::refiner::PrecRefiner;
use crate::trace::Trace;

/// Pair of component states; bottom if either component is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Prod2State<S1, S2> {
    first: S1,
    second: S2,
}

impl<S1, S2> Prod2State<S1, S2> {
    pub fn new(first: S1, second: S2) -> Self {
        Self { first, second }
    }

    pub fn first(&self) -> &S1 {
        &self.first
    }

    pub fn second(&self) -> &S2 {
        &self.second
    }
}

impl<S1: State, S2: State> State for Prod2State<S1, S2> {
    fn is_bottom(&self) -> bool {
        self.first.is_bottom() || self.second.is_bottom()
    }
}

/// Componentwise precision.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Prod2Prec<P1, P2> {
    first: P1,
    second: P2,
}

impl<P1, P2> Prod2Prec<P1, P2> {
    pub fn new(first: P1, second: P2) -> Self {
        Self { first, second }
    }

    pub fn first(&self) -> &P1 {
        &self.first
    }

    pub fn second(&self) -> &P2 {
        &self.second
    }

    pub fn with_second(&self, second: P2) -> Self
    where
        P1: Clone,
    {
        Self {
            first: self.first.clone(),
            second,
        }
    }
}

impl<P1: Prec, P2: Prec> Prec for Prod2Prec<P1, P2> {
    fn join(&self, other: &Self) -> Self {
        Self {
            first: self.first.join(&other.first),
            second: self.second.join(&other.second),
        }
    }

    fn refines(&self, other: &Self) -> bool {
        self.first.refines(&other.first) && self.second.refines(&other.second)
    }
}

/// Runs two analyses in lockstep. Successors are the cartesian product of
/// the component successors, bottom pairs dropped.
#[derive(Debug, Clone)]
pub struct Prod2Analysis<A1, A2> {
    first: A1,
    second: A2,
}

impl<A1, A2> Prod2Analysis<A1, A2> {
    pub fn new(first: A1, second: A2) -> Self {
        Self { first, second }
    }

    pub fn first(&self) -> &A1 {
        &self.first
    }

    pub fn second(&self) -> &A2 {
        &self.second
    }
}

fn product<S1: State, S2: State>(firsts: Vec<S1>, seconds: Vec<S2>) -> Vec<Prod2State<S1, S2>> {
    let mut out = Vec::with_capacity(firsts.len() * seconds.len());
    for f in firsts.iter().filter(|f| !f.is_bottom()) {
        for s in seconds.iter().filter(|s| !s.is_bottom()) {
            out.push(Prod2State::new(f.clone(), s.clone()));
        }
    }
    out
}

impl<A1, A2> Analysis for Prod2Analysis<A1, A2>
where
    A1: Analysis,
    A2: Analysis<Action = A1::Action>,
{
    type State = Prod2State<A1::State, A2::State>;
    type Action = A1::Action;
    type Prec = Prod2Prec<A1::Prec, A2::Prec>;

    fn initial_states(&self, prec: &Self::Prec) -> AnalysisResult<Vec<Self::State>> {
        let firsts = self.first.initial_states(&prec.first)?;
        let seconds = self.second.initial_states(&prec.second)?;
        Ok(product(firsts, seconds))
    }

    fn successors(
        &self,
        state: &Self::State,
        action: &Self::Action,
        prec: &Self::Prec,
    ) -> AnalysisResult<Vec<Self::State>> {
        let firsts = self.first.successors(&state.first, action, &prec.first)?;
        if firsts.iter().all(State::is_bottom) {
            return Ok(Vec::new());
        }
        let seconds = self.second.successors(&state.second, action, &prec.second)?;
        Ok(product(firsts, seconds))
    }

    fn is_leq(&self, a: &Self::State, b: &Self::State) -> bool {
        a.is_bottom()
            || (self.first.is_leq(&a.first, &b.first) && self.second.is_leq(&a.second, &b.second))
    }
}

/// Lifts a refiner of the second component to the product precision,
/// leaving the first component unchanged.
#[derive(Debug, Clone)]
pub struct RefineSecond<R>(pub R);

impl<S, A, P1, P2, Ref, R> PrecRefiner<S, A, Prod2Prec<P1, P2>, Ref> for RefineSecond<R>
where
    P1: Clone,
    R: PrecRefiner<S, A, P2, Ref>,
{
    fn refine(
        &self,
        prec: &Prod2Prec<P1, P2>,
        trace: &Trace<S, A>,
        refutation: &Ref,
    ) -> AnalysisResult<Prod2Prec<P1, P2>> {
        let second = self.0.refine(&prec.second, trace, refutation)?;
        Ok(prec.with_second(second))
    }
}
