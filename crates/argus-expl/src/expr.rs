//! Integer/boolean expressions with three-valued evaluation over partial valuations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, Mul, Not, Sub};
use thiserror::Error;

/// Index of a declared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);

impl VarId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Int(i64),
    Bool(bool),
}

impl Value {
    fn type_name(self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
        }
    }

    pub fn as_int(self) -> EvalResult<i64> {
        match self {
            Value::Int(n) => Ok(n),
            other => Err(EvalError::TypeMismatch {
                expected: "Int",
                actual: other.type_name(),
            }),
        }
    }

    pub fn as_bool(self) -> EvalResult<bool> {
        match self {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::TypeMismatch {
                expected: "Bool",
                actual: other.type_name(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Evaluation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Partial assignment of values to variables. Missing variables are unknown.
pub type Valuation = BTreeMap<VarId, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Int(i64),
    Bool(bool),
    Var(VarId),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Neq(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Leq(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn var(v: VarId) -> Self {
        Expr::Var(v)
    }

    pub fn int(n: i64) -> Self {
        Expr::Int(n)
    }

    pub fn equals(self, rhs: Expr) -> Self {
        Expr::Eq(Box::new(self), Box::new(rhs))
    }

    pub fn not_equals(self, rhs: Expr) -> Self {
        Expr::Neq(Box::new(self), Box::new(rhs))
    }

    pub fn lt(self, rhs: Expr) -> Self {
        Expr::Lt(Box::new(self), Box::new(rhs))
    }

    pub fn leq(self, rhs: Expr) -> Self {
        Expr::Leq(Box::new(self), Box::new(rhs))
    }

    pub fn and(self, rhs: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(rhs))
    }

    /// Variables read by the expression.
    pub fn vars(&self) -> BTreeSet<VarId> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<VarId>) {
        match self {
            Expr::Int(_) | Expr::Bool(_) => {}
            Expr::Var(v) => {
                out.insert(*v);
            }
            Expr::Not(e) => e.collect_vars(out),
            Expr::Add(a, b)
            | Expr::Sub(a, b)
            | Expr::Mul(a, b)
            | Expr::Eq(a, b)
            | Expr::Neq(a, b)
            | Expr::Lt(a, b)
            | Expr::Leq(a, b)
            | Expr::And(a, b)
            | Expr::Or(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }

    /// Evaluate under a partial valuation.
    ///
    /// Returns `Ok(None)` when the value depends on an unknown variable.
    /// `And`/`Or` short-circuit on a known `false`/`true` operand even if the
    /// other side is unknown. Integer arithmetic wraps.
    pub fn eval(&self, val: &Valuation) -> EvalResult<Option<Value>> {
        let int2 = |a: &Expr, b: &Expr| -> EvalResult<Option<(i64, i64)>> {
            match (a.eval(val)?, b.eval(val)?) {
                (Some(x), Some(y)) => Ok(Some((x.as_int()?, y.as_int()?))),
                _ => Ok(None),
            }
        };
        Ok(match self {
            Expr::Int(n) => Some(Value::Int(*n)),
            Expr::Bool(b) => Some(Value::Bool(*b)),
            Expr::Var(v) => val.get(v).copied(),
            Expr::Add(a, b) => int2(a, b)?.map(|(x, y)| Value::Int(x.wrapping_add(y))),
            Expr::Sub(a, b) => int2(a, b)?.map(|(x, y)| Value::Int(x.wrapping_sub(y))),
            Expr::Mul(a, b) => int2(a, b)?.map(|(x, y)| Value::Int(x.wrapping_mul(y))),
            Expr::Lt(a, b) => int2(a, b)?.map(|(x, y)| Value::Bool(x < y)),
            Expr::Leq(a, b) => int2(a, b)?.map(|(x, y)| Value::Bool(x <= y)),
            Expr::Eq(a, b) | Expr::Neq(a, b) => match (a.eval(val)?, b.eval(val)?) {
                (Some(x), Some(y)) => {
                    if x.type_name() != y.type_name() {
                        return Err(EvalError::TypeMismatch {
                            expected: x.type_name(),
                            actual: y.type_name(),
                        });
                    }
                    Some(Value::Bool((x == y) == matches!(self, Expr::Eq(..))))
                }
                _ => None,
            },
            Expr::Not(e) => match e.eval(val)? {
                Some(v) => Some(Value::Bool(!v.as_bool()?)),
                None => None,
            },
            Expr::And(a, b) => {
                let x = a.eval(val)?.map(Value::as_bool).transpose()?;
                let y = b.eval(val)?.map(Value::as_bool).transpose()?;
                match (x, y) {
                    (Some(false), _) | (_, Some(false)) => Some(Value::Bool(false)),
                    (Some(true), Some(true)) => Some(Value::Bool(true)),
                    _ => None,
                }
            }
            Expr::Or(a, b) => {
                let x = a.eval(val)?.map(Value::as_bool).transpose()?;
                let y = b.eval(val)?.map(Value::as_bool).transpose()?;
                match (x, y) {
                    (Some(true), _) | (_, Some(true)) => Some(Value::Bool(true)),
                    (Some(false), Some(false)) => Some(Value::Bool(false)),
                    _ => None,
                }
            }
        })
    }

    /// For `v == e` (either side) with `v` unknown and `e` known, the binding it forces.
    pub fn forced_binding(&self, val: &Valuation) -> Option<(VarId, Value)> {
        let Expr::Eq(a, b) = self else {
            return None;
        };
        let bind = |var: &Expr, other: &Expr| match var {
            Expr::Var(v) if !val.contains_key(v) => {
                other.eval(val).ok().flatten().map(|value| (*v, value))
            }
            _ => None,
        };
        bind(a, b).or_else(|| bind(b, a))
    }
}

impl Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::Add(Box::new(self), Box::new(rhs))
    }
}

impl Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::Sub(Box::new(self), Box::new(rhs))
    }
}

impl Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::Mul(Box::new(self), Box::new(rhs))
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Add(a, b) => write!(f, "({a} + {b})"),
            Expr::Sub(a, b) => write!(f, "({a} - {b})"),
            Expr::Mul(a, b) => write!(f, "({a} * {b})"),
            Expr::Eq(a, b) => write!(f, "({a} == {b})"),
            Expr::Neq(a, b) => write!(f, "({a} != {b})"),
            Expr::Lt(a, b) => write!(f, "({a} < {b})"),
            Expr::Leq(a, b) => write!(f, "({a} <= {b})"),
            Expr::Not(e) => write!(f, "!{e}"),
            Expr::And(a, b) => write!(f, "({a} && {b})"),
            Expr::Or(a, b) => write!(f, "({a} || {b})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const X: VarId = VarId(0);
    const Y: VarId = VarId(1);

    fn val(pairs: &[(VarId, Value)]) -> Valuation {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_eval_known() {
        let e = (Expr::var(X) + Expr::int(2)).lt(Expr::int(5));
        assert_eq!(e.eval(&val(&[(X, Value::Int(1))])), Ok(Some(Value::Bool(true))));
        assert_eq!(e.eval(&val(&[(X, Value::Int(3))])), Ok(Some(Value::Bool(false))));
    }

    #[test]
    fn test_eval_unknown_propagates() {
        let e = Expr::var(X).equals(Expr::var(Y));
        assert_eq!(e.eval(&val(&[(X, Value::Int(1))])), Ok(None));
    }

    #[test]
    fn test_and_or_short_circuit_on_unknown() {
        let unknown = Expr::var(Y).equals(Expr::int(0));
        let f = Expr::Bool(false).and(unknown.clone());
        let t = unknown.clone().or(Expr::Bool(true));
        assert_eq!(f.eval(&Valuation::new()), Ok(Some(Value::Bool(false))));
        assert_eq!(t.eval(&Valuation::new()), Ok(Some(Value::Bool(true))));
        assert_eq!(unknown.and(Expr::Bool(true)).eval(&Valuation::new()), Ok(None));
    }

    #[test]
    fn test_type_mismatch() {
        let e = Expr::Bool(true) + Expr::int(1);
        assert!(matches!(e.eval(&Valuation::new()), Err(EvalError::TypeMismatch { .. })));
        let e = Expr::Bool(true).equals(Expr::int(1));
        assert!(e.eval(&Valuation::new()).is_err());
    }

    #[test]
    fn test_wrapping_arithmetic() {
        let e = Expr::int(i64::MAX) + Expr::int(1);
        assert_eq!(e.eval(&Valuation::new()), Ok(Some(Value::Int(i64::MIN))));
    }

    #[test]
    fn test_forced_binding() {
        let e = Expr::int(4).equals(Expr::var(X));
        assert_eq!(e.forced_binding(&Valuation::new()), Some((X, Value::Int(4))));
        assert_eq!(e.forced_binding(&val(&[(X, Value::Int(1))])), None);
        assert_eq!(Expr::var(X).equals(Expr::var(Y)).forced_binding(&Valuation::new()), None);
    }

    #[test]
    fn test_vars() {
        let e = !(Expr::var(X) * Expr::var(Y)).leq(Expr::var(X));
        assert_eq!(e.vars(), BTreeSet::from([X, Y]));
    }
}
