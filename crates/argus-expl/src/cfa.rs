//! Control-flow automata over bounded integer and boolean variables.

use crate::expr::{Expr, Value, VarId};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Location (control point) of a CFA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Loc(pub u32);

impl Loc {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub u32);

impl EdgeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Variable type. Integer bounds give the range a havoc or an
/// uninitialized read can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Int { lo: i64, hi: i64 },
    Bool,
}

impl VarType {
    /// Number of values, saturating.
    pub fn size(self) -> u64 {
        match self {
            VarType::Int { lo, hi } if hi >= lo => (hi.abs_diff(lo)).saturating_add(1),
            VarType::Int { .. } => 0,
            VarType::Bool => 2,
        }
    }

    pub fn values(self) -> Box<dyn Iterator<Item = Value>> {
        match self {
            VarType::Int { lo, hi } => Box::new((lo..=hi).map(Value::Int)),
            VarType::Bool => Box::new([false, true].into_iter().map(Value::Bool)),
        }
    }

    pub fn contains(self, value: Value) -> bool {
        match (self, value) {
            (VarType::Int { lo, hi }, Value::Int(n)) => lo <= n && n <= hi,
            (VarType::Bool, Value::Bool(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDecl {
    pub name: String,
    pub ty: VarType,
}

/// A statement on a CFA edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stmt {
    /// Blocks unless the condition holds.
    Assume(Expr),
    Assign(VarId, Expr),
    /// Sets the variable to an arbitrary value of its type.
    Havoc(VarId),
}

impl Stmt {
    pub fn reads(&self) -> BTreeSet<VarId> {
        match self {
            Stmt::Assume(e) | Stmt::Assign(_, e) => e.vars(),
            Stmt::Havoc(_) => BTreeSet::new(),
        }
    }

    pub fn writes(&self) -> Option<VarId> {
        match self {
            Stmt::Assign(v, _) | Stmt::Havoc(v) => Some(*v),
            Stmt::Assume(_) => None,
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Assume(e) => write!(f, "assume {e}"),
            Stmt::Assign(v, e) => write!(f, "{v} := {e}"),
            Stmt::Havoc(v) => write!(f, "havoc {v}"),
        }
    }
}

/// Edge with a sequence of statements executed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: EdgeId,
    pub source: Loc,
    pub target: Loc,
    pub stmts: Vec<Stmt>,
}

/// CFA construction error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("no initial location set")]
    NoInitLoc,

    #[error("no error location set")]
    NoErrorLoc,

    #[error("unknown location {0:?}")]
    UnknownLoc(Loc),

    #[error("edge {edge:?} uses undeclared variable {var}")]
    UnknownVar { edge: EdgeId, var: VarId },

    #[error("variable '{0}' declared twice")]
    DuplicateVar(String),

    #[error("variable '{name}' has an empty range {lo}..={hi}")]
    EmptyRange { name: String, lo: i64, hi: i64 },
}

/// A control-flow automaton with one initial and one error location.
#[derive(Debug, Clone)]
pub struct Cfa {
    vars: Vec<VarDecl>,
    locs: Vec<String>,
    edges: Vec<Edge>,
    outgoing: Vec<Vec<EdgeId>>,
    init: Loc,
    error: Loc,
}

impl Cfa {
    pub fn builder() -> CfaBuilder {
        CfaBuilder::default()
    }

    pub fn vars(&self) -> &[VarDecl] {
        &self.vars
    }

    pub fn var(&self, v: VarId) -> &VarDecl {
        &self.vars[v.index()]
    }

    pub fn var_by_name(&self, name: &str) -> Option<VarId> {
        self.vars
            .iter()
            .position(|d| d.name == name)
            .map(|i| VarId(i as u32))
    }

    pub fn loc_count(&self) -> usize {
        self.locs.len()
    }

    pub fn loc_name(&self, loc: Loc) -> &str {
        &self.locs[loc.index()]
    }

    pub fn loc_by_name(&self, name: &str) -> Option<Loc> {
        self.locs
            .iter()
            .position(|l| l == name)
            .map(|i| Loc(i as u32))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.index()]
    }

    /// Outgoing edges of `loc` in insertion order.
    pub fn outgoing(&self, loc: Loc) -> &[EdgeId] {
        &self.outgoing[loc.index()]
    }

    pub fn init_loc(&self) -> Loc {
        self.init
    }

    pub fn error_loc(&self) -> Loc {
        self.error
    }
}

#[derive(Debug, Clone, Default)]
pub struct CfaBuilder {
    vars: Vec<VarDecl>,
    locs: Vec<String>,
    edges: Vec<Edge>,
    init: Option<Loc>,
    error: Option<Loc>,
}

impl CfaBuilder {
    pub fn var(&mut self, name: impl Into<String>, ty: VarType) -> VarId {
        self.vars.push(VarDecl {
            name: name.into(),
            ty,
        });
        VarId((self.vars.len() - 1) as u32)
    }

    pub fn int_var(&mut self, name: impl Into<String>, lo: i64, hi: i64) -> VarId {
        self.var(name, VarType::Int { lo, hi })
    }

    pub fn bool_var(&mut self, name: impl Into<String>) -> VarId {
        self.var(name, VarType::Bool)
    }

    pub fn loc(&mut self, name: impl Into<String>) -> Loc {
        self.locs.push(name.into());
        Loc((self.locs.len() - 1) as u32)
    }

    pub fn edge(&mut self, source: Loc, target: Loc, stmts: Vec<Stmt>) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            id,
            source,
            target,
            stmts,
        });
        id
    }

    pub fn init_loc(&mut self, loc: Loc) -> &mut Self {
        self.init = Some(loc);
        self
    }

    pub fn error_loc(&mut self, loc: Loc) -> &mut Self {
        self.error = Some(loc);
        self
    }

    pub fn build(self) -> Result<Cfa, ModelError> {
        let init = self.init.ok_or(ModelError::NoInitLoc)?;
        let error = self.error.ok_or(ModelError::NoErrorLoc)?;
        let n_locs = self.locs.len();
        let check_loc = |loc: Loc| {
            if loc.index() < n_locs {
                Ok(())
            } else {
                Err(ModelError::UnknownLoc(loc))
            }
        };
        check_loc(init)?;
        check_loc(error)?;

        for (i, decl) in self.vars.iter().enumerate() {
            if self.vars[..i].iter().any(|d| d.name == decl.name) {
                return Err(ModelError::DuplicateVar(decl.name.clone()));
            }
            if let VarType::Int { lo, hi } = decl.ty {
                if lo > hi {
                    return Err(ModelError::EmptyRange {
                        name: decl.name.clone(),
                        lo,
                        hi,
                    });
                }
            }
        }

        let mut outgoing = vec![Vec::new(); n_locs];
        for edge in &self.edges {
            check_loc(edge.source)?;
            check_loc(edge.target)?;
            for stmt in &edge.stmts {
                let used = stmt.reads().into_iter().chain(stmt.writes());
                if let Some(var) = used.into_iter().find(|v| v.index() >= self.vars.len()) {
                    return Err(ModelError::UnknownVar { edge: edge.id, var });
                }
            }
            outgoing[edge.source.index()].push(edge.id);
        }

        Ok(Cfa {
            vars: self.vars,
            locs: self.locs,
            edges: self.edges,
            outgoing,
            init,
            error,
        })
    }
}
