//! Symbolic constraint language handed to the external solver.
//!
//! Every class instance `i` owns a 4-tuple of integer variables
//! `(teacher, room, time, course)`. Constraints are boolean trees over
//! those variables; [`Expr::eval`] gives them a three-valued meaning over a
//! partial valuation so any backend can check a candidate model.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Teacher,
    Room,
    Time,
    Course,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Teacher, Field::Room, Field::Time, Field::Course];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var {
    pub class: usize,
    pub field: Field,
}

impl Var {
    pub fn teacher(class: usize) -> Self {
        Self { class, field: Field::Teacher }
    }
    pub fn room(class: usize) -> Self {
        Self { class, field: Field::Room }
    }
    pub fn time(class: usize) -> Self {
        Self { class, field: Field::Time }
    }
    pub fn course(class: usize) -> Self {
        Self { class, field: Field::Course }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.field {
            Field::Teacher => "teacher",
            Field::Room => "room",
            Field::Time => "time",
            Field::Course => "course",
        };
        write!(f, "{name}({})", self.class)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    True,
    Eq(Var, i64),
    In(Var, Vec<i64>),
    VarEq(Var, Var),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Implies(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn not(e: Expr) -> Expr {
        Expr::Not(Box::new(e))
    }

    pub fn implies(premise: Expr, conclusion: Expr) -> Expr {
        Expr::Implies(Box::new(premise), Box::new(conclusion))
    }

    /// `a != b` for two variables.
    pub fn distinct(a: Var, b: Var) -> Expr {
        Expr::not(Expr::VarEq(a, b))
    }

    /// Appends every variable the expression mentions (with repeats).
    pub fn collect_vars(&self, out: &mut Vec<Var>) {
        match self {
            Expr::True => {}
            Expr::Eq(v, _) | Expr::In(v, _) => out.push(*v),
            Expr::VarEq(a, b) => {
                out.push(*a);
                out.push(*b);
            }
            Expr::Not(e) => e.collect_vars(out),
            Expr::And(es) | Expr::Or(es) => es.iter().for_each(|e| e.collect_vars(out)),
            Expr::Implies(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
        }
    }

    /// Sorted, de-duplicated variable list.
    pub fn vars(&self) -> Vec<Var> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    /// `None` means the outcome still depends on an unassigned variable.
    pub fn eval<F>(&self, value: &F) -> Option<bool>
    where
        F: Fn(Var) -> Option<i64>,
    {
        match self {
            Expr::True => Some(true),
            Expr::Eq(v, x) => value(*v).map(|got| got == *x),
            Expr::In(v, set) => value(*v).map(|got| set.contains(&got)),
            Expr::VarEq(a, b) => match (value(*a), value(*b)) {
                (Some(x), Some(y)) => Some(x == y),
                _ => None,
            },
            Expr::Not(e) => e.eval(value).map(|b| !b),
            Expr::And(es) => {
                let mut open = false;
                for e in es {
                    match e.eval(value) {
                        Some(false) => return Some(false),
                        None => open = true,
                        Some(true) => {}
                    }
                }
                if open {
                    None
                } else {
                    Some(true)
                }
            }
            Expr::Or(es) => {
                let mut open = false;
                for e in es {
                    match e.eval(value) {
                        Some(true) => return Some(true),
                        None => open = true,
                        Some(false) => {}
                    }
                }
                if open {
                    None
                } else {
                    Some(false)
                }
            }
            Expr::Implies(a, c) => match (a.eval(value), c.eval(value)) {
                (Some(false), _) | (_, Some(true)) => Some(true),
                (Some(true), Some(false)) => Some(false),
                _ => None,
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Valuation {
    values: BTreeMap<Var, i64>,
}

impl Valuation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, var: Var) -> Option<i64> {
        self.values.get(&var).copied()
    }

    pub fn set(&mut self, var: Var, value: i64) {
        self.values.insert(var, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Var, i64)> + '_ {
        self.values.iter().map(|(v, x)| (*v, *x))
    }

    pub fn satisfies(&self, constraint: &Expr) -> bool {
        constraint.eval(&|v| self.get(v)) == Some(true)
    }
}

impl FromIterator<(Var, i64)> for Valuation {
    fn from_iter<I: IntoIterator<Item = (Var, i64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    /// Budget or timeout exhausted before a verdict.
    Unknown,
}

impl fmt::Display for SatResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SatResult::Sat => "sat",
            SatResult::Unsat => "unsat",
            SatResult::Unknown => "unknown",
        })
    }
}

/// Black-box finite-domain solver over [`Var`]s.
pub trait ConstraintSolver {
    /// Declares (or redeclares) the fixed integer domain of a variable.
    fn declare(&mut self, var: Var, domain: Vec<i64>);
    fn add(&mut self, constraint: Expr);
    fn push(&mut self);
    fn pop(&mut self);
    /// Changes the search order used by the next `check`. Deterministic
    /// backends may ignore it.
    fn reseed(&mut self, seed: u64);
    fn check(&mut self, timeout: Duration) -> SatResult;
    /// Model of the last `Sat` check.
    fn model(&self) -> Option<&Valuation>;
}

/// Scoped declarations and assertions shared by solver backends.
#[derive(Clone, Debug, Default)]
pub struct ConstraintStack {
    domains: BTreeMap<Var, Vec<i64>>,
    constraints: Vec<Expr>,
    frames: Vec<(BTreeMap<Var, Vec<i64>>, usize)>,
}

impl ConstraintStack {
    pub fn declare(&mut self, var: Var, mut domain: Vec<i64>) {
        domain.sort_unstable();
        domain.dedup();
        self.domains.insert(var, domain);
    }

    pub fn add(&mut self, constraint: Expr) {
        self.constraints.push(constraint);
    }

    pub fn push(&mut self) {
        self.frames
            .push((self.domains.clone(), self.constraints.len()));
    }

    /// Popping with no open frame clears everything.
    pub fn pop(&mut self) {
        match self.frames.pop() {
            Some((domains, len)) => {
                self.domains = domains;
                self.constraints.truncate(len);
            }
            None => {
                self.domains.clear();
                self.constraints.clear();
            }
        }
    }

    pub fn domains(&self) -> &BTreeMap<Var, Vec<i64>> {
        &self.domains
    }

    pub fn constraints(&self) -> &[Expr] {
        &self.constraints
    }

    /// Checks a full valuation against every domain and assertion.
    pub fn accepts(&self, model: &Valuation) -> bool {
        self.domains
            .iter()
            .all(|(v, dom)| model.get(*v).map_or(false, |x| dom.binary_search(&x).is_ok()))
            && self.constraints.iter().all(|c| model.satisfies(c))
    }
}
