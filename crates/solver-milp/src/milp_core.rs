use good_lp::solvers::coin_cbc::coin_cbc;
use good_lp::{
    variable, Constraint, Expression, ProblemVariables, ResolutionError, Solution, SolverModel,
    Variable,
};
use sched_core::{ConstraintStack, Expr, SatResult, Valuation, Var};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// 0/1 encoding of a constraint stack: one binary per (variable, value)
/// with exactly one set, plus one indicator per compound sub-expression.
pub(crate) struct Lowering {
    vars: ProblemVariables,
    onehot: BTreeMap<Var, Vec<(i64, Variable)>>,
    rows: Vec<Constraint>,
}

impl Lowering {
    pub(crate) fn new(stack: &ConstraintStack) -> Self {
        let mut vars = ProblemVariables::new();
        let mut onehot = BTreeMap::new();
        let mut rows = Vec::new();
        for (var, domain) in stack.domains() {
            let xs: Vec<(i64, Variable)> = domain
                .iter()
                .map(|v| (*v, vars.add(variable().binary())))
                .collect();
            let mut sum = Expression::from(0.0);
            for (_, x) in &xs {
                sum = sum + *x;
            }
            rows.push(sum.eq(1.0));
            onehot.insert(*var, xs);
        }
        let mut this = Self { vars, onehot, rows };
        for c in stack.constraints() {
            this.assert_true(c);
        }
        this
    }

    fn fresh(&mut self) -> Variable {
        self.vars.add(variable().binary())
    }

    fn indicator(&self, var: Var, pick: impl Fn(i64) -> bool) -> Expression {
        let mut sum = Expression::from(0.0);
        for (v, x) in self.onehot.get(&var).into_iter().flatten() {
            if pick(*v) {
                sum = sum + *x;
            }
        }
        sum
    }

    fn assert_true(&mut self, e: &Expr) {
        match e {
            Expr::True => {}
            Expr::And(parts) => parts.iter().for_each(|p| self.assert_true(p)),
            other => {
                let x = self.lower(other);
                self.rows.push(x.eq(1.0));
            }
        }
    }

    fn all_of(&mut self, parts: Vec<Expression>) -> Expression {
        if parts.is_empty() {
            return Expression::from(1.0);
        }
        let b = self.fresh();
        let n = parts.len() as f64;
        let mut sum = Expression::from(0.0);
        for p in parts {
            self.rows.push((Expression::from(b) - p.clone()).leq(0.0));
            sum = sum + p;
        }
        self.rows.push((Expression::from(b) - sum).geq(1.0 - n));
        Expression::from(b)
    }

    fn any_of(&mut self, parts: Vec<Expression>) -> Expression {
        if parts.is_empty() {
            return Expression::from(0.0);
        }
        let b = self.fresh();
        let mut sum = Expression::from(0.0);
        for p in parts {
            self.rows.push((Expression::from(b) - p.clone()).geq(0.0));
            sum = sum + p;
        }
        self.rows.push((Expression::from(b) - sum).leq(0.0));
        Expression::from(b)
    }

    fn lower(&mut self, e: &Expr) -> Expression {
        match e {
            Expr::True => Expression::from(1.0),
            Expr::Eq(v, c) => self.indicator(*v, |x| x == *c),
            Expr::In(v, set) => self.indicator(*v, |x| set.contains(&x)),
            Expr::VarEq(a, b) => {
                let right: BTreeMap<i64, Variable> = self
                    .onehot
                    .get(b)
                    .map(|xs| xs.iter().copied().collect())
                    .unwrap_or_default();
                let pairs: Vec<(Variable, Variable)> = self
                    .onehot
                    .get(a)
                    .into_iter()
                    .flatten()
                    .filter_map(|(v, xa)| right.get(v).map(|xb| (*xa, *xb)))
                    .collect();
                let mut sum = Expression::from(0.0);
                for (xa, xb) in pairs {
                    let y = self.fresh();
                    self.rows.push((Expression::from(y) - xa).leq(0.0));
                    self.rows.push((Expression::from(y) - xb).leq(0.0));
                    self.rows.push((Expression::from(y) - xa - xb).geq(-1.0));
                    sum = sum + y;
                }
                sum
            }
            Expr::Not(inner) => Expression::from(1.0) - self.lower(inner),
            Expr::And(parts) => {
                let lowered = parts.iter().map(|p| self.lower(p)).collect();
                self.all_of(lowered)
            }
            Expr::Or(parts) => {
                let lowered = parts.iter().map(|p| self.lower(p)).collect();
                self.any_of(lowered)
            }
            Expr::Implies(premise, conclusion) => {
                let p = self.lower(premise);
                let c = self.lower(conclusion);
                self.any_of(vec![Expression::from(1.0) - p, c])
            }
        }
    }
}

pub(crate) fn solve(stack: &ConstraintStack, timeout: Duration) -> (SatResult, Option<Valuation>) {
    let Lowering { vars, onehot, rows } = Lowering::new(stack);
    debug!(rows = rows.len(), vars = onehot.len(), "lowered constraint stack");

    let mut model = vars.minimise(Expression::from(0.0)).using(coin_cbc);
    model.set_parameter("log", "0");
    model.set_parameter("sec", &timeout.as_secs().max(1).to_string());
    for r in rows {
        model = model.with(r);
    }

    match model.solve() {
        Ok(sol) => {
            let valuation: Valuation = onehot
                .iter()
                .filter_map(|(var, xs)| {
                    xs.iter()
                        .find(|(_, x)| sol.value(*x) > 0.5)
                        .map(|(v, _)| (*var, *v))
                })
                .collect();
            (SatResult::Sat, Some(valuation))
        }
        Err(ResolutionError::Infeasible) => (SatResult::Unsat, None),
        Err(e) => {
            warn!(error = %e, "milp solve gave no verdict");
            (SatResult::Unknown, None)
        }
    }
}
