use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sched_core::{
    ConstraintSolver, ConstraintStack, EntityStore, Expr, InMemoryStore, NoteSink, SatResult,
    ScheduleService, ScheduleSink, Scheduler, SchedulerConfig, Valuation, Var,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use types::{ScheduleOutcome, ScheduleRequest};

/// Nodes between two deadline checks.
const CLOCK_EVERY: u64 = 256;

/// Randomized backtracking search over finite integer domains.
///
/// Variables are picked smallest-domain first, values are tried in a
/// seeded random order, and every assignment is forward-checked against
/// the constraints that mention it.
pub struct BacktrackSolver {
    stack: ConstraintStack,
    rng: ChaCha8Rng,
    model: Option<Valuation>,
}

impl BacktrackSolver {
    pub fn new(seed: u64) -> Self {
        Self {
            stack: ConstraintStack::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            model: None,
        }
    }
}

impl ConstraintSolver for BacktrackSolver {
    fn declare(&mut self, var: Var, domain: Vec<i64>) {
        self.stack.declare(var, domain);
    }

    fn add(&mut self, constraint: Expr) {
        self.stack.add(constraint);
    }

    fn push(&mut self) {
        self.stack.push();
    }

    fn pop(&mut self) {
        self.stack.pop();
        self.model = None;
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    fn check(&mut self, timeout: Duration) -> SatResult {
        self.model = None;
        let deadline = Instant::now() + timeout;
        let Some(mut search) = Search::new(&self.stack, deadline) else {
            return SatResult::Unsat;
        };
        let verdict = search.run(&mut self.rng);
        debug!(
            vars = search.vars.len(),
            constraints = search.constraints.len(),
            nodes = search.nodes,
            ?verdict,
            "backtracking search finished"
        );
        match verdict {
            Step::Found => {
                self.model = Some(search.model());
                SatResult::Sat
            }
            Step::Timeout => SatResult::Unknown,
            Step::Dead => SatResult::Unsat,
        }
    }

    fn model(&self) -> Option<&Valuation> {
        self.model.as_ref()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Found,
    Dead,
    Timeout,
}

struct Search<'a> {
    vars: Vec<Var>,
    index: HashMap<Var, usize>,
    constraints: Vec<&'a Expr>,
    scope: Vec<Vec<usize>>,
    watch: Vec<Vec<usize>>,
    domains: Vec<Vec<i64>>,
    assign: Vec<Option<i64>>,
    /// Pruned `(var, value)` pairs, undone on backtrack.
    trail: Vec<(usize, i64)>,
    nodes: u64,
    deadline: Instant,
}

impl<'a> Search<'a> {
    /// Indexes the stack and applies unary constraints. `None` when some
    /// domain is already empty.
    fn new(stack: &'a ConstraintStack, deadline: Instant) -> Option<Self> {
        let vars: Vec<Var> = stack.domains().keys().copied().collect();
        let index: HashMap<Var, usize> = vars.iter().enumerate().map(|(i, v)| (*v, i)).collect();
        let domains: Vec<Vec<i64>> = stack.domains().values().cloned().collect();

        let constraints: Vec<&Expr> = stack.constraints().iter().collect();
        let mut watch = vec![Vec::new(); vars.len()];
        let scope: Vec<Vec<usize>> = constraints
            .iter()
            .enumerate()
            .map(|(ci, c)| {
                let s: Vec<usize> = c.vars().iter().filter_map(|v| index.get(v).copied()).collect();
                for &u in &s {
                    watch[u].push(ci);
                }
                s
            })
            .collect();

        let mut search = Self {
            assign: vec![None; vars.len()],
            vars,
            index,
            constraints,
            scope,
            watch,
            domains,
            trail: Vec::new(),
            nodes: 0,
            deadline,
        };
        for ci in 0..search.constraints.len() {
            let ok = match search.scope[ci].len() {
                0 => search.holds(ci) == Some(true),
                1 => {
                    let u = search.scope[ci][0];
                    search.prune(ci, u)
                }
                _ => true,
            };
            if !ok {
                return None;
            }
        }
        search.trail.clear();
        if search.domains.iter().any(Vec::is_empty) {
            return None;
        }
        Some(search)
    }

    fn value(&self, var: Var) -> Option<i64> {
        self.index.get(&var).and_then(|&i| self.assign[i])
    }

    fn holds(&self, ci: usize) -> Option<bool> {
        self.constraints[ci].eval(&|v| self.value(v))
    }

    /// Drops every value of `u` that falsifies constraint `ci`.
    fn prune(&mut self, ci: usize, u: usize) -> bool {
        let dom = std::mem::take(&mut self.domains[u]);
        let mut keep = Vec::with_capacity(dom.len());
        for v in dom {
            self.assign[u] = Some(v);
            if self.holds(ci) == Some(false) {
                self.trail.push((u, v));
            } else {
                keep.push(v);
            }
        }
        self.assign[u] = None;
        self.domains[u] = keep;
        !self.domains[u].is_empty()
    }

    fn undo(&mut self, mark: usize) {
        while self.trail.len() > mark {
            if let Some((u, v)) = self.trail.pop() {
                self.domains[u].push(v);
            }
        }
    }

    fn propagate(&mut self, x: usize) -> bool {
        for k in 0..self.watch[x].len() {
            let ci = self.watch[x][k];
            let mut open = self.scope[ci].iter().copied().filter(|u| self.assign[*u].is_none());
            let first = open.next();
            let more = open.next().is_some();
            let ok = match (first, more) {
                (None, _) => self.holds(ci) == Some(true),
                (Some(u), false) => self.prune(ci, u),
                (Some(_), true) => self.holds(ci) != Some(false),
            };
            if !ok {
                return false;
            }
        }
        true
    }

    fn pick(&self) -> Option<usize> {
        (0..self.vars.len())
            .filter(|u| self.assign[*u].is_none())
            .min_by_key(|u| self.domains[*u].len())
    }

    fn run(&mut self, rng: &mut ChaCha8Rng) -> Step {
        self.nodes += 1;
        if self.nodes % CLOCK_EVERY == 0 && Instant::now() >= self.deadline {
            return Step::Timeout;
        }
        let Some(x) = self.pick() else {
            return Step::Found;
        };
        let mut values = self.domains[x].clone();
        values.shuffle(rng);
        for v in values {
            let mark = self.trail.len();
            self.assign[x] = Some(v);
            if self.propagate(x) {
                match self.run(rng) {
                    Step::Dead => {}
                    done => return done,
                }
            }
            self.assign[x] = None;
            self.undo(mark);
        }
        Step::Dead
    }

    fn model(&self) -> Valuation {
        self.vars
            .iter()
            .zip(&self.assign)
            .filter_map(|(var, v)| v.map(|x| (*var, x)))
            .collect()
    }
}

/// Runs the scheduler with [`BacktrackSolver`] against an in-memory copy of
/// the request's dataset.
pub struct HeurService {
    sink: Arc<dyn ScheduleSink>,
    notes: Arc<dyn NoteSink>,
    config: SchedulerConfig,
}

impl HeurService {
    pub fn new(sink: Arc<dyn ScheduleSink>, notes: Arc<dyn NoteSink>, config: SchedulerConfig) -> Self {
        Self {
            sink,
            notes,
            config,
        }
    }
}

fn run_heuristic(
    req: ScheduleRequest,
    sink: &dyn ScheduleSink,
    notes: &dyn NoteSink,
    config: SchedulerConfig,
) -> anyhow::Result<ScheduleOutcome> {
    let store = InMemoryStore::new(req.dataset);
    debug!(term = store.term(), seed = config.seed, "heuristic schedule run");
    let mut solver = BacktrackSolver::new(config.seed);
    let mut scheduler = Scheduler::new(&store, sink, notes, config);
    Ok(scheduler.make_schedule(&mut solver)?)
}

#[async_trait]
impl ScheduleService for HeurService {
    /// The run is CPU bound and may take minutes, so it goes to the
    /// blocking pool.
    async fn schedule(&self, req: ScheduleRequest) -> anyhow::Result<ScheduleOutcome> {
        let config = self.config.clone().with_params(&req.params);
        let sink = self.sink.clone();
        let notes = self.notes.clone();
        tokio::task::spawn_blocking(move || run_heuristic(req, sink.as_ref(), notes.as_ref(), config))
            .await?
    }
}
