#[cfg(feature = "with-milp")]
mod milp_core;

use async_trait::async_trait;
use sched_core::{
    ConstraintSolver, ConstraintStack, EntityStore, Expr, InMemoryStore, NoteSink, SatResult,
    ScheduleService, ScheduleSink, Scheduler, SchedulerConfig, Valuation, Var,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use types::{ScheduleOutcome, ScheduleRequest};

/// Exact backend. With the `with-milp` feature the stack is lowered to a
/// 0/1 program for CBC; without it a deterministic first-fit pass stands in
/// and answers `Unknown` when it gets stuck.
#[derive(Default)]
pub struct MilpSolver {
    stack: ConstraintStack,
    model: Option<Valuation>,
}

impl MilpSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConstraintSolver for MilpSolver {
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

    fn reseed(&mut self, _seed: u64) {}

    fn check(&mut self, timeout: Duration) -> SatResult {
        self.model = None;
        debug!(?timeout, constraints = self.stack.constraints().len(), "milp check");
        #[cfg(feature = "with-milp")]
        let (verdict, model) = milp_core::solve(&self.stack, timeout);
        #[cfg(not(feature = "with-milp"))]
        let (verdict, model) = first_fit(&self.stack);

        match model {
            Some(m) if verdict == SatResult::Sat && self.stack.accepts(&m) => {
                self.model = Some(m);
                SatResult::Sat
            }
            Some(_) => SatResult::Unknown,
            None => verdict,
        }
    }

    fn model(&self) -> Option<&Valuation> {
        self.model.as_ref()
    }
}

/// Assigns variables in order, each to the smallest value that no
/// constraint rules out yet. Never backtracks.
#[cfg_attr(feature = "with-milp", allow(dead_code))]
fn first_fit(stack: &ConstraintStack) -> (SatResult, Option<Valuation>) {
    let mut model = Valuation::new();
    for (var, domain) in stack.domains() {
        let pick = domain.iter().copied().find(|v| {
            model.set(*var, *v);
            stack
                .constraints()
                .iter()
                .all(|c| c.eval(&|x| model.get(x)) != Some(false))
        });
        match pick {
            Some(v) => model.set(*var, v),
            None => return (SatResult::Unknown, None),
        }
    }
    (SatResult::Sat, Some(model))
}

pub struct MilpService {
    sink: Arc<dyn ScheduleSink>,
    notes: Arc<dyn NoteSink>,
    config: SchedulerConfig,
}

impl MilpService {
    pub fn new(sink: Arc<dyn ScheduleSink>, notes: Arc<dyn NoteSink>, config: SchedulerConfig) -> Self {
        Self {
            sink,
            notes,
            config,
        }
    }
}

fn run_milp(
    req: ScheduleRequest,
    sink: &dyn ScheduleSink,
    notes: &dyn NoteSink,
    config: SchedulerConfig,
) -> anyhow::Result<ScheduleOutcome> {
    let store = InMemoryStore::new(req.dataset);
    info!(term = store.term(), "received dataset for milp run");
    let mut solver = MilpSolver::new();
    let mut scheduler = Scheduler::new(&store, sink, notes, config);
    Ok(scheduler.make_schedule(&mut solver)?)
}

#[async_trait]
impl ScheduleService for MilpService {
    async fn schedule(&self, req: ScheduleRequest) -> anyhow::Result<ScheduleOutcome> {
        let config = self.config.clone().with_params(&req.params);
        let sink = self.sink.clone();
        let notes = self.notes.clone();
        tokio::task::spawn_blocking(move || run_milp(req, sink.as_ref(), notes.as_ref(), config)).await?
    }
}
