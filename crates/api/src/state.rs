use async_trait::async_trait;
use jobs::InMemJobs;
use sched_core::{MemorySchedules, NoteBook, ScheduleService, SchedulerConfig};
use solver_heur::HeurService;
use solver_milp::MilpService;
use std::sync::Arc;
use types::{ScheduleOutcome, ScheduleRequest, SolverKind};

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<InMemJobs<DispatchService>>,
    pub schedules: Arc<MemorySchedules>,
    pub notes: Arc<NoteBook>,
    pub config: SchedulerConfig,
}

/// Routes each run to the backend named in its params.
pub struct DispatchService {
    milp: MilpService,
    heur: HeurService,
}

impl DispatchService {
    pub fn new(schedules: Arc<MemorySchedules>, notes: Arc<NoteBook>, config: SchedulerConfig) -> Self {
        Self {
            milp: MilpService::new(schedules.clone(), notes.clone(), config.clone()),
            heur: HeurService::new(schedules, notes, config),
        }
    }
}

#[async_trait]
impl ScheduleService for DispatchService {
    async fn schedule(&self, req: ScheduleRequest) -> anyhow::Result<ScheduleOutcome> {
        match req.params.solver {
            SolverKind::Milp => self.milp.schedule(req).await,
            SolverKind::Heuristic => self.heur.schedule(req).await,
        }
    }
}

impl AppState {
    pub fn new(config: SchedulerConfig) -> Self {
        let schedules = Arc::new(MemorySchedules::new());
        let notes = Arc::new(NoteBook::new());
        let jobs = InMemJobs::new(DispatchService::new(
            schedules.clone(),
            notes.clone(),
            config.clone(),
        ));
        Self {
            jobs: Arc::new(jobs),
            schedules,
            notes,
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(SchedulerConfig::from_env())
    }
}
