use parking_lot::RwLock;
use sched_core::{ScheduleService, SchedulerError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use types::{ScheduleOutcome, ScheduleRequest};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, ToSchema)]
pub struct JobId(pub String);

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, ToSchema)]
#[serde(tag = "status")]
pub enum JobStatus {
    Queued,
    Running,
    Saved { outcome: ScheduleOutcome },
    NoSolution { message: String },
    Failed { message: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("a scheduling run for term {0:?} is already in progress")]
    TermBusy(String),
}

#[derive(Default)]
struct Registry {
    status: HashMap<String, JobStatus>,
    busy_terms: HashSet<String>,
}

/// Background runs keyed by job id. At most one run per term is queued or
/// running at a time.
#[derive(Clone)]
pub struct InMemJobs<S: ScheduleService> {
    inner: Arc<RwLock<Registry>>,
    service: Arc<S>,
}

impl<S: ScheduleService> InMemJobs<S> {
    pub fn new(service: S) -> Self {
        Self {
            inner: Default::default(),
            service: Arc::new(service),
        }
    }

    pub fn enqueue(&self, req: ScheduleRequest) -> Result<JobId, JobError> {
        let term = req.dataset.term.clone();
        let id = Uuid::new_v4().to_string();
        {
            let mut w = self.inner.write();
            if !w.busy_terms.insert(term.clone()) {
                warn!(%term, "rejected run, term busy");
                return Err(JobError::TermBusy(term));
            }
            w.status.insert(id.clone(), JobStatus::Queued);
        }
        info!(job = %id, %term, "schedule run queued");

        let map = self.inner.clone();
        let service = self.service.clone();
        let id_for_task = id.clone();

        tokio::spawn(async move {
            map.write()
                .status
                .insert(id_for_task.clone(), JobStatus::Running);
            // a panicking run must still release its term
            let run = tokio::spawn(async move { service.schedule(req).await });
            let status = match run.await {
                Err(join) => {
                    error!(job = %id_for_task, error = %join, "job aborted");
                    JobStatus::Failed {
                        message: format!("scheduling run aborted: {join}"),
                    }
                }
                Ok(Ok(outcome)) => JobStatus::Saved { outcome },
                Ok(Err(e)) => match e.downcast_ref::<SchedulerError>() {
                    Some(se) if se.is_no_solution() => {
                        warn!(job = %id_for_task, error = %se, "no solution");
                        JobStatus::NoSolution {
                            message: se.to_string(),
                        }
                    }
                    _ => {
                        error!(job = %id_for_task, ?e, "job failed");
                        JobStatus::Failed {
                            message: format!("{e:#}"),
                        }
                    }
                },
            };
            let mut w = map.write();
            w.status.insert(id_for_task, status);
            w.busy_terms.remove(&term);
        });

        Ok(JobId(id))
    }

    pub fn get(&self, id: &str) -> Option<JobStatus> {
        self.inner.read().status.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use types::{Dataset, RunStats, ScheduleId};

    struct Fixed {
        gate: Arc<Semaphore>,
        fail: Option<fn() -> anyhow::Error>,
    }

    #[async_trait]
    impl ScheduleService for Fixed {
        async fn schedule(&self, _req: ScheduleRequest) -> anyhow::Result<ScheduleOutcome> {
            self.gate.acquire().await?.forget();
            if let Some(f) = self.fail {
                return Err(f());
            }
            Ok(ScheduleOutcome {
                schedule_id: ScheduleId(1),
                classes: Vec::new(),
                stats: RunStats::default(),
            })
        }
    }

    fn exhausted() -> anyhow::Error {
        SchedulerError::Exhausted { rounds: 50 }.into()
    }

    fn disk_full() -> anyhow::Error {
        anyhow::anyhow!("disk full")
    }

    fn request(term: &str) -> ScheduleRequest {
        ScheduleRequest {
            dataset: Dataset {
                term: term.into(),
                ..Dataset::default()
            },
            params: Default::default(),
        }
    }

    async fn wait_finished<S: ScheduleService>(jobs: &InMemJobs<S>, id: &JobId) -> JobStatus {
        for _ in 0..200 {
            if let Some(s) = jobs.get(&id.0).filter(JobStatus::is_finished) {
                return s;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never finished", id.0);
    }

    #[tokio::test]
    async fn one_run_per_term() {
        let gate = Arc::new(Semaphore::new(0));
        let jobs = InMemJobs::new(Fixed {
            gate: gate.clone(),
            fail: None,
        });
        let first = jobs.enqueue(request("fall")).unwrap();
        assert!(matches!(
            jobs.enqueue(request("fall")),
            Err(JobError::TermBusy(t)) if t == "fall"
        ));
        let other = jobs.enqueue(request("spring")).unwrap();

        gate.add_permits(2);
        assert!(matches!(wait_finished(&jobs, &first).await, JobStatus::Saved { .. }));
        wait_finished(&jobs, &other).await;

        // the term is free again once its run finished
        let again = jobs.enqueue(request("fall")).unwrap();
        gate.add_permits(1);
        wait_finished(&jobs, &again).await;
    }

    #[tokio::test]
    async fn scheduler_errors_map_to_no_solution() {
        let gate = Arc::new(Semaphore::new(1));
        let jobs = InMemJobs::new(Fixed {
            gate,
            fail: Some(exhausted),
        });
        let id = jobs.enqueue(request("fall")).unwrap();
        match wait_finished(&jobs, &id).await {
            JobStatus::NoSolution { message } => {
                assert_eq!(message, "no schedule found after 50 rounds")
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    struct Crashes;

    #[async_trait]
    impl ScheduleService for Crashes {
        async fn schedule(&self, _req: ScheduleRequest) -> anyhow::Result<ScheduleOutcome> {
            panic!("solver crashed");
        }
    }

    #[tokio::test]
    async fn panicking_run_frees_its_term() {
        let jobs = InMemJobs::new(Crashes);
        let id = jobs.enqueue(request("fall")).unwrap();
        match wait_finished(&jobs, &id).await {
            JobStatus::Failed { message } => assert!(message.contains("panicked"), "{message}"),
            other => panic!("unexpected status {other:?}"),
        }
        assert!(jobs.enqueue(request("fall")).is_ok());
    }

    #[tokio::test]
    async fn other_errors_fail_the_job() {
        let gate = Arc::new(Semaphore::new(1));
        let jobs = InMemJobs::new(Fixed {
            gate,
            fail: Some(disk_full),
        });
        let id = jobs.enqueue(request("fall")).unwrap();
        assert!(matches!(
            wait_finished(&jobs, &id).await,
            JobStatus::Failed { message } if message == "disk full"
        ));
        assert!(jobs.get("missing").is_none());
    }
}
