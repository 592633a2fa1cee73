use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use types::{Schedule, ScheduleId, ScheduleRequest};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct JobCreated {
    pub job_id: String,
    pub status: String,
}

#[utoipa::path(
        post,
        path = "/v1/schedules/run",
        request_body = ScheduleRequest,
        responses(
            (status = 200, description = "Run enqueued", body = JobCreated),
            (status = 409, description = "A run for this term is already in progress")
        )
    )]
pub async fn run(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<JobCreated>, ApiError> {
    let id = state.jobs.enqueue(req)?;
    Ok(Json(JobCreated {
        job_id: id.0,
        status: "queued".into(),
    }))
}

#[utoipa::path(
        get,
        path = "/v1/schedules",
        responses((status = 200, description = "Stored schedules", body = [Schedule]))
    )]
pub async fn list(State(state): State<AppState>) -> Json<Vec<Schedule>> {
    Json(state.schedules.list())
}

#[utoipa::path(
        get,
        path = "/v1/schedules/{id}",
        params(("id" = u32, Path, description = "Schedule ID")),
        responses(
            (status = 200, description = "Stored schedule", body = Schedule),
            (status = 404, description = "Unknown schedule")
        )
    )]
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<Schedule>, ApiError> {
    state
        .schedules
        .get(ScheduleId(id))
        .map(Json)
        .ok_or_else(|| ApiError::not_found("schedule", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use sched_core::SchedulerConfig;

    #[tokio::test]
    async fn empty_store_lists_nothing() {
        let state = AppState::new(SchedulerConfig::default());
        assert!(list(State(state.clone())).await.0.is_empty());
        let err = get(State(state), Path(7)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
