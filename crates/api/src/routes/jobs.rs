use axum::{
    extract::{Path, State},
    Json,
};
use jobs::JobStatus;
use types::ScheduleOutcome;

use crate::error::ApiError;
use crate::state::AppState;

#[utoipa::path(
        get,
        path = "/v1/jobs/{id}",
        params(("id" = String, Path, description = "Job ID")),
        responses(
            (status = 200, description = "Job status", body = JobStatus),
            (status = 404, description = "Unknown job")
        )
    )]
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    state
        .jobs
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("job", &id))
}

#[utoipa::path(
        get,
        path = "/v1/jobs/{id}/result",
        params(("id" = String, Path, description = "Job ID")),
        responses(
            (status = 200, description = "Schedule outcome (if saved)", body = ScheduleOutcome),
            (status = 404, description = "Unknown job or no schedule")
        )
    )]
pub async fn result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduleOutcome>, ApiError> {
    match state.jobs.get(&id) {
        Some(JobStatus::Saved { outcome }) => Ok(Json(outcome)),
        Some(JobStatus::NoSolution { message }) | Some(JobStatus::Failed { message }) => {
            Err(ApiError::bad_request(message))
        }
        Some(_) => Err(ApiError::not_found("result for job", &id)),
        None => Err(ApiError::not_found("job", &id)),
    }
}
