use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use sched_core::audit_schedule;
use types::{Dataset, ScheduledClass, Violation};

use crate::state::AppState;

#[derive(Deserialize, ToSchema)]
pub struct AuditIn {
    pub dataset: Dataset,
    pub classes: Vec<ScheduledClass>,
}

#[derive(Serialize, ToSchema)]
pub struct AuditOut {
    pub ok: bool,
    pub violations: Vec<Violation>,
}

#[utoipa::path(
    post,
    path = "/v1/audit",
    request_body = AuditIn,
    responses(
    (status = 200, description = "Hard-rule breaches in the provided schedule", body = AuditOut)
    )
)]
pub async fn audit(State(state): State<AppState>, Json(input): Json<AuditIn>) -> Json<AuditOut> {
    let violations = audit_schedule(&input.dataset, &state.config, &input.classes);
    Json(AuditOut {
        ok: violations.is_empty(),
        violations,
    })
}
