use axum::{http::StatusCode, Json};
use sched_core::{validate, ValidationError};
use serde::Serialize;
use types::Dataset;

#[derive(Serialize, utoipa::ToSchema)]
pub struct ValidationReport {
    pub ok: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/v1/validate",
    request_body = Dataset,
    responses(
    (status = 200, description = "Validation result", body = ValidationReport)
    )
)]
pub async fn validate_handler(Json(data): Json<Dataset>) -> (StatusCode, Json<ValidationReport>) {
    match validate(&data) {
        Ok(()) => (StatusCode::OK, Json(ValidationReport { ok: true, errors: vec![] })),
        Err(ValidationError::Msg(msg)) => {
            let errs = msg.split(';').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            (StatusCode::OK, Json(ValidationReport { ok: false, errors: errs }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{LinkKind, Priority, Timeblock};

    #[tokio::test]
    async fn splits_errors_into_rows() {
        let mut data = Dataset::default();
        data.timeblocks.push(Timeblock::new(1, 800, 850));
        data.link(LinkKind::CourseTeacher, 1, 2, Priority::Low);
        let (code, Json(report)) = validate_handler(Json(data)).await;
        assert_eq!(code, StatusCode::OK);
        assert!(!report.ok);
        assert_eq!(report.errors.len(), 2);
    }
}
