use axum::{extract::State, Json};
use types::Notification;

use crate::state::AppState;

/// Returns notes not seen before and marks them read.
#[utoipa::path(
        get,
        path = "/v1/notifications/unread",
        responses((status = 200, description = "Unread notifications", body = [Notification]))
    )]
pub async fn unread(State(state): State<AppState>) -> Json<Vec<Notification>> {
    Json(state.notes.take_unread())
}
