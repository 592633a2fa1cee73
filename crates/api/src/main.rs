mod error;
mod state;
mod telemetry;
pub mod routes {
    pub mod audit;
    pub mod health;
    pub mod jobs;
    pub mod notifications;
    pub mod schedules;
    pub mod validate;
}

use axum::{
    routing::{get, post},
    Router,
};

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
        paths(
            routes::health::health,
            routes::validate::validate_handler,
            routes::schedules::run,
            routes::schedules::list,
            routes::schedules::get,
            routes::jobs::status,
            routes::jobs::result,
            routes::notifications::unread,
            routes::audit::audit,
        ),
        components(schemas(
            types::Dataset, types::Course, types::Teacher, types::Classroom, types::Timeblock,
            types::Student, types::StudentGroup, types::Subject, types::Link, types::LinkKind,
            types::Priority, types::DayOfWeek, types::ScheduleRequest, types::RunParams,
            types::SolverKind, types::ScheduleOutcome, types::ScheduledClass, types::RunStats,
            types::Schedule, types::Notification, types::Severity, types::Violation,
            types::CourseId, types::TeacherId, types::ClassroomId, types::TimeblockId,
            types::StudentId, types::StudentGroupId, types::SubjectId, types::ScheduleId,
            jobs::JobId, jobs::JobStatus,
            routes::health::Health,
            routes::validate::ValidationReport,
            routes::schedules::JobCreated,
            routes::audit::AuditIn,
            routes::audit::AuditOut
        )),
        tags(
            (name = "termsched", description = "Term scheduling API")
        )
    )]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let app_state = state::AppState::from_env();

    let app = Router::new()
        .route("/v1/health", get(routes::health::health))
        .route("/v1/validate", post(routes::validate::validate_handler))
        .route("/v1/schedules/run", post(routes::schedules::run))
        .route("/v1/schedules", get(routes::schedules::list))
        .route("/v1/schedules/:id", get(routes::schedules::get))
        .route("/v1/jobs/:id", get(routes::jobs::status))
        .route("/v1/jobs/:id/result", get(routes::jobs::result))
        .route("/v1/notifications/unread", get(routes::notifications::unread))
        .route("/v1/audit", post(routes::audit::audit))
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(telemetry::stack())
        .with_state(app_state);

    let port = std::env::var("TERMSCHED__SERVER__PORT").unwrap_or_else(|_| "8080".into());
    let addr: std::net::SocketAddr = format!("0.0.0.0:{port}").parse()?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
