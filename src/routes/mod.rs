//! Router assembly: REST surface plus the SSE readiness stream, all under
//! `/api/v1`, with permissive CORS and request tracing.

pub mod http;
pub mod sse;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
  let cors = CorsLayer::new()
    .allow_origin(Any)
    .allow_methods(Any)
    .allow_headers(Any);

  Router::new()
    .route("/api/v1/health", get(http::health))
    .route("/api/v1/courses", post(http::create_course))
    .route("/api/v1/courses/:id", get(http::get_course))
    .route("/api/v1/courses/:id/enroll", post(http::enroll))
    .route("/api/v1/courses/:id/progress", get(http::course_progress))
    .route("/api/v1/chapters/:id/questions", get(http::chapter_questions))
    .route("/api/v1/chapters/:id/content", post(http::generate_content))
    .route("/api/v1/answers", post(http::submit_answer))
    .route("/api/v1/evaluate", post(http::evaluate))
    .route("/api/v1/questions/ready", get(sse::questions_ready))
    .route("/api/v1/points", get(http::get_points))
    .route("/api/v1/points/history", get(http::points_history))
    .route("/api/v1/points/streak", post(http::update_streak))
    .route("/api/v1/leaderboard", get(http::leaderboard))
    .route("/api/v1/achievements", get(http::list_achievements))
    .route("/api/v1/assessments", get(http::list_assessments))
    .layer(TraceLayer::new_for_http())
    .layer(cors)
    .with_state(state)
}
