use crate::handlers;
use crate::state::AppState;
use axum::{
    http::Method,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/practice/today", get(handlers::today_practice))
        .route("/api/challenges", get(handlers::list_challenges))
        .route("/api/challenges/:id", get(handlers::challenge_detail))
        .route("/api/feedback/record", get(handlers::feedback_record))
        .route("/api/feedback/history", get(handlers::feedback_history))
        .route("/api/feedback/submit", post(handlers::submit_feedback))
        .route("/api/feedback/update", put(handlers::update_feedback))
        .route("/api/analytics/event", post(handlers::log_event))
        .route("/api/analytics/retention", get(handlers::retention))
        .route("/api/analytics/activity", get(handlers::activity))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
