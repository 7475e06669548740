// src/routes.rs

use std::time::Duration;

use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    handlers::{admin, attempt, auth, exam},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (auth, exams, admin).
/// * Applies global middleware (Trace, CORS, request timeout).
/// * Injects global state.
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let auth_routes = Router::new().route("/login", post(auth::login));

    // Any authenticated principal
    let exam_routes = Router::new()
        .route("/active", get(exam::get_active_exam))
        .route("/{id}", get(exam::get_exam))
        .route("/{id}/select", post(attempt::select_answer))
        .route("/{id}/state", get(attempt::get_state))
        .route("/{id}/submit", post(attempt::submit_exam))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/exams", post(exam::create_exam))
        .route("/exams/{id}/activate", post(exam::activate_exam))
        .route("/exams/{id}/close", post(exam::close_exam))
        .route(
            "/credentials",
            get(admin::list_credentials).post(admin::issue_credential),
        )
        .route("/credentials/{jti}", delete(admin::revoke_credential))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/exams", exam_routes)
        .nest("/api/admin", admin_routes)
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(TimeoutLayer::new(timeout)),
        )
        .with_state(state)
}
