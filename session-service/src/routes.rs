//! 会话服务路由模块

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers;
use crate::state::AppState;

/// 创建会话路由
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/session", get(handlers::get_session))
        .route("/api/session/events", get(handlers::session_events))
        .route("/api/session/input", put(handlers::update_input))
        .route(
            "/api/connections",
            post(handlers::save_connection).delete(handlers::delete_connection),
        )
        .route("/api/session/connect", post(handlers::connect))
        .route("/api/session/database", post(handlers::select_database))
        .route("/api/session/container", post(handlers::select_container))
        .route("/api/session/execute", post(handlers::execute))
        .route("/api/session/cancel", post(handlers::cancel_execution))
        .route("/api/health", get(handlers::health_check))
}
