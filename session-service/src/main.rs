//! Cosmos 查询会话服务
//!
//! 以 HTTP 接口承载一个查询会话：
//! - 连接字符串的保存与删除
//! - 账户连接、数据库与容器浏览
//! - 分页查询执行与取消
//! - 会话快照推送（SSE）

mod handlers;
mod routes;
mod state;

use anyhow::Context;
use axum::{routing::get, Json, Router};
use common::config::AppConfig;
use state::AppState;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "session-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "查询会话服务 API",
        version = "0.1.0",
        description = "Cosmos DB 查询会话微服务"
    ),
    paths(
        handlers::get_session,
        handlers::session_events,
        handlers::update_input,
        handlers::save_connection,
        handlers::delete_connection,
        handlers::connect,
        handlers::select_database,
        handlers::select_container,
        handlers::execute,
        handlers::cancel_execution,
        handlers::health_check,
    ),
    components(schemas(
        common::models::SessionInputRequest,
        common::models::SelectRequest,
        common::models::DatabaseRef,
        common::models::ContainerRef,
        session_core::SessionSnapshot,
        session_core::FetchState,
        session_core::controller::CommandBoard,
        session_core::controller::CommandState,
        handlers::HealthResponse,
    )),
    tags(
        (name = "session", description = "会话命令端点"),
        (name = "connections", description = "连接字符串端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志追踪
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 加载配置（含 .env）
    let config = AppConfig::load_with_service(SERVICE_NAME);
    info!(
        emulator = config.emulator,
        store = ?config.connection_store,
        "配置已加载"
    );

    // 创建应用状态（读取已保存的连接字符串）
    let state = AppState::new(config.clone())
        .await
        .context("初始化会话控制器失败")?;
    let controller = state.controller.clone();
    let shutdown = state.shutdown.clone();

    let app = create_router(state);

    // 启动服务
    let addr = config.bind_address();
    info!(service = SERVICE_NAME, address = %addr, "启动服务");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("服务运行失败")?;

    // 会话结束：取消查询并释放客户端
    controller.shutdown().await;
    info!(service = SERVICE_NAME, "服务已停止");
    Ok(())
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// 等待 Ctrl-C，随后通知事件流结束
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    info!("收到退出信号，开始关闭");
    shutdown.cancel();
}
