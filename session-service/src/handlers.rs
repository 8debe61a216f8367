//! Handler模块

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use utoipa::ToSchema;
use validator::Validate;

use common::errors::{AppError, AppResult};
use common::models::{SelectRequest, SessionInputRequest};
use common::response::ApiResponse;
use session_core::{SessionController, SessionSnapshot};

use crate::state::AppState;

type SnapshotResponse = Result<Json<ApiResponse<SessionSnapshot>>, AppError>;

fn snapshot_response(state: &AppState, started: Instant) -> SnapshotResponse {
    Ok(Json(
        ApiResponse::ok_with_service(state.controller.snapshot(), &state.config.service_name)
            .with_duration(started.elapsed().as_millis() as u64),
    ))
}

/// 在独立任务中运行命令，客户端断开时命令仍会完成
async fn run_detached<F, Fut>(state: &AppState, command: F) -> AppResult<()>
where
    F: FnOnce(Arc<SessionController>) -> Fut,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    tokio::spawn(command(Arc::clone(&state.controller)))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
}

/// 获取当前会话快照
#[utoipa::path(
    get,
    path = "/api/session",
    tag = "session",
    responses(
        (status = 200, description = "会话快照", body = ApiResponse<SessionSnapshot>)
    )
)]
pub async fn get_session(State(state): State<AppState>) -> SnapshotResponse {
    snapshot_response(&state, Instant::now())
}

/// 订阅会话快照（SSE）
///
/// 连接建立时先推送当前快照，之后每次变更推送一次。
#[utoipa::path(
    get,
    path = "/api/session/events",
    tag = "session",
    responses(
        (status = 200, description = "快照事件流", body = String, content_type = "text/event-stream")
    )
)]
pub async fn session_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut events = state.controller.subscribe();
    events.mark_changed();

    let stream = stream::unfold(events, |mut events| async move {
        // 发送端随控制器一起释放时结束
        events.changed().await.ok()?;
        let snapshot = events.borrow_and_update().clone();
        let event = Event::default()
            .event("snapshot")
            .id(snapshot.revision.to_string())
            .json_data(&snapshot)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
        Some((Ok(event), events))
    })
    .take_until(state.shutdown.clone().cancelled_owned());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// 修改连接字符串、查询语句或分页大小
#[utoipa::path(
    put,
    path = "/api/session/input",
    tag = "session",
    request_body = SessionInputRequest,
    responses(
        (status = 200, description = "输入已更新", body = ApiResponse<SessionSnapshot>),
        (status = 400, description = "参数校验失败")
    )
)]
pub async fn update_input(
    State(state): State<AppState>,
    Json(req): Json<SessionInputRequest>,
) -> SnapshotResponse {
    let started = Instant::now();
    state.controller.apply_input(req).await?;
    snapshot_response(&state, started)
}

/// 保存当前连接字符串
#[utoipa::path(
    post,
    path = "/api/connections",
    tag = "connections",
    responses(
        (status = 200, description = "连接字符串已保存", body = ApiResponse<SessionSnapshot>),
        (status = 400, description = "连接字符串格式错误"),
        (status = 409, description = "命令当前不可用")
    )
)]
pub async fn save_connection(State(state): State<AppState>) -> SnapshotResponse {
    let started = Instant::now();
    state.controller.save_connection().await?;
    snapshot_response(&state, started)
}

/// 删除当前连接字符串
#[utoipa::path(
    delete,
    path = "/api/connections",
    tag = "connections",
    responses(
        (status = 200, description = "连接字符串已删除", body = ApiResponse<SessionSnapshot>),
        (status = 409, description = "命令当前不可用")
    )
)]
pub async fn delete_connection(State(state): State<AppState>) -> SnapshotResponse {
    let started = Instant::now();
    state.controller.delete_connection().await?;
    snapshot_response(&state, started)
}

/// 连接账户并列出数据库
#[utoipa::path(
    post,
    path = "/api/session/connect",
    tag = "session",
    responses(
        (status = 200, description = "连接结果写入输出日志", body = ApiResponse<SessionSnapshot>),
        (status = 409, description = "命令当前不可用")
    )
)]
pub async fn connect(State(state): State<AppState>) -> SnapshotResponse {
    let started = Instant::now();
    run_detached(&state, |controller| async move { controller.connect().await }).await?;
    snapshot_response(&state, started)
}

/// 选择数据库并列出容器
#[utoipa::path(
    post,
    path = "/api/session/database",
    tag = "session",
    request_body = SelectRequest,
    responses(
        (status = 200, description = "容器列表已更新", body = ApiResponse<SessionSnapshot>),
        (status = 400, description = "未知数据库"),
        (status = 409, description = "命令当前不可用")
    )
)]
pub async fn select_database(
    State(state): State<AppState>,
    Json(req): Json<SelectRequest>,
) -> SnapshotResponse {
    let started = Instant::now();
    req.validate()?;
    run_detached(&state, move |controller| async move {
        controller.select_database(&req.id).await
    })
    .await?;
    snapshot_response(&state, started)
}

/// 选择容器
#[utoipa::path(
    post,
    path = "/api/session/container",
    tag = "session",
    request_body = SelectRequest,
    responses(
        (status = 200, description = "容器已选择", body = ApiResponse<SessionSnapshot>),
        (status = 400, description = "未知容器"),
        (status = 409, description = "命令当前不可用")
    )
)]
pub async fn select_container(
    State(state): State<AppState>,
    Json(req): Json<SelectRequest>,
) -> SnapshotResponse {
    let started = Instant::now();
    req.validate()?;
    run_detached(&state, move |controller| async move {
        controller.select_container(&req.id).await
    })
    .await?;
    snapshot_response(&state, started)
}

/// 执行查询，获取下一页文档
#[utoipa::path(
    post,
    path = "/api/session/execute",
    tag = "session",
    responses(
        (status = 200, description = "结果写入输出与状态栏", body = ApiResponse<SessionSnapshot>),
        (status = 409, description = "命令当前不可用")
    )
)]
pub async fn execute(State(state): State<AppState>) -> SnapshotResponse {
    let started = Instant::now();
    run_detached(&state, |controller| async move { controller.execute().await }).await?;
    snapshot_response(&state, started)
}

/// 取消正在执行的查询
#[utoipa::path(
    post,
    path = "/api/session/cancel",
    tag = "session",
    responses(
        (status = 200, description = "已请求取消", body = ApiResponse<SessionSnapshot>),
        (status = 409, description = "命令当前不可用")
    )
)]
pub async fn cancel_execution(State(state): State<AppState>) -> SnapshotResponse {
    let started = Instant::now();
    state.controller.cancel_execution().await?;
    snapshot_response(&state, started)
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.controller.snapshot();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        emulator: state.config.emulator,
        saved_connections: snapshot.connection_strings.len(),
    })
}

/// 健康检查响应
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// 服务状态
    pub status: String,
    /// 服务名称
    pub service: String,
    /// 服务版本
    pub version: String,
    /// 当前时间戳
    pub timestamp: DateTime<Utc>,
    /// 是否以本地模拟器模式运行
    pub emulator: bool,
    /// 已保存的连接字符串数量
    pub saved_connections: usize,
}
