//! # 路由与 handler
//!
//! - `GET /`: 固定的 JSON 消息
//! - `GET /slow`: 调用模拟耗时操作，失败时返回 500
//! - `GET /metrics`: OpenMetrics 文本格式的指标
//!
//! 中间件栈 (从外到内)
//! 1. TraceLayer: 请求追踪 span
//! 2. RequestMetricsLayer: 请求计数与耗时直方图

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode, header},
    routing::get,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{error::AppError, layers::RequestMetricsLayer, metrics, metrics::Metrics, task::TaskRunner};

pub const ROOT_MESSAGE: &str = "Express server running";
/// `/slow` 失败时给客户端的固定文案，具体原因放在 `error` 字段
pub const SLOW_ERROR_MESSAGE: &str = "Abhijit Server Error";

/// 应用状态 (跨请求共享)
pub struct AppState {
    /// 进程唯一的指标注册表
    pub metrics: Arc<Metrics>,

    /// `/slow` 调用的耗时操作
    pub task: Arc<dyn TaskRunner>,

    /// 写入请求 span 的应用名
    pub app_name: String,
}

/// 构建 Axum 路由和中间件栈
pub fn build_router(app_state: AppState) -> Router {
    let metrics_layer = RequestMetricsLayer::new(app_state.metrics.clone());
    let app_name = app_state.app_name.clone();
    Router::new()
        .route("/", get(root_handler))
        .route("/slow", get(slow_handler))
        .route("/metrics", get(metrics_handler))
        .layer((
            TraceLayer::new_for_http()
                .make_span_with(move |req: &Request<Body>| make_span(&app_name, req))
                // 5xx 由 handler 自己记录
                .on_failure(()),
            metrics_layer,
        ))
        .with_state(Arc::new(app_state))
}

fn make_span(app_name: &str, req: &Request<Body>) -> tracing::Span {
    let method = req.method();
    let path = req.uri().path();
    let matched_path = req.extensions().get::<MatchedPath>().map(|matched_path| matched_path.as_str());

    tracing::info_span!("request", app = %app_name, %method, %path, matched_path)
}

#[derive(Serialize, Debug)]
pub(crate) struct RootResponse {
    message: &'static str,
}

pub(crate) async fn root_handler() -> Json<RootResponse> {
    log::info!("Root endpoint was hit");
    Json(RootResponse { message: ROOT_MESSAGE })
}

/// `/slow` 的响应体
///
/// - 成功: `{"status":"success","message":"Task completed in <ms> ms"}`
/// - 失败: `{"status":"error","message":"<固定文案>","error":"<原因>"}`
#[derive(Serialize, Debug)]
pub(crate) struct SlowResponse {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SlowResponse {
    fn success(elapsed_ms: u64) -> Self {
        SlowResponse {
            status: "success",
            message: format!("Task completed in {elapsed_ms} ms"),
            error: None,
        }
    }

    fn error(detail: String) -> Self {
        SlowResponse {
            status: "error",
            message: SLOW_ERROR_MESSAGE.to_string(),
            error: Some(detail),
        }
    }
}

pub(crate) async fn slow_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<SlowResponse>) {
    log::info!("Slow endpoint was hit");
    match state.task.run().await {
        Ok(elapsed_ms) => (StatusCode::OK, Json(SlowResponse::success(elapsed_ms))),
        Err(err) => {
            log::error!("{err}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(SlowResponse::error(err.0)))
        }
    }
}

/// Prometheus 指标处理器
pub(crate) async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<([(header::HeaderName, &'static str); 1], String), AppError> {
    match state.metrics.encode() {
        Ok(buffer) => Ok(([(header::CONTENT_TYPE, metrics::CONTENT_TYPE)], buffer)),
        Err(e) => {
            log::error!("Failed to encode metrics: {e:?}");
            Err(AppError::new(e))
        }
    }
}
