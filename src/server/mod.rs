//! HTTP adapter
//!
//! Clamps caller parameters into the server limits, runs the blocking
//! launch/reconcile unit of work off the async runtime, maps the result onto
//! a status code and emits an audit record.

use crate::config::settings::ServerConfig;
use crate::config::types::{ErrorKind, ExecutionRequest, ExecutionResult};
use crate::config::validator::Bounds;
use crate::exec::Executor;
use crate::kernel::rlimit::{memory_limit_support, MemoryLimitSupport};
use crate::observability::audit::{self, AuditRecord};
use axum::extract::{Json, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

pub const CALLER_HEADER: &str = "x-caller-id";
const ANONYMOUS: &str = "anonymous";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub executor: Arc<Executor>,
}

impl AppState {
    pub fn new(config: ServerConfig, executor: Executor) -> Self {
        Self {
            config: Arc::new(config),
            executor: Arc::new(executor),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteBody {
    pub code: String,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub max_memory_mb: Option<i64>,
    #[serde(default)]
    pub capture_locals: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LimitsBody {
    pub timeout_seconds: Bounds,
    pub memory_limit_mb: Bounds,
    pub max_code_bytes: usize,
    pub memory_limit_support: MemoryLimitSupport,
}

impl LimitsBody {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            timeout_seconds: config.limits.timeout_seconds,
            memory_limit_mb: config.limits.memory_limit_mb,
            max_code_bytes: config.max_code_bytes,
            memory_limit_support: memory_limit_support(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthBody {
    pub status: String,
    pub worker_available: bool,
    pub interpreter_available: bool,
    pub memory_limit_support: MemoryLimitSupport,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Transport status for an execution result.
pub fn status_for(result: &ExecutionResult) -> StatusCode {
    match result.error_kind() {
        None => StatusCode::OK,
        Some(ErrorKind::Syntax) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::Timeout) => StatusCode::REQUEST_TIMEOUT,
        Some(ErrorKind::MemoryLimit) => StatusCode::INSUFFICIENT_STORAGE,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn caller_of(headers: &HeaderMap) -> String {
    headers
        .get(CALLER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string()
}

async fn execute_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ExecuteBody>,
) -> Response {
    if body.code.trim().is_empty() {
        return reject(StatusCode::BAD_REQUEST, "code must not be empty");
    }
    if body.code.len() > state.config.max_code_bytes {
        return reject(
            StatusCode::BAD_REQUEST,
            format!(
                "code is {} bytes, limit is {}",
                body.code.len(),
                state.config.max_code_bytes
            ),
        );
    }

    let config = match state.config.limits.resolve(body.timeout, body.max_memory_mb) {
        Ok(config) => config,
        Err(e) => return reject(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let caller = caller_of(&headers);
    let code_length = body.code.len();
    let request =
        ExecutionRequest::new(body.code).capture_locals(body.capture_locals.unwrap_or(false));
    let executor = Arc::clone(&state.executor);

    log::debug!(
        "execute from {}: {} bytes, timeout={}s memory={}MB",
        caller,
        code_length,
        config.timeout_seconds(),
        config.memory_limit_mb()
    );

    let result = match tokio::task::spawn_blocking(move || executor.execute(&config, &request)).await
    {
        Ok(result) => result,
        Err(e) => {
            log::error!("execution task failed: {}", e);
            ExecutionResult::failure(
                ErrorKind::ExecutionFailed,
                format!("execution task failed: {}", e),
                0.0,
            )
        }
    };

    audit::emit(&AuditRecord::new(caller, code_length, &result));
    (status_for(&result), Json(result)).into_response()
}

async fn limits_handler(State(state): State<AppState>) -> Json<LimitsBody> {
    Json(LimitsBody::from_config(&state.config))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthBody> {
    let worker_available = state.executor.worker().is_available();
    let interpreter_available = state.executor.worker().interpreter_available();
    Json(HealthBody {
        status: if worker_available && interpreter_available {
            "ok"
        } else {
            "degraded"
        }
        .to_string(),
        worker_available,
        interpreter_available,
        memory_limit_support: memory_limit_support(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(execute_handler))
        .route("/limits", get(limits_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => log::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => log::info!("Received SIGTERM, shutting down..."),
    }
}

/// Bind `config.bind_addr` and serve until shutdown.
pub async fn serve(config: ServerConfig, executor: Executor) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", config.bind_addr, e))?;

    if !executor.worker().is_available() {
        log::warn!(
            "worker program {} not found; executions will fail",
            executor.worker().program().display()
        );
    }
    log::info!("snipbox listening on http://{}", config.bind_addr);

    let router = build_router(AppState::new(config, executor));
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("snipbox server shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::path::Path;
    use tower::ServiceExt; // for `oneshot`

    fn app(max_code_bytes: usize) -> Router {
        let config = ServerConfig {
            max_code_bytes,
            ..ServerConfig::default()
        };
        let executor = Executor::with_program(Path::new("/nonexistent/snipbox"));
        build_router(AppState::new(config, executor))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_execute(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/execute")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn status_mapping_follows_error_kind() {
        let ok = ExecutionResult {
            success: true,
            ..ExecutionResult::default()
        };
        assert_eq!(status_for(&ok), StatusCode::OK);

        let cases = [
            (ErrorKind::Syntax, 400),
            (ErrorKind::Timeout, 408),
            (ErrorKind::MemoryLimit, 507),
            (ErrorKind::Name, 500),
            (ErrorKind::Value, 500),
            (ErrorKind::ZeroDivision, 500),
            (ErrorKind::ExecutionFailed, 500),
        ];
        for (kind, code) in cases {
            let result = ExecutionResult::failure(kind, "x", 0.0);
            assert_eq!(status_for(&result).as_u16(), code, "{:?}", kind);
        }
    }

    #[test]
    fn caller_defaults_to_anonymous() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller_of(&headers), "anonymous");
        headers.insert(CALLER_HEADER, "svc-a".parse().unwrap());
        assert_eq!(caller_of(&headers), "svc-a");
    }

    #[tokio::test]
    async fn empty_code_is_rejected() {
        let response = app(1024)
            .oneshot(post_execute(serde_json::json!({ "code": "   " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "code must not be empty");
    }

    #[tokio::test]
    async fn oversized_code_is_rejected() {
        let response = app(8)
            .oneshot(post_execute(serde_json::json!({ "code": "x = 123456789" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_worker_yields_execution_failed() {
        let response = app(1024)
            .oneshot(post_execute(serde_json::json!({ "code": "print(1)" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["kind"], "EXECUTION_FAILED");
    }

    #[tokio::test]
    async fn limits_reports_configured_bounds() {
        let response = app(2048)
            .oneshot(Request::get("/limits").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["timeout_seconds"]["min"], 1);
        assert_eq!(body["timeout_seconds"]["max"], 30);
        assert_eq!(body["memory_limit_mb"]["default"], 128);
        assert_eq!(body["max_code_bytes"], 2048);
        assert!(body["memory_limit_support"]["mechanism"].is_string());
    }

    #[tokio::test]
    async fn health_is_degraded_without_worker() {
        let response = app(1024)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["worker_available"], false);
    }
}
