//! HTTP 服务（hyper 0.14）
//!
//! 路由：
//! - `GET /healthz`、`GET /metrics`
//! - `POST /api/grade`、`POST /api/grade/rationale`
//! - `/api/graded-tests[/recent|/{id}]`：按 `x-instructor-id` 隔离的存档记录

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use hyper::body::HttpBody;
use hyper::{
    header,
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::database::Database;
use crate::grading::{
    self, ExplainGradingRationaleInput, FinalizeGradeRequest, GradeSubmissionRequest,
    GradingDeps,
};
use crate::metrics;
use crate::models::{ActionResult, AppError};

pub const INSTRUCTOR_HEADER: &str = "x-instructor-id";

/// 共享的服务状态
pub struct AppState {
    pub deps: GradingDeps,
    pub db: Arc<Database>,
    pub max_body_bytes: usize,
    pub recent_count: usize,
}

impl AppState {
    pub fn new(deps: GradingDeps, db: Arc<Database>, config: &AppConfig) -> Self {
        Self {
            deps,
            db,
            max_body_bytes: config.server.max_body_bytes,
            recent_count: config.limits.recent_count,
        }
    }
}

/// 启动监听，Ctrl-C 时优雅退出
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| handle_request(state.clone(), req)))
        }
    });

    let server = Server::try_bind(&addr)
        .map_err(|e| anyhow::anyhow!("绑定地址 {} 失败: {}", addr, e))?
        .serve(make_svc);
    log::info!("[Server] Gradewise listening on http://{}", addr);

    server
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("[Server] 收到退出信号，正在关闭");
        })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP 服务错误: {}", e))
}

pub async fn handle_request(
    state: Arc<AppState>,
    req: Request<Body>,
) -> Result<Response<Body>, hyper::Error> {
    metrics::record_http_request();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = std::time::Instant::now();

    let response = route(&state, req).await;

    log::debug!(
        "[Server] {} {} -> {} ({}ms)",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    Ok(response)
}

async fn route(state: &Arc<AppState>, req: Request<Body>) -> Response<Body> {
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let method = req.method().clone();

    match segments.as_slice() {
        ["healthz"] => match method {
            Method::GET => json_response(
                StatusCode::OK,
                &json!({
                    "status": "ok",
                    "version": env!("CARGO_PKG_VERSION"),
                    "gitHash": env!("GIT_HASH"),
                    "build": env!("BUILD_NUMBER"),
                }),
            ),
            _ => method_not_allowed("GET"),
        },
        ["metrics"] => match method {
            Method::GET => {
                let payload = metrics::export_prometheus_metrics(Some(&state.db));
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                    .body(Body::from(payload))
                    .unwrap_or_else(|_| Response::new(Body::from("metrics response build failed")))
            }
            _ => method_not_allowed("GET"),
        },
        ["api", "grade"] => match method {
            Method::POST => grade(state, req).await,
            _ => method_not_allowed("POST"),
        },
        ["api", "grade", "rationale"] => match method {
            Method::POST => rationale(state, req).await,
            _ => method_not_allowed("POST"),
        },
        ["api", "graded-tests"] => match method {
            Method::POST => save_graded_test(state, req).await,
            Method::GET => list_graded_tests(state, req).await,
            Method::DELETE => clear_graded_tests(state, req).await,
            _ => method_not_allowed("GET, POST, DELETE"),
        },
        ["api", "graded-tests", "recent"] => match method {
            Method::GET => recent_graded_tests(state, req).await,
            _ => method_not_allowed("GET"),
        },
        ["api", "graded-tests", id] => {
            let id = id.to_string();
            match method {
                Method::GET => get_graded_test(state, req, id).await,
                Method::DELETE => delete_graded_test(state, req, id).await,
                _ => method_not_allowed("GET, DELETE"),
            }
        }
        _ => error_response(
            StatusCode::NOT_FOUND,
            &AppError::not_found(format!("No route for {}", path)),
        ),
    }
}

// ============================================================================
// 批改
// ============================================================================

async fn grade(state: &Arc<AppState>, req: Request<Body>) -> Response<Body> {
    let request: GradeSubmissionRequest = match read_json(req, state.max_body_bytes).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let result = grading::handle_grade_submission(request, &state.deps).await;
    action_response(StatusCode::OK, &result)
}

async fn rationale(state: &Arc<AppState>, req: Request<Body>) -> Response<Body> {
    let input: ExplainGradingRationaleInput = match read_json(req, state.max_body_bytes).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let result = grading::handle_explain_rationale(input, &state.deps).await;
    action_response(StatusCode::OK, &result)
}

// ============================================================================
// 存档记录
// ============================================================================

async fn save_graded_test(state: &Arc<AppState>, req: Request<Body>) -> Response<Body> {
    let instructor_id = match instructor_id(&req) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let request: FinalizeGradeRequest = match read_json(req, state.max_body_bytes).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let db = state.db.clone();
    let limits = state.deps.limits.clone();
    let result = run_blocking(move || {
        grading::finalize_and_save(&db, &instructor_id, request, &limits)
    })
    .await;
    result_response(StatusCode::CREATED, result)
}

async fn list_graded_tests(state: &Arc<AppState>, req: Request<Body>) -> Response<Body> {
    let instructor_id = match instructor_id(&req) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let db = state.db.clone();
    let result = run_blocking(move || {
        crate::database::GradedTestRepo::list(&db, &instructor_id)
    })
    .await;
    result_response(StatusCode::OK, result)
}

async fn recent_graded_tests(state: &Arc<AppState>, req: Request<Body>) -> Response<Body> {
    let instructor_id = match instructor_id(&req) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let limit = match parse_limit(req.uri().query(), state.recent_count) {
        Ok(n) => n,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    let db = state.db.clone();
    let result = run_blocking(move || {
        grading::recent_graded_tests(&db, &instructor_id, limit)
    })
    .await;
    result_response(StatusCode::OK, result)
}

async fn get_graded_test(state: &Arc<AppState>, req: Request<Body>, id: String) -> Response<Body> {
    let instructor_id = match instructor_id(&req) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let db = state.db.clone();
    let result = run_blocking(move || grading::get_graded_test(&db, &instructor_id, &id)).await;
    result_response(StatusCode::OK, result)
}

async fn delete_graded_test(
    state: &Arc<AppState>,
    req: Request<Body>,
    id: String,
) -> Response<Body> {
    let instructor_id = match instructor_id(&req) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let db = state.db.clone();
    let result = run_blocking(move || {
        grading::delete_graded_test(&db, &instructor_id, &id).map(|_| json!({ "id": id }))
    })
    .await;
    result_response(StatusCode::OK, result)
}

async fn clear_graded_tests(state: &Arc<AppState>, req: Request<Body>) -> Response<Body> {
    let instructor_id = match instructor_id(&req) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let db = state.db.clone();
    let result = run_blocking(move || {
        grading::clear_graded_tests(&db, &instructor_id).map(|n| json!({ "deleted": n }))
    })
    .await;
    result_response(StatusCode::OK, result)
}

// ============================================================================
// 辅助函数
// ============================================================================

/// SQLite 调用是同步的，放到阻塞线程池
async fn run_blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::unknown(format!("数据库任务异常终止: {}", e)))?
}

fn instructor_id(req: &Request<Body>) -> Result<String, Response<Body>> {
    req.headers()
        .get(INSTRUCTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                &AppError::validation(format!("Missing {} header.", INSTRUCTOR_HEADER)),
            )
        })
}

/// 解析 `?limit=N`；缺省时使用配置的条数
fn parse_limit(query: Option<&str>, default: usize) -> Result<usize, AppError> {
    let raw = query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(k, _)| k == "limit")
            .map(|(_, v)| v.into_owned())
    });
    match raw {
        None => Ok(default),
        Some(v) => match v.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(AppError::validation(
                "limit must be a positive integer.",
            )),
        },
    }
}

/// 读取并反序列化 JSON 请求体，超过上限时中止读取
async fn read_json<T: DeserializeOwned>(
    req: Request<Body>,
    max_bytes: usize,
) -> Result<T, Response<Body>> {
    let too_large = || {
        error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            &AppError::validation(format!(
                "Request body exceeds {} bytes.",
                max_bytes
            )),
        )
    };

    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > max_bytes) {
        return Err(too_large());
    }

    let mut body = req.into_body();
    let mut buf = Vec::with_capacity(declared.unwrap_or(0));
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|e| {
            error_response(
                StatusCode::BAD_REQUEST,
                &AppError::network(format!("Failed to read request body: {}", e)),
            )
        })?;
        if buf.len() + chunk.len() > max_bytes {
            return Err(too_large());
        }
        buf.extend_from_slice(&chunk);
    }

    serde_json::from_slice(&buf).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            &AppError::validation(format!("Invalid JSON body: {}", e)),
        )
    })
}

fn result_response<T: Serialize>(success: StatusCode, result: Result<T, AppError>) -> Response<Body> {
    match result {
        Ok(data) => json_response(success, &ActionResult::ok(data)),
        Err(e) => {
            log::warn!("[Server] 请求失败 ({:?}): {}", e.error_type, e.message);
            error_response(status_for(e.status_code()), &e)
        }
    }
}

/// 成功时使用 `success`，失败时按错误类型选择状态码
fn action_response<T: Serialize>(success: StatusCode, result: &ActionResult<T>) -> Response<Body> {
    let status = if result.success {
        success
    } else {
        status_for(result.status_code())
    };
    json_response(status, result)
}

fn error_response(status: StatusCode, error: &AppError) -> Response<Body> {
    json_response(status, &ActionResult::<()>::err(error))
}

fn method_not_allowed(allow: &'static str) -> Response<Body> {
    let mut response = error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &AppError::validation("Method not allowed."),
    );
    response
        .headers_mut()
        .insert(header::ALLOW, header::HeaderValue::from_static(allow));
    response
}

fn status_for(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(bytes) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .unwrap_or_else(|_| Response::new(Body::from("response build failed"))),
        Err(e) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from(format!("response serialization failed: {}", e)))
            .unwrap_or_else(|_| Response::new(Body::from("response build failed"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_validates() {
        assert_eq!(parse_limit(None, 3).unwrap(), 3);
        assert_eq!(parse_limit(Some("foo=bar"), 3).unwrap(), 3);
        assert_eq!(parse_limit(Some("limit=5"), 3).unwrap(), 5);
        assert!(parse_limit(Some("limit=0"), 3).is_err());
        assert!(parse_limit(Some("limit=abc"), 3).is_err());
    }

    #[test]
    fn status_falls_back_to_500() {
        assert_eq!(status_for(422), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(1), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
