use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Json, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{de_opt_number_lenient, ServiceConfig, UPLOAD_CHUNK_OVERLAP, UPLOAD_CHUNK_SIZE};
use crate::error::ServiceError;
use crate::service::{LlmService, ServiceStatus};
use crate::webui;

/// 上传请求体上限
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// API 状态 (共享的 LLM 服务)
pub struct AppState {
    pub service: Arc<LlmService>,
    /// 上传的知识文件保存目录
    pub upload_dir: PathBuf,
    /// 上传的配置文件保存目录
    pub config_dir: PathBuf,
}

/// 健康检查响应
#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

/// 问答请求
#[derive(Debug, Deserialize)]
pub struct Query {
    pub question: String,
    #[serde(default, deserialize_with = "de_opt_number_lenient")]
    pub topk: Option<usize>,
    #[serde(default)]
    pub prompt: Option<String>,
}

/// API 错误响应
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

/// 自定义错误类型
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Service(ServiceError::NotConnected) => StatusCode::CONFLICT,
            ApiError::Service(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Service(e) if e.is_upstream_error() => StatusCode::BAD_GATEWAY,
            ApiError::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error = match self {
            ApiError::Service(e) => e.to_string(),
            ApiError::BadRequest(msg) => msg,
        };
        if status.is_server_error() {
            warn!(%status, %error, "request failed");
        }

        let error_response = ErrorResponse {
            success: false,
            error,
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::Service(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::BadRequest(err.body_text())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::Service(ServiceError::Io(err))
    }
}

/// 上传的文件
pub(crate) struct UploadedFile {
    pub file_name: String,
    pub data: Bytes,
}

/// 读取 multipart 中名为 `field_name` 的第一个文件，缺失或文件名为空时返回 None
pub(crate) async fn read_file_field(
    multipart: &mut Multipart,
    field_name: &str,
) -> Result<Option<UploadedFile>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(field_name) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        if file_name.is_empty() {
            return Ok(None);
        }
        return Ok(Some(UploadedFile { file_name, data }));
    }
    Ok(None)
}

/// 保存上传文件，只保留文件名部分以防止路径穿越
pub(crate) async fn save_upload(dir: &Path, file: &UploadedFile) -> Result<PathBuf, ApiError> {
    let name = Path::new(&file.file_name)
        .file_name()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("invalid file name: {:?}", file.file_name)))?;

    tokio::fs::create_dir_all(dir).await?;
    let save_path = dir.join(name);
    tokio::fs::write(&save_path, &file.data).await?;

    Ok(save_path)
}

fn answer(ans: String) -> Json<Value> {
    Json(json!({ "The answer is ": ans }))
}

/// 健康检查端点
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// 服务状态端点
async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<ServiceStatus>, ApiError> {
    Ok(Json(state.service.status().await?))
}

/// 清空知识库
async fn clear_knowledge(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    state.service.clear_knowledge().await?;
    info!("knowledge base cleared");
    Ok(Json(json!({ "message": "Knowledge base cleared" })))
}

/// 直接询问大模型
async fn query_by_llm(
    State(state): State<Arc<AppState>>,
    Json(query): Json<Query>,
) -> Result<Json<Value>, ApiError> {
    let ans = state.service.query_only_llm(&query.question).await?;
    Ok(answer(ans))
}

/// 仅检索向量库
async fn query_by_vectorstore(
    State(state): State<Arc<AppState>>,
    Json(query): Json<Query>,
) -> Result<Json<Value>, ApiError> {
    let ans = state
        .service
        .query_only_vectorestore(&query.question, query.topk)
        .await?;
    Ok(answer(ans))
}

/// 检索增强问答
async fn query_by_langchain(
    State(state): State<Arc<AppState>>,
    Json(query): Json<Query>,
) -> Result<Json<Value>, ApiError> {
    let ans = state
        .service
        .user_query(&query.question, query.topk, query.prompt.as_deref())
        .await?;
    Ok(answer(ans))
}

/// 上传知识文件端点
async fn create_upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let Some(file) = read_file_field(&mut multipart, "file").await? else {
        return Ok(Json(json!({ "message": "No upload file sent" })));
    };

    let save_path = save_upload(&state.upload_dir, &file).await?;
    state
        .service
        .upload_custom_knowledge(&save_path, UPLOAD_CHUNK_SIZE, UPLOAD_CHUNK_OVERLAP)
        .await?;

    Ok(Json(json!({ "Upload file success! ": save_path.display().to_string() })))
}

/// 上传配置文件并连接
async fn create_config_json_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let Some(file) = read_file_field(&mut multipart, "file").await? else {
        return Ok(Json(json!({ "message": "No upload config json file sent" })));
    };

    let save_path = save_upload(&state.config_dir, &file).await?;
    let cfg = ServiceConfig::from_json(&file.data)?;
    let kind = cfg.kind()?;
    let elapsed = state.service.init_with_cfg(cfg).await?;
    info!(config = %save_path.display(), vector_store = %kind, elapsed, "connected from uploaded config");

    Ok(Json(json!(["Connect success! ", kind.as_str()])))
}

/// 创建 API 路由
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/knowledge", delete(clear_knowledge))
        .route("/chat/llm", post(query_by_llm))
        .route("/chat/db", post(query_by_vectorstore))
        .route("/chat/langchain", post(query_by_langchain))
        .route("/uploadfile/", post(create_upload_file))
        .route("/uploadfile", post(create_upload_file))
        .route("/config/", post(create_config_json_file))
        .route("/config", post(create_config_json_file))
        .merge(webui::routes())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 启动 API 服务器
pub async fn start_server(state: Arc<AppState>, host: &str, port: u16) -> Result<()> {
    let app = create_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("API server listening on http://{}", addr);
    info!("   POST /chat/llm        - Query LLM only");
    info!("   POST /chat/db         - Query vector store only");
    info!("   POST /chat/langchain  - Retrieval-augmented query");
    info!("   POST /uploadfile/     - Upload a knowledge file");
    info!("   POST /config/         - Upload a config json and connect");
    info!("   DELETE /api/knowledge - Clear the knowledge base");
    info!("   GET  /                - Web UI");

    axum::serve(listener, app).await?;

    Ok(())
}
