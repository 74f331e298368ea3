//! 设置 / 上传 / 聊天页面及其 JSON 接口

use std::sync::Arc;

use axum::{
    extract::{Json, Multipart, Query, State},
    response::Html,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{read_file_field, save_upload, ApiError, AppState, UploadedFile};
use crate::config::{
    de_number_lenient, de_opt_number_lenient, default_dimension, BackendCfg, EasCfg,
    EmbeddingCfg, ServiceConfig, SettingsForm, UPLOAD_CHUNK_OVERLAP, UPLOAD_CHUNK_SIZE,
};
use crate::loader::is_supported_extension;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// 连接向量库表单
#[derive(Debug, Deserialize)]
pub struct ConnectForm {
    pub emb_model: String,
    #[serde(deserialize_with = "de_number_lenient")]
    pub emb_dim: usize,
    pub eas_url: String,
    #[serde(default)]
    pub eas_token: String,
    #[serde(flatten)]
    pub backend: BackendCfg,
}

impl ConnectForm {
    pub fn into_config(self) -> ServiceConfig {
        ServiceConfig::from_parts(
            EmbeddingCfg::new(&self.emb_model, self.emb_dim),
            EasCfg {
                url: self.eas_url,
                token: self.eas_token,
            },
            self.backend,
        )
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Deserialize)]
struct DimensionQuery {
    model: String,
}

#[derive(Serialize)]
struct DimensionResponse {
    embedding_dimension: Option<String>,
}

/// 聊天查询方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ChatMode {
    #[serde(rename = "Vector Store")]
    VectorStore,
    #[serde(rename = "LLM")]
    Llm,
    #[default]
    #[serde(rename = "Vector Store + LLM")]
    VectorStoreLlm,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<(String, String)>,
    #[serde(default)]
    pub mode: ChatMode,
    #[serde(default, deserialize_with = "de_opt_number_lenient")]
    pub topk: Option<usize>,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// 清空后的输入框
    pub message: String,
    pub history: Vec<(String, String)>,
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// 选择模型后自动填充维度
async fn embedding_dimension(Query(query): Query<DimensionQuery>) -> Json<DimensionResponse> {
    Json(DimensionResponse {
        embedding_dimension: default_dimension(&query.model).map(|d| d.to_string()),
    })
}

/// 解析上传的配置 JSON 并回填表单
async fn analyze_config(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<SettingsForm>, ApiError> {
    let file = read_file_field(&mut multipart, "file")
        .await?
        .ok_or_else(|| ApiError::BadRequest("No upload config json file sent".to_string()))?;

    save_upload(&state.config_dir, &file).await?;
    let cfg = ServiceConfig::from_json(&file.data)?;
    Ok(Json(SettingsForm::from_config(&cfg)?))
}

/// 按表单连接向量库
async fn connect(
    State(state): State<Arc<AppState>>,
    Json(form): Json<ConnectForm>,
) -> Result<Json<MessageResponse>, ApiError> {
    let kind = form.backend.kind();
    let elapsed = state.service.init_with_cfg(form.into_config()).await?;

    Ok(Json(MessageResponse {
        message: format!("Connect {} success. Cost time: {} s", kind, elapsed),
    }))
}

/// 批量上传知识文件 (文件或目录)
async fn upload_knowledge(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<MessageResponse>, ApiError> {
    let mut chunk_size = UPLOAD_CHUNK_SIZE;
    let mut chunk_overlap = UPLOAD_CHUNK_OVERLAP;
    let mut from_directory = false;
    let mut saved = Vec::new();
    let mut received = 0;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "chunk_size" => chunk_size = parse_number_field(&field.text().await?, UPLOAD_CHUNK_SIZE)?,
            "chunk_overlap" => {
                chunk_overlap = parse_number_field(&field.text().await?, UPLOAD_CHUNK_OVERLAP)?
            }
            "source" => from_directory = field.text().await?.trim() == "directory",
            "files" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                if file_name.is_empty() {
                    continue;
                }
                received += 1;
                if !is_supported_extension(&file_name) {
                    warn!(file = %file_name, "skipping unsupported knowledge file");
                    continue;
                }
                let file = UploadedFile { file_name, data };
                saved.push(save_upload(&state.upload_dir, &file).await?);
            }
            _ => {}
        }
    }

    for path in &saved {
        state
            .service
            .upload_custom_knowledge(path, chunk_size, chunk_overlap)
            .await?;
    }
    info!(received, ingested = saved.len(), "knowledge upload finished");

    let prefix = if from_directory { "Directory" } else { "File" };
    Ok(Json(MessageResponse {
        message: format!("{}: Upload {} files Success!", prefix, received),
    }))
}

/// 表单数字字段，空字符串使用默认值
fn parse_number_field(value: &str, default: usize) -> Result<usize, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(default);
    }
    value
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid number: {:?}", value)))
}

/// 聊天
async fn respond(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let service = &state.service;
    let answer = match req.mode {
        ChatMode::VectorStore => service.query_only_vectorestore(&req.message, req.topk).await,
        ChatMode::Llm => service.query_only_llm(&req.message).await,
        ChatMode::VectorStoreLlm => {
            service
                .user_query(&req.message, req.topk, req.prompt.as_deref())
                .await
        }
    };
    let answer = answer?;

    let mut history = req.history;
    history.push((req.message, answer));

    Ok(Json(ChatResponse {
        message: String::new(),
        history,
    }))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/api/settings/embedding-dimension", get(embedding_dimension))
        .route("/api/settings/analyze", post(analyze_config))
        .route("/api/settings/connect", post(connect))
        .route("/api/upload/knowledge", post(upload_knowledge))
        .route("/api/chat", post(respond))
}
