/// 配置模块：服务配置文档 (JSON) 以及相关的默认常量
///
/// JSON 中的字段名与线上配置文件保持一致 (`EASCfg`、`ADBCfg`、`PG_HOST` 等)
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, ServiceError};

/// Embedding 模型目录 (与部署镜像保持一致)
pub const DEFAULT_MODEL_DIR: &str = "/code/embedding_model/";

/// Embedding 服务地址
pub const EMBEDDING_URL: &str = "http://localhost:11434";

/// 默认检索条数
pub const DEFAULT_TOPK: usize = 3;

/// 单次检索条数上限，请求中更大的 topk 会被截断
pub const MAX_TOPK: usize = 100;

/// HTTP 上传接口使用的切片参数
pub const UPLOAD_CHUNK_SIZE: usize = 200;
pub const UPLOAD_CHUNK_OVERLAP: usize = 0;

pub const ADB_DEFAULT_PORT: u16 = 5432;
pub const HOLO_DEFAULT_PORT: u16 = 80;
pub const DEFAULT_PG_DATABASE: &str = "postgres";
pub const DEFAULT_COLLECTION: &str = "langchain_document";

/// 向量知识库类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum VectorStoreKind {
    #[serde(rename = "AnalyticDB")]
    #[value(name = "AnalyticDB")]
    AnalyticDb,
    #[serde(rename = "Hologres")]
    #[value(name = "Hologres")]
    Hologres,
    #[serde(rename = "ElasticSearch")]
    #[value(name = "ElasticSearch")]
    ElasticSearch,
    #[serde(rename = "OpenSearch")]
    #[value(name = "OpenSearch")]
    OpenSearch,
    #[serde(rename = "FAISS")]
    #[value(name = "FAISS")]
    Faiss,
}

impl VectorStoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorStoreKind::AnalyticDb => "AnalyticDB",
            VectorStoreKind::Hologres => "Hologres",
            VectorStoreKind::ElasticSearch => "ElasticSearch",
            VectorStoreKind::OpenSearch => "OpenSearch",
            VectorStoreKind::Faiss => "FAISS",
        }
    }
}

impl fmt::Display for VectorStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 内置的 Embedding 模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingModel {
    #[value(name = "bge-large-zh-v1.5")]
    BgeLargeZh,
    #[value(name = "SGPT-125M-weightedmean-nli-bitfit")]
    Sgpt125m,
    #[value(name = "text2vec-large-chinese")]
    Text2vecLargeChinese,
    #[value(name = "text2vec-base-chinese")]
    Text2vecBaseChinese,
    #[value(name = "paraphrase-multilingual-MiniLM-L12-v2")]
    MultilingualMiniLm,
}

impl EmbeddingModel {
    pub const ALL: [EmbeddingModel; 5] = [
        EmbeddingModel::BgeLargeZh,
        EmbeddingModel::Sgpt125m,
        EmbeddingModel::Text2vecLargeChinese,
        EmbeddingModel::Text2vecBaseChinese,
        EmbeddingModel::MultilingualMiniLm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingModel::BgeLargeZh => "bge-large-zh-v1.5",
            EmbeddingModel::Sgpt125m => "SGPT-125M-weightedmean-nli-bitfit",
            EmbeddingModel::Text2vecLargeChinese => "text2vec-large-chinese",
            EmbeddingModel::Text2vecBaseChinese => "text2vec-base-chinese",
            EmbeddingModel::MultilingualMiniLm => "paraphrase-multilingual-MiniLM-L12-v2",
        }
    }

    /// 模型输出的向量维度
    pub fn dimension(&self) -> usize {
        match self {
            EmbeddingModel::BgeLargeZh | EmbeddingModel::Text2vecLargeChinese => 1024,
            EmbeddingModel::Sgpt125m | EmbeddingModel::Text2vecBaseChinese => 768,
            EmbeddingModel::MultilingualMiniLm => 384,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

/// 已知模型名对应的默认维度，未知模型返回 None
pub fn default_dimension(model: &str) -> Option<usize> {
    EmbeddingModel::from_name(model).map(|m| m.dimension())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingCfg {
    pub embedding_model: String,
    #[serde(default = "default_model_dir")]
    pub model_dir: String,
    #[serde(deserialize_with = "de_number_lenient")]
    pub embedding_dimension: usize,
    /// Embedding 服务地址
    #[serde(default = "default_embedding_url")]
    pub url: String,
}

impl EmbeddingCfg {
    pub fn new(embedding_model: &str, embedding_dimension: usize) -> Self {
        Self {
            embedding_model: embedding_model.to_string(),
            model_dir: default_model_dir(),
            embedding_dimension,
            url: default_embedding_url(),
        }
    }
}

/// EAS 大模型服务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EasCfg {
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdbCfg {
    #[serde(rename = "PG_HOST")]
    pub pg_host: String,
    #[serde(
        rename = "PG_PORT",
        default = "adb_port",
        deserialize_with = "de_number_lenient"
    )]
    pub pg_port: u16,
    #[serde(rename = "PG_DATABASE", default = "default_pg_database")]
    pub pg_database: String,
    #[serde(rename = "PG_USER")]
    pub pg_user: String,
    #[serde(rename = "PG_PASSWORD")]
    pub pg_password: String,
    #[serde(
        rename = "PRE_DELETE",
        alias = "pre_delete",
        default,
        deserialize_with = "de_flag_lenient"
    )]
    pub pre_delete: bool,
    #[serde(rename = "PG_COLLECTION_NAME", default = "default_collection")]
    pub collection_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoloCfg {
    #[serde(rename = "PG_HOST")]
    pub pg_host: String,
    #[serde(
        rename = "PG_PORT",
        default = "holo_port",
        deserialize_with = "de_number_lenient"
    )]
    pub pg_port: u16,
    #[serde(rename = "PG_DATABASE")]
    pub pg_database: String,
    #[serde(rename = "PG_USER")]
    pub pg_user: String,
    #[serde(rename = "PG_PASSWORD")]
    pub pg_password: String,
    #[serde(rename = "PG_COLLECTION_NAME", default = "default_collection")]
    pub collection_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElasticSearchCfg {
    #[serde(rename = "ES_URL")]
    pub es_url: String,
    #[serde(rename = "ES_INDEX")]
    pub es_index: String,
    #[serde(rename = "ES_USER", default)]
    pub es_user: String,
    #[serde(rename = "ES_PASSWORD", default)]
    pub es_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenSearchCfg {
    #[serde(rename = "OS_URL")]
    pub os_url: String,
    #[serde(rename = "OS_INDEX")]
    pub os_index: String,
    #[serde(rename = "OS_USER", default)]
    pub os_user: String,
    #[serde(rename = "OS_PASSWORD", default)]
    pub os_password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FaissCfg {
    /// 本地索引文件，为空时仅保存在内存中
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_path: Option<PathBuf>,
}

/// 命令行批量上传参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateDocsCfg {
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
    #[serde(default = "default_chunk_size", deserialize_with = "de_number_lenient")]
    pub chunk_size: usize,
    #[serde(default, deserialize_with = "de_number_lenient")]
    pub chunk_overlap: usize,
}

impl Default for CreateDocsCfg {
    fn default() -> Self {
        Self {
            docs_dir: default_docs_dir(),
            chunk_size: default_chunk_size(),
            chunk_overlap: 0,
        }
    }
}

/// 选中的向量库配置，按 `vector_store` 字段区分
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "vector_store")]
pub enum BackendCfg {
    #[serde(rename = "AnalyticDB")]
    AnalyticDb(AdbCfg),
    #[serde(rename = "Hologres")]
    Hologres(HoloCfg),
    #[serde(rename = "ElasticSearch")]
    ElasticSearch(ElasticSearchCfg),
    #[serde(rename = "OpenSearch")]
    OpenSearch(OpenSearchCfg),
    #[serde(rename = "FAISS")]
    Faiss(FaissCfg),
}

impl BackendCfg {
    pub fn kind(&self) -> VectorStoreKind {
        match self {
            BackendCfg::AnalyticDb(_) => VectorStoreKind::AnalyticDb,
            BackendCfg::Hologres(_) => VectorStoreKind::Hologres,
            BackendCfg::ElasticSearch(_) => VectorStoreKind::ElasticSearch,
            BackendCfg::OpenSearch(_) => VectorStoreKind::OpenSearch,
            BackendCfg::Faiss(_) => VectorStoreKind::Faiss,
        }
    }
}

/// 服务配置文档
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub embedding: EmbeddingCfg,
    #[serde(rename = "EASCfg")]
    pub eas: EasCfg,
    /// 缺省时按出现的向量库配置段推断
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_store: Option<VectorStoreKind>,
    #[serde(rename = "ADBCfg", default, skip_serializing_if = "Option::is_none")]
    pub adb: Option<AdbCfg>,
    #[serde(rename = "HOLOCfg", default, skip_serializing_if = "Option::is_none")]
    pub holo: Option<HoloCfg>,
    #[serde(
        rename = "ElasticSearchCfg",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub elasticsearch: Option<ElasticSearchCfg>,
    #[serde(
        rename = "OpenSearchCfg",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub opensearch: Option<OpenSearchCfg>,
    #[serde(rename = "FAISSCfg", default, skip_serializing_if = "Option::is_none")]
    pub faiss: Option<FaissCfg>,
    #[serde(default)]
    pub create_docs: CreateDocsCfg,
    #[serde(default = "default_topk", deserialize_with = "de_number_lenient")]
    pub query_topk: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
}

impl ServiceConfig {
    /// 由设置表单的各部分组装配置
    pub fn from_parts(embedding: EmbeddingCfg, eas: EasCfg, backend: BackendCfg) -> Self {
        let mut cfg = Self {
            embedding,
            eas,
            vector_store: Some(backend.kind()),
            adb: None,
            holo: None,
            elasticsearch: None,
            opensearch: None,
            faiss: None,
            create_docs: CreateDocsCfg::default(),
            query_topk: DEFAULT_TOPK,
            prompt_template: None,
        };
        cfg.set_backend(backend);
        cfg
    }

    /// 读取 JSON 配置文件
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            ServiceError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&bytes)
    }

    /// 解析上传的 JSON 配置
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let mut cfg: ServiceConfig = serde_json::from_slice(bytes)
            .map_err(|e| ServiceError::Config(format!("malformed config json: {}", e)))?;
        cfg.vector_store = Some(cfg.kind()?);
        Ok(cfg)
    }

    /// 当前选中的向量库类型
    pub fn kind(&self) -> Result<VectorStoreKind> {
        if let Some(kind) = self.vector_store {
            return Ok(kind);
        }
        let inferred = if self.adb.is_some() {
            VectorStoreKind::AnalyticDb
        } else if self.holo.is_some() {
            VectorStoreKind::Hologres
        } else if self.elasticsearch.is_some() {
            VectorStoreKind::ElasticSearch
        } else if self.opensearch.is_some() {
            VectorStoreKind::OpenSearch
        } else if self.faiss.is_some() {
            VectorStoreKind::Faiss
        } else {
            return Err(ServiceError::Config(
                "no vector store configured".to_string(),
            ));
        };
        Ok(inferred)
    }

    /// 取出选中向量库的配置段
    pub fn backend(&self) -> Result<BackendCfg> {
        let kind = self.kind()?;
        let missing = || ServiceError::Config(format!("missing config section for {}", kind));
        let backend = match kind {
            VectorStoreKind::AnalyticDb => {
                BackendCfg::AnalyticDb(self.adb.clone().ok_or_else(missing)?)
            }
            VectorStoreKind::Hologres => BackendCfg::Hologres(self.holo.clone().ok_or_else(missing)?),
            VectorStoreKind::ElasticSearch => {
                BackendCfg::ElasticSearch(self.elasticsearch.clone().ok_or_else(missing)?)
            }
            VectorStoreKind::OpenSearch => {
                BackendCfg::OpenSearch(self.opensearch.clone().ok_or_else(missing)?)
            }
            // FAISS 不需要连接参数
            VectorStoreKind::Faiss => BackendCfg::Faiss(self.faiss.clone().unwrap_or_default()),
        };
        Ok(backend)
    }

    /// 替换向量库配置段并切换 `vector_store`
    pub fn set_backend(&mut self, backend: BackendCfg) {
        self.vector_store = Some(backend.kind());
        match backend {
            BackendCfg::AnalyticDb(c) => self.adb = Some(c),
            BackendCfg::Hologres(c) => self.holo = Some(c),
            BackendCfg::ElasticSearch(c) => self.elasticsearch = Some(c),
            BackendCfg::OpenSearch(c) => self.opensearch = Some(c),
            BackendCfg::Faiss(c) => self.faiss = Some(c),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedding.embedding_model.trim().is_empty() {
            return Err(ServiceError::Config(
                "embedding.embedding_model is empty".to_string(),
            ));
        }
        if self.embedding.embedding_dimension == 0 {
            return Err(ServiceError::Config(
                "embedding.embedding_dimension must be positive".to_string(),
            ));
        }
        if self.eas.url.trim().is_empty() {
            return Err(ServiceError::Config("EASCfg.url is empty".to_string()));
        }
        if self.query_topk == 0 {
            return Err(ServiceError::Config("query_topk must be positive".to_string()));
        }
        self.backend()?;
        Ok(())
    }
}

/// 设置页表单 (由上传的配置 JSON 填充)
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SettingsForm {
    pub emb_model: String,
    pub emb_dim: String,
    pub eas_url: String,
    pub eas_token: String,
    pub vs_radio: String,
    /// 需要显示的连接面板
    pub visible_panel: Option<VectorStoreKind>,

    pub pg_host: String,
    pub pg_user: String,
    pub pg_pwd: String,
    pub pg_database: String,
    pub pg_del: String,

    pub holo_host: String,
    pub holo_database: String,
    pub holo_user: String,
    pub holo_pwd: String,

    pub es_url: String,
    pub es_index: String,
    pub es_user: String,
    pub es_pwd: String,

    pub os_url: String,
    pub os_index: String,
    pub os_user: String,
    pub os_pwd: String,

    pub faiss_index_path: String,
}

impl SettingsForm {
    /// 按向量库类型填充对应面板，其他面板保持为空
    pub fn from_config(cfg: &ServiceConfig) -> Result<Self> {
        let backend = cfg.backend()?;
        let kind = backend.kind();

        let mut form = SettingsForm {
            emb_model: cfg.embedding.embedding_model.clone(),
            emb_dim: cfg.embedding.embedding_dimension.to_string(),
            eas_url: cfg.eas.url.clone(),
            eas_token: cfg.eas.token.clone(),
            vs_radio: kind.as_str().to_string(),
            visible_panel: Some(kind),
            ..Default::default()
        };

        match backend {
            BackendCfg::AnalyticDb(adb) => {
                form.pg_host = adb.pg_host;
                form.pg_user = adb.pg_user;
                form.pg_pwd = adb.pg_password;
                form.pg_database = adb.pg_database;
                form.pg_del = if adb.pre_delete { "True" } else { "False" }.to_string();
            }
            BackendCfg::Hologres(holo) => {
                form.holo_host = holo.pg_host;
                form.holo_database = holo.pg_database;
                form.holo_user = holo.pg_user;
                form.holo_pwd = holo.pg_password;
            }
            BackendCfg::ElasticSearch(es) => {
                form.es_url = es.es_url;
                form.es_index = es.es_index;
                form.es_user = es.es_user;
                form.es_pwd = es.es_password;
            }
            BackendCfg::OpenSearch(os) => {
                form.os_url = os.os_url;
                form.os_index = os.os_index;
                form.os_user = os.os_user;
                form.os_pwd = os.os_password;
            }
            BackendCfg::Faiss(faiss) => {
                form.faiss_index_path = faiss
                    .index_path
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
            }
        }

        Ok(form)
    }
}

fn default_model_dir() -> String {
    DEFAULT_MODEL_DIR.to_string()
}

fn default_embedding_url() -> String {
    EMBEDDING_URL.to_string()
}

fn default_pg_database() -> String {
    DEFAULT_PG_DATABASE.to_string()
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

fn adb_port() -> u16 {
    ADB_DEFAULT_PORT
}

fn holo_port() -> u16 {
    HOLO_DEFAULT_PORT
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs/")
}

fn default_chunk_size() -> usize {
    UPLOAD_CHUNK_SIZE
}

fn default_topk() -> usize {
    DEFAULT_TOPK
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr<T> {
    Num(T),
    Str(String),
}

/// 表单中的数字可能以字符串形式提交 ("768")
pub(crate) fn de_number_lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: fmt::Display,
{
    match NumOrStr::<T>::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// 同上，允许缺省 / 空字符串
pub(crate) fn de_opt_number_lenient<'de, D, T>(
    deserializer: D,
) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: fmt::Display,
{
    match Option::<NumOrStr<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrStr::Num(n)) => Ok(Some(n)),
        Some(NumOrStr::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(NumOrStr::Str(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolOrStr {
    Bool(bool),
    Str(String),
}

/// `PRE_DELETE` 既可能是 bool 也可能是 "True"/"False"
fn de_flag_lenient<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match BoolOrStr::deserialize(deserializer)? {
        BoolOrStr::Bool(b) => Ok(b),
        BoolOrStr::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid boolean flag: {}",
                other
            ))),
        },
    }
}
