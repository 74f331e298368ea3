//! 命令行参数

use clap::{Parser, ValueEnum};

use crate::config::{EmbeddingModel, ServiceConfig, VectorStoreKind};
use crate::prompt::PromptTemplate;

/// 命令行查询方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum QueryType {
    #[default]
    #[value(name = "retrieval_llm")]
    RetrievalLlm,
    #[value(name = "only_llm")]
    OnlyLlm,
    #[value(name = "only_vectorstore")]
    OnlyVectorstore,
}

/// 最低日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogLevel {
    #[value(name = "DEBUG")]
    Debug,
    #[default]
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING")]
    Warning,
    #[value(name = "ERROR")]
    Error,
}

impl LogLevel {
    /// 对应的 tracing 级别名
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "rag-chat-webui")]
#[command(about = "Retrieval-augmented chatbot service with pluggable vector stores")]
#[command(version)]
pub struct Args {
    /// json配置文件输入
    #[arg(long, default_value = "configs/config_holo.json")]
    pub config: String,

    /// prompt模板类型
    #[arg(long, alias = "prompt_engineering", value_enum, default_value_t = PromptTemplate::Simple)]
    pub prompt_engineering: PromptTemplate,

    /// embedding模型名称，覆盖配置文件
    #[arg(long, alias = "embed_model", value_enum)]
    pub embed_model: Option<EmbeddingModel>,

    /// 向量知识库类型，覆盖配置文件
    #[arg(long, alias = "vectordb_type", value_enum)]
    pub vectordb_type: Option<VectorStoreKind>,

    /// embedding向量维度，覆盖配置文件
    #[arg(long, alias = "embed_dim")]
    pub embed_dim: Option<usize>,

    /// 上传知识库 (create_docs.docs_dir)
    #[arg(long)]
    pub upload: bool,

    /// 用户查询请求内容
    #[arg(long, alias = "user_query")]
    pub user_query: Option<String>,

    /// 所请求模型的类型
    #[arg(long, alias = "query_type", value_enum, default_value_t = QueryType::RetrievalLlm)]
    pub query_type: QueryType,

    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Minimum log level to print.
    #[arg(long, alias = "log_level", value_enum, ignore_case = true, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// 上传的知识文件保存目录
    #[arg(long, alias = "upload_dir", default_value = "./file")]
    pub upload_dir: String,

    /// 上传的配置文件保存目录
    #[arg(long, alias = "config_dir", default_value = "./config")]
    pub config_dir: String,
}

impl Args {
    /// 是否为一次性命令行任务 (上传或查询)
    pub fn is_batch(&self) -> bool {
        self.upload || self.user_query.is_some()
    }

    /// 将显式给出的命令行参数写入配置
    pub fn apply_overrides(&self, cfg: &mut ServiceConfig) {
        if let Some(model) = self.embed_model {
            cfg.embedding.embedding_model = model.as_str().to_string();
            if self.embed_dim.is_none() {
                cfg.embedding.embedding_dimension = model.dimension();
            }
        }
        if let Some(dim) = self.embed_dim {
            cfg.embedding.embedding_dimension = dim;
        }
        if let Some(kind) = self.vectordb_type {
            cfg.vector_store = Some(kind);
        }
    }
}
