use thiserror::Error;

/// 服务层错误
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service is not connected, upload a config json or connect a vector store first")]
    NotConnected,

    #[error("invalid config: {0}")]
    Config(String),

    #[error("invalid chunking: chunk_size={chunk_size}, chunk_overlap={chunk_overlap}")]
    InvalidChunking {
        chunk_size: usize,
        chunk_overlap: usize,
    },

    #[error("unsupported document: {0}")]
    UnsupportedDocument(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding service error: {0}")]
    Embedding(String),

    #[error("LLM service error: {0}")]
    Llm(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

impl ServiceError {
    /// 是否由调用方输入引起 (映射为 4xx)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::InvalidChunking { .. }
                | Self::UnsupportedDocument(_)
                | Self::Json(_)
        )
    }

    /// 是否由上游服务 (embedding / EAS / 向量库) 引起
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            Self::Embedding(_)
                | Self::Llm(_)
                | Self::VectorStore(_)
                | Self::DimensionMismatch { .. }
                | Self::Http(_)
                | Self::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
