use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EmbeddingCfg;
use crate::error::{Result, ServiceError};

/// HTTP Embedding 客户端 (`/api/embeddings` 协议)
pub struct HttpEmbedding {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl HttpEmbedding {
    /// 创建新的 Embedding 客户端
    ///
    /// # 参数
    /// - `base_url`: Embedding 服务地址，如 "http://localhost:11434"
    /// - `model`: 模型名称
    /// - `dimension`: 期望的向量维度，返回维度不一致时报错
    pub fn new(base_url: &str, model: &str, dimension: usize) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dimension,
        }
    }

    pub fn from_config(cfg: &EmbeddingCfg) -> Self {
        Self::new(&cfg.url, &cfg.embedding_model, cfg.embedding_dimension)
    }

    /// 将文本转换为向量
    pub async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::Embedding(format!("{}: {}", status, error_text)));
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Embedding(format!("malformed response: {}", e)))?;

        if embedding_response.embedding.len() != self.dimension {
            return Err(ServiceError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding_response.embedding.len(),
            });
        }

        Ok(embedding_response.embedding)
    }

    /// 批量编码
    pub async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for text in texts {
            embeddings.push(self.encode(text).await?);
        }

        debug!(count = embeddings.len(), model = %self.model, "encoded batch");
        Ok(embeddings)
    }

    /// 检查 Embedding 服务是否可用
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "embedding service unreachable");
                false
            }
        }
    }
}
