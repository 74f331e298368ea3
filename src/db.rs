//! 向量知识库
//!
//! `VectorStore` 统一了五种后端：FAISS (本地平铺索引)、ElasticSearch / OpenSearch (REST)、
//! AnalyticDB / Hologres (Postgres 协议)。

pub mod elastic;
pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{BackendCfg, VectorStoreKind};
use crate::error::Result;

/// 集合统计信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionStats {
    pub total_points: u64,
    pub collection_name: String,
}

/// 待索引的点
#[derive(Debug, Clone)]
pub struct IndexPoint {
    /// 来源文件名
    pub source: String,
    /// 原始内容片段
    pub content: String,
    pub embedding: Vec<f32>,
}

/// 搜索结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// 来源文件名
    pub source: String,
    /// 原始内容片段
    pub content: String,
    /// 相似度分数，越高越相似
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    fn kind(&self) -> VectorStoreKind;

    /// 写入向量，返回写入条数
    async fn add_documents(&self, points: Vec<IndexPoint>) -> Result<usize>;

    /// 返回最相似的 `k` 条结果，按分数从高到低排序
    async fn similarity_search(&self, query_vector: Vec<f32>, k: usize) -> Result<Vec<SearchResult>>;

    async fn stats(&self) -> Result<CollectionStats>;

    /// 清空集合中的所有数据
    async fn clear(&self) -> Result<()>;
}

/// 按配置连接向量库
pub async fn connect(backend: &BackendCfg, dimension: usize) -> Result<Arc<dyn VectorStore>> {
    info!(vector_store = %backend.kind(), dimension, "connecting vector store");

    let store: Arc<dyn VectorStore> = match backend {
        BackendCfg::Faiss(cfg) => match &cfg.index_path {
            Some(path) => Arc::new(memory::MemoryStore::open(path.clone(), dimension).await?),
            None => Arc::new(memory::MemoryStore::new(dimension)),
        },
        BackendCfg::ElasticSearch(cfg) => Arc::new(
            elastic::ElasticStore::connect(
                elastic::EsParams {
                    url: cfg.es_url.clone(),
                    index: cfg.es_index.clone(),
                    user: cfg.es_user.clone(),
                    password: cfg.es_password.clone(),
                },
                elastic::Flavor::ElasticSearch,
                dimension,
            )
            .await?,
        ),
        BackendCfg::OpenSearch(cfg) => Arc::new(
            elastic::ElasticStore::connect(
                elastic::EsParams {
                    url: cfg.os_url.clone(),
                    index: cfg.os_index.clone(),
                    user: cfg.os_user.clone(),
                    password: cfg.os_password.clone(),
                },
                elastic::Flavor::OpenSearch,
                dimension,
            )
            .await?,
        ),
        BackendCfg::AnalyticDb(cfg) => Arc::new(
            postgres::PgStore::connect(&cfg.into(), postgres::Dialect::AnalyticDb, dimension)
                .await?,
        ),
        BackendCfg::Hologres(cfg) => Arc::new(
            postgres::PgStore::connect(&cfg.into(), postgres::Dialect::Hologres, dimension).await?,
        ),
    };

    Ok(store)
}
