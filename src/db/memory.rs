use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CollectionStats, IndexPoint, SearchResult, VectorStore};
use crate::config::VectorStoreKind;
use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPoint {
    id: String,
    source: String,
    content: String,
    embedding: Vec<f32>,
}

/// 落盘格式
#[derive(Serialize, Deserialize)]
struct IndexFile {
    dimension: usize,
    points: Vec<StoredPoint>,
}

/// FAISS 后端：内存中的平铺余弦索引，可选持久化到 JSON 文件
pub struct MemoryStore {
    points: RwLock<Vec<StoredPoint>>,
    dimension: usize,
    index_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            points: RwLock::new(Vec::new()),
            dimension,
            index_path: None,
        }
    }

    /// 打开持久化索引，文件不存在时创建空索引
    pub async fn open(index_path: PathBuf, dimension: usize) -> Result<Self> {
        let points = if tokio::fs::try_exists(&index_path).await? {
            let bytes = tokio::fs::read(&index_path).await?;
            let file: IndexFile = serde_json::from_slice(&bytes)?;
            if file.dimension != dimension {
                return Err(ServiceError::VectorStore(format!(
                    "index {} has dimension {}, expected {}",
                    index_path.display(),
                    file.dimension,
                    dimension
                )));
            }
            info!(path = %index_path.display(), points = file.points.len(), "loaded FAISS index");
            file.points
        } else {
            Vec::new()
        };

        Ok(Self {
            points: RwLock::new(points),
            dimension,
            index_path: Some(index_path),
        })
    }

    async fn persist(&self, points: &[StoredPoint]) -> Result<()> {
        let Some(path) = &self.index_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = IndexFile {
            dimension: self.dimension,
            points: points.to_vec(),
        };
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&file)?).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), points = points.len(), "persisted FAISS index");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn kind(&self) -> VectorStoreKind {
        VectorStoreKind::Faiss
    }

    async fn add_documents(&self, points: Vec<IndexPoint>) -> Result<usize> {
        if let Some(bad) = points.iter().find(|p| p.embedding.len() != self.dimension) {
            return Err(ServiceError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.embedding.len(),
            });
        }

        let count = points.len();
        let mut stored = self.points.write().await;
        stored.extend(points.into_iter().map(|p| StoredPoint {
            id: Uuid::new_v4().to_string(),
            source: p.source,
            content: p.content,
            embedding: p.embedding,
        }));
        self.persist(&stored).await?;

        Ok(count)
    }

    async fn similarity_search(&self, query_vector: Vec<f32>, k: usize) -> Result<Vec<SearchResult>> {
        if query_vector.len() != self.dimension {
            return Err(ServiceError::DimensionMismatch {
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }

        let stored = self.points.read().await;
        let mut results: Vec<SearchResult> = stored
            .iter()
            .map(|p| SearchResult {
                source: p.source.clone(),
                content: p.content.clone(),
                score: cosine_similarity(&query_vector, &p.embedding),
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(k);
        Ok(results)
    }

    async fn stats(&self) -> Result<CollectionStats> {
        let stored = self.points.read().await;
        Ok(CollectionStats {
            total_points: stored.len() as u64,
            collection_name: self
                .index_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "memory".to_string()),
        })
    }

    async fn clear(&self) -> Result<()> {
        let mut stored = self.points.write().await;
        stored.clear();
        self.persist(&stored).await
    }
}

/// 余弦相似度，零向量返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    let denom = norm_a * norm_b;
    if denom <= f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
