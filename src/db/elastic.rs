use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::{CollectionStats, IndexPoint, SearchResult, VectorStore};
use crate::config::VectorStoreKind;
use crate::error::{Result, ServiceError};

/// kNN 候选数与单次返回条数的上限
const MAX_NUM_CANDIDATES: usize = 10_000;

/// REST 方言
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// `dense_vector` + 顶层 `knn` 查询
    ElasticSearch,
    /// `knn_vector` + `query.knn` 查询
    OpenSearch,
}

/// 连接参数
#[derive(Debug, Clone)]
pub struct EsParams {
    pub url: String,
    pub index: String,
    pub user: String,
    pub password: String,
}

pub struct ElasticStore {
    client: Client,
    params: EsParams,
    flavor: Flavor,
    dimension: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source")]
    doc: Doc,
}

#[derive(Deserialize)]
struct Doc {
    content: String,
    #[serde(default)]
    source: String,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Deserialize)]
struct BulkResponse {
    errors: bool,
}

impl ElasticStore {
    /// 连接并确保索引存在
    pub async fn connect(mut params: EsParams, flavor: Flavor, dimension: usize) -> Result<Self> {
        params.url = params.url.trim_end_matches('/').to_string();
        if params.index.trim().is_empty() {
            return Err(ServiceError::Config("index name is empty".to_string()));
        }

        let store = Self {
            client: Client::new(),
            params,
            flavor,
            dimension,
        };
        store.ensure_index().await?;
        Ok(store)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.params.url, path);
        let builder = self.client.request(method, url);
        if self.params.user.is_empty() {
            builder
        } else {
            builder.basic_auth(&self.params.user, Some(&self.params.password))
        }
    }

    /// 索引 mapping
    fn mapping(&self) -> Value {
        match self.flavor {
            Flavor::ElasticSearch => json!({
                "mappings": {
                    "properties": {
                        "content": {"type": "text"},
                        "source": {"type": "keyword"},
                        "vector": {
                            "type": "dense_vector",
                            "dims": self.dimension,
                            "index": true,
                            "similarity": "cosine"
                        }
                    }
                }
            }),
            Flavor::OpenSearch => json!({
                "settings": {"index": {"knn": true}},
                "mappings": {
                    "properties": {
                        "content": {"type": "text"},
                        "source": {"type": "keyword"},
                        "vector": {
                            "type": "knn_vector",
                            "dimension": self.dimension
                        }
                    }
                }
            }),
        }
    }

    fn search_body(&self, query_vector: &[f32], k: usize) -> Value {
        match self.flavor {
            Flavor::ElasticSearch => json!({
                "size": k,
                "_source": ["content", "source"],
                "knn": {
                    "field": "vector",
                    "query_vector": query_vector,
                    "k": k,
                    "num_candidates": num_candidates(k)
                }
            }),
            Flavor::OpenSearch => json!({
                "size": k,
                "_source": ["content", "source"],
                "query": {
                    "knn": {
                        "vector": {"vector": query_vector, "k": k}
                    }
                }
            }),
        }
    }

    async fn ensure_index(&self) -> Result<()> {
        let response = self.request(Method::HEAD, &self.params.index).send().await?;

        match response.status() {
            StatusCode::OK => {
                debug!(index = %self.params.index, "index already exists");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                info!(index = %self.params.index, flavor = ?self.flavor, "creating index");
                let response = self
                    .request(Method::PUT, &self.params.index)
                    .json(&self.mapping())
                    .send()
                    .await?;
                check(response).await?;
                Ok(())
            }
            status => Err(ServiceError::VectorStore(format!(
                "unexpected status {} checking index {}",
                status, self.params.index
            ))),
        }
    }
}

/// ES 要求 k <= num_candidates <= 10000
fn num_candidates(k: usize) -> usize {
    k.saturating_mul(10).clamp(100, MAX_NUM_CANDIDATES).max(k)
}

/// 非 2xx 响应转为错误
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::VectorStore(format!("{}: {}", status, body)))
}

#[async_trait]
impl VectorStore for ElasticStore {
    fn kind(&self) -> VectorStoreKind {
        match self.flavor {
            Flavor::ElasticSearch => VectorStoreKind::ElasticSearch,
            Flavor::OpenSearch => VectorStoreKind::OpenSearch,
        }
    }

    async fn add_documents(&self, points: Vec<IndexPoint>) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        let count = points.len();
        let mut body = String::new();
        for point in points {
            if point.embedding.len() != self.dimension {
                return Err(ServiceError::DimensionMismatch {
                    expected: self.dimension,
                    actual: point.embedding.len(),
                });
            }
            let action = json!({"index": {"_index": self.params.index, "_id": Uuid::new_v4().to_string()}});
            let doc = json!({
                "content": point.content,
                "source": point.source,
                "vector": point.embedding,
            });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&doc.to_string());
            body.push('\n');
        }

        let response = self
            .request(Method::POST, "_bulk?refresh=true")
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let bulk: BulkResponse = check(response).await?.json().await?;
        if bulk.errors {
            return Err(ServiceError::VectorStore(
                "bulk indexing reported item errors".to_string(),
            ));
        }

        debug!(index = %self.params.index, count, "bulk indexed");
        Ok(count)
    }

    async fn similarity_search(&self, query_vector: Vec<f32>, k: usize) -> Result<Vec<SearchResult>> {
        let k = k.min(MAX_NUM_CANDIDATES);
        let path = format!("{}/_search", self.params.index);
        let response = self
            .request(Method::POST, &path)
            .json(&self.search_body(&query_vector, k))
            .send()
            .await?;
        let parsed: SearchResponse = check(response).await?.json().await?;

        let mut results: Vec<SearchResult> = parsed
            .hits
            .hits
            .into_iter()
            .map(|hit| SearchResult {
                source: hit.doc.source,
                content: hit.doc.content,
                score: hit.score.unwrap_or(0.0),
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(k);

        Ok(results)
    }

    async fn stats(&self) -> Result<CollectionStats> {
        let path = format!("{}/_count", self.params.index);
        let response = self.request(Method::GET, &path).send().await?;
        let parsed: CountResponse = check(response).await?.json().await?;

        Ok(CollectionStats {
            total_points: parsed.count,
            collection_name: self.params.index.clone(),
        })
    }

    async fn clear(&self) -> Result<()> {
        let response = self
            .request(Method::DELETE, &self.params.index)
            .send()
            .await?;
        if response.status() != StatusCode::NOT_FOUND {
            check(response).await?;
        }
        self.ensure_index().await
    }
}
