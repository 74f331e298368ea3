use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunker::split_text;
use crate::config::{ServiceConfig, VectorStoreKind, MAX_TOPK};
use crate::db::{self, IndexPoint, SearchResult, VectorStore};
use crate::embedding::HttpEmbedding;
use crate::error::{Result, ServiceError};
use crate::llm::EasClient;
use crate::loader::{is_supported_extension, load_document};
use crate::prompt::{render, PromptTemplate};

/// 已连接的后端 (一次 `init_with_cfg` 的产物)
struct Backend {
    config: ServiceConfig,
    embedder: HttpEmbedding,
    llm: EasClient,
    store: Arc<dyn VectorStore>,
}

/// 服务状态
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceStatus {
    pub connected: bool,
    pub vector_store: Option<VectorStoreKind>,
    pub total_points: Option<u64>,
}

/// LLM 服务 - 整合 loading + chunking + embedding + vector store + EAS
pub struct LlmService {
    backend: RwLock<Option<Arc<Backend>>>,
    prompt_template: PromptTemplate,
}

impl LlmService {
    /// 创建未连接的服务
    pub fn new(prompt_template: PromptTemplate) -> Self {
        Self {
            backend: RwLock::new(None),
            prompt_template,
        }
    }

    /// 按配置连接 embedding、EAS 与向量库，返回耗时 (秒)
    ///
    /// 失败时保留原有连接
    pub async fn init_with_cfg(&self, config: ServiceConfig) -> Result<f64> {
        let started = Instant::now();
        config.validate()?;

        let embedder = HttpEmbedding::from_config(&config.embedding);
        let llm = EasClient::from_config(&config.eas)?;
        let store = db::connect(&config.backend()?, config.embedding.embedding_dimension).await?;

        if !embedder.health_check().await {
            warn!(url = %config.embedding.url, "embedding service did not answer health check");
        }

        let kind = store.kind();
        let backend = Arc::new(Backend {
            config,
            embedder,
            llm,
            store,
        });
        *self.backend.write().await = Some(backend);

        let elapsed = started.elapsed().as_secs_f64();
        info!(vector_store = %kind, elapsed, "service connected");
        Ok(elapsed)
    }

    async fn backend(&self) -> Result<Arc<Backend>> {
        self.backend
            .read()
            .await
            .clone()
            .ok_or(ServiceError::NotConnected)
    }

    /// 当前配置的副本
    pub async fn config(&self) -> Option<ServiceConfig> {
        self.backend.read().await.as_ref().map(|b| b.config.clone())
    }

    /// 上传单个知识文件
    ///
    /// # 返回
    /// 写入的文本片段数量
    pub async fn upload_custom_knowledge(
        &self,
        file_path: &Path,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<usize> {
        let backend = self.backend().await?;

        // 1. 读取文件
        let text = load_document(file_path)?;

        // 2. 切分文本
        let chunks = split_text(&text, chunk_size, chunk_overlap)?;
        if chunks.is_empty() {
            return Ok(0);
        }

        // 3. 批量生成 embeddings
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let embeddings = backend.embedder.encode_batch(&texts).await?;

        // 4. 写入向量库
        let source = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.display().to_string());
        let points: Vec<IndexPoint> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexPoint {
                source: source.clone(),
                content: chunk.content,
                embedding,
            })
            .collect();

        let count = backend.store.add_documents(points).await?;
        info!(file = %file_path.display(), chunks = count, "uploaded knowledge");
        Ok(count)
    }

    /// 递归上传目录中的知识文件
    ///
    /// # 返回
    /// (文件数, 片段数)
    pub async fn upload_directory(
        &self,
        dir: &Path,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<(usize, usize)> {
        if !dir.is_dir() {
            return Err(ServiceError::Config(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let mut files = 0;
        let mut chunks = 0;

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| ServiceError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !is_supported_extension(&name) {
                continue;
            }

            chunks += self
                .upload_custom_knowledge(entry.path(), chunk_size, chunk_overlap)
                .await?;
            files += 1;
        }

        info!(dir = %dir.display(), files, chunks, "uploaded knowledge directory");
        Ok((files, chunks))
    }

    /// 直接询问大模型
    pub async fn query_only_llm(&self, question: &str) -> Result<String> {
        let backend = self.backend().await?;
        backend.llm.post(question).await
    }

    async fn retrieve(&self, backend: &Backend, question: &str, topk: Option<usize>) -> Result<Vec<SearchResult>> {
        let k = effective_topk(topk, backend.config.query_topk);
        let query_vector = backend.embedder.encode(question).await?;
        backend.store.similarity_search(query_vector, k).await
    }

    /// 仅检索向量库，返回命中的片段及来源
    pub async fn query_only_vectorestore(&self, question: &str, topk: Option<usize>) -> Result<String> {
        let backend = self.backend().await?;
        let docs = self.retrieve(&backend, question, topk).await?;

        if docs.is_empty() {
            return Ok("没有检索到相关内容".to_string());
        }

        let contents: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        let mut sources: Vec<&str> = Vec::new();
        for doc in &docs {
            if !sources.contains(&doc.source.as_str()) {
                sources.push(&doc.source);
            }
        }

        Ok(format!("{}\n\n来源: {}", contents.join("\n\n"), sources.join(", ")))
    }

    /// 检索增强问答
    ///
    /// 模板优先级：请求中的 prompt > 配置中的 prompt_template > 启动时选择的预置模板
    pub async fn user_query(
        &self,
        question: &str,
        topk: Option<usize>,
        prompt: Option<&str>,
    ) -> Result<String> {
        let backend = self.backend().await?;
        let docs = self.retrieve(&backend, question, topk).await?;

        let context = docs
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let template = prompt
            .filter(|p| !p.trim().is_empty())
            .or(backend.config.prompt_template.as_deref())
            .unwrap_or(self.prompt_template.text());

        let user_prompt = render(template, &context, question);
        backend.llm.post(&user_prompt).await
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        let Some(backend) = self.backend.read().await.clone() else {
            return Ok(ServiceStatus {
                connected: false,
                vector_store: None,
                total_points: None,
            });
        };

        let stats = backend.store.stats().await?;
        Ok(ServiceStatus {
            connected: true,
            vector_store: Some(backend.store.kind()),
            total_points: Some(stats.total_points),
        })
    }

    /// 清空知识库
    pub async fn clear_knowledge(&self) -> Result<()> {
        let backend = self.backend().await?;
        backend.store.clear().await
    }
}

/// 请求中的 topk，缺省或为 0 时使用配置值，并截断到 `MAX_TOPK`
fn effective_topk(requested: Option<usize>, configured: usize) -> usize {
    requested
        .filter(|k| *k > 0)
        .unwrap_or(configured)
        .min(MAX_TOPK)
}
