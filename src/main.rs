// 使用库 crate
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::warn;

use rag_chat_webui::api::{start_server, AppState};
use rag_chat_webui::args::{Args, QueryType};
use rag_chat_webui::config::{CreateDocsCfg, ServiceConfig};
use rag_chat_webui::logging;
use rag_chat_webui::service::LlmService;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    logging::init(args.log_level);

    println!("🚀 RAG Chatbot - 启动中...\n");

    let service = Arc::new(LlmService::new(args.prompt_engineering));
    let cfg = connect_from_args(&service, &args).await?;

    if args.upload {
        let Some(cfg) = cfg.as_ref() else {
            bail!("--upload requires a config file");
        };
        let (files, chunks) = upload_docs(&service, &cfg.create_docs).await?;
        println!("✅ 上传完成: {} 个文件, {} 个片段", files, chunks);
        return Ok(());
    }

    if let Some(query) = args.user_query.as_deref() {
        let answer = match args.query_type {
            QueryType::RetrievalLlm => service.user_query(query, None, None).await,
            QueryType::OnlyLlm => service.query_only_llm(query).await,
            QueryType::OnlyVectorstore => service.query_only_vectorestore(query, None).await,
        }
        .context("query failed")?;
        println!("{}", answer);
        return Ok(());
    }

    let state = Arc::new(AppState {
        service,
        upload_dir: PathBuf::from(&args.upload_dir),
        config_dir: PathBuf::from(&args.config_dir),
    });
    start_server(state, &args.host, args.port).await?;

    Ok(())
}

/// 上传 `create_docs.docs_dir` 下的全部知识文件
async fn upload_docs(service: &LlmService, docs: &CreateDocsCfg) -> Result<(usize, usize)> {
    println!("📂 上传知识库: {}", docs.docs_dir.display());
    service
        .upload_directory(&docs.docs_dir, docs.chunk_size, docs.chunk_overlap)
        .await
        .with_context(|| format!("failed to upload {}", docs.docs_dir.display()))
}

/// 读取配置文件并连接
///
/// 命令行任务必须连接成功；启动 Web 服务时允许稍后在设置页连接
async fn connect_from_args(service: &LlmService, args: &Args) -> Result<Option<ServiceConfig>> {
    let path = Path::new(&args.config);
    if !path.exists() {
        if args.is_batch() {
            bail!("config file {} not found", path.display());
        }
        warn!(config = %path.display(), "config file not found, connect from the settings page");
        return Ok(None);
    }

    let mut cfg = ServiceConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    args.apply_overrides(&mut cfg);

    println!("📊 连接向量库...");
    match service.init_with_cfg(cfg.clone()).await {
        Ok(elapsed) => {
            println!("✅ 连接成功, 耗时 {:.3} s\n", elapsed);
            Ok(Some(cfg))
        }
        Err(e) if !args.is_batch() => {
            warn!(error = %e, "initial connection failed, connect from the settings page");
            Ok(Some(cfg))
        }
        Err(e) => Err(e).context("failed to connect"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_chat_webui::prompt::PromptTemplate;

    #[tokio::test]
    async fn test_upload_docs_reports_directory() {
        let service = LlmService::new(PromptTemplate::Simple);
        let docs = CreateDocsCfg {
            docs_dir: PathBuf::from("missing/docs"),
            ..CreateDocsCfg::default()
        };

        let err = upload_docs(&service, &docs).await.unwrap_err();
        assert!(format!("{:#}", err).contains("failed to upload missing/docs"));
    }
}
