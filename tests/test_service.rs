/// 集成测试: 上传 -> 检索 -> 问答 全流程
///
/// Embedding 与 EAS 由 wiremock 模拟，向量库使用内存 FAISS
///
/// 运行方式: cargo test --test test_service -- --nocapture
use std::path::Path;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_string, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rag_chat_webui::api::{create_router, AppState};
use rag_chat_webui::config::{ServiceConfig, VectorStoreKind};
use rag_chat_webui::prompt::PromptTemplate;
use rag_chat_webui::service::LlmService;

const BOUNDARY: &str = "rag-test-boundary";

/// 含 "火锅" 的文本映射到 [1,0,0]，其余映射到 [0,1,0]
async fn mount_embedding(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .and(body_string_contains("火锅"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": [1.0, 0.0, 0.0] })))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "embedding": [0.0, 1.0, 0.0] })))
        .mount(server)
        .await;
}

fn faiss_config(server: &MockServer) -> Value {
    json!({
        "embedding": {
            "embedding_model": "test-model",
            "embedding_dimension": 3,
            "url": server.uri()
        },
        "EASCfg": {
            "url": format!("{}/eas", server.uri()),
            "token": "secret"
        },
        "vector_store": "FAISS",
        "query_topk": 1
    })
}

async fn connected_service(server: &MockServer) -> LlmService {
    mount_embedding(server).await;

    let service = LlmService::new(PromptTemplate::Simple);
    let cfg = ServiceConfig::from_json(faiss_config(server).to_string().as_bytes()).unwrap();
    service.init_with_cfg(cfg).await.unwrap();
    service
}

async fn upload(service: &LlmService, dir: &Path, name: &str, text: &str) -> usize {
    let file = dir.join(name);
    std::fs::write(&file, text).unwrap();
    service.upload_custom_knowledge(&file, 200, 0).await.unwrap()
}

#[tokio::test]
async fn test_upload_and_query_vectorstore() {
    let server = MockServer::start().await;
    let service = connected_service(&server).await;
    let dir = tempfile::tempdir().unwrap();

    assert_eq!(upload(&service, dir.path(), "hotpot.txt", "重庆火锅很辣").await, 1);
    assert_eq!(upload(&service, dir.path(), "db.md", "向量数据库用于存储 embedding").await, 1);

    let status = service.status().await.unwrap();
    assert!(status.connected);
    assert_eq!(status.total_points, Some(2));

    let answer = service.query_only_vectorestore("火锅", None).await.unwrap();
    assert_eq!(answer, "重庆火锅很辣\n\n来源: hotpot.txt");

    let answer = service.query_only_vectorestore("火锅", Some(2)).await.unwrap();
    assert!(answer.contains("向量数据库用于存储 embedding"));
    assert!(answer.ends_with("来源: hotpot.txt, db.md"));
}

#[tokio::test]
async fn test_user_query_sends_rendered_prompt() {
    let server = MockServer::start().await;
    let service = connected_service(&server).await;
    let dir = tempfile::tempdir().unwrap();
    upload(&service, dir.path(), "hotpot.txt", "重庆火锅很辣").await;

    Mock::given(method("POST"))
        .and(path("/eas"))
        .and(header("Authorization", "secret"))
        .and(body_string_contains("已知信息:重庆火锅很辣\n用户问题:火锅辣吗"))
        .respond_with(ResponseTemplate::new(200).set_body_string("很辣"))
        .expect(1)
        .mount(&server)
        .await;

    let answer = service.user_query("火锅辣吗", None, None).await.unwrap();
    assert_eq!(answer, "很辣");
}

#[tokio::test]
async fn test_user_query_with_custom_prompt() {
    let server = MockServer::start().await;
    let service = connected_service(&server).await;
    let dir = tempfile::tempdir().unwrap();
    upload(&service, dir.path(), "hotpot.txt", "重庆火锅很辣").await;

    Mock::given(method("POST"))
        .and(path("/eas"))
        .and(body_string("Q=火锅辣吗 C=重庆火锅很辣"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let answer = service
        .user_query("火锅辣吗", None, Some("Q={question} C={context}"))
        .await
        .unwrap();
    assert_eq!(answer, "ok");
}

#[tokio::test]
async fn test_query_only_llm_sends_raw_question() {
    let server = MockServer::start().await;
    let service = connected_service(&server).await;

    Mock::given(method("POST"))
        .and(path("/eas"))
        .and(body_string("你好"))
        .respond_with(ResponseTemplate::new(200).set_body_string("你好！"))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(service.query_only_llm("你好").await.unwrap(), "你好！");
}

#[tokio::test]
async fn test_upload_directory_skips_unsupported() {
    let server = MockServer::start().await;
    let service = connected_service(&server).await;
    let dir = tempfile::tempdir().unwrap();

    std::fs::create_dir(dir.path().join("nested")).unwrap();
    std::fs::write(dir.path().join("a.txt"), "火锅").unwrap();
    std::fs::write(dir.path().join("nested").join("b.md"), "数据库").unwrap();
    std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

    let (files, chunks) = service.upload_directory(dir.path(), 200, 0).await.unwrap();
    assert_eq!(files, 2);
    assert_eq!(chunks, 2);
}

/// 一个 multipart 字段: (字段名, 文件名, 内容)
type Part<'a> = (&'a str, Option<&'a str>, &'a str);

fn multipart_request(method: &str, uri: &str, parts: &[Part]) -> Request<Body> {
    let mut body = String::new();
    for (name, file_name, content) in parts {
        body.push_str(&format!("--{}\r\n", BOUNDARY));
        match file_name {
            Some(f) => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                name, f
            )),
            None => body.push_str(&format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                name
            )),
        }
        body.push_str(content);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));

    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn app_state(service: Arc<LlmService>, dir: &Path) -> Arc<AppState> {
    Arc::new(AppState {
        service,
        upload_dir: dir.join("file"),
        config_dir: dir.join("config"),
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_failed_reconnect_keeps_previous_connection() {
    let server = MockServer::start().await;
    let service = connected_service(&server).await;
    let dir = tempfile::tempdir().unwrap();
    upload(&service, dir.path(), "hotpot.txt", "重庆火锅很辣").await;

    Mock::given(method("HEAD"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut broken = faiss_config(&server);
    broken["vector_store"] = json!("ElasticSearch");
    broken["ElasticSearchCfg"] = json!({ "ES_URL": server.uri(), "ES_INDEX": "broken" });
    let cfg = ServiceConfig::from_json(broken.to_string().as_bytes()).unwrap();

    assert!(service.init_with_cfg(cfg).await.is_err());

    let status = service.status().await.unwrap();
    assert!(status.connected);
    assert_eq!(status.vector_store, Some(VectorStoreKind::Faiss));
    assert_eq!(status.total_points, Some(1));
    assert_eq!(
        service.query_only_vectorestore("火锅", None).await.unwrap(),
        "重庆火锅很辣\n\n来源: hotpot.txt"
    );
}

#[tokio::test]
async fn test_uploadfile_endpoint_ingests() {
    let server = MockServer::start().await;
    let service = Arc::new(connected_service(&server).await);
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(app_state(service.clone(), dir.path()));

    let response = app
        .oneshot(multipart_request(
            "POST",
            "/uploadfile/",
            &[("file", Some("hotpot.txt"), "重庆火锅很辣")],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let saved = dir.path().join("file").join("hotpot.txt");
    let body = body_json(response).await;
    assert_eq!(body, json!({ "Upload file success! ": saved.display().to_string() }));
    assert!(saved.exists());
    assert_eq!(service.status().await.unwrap().total_points, Some(1));
}

#[tokio::test]
async fn test_upload_knowledge_counts_all_but_ingests_supported() {
    let server = MockServer::start().await;
    let service = Arc::new(connected_service(&server).await);
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(app_state(service.clone(), dir.path()));

    let response = app
        .oneshot(multipart_request(
            "POST",
            "/api/upload/knowledge",
            &[
                ("chunk_size", None, ""),
                ("chunk_overlap", None, "0"),
                ("source", None, "directory"),
                ("files", Some("a.txt"), "重庆火锅很辣"),
                ("files", Some("b.png"), "not a document"),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["message"],
        "Directory: Upload 2 files Success!"
    );

    assert!(dir.path().join("file").join("a.txt").exists());
    assert!(!dir.path().join("file").join("b.png").exists());
    assert_eq!(service.status().await.unwrap().total_points, Some(1));
}

#[tokio::test]
async fn test_upload_knowledge_file_source() {
    let server = MockServer::start().await;
    let service = Arc::new(connected_service(&server).await);
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(app_state(service, dir.path()));

    let response = app
        .oneshot(multipart_request(
            "POST",
            "/api/upload/knowledge",
            &[("files", Some("a.md"), "数据库")],
        ))
        .await
        .unwrap();
    assert_eq!(
        body_json(response).await["message"],
        "File: Upload 1 files Success!"
    );
}

#[tokio::test]
async fn test_chat_appends_history() {
    let server = MockServer::start().await;
    let service = Arc::new(connected_service(&server).await);
    let dir = tempfile::tempdir().unwrap();
    let app = create_router(app_state(service, dir.path()));

    Mock::given(method("POST"))
        .and(path("/eas"))
        .and(body_string("你好"))
        .respond_with(ResponseTemplate::new(200).set_body_string("你好！"))
        .mount(&server)
        .await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/chat",
            json!({
                "message": "你好",
                "history": [["早", "早上好"]],
                "mode": "LLM"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({
            "message": "",
            "history": [["早", "早上好"], ["你好", "你好！"]]
        })
    );
}

#[tokio::test]
async fn test_settings_connect_message() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(LlmService::new(PromptTemplate::Simple));
    let app = create_router(app_state(service.clone(), dir.path()));

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/settings/connect",
            json!({
                "emb_model": "text2vec-base-chinese",
                "emb_dim": "768",
                "eas_url": "http://127.0.0.1:9/eas",
                "eas_token": "",
                "vector_store": "FAISS"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let message = body["message"].as_str().unwrap();
    let seconds = message
        .strip_prefix("Connect FAISS success. Cost time: ")
        .and_then(|rest| rest.strip_suffix(" s"))
        .unwrap_or_else(|| panic!("unexpected message: {}", message));
    assert!(seconds.parse::<f64>().unwrap() >= 0.0);

    let cfg = service.config().await.unwrap();
    assert_eq!(cfg.embedding.embedding_dimension, 768);
    assert_eq!(cfg.embedding.model_dir, "/code/embedding_model/");
}

#[tokio::test]
async fn test_settings_analyze_fills_form() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(LlmService::new(PromptTemplate::Simple));
    let app = create_router(app_state(service.clone(), dir.path()));

    let config = json!({
        "embedding": {"embedding_model": "text2vec-base-chinese", "embedding_dimension": 768},
        "EASCfg": {"url": "http://eas", "token": "tok"},
        "HOLOCfg": {
            "PG_HOST": "holo.example.com",
            "PG_DATABASE": "kb",
            "PG_USER": "user",
            "PG_PASSWORD": "pwd"
        }
    });

    let response = app
        .oneshot(multipart_request(
            "POST",
            "/api/settings/analyze",
            &[("file", Some("config_holo.json"), config.to_string().as_str())],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let form = body_json(response).await;
    assert_eq!(form["vs_radio"], "Hologres");
    assert_eq!(form["visible_panel"], "Hologres");
    assert_eq!(form["emb_dim"], "768");
    assert_eq!(form["holo_host"], "holo.example.com");
    assert_eq!(form["eas_token"], "tok");
    assert_eq!(form["es_url"], "");

    // 只解析回填，不连接
    assert!(dir.path().join("config").join("config_holo.json").exists());
    assert!(!service.status().await.unwrap().connected);
}

#[tokio::test]
async fn test_clear_knowledge_endpoint() {
    let server = MockServer::start().await;
    let service = Arc::new(connected_service(&server).await);
    let dir = tempfile::tempdir().unwrap();
    upload(&service, dir.path(), "hotpot.txt", "重庆火锅很辣").await;

    let app = create_router(app_state(service.clone(), dir.path()));
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/knowledge")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(service.status().await.unwrap().total_points, Some(0));
    assert_eq!(
        service.query_only_vectorestore("火锅", None).await.unwrap(),
        "没有检索到相关内容"
    );
}

#[tokio::test]
async fn test_clear_knowledge_requires_connection() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(LlmService::new(PromptTemplate::Simple));
    let app = create_router(app_state(service, dir.path()));

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/knowledge")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_config_endpoint_connects() {
    let server = MockServer::start().await;
    mount_embedding(&server).await;
    let dir = tempfile::tempdir().unwrap();

    let service = Arc::new(LlmService::new(PromptTemplate::Simple));
    let app = create_router(app_state(service.clone(), dir.path()));

    let config = faiss_config(&server).to_string();
    let request = multipart_request(
        "POST",
        "/config/",
        &[("file", Some("config_faiss.json"), config.as_str())],
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(body_json(response).await, json!(["Connect success! ", "FAISS"]));

    assert!(dir.path().join("config").join("config_faiss.json").exists());
    assert!(service.status().await.unwrap().connected);
}
