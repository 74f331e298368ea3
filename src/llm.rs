use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use tracing::debug;

use crate::config::EasCfg;
use crate::error::{Result, ServiceError};

/// 默认请求超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// EAS 大模型服务客户端
///
/// 请求体为 UTF-8 编码的 prompt 原文，`Authorization` 头携带 token，
/// 响应体即为模型回答。
pub struct EasClient {
    client: Client,
    url: String,
    token: String,
}

impl EasClient {
    pub fn new(url: &str, token: &str) -> Result<Self> {
        Self::with_timeout(url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            token: token.to_string(),
        })
    }

    pub fn from_config(cfg: &EasCfg) -> Result<Self> {
        Self::new(&cfg.url, &cfg.token)
    }

    /// 发送 prompt 并返回模型回答
    pub async fn post(&self, prompt: &str) -> Result<String> {
        debug!(url = %self.url, prompt_chars = prompt.chars().count(), "posting to EAS");

        let response = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, &self.token)
            .body(prompt.as_bytes().to_vec())
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ServiceError::Llm(format!("{}: {}", status, text)));
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_post_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/predict/chat"))
            .and(header("Authorization", "token=="))
            .and(body_string("什么是机器学习PAI?"))
            .respond_with(ResponseTemplate::new(200).set_body_string("PAI 是机器学习平台。"))
            .expect(1)
            .mount(&server)
            .await;

        let client = EasClient::new(&format!("{}/api/predict/chat", server.uri()), "token==").unwrap();
        let answer = client.post("什么是机器学习PAI?").await.unwrap();

        assert_eq!(answer, "PAI 是机器学习平台。");
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .mount(&server)
            .await;

        let client = EasClient::new(&server.uri(), "bad").unwrap();
        let err = client.post("hi").await.unwrap_err();

        assert!(matches!(err, ServiceError::Llm(ref msg) if msg.contains("401") && msg.contains("invalid token")));
    }
}
