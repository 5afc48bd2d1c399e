// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 内容生成模块
//!
//! 把规范路径代入提示词模板，调用外部文本生成服务（OpenAI 兼容的 chat completions 接口），
//! 再把原始回复清洗成可以直接嵌入页面的 HTML 片段。
//!
//! 生成阶段的任何失败都会在这里被转换成可渲染的错误片段，调用方永远拿到一段内容；
//! 只有 `Generation::is_cacheable` 为真的结果才允许写入缓存。
//! 每次调用恰好发起一次出站请求，不做内部重试。

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde_derive::{Deserialize, Serialize};

use crate::{config::Config, exception::Exception, path::CanonicalPath, util::escape_html};

/// 诊断信息中保留的上游响应体长度上限
const MAX_DIAGNOSTIC_CHARS: usize = 300;

/// 一次生成的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// 实际使用的提示词
    pub prompt: String,
    /// 可嵌入页面的 HTML 片段（成功内容或错误说明）
    pub content: String,
    /// 失败原因；`None` 表示生成成功
    pub error: Option<Exception>,
}

impl Generation {
    pub fn success(prompt: String, content: String) -> Self {
        Self { prompt, content, error: None }
    }

    pub fn failure(prompt: String, error: Exception) -> Self {
        let content = error_fragment(&error);
        Self { prompt, content, error: Some(error) }
    }

    /// 只有真正生成成功的内容才能进入缓存，限流与错误片段一律绕过存储
    pub fn is_cacheable(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Generate: Send + Sync {
    async fn generate(&self, path: &CanonicalPath) -> Generation;
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: Option<ChatReply>,
}

#[derive(Deserialize, Debug)]
struct ChatReply {
    content: Option<String>,
}

/// 基于 reqwest 的生成服务客户端
pub struct OpenRouterClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    referer: String,
    prompt_template: String,
}

impl OpenRouterClient {
    pub fn from_config(config: &Config) -> Result<Self, Exception> {
        let client = Client::builder()
            .user_agent(concat!("webgen/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Exception::ConfigInvalid(format!("无法构建HTTP客户端: {}", e)))?;
        Ok(Self {
            client,
            api_url: config.api_url().to_string(),
            api_key: config.api_key().to_string(),
            model: config.model().to_string(),
            referer: config.referer().to_string(),
            prompt_template: config.prompt_template().to_string(),
        })
    }

    pub fn build_prompt(&self, path: &CanonicalPath) -> String {
        build_prompt(&self.prompt_template, path)
    }

    async fn request(&self, prompt: &str) -> Result<String, Exception> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.referer)
            .json(&body)
            .send()
            .await
            .map_err(|e| Exception::UpstreamTransport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Exception::UpstreamThrottled);
        }
        let text = response
            .text()
            .await
            .map_err(|e| Exception::UpstreamTransport(e.to_string()))?;
        if !status.is_success() {
            return Err(Exception::UpstreamStatus(status.as_u16(), truncate(&text)));
        }
        extract_content(&text)
    }
}

#[async_trait]
impl Generate for OpenRouterClient {
    async fn generate(&self, path: &CanonicalPath) -> Generation {
        let prompt = self.build_prompt(path);
        info!("为{}调用生成服务，模型：{}", path, self.model);
        match self.request(&prompt).await {
            Ok(raw) => {
                let content = clean_fragment(&raw);
                if content.is_empty() {
                    warn!("{}的生成结果清洗后为空", path);
                    return Generation::failure(
                        prompt,
                        Exception::UpstreamMalformed("content is empty after sanitizing".to_string()),
                    );
                }
                debug!("{}生成完成，原始{}字节，清洗后{}字节", path, raw.len(), content.len());
                Generation::success(prompt, content)
            }
            Err(e) => {
                warn!("{}生成失败：{}", path, e);
                Generation::failure(prompt, e)
            }
        }
    }
}

pub fn build_prompt(template: &str, path: &CanonicalPath) -> String {
    template.replace("{path}", path.as_str())
}

/// 按约定的 `choices[0].message.content` 结构取出文本，任何结构不符都视为上游错误
fn extract_content(body: &str) -> Result<String, Exception> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| Exception::UpstreamMalformed(e.to_string()))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Exception::UpstreamMalformed("response has no choices".to_string()))?;
    let content = choice
        .message
        .and_then(|m| m.content)
        .ok_or_else(|| Exception::UpstreamMalformed("choice has no message content".to_string()))?;
    if content.trim().is_empty() {
        return Err(Exception::UpstreamMalformed("message content is blank".to_string()));
    }
    Ok(content)
}

/// 去掉包裹整段回复的代码围栏，并删除任何包含反引号的行
pub fn clean_fragment(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // 跳过围栏后的语言标记，例如 ```html
        text = match rest.find('\n') {
            Some(i) => &rest[i + 1..],
            None => rest,
        };
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    text.lines()
        .filter(|line| !line.contains('`'))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// 生成失败时展示给用户的片段。诊断信息一律转义。
pub fn error_fragment(error: &Exception) -> String {
    match error {
        Exception::UpstreamThrottled => "<h1>Too many requests</h1>\
             <p>The page generator is rate limited right now. Please retry later.</p>"
            .to_string(),
        other => format!(
            "<h1>Error</h1><p>Failed to generate content: {}</p>",
            escape_html(&other.to_string())
        ),
    }
}

fn truncate(s: &str) -> String {
    match s.char_indices().nth(MAX_DIAGNOSTIC_CHARS) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::sanitize_strict;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn canonical(raw: &str) -> CanonicalPath {
        sanitize_strict(raw, 200).unwrap()
    }

    /// 启动一个只应答一次的假上游，返回地址与收到的原始请求
    async fn fake_upstream(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if received.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            String::from_utf8_lossy(&received).to_string()
        });
        (format!("http://{}/api/v1/chat/completions", addr), handle)
    }

    fn client_for(url: &str) -> OpenRouterClient {
        let toml = format!(
            "api_url = \"{}\"\napi_key = \"sk-test\"\nmodel = \"test/model\"\nprompt_template = \"Write about {{path}}\"\nrequest_timeout_secs = 5",
            url
        );
        OpenRouterClient::from_config(&Config::from_toml_str(&toml).unwrap()).unwrap()
    }

    #[test]
    fn test_build_prompt() {
        let prompt = build_prompt("Generate a webpage about \"{path}\".", &canonical("/blog/my-post"));
        assert_eq!(prompt, "Generate a webpage about \"blog/my-post\".");
    }

    #[test]
    fn test_clean_fragment_strips_fences() {
        let raw = "```html\n<h1>Title</h1>\n<p>Body</p>\n```";
        assert_eq!(clean_fragment(raw), "<h1>Title</h1>\n<p>Body</p>");
    }

    #[test]
    fn test_clean_fragment_drops_backtick_lines() {
        let raw = "```html\n<h1>Title</h1>\n<p>use `ls` here</p>\n<p>ok</p>\n```\n";
        assert_eq!(clean_fragment(raw), "<h1>Title</h1>\n<p>ok</p>");
    }

    #[test]
    fn test_clean_fragment_plain_content_untouched() {
        let raw = "<h1>Plain</h1>\n<p>No fences</p>";
        assert_eq!(clean_fragment(raw), raw);
    }

    #[test]
    fn test_clean_fragment_never_emits_backticks() {
        let raw = "intro\n```\ncode ` here\n```\n<p>``inline``</p>\noutro";
        let cleaned = clean_fragment(raw);
        assert!(!cleaned.contains('`'));
        assert_eq!(cleaned, "intro\noutro");
    }

    #[test]
    fn test_extract_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"<p>hi</p>"}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "<p>hi</p>");
    }

    #[test]
    fn test_extract_content_shape_mismatch() {
        for body in [
            "not json",
            "{}",
            r#"{"choices":[]}"#,
            r#"{"choices":[{}]}"#,
            r#"{"choices":[{"message":{"content":null}}]}"#,
            r#"{"choices":[{"message":{"content":"   "}}]}"#,
            r#"{"error":{"message":"quota"}}"#,
        ] {
            assert!(
                matches!(extract_content(body), Err(Exception::UpstreamMalformed(_))),
                "{}",
                body
            );
        }
    }

    #[test]
    fn test_error_fragment_escapes_detail() {
        let fragment = error_fragment(&Exception::UpstreamStatus(500, "<b>boom</b>".to_string()));
        assert!(fragment.contains("&lt;b&gt;boom&lt;/b&gt;"));
        assert!(!fragment.contains("<b>"));
        let fragment = error_fragment(&Exception::UpstreamThrottled);
        assert!(fragment.contains("retry later"));
    }

    #[test]
    fn test_truncate() {
        let long = "x".repeat(1000);
        assert_eq!(truncate(&long).chars().count(), MAX_DIAGNOSTIC_CHARS + 1);
        assert_eq!(truncate("short"), "short");
    }

    #[tokio::test]
    async fn test_generate_success_sends_contract() {
        let (url, upstream) = fake_upstream(
            "200 OK",
            r#"{"choices":[{"message":{"content":"```html\n<h1>Home</h1>\n```"}}]}"#,
        )
        .await;
        let client = client_for(&url);
        let generation = client.generate(&canonical("/")).await;

        assert!(generation.is_cacheable());
        assert_eq!(generation.prompt, "Write about home");
        assert_eq!(generation.content, "<h1>Home</h1>");

        let request = upstream.await.unwrap();
        let lower = request.to_lowercase();
        assert!(request.starts_with("POST /api/v1/chat/completions"));
        assert!(lower.contains("authorization: bearer sk-test"));
        assert!(lower.contains("http-referer: http://localhost:9999"));
        assert!(lower.contains("content-type: application/json"));
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["model"], "test/model");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Write about home");
    }

    #[tokio::test]
    async fn test_generate_throttled() {
        let (url, _upstream) = fake_upstream("429 Too Many Requests", r#"{"error":"slow down"}"#).await;
        let generation = client_for(&url).generate(&canonical("/a")).await;
        assert!(!generation.is_cacheable());
        assert_eq!(generation.error, Some(Exception::UpstreamThrottled));
        assert!(generation.content.contains("retry later"));
    }

    #[tokio::test]
    async fn test_generate_server_error() {
        let (url, _upstream) = fake_upstream("503 Service Unavailable", "upstream down").await;
        let generation = client_for(&url).generate(&canonical("/a")).await;
        assert!(!generation.is_cacheable());
        assert!(matches!(generation.error, Some(Exception::UpstreamStatus(503, _))));
        assert!(generation.content.contains("upstream down"));
    }

    #[tokio::test]
    async fn test_generate_malformed_body() {
        let (url, _upstream) = fake_upstream("200 OK", r#"{"choices":[]}"#).await;
        let generation = client_for(&url).generate(&canonical("/a")).await;
        assert!(matches!(generation.error, Some(Exception::UpstreamMalformed(_))));
        assert!(generation.content.starts_with("<h1>Error</h1>"));
    }

    #[tokio::test]
    async fn test_generate_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let generation = client_for(&format!("http://{}/", addr))
            .generate(&canonical("/a"))
            .await;
        assert!(matches!(generation.error, Some(Exception::UpstreamTransport(_))));
    }
}
