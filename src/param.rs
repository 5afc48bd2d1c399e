// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 网关协议参数与常量模块
//!
//! 该模块定义了 `webgen` 遵循的 HTTP 协议相关常量和数据结构，包括：
//! - 常见的 HTTP 状态码及其原因短语（Reason Phrase）。
//! - 静态文档所需的 MIME 类型映射表。
//! - 每个响应都必须携带的安全加固头部。
//! - 内置的爬虫 User-Agent 特征与网段黑名单。
//! - HTTP 方法、版本及编码格式的强类型枚举。

use std::collections::HashMap;
use lazy_static::lazy_static;

/// 服务器名称标识，用于 HTTP 响应头的 `Server` 字段
pub const SERVER_NAME: &str = "webgen";

/// HTTP 协议规定的换行符（Carriage Return Line Feed）
pub const CRLF: &str = "\r\n";

/// 规范文档后缀。`/foo` 会被重定向到 `/foo.html`。
pub const PAGE_SUFFIX: &str = ".html";

/// 空路径（即 `/`）对应的保留规范标识
pub const HOME_PATH: &str = "home";

/// 爬虫排除协议文档的路由
pub const ROBOTS_ROUTE: &str = "/robots.txt";

/// 落地页文档的路由
pub const LANDING_ROUTE: &str = "/index.html";

/// `static_root` 下缺少 robots.txt 时使用的内置版本
pub const DEFAULT_ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";

/// `static_root` 下缺少 index.html 时使用的内置落地页正文
pub const DEFAULT_LANDING_BODY: &str = r"<h1>webgen</h1>
<p>Every page on this site is written on demand the first time someone asks for it.</p>
<p>Try <a href='/home.html'>/home.html</a> or any path you like.</p>";

/// 默认的提示词模板，`{path}` 会被替换为规范路径
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"Generate a webpage about "{path}".
The content should be informative and engaging.
Return only the HTML content for the body (no <html>, <head>, or <body> tags).
Use semantic HTML elements and include proper headings."#;

/// 默认的生成服务地址（OpenAI 兼容的 chat completions 接口）
pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// 默认模型标识
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";

lazy_static! {
    /// 服务器当前允许处理的 HTTP 方法列表。
    ///
    /// 不在该列表中的方法将触发 405 Method Not Allowed。
    pub static ref ALLOWED_METHODS: Vec<HttpRequestMethod> = {
        vec![
            HttpRequestMethod::Get,
            HttpRequestMethod::Head,
            HttpRequestMethod::Options,
        ]
    };
}

lazy_static! {
    /// HTTP 状态码与其对应的标准原因短语映射表。
    ///
    /// 参考标准：[RFC 9110: HTTP Semantics](https://www.rfc-editor.org/rfc/rfc9110.html)。
    /// 只收录网关实际可能返回或在测试中引用的状态码。
    pub static ref STATUS_CODES: HashMap<u16, &'static str> = {
        let mut map = HashMap::new();
        // 2xx: 成功响应 (Successful)
        map.insert(200, "OK");
        map.insert(204, "No Content");

        // 3xx: 重定向 (Redirection)
        map.insert(301, "Moved Permanently");
        map.insert(302, "Found");
        map.insert(304, "Not Modified");

        // 4xx: 客户端错误 (Client Error)
        map.insert(400, "Bad Request");
        map.insert(403, "Forbidden");
        map.insert(404, "Not Found");
        map.insert(405, "Method Not Allowed");
        map.insert(413, "Content Too Large");
        map.insert(414, "URI Too Long");
        map.insert(429, "Too Many Requests");

        // 5xx: 服务端错误 (Server Error)
        map.insert(500, "Internal Server Error");
        map.insert(502, "Bad Gateway");
        map.insert(503, "Service Unavailable");
        map.insert(504, "Gateway Timeout");
        map
    };
}

lazy_static! {
    /// 文件后缀名到 MIME 类型的映射表，仅用于静态路由。
    pub static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut map = HashMap::new();
        map.insert("html", "text/html;charset=utf-8");
        map.insert("htm", "text/html;charset=utf-8");
        map.insert("txt", "text/plain;charset=utf-8");
        map.insert("css", "text/css;charset=utf-8");
        map.insert("json", "application/json");
        // 兜底类型
        map.insert("_", "application/octet-stream");
        map
    };
}

lazy_static! {
    /// 每个响应（无论是否被拦截）都携带的安全加固头部。
    ///
    /// 依次为：禁止 MIME 嗅探、禁止被嵌入框架、限制脚本与样式来源、
    /// 拒绝索引与 AI 训练、隐藏来源，以及两个声明拒绝爬取的自定义头部。
    pub static ref SECURITY_HEADERS: Vec<(&'static str, &'static str)> = {
        vec![
            ("X-Content-Type-Options", "nosniff"),
            ("X-Frame-Options", "DENY"),
            (
                "Content-Security-Policy",
                "default-src 'none'; style-src 'unsafe-inline'; img-src 'self'; base-uri 'none'; form-action 'none'; frame-ancestors 'none'",
            ),
            (
                "X-Robots-Tag",
                "noindex, nofollow, noarchive, nosnippet, noimageindex, noai, noimageai",
            ),
            ("Referrer-Policy", "no-referrer"),
            ("X-AI-Crawl", "disallow"),
            ("X-Crawl-Policy", "refuse"),
        ]
    };
}

lazy_static! {
    /// 内置的自动化爬虫 User-Agent 特征（小写，按子串匹配）。
    pub static ref DEFAULT_BLOCKED_AGENTS: Vec<&'static str> = {
        vec![
            "googlebot",
            "bingbot",
            "slurp",
            "duckduckbot",
            "baiduspider",
            "yandexbot",
            "sogou",
            "exabot",
            "facebookexternalhit",
            "ia_archiver",
            "gptbot",
            "chatgpt-user",
            "oai-searchbot",
            "ccbot",
            "claudebot",
            "claude-web",
            "anthropic-ai",
            "bytespider",
            "perplexitybot",
            "amazonbot",
            "applebot",
            "google-extended",
            "cohere-ai",
            "diffbot",
            "semrushbot",
            "ahrefsbot",
            "mj12bot",
            "dotbot",
            "petalbot",
            "imagesiftbot",
            "omgili",
            "timpibot",
            "python-requests",
            "scrapy",
            "curl/",
            "wget/",
        ]
    };
}

lazy_static! {
    /// 内置的爬虫网段黑名单（CIDR）。
    pub static ref DEFAULT_BLOCKED_NETWORKS: Vec<&'static str> = {
        vec![
            // Googlebot
            "66.249.64.0/19",
            // Bingbot
            "40.77.167.0/24",
            "157.55.39.0/24",
            "207.46.13.0/24",
            // GPTBot
            "20.15.240.64/28",
            "20.15.240.80/28",
            "20.15.240.96/28",
            "20.15.240.176/28",
            "20.15.241.0/28",
            "20.15.242.128/28",
            "20.15.242.144/28",
            "20.15.242.192/28",
            "40.83.2.64/28",
            // Applebot
            "17.241.208.0/20",
            // Baiduspider
            "180.76.15.0/24",
            // Yandex
            "5.255.253.0/24",
        ]
    };
}

/// 支持的 HTTP 协议版本
#[derive(Debug, Clone, Copy)]
pub enum HttpVersion {
    /// HTTP/1.1 版本
    V1_1,
}

/// 标准 HTTP 请求方法
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpRequestMethod {
    /// 获取资源
    Get,
    /// 获取资源的元数据（不包含响应体）
    Head,
    /// 查询服务器支持的选项
    Options,
    /// 提交数据或执行操作
    Post,
}

/// 支持的内容编码（压缩）格式
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HttpEncoding {
    /// GNU zip 压缩
    Gzip,
    /// zlib 压缩
    Deflate,
    /// Brotli 压缩
    Br,
}

use std::fmt;

impl fmt::Display for HttpVersion {
    /// 将枚举格式化为 HTTP 报文中的版本字符串
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpVersion::V1_1 => write!(f, "1.1"),
        }
    }
}

impl fmt::Display for HttpRequestMethod {
    /// 将枚举格式化为 HTTP 标准大写方法名
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpRequestMethod::Get => write!(f, "GET"),
            HttpRequestMethod::Head => write!(f, "HEAD"),
            HttpRequestMethod::Options => write!(f, "OPTIONS"),
            HttpRequestMethod::Post => write!(f, "POST"),
        }
    }
}

impl fmt::Display for HttpEncoding {
    /// 将枚举格式化为 `Content-Encoding` 头所使用的标识符
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HttpEncoding::Gzip => write!(f, "gzip"),
            HttpEncoding::Deflate => write!(f, "deflate"),
            HttpEncoding::Br => write!(f, "br"),
        }
    }
}
