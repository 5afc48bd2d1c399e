// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了网关在请求处理生命周期中可能出现的各类异常情况。
//!
//! ## 分类
//! - **协议解析错误**：请求字节流无法解析，对应 `400 Bad Request`。
//! - **输入与访问控制**：非法路径（400）与爬虫拦截（403），这两类会直接短路整个流水线。
//! - **上游生成错误**：限流、非成功状态码、网络错误、响应结构不符。
//!   这些错误在生成器边界被转换为可渲染的 HTML 片段，不会以异常形式抵达客户端。
//! - **存储错误**：只记录日志，不影响响应。
//! - **配置错误**：只会在启动阶段出现。

use std::fmt;

/// 网关处理请求过程中发生的异常类型。
#[derive(Debug, Clone, PartialEq)]
pub enum Exception {
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行缺少方法、路径或版本。
    MalformedRequest,
    /// 使用了无法识别的 HTTP 方法。对应 `405 Method Not Allowed`。
    UnSupportedRequestMethod,
    /// 客户端使用了服务器不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 请求的路径包含非法字符、越权序列或超出长度上限。对应 `400 Bad Request`。
    InvalidPath,
    /// 请求来自被拦截的爬虫特征或网段。对应 `403 Forbidden`。
    AccessDenied,
    /// 生成服务返回了 429。
    UpstreamThrottled,
    /// 生成服务返回了其他非成功状态码，附带状态码与响应体摘要。
    UpstreamStatus(u16, String),
    /// 网络层错误（连接失败、超时等）。
    UpstreamTransport(String),
    /// 生成服务的响应体不符合约定的结构。
    UpstreamMalformed(String),
    /// 缓存写入失败（磁盘已满、权限错误等）。
    StorageFailed(String),
    /// 配置文件无法解析或包含非法取值。
    ConfigInvalid(String),
}

use Exception::*;

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequest => write!(f, "Malformed request line"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            InvalidPath => write!(f, "Invalid path (400)"),
            AccessDenied => write!(f, "Access denied (403)"),
            UpstreamThrottled => write!(f, "Generation service is rate limiting requests (429)"),
            UpstreamStatus(code, body) => {
                write!(f, "Generation service answered with status {}: {}", code, body)
            }
            UpstreamTransport(msg) => write!(f, "Couldn't reach generation service: {}", msg),
            UpstreamMalformed(msg) => {
                write!(f, "Generation service returned an unexpected body: {}", msg)
            }
            StorageFailed(msg) => write!(f, "Couldn't persist cache entry: {}", msg),
            ConfigInvalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Exception {}
