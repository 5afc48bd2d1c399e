// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 连接处理模块
//!
//! 负责单个 TCP 连接的完整生命周期：读取并解析请求、分派到静态路由或网关、
//! 构建响应并写回，最后输出一条访问日志。每个连接只处理一个请求（`Connection: close`）。

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::{
    config::Config,
    exception::Exception,
    gateway::{Gateway, Outcome},
    param::*,
    path::strip_query,
    request::Request,
    response::Response,
    util::HtmlBuilder,
};

/// 所有连接共享的运行时状态
pub struct ServerState {
    config: Arc<Config>,
    gateway: Gateway,
    active_connections: AtomicUsize,
}

impl ServerState {
    pub fn new(config: Arc<Config>, gateway: Gateway) -> Self {
        Self {
            config,
            gateway,
            active_connections: AtomicUsize::new(0),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// 主事件循环：持续接收新连接并分发给 Tokio 任务处理，直到 `shutdown` 被置位。
///
/// 停机标志只在两次 accept 之间检查，因此置位后还会再处理一个连接。
pub async fn serve(listener: TcpListener, state: Arc<ServerState>, shutdown: Arc<AtomicBool>) {
    let mut id: u128 = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!("主循环接收到停机指令，正在退出...");
            break;
        }

        let (mut stream, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("接受连接失败：{}", e);
                continue;
            }
        };
        debug!("[ID{}]TCP连接已建立：{}", id, addr);

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state.active_connections.fetch_add(1, Ordering::Relaxed);
            handle_connection(&mut stream, addr, id, &state).await;
            state.active_connections.fetch_sub(1, Ordering::Relaxed);
        });
        id += 1;
    }
}

/// 读取请求头，直到空行、对端关闭或超出上限。超出上限时返回 `None`。
async fn read_head(stream: &mut TcpStream, limit: usize) -> std::io::Result<Option<Vec<u8>>> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(Some(buffer));
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.len() > limit {
            return Ok(None);
        }
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(Some(buffer));
        }
    }
}

/// # 连接处理器
pub async fn handle_connection(stream: &mut TcpStream, peer: SocketAddr, id: u128, state: &ServerState) {
    let start_time = Instant::now();
    let config = &state.config;

    let read = tokio::time::timeout(config.request_timeout(), read_head(stream, config.max_request_bytes())).await;
    let buffer = match read {
        Ok(Ok(Some(buffer))) if buffer.is_empty() => return,
        Ok(Ok(Some(buffer))) => buffer,
        Ok(Ok(None)) => {
            warn!("[ID{}]请求头超过{}字节，拒绝处理", id, config.max_request_bytes());
            let response = Response::from_code(413, &[], id);
            send(stream, &response, id).await;
            access_log(id, &peer.to_string(), "-", "-", &response, "too large", "-");
            return;
        }
        Ok(Err(e)) => {
            error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
            return;
        }
        Err(_) => {
            warn!("[ID{}]读取请求超时", id);
            return;
        }
    };
    debug!("[ID{}]HTTP请求接收完毕，{}字节", id, buffer.len());

    let request = match Request::try_from(&buffer, id) {
        Ok(req) => req.with_peer(&peer.to_string()),
        Err(e) => {
            let code = match e {
                Exception::UnSupportedRequestMethod => 405,
                _ => 400,
            };
            error!("[ID{}]解析HTTP请求失败: {}", id, e);
            let response = Response::from_code(code, &[], id);
            send(stream, &response, id).await;
            access_log(id, &peer.to_string(), "-", "-", &response, "malformed", "-");
            return;
        }
    };
    debug!("[ID{}]成功解析HTTP请求", id);

    let (response, label) = dispatch(&request, id, state).await;
    send(stream, &response, id).await;

    let client = request.client_addr(config.trust_forwarded_for()).to_string();
    access_log(
        id,
        &client,
        &request.method().to_string(),
        request.path(),
        &response,
        label,
        request.user_agent(),
    );
    debug!("[ID{}]请求处理耗时: {:?}", id, start_time.elapsed());
}

/// 按方法与路由选择处理方式，返回响应与访问日志标签
async fn dispatch(request: &Request, id: u128, state: &ServerState) -> (Response, &'static str) {
    let method = request.method();
    if !ALLOWED_METHODS.contains(&method) {
        warn!("[ID{}]不允许的请求方法：{}", id, method);
        return (Response::response_405(request, id), "method not allowed");
    }
    if method == HttpRequestMethod::Options {
        return (Response::response_204(request, id), "options");
    }

    // 静态路由不经过拦截器，爬虫需要能读到排除协议
    let route = strip_query(request.path());
    if route == ROBOTS_ROUTE || route == LANDING_ROUTE {
        let (body, extension) = read_static(route, state.config.static_root(), id).await;
        return (Response::from_static(body, extension, request, id), "static");
    }

    let client = request.client_addr(state.config.trust_forwarded_for());
    let outcome = state
        .gateway
        .handle(id, client, request.user_agent(), request.path())
        .await;
    let label = outcome.label();
    let response = match outcome {
        Outcome::Denied(_) => Response::response_403(request, id),
        Outcome::BadPath => Response::response_400(request, id),
        Outcome::Redirect(location) => Response::redirect(&location),
        Outcome::Page { html, .. } => Response::from_html(&html, request, id),
    };
    (response, label)
}

/// 读取 `static_root` 下的静态文档，缺失时退回内置版本
async fn read_static(route: &str, root: &str, id: u128) -> (Vec<u8>, &'static str) {
    let (name, extension) = if route == ROBOTS_ROUTE {
        ("robots.txt", "txt")
    } else {
        ("index.html", "html")
    };
    let file = Path::new(root).join(name);
    match tokio::fs::read(&file).await {
        Ok(body) => (body, extension),
        Err(e) => {
            debug!("[ID{}]无法读取{}（{}），使用内置版本", id, file.display(), e);
            let body = if route == ROBOTS_ROUTE {
                DEFAULT_ROBOTS_TXT.to_string()
            } else {
                HtmlBuilder::from_page("webgen", DEFAULT_LANDING_BODY).build()
            };
            (body.into_bytes(), extension)
        }
    }
}

async fn send(stream: &mut TcpStream, response: &Response, id: u128) {
    let bytes = response.as_bytes();
    debug!("[ID{}]发送响应，长度: {}", id, bytes.len());
    if let Err(e) = stream.write_all(&bytes).await {
        error!("[ID{}]写入响应失败: {}", id, e);
        return;
    }
    let _ = stream.flush().await;
}

fn access_log(
    id: u128,
    client: &str,
    method: &str,
    path: &str,
    response: &Response,
    label: &str,
    user_agent: &str,
) {
    info!(
        "[ID{}]{} \"{} {}\" {} {} ({}) \"{}\"",
        id,
        client,
        method,
        path,
        response.status_code(),
        response.information(),
        label,
        user_agent
    );
}
