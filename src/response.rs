// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use crate::{param::*, request::Request, util::HtmlBuilder};

use brotli::enc::{self, backward_references::BrotliEncoderParams};
use bytes::Bytes;
use chrono::prelude::*;
use flate2::{
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use log::{debug, error};

use std::io::{self, Write};

#[derive(Debug, Clone)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    content_type: Option<String>,
    content_length: u64,
    date: DateTime<Utc>,
    content_encoding: Option<HttpEncoding>,
    server_name: String,
    allow: Option<Vec<HttpRequestMethod>>,
    location: Option<String>,
    content: Option<Bytes>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            content_type: None,
            content_length: 0,
            date: Utc::now(),
            content_encoding: None,
            server_name: SERVER_NAME.to_string(),
            allow: Some(ALLOWED_METHODS.to_vec()),
            location: None,
            content: None,
        }
    }

    /// 以指定 MIME 类型返回一段内容，按客户端能力压缩。HEAD 请求只保留头部。
    fn from_body(
        body: Vec<u8>,
        mime: &str,
        accept_encoding: &[HttpEncoding],
        id: u128,
        headonly: bool,
    ) -> Self {
        let mut response = Self::new();
        response.allow = None;
        response.content_encoding = decide_encoding(accept_encoding);
        match response.content_encoding {
            Some(HttpEncoding::Gzip) => debug!("[ID{}]使用Gzip压缩编码", id),
            Some(HttpEncoding::Br) => debug!("[ID{}]使用Brotli压缩编码", id),
            Some(HttpEncoding::Deflate) => debug!("[ID{}]使用Deflate压缩编码", id),
            None => debug!("[ID{}]不进行压缩", id),
        };
        debug!("[ID{}]开始压缩内容，原始大小: {} bytes", id, body.len());
        let content_compressed = match compress(body.clone(), response.content_encoding) {
            Ok(c) => c,
            Err(e) => {
                error!("[ID{}]压缩失败: {}，返回未压缩内容", id, e);
                response.content_encoding = None;
                body
            }
        };
        response.content_length = content_compressed.len() as u64;
        response.content_type = Some(mime.to_string());
        if !headonly {
            response.content = Some(Bytes::from(content_compressed));
        }
        response
    }

    /// 生成页面或落地页
    pub fn from_html(html: &str, request: &Request, id: u128) -> Self {
        let headonly = request.method() == HttpRequestMethod::Head;
        Self::from_body(
            Vec::from(html),
            "text/html;charset=utf-8",
            request.accept_encoding(),
            id,
            headonly,
        )
        .set_date()
        .set_code(200)
        .set_version()
        .set_server_name()
        .to_owned()
    }

    /// 静态文档（robots.txt 等），MIME 由扩展名决定
    pub fn from_static(body: Vec<u8>, extension: &str, request: &Request, id: u128) -> Self {
        let headonly = request.method() == HttpRequestMethod::Head;
        Self::from_body(body, get_mime(extension), request.accept_encoding(), id, headonly)
            .set_date()
            .set_code(200)
            .set_version()
            .set_server_name()
            .to_owned()
    }

    fn from_status_code(code: u16, accept_encoding: &[HttpEncoding], id: u128) -> Self {
        if code == 204 {
            let mut response = Self::new();
            response.allow = Some(ALLOWED_METHODS.to_vec());
            response.set_code(code);
            return response;
        }
        let content = match code {
            400 => HtmlBuilder::from_status_code(400, Some(
                r"<h2>噢！</h2><p>请求的路径只能包含字母、数字、-、_ 和 /。</p>"
            )),
            403 => HtmlBuilder::from_status_code(403, Some(
                r"<h2>噢！</h2><p>自动化访问已被拒绝。</p>"
            )),
            404 => HtmlBuilder::from_status_code(404, Some(
                r"<h2>噢！</h2><p>你指定的网页无法找到。</p>"
            )),
            405 => HtmlBuilder::from_status_code(405, Some(
                r"<h2>噢！</h2><p>本服务器仅支持GET、HEAD和OPTIONS方法。</p>"
            )),
            500 => HtmlBuilder::from_status_code(500, Some(
                r"<h2>噢！</h2><p>服务器出现了一个内部错误。</p>"
            )),
            _ => HtmlBuilder::from_status_code(code, None),
        }
        .build();
        let mut response = Self::from_body(
            content.into_bytes(),
            "text/html;charset=utf-8",
            accept_encoding,
            id,
            false,
        );
        if code == 405 {
            response.allow = Some(ALLOWED_METHODS.to_vec());
        }
        response.set_code(code);
        response
    }

    fn set_date(&mut self) -> &mut Self {
        self.date = Utc::now();
        self
    }

    fn set_version(&mut self) -> &mut Self {
        self.version = HttpVersion::V1_1;
        self
    }

    fn set_server_name(&mut self) -> &mut Self {
        self.server_name = SERVER_NAME.to_string();
        self
    }

    fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&reason) => reason.to_string(),
            None => {
                error!("非法的状态码：{}。这条错误说明代码编写出现了错误。", code);
                "Unknown".to_string()
            }
        };
        self
    }

    /// 按状态码构造错误响应。请求无法解析时没有 `Request` 可用，因此只接收编码列表。
    pub fn from_code(code: u16, accept_encoding: &[HttpEncoding], id: u128) -> Self {
        Self::from_status_code(code, accept_encoding, id)
            .set_date()
            .set_version()
            .set_server_name()
            .to_owned()
    }

    pub fn response_400(request: &Request, id: u128) -> Self {
        Self::from_code(400, request.accept_encoding(), id)
    }

    pub fn response_403(request: &Request, id: u128) -> Self {
        Self::from_code(403, request.accept_encoding(), id)
    }

    pub fn response_405(request: &Request, id: u128) -> Self {
        Self::from_code(405, request.accept_encoding(), id)
    }

    pub fn response_204(request: &Request, id: u128) -> Self {
        Self::from_code(204, request.accept_encoding(), id)
    }

    /// 301 到规范地址
    pub fn redirect(location: &str) -> Self {
        let mut response = Self::new();
        response.allow = None;
        response.location = Some(location.to_string());
        response
            .set_date()
            .set_code(301)
            .set_version()
            .set_server_name()
            .to_owned()
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let version: &str = match self.version {
            HttpVersion::V1_1 => "HTTP/1.1",
        };
        let mut header = String::new();
        header.push_str(&format!(
            "{} {} {}{}",
            version, self.status_code, self.information, CRLF
        ));
        if let Some(t) = &self.content_type {
            header.push_str(&format!("Content-Type: {}{}", t, CRLF));
        }
        if let Some(e) = self.content_encoding {
            header.push_str(&format!("Content-Encoding: {}{}", e, CRLF));
        }
        header.push_str(&format!("Content-Length: {}{}", self.content_length, CRLF));
        header.push_str(&format!("Date: {}{}", format_date(&self.date), CRLF));
        header.push_str(&format!("Server: {}{}", self.server_name, CRLF));
        if let Some(a) = &self.allow {
            let methods: Vec<String> = a.iter().map(|m| m.to_string()).collect();
            header.push_str(&format!("Allow: {}{}", methods.join(", "), CRLF));
        }
        if let Some(l) = &self.location {
            header.push_str(&format!("Location: {}{}", l, CRLF));
        }
        for (name, value) in SECURITY_HEADERS.iter() {
            header.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
        header.push_str(&format!("Connection: close{}", CRLF));
        header.push_str(CRLF);
        [
            header.as_bytes(),
            match &self.content {
                Some(c) => c,
                None => b"",
            },
        ]
        .concat()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc2822()
}

fn compress(data: Vec<u8>, mode: Option<HttpEncoding>) -> io::Result<Vec<u8>> {
    let original_size = data.len();
    let result = match mode {
        Some(HttpEncoding::Gzip) => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Deflate) => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()
        }
        Some(HttpEncoding::Br) => {
            let params = BrotliEncoderParams::default();
            let mut output = Vec::new();
            enc::BrotliCompress(&mut io::Cursor::new(data), &mut output, &params)?;
            Ok(output)
        }
        None => Ok(data),
    };

    if let Ok(ref compressed) = result {
        let compressed_size = compressed.len();
        let ratio = if original_size > 0 {
            ((original_size as i64 - compressed_size as i64) as f64 / original_size as f64) * 100.0
        } else {
            0.0
        };
        debug!(
            "压缩完成: {:?}, 原始大小: {} bytes, 压缩后: {} bytes, 压缩率: {:.1}%",
            mode, original_size, compressed_size, ratio
        );
    }

    result
}

/// 优先级：br > gzip > deflate
fn decide_encoding(accept_encoding: &[HttpEncoding]) -> Option<HttpEncoding> {
    if accept_encoding.contains(&HttpEncoding::Br) {
        Some(HttpEncoding::Br)
    } else if accept_encoding.contains(&HttpEncoding::Gzip) {
        Some(HttpEncoding::Gzip)
    } else if accept_encoding.contains(&HttpEncoding::Deflate) {
        Some(HttpEncoding::Deflate)
    } else {
        None
    }
}

fn get_mime(extension: &str) -> &'static str {
    MIME_TYPES
        .get(extension)
        .copied()
        .unwrap_or("application/octet-stream")
}
