// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路径规范化模块
//!
//! 将任意请求路径归一化为安全、有界的规范标识（`CanonicalPath`）。
//!
//! 两种模式：
//! - **严格模式**：用于路由决策。剥离 `.html` 后缀后必须完整匹配 `[a-zA-Z0-9-_/]+`，
//!   且 `/` 只能作为单层分隔符出现，否则返回 `Exception::InvalidPath`。
//! - **宽松模式**：只用于派生存储文件名，删除 `[a-zA-Z0-9-_.]` 以外的一切字符而不报错。
//!
//! 两种模式都是纯函数，空路径统一映射为保留标识 `home`。

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::{exception::Exception, param::*};

lazy_static! {
    static ref STRICT_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9\-_/]+$").unwrap();
    static ref LENIENT_STRIP: Regex = Regex::new(r"[^a-zA-Z0-9\-_.]").unwrap();
}

/// 经过校验的规范路径。只能通过本模块的函数构造。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_home(&self) -> bool {
        self.0 == HOME_PATH
    }

    /// 页面标题：`-` 换成空格，`/` 换成 ` - `，每个单词首字母大写。
    pub fn title(&self) -> String {
        let spaced = self.0.replace('-', " ").replace('/', " - ");
        title_case(&spaced)
    }

    /// 规范的对外地址，例如 `blog/my-post` -> `/blog/my-post.html`
    pub fn location(&self) -> String {
        format!("/{}{}", self.0, PAGE_SUFFIX)
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 去掉查询字符串与片段标识
pub fn strip_query(raw: &str) -> &str {
    match raw.find(|c: char| c == '?' || c == '#') {
        Some(i) => &raw[..i],
        None => raw,
    }
}

/// 严格模式。`raw` 为请求行中的原始路径（可带前导 `/` 与查询字符串）。
pub fn sanitize_strict(raw: &str, max_len: usize) -> Result<CanonicalPath, Exception> {
    let path = strip_query(raw);
    let path = path.strip_prefix('/').unwrap_or(path);
    if path.is_empty() {
        return Ok(CanonicalPath(HOME_PATH.to_string()));
    }
    let path = path.strip_suffix(PAGE_SUFFIX).unwrap_or(path);

    if path.is_empty() || path.len() > max_len {
        return Err(Exception::InvalidPath);
    }
    if !STRICT_PATTERN.is_match(path) {
        return Err(Exception::InvalidPath);
    }
    // 前导、结尾或连续的 `/` 都会产生空段
    if path.split('/').any(|segment| segment.is_empty()) {
        return Err(Exception::InvalidPath);
    }
    Ok(CanonicalPath(path.to_string()))
}

/// 宽松模式：只删不拒。结果中不会出现 `..` 与任何分隔符。
pub fn sanitize_lenient(raw: &str) -> CanonicalPath {
    let stripped = LENIENT_STRIP.replace_all(strip_query(raw), "");
    let mut cleaned = stripped.into_owned();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        CanonicalPath(HOME_PATH.to_string())
    } else {
        CanonicalPath(cleaned.to_string())
    }
}

/// 原始路径是否已经带有规范文档后缀（或为根路径）
pub fn has_page_suffix(raw: &str) -> bool {
    let path = strip_query(raw);
    path == "/" || path.is_empty() || path.ends_with(PAGE_SUFFIX)
}

/// 逐词首字母大写，其余字母小写
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = !c.is_alphanumeric();
        }
    }
    out
}
