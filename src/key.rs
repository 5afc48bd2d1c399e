// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 缓存键派生：对规范路径做 SHA-256，渲染为 64 位定长十六进制字符串。
//! 不加任何进程级盐值，进程重启后同一路径得到同一个键。

use std::fmt;

use sha2::{Digest, Sha256};

use crate::path::CanonicalPath;

/// 摘要的十六进制长度
pub const KEY_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn derive_key(path: &CanonicalPath) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(path.as_str().as_bytes());
    CacheKey(hex::encode(hasher.finalize().to_vec()))
}
