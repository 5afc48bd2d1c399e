// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 产物存储模块
//!
//! 以缓存键为索引持久化生成好的 HTML 片段。对外只暴露 `ArtifactStore` 的 `get`/`put`，
//! 网关不关心背后是磁盘还是内存，替换实现无需改动编排逻辑。
//!
//! - `DiskStore`：每个键一个 `<key>.json`，内容为 `{content, timestamp}`。
//!   写入先落到同目录的临时文件再 rename，并发读者不会读到写了一半的条目。
//! - `MemoryStore`：进程内 LRU，容量有界，超出后淘汰最久未使用的条目。
//!
//! 过期只在读取时判定：过期条目对调用方不可见，但不会被主动删除。

use std::io::{ErrorKind, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, warn};
use lru::LruCache;
use serde_derive::{Deserialize, Serialize};

use crate::{
    config::{CacheBackend, Config},
    exception::Exception,
    key::CacheKey,
    path::sanitize_lenient,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// 在 `now` 时刻该条目是否仍在有效期内。`ttl` 为 `None` 表示永不过期。
    pub fn is_fresh(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        match ttl {
            None => true,
            Some(ttl) => {
                let window = TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::max_value());
                now.signed_duration_since(self.timestamp) < window
            }
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// 读取有效条目。不存在、已过期或无法解析都视为 `None`。
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// 写入（覆盖）条目，时间戳取当前时间。
    async fn put(&self, key: &CacheKey, content: &str) -> Result<(), Exception>;
}

/// 根据配置构造存储后端
pub fn open_store(config: &Config) -> Result<Arc<dyn ArtifactStore>, Exception> {
    match config.cache_backend() {
        CacheBackend::Disk => Ok(Arc::new(DiskStore::open(config.cache_dir(), config.cache_ttl())?)),
        CacheBackend::Memory => Ok(Arc::new(MemoryStore::from_capacity(
            config.cache_size(),
            config.cache_ttl(),
        ))),
    }
}

pub struct DiskStore {
    dir: PathBuf,
    ttl: Option<Duration>,
}

impl DiskStore {
    /// 打开（必要时创建）缓存目录
    pub fn open<P: AsRef<Path>>(dir: P, ttl: Option<Duration>) -> Result<Self, Exception> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Exception::StorageFailed(format!("无法创建缓存目录{}: {}", dir.display(), e))
        })?;
        Ok(Self { dir, ttl })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 条目文件路径。键本身已是十六进制，这里再过一遍宽松规范化，保证文件名不会越出缓存目录。
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let name = sanitize_lenient(key.as_str());
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl ArtifactStore for DiskStore {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("读取缓存文件{}失败: {}", path.display(), e);
                return None;
            }
        };
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("缓存文件{}已损坏，视为未命中: {}", path.display(), e);
                return None;
            }
        };
        if entry.is_fresh(self.ttl, Utc::now()) {
            Some(entry)
        } else {
            debug!("缓存条目{}已过期", key);
            None
        }
    }

    async fn put(&self, key: &CacheKey, content: &str) -> Result<(), Exception> {
        let entry = CacheEntry::new(content);
        let data = serde_json::to_vec(&entry).map_err(|e| Exception::StorageFailed(e.to_string()))?;
        let dir = self.dir.clone();
        let target = self.entry_path(key);

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = tempfile::Builder::new()
                .prefix(".tmp-")
                .suffix(".json")
                .tempfile_in(&dir)?;
            file.write_all(&data)?;
            file.as_file().sync_all()?;
            file.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| Exception::StorageFailed(e.to_string()))?
        .map_err(|e| Exception::StorageFailed(e.to_string()))
    }
}

pub struct MemoryStore {
    cache: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttl: Option<Duration>,
}

impl MemoryStore {
    // 根据容量构造
    pub fn from_capacity(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = match NonZeroUsize::new(capacity) {
            Some(c) => c,
            None => panic!("调用from_capacity时指定的大小是0。如果需要自动设置大小，请在调用处进行处理，而不是传入0"),
        };
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // 放入指定时间戳的条目
    pub fn push(&self, key: &CacheKey, entry: CacheEntry) {
        self.lock().put(key.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut cache = self.lock();
        match cache.get(key) {
            Some(entry) if entry.is_fresh(self.ttl, Utc::now()) => Some(entry.clone()),
            Some(_) => {
                debug!("缓存条目{}已过期", key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &CacheKey, content: &str) -> Result<(), Exception> {
        self.push(key, CacheEntry::new(content));
        Ok(())
    }
}
