// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求编排模块
//!
//! 每个请求按顺序经过：拦截 -> 路径校验 -> 查缓存 -> 生成 -> 落盘 -> 响应，
//! 在第一个适用的出口处终止。拦截与非法路径直接短路，不触碰存储和生成器。
//!
//! 同一个缓存键的并发未命中会在按键划分的异步锁上排队，拿到锁后再查一次缓存，
//! 因此条目生成期间同一个键只会发起一次出站调用。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    cache::ArtifactStore,
    config::Config,
    exception::Exception,
    filter::{BotFilter, DenyReason, Verdict},
    generator::Generate,
    key::{derive_key, CacheKey},
    path::{has_page_suffix, sanitize_strict, strip_query, CanonicalPath},
    util::HtmlBuilder,
};

/// 页面内容的来源
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Source {
    Cache,
    Generated,
    /// 生成失败，返回的是错误片段，未写入缓存
    Degraded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Denied(DenyReason),
    BadPath,
    /// 301 的目标地址
    Redirect(String),
    Page {
        path: CanonicalPath,
        html: String,
        source: Source,
    },
}

impl Outcome {
    /// 访问日志中使用的简短标签
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Denied(_) => "denied",
            Outcome::BadPath => "invalid",
            Outcome::Redirect(_) => "redirect",
            Outcome::Page { source: Source::Cache, .. } => "cache hit",
            Outcome::Page { source: Source::Generated, .. } => "generated",
            Outcome::Page { source: Source::Degraded, .. } => "degraded",
        }
    }
}

#[derive(Default)]
struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
    generations: AtomicU64,
    upstream_failures: AtomicU64,
    denials: AtomicU64,
    storage_failures: AtomicU64,
}

/// 计数器快照，供管理控制台展示
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub generations: u64,
    pub upstream_failures: u64,
    pub denials: u64,
    pub storage_failures: u64,
}

/// 按缓存键划分的 single-flight 锁表
#[derive(Default)]
struct KeyLocks {
    slots: Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
}

/// 持有期间同一个键的其他请求只能等待；释放时若无人再引用该键的锁，则从锁表中移除。
struct FlightPermit<'a> {
    locks: &'a KeyLocks,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    fn slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<AsyncMutex<()>>>> {
        match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn acquire(&self, key: &CacheKey) -> FlightPermit<'_> {
        let slot = Arc::clone(
            self.slots()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        );
        // 先创建许可再等待：等待中被取消时，许可的 Drop 同样会清理锁表
        let mut permit = FlightPermit {
            locks: self,
            key: key.clone(),
            guard: None,
        };
        permit.guard = Some(slot.lock_owned().await);
        permit
    }

    fn len(&self) -> usize {
        self.slots().len()
    }
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots();
        drop(self.guard.take());
        let idle = match slots.get(&self.key) {
            Some(slot) => Arc::strong_count(slot) == 1,
            None => false,
        };
        if idle {
            slots.remove(&self.key);
        }
    }
}

pub struct Gateway {
    config: Arc<Config>,
    filter: BotFilter,
    store: Arc<dyn ArtifactStore>,
    generator: Arc<dyn Generate>,
    locks: KeyLocks,
    stats: Stats,
}

impl Gateway {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ArtifactStore>,
        generator: Arc<dyn Generate>,
    ) -> Self {
        let filter = BotFilter::from_config(&config);
        info!(
            "拦截规则已载入：{}条User-Agent特征，{}个网段",
            filter.agent_count(),
            filter.network_count()
        );
        Self {
            config,
            filter,
            store,
            generator,
            locks: KeyLocks::default(),
            stats: Stats::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 处理一次页面请求。`raw_path` 为请求行中的原始路径。
    pub async fn handle(
        &self,
        id: u128,
        client_addr: &str,
        user_agent: &str,
        raw_path: &str,
    ) -> Outcome {
        if let Verdict::Deny(reason) = self.filter.evaluate(client_addr, user_agent) {
            self.stats.denials.fetch_add(1, Ordering::Relaxed);
            warn!("[ID{}]{}：来自{}，{}", id, Exception::AccessDenied, client_addr, reason);
            return Outcome::Denied(reason);
        }

        let suffixed = has_page_suffix(raw_path);
        let candidate = if suffixed {
            raw_path
        } else {
            strip_query(raw_path).trim_end_matches('/')
        };
        let path = match sanitize_strict(candidate, self.config.max_path_length()) {
            Ok(p) => p,
            Err(e) => {
                debug!("[ID{}]路径校验失败：{:?}，{}", id, raw_path, e);
                return Outcome::BadPath;
            }
        };
        if !suffixed {
            let location = path.location();
            debug!("[ID{}]重定向到规范地址{}", id, location);
            return Outcome::Redirect(location);
        }

        self.serve(id, path).await
    }

    async fn serve(&self, id: u128, path: CanonicalPath) -> Outcome {
        let key = derive_key(&path);
        if let Some(entry) = self.store.get(&key).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!("[ID{}]缓存命中：{}", id, path);
            return render(path, &entry.content, Source::Cache);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        debug!("[ID{}]缓存未命中：{}", id, path);

        let _permit = self.locks.acquire(&key).await;
        // 排队期间别的请求可能已经生成完毕
        if let Some(entry) = self.store.get(&key).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!("[ID{}]等待期间条目已生成：{}", id, path);
            return render(path, &entry.content, Source::Cache);
        }

        let generation = self.generator.generate(&path).await;
        self.stats.generations.fetch_add(1, Ordering::Relaxed);

        if !generation.is_cacheable() {
            self.stats.upstream_failures.fetch_add(1, Ordering::Relaxed);
            if let Some(e) = &generation.error {
                warn!("[ID{}]生成{}失败，返回错误片段且不写入缓存：{}", id, path, e);
            }
            return render(path, &generation.content, Source::Degraded);
        }

        if let Err(e) = self.store.put(&key, &generation.content).await {
            self.stats.storage_failures.fetch_add(1, Ordering::Relaxed);
            error!("[ID{}]写入缓存{}失败：{}", id, key, e);
        }
        render(path, &generation.content, Source::Generated)
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            generations: self.stats.generations.load(Ordering::Relaxed),
            upstream_failures: self.stats.upstream_failures.load(Ordering::Relaxed),
            denials: self.stats.denials.load(Ordering::Relaxed),
            storage_failures: self.stats.storage_failures.load(Ordering::Relaxed),
        }
    }

    /// 当前正在生成（或排队等待生成）的键数量
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }
}

fn render(path: CanonicalPath, fragment: &str, source: Source) -> Outcome {
    let html = HtmlBuilder::from_page(&path.title(), fragment).build();
    Outcome::Page { path, html, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, MockArtifactStore};
    use crate::generator::{Generation, MockGenerate};

    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/126.0";
    const CLIENT: &str = "203.0.113.9:40000";

    fn gateway(store: impl ArtifactStore + 'static, generator: impl Generate + 'static) -> Gateway {
        Gateway::new(Arc::new(Config::new()), Arc::new(store), Arc::new(generator))
    }

    fn memory() -> MemoryStore {
        MemoryStore::from_capacity(16, None)
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_slot() {
        let locks = KeyLocks::default();
        let key = derive_key(&sanitize_strict("about", 200).unwrap());

        let held = locks.acquire(&key).await;
        let mut waiter = Box::pin(locks.acquire(&key));
        let early = tokio::time::timeout(Duration::from_millis(20), &mut waiter).await;
        assert!(early.is_err());
        assert_eq!(locks.len(), 1);

        // 持有者先释放，排队者随后被取消
        drop(held);
        drop(waiter);
        assert_eq!(locks.len(), 0);
    }

    fn page_source(outcome: &Outcome) -> Option<Source> {
        match outcome {
            Outcome::Page { source, .. } => Some(*source),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_denied_agent_touches_nothing() {
        // 未设置任何期望，一旦被调用 mock 就会 panic
        let gw = gateway(MockArtifactStore::new(), MockGenerate::new());

        let outcome = gw.handle(1, CLIENT, "Googlebot/2.1", "/home.html").await;

        assert!(matches!(outcome, Outcome::Denied(DenyReason::Agent(_))));
        assert_eq!(gw.stats().denials, 1);
    }

    #[tokio::test]
    async fn test_denied_network_touches_nothing() {
        let gw = gateway(MockArtifactStore::new(), MockGenerate::new());

        let outcome = gw.handle(1, "66.249.66.1:5000", BROWSER, "/home.html").await;

        assert!(matches!(outcome, Outcome::Denied(DenyReason::Network(_))));
    }

    #[tokio::test]
    async fn test_bad_path_touches_nothing() {
        let gw = gateway(MockArtifactStore::new(), MockGenerate::new());

        for raw in ["/../etc/passwd", "/a<b>.html", "/blog//x.html", "/x%00.html"] {
            assert_eq!(gw.handle(1, CLIENT, BROWSER, raw).await, Outcome::BadPath, "{}", raw);
        }
    }

    #[tokio::test]
    async fn test_redirect_to_canonical_suffix() {
        let gw = gateway(MockArtifactStore::new(), MockGenerate::new());

        assert_eq!(
            gw.handle(1, CLIENT, BROWSER, "/blog/my-post").await,
            Outcome::Redirect("/blog/my-post.html".to_string())
        );
        assert_eq!(
            gw.handle(1, CLIENT, BROWSER, "/blog/my-post/?ref=x").await,
            Outcome::Redirect("/blog/my-post.html".to_string())
        );
        assert_eq!(gw.handle(1, CLIENT, BROWSER, "/bad path").await, Outcome::BadPath);
    }

    #[tokio::test]
    async fn test_miss_generates_and_persists_once() {
        let mut store = MockArtifactStore::new();
        store.expect_get().times(2).returning(|_| None);
        store
            .expect_put()
            .times(1)
            .withf(|key, content| key.as_str().len() == 64 && content == "<h1>Home</h1>")
            .returning(|_, _| Ok(()));
        let mut generator = MockGenerate::new();
        generator
            .expect_generate()
            .times(1)
            .withf(|path| path.is_home())
            .returning(|_| Generation::success("p".to_string(), "<h1>Home</h1>".to_string()));
        let gw = gateway(store, generator);

        let outcome = gw.handle(1, CLIENT, BROWSER, "/").await;

        match outcome {
            Outcome::Page { path, html, source } => {
                assert!(path.is_home());
                assert_eq!(source, Source::Generated);
                assert!(html.contains("<title>Home</title>"));
                assert!(html.contains("<h1>Home</h1>"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let stats = gw.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.generations, 1);
    }

    #[tokio::test]
    async fn test_second_request_served_from_cache() {
        let mut generator = MockGenerate::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| Generation::success("p".to_string(), "<p>about</p>".to_string()));
        let gw = gateway(memory(), generator);

        let first = gw.handle(1, CLIENT, BROWSER, "/about.html").await;
        let second = gw.handle(2, CLIENT, BROWSER, "/about.html").await;

        assert_eq!(page_source(&first), Some(Source::Generated));
        assert_eq!(page_source(&second), Some(Source::Cache));
        assert_eq!(gw.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_throttled_generation_is_not_cached() {
        let mut store = MockArtifactStore::new();
        store.expect_get().times(2).returning(|_| None);
        store.expect_put().never();
        let mut generator = MockGenerate::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| Generation::failure("p".to_string(), Exception::UpstreamThrottled));
        let gw = gateway(store, generator);

        let outcome = gw.handle(1, CLIENT, BROWSER, "/busy.html").await;

        match outcome {
            Outcome::Page { html, source, .. } => {
                assert_eq!(source, Source::Degraded);
                assert!(html.contains("Too many requests"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(gw.stats().upstream_failures, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_still_serves_page() {
        let mut store = MockArtifactStore::new();
        store.expect_get().returning(|_| None);
        store
            .expect_put()
            .times(1)
            .returning(|_, _| Err(Exception::StorageFailed("disk full".to_string())));
        let mut generator = MockGenerate::new();
        generator
            .expect_generate()
            .returning(|_| Generation::success("p".to_string(), "<p>ok</p>".to_string()));
        let gw = gateway(store, generator);

        let outcome = gw.handle(1, CLIENT, BROWSER, "/ok.html").await;

        assert_eq!(page_source(&outcome), Some(Source::Generated));
        assert_eq!(gw.stats().storage_failures, 1);
    }

    #[tokio::test]
    async fn test_outcome_labels() {
        let gw = gateway(MockArtifactStore::new(), MockGenerate::new());
        assert_eq!(gw.handle(1, CLIENT, "GPTBot", "/").await.label(), "denied");
        assert_eq!(gw.handle(1, CLIENT, BROWSER, "/a..b.html").await.label(), "invalid");
        assert_eq!(gw.handle(1, CLIENT, BROWSER, "/a").await.label(), "redirect");
    }

    /// 慢速生成器，记录调用次数
    struct SlowGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generate for SlowGenerator {
        async fn generate(&self, path: &CanonicalPath) -> Generation {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Generation::success(String::new(), format!("<p>{}</p>", path))
        }
    }

    #[tokio::test]
    async fn test_concurrent_misses_generate_once() {
        let generator = Arc::new(SlowGenerator { calls: AtomicUsize::new(0) });
        let gw = Arc::new(Gateway::new(
            Arc::new(Config::new()),
            Arc::new(memory()),
            generator.clone(),
        ));

        let mut handles = Vec::new();
        for id in 0..5u128 {
            let gw = Arc::clone(&gw);
            handles.push(tokio::spawn(async move {
                gw.handle(id, CLIENT, BROWSER, "/popular.html").await
            }));
        }
        let mut sources = Vec::new();
        for handle in handles {
            sources.push(page_source(&handle.await.unwrap()).unwrap());
        }

        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sources.iter().filter(|s| **s == Source::Generated).count(), 1);
        assert_eq!(sources.iter().filter(|s| **s == Source::Cache).count(), 4);
        assert_eq!(gw.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_serialise() {
        let generator = Arc::new(SlowGenerator { calls: AtomicUsize::new(0) });
        let gw = Arc::new(Gateway::new(
            Arc::new(Config::new()),
            Arc::new(memory()),
            generator.clone(),
        ));

        let a = {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move { gw.handle(1, CLIENT, BROWSER, "/a.html").await })
        };
        let b = {
            let gw = Arc::clone(&gw);
            tokio::spawn(async move { gw.handle(2, CLIENT, BROWSER, "/b.html").await })
        };
        assert_eq!(page_source(&a.await.unwrap()), Some(Source::Generated));
        assert_eq!(page_source(&b.await.unwrap()), Some(Source::Generated));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(gw.in_flight(), 0);
    }
}
