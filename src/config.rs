// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{info, warn};
use std::fs;
use std::io::ErrorKind;
use std::time::Duration;

use crate::exception::Exception;
use crate::param::*;

/// 存储后端类型
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// 每个缓存键一个 JSON 文件，进程重启后仍然有效
    Disk,
    /// 进程内 LRU，容量由 `cache_size` 决定
    Memory,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_local")]
    local: bool,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_static_root")]
    static_root: String,
    #[serde(default = "default_cache_backend")]
    cache_backend: CacheBackend,
    #[serde(default = "default_cache_dir")]
    cache_dir: String,
    #[serde(default = "default_cache_size")]
    cache_size: usize,
    #[serde(default = "default_cache_ttl_secs")]
    cache_ttl_secs: u64,
    #[serde(default = "default_api_url")]
    api_url: String,
    #[serde(default = "default_api_key")]
    api_key: String,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_referer")]
    referer: String,
    #[serde(default = "default_prompt_template")]
    prompt_template: String,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default = "default_max_path_length")]
    max_path_length: usize,
    #[serde(default = "default_max_request_bytes")]
    max_request_bytes: usize,
    #[serde(default = "default_blocked_agents")]
    blocked_agents: Vec<String>,
    #[serde(default = "default_blocked_networks")]
    blocked_networks: Vec<String>,
    #[serde(default)]
    trust_forwarded_for: bool,
}

fn default_port() -> u16 {
    7878
}

fn default_local() -> bool {
    true
}

fn default_static_root() -> String {
    "static".to_string()
}

fn default_cache_backend() -> CacheBackend {
    CacheBackend::Disk
}

fn default_cache_dir() -> String {
    "cache".to_string()
}

fn default_cache_size() -> usize {
    1024
}

fn default_cache_ttl_secs() -> u64 {
    86400 // 24h
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_api_key() -> String {
    "none".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_referer() -> String {
    "http://localhost:9999".to_string()
}

fn default_prompt_template() -> String {
    DEFAULT_PROMPT_TEMPLATE.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_path_length() -> usize {
    200
}

fn default_max_request_bytes() -> usize {
    8192
}

fn default_blocked_agents() -> Vec<String> {
    DEFAULT_BLOCKED_AGENTS.iter().map(|s| s.to_string()).collect()
}

fn default_blocked_networks() -> Vec<String> {
    DEFAULT_BLOCKED_NETWORKS.iter().map(|s| s.to_string()).collect()
}

impl Config {
    pub fn new() -> Self {
        Self {
            port: default_port(),
            local: default_local(),
            worker_threads: num_cpus::get(),
            static_root: default_static_root(),
            cache_backend: default_cache_backend(),
            cache_dir: default_cache_dir(),
            cache_size: default_cache_size(),
            cache_ttl_secs: default_cache_ttl_secs(),
            api_url: default_api_url(),
            api_key: default_api_key(),
            model: default_model(),
            referer: default_referer(),
            prompt_template: default_prompt_template(),
            request_timeout_secs: default_request_timeout_secs(),
            max_path_length: default_max_path_length(),
            max_request_bytes: default_max_request_bytes(),
            blocked_agents: default_blocked_agents(),
            blocked_networks: default_blocked_networks(),
            trust_forwarded_for: false,
        }
    }

    /// 启动时唯一的配置入口：读取 TOML 文件，再叠加环境变量。
    ///
    /// 文件不存在时使用默认配置（只依赖环境变量部署也能运行）；文件存在但无法解析则视为致命错误。
    pub fn load(filename: &str) -> Result<Self, Exception> {
        let config = match fs::read_to_string(filename) {
            Ok(s) => Self::from_toml_str(&s)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("配置文件{}不存在，使用默认配置", filename);
                Self::new()
            }
            Err(e) => {
                return Err(Exception::ConfigInvalid(format!(
                    "无法读取{}: {}",
                    filename, e
                )))
            }
        };
        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self, Exception> {
        let mut raw_config: Config =
            toml::from_str(s).map_err(|e| Exception::ConfigInvalid(e.to_string()))?;
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.cache_size == 0 {
            warn!("cache_size被设置为0，内存缓存不支持零容量，因此该值将被改为{}。", default_cache_size());
            raw_config.cache_size = default_cache_size();
        }
        if raw_config.max_path_length == 0 {
            return Err(Exception::ConfigInvalid("max_path_length不能为0".to_string()));
        }
        if !raw_config.prompt_template.contains("{path}") {
            warn!("prompt_template中没有{{path}}占位符，所有页面将使用同一个提示词");
        }
        Ok(raw_config)
    }

    /// 叠加环境变量。`lookup` 返回 `None` 表示该变量未设置。
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OPENROUTER_API_KEY") {
            info!("使用环境变量中的API Key");
            self.api_key = v;
        }
        if let Some(v) = lookup("OPENROUTER_MODEL") {
            self.model = v;
        }
        if let Some(v) = lookup("PROMPT_TEMPLATE") {
            self.prompt_template = v;
        }
        if let Some(v) = lookup("WEBGEN_CACHE_DIR") {
            self.cache_dir = v;
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn static_root(&self) -> &str {
        &self.static_root
    }

    pub fn cache_backend(&self) -> CacheBackend {
        self.cache_backend
    }

    pub fn cache_dir(&self) -> &str {
        &self.cache_dir
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// 缓存有效期，`None` 表示永久有效
    pub fn cache_ttl(&self) -> Option<Duration> {
        match self.cache_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn referer(&self) -> &str {
        &self.referer
    }

    pub fn prompt_template(&self) -> &str {
        &self.prompt_template
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_path_length(&self) -> usize {
        self.max_path_length
    }

    pub fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    pub fn blocked_agents(&self) -> &[String] {
        &self.blocked_agents
    }

    pub fn blocked_networks(&self) -> &[String] {
        &self.blocked_networks
    }

    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }
}
