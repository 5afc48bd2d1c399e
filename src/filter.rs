// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 爬虫与滥用拦截模块
//!
//! 在任何缓存读写或生成调用之前检查请求元数据：
//! 1. User-Agent 包含黑名单中的任一特征（不区分大小写）即拒绝。
//! 2. 客户端地址落在黑名单网段内即拒绝。
//!
//! 地址无法解析时放行，特征匹配则宁可错杀。

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use ipnet::IpNet;
use log::warn;

use crate::config::Config;

/// 拒绝原因
#[derive(Debug, Clone, PartialEq)]
pub enum DenyReason {
    /// 命中的 User-Agent 特征
    Agent(String),
    /// 命中的网段
    Network(IpNet),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Agent(sig) => write!(f, "user agent matches '{}'", sig),
            DenyReason::Network(net) => write!(f, "client address in {}", net),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone)]
pub struct BotFilter {
    /// 已转为小写的特征串
    agents: Vec<String>,
    networks: Vec<IpNet>,
}

impl BotFilter {
    pub fn new<A, N>(agents: A, networks: N) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        let agents = agents
            .into_iter()
            .map(|a| a.as_ref().trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        let networks = networks
            .into_iter()
            .filter_map(|n| parse_network(n.as_ref().trim()))
            .collect();
        Self { agents, networks }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.blocked_agents(), config.blocked_networks())
    }

    pub fn evaluate(&self, client_addr: &str, user_agent: &str) -> Verdict {
        let agent = user_agent.to_lowercase();
        if let Some(sig) = self.agents.iter().find(|sig| agent.contains(sig.as_str())) {
            return Verdict::Deny(DenyReason::Agent(sig.clone()));
        }

        let ip = match parse_client_addr(client_addr) {
            Some(ip) => ip,
            None => return Verdict::Allow,
        };
        match self.networks.iter().find(|net| net.contains(&ip)) {
            Some(net) => Verdict::Deny(DenyReason::Network(*net)),
            None => Verdict::Allow,
        }
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn network_count(&self) -> usize {
        self.networks.len()
    }
}

/// 解析网段配置，单个地址视为主机网段（/32 或 /128）
fn parse_network(s: &str) -> Option<IpNet> {
    if s.contains('/') {
        match s.parse::<IpNet>() {
            Ok(net) => Some(net),
            Err(e) => {
                warn!("无效的网段配置 '{}': {}", s, e);
                None
            }
        }
    } else {
        match s.parse::<IpAddr>() {
            Ok(ip) => {
                let prefix = if ip.is_ipv4() { 32 } else { 128 };
                IpNet::new(ip, prefix).ok()
            }
            Err(e) => {
                warn!("无效的地址配置 '{}': {}", s, e);
                None
            }
        }
    }
}

/// 兼容 `1.2.3.4`、`1.2.3.4:5678`、`[::1]:80` 等写法；IPv4 映射的 IPv6 地址还原为 IPv4。
fn parse_client_addr(s: &str) -> Option<IpAddr> {
    let s = s.trim();
    let ip = match s.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(_) => s.parse::<SocketAddr>().ok()?.ip(),
    };
    Some(ip.to_canonical())
}
