// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 按需生成内容的网关
//!
//! 该二进制基于 Tokio 运行时启动网关服务。
//! 核心功能包括：
//! - 规范路径上的页面缓存（磁盘或内存 LRU）
//! - 缓存未命中时调用外部文本生成服务
//! - 爬虫与滥用拦截
//! - 后台管理控制台（CLI 指令交互）

use webgen::{
    cache::open_store,
    config::Config,
    gateway::Gateway,
    generator::OpenRouterClient,
    server::{self, ServerState},
};

use log::{error, info, warn, LevelFilter};
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
    runtime::Builder,
};

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

const LOG_CONFIG: &str = "config/log4rs.yaml";
const DEFAULT_CONFIG: &str = "config/development.toml";

/// YAML 配置缺失时使用的控制台日志
fn init_logging() {
    if log4rs::init_file(LOG_CONFIG, Default::default()).is_ok() {
        return;
    }
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {h({l})} - {m}{n}",
        )))
        .build();
    let fallback = log4rs::Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info));
    match fallback {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("无法初始化日志系统：{}", e);
            }
        }
        Err(e) => eprintln!("无法初始化日志系统：{}", e),
    }
    warn!("未找到{}，使用默认的控制台日志配置", LOG_CONFIG);
}

/// # 程序入口点
///
/// 初始化日志、加载配置、构建存储与生成器，然后启动主事件循环。
fn main() {
    // 1. 初始化日志系统
    init_logging();

    // 2. 环境配置加载：第一个命令行参数可以覆盖配置文件路径
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("无法载入配置文件{}：{}", config_path, e);
            process::exit(1);
        }
    };
    info!("配置文件已载入：{}", config_path);

    // 3. 异步运行时定制：根据配置文件分配工作线程数
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建异步运行时：{}", e);
            process::exit(1);
        }
    };

    runtime.block_on(run(config));
}

async fn run(config: Arc<Config>) {
    // 4. 共享资源初始化
    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => {
            error!("无法初始化缓存：{}", e);
            process::exit(1);
        }
    };
    info!("缓存后端：{:?}，目录：{}", config.cache_backend(), config.cache_dir());
    let generator = match OpenRouterClient::from_config(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("无法初始化生成服务客户端：{}", e);
            process::exit(1);
        }
    };
    if config.api_key() == "none" {
        warn!("未配置API密钥，生成服务很可能会拒绝请求");
    }
    info!("生成服务：{}，模型：{}", config.api_url(), config.model());
    let gateway = Gateway::new(Arc::clone(&config), store, generator);
    let state = Arc::new(ServerState::new(Arc::clone(&config), gateway));

    // 5. 网络层初始化：支持全地址监听或本地回环监听
    let port: u16 = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    info!("服务端将在{}:{}上监听Socket连接", address, port);
    let listener = match TcpListener::bind(SocketAddrV4::new(address, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            process::exit(1);
        }
    };
    info!("端口{}绑定完成", port);

    // 6. 启动交互式管理控制台任务
    let shutdown = Arc::new(AtomicBool::new(false));
    tokio::spawn({
        let shutdown = Arc::clone(&shutdown);
        let state = Arc::clone(&state);
        async move {
            let mut reader = BufReader::new(tokio::io::stdin());
            let mut input = String::new();
            loop {
                input.clear();
                match reader.read_line(&mut input).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                match input.trim() {
                    "stop" => {
                        shutdown.store(true, Ordering::SeqCst);
                        println!("停机指令已激活，服务器将在处理完下一个请求后关闭...");
                        break;
                    }
                    "help" => {
                        println!("== webgen Help ==");
                        println!("stop   - 发出停机信号");
                        println!("status - 查看当前服务器运行状态");
                        println!("help   - 显示此帮助信息");
                        println!("=================");
                    }
                    "status" => {
                        let stats = state.gateway().stats();
                        println!("== webgen 状态 ===");
                        println!("当前活跃连接数: {}", state.active_connections());
                        println!("缓存命中: {}", stats.hits);
                        println!("缓存未命中: {}", stats.misses);
                        println!("生成次数: {}", stats.generations);
                        println!("生成失败: {}", stats.upstream_failures);
                        println!("拦截次数: {}", stats.denials);
                        println!("缓存写入失败: {}", stats.storage_failures);
                        println!("=================");
                    }
                    "" => {}
                    cmd => println!("无效的命令：{}", cmd),
                }
            }
        }
    });

    // 7. 主事件循环
    server::serve(listener, state, shutdown).await;
}
