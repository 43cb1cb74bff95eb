//! # 示例应用程序
//!
//! 演示如何把配置文件与环境变量聚合为一个实时更新的配置文档

use anyhow::Context;
use clap::Parser;
use config_abstractions::ConfigSource;
use config_impl::{ConfigAggregator, ConfigOptions, EnvironmentSource, FileSource, ValueWatcher};
use infrastructure_common::ConfigError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "example-app")]
#[command(about = "Lorn ADSP 配置聚合示例应用")]
struct Args {
    /// 配置文件路径，可重复指定，后指定的优先级更高
    #[arg(short, long = "file")]
    files: Vec<String>,

    /// 环境变量前缀，指定后环境变量拥有最高优先级
    #[arg(long)]
    env_prefix: Option<String>,

    /// 需要监听的配置路径，以 `.` 分隔，可重复指定
    #[arg(short, long = "watch")]
    watch_paths: Vec<String>,

    /// 配置源重试间隔（毫秒）
    #[arg(long, default_value_t = 1000)]
    retry_ms: u64,

    /// 日志级别，RUST_LOG 优先
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 以 JSON 格式输出日志
    #[arg(long)]
    json_logs: bool,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerConfig {
    host: String,
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("启动 Lorn ADSP 配置聚合示例应用");

    let aggregator = build_aggregator(&args)?;
    print_configuration(&aggregator).await?;

    let mut watchers = Vec::new();
    let mut tasks = Vec::new();
    for path in &args.watch_paths {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let watcher = Arc::new(aggregator.watch(&segments).await?);
        info!("监听配置路径: {}", path);
        tasks.push(tokio::spawn(watch_loop(Arc::clone(&watcher), path.clone())));
        watchers.push(watcher);
    }

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，正在关闭应用");

    for watcher in &watchers {
        watcher.stop().await?;
    }
    for task in tasks {
        task.await?;
    }
    aggregator.close()?;

    info!("应用已关闭");
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// 构建聚合器
fn build_aggregator(args: &Args) -> anyhow::Result<ConfigAggregator> {
    let mut options =
        ConfigOptions::new().with_retry_interval(Duration::from_millis(args.retry_ms));

    for file in &args.files {
        let source = FileSource::new(file).with_context(|| format!("无法使用配置文件 {}", file))?;
        info!("添加配置源: {}", source.name());
        options = options.with_source(Arc::new(source));
    }

    if let Some(prefix) = &args.env_prefix {
        info!("添加环境变量配置源，前缀: {}", prefix);
        options = options.with_source(Arc::new(EnvironmentSource::new(prefix.clone())));
    }

    Ok(ConfigAggregator::new(options))
}

/// 输出合并后的配置
async fn print_configuration(aggregator: &ConfigAggregator) -> anyhow::Result<()> {
    let document: serde_json::Value = serde_json::from_slice(&aggregator.bytes().await)
        .context("合并结果不是合法 JSON")?;
    println!("{}", serde_json::to_string_pretty(&document)?);

    let server = aggregator.get(&["server"]).await;
    if server.exists() {
        match server.scan::<ServerConfig>() {
            Ok(config) => info!("服务器地址: {}:{}", config.host, config.port),
            Err(e) => warn!("server 配置格式不正确: {}", e),
        }
    }
    Ok(())
}

/// 持续输出路径上的变更，直到监听器停止
async fn watch_loop(watcher: Arc<ValueWatcher>, path: String) {
    loop {
        match watcher.next().await {
            Ok(value) => info!("配置 {} 已更新: {}", path, String::from_utf8_lossy(&value.bytes())),
            Err(ConfigError::WatcherStopped) => break,
            Err(e) => {
                warn!("监听配置 {} 失败: {}", path, e);
                break;
            }
        }
    }
}
