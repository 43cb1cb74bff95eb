//! 聚合器构建选项

use crate::reader::JsonConfigReader;
use config_abstractions::{ConfigReader, ConfigSource};
use std::sync::Arc;
use std::time::Duration;

/// 默认的配置源重试间隔
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// 聚合器构建选项
///
/// 配置源的添加顺序即合并优先级：后添加的配置源覆盖先添加的。
#[derive(Clone)]
pub struct ConfigOptions {
    /// 配置源列表
    pub sources: Vec<Arc<dyn ConfigSource>>,
    /// 配置读取器
    pub reader: Arc<dyn ConfigReader>,
    /// 打开变更流失败或变更流中断后的固定退避间隔
    pub retry_interval: Duration,
}

impl ConfigOptions {
    /// 创建默认选项：JSON 读取器，1 秒重试间隔，无配置源
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            reader: Arc::new(JsonConfigReader::new()),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// 追加配置源
    pub fn with_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// 设置配置读取器
    pub fn with_reader(mut self, reader: Arc<dyn ConfigReader>) -> Self {
        self.reader = reader;
        self
    }

    /// 设置重试间隔
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigOptions")
            .field(
                "sources",
                &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("reader", &self.reader.name())
            .field("retry_interval", &self.retry_interval)
            .finish()
    }
}
