//! 聚合器测试


use crate::sources::MemorySource;
use async_trait::async_trait;
use config_abstractions::{ChangeSet, ConfigFormat, ConfigSource, SourceWatcher};
use infrastructure_common::ConfigError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 等待聚合器的监听任务订阅内存配置源
pub(crate) async fn wait_for_subscribers(source: &MemorySource, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while source.subscriber_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("监听任务未能及时订阅配置源");
}

/// 读取与订阅都会失败的配置源
pub(crate) struct FailingSource {
    pub watch_attempts: AtomicUsize,
}

impl FailingSource {
    pub fn new() -> Self {
        Self {
            watch_attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConfigSource for FailingSource {
    async fn read(&self) -> Result<ChangeSet, ConfigError> {
        Err(ConfigError::source_unavailable("failing", "不可用"))
    }

    async fn watch(&self) -> Result<Box<dyn SourceWatcher>, ConfigError> {
        self.watch_attempts.fetch_add(1, Ordering::SeqCst);
        Err(ConfigError::source_unavailable("failing", "不可用"))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// 读取结果为非法内容的内存配置源
pub(crate) fn malformed_source() -> MemorySource {
    MemorySource::new("malformed", ConfigFormat::Json, b"{not json".to_vec())
}

/// 第一个变更流立即出错，之后的变更流投递一次恢复后的内容
pub(crate) struct FlakyStreamSource {
    pub watch_calls: AtomicUsize,
    pub stopped_streams: Arc<AtomicUsize>,
}

impl FlakyStreamSource {
    pub fn new() -> Self {
        Self {
            watch_calls: AtomicUsize::new(0),
            stopped_streams: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ConfigSource for FlakyStreamSource {
    async fn read(&self) -> Result<ChangeSet, ConfigError> {
        Ok(ChangeSet::new("flaky", ConfigFormat::Json, br#"{"recovered":false}"#.to_vec()))
    }

    async fn watch(&self) -> Result<Box<dyn SourceWatcher>, ConfigError> {
        if self.watch_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(Box::new(BrokenStream {
                stopped_streams: Arc::clone(&self.stopped_streams),
            }));
        }
        Ok(Box::new(RecoveredStream {
            delivered: AtomicBool::new(false),
            exit: CancellationToken::new(),
        }))
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

struct BrokenStream {
    stopped_streams: Arc<AtomicUsize>,
}

#[async_trait]
impl SourceWatcher for BrokenStream {
    async fn next(&self) -> Result<ChangeSet, ConfigError> {
        Err(ConfigError::source_unavailable("flaky", "连接中断"))
    }

    async fn stop(&self) -> Result<(), ConfigError> {
        self.stopped_streams.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct RecoveredStream {
    delivered: AtomicBool,
    exit: CancellationToken,
}

#[async_trait]
impl SourceWatcher for RecoveredStream {
    async fn next(&self) -> Result<ChangeSet, ConfigError> {
        if !self.delivered.swap(true, Ordering::SeqCst) {
            return Ok(ChangeSet::new("flaky", ConfigFormat::Json, br#"{"recovered":true}"#.to_vec()));
        }
        self.exit.cancelled().await;
        Err(ConfigError::source_unavailable("flaky", "变更流已停止"))
    }

    async fn stop(&self) -> Result<(), ConfigError> {
        self.exit.cancel();
        Ok(())
    }
}
