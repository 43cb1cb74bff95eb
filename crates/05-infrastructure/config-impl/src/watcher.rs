//! 配置监听器实现

use crate::aggregator::AggregatorInner;
use async_trait::async_trait;
use config_abstractions::{ConfigValue, ConfigWatcher};
use infrastructure_common::ConfigError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// 按路径订阅的配置监听器
///
/// 由 [`crate::ConfigAggregator::watch`] 创建。入站槽位容量为 1，
/// 消费者来不及取走时新的更新会被丢弃，只保证最终能看到一个足够新的值。
pub struct ValueWatcher {
    id: u64,
    path: Vec<String>,
    exit: CancellationToken,
    stopped: AtomicBool,
    inbox: Mutex<WatcherInbox>,
    registry: Weak<AggregatorInner>,
}

struct WatcherInbox {
    last: ConfigValue,
    updates: mpsc::Receiver<ConfigValue>,
}

impl ValueWatcher {
    pub(crate) fn new(
        id: u64,
        path: Vec<String>,
        baseline: ConfigValue,
        updates: mpsc::Receiver<ConfigValue>,
        registry: Weak<AggregatorInner>,
    ) -> Self {
        Self {
            id,
            path,
            exit: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            inbox: Mutex::new(WatcherInbox {
                last: baseline,
                updates,
            }),
            registry,
        }
    }

    /// 监听器编号
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 订阅路径
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// 是否已停止
    pub fn is_stopped(&self) -> bool {
        self.exit.is_cancelled()
    }

    /// 等待路径上的下一个不同值
    pub async fn next(&self) -> Result<ConfigValue, ConfigError> {
        if self.exit.is_cancelled() {
            return Err(ConfigError::WatcherStopped);
        }

        let mut inbox = tokio::select! {
            biased;
            _ = self.exit.cancelled() => return Err(ConfigError::WatcherStopped),
            inbox = self.inbox.lock() => inbox,
        };

        loop {
            let update = tokio::select! {
                biased;
                _ = self.exit.cancelled() => return Err(ConfigError::WatcherStopped),
                update = inbox.updates.recv() => update,
            };

            // 发送端随注册表条目一起释放
            let Some(value) = update else {
                return Err(ConfigError::WatcherStopped);
            };

            if value.bytes() == inbox.last.bytes() {
                trace!("监听器 {} 收到重复值，已忽略", self.id);
                continue;
            }

            inbox.last = value.clone();
            return Ok(value);
        }
    }

    /// 停止监听，幂等
    pub async fn stop(&self) -> Result<(), ConfigError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.exit.cancel();
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id).await;
        }
        Ok(())
    }
}

impl Drop for ValueWatcher {
    fn drop(&mut self) {
        self.exit.cancel();
    }
}

impl std::fmt::Debug for ValueWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueWatcher")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[async_trait]
impl ConfigWatcher for ValueWatcher {
    async fn next(&self) -> Result<ConfigValue, ConfigError> {
        ValueWatcher::next(self).await
    }

    async fn stop(&self) -> Result<(), ConfigError> {
        ValueWatcher::stop(self).await
    }

    fn path(&self) -> &[String] {
        &self.path
    }

    fn is_stopped(&self) -> bool {
        ValueWatcher::is_stopped(self)
    }
}
