//! 配置监听抽象接口

use crate::value::ConfigValue;
use async_trait::async_trait;
use infrastructure_common::ConfigError;

/// 配置监听器 trait
///
/// 订阅合并文档中某个路径的变更。状态只有 Active 与 Stopped 两种，
/// Stopped 为终态。
#[async_trait]
pub trait ConfigWatcher: Send + Sync {
    /// 等待路径上的下一个不同值
    ///
    /// 与上次返回值序列化结果相同的更新会被丢弃；监听器停止后
    /// 永远返回 [`ConfigError::WatcherStopped`]。
    async fn next(&self) -> Result<ConfigValue, ConfigError>;

    /// 停止监听，幂等，可与 `next` 并发调用
    async fn stop(&self) -> Result<(), ConfigError>;

    /// 订阅路径
    fn path(&self) -> &[String];

    /// 是否已停止
    fn is_stopped(&self) -> bool;
}
