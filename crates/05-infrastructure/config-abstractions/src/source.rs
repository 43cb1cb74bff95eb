//! 配置源抽象接口

use crate::changeset::ChangeSet;
use async_trait::async_trait;
use infrastructure_common::ConfigError;

/// 配置源 trait
///
/// 定义从不同后端获取配置快照的统一接口。具体后端（文件、环境变量、
/// 分布式键值存储等）在构建聚合器时注入。
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// 同步读取完整快照
    async fn read(&self) -> Result<ChangeSet, ConfigError>;

    /// 打开变更流
    async fn watch(&self) -> Result<Box<dyn SourceWatcher>, ConfigError>;

    /// 获取配置源名称，作为快照的来源标识
    fn name(&self) -> &str;
}

/// 配置源变更流句柄
///
/// `next` 与 `stop` 都只需要共享引用，聚合器可以在一个任务中阻塞
/// 等待 `next`，同时在另一个任务中调用 `stop` 将其唤醒。
#[async_trait]
pub trait SourceWatcher: Send + Sync {
    /// 阻塞直到下一次变更或变更流出错
    async fn next(&self) -> Result<ChangeSet, ConfigError>;

    /// 停止变更流，幂等；任何挂起中的 `next` 必须随之返回
    async fn stop(&self) -> Result<(), ConfigError>;
}
