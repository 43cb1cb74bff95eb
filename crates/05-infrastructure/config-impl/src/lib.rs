//! # Configuration Implementation
//!
//! 配置聚合的具体实现：多配置源按优先级合并，并在任一配置源变更时
//! 不重启进程地保持合并结果实时更新。
//!
//! ## 主要组件
//!
//! - [`ConfigAggregator`] - 聚合器，持有配置源、快照槽位、合并结果与监听器注册表
//! - [`ConfigOptions`] - 聚合器构建选项
//! - [`JsonConfigReader`] - 基于 JSON 值树的配置读取器
//! - [`ValueWatcher`] - 按路径订阅的监听器
//! - [`MemorySource`] / [`FileSource`] / [`EnvironmentSource`] - 内置配置源

pub mod aggregator;
pub mod merge;
pub mod options;
pub mod reader;
pub mod sources;
pub mod watcher;

pub use aggregator::*;
pub use options::*;
pub use reader::*;
pub use sources::*;
pub use watcher::*;

#[cfg(test)]
mod tests;
