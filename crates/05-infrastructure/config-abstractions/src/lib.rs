//! # Configuration Abstractions
//!
//! 配置聚合抽象层，定义多配置源合并与热更新的数据模型和能力接口。
//!
//! ## 核心接口
//!
//! - [`ChangeSet`] - 某个配置源在某一时刻的不可变快照
//! - [`ConfigSource`] - 配置源接口（全量读取 + 变更流）
//! - [`SourceWatcher`] - 配置源变更流句柄
//! - [`ConfigReader`] - 配置读取器接口（合并快照、构建值树）
//! - [`ConfigValues`] - 可按路径查询的值树
//! - [`ConfigWatcher`] - 按路径订阅的配置监听器

pub mod changeset;
pub mod reader;
pub mod source;
pub mod value;
pub mod watcher;

pub use changeset::*;
pub use reader::*;
pub use source::*;
pub use value::*;
pub use watcher::*;
