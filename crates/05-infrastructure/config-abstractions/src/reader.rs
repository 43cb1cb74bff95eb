//! 配置读取器抽象接口

use crate::changeset::ChangeSet;
use crate::value::ConfigValue;
use infrastructure_common::ConfigError;
use std::sync::Arc;

/// 配置读取器 trait
///
/// 与具体格式相关：负责把按优先级排列的快照合并为一个文档，
/// 并把合并后的文档投影为可查询的值树。
pub trait ConfigReader: Send + Sync {
    /// 合并快照，索引越大优先级越高
    ///
    /// 任意一个快照无法解码时整体失败，调用方不得使用部分结果。
    fn parse(&self, change_sets: &[&ChangeSet]) -> Result<ChangeSet, ConfigError>;

    /// 构建可查询的值树
    fn values(&self, set: &ChangeSet) -> Result<Arc<dyn ConfigValues>, ConfigError>;

    /// 读取器名称
    fn name(&self) -> &str;
}

/// 配置值树 trait
pub trait ConfigValues: Send + Sync + std::fmt::Debug {
    /// 按路径获取值，路径不存在时返回空值
    fn get(&self, path: &[&str]) -> ConfigValue;

    /// 整个文档的序列化结果
    fn bytes(&self) -> Vec<u8>;
}
