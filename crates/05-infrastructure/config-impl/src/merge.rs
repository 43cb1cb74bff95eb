//! 配置合并引擎
//!
//! 纯函数：相同的槽位内容总是得到相同的合并结果，与产生这些槽位的
//! 变更到达顺序无关。

use config_abstractions::{ChangeSet, ConfigReader};
use infrastructure_common::ConfigError;
use serde_json::Value;
use std::sync::Arc;

/// 合并槽位数组
///
/// 空槽位（尚未收到过快照的配置源）被跳过，其余按索引顺序交给读取器，
/// 索引越大优先级越高。
pub fn merge_slots(
    reader: &dyn ConfigReader,
    slots: &[Option<Arc<ChangeSet>>],
) -> Result<ChangeSet, ConfigError> {
    let present: Vec<&ChangeSet> = slots.iter().flatten().map(Arc::as_ref).collect();
    reader.parse(&present)
}

/// 深度合并两个文档，`overlay` 中的键覆盖 `base`
///
/// 双方都是对象的键递归合并；其余情况（标量、数组、类型不一致）由 `overlay` 整体替换。
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
