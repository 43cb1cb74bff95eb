//! 配置读取器实现

use crate::merge::deep_merge;
use config_abstractions::{ChangeSet, ConfigFormat, ConfigReader, ConfigValue, ConfigValues};
use infrastructure_common::ConfigError;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// JSON 配置读取器
///
/// 按各快照自身的格式解码（JSON / TOML / YAML），统一转换为 JSON 值树后深度合并，
/// 输出 JSON 格式的合并快照。
#[derive(Debug, Default, Clone)]
pub struct JsonConfigReader;

impl JsonConfigReader {
    /// 创建新的 JSON 配置读取器
    pub fn new() -> Self {
        Self
    }

    /// 把快照解码为 JSON 文档，根节点必须是对象
    pub fn decode(change_set: &ChangeSet) -> Result<Value, ConfigError> {
        let failure = |message: String| ConfigError::merge_failure(&change_set.source, message);

        let document = match change_set.format {
            ConfigFormat::Json => serde_json::from_slice::<Value>(&change_set.data)
                .map_err(|e| failure(format!("JSON 解析失败: {}", e)))?,
            ConfigFormat::Toml => {
                let text = std::str::from_utf8(&change_set.data)
                    .map_err(|e| failure(format!("TOML 内容不是合法 UTF-8: {}", e)))?;
                let table: toml::Value =
                    toml::from_str(text).map_err(|e| failure(format!("TOML 解析失败: {}", e)))?;
                toml_to_json(&table)
            }
            ConfigFormat::Yaml => serde_yaml::from_slice::<Value>(&change_set.data)
                .map_err(|e| failure(format!("YAML 解析失败: {}", e)))?,
        };

        if document.is_object() {
            Ok(document)
        } else {
            Err(failure("配置文档根节点必须是对象".to_string()))
        }
    }
}

impl ConfigReader for JsonConfigReader {
    fn parse(&self, change_sets: &[&ChangeSet]) -> Result<ChangeSet, ConfigError> {
        let mut merged = Value::Object(Map::new());
        let mut newest = None;

        for change_set in change_sets {
            newest = newest.max(Some(change_set.timestamp));

            if change_set.is_empty() {
                debug!("跳过空配置快照: {}", change_set.source);
                continue;
            }

            let document = Self::decode(change_set)?;
            deep_merge(&mut merged, document);
        }

        let data = serde_json::to_vec(&merged)?;
        let set = ChangeSet::new(self.name(), ConfigFormat::Json, data);
        Ok(match newest {
            Some(timestamp) => set.with_timestamp(timestamp),
            None => set,
        })
    }

    fn values(&self, set: &ChangeSet) -> Result<Arc<dyn ConfigValues>, ConfigError> {
        let root = if set.is_empty() {
            Value::Object(Map::new())
        } else {
            Self::decode(set)?
        };
        Ok(Arc::new(JsonValues::new(root)))
    }

    fn name(&self) -> &str {
        "json"
    }
}

/// JSON 值树
#[derive(Debug, Clone)]
pub struct JsonValues {
    root: Value,
}

impl JsonValues {
    /// 以根节点创建值树
    pub fn new(root: Value) -> Self {
        Self { root }
    }
}

impl ConfigValues for JsonValues {
    fn get(&self, path: &[&str]) -> ConfigValue {
        let mut current = &self.root;
        for segment in path {
            match current.get(*segment) {
                Some(next) => current = next,
                None => return ConfigValue::empty(),
            }
        }
        ConfigValue::new(current.clone())
    }

    fn bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.root).unwrap_or_default()
    }
}

/// 将 TOML 值转换为 JSON 值
fn toml_to_json(value: &toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::Number(serde_json::Number::from(*i)),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Array(arr) => Value::Array(arr.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_each_format() {
        let json_set = ChangeSet::new("a", ConfigFormat::Json, br#"{"server":{"port":80}}"#.to_vec());
        let toml_set = ChangeSet::new("b", ConfigFormat::Toml, b"[server]\nport = 81\nratio = 0.5\n".to_vec());
        let yaml_set = ChangeSet::new("c", ConfigFormat::Yaml, b"server:\n  port: 82\n".to_vec());

        assert_eq!(JsonConfigReader::decode(&json_set).unwrap(), json!({"server": {"port": 80}}));
        assert_eq!(
            JsonConfigReader::decode(&toml_set).unwrap(),
            json!({"server": {"port": 81, "ratio": 0.5}})
        );
        assert_eq!(JsonConfigReader::decode(&yaml_set).unwrap(), json!({"server": {"port": 82}}));
    }

    #[test]
    fn test_mixed_formats_merge_by_order() {
        let toml_set = ChangeSet::new("toml", ConfigFormat::Toml, b"name = \"adsp\"\nport = 1\n".to_vec());
        let json_set = ChangeSet::new("json", ConfigFormat::Json, br#"{"port":2}"#.to_vec());

        let reader = JsonConfigReader::new();
        let set = reader.parse(&[&toml_set, &json_set]).unwrap();
        let values = reader.values(&set).unwrap();

        assert_eq!(values.get(&["name"]).as_string(""), "adsp");
        assert_eq!(values.get(&["port"]).as_i64(0), 2);
        assert_eq!(set.source, "json");
        assert_eq!(set.timestamp, toml_set.timestamp.max(json_set.timestamp));
    }

    #[test]
    fn test_non_object_root_rejected() {
        let scalar = ChangeSet::new("scalar", ConfigFormat::Json, b"5".to_vec());
        assert!(matches!(
            JsonConfigReader::decode(&scalar),
            Err(ConfigError::MergeFailure { .. })
        ));
    }

    #[test]
    fn test_empty_data_is_skipped() {
        let empty = ChangeSet::new("empty", ConfigFormat::Json, Vec::new());
        let reader = JsonConfigReader::new();
        let set = reader.parse(&[&empty]).unwrap();
        assert_eq!(set.data, b"{}");
    }

    #[test]
    fn test_values_path_lookup() {
        let values = JsonValues::new(json!({"db": {"pool": {"size": 8}}}));
        assert_eq!(values.get(&["db", "pool", "size"]).as_i64(0), 8);
        assert!(!values.get(&["db", "missing"]).exists());
        assert!(!values.get(&["db", "pool", "size", "deeper"]).exists());
        assert_eq!(values.get(&[]).bytes(), values.bytes());
    }
}
