//! 配置值定义

use infrastructure_common::ConfigError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// 配置值
///
/// 值树中某个路径上的节点。路径不存在时为空值，各访问方法返回调用方给定的默认值。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigValue {
    inner: Option<Value>,
}

impl ConfigValue {
    /// 包装一个 JSON 节点
    pub fn new(value: Value) -> Self {
        Self { inner: Some(value) }
    }

    /// 空值
    pub fn empty() -> Self {
        Self { inner: None }
    }

    /// 路径上是否存在值
    pub fn exists(&self) -> bool {
        self.inner.is_some()
    }

    /// 底层 JSON 节点
    pub fn as_json(&self) -> Option<&Value> {
        self.inner.as_ref()
    }

    /// 布尔值
    pub fn as_bool(&self, default: bool) -> bool {
        match &self.inner {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// 整数值
    pub fn as_i64(&self, default: i64) -> i64 {
        match &self.inner {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// 浮点值
    pub fn as_f64(&self, default: f64) -> f64 {
        match &self.inner {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
            Some(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// 字符串值
    pub fn as_string(&self, default: &str) -> String {
        match &self.inner {
            Some(Value::String(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    /// 时长值
    ///
    /// 支持 `"150ms"`、`"10s"`、`"5m"`、`"2h"` 形式的字符串，纯数字按秒计。
    pub fn as_duration(&self, default: Duration) -> Duration {
        match &self.inner {
            Some(Value::Number(n)) => n
                .as_f64()
                .and_then(seconds_to_duration)
                .unwrap_or(default),
            Some(Value::String(s)) => parse_duration(s).unwrap_or(default),
            _ => default,
        }
    }

    /// 字符串列表，任一元素不是字符串时返回默认值
    pub fn as_string_vec(&self, default: Vec<String>) -> Vec<String> {
        let Some(Value::Array(items)) = &self.inner else {
            return default;
        };

        let mut result = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(s) => result.push(s.clone()),
                _ => return default,
            }
        }
        result
    }

    /// 字符串映射，任一值不是字符串时返回默认值
    pub fn as_string_map(&self, default: HashMap<String, String>) -> HashMap<String, String> {
        let Some(Value::Object(obj)) = &self.inner else {
            return default;
        };

        let mut result = HashMap::with_capacity(obj.len());
        for (key, value) in obj {
            match value {
                Value::String(s) => {
                    result.insert(key.clone(), s.clone());
                }
                _ => return default,
            }
        }
        result
    }

    /// 绑定到具体类型
    pub fn scan<T>(&self) -> Result<T, ConfigError>
    where
        T: DeserializeOwned,
    {
        let value = self.inner.clone().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| ConfigError::TypeConversionError {
            message: format!("无法绑定到 {}: {}", std::any::type_name::<T>(), e),
        })
    }

    /// 序列化结果，空值序列化为 `null`
    pub fn bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self.inner.as_ref().unwrap_or(&Value::Null)).unwrap_or_default()
    }
}

impl From<Value> for ConfigValue {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let amount: f64 = number.parse().ok()?;

    let seconds = match unit.trim() {
        "ms" => amount / 1000.0,
        "" | "s" => amount,
        "m" => amount * 60.0,
        "h" => amount * 3600.0,
        _ => return None,
    };
    seconds_to_duration(seconds)
}

fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}
