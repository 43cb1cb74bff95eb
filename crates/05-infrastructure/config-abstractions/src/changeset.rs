//! 配置快照定义

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// 冷启动回退时使用的保留来源名称
pub const FALLBACK_SOURCE_NAME: &str = "config";

/// 配置数据格式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ConfigFormat {
    /// JSON
    #[default]
    Json,
    /// TOML
    Toml,
    /// YAML
    Yaml,
}

impl ConfigFormat {
    /// 根据文件扩展名推断格式
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        match extension.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    /// 格式名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Toml => "toml",
            Self::Yaml => "yaml",
        }
    }
}

/// 配置快照
///
/// 某个配置源在某一时刻的完整内容。创建后不再修改，
/// 新内容总是以新的快照整体替换旧快照。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeSet {
    /// 来源名称
    pub source: String,
    /// 数据格式
    pub format: ConfigFormat,
    /// 原始数据
    pub data: Vec<u8>,
    /// 内容摘要（SHA-256 十六进制）
    pub checksum: String,
    /// 创建时间
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ChangeSet {
    /// 创建新的配置快照，摘要与时间戳自动生成
    pub fn new(source: impl Into<String>, format: ConfigFormat, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self {
            source: source.into(),
            format,
            checksum: Self::compute_checksum(&data),
            data,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建空文档快照（`{}`）
    pub fn empty(source: impl Into<String>) -> Self {
        Self::new(source, ConfigFormat::Json, b"{}".to_vec())
    }

    /// 指定时间戳
    pub fn with_timestamp(mut self, timestamp: chrono::DateTime<chrono::Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 计算内容摘要
    pub fn compute_checksum(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    /// 数据是否为空
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
