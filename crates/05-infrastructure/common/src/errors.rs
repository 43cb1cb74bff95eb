//! 错误类型定义

use thiserror::Error;

/// 配置错误类型
///
/// 配置源与合并层面的失败都在聚合器内部消化（重试或回退），
/// 正常运行时唯一会越过公共边界的是 [`ConfigError::WatcherStopped`]。
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置源不可用: {source_name}, 原因: {message}")]
    SourceUnavailable {
        source_name: String,
        message: String,
    },

    #[error("配置合并失败: {source_name}, 原因: {message}")]
    MergeFailure {
        source_name: String,
        message: String,
    },

    #[error("配置冷启动加载失败: {message}")]
    BootstrapExhausted { message: String },

    #[error("配置监听器已停止")]
    WatcherStopped,

    #[error("配置文件读取失败: {source}")]
    FileReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("配置序列化失败: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },

    #[error("配置类型转换失败: {message}")]
    TypeConversionError { message: String },

    #[error("配置文件监控失败: {message}")]
    WatchError { message: String },
}

impl ConfigError {
    /// 创建配置源不可用错误
    pub fn source_unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// 创建配置合并失败错误
    pub fn merge_failure(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MergeFailure {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// 创建配置文件监控错误
    pub fn watch_error(message: impl Into<String>) -> Self {
        Self::WatchError {
            message: message.into(),
        }
    }

    /// 是否为可通过退避重试恢复的错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::WatchError { .. } | Self::FileReadError { .. }
        )
    }
}

/// 结果类型别名
pub type ConfigResult<T> = Result<T, ConfigError>;
