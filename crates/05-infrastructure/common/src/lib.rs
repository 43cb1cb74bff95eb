//! # Infrastructure Common
//!
//! 这个 crate 提供了 Lorn ADSP 配置基础设施共享的错误类型。
//!
//! ## 核心组件
//!
//! - [`ConfigError`] - 配置聚合、合并与监听过程中的统一错误
//! - [`ConfigResult`] - 结果类型别名

pub mod errors;

pub use errors::*;
