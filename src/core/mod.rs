//! 核心功能模块
//!
//! 与具体图形 API 无关的基础设施：日志、配置和错误处理。
//!
//! - `log`：日志系统，基于 `tracing`
//! - `config`：配置管理，支持从 TOML 文件加载
//! - `error`：统一错误类型与 `fatal!` 宏

pub mod log;
pub mod config;
pub mod error;

pub use config::Config;
pub use error::{DistRhiError, GraphicsError, Result};
