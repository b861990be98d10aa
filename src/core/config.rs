//! 配置管理模块
//!
//! 提供 RHI 配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//! title = "DistRHI"
//!
//! [graphics]
//! backend = "headless"  # 或 "dx12"
//! vsync = true
//! debug_layer = false
//!
//! [upload]
//! flush_threshold_mib = 512
//!
//! [sync]
//! fence_timeout_ms = 10000000
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{ConfigError, Result};

/// RHI 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 窗口（交换链）配置
    #[serde(default)]
    pub window: WindowConfig,

    /// 图形配置
    #[serde(default)]
    pub graphics: GraphicsConfig,

    /// 上传批处理配置
    #[serde(default)]
    pub upload: UploadConfig,

    /// 同步配置
    #[serde(default)]
    pub sync: SyncConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 窗口配置
///
/// 窗口本身由外部创建，这里只决定交换链的初始尺寸。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// 窗口标题（由创建窗口的一方使用）
    #[serde(default = "default_title")]
    pub title: String,
}

/// 图形配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: GraphicsBackend,

    /// 垂直同步
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// 是否启用 API 调试层
    #[serde(default)]
    pub debug_layer: bool,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphicsBackend {
    /// 软件模拟后端（任意平台，可用于测试）
    Headless,
    /// DirectX 12 后端（仅 Windows）
    Dx12,
}

/// 上传批处理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 暂存字节数达到该阈值（MiB）时自动 flush
    #[serde(default = "default_flush_threshold_mib")]
    pub flush_threshold_mib: u64,
}

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Fence 等待超时（毫秒），超时视为 GPU 挂起
    #[serde(default = "default_fence_timeout_ms")]
    pub fence_timeout_ms: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_title() -> String { "DistRHI".to_string() }
fn default_backend() -> GraphicsBackend { GraphicsBackend::Headless }
fn default_vsync() -> bool { true }
fn default_flush_threshold_mib() -> u64 { 512 }
fn default_fence_timeout_ms() -> u64 { 10_000_000 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "dist_rhi.log".to_string() }

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            vsync: default_vsync(),
            debug_layer: false,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            flush_threshold_mib: default_flush_threshold_mib(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fence_timeout_ms: default_fence_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl UploadConfig {
    /// 阈值（字节）
    pub fn flush_threshold_bytes(&self) -> u64 {
        self.flush_threshold_mib * 1024 * 1024
    }
}

impl SyncConfig {
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}

impl Config {
    /// 从配置文件加载
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    #[allow(dead_code)]
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--dx12` / `--headless`: 选择图形后端
    /// - `--no-vsync`: 关闭垂直同步
    /// - `--width <value>` / `--height <value>`: 交换链尺寸
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.graphics.backend = GraphicsBackend::Dx12;
        }

        if args.iter().any(|a| a == "--headless") {
            self.graphics.backend = GraphicsBackend::Headless;
        }

        if args.iter().any(|a| a == "--no-vsync") {
            self.graphics.vsync = false;
        }

        if let Some(idx) = args.iter().position(|a| a == "--width") {
            if let Some(width) = args.get(idx + 1).and_then(|s| s.parse().ok()) {
                self.window.width = width;
            }
        }

        if let Some(idx) = args.iter().position(|a| a == "--height") {
            if let Some(height) = args.get(idx + 1).and_then(|s| s.parse().ok()) {
                self.window.height = height;
            }
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window.width/height".to_string(),
                reason: "Surface dimensions must be greater than 0".to_string(),
            }.into());
        }

        if self.upload.flush_threshold_mib == 0 {
            return Err(ConfigError::InvalidValue {
                field: "upload.flush_threshold_mib".to_string(),
                reason: "Flush threshold must be at least 1 MiB".to_string(),
            }.into());
        }

        if self.sync.fence_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.fence_timeout_ms".to_string(),
                reason: "Fence timeout must be greater than 0".to_string(),
            }.into());
        }

        Ok(())
    }
}

impl GraphicsBackend {
    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackend::Headless => "Headless",
            GraphicsBackend::Dx12 => "DirectX 12",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.backend, GraphicsBackend::Headless);
        assert_eq!(config.upload.flush_threshold_bytes(), 512 * 1024 * 1024);
        assert_eq!(config.sync.fence_timeout(), Duration::from_millis(10_000_000));
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            backend = "dx12"

            [upload]
            flush_threshold_mib = 64
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.backend, GraphicsBackend::Dx12);
        assert!(config.graphics.vsync);
        assert_eq!(config.upload.flush_threshold_mib, 64);
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(Config::from_toml_str("[graphics]\nbackend = \"opengl\"").is_err());
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["app", "--dx12", "--width", "640", "--no-vsync"]);
        assert_eq!(config.graphics.backend, GraphicsBackend::Dx12);
        assert_eq!(config.window.width, 640);
        assert!(!config.graphics.vsync);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.window.width = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.fence_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
