//! 错误处理模块
//!
//! 定义了 RHI 层使用的统一错误类型。
//!
//! # 两类失败
//!
//! - **可恢复错误**：通过 [`Result`] 返回给调用者（配置错误、接口误用、资源创建参数无效等）
//! - **致命错误**：适配器/设备/描述符堆/管线/Fence 创建失败、描述符堆耗尽、Fence 等待超时。
//!   这些情况没有可降级的运行模式，使用 [`fatal!`](crate::fatal) 记录诊断信息后终止。
//!   Release 构建配置了 `panic = "abort"`，因此会直接中止进程。

use std::fmt;

/// RHI 统一的 Result 类型
pub type Result<T> = std::result::Result<T, DistRhiError>;

/// RHI 层的错误类型
#[derive(Debug)]
pub enum DistRhiError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// IO 错误
    Io(std::io::Error),

    /// 日志系统错误
    Log(String),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败
    DeviceCreation(String),

    /// 交换链错误
    SwapchainError(String),

    /// 着色器编译失败
    ShaderCompilation(String),

    /// 资源创建失败
    ResourceCreation(String),

    /// 命令记录或提交失败
    CommandExecution(String),

    /// 描述符堆已满
    DescriptorHeapFull { heap: &'static str, capacity: u32 },

    /// 同步对象错误
    Synchronization(String),

    /// 接口误用（例如向只读缓冲区写入）
    InvalidUsage(String),
}

impl DistRhiError {
    /// 快捷构造：命令执行错误
    pub fn command(msg: impl Into<String>) -> Self {
        DistRhiError::Graphics(GraphicsError::CommandExecution(msg.into()))
    }

    /// 快捷构造：接口误用
    pub fn usage(msg: impl Into<String>) -> Self {
        DistRhiError::Graphics(GraphicsError::InvalidUsage(msg.into()))
    }

    /// 快捷构造：资源创建失败
    pub fn resource(msg: impl Into<String>) -> Self {
        DistRhiError::Graphics(GraphicsError::ResourceCreation(msg.into()))
    }
}

impl fmt::Display for DistRhiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistRhiError::Config(e) => write!(f, "Configuration error: {}", e),
            DistRhiError::Graphics(e) => write!(f, "Graphics error: {}", e),
            DistRhiError::Io(e) => write!(f, "IO error: {}", e),
            DistRhiError::Log(msg) => write!(f, "Log error: {}", msg),
            DistRhiError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            DistRhiError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::SwapchainError(msg) => write!(f, "Swapchain error: {}", msg),
            GraphicsError::ShaderCompilation(msg) => write!(f, "Shader compilation failed: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
            GraphicsError::DescriptorHeapFull { heap, capacity } => {
                write!(f, "{} descriptor heap is full ({} slots)", heap, capacity)
            }
            GraphicsError::Synchronization(msg) => write!(f, "Synchronization error: {}", msg),
            GraphicsError::InvalidUsage(msg) => write!(f, "Invalid usage: {}", msg),
        }
    }
}

impl std::error::Error for DistRhiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DistRhiError::Io(e) => Some(e),
            DistRhiError::Config(e) => Some(e),
            DistRhiError::Graphics(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}

impl From<std::io::Error> for DistRhiError {
    fn from(err: std::io::Error) -> Self {
        DistRhiError::Io(err)
    }
}

impl From<ConfigError> for DistRhiError {
    fn from(err: ConfigError) -> Self {
        DistRhiError::Config(err)
    }
}

impl From<GraphicsError> for DistRhiError {
    fn from(err: GraphicsError) -> Self {
        DistRhiError::Graphics(err)
    }
}

/// 致命错误：记录诊断信息后终止
///
/// 用于没有降级模式的失败（设备创建、描述符堆耗尽、GPU 挂起）。
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        tracing::error!(target: "dist_rhi::engine", "FATAL: {}", message);
        panic!("{}", message)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err: DistRhiError = GraphicsError::DescriptorHeapFull { heap: "RTV", capacity: 8 }.into();
        assert_eq!(err.to_string(), "Graphics error: RTV descriptor heap is full (8 slots)");

        let err = DistRhiError::usage("buffer is not mapped");
        assert_eq!(err.to_string(), "Graphics error: Invalid usage: buffer is not mapped");
    }

    #[test]
    fn test_error_source() {
        use std::error::Error;
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DistRhiError = io.into();
        assert!(err.source().is_some());
        assert!(DistRhiError::Runtime("x".into()).source().is_none());
    }

    #[test]
    #[should_panic(expected = "GPU hang")]
    fn test_fatal_panics() {
        crate::fatal!("GPU hang after {} ms", 10);
    }
}
