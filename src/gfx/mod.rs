//! 图形后端模块
//!
//! 本模块封装了不同图形 API 的底层实现，包括：
//! - headless：软件模拟的设备与队列，任意平台可用，也是测试的基础
//! - DirectX 12：Windows 平台的高性能图形 API
//!
//! 所有后端都实现了统一的 [`GpuInstance`] / [`GpuDevice`] trait，
//! 上层 `rhi` 只通过这两个 trait 与后端交互。

pub mod backend;
pub mod command;
pub mod headless;
#[cfg(target_os = "windows")]
pub mod dx12;

pub use backend::{GpuDevice, GpuInstance};

use crate::core::config::GraphicsBackend;
use crate::core::error::Result;

/// 根据配置创建后端实例
pub fn create_instance(backend: GraphicsBackend, debug: bool) -> Result<Box<dyn GpuInstance>> {
    match backend {
        GraphicsBackend::Headless => Ok(Box::new(headless::HeadlessInstance::new())),
        #[cfg(target_os = "windows")]
        GraphicsBackend::Dx12 => Ok(Box::new(dx12::Dx12Instance::new(debug)?)),
        #[cfg(not(target_os = "windows"))]
        GraphicsBackend::Dx12 => {
            let _ = debug;
            Err(crate::core::error::GraphicsError::DeviceCreation(String::from(
                "DirectX 12 is only available on Windows",
            ))
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_instance_lists_adapters() {
        let instance = create_instance(GraphicsBackend::Headless, false).unwrap();
        assert_eq!(instance.backend_name(), "Headless");
        assert!(!instance.enumerate_adapters().unwrap().is_empty());
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn dx12_is_rejected_off_windows() {
        assert!(create_instance(GraphicsBackend::Dx12, true).is_err());
    }
}
