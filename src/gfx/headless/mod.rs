//! 无头（软件模拟）后端
//!
//! 资源存放在主机内存中。提交的命令列表进入一个模拟的 GPU 队列，只有在 CPU 等待
//! Fence（或测试调用 [`HeadlessDevice::retire_all`]）时才按顺序“执行”：复制命令真正搬运字节，
//! Fence 信号更新完成值。这样可以在没有显卡的环境下观察帧同步与上传的行为。
//!
//! 设备还会记录事件日志（提交、信号、等待、命令列表重置、呈现），
//! 并能模拟 GPU 挂起以测试超时路径。

mod device;

pub use device::HeadlessDevice;

use std::rc::Rc;

use crate::core::error::Result;
use crate::gfx::backend::{
    AdapterFeatures, AdapterInfo, GpuDevice, GpuInstance, RawCommandList, RawFence, RawSwapchain, RaytracingTier,
};

/// 模拟设备上发生的可观察事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadlessEvent {
    Execute { lists: Vec<RawCommandList> },
    Signal { fence: RawFence, value: u64 },
    /// CPU 阻塞等待（已完成的值不会产生事件）
    Wait { fence: RawFence, value: u64 },
    ResetCommandList(RawCommandList),
    Present { swapchain: RawSwapchain, vsync: bool },
}

/// 无头实例
pub struct HeadlessInstance {
    adapters: Vec<AdapterInfo>,
}

impl HeadlessInstance {
    /// 一个软件适配器加一个模拟的硬件适配器
    pub fn new() -> Self {
        Self::with_adapters(vec![
            AdapterInfo {
                name: String::from("Microsoft Basic Render Driver"),
                vendor_id: 0x1414,
                device_id: 0x8c,
                dedicated_video_memory: 0,
                software: true,
                features: AdapterFeatures::default(),
            },
            Self::default_adapter(),
        ])
    }

    pub fn with_adapters(adapters: Vec<AdapterInfo>) -> Self {
        Self { adapters }
    }

    /// 模拟的硬件适配器
    pub fn default_adapter() -> AdapterInfo {
        AdapterInfo {
            name: String::from("DistRHI Headless GPU"),
            vendor_id: 0xffff,
            device_id: 0x0001,
            dedicated_video_memory: 8 << 30,
            software: false,
            features: AdapterFeatures {
                raytracing_tier: RaytracingTier::Tier1_1,
                variable_rate_shading: true,
                mesh_shaders: true,
                work_graphs: false,
            },
        }
    }
}

impl Default for HeadlessInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuInstance for HeadlessInstance {
    fn backend_name(&self) -> &'static str {
        "Headless"
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>> {
        Ok(self.adapters.clone())
    }

    fn create_device(&self, adapter: &AdapterInfo) -> Result<Rc<dyn GpuDevice>> {
        tracing::debug!(adapter = %adapter.name, "Creating headless device");
        let device: Rc<dyn GpuDevice> = HeadlessDevice::new();
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_adapters() {
        let instance = HeadlessInstance::new();
        let adapters = instance.enumerate_adapters().unwrap();
        assert_eq!(adapters.len(), 2);
        assert!(adapters[0].software);
        assert!(!adapters[1].software);
        assert_eq!(instance.backend_name(), "Headless");
        assert!(instance.create_device(&adapters[1]).is_ok());
    }
}
