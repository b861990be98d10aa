//! RHI 上下文
//!
//! 显式传递（`Rc<Context>`）的共享状态：设备、四个描述符堆、图形队列、
//! 空闲等待用的 Fence、渲染统计与运行参数。替代全局单例。

use std::rc::Rc;
use std::time::Duration;

use crate::core::config::Config;
use crate::gfx::{self, backend::GpuDevice};
use crate::rhi::descriptor::{DescriptorHeap, DescriptorHeapKind};
use crate::rhi::device::Device;
use crate::rhi::stats::RenderStats;
use crate::rhi::sync::{Fence, Queue, DEFAULT_FENCE_TIMEOUT_MS};

/// 默认上传批处理阈值（512 MiB）
pub const DEFAULT_UPLOAD_THRESHOLD: u64 = 512 << 20;

/// 上下文运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSettings {
    pub fence_timeout: Duration,
    /// 上传器累计到多少字节时自动 flush
    pub upload_flush_threshold: u64,
    pub rtv_capacity: u32,
    pub dsv_capacity: u32,
    pub resource_capacity: u32,
    pub sampler_capacity: u32,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            fence_timeout: Duration::from_millis(DEFAULT_FENCE_TIMEOUT_MS),
            upload_flush_threshold: DEFAULT_UPLOAD_THRESHOLD,
            rtv_capacity: DescriptorHeapKind::RenderTarget.default_capacity(),
            dsv_capacity: DescriptorHeapKind::DepthStencil.default_capacity(),
            resource_capacity: DescriptorHeapKind::Resource.default_capacity(),
            sampler_capacity: DescriptorHeapKind::Sampler.default_capacity(),
        }
    }
}

impl ContextSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fence_timeout: config.sync.fence_timeout(),
            upload_flush_threshold: config.upload.flush_threshold_bytes(),
            ..Self::default()
        }
    }

    fn capacity(&self, kind: DescriptorHeapKind) -> u32 {
        match kind {
            DescriptorHeapKind::RenderTarget => self.rtv_capacity,
            DescriptorHeapKind::DepthStencil => self.dsv_capacity,
            DescriptorHeapKind::Resource => self.resource_capacity,
            DescriptorHeapKind::Sampler => self.sampler_capacity,
        }
    }
}

/// RHI 共享状态
pub struct Context {
    device: Device,
    rtv_heap: DescriptorHeap,
    dsv_heap: DescriptorHeap,
    resource_heap: DescriptorHeap,
    sampler_heap: DescriptorHeap,
    queue: Queue,
    idle_fence: Fence,
    stats: RenderStats,
    settings: ContextSettings,
}

impl Context {
    /// 按配置选择后端并创建上下文；后端初始化失败是致命错误
    pub fn new(config: &Config) -> Rc<Self> {
        let backend = config.graphics.backend;
        let instance = match gfx::create_instance(backend, config.graphics.debug_layer) {
            Ok(instance) => instance,
            Err(e) => crate::fatal!("Failed to initialize {} backend: {}", backend.name(), e),
        };
        let device = Device::new(instance.as_ref());
        Self::with_device(device, ContextSettings::from_config(config))
    }

    /// 在已有设备上创建上下文
    pub fn with_device(device: Device, settings: ContextSettings) -> Rc<Self> {
        let gpu = device.raw().clone();
        let heap = |kind: DescriptorHeapKind| DescriptorHeap::new(gpu.as_ref(), kind, settings.capacity(kind));

        let context = Self {
            rtv_heap: heap(DescriptorHeapKind::RenderTarget),
            dsv_heap: heap(DescriptorHeapKind::DepthStencil),
            resource_heap: heap(DescriptorHeapKind::Resource),
            sampler_heap: heap(DescriptorHeapKind::Sampler),
            queue: Queue::new(gpu.clone()),
            idle_fence: Fence::new(gpu.clone(), settings.fence_timeout),
            stats: RenderStats::new(),
            settings,
            device,
        };

        crate::engine_info!("RHI context ready on '{}'", context.device.adapter().name);
        Rc::new(context)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// 后端设备
    pub fn gpu(&self) -> &Rc<dyn GpuDevice> {
        self.device.raw()
    }

    pub fn heap(&self, kind: DescriptorHeapKind) -> &DescriptorHeap {
        match kind {
            DescriptorHeapKind::RenderTarget => &self.rtv_heap,
            DescriptorHeapKind::DepthStencil => &self.dsv_heap,
            DescriptorHeapKind::Resource => &self.resource_heap,
            DescriptorHeapKind::Sampler => &self.sampler_heap,
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// 等待 GPU 完成所有已提交的工作
    pub fn wait_idle(&self) {
        let value = self.idle_fence.flush(&self.queue);
        tracing::trace!(fence = value, "Device idle");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gfx::headless::{HeadlessDevice, HeadlessInstance};

    /// 测试用的小容量无头上下文
    pub(crate) fn headless_context() -> (Rc<Context>, Rc<HeadlessDevice>) {
        headless_context_with(ContextSettings {
            rtv_capacity: 64,
            dsv_capacity: 64,
            resource_capacity: 256,
            sampler_capacity: 64,
            ..ContextSettings::default()
        })
    }

    pub(crate) fn headless_context_with(settings: ContextSettings) -> (Rc<Context>, Rc<HeadlessDevice>) {
        let gpu = HeadlessDevice::new();
        let device = Device::from_raw(HeadlessInstance::default_adapter(), gpu.clone());
        (Context::with_device(device, settings), gpu)
    }

    #[test]
    fn test_heaps_match_settings() {
        let (ctx, _gpu) = headless_context();
        assert_eq!(ctx.heap(DescriptorHeapKind::Resource).capacity(), 256);
        assert_eq!(ctx.heap(DescriptorHeapKind::Sampler).kind(), DescriptorHeapKind::Sampler);
    }

    #[test]
    fn test_default_capacities() {
        let settings = ContextSettings::default();
        assert_eq!(settings.resource_capacity, 1_000_000);
        assert_eq!(settings.rtv_capacity, 2_048);
        assert_eq!(settings.upload_flush_threshold, 512 * 1024 * 1024);
    }

    #[test]
    fn test_context_from_config() {
        let mut config = Config::default();
        config.upload.flush_threshold_mib = 1;
        let ctx = Context::new(&config);
        assert_eq!(ctx.settings().upload_flush_threshold, 1 << 20);
        ctx.wait_idle();
    }

    #[test]
    fn test_wait_idle_retires_work() {
        let (ctx, gpu) = headless_context();
        ctx.wait_idle();
        assert_eq!(gpu.pending_submissions(), 0);
    }
}
