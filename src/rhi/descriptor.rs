//! 描述符管理模块
//!
//! 固定容量的描述符堆与槽位分配器。
//!
//! # 堆种类
//!
//! - **RTV** (Render Target View)：渲染目标视图，CPU 可见
//! - **DSV** (Depth Stencil View)：深度模板视图，CPU 可见
//! - **CBV/SRV/UAV**：常量缓冲、着色资源与无序访问视图，共享一个着色器可见的堆
//! - **Sampler**：采样器，着色器可见
//!
//! 分配使用占用表线性扫描第一个空闲槽位，释放只清除占用位，不做整理。

use std::cell::RefCell;

use crate::core::error::{DistRhiError, GraphicsError, Result};
use crate::gfx::backend::{GpuDevice, RawHeap, RawHeapInfo};

/// RTV 堆容量
pub const RTV_HEAP_CAPACITY: u32 = 2_048;
/// DSV 堆容量
pub const DSV_HEAP_CAPACITY: u32 = 2_048;
/// 采样器堆容量
pub const SAMPLER_HEAP_CAPACITY: u32 = 2_048;
/// CBV/SRV/UAV 堆容量
pub const RESOURCE_HEAP_CAPACITY: u32 = 1_000_000;

/// 描述符堆种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    /// 渲染目标视图 (RTV)
    RenderTarget,
    /// 深度模板视图 (DSV)
    DepthStencil,
    /// 常量缓冲 / 着色资源 / 无序访问视图
    Resource,
    /// 采样器
    Sampler,
}

impl DescriptorHeapKind {
    /// 堆是否着色器可见
    pub fn is_shader_visible(&self) -> bool {
        matches!(self, DescriptorHeapKind::Resource | DescriptorHeapKind::Sampler)
    }

    /// 默认容量
    pub fn default_capacity(&self) -> u32 {
        match self {
            DescriptorHeapKind::RenderTarget => RTV_HEAP_CAPACITY,
            DescriptorHeapKind::DepthStencil => DSV_HEAP_CAPACITY,
            DescriptorHeapKind::Resource => RESOURCE_HEAP_CAPACITY,
            DescriptorHeapKind::Sampler => SAMPLER_HEAP_CAPACITY,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DescriptorHeapKind::RenderTarget => "RTV",
            DescriptorHeapKind::DepthStencil => "DSV",
            DescriptorHeapKind::Resource => "CBV/SRV/UAV",
            DescriptorHeapKind::Sampler => "Sampler",
        }
    }
}

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: usize,
}

impl CpuDescriptorHandle {
    pub fn new(ptr: usize) -> Self {
        Self { ptr }
    }

    /// 偏移句柄
    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as usize * increment_size as usize,
        }
    }
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
}

impl GpuDescriptorHandle {
    pub fn new(ptr: u64) -> Self {
        Self { ptr }
    }

    pub fn offset(&self, count: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + count as u64 * increment_size as u64,
        }
    }
}

/// 描述符
///
/// 由 [`DescriptorHeap::allocate`] 产生，[`DescriptorHeap::free`] 之后失效。
/// 不实现 `Clone`，同一个槽位只能被释放一次。
#[derive(Debug)]
pub struct Descriptor {
    valid: bool,
    index: u32,
    cpu: CpuDescriptorHandle,
    gpu: Option<GpuDescriptorHandle>,
    heap: DescriptorHeapKind,
}

impl Descriptor {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// 堆内索引（无绑定着色器通过它访问资源）
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn cpu(&self) -> CpuDescriptorHandle {
        self.cpu
    }

    /// GPU 句柄，仅着色器可见的堆才有
    pub fn gpu(&self) -> Option<GpuDescriptorHandle> {
        self.gpu
    }

    pub fn heap_kind(&self) -> DescriptorHeapKind {
        self.heap
    }
}

/// 描述符堆统计信息
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorHeapStats {
    pub kind: DescriptorHeapKind,
    /// 总容量
    pub capacity: u32,
    /// 已使用数量
    pub used: u32,
    /// 可用数量
    pub available: u32,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    pub fn new(kind: DescriptorHeapKind, capacity: u32, used: u32) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };

        Self { kind, capacity, used, available, usage_ratio }
    }
}

/// 固定容量的描述符堆
pub struct DescriptorHeap {
    kind: DescriptorHeapKind,
    info: RawHeapInfo,
    capacity: u32,
    occupancy: RefCell<Vec<bool>>,
}

impl DescriptorHeap {
    /// 创建描述符堆
    ///
    /// 后端创建失败是致命错误。
    pub fn new(device: &dyn GpuDevice, kind: DescriptorHeapKind, capacity: u32) -> Self {
        let info = match device.create_descriptor_heap(kind, capacity, kind.is_shader_visible()) {
            Ok(info) => info,
            Err(e) => crate::fatal!("Failed to create {} descriptor heap: {}", kind.name(), e),
        };

        tracing::debug!(
            heap = kind.name(),
            capacity,
            increment = info.increment_size,
            shader_visible = kind.is_shader_visible(),
            "Descriptor heap created"
        );

        Self {
            kind,
            info,
            capacity,
            occupancy: RefCell::new(vec![false; capacity as usize]),
        }
    }

    /// 分配描述符，堆已满时返回错误
    pub fn try_allocate(&self) -> Result<Descriptor> {
        let mut occupancy = self.occupancy.borrow_mut();
        let index = occupancy
            .iter()
            .position(|used| !used)
            .ok_or(DistRhiError::Graphics(GraphicsError::DescriptorHeapFull {
                heap: self.kind.name(),
                capacity: self.capacity,
            }))?;
        occupancy[index] = true;

        let index = index as u32;
        let cpu = CpuDescriptorHandle::new(self.info.cpu_base).offset(index, self.info.increment_size);
        let gpu = self
            .info
            .gpu_base
            .map(|base| GpuDescriptorHandle::new(base).offset(index, self.info.increment_size));

        tracing::trace!(heap = self.kind.name(), index, "Descriptor allocated");

        Ok(Descriptor {
            valid: true,
            index,
            cpu,
            gpu,
            heap: self.kind,
        })
    }

    /// 分配描述符
    ///
    /// 堆耗尽是致命错误。
    pub fn allocate(&self) -> Descriptor {
        match self.try_allocate() {
            Ok(descriptor) => descriptor,
            Err(e) => crate::fatal!("{}", e),
        }
    }

    /// 释放描述符；对无效描述符无操作
    pub fn free(&self, descriptor: &mut Descriptor) {
        if !descriptor.valid {
            return;
        }
        if descriptor.heap != self.kind {
            crate::engine_error!(
                "Descriptor {} of the {} heap freed into the {} heap; ignored",
                descriptor.index,
                descriptor.heap.name(),
                self.kind.name()
            );
            return;
        }

        if let Some(slot) = self.occupancy.borrow_mut().get_mut(descriptor.index as usize) {
            *slot = false;
        }
        descriptor.valid = false;

        tracing::trace!(heap = self.kind.name(), index = descriptor.index, "Descriptor freed");
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn raw(&self) -> RawHeap {
        self.info.raw
    }

    pub fn increment_size(&self) -> u32 {
        self.info.increment_size
    }

    pub fn used(&self) -> u32 {
        self.occupancy.borrow().iter().filter(|used| **used).count() as u32
    }

    pub fn is_full(&self) -> bool {
        self.occupancy.borrow().iter().all(|used| *used)
    }

    pub fn stats(&self) -> DescriptorHeapStats {
        DescriptorHeapStats::new(self.kind, self.capacity, self.used())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::HeadlessDevice;

    fn heap(kind: DescriptorHeapKind, capacity: u32) -> DescriptorHeap {
        let device = HeadlessDevice::new();
        DescriptorHeap::new(device.as_ref(), kind, capacity)
    }

    #[test]
    fn test_handles_follow_increment() {
        let heap = heap(DescriptorHeapKind::Resource, 4);
        let a = heap.allocate();
        let b = heap.allocate();

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(b.cpu().ptr - a.cpu().ptr, heap.increment_size() as usize);
        assert!(a.gpu().is_some());
        assert_eq!(a.heap_kind(), DescriptorHeapKind::Resource);
    }

    #[test]
    fn test_cpu_only_heap_has_no_gpu_handle() {
        let heap = heap(DescriptorHeapKind::RenderTarget, 4);
        assert!(heap.allocate().gpu().is_none());
    }

    #[test]
    fn test_capacity_eight_exhaustion_and_reuse() {
        let heap = heap(DescriptorHeapKind::Resource, 8);
        let mut descriptors: Vec<_> = (0..8).map(|_| heap.allocate()).collect();
        let indices: Vec<u32> = descriptors.iter().map(|d| d.index()).collect();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());

        assert!(heap.is_full());
        assert!(matches!(
            heap.try_allocate(),
            Err(DistRhiError::Graphics(GraphicsError::DescriptorHeapFull { capacity: 8, .. }))
        ));

        heap.free(&mut descriptors[3]);
        assert!(!descriptors[3].is_valid());
        assert_eq!(heap.allocate().index(), 3);
    }

    #[test]
    #[should_panic(expected = "descriptor heap is full")]
    fn test_allocate_on_full_heap_is_fatal() {
        let heap = heap(DescriptorHeapKind::Sampler, 1);
        let _first = heap.allocate();
        let _second = heap.allocate();
    }

    #[test]
    fn test_free_invalid_descriptor_is_noop() {
        let heap = heap(DescriptorHeapKind::DepthStencil, 2);
        let mut a = heap.allocate();
        let _b = heap.allocate();

        heap.free(&mut a);
        heap.free(&mut a);
        assert_eq!(heap.used(), 1);

        // 第二次释放不能把别人重新占用的槽位清掉
        let c = heap.allocate();
        assert_eq!(c.index(), 0);
        heap.free(&mut a);
        assert_eq!(heap.used(), 2);
    }

    #[test]
    fn test_live_indices_are_unique() {
        let heap = heap(DescriptorHeapKind::Resource, 16);
        let mut live: Vec<Descriptor> = Vec::new();
        for round in 0..32u32 {
            if round % 3 == 2 && !live.is_empty() {
                let mut d = live.remove((round as usize) % live.len());
                heap.free(&mut d);
            } else if !heap.is_full() {
                live.push(heap.allocate());
            }
            let mut indices: Vec<u32> = live.iter().map(|d| d.index()).collect();
            indices.sort_unstable();
            indices.dedup();
            assert_eq!(indices.len(), live.len());
        }
    }

    #[test]
    fn test_freed_descriptor_cannot_release_reused_slot() {
        let heap = heap(DescriptorHeapKind::Resource, 4);
        let mut first = heap.allocate();
        heap.free(&mut first);

        let reused = heap.allocate();
        assert_eq!(reused.index(), 0);
        heap.free(&mut first);

        let next = heap.allocate();
        assert_ne!(next.index(), reused.index());
        assert_eq!(heap.used(), 2);
    }

    #[test]
    fn test_free_into_wrong_heap_is_ignored() {
        let samplers = heap(DescriptorHeapKind::Sampler, 2);
        let resources = heap(DescriptorHeapKind::Resource, 2);
        let mut sampler = samplers.allocate();
        let _resource = resources.allocate();

        resources.free(&mut sampler);
        assert!(sampler.is_valid());
        assert_eq!(resources.used(), 1);
        assert_eq!(samplers.used(), 1);

        samplers.free(&mut sampler);
        assert_eq!(samplers.used(), 0);
    }

    #[test]
    fn test_stats() {
        let heap = heap(DescriptorHeapKind::Resource, 4);
        let _a = heap.allocate();
        let stats = heap.stats();
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.used, 1);
        assert_eq!(stats.available, 3);
        assert!((stats.usage_ratio - 0.25).abs() < f32::EPSILON);
    }
}
