//! 资源管理模块
//!
//! 定义所有 GPU 资源共享的部分：布局（状态）枚举、像素格式、[`Resource`] trait
//! 以及布局状态机。
//!
//! # 布局跟踪
//!
//! 资源的当前布局是 CPU 侧状态，在屏障被 *记录* 时立即更新，而不是在 GPU 执行时。
//! 这只有在同一资源的所有屏障都按程序顺序进入同一个队列时才成立。

use std::cell::Cell;
use std::rc::Rc;

use crate::gfx::backend::{GpuDevice, RawResource};
use crate::rhi::buffer::BufferType;
use crate::rhi::texture::TextureUsage;

/// 资源布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceLayout {
    Common,
    /// 像素着色器读取
    ShaderResource,
    /// 存储（UAV）
    UnorderedAccess,
    DepthWrite,
    DepthRead,
    RenderTarget,
    CopySource,
    CopyDest,
    Present,
    GenericRead,
    VertexAndConstantBuffer,
    AccelerationStructure,
    /// 非像素着色器读取
    NonPixelShaderResource,
}

impl ResourceLayout {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceLayout::Common => "Common",
            ResourceLayout::ShaderResource => "ShaderResource",
            ResourceLayout::UnorderedAccess => "UnorderedAccess",
            ResourceLayout::DepthWrite => "DepthWrite",
            ResourceLayout::DepthRead => "DepthRead",
            ResourceLayout::RenderTarget => "RenderTarget",
            ResourceLayout::CopySource => "CopySource",
            ResourceLayout::CopyDest => "CopyDest",
            ResourceLayout::Present => "Present",
            ResourceLayout::GenericRead => "GenericRead",
            ResourceLayout::VertexAndConstantBuffer => "VertexAndConstantBuffer",
            ResourceLayout::AccelerationStructure => "AccelerationStructure",
            ResourceLayout::NonPixelShaderResource => "NonPixelShaderResource",
        }
    }
}

/// 屏障决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierAction {
    /// 布局相同，省略
    Elided,
    /// UAV → UAV：只保证写后写顺序
    Execution,
    /// 状态转换
    Transition {
        before: ResourceLayout,
        after: ResourceLayout,
    },
}

/// 布局状态机：根据当前布局和目标布局决定需要发出的屏障
pub fn plan_barrier(current: ResourceLayout, new: ResourceLayout) -> BarrierAction {
    let uav = ResourceLayout::UnorderedAccess;
    if current == uav && new == uav {
        BarrierAction::Execution
    } else if current == new {
        BarrierAction::Elided
    } else {
        BarrierAction::Transition { before: current, after: new }
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    R16Uint,
    R16Float,
    Rgba16Float,
    R32Uint,
    R32Float,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
    Depth32Float,
    Depth24Stencil8,
    Bc1Unorm,
    Bc3Unorm,
    Bc5Unorm,
    Bc7Unorm,
}

impl Format {
    /// 每个块（未压缩格式为每个像素）的字节数
    pub fn bytes_per_block(&self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R8Unorm => 1,
            Format::Rg8Unorm | Format::R16Uint | Format::R16Float => 2,
            Format::Rgba8Unorm
            | Format::Rgba8Srgb
            | Format::Bgra8Unorm
            | Format::R32Uint
            | Format::R32Float
            | Format::Depth32Float
            | Format::Depth24Stencil8 => 4,
            Format::Rgba16Float | Format::Rg32Float | Format::Bc1Unorm => 8,
            Format::Rgb32Float => 12,
            Format::Rgba32Float | Format::Bc3Unorm | Format::Bc5Unorm | Format::Bc7Unorm => 16,
        }
    }

    /// 块的边长（像素），块压缩格式为 4
    pub fn block_dimension(&self) -> u32 {
        if self.is_compressed() { 4 } else { 1 }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, Format::Bc1Unorm | Format::Bc3Unorm | Format::Bc5Unorm | Format::Bc7Unorm)
    }

    pub fn is_depth(&self) -> bool {
        matches!(self, Format::Depth32Float | Format::Depth24Stencil8)
    }

    /// 一行（块行）的紧凑字节数
    pub fn row_bytes(&self, width: u32) -> u64 {
        let blocks = width.div_ceil(self.block_dimension()).max(1);
        blocks as u64 * self.bytes_per_block() as u64
    }

    /// 行（块行）数
    pub fn row_count(&self, height: u32) -> u32 {
        height.div_ceil(self.block_dimension()).max(1)
    }
}

/// 向上对齐到 `alignment`（必须是 2 的幂）
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// 资源种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer,
    Texture,
    AccelerationStructure,
}

/// GPU 资源能力接口
///
/// 由 `Buffer`、`Texture`、`AccelerationStructure` 分别实现，
/// 命令缓冲区只通过这个接口读写布局。
pub trait Resource {
    fn state(&self) -> &ResourceState;

    fn kind(&self) -> ResourceKind;

    fn raw(&self) -> RawResource {
        self.state().raw()
    }

    fn layout(&self) -> ResourceLayout {
        self.state().layout()
    }

    fn set_layout(&self, layout: ResourceLayout) {
        self.state().set_layout(layout)
    }

    fn size(&self) -> u64 {
        self.state().size()
    }

    fn name(&self) -> &str {
        self.state().name()
    }

    /// 纹理格式；缓冲区为 `Format::Unknown`
    fn format(&self) -> Format {
        Format::Unknown
    }

    fn mip_levels(&self) -> u32 {
        1
    }

    fn array_layers(&self) -> u32 {
        1
    }

    /// 纹理用途；非纹理资源为空
    fn texture_usage(&self) -> TextureUsage {
        TextureUsage::empty()
    }

    /// 缓冲区类型；非缓冲区资源为 `None`
    fn buffer_usage(&self) -> Option<BufferType> {
        None
    }

    /// 缓冲区类资源的 GPU 虚拟地址
    fn gpu_address(&self) -> u64 {
        self.state().device().gpu_address(self.raw())
    }
}

/// 所有资源共享的状态
///
/// 拥有后端资源句柄，析构时归还给后端。
pub struct ResourceState {
    device: Rc<dyn GpuDevice>,
    raw: RawResource,
    size: u64,
    stride: u32,
    layout: Cell<ResourceLayout>,
    name: String,
    tags: Vec<String>,
}

impl ResourceState {
    pub(crate) fn new(
        device: Rc<dyn GpuDevice>,
        raw: RawResource,
        size: u64,
        stride: u32,
        layout: ResourceLayout,
        name: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            device,
            raw,
            size,
            stride,
            layout: Cell::new(layout),
            name: name.into(),
            tags,
        }
    }

    pub fn raw(&self) -> RawResource {
        self.raw
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn layout(&self) -> ResourceLayout {
        self.layout.get()
    }

    pub fn set_layout(&self, layout: ResourceLayout) {
        self.layout.set(layout);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn device(&self) -> &Rc<dyn GpuDevice> {
        &self.device
    }
}

impl Drop for ResourceState {
    fn drop(&mut self) {
        tracing::trace!(resource = %self.raw, name = %self.name, "Destroying resource");
        self.device.destroy_resource(self.raw);
    }
}

impl std::fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceState")
            .field("raw", &self.raw)
            .field("size", &self.size)
            .field("stride", &self.stride)
            .field("layout", &self.layout.get())
            .field("name", &self.name)
            .field("tags", &self.tags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_elision() {
        let action = plan_barrier(ResourceLayout::ShaderResource, ResourceLayout::ShaderResource);
        assert_eq!(action, BarrierAction::Elided);
    }

    #[test]
    fn test_uav_to_uav_is_execution_barrier() {
        let action = plan_barrier(ResourceLayout::UnorderedAccess, ResourceLayout::UnorderedAccess);
        assert_eq!(action, BarrierAction::Execution);
    }

    #[test]
    fn test_transition() {
        let action = plan_barrier(ResourceLayout::Common, ResourceLayout::CopyDest);
        assert_eq!(
            action,
            BarrierAction::Transition {
                before: ResourceLayout::Common,
                after: ResourceLayout::CopyDest,
            }
        );

        // 进入或离开 UAV 都是普通转换
        let action = plan_barrier(ResourceLayout::UnorderedAccess, ResourceLayout::ShaderResource);
        assert!(matches!(action, BarrierAction::Transition { .. }));
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(Format::Rgba8Unorm.row_bytes(100), 400);
        assert_eq!(Format::Bc1Unorm.row_bytes(16), 32);
        assert_eq!(Format::Bc7Unorm.row_bytes(2), 16);
        assert_eq!(Format::Bc7Unorm.row_count(6), 2);
        assert_eq!(Format::Rgba32Float.row_count(7), 7);
        assert!(Format::Depth32Float.is_depth());
        assert!(!Format::Rgba16Float.is_compressed());
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(300, 512), 512);
    }
}
