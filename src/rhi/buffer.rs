//! 缓冲区
//!
//! 缓冲区类型决定内存堆、初始布局以及预先构建的辅助视图（顶点/索引缓冲视图）。
//!
//! | 类型 | 堆 | 初始布局 |
//! |------|----|----------|
//! | Vertex / Index | 默认堆 | Common |
//! | Constant | 上传堆 | GenericRead |
//! | Storage | 默认堆（允许 UAV） | Common |
//! | Copy | 上传堆 | GenericRead |
//! | Readback | 回读堆 | CopyDest |
//! | AccelerationStructure | 默认堆（允许 UAV） | AccelerationStructure |

use std::rc::Rc;

use crate::core::error::{DistRhiError, Result};
use crate::gfx::backend::{GpuDevice, RawBufferDesc};
use crate::rhi::context::Context;
use crate::rhi::resource::{align_up, Format, Resource, ResourceKind, ResourceLayout, ResourceState};

/// 常量缓冲区对齐（DirectX 12 要求 256 字节）
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 缓冲区类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    /// 顶点缓冲区
    Vertex,
    /// 索引缓冲区
    Index,
    /// 常量缓冲区
    Constant,
    /// 存储缓冲区（结构化 / 原始，可读写）
    Storage,
    /// 暂存缓冲区（CPU → GPU）
    Copy,
    /// 回读缓冲区（GPU → CPU）
    Readback,
    /// 加速结构存储
    AccelerationStructure,
}

impl BufferType {
    pub fn memory(&self) -> MemoryType {
        match self {
            BufferType::Constant | BufferType::Copy => MemoryType::Upload,
            BufferType::Readback => MemoryType::Readback,
            _ => MemoryType::DeviceLocal,
        }
    }

    pub fn initial_layout(&self) -> ResourceLayout {
        match self {
            BufferType::Constant | BufferType::Copy => ResourceLayout::GenericRead,
            BufferType::Readback => ResourceLayout::CopyDest,
            BufferType::AccelerationStructure => ResourceLayout::AccelerationStructure,
            _ => ResourceLayout::Common,
        }
    }

    pub fn allows_unordered_access(&self) -> bool {
        matches!(self, BufferType::Storage | BufferType::AccelerationStructure)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BufferType::Vertex => "Vertex",
            BufferType::Index => "Index",
            BufferType::Constant => "Constant",
            BufferType::Storage => "Storage",
            BufferType::Copy => "Copy",
            BufferType::Readback => "Readback",
            BufferType::AccelerationStructure => "AccelerationStructure",
        }
    }
}

/// 缓冲区内存类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    /// GPU 本地内存（仅 GPU 可访问）
    DeviceLocal,
    /// 上传堆（CPU 写，GPU 读）
    Upload,
    /// 回读堆（GPU 写，CPU 读）
    Readback,
}

impl MemoryType {
    pub fn is_cpu_writable(&self) -> bool {
        *self == MemoryType::Upload
    }

    pub fn is_cpu_readable(&self) -> bool {
        *self == MemoryType::Readback
    }
}

/// 缓冲区描述信息
#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub buffer_type: BufferType,
    /// 大小（字节）
    pub size: u64,
    /// 元素步长（字节），原始缓冲区为 0
    pub stride: u32,
    pub name: String,
    pub tags: Vec<String>,
}

impl BufferDesc {
    pub fn new(buffer_type: BufferType, size: u64, stride: u32) -> Self {
        Self {
            buffer_type,
            size,
            stride,
            name: format!("{} Buffer", buffer_type.name()),
            tags: Vec::new(),
        }
    }

    pub fn vertex(size: u64, stride: u32) -> Self {
        Self::new(BufferType::Vertex, size, stride)
    }

    pub fn index(size: u64, stride: u32) -> Self {
        Self::new(BufferType::Index, size, stride)
    }

    pub fn constant(size: u64) -> Self {
        Self::new(BufferType::Constant, size, 0)
    }

    pub fn storage(size: u64, stride: u32) -> Self {
        Self::new(BufferType::Storage, size, stride)
    }

    pub fn copy(size: u64) -> Self {
        Self::new(BufferType::Copy, size, 0)
    }

    pub fn readback(size: u64) -> Self {
        Self::new(BufferType::Readback, size, 0)
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// 实际分配的大小（常量缓冲区对齐到 256 字节）
    pub fn aligned_size(&self) -> u64 {
        if self.buffer_type == BufferType::Constant {
            align_up(self.size, CONSTANT_BUFFER_ALIGNMENT)
        } else {
            self.size
        }
    }
}

/// 顶点缓冲视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub address: u64,
    pub size: u32,
    pub stride: u32,
}

/// 索引缓冲视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferView {
    pub address: u64,
    pub size: u32,
    pub format: Format,
}

/// GPU 缓冲区
#[derive(Debug)]
pub struct Buffer {
    state: ResourceState,
    buffer_type: BufferType,
    address: u64,
    vertex_view: Option<VertexBufferView>,
    index_view: Option<IndexBufferView>,
}

impl Buffer {
    pub fn new(context: &Context, desc: &BufferDesc) -> Result<Self> {
        Self::with_device(context.gpu(), desc)
    }

    pub(crate) fn with_device(device: &Rc<dyn GpuDevice>, desc: &BufferDesc) -> Result<Self> {
        if desc.size == 0 {
            return Err(DistRhiError::resource(format!("buffer '{}' has zero size", desc.name)));
        }

        let index_format = match (desc.buffer_type, desc.stride) {
            (BufferType::Index, 2) => Some(Format::R16Uint),
            (BufferType::Index, 4) => Some(Format::R32Uint),
            (BufferType::Index, stride) => {
                return Err(DistRhiError::resource(format!(
                    "index buffer '{}' has stride {} (expected 2 or 4)",
                    desc.name, stride
                )));
            }
            _ => None,
        };

        if desc.buffer_type == BufferType::Vertex && desc.stride == 0 {
            return Err(DistRhiError::resource(format!(
                "vertex buffer '{}' needs a stride",
                desc.name
            )));
        }

        let size = desc.aligned_size();
        // 顶点 / 索引视图的大小字段只有 32 位
        let view_size = match desc.buffer_type {
            BufferType::Vertex | BufferType::Index => Some(u32::try_from(size).map_err(|_| {
                DistRhiError::resource(format!(
                    "{} buffer '{}' is {} bytes; views are limited to {} bytes",
                    desc.buffer_type.name(),
                    desc.name,
                    size,
                    u32::MAX
                ))
            })?),
            _ => None,
        };
        let layout = desc.buffer_type.initial_layout();
        let raw = device.create_buffer(&RawBufferDesc {
            name: &desc.name,
            size,
            memory: desc.buffer_type.memory(),
            initial_layout: layout,
            unordered_access: desc.buffer_type.allows_unordered_access(),
            acceleration_structure: desc.buffer_type == BufferType::AccelerationStructure,
        })?;
        let address = device.gpu_address(raw);

        let vertex_view = view_size
            .filter(|_| desc.buffer_type == BufferType::Vertex)
            .map(|size| VertexBufferView { address, size, stride: desc.stride });
        let index_view = view_size
            .zip(index_format)
            .map(|(size, format)| IndexBufferView { address, size, format });

        tracing::debug!(
            name = %desc.name,
            ty = desc.buffer_type.name(),
            bytes = size,
            "Buffer created"
        );

        Ok(Self {
            state: ResourceState::new(
                device.clone(),
                raw,
                size,
                desc.stride,
                layout,
                desc.name.clone(),
                desc.tags.clone(),
            ),
            buffer_type: desc.buffer_type,
            address,
            vertex_view,
            index_view,
        })
    }

    pub fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    pub fn memory(&self) -> MemoryType {
        self.buffer_type.memory()
    }

    pub fn gpu_address(&self) -> u64 {
        self.address
    }

    pub fn stride(&self) -> u32 {
        self.state.stride()
    }

    /// 元素数量；原始缓冲区按 4 字节计
    pub fn element_count(&self) -> u64 {
        match self.state.stride() {
            0 => self.state.size() / 4,
            stride => self.state.size() / stride as u64,
        }
    }

    pub fn vertex_view(&self) -> Option<&VertexBufferView> {
        self.vertex_view.as_ref()
    }

    pub fn index_view(&self) -> Option<&IndexBufferView> {
        self.index_view.as_ref()
    }

    /// 写入 CPU 可见内存（常量 / 暂存缓冲区）
    pub fn copy_mapped(&self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.memory().is_cpu_writable() {
            return Err(DistRhiError::usage(format!(
                "{} buffer '{}' is not CPU writable",
                self.buffer_type.name(),
                self.state.name()
            )));
        }
        self.check_range(offset, data.len() as u64)?;
        self.state.device().write_buffer(self.state.raw(), offset, data)
    }

    /// 写入一个 `Pod` 值
    pub fn copy_mapped_pod<T: bytemuck::Pod>(&self, offset: u64, value: &T) -> Result<()> {
        self.copy_mapped(offset, bytemuck::bytes_of(value))
    }

    /// 读取回读缓冲区
    pub fn read_mapped(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        if !self.memory().is_cpu_readable() {
            return Err(DistRhiError::usage(format!(
                "{} buffer '{}' is not CPU readable",
                self.buffer_type.name(),
                self.state.name()
            )));
        }
        self.check_range(offset, len)?;
        let mut out = vec![0u8; len as usize];
        self.state.device().read_buffer(self.state.raw(), offset, &mut out)?;
        Ok(out)
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<()> {
        let end = offset.checked_add(len);
        match end {
            Some(end) if end <= self.state.size() => Ok(()),
            _ => Err(DistRhiError::usage(format!(
                "range {}..{} is out of bounds for buffer '{}' ({} bytes)",
                offset,
                offset.saturating_add(len),
                self.state.name(),
                self.state.size()
            ))),
        }
    }
}

impl Resource for Buffer {
    fn state(&self) -> &ResourceState {
        &self.state
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Buffer
    }

    fn buffer_usage(&self) -> Option<BufferType> {
        Some(self.buffer_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GraphicsError;
    use crate::rhi::command::CommandBuffer;
    use crate::rhi::context::tests::headless_context;

    #[test]
    fn test_type_properties() {
        assert_eq!(BufferType::Constant.memory(), MemoryType::Upload);
        assert_eq!(BufferType::Readback.initial_layout(), ResourceLayout::CopyDest);
        assert_eq!(BufferType::Vertex.initial_layout(), ResourceLayout::Common);
        assert!(BufferType::Storage.allows_unordered_access());
        assert!(!BufferType::Index.allows_unordered_access());
    }

    #[test]
    fn test_constant_buffer_alignment() {
        let (ctx, _gpu) = headless_context();
        let buffer = Buffer::new(&ctx, &BufferDesc::constant(100)).unwrap();
        assert_eq!(buffer.size(), 256);
        assert_eq!(buffer.layout(), ResourceLayout::GenericRead);
    }

    #[test]
    fn test_vertex_and_index_views() {
        let (ctx, _gpu) = headless_context();
        let vb = Buffer::new(&ctx, &BufferDesc::vertex(96, 32)).unwrap();
        let view = vb.vertex_view().unwrap();
        assert_eq!(view.stride, 32);
        assert_eq!(view.size, 96);
        assert_eq!(view.address, vb.gpu_address());
        assert!(vb.index_view().is_none());

        let ib = Buffer::new(&ctx, &BufferDesc::index(12, 2)).unwrap();
        assert_eq!(ib.index_view().unwrap().format, Format::R16Uint);
        let ib = Buffer::new(&ctx, &BufferDesc::index(12, 4)).unwrap();
        assert_eq!(ib.index_view().unwrap().format, Format::R32Uint);

        assert!(Buffer::new(&ctx, &BufferDesc::index(12, 3)).is_err());
    }

    #[test]
    fn test_oversized_vertex_buffer_rejected() {
        let (ctx, gpu) = headless_context();
        let before = gpu.live_resource_count();
        let err = Buffer::new(&ctx, &BufferDesc::vertex(u32::MAX as u64 + 1, 4)).unwrap_err();
        assert!(matches!(err, DistRhiError::Graphics(GraphicsError::ResourceCreation(_))));
        assert!(Buffer::new(&ctx, &BufferDesc::index(u32::MAX as u64 + 4, 4)).is_err());
        assert_eq!(gpu.live_resource_count(), before);
    }

    #[test]
    fn test_mapped_round_trip_through_copy() {
        let (ctx, _gpu) = headless_context();
        let upload = Buffer::new(&ctx, &BufferDesc::copy(32).with_name("upload")).unwrap();
        let readback = Buffer::new(&ctx, &BufferDesc::readback(32).with_name("readback")).unwrap();
        let payload: Vec<u8> = (0..16).collect();
        upload.copy_mapped(8, &payload).unwrap();
        upload.copy_mapped_pod(0, &0xdead_beef_u32).unwrap();

        let mut cmd = CommandBuffer::new(&ctx, "round trip", true).unwrap();
        cmd.begin().unwrap();
        cmd.copy_buffer(&readback, 0, &upload, 0, 32).unwrap();
        cmd.end().unwrap();
        ctx.queue().execute(&[&cmd]).unwrap();

        // 提交尚未完成前回读缓冲区仍是旧内容
        assert_eq!(readback.read_mapped(8, 16).unwrap(), vec![0u8; 16]);

        ctx.wait_idle();
        assert_eq!(readback.read_mapped(8, 16).unwrap(), payload);
        let head = readback.read_mapped(0, 4).unwrap();
        assert_eq!(u32::from_le_bytes([head[0], head[1], head[2], head[3]]), 0xdead_beef);
        assert!(readback.read_mapped(24, 16).is_err());
    }

    #[test]
    fn test_mapped_misuse() {
        let (ctx, _gpu) = headless_context();
        let storage = Buffer::new(&ctx, &BufferDesc::storage(64, 4)).unwrap();
        assert!(matches!(
            storage.copy_mapped(0, &[1, 2, 3]),
            Err(DistRhiError::Graphics(GraphicsError::InvalidUsage(_)))
        ));
        assert!(storage.read_mapped(0, 4).is_err());

        let copy = Buffer::new(&ctx, &BufferDesc::copy(16)).unwrap();
        assert!(copy.copy_mapped(8, &[0u8; 8]).is_ok());
        assert!(copy.copy_mapped(12, &[0u8; 8]).is_err());
    }

    #[test]
    fn test_zero_size_rejected() {
        let (ctx, _gpu) = headless_context();
        assert!(Buffer::new(&ctx, &BufferDesc::storage(0, 4)).is_err());
    }

    #[test]
    fn test_drop_releases_backend_resource() {
        let (ctx, gpu) = headless_context();
        let before = gpu.live_resource_count();
        let buffer = Buffer::new(&ctx, &BufferDesc::storage(64, 4).with_tag("scratch")).unwrap();
        assert!(buffer.state().has_tag("scratch"));
        assert_eq!(gpu.live_resource_count(), before + 1);
        drop(buffer);
        assert_eq!(gpu.live_resource_count(), before);
    }
}
