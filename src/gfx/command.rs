//! 后端无关的命令流
//!
//! `rhi::CommandBuffer` 在完成状态检查和布局簿记之后，把每条命令翻译成一个 [`Command`]
//! 交给后端记录。命令只引用原始句柄和已经解析好的数值，不持有上层对象。

use crate::gfx::backend::{RawHeap, RawPipeline, RawResource};
use crate::rhi::buffer::{IndexBufferView, VertexBufferView};
use crate::rhi::descriptor::CpuDescriptorHandle;
use crate::rhi::pipeline::{PipelineKind, Topology};
use crate::rhi::resource::{Format, ResourceLayout};
use crate::rhi::texture::PlacedFootprint;

/// 视口
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// 覆盖整个渲染目标的视口
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 裁剪矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self { left: 0, top: 0, right: width as i32, bottom: height as i32 }
    }
}

/// 三角形几何（BLAS 输入）
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleGeometry {
    pub vertex_address: u64,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub vertex_format: Format,
    /// 索引缓冲区地址，0 表示非索引几何
    pub index_address: u64,
    pub index_count: u32,
    pub index_format: Format,
    pub opaque: bool,
}

/// 加速结构构建输入
#[derive(Debug, Clone, PartialEq)]
pub enum AccelerationBuildInputs {
    BottomLevel {
        geometries: Vec<TriangleGeometry>,
        allow_update: bool,
    },
    TopLevel {
        instance_address: u64,
        instance_count: u32,
        allow_update: bool,
    },
}

/// 后端命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 绑定两个着色器可见堆（资源 + 采样器）
    SetDescriptorHeaps {
        resource: RawHeap,
        sampler: RawHeap,
    },
    /// 状态转换屏障
    Transition {
        resource: RawResource,
        before: ResourceLayout,
        after: ResourceLayout,
    },
    /// 执行屏障（UAV → UAV），不改变状态
    UnorderedAccessBarrier {
        resource: RawResource,
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    SetTopology(Topology),
    SetPipeline {
        pipeline: RawPipeline,
        kind: PipelineKind,
    },
    SetRenderTargets {
        colors: Vec<CpuDescriptorHandle>,
        depth: Option<CpuDescriptorHandle>,
    },
    SetVertexBuffer(VertexBufferView),
    SetIndexBuffer(IndexBufferView),
    /// 根常量（按 dword）
    PushConstants {
        compute: bool,
        data: Vec<u32>,
    },
    ClearRenderTarget {
        resource: RawResource,
        handle: CpuDescriptorHandle,
        color: [f32; 4],
    },
    ClearDepth {
        resource: RawResource,
        handle: CpuDescriptorHandle,
        depth: f32,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
    DispatchMesh {
        x: u32,
        y: u32,
        z: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer {
        dst: RawResource,
        dst_offset: u64,
        src: RawResource,
        src_offset: u64,
        size: u64,
    },
    CopyBufferToTexture {
        dst: RawResource,
        subresource: u32,
        src: RawResource,
        footprint: PlacedFootprint,
    },
    CopyTextureToBuffer {
        dst: RawResource,
        footprint: PlacedFootprint,
        src: RawResource,
        subresource: u32,
    },
    BuildAccelerationStructure {
        dst: RawResource,
        /// 更新时的源结构（原地更新时等于 dst）
        src: Option<RawResource>,
        scratch: RawResource,
        inputs: AccelerationBuildInputs,
    },
    BeginMarker(String),
    EndMarker,
}

impl Command {
    /// 命令名称，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetDescriptorHeaps { .. } => "SetDescriptorHeaps",
            Command::Transition { .. } => "Transition",
            Command::UnorderedAccessBarrier { .. } => "UnorderedAccessBarrier",
            Command::SetViewport(_) => "SetViewport",
            Command::SetScissor(_) => "SetScissor",
            Command::SetTopology(_) => "SetTopology",
            Command::SetPipeline { .. } => "SetPipeline",
            Command::SetRenderTargets { .. } => "SetRenderTargets",
            Command::SetVertexBuffer(_) => "SetVertexBuffer",
            Command::SetIndexBuffer(_) => "SetIndexBuffer",
            Command::PushConstants { .. } => "PushConstants",
            Command::ClearRenderTarget { .. } => "ClearRenderTarget",
            Command::ClearDepth { .. } => "ClearDepth",
            Command::Draw { .. } => "Draw",
            Command::DrawIndexed { .. } => "DrawIndexed",
            Command::DispatchMesh { .. } => "DispatchMesh",
            Command::Dispatch { .. } => "Dispatch",
            Command::CopyBuffer { .. } => "CopyBuffer",
            Command::CopyBufferToTexture { .. } => "CopyBufferToTexture",
            Command::CopyTextureToBuffer { .. } => "CopyTextureToBuffer",
            Command::BuildAccelerationStructure { .. } => "BuildAccelerationStructure",
            Command::BeginMarker(_) => "BeginMarker",
            Command::EndMarker => "EndMarker",
        }
    }

    /// 是否为屏障命令
    pub fn is_barrier(&self) -> bool {
        matches!(self, Command::Transition { .. } | Command::UnorderedAccessBarrier { .. })
    }
}
