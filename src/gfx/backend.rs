//! 图形后端的统一抽象接口
//!
//! 所有具体后端（软件模拟、DirectX 12）都实现 [`GpuInstance`] 与 [`GpuDevice`]。
//! 上层 `rhi` 模块负责全部簿记工作（描述符占用表、资源布局、Fence 值、上传批处理），
//! 后端只负责把这些决定翻译成真实的 API 调用。
//!
//! 后端对象通过不透明的整数句柄（`RawResource`、`RawHeap` 等）互相引用，
//! 这样 trait 保持对象安全，上层可以持有 `Rc<dyn GpuDevice>`。

use std::fmt;
use std::time::Duration;

use crate::core::error::Result;
use crate::gfx::command::{AccelerationBuildInputs, Command};
use crate::rhi::buffer::MemoryType;
use crate::rhi::descriptor::DescriptorHeapKind;
use crate::rhi::pipeline::{CullMode, ShaderStage, TopologyType};
use crate::rhi::resource::{Format, ResourceLayout};
use crate::rhi::sampler::SamplerDesc;
use crate::rhi::surface::SurfaceTarget;
use crate::rhi::texture::{TextureDimension, TextureUsage};
use crate::rhi::view::ViewDescription;

macro_rules! raw_handle {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}#{}", stringify!($name), self.0)
                }
            }
        )*
    };
}

raw_handle! {
    /// 后端资源句柄（缓冲区、纹理、加速结构存储）
    RawResource;
    /// 后端描述符堆句柄
    RawHeap;
    /// 后端命令列表句柄（分配器 + 列表）
    RawCommandList;
    /// 后端 Fence 句柄
    RawFence;
    /// 后端管线状态句柄
    RawPipeline;
    /// 后端交换链句柄
    RawSwapchain;
}

/// 光线追踪支持等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RaytracingTier {
    #[default]
    NotSupported,
    Tier1_0,
    Tier1_1,
}

/// 适配器可选特性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdapterFeatures {
    pub raytracing_tier: RaytracingTier,
    pub variable_rate_shading: bool,
    pub mesh_shaders: bool,
    pub work_graphs: bool,
}

/// 适配器信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// 适配器名称
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    /// 专用显存（字节）
    pub dedicated_video_memory: u64,
    /// 是否为软件适配器（WARP 等）
    pub software: bool,
    pub features: AdapterFeatures,
}

/// 后端创建的描述符堆
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeapInfo {
    pub raw: RawHeap,
    /// CPU 句柄基址
    pub cpu_base: usize,
    /// GPU 句柄基址（仅着色器可见的堆）
    pub gpu_base: Option<u64>,
    /// 描述符增量大小
    pub increment_size: u32,
}

/// 缓冲区创建参数
#[derive(Debug, Clone)]
pub struct RawBufferDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub memory: MemoryType,
    pub initial_layout: ResourceLayout,
    /// 是否允许无序访问（UAV）
    pub unordered_access: bool,
    /// 是否作为加速结构存储
    pub acceleration_structure: bool,
}

/// 纹理创建参数
#[derive(Debug, Clone)]
pub struct RawTextureDesc<'a> {
    pub name: &'a str,
    pub width: u32,
    pub height: u32,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub dimension: TextureDimension,
    pub usage: TextureUsage,
    pub initial_layout: ResourceLayout,
}

/// 着色器字节码引用
#[derive(Debug, Clone, Copy)]
pub struct ShaderBytecode<'a> {
    pub stage: ShaderStage,
    pub code: &'a [u8],
}

/// 管线创建参数
///
/// 所有管线共享同一个无绑定（bindless）根布局：根常量 + 直接索引的描述符堆。
#[derive(Debug, Clone)]
pub enum RawPipelineDesc<'a> {
    Graphics {
        name: &'a str,
        vertex: ShaderBytecode<'a>,
        pixel: ShaderBytecode<'a>,
        color_formats: &'a [Format],
        depth_format: Option<Format>,
        topology: TopologyType,
        cull: CullMode,
        depth_test: bool,
        depth_write: bool,
        wireframe: bool,
        push_constant_dwords: u32,
    },
    Mesh {
        name: &'a str,
        amplification: Option<ShaderBytecode<'a>>,
        mesh: ShaderBytecode<'a>,
        pixel: ShaderBytecode<'a>,
        color_formats: &'a [Format],
        depth_format: Option<Format>,
        cull: CullMode,
        depth_test: bool,
        depth_write: bool,
        wireframe: bool,
        push_constant_dwords: u32,
    },
    Compute {
        name: &'a str,
        compute: ShaderBytecode<'a>,
        push_constant_dwords: u32,
    },
}

/// 交换链创建参数
#[derive(Debug, Clone)]
pub struct SwapchainDesc<'a> {
    pub target: &'a SurfaceTarget,
    pub width: u32,
    pub height: u32,
    pub buffer_count: u32,
    pub format: Format,
}

/// 加速结构所需的存储大小
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccelerationStructureSizes {
    pub result_size: u64,
    pub scratch_size: u64,
    pub update_scratch_size: u64,
}

/// 图形 API 实例：负责枚举适配器并打开逻辑设备
pub trait GpuInstance {
    /// 后端名称（用于日志）
    fn backend_name(&self) -> &'static str;

    /// 枚举所有可用适配器
    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>>;

    /// 在指定适配器上创建逻辑设备
    fn create_device(&self, adapter: &AdapterInfo) -> Result<std::rc::Rc<dyn GpuDevice>>;
}

/// 逻辑设备 + 唯一的图形队列
///
/// # 约定
///
/// - 新建的非一次性命令列表处于关闭状态，需要 `reset_command_list` 后才能记录；
///   一次性命令列表创建后即处于记录状态，永远不会被重置。
/// - `execute` 与 `signal_fence` 按调用顺序进入同一个队列。
/// - `wait_fence` 返回 `Ok(false)` 表示超时。
pub trait GpuDevice {
    // ---- 描述符 ----
    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<RawHeapInfo>;

    fn write_view(
        &self,
        heap: RawHeap,
        index: u32,
        resource: RawResource,
        desc: &ViewDescription,
    ) -> Result<()>;

    fn write_sampler(&self, heap: RawHeap, index: u32, desc: &SamplerDesc) -> Result<()>;

    // ---- 资源 ----
    fn create_buffer(&self, desc: &RawBufferDesc<'_>) -> Result<RawResource>;

    fn create_texture(&self, desc: &RawTextureDesc<'_>) -> Result<RawResource>;

    fn destroy_resource(&self, resource: RawResource);

    fn gpu_address(&self, resource: RawResource) -> u64;

    /// 写入 CPU 可见内存（Map → memcpy → Unmap）
    fn write_buffer(&self, resource: RawResource, offset: u64, data: &[u8]) -> Result<()>;

    /// 读取回读内存
    fn read_buffer(&self, resource: RawResource, offset: u64, out: &mut [u8]) -> Result<()>;

    fn acceleration_structure_sizes(&self, inputs: &AccelerationBuildInputs) -> AccelerationStructureSizes;

    // ---- 着色器与管线 ----
    /// 编译着色器源码，失败时返回编译器输出
    fn compile_shader(
        &self,
        source: &str,
        entry: &str,
        stage: ShaderStage,
    ) -> std::result::Result<Vec<u8>, String>;

    fn create_pipeline(&self, desc: &RawPipelineDesc<'_>) -> Result<RawPipeline>;

    fn destroy_pipeline(&self, pipeline: RawPipeline);

    // ---- 命令 ----
    fn create_command_list(&self, name: &str, single_time: bool) -> Result<RawCommandList>;

    /// 重置分配器与列表，使其重新进入记录状态
    fn reset_command_list(&self, list: RawCommandList) -> Result<()>;

    fn record(&self, list: RawCommandList, command: &Command);

    fn close_command_list(&self, list: RawCommandList) -> Result<()>;

    fn destroy_command_list(&self, list: RawCommandList);

    /// 在图形队列上执行已关闭的命令列表
    fn execute(&self, lists: &[RawCommandList]) -> Result<()>;

    // ---- 同步 ----
    fn create_fence(&self, initial_value: u64) -> Result<RawFence>;

    /// 让队列在之前提交的工作完成后把 Fence 设为 `value`
    fn signal_fence(&self, fence: RawFence, value: u64) -> Result<()>;

    fn fence_completed_value(&self, fence: RawFence) -> u64;

    /// 阻塞直到 Fence 达到 `value`；超时返回 `Ok(false)`
    fn wait_fence(&self, fence: RawFence, value: u64, timeout: Duration) -> Result<bool>;

    fn destroy_fence(&self, fence: RawFence);

    // ---- 交换链 ----
    fn create_swapchain(&self, desc: &SwapchainDesc<'_>) -> Result<RawSwapchain>;

    /// 交换链的后台缓冲区（每次调用都返回新的资源句柄，调用者负责销毁）
    fn swapchain_buffers(&self, swapchain: RawSwapchain) -> Result<Vec<RawResource>>;

    fn current_backbuffer_index(&self, swapchain: RawSwapchain) -> u32;

    fn present(&self, swapchain: RawSwapchain, vsync: bool) -> Result<()>;

    /// 调整尺寸；调用前必须销毁所有后台缓冲区句柄
    fn resize_swapchain(&self, swapchain: RawSwapchain, width: u32, height: u32) -> Result<()>;

    fn destroy_swapchain(&self, swapchain: RawSwapchain);
}
