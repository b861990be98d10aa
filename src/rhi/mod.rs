//! 渲染硬件接口（RHI）
//!
//! 在 `gfx` 后端之上提供显式的 GPU 资源 / 命令 / 同步层：
//!
//! - `descriptor`：固定容量的描述符堆
//! - `resource` / `buffer` / `texture` / `acceleration`：资源与布局状态机
//! - `view` / `sampler`：描述符槽位绑定
//! - `command` / `sync`：命令缓冲区、队列与 Fence
//! - `uploader`：批量暂存上传
//! - `surface`：交换链
//!
//! [`Rhi`] 拥有以上所有对象，驱动每帧的 `begin → 记录 → submit → end → present` 循环，
//! 最多同时有 [`FRAMES_IN_FLIGHT`] 帧在 GPU 上执行。
//!
//! 整个层只在一个线程上使用：共享状态基于 `Rc` / `Cell`，因此类型本身不是 `Send`。

pub mod acceleration;
pub mod buffer;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod resource;
pub mod sampler;
pub mod stats;
pub mod surface;
pub mod sync;
pub mod texture;
pub mod uploader;
pub mod view;

use std::rc::Rc;

use crate::core::config::Config;
use crate::core::error::{DistRhiError, Result};

pub use acceleration::{AccelerationStructure, BlasGeometry, InstanceDesc, TlasInstance};
pub use buffer::{Buffer, BufferDesc, BufferType};
pub use command::{CommandBuffer, CommandBufferState};
pub use context::{Context, ContextSettings};
pub use descriptor::{Descriptor, DescriptorHeap, DescriptorHeapKind};
pub use pipeline::{
    ComputePipelineDesc, GraphicsPipelineDesc, MeshPipelineDesc, Pipeline, Shader, ShaderStage,
};
pub use resource::{BarrierAction, Format, Resource, ResourceLayout};
pub use sampler::{Sampler, SamplerDesc};
pub use stats::RenderStatsSnapshot;
pub use surface::{Surface, SurfaceTarget};
pub use sync::{Fence, Queue};
pub use texture::{Texture, TextureDesc, TextureDimension, TextureUsage};
pub use uploader::Uploader;
pub use view::{View, ViewDimension, ViewType};

/// 同时在 GPU 上执行的最大帧数
pub const FRAMES_IN_FLIGHT: usize = 3;

/// 一帧的记录状态
///
/// 由 [`Rhi::begin`] 创建，交给 [`Rhi::end`] 消费。
pub struct Frame {
    command_buffer: CommandBuffer,
    backbuffer: Rc<Texture>,
    view: Rc<View>,
    frame_index: usize,
    width: u32,
    height: u32,
    submitted: bool,
}

impl Frame {
    /// 本帧的命令缓冲区
    pub fn cmd(&mut self) -> &mut CommandBuffer {
        &mut self.command_buffer
    }

    pub fn backbuffer(&self) -> &Rc<Texture> {
        &self.backbuffer
    }

    /// 后台缓冲区的渲染目标视图
    pub fn view(&self) -> &Rc<View> {
        &self.view
    }

    /// 帧槽位（0..FRAMES_IN_FLIGHT）
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }
}

/// RHI 门面
pub struct Rhi {
    // 字段顺序即析构顺序：先释放命令与资源，最后释放上下文
    uploader: Uploader,
    command_buffers: Vec<Option<CommandBuffer>>,
    surface: Surface,
    frame_fence: Fence,
    frame_values: [u64; FRAMES_IN_FLIGHT],
    frame_index: usize,
    frame_count: u64,
    last_stats: RenderStatsSnapshot,
    vsync: bool,
    context: Rc<Context>,
}

impl Rhi {
    /// 按配置创建完整的 RHI
    pub fn new(config: &Config, target: SurfaceTarget) -> Result<Self> {
        let context = Context::new(config);
        let mut rhi = Self::with_context(context, target, config.window.width, config.window.height)?;
        rhi.vsync = config.graphics.vsync;
        Ok(rhi)
    }

    /// 在已有上下文上创建 RHI
    pub fn with_context(context: Rc<Context>, target: SurfaceTarget, width: u32, height: u32) -> Result<Self> {
        let surface = Surface::new(&context, target, width, height, FRAMES_IN_FLIGHT as u32)?;
        let command_buffers = (0..FRAMES_IN_FLIGHT)
            .map(|i| CommandBuffer::new(&context, &format!("Frame {}", i), false).map(Some))
            .collect::<Result<Vec<_>>>()?;
        let frame_fence = Fence::new(context.gpu().clone(), context.settings().fence_timeout);

        crate::engine_info!("RHI initialized ({}x{}, {} frames in flight)", width, height, FRAMES_IN_FLIGHT);

        Ok(Self {
            uploader: Uploader::new(&context),
            command_buffers,
            surface,
            frame_fence,
            frame_values: [0; FRAMES_IN_FLIGHT],
            frame_index: 0,
            frame_count: 0,
            last_stats: RenderStatsSnapshot::default(),
            vsync: true,
            context,
        })
    }

    /// 开始新的一帧
    ///
    /// 等待当前槽位上一次使用的 Fence 值，重置命令缓冲区，把后台缓冲区转换到渲染目标布局。
    pub fn begin(&mut self) -> Result<Frame> {
        let slot = self.frame_index;
        self.frame_fence.wait(self.frame_values[slot]);

        let (backbuffer, view) = self.surface.current()?;
        let mut command_buffer = self.command_buffers[slot]
            .take()
            .ok_or_else(|| DistRhiError::usage(format!("frame slot {} is already recording", slot)))?;

        if let Err(e) = command_buffer.begin() {
            self.command_buffers[slot] = Some(command_buffer);
            return Err(e);
        }

        self.last_stats = self.context.stats().take();
        command_buffer.barrier(backbuffer.as_ref(), ResourceLayout::RenderTarget)?;

        tracing::trace!(frame = self.frame_count, slot, "Frame begin");
        Ok(Frame {
            command_buffer,
            backbuffer,
            view,
            frame_index: slot,
            width: self.surface.width(),
            height: self.surface.height(),
            submitted: false,
        })
    }

    /// 把后台缓冲区转换到呈现布局，关闭并提交命令缓冲区
    pub fn submit(&mut self, frame: &mut Frame) -> Result<()> {
        if frame.submitted {
            return Err(DistRhiError::usage("frame was already submitted"));
        }
        let backbuffer = frame.backbuffer.clone();
        frame.command_buffer.barrier(backbuffer.as_ref(), ResourceLayout::Present)?;
        frame.command_buffer.end()?;
        self.context.queue().execute(&[&frame.command_buffer])?;
        frame.submitted = true;
        Ok(())
    }

    /// 结束一帧：signal 当前槽位，前进到下一个槽位并等待它上一次的 Fence 值
    pub fn end(&mut self, mut frame: Frame) -> Result<()> {
        if !frame.submitted {
            crate::engine_warn!("Frame {} ended without submit; submitting implicitly", frame.frame_index);
            self.submit(&mut frame)?;
        }

        let slot = frame.frame_index;
        self.frame_values[slot] = self.frame_fence.signal(self.context.queue());
        self.command_buffers[slot] = Some(frame.command_buffer);

        self.frame_index = (slot + 1) % FRAMES_IN_FLIGHT;
        self.frame_count += 1;
        self.frame_fence.wait(self.frame_values[self.frame_index]);
        Ok(())
    }

    pub fn present(&mut self, vsync: bool) -> Result<()> {
        self.surface.present(vsync)
    }

    /// 使用配置中的垂直同步设置呈现
    pub fn present_default(&mut self) -> Result<()> {
        self.surface.present(self.vsync)
    }

    /// 等待 GPU 完成所有工作
    pub fn wait_idle(&self) {
        self.context.wait_idle();
    }

    /// 等待 GPU 空闲并重建交换链
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.wait_idle();
        self.surface.resize(width, height)
    }

    // ---- 工厂方法 ----

    pub fn create_buffer(&self, desc: &BufferDesc) -> Result<Rc<Buffer>> {
        Buffer::new(&self.context, desc).map(Rc::new)
    }

    pub fn create_texture(&self, desc: &TextureDesc) -> Result<Rc<Texture>> {
        Texture::new(&self.context, desc).map(Rc::new)
    }

    pub fn create_view(&self, resource: Rc<dyn Resource>, view_type: ViewType, dimension: ViewDimension) -> Result<View> {
        View::new(&self.context, resource, view_type, dimension)
    }

    pub fn create_blas(&self, name: &str, geometries: &[BlasGeometry], allow_update: bool) -> Result<Rc<AccelerationStructure>> {
        AccelerationStructure::bottom_level(&self.context, name, geometries, allow_update).map(Rc::new)
    }

    pub fn create_tlas(&self, name: &str, instances: Vec<TlasInstance>, allow_update: bool) -> Result<Rc<AccelerationStructure>> {
        AccelerationStructure::top_level(&self.context, name, instances, allow_update).map(Rc::new)
    }

    pub fn create_sampler(&self, desc: SamplerDesc) -> Result<Sampler> {
        Sampler::new(&self.context, desc)
    }

    /// 编译着色器；失败时得到无效着色器
    pub fn compile_shader(&self, source: &str, entry: &str, stage: ShaderStage) -> Shader {
        Shader::compile(&self.context, source, entry, stage)
    }

    pub fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> Result<Pipeline> {
        Pipeline::graphics(&self.context, desc)
    }

    pub fn create_mesh_pipeline(&self, desc: &MeshPipelineDesc<'_>) -> Result<Pipeline> {
        Pipeline::mesh(&self.context, desc)
    }

    pub fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> Result<Pipeline> {
        Pipeline::compute(&self.context, desc)
    }

    pub fn create_command_buffer(&self, name: &str, single_time: bool) -> Result<CommandBuffer> {
        CommandBuffer::new(&self.context, name, single_time)
    }

    // ---- 访问器 ----

    pub fn uploader(&mut self) -> &mut Uploader {
        &mut self.uploader
    }

    pub fn context(&self) -> &Rc<Context> {
        &self.context
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// 当前帧槽位
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// 已结束的帧数
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// 上一帧的渲染统计
    pub fn last_frame_stats(&self) -> RenderStatsSnapshot {
        self.last_stats
    }

    /// 每个槽位最近一次 signal 的 Fence 值
    pub fn frame_fence_values(&self) -> [u64; FRAMES_IN_FLIGHT] {
        self.frame_values
    }
}

impl Drop for Rhi {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if self.uploader.pending_requests() > 0 {
            crate::engine_warn!("Dropping RHI with {} pending upload(s)", self.uploader.pending_requests());
        }
        self.context.wait_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::command::Command;
    use crate::gfx::headless::{HeadlessDevice, HeadlessEvent};
    use crate::rhi::context::tests::headless_context;

    fn headless_rhi() -> (Rhi, Rc<HeadlessDevice>) {
        let (ctx, gpu) = headless_context();
        let rhi = Rhi::with_context(ctx, SurfaceTarget::Headless, 320, 240).unwrap();
        (rhi, gpu)
    }

    fn run_frame(rhi: &mut Rhi) -> usize {
        let mut frame = rhi.begin().unwrap();
        let slot = frame.frame_index();
        let view = frame.view().clone();
        frame.cmd().clear_render_target(&view, [0.1, 0.2, 0.3, 1.0]).unwrap();
        rhi.submit(&mut frame).unwrap();
        rhi.end(frame).unwrap();
        rhi.present(false).unwrap();
        slot
    }

    #[test]
    fn test_frame_slots_rotate() {
        let (mut rhi, _gpu) = headless_rhi();
        let slots: Vec<usize> = (0..5).map(|_| run_frame(&mut rhi)).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1]);
        assert_eq!(rhi.frame_count(), 5);
    }

    #[test]
    fn test_three_frame_pacing() {
        let (mut rhi, gpu) = headless_rhi();
        let slot0_list = rhi.command_buffers[0].as_ref().unwrap().raw();
        let fence = rhi.frame_fence.raw();
        gpu.clear_events();

        for _ in 0..4 {
            run_frame(&mut rhi);
        }

        let events = gpu.events();
        let wait_for_first = events
            .iter()
            .position(|e| *e == HeadlessEvent::Wait { fence, value: 1 })
            .expect("slot 0 fence was never waited on");
        let slot0_resets: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| **e == HeadlessEvent::ResetCommandList(slot0_list))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(slot0_resets.len(), 2);
        assert!(wait_for_first < slot0_resets[1]);

        // 前三帧不需要等待
        let first_wait = events.iter().position(|e| matches!(e, HeadlessEvent::Wait { .. })).unwrap();
        let third_signal = events
            .iter()
            .position(|e| *e == HeadlessEvent::Signal { fence, value: 3 })
            .unwrap();
        assert!(first_wait > third_signal);
        assert_eq!(rhi.frame_fence_values(), [4, 2, 3]);
    }

    #[test]
    fn test_backbuffer_transitions() {
        let (mut rhi, gpu) = headless_rhi();
        let mut frame = rhi.begin().unwrap();
        assert_eq!(frame.backbuffer().layout(), ResourceLayout::RenderTarget);
        assert_eq!((frame.width(), frame.height()), (320, 240));
        rhi.submit(&mut frame).unwrap();
        assert_eq!(frame.backbuffer().layout(), ResourceLayout::Present);
        assert!(rhi.submit(&mut frame).is_err());
        let backbuffer = frame.backbuffer().raw();
        rhi.end(frame).unwrap();

        assert!(gpu.executed_commands().contains(&Command::Transition {
            resource: backbuffer,
            before: ResourceLayout::RenderTarget,
            after: ResourceLayout::Present,
        }));
    }

    #[test]
    fn test_end_without_submit_submits() {
        let (mut rhi, gpu) = headless_rhi();
        let frame = rhi.begin().unwrap();
        rhi.end(frame).unwrap();
        assert!(gpu.events().iter().any(|e| matches!(e, HeadlessEvent::Execute { .. })));
        assert_eq!(rhi.frame_index(), 1);
    }

    #[test]
    fn test_stats_snapshot_per_frame() {
        let (mut rhi, _gpu) = headless_rhi();
        let source = "void cs_main() {}";
        let cs = rhi.compile_shader(source, "cs_main", ShaderStage::Compute);
        let pipeline = rhi
            .create_compute_pipeline(&ComputePipelineDesc { name: "cs", compute: &cs, push_constant_dwords: 0 })
            .unwrap();

        let mut frame = rhi.begin().unwrap();
        frame.cmd().set_pipeline(&pipeline).unwrap();
        frame.cmd().dispatch(4, 4, 1).unwrap();
        frame.cmd().dispatch(1, 1, 1).unwrap();
        rhi.submit(&mut frame).unwrap();
        rhi.end(frame).unwrap();

        let frame = rhi.begin().unwrap();
        assert_eq!(rhi.last_frame_stats().dispatches, 2);
        rhi.end(frame).unwrap();
        let frame = rhi.begin().unwrap();
        assert_eq!(rhi.last_frame_stats().dispatches, 0);
        rhi.end(frame).unwrap();
    }

    #[test]
    fn test_resize_rebuilds_surface() {
        let (mut rhi, _gpu) = headless_rhi();
        run_frame(&mut rhi);
        rhi.resize(640, 480).unwrap();
        let frame = rhi.begin().unwrap();
        assert_eq!(frame.width(), 640);
        assert_eq!(frame.backbuffer().height(), 480);
        rhi.end(frame).unwrap();
    }

    #[test]
    fn test_factories() {
        let (mut rhi, _gpu) = headless_rhi();
        let buffer = rhi.create_buffer(&BufferDesc::storage(256, 4)).unwrap();
        rhi.uploader().upload_buffer(&buffer, &[1u8; 256]).unwrap();
        rhi.uploader().flush().unwrap();

        let texture = rhi
            .create_texture(&TextureDesc::new_2d(4, 4, Format::Rgba8Unorm, TextureUsage::SHADER_RESOURCE))
            .unwrap();
        let view = rhi.create_view(texture, ViewType::ShaderResource, ViewDimension::Texture2D).unwrap();
        let sampler = rhi.create_sampler(SamplerDesc::linear_clamp()).unwrap();
        assert!(view.gpu().is_some());
        assert_eq!(sampler.desc().filter, sampler::Filter::Linear);

        let mut cmd = rhi.create_command_buffer("extra", true).unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();
        rhi.context().queue().execute(&[&cmd]).unwrap();
        rhi.wait_idle();
    }
}
