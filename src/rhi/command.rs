//! 命令缓冲区
//!
//! 记录屏障、绑定、draw / dispatch、复制与加速结构构建。
//!
//! # 状态机
//!
//! ```text
//! Initial --begin--> Recording --end--> Executable --begin--> Recording ...
//! ```
//!
//! 一次性命令缓冲区创建时已经打开，`begin` 不会重置它，也不能再次 `begin`。
//! 在非 Recording 状态记录命令会返回错误。

use std::rc::Rc;

use crate::core::error::{DistRhiError, Result};
use crate::gfx::backend::RawCommandList;
use crate::gfx::command::{Command, ScissorRect, Viewport};
use crate::rhi::acceleration::{AccelerationLevel, AccelerationStructure};
use crate::rhi::buffer::Buffer;
use crate::rhi::context::Context;
use crate::rhi::descriptor::DescriptorHeapKind;
use crate::rhi::pipeline::{Pipeline, PipelineKind, Topology};
use crate::rhi::resource::{plan_barrier, BarrierAction, Resource, ResourceLayout};
use crate::rhi::texture::{PlacedFootprint, Texture};
use crate::rhi::view::{View, ViewType};

/// 命令缓冲区状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// 初始状态
    Initial,
    /// 记录中
    Recording,
    /// 已关闭，可提交
    Executable,
}

/// 当前绑定的管线
#[derive(Debug, Clone, Copy)]
struct BoundPipeline {
    kind: PipelineKind,
    push_constant_dwords: u32,
}

/// 命令缓冲区（命令分配器 + 命令列表）
pub struct CommandBuffer {
    context: Rc<Context>,
    raw: RawCommandList,
    name: String,
    single_time: bool,
    state: CommandBufferState,
    marker_depth: u32,
    pipeline: Option<BoundPipeline>,
    topology: Option<Topology>,
}

impl CommandBuffer {
    pub fn new(context: &Rc<Context>, name: &str, single_time: bool) -> Result<Self> {
        let raw = context.gpu().create_command_list(name, single_time)?;
        Ok(Self {
            context: context.clone(),
            raw,
            name: name.to_string(),
            single_time,
            state: CommandBufferState::Initial,
            marker_depth: 0,
            pipeline: None,
            topology: None,
        })
    }

    /// 开始记录：重置分配器与列表（一次性缓冲区除外），并绑定两个着色器可见堆
    pub fn begin(&mut self) -> Result<()> {
        match (self.state, self.single_time) {
            (CommandBufferState::Recording, _) => {
                return Err(self.misuse("begin called while already recording"));
            }
            (CommandBufferState::Executable, true) => {
                return Err(self.misuse("single-time command buffers cannot be reused"));
            }
            (_, false) => self.context.gpu().reset_command_list(self.raw)?,
            (CommandBufferState::Initial, true) => {}
        }

        self.state = CommandBufferState::Recording;
        self.marker_depth = 0;
        self.pipeline = None;
        self.topology = None;

        self.push(Command::SetDescriptorHeaps {
            resource: self.context.heap(DescriptorHeapKind::Resource).raw(),
            sampler: self.context.heap(DescriptorHeapKind::Sampler).raw(),
        });
        Ok(())
    }

    /// 结束记录并关闭列表
    pub fn end(&mut self) -> Result<()> {
        self.ensure_recording("end")?;
        if self.marker_depth != 0 {
            return Err(self.misuse(&format!("{} debug marker(s) still open", self.marker_depth)));
        }
        self.context.gpu().close_command_list(self.raw)?;
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    // ---- 屏障 ----

    /// 把资源转换到 `new` 布局；布局在记录时立即更新
    pub fn barrier(&mut self, resource: &dyn Resource, new: ResourceLayout) -> Result<BarrierAction> {
        self.ensure_recording("barrier")?;
        let action = plan_barrier(resource.layout(), new);
        match action {
            BarrierAction::Elided => {}
            BarrierAction::Execution => {
                self.push(Command::UnorderedAccessBarrier { resource: resource.raw() });
            }
            BarrierAction::Transition { before, after } => {
                self.push(Command::Transition { resource: resource.raw(), before, after });
                resource.set_layout(after);
            }
        }
        Ok(action)
    }

    /// 无条件的 UAV 屏障
    pub fn uav_barrier(&mut self, resource: &dyn Resource) -> Result<()> {
        self.ensure_recording("uav_barrier")?;
        self.push(Command::UnorderedAccessBarrier { resource: resource.raw() });
        Ok(())
    }

    // ---- 固定功能状态 ----

    pub fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.ensure_recording("set_viewport")?;
        self.push(Command::SetViewport(viewport));
        Ok(())
    }

    pub fn set_scissor(&mut self, scissor: ScissorRect) -> Result<()> {
        self.ensure_recording("set_scissor")?;
        self.push(Command::SetScissor(scissor));
        Ok(())
    }

    /// 视口与裁剪矩形覆盖整个目标
    pub fn set_viewport_and_scissor(&mut self, width: u32, height: u32) -> Result<()> {
        self.set_viewport(Viewport::full(width, height))?;
        self.set_scissor(ScissorRect::full(width, height))
    }

    pub fn set_topology(&mut self, topology: Topology) -> Result<()> {
        self.ensure_recording("set_topology")?;
        self.topology = Some(topology);
        self.push(Command::SetTopology(topology));
        Ok(())
    }

    // ---- 绑定 ----

    /// 绑定图形、网格或计算管线
    pub fn set_pipeline(&mut self, pipeline: &Pipeline) -> Result<()> {
        self.ensure_recording("set_pipeline")?;
        self.pipeline = Some(BoundPipeline {
            kind: pipeline.kind(),
            push_constant_dwords: pipeline.push_constant_dwords(),
        });
        self.push(Command::SetPipeline { pipeline: pipeline.raw(), kind: pipeline.kind() });
        Ok(())
    }

    pub fn set_render_targets(&mut self, colors: &[&View], depth: Option<&View>) -> Result<()> {
        self.ensure_recording("set_render_targets")?;
        if let Some(view) = colors.iter().find(|v| v.view_type() != ViewType::RenderTarget) {
            return Err(self.misuse(&format!("{:?} view bound as a color target", view.view_type())));
        }
        if let Some(view) = depth.filter(|v| v.view_type() != ViewType::DepthTarget) {
            return Err(self.misuse(&format!("{:?} view bound as the depth target", view.view_type())));
        }
        self.push(Command::SetRenderTargets {
            colors: colors.iter().map(|v| v.cpu()).collect(),
            depth: depth.map(|v| v.cpu()),
        });
        Ok(())
    }

    pub fn set_vertex_buffer(&mut self, buffer: &Buffer) -> Result<()> {
        self.ensure_recording("set_vertex_buffer")?;
        let view = *buffer
            .vertex_view()
            .ok_or_else(|| self.misuse(&format!("'{}' is not a vertex buffer", buffer.name())))?;
        self.push(Command::SetVertexBuffer(view));
        Ok(())
    }

    pub fn set_index_buffer(&mut self, buffer: &Buffer) -> Result<()> {
        self.ensure_recording("set_index_buffer")?;
        let view = *buffer
            .index_view()
            .ok_or_else(|| self.misuse(&format!("'{}' is not an index buffer", buffer.name())))?;
        self.push(Command::SetIndexBuffer(view));
        Ok(())
    }

    /// 写入根常量；需要先绑定管线
    pub fn push_constants(&mut self, data: &[u32]) -> Result<()> {
        self.ensure_recording("push_constants")?;
        let bound = self
            .pipeline
            .ok_or_else(|| self.misuse("push_constants called before set_pipeline"))?;
        if data.len() as u32 > bound.push_constant_dwords {
            return Err(self.misuse(&format!(
                "{} push constant dwords exceed the pipeline's {}",
                data.len(),
                bound.push_constant_dwords
            )));
        }
        self.push(Command::PushConstants {
            compute: bound.kind == PipelineKind::Compute,
            data: data.to_vec(),
        });
        Ok(())
    }

    /// 以 `Pod` 值写入根常量（大小必须是 4 的倍数）
    pub fn push_constants_pod<T: bytemuck::Pod>(&mut self, value: &T) -> Result<()> {
        let dwords: &[u32] = bytemuck::try_cast_slice(bytemuck::bytes_of(value))
            .map_err(|e| self.misuse(&format!("push constant value is not dword sized: {}", e)))?;
        self.push_constants(dwords)
    }

    // ---- 清除 ----

    pub fn clear_render_target(&mut self, view: &View, color: [f32; 4]) -> Result<()> {
        self.ensure_recording("clear_render_target")?;
        if view.view_type() != ViewType::RenderTarget {
            return Err(self.misuse("clear_render_target needs a render target view"));
        }
        self.push(Command::ClearRenderTarget { resource: view.resource().raw(), handle: view.cpu(), color });
        Ok(())
    }

    pub fn clear_depth(&mut self, view: &View, depth: f32) -> Result<()> {
        self.ensure_recording("clear_depth")?;
        if view.view_type() != ViewType::DepthTarget {
            return Err(self.misuse("clear_depth needs a depth target view"));
        }
        self.push(Command::ClearDepth { resource: view.resource().raw(), handle: view.cpu(), depth });
        Ok(())
    }

    // ---- draw / dispatch ----

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) -> Result<()> {
        self.ensure_pipeline("draw", PipelineKind::Graphics)?;
        self.push(Command::Draw { vertex_count, instance_count, first_vertex, first_instance });
        self.context.stats().record_draw(self.bound_topology(), vertex_count, instance_count);
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<()> {
        self.ensure_pipeline("draw_indexed", PipelineKind::Graphics)?;
        self.push(Command::DrawIndexed { index_count, instance_count, first_index, base_vertex, first_instance });
        self.context.stats().record_draw(self.bound_topology(), index_count, instance_count);
        Ok(())
    }

    pub fn dispatch_mesh(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.ensure_pipeline("dispatch_mesh", PipelineKind::Mesh)?;
        self.push(Command::DispatchMesh { x, y, z });
        self.context.stats().record_mesh_dispatch(x, y, z);
        Ok(())
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.ensure_pipeline("dispatch", PipelineKind::Compute)?;
        self.push(Command::Dispatch { x, y, z });
        self.context.stats().record_dispatch();
        Ok(())
    }

    // ---- 复制 ----

    pub fn copy_buffer(&mut self, dst: &Buffer, dst_offset: u64, src: &Buffer, src_offset: u64, size: u64) -> Result<()> {
        self.ensure_recording("copy_buffer")?;
        let in_bounds = |buffer: &Buffer, offset: u64| offset.checked_add(size).is_some_and(|end| end <= buffer.size());
        if !in_bounds(dst, dst_offset) || !in_bounds(src, src_offset) {
            return Err(self.misuse(&format!(
                "copy of {} bytes from '{}'+{} to '{}'+{} is out of bounds",
                size,
                src.name(),
                src_offset,
                dst.name(),
                dst_offset
            )));
        }
        self.push(Command::CopyBuffer { dst: dst.raw(), dst_offset, src: src.raw(), src_offset, size });
        Ok(())
    }

    /// 复制缓冲区中的一个子资源布局到纹理
    pub fn copy_buffer_to_texture(
        &mut self,
        dst: &Texture,
        subresource: u32,
        src: &Buffer,
        footprint: PlacedFootprint,
    ) -> Result<()> {
        self.ensure_recording("copy_buffer_to_texture")?;
        self.check_subresource(dst, subresource)?;
        self.push(Command::CopyBufferToTexture { dst: dst.raw(), subresource, src: src.raw(), footprint });
        Ok(())
    }

    /// 复制纹理的一个子资源到缓冲区（回读）
    pub fn copy_texture_to_buffer(
        &mut self,
        dst: &Buffer,
        footprint: PlacedFootprint,
        src: &Texture,
        subresource: u32,
    ) -> Result<()> {
        self.ensure_recording("copy_texture_to_buffer")?;
        self.check_subresource(src, subresource)?;
        self.push(Command::CopyTextureToBuffer { dst: dst.raw(), footprint, src: src.raw(), subresource });
        Ok(())
    }

    // ---- 加速结构 ----

    /// 构建（或原地更新）加速结构，并在结果上发出 UAV 屏障
    pub fn build_acceleration_structure(&mut self, target: &AccelerationStructure, update: bool) -> Result<()> {
        self.ensure_recording("build_acceleration_structure")?;
        if update && !(target.allows_update() && target.is_built()) {
            return Err(self.misuse(&format!(
                "'{}' cannot be updated (allow_update = {}, built = {})",
                target.name(),
                target.allows_update(),
                target.is_built()
            )));
        }
        if let (AccelerationLevel::Top, Some(instances)) = (target.level(), target.instance_buffer()) {
            self.barrier(instances, ResourceLayout::NonPixelShaderResource)?;
        }

        let result = target.result().raw();
        self.push(Command::BuildAccelerationStructure {
            dst: result,
            src: update.then_some(result),
            scratch: target.scratch().raw(),
            inputs: target.inputs().clone(),
        });
        self.push(Command::UnorderedAccessBarrier { resource: result });
        target.mark_built();
        Ok(())
    }

    // ---- 调试标记 ----

    pub fn begin_marker(&mut self, name: &str) -> Result<()> {
        self.ensure_recording("begin_marker")?;
        self.marker_depth += 1;
        self.push(Command::BeginMarker(name.to_string()));
        Ok(())
    }

    pub fn end_marker(&mut self) -> Result<()> {
        self.ensure_recording("end_marker")?;
        if self.marker_depth == 0 {
            return Err(self.misuse("end_marker without a matching begin_marker"));
        }
        self.marker_depth -= 1;
        self.push(Command::EndMarker);
        Ok(())
    }

    // ---- 访问器 ----

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn is_single_time(&self) -> bool {
        self.single_time
    }

    pub fn raw(&self) -> RawCommandList {
        self.raw
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, command: Command) {
        self.context.gpu().record(self.raw, &command);
    }

    /// 未显式设置时按三角形列表计
    fn bound_topology(&self) -> Topology {
        self.topology.unwrap_or(Topology::TriangleList)
    }

    fn ensure_recording(&self, operation: &str) -> Result<()> {
        if self.state != CommandBufferState::Recording {
            return Err(self.misuse(&format!("{} called in {:?} state", operation, self.state)));
        }
        Ok(())
    }

    fn ensure_pipeline(&self, operation: &str, kind: PipelineKind) -> Result<()> {
        self.ensure_recording(operation)?;
        match self.pipeline {
            Some(bound) if bound.kind == kind => Ok(()),
            Some(bound) => Err(self.misuse(&format!("{} needs a {:?} pipeline, {:?} is bound", operation, kind, bound.kind))),
            None => Err(self.misuse(&format!("{} called before set_pipeline", operation))),
        }
    }

    fn check_subresource(&self, texture: &Texture, subresource: u32) -> Result<()> {
        if subresource >= texture.subresource_count() {
            return Err(self.misuse(&format!(
                "subresource {} is out of range for '{}' ({} subresources)",
                subresource,
                texture.name(),
                texture.subresource_count()
            )));
        }
        Ok(())
    }

    fn misuse(&self, reason: &str) -> DistRhiError {
        tracing::error!(command_buffer = %self.name, "{}", reason);
        DistRhiError::command(format!("'{}': {}", self.name, reason))
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.context.gpu().destroy_command_list(self.raw);
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("raw", &self.raw)
            .field("name", &self.name)
            .field("single_time", &self.single_time)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::buffer::BufferDesc;
    use crate::rhi::context::tests::headless_context;
    use crate::rhi::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, RasterState, Shader, ShaderStage, TopologyType};
    use crate::rhi::resource::Format;
    use crate::rhi::texture::{TextureDesc, TextureUsage};

    const SHADERS: &str = "void vs_main() {}\nvoid ps_main() {}\nvoid cs_main() {}";

    #[test]
    fn test_state_machine() {
        let (ctx, gpu) = headless_context();
        let mut cmd = CommandBuffer::new(&ctx, "frame", false).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Initial);

        let buffer = Buffer::new(&ctx, &BufferDesc::storage(64, 4)).unwrap();
        assert!(cmd.barrier(&buffer, ResourceLayout::UnorderedAccess).is_err());

        cmd.begin().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Recording);
        assert!(cmd.begin().is_err());
        assert_eq!(
            gpu.recorded_commands(cmd.raw()).first(),
            Some(&Command::SetDescriptorHeaps {
                resource: ctx.heap(DescriptorHeapKind::Resource).raw(),
                sampler: ctx.heap(DescriptorHeapKind::Sampler).raw(),
            })
        );

        cmd.end().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);
        assert!(cmd.end().is_err());
        assert!(cmd.set_topology(Topology::TriangleList).is_err());

        cmd.begin().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Recording);
    }

    #[test]
    fn test_reusable_buffers_reset_single_time_do_not() {
        let (ctx, gpu) = headless_context();

        let mut reusable = CommandBuffer::new(&ctx, "reusable", false).unwrap();
        reusable.begin().unwrap();
        reusable.end().unwrap();
        reusable.begin().unwrap();
        assert_eq!(gpu.reset_count(reusable.raw()), 2);

        let mut once = CommandBuffer::new(&ctx, "once", true).unwrap();
        once.begin().unwrap();
        once.end().unwrap();
        assert_eq!(gpu.reset_count(once.raw()), 0);
        assert!(once.begin().is_err());
    }

    #[test]
    fn test_barrier_elision_and_uav() {
        let (ctx, gpu) = headless_context();
        let buffer = Buffer::new(&ctx, &BufferDesc::storage(64, 4)).unwrap();
        let mut cmd = CommandBuffer::new(&ctx, "barriers", false).unwrap();
        cmd.begin().unwrap();

        let action = cmd.barrier(&buffer, ResourceLayout::UnorderedAccess).unwrap();
        assert!(matches!(action, BarrierAction::Transition { .. }));
        assert_eq!(buffer.layout(), ResourceLayout::UnorderedAccess);

        let action = cmd.barrier(&buffer, ResourceLayout::UnorderedAccess).unwrap();
        assert_eq!(action, BarrierAction::Execution);
        assert_eq!(buffer.layout(), ResourceLayout::UnorderedAccess);

        cmd.barrier(&buffer, ResourceLayout::NonPixelShaderResource).unwrap();
        let before = gpu.recorded_commands(cmd.raw()).len();
        let action = cmd.barrier(&buffer, ResourceLayout::NonPixelShaderResource).unwrap();
        assert_eq!(action, BarrierAction::Elided);
        assert_eq!(gpu.recorded_commands(cmd.raw()).len(), before);

        let barriers: Vec<Command> = gpu
            .recorded_commands(cmd.raw())
            .into_iter()
            .filter(Command::is_barrier)
            .collect();
        assert_eq!(
            barriers,
            vec![
                Command::Transition {
                    resource: buffer.raw(),
                    before: ResourceLayout::Common,
                    after: ResourceLayout::UnorderedAccess,
                },
                Command::UnorderedAccessBarrier { resource: buffer.raw() },
                Command::Transition {
                    resource: buffer.raw(),
                    before: ResourceLayout::UnorderedAccess,
                    after: ResourceLayout::NonPixelShaderResource,
                },
            ]
        );
    }

    #[test]
    fn test_draw_and_dispatch_stats() {
        let (ctx, _gpu) = headless_context();
        let vs = Shader::compile(&ctx, SHADERS, "vs_main", ShaderStage::Vertex);
        let ps = Shader::compile(&ctx, SHADERS, "ps_main", ShaderStage::Pixel);
        let cs = Shader::compile(&ctx, SHADERS, "cs_main", ShaderStage::Compute);
        let graphics = Pipeline::graphics(
            &ctx,
            &GraphicsPipelineDesc {
                name: "g",
                vertex: &vs,
                pixel: &ps,
                color_formats: vec![Format::Rgba8Unorm],
                depth_format: None,
                topology: TopologyType::Triangle,
                raster: RasterState::default(),
                push_constant_dwords: 2,
            },
        )
        .unwrap();
        let compute = Pipeline::compute(&ctx, &ComputePipelineDesc { name: "c", compute: &cs, push_constant_dwords: 0 }).unwrap();

        ctx.stats().reset();
        let mut cmd = CommandBuffer::new(&ctx, "draws", false).unwrap();
        cmd.begin().unwrap();
        assert!(cmd.draw(3, 1, 0, 0).is_err());

        cmd.set_pipeline(&graphics).unwrap();
        cmd.set_topology(Topology::TriangleList).unwrap();
        cmd.push_constants(&[1, 2]).unwrap();
        assert!(cmd.push_constants(&[1, 2, 3]).is_err());
        cmd.draw(6, 2, 0, 0).unwrap();
        cmd.draw_indexed(36, 1, 0, 0, 0).unwrap();
        assert!(cmd.dispatch(1, 1, 1).is_err());

        cmd.set_pipeline(&compute).unwrap();
        cmd.dispatch(8, 8, 1).unwrap();
        cmd.end().unwrap();

        let stats = ctx.stats().snapshot();
        assert_eq!(stats.draw_calls, 2);
        assert_eq!(stats.triangles, 4 + 12);
        assert_eq!(stats.dispatches, 1);
        assert_eq!(stats.meshlets, 0);

        ctx.stats().reset();
        cmd.begin().unwrap();
        cmd.set_pipeline(&graphics).unwrap();
        cmd.set_topology(Topology::TriangleStrip).unwrap();
        cmd.draw(4, 1, 0, 0).unwrap();
        cmd.set_topology(Topology::LineList).unwrap();
        cmd.draw(6, 1, 0, 0).unwrap();
        cmd.end().unwrap();

        let stats = ctx.stats().snapshot();
        assert_eq!(stats.draw_calls, 2);
        assert_eq!(stats.triangles, 2);
    }

    #[test]
    fn test_markers_must_balance() {
        let (ctx, _gpu) = headless_context();
        let mut cmd = CommandBuffer::new(&ctx, "markers", false).unwrap();
        cmd.begin().unwrap();
        assert!(cmd.end_marker().is_err());
        cmd.begin_marker("shadow pass").unwrap();
        assert!(cmd.end().is_err());
        cmd.end_marker().unwrap();
        cmd.end().unwrap();
    }

    #[test]
    fn test_render_target_binding_validation() {
        let (ctx, gpu) = headless_context();
        let texture: Rc<dyn Resource> = Rc::new(
            Texture::new(&ctx, &TextureDesc::new_2d(4, 4, Format::Rgba8Unorm, TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE)).unwrap(),
        );
        let rtv = View::new(&ctx, texture.clone(), ViewType::RenderTarget, crate::rhi::view::ViewDimension::Texture2D).unwrap();
        let srv = View::new(&ctx, texture, ViewType::ShaderResource, crate::rhi::view::ViewDimension::Texture2D).unwrap();

        let mut cmd = CommandBuffer::new(&ctx, "targets", false).unwrap();
        cmd.begin().unwrap();
        assert!(cmd.set_render_targets(&[&srv], None).is_err());
        cmd.set_render_targets(&[&rtv], None).unwrap();
        cmd.clear_render_target(&rtv, [0.0, 0.0, 0.0, 1.0]).unwrap();
        assert!(cmd.clear_depth(&rtv, 1.0).is_err());

        assert!(gpu
            .recorded_commands(cmd.raw())
            .contains(&Command::SetRenderTargets { colors: vec![rtv.cpu()], depth: None }));
    }

    #[test]
    fn test_copy_bounds() {
        let (ctx, _gpu) = headless_context();
        let src = Buffer::new(&ctx, &BufferDesc::copy(64)).unwrap();
        let dst = Buffer::new(&ctx, &BufferDesc::storage(32, 4)).unwrap();
        let mut cmd = CommandBuffer::new(&ctx, "copies", false).unwrap();
        cmd.begin().unwrap();
        cmd.copy_buffer(&dst, 0, &src, 32, 32).unwrap();
        assert!(cmd.copy_buffer(&dst, 8, &src, 0, 32).is_err());
    }
}
