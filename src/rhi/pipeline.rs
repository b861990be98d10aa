//! 着色器与管线
//!
//! 所有管线共享同一个无绑定根布局：最多 64 个 dword 的根常量，
//! 加上可直接索引的资源堆与采样器堆。着色器编译失败是软错误，
//! 得到一个无效的 [`Shader`]；用无效着色器创建管线返回错误，
//! 后端创建管线失败则是致命错误。

use std::rc::Rc;

use crate::core::error::{DistRhiError, GraphicsError, Result};
use crate::gfx::backend::{GpuDevice, RawPipeline, RawPipelineDesc, ShaderBytecode};
use crate::rhi::context::Context;
use crate::rhi::resource::Format;

/// 根常量上限（dword）
pub const MAX_PUSH_CONSTANT_DWORDS: u32 = 64;
/// 渲染目标数量上限
pub const MAX_COLOR_TARGETS: usize = 8;

/// 着色器阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
    Mesh,
    Amplification,
}

impl ShaderStage {
    pub fn name(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Pixel => "pixel",
            ShaderStage::Compute => "compute",
            ShaderStage::Mesh => "mesh",
            ShaderStage::Amplification => "amplification",
        }
    }
}

/// 编译后的着色器
#[derive(Debug, Clone)]
pub struct Shader {
    stage: ShaderStage,
    entry: String,
    bytecode: Vec<u8>,
    messages: String,
}

impl Shader {
    /// 编译着色器；失败时返回无效着色器并记录编译器输出
    pub fn compile(context: &Context, source: &str, entry: &str, stage: ShaderStage) -> Self {
        match context.gpu().compile_shader(source, entry, stage) {
            Ok(bytecode) => {
                tracing::debug!(entry, stage = stage.name(), bytes = bytecode.len(), "Shader compiled");
                Self {
                    stage,
                    entry: entry.to_string(),
                    bytecode,
                    messages: String::new(),
                }
            }
            Err(messages) => {
                tracing::warn!(entry, stage = stage.name(), "Shader compilation failed:\n{}", messages);
                Self {
                    stage,
                    entry: entry.to_string(),
                    bytecode: Vec::new(),
                    messages,
                }
            }
        }
    }

    /// 使用预编译的字节码
    pub fn from_bytecode(stage: ShaderStage, entry: impl Into<String>, bytecode: Vec<u8>) -> Self {
        Self {
            stage,
            entry: entry.into(),
            bytecode,
            messages: String::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.bytecode.is_empty()
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// 编译器输出
    pub fn messages(&self) -> &str {
        &self.messages
    }

    fn bytecode_for(&self, expected: ShaderStage, pipeline: &str) -> Result<ShaderBytecode<'_>> {
        if !self.is_valid() {
            return Err(GraphicsError::ShaderCompilation(format!(
                "pipeline '{}' uses invalid {} shader '{}'",
                pipeline,
                self.stage.name(),
                self.entry
            ))
            .into());
        }
        if self.stage != expected {
            return Err(DistRhiError::usage(format!(
                "pipeline '{}' expected a {} shader but '{}' is a {} shader",
                pipeline,
                expected.name(),
                self.entry,
                self.stage.name()
            )));
        }
        Ok(ShaderBytecode { stage: self.stage, code: &self.bytecode })
    }
}

/// 管线种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Graphics,
    Mesh,
    Compute,
}

/// 图元拓扑
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

impl Topology {
    /// 给定顶点（索引）数时产生的三角形数；点和线为 0
    pub fn triangle_count(&self, vertex_count: u32) -> u32 {
        match self {
            Topology::TriangleList => vertex_count / 3,
            Topology::TriangleStrip => vertex_count.saturating_sub(2),
            Topology::PointList | Topology::LineList | Topology::LineStrip => 0,
        }
    }

    pub fn topology_type(&self) -> TopologyType {
        match self {
            Topology::PointList => TopologyType::Point,
            Topology::LineList | Topology::LineStrip => TopologyType::Line,
            Topology::TriangleList | Topology::TriangleStrip => TopologyType::Triangle,
        }
    }
}

/// 管线创建时的拓扑类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyType {
    Point,
    Line,
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// 光栅化与深度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterState {
    pub cull: CullMode,
    pub depth_test: bool,
    pub depth_write: bool,
    pub wireframe: bool,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            cull: CullMode::Back,
            depth_test: true,
            depth_write: true,
            wireframe: false,
        }
    }
}

/// 图形管线描述
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc<'a> {
    pub name: &'a str,
    pub vertex: &'a Shader,
    pub pixel: &'a Shader,
    pub color_formats: Vec<Format>,
    pub depth_format: Option<Format>,
    pub topology: TopologyType,
    pub raster: RasterState,
    pub push_constant_dwords: u32,
}

/// 网格着色管线描述
#[derive(Debug, Clone)]
pub struct MeshPipelineDesc<'a> {
    pub name: &'a str,
    pub amplification: Option<&'a Shader>,
    pub mesh: &'a Shader,
    pub pixel: &'a Shader,
    pub color_formats: Vec<Format>,
    pub depth_format: Option<Format>,
    pub raster: RasterState,
    pub push_constant_dwords: u32,
}

/// 计算管线描述
#[derive(Debug, Clone)]
pub struct ComputePipelineDesc<'a> {
    pub name: &'a str,
    pub compute: &'a Shader,
    pub push_constant_dwords: u32,
}

/// 管线状态对象
pub struct Pipeline {
    device: Rc<dyn GpuDevice>,
    raw: RawPipeline,
    kind: PipelineKind,
    push_constant_dwords: u32,
    name: String,
}

impl Pipeline {
    pub fn graphics(context: &Context, desc: &GraphicsPipelineDesc<'_>) -> Result<Self> {
        validate_targets(desc.name, &desc.color_formats, desc.depth_format, desc.push_constant_dwords)?;
        let raw_desc = RawPipelineDesc::Graphics {
            name: desc.name,
            vertex: desc.vertex.bytecode_for(ShaderStage::Vertex, desc.name)?,
            pixel: desc.pixel.bytecode_for(ShaderStage::Pixel, desc.name)?,
            color_formats: &desc.color_formats,
            depth_format: desc.depth_format,
            topology: desc.topology,
            cull: desc.raster.cull,
            depth_test: desc.raster.depth_test,
            depth_write: desc.raster.depth_write,
            wireframe: desc.raster.wireframe,
            push_constant_dwords: desc.push_constant_dwords,
        };
        Ok(Self::create(context, &raw_desc, PipelineKind::Graphics, desc.name, desc.push_constant_dwords))
    }

    pub fn mesh(context: &Context, desc: &MeshPipelineDesc<'_>) -> Result<Self> {
        validate_targets(desc.name, &desc.color_formats, desc.depth_format, desc.push_constant_dwords)?;
        if !context.device().capabilities().mesh_shaders {
            return Err(DistRhiError::usage(format!(
                "pipeline '{}' needs mesh shader support",
                desc.name
            )));
        }
        let amplification = desc
            .amplification
            .map(|shader| shader.bytecode_for(ShaderStage::Amplification, desc.name))
            .transpose()?;
        let raw_desc = RawPipelineDesc::Mesh {
            name: desc.name,
            amplification,
            mesh: desc.mesh.bytecode_for(ShaderStage::Mesh, desc.name)?,
            pixel: desc.pixel.bytecode_for(ShaderStage::Pixel, desc.name)?,
            color_formats: &desc.color_formats,
            depth_format: desc.depth_format,
            cull: desc.raster.cull,
            depth_test: desc.raster.depth_test,
            depth_write: desc.raster.depth_write,
            wireframe: desc.raster.wireframe,
            push_constant_dwords: desc.push_constant_dwords,
        };
        Ok(Self::create(context, &raw_desc, PipelineKind::Mesh, desc.name, desc.push_constant_dwords))
    }

    pub fn compute(context: &Context, desc: &ComputePipelineDesc<'_>) -> Result<Self> {
        validate_push_constants(desc.name, desc.push_constant_dwords)?;
        let raw_desc = RawPipelineDesc::Compute {
            name: desc.name,
            compute: desc.compute.bytecode_for(ShaderStage::Compute, desc.name)?,
            push_constant_dwords: desc.push_constant_dwords,
        };
        Ok(Self::create(context, &raw_desc, PipelineKind::Compute, desc.name, desc.push_constant_dwords))
    }

    fn create(
        context: &Context,
        desc: &RawPipelineDesc<'_>,
        kind: PipelineKind,
        name: &str,
        push_constant_dwords: u32,
    ) -> Self {
        let device = context.gpu().clone();
        let raw = match device.create_pipeline(desc) {
            Ok(raw) => raw,
            Err(e) => crate::fatal!("Failed to create {:?} pipeline '{}': {}", kind, name, e),
        };

        tracing::info!(name, kind = ?kind, "Pipeline created");

        Self {
            device,
            raw,
            kind,
            push_constant_dwords,
            name: name.to_string(),
        }
    }

    pub fn raw(&self) -> RawPipeline {
        self.raw
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn push_constant_dwords(&self) -> u32 {
        self.push_constant_dwords
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.device.destroy_pipeline(self.raw);
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("raw", &self.raw)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish()
    }
}

fn validate_push_constants(name: &str, dwords: u32) -> Result<()> {
    if dwords > MAX_PUSH_CONSTANT_DWORDS {
        return Err(DistRhiError::usage(format!(
            "pipeline '{}' requests {} push constant dwords (max {})",
            name, dwords, MAX_PUSH_CONSTANT_DWORDS
        )));
    }
    Ok(())
}

fn validate_targets(name: &str, colors: &[Format], depth: Option<Format>, dwords: u32) -> Result<()> {
    validate_push_constants(name, dwords)?;
    if colors.len() > MAX_COLOR_TARGETS {
        return Err(DistRhiError::usage(format!(
            "pipeline '{}' has {} color targets (max {})",
            name,
            colors.len(),
            MAX_COLOR_TARGETS
        )));
    }
    if let Some(format) = colors.iter().find(|f| f.is_depth() || f.is_compressed()) {
        return Err(DistRhiError::usage(format!("pipeline '{}' cannot render to {:?}", name, format)));
    }
    if let Some(format) = depth.filter(|f| !f.is_depth()) {
        return Err(DistRhiError::usage(format!("pipeline '{}' depth format {:?} has no depth", name, format)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::context::tests::headless_context;

    const TRIANGLE: &str = "float4 vs_main() : SV_Position { return 0; }\nfloat4 ps_main() : SV_Target { return 1; }";
    const COMPUTE: &str = "[numthreads(64, 1, 1)] void cs_main() {}";

    #[test]
    fn test_compile_failure_is_soft() {
        let (ctx, _gpu) = headless_context();
        let shader = Shader::compile(&ctx, TRIANGLE, "missing_entry", ShaderStage::Vertex);
        assert!(!shader.is_valid());
        assert!(shader.messages().contains("missing_entry"));

        let ok = Shader::compile(&ctx, TRIANGLE, "vs_main", ShaderStage::Vertex);
        assert!(ok.is_valid());
        assert!(ok.messages().is_empty());
    }

    #[test]
    fn test_graphics_pipeline() {
        let (ctx, gpu) = headless_context();
        let vs = Shader::compile(&ctx, TRIANGLE, "vs_main", ShaderStage::Vertex);
        let ps = Shader::compile(&ctx, TRIANGLE, "ps_main", ShaderStage::Pixel);
        let desc = GraphicsPipelineDesc {
            name: "triangle",
            vertex: &vs,
            pixel: &ps,
            color_formats: vec![Format::Bgra8Unorm],
            depth_format: Some(Format::Depth32Float),
            topology: TopologyType::Triangle,
            raster: RasterState::default(),
            push_constant_dwords: 4,
        };

        let pipeline = Pipeline::graphics(&ctx, &desc).unwrap();
        assert_eq!(pipeline.kind(), PipelineKind::Graphics);
        assert_eq!(gpu.live_pipeline_count(), 1);
        drop(pipeline);
        assert_eq!(gpu.live_pipeline_count(), 0);

        // 阶段不匹配
        let swapped = GraphicsPipelineDesc { vertex: &ps, pixel: &vs, ..desc.clone() };
        assert!(Pipeline::graphics(&ctx, &swapped).is_err());

        let too_many_constants = GraphicsPipelineDesc { push_constant_dwords: 65, ..desc.clone() };
        assert!(Pipeline::graphics(&ctx, &too_many_constants).is_err());

        let bad_depth = GraphicsPipelineDesc { depth_format: Some(Format::Rgba8Unorm), ..desc };
        assert!(Pipeline::graphics(&ctx, &bad_depth).is_err());
    }

    #[test]
    fn test_invalid_shader_rejected() {
        let (ctx, _gpu) = headless_context();
        let broken = Shader::compile(&ctx, COMPUTE, "main", ShaderStage::Compute);
        let err = Pipeline::compute(
            &ctx,
            &ComputePipelineDesc { name: "broken", compute: &broken, push_constant_dwords: 0 },
        )
        .unwrap_err();
        assert!(matches!(err, DistRhiError::Graphics(GraphicsError::ShaderCompilation(_))));

        let cs = Shader::compile(&ctx, COMPUTE, "cs_main", ShaderStage::Compute);
        let pipeline = Pipeline::compute(
            &ctx,
            &ComputePipelineDesc { name: "clear", compute: &cs, push_constant_dwords: 8 },
        )
        .unwrap();
        assert_eq!(pipeline.push_constant_dwords(), 8);
    }

    #[test]
    fn test_topology_types() {
        assert_eq!(Topology::TriangleStrip.topology_type(), TopologyType::Triangle);
        assert_eq!(Topology::LineStrip.topology_type(), TopologyType::Line);
        assert_eq!(Topology::PointList.topology_type(), TopologyType::Point);
    }

    #[test]
    fn test_triangle_counts() {
        assert_eq!(Topology::TriangleList.triangle_count(7), 2);
        assert_eq!(Topology::TriangleStrip.triangle_count(4), 2);
        assert_eq!(Topology::TriangleStrip.triangle_count(1), 0);
        assert_eq!(Topology::LineList.triangle_count(6), 0);
        assert_eq!(Topology::PointList.triangle_count(3), 0);
    }
}
