//! 光线追踪加速结构
//!
//! - **BLAS**：由顶点 / 索引缓冲区描述的三角形几何
//! - **TLAS**：实例列表，每个实例引用一个 BLAS
//!
//! 加速结构拥有自己的结果缓冲区与 scratch 缓冲区，大小来自后端的预构建信息。
//! TLAS 额外拥有一个实例缓冲区，由上传器填充。真正的构建命令通过
//! `CommandBuffer::build_acceleration_structure` 或上传器记录。

use std::cell::Cell;
use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use crate::core::error::{DistRhiError, Result};
use crate::gfx::command::{AccelerationBuildInputs, TriangleGeometry};
use crate::rhi::buffer::{Buffer, BufferDesc, BufferType};
use crate::rhi::context::Context;
use crate::rhi::resource::{Format, Resource, ResourceKind, ResourceState};

/// 加速结构层级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelerationLevel {
    Bottom,
    Top,
}

/// TLAS 实例描述，内存布局与 `D3D12_RAYTRACING_INSTANCE_DESC` 相同（64 字节）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceDesc {
    /// 3x4 行主序变换矩阵
    pub transform: [[f32; 4]; 3],
    /// 低 24 位实例 ID，高 8 位实例掩码
    pub id_and_mask: u32,
    /// 低 24 位命中组偏移，高 8 位标志
    pub offset_and_flags: u32,
    /// BLAS 结果缓冲区的 GPU 地址
    pub blas_address: u64,
}

impl InstanceDesc {
    pub const SIZE: u64 = std::mem::size_of::<InstanceDesc>() as u64;

    pub const IDENTITY: [[f32; 4]; 3] = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
    ];

    pub fn new(blas: &AccelerationStructure, transform: [[f32; 4]; 3], instance_id: u32, mask: u8) -> Self {
        Self {
            transform,
            id_and_mask: (instance_id & 0x00ff_ffff) | ((mask as u32) << 24),
            offset_and_flags: 0,
            blas_address: blas.gpu_address(),
        }
    }

    pub fn instance_id(&self) -> u32 {
        self.id_and_mask & 0x00ff_ffff
    }

    pub fn mask(&self) -> u8 {
        (self.id_and_mask >> 24) as u8
    }
}

/// TLAS 实例：实例描述加上它引用的 BLAS
#[derive(Debug, Clone)]
pub struct TlasInstance {
    pub blas: Rc<AccelerationStructure>,
    pub desc: InstanceDesc,
}

impl TlasInstance {
    pub fn new(blas: &Rc<AccelerationStructure>, transform: [[f32; 4]; 3], instance_id: u32, mask: u8) -> Self {
        Self {
            blas: blas.clone(),
            desc: InstanceDesc::new(blas, transform, instance_id, mask),
        }
    }
}

/// BLAS 几何输入
#[derive(Debug, Clone)]
pub struct BlasGeometry {
    /// 顶点缓冲区，位置位于每个顶点的开头
    pub vertices: Rc<Buffer>,
    pub vertex_format: Format,
    pub indices: Option<Rc<Buffer>>,
    pub opaque: bool,
}

impl BlasGeometry {
    pub fn new(vertices: &Rc<Buffer>, indices: Option<&Rc<Buffer>>) -> Self {
        Self {
            vertices: vertices.clone(),
            vertex_format: Format::Rgb32Float,
            indices: indices.cloned(),
            opaque: true,
        }
    }
}

/// 光线追踪加速结构
///
/// 持有构建输入（BLAS 的顶点 / 索引缓冲区，TLAS 引用的 BLAS）的强引用，
/// 因此构建或更新时输入一定仍然存活。
#[derive(Debug)]
pub struct AccelerationStructure {
    level: AccelerationLevel,
    result: Buffer,
    scratch: Buffer,
    instances: Option<Buffer>,
    instance_data: Vec<InstanceDesc>,
    geometry_buffers: Vec<Rc<Buffer>>,
    blases: Vec<Rc<AccelerationStructure>>,
    inputs: AccelerationBuildInputs,
    built: Cell<bool>,
}

impl AccelerationStructure {
    /// 创建 BLAS
    pub fn bottom_level(
        context: &Context,
        name: &str,
        geometries: &[BlasGeometry],
        allow_update: bool,
    ) -> Result<Self> {
        if geometries.is_empty() {
            return Err(DistRhiError::resource(format!("BLAS '{}' has no geometry", name)));
        }

        let mut triangles = Vec::with_capacity(geometries.len());
        let mut geometry_buffers = Vec::new();
        for geometry in geometries {
            let stride = geometry.vertices.stride();
            if stride == 0 {
                return Err(DistRhiError::resource(format!(
                    "BLAS '{}' vertex buffer '{}' has no stride",
                    name,
                    geometry.vertices.name()
                )));
            }
            let (index_address, index_count, index_format) = match &geometry.indices {
                Some(ib) => {
                    let view = ib.index_view().ok_or_else(|| {
                        DistRhiError::resource(format!("BLAS '{}' index buffer '{}' is not an index buffer", name, ib.name()))
                    })?;
                    (ib.gpu_address(), (ib.size() / ib.stride() as u64) as u32, view.format)
                }
                None => (0, 0, Format::Unknown),
            };

            triangles.push(TriangleGeometry {
                vertex_address: geometry.vertices.gpu_address(),
                vertex_count: geometry.vertices.element_count() as u32,
                vertex_stride: stride as u64,
                vertex_format: geometry.vertex_format,
                index_address,
                index_count,
                index_format,
                opaque: geometry.opaque,
            });
            geometry_buffers.push(geometry.vertices.clone());
            geometry_buffers.extend(geometry.indices.iter().cloned());
        }

        let inputs = AccelerationBuildInputs::BottomLevel {
            geometries: triangles,
            allow_update,
        };
        let mut blas = Self::create(context, name, AccelerationLevel::Bottom, inputs, None, Vec::new())?;
        blas.geometry_buffers = geometry_buffers;
        Ok(blas)
    }

    /// 创建 TLAS；实例数据由上传器写入实例缓冲区
    pub fn top_level(
        context: &Context,
        name: &str,
        instances: Vec<TlasInstance>,
        allow_update: bool,
    ) -> Result<Self> {
        if instances.is_empty() {
            return Err(DistRhiError::resource(format!("TLAS '{}' has no instances", name)));
        }
        if let Some(instance) = instances.iter().find(|i| i.blas.level() != AccelerationLevel::Bottom) {
            return Err(DistRhiError::resource(format!(
                "TLAS '{}' instance references '{}', which is not a BLAS",
                name,
                instance.blas.name()
            )));
        }
        let (blases, instances): (Vec<_>, Vec<_>) = instances.into_iter().map(|i| (i.blas, i.desc)).unzip();

        let instance_buffer = Buffer::new(
            context,
            &BufferDesc::storage(InstanceDesc::SIZE * instances.len() as u64, InstanceDesc::SIZE as u32)
                .with_name(format!("{} Instances", name)),
        )?;
        let inputs = AccelerationBuildInputs::TopLevel {
            instance_address: instance_buffer.gpu_address(),
            instance_count: instances.len() as u32,
            allow_update,
        };
        let mut tlas = Self::create(context, name, AccelerationLevel::Top, inputs, Some(instance_buffer), instances)?;
        tlas.blases = blases;
        Ok(tlas)
    }

    fn create(
        context: &Context,
        name: &str,
        level: AccelerationLevel,
        inputs: AccelerationBuildInputs,
        instances: Option<Buffer>,
        instance_data: Vec<InstanceDesc>,
    ) -> Result<Self> {
        let sizes = context.gpu().acceleration_structure_sizes(&inputs);
        if sizes.result_size == 0 {
            return Err(DistRhiError::resource(format!(
                "backend reported an empty acceleration structure for '{}'",
                name
            )));
        }

        let result = Buffer::new(
            context,
            &BufferDesc::new(BufferType::AccelerationStructure, sizes.result_size, 0).with_name(name),
        )?;
        let scratch = Buffer::new(
            context,
            &BufferDesc::storage(sizes.scratch_size.max(sizes.update_scratch_size).max(1), 0)
                .with_name(format!("{} Scratch", name)),
        )?;

        tracing::debug!(
            name,
            level = ?level,
            result_bytes = sizes.result_size,
            scratch_bytes = sizes.scratch_size,
            "Acceleration structure created"
        );

        Ok(Self {
            level,
            result,
            scratch,
            instances,
            instance_data,
            geometry_buffers: Vec::new(),
            blases: Vec::new(),
            inputs,
            built: Cell::new(false),
        })
    }

    pub fn level(&self) -> AccelerationLevel {
        self.level
    }

    pub fn result(&self) -> &Buffer {
        &self.result
    }

    pub fn scratch(&self) -> &Buffer {
        &self.scratch
    }

    /// TLAS 的实例缓冲区
    pub fn instance_buffer(&self) -> Option<&Buffer> {
        self.instances.as_ref()
    }

    pub fn instances(&self) -> &[InstanceDesc] {
        &self.instance_data
    }

    /// BLAS 引用的顶点 / 索引缓冲区
    pub fn geometry_buffers(&self) -> &[Rc<Buffer>] {
        &self.geometry_buffers
    }

    /// TLAS 引用的 BLAS，与实例一一对应
    pub fn referenced_blases(&self) -> &[Rc<AccelerationStructure>] {
        &self.blases
    }

    /// 实例数据的字节表示
    pub fn instance_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.instance_data)
    }

    pub fn inputs(&self) -> &AccelerationBuildInputs {
        &self.inputs
    }

    pub fn allows_update(&self) -> bool {
        match self.inputs {
            AccelerationBuildInputs::BottomLevel { allow_update, .. }
            | AccelerationBuildInputs::TopLevel { allow_update, .. } => allow_update,
        }
    }

    pub fn gpu_address(&self) -> u64 {
        self.result.gpu_address()
    }

    pub fn is_built(&self) -> bool {
        self.built.get()
    }

    pub(crate) fn mark_built(&self) {
        self.built.set(true);
    }
}

impl Resource for AccelerationStructure {
    fn state(&self) -> &ResourceState {
        self.result.state()
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::AccelerationStructure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::context::tests::headless_context;
    use crate::rhi::resource::ResourceLayout;

    #[test]
    fn test_instance_desc_layout() {
        assert_eq!(InstanceDesc::SIZE, 64);
    }

    #[test]
    fn test_blas_and_tlas() {
        let (ctx, _gpu) = headless_context();
        let vertices = Rc::new(Buffer::new(&ctx, &BufferDesc::vertex(12 * 3, 12)).unwrap());
        let indices = Rc::new(Buffer::new(&ctx, &BufferDesc::index(6, 2)).unwrap());

        let blas = Rc::new(
            AccelerationStructure::bottom_level(
                &ctx,
                "Triangle BLAS",
                &[BlasGeometry::new(&vertices, Some(&indices))],
                false,
            )
            .unwrap(),
        );
        assert_eq!(blas.level(), AccelerationLevel::Bottom);
        assert_eq!(blas.layout(), ResourceLayout::AccelerationStructure);
        assert!(blas.instance_buffer().is_none());
        match blas.inputs() {
            AccelerationBuildInputs::BottomLevel { geometries, .. } => {
                assert_eq!(geometries[0].vertex_count, 3);
                assert_eq!(geometries[0].index_count, 3);
                assert_eq!(geometries[0].index_format, Format::R16Uint);
            }
            other => panic!("unexpected inputs {:?}", other),
        }

        let instance = InstanceDesc::new(&blas, InstanceDesc::IDENTITY, 7, 0xff);
        assert_eq!(instance.instance_id(), 7);
        assert_eq!(instance.mask(), 0xff);
        assert_eq!(instance.blas_address, blas.gpu_address());

        let instances = vec![
            TlasInstance::new(&blas, InstanceDesc::IDENTITY, 7, 0xff),
            TlasInstance::new(&blas, InstanceDesc::IDENTITY, 8, 0x01),
        ];
        let tlas = AccelerationStructure::top_level(&ctx, "Scene TLAS", instances, true).unwrap();
        assert_eq!(tlas.instances()[0], instance);
        assert_eq!(tlas.referenced_blases().len(), 2);
        assert_eq!(tlas.instance_bytes().len(), 128);
        assert_eq!(tlas.instance_buffer().unwrap().size(), 128);
        assert!(tlas.allows_update());
        assert!(!tlas.is_built());
    }

    #[test]
    fn test_inputs_outlive_caller_handles() {
        let (ctx, gpu) = headless_context();
        let vertices = Rc::new(Buffer::new(&ctx, &BufferDesc::vertex(36, 12)).unwrap());
        let vertex_raw = vertices.raw();

        let blas = Rc::new(
            AccelerationStructure::bottom_level(&ctx, "blas", &[BlasGeometry::new(&vertices, None)], false).unwrap(),
        );
        drop(vertices);
        assert!(gpu.buffer_contents(vertex_raw).is_some());
        assert_eq!(blas.geometry_buffers()[0].raw(), vertex_raw);

        let tlas = AccelerationStructure::top_level(
            &ctx,
            "tlas",
            vec![TlasInstance::new(&blas, InstanceDesc::IDENTITY, 0, 0xff)],
            false,
        )
        .unwrap();
        let blas_raw = blas.raw();
        drop(blas);
        assert!(gpu.buffer_contents(blas_raw).is_some());
        assert_eq!(tlas.referenced_blases()[0].raw(), blas_raw);

        drop(tlas);
        assert!(gpu.buffer_contents(blas_raw).is_none());
        assert!(gpu.buffer_contents(vertex_raw).is_none());
    }

    #[test]
    fn test_tlas_rejects_top_level_instances() {
        let (ctx, _gpu) = headless_context();
        let vertices = Rc::new(Buffer::new(&ctx, &BufferDesc::vertex(36, 12)).unwrap());
        let blas = Rc::new(
            AccelerationStructure::bottom_level(&ctx, "blas", &[BlasGeometry::new(&vertices, None)], false).unwrap(),
        );
        let tlas = Rc::new(
            AccelerationStructure::top_level(
                &ctx,
                "inner",
                vec![TlasInstance::new(&blas, InstanceDesc::IDENTITY, 0, 0xff)],
                false,
            )
            .unwrap(),
        );
        let nested = vec![TlasInstance::new(&tlas, InstanceDesc::IDENTITY, 0, 0xff)];
        assert!(AccelerationStructure::top_level(&ctx, "outer", nested, false).is_err());
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let (ctx, _gpu) = headless_context();
        assert!(AccelerationStructure::bottom_level(&ctx, "empty", &[], false).is_err());
        assert!(AccelerationStructure::top_level(&ctx, "empty", Vec::new(), false).is_err());
    }
}
