//! 资源视图
//!
//! 视图把资源绑定到一个描述符槽位：渲染目标视图进入 RTV 堆，深度视图进入 DSV 堆，
//! 着色资源与存储视图进入共享的着色器可见堆（无绑定着色器通过 [`View::index`] 访问）。
//! 视图创建后不可变，析构时释放描述符，并持有资源的强引用。

use std::rc::Rc;

use crate::core::error::{DistRhiError, Result};
use crate::rhi::context::Context;
use crate::rhi::descriptor::{CpuDescriptorHandle, Descriptor, DescriptorHeapKind, GpuDescriptorHandle};
use crate::rhi::resource::{Format, Resource, ResourceKind};
use crate::rhi::texture::TextureUsage;

/// 视图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewType {
    RenderTarget,
    DepthTarget,
    ShaderResource,
    Storage,
}

impl ViewType {
    pub fn heap_kind(&self) -> DescriptorHeapKind {
        match self {
            ViewType::RenderTarget => DescriptorHeapKind::RenderTarget,
            ViewType::DepthTarget => DescriptorHeapKind::DepthStencil,
            ViewType::ShaderResource | ViewType::Storage => DescriptorHeapKind::Resource,
        }
    }
}

/// 视图维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewDimension {
    Buffer,
    Texture2D,
    TextureCube,
}

/// 写入描述符槽位的后端描述
#[derive(Debug, Clone, PartialEq)]
pub enum ViewDescription {
    Buffer {
        view_type: ViewType,
        first_element: u64,
        element_count: u32,
        /// 结构化步长，0 表示原始（R32 无类型）缓冲区
        stride: u32,
    },
    Texture {
        view_type: ViewType,
        format: Format,
        /// 以 2D 数组形式访问（立方体存储视图）
        array: bool,
        cube: bool,
        most_detailed_mip: u32,
        mip_levels: u32,
        first_array_slice: u32,
        array_size: u32,
    },
    AccelerationStructure {
        address: u64,
    },
}

impl ViewDescription {
    fn build(resource: &dyn Resource, view_type: ViewType, dimension: ViewDimension) -> Result<Self> {
        let invalid = |reason: &str| {
            Err(DistRhiError::usage(format!(
                "cannot create {:?} {:?} view of '{}': {}",
                dimension,
                view_type,
                resource.name(),
                reason
            )))
        };

        if resource.kind() == ResourceKind::Texture {
            let required = match view_type {
                ViewType::RenderTarget => TextureUsage::RENDER_TARGET,
                ViewType::DepthTarget => TextureUsage::DEPTH_TARGET,
                ViewType::Storage => TextureUsage::STORAGE,
                ViewType::ShaderResource => TextureUsage::empty(),
            };
            if !resource.texture_usage().contains(required) {
                return invalid("texture usage does not allow this view");
            }
        }

        match (resource.kind(), dimension) {
            (ResourceKind::AccelerationStructure, ViewDimension::Buffer) => {
                if view_type != ViewType::ShaderResource {
                    return invalid("acceleration structures only have shader resource views");
                }
                Ok(ViewDescription::AccelerationStructure {
                    address: resource.gpu_address(),
                })
            }
            (ResourceKind::Buffer, ViewDimension::Buffer) => {
                if matches!(view_type, ViewType::RenderTarget | ViewType::DepthTarget) {
                    return invalid("buffers cannot be render or depth targets");
                }
                if view_type == ViewType::Storage
                    && !resource.buffer_usage().is_some_and(|ty| ty.allows_unordered_access())
                {
                    return invalid("buffer was not created for unordered access");
                }
                let stride = resource.state().stride();
                let element_size = if stride == 0 { 4 } else { stride as u64 };
                Ok(ViewDescription::Buffer {
                    view_type,
                    first_element: 0,
                    element_count: (resource.size() / element_size) as u32,
                    stride,
                })
            }
            (ResourceKind::Texture, ViewDimension::Texture2D) => {
                let format = resource.format();
                match view_type {
                    ViewType::DepthTarget if !format.is_depth() => return invalid("format has no depth"),
                    ViewType::RenderTarget | ViewType::Storage if format.is_depth() => {
                        return invalid("depth formats only have depth and shader resource views");
                    }
                    _ => {}
                }
                let layers = resource.array_layers();
                Ok(ViewDescription::Texture {
                    view_type,
                    format,
                    array: layers > 1,
                    cube: false,
                    most_detailed_mip: 0,
                    mip_levels: if view_type == ViewType::ShaderResource { resource.mip_levels() } else { 1 },
                    first_array_slice: 0,
                    array_size: layers,
                })
            }
            (ResourceKind::Texture, ViewDimension::TextureCube) => {
                if resource.array_layers() != 6 {
                    return invalid("cube views need 6 array layers");
                }
                match view_type {
                    ViewType::ShaderResource => Ok(ViewDescription::Texture {
                        view_type,
                        format: resource.format(),
                        array: false,
                        cube: true,
                        most_detailed_mip: 0,
                        mip_levels: resource.mip_levels(),
                        first_array_slice: 0,
                        array_size: 6,
                    }),
                    // 存储视图没有立方体维度，按 6 层的 2D 数组访问
                    ViewType::Storage => Ok(ViewDescription::Texture {
                        view_type,
                        format: resource.format(),
                        array: true,
                        cube: true,
                        most_detailed_mip: 0,
                        mip_levels: 1,
                        first_array_slice: 0,
                        array_size: 6,
                    }),
                    _ => invalid("cube textures are not render or depth targets"),
                }
            }
            _ => invalid("dimension does not match the resource"),
        }
    }

    pub fn view_type(&self) -> ViewType {
        match self {
            ViewDescription::Buffer { view_type, .. } | ViewDescription::Texture { view_type, .. } => *view_type,
            ViewDescription::AccelerationStructure { .. } => ViewType::ShaderResource,
        }
    }
}

/// 资源视图
pub struct View {
    context: Rc<Context>,
    view_type: ViewType,
    dimension: ViewDimension,
    descriptor: Descriptor,
    description: ViewDescription,
    resource: Rc<dyn Resource>,
}

impl View {
    pub fn new(
        context: &Rc<Context>,
        resource: Rc<dyn Resource>,
        view_type: ViewType,
        dimension: ViewDimension,
    ) -> Result<Self> {
        let description = ViewDescription::build(resource.as_ref(), view_type, dimension)?;
        let heap = context.heap(view_type.heap_kind());
        let mut descriptor = heap.allocate();

        if let Err(e) = context
            .gpu()
            .write_view(heap.raw(), descriptor.index(), resource.raw(), &description)
        {
            heap.free(&mut descriptor);
            return Err(e);
        }

        tracing::trace!(
            resource = resource.name(),
            view = ?view_type,
            index = descriptor.index(),
            "View created"
        );

        Ok(Self {
            context: context.clone(),
            view_type,
            dimension,
            descriptor,
            description,
            resource,
        })
    }

    pub fn view_type(&self) -> ViewType {
        self.view_type
    }

    pub fn dimension(&self) -> ViewDimension {
        self.dimension
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// 描述符堆内索引
    pub fn index(&self) -> u32 {
        self.descriptor.index()
    }

    pub fn cpu(&self) -> CpuDescriptorHandle {
        self.descriptor.cpu()
    }

    pub fn gpu(&self) -> Option<GpuDescriptorHandle> {
        self.descriptor.gpu()
    }

    pub fn description(&self) -> &ViewDescription {
        &self.description
    }

    pub fn resource(&self) -> &Rc<dyn Resource> {
        &self.resource
    }
}

impl Drop for View {
    fn drop(&mut self) {
        self.context.heap(self.view_type.heap_kind()).free(&mut self.descriptor);
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("view_type", &self.view_type)
            .field("dimension", &self.dimension)
            .field("index", &self.descriptor.index())
            .field("resource", &self.resource.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::acceleration::{AccelerationStructure, BlasGeometry};
    use crate::rhi::buffer::{Buffer, BufferDesc};
    use crate::rhi::context::tests::headless_context;
    use crate::rhi::texture::{Texture, TextureDesc};

    #[test]
    fn test_view_heaps_and_release() {
        let (ctx, _gpu) = headless_context();
        let texture: Rc<dyn Resource> = Rc::new(
            Texture::new(
                &ctx,
                &TextureDesc::new_2d(16, 16, Format::Rgba8Unorm, TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE),
            )
            .unwrap(),
        );

        let rtv_before = ctx.heap(DescriptorHeapKind::RenderTarget).used();
        let srv_before = ctx.heap(DescriptorHeapKind::Resource).used();

        let rtv = View::new(&ctx, texture.clone(), ViewType::RenderTarget, ViewDimension::Texture2D).unwrap();
        let srv = View::new(&ctx, texture.clone(), ViewType::ShaderResource, ViewDimension::Texture2D).unwrap();
        assert!(rtv.gpu().is_none());
        assert!(srv.gpu().is_some());
        assert_eq!(ctx.heap(DescriptorHeapKind::RenderTarget).used(), rtv_before + 1);
        assert_eq!(ctx.heap(DescriptorHeapKind::Resource).used(), srv_before + 1);
        assert_eq!(Rc::strong_count(&texture), 3);

        drop(rtv);
        drop(srv);
        assert_eq!(ctx.heap(DescriptorHeapKind::RenderTarget).used(), rtv_before);
        assert_eq!(ctx.heap(DescriptorHeapKind::Resource).used(), srv_before);
        assert_eq!(Rc::strong_count(&texture), 1);
    }

    #[test]
    fn test_cube_storage_view_is_six_slice_array() {
        let (ctx, gpu) = headless_context();
        let cube: Rc<dyn Resource> = Rc::new(
            Texture::new(
                &ctx,
                &TextureDesc::cube(8, Format::Rgba16Float, TextureUsage::STORAGE | TextureUsage::SHADER_RESOURCE).with_mips(2),
            )
            .unwrap(),
        );

        let uav = View::new(&ctx, cube.clone(), ViewType::Storage, ViewDimension::TextureCube).unwrap();
        match uav.description() {
            ViewDescription::Texture { array, array_size, mip_levels, .. } => {
                assert!(*array);
                assert_eq!(*array_size, 6);
                assert_eq!(*mip_levels, 1);
            }
            other => panic!("unexpected description {:?}", other),
        }
        let written = gpu.view_at(ctx.heap(DescriptorHeapKind::Resource).raw(), uav.index()).unwrap();
        assert_eq!(&written, uav.description());

        let srv = View::new(&ctx, cube, ViewType::ShaderResource, ViewDimension::TextureCube).unwrap();
        assert!(matches!(srv.description(), ViewDescription::Texture { cube: true, array: false, mip_levels: 2, .. }));
    }

    #[test]
    fn test_buffer_views() {
        let (ctx, _gpu) = headless_context();
        let structured: Rc<dyn Resource> = Rc::new(Buffer::new(&ctx, &BufferDesc::storage(256, 16)).unwrap());
        let view = View::new(&ctx, structured.clone(), ViewType::Storage, ViewDimension::Buffer).unwrap();
        assert_eq!(
            view.description(),
            &ViewDescription::Buffer { view_type: ViewType::Storage, first_element: 0, element_count: 16, stride: 16 }
        );

        let raw: Rc<dyn Resource> = Rc::new(Buffer::new(&ctx, &BufferDesc::storage(256, 0)).unwrap());
        let view = View::new(&ctx, raw, ViewType::ShaderResource, ViewDimension::Buffer).unwrap();
        assert!(matches!(view.description(), ViewDescription::Buffer { element_count: 64, stride: 0, .. }));

        assert!(View::new(&ctx, structured, ViewType::RenderTarget, ViewDimension::Buffer).is_err());
    }

    #[test]
    fn test_acceleration_structure_view() {
        let (ctx, _gpu) = headless_context();
        let vertices = Rc::new(Buffer::new(&ctx, &BufferDesc::vertex(36, 12)).unwrap());
        let blas: Rc<dyn Resource> = Rc::new(
            AccelerationStructure::bottom_level(&ctx, "blas", &[BlasGeometry::new(&vertices, None)], false).unwrap(),
        );
        let view = View::new(&ctx, blas.clone(), ViewType::ShaderResource, ViewDimension::Buffer).unwrap();
        assert_eq!(view.description(), &ViewDescription::AccelerationStructure { address: blas.gpu_address() });
        assert!(View::new(&ctx, blas, ViewType::Storage, ViewDimension::Buffer).is_err());
    }

    #[test]
    fn test_views_require_matching_usage() {
        let (ctx, _gpu) = headless_context();
        let sampled: Rc<dyn Resource> = Rc::new(
            Texture::new(&ctx, &TextureDesc::new_2d(8, 8, Format::Rgba8Unorm, TextureUsage::SHADER_RESOURCE)).unwrap(),
        );
        let srv_before = ctx.heap(DescriptorHeapKind::Resource).used();
        let rtv_before = ctx.heap(DescriptorHeapKind::RenderTarget).used();

        assert!(View::new(&ctx, sampled.clone(), ViewType::RenderTarget, ViewDimension::Texture2D).is_err());
        assert!(View::new(&ctx, sampled.clone(), ViewType::Storage, ViewDimension::Texture2D).is_err());
        assert!(View::new(&ctx, sampled, ViewType::ShaderResource, ViewDimension::Texture2D).is_ok());

        let vertices: Rc<dyn Resource> = Rc::new(Buffer::new(&ctx, &BufferDesc::vertex(48, 12)).unwrap());
        assert!(View::new(&ctx, vertices.clone(), ViewType::Storage, ViewDimension::Buffer).is_err());
        assert!(View::new(&ctx, vertices, ViewType::ShaderResource, ViewDimension::Buffer).is_ok());

        // 被拒绝的视图不占用槽位
        assert_eq!(ctx.heap(DescriptorHeapKind::Resource).used(), srv_before);
        assert_eq!(ctx.heap(DescriptorHeapKind::RenderTarget).used(), rtv_before);
    }

    #[test]
    fn test_depth_view_validation() {
        let (ctx, _gpu) = headless_context();
        let color: Rc<dyn Resource> = Rc::new(
            Texture::new(&ctx, &TextureDesc::new_2d(8, 8, Format::Rgba8Unorm, TextureUsage::SHADER_RESOURCE)).unwrap(),
        );
        assert!(View::new(&ctx, color.clone(), ViewType::DepthTarget, ViewDimension::Texture2D).is_err());
        assert!(View::new(&ctx, color, ViewType::ShaderResource, ViewDimension::TextureCube).is_err());
    }
}
