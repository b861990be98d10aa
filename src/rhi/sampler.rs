//! 采样器
//!
//! 采样器描述写入着色器可见的采样器堆，着色器通过堆索引访问。

use std::rc::Rc;

use crate::core::error::Result;
use crate::rhi::context::Context;
use crate::rhi::descriptor::{Descriptor, DescriptorHeapKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Point,
    Linear,
    Anisotropic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Mirror,
    Clamp,
    Border,
}

/// 比较采样函数（阴影贴图）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    Always,
}

/// 采样器描述
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub max_anisotropy: u32,
    pub compare: Option<CompareFunction>,
    pub mip_lod_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: [f32; 4],
}

impl SamplerDesc {
    pub fn new(filter: Filter, address: AddressMode) -> Self {
        Self {
            filter,
            address_u: address,
            address_v: address,
            address_w: address,
            max_anisotropy: if filter == Filter::Anisotropic { 16 } else { 1 },
            compare: None,
            mip_lod_bias: 0.0,
            min_lod: 0.0,
            max_lod: f32::MAX,
            border_color: [0.0; 4],
        }
    }

    pub fn linear_wrap() -> Self {
        Self::new(Filter::Linear, AddressMode::Wrap)
    }

    pub fn linear_clamp() -> Self {
        Self::new(Filter::Linear, AddressMode::Clamp)
    }

    pub fn point_clamp() -> Self {
        Self::new(Filter::Point, AddressMode::Clamp)
    }

    pub fn anisotropic_wrap() -> Self {
        Self::new(Filter::Anisotropic, AddressMode::Wrap)
    }

    /// 阴影比较采样器
    pub fn shadow() -> Self {
        Self {
            compare: Some(CompareFunction::LessEqual),
            border_color: [1.0; 4],
            ..Self::new(Filter::Linear, AddressMode::Border)
        }
    }
}

/// 采样器
pub struct Sampler {
    context: Rc<Context>,
    descriptor: Descriptor,
    desc: SamplerDesc,
}

impl Sampler {
    pub fn new(context: &Rc<Context>, desc: SamplerDesc) -> Result<Self> {
        let heap = context.heap(DescriptorHeapKind::Sampler);
        let mut descriptor = heap.allocate();
        if let Err(e) = context.gpu().write_sampler(heap.raw(), descriptor.index(), &desc) {
            heap.free(&mut descriptor);
            return Err(e);
        }

        Ok(Self {
            context: context.clone(),
            descriptor,
            desc,
        })
    }

    /// 采样器堆内索引
    pub fn index(&self) -> u32 {
        self.descriptor.index()
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.context.heap(DescriptorHeapKind::Sampler).free(&mut self.descriptor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::context::tests::headless_context;

    #[test]
    fn test_sampler_slots() {
        let (ctx, _gpu) = headless_context();
        let heap = ctx.heap(DescriptorHeapKind::Sampler);
        let before = heap.used();

        let linear = Sampler::new(&ctx, SamplerDesc::linear_wrap()).unwrap();
        let shadow = Sampler::new(&ctx, SamplerDesc::shadow()).unwrap();
        assert_ne!(linear.index(), shadow.index());
        assert_eq!(shadow.desc().compare, Some(CompareFunction::LessEqual));
        assert_eq!(heap.used(), before + 2);

        drop(linear);
        drop(shadow);
        assert_eq!(heap.used(), before);
    }

    #[test]
    fn test_anisotropy_defaults() {
        assert_eq!(SamplerDesc::anisotropic_wrap().max_anisotropy, 16);
        assert_eq!(SamplerDesc::point_clamp().max_anisotropy, 1);
    }
}
