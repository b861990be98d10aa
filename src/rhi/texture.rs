//! 纹理
//!
//! 2D 纹理与立方体纹理（6 个数组层），以及上传 / 回读时使用的可复制内存布局。
//!
//! # 子资源与布局
//!
//! 子资源索引为 `mip + layer * mip_levels`。线性缓冲区中每个子资源的行距对齐到
//! 256 字节，子资源起始偏移对齐到 512 字节，这与 DirectX 12 的
//! `GetCopyableFootprints` 结果一致。

use std::rc::Rc;

use bitflags::bitflags;

use crate::core::error::{DistRhiError, Result};
use crate::gfx::backend::{GpuDevice, RawResource, RawTextureDesc};
use crate::rhi::context::Context;
use crate::rhi::resource::{align_up, Format, Resource, ResourceKind, ResourceLayout, ResourceState};

/// 行距对齐
pub const TEXTURE_PITCH_ALIGNMENT: u64 = 256;
/// 子资源偏移对齐
pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;

bitflags! {
    /// 纹理用途
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const RENDER_TARGET = 1 << 0;
        const DEPTH_TARGET = 1 << 1;
        const STORAGE = 1 << 2;
        const SHADER_RESOURCE = 1 << 3;
    }
}

/// 纹理维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    Texture2D,
    /// 立方体贴图，固定 6 层
    Cube,
}

/// 纹理描述信息
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub array_layers: u32,
    pub mip_levels: u32,
    pub format: Format,
    pub dimension: TextureDimension,
    pub usage: TextureUsage,
    pub name: String,
    pub tags: Vec<String>,
}

impl TextureDesc {
    pub fn new_2d(width: u32, height: u32, format: Format, usage: TextureUsage) -> Self {
        Self {
            width,
            height,
            array_layers: 1,
            mip_levels: 1,
            format,
            dimension: TextureDimension::Texture2D,
            usage,
            name: String::from("Texture"),
            tags: Vec::new(),
        }
    }

    pub fn cube(size: u32, format: Format, usage: TextureUsage) -> Self {
        Self {
            array_layers: 6,
            dimension: TextureDimension::Cube,
            name: String::from("Cube Texture"),
            ..Self::new_2d(size, size, format, usage)
        }
    }

    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    /// 完整 mip 链
    pub fn with_full_mips(mut self) -> Self {
        self.mip_levels = max_mip_levels(self.width, self.height);
        self
    }

    pub fn with_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// 初始布局由用途决定
    pub fn initial_layout(&self) -> ResourceLayout {
        if self.usage.contains(TextureUsage::DEPTH_TARGET) {
            ResourceLayout::DepthWrite
        } else if self.usage.contains(TextureUsage::RENDER_TARGET) {
            ResourceLayout::RenderTarget
        } else {
            ResourceLayout::Common
        }
    }

    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_layers
    }

    /// 线性缓冲区中的布局
    pub fn footprints(&self) -> (Vec<SubresourceFootprint>, u64) {
        copyable_footprints(self.format, self.width, self.height, self.array_layers, self.mip_levels)
    }

    /// 紧凑排列（层优先，其次 mip）时的数据大小
    pub fn packed_size(&self) -> u64 {
        (0..self.array_layers)
            .flat_map(|_| 0..self.mip_levels)
            .map(|mip| {
                let (w, h) = mip_extent(self.width, self.height, mip);
                self.format.row_bytes(w) * self.format.row_count(h) as u64
            })
            .sum()
    }

    fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(DistRhiError::resource(format!("texture '{}': {}", self.name, reason)));

        if self.width == 0 || self.height == 0 {
            return fail(format!("invalid extent {}x{}", self.width, self.height));
        }
        if self.format == Format::Unknown {
            return fail("format is unknown".into());
        }
        if self.mip_levels == 0 || self.mip_levels > max_mip_levels(self.width, self.height) {
            return fail(format!("invalid mip count {}", self.mip_levels));
        }
        if self.array_layers == 0 {
            return fail("array layer count is zero".into());
        }
        if self.dimension == TextureDimension::Cube && (self.array_layers != 6 || self.width != self.height) {
            return fail("cube textures need 6 square layers".into());
        }
        if self.usage.contains(TextureUsage::DEPTH_TARGET) != self.format.is_depth() {
            return fail(format!("usage {:?} does not match format {:?}", self.usage, self.format));
        }
        if self.format.is_compressed()
            && self.usage.intersects(TextureUsage::STORAGE | TextureUsage::RENDER_TARGET)
        {
            return fail("block-compressed formats cannot be written by the GPU".into());
        }
        Ok(())
    }
}

/// 一个子资源在线性缓冲区中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedFootprint {
    /// 相对缓冲区起始的偏移
    pub offset: u64,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// 对齐后的行距
    pub row_pitch: u32,
}

/// 子资源布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceFootprint {
    pub subresource: u32,
    pub footprint: PlacedFootprint,
    /// 行（块行）数
    pub rows: u32,
    /// 每行有效字节数
    pub row_bytes: u64,
}

pub fn max_mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// 第 `mip` 级的尺寸
pub fn mip_extent(width: u32, height: u32, mip: u32) -> (u32, u32) {
    ((width >> mip).max(1), (height >> mip).max(1))
}

/// 计算所有子资源在线性缓冲区中的布局，返回布局列表与所需总大小
pub fn copyable_footprints(
    format: Format,
    width: u32,
    height: u32,
    array_layers: u32,
    mip_levels: u32,
) -> (Vec<SubresourceFootprint>, u64) {
    let mut footprints = Vec::with_capacity((array_layers * mip_levels) as usize);
    let mut offset = 0u64;

    for layer in 0..array_layers {
        for mip in 0..mip_levels {
            let (w, h) = mip_extent(width, height, mip);
            let row_bytes = format.row_bytes(w);
            let rows = format.row_count(h);
            let row_pitch = align_up(row_bytes, TEXTURE_PITCH_ALIGNMENT);

            offset = align_up(offset, TEXTURE_PLACEMENT_ALIGNMENT);
            footprints.push(SubresourceFootprint {
                subresource: mip + layer * mip_levels,
                footprint: PlacedFootprint {
                    offset,
                    format,
                    width: w,
                    height: h,
                    depth: 1,
                    row_pitch: row_pitch as u32,
                },
                rows,
                row_bytes,
            });
            offset += row_pitch * rows as u64;
        }
    }

    (footprints, offset)
}

/// 把紧凑排列的像素数据按 GPU 行距写入 `out`
///
/// `out` 的长度至少为 [`copyable_footprints`] 返回的总大小。
pub fn write_pitched(footprints: &[SubresourceFootprint], packed: &[u8], out: &mut [u8]) -> Result<()> {
    let mut cursor = 0usize;
    for sub in footprints {
        let row_bytes = sub.row_bytes as usize;
        for row in 0..sub.rows as usize {
            let src = packed
                .get(cursor..cursor + row_bytes)
                .ok_or_else(|| DistRhiError::usage("texture data is shorter than its footprint"))?;
            let dst_start = sub.footprint.offset as usize + row * sub.footprint.row_pitch as usize;
            let dst = out
                .get_mut(dst_start..dst_start + row_bytes)
                .ok_or_else(|| DistRhiError::usage("staging buffer is smaller than the texture footprint"))?;
            dst.copy_from_slice(src);
            cursor += row_bytes;
        }
    }
    Ok(())
}

/// GPU 纹理
#[derive(Debug)]
pub struct Texture {
    state: ResourceState,
    width: u32,
    height: u32,
    array_layers: u32,
    mip_levels: u32,
    format: Format,
    dimension: TextureDimension,
    usage: TextureUsage,
}

impl Texture {
    pub fn new(context: &Context, desc: &TextureDesc) -> Result<Self> {
        desc.validate()?;

        let device = context.gpu();
        let layout = desc.initial_layout();
        let raw = device.create_texture(&RawTextureDesc {
            name: &desc.name,
            width: desc.width,
            height: desc.height,
            array_layers: desc.array_layers,
            mip_levels: desc.mip_levels,
            format: desc.format,
            dimension: desc.dimension,
            usage: desc.usage,
            initial_layout: layout,
        })?;

        tracing::debug!(
            name = %desc.name,
            width = desc.width,
            height = desc.height,
            mips = desc.mip_levels,
            layers = desc.array_layers,
            format = ?desc.format,
            "Texture created"
        );

        Ok(Self::from_raw(device.clone(), raw, desc, layout))
    }

    /// 包装后端已有的纹理（交换链后台缓冲区）
    pub(crate) fn from_raw(
        device: Rc<dyn GpuDevice>,
        raw: RawResource,
        desc: &TextureDesc,
        layout: ResourceLayout,
    ) -> Self {
        let (_, size) = desc.footprints();
        Self {
            state: ResourceState::new(
                device,
                raw,
                size,
                desc.format.bytes_per_block(),
                layout,
                desc.name.clone(),
                desc.tags.clone(),
            ),
            width: desc.width,
            height: desc.height,
            array_layers: desc.array_layers,
            mip_levels: desc.mip_levels,
            format: desc.format,
            dimension: desc.dimension,
            usage: desc.usage,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn dimension(&self) -> TextureDimension {
        self.dimension
    }

    pub fn usage(&self) -> TextureUsage {
        self.usage
    }

    pub fn subresource_index(&self, mip: u32, layer: u32) -> u32 {
        mip + layer * self.mip_levels
    }

    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_layers
    }

    pub fn footprints(&self) -> (Vec<SubresourceFootprint>, u64) {
        copyable_footprints(self.format, self.width, self.height, self.array_layers, self.mip_levels)
    }
}

impl Resource for Texture {
    fn state(&self) -> &ResourceState {
        &self.state
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Texture
    }

    fn format(&self) -> Format {
        self.format
    }

    fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    fn array_layers(&self) -> u32 {
        self.array_layers
    }

    fn texture_usage(&self) -> TextureUsage {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::context::tests::headless_context;

    #[test]
    fn test_footprints_single_mip() {
        // 100 像素 * 4 字节 = 400 → 512
        let (subs, total) = copyable_footprints(Format::Rgba8Unorm, 100, 10, 1, 1);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].footprint.row_pitch, 512);
        assert_eq!(subs[0].row_bytes, 400);
        assert_eq!(subs[0].rows, 10);
        assert_eq!(total, 512 * 10);
    }

    #[test]
    fn test_footprints_mip_chain_offsets() {
        let (subs, _) = copyable_footprints(Format::Rgba8Unorm, 8, 8, 1, 4);
        assert_eq!(subs.len(), 4);
        for sub in &subs {
            assert_eq!(sub.footprint.offset % TEXTURE_PLACEMENT_ALIGNMENT, 0);
            assert_eq!(sub.footprint.row_pitch as u64 % TEXTURE_PITCH_ALIGNMENT, 0);
        }
        // mip0: 8 行 * 256 = 2048；mip1: 4 行 * 256 = 1024
        assert_eq!(subs[1].footprint.offset, 2048);
        assert_eq!(subs[2].footprint.offset, 3072);
        assert_eq!(subs[3].footprint.width, 1);
        // mip2 只占 512 字节，mip3 的偏移正好落在 512 边界
        assert_eq!(subs[3].footprint.offset, 3584);
    }

    #[test]
    fn test_cube_subresource_order() {
        let desc = TextureDesc::cube(4, Format::Rgba8Unorm, TextureUsage::SHADER_RESOURCE).with_mips(2);
        let (subs, _) = desc.footprints();
        assert_eq!(subs.len(), 12);
        let indices: Vec<u32> = subs.iter().map(|s| s.subresource).collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
        assert_eq!(subs[2].footprint.width, 4);
        assert_eq!(subs[3].footprint.width, 2);
    }

    #[test]
    fn test_block_compressed_rows() {
        let (subs, _) = copyable_footprints(Format::Bc1Unorm, 16, 16, 1, 1);
        assert_eq!(subs[0].rows, 4);
        assert_eq!(subs[0].row_bytes, 32);
    }

    #[test]
    fn test_write_pitched_respects_gpu_pitch() {
        let (subs, total) = copyable_footprints(Format::R8Unorm, 3, 2, 1, 1);
        let packed = [1u8, 2, 3, 4, 5, 6];
        let mut out = vec![0u8; total as usize];
        write_pitched(&subs, &packed, &mut out).unwrap();
        assert_eq!(&out[0..3], &[1, 2, 3]);
        assert_eq!(out[3], 0);
        assert_eq!(&out[256..259], &[4, 5, 6]);

        assert!(write_pitched(&subs, &packed[..4], &mut out).is_err());
    }

    #[test]
    fn test_packed_size() {
        let desc = TextureDesc::new_2d(4, 4, Format::Rgba8Unorm, TextureUsage::SHADER_RESOURCE).with_full_mips();
        assert_eq!(desc.mip_levels, 3);
        assert_eq!(desc.packed_size(), 64 + 16 + 4);
    }

    #[test]
    fn test_initial_layout_from_usage() {
        let (ctx, _gpu) = headless_context();
        let depth = Texture::new(
            &ctx,
            &TextureDesc::new_2d(8, 8, Format::Depth32Float, TextureUsage::DEPTH_TARGET),
        )
        .unwrap();
        assert_eq!(depth.layout(), ResourceLayout::DepthWrite);

        let target = Texture::new(
            &ctx,
            &TextureDesc::new_2d(8, 8, Format::Rgba16Float, TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE),
        )
        .unwrap();
        assert_eq!(target.layout(), ResourceLayout::RenderTarget);

        let sampled = Texture::new(
            &ctx,
            &TextureDesc::new_2d(8, 8, Format::Rgba8Unorm, TextureUsage::SHADER_RESOURCE),
        )
        .unwrap();
        assert_eq!(sampled.layout(), ResourceLayout::Common);
        assert_eq!(sampled.subresource_index(0, 0), 0);
    }

    #[test]
    fn test_invalid_descriptions() {
        let (ctx, _gpu) = headless_context();
        let usage = TextureUsage::SHADER_RESOURCE;
        assert!(Texture::new(&ctx, &TextureDesc::new_2d(0, 8, Format::Rgba8Unorm, usage)).is_err());
        assert!(Texture::new(&ctx, &TextureDesc::new_2d(8, 8, Format::Rgba8Unorm, usage).with_mips(5)).is_err());
        assert!(Texture::new(&ctx, &TextureDesc::cube(8, Format::Rgba8Unorm, usage).with_layers(4)).is_err());
        assert!(Texture::new(&ctx, &TextureDesc::new_2d(8, 8, Format::Rgba8Unorm, TextureUsage::DEPTH_TARGET)).is_err());
        assert!(Texture::new(&ctx, &TextureDesc::new_2d(8, 8, Format::Bc7Unorm, TextureUsage::STORAGE)).is_err());
    }
}
