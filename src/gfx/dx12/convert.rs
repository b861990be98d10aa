//! RHI 枚举到 D3D12 / DXGI 常量的映射

use std::mem::ManuallyDrop;

use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::rhi::buffer::MemoryType;
use crate::rhi::pipeline::{CullMode, Topology, TopologyType};
use crate::rhi::resource::{Format, ResourceLayout};
use crate::rhi::sampler::{AddressMode, CompareFunction, Filter, SamplerDesc};
use crate::rhi::texture::TextureUsage;

pub fn map_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::R8Unorm => DXGI_FORMAT_R8_UNORM,
        Format::Rg8Unorm => DXGI_FORMAT_R8G8_UNORM,
        Format::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::Rgba8Srgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::R16Uint => DXGI_FORMAT_R16_UINT,
        Format::R16Float => DXGI_FORMAT_R16_FLOAT,
        Format::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::R32Float => DXGI_FORMAT_R32_FLOAT,
        Format::Rg32Float => DXGI_FORMAT_R32G32_FLOAT,
        Format::Rgb32Float => DXGI_FORMAT_R32G32B32_FLOAT,
        Format::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::Depth32Float => DXGI_FORMAT_D32_FLOAT,
        Format::Depth24Stencil8 => DXGI_FORMAT_D24_UNORM_S8_UINT,
        Format::Bc1Unorm => DXGI_FORMAT_BC1_UNORM,
        Format::Bc3Unorm => DXGI_FORMAT_BC3_UNORM,
        Format::Bc5Unorm => DXGI_FORMAT_BC5_UNORM,
        Format::Bc7Unorm => DXGI_FORMAT_BC7_UNORM,
    }
}

/// 可被采样的深度纹理需要以 typeless 格式创建
pub fn map_resource_format(format: Format, usage: TextureUsage) -> DXGI_FORMAT {
    if usage.contains(TextureUsage::SHADER_RESOURCE) {
        match format {
            Format::Depth32Float => return DXGI_FORMAT_R32_TYPELESS,
            Format::Depth24Stencil8 => return DXGI_FORMAT_R24G8_TYPELESS,
            _ => {}
        }
    }
    map_format(format)
}

/// 深度格式的着色资源视图格式
pub fn map_srv_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Depth32Float => DXGI_FORMAT_R32_FLOAT,
        Format::Depth24Stencil8 => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        other => map_format(other),
    }
}

pub fn map_layout(layout: ResourceLayout) -> D3D12_RESOURCE_STATES {
    match layout {
        ResourceLayout::Common | ResourceLayout::Present => D3D12_RESOURCE_STATE_COMMON,
        ResourceLayout::ShaderResource => {
            D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE | D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE
        }
        ResourceLayout::NonPixelShaderResource => D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE,
        ResourceLayout::UnorderedAccess => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceLayout::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceLayout::DepthRead => D3D12_RESOURCE_STATE_DEPTH_READ,
        ResourceLayout::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceLayout::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceLayout::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceLayout::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        ResourceLayout::VertexAndConstantBuffer => D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER,
        ResourceLayout::AccelerationStructure => D3D12_RESOURCE_STATE_RAYTRACING_ACCELERATION_STRUCTURE,
    }
}

pub fn map_heap_type(memory: MemoryType) -> D3D12_HEAP_TYPE {
    match memory {
        MemoryType::DeviceLocal => D3D12_HEAP_TYPE_DEFAULT,
        MemoryType::Upload => D3D12_HEAP_TYPE_UPLOAD,
        MemoryType::Readback => D3D12_HEAP_TYPE_READBACK,
    }
}

pub fn map_texture_flags(usage: TextureUsage) -> D3D12_RESOURCE_FLAGS {
    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if usage.contains(TextureUsage::RENDER_TARGET) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if usage.contains(TextureUsage::DEPTH_TARGET) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
    }
    if usage.contains(TextureUsage::STORAGE) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }
    flags
}

pub fn map_topology(topology: Topology) -> D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        Topology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        Topology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        Topology::LineStrip => D3D_PRIMITIVE_TOPOLOGY_LINESTRIP,
        Topology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        Topology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
    }
}

pub fn map_topology_type(topology: TopologyType) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match topology {
        TopologyType::Point => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        TopologyType::Line => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        TopologyType::Triangle => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
    }
}

pub fn rasterizer_desc(cull: CullMode, wireframe: bool) -> D3D12_RASTERIZER_DESC {
    D3D12_RASTERIZER_DESC {
        FillMode: if wireframe { D3D12_FILL_MODE_WIREFRAME } else { D3D12_FILL_MODE_SOLID },
        CullMode: match cull {
            CullMode::None => D3D12_CULL_MODE_NONE,
            CullMode::Front => D3D12_CULL_MODE_FRONT,
            CullMode::Back => D3D12_CULL_MODE_BACK,
        },
        FrontCounterClockwise: false.into(),
        DepthBias: 0,
        DepthBiasClamp: 0.0,
        SlopeScaledDepthBias: 0.0,
        DepthClipEnable: true.into(),
        MultisampleEnable: false.into(),
        AntialiasedLineEnable: false.into(),
        ForcedSampleCount: 0,
        ConservativeRaster: D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF,
    }
}

/// 反向 Z：近处深度更大
pub fn depth_stencil_desc(depth_test: bool, depth_write: bool) -> D3D12_DEPTH_STENCIL_DESC {
    D3D12_DEPTH_STENCIL_DESC {
        DepthEnable: depth_test.into(),
        DepthWriteMask: if depth_write { D3D12_DEPTH_WRITE_MASK_ALL } else { D3D12_DEPTH_WRITE_MASK_ZERO },
        DepthFunc: D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        StencilEnable: false.into(),
        ..Default::default()
    }
}

pub fn blend_desc() -> D3D12_BLEND_DESC {
    let mut desc = D3D12_BLEND_DESC {
        AlphaToCoverageEnable: false.into(),
        IndependentBlendEnable: false.into(),
        ..Default::default()
    };
    for target in desc.RenderTarget.iter_mut() {
        target.RenderTargetWriteMask = D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8;
        target.SrcBlend = D3D12_BLEND_ONE;
        target.DestBlend = D3D12_BLEND_ZERO;
        target.BlendOp = D3D12_BLEND_OP_ADD;
        target.SrcBlendAlpha = D3D12_BLEND_ONE;
        target.DestBlendAlpha = D3D12_BLEND_ZERO;
        target.BlendOpAlpha = D3D12_BLEND_OP_ADD;
        target.LogicOp = D3D12_LOGIC_OP_NOOP;
    }
    desc
}

fn map_address_mode(mode: AddressMode) -> D3D12_TEXTURE_ADDRESS_MODE {
    match mode {
        AddressMode::Wrap => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressMode::Mirror => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
        AddressMode::Clamp => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressMode::Border => D3D12_TEXTURE_ADDRESS_MODE_BORDER,
    }
}

fn map_compare(compare: CompareFunction) -> D3D12_COMPARISON_FUNC {
    match compare {
        CompareFunction::Never => D3D12_COMPARISON_FUNC_NEVER,
        CompareFunction::Less => D3D12_COMPARISON_FUNC_LESS,
        CompareFunction::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        CompareFunction::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        CompareFunction::Greater => D3D12_COMPARISON_FUNC_GREATER,
        CompareFunction::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        CompareFunction::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

pub fn sampler_desc(desc: &SamplerDesc) -> D3D12_SAMPLER_DESC {
    let filter = match (desc.filter, desc.compare.is_some()) {
        (Filter::Point, false) => D3D12_FILTER_MIN_MAG_MIP_POINT,
        (Filter::Linear, false) => D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        (Filter::Anisotropic, false) => D3D12_FILTER_ANISOTROPIC,
        (Filter::Point, true) => D3D12_FILTER_COMPARISON_MIN_MAG_MIP_POINT,
        (Filter::Linear, true) => D3D12_FILTER_COMPARISON_MIN_MAG_MIP_LINEAR,
        (Filter::Anisotropic, true) => D3D12_FILTER_COMPARISON_ANISOTROPIC,
    };
    D3D12_SAMPLER_DESC {
        Filter: filter,
        AddressU: map_address_mode(desc.address_u),
        AddressV: map_address_mode(desc.address_v),
        AddressW: map_address_mode(desc.address_w),
        MipLODBias: desc.mip_lod_bias,
        MaxAnisotropy: desc.max_anisotropy,
        ComparisonFunc: desc.compare.map_or(D3D12_COMPARISON_FUNC_NEVER, map_compare),
        BorderColor: desc.border_color,
        MinLOD: desc.min_lod,
        MaxLOD: desc.max_lod,
    }
}

/// 不增加引用计数地借用 COM 指针，用于屏障与复制位置结构体
pub fn borrowed(resource: &ID3D12Resource) -> ManuallyDrop<Option<ID3D12Resource>> {
    unsafe { std::mem::transmute_copy(resource) }
}

/// 以 0 结尾的 UTF-16 字符串
pub fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(Some(0)).collect()
}
