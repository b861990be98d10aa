//! DirectX 12 描述符堆
//!
//! 槽位的分配与回收由上层 `rhi::descriptor` 完成，这里只负责创建堆
//! 以及把视图描述写进指定槽位。

use windows::core::PCWSTR;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::convert::{map_format, map_srv_format, sampler_desc, wide};
use crate::core::error::{DistRhiError, GraphicsError, Result};
use crate::gfx::backend::{RawHeap, RawHeapInfo};
use crate::rhi::descriptor::DescriptorHeapKind;
use crate::rhi::sampler::SamplerDesc;
use crate::rhi::view::{ViewDescription, ViewType};

pub struct Dx12DescriptorHeap {
    /// 底层 DX12 描述符堆
    heap: ID3D12DescriptorHeap,
    kind: DescriptorHeapKind,
    /// 描述符增量大小
    increment_size: u32,
    /// CPU 句柄基址
    cpu_start: usize,
    /// GPU 句柄基址（仅对着色器可见的堆）
    gpu_start: Option<u64>,
    capacity: u32,
}

impl Dx12DescriptorHeap {
    pub fn new(device: &ID3D12Device, kind: DescriptorHeapKind, capacity: u32, shader_visible: bool) -> Result<Self> {
        unsafe {
            let heap_type = match kind {
                DescriptorHeapKind::RenderTarget => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                DescriptorHeapKind::DepthStencil => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
                DescriptorHeapKind::Resource => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
                DescriptorHeapKind::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
            };

            let flags = if shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            };

            let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
                Type: heap_type,
                NumDescriptors: capacity.max(1),
                Flags: flags,
                NodeMask: 0,
            };

            let heap: ID3D12DescriptorHeap = device.CreateDescriptorHeap(&heap_desc).map_err(|e| {
                DistRhiError::Graphics(GraphicsError::ResourceCreation(format!(
                    "Failed to create {} descriptor heap: {:?}",
                    kind.name(),
                    e
                )))
            })?;

            let name = wide(&format!("{} Heap", kind.name()));
            let _ = heap.SetName(PCWSTR(name.as_ptr()));

            let increment_size = device.GetDescriptorHandleIncrementSize(heap_type);
            let cpu_start = heap.GetCPUDescriptorHandleForHeapStart().ptr;
            let gpu_start = shader_visible.then(|| heap.GetGPUDescriptorHandleForHeapStart().ptr);

            Ok(Self {
                heap,
                kind,
                increment_size,
                cpu_start,
                gpu_start,
                capacity,
            })
        }
    }

    pub fn heap(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }

    pub fn info(&self, raw: RawHeap) -> RawHeapInfo {
        RawHeapInfo {
            raw,
            cpu_base: self.cpu_start,
            gpu_base: self.gpu_start,
            increment_size: self.increment_size,
        }
    }

    fn handle(&self, index: u32) -> Result<D3D12_CPU_DESCRIPTOR_HANDLE> {
        if index >= self.capacity {
            return Err(DistRhiError::usage(format!(
                "slot {} is outside the {} heap ({} slots)",
                index,
                self.kind.name(),
                self.capacity
            )));
        }
        Ok(D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.cpu_start + index as usize * self.increment_size as usize,
        })
    }

    /// 在槽位 `index` 写入视图；加速结构视图不需要资源对象
    pub fn write_view(
        &self,
        device: &ID3D12Device,
        index: u32,
        resource: &ID3D12Resource,
        desc: &ViewDescription,
    ) -> Result<()> {
        let handle = self.handle(index)?;
        unsafe {
            match desc {
                ViewDescription::AccelerationStructure { address } => {
                    let srv = D3D12_SHADER_RESOURCE_VIEW_DESC {
                        Format: DXGI_FORMAT_UNKNOWN,
                        ViewDimension: D3D12_SRV_DIMENSION_RAYTRACING_ACCELERATION_STRUCTURE,
                        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                        Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                            RaytracingAccelerationStructure: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_SRV {
                                Location: *address,
                            },
                        },
                    };
                    device.CreateShaderResourceView(None::<&ID3D12Resource>, Some(&srv), handle);
                }
                ViewDescription::Buffer { view_type, first_element, element_count, stride } => {
                    let raw = *stride == 0;
                    let format = if raw { DXGI_FORMAT_R32_TYPELESS } else { DXGI_FORMAT_UNKNOWN };
                    match view_type {
                        ViewType::ShaderResource => {
                            let srv = D3D12_SHADER_RESOURCE_VIEW_DESC {
                                Format: format,
                                ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
                                Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                                Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                                    Buffer: D3D12_BUFFER_SRV {
                                        FirstElement: *first_element,
                                        NumElements: *element_count,
                                        StructureByteStride: *stride,
                                        Flags: if raw { D3D12_BUFFER_SRV_FLAG_RAW } else { D3D12_BUFFER_SRV_FLAG_NONE },
                                    },
                                },
                            };
                            device.CreateShaderResourceView(resource, Some(&srv), handle);
                        }
                        ViewType::Storage => {
                            let uav = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                                Format: format,
                                ViewDimension: D3D12_UAV_DIMENSION_BUFFER,
                                Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                                    Buffer: D3D12_BUFFER_UAV {
                                        FirstElement: *first_element,
                                        NumElements: *element_count,
                                        StructureByteStride: *stride,
                                        CounterOffsetInBytes: 0,
                                        Flags: if raw { D3D12_BUFFER_UAV_FLAG_RAW } else { D3D12_BUFFER_UAV_FLAG_NONE },
                                    },
                                },
                            };
                            device.CreateUnorderedAccessView(resource, None::<&ID3D12Resource>, Some(&uav), handle);
                        }
                        other => {
                            return Err(DistRhiError::usage(format!("buffer cannot have a {:?} view", other)));
                        }
                    }
                }
                ViewDescription::Texture {
                    view_type,
                    format,
                    array,
                    cube,
                    most_detailed_mip,
                    mip_levels,
                    first_array_slice,
                    array_size,
                } => match view_type {
                    ViewType::RenderTarget => {
                        let mut rtv = D3D12_RENDER_TARGET_VIEW_DESC {
                            Format: map_format(*format),
                            ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
                            ..Default::default()
                        };
                        if *array {
                            rtv.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE2DARRAY;
                            rtv.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_RTV {
                                MipSlice: *most_detailed_mip,
                                FirstArraySlice: *first_array_slice,
                                ArraySize: *array_size,
                                PlaneSlice: 0,
                            };
                        } else {
                            rtv.Anonymous.Texture2D = D3D12_TEX2D_RTV { MipSlice: *most_detailed_mip, PlaneSlice: 0 };
                        }
                        device.CreateRenderTargetView(resource, Some(&rtv), handle);
                    }
                    ViewType::DepthTarget => {
                        let mut dsv = D3D12_DEPTH_STENCIL_VIEW_DESC {
                            Format: map_format(*format),
                            ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
                            Flags: D3D12_DSV_FLAG_NONE,
                            ..Default::default()
                        };
                        if *array {
                            dsv.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE2DARRAY;
                            dsv.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_DSV {
                                MipSlice: *most_detailed_mip,
                                FirstArraySlice: *first_array_slice,
                                ArraySize: *array_size,
                            };
                        } else {
                            dsv.Anonymous.Texture2D = D3D12_TEX2D_DSV { MipSlice: *most_detailed_mip };
                        }
                        device.CreateDepthStencilView(resource, Some(&dsv), handle);
                    }
                    ViewType::ShaderResource => {
                        let mut srv = D3D12_SHADER_RESOURCE_VIEW_DESC {
                            Format: map_srv_format(*format),
                            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
                            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                            ..Default::default()
                        };
                        if *cube {
                            srv.ViewDimension = D3D12_SRV_DIMENSION_TEXTURECUBE;
                            srv.Anonymous.TextureCube = D3D12_TEXCUBE_SRV {
                                MostDetailedMip: *most_detailed_mip,
                                MipLevels: *mip_levels,
                                ResourceMinLODClamp: 0.0,
                            };
                        } else if *array {
                            srv.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2DARRAY;
                            srv.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_SRV {
                                MostDetailedMip: *most_detailed_mip,
                                MipLevels: *mip_levels,
                                FirstArraySlice: *first_array_slice,
                                ArraySize: *array_size,
                                PlaneSlice: 0,
                                ResourceMinLODClamp: 0.0,
                            };
                        } else {
                            srv.Anonymous.Texture2D = D3D12_TEX2D_SRV {
                                MostDetailedMip: *most_detailed_mip,
                                MipLevels: *mip_levels,
                                PlaneSlice: 0,
                                ResourceMinLODClamp: 0.0,
                            };
                        }
                        device.CreateShaderResourceView(resource, Some(&srv), handle);
                    }
                    ViewType::Storage => {
                        let mut uav = D3D12_UNORDERED_ACCESS_VIEW_DESC {
                            Format: map_format(*format),
                            ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2D,
                            ..Default::default()
                        };
                        if *array {
                            uav.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE2DARRAY;
                            uav.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_UAV {
                                MipSlice: *most_detailed_mip,
                                FirstArraySlice: *first_array_slice,
                                ArraySize: *array_size,
                                PlaneSlice: 0,
                            };
                        } else {
                            uav.Anonymous.Texture2D = D3D12_TEX2D_UAV { MipSlice: *most_detailed_mip, PlaneSlice: 0 };
                        }
                        device.CreateUnorderedAccessView(resource, None::<&ID3D12Resource>, Some(&uav), handle);
                    }
                },
            }
        }
        Ok(())
    }

    pub fn write_sampler(&self, device: &ID3D12Device, index: u32, desc: &SamplerDesc) -> Result<()> {
        let handle = self.handle(index)?;
        unsafe { device.CreateSampler(&sampler_desc(desc), handle) };
        Ok(())
    }
}
