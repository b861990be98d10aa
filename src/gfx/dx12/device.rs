//! DirectX 12 设备与图形队列

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::time::Duration;

use raw_window_handle::RawWindowHandle;
use tracing::{debug, trace, warn};
use windows::core::{Interface, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, RECT, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject};

use super::convert::*;
use super::descriptor::Dx12DescriptorHeap;
use crate::core::error::{DistRhiError, GraphicsError, Result};
use crate::gfx::backend::{
    AccelerationStructureSizes, GpuDevice, RawBufferDesc, RawCommandList, RawFence, RawHeap, RawHeapInfo,
    RawPipeline, RawPipelineDesc, RawResource, RawSwapchain, RawTextureDesc, ShaderBytecode, SwapchainDesc,
};
use crate::gfx::command::{AccelerationBuildInputs, Command};
use crate::rhi::descriptor::DescriptorHeapKind;
use crate::rhi::pipeline::{PipelineKind, ShaderStage, MAX_PUSH_CONSTANT_DWORDS};
use crate::rhi::sampler::SamplerDesc;
use crate::rhi::surface::SurfaceTarget;
use crate::rhi::texture::TextureDimension;
use crate::rhi::view::ViewDescription;

fn graphics_error(what: &str, e: windows::core::Error) -> DistRhiError {
    DistRhiError::Graphics(GraphicsError::ResourceCreation(format!("{}: {:?}", what, e)))
}

fn command_error(what: &str, e: windows::core::Error) -> DistRhiError {
    DistRhiError::command(format!("{}: {:?}", what, e))
}

fn unknown(kind: &str, handle: impl std::fmt::Display) -> DistRhiError {
    DistRhiError::usage(format!("unknown {} {}", kind, handle))
}

struct Dx12Resource {
    resource: ID3D12Resource,
    name: String,
}

struct Dx12Pipeline {
    state: ID3D12PipelineState,
    kind: PipelineKind,
}

struct Dx12CommandList {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList6,
    name: String,
}

struct Dx12Swapchain {
    swapchain: IDXGISwapChain3,
    buffer_count: u32,
}

#[derive(Default)]
struct Registry {
    next_handle: u64,
    heaps: HashMap<RawHeap, Dx12DescriptorHeap>,
    resources: HashMap<RawResource, Dx12Resource>,
    pipelines: HashMap<RawPipeline, Dx12Pipeline>,
    lists: HashMap<RawCommandList, Dx12CommandList>,
    fences: HashMap<RawFence, ID3D12Fence>,
    swapchains: HashMap<RawSwapchain, Dx12Swapchain>,
}

impl Registry {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn resource(&self, raw: RawResource) -> Result<&ID3D12Resource> {
        self.resources
            .get(&raw)
            .map(|r| &r.resource)
            .ok_or_else(|| unknown("resource", raw))
    }

    fn address(&self, raw: RawResource) -> u64 {
        self.resources
            .get(&raw)
            .map_or(0, |r| unsafe { r.resource.GetGPUVirtualAddress() })
    }
}

/// D3D12 设备 + 图形队列 + 无绑定根签名
pub struct Dx12Device {
    factory: IDXGIFactory4,
    device: ID3D12Device,
    /// 光线追踪需要 ID3D12Device5
    device5: Option<ID3D12Device5>,
    /// 网格管线需要 ID3D12Device2
    device2: Option<ID3D12Device2>,
    queue: ID3D12CommandQueue,
    root_signature: ID3D12RootSignature,
    fence_event: HANDLE,
    registry: RefCell<Registry>,
}

impl Dx12Device {
    pub fn new(factory: IDXGIFactory4, device: ID3D12Device) -> Result<Self> {
        unsafe {
            let queue_desc = D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            };
            let queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&queue_desc)
                .map_err(|e| graphics_error("Failed to create command queue", e))?;

            let root_signature = create_root_signature(&device)?;
            let fence_event =
                CreateEventA(None, false, false, None).map_err(|e| graphics_error("Failed to create fence event", e))?;

            debug!("DX12 queue and bindless root signature created");

            Ok(Self {
                factory,
                device5: device.cast().ok(),
                device2: device.cast().ok(),
                device,
                queue,
                root_signature,
                fence_event,
                registry: RefCell::new(Registry::default()),
            })
        }
    }

    fn set_name(object: &ID3D12Object, name: &str) {
        let name = wide(name);
        unsafe {
            let _ = object.SetName(PCWSTR(name.as_ptr()));
        }
    }

    fn insert_resource(&self, resource: ID3D12Resource, name: &str) -> RawResource {
        if let Ok(object) = resource.cast::<ID3D12Object>() {
            Self::set_name(&object, name);
        }
        let mut registry = self.registry.borrow_mut();
        let raw = RawResource(registry.handle());
        registry.resources.insert(raw, Dx12Resource { resource, name: name.to_string() });
        raw
    }

    fn with_mapped<R>(&self, raw: RawResource, read: bool, f: impl FnOnce(*mut u8) -> R) -> Result<R> {
        let registry = self.registry.borrow();
        let entry = registry.resources.get(&raw).ok_or_else(|| unknown("resource", raw))?;
        unsafe {
            let mut data = std::ptr::null_mut();
            // 只写映射传入空读取范围
            let empty = D3D12_RANGE::default();
            let read_range = if read { None } else { Some(&empty as *const D3D12_RANGE) };
            entry
                .resource
                .Map(0, read_range, Some(&mut data))
                .map_err(|e| DistRhiError::usage(format!("Failed to map '{}': {:?}", entry.name, e)))?;
            let result = f(data as *mut u8);
            entry.resource.Unmap(0, if read { Some(&empty as *const D3D12_RANGE) } else { None });
            Ok(result)
        }
    }

    fn bytecode(shader: &ShaderBytecode<'_>) -> D3D12_SHADER_BYTECODE {
        D3D12_SHADER_BYTECODE {
            pShaderBytecode: shader.code.as_ptr() as *const c_void,
            BytecodeLength: shader.code.len(),
        }
    }

    fn create_graphics_state(&self, desc: &RawPipelineDesc<'_>) -> Result<ID3D12PipelineState> {
        let RawPipelineDesc::Graphics {
            vertex,
            pixel,
            color_formats,
            depth_format,
            topology,
            cull,
            depth_test,
            depth_write,
            wireframe,
            ..
        } = desc
        else {
            return Err(DistRhiError::usage("expected a graphics pipeline description"));
        };

        let mut pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: borrowed_root(&self.root_signature),
            VS: Self::bytecode(vertex),
            PS: Self::bytecode(pixel),
            RasterizerState: rasterizer_desc(*cull, *wireframe),
            BlendState: blend_desc(),
            DepthStencilState: depth_stencil_desc(depth_format.is_some() && *depth_test, *depth_write),
            SampleMask: u32::MAX,
            PrimitiveTopologyType: map_topology_type(*topology),
            NumRenderTargets: color_formats.len() as u32,
            DSVFormat: depth_format.map_or(DXGI_FORMAT_UNKNOWN, map_format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            ..Default::default()
        };
        for (slot, format) in color_formats.iter().enumerate() {
            pso_desc.RTVFormats[slot] = map_format(*format);
        }

        unsafe {
            self.device
                .CreateGraphicsPipelineState(&pso_desc)
                .map_err(|e| graphics_error("Failed to create graphics PSO", e))
        }
    }

    fn create_mesh_state(&self, desc: &RawPipelineDesc<'_>) -> Result<ID3D12PipelineState> {
        let RawPipelineDesc::Mesh {
            amplification,
            mesh,
            pixel,
            color_formats,
            depth_format,
            cull,
            depth_test,
            depth_write,
            wireframe,
            ..
        } = desc
        else {
            return Err(DistRhiError::usage("expected a mesh pipeline description"));
        };
        let device2 = self
            .device2
            .as_ref()
            .ok_or_else(|| DistRhiError::usage("mesh pipelines require ID3D12Device2"))?;

        let mut formats = D3D12_RT_FORMAT_ARRAY {
            NumRenderTargets: color_formats.len() as u32,
            ..Default::default()
        };
        for (slot, format) in color_formats.iter().enumerate() {
            formats.RTFormats[slot] = map_format(*format);
        }

        let mut stream = MeshPipelineStream {
            root_signature: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_ROOT_SIGNATURE,
                self.root_signature.as_raw(),
            ),
            amplification: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_AS,
                amplification.as_ref().map_or(D3D12_SHADER_BYTECODE::default(), Self::bytecode),
            ),
            mesh: Subobject::new(D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_MS, Self::bytecode(mesh)),
            pixel: Subobject::new(D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_PS, Self::bytecode(pixel)),
            rasterizer: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_RASTERIZER,
                rasterizer_desc(*cull, *wireframe),
            ),
            blend: Subobject::new(D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_BLEND, blend_desc()),
            depth_stencil: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_DEPTH_STENCIL,
                depth_stencil_desc(depth_format.is_some() && *depth_test, *depth_write),
            ),
            render_targets: Subobject::new(D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_RENDER_TARGET_FORMATS, formats),
            depth_format: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_DEPTH_STENCIL_FORMAT,
                depth_format.map_or(DXGI_FORMAT_UNKNOWN, map_format),
            ),
            sample_desc: Subobject::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_SAMPLE_DESC,
                DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            ),
            sample_mask: Subobject::new(D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_SAMPLE_MASK, u32::MAX),
        };
        let stream_desc = D3D12_PIPELINE_STATE_STREAM_DESC {
            SizeInBytes: std::mem::size_of::<MeshPipelineStream>(),
            pPipelineStateSubobjectStream: &mut stream as *mut MeshPipelineStream as *mut c_void,
        };

        unsafe {
            device2
                .CreatePipelineState(&stream_desc)
                .map_err(|e| graphics_error("Failed to create mesh PSO", e))
        }
    }

    fn create_compute_state(&self, compute: &ShaderBytecode<'_>) -> Result<ID3D12PipelineState> {
        let pso_desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
            pRootSignature: borrowed_root(&self.root_signature),
            CS: Self::bytecode(compute),
            ..Default::default()
        };
        unsafe {
            self.device
                .CreateComputePipelineState(&pso_desc)
                .map_err(|e| graphics_error("Failed to create compute PSO", e))
        }
    }

    fn record_into(&self, registry: &Registry, cmd: &ID3D12GraphicsCommandList6, command: &Command) -> Result<()> {
        unsafe {
            match command {
                Command::SetDescriptorHeaps { resource, sampler } => {
                    let resource = registry.heaps.get(resource).ok_or_else(|| unknown("heap", resource))?;
                    let sampler = registry.heaps.get(sampler).ok_or_else(|| unknown("heap", sampler))?;
                    cmd.SetDescriptorHeaps(&[Some(resource.heap().clone()), Some(sampler.heap().clone())]);
                }
                Command::Transition { resource, before, after } => {
                    let barrier = D3D12_RESOURCE_BARRIER {
                        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
                        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                        Anonymous: D3D12_RESOURCE_BARRIER_0 {
                            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                                pResource: borrowed(registry.resource(*resource)?),
                                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                                StateBefore: map_layout(*before),
                                StateAfter: map_layout(*after),
                            }),
                        },
                    };
                    cmd.ResourceBarrier(&[barrier]);
                }
                Command::UnorderedAccessBarrier { resource } => {
                    let barrier = D3D12_RESOURCE_BARRIER {
                        Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
                        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                        Anonymous: D3D12_RESOURCE_BARRIER_0 {
                            UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                                pResource: borrowed(registry.resource(*resource)?),
                            }),
                        },
                    };
                    cmd.ResourceBarrier(&[barrier]);
                }
                Command::SetViewport(v) => {
                    cmd.RSSetViewports(&[D3D12_VIEWPORT {
                        TopLeftX: v.x,
                        TopLeftY: v.y,
                        Width: v.width,
                        Height: v.height,
                        MinDepth: v.min_depth,
                        MaxDepth: v.max_depth,
                    }]);
                }
                Command::SetScissor(s) => {
                    cmd.RSSetScissorRects(&[RECT { left: s.left, top: s.top, right: s.right, bottom: s.bottom }]);
                }
                Command::SetTopology(topology) => cmd.IASetPrimitiveTopology(map_topology(*topology)),
                Command::SetPipeline { pipeline, kind } => {
                    let entry = registry.pipelines.get(pipeline).ok_or_else(|| unknown("pipeline", pipeline))?;
                    if entry.kind != *kind {
                        warn!(pipeline = %pipeline, "Pipeline kind mismatch while binding");
                    }
                    match kind {
                        PipelineKind::Compute => cmd.SetComputeRootSignature(&self.root_signature),
                        PipelineKind::Graphics | PipelineKind::Mesh => {
                            cmd.SetGraphicsRootSignature(&self.root_signature)
                        }
                    }
                    cmd.SetPipelineState(&entry.state);
                }
                Command::SetRenderTargets { colors, depth } => {
                    let colors: Vec<D3D12_CPU_DESCRIPTOR_HANDLE> =
                        colors.iter().map(|h| D3D12_CPU_DESCRIPTOR_HANDLE { ptr: h.ptr }).collect();
                    let depth = depth.map(|h| D3D12_CPU_DESCRIPTOR_HANDLE { ptr: h.ptr });
                    cmd.OMSetRenderTargets(
                        colors.len() as u32,
                        (!colors.is_empty()).then_some(colors.as_ptr()),
                        false,
                        depth.as_ref().map(|d| d as *const D3D12_CPU_DESCRIPTOR_HANDLE),
                    );
                }
                Command::SetVertexBuffer(view) => {
                    cmd.IASetVertexBuffers(
                        0,
                        Some(&[D3D12_VERTEX_BUFFER_VIEW {
                            BufferLocation: view.address,
                            SizeInBytes: view.size,
                            StrideInBytes: view.stride,
                        }]),
                    );
                }
                Command::SetIndexBuffer(view) => {
                    cmd.IASetIndexBuffer(Some(&D3D12_INDEX_BUFFER_VIEW {
                        BufferLocation: view.address,
                        SizeInBytes: view.size,
                        Format: map_format(view.format),
                    }));
                }
                Command::PushConstants { compute, data } => {
                    let ptr = data.as_ptr() as *const c_void;
                    if *compute {
                        cmd.SetComputeRoot32BitConstants(0, data.len() as u32, ptr, 0);
                    } else {
                        cmd.SetGraphicsRoot32BitConstants(0, data.len() as u32, ptr, 0);
                    }
                }
                Command::ClearRenderTarget { handle, color, .. } => {
                    cmd.ClearRenderTargetView(D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }, color, None);
                }
                Command::ClearDepth { handle, depth, .. } => {
                    cmd.ClearDepthStencilView(
                        D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr },
                        D3D12_CLEAR_FLAG_DEPTH,
                        *depth,
                        0,
                        &[],
                    );
                }
                Command::Draw { vertex_count, instance_count, first_vertex, first_instance } => {
                    cmd.DrawInstanced(*vertex_count, *instance_count, *first_vertex, *first_instance);
                }
                Command::DrawIndexed { index_count, instance_count, first_index, base_vertex, first_instance } => {
                    cmd.DrawIndexedInstanced(*index_count, *instance_count, *first_index, *base_vertex, *first_instance);
                }
                Command::DispatchMesh { x, y, z } => cmd.DispatchMesh(*x, *y, *z),
                Command::Dispatch { x, y, z } => cmd.Dispatch(*x, *y, *z),
                Command::CopyBuffer { dst, dst_offset, src, src_offset, size } => {
                    cmd.CopyBufferRegion(
                        registry.resource(*dst)?,
                        *dst_offset,
                        registry.resource(*src)?,
                        *src_offset,
                        *size,
                    );
                }
                Command::CopyBufferToTexture { dst, subresource, src, footprint } => {
                    let dst_location = subresource_location(registry.resource(*dst)?, *subresource);
                    let src_location = footprint_location(registry.resource(*src)?, footprint);
                    cmd.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
                }
                Command::CopyTextureToBuffer { dst, footprint, src, subresource } => {
                    let dst_location = footprint_location(registry.resource(*dst)?, footprint);
                    let src_location = subresource_location(registry.resource(*src)?, *subresource);
                    cmd.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
                }
                Command::BuildAccelerationStructure { dst, src, scratch, inputs } => {
                    let info = AccelerationInputs::build(inputs, src.is_some());
                    let desc = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_DESC {
                        DestAccelerationStructureData: registry.address(*dst),
                        Inputs: info.desc,
                        SourceAccelerationStructureData: src.map_or(0, |s| registry.address(s)),
                        ScratchAccelerationStructureData: registry.address(*scratch),
                    };
                    cmd.BuildRaytracingAccelerationStructure(&desc, None);
                }
                Command::BeginMarker(name) => {
                    let name = wide(name);
                    cmd.BeginEvent(0, Some(name.as_ptr() as *const c_void), (name.len() * 2) as u32);
                }
                Command::EndMarker => cmd.EndEvent(),
            }
        }
        Ok(())
    }
}

impl Drop for Dx12Device {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.fence_event);
        }
    }
}

fn borrowed_root(root: &ID3D12RootSignature) -> ManuallyDrop<Option<ID3D12RootSignature>> {
    unsafe { std::mem::transmute_copy(root) }
}

fn subresource_location(resource: &ID3D12Resource, subresource: u32) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: borrowed(resource),
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: subresource },
    }
}

fn footprint_location(
    resource: &ID3D12Resource,
    footprint: &crate::rhi::texture::PlacedFootprint,
) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: borrowed(resource),
        Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                Offset: footprint.offset,
                Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                    Format: map_format(footprint.format),
                    Width: footprint.width,
                    Height: footprint.height,
                    Depth: footprint.depth,
                    RowPitch: footprint.row_pitch,
                },
            },
        },
    }
}

/// 无绑定根签名：参数 0 为根常量，着色器直接索引描述符堆
fn create_root_signature(device: &ID3D12Device) -> Result<ID3D12RootSignature> {
    let parameters = [D3D12_ROOT_PARAMETER1 {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
        Anonymous: D3D12_ROOT_PARAMETER1_0 {
            Constants: D3D12_ROOT_CONSTANTS {
                ShaderRegister: 0,
                RegisterSpace: 0,
                Num32BitValues: MAX_PUSH_CONSTANT_DWORDS,
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    }];

    let desc = D3D12_VERSIONED_ROOT_SIGNATURE_DESC {
        Version: D3D_ROOT_SIGNATURE_VERSION_1_1,
        Anonymous: D3D12_VERSIONED_ROOT_SIGNATURE_DESC_0 {
            Desc_1_1: D3D12_ROOT_SIGNATURE_DESC1 {
                NumParameters: parameters.len() as u32,
                pParameters: parameters.as_ptr(),
                NumStaticSamplers: 0,
                pStaticSamplers: std::ptr::null(),
                Flags: D3D12_ROOT_SIGNATURE_FLAG_CBV_SRV_UAV_HEAP_DIRECTLY_INDEXED
                    | D3D12_ROOT_SIGNATURE_FLAG_SAMPLER_HEAP_DIRECTLY_INDEXED,
            },
        },
    };

    unsafe {
        let mut signature = None;
        let mut error = None;
        if let Err(e) = D3D12SerializeVersionedRootSignature(&desc, &mut signature, Some(&mut error)) {
            let message = error.map_or_else(|| format!("{:?}", e), |blob| blob_to_string(&blob));
            return Err(graphics_error("Failed to serialize root signature", windows::core::Error::new(e.code(), message)));
        }
        let signature = signature.ok_or_else(|| DistRhiError::resource("root signature blob missing"))?;
        device
            .CreateRootSignature(
                0,
                std::slice::from_raw_parts(signature.GetBufferPointer() as *const u8, signature.GetBufferSize()),
            )
            .map_err(|e| graphics_error("Failed to create root signature", e))
    }
}

fn blob_to_string(blob: &ID3DBlob) -> String {
    unsafe {
        let bytes = std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
        String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string()
    }
}

/// 管线状态流中的一个子对象（按指针大小对齐）
#[repr(C, align(8))]
struct Subobject<T> {
    ty: D3D12_PIPELINE_STATE_SUBOBJECT_TYPE,
    inner: T,
}

impl<T> Subobject<T> {
    fn new(ty: D3D12_PIPELINE_STATE_SUBOBJECT_TYPE, inner: T) -> Self {
        Self { ty, inner }
    }
}

#[repr(C)]
struct MeshPipelineStream {
    root_signature: Subobject<*mut c_void>,
    amplification: Subobject<D3D12_SHADER_BYTECODE>,
    mesh: Subobject<D3D12_SHADER_BYTECODE>,
    pixel: Subobject<D3D12_SHADER_BYTECODE>,
    rasterizer: Subobject<D3D12_RASTERIZER_DESC>,
    blend: Subobject<D3D12_BLEND_DESC>,
    depth_stencil: Subobject<D3D12_DEPTH_STENCIL_DESC>,
    render_targets: Subobject<D3D12_RT_FORMAT_ARRAY>,
    depth_format: Subobject<DXGI_FORMAT>,
    sample_desc: Subobject<DXGI_SAMPLE_DESC>,
    sample_mask: Subobject<u32>,
}

/// 加速结构构建输入；持有几何描述数组直到构建调用结束
struct AccelerationInputs {
    desc: D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS,
    _geometries: Vec<D3D12_RAYTRACING_GEOMETRY_DESC>,
}

impl AccelerationInputs {
    fn build(inputs: &AccelerationBuildInputs, perform_update: bool) -> Self {
        let mut desc = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
            DescsLayout: D3D12_ELEMENTS_LAYOUT_ARRAY,
            ..Default::default()
        };
        let mut flags = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_PREFER_FAST_TRACE;
        if perform_update {
            flags |= D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_PERFORM_UPDATE;
        }

        let geometries = match inputs {
            AccelerationBuildInputs::BottomLevel { geometries, allow_update } => {
                if *allow_update {
                    flags |= D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_ALLOW_UPDATE;
                }
                let geometries: Vec<D3D12_RAYTRACING_GEOMETRY_DESC> = geometries
                    .iter()
                    .map(|g| D3D12_RAYTRACING_GEOMETRY_DESC {
                        Type: D3D12_RAYTRACING_GEOMETRY_TYPE_TRIANGLES,
                        Flags: if g.opaque {
                            D3D12_RAYTRACING_GEOMETRY_FLAG_OPAQUE
                        } else {
                            D3D12_RAYTRACING_GEOMETRY_FLAG_NONE
                        },
                        Anonymous: D3D12_RAYTRACING_GEOMETRY_DESC_0 {
                            Triangles: D3D12_RAYTRACING_GEOMETRY_TRIANGLES_DESC {
                                Transform3x4: 0,
                                IndexFormat: if g.index_address != 0 {
                                    map_format(g.index_format)
                                } else {
                                    DXGI_FORMAT_UNKNOWN
                                },
                                VertexFormat: map_format(g.vertex_format),
                                IndexCount: g.index_count,
                                VertexCount: g.vertex_count,
                                IndexBuffer: g.index_address,
                                VertexBuffer: D3D12_GPU_VIRTUAL_ADDRESS_AND_STRIDE {
                                    StartAddress: g.vertex_address,
                                    StrideInBytes: g.vertex_stride,
                                },
                            },
                        },
                    })
                    .collect();
                desc.Type = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_BOTTOM_LEVEL;
                desc.NumDescs = geometries.len() as u32;
                desc.Anonymous.pGeometryDescs = geometries.as_ptr();
                geometries
            }
            AccelerationBuildInputs::TopLevel { instance_address, instance_count, allow_update } => {
                if *allow_update {
                    flags |= D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_ALLOW_UPDATE;
                }
                desc.Type = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_TOP_LEVEL;
                desc.NumDescs = *instance_count;
                desc.Anonymous.InstanceDescs = *instance_address;
                Vec::new()
            }
        };
        desc.Flags = flags;

        Self { desc, _geometries: geometries }
    }
}

impl GpuDevice for Dx12Device {
    fn create_descriptor_heap(&self, kind: DescriptorHeapKind, capacity: u32, shader_visible: bool) -> Result<RawHeapInfo> {
        let heap = Dx12DescriptorHeap::new(&self.device, kind, capacity, shader_visible)?;
        let mut registry = self.registry.borrow_mut();
        let raw = RawHeap(registry.handle());
        let info = heap.info(raw);
        registry.heaps.insert(raw, heap);
        Ok(info)
    }

    fn write_view(&self, heap: RawHeap, index: u32, resource: RawResource, desc: &ViewDescription) -> Result<()> {
        let registry = self.registry.borrow();
        let target = registry.heaps.get(&heap).ok_or_else(|| unknown("heap", heap))?;
        target.write_view(&self.device, index, registry.resource(resource)?, desc)
    }

    fn write_sampler(&self, heap: RawHeap, index: u32, desc: &SamplerDesc) -> Result<()> {
        let registry = self.registry.borrow();
        let target = registry.heaps.get(&heap).ok_or_else(|| unknown("heap", heap))?;
        target.write_sampler(&self.device, index, desc)
    }

    fn create_buffer(&self, desc: &RawBufferDesc<'_>) -> Result<RawResource> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: map_heap_type(desc.memory),
            ..Default::default()
        };
        let mut flags = D3D12_RESOURCE_FLAG_NONE;
        if desc.unordered_access || desc.acceleration_structure {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
        }
        if desc.acceleration_structure {
            flags |= D3D12_RESOURCE_FLAG_RAYTRACING_ACCELERATION_STRUCTURE;
        }
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: desc.size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: flags,
            ..Default::default()
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device
                .CreateCommittedResource(
                    &heap_props,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    map_layout(desc.initial_layout),
                    None,
                    &mut resource,
                )
                .map_err(|e| graphics_error(&format!("Failed to create buffer '{}'", desc.name), e))?;
        }
        let resource = resource.ok_or_else(|| DistRhiError::resource(format!("buffer '{}' was not created", desc.name)))?;
        Ok(self.insert_resource(resource, desc.name))
    }

    fn create_texture(&self, desc: &RawTextureDesc<'_>) -> Result<RawResource> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_DEFAULT,
            ..Default::default()
        };
        let layers = match desc.dimension {
            TextureDimension::Texture2D => desc.array_layers,
            TextureDimension::Cube => desc.array_layers.max(6),
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: desc.width as u64,
            Height: desc.height,
            DepthOrArraySize: layers as u16,
            MipLevels: desc.mip_levels as u16,
            Format: map_resource_format(desc.format, desc.usage),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: map_texture_flags(desc.usage),
            ..Default::default()
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device
                .CreateCommittedResource(
                    &heap_props,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    map_layout(desc.initial_layout),
                    None,
                    &mut resource,
                )
                .map_err(|e| graphics_error(&format!("Failed to create texture '{}'", desc.name), e))?;
        }
        let resource = resource.ok_or_else(|| DistRhiError::resource(format!("texture '{}' was not created", desc.name)))?;
        Ok(self.insert_resource(resource, desc.name))
    }

    fn destroy_resource(&self, resource: RawResource) {
        self.registry.borrow_mut().resources.remove(&resource);
    }

    fn gpu_address(&self, resource: RawResource) -> u64 {
        self.registry.borrow().address(resource)
    }

    fn write_buffer(&self, resource: RawResource, offset: u64, data: &[u8]) -> Result<()> {
        self.with_mapped(resource, false, |ptr| unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        })
    }

    fn read_buffer(&self, resource: RawResource, offset: u64, out: &mut [u8]) -> Result<()> {
        self.with_mapped(resource, true, |ptr| unsafe {
            std::ptr::copy_nonoverlapping(ptr.add(offset as usize), out.as_mut_ptr(), out.len());
        })
    }

    fn acceleration_structure_sizes(&self, inputs: &AccelerationBuildInputs) -> AccelerationStructureSizes {
        let Some(device5) = &self.device5 else {
            warn!("Acceleration structures require ID3D12Device5");
            return AccelerationStructureSizes::default();
        };
        let info = AccelerationInputs::build(inputs, false);
        let mut prebuild = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_PREBUILD_INFO::default();
        unsafe { device5.GetRaytracingAccelerationStructurePrebuildInfo(&info.desc, &mut prebuild) };
        AccelerationStructureSizes {
            result_size: prebuild.ResultDataMaxSizeInBytes,
            scratch_size: prebuild.ScratchDataSizeInBytes,
            update_scratch_size: prebuild.UpdateScratchDataSizeInBytes,
        }
    }

    fn compile_shader(&self, source: &str, entry: &str, stage: ShaderStage) -> std::result::Result<Vec<u8>, String> {
        // FXC 只支持到 SM 5.1；网格/放大着色器需要预编译的 DXIL
        let target = match stage {
            ShaderStage::Vertex => "vs_5_1",
            ShaderStage::Pixel => "ps_5_1",
            ShaderStage::Compute => "cs_5_1",
            ShaderStage::Mesh | ShaderStage::Amplification => {
                return Err(format!(
                    "{} shaders cannot be compiled at runtime; load precompiled DXIL with Shader::from_bytecode",
                    stage.name()
                ));
            }
        };
        let entry_c = std::ffi::CString::new(entry).map_err(|e| e.to_string())?;
        let target_c = std::ffi::CString::new(target).map_err(|e| e.to_string())?;

        let mut code = None;
        let mut errors = None;
        let result = unsafe {
            D3DCompile(
                source.as_ptr() as *const c_void,
                source.len(),
                None,
                None,
                None,
                windows::core::PCSTR(entry_c.as_ptr() as *const u8),
                windows::core::PCSTR(target_c.as_ptr() as *const u8),
                0,
                0,
                &mut code,
                Some(&mut errors),
            )
        };
        match (result, code) {
            (Ok(()), Some(blob)) => unsafe {
                Ok(std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()).to_vec())
            },
            (result, _) => Err(errors.map_or_else(|| format!("{:?}", result), |blob| blob_to_string(&blob))),
        }
    }

    fn create_pipeline(&self, desc: &RawPipelineDesc<'_>) -> Result<RawPipeline> {
        let (state, kind, name) = match desc {
            RawPipelineDesc::Graphics { name, .. } => (self.create_graphics_state(desc)?, PipelineKind::Graphics, *name),
            RawPipelineDesc::Mesh { name, .. } => (self.create_mesh_state(desc)?, PipelineKind::Mesh, *name),
            RawPipelineDesc::Compute { name, compute, .. } => {
                (self.create_compute_state(compute)?, PipelineKind::Compute, *name)
            }
        };
        if let Ok(object) = state.cast::<ID3D12Object>() {
            Self::set_name(&object, name);
        }
        let mut registry = self.registry.borrow_mut();
        let raw = RawPipeline(registry.handle());
        registry.pipelines.insert(raw, Dx12Pipeline { state, kind });
        Ok(raw)
    }

    fn destroy_pipeline(&self, pipeline: RawPipeline) {
        self.registry.borrow_mut().pipelines.remove(&pipeline);
    }

    fn create_command_list(&self, name: &str, single_time: bool) -> Result<RawCommandList> {
        unsafe {
            let allocator: ID3D12CommandAllocator = self
                .device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .map_err(|e| command_error("Failed to create command allocator", e))?;
            let list: ID3D12GraphicsCommandList = self
                .device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)
                .map_err(|e| command_error("Failed to create command list", e))?;
            let list: ID3D12GraphicsCommandList6 = list
                .cast()
                .map_err(|e| command_error("ID3D12GraphicsCommandList6 is not available", e))?;
            // 可复用的列表在 reset 之前保持关闭
            if !single_time {
                list.Close().map_err(|e| command_error("Failed to close command list", e))?;
            }
            if let Ok(object) = list.cast::<ID3D12Object>() {
                Self::set_name(&object, name);
            }

            let mut registry = self.registry.borrow_mut();
            let raw = RawCommandList(registry.handle());
            registry.lists.insert(raw, Dx12CommandList { allocator, list, name: name.to_string() });
            Ok(raw)
        }
    }

    fn reset_command_list(&self, list: RawCommandList) -> Result<()> {
        let registry = self.registry.borrow();
        let entry = registry.lists.get(&list).ok_or_else(|| unknown("command list", list))?;
        unsafe {
            entry
                .allocator
                .Reset()
                .map_err(|e| command_error(&format!("Failed to reset allocator of '{}'", entry.name), e))?;
            entry
                .list
                .Reset(&entry.allocator, None)
                .map_err(|e| command_error(&format!("Failed to reset '{}'", entry.name), e))?;
        }
        Ok(())
    }

    fn record(&self, list: RawCommandList, command: &Command) {
        let registry = self.registry.borrow();
        let Some(entry) = registry.lists.get(&list) else {
            warn!(list = %list, "Recording into an unknown list");
            return;
        };
        if let Err(e) = self.record_into(&registry, &entry.list, command) {
            warn!(list = %entry.name, command = command.name(), "Failed to record command: {}", e);
        }
    }

    fn close_command_list(&self, list: RawCommandList) -> Result<()> {
        let registry = self.registry.borrow();
        let entry = registry.lists.get(&list).ok_or_else(|| unknown("command list", list))?;
        unsafe { entry.list.Close() }.map_err(|e| command_error(&format!("Failed to close '{}'", entry.name), e))
    }

    fn destroy_command_list(&self, list: RawCommandList) {
        self.registry.borrow_mut().lists.remove(&list);
    }

    fn execute(&self, lists: &[RawCommandList]) -> Result<()> {
        let registry = self.registry.borrow();
        let mut submitted = Vec::with_capacity(lists.len());
        for list in lists {
            let entry = registry.lists.get(list).ok_or_else(|| unknown("command list", list))?;
            submitted.push(Some(
                entry
                    .list
                    .cast::<ID3D12CommandList>()
                    .map_err(|e| command_error("Failed to cast command list", e))?,
            ));
        }
        unsafe { self.queue.ExecuteCommandLists(&submitted) };
        trace!(count = lists.len(), "Command lists executed");
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> Result<RawFence> {
        let fence: ID3D12Fence = unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
            .map_err(|e| DistRhiError::from(GraphicsError::Synchronization(format!("Failed to create fence: {:?}", e))))?;
        let mut registry = self.registry.borrow_mut();
        let raw = RawFence(registry.handle());
        registry.fences.insert(raw, fence);
        Ok(raw)
    }

    fn signal_fence(&self, fence: RawFence, value: u64) -> Result<()> {
        let registry = self.registry.borrow();
        let target = registry.fences.get(&fence).ok_or_else(|| unknown("fence", fence))?;
        unsafe { self.queue.Signal(target, value) }
            .map_err(|e| GraphicsError::Synchronization(format!("Failed to signal fence: {:?}", e)).into())
    }

    fn fence_completed_value(&self, fence: RawFence) -> u64 {
        self.registry
            .borrow()
            .fences
            .get(&fence)
            .map_or(0, |f| unsafe { f.GetCompletedValue() })
    }

    fn wait_fence(&self, fence: RawFence, value: u64, timeout: Duration) -> Result<bool> {
        let registry = self.registry.borrow();
        let target = registry.fences.get(&fence).ok_or_else(|| unknown("fence", fence))?;
        unsafe {
            if target.GetCompletedValue() >= value {
                return Ok(true);
            }
            target
                .SetEventOnCompletion(value, self.fence_event)
                .map_err(|e| DistRhiError::from(GraphicsError::Synchronization(format!("{:?}", e))))?;
            let millis = timeout.as_millis().min(u32::MAX as u128 - 1) as u32;
            Ok(WaitForSingleObject(self.fence_event, millis) == WAIT_OBJECT_0)
        }
    }

    fn destroy_fence(&self, fence: RawFence) {
        self.registry.borrow_mut().fences.remove(&fence);
    }

    fn create_swapchain(&self, desc: &SwapchainDesc<'_>) -> Result<RawSwapchain> {
        let hwnd = match desc.target {
            SurfaceTarget::Window(RawWindowHandle::Win32(handle)) => HWND(handle.hwnd.get() as *mut c_void),
            SurfaceTarget::Window(other) => {
                return Err(GraphicsError::SwapchainError(format!("unsupported window handle {:?}", other)).into());
            }
            SurfaceTarget::Headless => {
                return Err(GraphicsError::SwapchainError(String::from("DirectX 12 needs a window to present")).into());
            }
        };

        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: map_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            ..Default::default()
        };

        let swapchain: IDXGISwapChain3 = unsafe {
            self.factory
                .CreateSwapChainForHwnd(&self.queue, hwnd, &swap_chain_desc, None, None)
                .and_then(|s| s.cast())
        }
        .map_err(|e| DistRhiError::from(GraphicsError::SwapchainError(format!("{:?}", e))))?;

        debug!(width = desc.width, height = desc.height, buffers = desc.buffer_count, "Swap chain created");

        let mut registry = self.registry.borrow_mut();
        let raw = RawSwapchain(registry.handle());
        registry.swapchains.insert(raw, Dx12Swapchain { swapchain, buffer_count: desc.buffer_count });
        Ok(raw)
    }

    fn swapchain_buffers(&self, swapchain: RawSwapchain) -> Result<Vec<RawResource>> {
        let (chain, count) = {
            let registry = self.registry.borrow();
            let entry = registry.swapchains.get(&swapchain).ok_or_else(|| unknown("swapchain", swapchain))?;
            (entry.swapchain.clone(), entry.buffer_count)
        };
        (0..count)
            .map(|i| {
                let buffer: ID3D12Resource = unsafe { chain.GetBuffer(i) }
                    .map_err(|e| DistRhiError::from(GraphicsError::SwapchainError(format!("{:?}", e))))?;
                Ok(self.insert_resource(buffer, &format!("Backbuffer {}", i)))
            })
            .collect()
    }

    fn current_backbuffer_index(&self, swapchain: RawSwapchain) -> u32 {
        self.registry
            .borrow()
            .swapchains
            .get(&swapchain)
            .map_or(0, |s| unsafe { s.swapchain.GetCurrentBackBufferIndex() })
    }

    fn present(&self, swapchain: RawSwapchain, vsync: bool) -> Result<()> {
        let registry = self.registry.borrow();
        let entry = registry.swapchains.get(&swapchain).ok_or_else(|| unknown("swapchain", swapchain))?;
        unsafe { entry.swapchain.Present(u32::from(vsync), DXGI_PRESENT(0)) }
            .ok()
            .map_err(|e| GraphicsError::SwapchainError(format!("Present failed: {:?}", e)).into())
    }

    fn resize_swapchain(&self, swapchain: RawSwapchain, width: u32, height: u32) -> Result<()> {
        let registry = self.registry.borrow();
        let entry = registry.swapchains.get(&swapchain).ok_or_else(|| unknown("swapchain", swapchain))?;
        unsafe {
            entry
                .swapchain
                .ResizeBuffers(entry.buffer_count, width, height, DXGI_FORMAT_UNKNOWN, DXGI_SWAP_CHAIN_FLAG(0))
        }
        .map_err(|e| GraphicsError::SwapchainError(format!("ResizeBuffers failed: {:?}", e)).into())
    }

    fn destroy_swapchain(&self, swapchain: RawSwapchain) {
        self.registry.borrow_mut().swapchains.remove(&swapchain);
    }
}

