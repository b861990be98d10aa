//! DirectX 12 后端
//!
//! - `Dx12Instance`：DXGI 工厂，枚举适配器并查询可选特性
//! - `Dx12Device`：D3D12 设备与唯一的图形队列
//! - `descriptor`：描述符堆与视图写入
//!
//! 所有管线共享一个无绑定根签名：根常量（b0）+ 直接索引的资源/采样器堆。

mod convert;
mod descriptor;
mod device;

pub use device::Dx12Device;

use std::rc::Rc;

use tracing::{debug, info, warn};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::core::error::{DistRhiError, GraphicsError, Result};
use crate::gfx::backend::{AdapterFeatures, AdapterInfo, GpuDevice, GpuInstance, RaytracingTier};

/// 设备要求的最低特性等级
const MIN_FEATURE_LEVEL: D3D_FEATURE_LEVEL = D3D_FEATURE_LEVEL_12_0;

fn device_error(what: &str, e: windows::core::Error) -> DistRhiError {
    DistRhiError::Graphics(GraphicsError::DeviceCreation(format!("{}: {:?}", what, e)))
}

/// DXGI 工厂
pub struct Dx12Instance {
    factory: IDXGIFactory4,
    debug: bool,
}

impl Dx12Instance {
    pub fn new(debug: bool) -> Result<Self> {
        unsafe {
            // 调试层必须在创建设备之前启用
            if debug {
                let mut controller: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut controller).ok().and(controller) {
                    Some(controller) => {
                        controller.EnableDebugLayer();
                        debug!("DX12 Debug Layer enabled");
                    }
                    None => warn!("Failed to enable DX12 Debug Layer"),
                }
            }

            let flags = if debug { DXGI_CREATE_FACTORY_DEBUG } else { DXGI_CREATE_FACTORY_FLAGS(0) };
            let factory: IDXGIFactory4 =
                CreateDXGIFactory2(flags).map_err(|e| device_error("Failed to create DXGI factory", e))?;

            Ok(Self { factory, debug })
        }
    }

    fn adapters(&self) -> Vec<(IDXGIAdapter1, AdapterInfo)> {
        let mut adapters = Vec::new();
        for index in 0.. {
            let adapter = match unsafe { self.factory.EnumAdapters1(index) } {
                Ok(adapter) => adapter,
                Err(_) => break,
            };
            let desc = match unsafe { adapter.GetDesc1() } {
                Ok(desc) => desc,
                Err(e) => {
                    warn!(index, "Failed to query adapter description: {:?}", e);
                    continue;
                }
            };

            let name_len = desc.Description.iter().take_while(|&&c| c != 0).count();
            let software = (desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32) != 0;

            // 只有能创建 12_0 设备的适配器才算可用
            let mut device: Option<ID3D12Device> = None;
            if unsafe { D3D12CreateDevice(&adapter, MIN_FEATURE_LEVEL, &mut device) }.is_err() {
                continue;
            }
            let Some(device) = device else { continue };

            let info = AdapterInfo {
                name: String::from_utf16_lossy(&desc.Description[..name_len]),
                vendor_id: desc.VendorId,
                device_id: desc.DeviceId,
                dedicated_video_memory: desc.DedicatedVideoMemory as u64,
                software,
                features: query_features(&device),
            };
            adapters.push((adapter, info));
        }
        adapters
    }
}

fn query_features(device: &ID3D12Device) -> AdapterFeatures {
    unsafe fn check<T: Default>(device: &ID3D12Device, feature: D3D12_FEATURE) -> Option<T> {
        let mut data = T::default();
        device
            .CheckFeatureSupport(feature, &mut data as *mut T as *mut _, std::mem::size_of::<T>() as u32)
            .ok()
            .map(|_| data)
    }

    unsafe {
        let options5: Option<D3D12_FEATURE_DATA_D3D12_OPTIONS5> = check(device, D3D12_FEATURE_D3D12_OPTIONS5);
        let options6: Option<D3D12_FEATURE_DATA_D3D12_OPTIONS6> = check(device, D3D12_FEATURE_D3D12_OPTIONS6);
        let options7: Option<D3D12_FEATURE_DATA_D3D12_OPTIONS7> = check(device, D3D12_FEATURE_D3D12_OPTIONS7);

        let raytracing_tier = match options5.map(|o| o.RaytracingTier) {
            Some(D3D12_RAYTRACING_TIER_1_1) => RaytracingTier::Tier1_1,
            Some(D3D12_RAYTRACING_TIER_1_0) => RaytracingTier::Tier1_0,
            _ => RaytracingTier::NotSupported,
        };

        AdapterFeatures {
            raytracing_tier,
            variable_rate_shading: options6
                .is_some_and(|o| o.VariableShadingRateTier != D3D12_VARIABLE_SHADING_RATE_TIER_NOT_SUPPORTED),
            mesh_shaders: options7.is_some_and(|o| o.MeshShaderTier != D3D12_MESH_SHADER_TIER_NOT_SUPPORTED),
            // TODO: 升级 windows 依赖后通过 D3D12_OPTIONS21 查询 WorkGraphsTier
            work_graphs: false,
        }
    }
}

impl GpuInstance for Dx12Instance {
    fn backend_name(&self) -> &'static str {
        "DirectX 12"
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>> {
        Ok(self.adapters().into_iter().map(|(_, info)| info).collect())
    }

    fn create_device(&self, adapter: &AdapterInfo) -> Result<Rc<dyn GpuDevice>> {
        let (dxgi_adapter, _) = self
            .adapters()
            .into_iter()
            .find(|(_, info)| info == adapter)
            .ok_or_else(|| device_error("Adapter disappeared", windows::core::Error::empty()))?;

        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&dxgi_adapter, MIN_FEATURE_LEVEL, &mut device) }
            .map_err(|e| device_error("Failed to create D3D12 device", e))?;
        let device = device.ok_or_else(|| device_error("D3D12CreateDevice returned no device", windows::core::Error::empty()))?;

        info!(adapter = %adapter.name, debug = self.debug, "D3D12 device created");
        let device: Rc<dyn GpuDevice> = Rc::new(Dx12Device::new(self.factory.clone(), device)?);
        Ok(device)
    }
}
