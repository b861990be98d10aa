//! 适配器选择与逻辑设备
//!
//! 评分 = 专用显存 + 各项特性的固定加分（光线追踪 Tier 1.1、可变速率着色、
//! 网格着色、工作图）。选择得分最高的非软件适配器；找不到适配器或设备创建失败
//! 都是致命错误。

use std::rc::Rc;

use crate::gfx::backend::{AdapterInfo, GpuDevice, GpuInstance, RaytracingTier};

/// 光线追踪 Tier 1.1 加分
pub const RAYTRACING_BONUS: u64 = 8 << 30;
/// 可变速率着色加分
pub const VARIABLE_RATE_SHADING_BONUS: u64 = 2 << 30;
/// 网格着色加分
pub const MESH_SHADER_BONUS: u64 = 4 << 30;
/// 工作图加分
pub const WORK_GRAPHS_BONUS: u64 = 1 << 30;

/// 设备能力
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub raytracing: bool,
    pub variable_rate_shading: bool,
    pub mesh_shaders: bool,
    pub work_graphs: bool,
}

impl From<&AdapterInfo> for Capabilities {
    fn from(adapter: &AdapterInfo) -> Self {
        Self {
            raytracing: adapter.features.raytracing_tier >= RaytracingTier::Tier1_1,
            variable_rate_shading: adapter.features.variable_rate_shading,
            mesh_shaders: adapter.features.mesh_shaders,
            work_graphs: adapter.features.work_graphs,
        }
    }
}

/// 适配器得分
pub fn score_adapter(adapter: &AdapterInfo) -> u64 {
    let caps = Capabilities::from(adapter);
    let mut score = adapter.dedicated_video_memory;
    if caps.raytracing {
        score += RAYTRACING_BONUS;
    }
    if caps.variable_rate_shading {
        score += VARIABLE_RATE_SHADING_BONUS;
    }
    if caps.mesh_shaders {
        score += MESH_SHADER_BONUS;
    }
    if caps.work_graphs {
        score += WORK_GRAPHS_BONUS;
    }
    score
}

/// 选择得分最高的非软件适配器；同分时保留先枚举到的
pub fn select_adapter(adapters: &[AdapterInfo]) -> Option<&AdapterInfo> {
    let mut best: Option<(&AdapterInfo, u64)> = None;
    for adapter in adapters {
        if adapter.software {
            tracing::debug!(adapter = %adapter.name, "Skipping software adapter");
            continue;
        }
        let score = score_adapter(adapter);
        tracing::debug!(
            adapter = %adapter.name,
            vram_mib = adapter.dedicated_video_memory >> 20,
            score,
            "Adapter candidate"
        );
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((adapter, score));
        }
    }
    best.map(|(adapter, _)| adapter)
}

/// 已选择的适配器与逻辑设备
pub struct Device {
    adapter: AdapterInfo,
    capabilities: Capabilities,
    raw: Rc<dyn GpuDevice>,
}

impl Device {
    /// 枚举适配器并创建设备；失败是致命错误
    pub fn new(instance: &dyn GpuInstance) -> Self {
        let adapters = match instance.enumerate_adapters() {
            Ok(adapters) => adapters,
            Err(e) => crate::fatal!("Failed to enumerate {} adapters: {}", instance.backend_name(), e),
        };
        let adapter = match select_adapter(&adapters) {
            Some(adapter) => adapter.clone(),
            None => crate::fatal!(
                "No suitable hardware adapter found ({} adapter(s) enumerated)",
                adapters.len()
            ),
        };
        let raw = match instance.create_device(&adapter) {
            Ok(raw) => raw,
            Err(e) => crate::fatal!("Failed to create device on '{}': {}", adapter.name, e),
        };

        crate::engine_info!(
            "Selected adapter '{}' ({} MiB VRAM) on {}",
            adapter.name,
            adapter.dedicated_video_memory >> 20,
            instance.backend_name()
        );
        Self::from_raw(adapter, raw)
    }

    /// 使用已经创建好的后端设备
    pub fn from_raw(adapter: AdapterInfo, raw: Rc<dyn GpuDevice>) -> Self {
        let capabilities = Capabilities::from(&adapter);
        tracing::info!(
            raytracing = capabilities.raytracing,
            vrs = capabilities.variable_rate_shading,
            mesh_shaders = capabilities.mesh_shaders,
            work_graphs = capabilities.work_graphs,
            "Device capabilities"
        );
        Self { adapter, capabilities, raw }
    }

    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn raw(&self) -> &Rc<dyn GpuDevice> {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::AdapterFeatures;
    use crate::gfx::headless::HeadlessInstance;

    fn adapter(name: &str, vram_gib: u64, features: AdapterFeatures, software: bool) -> AdapterInfo {
        AdapterInfo {
            name: name.to_string(),
            vendor_id: 0,
            device_id: 0,
            dedicated_video_memory: vram_gib << 30,
            software,
            features,
        }
    }

    #[test]
    fn test_features_outweigh_memory() {
        let plain = adapter("big", 16, AdapterFeatures::default(), false);
        let modern = adapter(
            "modern",
            8,
            AdapterFeatures {
                raytracing_tier: RaytracingTier::Tier1_1,
                variable_rate_shading: true,
                mesh_shaders: true,
                work_graphs: false,
            },
            false,
        );
        assert!(score_adapter(&modern) > score_adapter(&plain));
        let adapters = [plain, modern];
        assert_eq!(select_adapter(&adapters).unwrap().name, "modern");
    }

    #[test]
    fn test_raytracing_tier_1_0_gets_no_bonus() {
        let tier10 = adapter(
            "tier10",
            4,
            AdapterFeatures { raytracing_tier: RaytracingTier::Tier1_0, ..Default::default() },
            false,
        );
        assert_eq!(score_adapter(&tier10), 4 << 30);
        assert!(!Capabilities::from(&tier10).raytracing);
    }

    #[test]
    fn test_software_adapters_skipped() {
        let warp = adapter("warp", 64, AdapterFeatures::default(), true);
        assert!(select_adapter(std::slice::from_ref(&warp)).is_none());
        let hw = adapter("hw", 1, AdapterFeatures::default(), false);
        assert_eq!(select_adapter(&[warp, hw]).unwrap().name, "hw");
    }

    #[test]
    fn test_device_from_headless_instance() {
        let instance = HeadlessInstance::new();
        let device = Device::new(&instance);
        assert!(!device.adapter().software);
        assert!(device.capabilities().mesh_shaders);
    }

    #[test]
    #[should_panic(expected = "No suitable hardware adapter")]
    fn test_no_hardware_adapter_is_fatal() {
        let instance = HeadlessInstance::with_adapters(vec![adapter("warp", 0, AdapterFeatures::default(), true)]);
        let _device = Device::new(&instance);
    }
}
