//! 无头设备：主机内存中的资源与延迟执行的模拟队列

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use super::HeadlessEvent;
use crate::core::error::{DistRhiError, GraphicsError, Result};
use crate::gfx::backend::{
    AccelerationStructureSizes, GpuDevice, RawBufferDesc, RawCommandList, RawFence, RawHeap, RawHeapInfo,
    RawPipeline, RawPipelineDesc, RawResource, RawSwapchain, RawTextureDesc, SwapchainDesc,
};
use crate::gfx::command::{AccelerationBuildInputs, Command};
use crate::rhi::buffer::MemoryType;
use crate::rhi::descriptor::DescriptorHeapKind;
use crate::rhi::pipeline::ShaderStage;
use crate::rhi::resource::{align_up, Format};
use crate::rhi::sampler::SamplerDesc;
use crate::rhi::texture::{copyable_footprints, PlacedFootprint, SubresourceFootprint, TextureDimension, TextureUsage};
use crate::rhi::view::ViewDescription;

/// 模拟的描述符大小
const DESCRIPTOR_INCREMENT: u32 = 32;
/// GPU 虚拟地址起点
const ADDRESS_BASE: u64 = 0x1_0000_0000;

struct HostResource {
    name: String,
    data: Vec<u8>,
    /// 纹理为 `None`
    memory: Option<MemoryType>,
    address: u64,
    /// 纹理子资源在 `data` 中的布局
    subresources: Vec<SubresourceFootprint>,
}

struct HostHeap {
    kind: DescriptorHeapKind,
    capacity: u32,
}

struct HostCommandList {
    name: String,
    commands: Vec<Command>,
    open: bool,
    single_time: bool,
    resets: u32,
}

struct HostSwapchain {
    width: u32,
    height: u32,
    buffer_count: u32,
    format: Format,
    current: u32,
}

enum QueueItem {
    Execute(Vec<Command>),
    Signal(RawFence, u64),
}

#[derive(Default)]
struct State {
    next_handle: u64,
    next_address: u64,
    heaps: HashMap<RawHeap, HostHeap>,
    views: HashMap<(RawHeap, u32), ViewDescription>,
    samplers: HashMap<(RawHeap, u32), SamplerDesc>,
    resources: HashMap<RawResource, HostResource>,
    pipelines: HashSet<RawPipeline>,
    lists: HashMap<RawCommandList, HostCommandList>,
    fences: HashMap<RawFence, u64>,
    swapchains: HashMap<RawSwapchain, HostSwapchain>,
    queue: VecDeque<QueueItem>,
    events: Vec<HeadlessEvent>,
    executed: Vec<Command>,
    presents: u64,
    hung: bool,
}

impl State {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn allocate_address(&mut self, size: u64) -> u64 {
        let address = ADDRESS_BASE + self.next_address;
        self.next_address += align_up(size.max(1), 65_536);
        address
    }

    fn insert_texture(&mut self, name: &str, width: u32, height: u32, layers: u32, mips: u32, format: Format) -> RawResource {
        let (subresources, total) = copyable_footprints(format, width, height, layers, mips);
        let raw = RawResource(self.handle());
        let address = self.allocate_address(total);
        self.resources.insert(
            raw,
            HostResource {
                name: name.to_string(),
                data: vec![0; total as usize],
                memory: None,
                address,
                subresources,
            },
        );
        raw
    }

    /// 执行队首的一项；队列为空时返回 false
    fn retire_one(&mut self) -> bool {
        match self.queue.pop_front() {
            Some(QueueItem::Execute(commands)) => {
                for command in &commands {
                    self.run(command);
                }
                true
            }
            Some(QueueItem::Signal(fence, value)) => {
                if let Some(completed) = self.fences.get_mut(&fence) {
                    *completed = (*completed).max(value);
                }
                true
            }
            None => false,
        }
    }

    fn run(&mut self, command: &Command) {
        match command {
            Command::CopyBuffer { dst, dst_offset, src, src_offset, size } => {
                let bytes = self.read(*src, *src_offset, *size);
                self.write(*dst, *dst_offset, &bytes);
            }
            Command::CopyBufferToTexture { dst, subresource, src, footprint } => {
                let Some(layout) = self.subresource(*dst, *subresource) else { return };
                self.copy_rows(*src, footprint, *dst, &layout.footprint);
            }
            Command::CopyTextureToBuffer { dst, footprint, src, subresource } => {
                let Some(layout) = self.subresource(*src, *subresource) else { return };
                self.copy_rows(*src, &layout.footprint, *dst, footprint);
            }
            _ => {}
        }
    }

    fn subresource(&self, texture: RawResource, subresource: u32) -> Option<SubresourceFootprint> {
        let layout = self
            .resources
            .get(&texture)
            .and_then(|r| r.subresources.get(subresource as usize).copied());
        if layout.is_none() {
            tracing::warn!(texture = %texture, subresource, "Copy references a missing subresource");
        }
        layout
    }

    fn copy_rows(&mut self, src: RawResource, src_fp: &PlacedFootprint, dst: RawResource, dst_fp: &PlacedFootprint) {
        let format = src_fp.format;
        let row_bytes = format.row_bytes(src_fp.width.min(dst_fp.width));
        let rows = format.row_count(src_fp.height.min(dst_fp.height));
        for row in 0..rows as u64 {
            let bytes = self.read(src, src_fp.offset + row * src_fp.row_pitch as u64, row_bytes);
            self.write(dst, dst_fp.offset + row * dst_fp.row_pitch as u64, &bytes);
        }
    }

    fn read(&self, resource: RawResource, offset: u64, len: u64) -> Vec<u8> {
        self.resources
            .get(&resource)
            .and_then(|r| r.data.get(offset as usize..(offset + len) as usize))
            .map(<[u8]>::to_vec)
            .unwrap_or_else(|| {
                tracing::warn!(resource = %resource, offset, len, "Out of bounds GPU read");
                vec![0; len as usize]
            })
    }

    fn write(&mut self, resource: RawResource, offset: u64, bytes: &[u8]) {
        let target = self
            .resources
            .get_mut(&resource)
            .and_then(|r| r.data.get_mut(offset as usize..offset as usize + bytes.len()));
        match target {
            Some(target) => target.copy_from_slice(bytes),
            None => tracing::warn!(resource = %resource, offset, len = bytes.len(), "Out of bounds GPU write"),
        }
    }
}

/// 软件模拟的 GPU 设备
pub struct HeadlessDevice {
    state: RefCell<State>,
}

impl HeadlessDevice {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            state: RefCell::new(State::default()),
        })
    }

    // ---- 测试与调试用的观察接口 ----

    pub fn events(&self) -> Vec<HeadlessEvent> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// 命令列表当前记录的命令
    pub fn recorded_commands(&self, list: RawCommandList) -> Vec<Command> {
        self.state
            .borrow()
            .lists
            .get(&list)
            .map(|l| l.commands.clone())
            .unwrap_or_default()
    }

    /// 命令列表被重置的次数
    pub fn reset_count(&self, list: RawCommandList) -> u32 {
        self.state.borrow().lists.get(&list).map_or(0, |l| l.resets)
    }

    /// 所有提交过的命令，按提交顺序
    pub fn executed_commands(&self) -> Vec<Command> {
        self.state.borrow().executed.clone()
    }

    pub fn live_resource_count(&self) -> usize {
        self.state.borrow().resources.len()
    }

    pub fn live_pipeline_count(&self) -> usize {
        self.state.borrow().pipelines.len()
    }

    /// 尚未执行的命令列表批次
    pub fn pending_submissions(&self) -> usize {
        self.state
            .borrow()
            .queue
            .iter()
            .filter(|item| matches!(item, QueueItem::Execute(_)))
            .count()
    }

    pub fn present_count(&self) -> u64 {
        self.state.borrow().presents
    }

    /// 模拟 GPU 挂起：之后的等待全部超时
    pub fn set_hung(&self, hung: bool) {
        self.state.borrow_mut().hung = hung;
    }

    /// 让模拟 GPU 执行完队列中的所有工作
    pub fn retire_all(&self) {
        let mut state = self.state.borrow_mut();
        if state.hung {
            return;
        }
        while state.retire_one() {}
    }

    /// 资源的字节内容
    pub fn buffer_contents(&self, resource: RawResource) -> Option<Vec<u8>> {
        self.state.borrow().resources.get(&resource).map(|r| r.data.clone())
    }

    pub fn view_at(&self, heap: RawHeap, index: u32) -> Option<ViewDescription> {
        self.state.borrow().views.get(&(heap, index)).cloned()
    }

    pub fn sampler_at(&self, heap: RawHeap, index: u32) -> Option<SamplerDesc> {
        self.state.borrow().samplers.get(&(heap, index)).cloned()
    }

    pub fn resource_name(&self, resource: RawResource) -> Option<String> {
        self.state.borrow().resources.get(&resource).map(|r| r.name.clone())
    }

    fn check_slot(state: &State, heap: RawHeap, index: u32, expected: &[DescriptorHeapKind]) -> Result<()> {
        match state.heaps.get(&heap) {
            Some(h) if index < h.capacity && expected.contains(&h.kind) => Ok(()),
            Some(h) => Err(DistRhiError::usage(format!(
                "slot {} of {} heap {} is not writable here",
                index,
                h.kind.name(),
                heap
            ))),
            None => Err(DistRhiError::usage(format!("unknown descriptor heap {}", heap))),
        }
    }
}

fn has_entry_point(source: &str, entry: &str) -> bool {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    source.match_indices(entry).any(|(at, _)| {
        let before_ok = source[..at].chars().next_back().map_or(true, |c| !is_ident(c));
        let after = source[at + entry.len()..].trim_start();
        before_ok && after.starts_with('(')
    })
}

impl GpuDevice for HeadlessDevice {
    fn create_descriptor_heap(&self, kind: DescriptorHeapKind, capacity: u32, shader_visible: bool) -> Result<RawHeapInfo> {
        let mut state = self.state.borrow_mut();
        let id = state.handle();
        let raw = RawHeap(id);
        state.heaps.insert(raw, HostHeap { kind, capacity });
        Ok(RawHeapInfo {
            raw,
            cpu_base: (id as usize) << 32,
            gpu_base: shader_visible.then_some(id << 40),
            increment_size: DESCRIPTOR_INCREMENT,
        })
    }

    fn write_view(&self, heap: RawHeap, index: u32, resource: RawResource, desc: &ViewDescription) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let allowed: &[DescriptorHeapKind] = match desc.view_type() {
            crate::rhi::view::ViewType::RenderTarget => &[DescriptorHeapKind::RenderTarget],
            crate::rhi::view::ViewType::DepthTarget => &[DescriptorHeapKind::DepthStencil],
            _ => &[DescriptorHeapKind::Resource],
        };
        Self::check_slot(&state, heap, index, allowed)?;
        if !state.resources.contains_key(&resource) {
            return Err(DistRhiError::usage(format!("view of unknown resource {}", resource)));
        }
        state.views.insert((heap, index), desc.clone());
        Ok(())
    }

    fn write_sampler(&self, heap: RawHeap, index: u32, desc: &SamplerDesc) -> Result<()> {
        let mut state = self.state.borrow_mut();
        Self::check_slot(&state, heap, index, &[DescriptorHeapKind::Sampler])?;
        state.samplers.insert((heap, index), desc.clone());
        Ok(())
    }

    fn create_buffer(&self, desc: &RawBufferDesc<'_>) -> Result<RawResource> {
        if desc.size == 0 {
            return Err(DistRhiError::resource(format!("buffer '{}' has zero size", desc.name)));
        }
        let mut state = self.state.borrow_mut();
        let raw = RawResource(state.handle());
        let address = state.allocate_address(desc.size);
        state.resources.insert(
            raw,
            HostResource {
                name: desc.name.to_string(),
                data: vec![0; desc.size as usize],
                memory: Some(desc.memory),
                address,
                subresources: Vec::new(),
            },
        );
        Ok(raw)
    }

    fn create_texture(&self, desc: &RawTextureDesc<'_>) -> Result<RawResource> {
        let layers = match desc.dimension {
            TextureDimension::Texture2D => desc.array_layers,
            TextureDimension::Cube => 6,
        };
        if desc.usage.contains(TextureUsage::DEPTH_TARGET) && !desc.format.is_depth() {
            return Err(DistRhiError::resource(format!("texture '{}' depth usage without depth format", desc.name)));
        }
        let mut state = self.state.borrow_mut();
        Ok(state.insert_texture(desc.name, desc.width, desc.height, layers, desc.mip_levels, desc.format))
    }

    fn destroy_resource(&self, resource: RawResource) {
        self.state.borrow_mut().resources.remove(&resource);
    }

    fn gpu_address(&self, resource: RawResource) -> u64 {
        self.state.borrow().resources.get(&resource).map_or(0, |r| r.address)
    }

    fn write_buffer(&self, resource: RawResource, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let host = state
            .resources
            .get_mut(&resource)
            .ok_or_else(|| DistRhiError::usage(format!("unknown resource {}", resource)))?;
        if host.memory != Some(MemoryType::Upload) {
            return Err(DistRhiError::usage(format!("'{}' is not mapped for writing", host.name)));
        }
        let end = offset as usize + data.len();
        host.data
            .get_mut(offset as usize..end)
            .ok_or_else(|| DistRhiError::usage(format!("write past the end of '{}'", host.name)))?
            .copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, resource: RawResource, offset: u64, out: &mut [u8]) -> Result<()> {
        let state = self.state.borrow();
        let host = state
            .resources
            .get(&resource)
            .ok_or_else(|| DistRhiError::usage(format!("unknown resource {}", resource)))?;
        if host.memory != Some(MemoryType::Readback) {
            return Err(DistRhiError::usage(format!("'{}' is not mapped for reading", host.name)));
        }
        let end = offset as usize + out.len();
        let src = host
            .data
            .get(offset as usize..end)
            .ok_or_else(|| DistRhiError::usage(format!("read past the end of '{}'", host.name)))?;
        out.copy_from_slice(src);
        Ok(())
    }

    fn acceleration_structure_sizes(&self, inputs: &AccelerationBuildInputs) -> AccelerationStructureSizes {
        let (result, allow_update) = match inputs {
            AccelerationBuildInputs::BottomLevel { geometries, allow_update } => {
                let triangles: u64 = geometries
                    .iter()
                    .map(|g| if g.index_address != 0 { g.index_count } else { g.vertex_count } as u64 / 3)
                    .sum();
                (align_up(256 + triangles * 64, 256), *allow_update)
            }
            AccelerationBuildInputs::TopLevel { instance_count, allow_update, .. } => {
                (align_up(256 + *instance_count as u64 * 128, 256), *allow_update)
            }
        };
        AccelerationStructureSizes {
            result_size: result,
            scratch_size: result,
            update_scratch_size: if allow_update { result / 2 } else { 0 },
        }
    }

    fn compile_shader(&self, source: &str, entry: &str, stage: ShaderStage) -> std::result::Result<Vec<u8>, String> {
        if source.trim().is_empty() {
            return Err(String::from("error: empty shader source"));
        }
        if !has_entry_point(source, entry) {
            return Err(format!("error: entry point '{}' not found", entry));
        }
        Ok(format!("{}:{}\n{}", stage.name(), entry, source).into_bytes())
    }

    fn create_pipeline(&self, desc: &RawPipelineDesc<'_>) -> Result<RawPipeline> {
        let (name, stages) = match desc {
            RawPipelineDesc::Graphics { name, vertex, pixel, .. } => (*name, vec![*vertex, *pixel]),
            RawPipelineDesc::Mesh { name, amplification, mesh, pixel, .. } => {
                let mut stages = vec![*mesh, *pixel];
                stages.extend(amplification.iter().copied());
                (*name, stages)
            }
            RawPipelineDesc::Compute { name, compute, .. } => (*name, vec![*compute]),
        };
        if stages.iter().any(|s| s.code.is_empty()) {
            return Err(GraphicsError::ShaderCompilation(format!("pipeline '{}' has an empty shader", name)).into());
        }
        let mut state = self.state.borrow_mut();
        let raw = RawPipeline(state.handle());
        state.pipelines.insert(raw);
        Ok(raw)
    }

    fn destroy_pipeline(&self, pipeline: RawPipeline) {
        self.state.borrow_mut().pipelines.remove(&pipeline);
    }

    fn create_command_list(&self, name: &str, single_time: bool) -> Result<RawCommandList> {
        let mut state = self.state.borrow_mut();
        let raw = RawCommandList(state.handle());
        state.lists.insert(
            raw,
            HostCommandList {
                name: name.to_string(),
                commands: Vec::new(),
                open: single_time,
                single_time,
                resets: 0,
            },
        );
        Ok(raw)
    }

    fn reset_command_list(&self, list: RawCommandList) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let host = state
            .lists
            .get_mut(&list)
            .ok_or_else(|| DistRhiError::command(format!("unknown command list {}", list)))?;
        if host.single_time {
            return Err(DistRhiError::command(format!("single-time list '{}' cannot be reset", host.name)));
        }
        host.commands.clear();
        host.open = true;
        host.resets += 1;
        state.events.push(HeadlessEvent::ResetCommandList(list));
        Ok(())
    }

    fn record(&self, list: RawCommandList, command: &Command) {
        let mut state = self.state.borrow_mut();
        match state.lists.get_mut(&list) {
            Some(host) if host.open => host.commands.push(command.clone()),
            Some(host) => tracing::warn!(list = %host.name, command = command.name(), "Recording into a closed list"),
            None => tracing::warn!(list = %list, "Recording into an unknown list"),
        }
    }

    fn close_command_list(&self, list: RawCommandList) -> Result<()> {
        let mut state = self.state.borrow_mut();
        match state.lists.get_mut(&list) {
            Some(host) if host.open => {
                host.open = false;
                Ok(())
            }
            Some(host) => Err(DistRhiError::command(format!("list '{}' is already closed", host.name))),
            None => Err(DistRhiError::command(format!("unknown command list {}", list))),
        }
    }

    fn destroy_command_list(&self, list: RawCommandList) {
        self.state.borrow_mut().lists.remove(&list);
    }

    fn execute(&self, lists: &[RawCommandList]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let mut commands = Vec::new();
        for list in lists {
            match state.lists.get(list) {
                Some(host) if !host.open => commands.extend(host.commands.iter().cloned()),
                Some(host) => return Err(DistRhiError::command(format!("list '{}' is still open", host.name))),
                None => return Err(DistRhiError::command(format!("unknown command list {}", list))),
            }
        }
        state.executed.extend(commands.iter().cloned());
        state.queue.push_back(QueueItem::Execute(commands));
        state.events.push(HeadlessEvent::Execute { lists: lists.to_vec() });
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> Result<RawFence> {
        let mut state = self.state.borrow_mut();
        let raw = RawFence(state.handle());
        state.fences.insert(raw, initial_value);
        Ok(raw)
    }

    fn signal_fence(&self, fence: RawFence, value: u64) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.fences.contains_key(&fence) {
            return Err(GraphicsError::Synchronization(format!("unknown fence {}", fence)).into());
        }
        state.queue.push_back(QueueItem::Signal(fence, value));
        state.events.push(HeadlessEvent::Signal { fence, value });
        Ok(())
    }

    fn fence_completed_value(&self, fence: RawFence) -> u64 {
        self.state.borrow().fences.get(&fence).copied().unwrap_or(0)
    }

    fn wait_fence(&self, fence: RawFence, value: u64, timeout: Duration) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        state.events.push(HeadlessEvent::Wait { fence, value });
        if state.hung {
            tracing::warn!(fence = %fence, value, timeout_ms = timeout.as_millis() as u64, "Simulated GPU hang");
            return Ok(false);
        }
        loop {
            let completed = *state
                .fences
                .get(&fence)
                .ok_or_else(|| DistRhiError::from(GraphicsError::Synchronization(format!("unknown fence {}", fence))))?;
            if completed >= value {
                return Ok(true);
            }
            if !state.retire_one() {
                // 队列已空，这个值永远不会到达
                return Ok(false);
            }
        }
    }

    fn destroy_fence(&self, fence: RawFence) {
        self.state.borrow_mut().fences.remove(&fence);
    }

    fn create_swapchain(&self, desc: &SwapchainDesc<'_>) -> Result<RawSwapchain> {
        if desc.buffer_count == 0 {
            return Err(GraphicsError::SwapchainError(String::from("swapchain needs at least one buffer")).into());
        }
        let mut state = self.state.borrow_mut();
        let raw = RawSwapchain(state.handle());
        state.swapchains.insert(
            raw,
            HostSwapchain {
                width: desc.width,
                height: desc.height,
                buffer_count: desc.buffer_count,
                format: desc.format,
                current: 0,
            },
        );
        Ok(raw)
    }

    fn swapchain_buffers(&self, swapchain: RawSwapchain) -> Result<Vec<RawResource>> {
        let mut state = self.state.borrow_mut();
        let (width, height, count, format) = state
            .swapchains
            .get(&swapchain)
            .map(|s| (s.width, s.height, s.buffer_count, s.format))
            .ok_or_else(|| DistRhiError::from(GraphicsError::SwapchainError(format!("unknown swapchain {}", swapchain))))?;
        Ok((0..count)
            .map(|i| state.insert_texture(&format!("Backbuffer {}", i), width, height, 1, 1, format))
            .collect())
    }

    fn current_backbuffer_index(&self, swapchain: RawSwapchain) -> u32 {
        self.state.borrow().swapchains.get(&swapchain).map_or(0, |s| s.current)
    }

    fn present(&self, swapchain: RawSwapchain, vsync: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let chain = state
            .swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| DistRhiError::from(GraphicsError::SwapchainError(format!("unknown swapchain {}", swapchain))))?;
        chain.current = (chain.current + 1) % chain.buffer_count;
        state.presents += 1;
        state.events.push(HeadlessEvent::Present { swapchain, vsync });
        Ok(())
    }

    fn resize_swapchain(&self, swapchain: RawSwapchain, width: u32, height: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let chain = state
            .swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| DistRhiError::from(GraphicsError::SwapchainError(format!("unknown swapchain {}", swapchain))))?;
        chain.width = width;
        chain.height = height;
        chain.current = 0;
        Ok(())
    }

    fn destroy_swapchain(&self, swapchain: RawSwapchain) {
        self.state.borrow_mut().swapchains.remove(&swapchain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::resource::ResourceLayout;

    fn buffer(device: &HeadlessDevice, size: u64, memory: MemoryType) -> RawResource {
        device
            .create_buffer(&RawBufferDesc {
                name: "test",
                size,
                memory,
                initial_layout: ResourceLayout::Common,
                unordered_access: false,
                acceleration_structure: false,
            })
            .unwrap()
    }

    #[test]
    fn test_copies_run_when_fence_is_waited() {
        let device = HeadlessDevice::new();
        let upload = buffer(&device, 16, MemoryType::Upload);
        let readback = buffer(&device, 16, MemoryType::Readback);
        device.write_buffer(upload, 0, &[9; 16]).unwrap();

        let list = device.create_command_list("copy", true).unwrap();
        device.record(list, &Command::CopyBuffer { dst: readback, dst_offset: 0, src: upload, src_offset: 0, size: 16 });
        device.close_command_list(list).unwrap();
        device.execute(&[list]).unwrap();

        let fence = device.create_fence(0).unwrap();
        device.signal_fence(fence, 1).unwrap();

        let mut out = [0u8; 16];
        device.read_buffer(readback, 0, &mut out).unwrap();
        assert_eq!(out, [0; 16]);
        assert_eq!(device.pending_submissions(), 1);

        assert!(device.wait_fence(fence, 1, Duration::from_millis(1)).unwrap());
        device.read_buffer(readback, 0, &mut out).unwrap();
        assert_eq!(out, [9; 16]);
        assert_eq!(device.pending_submissions(), 0);
    }

    #[test]
    fn test_wait_for_unsignaled_value_times_out() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(0).unwrap();
        assert!(!device.wait_fence(fence, 1, Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn test_mapping_rules() {
        let device = HeadlessDevice::new();
        let local = buffer(&device, 16, MemoryType::DeviceLocal);
        assert!(device.write_buffer(local, 0, &[1]).is_err());
        let mut out = [0u8; 1];
        assert!(device.read_buffer(local, 0, &mut out).is_err());
    }

    #[test]
    fn test_entry_point_detection() {
        assert!(has_entry_point("void main() {}", "main"));
        assert!(has_entry_point("float4 ps_main (float4 p : SV_Position)", "ps_main"));
        assert!(!has_entry_point("void cs_main() {}", "main"));
        assert!(!has_entry_point("int main_value = 0;", "main"));
    }

    #[test]
    fn test_texture_storage_uses_footprints() {
        let device = HeadlessDevice::new();
        let texture = device
            .create_texture(&RawTextureDesc {
                name: "tex",
                width: 4,
                height: 4,
                array_layers: 1,
                mip_levels: 3,
                format: Format::Rgba8Unorm,
                dimension: TextureDimension::Texture2D,
                usage: TextureUsage::SHADER_RESOURCE,
                initial_layout: ResourceLayout::Common,
            })
            .unwrap();
        let (_, total) = copyable_footprints(Format::Rgba8Unorm, 4, 4, 1, 3);
        assert_eq!(device.buffer_contents(texture).unwrap().len() as u64, total);
        assert_eq!(device.resource_name(texture).as_deref(), Some("tex"));
    }
}
