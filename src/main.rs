//! DistRHI 演示程序
//!
//! 在无头后端上驱动完整的帧循环：上传几何与带 mip 的纹理、编译计算着色器、
//! 每帧清屏并 dispatch，最后把结果读回 CPU 并输出渲染统计。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件
//! cargo run
//!
//! # 覆盖交换链尺寸
//! cargo run -- --width 640 --height 360
//! ```

use anyhow::{bail, Context as _};
use bytemuck::{Pod, Zeroable};
use tracing::{info, warn};

use dist_rhi::core::config::GraphicsBackend;
use dist_rhi::core::{log, Config};
use dist_rhi::rhi::{
    BufferDesc, ComputePipelineDesc, Format, ResourceLayout, Rhi, ShaderStage, SurfaceTarget, TextureDesc,
    TextureUsage, ViewDimension, ViewType,
};

/// 演示运行的帧数
const DEMO_FRAMES: u64 = 8;

const FILL_SHADER: &str = r#"
cbuffer PushConstants : register(b0) { uint frame; uint target; };

[numthreads(8, 8, 1)]
void CSMain(uint3 id : SV_DispatchThreadID)
{
    RWTexture2D<float4> output = ResourceDescriptorHeap[target];
    output[id.xy] = float4(id.x / 255.0, id.y / 255.0, frame / 8.0, 1.0);
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: [f32; 3],
    uv: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FillConstants {
    frame: u32,
    target: u32,
}

fn main() -> anyhow::Result<()> {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");
    config.apply_args(std::env::args());
    config.validate().context("invalid configuration")?;

    // 2. 初始化日志系统
    let log_file = config.logging.file_output.then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file);
    info!(version = env!("CARGO_PKG_VERSION"), "DistRHI demo starting");

    // 演示程序没有窗口，只能离屏运行
    if config.graphics.backend != GraphicsBackend::Headless {
        warn!(backend = config.graphics.backend.name(), "Demo has no window; falling back to headless backend");
        config.graphics.backend = GraphicsBackend::Headless;
    }

    let mut rhi = Rhi::new(&config, SurfaceTarget::Headless)?;
    let (width, height) = (config.window.width, config.window.height);

    // 3. 上传资源
    let vertices = [
        Vertex { position: [-1.0, -1.0, 0.0], uv: [0.0, 1.0] },
        Vertex { position: [0.0, 1.0, 0.0], uv: [0.5, 0.0] },
        Vertex { position: [1.0, -1.0, 0.0], uv: [1.0, 1.0] },
    ];
    let vertex_bytes: &[u8] = bytemuck::cast_slice(&vertices);
    let vertex_buffer = rhi.create_buffer(
        &BufferDesc::vertex(vertex_bytes.len() as u64, std::mem::size_of::<Vertex>() as u32).with_name("Triangle VB"),
    )?;

    let albedo_desc = TextureDesc::new_2d(256, 256, Format::Rgba8Unorm, TextureUsage::SHADER_RESOURCE)
        .with_full_mips()
        .with_name("Checker Albedo");
    let albedo = rhi.create_texture(&albedo_desc)?;
    let albedo_data = checker_pixels(&albedo_desc);

    let uploader = rhi.uploader();
    uploader.upload_buffer(&vertex_buffer, vertex_bytes)?;
    uploader.upload_texture(&albedo, &albedo_data)?;
    uploader.flush()?;
    info!(
        mips = albedo_desc.mip_levels,
        bytes = albedo_data.len(),
        "Uploaded triangle and checker texture"
    );

    // 4. 计算管线与输出纹理
    let output = rhi.create_texture(
        &TextureDesc::new_2d(width, height, Format::Rgba8Unorm, TextureUsage::STORAGE).with_name("Fill Output"),
    )?;
    let output_view = rhi.create_view(output.clone(), ViewType::Storage, ViewDimension::Texture2D)?;

    let shader = rhi.compile_shader(FILL_SHADER, "CSMain", ShaderStage::Compute);
    if !shader.is_valid() {
        bail!("fill shader failed to compile");
    }
    let pipeline = rhi.create_compute_pipeline(&ComputePipelineDesc {
        name: "Fill",
        compute: &shader,
        push_constant_dwords: 2,
    })?;

    // 5. 帧循环
    for frame_number in 0..DEMO_FRAMES {
        let mut frame = rhi.begin()?;
        let view = frame.view().clone();
        let cmd = frame.cmd();
        cmd.begin_marker("Demo Frame")?;
        cmd.clear_render_target(&view, [0.1, 0.1, 0.12, 1.0])?;
        cmd.barrier(output.as_ref(), ResourceLayout::UnorderedAccess)?;
        cmd.set_pipeline(&pipeline)?;
        cmd.push_constants_pod(&FillConstants { frame: frame_number as u32, target: output_view.index() })?;
        cmd.dispatch(width.div_ceil(8), height.div_ceil(8), 1)?;
        cmd.uav_barrier(output.as_ref())?;
        cmd.end_marker()?;

        rhi.submit(&mut frame)?;
        rhi.end(frame)?;
        rhi.present_default()?;

        let stats = rhi.last_frame_stats();
        info!(
            frame = frame_number,
            slot = rhi.frame_index(),
            dispatches = stats.dispatches,
            draw_calls = stats.draw_calls,
            "Frame finished"
        );
    }

    // 6. 读回顶点数据验证上传结果
    let readback = rhi.create_buffer(&BufferDesc::readback(vertex_bytes.len() as u64).with_name("Vertex Readback"))?;
    let mut copy = rhi.create_command_buffer("Readback", true)?;
    copy.begin()?;
    copy.barrier(vertex_buffer.as_ref(), ResourceLayout::CopySource)?;
    copy.copy_buffer(&readback, 0, &vertex_buffer, 0, vertex_bytes.len() as u64)?;
    copy.end()?;
    rhi.context().queue().execute(&[&copy])?;
    rhi.wait_idle();

    let bytes = readback.read_mapped(0, vertex_bytes.len() as u64)?;
    if bytes != vertex_bytes {
        bail!("vertex readback does not match the uploaded data");
    }

    info!(frames = rhi.frame_count(), "DistRHI demo finished");
    Ok(())
}

/// 为每个 mip 生成棋盘格像素，按紧密排列的子资源顺序拼接
fn checker_pixels(desc: &TextureDesc) -> Vec<u8> {
    let mut data = Vec::new();
    for mip in 0..desc.mip_levels {
        let width = (desc.width >> mip).max(1);
        let height = (desc.height >> mip).max(1);
        for y in 0..height {
            for x in 0..width {
                let on = ((x / 8) + (y / 8)) % 2 == 0;
                let value = if on { 255 } else { 32 };
                data.extend_from_slice(&[value, value, value, 255]);
            }
        }
    }
    data
}
