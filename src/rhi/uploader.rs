//! 上传器
//!
//! 把 CPU 数据经暂存缓冲区批量传到 GPU。每个请求立即分配自己的暂存缓冲区并写入数据；
//! 累计字节数达到阈值或显式 [`Uploader::flush`] 时，在一个一次性命令缓冲区里记录所有复制，
//! 提交后完整等待设备空闲，再释放暂存缓冲区。
//!
//! 每个请求的屏障顺序：
//!
//! ```text
//! target -> CopyDest, staging -> CopySource, copy,
//! staging -> Common, target -> 稳态（纹理 ShaderResource，缓冲区 NonPixelShaderResource）
//! ```

use std::rc::Rc;

use crate::core::error::{DistRhiError, Result};
use crate::rhi::acceleration::AccelerationStructure;
use crate::rhi::buffer::{Buffer, BufferDesc, MemoryType};
use crate::rhi::command::CommandBuffer;
use crate::rhi::context::Context;
use crate::rhi::resource::{Resource, ResourceLayout};
use crate::rhi::texture::{write_pitched, SubresourceFootprint, Texture};

/// 上传目标
enum UploadTarget {
    Buffer(Rc<Buffer>),
    Texture {
        texture: Rc<Texture>,
        footprints: Vec<SubresourceFootprint>,
    },
    AccelerationBuild(Rc<AccelerationStructure>),
}

/// 一次 flush 周期内的上传请求
struct UploadRequest {
    target: UploadTarget,
    /// 加速结构构建没有 BLAS 数据需要暂存
    staging: Option<Buffer>,
}

/// 批量上传器
pub struct Uploader {
    context: Rc<Context>,
    requests: Vec<UploadRequest>,
    pending_bytes: u64,
    threshold: u64,
    flushes: u64,
}

impl Uploader {
    pub fn new(context: &Rc<Context>) -> Self {
        Self {
            context: context.clone(),
            requests: Vec::new(),
            pending_bytes: 0,
            threshold: context.settings().upload_flush_threshold,
            flushes: 0,
        }
    }

    /// 上传缓冲区内容（从偏移 0 开始）
    pub fn upload_buffer(&mut self, target: &Rc<Buffer>, data: &[u8]) -> Result<()> {
        if target.memory() != MemoryType::DeviceLocal {
            return Err(DistRhiError::usage(format!(
                "'{}' lives in {:?} memory; write it with copy_mapped",
                target.name(),
                target.memory()
            )));
        }
        if data.is_empty() || data.len() as u64 > target.size() {
            return Err(DistRhiError::usage(format!(
                "cannot upload {} bytes into '{}' ({} bytes)",
                data.len(),
                target.name(),
                target.size()
            )));
        }

        let staging = self.create_staging(target.name(), data.len() as u64)?;
        staging.copy_mapped(0, data)?;

        tracing::trace!(target = target.name(), bytes = data.len(), "Buffer upload queued");
        self.enqueue(UploadRequest { target: UploadTarget::Buffer(target.clone()), staging: Some(staging) })
    }

    /// 上传纹理内容
    ///
    /// `data` 为紧凑排列的像素，先按数组层、再按 mip 排序。
    pub fn upload_texture(&mut self, target: &Rc<Texture>, data: &[u8]) -> Result<()> {
        let (footprints, total) = target.footprints();
        let expected: u64 = footprints.iter().map(|f| f.row_bytes * f.rows as u64).sum();
        if data.len() as u64 != expected {
            return Err(DistRhiError::usage(format!(
                "texture '{}' expects {} bytes of packed data, got {}",
                target.name(),
                expected,
                data.len()
            )));
        }

        let mut pitched = vec![0u8; total as usize];
        write_pitched(&footprints, data, &mut pitched)?;
        let staging = self.create_staging(target.name(), total)?;
        staging.copy_mapped(0, &pitched)?;

        tracing::trace!(
            target = target.name(),
            bytes = total,
            subresources = footprints.len(),
            "Texture upload queued"
        );
        self.enqueue(UploadRequest {
            target: UploadTarget::Texture { texture: target.clone(), footprints },
            staging: Some(staging),
        })
    }

    /// 排队构建加速结构；TLAS 的实例数据经暂存缓冲区上传
    pub fn build_acceleration_structure(&mut self, target: &Rc<AccelerationStructure>) -> Result<()> {
        let staging = match target.instance_buffer() {
            Some(_) => {
                let bytes = target.instance_bytes();
                let staging = self.create_staging(target.name(), bytes.len() as u64)?;
                staging.copy_mapped(0, bytes)?;
                Some(staging)
            }
            None => None,
        };

        tracing::trace!(target = target.name(), level = ?target.level(), "Acceleration build queued");
        self.enqueue(UploadRequest { target: UploadTarget::AccelerationBuild(target.clone()), staging })
    }

    /// 提交所有排队的请求并等待完成；没有请求时无操作
    pub fn flush(&mut self) -> Result<()> {
        if self.requests.is_empty() {
            return Ok(());
        }

        let mut cmd = CommandBuffer::new(&self.context, "Upload", true)?;
        cmd.begin()?;
        // 屏障在记录时就改写了资源布局，开始记录后的失败无法回滚
        if let Err(e) = self.record_and_submit(&mut cmd) {
            crate::fatal!("Upload flush failed after recording began: {}", e);
        }
        self.context.wait_idle();

        crate::engine_info!(
            "Upload flush: {} request(s), {} KiB",
            self.requests.len(),
            self.pending_bytes >> 10
        );

        self.requests.clear();
        self.pending_bytes = 0;
        self.flushes += 1;
        Ok(())
    }

    /// 当前批次已暂存的字节数
    pub fn pending_bytes(&self) -> u64 {
        self.pending_bytes
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// 已完成的 flush 次数
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    fn record_and_submit(&self, cmd: &mut CommandBuffer) -> Result<()> {
        for request in &self.requests {
            record_request(cmd, request)?;
        }
        cmd.end()?;
        self.context.queue().execute(&[&*cmd])
    }

    fn create_staging(&self, target: &str, size: u64) -> Result<Buffer> {
        Buffer::new(&self.context, &BufferDesc::copy(size).with_name(format!("{} Staging", target)))
    }

    fn enqueue(&mut self, request: UploadRequest) -> Result<()> {
        self.pending_bytes += request.staging.as_ref().map_or(0, |s| s.size());
        self.requests.push(request);
        if self.pending_bytes >= self.threshold {
            tracing::debug!(bytes = self.pending_bytes, threshold = self.threshold, "Upload threshold reached");
            self.flush()?;
        }
        Ok(())
    }
}

fn record_request(cmd: &mut CommandBuffer, request: &UploadRequest) -> Result<()> {
    match (&request.target, &request.staging) {
        (UploadTarget::Buffer(target), Some(staging)) => {
            cmd.barrier(target.as_ref(), ResourceLayout::CopyDest)?;
            cmd.barrier(staging, ResourceLayout::CopySource)?;
            cmd.copy_buffer(target, 0, staging, 0, staging.size())?;
            cmd.barrier(staging, ResourceLayout::Common)?;
            cmd.barrier(target.as_ref(), ResourceLayout::NonPixelShaderResource)?;
        }
        (UploadTarget::Texture { texture, footprints }, Some(staging)) => {
            cmd.barrier(texture.as_ref(), ResourceLayout::CopyDest)?;
            cmd.barrier(staging, ResourceLayout::CopySource)?;
            for sub in footprints {
                cmd.copy_buffer_to_texture(texture, sub.subresource, staging, sub.footprint)?;
            }
            cmd.barrier(staging, ResourceLayout::Common)?;
            cmd.barrier(texture.as_ref(), ResourceLayout::ShaderResource)?;
        }
        (UploadTarget::AccelerationBuild(target), staging) => {
            if let (Some(instances), Some(staging)) = (target.instance_buffer(), staging) {
                cmd.barrier(instances, ResourceLayout::CopyDest)?;
                cmd.barrier(staging, ResourceLayout::CopySource)?;
                cmd.copy_buffer(instances, 0, staging, 0, staging.size())?;
                cmd.barrier(staging, ResourceLayout::Common)?;
            }
            let update = target.is_built() && target.allows_update();
            cmd.build_acceleration_structure(target, update)?;
        }
        (_, None) => {
            return Err(DistRhiError::command("upload request without staging data"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::command::Command;
    use crate::rhi::acceleration::{BlasGeometry, InstanceDesc, TlasInstance};
    use crate::rhi::context::tests::{headless_context, headless_context_with};
    use crate::rhi::context::ContextSettings;
    use crate::rhi::resource::Format;
    use crate::rhi::texture::{TextureDesc, TextureUsage};

    #[test]
    fn test_storage_buffer_upload_scenario() {
        let (ctx, gpu) = headless_context();
        let mut uploader = Uploader::new(&ctx);
        let target = Rc::new(Buffer::new(&ctx, &BufferDesc::storage(64 * 1024, 4)).unwrap());
        let baseline = gpu.live_resource_count();

        let data: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
        uploader.upload_buffer(&target, &data).unwrap();
        assert_eq!(uploader.pending_bytes(), 64 * 1024);
        assert_eq!(uploader.pending_requests(), 1);
        assert_eq!(gpu.live_resource_count(), baseline + 1);

        uploader.flush().unwrap();
        assert_eq!(uploader.pending_bytes(), 0);
        assert_eq!(uploader.pending_requests(), 0);
        assert_eq!(target.layout(), ResourceLayout::NonPixelShaderResource);
        // 暂存缓冲区已回收
        assert_eq!(gpu.live_resource_count(), baseline);
        assert_eq!(gpu.pending_submissions(), 0);
        assert_eq!(gpu.buffer_contents(target.raw()).unwrap(), data);
    }

    #[test]
    fn test_barrier_sequence() {
        let (ctx, gpu) = headless_context();
        let mut uploader = Uploader::new(&ctx);
        let target = Rc::new(Buffer::new(&ctx, &BufferDesc::vertex(48, 12)).unwrap());
        uploader.upload_buffer(&target, &[7u8; 48]).unwrap();
        uploader.flush().unwrap();

        let executed = gpu.executed_commands();
        let names: Vec<&str> = executed.iter().map(Command::name).collect();
        assert_eq!(
            names,
            vec![
                "SetDescriptorHeaps",
                "Transition",
                "Transition",
                "CopyBuffer",
                "Transition",
                "Transition",
            ]
        );
        assert!(matches!(
            executed.last(),
            Some(Command::Transition { after: ResourceLayout::NonPixelShaderResource, .. })
        ));
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let (ctx, gpu) = headless_context();
        let mut uploader = Uploader::new(&ctx);
        uploader.flush().unwrap();
        assert_eq!(uploader.flush_count(), 0);
        assert!(gpu.events().is_empty());
    }

    #[test]
    fn test_threshold_triggers_flush() {
        let (ctx, _gpu) = headless_context_with(ContextSettings {
            upload_flush_threshold: 1024,
            resource_capacity: 16,
            ..ContextSettings::default()
        });
        let mut uploader = Uploader::new(&ctx);
        let a = Rc::new(Buffer::new(&ctx, &BufferDesc::storage(512, 4)).unwrap());
        let b = Rc::new(Buffer::new(&ctx, &BufferDesc::storage(512, 4)).unwrap());

        uploader.upload_buffer(&a, &[1u8; 512]).unwrap();
        assert_eq!(uploader.flush_count(), 0);
        uploader.upload_buffer(&b, &[2u8; 512]).unwrap();
        assert_eq!(uploader.flush_count(), 1);
        assert_eq!(uploader.pending_bytes(), 0);
        assert_eq!(b.layout(), ResourceLayout::NonPixelShaderResource);
    }

    #[test]
    fn test_texture_upload_with_mips() {
        let (ctx, gpu) = headless_context();
        let mut uploader = Uploader::new(&ctx);
        let texture = Rc::new(
            Texture::new(
                &ctx,
                &TextureDesc::new_2d(8, 8, Format::Rgba8Unorm, TextureUsage::SHADER_RESOURCE).with_mips(2),
            )
            .unwrap(),
        );

        assert!(uploader.upload_texture(&texture, &[0u8; 16]).is_err());

        let data = vec![0xabu8; 8 * 8 * 4 + 4 * 4 * 4];
        uploader.upload_texture(&texture, &data).unwrap();
        uploader.flush().unwrap();

        assert_eq!(texture.layout(), ResourceLayout::ShaderResource);
        let copies = gpu
            .executed_commands()
            .into_iter()
            .filter(|c| matches!(c, Command::CopyBufferToTexture { .. }))
            .count();
        assert_eq!(copies, 2);
    }

    #[test]
    fn test_acceleration_builds() {
        let (ctx, gpu) = headless_context();
        let mut uploader = Uploader::new(&ctx);
        let vertices = Rc::new(Buffer::new(&ctx, &BufferDesc::vertex(36, 12)).unwrap());
        uploader.upload_buffer(&vertices, &[0u8; 36]).unwrap();

        let blas = Rc::new(
            AccelerationStructure::bottom_level(&ctx, "blas", &[BlasGeometry::new(&vertices, None)], false).unwrap(),
        );
        let instance = TlasInstance::new(&blas, InstanceDesc::IDENTITY, 0, 0xff);
        let instance_desc = instance.desc;
        let tlas = Rc::new(AccelerationStructure::top_level(&ctx, "tlas", vec![instance], true).unwrap());

        uploader.build_acceleration_structure(&blas).unwrap();
        uploader.build_acceleration_structure(&tlas).unwrap();
        assert_eq!(uploader.pending_bytes(), 36 + InstanceDesc::SIZE);
        uploader.flush().unwrap();

        assert!(blas.is_built());
        assert!(tlas.is_built());
        let tlas_instances = tlas.instance_buffer().unwrap();
        assert_eq!(tlas_instances.layout(), ResourceLayout::NonPixelShaderResource);
        assert_eq!(
            gpu.buffer_contents(tlas_instances.raw()).unwrap(),
            bytemuck::bytes_of(&instance_desc).to_vec()
        );

        let executed = gpu.executed_commands();
        let builds: Vec<&Command> = executed
            .iter()
            .filter(|c| matches!(c, Command::BuildAccelerationStructure { .. }))
            .collect();
        assert_eq!(builds.len(), 2);
        let tlas_build = executed
            .iter()
            .position(|c| matches!(c, Command::BuildAccelerationStructure { dst, .. } if *dst == tlas.raw()))
            .unwrap();
        assert_eq!(executed[tlas_build + 1], Command::UnorderedAccessBarrier { resource: tlas.raw() });

        // 第二次构建 TLAS 走原地更新
        uploader.build_acceleration_structure(&tlas).unwrap();
        uploader.flush().unwrap();
        assert!(gpu.executed_commands().iter().any(
            |c| matches!(c, Command::BuildAccelerationStructure { src: Some(src), .. } if *src == tlas.raw())
        ));
    }

    #[test]
    fn test_cpu_visible_targets_rejected() {
        let (ctx, _gpu) = headless_context();
        let mut uploader = Uploader::new(&ctx);
        let constant = Rc::new(Buffer::new(&ctx, &BufferDesc::constant(64)).unwrap());
        assert!(uploader.upload_buffer(&constant, &[0u8; 16]).is_err());

        let small = Rc::new(Buffer::new(&ctx, &BufferDesc::storage(16, 4)).unwrap());
        assert!(uploader.upload_buffer(&small, &[0u8; 32]).is_err());
        assert_eq!(uploader.pending_requests(), 0);
    }

    #[test]
    #[should_panic(expected = "Upload flush failed after recording began")]
    fn test_failure_after_recording_is_fatal() {
        let (ctx, _gpu) = headless_context();
        let mut uploader = Uploader::new(&ctx);
        let target = Rc::new(Buffer::new(&ctx, &BufferDesc::storage(64, 4)).unwrap());
        uploader.upload_buffer(&target, &[7u8; 64]).unwrap();
        // 第一个请求的屏障已改写布局，第二个请求在记录时失败
        uploader.requests.push(UploadRequest { target: UploadTarget::Buffer(target.clone()), staging: None });
        let _ = uploader.flush();
    }
}
