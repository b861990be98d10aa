//! GPU 同步机制模块
//!
//! 唯一的图形队列与单调递增的 Fence。
//!
//! # 使用场景
//!
//! 1. **帧同步**：每个帧槽位记录一个 Fence 值，复用槽位前等待它完成
//! 2. **资源更新**：上传器提交后完整地等待设备空闲

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::core::error::{DistRhiError, Result};
use crate::gfx::backend::{GpuDevice, RawCommandList, RawFence};
use crate::rhi::command::{CommandBuffer, CommandBufferState};

/// 默认 Fence 等待超时（毫秒）
pub const DEFAULT_FENCE_TIMEOUT_MS: u64 = 10_000_000;

/// 图形队列
pub struct Queue {
    device: Rc<dyn GpuDevice>,
    submissions: Cell<u64>,
}

impl Queue {
    pub fn new(device: Rc<dyn GpuDevice>) -> Self {
        Self {
            device,
            submissions: Cell::new(0),
        }
    }

    /// 提交已关闭的命令缓冲区
    pub fn execute(&self, buffers: &[&CommandBuffer]) -> Result<()> {
        let mut lists: Vec<RawCommandList> = Vec::with_capacity(buffers.len());
        for buffer in buffers {
            if buffer.state() != CommandBufferState::Executable {
                return Err(DistRhiError::command(format!(
                    "command buffer '{}' is {:?}, expected Executable",
                    buffer.name(),
                    buffer.state()
                )));
            }
            lists.push(buffer.raw());
        }
        if lists.is_empty() {
            return Ok(());
        }

        self.device.execute(&lists)?;
        self.submissions.set(self.submissions.get() + 1);
        tracing::trace!(lists = lists.len(), "Command lists submitted");
        Ok(())
    }

    /// 已提交的批次数量
    pub fn submission_count(&self) -> u64 {
        self.submissions.get()
    }

    fn signal(&self, fence: RawFence, value: u64) -> Result<()> {
        self.device.signal_fence(fence, value)
    }
}

/// 单调递增的 GPU Fence
pub struct Fence {
    device: Rc<dyn GpuDevice>,
    raw: RawFence,
    value: Cell<u64>,
    completed: Cell<u64>,
    timeout: Duration,
}

impl Fence {
    /// 创建 Fence；后端创建失败是致命错误
    pub fn new(device: Rc<dyn GpuDevice>, timeout: Duration) -> Self {
        let raw = match device.create_fence(0) {
            Ok(raw) => raw,
            Err(e) => crate::fatal!("Failed to create fence: {}", e),
        };
        Self {
            device,
            raw,
            value: Cell::new(0),
            completed: Cell::new(0),
            timeout,
        }
    }

    /// 递增并让队列在当前工作完成后发出信号，返回新值
    pub fn signal(&self, queue: &Queue) -> u64 {
        let value = self.value.get() + 1;
        if let Err(e) = queue.signal(self.raw, value) {
            crate::fatal!("Failed to signal fence {} with value {}: {}", self.raw, value, e);
        }
        self.value.set(value);
        tracing::trace!(fence = %self.raw, value, "Fence signaled");
        value
    }

    /// 最近一次 signal 的值
    pub fn current_value(&self) -> u64 {
        self.value.get()
    }

    /// GPU 已完成的值（不会倒退）
    pub fn completed_value(&self) -> u64 {
        let observed = self.device.fence_completed_value(self.raw);
        let completed = observed.max(self.completed.get());
        self.completed.set(completed);
        completed
    }

    pub fn is_complete(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// 阻塞直到 `value` 完成；超时视为 GPU 挂起，是致命错误
    pub fn wait(&self, value: u64) {
        if self.is_complete(value) {
            return;
        }

        tracing::trace!(fence = %self.raw, value, "Waiting for fence");
        match self.device.wait_fence(self.raw, value, self.timeout) {
            Ok(true) => {
                self.completed.set(self.completed.get().max(value));
            }
            Ok(false) => crate::fatal!(
                "GPU hang: fence {} did not reach {} within {} ms",
                self.raw,
                value,
                self.timeout.as_millis()
            ),
            Err(e) => crate::fatal!("Failed to wait on fence {}: {}", self.raw, e),
        }
    }

    /// signal 后立即等待
    pub fn flush(&self, queue: &Queue) -> u64 {
        let value = self.signal(queue);
        self.wait(value);
        value
    }

    pub fn raw(&self) -> RawFence {
        self.raw
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.destroy_fence(self.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::headless::{HeadlessDevice, HeadlessEvent};

    fn fence_and_queue() -> (Rc<HeadlessDevice>, Fence, Queue) {
        let gpu = HeadlessDevice::new();
        let device: Rc<dyn GpuDevice> = gpu.clone();
        let fence = Fence::new(device.clone(), Duration::from_millis(DEFAULT_FENCE_TIMEOUT_MS));
        (gpu, fence, Queue::new(device))
    }

    #[test]
    fn test_signal_increments() {
        let (_gpu, fence, queue) = fence_and_queue();
        assert_eq!(fence.current_value(), 0);
        assert_eq!(fence.signal(&queue), 1);
        assert_eq!(fence.signal(&queue), 2);
        assert_eq!(fence.current_value(), 2);
    }

    #[test]
    fn test_completion_is_deferred_until_wait() {
        let (gpu, fence, queue) = fence_and_queue();
        let value = fence.signal(&queue);
        assert_eq!(fence.completed_value(), 0);
        assert!(!fence.is_complete(value));

        fence.wait(value);
        assert!(fence.is_complete(value));
        assert!(gpu.events().contains(&HeadlessEvent::Wait { fence: fence.raw(), value }));
    }

    #[test]
    fn test_wait_on_completed_value_does_not_block() {
        let (gpu, fence, queue) = fence_and_queue();
        fence.flush(&queue);
        gpu.clear_events();
        fence.wait(1);
        fence.wait(0);
        assert!(gpu.events().is_empty());
    }

    #[test]
    fn test_completed_value_is_monotonic() {
        let (gpu, fence, queue) = fence_and_queue();
        let mut last = 0;
        for _ in 0..5 {
            let value = fence.signal(&queue);
            if value % 2 == 0 {
                gpu.retire_all();
            }
            let completed = fence.completed_value();
            assert!(completed >= last);
            assert!(completed <= fence.current_value());
            last = completed;
        }
        fence.wait(fence.current_value());
        assert_eq!(fence.completed_value(), 5);
    }

    #[test]
    #[should_panic(expected = "GPU hang")]
    fn test_hung_gpu_is_fatal() {
        let (gpu, fence, queue) = fence_and_queue();
        let value = fence.signal(&queue);
        gpu.set_hung(true);
        fence.wait(value);
    }

    #[test]
    fn test_execute_rejects_open_buffers() {
        use crate::rhi::context::tests::headless_context;

        let (ctx, _gpu) = headless_context();
        let mut cmd = CommandBuffer::new(&ctx, "open", false).unwrap();
        cmd.begin().unwrap();
        assert!(ctx.queue().execute(&[&cmd]).is_err());
        cmd.end().unwrap();
        assert!(ctx.queue().execute(&[&cmd]).is_ok());
        assert_eq!(ctx.queue().submission_count(), 1);
    }
}
