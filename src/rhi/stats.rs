//! 渲染统计
//!
//! 每次 draw / dispatch 都会累加计数。计数器属于上下文，每帧开始时由 RHI
//! 取快照并清零。

use std::cell::Cell;

use crate::rhi::pipeline::Topology;

/// 帧内累计的渲染统计
#[derive(Debug, Default)]
pub struct RenderStats {
    draw_calls: Cell<u64>,
    triangles: Cell<u64>,
    meshlets: Cell<u64>,
    dispatches: Cell<u64>,
}

/// 某一时刻的统计值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStatsSnapshot {
    pub draw_calls: u64,
    pub triangles: u64,
    pub meshlets: u64,
    pub dispatches: u64,
}

impl RenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次 draw，三角形数按图元拓扑计算
    pub fn record_draw(&self, topology: Topology, vertex_count: u32, instance_count: u32) {
        bump(&self.draw_calls, 1);
        bump(&self.triangles, topology.triangle_count(vertex_count) as u64 * instance_count as u64);
    }

    /// 记录一次网格着色 dispatch
    pub fn record_mesh_dispatch(&self, x: u32, y: u32, z: u32) {
        bump(&self.draw_calls, 1);
        bump(&self.meshlets, x as u64 * y as u64 * z as u64);
    }

    /// 记录一次计算 dispatch
    pub fn record_dispatch(&self) {
        bump(&self.dispatches, 1);
    }

    pub fn snapshot(&self) -> RenderStatsSnapshot {
        RenderStatsSnapshot {
            draw_calls: self.draw_calls.get(),
            triangles: self.triangles.get(),
            meshlets: self.meshlets.get(),
            dispatches: self.dispatches.get(),
        }
    }

    pub fn reset(&self) {
        self.draw_calls.set(0);
        self.triangles.set(0);
        self.meshlets.set(0);
        self.dispatches.set(0);
    }

    /// 取快照并清零
    pub fn take(&self) -> RenderStatsSnapshot {
        let snapshot = self.snapshot();
        self.reset();
        snapshot
    }
}

fn bump(counter: &Cell<u64>, amount: u64) {
    counter.set(counter.get().saturating_add(amount));
}
