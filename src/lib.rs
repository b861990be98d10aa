//! DistRHI - 显式 GPU 渲染硬件接口
//!
//! 在 DirectX 12 风格的显式图形 API 之上提供一层薄而安全的封装：
//! 描述符堆、带布局追踪的资源、命令缓冲区、Fence 同步、批量上传与交换链。
//! 除 DirectX 12 外还提供软件模拟的无头后端，可在任意平台上运行与测试。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（日志、配置、错误处理）
//! - `gfx`: 图形后端抽象层与具体后端
//! - `rhi`: 面向使用者的资源 / 命令 / 同步层
//!
//! # 使用示例
//!
//! ```no_run
//! use dist_rhi::core::Config;
//! use dist_rhi::rhi::{Rhi, SurfaceTarget};
//!
//! let config = Config::default();
//! let mut rhi = Rhi::new(&config, SurfaceTarget::Headless).unwrap();
//!
//! let mut frame = rhi.begin().unwrap();
//! let view = frame.view().clone();
//! frame.cmd().clear_render_target(&view, [0.0, 0.0, 0.0, 1.0]).unwrap();
//! rhi.submit(&mut frame).unwrap();
//! rhi.end(frame).unwrap();
//! rhi.present_default().unwrap();
//! ```

pub mod core;
pub mod gfx;
pub mod rhi;
