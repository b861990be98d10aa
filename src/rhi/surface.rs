//! 呈现表面
//!
//! 包装后端交换链：每个后台缓冲区一个纹理与一个渲染目标视图。

use std::rc::Rc;

use raw_window_handle::RawWindowHandle;

use crate::core::error::{DistRhiError, GraphicsError, Result};
use crate::gfx::backend::{RawSwapchain, SwapchainDesc};
use crate::rhi::context::Context;
use crate::rhi::resource::{Format, Resource, ResourceLayout};
use crate::rhi::texture::{Texture, TextureDesc, TextureUsage};
use crate::rhi::view::{View, ViewDimension, ViewType};

/// 后台缓冲区格式
pub const BACKBUFFER_FORMAT: Format = Format::Bgra8Unorm;

/// 呈现目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceTarget {
    /// 离屏（无窗口）
    Headless,
    /// 原生窗口
    Window(RawWindowHandle),
}

/// 呈现表面
pub struct Surface {
    context: Rc<Context>,
    target: SurfaceTarget,
    raw: RawSwapchain,
    buffer_count: u32,
    width: u32,
    height: u32,
    backbuffers: Vec<Rc<Texture>>,
    views: Vec<Rc<View>>,
}

impl Surface {
    pub fn new(context: &Rc<Context>, target: SurfaceTarget, width: u32, height: u32, buffer_count: u32) -> Result<Self> {
        check_extent(width, height)?;
        let raw = context.gpu().create_swapchain(&SwapchainDesc {
            target: &target,
            width,
            height,
            buffer_count,
            format: BACKBUFFER_FORMAT,
        })?;

        let mut surface = Self {
            context: context.clone(),
            target,
            raw,
            buffer_count,
            width,
            height,
            backbuffers: Vec::new(),
            views: Vec::new(),
        };
        surface.acquire_backbuffers()?;

        tracing::info!(width, height, buffers = buffer_count, "Surface created");
        Ok(surface)
    }

    fn acquire_backbuffers(&mut self) -> Result<()> {
        let raws = self.context.gpu().swapchain_buffers(self.raw)?;
        for (i, raw) in raws.into_iter().enumerate() {
            let desc = TextureDesc::new_2d(self.width, self.height, BACKBUFFER_FORMAT, TextureUsage::RENDER_TARGET)
                .with_name(format!("Backbuffer {}", i));
            let texture = Rc::new(Texture::from_raw(
                self.context.gpu().clone(),
                raw,
                &desc,
                ResourceLayout::Present,
            ));
            let view = View::new(&self.context, texture.clone(), ViewType::RenderTarget, ViewDimension::Texture2D)?;
            self.backbuffers.push(texture);
            self.views.push(Rc::new(view));
        }
        Ok(())
    }

    /// 当前后台缓冲区索引
    pub fn current_index(&self) -> usize {
        self.context.gpu().current_backbuffer_index(self.raw) as usize
    }

    pub fn backbuffer(&self, index: usize) -> Option<&Rc<Texture>> {
        self.backbuffers.get(index)
    }

    pub fn view(&self, index: usize) -> Option<&Rc<View>> {
        self.views.get(index)
    }

    /// 当前后台缓冲区与其视图
    pub fn current(&self) -> Result<(Rc<Texture>, Rc<View>)> {
        let index = self.current_index();
        match (self.backbuffers.get(index), self.views.get(index)) {
            (Some(texture), Some(view)) => Ok((texture.clone(), view.clone())),
            _ => Err(GraphicsError::SwapchainError(format!("backbuffer {} is missing", index)).into()),
        }
    }

    pub fn present(&self, vsync: bool) -> Result<()> {
        self.context.gpu().present(self.raw, vsync)
    }

    /// 调整尺寸；调用者必须先等待 GPU 空闲，并且不能再持有任何后台缓冲区
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        check_extent(width, height)?;
        if self.backbuffers.iter().any(|b| Rc::strong_count(b) > 2)
            || self.views.iter().any(|v| Rc::strong_count(v) > 1)
        {
            return Err(DistRhiError::usage("backbuffers are still referenced during resize"));
        }

        self.views.clear();
        self.backbuffers.clear();
        self.context.gpu().resize_swapchain(self.raw, width, height)?;
        self.width = width;
        self.height = height;
        self.acquire_backbuffers()?;

        tracing::info!(width, height, "Surface resized");
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    pub fn format(&self) -> Format {
        BACKBUFFER_FORMAT
    }

    pub fn target(&self) -> SurfaceTarget {
        self.target
    }

    pub fn raw(&self) -> RawSwapchain {
        self.raw
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.views.clear();
        self.backbuffers.clear();
        self.context.gpu().destroy_swapchain(self.raw);
    }
}

fn check_extent(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(GraphicsError::SwapchainError(format!("invalid surface extent {}x{}", width, height)).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::context::tests::headless_context;

    #[test]
    fn test_backbuffers_and_present() {
        let (ctx, gpu) = headless_context();
        let surface = Surface::new(&ctx, SurfaceTarget::Headless, 64, 32, 3).unwrap();
        assert!(surface.backbuffer(2).is_some());
        assert!(surface.backbuffer(3).is_none());
        assert_eq!(surface.current_index(), 0);

        let (texture, view) = surface.current().unwrap();
        assert_eq!(texture.width(), 64);
        assert_eq!(texture.layout(), ResourceLayout::Present);
        assert_eq!(view.view_type(), ViewType::RenderTarget);
        drop((texture, view));

        surface.present(true).unwrap();
        assert_eq!(surface.current_index(), 1);
        assert_eq!(gpu.present_count(), 1);
    }

    #[test]
    fn test_resize() {
        let (ctx, gpu) = headless_context();
        let mut surface = Surface::new(&ctx, SurfaceTarget::Headless, 64, 32, 3).unwrap();
        let live = gpu.live_resource_count();

        let held = surface.current().unwrap();
        assert!(surface.resize(128, 128).is_err());
        drop(held);

        surface.resize(128, 96).unwrap();
        assert_eq!(surface.width(), 128);
        assert_eq!(surface.backbuffer(0).unwrap().height(), 96);
        assert_eq!(gpu.live_resource_count(), live);
        assert!(surface.resize(0, 96).is_err());
    }
}
