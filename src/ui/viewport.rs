//! egui-wgpu `CallbackTrait` for the 3D viewport.
//!
//! `prepare()` renders the scene offscreen, `paint()` blits the result into
//! the egui render pass.

use std::sync::Arc;

use eframe::egui_wgpu;
use eframe::wgpu;

use super::renderer::{DrawCall, SceneRenderer, SceneUniforms};

pub struct ViewportCallback {
    pub renderer: Arc<SceneRenderer>,
    /// Draw list of the displayed model, if any
    pub draws: Option<Arc<Vec<DrawCall>>>,
    pub uniforms: SceneUniforms,
    /// Offscreen size in physical pixels
    pub size: [u32; 2],
}

impl egui_wgpu::CallbackTrait for ViewportCallback {
    fn prepare(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        _screen_descriptor: &egui_wgpu::ScreenDescriptor,
        _egui_encoder: &mut wgpu::CommandEncoder,
        _callback_resources: &mut egui_wgpu::CallbackResources,
    ) -> Vec<wgpu::CommandBuffer> {
        self.renderer.resize(device, self.size[0], self.size[1]);
        vec![self
            .renderer
            .render_offscreen(device, queue, &self.uniforms, self.draws.as_deref().map(Vec::as_slice))]
    }

    fn paint(
        &self,
        _info: eframe::egui::PaintCallbackInfo,
        render_pass: &mut wgpu::RenderPass<'static>,
        _callback_resources: &egui_wgpu::CallbackResources,
    ) {
        self.renderer.blit(render_pass);
    }
}
