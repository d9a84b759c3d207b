//! Main window construction and the handle the shell keeps to it.

use std::sync::Arc;

use eframe::egui;
use tracing::info;

use super::Shell;
use crate::config::Config;
use crate::error::ViewerError;
use crate::ui::ViewerApp;

/// What the shell may do to a live window.
pub trait WindowHandle: Send + Sync {
    /// Un-minimize and raise the window.
    fn restore_and_focus(&self);
    /// Wake the render loop.
    fn request_repaint(&self);
}

impl WindowHandle for egui::Context {
    fn restore_and_focus(&self) {
        self.send_viewport_cmd(egui::ViewportCommand::Minimized(false));
        self.send_viewport_cmd(egui::ViewportCommand::Focus);
        egui::Context::request_repaint(self);
    }

    fn request_repaint(&self) {
        egui::Context::request_repaint(self);
    }
}

/// Hosts the viewer and reports content-ready to the shell after the first
/// frame has been produced.
struct MainWindow {
    shell: Arc<Shell>,
    viewer: ViewerApp,
    announced: bool,
}

impl eframe::App for MainWindow {
    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        self.viewer.update(ctx, frame);

        if !self.announced {
            self.announced = true;
            self.shell.window_ready(Arc::new(ctx.clone()));
        }
    }
}

/// Edge length of the window icon, in pixels.
const ICON_SIZE: u32 = 64;

/// Window and taskbar icon: a bust silhouette on a dark disc.
fn app_icon() -> egui::IconData {
    const DISC: [u8; 4] = [0x1e, 0x1e, 0x2e, 0xff];
    const FIGURE: [u8; 4] = [0x89, 0xb4, 0xfa, 0xff];

    let size = ICON_SIZE as f32;
    let mut rgba = Vec::with_capacity((ICON_SIZE * ICON_SIZE * 4) as usize);
    for y in 0..ICON_SIZE {
        for x in 0..ICON_SIZE {
            let px = x as f32 + 0.5 - size * 0.5;
            let py = y as f32 + 0.5 - size * 0.5;
            let in_disc = px * px + py * py <= (size * 0.47).powi(2);
            let in_head = px * px + (py + size * 0.12).powi(2) <= (size * 0.16).powi(2);
            let sx = px / (size * 0.3);
            let sy = (py - size * 0.34) / (size * 0.22);
            let in_shoulders = sx * sx + sy * sy <= 1.0;

            let pixel = match (in_disc, in_head || in_shoulders) {
                (false, _) => [0; 4],
                (true, true) => FIGURE,
                (true, false) => DISC,
            };
            rgba.extend_from_slice(&pixel);
        }
    }

    egui::IconData {
        rgba,
        width: ICON_SIZE,
        height: ICON_SIZE,
    }
}

/// Build the main window and run it. Blocks the calling (main) thread until
/// the window closes.
///
/// eframe creates the native window invisible and reveals it after the first
/// painted frame, so no blank window ever flashes.
pub fn run_window(
    shell: &Arc<Shell>,
    config: &Config,
    runtime: tokio::runtime::Handle,
) -> Result<(), ViewerError> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(&config.window.title)
            .with_inner_size([config.window.width, config.window.height])
            .with_min_inner_size([480.0, 320.0])
            .with_drag_and_drop(true)
            .with_icon(app_icon()),
        renderer: eframe::Renderer::Wgpu,
        ..Default::default()
    };

    info!("Opening main window");

    let shell = Arc::clone(shell);
    let config = config.clone();
    let title = config.window.title.clone();

    eframe::run_native(
        &title,
        options,
        Box::new(move |cc| {
            let viewer = ViewerApp::new(cc, shell.bridge(), runtime, &config);
            Ok(Box::new(MainWindow {
                shell,
                viewer,
                announced: false,
            }))
        }),
    )
    .map_err(|e| ViewerError::Window(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(icon: &egui::IconData, x: u32, y: u32) -> &[u8] {
        let i = ((y * icon.width + x) * 4) as usize;
        &icon.rgba[i..i + 4]
    }

    #[test]
    fn test_icon_is_square_rgba() {
        let icon = app_icon();
        assert_eq!((icon.width, icon.height), (ICON_SIZE, ICON_SIZE));
        assert_eq!(icon.rgba.len(), (ICON_SIZE * ICON_SIZE * 4) as usize);
    }

    #[test]
    fn test_icon_corners_are_transparent_and_center_is_drawn() {
        let icon = app_icon();
        let last = ICON_SIZE - 1;
        for (x, y) in [(0, 0), (last, 0), (0, last), (last, last)] {
            assert_eq!(pixel(&icon, x, y)[3], 0);
        }
        // The head sits above the middle.
        let head = pixel(&icon, ICON_SIZE / 2, ICON_SIZE * 3 / 8);
        assert_eq!(head[3], 0xff);
        assert_ne!(head, pixel(&icon, ICON_SIZE / 8 + 4, ICON_SIZE / 2));
    }
}
