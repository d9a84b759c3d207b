//! The viewer: scene, displayed model and the per-frame loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use eframe::egui;
use glam::Vec2;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::camera::CameraRig;
use super::input;
use super::loading::{describe_failure, LoadOutcome, LoadSource, Loader, StartupHandshake};
use super::renderer::{ModelGpu, SceneRenderer, SceneUniforms};
use super::stage::{Disposable, Stage};
use super::viewport::ViewportCallback;
use crate::bridge::{Bridge, Subscription};
use crate::config::{Config, SceneConfig};
use crate::vrm::{Animator, Pose, VrmModel};

/// Longest tick fed to the animation, in seconds.
const MAX_TICK: f32 = 0.1;

/// Ways a model can be asked for, funnelled through one channel.
enum OpenRequest {
    /// Answer to the startup pending-path query
    Initial(Option<PathBuf>),
    /// Pushed by the shell
    Pushed(PathBuf),
    /// Chosen in the file picker
    Picked(LoadSource),
}

enum Status {
    Idle,
    Loading(String),
    Failed(String),
}

/// The displayed model with its animation state and GPU resources.
struct LoadedModel {
    model: VrmModel,
    animator: Animator,
    gpu: Option<ModelGpu>,
}

impl Disposable for LoadedModel {
    fn dispose(&mut self) {
        if let Some(gpu) = &mut self.gpu {
            gpu.dispose();
        }
    }
}

pub struct ViewerApp {
    _open_subscription: Subscription,
    open_tx: mpsc::UnboundedSender<OpenRequest>,
    open_rx: mpsc::UnboundedReceiver<OpenRequest>,
    handshake: StartupHandshake,
    loader: Loader,
    runtime: tokio::runtime::Handle,
    camera: CameraRig,
    scene: SceneConfig,
    renderer: Option<Arc<SceneRenderer>>,
    stage: Stage<LoadedModel>,
    source_name: Option<String>,
    status: Status,
    last_tick: Instant,
}

impl ViewerApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        bridge: Bridge,
        runtime: tokio::runtime::Handle,
        config: &Config,
    ) -> Self {
        let ctx = cc.egui_ctx.clone();
        let (open_tx, open_rx) = mpsc::unbounded_channel();

        let renderer = match cc.wgpu_render_state.as_ref() {
            Some(rs) => Some(Arc::new(SceneRenderer::new(
                &rs.device,
                &rs.queue,
                rs.target_format,
                &config.scene,
            ))),
            None => {
                error!("wgpu render state not available; the viewport will stay empty");
                None
            }
        };

        let subscription = {
            let tx = open_tx.clone();
            let ctx = ctx.clone();
            bridge.subscribe_open_file(move |path| {
                let _ = tx.send(OpenRequest::Pushed(path));
                ctx.request_repaint();
            })
        };

        {
            let bridge = bridge.clone();
            let tx = open_tx.clone();
            let ctx = ctx.clone();
            runtime.spawn(async move {
                let path = bridge.get_initial_open_path().await;
                let _ = tx.send(OpenRequest::Initial(path));
                ctx.request_repaint();
            });
        }

        Self {
            _open_subscription: subscription,
            open_tx,
            open_rx,
            handshake: StartupHandshake::default(),
            loader: Loader::new(bridge, runtime.clone(), Some(ctx)),
            runtime,
            camera: CameraRig::new(&config.camera),
            scene: config.scene.clone(),
            renderer,
            stage: Stage::new(),
            source_name: None,
            status: Status::Idle,
            last_tick: Instant::now(),
        }
    }

    /// One frame: take in requests and results, advance, draw.
    pub fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        self.drain_open_requests();
        if let Some(outcome) = self.loader.poll() {
            self.finish_load(frame, outcome);
        }
        self.handle_drops(ctx);
        self.tick(frame);

        self.top_bar(ctx);
        self.status_bar(ctx);
        self.side_panel(ctx);
        self.viewport(ctx);

        ctx.request_repaint();
    }

    fn request(&mut self, source: LoadSource) {
        let name = source.display_name();
        if self.loader.request(source).is_some() {
            self.status = Status::Loading(name);
        }
    }

    fn drain_open_requests(&mut self) {
        while let Ok(req) = self.open_rx.try_recv() {
            let source = match req {
                OpenRequest::Initial(path) => self.handshake.on_initial(path).map(LoadSource::Path),
                OpenRequest::Pushed(path) => self.handshake.on_push(path).map(LoadSource::Path),
                OpenRequest::Picked(source) => Some(source),
            };
            if let Some(source) = source {
                self.request(source);
            }
        }
    }

    fn handle_drops(&mut self, ctx: &egui::Context) {
        let dropped = ctx.input(|i| i.raw.dropped_files.clone());
        if dropped.is_empty() {
            return;
        }
        match input::first_accepted(&dropped) {
            Some(source) => self.request(source),
            None => debug!("Ignoring drop without a .vrm file"),
        }
    }

    fn open_dialog(&self) {
        let tx = self.open_tx.clone();
        self.runtime.spawn(async move {
            let Some(handle) = rfd::AsyncFileDialog::new()
                .add_filter("VRM model", &[crate::MODEL_EXTENSION])
                .pick_file()
                .await
            else {
                return;
            };
            let name = handle.file_name();
            let bytes = handle.read().await;
            let _ = tx.send(OpenRequest::Picked(LoadSource::Bytes { name, bytes }));
        });
    }

    fn finish_load(&mut self, frame: &eframe::Frame, outcome: LoadOutcome) {
        let model = match outcome.result {
            Ok(model) => model,
            Err(e) => {
                error!("Failed to load {}: {}", outcome.name, e);
                self.status = Status::Failed(describe_failure(&outcome.name, &e));
                return;
            }
        };

        let pose = Pose::rest(&model);
        let gpu = match (&self.renderer, frame.wgpu_render_state()) {
            (Some(renderer), Some(rs)) => {
                let gpu = renderer.upload_model(&rs.device, &rs.queue, &model);
                renderer.update_vertices(&rs.queue, &gpu, &pose);
                Some(gpu)
            }
            _ => None,
        };

        if !self.camera.fit_to_bounds(&pose.bounds()) {
            debug!("{} has no extent; camera left in place", outcome.name);
        }

        let animator = Animator::new(&model, self.scene.spring_bones);
        info!(
            "Showing {} ({} meshes, {} vertices, {} draws)",
            outcome.name,
            model.meshes.len(),
            model.vertex_count(),
            gpu.as_ref().map_or(0, ModelGpu::draw_count)
        );
        self.stage.attach(LoadedModel {
            model,
            animator,
            gpu,
        });
        self.source_name = Some(outcome.name);
        self.status = Status::Idle;
    }

    fn tick(&mut self, frame: &eframe::Frame) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).as_secs_f32().min(MAX_TICK);
        self.last_tick = now;

        let Some(loaded) = self.stage.current_mut() else {
            return;
        };
        let pose = loaded.animator.update(&loaded.model, dt);
        if let (Some(renderer), Some(gpu), Some(rs)) =
            (&self.renderer, &loaded.gpu, frame.wgpu_render_state())
        {
            renderer.update_vertices(&rs.queue, gpu, &pose);
        }
    }

    fn top_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                if ui.button("Open…").clicked() {
                    self.open_dialog();
                }
                if ui.button("Reset camera").clicked() {
                    self.camera.reset();
                }
                ui.separator();
                match &self.source_name {
                    Some(name) => ui.label(name.as_str()),
                    None => ui.weak("No model loaded"),
                };
            });
        });
    }

    fn status_bar(&self, ctx: &egui::Context) {
        let text = match &self.status {
            Status::Idle => return,
            Status::Loading(name) => egui::RichText::new(format!("Loading {name}…")),
            Status::Failed(message) => {
                egui::RichText::new(message).color(ctx.style().visuals.error_fg_color)
            }
        };
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.label(text);
        });
    }

    fn side_panel(&mut self, ctx: &egui::Context) {
        let Some(loaded) = self.stage.current_mut() else {
            return;
        };

        egui::SidePanel::right("model_info")
            .resizable(true)
            .default_width(240.0)
            .show(ctx, |ui| {
                ui.heading("Model");
                let rig = loaded.model.rig.as_ref();
                egui::Grid::new("model_readout").num_columns(2).show(ui, |ui| {
                    ui.label("Format");
                    ui.label(rig.map_or("glTF".to_string(), |r| r.version.to_string()));
                    ui.end_row();

                    if let Some(title) = rig.and_then(|r| r.meta.title.as_deref()) {
                        ui.label("Title");
                        ui.label(title);
                        ui.end_row();
                    }
                    if let Some(rig) = rig.filter(|r| !r.meta.authors.is_empty()) {
                        ui.label("Authors");
                        ui.label(rig.meta.authors.join(", "));
                        ui.end_row();
                    }

                    ui.label("Meshes");
                    ui.label(loaded.model.meshes.len().to_string());
                    ui.end_row();
                    ui.label("Vertices");
                    ui.label(loaded.model.vertex_count().to_string());
                    ui.end_row();
                    ui.label("Triangles");
                    ui.label(loaded.model.triangle_count().to_string());
                    ui.end_row();
                    if let Some(rig) = rig {
                        ui.label("Bones");
                        ui.label(rig.bone_to_node.len().to_string());
                        ui.end_row();
                        ui.label("Spring joints");
                        ui.label(rig.spring_joint_count().to_string());
                        ui.end_row();
                        ui.label("Spring physics");
                        ui.label(if loaded.animator.has_springs() { "on" } else { "off" });
                        ui.end_row();
                    }
                });

                let Some(rig) = loaded.model.rig.as_ref() else {
                    return;
                };
                if rig.expressions.is_empty() {
                    return;
                }

                ui.separator();
                ui.horizontal(|ui| {
                    ui.heading("Expressions");
                    if ui.small_button("Reset").clicked() {
                        loaded.animator.reset(&loaded.model);
                    }
                });
                egui::ScrollArea::vertical().show(ui, |ui| {
                    for (i, expr) in rig.expressions.iter().enumerate() {
                        let mut weight = loaded.animator.expression_weights()[i];
                        if ui
                            .add(egui::Slider::new(&mut weight, 0.0..=1.0).text(expr.name.as_str()))
                            .changed()
                        {
                            loaded.animator.set_expression_weight(i, weight);
                        }
                    }
                });
            });
    }

    fn viewport(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let available = ui.available_size();
            let (rect, response) = ui.allocate_exact_size(available, egui::Sense::click_and_drag());

            let delta = response.drag_delta();
            let delta = Vec2::new(delta.x, delta.y);
            if response.dragged_by(egui::PointerButton::Primary) {
                self.camera.controls.rotate(delta, rect.height());
            } else if response.dragged_by(egui::PointerButton::Secondary)
                || response.dragged_by(egui::PointerButton::Middle)
            {
                self.camera.controls.pan(&self.camera.camera, delta, rect.height());
            }
            if response.hovered() {
                let scroll = ctx.input(|i| i.raw_scroll_delta.y);
                self.camera.controls.dolly(scroll);
            }

            self.camera.camera.set_aspect(rect.width(), rect.height());
            self.camera.update();

            if let Some(renderer) = &self.renderer {
                let ppp = ctx.pixels_per_point().min(self.scene.max_pixel_ratio);
                let size = [
                    ((rect.width() * ppp).round() as u32).max(1),
                    ((rect.height() * ppp).round() as u32).max(1),
                ];
                let draws = self
                    .stage
                    .current()
                    .and_then(|m| m.gpu.as_ref())
                    .map(ModelGpu::draws);

                ui.painter().add(eframe::egui_wgpu::Callback::new_paint_callback(
                    rect,
                    ViewportCallback {
                        renderer: Arc::clone(renderer),
                        draws,
                        uniforms: SceneUniforms::new(
                            self.camera.view_proj(),
                            self.camera.position(),
                            &self.scene,
                        ),
                        size,
                    },
                ));
            }

            let painter = ui.painter_at(rect);
            if ctx.input(|i| !i.raw.hovered_files.is_empty()) {
                painter.rect_filled(rect, 0.0, egui::Color32::from_black_alpha(140));
                painter.text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "Drop a .vrm file to open it",
                    egui::FontId::proportional(20.0),
                    egui::Color32::WHITE,
                );
            } else if self.stage.is_empty() && !self.loader.is_loading() {
                painter.text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "Open or drop a .vrm file",
                    egui::FontId::proportional(16.0),
                    egui::Color32::GRAY,
                );
            }
        });
    }
}
