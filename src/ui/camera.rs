//! Perspective camera with damped orbit controls and auto-framing.
//!
//! Orbit behaviour follows the usual web-viewer conventions: drag distances
//! are normalised by viewport height, one full viewport height of drag turns
//! the camera 360°, and every pending motion decays by the damping factor.

use std::f32::consts::{PI, TAU};

use glam::{Mat4, Vec2, Vec3};

use crate::config::CameraConfig;
use crate::vrm::Aabb;

const POLAR_EPS: f32 = 1e-6;
const MIN_RADIUS: f32 = 1e-4;

#[derive(Debug, Clone)]
pub struct PerspectiveCamera {
    pub fov_y_deg: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub position: Vec3,
}

impl PerspectiveCamera {
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_deg.to_radians(), self.aspect, self.near, self.far)
    }

    /// Zero-sized viewports (minimised window) keep the last aspect.
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        if width > 0.0 && height > 0.0 {
            self.aspect = width / height;
        }
    }
}

/// Radius/polar/azimuth around the orbit target, Y up.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Spherical {
    radius: f32,
    /// Angle from +Y
    phi: f32,
    /// Angle around Y from +Z
    theta: f32,
}

impl Spherical {
    fn from_offset(v: Vec3) -> Self {
        let radius = v.length();
        if radius == 0.0 {
            return Self::default();
        }
        Self {
            radius,
            theta: v.x.atan2(v.z),
            phi: (v.y / radius).clamp(-1.0, 1.0).acos(),
        }
    }

    fn to_offset(self) -> Vec3 {
        let sin_phi_radius = self.phi.sin() * self.radius;
        Vec3::new(
            sin_phi_radius * self.theta.sin(),
            self.phi.cos() * self.radius,
            sin_phi_radius * self.theta.cos(),
        )
    }
}

/// Accumulates user input and applies it with damping on [`update`](Self::update).
#[derive(Debug, Clone)]
pub struct OrbitControls {
    pub target: Vec3,
    pub damping_factor: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
    spherical_delta: Spherical,
    pan_offset: Vec3,
    scale: f32,
}

impl OrbitControls {
    pub fn new(target: Vec3, config: &CameraConfig) -> Self {
        Self {
            target,
            damping_factor: config.damping_factor,
            rotate_speed: config.rotate_speed,
            zoom_speed: config.zoom_speed,
            pan_speed: config.pan_speed,
            spherical_delta: Spherical::default(),
            pan_offset: Vec3::ZERO,
            scale: 1.0,
        }
    }

    /// Drag by `delta` pixels in a viewport `viewport_height` pixels tall.
    pub fn rotate(&mut self, delta: Vec2, viewport_height: f32) {
        if viewport_height <= 0.0 {
            return;
        }
        self.spherical_delta.theta -= TAU * delta.x / viewport_height * self.rotate_speed;
        self.spherical_delta.phi -= TAU * delta.y / viewport_height * self.rotate_speed;
    }

    /// Move the target in the screen plane so the scene tracks the pointer.
    pub fn pan(&mut self, camera: &PerspectiveCamera, delta: Vec2, viewport_height: f32) {
        if viewport_height <= 0.0 {
            return;
        }
        let offset = camera.position - self.target;
        let target_distance = offset.length() * (camera.fov_y_deg.to_radians() * 0.5).tan();
        let delta = delta * self.pan_speed;

        let (right, up) = screen_axes(camera.position, self.target);
        self.pan_offset += right * (-2.0 * delta.x * target_distance / viewport_height);
        self.pan_offset += up * (2.0 * delta.y * target_distance / viewport_height);
    }

    /// `scroll > 0` moves toward the target.
    pub fn dolly(&mut self, scroll: f32) {
        if scroll == 0.0 {
            return;
        }
        let step = 0.95f32.powf(self.zoom_speed);
        if scroll > 0.0 {
            self.scale *= step;
        } else {
            self.scale /= step;
        }
    }

    /// Apply one tick of pending motion to `camera`.
    pub fn update(&mut self, camera: &mut PerspectiveCamera) {
        let mut spherical = Spherical::from_offset(camera.position - self.target);

        spherical.theta += self.spherical_delta.theta * self.damping_factor;
        spherical.phi += self.spherical_delta.phi * self.damping_factor;
        spherical.phi = spherical.phi.clamp(POLAR_EPS, PI - POLAR_EPS);
        spherical.radius = (spherical.radius * self.scale).max(MIN_RADIUS);

        self.target += self.pan_offset * self.damping_factor;
        camera.position = self.target + spherical.to_offset();

        let decay = 1.0 - self.damping_factor;
        self.spherical_delta.theta *= decay;
        self.spherical_delta.phi *= decay;
        self.pan_offset *= decay;
        self.scale = 1.0;
    }

    /// Drop any motion still in flight.
    pub fn stop(&mut self) {
        self.spherical_delta = Spherical::default();
        self.pan_offset = Vec3::ZERO;
        self.scale = 1.0;
    }
}

/// Camera right and up vectors for a Y-up look-at.
fn screen_axes(position: Vec3, target: Vec3) -> (Vec3, Vec3) {
    let forward = (target - position).normalize_or_zero();
    let right = forward.cross(Vec3::Y).normalize_or_zero();
    let right = if right == Vec3::ZERO { Vec3::X } else { right };
    (right, right.cross(forward))
}

/// Camera plus controls plus the home pose restored by reset.
#[derive(Debug, Clone)]
pub struct CameraRig {
    pub camera: PerspectiveCamera,
    pub controls: OrbitControls,
    home_position: Vec3,
    home_target: Vec3,
    frame_margin: f32,
}

impl CameraRig {
    pub fn new(config: &CameraConfig) -> Self {
        let home_position = Vec3::from(config.position);
        let home_target = Vec3::from(config.target);
        Self {
            camera: PerspectiveCamera {
                fov_y_deg: config.fov_deg,
                aspect: 1.0,
                near: config.near,
                far: config.far,
                position: home_position,
            },
            controls: OrbitControls::new(home_target, config),
            home_position,
            home_target,
            frame_margin: config.frame_margin,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.camera.position
    }

    pub fn target(&self) -> Vec3 {
        self.controls.target
    }

    /// Fit the camera to `bounds`. Returns false and changes nothing when
    /// the box is empty or has no extent.
    pub fn fit_to_bounds(&mut self, bounds: &Aabb) -> bool {
        if bounds.is_empty() {
            return false;
        }
        let size = bounds.size();
        let max_dim = bounds.max_dimension();
        if !(max_dim > f32::EPSILON) {
            return false;
        }

        let center = bounds.center();
        let half_fov = self.camera.fov_y_deg.to_radians() * 0.5;
        let distance = (max_dim / half_fov.tan()).abs() * self.frame_margin;

        self.camera.position = Vec3::new(center.x, center.y + size.y * 0.2, center.z + distance);
        self.controls.target = center;
        self.controls.stop();
        true
    }

    /// Back to the startup pose, whatever was framed since.
    pub fn reset(&mut self) {
        self.camera.position = self.home_position;
        self.controls.target = self.home_target;
        self.controls.stop();
    }

    pub fn update(&mut self) {
        self.controls.update(&mut self.camera);
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.camera.position, self.controls.target, Vec3::Y)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.camera.projection() * self.view()
    }
}
