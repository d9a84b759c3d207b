//! Configuration parsing and management for the VRM viewer

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ViewerError};

/// Environment variable that points at an explicit config file.
pub const CONFIG_ENV: &str = "VRM_VIEWER_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub camera: CameraConfig,
    pub scene: SceneConfig,
    pub instance: InstanceConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ViewerError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ViewerError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration, preferring an explicit path, then `$VRM_VIEWER_CONFIG`,
    /// then the default search paths.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ViewerError> {
        if let Some(path) = explicit {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            let path = PathBuf::from(path);
            tracing::info!("Loading config from ${}: {}", CONFIG_ENV, path.display());
            return Self::from_file(path);
        }

        let paths = [PathBuf::from("config.toml"), dirs_path().join("config.toml")];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ViewerError> {
        if self.window.width <= 0.0 || self.window.height <= 0.0 {
            return Err(invalid("window.width", "Window size must be positive"));
        }

        let cam = &self.camera;
        if !(cam.fov_deg > 0.0 && cam.fov_deg < 180.0) {
            return Err(invalid("camera.fov_deg", "Field of view must be in (0, 180)"));
        }
        if cam.near <= 0.0 {
            return Err(invalid("camera.near", "Near plane must be greater than 0"));
        }
        if cam.far <= cam.near {
            return Err(invalid("camera.far", "Far plane must be beyond the near plane"));
        }
        if !(cam.damping_factor > 0.0 && cam.damping_factor <= 1.0) {
            return Err(invalid(
                "camera.damping_factor",
                "Damping factor must be in (0, 1]",
            ));
        }
        if cam.frame_margin < 1.0 {
            return Err(invalid(
                "camera.frame_margin",
                "Frame margin must be at least 1.0",
            ));
        }

        if self.scene.grid_divisions == 0 {
            return Err(invalid("scene.grid_divisions", "Grid needs at least one division"));
        }
        if self.scene.grid_size <= 0.0 {
            return Err(invalid("scene.grid_size", "Grid size must be positive"));
        }
        if self.scene.max_pixel_ratio < 1.0 {
            return Err(invalid(
                "scene.max_pixel_ratio",
                "Pixel ratio cap must be at least 1.0",
            ));
        }

        let name = &self.instance.name;
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(invalid(
                "instance.name",
                "Instance name must be non-empty and contain no path separators",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ViewerError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Main window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    /// Initial inner size in logical points
    pub width: f32,
    pub height: f32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "VRM Viewer".to_string(),
            width: 1200.0,
            height: 800.0,
        }
    }
}

/// Camera and orbit-control settings. `position`/`target` are also the values
/// restored by "Reset camera".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Vertical field of view in degrees
    pub fov_deg: f32,
    pub near: f32,
    pub far: f32,
    pub position: [f32; 3],
    pub target: [f32; 3],
    /// Orbit damping factor (fraction of pending motion applied per tick)
    pub damping_factor: f32,
    /// Multiplier applied to the auto-frame distance
    pub frame_margin: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_deg: 45.0,
            near: 0.1,
            far: 1000.0,
            position: [0.0, 1.4, 2.2],
            target: [0.0, 1.4, 0.0],
            damping_factor: 0.05,
            frame_margin: 1.2,
            rotate_speed: 1.0,
            zoom_speed: 1.0,
            pan_speed: 1.0,
        }
    }
}

/// Scene look and per-frame behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Background colour as 0xRRGGBB (sRGB)
    pub background: u32,
    pub sky_color: u32,
    pub ground_color: u32,
    pub hemisphere_intensity: f32,
    pub light_color: u32,
    pub light_intensity: f32,
    /// Direction the key light shines from
    pub light_position: [f32; 3],
    pub grid_size: f32,
    pub grid_divisions: u32,
    pub grid_center_color: u32,
    pub grid_color: u32,
    /// Upper bound on device pixels per point for the offscreen target
    pub max_pixel_ratio: f32,
    /// Simulate hair/cloth spring bones
    pub spring_bones: bool,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            background: 0x1e1e1e,
            sky_color: 0xffffff,
            ground_color: 0x444444,
            hemisphere_intensity: 1.0,
            light_color: 0xffffff,
            light_intensity: 1.5,
            light_position: [1.0, 1.0, 1.0],
            grid_size: 10.0,
            grid_divisions: 10,
            grid_center_color: 0x444444,
            grid_color: 0x333333,
            max_pixel_ratio: 2.0,
            spring_bones: true,
        }
    }
}

/// Single-instance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Enforce one running viewer and forward later launches to it
    pub enabled: bool,
    /// Endpoint name (socket file stem / pipe name)
    pub name: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "vrm-viewer".to_string(),
        }
    }
}

/// Get the platform-specific configuration directory
fn dirs_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(config_dir).join("vrm-viewer");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/vrm-viewer");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/vrm-viewer");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("vrm-viewer");
        }
    }

    PathBuf::from(".")
}
