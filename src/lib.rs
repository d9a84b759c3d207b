//! VRM Viewer - desktop viewer for VRM avatar models
//!
//! The application is split along a capability boundary:
//! - [`shell`] owns the window lifecycle, single-instance policy, file-open
//!   routing and the only filesystem reads the viewer can reach
//! - [`bridge`] is the narrow channel between the two sides
//! - [`ui`] owns the scene, the loaded model and the render loop
//! - [`vrm`] decodes binary glTF/VRM payloads and animates them on the CPU

pub mod bridge;
pub mod config;
pub mod error;
pub mod shell;
pub mod ui;
pub mod vrm;

pub use config::Config;
pub use error::{LoadError, Result, ViewerError};

/// File extension of model files, without the dot.
pub const MODEL_EXTENSION: &str = "vrm";

/// True when `name` ends in `.vrm`, ignoring ASCII case.
pub fn has_model_extension(name: &str) -> bool {
    let suffix = b".vrm";
    let bytes = name.as_bytes();
    bytes.len() >= suffix.len() && bytes[bytes.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_extension_matching() {
        assert!(has_model_extension("avatar.vrm"));
        assert!(has_model_extension("C:\\Models\\Avatar.VRM"));
        assert!(has_model_extension("/home/me/a.Vrm"));
        assert!(!has_model_extension("avatar.vrm.bak"));
        assert!(!has_model_extension("avatar.glb"));
        assert!(!has_model_extension("vrm"));
        assert!(!has_model_extension(""));
    }

    #[test]
    fn test_multibyte_names_do_not_panic() {
        assert!(has_model_extension("アバター.vrm"));
        assert!(!has_model_extension("é"));
    }
}
