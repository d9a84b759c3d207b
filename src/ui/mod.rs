//! The viewer side: scene, camera, displayed model and render loop.
//!
//! Everything here reaches the filesystem only through [`crate::bridge`].

mod app;
pub mod camera;
pub mod input;
pub mod loading;
pub mod renderer;
pub mod stage;
mod viewport;

pub use app::ViewerApp;
