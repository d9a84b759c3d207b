//! VRM / glTF model decoding and CPU animation.

pub mod animator;
pub mod bounds;
pub mod expression;
pub mod glb;
pub mod loader;
pub mod rig;
pub mod skinning;
pub mod spring_bone;

#[cfg(test)]
pub(crate) mod fixtures;

pub use animator::{Animator, Pose};
pub use bounds::Aabb;
pub use loader::VrmModel;
pub use rig::{RigMetadata, RigVersion};
