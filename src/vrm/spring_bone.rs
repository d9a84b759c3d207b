//! Verlet spring bones for secondary motion (hair, skirts, accessories).
//!
//! Each joint keeps a simulated tail point. Per step the tail gets inertia,
//! a pull back toward the rest direction, gravity, then is held at bone
//! length and pushed out of sphere/capsule colliders.

use std::collections::HashMap;

use glam::{Mat3, Mat4, Quat, Vec3};
use tracing::debug;

use super::loader::VrmModel;
use super::rig::ColliderShape;
use super::skinning;

/// Tail length for a chain end with no child to aim at.
const SYNTHETIC_TAIL: f32 = 0.07;
/// Longest step simulated; frame spikes beyond this are clamped.
const MAX_STEP: f32 = 0.05;
const COLLISION_PASSES: usize = 3;

struct JointState {
    node: usize,
    prev_tail: Vec3,
    current_tail: Vec3,
    bone_length: f32,
    /// Rest direction to the tail, in the joint's local space
    bone_axis: Vec3,
    stiffness: f32,
    gravity_power: f32,
    gravity_dir: Vec3,
    drag_force: f32,
    hit_radius: f32,
}

struct ChainState {
    joints: Vec<JointState>,
    collider_group_indices: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
enum WorldCollider {
    Sphere { center: Vec3, radius: f32 },
    Capsule { start: Vec3, end: Vec3, radius: f32 },
}

pub struct SpringBoneSimulator {
    chains: Vec<ChainState>,
    colliders: Vec<(usize, ColliderShape)>,
    collider_groups: Vec<Vec<usize>>,
}

impl SpringBoneSimulator {
    /// `None` when the model has no rig or no usable spring joints.
    pub fn new(model: &VrmModel) -> Option<Self> {
        let rig = model.rig.as_ref()?;
        if rig.spring_chains.is_empty() {
            return None;
        }

        let rest_world = skinning::compute_world_transforms(model, &HashMap::new());

        let mut chains = Vec::new();
        for chain in &rig.spring_chains {
            let joints: Vec<JointState> = chain
                .joints
                .iter()
                .enumerate()
                .filter_map(|(i, joint)| {
                    let next = chain.joints.get(i + 1).map(|j| j.node);
                    let (bone_length, bone_axis) = bone_tail(model, joint.node, next, &rest_world)?;
                    let tail = tail_position(&rest_world[joint.node], bone_axis, bone_length);
                    Some(JointState {
                        node: joint.node,
                        prev_tail: tail,
                        current_tail: tail,
                        bone_length,
                        bone_axis,
                        stiffness: joint.stiffness,
                        gravity_power: joint.gravity_power,
                        gravity_dir: joint.gravity_dir,
                        drag_force: joint.drag_force,
                        hit_radius: joint.hit_radius,
                    })
                })
                .collect();

            if !joints.is_empty() {
                chains.push(ChainState {
                    joints,
                    collider_group_indices: chain.collider_group_indices.clone(),
                });
            }
        }

        if chains.is_empty() {
            return None;
        }

        let colliders: Vec<(usize, ColliderShape)> =
            rig.spring_colliders.iter().map(|c| (c.node, c.shape)).collect();
        debug!(
            "Spring bones: {} chains, {} colliders",
            chains.len(),
            colliders.len()
        );

        Some(Self {
            chains,
            colliders,
            collider_groups: rig
                .collider_groups
                .iter()
                .map(|g| g.collider_indices.clone())
                .collect(),
        })
    }

    /// Advance by `dt` seconds against the frame's `world` transforms.
    ///
    /// Returns local rotations (node → rotation) for every joint that moved.
    pub fn step(
        &mut self,
        model: &VrmModel,
        world: &[Mat4],
        dt: f32,
        gravity_scale: f32,
    ) -> HashMap<usize, Quat> {
        let dt = dt.min(MAX_STEP);
        if dt < 1e-6 {
            return HashMap::new();
        }

        let world_colliders: Vec<WorldCollider> = self
            .colliders
            .iter()
            .map(|(node, shape)| resolve_collider(world[*node], shape))
            .collect();

        let mut rotations = HashMap::new();
        let mut current_world = world.to_vec();

        for chain in &mut self.chains {
            let chain_colliders: Vec<WorldCollider> = chain
                .collider_group_indices
                .iter()
                .filter_map(|&gi| self.collider_groups.get(gi))
                .flatten()
                .filter_map(|&ci| world_colliders.get(ci).copied())
                .collect();

            for joint in &mut chain.joints {
                let parent_world = parent_world(model, &current_world, joint.node);
                // Parents earlier in the chain may have moved this frame.
                current_world[joint.node] =
                    parent_world * skinning::local_transform(model, joint.node, None);

                let world_pos = current_world[joint.node].col(3).truncate();
                let parent_rot = rotation_of(&parent_world);
                let rest_local_rot = model.rest_rotations[joint.node];
                let rest_dir = (parent_rot * rest_local_rot * joint.bone_axis).normalize_or_zero();

                let inertia = (joint.current_tail - joint.prev_tail) * (1.0 - joint.drag_force);
                let stiffness = dt * rest_dir * joint.stiffness;
                let gravity = dt * joint.gravity_dir * joint.gravity_power * gravity_scale;

                let mut next_tail = joint.current_tail + inertia + stiffness + gravity;
                next_tail = constrain_length(next_tail, world_pos, joint.bone_length, rest_dir);

                for _ in 0..COLLISION_PASSES {
                    let mut moved = false;
                    for collider in &chain_colliders {
                        let resolved = resolve_collision(
                            next_tail,
                            joint.hit_radius,
                            collider,
                            world_pos,
                            joint.bone_length,
                        );
                        if resolved != next_tail {
                            next_tail = resolved;
                            moved = true;
                        }
                    }
                    if !moved {
                        break;
                    }
                }

                joint.prev_tail = joint.current_tail;
                joint.current_tail = next_tail;

                let current_dir = (next_tail - world_pos).normalize_or_zero();
                if current_dir.length_squared() > 0.5 && rest_dir.length_squared() > 0.5 {
                    let world_delta = Quat::from_rotation_arc(rest_dir, current_dir);
                    let local_rot = parent_rot.inverse() * world_delta * parent_rot * rest_local_rot;
                    rotations.insert(joint.node, local_rot);
                    current_world[joint.node] =
                        parent_world * skinning::local_transform(model, joint.node, Some(local_rot));
                }
            }
        }

        rotations
    }

    /// Put every tail back at its rest position.
    pub fn reset(&mut self, model: &VrmModel) {
        let rest_world = skinning::compute_world_transforms(model, &HashMap::new());
        for joint in self.chains.iter_mut().flat_map(|c| c.joints.iter_mut()) {
            let tail = tail_position(&rest_world[joint.node], joint.bone_axis, joint.bone_length);
            joint.prev_tail = tail;
            joint.current_tail = tail;
        }
    }

    pub fn joint_count(&self) -> usize {
        self.chains.iter().map(|c| c.joints.len()).sum()
    }
}

fn parent_world(model: &VrmModel, world: &[Mat4], node: usize) -> Mat4 {
    match model.parents[node] {
        Some(parent) => world[parent],
        None => model.root_transform,
    }
}

fn rotation_of(m: &Mat4) -> Quat {
    Quat::from_mat3(&Mat3::from_mat4(*m)).normalize()
}

fn tail_position(joint_world: &Mat4, bone_axis: Vec3, bone_length: f32) -> Vec3 {
    joint_world.col(3).truncate() + rotation_of(joint_world) * bone_axis * bone_length
}

/// Rest length and local-space axis from `node` to its tail.
///
/// The tail is the next chain joint, else the first skeleton child, else a
/// short extension of the parent→node direction.
fn bone_tail(model: &VrmModel, node: usize, next: Option<usize>, rest_world: &[Mat4]) -> Option<(f32, Vec3)> {
    let pos = rest_world[node].col(3).truncate();
    let inv_rot = rotation_of(&rest_world[node]).inverse();

    let toward = |target: usize| -> Option<(f32, Vec3)> {
        let dir = rest_world[target].col(3).truncate() - pos;
        let length = dir.length();
        (length >= 1e-6).then(|| (length, inv_rot * (dir / length)))
    };

    if let Some(next) = next {
        return toward(next);
    }

    if let Some(found) = (0..model.node_count)
        .filter(|&c| model.parents[c] == Some(node))
        .find_map(toward)
    {
        return Some(found);
    }

    let parent = model.parents[node]?;
    let dir = (pos - rest_world[parent].col(3).truncate()).normalize_or_zero();
    (dir.length_squared() > 0.5).then(|| (SYNTHETIC_TAIL, inv_rot * dir))
}

fn resolve_collider(node_world: Mat4, shape: &ColliderShape) -> WorldCollider {
    let pos = node_world.col(3).truncate();
    let rot = rotation_of(&node_world);
    match *shape {
        ColliderShape::Sphere { offset, radius } => WorldCollider::Sphere {
            center: pos + rot * offset,
            radius,
        },
        ColliderShape::Capsule { offset, tail, radius } => WorldCollider::Capsule {
            start: pos + rot * offset,
            end: pos + rot * tail,
            radius,
        },
    }
}

fn constrain_length(tail: Vec3, origin: Vec3, length: f32, fallback_dir: Vec3) -> Vec3 {
    let to_tail = tail - origin;
    let dist = to_tail.length();
    if dist > 1e-6 {
        origin + (to_tail / dist) * length
    } else {
        origin + fallback_dir * length
    }
}

/// Push `tail` out of `collider`, keeping it at bone length from `origin`.
fn resolve_collision(tail: Vec3, hit_radius: f32, collider: &WorldCollider, origin: Vec3, length: f32) -> Vec3 {
    let (closest, radius) = match *collider {
        WorldCollider::Sphere { center, radius } => (center, radius),
        WorldCollider::Capsule { start, end, radius } => {
            let seg = end - start;
            let seg_len_sq = seg.length_squared();
            let t = if seg_len_sq < 1e-10 {
                0.0
            } else {
                ((tail - start).dot(seg) / seg_len_sq).clamp(0.0, 1.0)
            };
            (start + seg * t, radius)
        }
    };

    let diff = tail - closest;
    let dist = diff.length();
    let min_dist = radius + hit_radius;
    if dist >= min_dist || dist <= 1e-6 {
        return tail;
    }

    let pushed = closest + (diff / dist) * min_dist;
    let to_pushed = pushed - origin;
    let d = to_pushed.length();
    if d > 1e-6 {
        origin + (to_pushed / d) * length
    } else {
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vrm::fixtures;
    use serde_json::json;

    /// Skinned fixture with a one-joint spring on the Hips node pulled along +X.
    fn spring_model(gravity_power: f32) -> VrmModel {
        let mut ext = fixtures::vrm1_extension(json!({}));
        ext["VRMC_springBone"] = json!({
            "specVersion": "1.0",
            "springs": [{
                "name": "tail",
                "joints": [{
                    "node": 2,
                    "stiffness": 0.0,
                    "dragForce": 0.4,
                    "gravityPower": gravity_power,
                    "gravityDir": [1.0, 0.0, 0.0]
                }]
            }]
        });
        VrmModel::from_slice(&fixtures::skinned(Some(ext))).unwrap()
    }

    #[test]
    fn test_no_springs_means_no_simulator() {
        let model = VrmModel::from_slice(&fixtures::skinned(None)).unwrap();
        assert!(SpringBoneSimulator::new(&model).is_none());

        let model = VrmModel::from_slice(&fixtures::skinned(Some(fixtures::vrm1_extension(json!({})))))
            .unwrap();
        assert!(SpringBoneSimulator::new(&model).is_none());
    }

    #[test]
    fn test_gravity_bends_the_joint() {
        let model = spring_model(1.0);
        let mut sim = SpringBoneSimulator::new(&model).unwrap();
        assert_eq!(sim.joint_count(), 1);

        let world = skinning::compute_world_transforms(&model, &HashMap::new());
        let rotations = sim.step(&model, &world, 1.0 / 60.0, 1.0);
        let rot = rotations.get(&2).copied().unwrap();
        // Tail starts straight up and is pulled toward +X: a negative turn about Z.
        let tail_dir = rot * Vec3::Y;
        assert!(tail_dir.x > 0.01, "tail did not swing: {tail_dir:?}");
    }

    #[test]
    fn test_zero_dt_is_a_no_op() {
        let model = spring_model(1.0);
        let mut sim = SpringBoneSimulator::new(&model).unwrap();
        let world = skinning::compute_world_transforms(&model, &HashMap::new());
        assert!(sim.step(&model, &world, 0.0, 1.0).is_empty());
    }

    #[test]
    fn test_reset_returns_tails_to_rest() {
        let model = spring_model(1.0);
        let mut sim = SpringBoneSimulator::new(&model).unwrap();
        let world = skinning::compute_world_transforms(&model, &HashMap::new());
        for _ in 0..10 {
            sim.step(&model, &world, 1.0 / 60.0, 1.0);
        }
        sim.reset(&model);

        let joint = &sim.chains[0].joints[0];
        assert!((joint.current_tail - Vec3::new(0.0, 0.5 + SYNTHETIC_TAIL, 0.0)).length() < 1e-5);
        assert_eq!(joint.current_tail, joint.prev_tail);
    }

    #[test]
    fn test_sphere_collision() {
        let collider = WorldCollider::Sphere {
            center: Vec3::ZERO,
            radius: 0.1,
        };
        let tail = Vec3::new(0.05, 0.0, 0.0);
        let origin = Vec3::new(0.0, -0.3, 0.0);
        let result = resolve_collision(tail, 0.01, &collider, origin, 0.35);
        assert!(result.length() > tail.length());
    }

    #[test]
    fn test_capsule_collision() {
        let collider = WorldCollider::Capsule {
            start: Vec3::new(0.0, -0.5, 0.0),
            end: Vec3::new(0.0, 0.5, 0.0),
            radius: 0.1,
        };
        let tail = Vec3::new(0.05, 0.0, 0.0);
        let origin = Vec3::new(0.0, -0.3, 0.0);
        let result = resolve_collision(tail, 0.01, &collider, origin, 0.35);
        assert!(result.x.abs() > tail.x.abs());
    }

    #[test]
    fn test_point_outside_collider_is_untouched() {
        let collider = WorldCollider::Sphere {
            center: Vec3::ZERO,
            radius: 0.1,
        };
        let tail = Vec3::new(0.5, 0.0, 0.0);
        assert_eq!(resolve_collision(tail, 0.0, &collider, Vec3::ZERO, 0.5), tail);
    }
}
