//! Per-frame posing of a loaded model: expressions, spring bones, skinning.

use std::collections::HashMap;

use super::bounds::Aabb;
use super::expression;
use super::loader::VrmModel;
use super::skinning::{self, PosedPrimitive};
use super::spring_bone::SpringBoneSimulator;

/// World-space vertices for every mesh, indexed like `model.meshes`.
#[derive(Debug, Clone, Default)]
pub struct Pose {
    pub meshes: Vec<Vec<PosedPrimitive>>,
}

impl Pose {
    /// The bind pose, with no expressions and no spring motion.
    pub fn rest(model: &VrmModel) -> Self {
        let world = skinning::compute_world_transforms(model, &HashMap::new());
        let meshes = model
            .meshes
            .iter()
            .enumerate()
            .map(|(i, mesh)| skinning::pose_mesh(model, i, &skinning::base_positions(mesh), &world))
            .collect();
        Self { meshes }
    }

    pub fn bounds(&self) -> Aabb {
        let mut bounds = Aabb::empty();
        for prim in self.meshes.iter().flatten() {
            bounds.union(&Aabb::from_points(&prim.positions));
        }
        bounds
    }
}

/// Animation state for one loaded model.
pub struct Animator {
    springs: Option<SpringBoneSimulator>,
    expression_weights: Vec<f32>,
}

impl Animator {
    pub fn new(model: &VrmModel, spring_bones: bool) -> Self {
        let springs = if spring_bones {
            SpringBoneSimulator::new(model)
        } else {
            None
        };
        let expression_count = model.rig.as_ref().map_or(0, |r| r.expressions.len());
        Self {
            springs,
            expression_weights: vec![0.0; expression_count],
        }
    }

    pub fn has_springs(&self) -> bool {
        self.springs.is_some()
    }

    pub fn expression_weights(&self) -> &[f32] {
        &self.expression_weights
    }

    /// Ignored for an index past the model's expressions.
    pub fn set_expression_weight(&mut self, index: usize, weight: f32) {
        if let Some(w) = self.expression_weights.get_mut(index) {
            *w = weight.clamp(0.0, 1.0);
        }
    }

    /// Advance by `dt` seconds and pose the model.
    pub fn update(&mut self, model: &VrmModel, dt: f32) -> Pose {
        let rest_world = skinning::compute_world_transforms(model, &HashMap::new());
        let world = match &mut self.springs {
            Some(springs) => {
                let rotations = springs.step(model, &rest_world, dt, 1.0);
                if rotations.is_empty() {
                    rest_world
                } else {
                    skinning::compute_world_transforms(model, &rotations)
                }
            }
            None => rest_world,
        };

        let morph_weights = expression::morph_weights(model, &self.expression_weights);
        let meshes = model
            .meshes
            .iter()
            .enumerate()
            .map(|(i, mesh)| {
                let positions = match morph_weights.get(i) {
                    Some(w) if w.iter().any(|&x| x > 0.0) => skinning::morph_positions(mesh, w),
                    _ => skinning::base_positions(mesh),
                };
                skinning::pose_mesh(model, i, &positions, &world)
            })
            .collect();

        Pose { meshes }
    }

    /// Clear expressions and settle the spring bones.
    pub fn reset(&mut self, model: &VrmModel) {
        self.expression_weights.iter_mut().for_each(|w| *w = 0.0);
        if let Some(springs) = &mut self.springs {
            springs.reset(model);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vrm::fixtures;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn test_rest_pose_bounds() {
        let model = VrmModel::from_slice(&fixtures::triangle(None)).unwrap();
        let bounds = Pose::rest(&model).bounds();
        assert_eq!(bounds.min, glam::Vec3::ZERO);
        assert_eq!(bounds.max, glam::Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_bounds_span_every_mesh() {
        use glam::Vec3;
        let prim = |positions: Vec<Vec3>| PosedPrimitive {
            normals: vec![Vec3::Z; positions.len()],
            positions,
        };
        let pose = Pose {
            meshes: vec![
                vec![prim(vec![Vec3::ZERO, Vec3::ONE])],
                vec![],
                vec![prim(vec![]), prim(vec![Vec3::new(-2.0, 0.5, 3.0)])],
            ],
        };
        let bounds = pose.bounds();
        assert_eq!(bounds.min, Vec3::new(-2.0, 0.0, 0.0));
        assert_eq!(bounds.max, Vec3::new(1.0, 1.0, 3.0));
        assert_eq!(bounds.max_dimension(), 3.0);
    }

    #[test]
    fn test_vrm0_bounds_are_turned() {
        let ext = fixtures::vrm0_extension();
        let model = VrmModel::from_slice(&fixtures::triangle(Some(ext))).unwrap();
        let bounds = Pose::rest(&model).bounds();
        assert_relative_eq!(bounds.min.x, -1.0, epsilon = 1e-5);
        assert_relative_eq!(bounds.max.x, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_expression_weight_moves_vertices() {
        let ext = fixtures::vrm1_extension(json!({
            "surprised": {"morphTargetBinds": [{"node": 0, "index": 0, "weight": 1.0}]}
        }));
        let model = VrmModel::from_slice(&fixtures::morph_triangle(Some(ext))).unwrap();
        let mut animator = Animator::new(&model, true);
        assert!(!animator.has_springs());
        assert_eq!(animator.expression_weights().len(), 1);

        animator.set_expression_weight(0, 2.0);
        assert_eq!(animator.expression_weights(), &[1.0]);
        let pose = animator.update(&model, 1.0 / 60.0);
        assert_relative_eq!(pose.meshes[0][0].positions[0].z, 1.0, epsilon = 1e-5);

        animator.reset(&model);
        let pose = animator.update(&model, 1.0 / 60.0);
        assert_relative_eq!(pose.meshes[0][0].positions[0].z, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_out_of_range_expression_is_ignored() {
        let model = VrmModel::from_slice(&fixtures::triangle(None)).unwrap();
        let mut animator = Animator::new(&model, true);
        animator.set_expression_weight(3, 1.0);
        assert!(animator.expression_weights().is_empty());
    }
}
