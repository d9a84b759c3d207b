//! CPU posing: forward kinematics, morph targets and linear blend skinning.

use std::collections::HashMap;

use glam::{Mat3, Mat4, Quat, Vec3};

use super::loader::{MeshData, VrmModel};

/// World-space vertices of one primitive.
#[derive(Debug, Clone, Default)]
pub struct PosedPrimitive {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
}

/// Local transform of `node`, with an optional rotation override.
pub fn local_transform(model: &VrmModel, node: usize, rotation: Option<Quat>) -> Mat4 {
    Mat4::from_scale_rotation_translation(
        model.rest_scales[node],
        rotation.unwrap_or(model.rest_rotations[node]),
        model.rest_translations[node],
    )
}

/// World transforms for every node. `local_rotations` overrides rest-pose
/// rotations (node index → rotation).
pub fn compute_world_transforms(model: &VrmModel, local_rotations: &HashMap<usize, Quat>) -> Vec<Mat4> {
    let mut world = vec![Mat4::IDENTITY; model.node_count];
    let mut computed = vec![false; model.node_count];

    for i in 0..model.node_count {
        compute_node(model, local_rotations, &mut world, &mut computed, i);
    }
    world
}

fn compute_node(
    model: &VrmModel,
    local_rotations: &HashMap<usize, Quat>,
    world: &mut [Mat4],
    computed: &mut [bool],
    idx: usize,
) {
    if computed[idx] {
        return;
    }

    let local = local_transform(model, idx, local_rotations.get(&idx).copied());
    world[idx] = match model.parents[idx] {
        Some(parent) => {
            compute_node(model, local_rotations, world, computed, parent);
            world[parent] * local
        }
        None => model.root_transform * local,
    };
    computed[idx] = true;
}

/// Base positions with morph targets applied at `weights`.
pub fn morph_positions(mesh: &MeshData, weights: &[f32]) -> Vec<Vec<Vec3>> {
    mesh.primitives
        .iter()
        .zip(&mesh.morph_deltas)
        .map(|(prim, targets)| {
            let mut morphed = prim.positions.clone();
            for (deltas, &weight) in targets.iter().zip(weights) {
                if weight < 0.001 || deltas.len() != morphed.len() {
                    continue;
                }
                for (v, delta) in morphed.iter_mut().zip(deltas) {
                    *v += *delta * weight;
                }
            }
            morphed
        })
        .collect()
}

/// Unmorphed positions of a mesh.
pub fn base_positions(mesh: &MeshData) -> Vec<Vec<Vec3>> {
    mesh.primitives.iter().map(|p| p.positions.clone()).collect()
}

/// Transform a mesh's (possibly morphed) positions into world space.
///
/// Skinned meshes follow their joints; the instancing node's transform is
/// ignored for them. Unskinned meshes follow the node that instances them.
pub fn pose_mesh(
    model: &VrmModel,
    mesh_idx: usize,
    positions_per_prim: &[Vec<Vec3>],
    world: &[Mat4],
) -> Vec<PosedPrimitive> {
    let mesh = &model.meshes[mesh_idx];

    let node_world = model
        .mesh_nodes
        .get(&mesh_idx)
        .and_then(|&n| world.get(n).copied())
        .unwrap_or(model.root_transform);

    let joint_matrices: Option<Vec<Mat4>> = model
        .mesh_skin
        .get(&mesh_idx)
        .and_then(|&s| model.skins.get(s))
        .map(|skin| {
            skin.joints
                .iter()
                .zip(&skin.inverse_bind_matrices)
                .map(|(&node, ibm)| world.get(node).copied().unwrap_or(Mat4::IDENTITY) * *ibm)
                .collect()
        });

    mesh.primitives
        .iter()
        .zip(positions_per_prim)
        .map(|(prim, positions)| match &joint_matrices {
            Some(joints) => {
                let mut posed = PosedPrimitive {
                    positions: Vec::with_capacity(positions.len()),
                    normals: Vec::with_capacity(positions.len()),
                };
                for (v, pos) in positions.iter().enumerate() {
                    let m = blend_matrix(joints, prim.joints[v], prim.weights[v]).unwrap_or(node_world);
                    posed.positions.push(m.transform_point3(*pos));
                    posed
                        .normals
                        .push(m.transform_vector3(prim.normals[v]).normalize_or_zero());
                }
                posed
            }
            None => {
                let normal_matrix = Mat3::from_mat4(node_world).inverse().transpose();
                PosedPrimitive {
                    positions: positions.iter().map(|p| node_world.transform_point3(*p)).collect(),
                    normals: prim
                        .normals
                        .iter()
                        .map(|n| (normal_matrix * *n).normalize_or_zero())
                        .collect(),
                }
            }
        })
        .collect()
}

/// Weighted sum of joint matrices, or `None` for a vertex with no usable weight.
fn blend_matrix(joints: &[Mat4], indices: [u16; 4], weights: [f32; 4]) -> Option<Mat4> {
    let mut blended = Mat4::ZERO;
    let mut total = 0.0;
    for k in 0..4 {
        if weights[k] < 0.0001 {
            continue;
        }
        if let Some(jm) = joints.get(indices[k] as usize) {
            blended += *jm * weights[k];
            total += weights[k];
        }
    }
    (total > 0.0001).then_some(blended)
}
