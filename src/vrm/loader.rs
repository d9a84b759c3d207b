//! Binary glTF / VRM decoding using the `gltf` crate.
//!
//! Extracts meshes, morph target deltas, the node hierarchy, skins and
//! textures, then applies the rig post-processing policy: unused skin joints
//! are pruned and 0.x rigs are turned to face +Z.

use std::collections::HashMap;

use glam::{Mat4, Quat, Vec3};
use tracing::{debug, info, warn};

use super::glb;
use super::rig::{RigMetadata, RigVersion};
use crate::error::LoadError;

/// A decoded model ready for CPU skinning and GPU upload.
pub struct VrmModel {
    pub meshes: Vec<MeshData>,
    /// Node index → rest-pose local transform
    pub rest_translations: Vec<Vec3>,
    pub rest_rotations: Vec<Quat>,
    pub rest_scales: Vec<Vec3>,
    /// Child node → parent node (None for roots)
    pub parents: Vec<Option<usize>>,
    pub node_count: usize,
    pub skins: Vec<SkinData>,
    /// mesh index → skin index
    pub mesh_skin: HashMap<usize, usize>,
    /// mesh index → first node instancing it
    pub mesh_nodes: HashMap<usize, usize>,
    /// Applied above every root node
    pub root_transform: Mat4,
    /// Decoded base color images, indexed like the document's images
    pub textures: Vec<TextureImage>,
    /// Present for VRM models, absent for plain glTF scenes
    pub rig: Option<RigMetadata>,
}

pub struct SkinData {
    pub joints: Vec<usize>,
    pub inverse_bind_matrices: Vec<Mat4>,
}

pub struct MeshData {
    pub name: Option<String>,
    pub primitives: Vec<PrimitiveData>,
    /// morph_deltas[prim][target] = per-vertex position deltas
    pub morph_deltas: Vec<Vec<Vec<Vec3>>>,
}

impl MeshData {
    pub fn morph_target_count(&self) -> usize {
        self.morph_deltas.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// RGBA8, sRGB encoded.
pub struct TextureImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlphaMode {
    Opaque,
    Mask(f32),
    Blend,
}

pub struct PrimitiveData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
    /// Four joint indices per vertex, into the mesh's skin
    pub joints: Vec<[u16; 4]>,
    pub weights: Vec<[f32; 4]>,
    pub uvs: Vec<[f32; 2]>,
    /// Linear RGBA
    pub base_color: [f32; 4],
    /// Index into [`VrmModel::textures`]
    pub texture: Option<usize>,
    pub alpha_mode: AlphaMode,
}

fn decode_error(err: gltf::Error) -> LoadError {
    use gltf::json::validation::Error as Validation;

    match &err {
        gltf::Error::ExternalReferenceInSliceImport | gltf::Error::UnsupportedScheme => {
            LoadError::UnsupportedFeature(err.to_string())
        }
        gltf::Error::Validation(errors)
            if errors.iter().any(|(_, e)| matches!(e, Validation::Unsupported)) =>
        {
            LoadError::UnsupportedFeature(err.to_string())
        }
        _ => LoadError::MalformedPayload(err.to_string()),
    }
}

impl VrmModel {
    /// Decode a model from the full contents of a `.vrm` / `.glb` file.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, LoadError> {
        let root = glb::parse_root(bytes)?;
        glb::check_required_extensions(&root)?;

        let gltf::Gltf { document, blob } = gltf::Gltf::from_slice(bytes).map_err(decode_error)?;
        let buffers = gltf::import_buffers(&document, None, blob).map_err(decode_error)?;
        let images = match gltf::import_images(&document, None, &buffers) {
            Ok(images) => images,
            Err(e) => {
                warn!("Ignoring textures that failed to decode: {}", e);
                Vec::new()
            }
        };

        let mut model = Self::from_document(&document, &buffers, &images)?;

        let node_meshes: Vec<Option<usize>> =
            document.nodes().map(|n| n.mesh().map(|m| m.index())).collect();
        model.rig = RigMetadata::parse(&root, &node_meshes, model.meshes.len());

        if let Some(rig) = &model.rig {
            info!(
                "{} rig: {} bones, {} expressions, {} spring joints",
                rig.version,
                rig.bone_to_node.len(),
                rig.expressions.len(),
                rig.spring_joint_count()
            );
            model.prune_unused_joints();
            model.normalize_orientation();
        } else {
            debug!("No rig metadata, treating as a plain glTF scene");
        }

        Ok(model)
    }

    fn from_document(
        document: &gltf::Document,
        buffers: &[gltf::buffer::Data],
        images: &[gltf::image::Data],
    ) -> Result<Self, LoadError> {
        let node_count = document.nodes().count();
        let mut parents = vec![None; node_count];
        for node in document.nodes() {
            for child in node.children() {
                parents[child.index()] = Some(node.index());
            }
        }
        check_acyclic(&parents)?;

        let mut rest_translations = Vec::with_capacity(node_count);
        let mut rest_rotations = Vec::with_capacity(node_count);
        let mut rest_scales = Vec::with_capacity(node_count);
        for node in document.nodes() {
            let (t, r, s) = node.transform().decomposed();
            rest_translations.push(Vec3::from(t));
            rest_rotations.push(Quat::from_array(r).normalize());
            rest_scales.push(Vec3::from(s));
        }

        let mut skins = Vec::new();
        for skin in document.skins() {
            let joints: Vec<usize> = skin.joints().map(|j| j.index()).collect();
            let reader = skin.reader(|buffer| buffers.get(buffer.index()).map(|d| &d.0[..]));
            let mut inverse_bind_matrices: Vec<Mat4> = reader
                .read_inverse_bind_matrices()
                .map(|iter| iter.map(|m| Mat4::from_cols_array_2d(&m)).collect())
                .unwrap_or_default();
            inverse_bind_matrices.resize(joints.len(), Mat4::IDENTITY);
            skins.push(SkinData {
                joints,
                inverse_bind_matrices,
            });
        }

        let mut mesh_skin = HashMap::new();
        let mut mesh_nodes = HashMap::new();
        for node in document.nodes() {
            if let Some(mesh) = node.mesh() {
                mesh_nodes.entry(mesh.index()).or_insert(node.index());
                if let Some(skin) = node.skin() {
                    mesh_skin.insert(mesh.index(), skin.index());
                }
            }
        }

        let textures: Vec<TextureImage> = images
            .iter()
            .map(|img| TextureImage {
                pixels: convert_to_rgba8(img),
                width: img.width,
                height: img.height,
            })
            .collect();

        let mut meshes = Vec::new();
        for mesh in document.meshes() {
            let mut primitives = Vec::new();
            let mut morph_deltas = Vec::new();

            for prim in mesh.primitives() {
                if prim.mode() != gltf::mesh::Mode::Triangles {
                    debug!(
                        "Skipping {:?} primitive in mesh {}",
                        prim.mode(),
                        mesh.index()
                    );
                    continue;
                }
                let data = read_primitive(&prim, buffers, textures.len())?;
                morph_deltas.push(read_morph_deltas(&prim, buffers, data.positions.len()));
                primitives.push(data);
            }

            meshes.push(MeshData {
                name: mesh.name().map(str::to_string),
                primitives,
                morph_deltas,
            });
        }

        Ok(Self {
            meshes,
            rest_translations,
            rest_rotations,
            rest_scales,
            parents,
            node_count,
            skins,
            mesh_skin,
            mesh_nodes,
            root_transform: Mat4::IDENTITY,
            textures,
            rig: None,
        })
    }

    /// Drop skin joints that no vertex of the skin's meshes is weighted to,
    /// remapping vertex joint indices to the shortened joint list.
    pub fn prune_unused_joints(&mut self) {
        for skin_idx in 0..self.skins.len() {
            let mut users: Vec<usize> = self
                .mesh_skin
                .iter()
                .filter(|(_, s)| **s == skin_idx)
                .map(|(m, _)| *m)
                .collect();
            users.sort_unstable();
            if users.is_empty() {
                continue;
            }

            let joint_count = self.skins[skin_idx].joints.len();
            let mut used = vec![false; joint_count];
            for &mesh in &users {
                for prim in &self.meshes[mesh].primitives {
                    for (joints, weights) in prim.joints.iter().zip(&prim.weights) {
                        for k in 0..4 {
                            let j = joints[k] as usize;
                            if weights[k] > 0.0 && j < joint_count {
                                used[j] = true;
                            }
                        }
                    }
                }
            }

            let kept = used.iter().filter(|&&u| u).count();
            if kept == 0 || kept == joint_count {
                continue;
            }

            let skin = &mut self.skins[skin_idx];
            let mut remap = vec![None; joint_count];
            let mut joints = Vec::with_capacity(kept);
            let mut inverse_bind_matrices = Vec::with_capacity(kept);
            for old in (0..joint_count).filter(|&j| used[j]) {
                remap[old] = Some(joints.len() as u16);
                joints.push(skin.joints[old]);
                inverse_bind_matrices.push(skin.inverse_bind_matrices[old]);
            }
            skin.joints = joints;
            skin.inverse_bind_matrices = inverse_bind_matrices;

            for &mesh in &users {
                for prim in &mut self.meshes[mesh].primitives {
                    for (joints, weights) in prim.joints.iter_mut().zip(prim.weights.iter_mut()) {
                        for k in 0..4 {
                            match remap.get(joints[k] as usize).copied().flatten() {
                                Some(new) if weights[k] > 0.0 => joints[k] = new,
                                _ => {
                                    joints[k] = 0;
                                    weights[k] = 0.0;
                                }
                            }
                        }
                    }
                }
            }

            debug!(
                "Skin {}: pruned {} of {} joints",
                skin_idx,
                joint_count - kept,
                joint_count
            );
        }
    }

    /// Turn 0.x rigs (which face -Z) around so every model faces +Z.
    pub fn normalize_orientation(&mut self) {
        if matches!(&self.rig, Some(rig) if rig.version == RigVersion::V0) {
            self.root_transform = Mat4::from_rotation_y(std::f32::consts::PI);
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.meshes
            .iter()
            .flat_map(|m| &m.primitives)
            .map(|p| p.positions.len())
            .sum()
    }

    pub fn triangle_count(&self) -> usize {
        self.meshes
            .iter()
            .flat_map(|m| &m.primitives)
            .map(|p| p.indices.len() / 3)
            .sum()
    }
}

fn check_acyclic(parents: &[Option<usize>]) -> Result<(), LoadError> {
    for start in 0..parents.len() {
        let mut node = start;
        let mut steps = 0;
        while let Some(parent) = parents[node] {
            steps += 1;
            if steps > parents.len() {
                return Err(LoadError::MalformedPayload(
                    "node hierarchy contains a cycle".into(),
                ));
            }
            node = parent;
        }
    }
    Ok(())
}

fn read_primitive(
    prim: &gltf::Primitive,
    buffers: &[gltf::buffer::Data],
    texture_count: usize,
) -> Result<PrimitiveData, LoadError> {
    let reader = prim.reader(|buffer| buffers.get(buffer.index()).map(|d| &d.0[..]));

    let positions: Vec<Vec3> = reader
        .read_positions()
        .map(|iter| iter.map(Vec3::from).collect())
        .unwrap_or_default();
    let vertex_count = positions.len();

    let indices: Vec<u32> = reader
        .read_indices()
        .map(|iter| iter.into_u32().collect())
        .unwrap_or_else(|| (0..vertex_count as u32).collect());
    if indices.iter().any(|&i| i as usize >= vertex_count) {
        return Err(LoadError::MalformedPayload(
            "primitive index out of range".into(),
        ));
    }

    let normals: Vec<Vec3> = match reader.read_normals() {
        Some(iter) => iter.map(Vec3::from).collect(),
        None => compute_normals(&positions, &indices),
    };

    let joints: Vec<[u16; 4]> = reader
        .read_joints(0)
        .map(|iter| iter.into_u16().collect())
        .unwrap_or_else(|| vec![[0; 4]; vertex_count]);
    let weights: Vec<[f32; 4]> = reader
        .read_weights(0)
        .map(|iter| iter.into_f32().collect())
        .unwrap_or_else(|| vec![[1.0, 0.0, 0.0, 0.0]; vertex_count]);
    let uvs: Vec<[f32; 2]> = reader
        .read_tex_coords(0)
        .map(|iter| iter.into_f32().collect())
        .unwrap_or_else(|| vec![[0.0; 2]; vertex_count]);

    if normals.len() != vertex_count
        || joints.len() != vertex_count
        || weights.len() != vertex_count
        || uvs.len() != vertex_count
    {
        return Err(LoadError::MalformedPayload(
            "vertex attribute counts disagree".into(),
        ));
    }

    let material = prim.material();
    let pbr = material.pbr_metallic_roughness();
    let texture = pbr
        .base_color_texture()
        .map(|info| info.texture().source().index())
        .filter(|&i| i < texture_count);
    let alpha_mode = match material.alpha_mode() {
        gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
        gltf::material::AlphaMode::Mask => AlphaMode::Mask(material.alpha_cutoff().unwrap_or(0.5)),
        gltf::material::AlphaMode::Blend => AlphaMode::Blend,
    };

    Ok(PrimitiveData {
        positions,
        normals,
        indices,
        joints,
        weights,
        uvs,
        base_color: pbr.base_color_factor(),
        texture,
        alpha_mode,
    })
}

/// Smooth normals from triangle faces, for primitives that carry none.
fn compute_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let face = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += face;
        normals[b] += face;
        normals[c] += face;
    }
    normals
        .into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Y))
        .collect()
}

/// Position deltas for each morph target of a primitive. Targets without
/// position deltas, or with the wrong length, are empty.
fn read_morph_deltas(
    prim: &gltf::Primitive,
    buffers: &[gltf::buffer::Data],
    vertex_count: usize,
) -> Vec<Vec<Vec3>> {
    let reader = prim.reader(|buffer| buffers.get(buffer.index()).map(|d| &d.0[..]));
    reader
        .read_morph_targets()
        .map(|(positions, _normals, _tangents)| {
            let deltas: Vec<Vec3> = positions
                .map(|iter| iter.map(Vec3::from).collect())
                .unwrap_or_default();
            if deltas.len() == vertex_count {
                deltas
            } else {
                Vec::new()
            }
        })
        .collect()
}

fn convert_to_rgba8(img: &gltf::image::Data) -> Vec<u8> {
    use gltf::image::Format;

    match img.format {
        Format::R8G8B8A8 => img.pixels.clone(),
        Format::R8G8B8 => img
            .pixels
            .chunks_exact(3)
            .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
            .collect(),
        Format::R8G8 => img
            .pixels
            .chunks_exact(2)
            .flat_map(|rg| [rg[0], rg[0], rg[0], rg[1]])
            .collect(),
        Format::R8 => img.pixels.iter().flat_map(|&r| [r, r, r, 255]).collect(),
        other => {
            warn!("Unsupported texture format {:?}, using white", other);
            vec![255u8; (img.width * img.height * 4) as usize]
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
    fn test_plain_gltf_loads_without_rig() {
        let model = VrmModel::from_slice(&fixtures::triangle(None)).unwrap();
        assert!(model.rig.is_none());
        assert_eq!(model.meshes.len(), 1);
        assert_eq!(model.vertex_count(), 3);
        // Indices were generated
        assert_eq!(model.meshes[0].primitives[0].indices, vec![0, 1, 2]);
        assert_eq!(model.root_transform, Mat4::IDENTITY);
    }

    #[test]
    fn test_missing_normals_are_generated() {
        let model = VrmModel::from_slice(&fixtures::triangle(None)).unwrap();
        for n in &model.meshes[0].primitives[0].normals {
            assert_relative_eq!(n.z, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_vrm1_is_not_rotated() {
        let ext = fixtures::vrm1_extension(json!({}));
        let model = VrmModel::from_slice(&fixtures::triangle(Some(ext))).unwrap();
        let rig = model.rig.as_ref().unwrap();
        assert_eq!(rig.version, RigVersion::V1);
        assert_eq!(rig.meta.title.as_deref(), Some("Tester"));
        assert_eq!(model.root_transform, Mat4::IDENTITY);
    }

    #[test]
    fn test_vrm0_is_turned_to_face_forward() {
        let model =
            VrmModel::from_slice(&fixtures::triangle(Some(fixtures::vrm0_extension()))).unwrap();
        assert_eq!(model.rig.as_ref().unwrap().version, RigVersion::V0);
        let turned = model.root_transform.transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(turned.x, -1.0, epsilon = 1e-6);
        assert_relative_eq!(turned.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            VrmModel::from_slice(b"definitely not a model"),
            Err(LoadError::MalformedPayload(_))
        ));

        // Valid container, broken document
        let bytes = fixtures::glb(&json!({"asset": {"version": "2.0"}, "meshes": 3}), &[]);
        assert!(matches!(
            VrmModel::from_slice(&bytes),
            Err(LoadError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_required_compression_is_unsupported() {
        let document = json!({
            "asset": {"version": "2.0"},
            "extensionsUsed": ["KHR_draco_mesh_compression"],
            "extensionsRequired": ["KHR_draco_mesh_compression"]
        });
        assert!(matches!(
            VrmModel::from_slice(&fixtures::glb(&document, &[])),
            Err(LoadError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_external_buffer_is_unsupported() {
        let document = json!({
            "asset": {"version": "2.0"},
            "buffers": [{"byteLength": 4, "uri": "sidecar.bin"}]
        });
        assert!(matches!(
            VrmModel::from_slice(&fixtures::glb(&document, &[])),
            Err(LoadError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_rigged_model_prunes_unused_joints() {
        let ext = fixtures::vrm1_extension(json!({}));
        let model = VrmModel::from_slice(&fixtures::skinned(Some(ext))).unwrap();

        let skin = &model.skins[0];
        assert_eq!(skin.joints, vec![2]);
        assert_eq!(skin.inverse_bind_matrices.len(), 1);
        for joints in &model.meshes[0].primitives[0].joints {
            assert_eq!(joints[0], 0);
        }
    }

    #[test]
    fn test_plain_gltf_keeps_all_joints() {
        let model = VrmModel::from_slice(&fixtures::skinned(None)).unwrap();
        assert_eq!(model.skins[0].joints, vec![1, 2]);
        assert_eq!(model.meshes[0].primitives[0].joints[0][0], 1);
    }

    #[test]
    fn test_morph_targets_are_read() {
        let model = VrmModel::from_slice(&fixtures::morph_triangle(None)).unwrap();
        assert_eq!(model.meshes[0].morph_target_count(), 1);
        assert_eq!(model.meshes[0].morph_deltas[0][0][2], Vec3::Z);
    }

    #[test]
    fn test_cycle_is_malformed() {
        assert!(check_acyclic(&[Some(1), Some(0)]).is_err());
        assert!(check_acyclic(&[None, Some(0), Some(1)]).is_ok());
    }
}
