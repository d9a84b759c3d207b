//! Humanoid rig metadata read from the `VRMC_vrm` (1.0) or `VRM` (0.x)
//! extension blocks, plus spring-bone data from `VRMC_springBone` or the
//! 0.x `secondaryAnimation` block.

use std::collections::HashMap;
use std::fmt;

use glam::Vec3;
use serde_json::Value;

/// Which rig convention a model follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigVersion {
    /// `VRM` extension. Faces -Z and is turned around after loading.
    V0,
    /// `VRMC_vrm` extension.
    V1,
}

impl fmt::Display for RigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RigVersion::V0 => write!(f, "VRM 0.x"),
            RigVersion::V1 => write!(f, "VRM 1.0"),
        }
    }
}

/// Descriptive fields from the rig's meta block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RigMeta {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub version: Option<String>,
}

/// One morph target driven by an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionBind {
    pub mesh: usize,
    pub morph_index: usize,
    pub weight: f32,
}

/// A preset or custom expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub name: String,
    pub binds: Vec<ExpressionBind>,
    /// Values snap to 0 or 1
    pub is_binary: bool,
}

/// A spring chain (hair, cloth, etc.).
#[derive(Debug, Clone)]
pub struct SpringChain {
    pub name: String,
    pub joints: Vec<SpringJoint>,
    pub collider_group_indices: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct SpringJoint {
    pub node: usize,
    pub hit_radius: f32,
    pub stiffness: f32,
    pub gravity_power: f32,
    pub gravity_dir: Vec3,
    pub drag_force: f32,
}

#[derive(Debug, Clone)]
pub struct SpringCollider {
    pub node: usize,
    pub shape: ColliderShape,
}

#[derive(Debug, Clone, Copy)]
pub enum ColliderShape {
    Sphere { offset: Vec3, radius: f32 },
    Capsule { offset: Vec3, tail: Vec3, radius: f32 },
}

#[derive(Debug, Clone)]
pub struct ColliderGroup {
    pub collider_indices: Vec<usize>,
}

/// Everything the viewer uses from a rig block.
#[derive(Debug, Clone)]
pub struct RigMetadata {
    pub version: RigVersion,
    pub meta: RigMeta,
    /// Humanoid bone name (1.0 spelling) → node index
    pub bone_to_node: HashMap<String, usize>,
    /// Sorted by name
    pub expressions: Vec<Expression>,
    pub spring_chains: Vec<SpringChain>,
    pub spring_colliders: Vec<SpringCollider>,
    pub collider_groups: Vec<ColliderGroup>,
}

impl RigMetadata {
    /// Read rig metadata from the document root. `None` for a plain glTF.
    ///
    /// `node_meshes[node]` is the mesh instanced by each node; 1.0 expression
    /// binds address nodes, 0.x binds address meshes. References to nodes or
    /// meshes that do not exist are dropped.
    pub fn parse(root: &Value, node_meshes: &[Option<usize>], mesh_count: usize) -> Option<Self> {
        let extensions = root.get("extensions")?;
        let node_count = node_meshes.len();

        let (version, block) = if let Some(vrmc) = extensions.get("VRMC_vrm") {
            (RigVersion::V1, vrmc)
        } else if let Some(vrm) = extensions.get("VRM") {
            (RigVersion::V0, vrm)
        } else {
            return None;
        };

        let (meta, bone_to_node, mut expressions) = match version {
            RigVersion::V1 => (
                parse_meta_1_0(block),
                parse_bones_1_0(block),
                parse_expressions_1_0(block, node_meshes),
            ),
            RigVersion::V0 => (
                parse_meta_0x(block),
                parse_bones_0x(block),
                parse_expressions_0x(block),
            ),
        };
        expressions.sort_by(|a, b| a.name.cmp(&b.name));
        for expr in &mut expressions {
            expr.binds.retain(|b| b.mesh < mesh_count);
        }

        let (spring_chains, spring_colliders, collider_groups) =
            if let Some(spring) = extensions.get("VRMC_springBone") {
                parse_springs_1_0(spring)
            } else if let Some(secondary) = block.get("secondaryAnimation") {
                parse_springs_0x(secondary)
            } else {
                (Vec::new(), Vec::new(), Vec::new())
            };

        let mut rig = Self {
            version,
            meta,
            bone_to_node,
            expressions,
            spring_chains,
            spring_colliders,
            collider_groups,
        };
        rig.drop_dangling_nodes(node_count);
        Some(rig)
    }

    fn drop_dangling_nodes(&mut self, node_count: usize) {
        self.bone_to_node.retain(|_, node| *node < node_count);
        for chain in &mut self.spring_chains {
            chain.joints.retain(|j| j.node < node_count);
        }
        self.spring_chains.retain(|c| !c.joints.is_empty());

        // Colliders are addressed by index from groups; remap rather than shift.
        let mut remap = Vec::with_capacity(self.spring_colliders.len());
        let mut kept = Vec::new();
        for collider in self.spring_colliders.drain(..) {
            if collider.node < node_count {
                remap.push(Some(kept.len()));
                kept.push(collider);
            } else {
                remap.push(None);
            }
        }
        self.spring_colliders = kept;
        for group in &mut self.collider_groups {
            group.collider_indices = group
                .collider_indices
                .iter()
                .filter_map(|&i| remap.get(i).copied().flatten())
                .collect();
        }
    }

    /// Total number of spring joints.
    pub fn spring_joint_count(&self) -> usize {
        self.spring_chains.iter().map(|c| c.joints.len()).sum()
    }
}

fn as_index(value: Option<&Value>) -> Option<usize> {
    value.and_then(Value::as_u64).map(|n| n as usize)
}

fn as_f32(value: Option<&Value>, default: f32) -> f32 {
    value.and_then(Value::as_f64).map(|v| v as f32).unwrap_or(default)
}

fn as_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn index_list(value: Option<&Value>) -> Vec<usize> {
    value
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| as_index(Some(v))).collect())
        .unwrap_or_default()
}

/// Vec3 from either `[x, y, z]` (1.0) or `{"x":..,"y":..,"z":..}` (0.x).
fn parse_vec3(value: Option<&Value>) -> Vec3 {
    match value {
        Some(Value::Array(arr)) => Vec3::new(
            as_f32(arr.first(), 0.0),
            as_f32(arr.get(1), 0.0),
            as_f32(arr.get(2), 0.0),
        ),
        Some(v) => Vec3::new(
            as_f32(v.get("x"), 0.0),
            as_f32(v.get("y"), 0.0),
            as_f32(v.get("z"), 0.0),
        ),
        None => Vec3::ZERO,
    }
}

fn parse_meta_1_0(block: &Value) -> RigMeta {
    let meta = block.get("meta");
    RigMeta {
        title: as_string(meta.and_then(|m| m.get("name"))),
        authors: meta
            .and_then(|m| m.get("authors"))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|a| as_string(Some(a))).collect())
            .unwrap_or_default(),
        version: as_string(meta.and_then(|m| m.get("version"))),
    }
}

fn parse_meta_0x(block: &Value) -> RigMeta {
    let meta = block.get("meta");
    RigMeta {
        title: as_string(meta.and_then(|m| m.get("title"))),
        authors: as_string(meta.and_then(|m| m.get("author")))
            .into_iter()
            .collect(),
        version: as_string(meta.and_then(|m| m.get("version"))),
    }
}

fn parse_bones_1_0(block: &Value) -> HashMap<String, usize> {
    block
        .get("humanoid")
        .and_then(|h| h.get("humanBones"))
        .and_then(Value::as_object)
        .map(|bones| {
            bones
                .iter()
                .filter_map(|(name, bone)| Some((name.clone(), as_index(bone.get("node"))?)))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_bones_0x(block: &Value) -> HashMap<String, usize> {
    block
        .get("humanoid")
        .and_then(|h| h.get("humanBones"))
        .and_then(Value::as_array)
        .map(|bones| {
            bones
                .iter()
                .filter_map(|bone| {
                    let name = bone.get("bone").and_then(Value::as_str)?;
                    Some((lower_first(name), as_index(bone.get("node"))?))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// "LeftUpperArm" → "leftUpperArm"
fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn parse_expressions_1_0(block: &Value, node_meshes: &[Option<usize>]) -> Vec<Expression> {
    let Some(expressions) = block.get("expressions") else {
        return Vec::new();
    };

    let groups = ["preset", "custom"]
        .into_iter()
        .filter_map(|group| expressions.get(group).and_then(Value::as_object));

    let mut out = Vec::new();
    for group in groups {
        for (name, expr) in group {
            let binds = expr
                .get("morphTargetBinds")
                .and_then(Value::as_array)
                .map(|binds| {
                    binds
                        .iter()
                        .filter_map(|b| {
                            let node = as_index(b.get("node"))?;
                            let mesh = node_meshes.get(node).copied().flatten()?;
                            Some(ExpressionBind {
                                mesh,
                                morph_index: as_index(b.get("index"))?,
                                weight: as_f32(b.get("weight"), 1.0),
                            })
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            if !binds.is_empty() {
                out.push(Expression {
                    name: name.clone(),
                    binds,
                    is_binary: expr.get("isBinary").and_then(Value::as_bool).unwrap_or(false),
                });
            }
        }
    }
    out
}

/// 0.x preset names mapped to their 1.0 spelling.
fn preset_name_0x(name: &str) -> &str {
    match name {
        "a" => "aa",
        "i" => "ih",
        "u" => "ou",
        "e" => "ee",
        "o" => "oh",
        "blink_l" => "blinkLeft",
        "blink_r" => "blinkRight",
        "joy" => "happy",
        "sorrow" => "sad",
        "fun" => "relaxed",
        "lookup" => "lookUp",
        "lookdown" => "lookDown",
        "lookleft" => "lookLeft",
        "lookright" => "lookRight",
        other => other,
    }
}

fn parse_expressions_0x(block: &Value) -> Vec<Expression> {
    let Some(groups) = block
        .get("blendShapeMaster")
        .and_then(|m| m.get("blendShapeGroups"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut out: Vec<Expression> = Vec::new();
    for group in groups {
        // presetName is "unknown" for custom groups; fall back to the free-form name.
        let preset = group
            .get("presetName")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty() && *p != "unknown");
        let name = match preset {
            Some(p) => preset_name_0x(&p.to_lowercase()).to_string(),
            None => match group.get("name").and_then(Value::as_str) {
                Some(n) => n.to_string(),
                None => continue,
            },
        };

        let binds: Vec<ExpressionBind> = group
            .get("binds")
            .and_then(Value::as_array)
            .map(|binds| {
                binds
                    .iter()
                    .filter_map(|b| {
                        Some(ExpressionBind {
                            mesh: as_index(b.get("mesh"))?,
                            morph_index: as_index(b.get("index"))?,
                            // 0.x weights are on a 0-100 scale
                            weight: as_f32(b.get("weight"), 100.0) / 100.0,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        if !binds.is_empty() && !out.iter().any(|e| e.name == name) {
            out.push(Expression {
                name,
                binds,
                is_binary: group.get("isBinary").and_then(Value::as_bool).unwrap_or(false),
            });
        }
    }
    out
}

type Springs = (Vec<SpringChain>, Vec<SpringCollider>, Vec<ColliderGroup>);

fn parse_springs_1_0(ext: &Value) -> Springs {
    let colliders = ext
        .get("colliders")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|c| {
                    let node = as_index(c.get("node"))?;
                    let shape = c.get("shape")?;
                    let shape = if let Some(sphere) = shape.get("sphere") {
                        ColliderShape::Sphere {
                            offset: parse_vec3(sphere.get("offset")),
                            radius: as_f32(sphere.get("radius"), 0.0),
                        }
                    } else if let Some(capsule) = shape.get("capsule") {
                        ColliderShape::Capsule {
                            offset: parse_vec3(capsule.get("offset")),
                            tail: parse_vec3(capsule.get("tail")),
                            radius: as_f32(capsule.get("radius"), 0.0),
                        }
                    } else {
                        return None;
                    };
                    Some(SpringCollider { node, shape })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let groups = ext
        .get("colliderGroups")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|g| ColliderGroup {
                    collider_indices: index_list(g.get("colliders")),
                })
                .collect()
        })
        .unwrap_or_default();

    let chains = ext
        .get("springs")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|s| SpringChain {
                    name: s.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                    joints: s
                        .get("joints")
                        .and_then(Value::as_array)
                        .map(|joints| {
                            joints
                                .iter()
                                .filter_map(|j| {
                                    Some(SpringJoint {
                                        node: as_index(j.get("node"))?,
                                        hit_radius: as_f32(j.get("hitRadius"), 0.0),
                                        stiffness: as_f32(j.get("stiffness"), 1.0),
                                        gravity_power: as_f32(j.get("gravityPower"), 0.0),
                                        gravity_dir: j
                                            .get("gravityDir")
                                            .map(|g| parse_vec3(Some(g)))
                                            .unwrap_or(Vec3::NEG_Y),
                                        drag_force: as_f32(j.get("dragForce"), 0.5),
                                    })
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                    collider_group_indices: index_list(s.get("colliderGroups")),
                })
                .filter(|c| !c.joints.is_empty())
                .collect()
        })
        .unwrap_or_default();

    (chains, colliders, groups)
}

/// 0.x stores one chain per bone group with shared physics parameters, and
/// sphere colliders grouped under a node.
fn parse_springs_0x(secondary: &Value) -> Springs {
    let mut colliders = Vec::new();
    let mut groups = Vec::new();

    for group in secondary
        .get("colliderGroups")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let node = as_index(group.get("node"));
        let mut indices = Vec::new();
        if let Some(node) = node {
            for c in group.get("colliders").and_then(Value::as_array).into_iter().flatten() {
                indices.push(colliders.len());
                colliders.push(SpringCollider {
                    node,
                    shape: ColliderShape::Sphere {
                        offset: parse_vec3(c.get("offset")),
                        radius: as_f32(c.get("radius"), 0.0),
                    },
                });
            }
        }
        groups.push(ColliderGroup {
            collider_indices: indices,
        });
    }

    let mut chains = Vec::new();
    for group in secondary
        .get("boneGroups")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        // The 0.x schema spells it "stiffiness".
        let stiffness = as_f32(group.get("stiffiness").or_else(|| group.get("stiffness")), 1.0);
        let gravity_power = as_f32(group.get("gravityPower"), 0.0);
        let gravity_dir = parse_vec3(group.get("gravityDir"));
        let drag_force = as_f32(group.get("dragForce"), 0.5);
        let hit_radius = as_f32(group.get("hitRadius"), 0.0);

        let joints: Vec<SpringJoint> = index_list(group.get("bones"))
            .into_iter()
            .map(|node| SpringJoint {
                node,
                hit_radius,
                stiffness,
                gravity_power,
                gravity_dir,
                drag_force,
            })
            .collect();

        if !joints.is_empty() {
            chains.push(SpringChain {
                name: group
                    .get("comment")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                joints,
                collider_group_indices: index_list(group.get("colliderGroups")),
            });
        }
    }

    (chains, colliders, groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_gltf_has_no_rig() {
        assert!(RigMetadata::parse(&json!({"asset": {}}), &[None], 0).is_none());
        assert!(RigMetadata::parse(&json!({"extensions": {"KHR_lights_punctual": {}}}), &[], 0)
            .is_none());
    }

    #[test]
    fn test_vrm1_meta_bones_and_expressions() {
        let root = json!({"extensions": {"VRMC_vrm": {
            "meta": {"name": "Alicia", "authors": ["Niconi", ""], "version": "1.2"},
            "humanoid": {"humanBones": {"hips": {"node": 0}, "head": {"node": 9}}},
            "expressions": {
                "preset": {
                    "happy": {"morphTargetBinds": [{"node": 1, "index": 3, "weight": 0.5}]},
                    "blink": {"isBinary": true, "morphTargetBinds": [{"node": 1, "index": 0}]},
                    "aa": {"morphTargetBinds": [{"node": 0, "index": 0}]}
                },
                "custom": {
                    "wink": {"morphTargetBinds": [{"node": 1, "index": 4}]}
                }
            }
        }}});

        let rig = RigMetadata::parse(&root, &[None, Some(2)], 3).unwrap();
        assert_eq!(rig.version, RigVersion::V1);
        assert_eq!(rig.meta.title.as_deref(), Some("Alicia"));
        assert_eq!(rig.meta.authors, vec!["Niconi".to_string()]);
        assert_eq!(rig.bone_to_node.get("hips"), Some(&0));
        // Node 9 does not exist
        assert!(!rig.bone_to_node.contains_key("head"));

        // "aa" binds a node without a mesh and is dropped; the rest sort by name.
        let names: Vec<&str> = rig.expressions.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["blink", "happy", "wink"]);
        assert!(rig.expressions[0].is_binary);
        assert_eq!(
            rig.expressions[1].binds,
            vec![ExpressionBind {
                mesh: 2,
                morph_index: 3,
                weight: 0.5
            }]
        );
    }

    #[test]
    fn test_vrm0_names_and_weights_are_normalized() {
        let root = json!({"extensions": {"VRM": {
            "meta": {"title": "Old", "author": "Someone"},
            "humanoid": {"humanBones": [{"bone": "LeftUpperArm", "node": 1}]},
            "blendShapeMaster": {"blendShapeGroups": [
                {"name": "Joy", "presetName": "joy", "binds": [{"mesh": 0, "index": 2, "weight": 100}]},
                {"name": "A", "presetName": "a", "binds": [{"mesh": 0, "index": 5, "weight": 50}]},
                {"name": "Smug", "presetName": "unknown", "binds": [{"mesh": 0, "index": 7}]}
            ]}
        }}});

        let rig = RigMetadata::parse(&root, &[None, None], 1).unwrap();
        assert_eq!(rig.version, RigVersion::V0);
        assert_eq!(rig.meta.authors, vec!["Someone".to_string()]);
        assert_eq!(rig.bone_to_node.get("leftUpperArm"), Some(&1));

        let names: Vec<&str> = rig.expressions.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Smug", "aa", "happy"]);
        let aa = &rig.expressions[1];
        assert!((aa.binds[0].weight - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_springs_1_0_drop_dangling_colliders() {
        let root = json!({"extensions": {
            "VRMC_vrm": {},
            "VRMC_springBone": {
                "colliders": [
                    {"node": 7, "shape": {"sphere": {"radius": 0.1}}},
                    {"node": 0, "shape": {"capsule": {"offset": [0, 0, 0], "tail": [0, 1, 0], "radius": 0.05}}}
                ],
                "colliderGroups": [{"colliders": [0, 1]}],
                "springs": [
                    {"name": "Hair", "joints": [{"node": 1}, {"node": 2, "stiffness": 0.3}], "colliderGroups": [0]},
                    {"name": "Ghost", "joints": [{"node": 40}]}
                ]
            }
        }});

        let rig = RigMetadata::parse(&root, &[None, None, None], 0).unwrap();
        assert_eq!(rig.spring_chains.len(), 1);
        assert_eq!(rig.spring_joint_count(), 2);
        assert_eq!(rig.spring_chains[0].joints[0].gravity_dir, Vec3::NEG_Y);
        assert_eq!(rig.spring_colliders.len(), 1);
        assert_eq!(rig.collider_groups[0].collider_indices, vec![0]);
    }

    #[test]
    fn test_springs_0x_bone_groups() {
        let root = json!({"extensions": {"VRM": {
            "secondaryAnimation": {
                "boneGroups": [{
                    "comment": "skirt", "stiffiness": 0.7, "gravityPower": 0.2,
                    "gravityDir": {"x": 0, "y": -1, "z": 0}, "dragForce": 0.4,
                    "hitRadius": 0.02, "bones": [1, 2], "colliderGroups": [0]
                }],
                "colliderGroups": [{"node": 0, "colliders": [{"offset": {"x": 0, "y": 0.1, "z": 0}, "radius": 0.2}]}]
            }
        }}});

        let rig = RigMetadata::parse(&root, &[None, None, None], 0).unwrap();
        let chain = &rig.spring_chains[0];
        assert_eq!(chain.name, "skirt");
        assert_eq!(chain.joints.len(), 2);
        assert!((chain.joints[0].stiffness - 0.7).abs() < 1e-6);
        assert_eq!(rig.spring_colliders.len(), 1);
    }

    #[test]
    fn test_lower_first() {
        assert_eq!(lower_first("Head"), "head");
        assert_eq!(lower_first("LeftUpperArm"), "leftUpperArm");
        assert_eq!(lower_first(""), "");
    }
}
