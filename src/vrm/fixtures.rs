//! Small binary glTF payloads built in memory for tests.

use serde_json::{json, Value};

/// Assemble a binary glTF from a JSON document and an optional BIN chunk.
pub fn glb(document: &Value, bin: &[u8]) -> Vec<u8> {
    let mut json_bytes = serde_json::to_vec(document).unwrap();
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }
    let mut bin = bin.to_vec();
    while bin.len() % 4 != 0 {
        bin.push(0);
    }

    let mut total = 12 + 8 + json_bytes.len();
    if !bin.is_empty() {
        total += 8 + bin.len();
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(b"glTF");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&0x4E4F_534Au32.to_le_bytes());
    out.extend_from_slice(&json_bytes);
    if !bin.is_empty() {
        out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        out.extend_from_slice(&0x004E_4942u32.to_le_bytes());
        out.extend_from_slice(&bin);
    }
    out
}

fn push_f32s(bin: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        bin.extend_from_slice(&v.to_le_bytes());
    }
}

const TRIANGLE: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

fn with_extensions(mut document: Value, extensions: Option<Value>) -> Value {
    if let Some(ext) = extensions {
        let used: Vec<String> = ext
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        document["extensions"] = ext;
        document["extensionsUsed"] = json!(used);
    }
    document
}

/// One unskinned triangle spanning (0,0,0)-(1,1,0) on node 0.
pub fn triangle(extensions: Option<Value>) -> Vec<u8> {
    let mut bin = Vec::new();
    push_f32s(&mut bin, &TRIANGLE);

    let document = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"name": "Body", "mesh": 0}],
        "meshes": [{"primitives": [{"attributes": {"POSITION": 0}}]}],
        "accessors": [{
            "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
            "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
        }],
        "bufferViews": [{"buffer": 0, "byteOffset": 0, "byteLength": 36}],
        "buffers": [{"byteLength": 36}]
    });
    glb(&with_extensions(document, extensions), &bin)
}

/// One triangle with a single morph target moving every vertex +1 on Z.
pub fn morph_triangle(extensions: Option<Value>) -> Vec<u8> {
    let mut bin = Vec::new();
    push_f32s(&mut bin, &TRIANGLE);
    push_f32s(&mut bin, &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);

    let document = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [{"name": "Face", "mesh": 0}],
        "meshes": [{
            "primitives": [{"attributes": {"POSITION": 0}, "targets": [{"POSITION": 1}]}],
            "weights": [0.0]
        }],
        "accessors": [
            {
                "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
            },
            {
                "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3",
                "min": [0.0, 0.0, 1.0], "max": [0.0, 0.0, 1.0]
            }
        ],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 36, "byteLength": 36}
        ],
        "buffers": [{"byteLength": 72}]
    });
    glb(&with_extensions(document, extensions), &bin)
}

/// A triangle skinned to a two-joint skin where only joint 1 (node 2)
/// carries weight. Joint 0 (node 1) is unused.
///
/// Nodes: 0 root, 1 unused joint, 2 used joint at y=0.5, 3 skinned mesh.
pub fn skinned(extensions: Option<Value>) -> Vec<u8> {
    let mut bin = Vec::new();
    push_f32s(&mut bin, &TRIANGLE);
    // JOINTS_0 as unsigned bytes
    for _ in 0..3 {
        bin.extend_from_slice(&[1, 0, 0, 0]);
    }
    for _ in 0..3 {
        push_f32s(&mut bin, &[1.0, 0.0, 0.0, 0.0]);
    }
    let identity = glam::Mat4::IDENTITY.to_cols_array();
    push_f32s(&mut bin, &identity);
    // Joint 1 sits at y=0.5 in bind pose
    let ibm = glam::Mat4::from_translation(glam::Vec3::new(0.0, -0.5, 0.0)).to_cols_array();
    push_f32s(&mut bin, &ibm);
    assert_eq!(bin.len(), 224);

    let document = json!({
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": [0]}],
        "nodes": [
            {"name": "Root", "children": [1, 2, 3]},
            {"name": "Unused", "translation": [0.0, 1.0, 0.0]},
            {"name": "Hips", "translation": [0.0, 0.5, 0.0]},
            {"name": "Body", "mesh": 0, "skin": 0}
        ],
        "skins": [{"joints": [1, 2], "inverseBindMatrices": 3}],
        "meshes": [{"primitives": [{"attributes": {"POSITION": 0, "JOINTS_0": 1, "WEIGHTS_0": 2}}]}],
        "accessors": [
            {
                "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]
            },
            {"bufferView": 1, "componentType": 5121, "count": 3, "type": "VEC4"},
            {"bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC4"},
            {"bufferView": 3, "componentType": 5126, "count": 2, "type": "MAT4"}
        ],
        "bufferViews": [
            {"buffer": 0, "byteOffset": 0, "byteLength": 36},
            {"buffer": 0, "byteOffset": 36, "byteLength": 12},
            {"buffer": 0, "byteOffset": 48, "byteLength": 48},
            {"buffer": 0, "byteOffset": 96, "byteLength": 128}
        ],
        "buffers": [{"byteLength": 224}]
    });
    glb(&with_extensions(document, extensions), &bin)
}

/// Minimal VRM 1.0 extension block.
pub fn vrm1_extension(expressions: Value) -> Value {
    json!({
        "VRMC_vrm": {
            "specVersion": "1.0",
            "meta": {"name": "Tester", "authors": ["Ada", "Grace"], "version": "2"},
            "humanoid": {"humanBones": {"hips": {"node": 0}}},
            "expressions": {"preset": expressions}
        }
    })
}

/// Minimal VRM 0.x extension block.
pub fn vrm0_extension() -> Value {
    json!({
        "VRM": {
            "meta": {"title": "Legacy", "author": "Someone", "version": "0.1"},
            "humanoid": {"humanBones": [{"bone": "Hips", "node": 0}]},
            "blendShapeMaster": {"blendShapeGroups": []}
        }
    })
}
