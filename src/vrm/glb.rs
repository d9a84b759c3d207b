//! Raw access to the JSON document of a glTF payload.
//!
//! The `gltf` crate does not expose unknown extensions, so rig metadata is
//! read from the JSON chunk directly.

use serde_json::Value;

use crate::error::LoadError;

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const CHUNK_TYPE_JSON: u32 = 0x4E4F_534A;

/// Extensions this viewer can honour when a file marks them as required.
pub const SUPPORTED_REQUIRED_EXTENSIONS: &[&str] = &[
    "KHR_materials_unlit",
    "KHR_materials_emissive_strength",
    "KHR_texture_transform",
    "VRMC_vrm",
    "VRMC_springBone",
    "VRMC_materials_mtoon",
    "VRMC_node_constraint",
];

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// The JSON document of a binary glTF payload, or the payload itself if it
/// is a plain JSON glTF.
pub fn json_chunk(bytes: &[u8]) -> Result<&[u8], LoadError> {
    if bytes.starts_with(GLB_MAGIC) {
        let json_len = read_u32(bytes, GLB_HEADER_LEN)
            .ok_or_else(|| LoadError::MalformedPayload("truncated binary glTF header".into()))?
            as usize;
        let chunk_type = read_u32(bytes, GLB_HEADER_LEN + 4)
            .ok_or_else(|| LoadError::MalformedPayload("truncated binary glTF header".into()))?;
        if chunk_type != CHUNK_TYPE_JSON {
            return Err(LoadError::MalformedPayload(
                "first binary glTF chunk is not JSON".into(),
            ));
        }

        let start = GLB_HEADER_LEN + CHUNK_HEADER_LEN;
        return start
            .checked_add(json_len)
            .and_then(|end| bytes.get(start..end))
            .ok_or_else(|| LoadError::MalformedPayload("JSON chunk runs past end of file".into()));
    }

    match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') => Ok(bytes),
        _ => Err(LoadError::MalformedPayload(
            "not a binary glTF payload".into(),
        )),
    }
}

/// Parse the JSON document.
pub fn parse_root(bytes: &[u8]) -> Result<Value, LoadError> {
    let json = json_chunk(bytes)?;
    serde_json::from_slice(json).map_err(|e| LoadError::MalformedPayload(e.to_string()))
}

/// Fail on the first required extension we cannot honour.
pub fn check_required_extensions(root: &Value) -> Result<(), LoadError> {
    let required = root
        .get("extensionsRequired")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);

    for name in required {
        if !SUPPORTED_REQUIRED_EXTENSIONS.contains(&name) {
            return Err(LoadError::UnsupportedFeature(format!(
                "required extension {name}"
            )));
        }
    }
    Ok(())
}
