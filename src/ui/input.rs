//! Drag-and-drop filtering.

use eframe::egui;

use super::loading::LoadSource;
use crate::has_model_extension;

/// A dropped file as a load source. Files that expose a filesystem path are
/// read through the shell; others fall back to the bytes the platform handed
/// over. Names not ending in `.vrm` are refused.
pub fn accept_drop(file: &egui::DroppedFile) -> Option<LoadSource> {
    if let Some(path) = &file.path {
        let name = path.file_name()?.to_string_lossy();
        return has_model_extension(&name).then(|| LoadSource::Path(path.clone()));
    }

    if !has_model_extension(&file.name) {
        return None;
    }
    file.bytes.as_ref().map(|bytes| LoadSource::Bytes {
        name: file.name.clone(),
        bytes: bytes.to_vec(),
    })
}

/// Only the first file of a multi-file drop is considered.
pub fn first_accepted(files: &[egui::DroppedFile]) -> Option<LoadSource> {
    files.first().and_then(accept_drop)
}
