//! Launch-argument scanning.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::has_model_extension;

/// First argument that names a model file, if any.
///
/// Works on the raw argument list (executable path and any OS-injected
/// arguments included); the first entry ending in `.vrm`, ignoring case, wins.
pub fn extract_model_path<I, S>(argv: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    argv.into_iter()
        .find(|arg| has_model_extension(&arg.as_ref().to_string_lossy()))
        .map(|arg| PathBuf::from(arg.as_ref()))
}

/// Like [`extract_model_path`], with a relative match taken relative to `cwd`.
pub fn extract_model_path_in<I, S>(argv: I, cwd: Option<&Path>) -> Option<PathBuf>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let path = extract_model_path(argv)?;
    match cwd {
        Some(cwd) if path.is_relative() => Some(cwd.join(path)),
        _ => Some(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_match_is_returned() {
        let argv = ["/usr/bin/vrm-viewer", "--verbose", "/home/me/Avatar.VRM"];
        assert_eq!(
            extract_model_path(argv),
            Some(PathBuf::from("/home/me/Avatar.VRM"))
        );
    }

    #[test]
    fn test_any_case_matches() {
        for name in ["a.vrm", "a.VRM", "a.Vrm", "a.vRm"] {
            assert_eq!(
                extract_model_path(["viewer.exe", name]),
                Some(PathBuf::from(name))
            );
        }
    }

    #[test]
    fn test_no_match_is_none() {
        assert_eq!(extract_model_path(["viewer", "model.glb", "vrm", "x.vrm.txt"]), None);
        assert_eq!(extract_model_path(Vec::<String>::new()), None);
    }

    #[test]
    fn test_relative_match_joins_working_directory() {
        let cwd = Path::new("/home/me/models");
        assert_eq!(
            extract_model_path_in(["viewer", "sub/a.vrm"], Some(cwd)),
            Some(PathBuf::from("/home/me/models/sub/a.vrm"))
        );
        assert_eq!(
            extract_model_path_in(["viewer", "/abs/b.vrm"], Some(cwd)),
            Some(PathBuf::from("/abs/b.vrm"))
        );
        assert_eq!(
            extract_model_path_in(["viewer", "c.vrm"], None),
            Some(PathBuf::from("c.vrm"))
        );
        assert_eq!(extract_model_path_in(["viewer"], Some(cwd)), None);
    }

    #[test]
    fn test_first_match_wins() {
        let argv = ["viewer", "first.vrm", "second.vrm"];
        assert_eq!(extract_model_path(argv), Some(PathBuf::from("first.vrm")));
    }
}
