use std::path::{Path, PathBuf};

use crate::common::VALID_IMAGE_EXTENSIONS;

pub trait PathExt {
    fn ext_lower(&self) -> String;
}

impl PathExt for Path {
    fn ext_lower(&self) -> String {
        self.extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default()
    }
}

pub fn is_image_file(filename: impl AsRef<Path>) -> bool {
    let ext = filename.as_ref().ext_lower();
    VALID_IMAGE_EXTENSIONS.contains(&ext.as_str())
}

/// Strips any directory components a client may have put into an upload name.
///
/// Returns `None` for names such as `..` or an empty string that have no usable base name.
pub fn base_name(filename: &str) -> Option<PathBuf> {
    Path::new(filename)
        .file_name()
        .map(PathBuf::from)
        .filter(|name| !name.as_os_str().is_empty())
}
