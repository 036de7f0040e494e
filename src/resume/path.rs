//! Path keys for the position store.

use std::path::{Component, Path, PathBuf};

/// Normalize a media path into a store key using the platform's case rules.
///
/// Returns `None` for an empty path or when the working directory is unavailable.
pub fn normalize_path(path: &Path) -> Option<String> {
    normalize_path_with(path, cfg!(windows))
}

/// Normalize a media path into a store key.
///
/// The path is made absolute and `.`/`..` are folded lexically (symlinks are
/// not resolved). With `fold_case` the key is lowercased and separators are
/// unified to `\`, matching case-insensitive filesystems.
pub fn normalize_path_with(path: &Path, fold_case: bool) -> Option<String> {
    if path.as_os_str().is_empty() {
        return None;
    }

    let absolute = std::path::absolute(path).ok()?;
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }

    let key = cleaned.to_string_lossy().into_owned();
    if fold_case {
        Some(key.replace('/', "\\").to_lowercase())
    } else {
        Some(key)
    }
}
