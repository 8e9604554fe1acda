//! Path validation applied before any path reaches a subprocess or the
//! filesystem.
//!
//! Paths come out of scraped forum titles and user configuration, so they
//! are treated as hostile until validated: no parent-directory traversal,
//! no reserved device names, bounded length.

use std::path::{Component, Path, PathBuf};

use crate::error::UploadError;

/// Longest path accepted, in bytes of the display form.
const MAX_PATH_LEN: usize = 250;

/// Windows device names that must never appear as a path component stem.
const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Validates a path for use as a subprocess target, working directory, or
/// store location.
///
/// Rejects empty paths, paths containing `..` components, reserved device
/// names, and paths longer than 250 bytes. The path is returned as given
/// (not canonicalized — it may not exist yet).
pub fn validate_path(path: impl AsRef<Path>) -> Result<PathBuf, UploadError> {
    let path = path.as_ref();
    let display = path.display().to_string();

    if display.is_empty() {
        return Err(invalid(&display, "path is empty"));
    }
    if display.len() > MAX_PATH_LEN {
        return Err(invalid(
            &display,
            &format!("path length {} exceeds {}", display.len(), MAX_PATH_LEN),
        ));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(invalid(&display, "parent-directory traversal"));
            }
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                let stem = part.split('.').next().unwrap_or("").to_ascii_lowercase();
                if RESERVED_NAMES.contains(&stem.as_str()) {
                    return Err(invalid(&display, &format!("reserved name `{part}`")));
                }
            }
            _ => {}
        }
    }

    Ok(path.to_path_buf())
}

fn invalid(path: &str, reason: &str) -> UploadError {
    UploadError::PathValidation {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
