//! Output path collision handling.
//!
//! A received file never silently replaces an existing one: unless
//! overwriting is requested, `.recv`, `.recv2`, `.recv3`, ... is inserted
//! before the extension until a free name is found.

use std::path::{Path, PathBuf};

/// Resolve where received bytes are written.
///
/// `exists` is injected so the rule stays free of filesystem access.
pub fn resolve_output_path(
    path: &Path,
    overwrite: bool,
    exists: impl Fn(&Path) -> bool,
) -> PathBuf {
    if overwrite || !exists(path) {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut attempt: u64 = 1;
    loop {
        let suffix = if attempt == 1 {
            "recv".to_string()
        } else {
            format!("recv{attempt}")
        };
        let candidate = path.with_file_name(format!("{stem}.{suffix}{ext}"));
        if !exists(&candidate) {
            return candidate;
        }
        attempt += 1;
    }
}
