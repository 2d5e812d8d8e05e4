//! Local tree enumeration used by the cloud backends' full sync.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use tracing::warn;

/// One local file found under a watch root.
pub(crate) struct LocalFile {
    pub absolute: PathBuf,
    /// Path relative to the walk root.
    pub relative: PathBuf,
}

/// Recursively lists regular files under `root`, skipping anything whose
/// root-relative path matches an exclude pattern. Unreadable directories are
/// logged and skipped, not fatal.
pub(crate) fn local_files(root: &Path, exclude: &[String]) -> Result<Vec<LocalFile>> {
    let patterns = exclude
        .iter()
        .map(|raw| Pattern::new(raw).with_context(|| format!("Invalid exclude pattern '{raw}'")))
        .collect::<Result<Vec<_>>>()?;

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "Skipping unreadable directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let absolute = entry.path();
            let relative = match absolute.strip_prefix(root) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => continue,
            };
            if patterns.iter().any(|p| p.matches_path(&relative)) {
                continue;
            }
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                stack.push(absolute);
            } else if file_type.is_file() {
                files.push(LocalFile { absolute, relative });
            }
        }
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}
