// SPDX-License-Identifier: GPL-3.0-only

//! Output file locations for snapshots and recordings

use crate::config::APP_DIR;
use crate::constants::CAPTURE_FILE_FORMAT;
use crate::errors::AppResult;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Pictures directory of the user, or the working directory without one
pub fn default_output_dir() -> PathBuf {
    dirs::picture_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Timestamped file name in `dir` with extension `ext`, creating `dir`.
///
/// Names have one-second resolution; a second capture within the same second
/// gets a numeric suffix.
pub fn capture_file(dir: &Path, ext: &str) -> AppResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let stem = chrono::Local::now().format(CAPTURE_FILE_FORMAT).to_string();
    let mut path = dir.join(format!("{}.{}", stem, ext));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}-{}.{}", stem, n, ext));
        n += 1;
    }
    debug!(path = %path.display(), "Capture file");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_file_is_unique_and_named_by_time() {
        let dir = std::env::temp_dir().join(format!("capture-file-{}", std::process::id()));
        let first = capture_file(&dir, "png").unwrap();
        std::fs::write(&first, b"x").unwrap();
        let second = capture_file(&dir, "png").unwrap();
        assert_ne!(first, second);
        assert_eq!(first.extension().unwrap(), "png");
        // yyyy-MM-dd-HH-mm-ss
        let stem = first.file_stem().unwrap().to_string_lossy().to_string();
        assert_eq!(stem.len(), 19);
        assert_eq!(stem.matches('-').count(), 5);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
