//! Directory scanning utilities for discovering photo files.

use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::cancel::CancelFlag;
use crate::error::Error;

/// Extensions recognized as photos (lowercase, without dot).
pub const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff"];

/// A photo on disk. The filename is the stable key shared by the view
/// history and the date cache; the path changes whenever the file moves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhotoFile {
    path: PathBuf,
    name: String,
}

impl PhotoFile {
    /// Build from a path, or `None` when the path has no UTF-8 filename.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_str()?.to_owned();
        Some(Self { path, name })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Return `true` if `path` has a recognized photo extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            PHOTO_EXTENSIONS.iter().any(|e| *e == ext)
        })
}

/// List the photos directly inside `dir` (no recursion).
///
/// A missing directory is not an error: it is logged and yields nothing.
/// The cancellation flag is checked before every entry.
///
/// # Errors
/// Returns [`Error::Cancelled`] when `cancel` is raised mid-scan.
pub fn scan_photos(dir: &Path, cancel: &CancelFlag) -> Result<Vec<PhotoFile>, Error> {
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "directory does not exist");
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        cancel.check()?;
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                error!(dir = %dir.display(), "error reading directory: {err}");
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !is_supported_image(path) {
            continue;
        }
        match PhotoFile::from_path(path) {
            Some(photo) => out.push(photo),
            None => debug!(path = %path.display(), "skipping photo with non UTF-8 name"),
        }
    }
    Ok(out)
}
