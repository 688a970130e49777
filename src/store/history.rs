use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use super::{read_record, write_record};

/// Persisted set of filenames already moved into the gallery.
///
/// All access goes through the store's own mutex so that status reads never
/// wait on anything longer than a single set operation.
#[derive(Debug)]
pub struct ViewHistory {
    path: PathBuf,
    viewed: Mutex<HashSet<String>>,
}

impl ViewHistory {
    /// Load the history at `path`.
    ///
    /// A missing file yields an empty history; an unreadable or malformed one
    /// is logged and also yields an empty history.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let viewed = match read_record::<Vec<String>>(&path) {
            Ok(Some(names)) => names.into_iter().collect(),
            Ok(None) => {
                debug!(path = %path.display(), "no view history yet");
                HashSet::new()
            }
            Err(err) => {
                error!(path = %path.display(), "error loading viewed photos: {err}");
                HashSet::new()
            }
        };
        debug!(path = %path.display(), viewed = viewed.len(), "view history loaded");
        Self {
            path,
            viewed: Mutex::new(viewed),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn viewed(&self) -> MutexGuard<'_, HashSet<String>> {
        self.viewed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.viewed().contains(name)
    }

    /// Record `name` as viewed. Returns `false` if it was already present.
    pub fn add(&self, name: impl Into<String>) -> bool {
        self.viewed().insert(name.into())
    }

    pub fn remove(&self, name: &str) -> bool {
        self.viewed().remove(name)
    }

    pub fn clear(&self) {
        self.viewed().clear();
    }

    pub fn len(&self) -> usize {
        self.viewed().len()
    }

    pub fn is_empty(&self) -> bool {
        self.viewed().is_empty()
    }

    pub fn snapshot(&self) -> HashSet<String> {
        self.viewed().clone()
    }

    /// Rewrite the record with the current set.
    ///
    /// Failures are logged and reported as `false`; the in-memory set stays
    /// authoritative and the next save writes it again.
    pub fn save(&self) -> bool {
        let mut names: Vec<String> = self.viewed().iter().cloned().collect();
        names.sort_unstable();
        match write_record(&self.path, &names) {
            Ok(()) => {
                debug!(path = %self.path.display(), viewed = names.len(), "view history saved");
                true
            }
            Err(err) => {
                error!(path = %self.path.display(), "error saving viewed photos: {err}");
                false
            }
        }
    }
}
