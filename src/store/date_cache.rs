use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use super::{read_record, write_record};

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, f64>,
    dirty: bool,
}

/// Persisted filename -> capture timestamp map.
///
/// Entries are only ever added; nothing is invalidated short of `clear()`.
/// The dirty flag tracks whether anything changed since the last successful
/// flush.
#[derive(Debug)]
pub struct DateCache {
    path: PathBuf,
    state: Mutex<CacheState>,
}

impl DateCache {
    /// Load the cache at `path`; missing or malformed records load empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_record::<HashMap<String, f64>>(&path) {
            Ok(Some(entries)) => entries,
            Ok(None) => HashMap::new(),
            Err(err) => {
                error!(path = %path.display(), "error loading date cache: {err}");
                HashMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "date cache loaded");
        Self {
            path,
            state: Mutex::new(CacheState {
                entries,
                dirty: false,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.state().entries.get(name).copied()
    }

    pub fn put(&self, name: impl Into<String>, timestamp: f64) {
        let mut state = self.state();
        state.entries.insert(name.into(), timestamp);
        state.dirty = true;
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.state().dirty
    }

    /// Write the whole map if anything changed since the last flush.
    ///
    /// On failure the dirty flag is raised again so a later flush retries.
    /// Returns `true` when nothing needed writing or the write succeeded.
    pub fn flush(&self) -> bool {
        let snapshot: BTreeMap<String, f64> = {
            let mut state = self.state();
            if !state.dirty {
                return true;
            }
            state.dirty = false;
            state
                .entries
                .iter()
                .map(|(name, ts)| (name.clone(), *ts))
                .collect()
        };
        match write_record(&self.path, &snapshot) {
            Ok(()) => {
                debug!(path = %self.path.display(), entries = snapshot.len(), "date cache flushed");
                true
            }
            Err(err) => {
                error!(path = %self.path.display(), "error saving date cache: {err}");
                self.state().dirty = true;
                false
            }
        }
    }
}
