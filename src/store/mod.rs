//! Flat JSON records backing the rotation state.
//!
//! Each record is rewritten in full on every save: the payload goes to a
//! sibling temp file which is then renamed over the record.

pub mod date_cache;
pub mod history;

pub use date_cache::DateCache;
pub use history::ViewHistory;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;

/// Default filename of the view-history record.
pub const HISTORY_FILENAME: &str = "viewed_photos.json";
/// Default filename of the date-cache record.
pub const DATE_CACHE_FILENAME: &str = "photo_dates.json";

/// Read a record. `Ok(None)` when the file does not exist.
fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, Error> {
    if !path.exists() {
        return Ok(None);
    }
    let reader = BufReader::new(File::open(path)?);
    Ok(Some(serde_json::from_reader(reader)?))
}

fn write_record<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let temp_path = temp_path_for(path);
    let result = write_temp(&temp_path, value)
        .and_then(|()| fs::rename(&temp_path, path).map_err(Error::from));
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_temp<T: Serialize>(temp_path: &Path, value: &T) -> Result<(), Error> {
    let mut writer = BufWriter::new(File::create(temp_path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
