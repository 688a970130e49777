use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use config_model::{SelectionMode, SwitchSchedule};
use serde::Deserialize;
use tracing::warn;

use crate::rotation::{ClearRequest, EngineOptions, SwitchRequest};
use crate::select::{DEFAULT_FLUSH_EVERY, MAX_PHOTO_COUNT};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Configuration {
    /// Directory holding the full photo library.
    pub library_path: PathBuf,
    /// Name of the gallery subfolder created inside the library.
    #[serde(default = "Configuration::default_gallery_folder")]
    pub gallery_folder: String,
    /// Photos moved into the gallery per switch.
    #[serde(default = "Configuration::default_photo_count")]
    pub photo_count: usize,
    #[serde(default)]
    pub selection_mode: SelectionMode,
    #[serde(default)]
    pub schedule: SwitchSchedule,
    /// Where the view history and date cache records live.
    #[serde(default = "Configuration::default_state_dir")]
    pub state_dir: PathBuf,
    /// Photos dated between periodic cache flushes during a scan.
    #[serde(default = "Configuration::default_cache_flush_every")]
    pub cache_flush_every: usize,
    /// Consult EXIF capture times before filesystem timestamps.
    #[serde(default = "Configuration::default_read_exif")]
    pub read_exif: bool,
    /// Optional deterministic seed for random selection.
    #[serde(default)]
    pub shuffle_seed: Option<u64>,
    /// Period of the scheduling poller.
    #[serde(
        default = "Configuration::default_tick_interval",
        with = "humantime_serde"
    )]
    pub tick_interval: Duration,
    /// How long shutdown waits for a running rotation to stop.
    #[serde(
        default = "Configuration::default_shutdown_grace",
        with = "humantime_serde"
    )]
    pub shutdown_grace: Duration,
}

impl Configuration {
    /// Defaults for everything but the library.
    pub fn for_library(library_path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: library_path.into(),
            gallery_folder: Self::default_gallery_folder(),
            photo_count: Self::default_photo_count(),
            selection_mode: SelectionMode::default(),
            schedule: SwitchSchedule::default(),
            state_dir: Self::default_state_dir(),
            cache_flush_every: Self::default_cache_flush_every(),
            read_exif: Self::default_read_exif(),
            shuffle_seed: None,
            tick_interval: Self::default_tick_interval(),
            shutdown_grace: Self::default_shutdown_grace(),
        }
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.library_path.as_os_str().is_empty(),
            "library-path must not be empty"
        );
        ensure!(
            !self.gallery_folder.trim().is_empty(),
            "gallery-folder must not be blank"
        );
        ensure!(self.photo_count > 0, "photo-count must be positive");
        ensure!(
            !self.tick_interval.is_zero(),
            "tick-interval must be greater than zero"
        );
        self.schedule.validate()?;
        if self.photo_count > MAX_PHOTO_COUNT {
            warn!(
                photo_count = self.photo_count,
                max = MAX_PHOTO_COUNT,
                "photo-count exceeds maximum; switches will use the maximum"
            );
        }
        Ok(self)
    }

    pub fn gallery_path(&self) -> PathBuf {
        self.library_path.join(&self.gallery_folder)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            read_exif: self.read_exif,
            flush_every: self.cache_flush_every,
            shuffle_seed: self.shuffle_seed,
        }
    }

    pub fn switch_request(&self) -> SwitchRequest {
        SwitchRequest {
            library: self.library_path.clone(),
            gallery: self.gallery_path(),
            count: self.photo_count,
            mode: self.selection_mode,
        }
    }

    pub fn clear_request(&self) -> ClearRequest {
        ClearRequest {
            library: self.library_path.clone(),
            gallery: self.gallery_path(),
        }
    }

    fn default_gallery_folder() -> String {
        "Gallery".to_string()
    }

    const fn default_photo_count() -> usize {
        50
    }

    fn default_state_dir() -> PathBuf {
        PathBuf::from(".")
    }

    const fn default_cache_flush_every() -> usize {
        DEFAULT_FLUSH_EVERY
    }

    const fn default_read_exif() -> bool {
        true
    }

    const fn default_tick_interval() -> Duration {
        Duration::from_secs(60)
    }

    const fn default_shutdown_grace() -> Duration {
        Duration::from_secs(2)
    }
}
