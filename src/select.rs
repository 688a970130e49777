//! Choosing which library photos move into the gallery next.
//!
//! A selection pass never resets anything on its own: when too few unviewed
//! photos remain it reports [`Selection::Exhausted`] and
//! [`PhotoSelector::select`] decides to wipe the history and run a second
//! pass over the whole library.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;

use config_model::SelectionMode;
use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::{debug, info};

use crate::cancel::CancelFlag;
use crate::date::DateResolver;
use crate::error::Error;
use crate::scan::{PhotoFile, scan_photos};
use crate::store::{DateCache, ViewHistory};

/// Upper bound on photos moved by one switch.
pub const MAX_PHOTO_COUNT: usize = 10_000;
/// Photos scanned between periodic date-cache flushes.
pub const DEFAULT_FLUSH_EVERY: usize = 5_000;

/// Clamp a requested count into `1..=MAX_PHOTO_COUNT`.
pub fn clamp_count(count: usize) -> usize {
    count.clamp(1, MAX_PHOTO_COUNT)
}

/// Result of a single selection pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// The pool held at least the requested number of photos.
    Selected(Vec<PhotoFile>),
    /// The pool was too small; `partial` holds everything that was drawn.
    Exhausted {
        partial: Vec<PhotoFile>,
        available: usize,
    },
}

/// Which library photos a pass draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    /// Only photos whose filename is not in the view history.
    Unviewed,
    /// Every photo in the directory.
    All,
}

/// Counts photos dated during a scan and flushes the date cache at a fixed
/// cadence so a crash mid-scan loses at most one interval of work.
#[derive(Debug)]
pub struct ScanProgress<'a> {
    cache: &'a DateCache,
    flush_every: usize,
    processed: usize,
}

impl<'a> ScanProgress<'a> {
    pub fn new(cache: &'a DateCache, flush_every: usize) -> Self {
        Self {
            cache,
            flush_every,
            processed: 0,
        }
    }

    pub fn record(&mut self) {
        self.processed += 1;
        if self.flush_every > 0 && self.processed % self.flush_every == 0 {
            info!(processed = self.processed, "scanned photos...");
            self.cache.flush();
        }
    }

    pub fn finish(&self) {
        info!(processed = self.processed, "scan complete");
        self.cache.flush();
    }

    pub fn processed(&self) -> usize {
        self.processed
    }
}

/// A photo with its ranking key. Smaller keys rank better in both modes:
/// the key is the timestamp for oldest-first and its negation for
/// newest-first, with the filename breaking ties.
#[derive(Debug)]
struct Ranked {
    key: f64,
    photo: PhotoFile,
}

impl Ranked {
    fn new(mode: SelectionMode, timestamp: f64, photo: PhotoFile) -> Self {
        let key = match mode {
            SelectionMode::Newest => -timestamp,
            _ => timestamp,
        };
        Self { key, photo }
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .total_cmp(&other.key)
            .then_with(|| self.photo.name().cmp(other.photo.name()))
    }
}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

/// Keeps the `limit` best-ranked photos seen so far in a bounded max-heap.
struct TopK {
    limit: usize,
    heap: BinaryHeap<Ranked>,
}

impl TopK {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            heap: BinaryHeap::with_capacity(limit.saturating_add(1)),
        }
    }

    fn push(&mut self, item: Ranked) {
        if self.heap.len() < self.limit {
            self.heap.push(item);
        } else if self.heap.peek().is_some_and(|worst| item < *worst) {
            self.heap.pop();
            self.heap.push(item);
        }
    }

    /// Best first.
    fn into_photos(self) -> Vec<PhotoFile> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|ranked| ranked.photo)
            .collect()
    }
}

/// Selection over one library directory, reading and updating the shared
/// view history and date cache.
pub struct PhotoSelector<'a> {
    history: &'a ViewHistory,
    dates: &'a DateCache,
    resolver: &'a DateResolver,
    cancel: &'a CancelFlag,
    flush_every: usize,
}

impl<'a> PhotoSelector<'a> {
    pub fn new(
        history: &'a ViewHistory,
        dates: &'a DateCache,
        resolver: &'a DateResolver,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            history,
            dates,
            resolver,
            cancel,
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }

    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every;
        self
    }

    /// Pick up to `count` photos from `dir`, preferring unviewed ones.
    ///
    /// When fewer than `count` unviewed photos remain the history is cleared
    /// and persisted, then the whole directory is selected from again.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] if the cancellation flag is raised.
    pub fn select<R: Rng + ?Sized>(
        &self,
        dir: &Path,
        count: usize,
        mode: SelectionMode,
        rng: &mut R,
    ) -> Result<Vec<PhotoFile>, Error> {
        let count = clamp_count(count);
        if mode.is_date_ranked() {
            info!(count, %mode, "selecting photos (scanning library)...");
        }

        match self.select_pass(dir, count, mode, Pool::Unviewed, rng)? {
            Selection::Selected(photos) => Ok(photos),
            Selection::Exhausted { available, .. } => {
                info!(
                    available,
                    requested = count,
                    "resetting history - not enough unviewed photos"
                );
                self.history.clear();
                self.history.save();
                match self.select_pass(dir, count, mode, Pool::All, rng)? {
                    Selection::Selected(photos) => Ok(photos),
                    Selection::Exhausted { partial, available } => {
                        debug!(available, requested = count, "library smaller than request");
                        Ok(partial)
                    }
                }
            }
        }
    }

    /// One pass over `pool`, without any reset policy.
    ///
    /// # Errors
    /// Returns [`Error::Cancelled`] if the cancellation flag is raised.
    pub fn select_pass<R: Rng + ?Sized>(
        &self,
        dir: &Path,
        count: usize,
        mode: SelectionMode,
        pool: Pool,
        rng: &mut R,
    ) -> Result<Selection, Error> {
        let count = clamp_count(count);
        let candidates = self.candidates(dir, pool)?;
        let available = candidates.len();

        let picked = if mode.is_date_ranked() {
            self.rank_by_date(candidates, count, mode)?
        } else {
            candidates
                .choose_multiple(rng, count.min(available))
                .cloned()
                .collect()
        };

        if available < count {
            Ok(Selection::Exhausted {
                partial: picked,
                available,
            })
        } else {
            Ok(Selection::Selected(picked))
        }
    }

    fn candidates(&self, dir: &Path, pool: Pool) -> Result<Vec<PhotoFile>, Error> {
        let photos = scan_photos(dir, self.cancel)?;
        if pool == Pool::All {
            return Ok(photos);
        }
        let mut unviewed = Vec::with_capacity(photos.len());
        for photo in photos {
            self.cancel.check()?;
            if !self.history.contains(photo.name()) {
                unviewed.push(photo);
            }
        }
        Ok(unviewed)
    }

    fn rank_by_date(
        &self,
        candidates: Vec<PhotoFile>,
        count: usize,
        mode: SelectionMode,
    ) -> Result<Vec<PhotoFile>, Error> {
        let mut progress = ScanProgress::new(self.dates, self.flush_every);
        let mut top = TopK::new(count);
        for photo in candidates {
            self.cancel.check()?;
            let timestamp = self.date_of(&photo);
            progress.record();
            top.push(Ranked::new(mode, timestamp, photo));
        }
        progress.finish();
        Ok(top.into_photos())
    }

    /// Cached timestamp for `photo`, resolving and caching it on a miss.
    fn date_of(&self, photo: &PhotoFile) -> f64 {
        if let Some(ts) = self.dates.get(photo.name()) {
            return ts;
        }
        let ts = self.resolver.resolve(photo.path());
        self.dates.put(photo.name(), ts);
        ts
    }
}
