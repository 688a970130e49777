//! Single-flight rotation engine.
//!
//! At most one switch or clear runs at a time, on a dedicated worker thread.
//! Requests that arrive while the worker is busy are rejected, never queued.
//! The worker checks the shared cancellation flag before every directory
//! entry and every file operation; moves already made are kept.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use config_model::SelectionMode;
use crossbeam_channel::{Receiver, Sender, unbounded};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelFlag;
use crate::date::DateResolver;
use crate::error::Error;
use crate::events::{EngineStatus, Operation, OperationState, Outcome, RotationEvent};
use crate::scan::scan_photos;
use crate::select::{DEFAULT_FLUSH_EVERY, MAX_PHOTO_COUNT, PhotoSelector};
use crate::store::{DATE_CACHE_FILENAME, DateCache, HISTORY_FILENAME, ViewHistory};

const WAIT_POLL: Duration = Duration::from_millis(10);

/// Tunables for the engine that do not change between operations.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub read_exif: bool,
    pub flush_every: usize,
    pub shuffle_seed: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            read_exif: true,
            flush_every: DEFAULT_FLUSH_EVERY,
            shuffle_seed: None,
        }
    }
}

/// Parameters of one switch.
#[derive(Debug, Clone)]
pub struct SwitchRequest {
    pub library: PathBuf,
    pub gallery: PathBuf,
    pub count: usize,
    pub mode: SelectionMode,
}

/// Parameters of one clear.
#[derive(Debug, Clone)]
pub struct ClearRequest {
    pub library: PathBuf,
    pub gallery: PathBuf,
}

/// Tally of a gallery -> library return pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReturnReport {
    pub moved_back: usize,
    pub duplicates_removed: usize,
}

struct Shared {
    history: ViewHistory,
    dates: DateCache,
    resolver: DateResolver,
    cancel: CancelFlag,
    busy: AtomicBool,
    flush_every: usize,
    rng: Mutex<StdRng>,
    last_outcome: Mutex<Option<Outcome>>,
    subscribers: Mutex<Vec<Sender<RotationEvent>>>,
}

impl Shared {
    fn publish(&self, event: RotationEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn record(&self, operation: Operation, outcome: &Outcome) {
        info!(%operation, %outcome, "operation finished");
        *lock(&self.last_outcome) = Some(outcome.clone());
    }

    fn persist(&self) {
        self.history.save();
        self.dates.flush();
    }
}

/// Holds the single-flight flag; releasing happens on drop so every exit
/// path of an operation, panics included, frees the engine.
pub struct FlightGuard {
    shared: Arc<Shared>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.shared.busy.store(false, Ordering::SeqCst);
    }
}

/// Owns the rotation state and runs switch/clear operations.
pub struct RotationEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RotationEngine {
    pub fn new(history: ViewHistory, dates: DateCache, options: EngineOptions) -> Self {
        let rng = match options.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            shared: Arc::new(Shared {
                history,
                dates,
                resolver: DateResolver::new(options.read_exif),
                cancel: CancelFlag::new(),
                busy: AtomicBool::new(false),
                flush_every: options.flush_every,
                rng: Mutex::new(rng),
                last_outcome: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Load both records from `state_dir` and build an engine around them.
    pub fn open(state_dir: &Path, options: EngineOptions) -> Self {
        let history = ViewHistory::load(state_dir.join(HISTORY_FILENAME));
        let dates = DateCache::load(state_dir.join(DATE_CACHE_FILENAME));
        Self::new(history, dates, options)
    }

    pub fn history(&self) -> &ViewHistory {
        &self.shared.history
    }

    pub fn dates(&self) -> &DateCache {
        &self.shared.dates
    }

    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst)
    }

    /// Receive `Started`/`Finished` notifications for every later operation.
    pub fn subscribe(&self) -> Receiver<RotationEvent> {
        let (tx, rx) = unbounded();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: if self.is_busy() {
                OperationState::Working
            } else {
                OperationState::Idle
            },
            last_outcome: lock(&self.shared.last_outcome).clone(),
            viewed: self.shared.history.len(),
        }
    }

    /// Claim the engine without blocking.
    ///
    /// # Errors
    /// Returns [`Error::Busy`] when another operation holds it.
    pub fn try_begin(&self) -> Result<FlightGuard, Error> {
        self.shared
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                warn!("operation already in progress");
                Error::Busy
            })?;
        Ok(FlightGuard {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Start a switch on the worker thread.
    ///
    /// Validation happens here, before anything touches the filesystem.
    ///
    /// # Errors
    /// [`Error::Busy`], [`Error::InvalidCount`], [`Error::SamePaths`], or
    /// [`Error::Worker`] if the thread cannot be spawned.
    pub fn switch_now(&self, request: SwitchRequest) -> Result<(), Error> {
        let guard = self.try_begin()?;
        self.shared.cancel.reset();
        let count = validate_count(request.count)?;
        validate_paths(&request.library, &request.gallery)?;
        self.spawn(guard, Operation::Switch, move |shared| {
            run_switch(shared, &request, count)
        })
    }

    /// Start emptying the gallery back into the library on the worker thread.
    ///
    /// # Errors
    /// [`Error::Busy`], [`Error::SamePaths`], or [`Error::Worker`].
    pub fn clear_gallery(&self, request: ClearRequest) -> Result<(), Error> {
        let guard = self.try_begin()?;
        self.shared.cancel.reset();
        validate_paths(&request.library, &request.gallery)?;
        self.spawn(guard, Operation::Clear, move |shared| {
            run_clear(shared, &request)
        })
    }

    /// Forget every viewed photo and every cached date.
    ///
    /// # Errors
    /// Returns [`Error::Busy`] while a rotation is running.
    pub fn reset_history(&self) -> Result<(), Error> {
        let _guard = self.try_begin()?;
        self.shared.history.clear();
        self.shared.history.save();
        self.shared.dates.clear();
        self.shared.dates.flush();
        info!("history and cache reset");
        Ok(())
    }

    /// Ask the running operation to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Wait up to `timeout` for the worker to finish.
    /// Returns `true` if no worker is running afterwards.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let finished = match lock(&self.worker).as_ref() {
                None => return true,
                Some(handle) => handle.is_finished(),
            };
            if finished {
                let handle = lock(&self.worker).take();
                if let Some(handle) = handle
                    && handle.join().is_err()
                {
                    error!("rotation worker terminated abnormally");
                }
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_POLL);
        }
    }

    /// Cancel, wait up to `grace` for the worker, then persist both stores.
    pub fn shutdown(&self, grace: Duration) {
        self.cancel();
        if !self.wait(grace) {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "rotation worker still running at shutdown"
            );
        }
        self.shared.persist();
        info!("rotation engine shut down");
    }

    fn spawn<F>(&self, guard: FlightGuard, operation: Operation, job: F) -> Result<(), Error>
    where
        F: FnOnce(&Shared) -> Result<Outcome, Error> + Send + 'static,
    {
        let mut worker = lock(&self.worker);
        if let Some(previous) = worker.take()
            && previous.join().is_err()
        {
            error!("previous rotation worker terminated abnormally");
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("rotation-worker".into())
            .spawn(move || {
                shared.publish(RotationEvent::Started(operation));
                let result = panic::catch_unwind(AssertUnwindSafe(|| job(shared.as_ref())));
                let outcome = match result {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(Error::Cancelled)) => {
                        shared.persist();
                        Outcome::Cancelled
                    }
                    Ok(Err(err)) => {
                        error!(%operation, "error during operation: {err}");
                        shared.persist();
                        Outcome::Failed(err.to_string())
                    }
                    Err(_) => {
                        error!(%operation, "rotation worker panicked");
                        shared.persist();
                        Outcome::Failed("rotation worker panicked".to_string())
                    }
                };
                shared.record(operation, &outcome);
                // Subscribers may start the next operation as soon as they see `Finished`.
                drop(guard);
                shared.publish(RotationEvent::Finished { operation, outcome });
            })
            .map_err(|err| Error::Worker(err.to_string()))?;
        *worker = Some(handle);
        Ok(())
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn validate_count(count: usize) -> Result<usize, Error> {
    if count == 0 {
        return Err(Error::InvalidCount(count));
    }
    if count > MAX_PHOTO_COUNT {
        warn!(
            count,
            max = MAX_PHOTO_COUNT,
            "photo count exceeds maximum, using maximum"
        );
        return Ok(MAX_PHOTO_COUNT);
    }
    Ok(count)
}

/// Reject a gallery that is the library itself once both are made absolute
/// and symlinks resolved.
pub fn validate_paths(library: &Path, gallery: &Path) -> Result<(), Error> {
    let library = resolve_path(library);
    let gallery = resolve_path(gallery);
    if library == gallery {
        return Err(Error::SamePaths(library));
    }
    Ok(())
}

/// Canonical form of `path`, tolerating components that do not exist yet:
/// the deepest existing ancestor is canonicalized and the rest re-appended.
fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut tail = Vec::new();
    let mut cursor = absolute.as_path();
    loop {
        if let Ok(base) = cursor.canonicalize() {
            return tail.iter().rev().fold(base, |acc, part| acc.join(part));
        }
        match (cursor.parent(), cursor.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                cursor = parent;
            }
            _ => return absolute,
        }
    }
}

/// Move every gallery photo back to the library. A photo whose name already
/// exists in the library is a duplicate: the gallery copy is deleted and the
/// name leaves the view history.
fn return_gallery(shared: &Shared, library: &Path, gallery: &Path) -> Result<ReturnReport, Error> {
    let mut report = ReturnReport::default();
    for photo in scan_photos(gallery, &shared.cancel)? {
        shared.cancel.check()?;
        let target = library.join(photo.name());
        if target.exists() {
            match fs::remove_file(photo.path()) {
                Ok(()) => {
                    debug!(name = photo.name(), "removed duplicate from gallery");
                    shared.history.remove(photo.name());
                    report.duplicates_removed += 1;
                }
                Err(err) => error!(path = %photo.path().display(), "error moving photo: {err}"),
            }
        } else {
            match fs::rename(photo.path(), &target) {
                Ok(()) => {
                    debug!(name = photo.name(), "returned photo to library");
                    report.moved_back += 1;
                }
                Err(err) => error!(path = %photo.path().display(), "error moving photo: {err}"),
            }
        }
    }
    if report.duplicates_removed > 0 {
        info!(count = report.duplicates_removed, "removed duplicate(s)");
    }
    if report.moved_back > 0 {
        info!(count = report.moved_back, "moved photos back to library");
    }
    Ok(report)
}

fn run_switch(shared: &Shared, request: &SwitchRequest, count: usize) -> Result<Outcome, Error> {
    info!(
        library = %request.library.display(),
        gallery = %request.gallery.display(),
        count,
        mode = %request.mode,
        "starting photo switch..."
    );
    if !request.library.is_dir() {
        return Err(Error::LibraryMissing(request.library.clone()));
    }
    shared.cancel.check()?;
    fs::create_dir_all(&request.gallery)?;

    return_gallery(shared, &request.library, &request.gallery)?;
    shared.history.save();

    let selector = PhotoSelector::new(
        &shared.history,
        &shared.dates,
        &shared.resolver,
        &shared.cancel,
    )
    .with_flush_every(shared.flush_every);
    let selected = {
        let mut rng = lock(&shared.rng);
        selector.select(&request.library, count, request.mode, &mut *rng)?
    };

    let mut moved = 0;
    for photo in &selected {
        shared.cancel.check()?;
        let dest = request.gallery.join(photo.name());
        if dest.exists() {
            warn!(name = photo.name(), "gallery already holds this filename; skipping");
            continue;
        }
        match fs::rename(photo.path(), &dest) {
            Ok(()) => {
                debug!(name = photo.name(), "moved photo to gallery");
                shared.history.add(photo.name());
                moved += 1;
            }
            Err(err) => error!(path = %photo.path().display(), "error moving photo: {err}"),
        }
    }

    shared.persist();
    info!(moved, "switch complete: moved photos to gallery");
    Ok(Outcome::Switched(moved))
}

fn run_clear(shared: &Shared, request: &ClearRequest) -> Result<Outcome, Error> {
    info!(gallery = %request.gallery.display(), "starting clear gallery...");
    if !request.gallery.is_dir() {
        return Ok(Outcome::GalleryMissing);
    }
    let report = return_gallery(shared, &request.library, &request.gallery)?;
    shared.history.save();
    info!(moved_back = report.moved_back, "clear complete");
    Ok(Outcome::ClearedBack(report.moved_back))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine_in(dir: &Path) -> RotationEngine {
        RotationEngine::open(
            dir,
            EngineOptions {
                read_exif: false,
                shuffle_seed: Some(7),
                ..EngineOptions::default()
            },
        )
    }

    #[test]
    fn busy_engine_rejects_without_touching_disk() {
        let tmp = tempdir().unwrap();
        let library = tmp.path().join("library");
        fs::create_dir_all(&library).unwrap();
        fs::write(library.join("a.jpg"), b"x").unwrap();
        let gallery = library.join("Gallery");
        let engine = engine_in(tmp.path());

        let guard = engine.try_begin().expect("engine idle");
        assert_eq!(engine.status().state, OperationState::Working);

        let request = SwitchRequest {
            library: library.clone(),
            gallery: gallery.clone(),
            count: 1,
            mode: SelectionMode::Random,
        };
        assert!(matches!(engine.switch_now(request.clone()), Err(Error::Busy)));
        assert!(matches!(
            engine.clear_gallery(ClearRequest {
                library: library.clone(),
                gallery: gallery.clone(),
            }),
            Err(Error::Busy)
        ));
        assert!(matches!(engine.reset_history(), Err(Error::Busy)));
        assert!(!gallery.exists(), "rejected switch must not create the gallery");
        assert!(library.join("a.jpg").exists());

        drop(guard);
        engine.switch_now(request).expect("engine free again");
        assert!(engine.wait(Duration::from_secs(5)));
        assert!(gallery.join("a.jpg").exists());
        assert!(engine.history().contains("a.jpg"));
    }

    #[test]
    fn zero_count_is_rejected_and_releases_engine() {
        let tmp = tempdir().unwrap();
        let engine = engine_in(tmp.path());
        let request = SwitchRequest {
            library: tmp.path().join("library"),
            gallery: tmp.path().join("library/Gallery"),
            count: 0,
            mode: SelectionMode::Random,
        };
        assert!(matches!(engine.switch_now(request), Err(Error::InvalidCount(0))));
        assert!(!engine.is_busy());
    }

    #[test]
    fn oversized_count_is_clamped() {
        assert_eq!(validate_count(50).unwrap(), 50);
        assert_eq!(validate_count(20_000).unwrap(), MAX_PHOTO_COUNT);
    }

    #[test]
    fn resolve_path_handles_missing_tail() {
        let tmp = tempdir().unwrap();
        let missing = tmp.path().join("not-yet").join("Gallery");
        let resolved = resolve_path(&missing);
        assert_eq!(
            resolved,
            tmp.path().canonicalize().unwrap().join("not-yet").join("Gallery")
        );
    }

    #[test]
    fn dot_gallery_is_same_as_library() {
        let tmp = tempdir().unwrap();
        let err = validate_paths(tmp.path(), &tmp.path().join(".")).unwrap_err();
        assert!(matches!(err, Error::SamePaths(_)));
        assert!(validate_paths(tmp.path(), &tmp.path().join("Gallery")).is_ok());
    }
}
