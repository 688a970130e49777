use photo_rotation::SelectionMode;
use photo_rotation::error::Error;
use photo_rotation::events::{Operation, OperationState, Outcome, RotationEvent};
use photo_rotation::rotation::{ClearRequest, EngineOptions, RotationEngine, SwitchRequest};
use photo_rotation::store::{DATE_CACHE_FILENAME, DateCache, HISTORY_FILENAME, ViewHistory};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(30);

fn engine_in(state: &Path) -> RotationEngine {
    RotationEngine::open(
        state,
        EngineOptions {
            read_exif: false,
            shuffle_seed: Some(11),
            ..EngineOptions::default()
        },
    )
}

fn populate(dir: &Path, names: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    for name in names {
        fs::write(dir.join(name), name.as_bytes()).unwrap();
    }
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

fn switch(library: &Path, count: usize, mode: SelectionMode) -> SwitchRequest {
    SwitchRequest {
        library: library.to_path_buf(),
        gallery: library.join("Gallery"),
        count,
        mode,
    }
}

fn clear(library: &Path) -> ClearRequest {
    ClearRequest {
        library: library.to_path_buf(),
        gallery: library.join("Gallery"),
    }
}

fn finished(rx: &crossbeam_channel::Receiver<RotationEvent>) -> (Operation, Outcome) {
    loop {
        match rx.recv_timeout(WAIT).expect("timeout waiting for rotation event") {
            RotationEvent::Finished { operation, outcome } => return (operation, outcome),
            RotationEvent::Started(_) => {}
        }
    }
}

#[test]
fn switch_moves_photos_and_records_history() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("lib");
    populate(&lib, &["a.jpg", "b.jpg", "c.jpg", "d.jpg", "notes.txt"]);
    let engine = engine_in(tmp.path());
    let events = engine.subscribe();

    engine.switch_now(switch(&lib, 2, SelectionMode::Random)).unwrap();
    assert_eq!(
        events.recv_timeout(WAIT).unwrap(),
        RotationEvent::Started(Operation::Switch)
    );
    assert_eq!(finished(&events), (Operation::Switch, Outcome::Switched(2)));
    assert!(engine.wait(WAIT));

    let gallery = listing(&lib.join("Gallery"));
    assert_eq!(gallery.len(), 2);
    assert_eq!(listing(&lib).len(), 3);
    for name in &gallery {
        assert!(engine.history().contains(name));
    }

    let persisted = ViewHistory::load(tmp.path().join(HISTORY_FILENAME));
    assert_eq!(persisted.snapshot(), engine.history().snapshot());

    let status = engine.status();
    assert_eq!(status.state, OperationState::Idle);
    assert_eq!(status.last_outcome, Some(Outcome::Switched(2)));
    assert_eq!(status.viewed, 2);
}

#[test]
fn next_switch_returns_previous_gallery_first() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("lib");
    populate(&lib, &["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
    let engine = engine_in(tmp.path());

    engine.switch_now(switch(&lib, 2, SelectionMode::Random)).unwrap();
    assert!(engine.wait(WAIT));
    let first = listing(&lib.join("Gallery"));

    engine.switch_now(switch(&lib, 2, SelectionMode::Random)).unwrap();
    assert!(engine.wait(WAIT));
    let second = listing(&lib.join("Gallery"));

    assert_eq!(second.len(), 2);
    assert!(first.iter().all(|name| !second.contains(name)));
    assert_eq!(listing(&lib).len(), 2);
    assert_eq!(engine.history().len(), 4);
}

#[test]
fn newest_mode_uses_cached_dates() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("lib");
    populate(&lib, &["a.jpg", "b.jpg", "c.jpg"]);
    {
        let cache = DateCache::load(tmp.path().join(DATE_CACHE_FILENAME));
        cache.put("a.jpg", 10.0);
        cache.put("b.jpg", 30.0);
        cache.put("c.jpg", 20.0);
        assert!(cache.flush());
    }
    let engine = engine_in(tmp.path());

    engine.switch_now(switch(&lib, 1, SelectionMode::Newest)).unwrap();
    assert!(engine.wait(WAIT));
    assert_eq!(listing(&lib.join("Gallery")), vec!["b.jpg"]);
}

#[test]
fn duplicates_in_gallery_are_deleted_and_forgotten() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("lib");
    let gallery = lib.join("Gallery");
    populate(&lib, &["a.jpg"]);
    populate(&gallery, &["a.jpg", "b.jpg"]);
    let engine = engine_in(tmp.path());
    engine.history().add("a.jpg");
    engine.history().add("b.jpg");
    let events = engine.subscribe();

    engine.clear_gallery(clear(&lib)).unwrap();
    assert_eq!(finished(&events), (Operation::Clear, Outcome::ClearedBack(1)));
    assert!(engine.wait(WAIT));

    assert!(listing(&gallery).is_empty());
    assert_eq!(listing(&lib), vec!["a.jpg", "b.jpg"]);
    assert_eq!(fs::read(lib.join("a.jpg")).unwrap(), b"a.jpg");
    assert!(!engine.history().contains("a.jpg"));
    assert!(engine.history().contains("b.jpg"));
    assert!(!ViewHistory::load(tmp.path().join(HISTORY_FILENAME)).contains("a.jpg"));
}

#[test]
fn clear_without_gallery_reports_missing() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("lib");
    populate(&lib, &["a.jpg"]);
    let engine = engine_in(tmp.path());
    let events = engine.subscribe();

    engine.clear_gallery(clear(&lib)).unwrap();
    assert_eq!(finished(&events), (Operation::Clear, Outcome::GalleryMissing));
    assert!(engine.wait(WAIT));
    assert!(!lib.join("Gallery").exists());
    assert_eq!(
        engine.status().last_outcome.unwrap().to_string(),
        "Gallery directory does not exist"
    );
}

#[test]
fn gallery_equal_to_library_is_rejected_before_any_change() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("lib");
    populate(&lib, &["a.jpg", "b.jpg"]);
    fs::create_dir_all(lib.join("sub")).unwrap();
    let engine = engine_in(tmp.path());

    let request = SwitchRequest {
        library: lib.clone(),
        gallery: lib.join("sub").join(".."),
        count: 1,
        mode: SelectionMode::Random,
    };
    assert!(matches!(engine.switch_now(request), Err(Error::SamePaths(_))));

    let request = ClearRequest {
        library: lib.clone(),
        gallery: lib.clone(),
    };
    assert!(matches!(engine.clear_gallery(request), Err(Error::SamePaths(_))));

    assert!(!engine.is_busy());
    assert_eq!(listing(&lib), vec!["a.jpg", "b.jpg"]);
    assert!(!lib.join("Gallery").exists());
    assert!(engine.history().is_empty());
}

#[cfg(unix)]
#[test]
fn symlinked_gallery_pointing_at_library_is_rejected() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("lib");
    populate(&lib, &["a.jpg"]);
    let link = tmp.path().join("link");
    std::os::unix::fs::symlink(&lib, &link).unwrap();
    let engine = engine_in(tmp.path());

    let request = SwitchRequest {
        library: lib.clone(),
        gallery: link,
        count: 1,
        mode: SelectionMode::Random,
    };
    assert!(matches!(engine.switch_now(request), Err(Error::SamePaths(_))));
    assert_eq!(listing(&lib), vec!["a.jpg"]);
}

#[test]
fn missing_library_fails_the_switch() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("nowhere");
    let engine = engine_in(tmp.path());
    let events = engine.subscribe();

    engine.switch_now(switch(&lib, 1, SelectionMode::Random)).unwrap();
    let (operation, outcome) = finished(&events);
    assert_eq!(operation, Operation::Switch);
    assert!(matches!(outcome, Outcome::Failed(ref msg) if msg.contains("nowhere")));
    assert!(engine.wait(WAIT));
    assert!(!engine.is_busy());
    assert!(!lib.exists());
}

#[test]
fn reset_history_empties_both_records() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("lib");
    populate(&lib, &["a.jpg", "b.jpg"]);
    let engine = engine_in(tmp.path());

    engine.switch_now(switch(&lib, 1, SelectionMode::Oldest)).unwrap();
    assert!(engine.wait(WAIT));
    assert_eq!(engine.history().len(), 1);
    assert_eq!(engine.dates().len(), 2);

    engine.reset_history().unwrap();
    assert!(engine.history().is_empty());
    assert!(engine.dates().is_empty());
    assert!(ViewHistory::load(tmp.path().join(HISTORY_FILENAME)).is_empty());
    assert!(DateCache::load(tmp.path().join(DATE_CACHE_FILENAME)).is_empty());
}

#[test]
fn cancellation_keeps_files_and_records_consistent() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("lib");
    let gallery = lib.join("Gallery");
    let names: Vec<String> = (0..10_000).map(|i| format!("img{i:05}.jpg")).collect();
    fs::create_dir_all(&gallery).unwrap();
    for (i, name) in names.iter().enumerate() {
        // Half start in the gallery so the return pass has work too.
        let dir: PathBuf = if i % 2 == 0 { lib.clone() } else { gallery.clone() };
        fs::write(dir.join(name), b"x").unwrap();
    }

    let engine = engine_in(tmp.path());
    let events = engine.subscribe();
    engine
        .switch_now(switch(&lib, 10_000, SelectionMode::Newest))
        .unwrap();
    engine.cancel();
    assert_eq!(finished(&events), (Operation::Switch, Outcome::Cancelled));
    assert!(engine.wait(WAIT));
    engine.shutdown(Duration::from_secs(1));

    // A completed run would have filled the gallery with all 10,000 photos;
    // a cancelled one never gets past the return pass.
    let in_gallery = listing(&gallery);
    assert!(in_gallery.len() <= 5_000, "{} photos in gallery", in_gallery.len());
    assert!(engine.history().len() < 10_000);

    let mut all = listing(&lib);
    all.extend(in_gallery);
    all.sort();
    assert_eq!(all, names, "no photo may be lost or duplicated");

    let history_path = tmp.path().join(HISTORY_FILENAME);
    if history_path.exists() {
        let _: Vec<String> = serde_json::from_slice(&fs::read(&history_path).unwrap()).unwrap();
    }
    let cache_path = tmp.path().join(DATE_CACHE_FILENAME);
    if cache_path.exists() {
        let _: std::collections::HashMap<String, f64> =
            serde_json::from_slice(&fs::read(&cache_path).unwrap()).unwrap();
    }

    // The engine is usable again after a cancelled run.
    let rerun = engine_in(tmp.path());
    rerun.clear_gallery(clear(&lib)).unwrap();
    assert!(rerun.wait(WAIT));
    assert!(listing(&gallery).is_empty());
    assert_eq!(listing(&lib).len(), 10_000);
}

#[test]
fn subscriber_can_start_next_operation_on_finished() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("lib");
    populate(&lib, &["a.jpg", "b.jpg", "c.jpg", "d.jpg"]);
    let engine = engine_in(tmp.path());
    let events = engine.subscribe();

    engine.switch_now(switch(&lib, 1, SelectionMode::Random)).unwrap();
    for round in 0..20 {
        let (operation, _) = finished(&events);
        let next = match operation {
            Operation::Switch => engine.clear_gallery(clear(&lib)),
            Operation::Clear => engine.switch_now(switch(&lib, 1, SelectionMode::Random)),
        };
        assert!(next.is_ok(), "round {round}: engine still busy after Finished");
    }
    finished(&events);
    assert!(engine.wait(WAIT));
}

#[test]
fn unwritable_state_dir_does_not_abort_switch() {
    let tmp = tempdir().unwrap();
    let lib = tmp.path().join("lib");
    populate(&lib, &["a.jpg", "b.jpg", "c.jpg"]);
    // A regular file where the state directory should be.
    let state = tmp.path().join("state");
    fs::write(&state, b"not a directory").unwrap();
    let engine = engine_in(&state);
    let events = engine.subscribe();

    engine.switch_now(switch(&lib, 2, SelectionMode::Oldest)).unwrap();
    assert_eq!(finished(&events), (Operation::Switch, Outcome::Switched(2)));
    assert!(engine.wait(WAIT));

    assert_eq!(listing(&lib.join("Gallery")).len(), 2);
    assert_eq!(listing(&lib).len(), 1);
    assert_eq!(engine.history().len(), 2);
    assert!(engine.dates().is_dirty());
    assert_eq!(fs::read(&state).unwrap(), b"not a directory");
}
