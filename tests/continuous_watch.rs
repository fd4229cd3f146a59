//! Continuous watcher against the real filesystem notification
//! backend.

#![cfg(target_os = "linux")]

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use barrow::continuous::backend::NotifyBackend;
use barrow::continuous::ContinuousService;
use barrow_common::{EntryKind, EntryList, PatternKind};

fn entries_for(pattern: &str) -> EntryList {
    let mut entries = EntryList::new();
    entries
        .append(EntryKind::File, PatternKind::Glob, pattern)
        .unwrap();
    entries
}

fn wait_for_row(service: &ContinuousService, job: Uuid, schedule: Uuid) -> Option<PathBuf> {
    for _ in 0..300 {
        if let Some((_, path)) = service.list_next(job, schedule).unwrap() {
            return Some(path);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    None
}

#[test]
fn created_file_is_listed_once() {
    let scratch = tempfile::tempdir().unwrap();
    let watched = scratch.path().join("w");
    fs::create_dir_all(&watched).unwrap();

    let backend = NotifyBackend::new().unwrap();
    let service =
        ContinuousService::start(&scratch.path().join("continuous.db"), Box::new(backend))
            .unwrap();
    let job = Uuid::new_v4();
    let schedule = Uuid::new_v4();

    let pattern = format!("{}/*", watched.display());
    assert!(service.init_notify(job, schedule, &entries_for(&pattern)));
    assert!(service.sync(Duration::from_secs(10)));

    fs::write(watched.join("f"), b"fresh bytes").unwrap();

    // Creating the file fires several events (create, close-write);
    // let them all settle so they collapse into the one row.
    let path = wait_for_row(&service, job, schedule).expect("change row for created file");
    assert_eq!(path, watched.join("f"));
    std::thread::sleep(Duration::from_millis(500));
    service.list_next(job, schedule).unwrap();

    // All rows consumed; nothing further until a new event.
    assert_eq!(service.list_next(job, schedule).unwrap(), None);
    service.stop();
}

#[test]
fn events_after_done_produce_no_rows() {
    let scratch = tempfile::tempdir().unwrap();
    let watched = scratch.path().join("w");
    fs::create_dir_all(&watched).unwrap();

    let backend = NotifyBackend::new().unwrap();
    let service =
        ContinuousService::start(&scratch.path().join("continuous.db"), Box::new(backend))
            .unwrap();
    let job = Uuid::new_v4();
    let schedule = Uuid::new_v4();

    let pattern = format!("{}/*", watched.display());
    assert!(service.init_notify(job, schedule, &entries_for(&pattern)));
    assert!(service.sync(Duration::from_secs(10)));
    assert!(service.done_notify(job, schedule));
    assert!(service.sync(Duration::from_secs(10)));

    fs::write(watched.join("late"), b"too late").unwrap();
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(service.list_next(job, schedule).unwrap(), None);
    service.stop();
}

#[test]
fn new_subdirectory_extends_the_watch_set() {
    let scratch = tempfile::tempdir().unwrap();
    let watched = scratch.path().join("w");
    fs::create_dir_all(&watched).unwrap();

    let backend = NotifyBackend::new().unwrap();
    let service =
        ContinuousService::start(&scratch.path().join("continuous.db"), Box::new(backend))
            .unwrap();
    let job = Uuid::new_v4();
    let schedule = Uuid::new_v4();

    let pattern = format!("{}/*", watched.display());
    assert!(service.init_notify(job, schedule, &entries_for(&pattern)));
    assert!(service.sync(Duration::from_secs(10)));
    assert_eq!(service.watch_count(), 1);

    fs::create_dir(watched.join("sub")).unwrap();
    let path = wait_for_row(&service, job, schedule).expect("change row for new directory");
    assert_eq!(path, watched.join("sub"));

    for _ in 0..300 {
        if service.watch_count() == 2 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(service.watch_count(), 2);

    // A file in the fresh subdirectory is picked up as well.
    fs::write(watched.join("sub/inner"), b"x").unwrap();
    let path = wait_for_row(&service, job, schedule).expect("change row below new directory");
    assert_eq!(path, watched.join("sub/inner"));
    service.stop();
}
