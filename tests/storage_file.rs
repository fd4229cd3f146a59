//! End-to-end checks of the local file storage back-end.

use std::path::Path;
use std::time::{Duration, Instant};

use barrow::storage::{
    FileType, Storage, StorageOptions, StorageSpecifier, WriteMode,
};
use barrow::Error;

fn local_storage(options: StorageOptions) -> (tempfile::TempDir, Storage) {
    let scratch = tempfile::tempdir().unwrap();
    let specifier = StorageSpecifier::parse(scratch.path().to_str().unwrap()).unwrap();
    let storage = Storage::open(specifier, options).unwrap();
    (scratch, storage)
}

#[test]
fn create_write_close_open_read_round_trip() {
    let (scratch, storage) = local_storage(StorageOptions::default());
    let archive = scratch.path().join("a.bar");

    let payload: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let mut file = storage.create(&archive, payload.len() as u64, false).unwrap();
    for chunk in payload.chunks(64 * 1024) {
        file.write(chunk).unwrap();
    }
    assert_eq!(file.size(), payload.len() as u64);
    file.close().unwrap();

    let info = storage.file_info(&archive).unwrap();
    assert_eq!(info.file_type, FileType::File);
    assert_eq!(info.size, 1024 * 1024);

    let mut file = storage.open_file(&archive).unwrap();
    assert_eq!(file.size(), payload.len() as u64);
    let mut read_back = Vec::new();
    let mut buf = [0u8; 32 * 1024];
    loop {
        let count = file.read(&mut buf).unwrap();
        if count == 0 {
            break;
        }
        read_back.extend_from_slice(&buf[..count]);
    }
    assert_eq!(read_back, payload);
    file.close().unwrap();

    storage.delete(&archive).unwrap();
    assert!(!storage.exists(&archive));
}

#[test]
fn create_refuses_existing_file_in_stop_mode() {
    let (scratch, storage) = local_storage(StorageOptions::default());
    let archive = scratch.path().join("a.bar");
    storage.create(&archive, 0, false).unwrap().close().unwrap();

    let again = storage.create(&archive, 0, false);
    assert!(matches!(again, Err(Error::FileExists { .. })));

    // Force wins over stop mode.
    assert!(storage.create(&archive, 0, true).is_ok());
}

#[test]
fn append_mode_continues_at_the_end() {
    let scratch = tempfile::tempdir().unwrap();
    let specifier = StorageSpecifier::parse(scratch.path().to_str().unwrap()).unwrap();
    let options = StorageOptions {
        write_mode: WriteMode::Append,
        ..Default::default()
    };
    let storage = Storage::open(specifier, options).unwrap();
    let archive = scratch.path().join("a.bar");

    let mut file = storage.create(&archive, 0, false).unwrap();
    file.write(b"first,").unwrap();
    file.close().unwrap();

    let mut file = storage.create(&archive, 0, false).unwrap();
    assert_eq!(file.tell(), 6);
    file.write(b"second").unwrap();
    file.close().unwrap();

    assert_eq!(std::fs::read(&archive).unwrap(), b"first,second");
}

#[test]
fn create_builds_missing_parent_directories() {
    let (scratch, storage) = local_storage(StorageOptions::default());
    let archive = scratch.path().join("deep/below/a.bar");
    let mut file = storage.create(&archive, 0, false).unwrap();
    file.write(b"x").unwrap();
    file.close().unwrap();
    assert!(storage.is_directory(&scratch.path().join("deep/below")));
}

#[test]
fn seek_and_partial_reads() {
    let (scratch, storage) = local_storage(StorageOptions::default());
    let archive = scratch.path().join("a.bar");
    let mut file = storage.create(&archive, 0, false).unwrap();
    file.write(b"0123456789").unwrap();
    file.close().unwrap();

    let mut file = storage.open_file(&archive).unwrap();
    file.seek(4).unwrap();
    assert_eq!(file.tell(), 4);
    let mut buf = [0u8; 3];
    assert_eq!(file.read(&mut buf).unwrap(), 3);
    assert_eq!(&buf, b"456");
    file.close().unwrap();
}

#[test]
fn directory_listing_names_and_sizes() {
    let (scratch, storage) = local_storage(StorageOptions::default());
    std::fs::write(scratch.path().join("one.bar"), b"12").unwrap();
    std::fs::write(scratch.path().join("two.bar"), b"3456").unwrap();
    std::fs::create_dir(scratch.path().join("sub")).unwrap();

    let mut list = storage.open_directory_list(scratch.path()).unwrap();
    let mut seen = Vec::new();
    while !list.end_of_list() {
        let (name, info) = list.read_next().unwrap();
        seen.push((name, info.file_type, info.size));
    }
    assert_eq!(
        seen,
        vec![
            ("one.bar".to_string(), FileType::File, 2),
            ("sub".to_string(), FileType::Directory, seen[1].2),
            ("two.bar".to_string(), FileType::File, 4),
        ]
    );
}

#[test]
fn listing_a_file_is_not_a_directory_error() {
    let (scratch, storage) = local_storage(StorageOptions::default());
    std::fs::write(scratch.path().join("plain"), b"x").unwrap();
    let result = storage.open_directory_list(&scratch.path().join("plain"));
    assert!(matches!(result, Err(Error::NotADirectory { .. })));
}

#[test]
fn rename_moves_the_archive() {
    let (scratch, storage) = local_storage(StorageOptions::default());
    let from = scratch.path().join("a.bar");
    let to = scratch.path().join("b.bar");
    storage.create(&from, 0, false).unwrap().close().unwrap();
    storage.rename(&from, &to).unwrap();
    assert!(!storage.exists(&from));
    assert!(storage.exists(&to));
}

#[test]
fn bandwidth_limiter_throttles_writes() {
    let scratch = tempfile::tempdir().unwrap();
    let specifier = StorageSpecifier::parse(scratch.path().to_str().unwrap()).unwrap();
    let options = StorageOptions {
        bandwidth_limit: Some(512 * 1024),
        ..Default::default()
    };
    let storage = Storage::open(specifier, options).unwrap();
    let archive = scratch.path().join("a.bar");

    // 128 KiB at 512 KiB/s must take at least ~225 ms.
    let begin = Instant::now();
    let mut file = storage.create(&archive, 0, false).unwrap();
    for _ in 0..16 {
        file.write(&[0u8; 8 * 1024]).unwrap();
    }
    file.close().unwrap();
    let elapsed = begin.elapsed();
    assert!(
        elapsed >= Duration::from_millis(225),
        "wrote too fast: {elapsed:?}"
    );
}

#[test]
fn pre_and_post_processing_run_the_templates() {
    let scratch = tempfile::tempdir().unwrap();
    let marker = scratch.path().join("ran");
    let specifier = StorageSpecifier::parse(scratch.path().to_str().unwrap()).unwrap();
    let options = StorageOptions {
        write_pre_command: Some(format!(
            "echo %number \"%file\" >> {}",
            marker.display()
        )),
        write_post_command: Some("true".to_string()),
        ..Default::default()
    };
    let storage = Storage::open(specifier, options).unwrap();
    let archive = scratch.path().join("a.bar");

    storage.pre_process(&archive).unwrap();
    storage.pre_process(&archive).unwrap();
    storage.post_process(&archive).unwrap();

    let log = std::fs::read_to_string(&marker).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("0 "));
    assert!(lines[1].starts_with("1 "));
    assert!(lines[0].ends_with("a.bar"));
}

#[test]
fn failing_post_processing_propagates() {
    let scratch = tempfile::tempdir().unwrap();
    let specifier = StorageSpecifier::parse(scratch.path().to_str().unwrap()).unwrap();
    let options = StorageOptions {
        write_post_command: Some("exit 9".to_string()),
        ..Default::default()
    };
    let storage = Storage::open(specifier, options).unwrap();
    let result = storage.post_process(Path::new("whatever"));
    assert!(matches!(result, Err(Error::ExternalCommand { .. })));
}
