mod common;

use common::{set_mtime, write_file, Harness};
use keeper_engine::{EventType, FileStatus, NoCheckpoint, RelinkOptions, RelinkResolver};
use std::fs;

const T: i64 = 1_700_000_000;

/// Track a 500-byte report.pdf with mtime T, then delete it.
fn missing_report(h: &Harness) -> String {
    let path = h.write("work/report.pdf", &[7u8; 500]);
    set_mtime(&path, T);
    let (file, _) = h.manager.register(&path, "v1", None).unwrap();
    assert_eq!(file.modified_time, T as f64);
    fs::remove_file(&path).unwrap();
    h.manager.verify_file(&file.id).unwrap();
    file.id
}

#[test]
fn test_nearest_mtime_wins() {
    let h = Harness::new();
    let file_id = missing_report(&h);

    let old = h.path("scan/old/report.pdf");
    let new = h.path("scan/new/report.pdf");
    write_file(&old, &[1u8; 500]);
    write_file(&new, &[2u8; 500]);
    set_mtime(&old, T + 1);
    set_mtime(&new, T + 100);

    let summary = RelinkResolver::new(&h.manager)
        .run(&RelinkOptions::new(h.path("scan")), &NoCheckpoint)
        .unwrap();
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.relinked, 1);
    assert_eq!(summary.not_found, 0);
    assert_eq!(summary.scanned, 2);

    let file = h.manager.store().get_file(&file_id).unwrap().unwrap();
    assert_eq!(file.file_path, old);
    assert_eq!(file.status, FileStatus::Ok);
    assert_eq!(file.modified_time, (T + 1) as f64);

    let events = h.manager.store().list_events(&file_id, Some(1), false).unwrap();
    assert_eq!(events[0].event_type, EventType::Relink);
}

#[test]
fn test_hash_mode_prefers_identical_content() {
    let h = Harness::new();
    let file_id = missing_report(&h);

    // Closer mtime, wrong bytes.
    let decoy = h.path("scan/a/report.pdf");
    write_file(&decoy, &[9u8; 500]);
    set_mtime(&decoy, T);
    let genuine = h.path("scan/b/report.pdf");
    write_file(&genuine, &[7u8; 500]);
    set_mtime(&genuine, T + 5_000);

    let mut options = RelinkOptions::new(h.path("scan"));
    options.use_hash = true;
    let summary = RelinkResolver::new(&h.manager)
        .run(&options, &NoCheckpoint)
        .unwrap();
    assert_eq!(summary.relinked, 1);
    assert_eq!(summary.hash_checked, 2);

    let file = h.manager.store().get_file(&file_id).unwrap().unwrap();
    assert_eq!(file.file_path, genuine);
}

#[test]
fn test_no_candidate_counts_not_found() {
    let h = Harness::new();
    let file_id = missing_report(&h);
    write_file(&h.path("scan/other.pdf"), b"unrelated");

    let summary = RelinkResolver::new(&h.manager)
        .run(&RelinkOptions::new(h.path("scan")), &NoCheckpoint)
        .unwrap();
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.relinked, 0);
    assert_eq!(summary.not_found, 1);

    let file = h.manager.store().get_file(&file_id).unwrap().unwrap();
    assert_eq!(file.status, FileStatus::Missing);
}

#[test]
fn test_one_candidate_is_claimed_once() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for dir in ["work/a", "work/b"] {
        let path = h.write(&format!("{}/report.pdf", dir), &[7u8; 500]);
        let (file, _) = h.manager.register(&path, "v1", None).unwrap();
        fs::remove_file(&path).unwrap();
        ids.push(file.id);
    }
    let found = h.path("scan/report.pdf");
    write_file(&found, &[7u8; 500]);

    let summary = RelinkResolver::new(&h.manager)
        .run(&RelinkOptions::new(h.path("scan")), &NoCheckpoint)
        .unwrap();
    assert_eq!(summary.checked, 2);
    assert_eq!(summary.relinked, 1);
    assert_eq!(summary.not_found, 1);

    let owners: Vec<_> = ids
        .iter()
        .map(|id| h.manager.store().get_file(id).unwrap().unwrap())
        .filter(|f| f.file_path == found)
        .collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].status, FileStatus::Ok);
}
