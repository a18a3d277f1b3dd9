use assert_fs::prelude::*;
use chrono::{Local, TimeZone};
use filetime::FileTime;
use stackcopy::fs_ops::SpaceGuard;
use stackcopy::{FileRef, SortOptions, StackError, StackPolicy, run_sort};

fn noon(day: u32) -> i64 {
    Local
        .with_ymd_and_hms(2024, 7, day, 12, 0, 0)
        .single()
        .unwrap()
        .timestamp()
}

fn put(dir: &assert_fs::TempDir, name: &str, secs: i64) {
    let f = dir.child(name);
    f.write_str(name).unwrap();
    filetime::set_file_mtime(f.path(), FileTime::from_unix_time(secs, 0)).unwrap();
}

/// One file of an input pair belongs to a day whose archive directory can't be created: the
/// group is reported as partial, the sweep retries the file, and it is counted once.
#[test]
fn blocked_day_directory_splits_a_pair() {
    let t = noon(1);
    let src = assert_fs::TempDir::new().unwrap();
    let archive = assert_fs::TempDir::new().unwrap();
    put(&src, "P7010001.ORF", t);
    put(&src, "P7010002.ORF", t + 1);
    put(&src, "P7010002.JPG", noon(2));
    put(&src, "P7010003.ORF", t + 2);
    put(&src, "P7010004.JPG", t + 10);
    put(&src, "P7010050.ORF", t + 600);
    archive.child("2024").create_dir_all().unwrap();
    archive.child("2024/2024-07-02").write_str("in the way").unwrap();

    let opts = SortOptions {
        source: src.path().to_path_buf(),
        archive_root: archive.path().to_path_buf(),
        copy: false,
        prefix: None,
        force: false,
        dry_run: false,
        jobs: 2,
        policy: StackPolicy::default(),
        space: SpaceGuard::new(0, 0.0),
    };
    let s = run_sort(&opts, &|_: &FileRef| true, &|_: &str| false).unwrap();

    assert_eq!(s.stacks_accepted, 1);
    assert_eq!(s.outputs_relocated, 1);
    assert_eq!(s.inputs_relocated, 3);
    assert_eq!(s.inputs_failed, 1);
    assert_eq!(s.partial_groups.len(), 1);
    assert!(matches!(
        &s.partial_groups[0],
        StackError::PartialGroupFailure { stem, succeeded: 1, enqueued: 2 } if stem == "P7010002"
    ));
    assert_eq!(s.partial_groups[0].code(), 23);

    // the sweep retried the stray jpg alongside the standalone frame
    assert_eq!(s.swept, 1);
    assert_eq!(s.sweep_failed, 1);
    assert_eq!(s.failures(), 1);
    assert!(archive.child("2024/2024-07-01/P7010002.ORF").path().is_file());
    assert!(archive.child("2024/2024-07-01/P7010050.ORF").path().is_file());
    assert!(src.child("P7010002.JPG").path().is_file());
    assert_eq!(std::fs::read_dir(src.path()).unwrap().count(), 1);
}
