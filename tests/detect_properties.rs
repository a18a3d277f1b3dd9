use assert_fs::prelude::*;
use chrono::{Local, TimeZone};
use filetime::FileTime;
use stackcopy::detect::{Outcome, RejectReason};
use stackcopy::{FileRef, StackPolicy, run_detect};
use std::collections::HashSet;

fn base() -> i64 {
    Local
        .with_ymd_and_hms(2024, 7, 1, 12, 0, 0)
        .single()
        .unwrap()
        .timestamp()
}

/// Write `name` with an mtime `millis` after the base time.
fn put(dir: &assert_fs::TempDir, name: &str, millis: i64) {
    let f = dir.child(name);
    f.write_str(name).unwrap();
    let t = base() * 1000 + millis;
    let ft = FileTime::from_unix_time(t / 1000, ((t % 1000) * 1_000_000) as u32);
    filetime::set_file_mtime(f.path(), ft).unwrap();
}

fn all(_: &FileRef) -> bool {
    true
}

#[test]
fn twenty_frame_burst_is_not_a_stack() {
    let dir = assert_fs::TempDir::new().unwrap();
    for i in 1..=20 {
        put(&dir, &format!("P70100{i:02}.ORF"), i * 500);
    }
    put(&dir, "P7010021.JPG", 20 * 500 + 5000);

    let d = run_detect(dir.path(), StackPolicy::default(), &all).unwrap();
    assert!(d.accepted.is_empty());
    assert_eq!(d.rejected.len(), 1);
    assert_eq!(
        d.rejected[0].outcome,
        Outcome::Rejected(RejectReason::OversizedBurst)
    );
}

#[test]
fn two_stacks_never_share_inputs_and_detection_repeats() {
    let dir = assert_fs::TempDir::new().unwrap();
    // first stack: frames 1-4, output 5
    for i in 1..=4 {
        put(&dir, &format!("P70100{i:02}.ORF"), i * 1000);
    }
    put(&dir, "P7010005.JPG", 30_000);
    // second stack right after: frames 6-9, output 10
    for i in 6..=9 {
        put(&dir, &format!("P70100{i:02}.ORF"), 200_000 + i * 1000);
    }
    put(&dir, "P7010010.JPG", 240_000);

    let first = run_detect(dir.path(), StackPolicy::default(), &all).unwrap();
    assert_eq!(first.accepted.len(), 2);
    let mut seen = HashSet::new();
    for c in &first.accepted {
        assert!((3..=15).contains(&c.input_stems.len()));
        for s in &c.input_stems {
            assert!(seen.insert(s.clone()), "{s} used twice");
        }
    }

    let second = run_detect(dir.path(), StackPolicy::default(), &all).unwrap();
    assert_eq!(first.accepted, second.accepted);
    assert_eq!(first.rejected, second.rejected);
}
