use assert_fs::prelude::*;
use chrono::{Local, TimeZone};
use filetime::FileTime;
use std::process::Command;

fn put(dir: &assert_fs::TempDir, name: &str, secs: i64) {
    let f = dir.child(name);
    f.write_str(name).unwrap();
    filetime::set_file_mtime(f.path(), FileTime::from_unix_time(secs, 0)).unwrap();
}

fn run(args: &[&str], dir: &assert_fs::TempDir) -> (bool, String) {
    let cfg = assert_fs::NamedTempFile::new("config.xml").unwrap();
    cfg.write_str("<config></config>").unwrap();
    let out = Command::new(assert_cmd::cargo::cargo_bin!("stackcopy"))
        .env("STACKCOPY_CONFIG", cfg.path())
        .args(args)
        .arg(dir.path())
        .output()
        .expect("spawn binary");
    (out.status.success(), String::from_utf8_lossy(&out.stdout).into_owned())
}

#[test]
fn prints_stacks_and_rejections_with_verbose() {
    let t = Local
        .with_ymd_and_hms(2024, 7, 1, 12, 0, 0)
        .single()
        .unwrap()
        .timestamp();
    let dir = assert_fs::TempDir::new().unwrap();
    put(&dir, "P7010001.ORF", t);
    put(&dir, "P7010002.ORF", t + 1);
    put(&dir, "P7010003.ORF", t + 2);
    put(&dir, "P7010004.JPG", t + 10);
    // lone jpg after a long pause: only one possible input
    put(&dir, "P7010005.JPG", t + 2000);

    let (ok, stdout) = run(&["detect"], &dir);
    assert!(ok);
    assert!(stdout.contains("P7010004: 3 inputs (P7010001 .. P7010003)"), "stdout: {stdout}");
    assert!(!stdout.contains("rejected ("));

    let (ok, stdout) = run(&["-v", "detect"], &dir);
    assert!(ok);
    assert!(stdout.contains("P7010005: rejected (too-few-inputs"), "stdout: {stdout}");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 5);
}
