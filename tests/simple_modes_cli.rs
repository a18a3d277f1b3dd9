use assert_fs::prelude::*;
use std::process::Command;

fn fixture() -> assert_fs::TempDir {
    let dir = assert_fs::TempDir::new().unwrap();
    dir.child("P7010001.ORF").write_str("raw").unwrap();
    dir.child("P7010001.JPG").write_str("paired").unwrap();
    dir.child("P7010002.JPG").write_str("stack").unwrap();
    dir.child("P7010003 stacked.JPG").write_str("done").unwrap();
    dir
}

fn bin(cfg: &assert_fs::NamedTempFile) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("stackcopy"));
    cmd.env("STACKCOPY_CONFIG", cfg.path());
    cmd
}

fn config() -> assert_fs::NamedTempFile {
    let cfg = assert_fs::NamedTempFile::new("config.xml").unwrap();
    cfg.write_str("<config><reserve_min_bytes>0</reserve_min_bytes><reserve_percent>0</reserve_percent></config>")
        .unwrap();
    cfg
}

#[test]
fn stackcopy_mode_reports_counts() {
    let dir = fixture();
    let cfg = config();
    let out = bin(&cfg).arg("stackcopy").arg(dir.path()).output().unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        stdout.contains("Copied 'P7010002.JPG' to 'P7010002 stacked.JPG'"),
        "stdout: {stdout}"
    );
    assert!(stdout.contains("stackcopy: 1 processed, 1 skipped, 0 failed"), "stdout: {stdout}");
    assert!(dir.child("stacked/P7010002 stacked.JPG").path().is_file());
}

#[test]
fn rename_dry_run_says_would() {
    let dir = fixture();
    let cfg = config();
    let out = bin(&cfg)
        .args(["--dry-run", "--prefix", "focus", "rename"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        stdout.contains("Would rename 'P7010002.JPG' to 'P7010002 focus stacked.JPG'"),
        "stdout: {stdout}"
    );
    assert!(dir.child("P7010002.JPG").path().is_file());
}

#[test]
fn copy_conflict_fails_without_force() {
    let src = fixture();
    let dest = assert_fs::TempDir::new().unwrap();
    dest.child("P7010002.JPG").write_str("other").unwrap();
    let cfg = config();

    let out = bin(&cfg).arg("copy").arg(src.path()).arg(dest.path()).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stdout).contains("0 processed, 1 skipped, 1 failed"));

    let out = bin(&cfg)
        .args(["copy", "--force"])
        .arg(src.path())
        .arg(dest.path())
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(std::fs::read_to_string(dest.child("P7010002.JPG").path()).unwrap(), "stack");
}
