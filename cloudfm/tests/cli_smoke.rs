use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::tempdir;

fn run_cli(root: &Path, args: &[&str]) -> std::process::Output {
    let exe = env!("CARGO_BIN_EXE_cloudfm");
    Command::new(exe)
        .args(args)
        .env("CLOUDFM_BACKEND", "local")
        .env("CLOUDFM_LOCAL_ROOT", root)
        .env("CLOUDFM_LOCAL_QUOTA_BYTES", "1000")
        .env_remove("CLOUDFM_TOKEN")
        .env_remove("RUST_LOG")
        .output()
        .expect("cloudfm should execute")
}

#[test]
fn help_lists_commands() {
    let dir = tempdir().unwrap();
    let output = run_cli(dir.path(), &["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["list", "quota", "download", "upload", "delete", "config"] {
        assert!(stdout.contains(command), "missing {command}");
    }
}

#[test]
fn config_outputs_json() {
    let dir = tempdir().unwrap();
    let output = run_cli(dir.path(), &["config"]);
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(json["backend"], "local");
    assert_eq!(json["local_quota_bytes"], 1000);
    assert!(json["token"].is_null());
}

#[test]
fn invalid_app_id_is_reported() {
    let dir = tempdir().unwrap();
    let output = run_cli(dir.path(), &["list", "not-a-number"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Please make sure the App ID you entered is valid."));
}

#[test]
fn upload_list_and_delete_round_trip() {
    let root = tempdir().unwrap();
    let saves = tempdir().unwrap();
    let save = saves.path().join("Slot1.SAV");
    std::fs::write(&save, b"0123456789").unwrap();
    let save_arg = save.to_string_lossy().to_string();

    let output = run_cli(root.path(), &["upload", "480", &save_arg]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Upload complete."));
    assert!(stdout.contains("10/1000 bytes used"));

    let output = run_cli(root.path(), &["list", "480", "--json"]);
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(json["files"][0]["name"], "slot1.sav");
    assert_eq!(json["files"][0]["size"], 10);
    assert_eq!(json["quota"]["used_bytes"], 10);

    let target = root.path().join("restored/slot1.sav");
    let target_arg = target.to_string_lossy().to_string();
    let output = run_cli(
        root.path(),
        &["download", "480", "slot1.sav", "--output", &target_arg],
    );
    assert!(output.status.success(), "{output:?}");
    assert_eq!(std::fs::read(&target).unwrap(), b"0123456789");

    let output = run_cli(root.path(), &["--yes", "delete", "480", "slot1.sav"]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Deleted slot1.sav"));
    assert!(stdout.lines().any(|line| line == "0/1000 bytes used"));
}

#[test]
fn upload_over_quota_reports_failure() {
    let root = tempdir().unwrap();
    let saves = tempdir().unwrap();
    let big = saves.path().join("big.sav");
    std::fs::write(&big, vec![7u8; 2000]).unwrap();
    let big_arg = big.to_string_lossy().to_string();

    let output = run_cli(root.path(), &["upload", "480", &big_arg]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 files failed to upload."));
    assert!(stdout.contains("big.sav"));
}
