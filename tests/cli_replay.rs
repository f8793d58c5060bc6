use std::path::PathBuf;
use std::process::{Command, Output};

fn skylane(args: &[&str]) -> Output {
    let bin = env!("CARGO_BIN_EXE_skylane");
    Command::new(bin)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("spawn skylane")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn record_inspect_and_play_demo() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out_dir = dir.path().to_str().expect("utf-8 path");

    let recorded = skylane(&["record-demo", out_dir, "--snapshots", "20", "--units", "4"]);
    assert!(recorded.status.success(), "{recorded:?}");
    let replay = PathBuf::from(stdout(&recorded).trim());
    assert!(replay.exists());
    let replay = replay.to_str().expect("utf-8 path");

    let info = skylane(&["info", replay, "--json"]);
    assert!(info.status.success(), "{info:?}");
    let summary: serde_json::Value = serde_json::from_str(&stdout(&info)).expect("json");
    assert_eq!(summary["header"]["origin"], "demo.local:6567");
    assert_eq!(summary["frames"], 22);
    assert!(summary["truncated"].is_null());

    let played = skylane(&["play", replay, "--speed", "4", "--max-ticks", "600"]);
    assert!(played.status.success(), "{played:?}");
    // Connect plus every recorded frame
    assert!(stdout(&played).contains("23 packets"), "{}", stdout(&played));
}

#[test]
fn info_on_missing_file_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope.srep");
    let output = skylane(&["info", missing.to_str().expect("utf-8 path")]);
    assert!(!output.status.success());
}
