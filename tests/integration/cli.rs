use std::{fs, net::TcpListener};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn cachevisor() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("cachevisor"))
}

#[test]
fn help_lists_subcommands() {
    cachevisor()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("probe"));
}

#[test]
fn probe_rejects_non_xrootd_url() {
    let cache = tempdir().expect("failed to create tempdir");

    cachevisor()
        .args(["probe", "https://localhost:1094"])
        .arg(cache.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not an xrootd url"));
}

#[test]
fn probe_prints_health_record_as_json() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind listener");
    let port = listener.local_addr().unwrap().port();

    let cache = tempdir().expect("failed to create tempdir");
    let vo = cache.path().join("cms");
    fs::create_dir_all(&vo).expect("failed to create vo dir");
    fs::write(vo.join("block.root"), vec![0u8; 2048]).expect("failed to write data file");

    let output = cachevisor()
        .args(["probe", &format!("root://127.0.0.1:{port}")])
        .arg(cache.path())
        .output()
        .expect("failed to run probe");
    assert!(output.status.success(), "probe failed: {output:?}");

    let record: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("probe output is not JSON");
    assert_eq!(record["status"], "ok");
    assert_eq!(
        record["metrics"]["Name"],
        format!("xrootd@127.0.0.1:{port}")
    );
    assert_eq!(record["metrics"]["ping_response_status"], "ok");
    // Without a .cinfo companion the file is not counted as cached data.
    assert_eq!(record["metrics"]["VO"]["cms"]["nfiles"], 0);
}

#[test]
fn run_with_missing_config_exits_with_failure() {
    let dir = tempdir().expect("failed to create tempdir");
    let missing = dir.path().join("absent.yaml");

    cachevisor()
        .arg("run")
        .arg("--config")
        .arg(&missing)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn run_with_invalid_fraction_exits_with_failure() {
    let dir = tempdir().expect("failed to create tempdir");
    let config = dir.path().join("cachevisor.yaml");
    fs::write(
        &config,
        r#"service:
  name: xrootd
probe:
  url: "root://localhost:1094"
  cache_root: "/tmp"
  max_fs_fraction: 0
collector:
  locate: "echo master"
  keepalive: "true"
  advertise: "cat > /dev/null"
"#,
    )
    .expect("failed to write config");

    cachevisor()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("max_fs_fraction"));
}
