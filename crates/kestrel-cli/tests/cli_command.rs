use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

#[allow(deprecated)]
fn get_kestrel_bin() -> PathBuf {
    assert_cmd::cargo::cargo_bin("kestrel")
}

#[test]
fn test_help_lists_arguments_and_options() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("USERNAME"))
        .stdout(predicate::str::contains("PASSWORD"))
        .stdout(predicate::str::contains("URL"))
        .stdout(predicate::str::contains("--download-dir"))
        .stdout(predicate::str::contains("--timeout"))
        .stdout(predicate::str::contains("--retrieval"))
        .stdout(predicate::str::contains("--diagnostics-dir"));
}

#[test]
fn test_version_flag() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("kestrel"));
}

#[test]
fn test_missing_arguments_is_usage_error() {
    let mut cmd = Command::new(get_kestrel_bin());

    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_missing_url_is_usage_error() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("ana").arg("s3cret");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("<URL>"));
}

#[test]
fn test_unknown_retrieval_mode_is_rejected() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.args(["ana", "s3cret", "https://erp.example/", "--retrieval", "ftp"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'ftp'"));
}

#[test]
fn test_zero_timeout_fails_before_launching_chrome() {
    let temp = tempfile::tempdir().unwrap();

    let mut cmd = Command::new(get_kestrel_bin());
    cmd.args(["ana", "s3cret", "https://erp.example/"])
        .arg("--timeout")
        .arg("0")
        .arg("--download-dir")
        .arg(temp.path().join("downloads"))
        .arg("--chrome-path")
        .arg("/nonexistent/chrome");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("timeout must be greater than zero"));
}

#[test]
fn test_missing_chrome_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let downloads = temp.path().join("downloads");

    let mut cmd = Command::new(get_kestrel_bin());
    cmd.args(["ana", "s3cret", "https://erp.example/"])
        .arg("--download-dir")
        .arg(&downloads)
        .arg("--chrome-path")
        .arg("/nonexistent/chrome");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Chrome not found"));

    // The download directory is prepared before Chrome is located
    assert!(downloads.is_dir());
}

#[test]
fn test_download_dir_from_environment() {
    let temp = tempfile::tempdir().unwrap();
    let downloads = temp.path().join("from-env");

    let mut cmd = Command::new(get_kestrel_bin());
    cmd.args(["ana", "s3cret", "https://erp.example/"])
        .env("KESTREL_DOWNLOAD_DIR", &downloads)
        .arg("--chrome-path")
        .arg("/nonexistent/chrome");

    cmd.assert().failure();
    assert!(downloads.is_dir());
}
