use assert_cmd::prelude::*;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use predicates::prelude::*;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Command;

const ASC_VARS: &[&str] = &[
    "ASC_KEY_ID",
    "ASC_ISSUER_ID",
    "ASC_PRIVATE_KEY_PATH",
    "ASC_PRIVATE_KEY",
    "ASC_PRIVATE_KEY_B64",
    "ASC_APP_ID",
    "ASC_BASE_URL",
];

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// `asc` with a clean ASC environment and no config file.
fn asc(config_dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("asc").unwrap();
    for var in ASC_VARS {
        cmd.env_remove(var);
    }
    cmd.env("ASC_CONFIG_PATH", config_dir.path().join("missing.json"));
    cmd
}

fn with_credentials(cmd: &mut Command) -> &mut Command {
    cmd.env("ASC_KEY_ID", "KEY123")
        .env("ASC_ISSUER_ID", "issuer-uuid")
        .env("ASC_PRIVATE_KEY_PATH", fixture("test_key.p8"))
}

#[test]
fn prints_help() {
    let mut cmd = Command::cargo_bin("asc").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("App Store Connect CLI in Rust"))
        .stdout(predicate::str::contains("build-start"));
}

#[test]
fn token_command_prints_signed_jwt() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = asc(&dir);
    with_credentials(&mut cmd).arg("token");
    let output = cmd.assert().success().get_output().stdout.clone();
    let token = String::from_utf8(output).unwrap().trim().to_string();

    let header = decode_header(&token).unwrap();
    assert_eq!(header.alg, Algorithm::ES256);
    assert_eq!(header.kid.as_deref(), Some("KEY123"));

    let public = std::fs::read(fixture("test_key.pub.pem")).unwrap();
    let mut validation = Validation::new(Algorithm::ES256);
    validation.set_audience(&["appstoreconnect-v1"]);
    let data = decode::<Value>(&token, &DecodingKey::from_ec_pem(&public).unwrap(), &validation).unwrap();
    assert_eq!(data.claims["iss"], "issuer-uuid");
}

#[test]
fn missing_credentials_fail_with_hint() {
    let dir = tempfile::tempdir().unwrap();
    asc(&dir)
        .arg("products")
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing credentials"));
}

#[test]
fn partial_credentials_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    asc(&dir)
        .env("ASC_KEY_ID", "KEY123")
        .arg("products")
        .assert()
        .failure()
        .stderr(predicate::str::contains("ASC_ISSUER_ID"));
}

#[test]
fn builds_require_an_app() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = asc(&dir);
    with_credentials(&mut cmd).arg("builds");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--app is required"));
}

#[test]
fn rejects_bad_duration() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = asc(&dir);
    with_credentials(&mut cmd).args(["wait", "--run", "r1", "--poll-interval", "soon"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid duration"));
}
