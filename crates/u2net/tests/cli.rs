#![allow(deprecated)] // cargo_bin deprecation

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use burn::{
    backend::NdArray,
    config::Config as _,
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};
use image::{ColorType, Rgb, RgbImage};
use predicates::prelude::*;
use tempfile::TempDir;
use u2net::{
    model::{U2NetConfig, U2NetVariant},
    RemovalConfig,
};

const MISSING_REMBG: &str = "u2net-test-no-such-rembg";

fn u2net() -> Command {
    let mut cmd = Command::cargo_bin("u2net").unwrap();
    cmd.env_remove("U2NET_WEIGHTS").env_remove("RUST_LOG");
    cmd
}

fn sample_image(dir: &Path) -> PathBuf {
    let path = dir.join("input.png");
    RgbImage::from_fn(24, 16, |x, _| if x < 12 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) })
        .save(&path)
        .unwrap();
    path
}

/// A 400x300 dark frame with a bright centered subject.
fn subject_image(dir: &Path) -> PathBuf {
    let path = dir.join("subject.png");
    RgbImage::from_fn(400, 300, |x, y| {
        if (100..300).contains(&x) && (75..225).contains(&y) {
            Rgb([240, 230, 220])
        } else {
            Rgb([15, 20, 25])
        }
    })
    .save(&path)
    .unwrap();
    path
}

/// Save a freshly initialised lite network and a config pointing at it.
fn lite_setup(dir: &Path) -> PathBuf {
    let device = Default::default();
    let model = U2NetConfig::new()
        .with_variant(U2NetVariant::Lite)
        .init::<NdArray>(&device)
        .unwrap();
    model
        .save_file(dir.join("u2netp"), &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
        .unwrap();

    let config = RemovalConfig::new()
        .with_variant(U2NetVariant::Lite)
        .with_weights(Some(dir.join("u2netp.mpk")))
        .with_input_size(Some(64));
    let path = dir.join("removal.json");
    config.save(&path).unwrap();
    path
}

#[test]
fn custom_method_writes_rgba_png() {
    let dir = TempDir::new().unwrap();
    let input = subject_image(dir.path());
    let config = lite_setup(dir.path());
    let output = dir.path().join("out.png");

    let assert = u2net()
        .arg(&input)
        .arg(&output)
        .arg("custom")
        .args(["--variant", "lite", "--low-threshold", "0.15", "--high-threshold", "0.85"])
        .arg("--config")
        .arg(&config)
        .assert()
        .success();

    let report: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(report["status"], "success");
    assert_eq!(report["method"], "custom");
    assert_eq!(report["path"], output.display().to_string());
    assert!(report.get("image").is_none());

    let written = image::open(&output).unwrap();
    assert_eq!(written.color(), ColorType::Rgba8);
    assert_eq!((written.width(), written.height()), (400, 300));
}

#[test]
fn missing_output_prints_data_url() {
    let dir = TempDir::new().unwrap();
    let input = subject_image(dir.path());
    let config = lite_setup(dir.path());

    // No rembg, so auto runs the bundled network.
    let assert = u2net()
        .arg(&input)
        .args(["--rembg-program", MISSING_REMBG])
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""image":"data:image/png;base64,"#));

    let report: serde_json::Value = serde_json::from_slice(&assert.get_output().stdout).unwrap();
    assert_eq!(report["method"], "custom");
    let payload = report["image"]
        .as_str()
        .and_then(|url| url.strip_prefix("data:image/png;base64,"))
        .unwrap();
    let decoded = image::load_from_memory(&STANDARD.decode(payload).unwrap()).unwrap();
    assert_eq!(decoded.color(), ColorType::Rgba8);
    assert_eq!((decoded.width(), decoded.height()), (400, 300));
}

#[test]
fn missing_input_argument_reports_error_json() {
    u2net()
        .assert()
        .code(1)
        .stdout(predicate::str::starts_with(r#"{"error":"#))
        .stdout(predicate::str::contains("no input image provided"));
}

#[test]
fn nonexistent_input_reports_error_json() {
    let dir = TempDir::new().unwrap();

    u2net()
        .arg(dir.path().join("absent.jpg"))
        .assert()
        .code(1)
        .stdout(predicate::str::contains(r#""error""#))
        .stdout(predicate::str::contains("absent.jpg"));
}

#[test]
fn missing_weights_fail_without_output() {
    let dir = TempDir::new().unwrap();
    let input = sample_image(dir.path());
    let output = dir.path().join("out.png");

    u2net()
        .arg(&input)
        .arg(&output)
        .arg("custom")
        .arg("--weights")
        .arg(dir.path().join("u2net.pth"))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("model file not found"));

    assert!(!output.exists());
}

#[test]
fn weights_path_is_read_from_environment() {
    let dir = TempDir::new().unwrap();
    let input = sample_image(dir.path());
    let weights = dir.path().join("from-env.pth");

    u2net()
        .env("U2NET_WEIGHTS", &weights)
        .arg(&input)
        .arg(dir.path().join("out.png"))
        .arg("custom")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("from-env.pth"));
}

#[test]
fn undersized_weights_are_rejected() {
    let dir = TempDir::new().unwrap();
    let input = sample_image(dir.path());
    let weights = dir.path().join("u2netp.pth");
    std::fs::write(&weights, vec![0_u8; 1024]).unwrap();

    u2net()
        .arg(&input)
        .arg(dir.path().join("out.png"))
        .arg("custom")
        .args(["--variant", "lite", "--weights"])
        .arg(&weights)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("download looks incomplete"));
}

#[test]
fn forced_rembg_without_tool_fails() {
    let dir = TempDir::new().unwrap();
    let input = sample_image(dir.path());
    let output = dir.path().join("out.png");

    u2net()
        .arg(&input)
        .arg(&output)
        .arg("rembg")
        .args(["--rembg-program", MISSING_REMBG])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("method 'rembg' is unavailable"));

    assert!(!output.exists());
}

#[test]
fn rembg_equivalent_is_an_alias() {
    let dir = TempDir::new().unwrap();
    let input = sample_image(dir.path());

    u2net()
        .arg(&input)
        .arg(dir.path().join("out.png"))
        .arg("rembg-equivalent")
        .args(["--rembg-program", MISSING_REMBG])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("method 'rembg' is unavailable"));
}

#[test]
fn invalid_thresholds_are_reported() {
    let dir = TempDir::new().unwrap();
    let input = sample_image(dir.path());

    u2net()
        .arg(&input)
        .arg(dir.path().join("out.png"))
        .arg("custom")
        .args(["--low-threshold", "0.9", "--high-threshold", "0.1"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("invalid trimap thresholds"));
}

#[test]
fn unreadable_config_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let input = sample_image(dir.path());
    let config = dir.path().join("removal.json");
    std::fs::write(&config, "{ not json").unwrap();

    u2net()
        .arg(&input)
        .arg("--config")
        .arg(&config)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("failed to read configuration"));
}
