//! CLI integration tests
//!
//! These tests run the layerpack binary and verify:
//! - Command parsing and help output
//! - Spec lookup in the build context
//! - Output formats
//! - Exit codes, including passthrough from `run`

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Helper to get the path to the layerpack binary
fn layerpack_bin() -> PathBuf {
    // In tests, the binary should be at target/debug/layerpack
    let mut path = env::current_exe()
        .expect("Failed to get current executable path")
        .parent()
        .expect("No parent")
        .parent()
        .expect("No parent")
        .to_path_buf();

    // If we're in deps/, go up one more level
    if path.ends_with("deps") {
        path = path.parent().expect("No parent").to_path_buf();
    }

    path.join("layerpack")
}

/// Runs layerpack with a private cache directory
fn layerpack(cache: &Path, args: &[&str]) -> Output {
    Command::new(layerpack_bin())
        .args(args)
        .env("LAYERPACK_CACHE_DIR", cache)
        .env_remove("RUST_LOG")
        .env_remove("LAYERPACK_NO_CACHE")
        .output()
        .expect("Failed to execute layerpack")
}

const DOCKERFILE: &str = r#"FROM python:3.11-slim
WORKDIR /app

COPY requirements.txt .
RUN cp requirements.txt installed.txt
COPY . .

ENV PYTHONDONTWRITEBYTECODE=1
ENV PYTHONUNBUFFERED=1

CMD ["sh", "-c", "test \"$PYTHONUNBUFFERED\" = 1 && exit 7"]
"#;

/// Helper to create a build context with a Dockerfile
fn create_app(dir: &TempDir) -> PathBuf {
    let root = dir.path().to_path_buf();
    fs::write(root.join("Dockerfile"), DOCKERFILE).expect("Failed to write Dockerfile");
    fs::write(root.join("requirements.txt"), "pulp==2.7.0\n").expect("Failed to write manifest");
    fs::write(root.join("app.py"), "print('hello')\n").expect("Failed to write app.py");
    root
}

#[test]
fn test_cli_help() {
    let output = Command::new(layerpack_bin())
        .arg("--help")
        .output()
        .expect("Failed to execute layerpack");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["render", "validate", "build", "run", "images", "init"] {
        assert!(stdout.contains(command), "help should list {}", command);
    }
}

#[test]
fn test_cli_version() {
    let output = Command::new(layerpack_bin())
        .arg("--version")
        .output()
        .expect("Failed to execute layerpack");

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_invalid_subcommand() {
    let output = Command::new(layerpack_bin())
        .arg("deploy")
        .output()
        .expect("Failed to execute layerpack");
    assert!(!output.status.success());
}

#[test]
fn test_init_then_render() {
    let dir = TempDir::new().unwrap();
    let spec = dir.path().join("layerpack.yaml");
    let spec_arg = spec.to_str().unwrap();

    let output = layerpack(dir.path(), &["init", "--entry", "main.py", "-o", spec_arg]);
    assert!(output.status.success());
    assert!(spec.is_file());

    let output = layerpack(dir.path(), &["render", "-f", spec_arg]);
    assert!(output.status.success());
    let dockerfile = String::from_utf8_lossy(&output.stdout);
    assert!(dockerfile.starts_with("FROM python:3.11-slim"));
    assert!(dockerfile.contains("COPY requirements.txt ."));
    assert!(dockerfile.contains("ENV PYTHONUNBUFFERED=1"));
    assert!(dockerfile.contains(r#"CMD ["python", "main.py"]"#));
}

#[test]
fn test_validate_json() {
    let dir = TempDir::new().unwrap();
    let root = create_app(&dir);

    let output = layerpack(dir.path(), &["validate", root.to_str().unwrap(), "--format", "json"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["valid"], true);
    assert!(value["spec"].as_str().unwrap().ends_with("Dockerfile"));
}

#[test]
fn test_validate_reports_missing_copy_source() {
    let dir = TempDir::new().unwrap();
    let root = create_app(&dir);
    fs::remove_file(root.join("requirements.txt")).unwrap();

    let output = layerpack(dir.path(), &["validate", root.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("invalid"));
}

#[test]
fn test_build_without_spec_fails() {
    let dir = TempDir::new().unwrap();
    let output = layerpack(dir.path(), &["build", dir.path().to_str().unwrap(), "-t", "demo"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("layerpack.yaml or Dockerfile"));
}

#[test]
fn test_build_images_run() {
    let dir = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let root = create_app(&dir);
    let root_arg = root.to_str().unwrap();

    let output = layerpack(cache.path(), &["build", root_arg, "-t", "demo", "--format", "json"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let first: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

    let output = layerpack(cache.path(), &["build", root_arg, "-t", "demo", "--format", "json"]);
    assert!(output.status.success());
    let second: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(first["image_digest"], second["image_digest"]);
    assert!(second["steps"]
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["cached"] == true));

    let output = layerpack(cache.path(), &["images"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("demo:latest"));

    let output = layerpack(cache.path(), &["run", "demo"]);
    assert_eq!(output.status.code(), Some(7));
}

#[test]
fn test_run_unknown_image() {
    let cache = TempDir::new().unwrap();
    let output = layerpack(cache.path(), &["run", "nothing-here"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("No image tagged"));
}
