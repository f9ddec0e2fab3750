//! Running built images
//!
//! Images here start `sh` rather than python so the tests only depend on a
//! POSIX shell being available.
#![cfg(unix)]

use layerpack::build::{BuildOptions, Builder, LocalExecutor};
use layerpack::launch::{LaunchError, LaunchOptions, Launcher};
use layerpack::spec::{BuildStep, CommandLine, ImageSpec};
use layerpack::BuildContext;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use yare::parameterized;

fn shell_spec(script: &str) -> ImageSpec {
    let mut spec = ImageSpec::python_app("python:3.11-slim", "app.py");
    spec.steps[1] = BuildStep::run_shell("true");
    spec.command = CommandLine::Exec(vec![
        "sh".to_string(),
        "-c".to_string(),
        script.to_string(),
    ]);
    spec
}

async fn build_image(cache: &Path, script: &str, tag: &str) -> TempDir {
    let context = TempDir::new().unwrap();
    fs::write(context.path().join("requirements.txt"), "pulp\n").unwrap();
    fs::write(context.path().join("app.py"), "print('hi')\n").unwrap();

    let scanned = BuildContext::scan(context.path()).unwrap();
    Builder::with_cache_dir(LocalExecutor::new(), cache)
        .unwrap()
        .build(&shell_spec(script), &scanned, tag, &BuildOptions::default())
        .await
        .unwrap();
    context
}

async fn build_and_launch(script: &str, options: &LaunchOptions) -> (TempDir, i32) {
    let cache = TempDir::new().unwrap();
    let _context = build_image(cache.path(), script, "demo").await;
    let code = Launcher::with_cache_dir(cache.path())
        .unwrap()
        .launch("demo", options)
        .await
        .unwrap();
    (cache, code)
}

#[parameterized(
    success = { "exit 0", 0 },
    failure = { "exit 1", 1 },
    killed = { "kill -9 $$", 137 },
    max_status = { "exit 255", 255 },
)]
fn test_exit_code_passthrough(script: &str, expected: i32) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (_cache, code) = runtime.block_on(build_and_launch(script, &LaunchOptions::default()));
    assert_eq!(code, expected);
}

#[tokio::test]
async fn test_instance_sees_runtime_flags() {
    let script = r#"test "$PYTHONUNBUFFERED" = 1 && test "$PYTHONDONTWRITEBYTECODE" = 1"#;
    let (_cache, code) = build_and_launch(script, &LaunchOptions::default()).await;
    assert_eq!(code, 0);
}

#[tokio::test]
async fn test_instance_runs_in_workdir_with_copied_tree() {
    let (_cache, code) =
        build_and_launch("test -f app.py && test -f requirements.txt", &LaunchOptions::default())
            .await;
    assert_eq!(code, 0);
}

#[tokio::test]
async fn test_instance_filesystem_removed_unless_kept() {
    let (cache, _) = build_and_launch("touch scratch", &LaunchOptions::default()).await;
    let containers = cache.path().join("containers");
    let leftover = fs::read_dir(&containers).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftover, 0);

    let (cache, _) = build_and_launch("touch scratch", &LaunchOptions { keep: true }).await;
    let kept: Vec<_> = fs::read_dir(cache.path().join("containers"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(kept.len(), 1);
    assert!(kept[0].join("app/scratch").is_file());
}

#[tokio::test]
async fn test_instances_do_not_share_state() {
    let cache = TempDir::new().unwrap();
    let _context = build_image(cache.path(), "exit 0", "demo").await;
    let launcher = Launcher::with_cache_dir(cache.path()).unwrap();
    let image = launcher.resolve("demo").unwrap();

    let first = launcher.prepare(&image).unwrap();
    let second = launcher.prepare(&image).unwrap();
    assert_ne!(first.id, second.id);

    fs::write(first.root.join("app/state.txt"), "mutated").unwrap();
    assert!(!second.root.join("app/state.txt").exists());
    assert!(first.root.join("app/app.py").is_file());
    assert!(second.root.join("app/app.py").is_file());
}

#[tokio::test]
async fn test_launch_unknown_tag() {
    let cache = TempDir::new().unwrap();
    let err = Launcher::with_cache_dir(cache.path())
        .unwrap()
        .launch("missing", &LaunchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LaunchError::ImageNotFound(_)));
}
