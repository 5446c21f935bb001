//! Integration test: run the `image-archive` binary on offline commands.
//!
//! Only commands that never contact the registry are exercised here, so the
//! tests need no credentials or network access.
//!
//! ```bash
//! cargo test -p image-archive-cli --test cli_integration
//! ```

use std::io::Write;
use std::process::Command;

/// Run the binary with an isolated home directory.
fn run(home: &std::path::Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_image-archive"))
        .args(args)
        .env("HOME", home)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute image-archive");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn worklist(dir: &std::path::Path, lines: &[&str]) -> std::path::PathBuf {
    let path = dir.join("worklist.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    path
}

#[test]
fn test_validate_accepts_worklist() {
    let dir = tempfile::tempdir().unwrap();
    let path = worklist(dir.path(), &["images/foo@sha256:aaa", "images/foo@sha256:bbb"]);

    let (stdout, stderr, ok) = run(dir.path(), &["validate", "--worklist", path.to_str().unwrap()]);

    assert!(ok, "stderr: {stderr}");
    assert!(stdout.contains("2 valid entries"));
}

#[test]
fn test_validate_rejects_malformed_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = worklist(dir.path(), &["images/foo@sha256:aaa", "images/foo:latest"]);

    let (_, stderr, ok) = run(dir.path(), &["validate", "--worklist", path.to_str().unwrap()]);

    assert!(!ok);
    assert!(stderr.contains("Error: Validation error: Invalid image specified: images/foo:latest"));
}

#[test]
fn test_config_file_repositories() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    std::fs::write(&config, "repositories:\n  - images\n  - tools\n").unwrap();
    let path = worklist(dir.path(), &["tools/bar@sha256:ccc"]);

    let (stdout, stderr, ok) = run(
        dir.path(),
        &[
            "--config",
            config.to_str().unwrap(),
            "validate",
            "--worklist",
            path.to_str().unwrap(),
        ],
    );

    assert!(ok, "stderr: {stderr}");
    assert!(stdout.contains("tools"));
}

#[test]
fn test_invalid_config_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = worklist(dir.path(), &["images/foo@sha256:aaa"]);

    let (_, stderr, ok) = run(
        dir.path(),
        &["--workers", "0", "validate", "--worklist", path.to_str().unwrap()],
    );

    assert!(!ok);
    assert!(stderr.contains("workers must be greater than 0"));
}
