//! Fatal errors from the command line end up in the log output

use std::path::Path;
use std::process::{Command, Output};

fn dtnsim(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dtnsim"))
        .args(args)
        .current_dir(cwd)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn error_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .filter(|line| line.contains(" - ERROR - "))
        .map(str::to_string)
        .collect()
}

#[test]
fn test_output_path_error_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("occupied"), b"not a directory").unwrap();

    let output = dtnsim(
        &["run", "--steps", "2", "--seed", "1", "--output", "occupied", "--visual", "none"],
        dir.path(),
    );

    assert!(!output.status.success());
    let errors = error_lines(&output);
    assert_eq!(errors.len(), 1, "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(errors[0].contains("not a directory"));
}

#[test]
fn test_malformed_config_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.yaml"), "simulation: [not, a, mapping\n").unwrap();

    let output = dtnsim(&["run", "--config", "broken.yaml", "--visual", "none"], dir.path());

    assert!(!output.status.success());
    let errors = error_lines(&output);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("failed to parse configuration"));
}

#[test]
fn test_unknown_log_level_is_still_logged() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("loud.yaml"), "logging:\n  log_level: shouting\n").unwrap();

    let output = dtnsim(&["run", "--config", "loud.yaml", "--visual", "none"], dir.path());

    assert!(!output.status.success());
    let errors = error_lines(&output);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("unknown log level 'shouting'"));
}

#[test]
fn test_missing_checkpoint_is_logged() {
    let dir = tempfile::tempdir().unwrap();

    let output = dtnsim(&["resume", "--checkpoint", "nowhere.bin"], dir.path());

    assert!(!output.status.success());
    assert_eq!(error_lines(&output).len(), 1);
}
