use std::process::Command;
use tempfile::TempDir;

fn write_settings(dir: &std::path::Path, inspection: &str) -> std::path::PathBuf {
    let config_dir = dir.join(".linkwatch");
    std::fs::create_dir_all(&config_dir).unwrap();
    let path = config_dir.join("settings.toml");
    std::fs::write(&path, format!("[inspection]\n{inspection}")).unwrap();
    path
}

#[test]
fn test_missing_watch_path_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let settings = write_settings(
        temp_dir.path(),
        "left_camera = \"LEFT\"\nright_camera = \"RIGHT\"\nimg_destination = \"images\"\n",
    );

    let output = Command::new(env!("CARGO_BIN_EXE_linkwatch"))
        .arg("--config")
        .arg(&settings)
        .arg(temp_dir.path().join("no-such-dir"))
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run linkwatch");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Could not locate the directory"), "{stderr}");
}

#[test]
fn test_incomplete_settings_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let settings = write_settings(temp_dir.path(), "left_camera = \"LEFT\"\n");

    let output = Command::new(env!("CARGO_BIN_EXE_linkwatch"))
        .arg("--config")
        .arg(&settings)
        .arg(temp_dir.path())
        .output()
        .expect("Failed to run linkwatch");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("inspection.right_camera"), "{stderr}");
}

#[test]
fn test_paths_are_required() {
    let output = Command::new(env!("CARGO_BIN_EXE_linkwatch"))
        .output()
        .expect("Failed to run linkwatch");

    assert!(!output.status.success());
}
