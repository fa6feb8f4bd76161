//! Command-line interface tests
//!
//! Exercise the binary on paths that never reach the network.

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("session.json");
        let config = format!(
            r#"
store:
  endpoint: "http://127.0.0.1:9"
  api_key: "key"
  bucket: "verification-videos"
upload:
  probe: false
session:
  path: "{}"
logging:
  level: "warn"
"#,
            session.display()
        );
        std::fs::write(dir.path().join("config.yaml"), config).unwrap();
        dir
    }

    fn cli(dir: &Path) -> Command {
        let mut cmd = Command::cargo_bin("verity-uploadr").unwrap();
        cmd.current_dir(dir).env_remove("RUST_LOG");
        cmd
    }

    #[test]
    fn test_help_lists_subcommands() {
        Command::cargo_bin("verity-uploadr")
            .unwrap()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("upload"))
            .stdout(predicate::str::contains("probe"))
            .stdout(predicate::str::contains("whoami"));
    }

    #[test]
    fn test_missing_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        cli(dir.path())
            .args(["--config", "absent.yaml", "whoami"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("loading configuration"));
    }

    #[test]
    fn test_whoami_when_signed_out() {
        let dir = workspace();
        cli(dir.path())
            .arg("whoami")
            .assert()
            .success()
            .stdout(predicate::str::contains("not signed in"));
    }

    #[test]
    fn test_upload_requires_model_session() {
        let dir = workspace();
        std::fs::write(dir.path().join("intro.mp4"), b"ftypmp42").unwrap();

        cli(dir.path())
            .args(["upload", "intro.mp4"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Not signed in"));
    }

    #[test]
    fn test_wrong_media_type_rejected_before_network() {
        let dir = workspace();
        std::fs::write(dir.path().join("face.png"), b"\x89PNG").unwrap();

        cli(dir.path())
            .args(["upload", "face.png", "--as-model", "m-1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("This file type is not supported here."));

        // sign-in is kept for the next run
        cli(dir.path())
            .arg("whoami")
            .assert()
            .success()
            .stdout(predicate::str::contains("\"model_id\": \"m-1\""));
    }

    #[test]
    fn test_oversize_file_rejected_before_network() {
        let dir = workspace();
        let file = std::fs::File::create(dir.path().join("huge.mp4")).unwrap();
        file.set_len(2 * 1024 * 1024 * 1024).unwrap();

        cli(dir.path())
            .args(["upload", "huge.mp4", "--as-model", "m-1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("The file is too large."));
    }

    #[test]
    fn test_logout_forgets_session() {
        let dir = workspace();
        std::fs::write(dir.path().join("face.png"), b"\x89PNG").unwrap();

        cli(dir.path())
            .args(["upload", "face.png", "--as-model", "m-1"])
            .assert()
            .failure();
        assert!(dir.path().join("session.json").exists());

        cli(dir.path()).arg("logout").assert().success();
        assert!(!dir.path().join("session.json").exists());

        cli(dir.path())
            .arg("whoami")
            .assert()
            .success()
            .stdout(predicate::str::contains("not signed in"));
    }
}
