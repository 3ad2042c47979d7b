//! CLI tests for `secrets`.

use std::path::Path;
use std::process::{Command, Output};

use jobflow::exit_codes;

const KEYRING: &str = r#"
[secrets.db_pass]
key_id = "kms/db"
value = "hunter2"

[secrets.api_token]
key_id = "kms/app"
value = "abc"
"#;

fn secrets(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_secrets"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn secrets")
}

fn workspace() -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("keyring.toml"), KEYRING).expect("write keyring");
    temp
}

#[test]
fn list_prints_fingerprints_not_values() {
    let temp = workspace();

    let output = secrets(temp.path(), &["list"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.lines().next(),
        Some("api_token\tkms/app\tba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );
    assert_eq!(stdout.lines().count(), 2);
    assert!(!stdout.contains("hunter2"));
}

#[test]
fn decrypt_writes_sibling_file() {
    let temp = workspace();
    std::fs::write(temp.path().join("app.yaml"), "token: ${secret:api_token}\n").expect("write");

    let output = secrets(temp.path(), &["decrypt", "app.yaml"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        std::fs::read_to_string(temp.path().join("app.yaml.decrypted")).expect("read"),
        "token: abc\n"
    );
}

#[test]
fn decrypt_reports_each_failed_manifest() {
    let temp = workspace();
    std::fs::write(temp.path().join("ok.yaml"), "pass: ${secret:db_pass}\n").expect("write");
    std::fs::write(temp.path().join("bad.yaml"), "pass: ${secret:gone}\n").expect("write");

    let output = secrets(
        temp.path(),
        &["decrypt", "--stdout", "bad.yaml", "missing.yaml", "ok.yaml"],
    );

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "pass: hunter2\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("secrets decrypt failed"), "{stderr}");
    assert!(stderr.contains("bad.yaml: unknown secret gone"), "{stderr}");
    assert!(stderr.contains("missing.yaml: read: "), "{stderr}");
}

#[test]
fn missing_keyring_fails() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = secrets(temp.path(), &["--keyring", "nope.toml", "list"]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("keyring: read nope.toml"), "{stderr}");
}
