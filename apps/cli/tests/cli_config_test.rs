//! Integration tests for `lmsft config get` and start-up preconditions.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn config_dir(temp: &TempDir) -> std::path::PathBuf {
    let dir = temp.path().join("configs");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("source_configs.yaml"),
        "data:\n  train_split: 0.9\n  dataset_name:\n    - teknium/OpenHermes-2.5\n    - Team-ACE/ToolACE\nmodel:\n  model_name: Llama-3.1-8B\n",
    )
    .unwrap();
    dir
}

#[test]
fn test_config_get_scalar() {
    let temp = TempDir::new().unwrap();
    let dir = config_dir(&temp);

    let mut cmd = Command::cargo_bin("lmsft-cli").unwrap();
    cmd.arg("--config-dir")
        .arg(&dir)
        .args(["config", "get", "source.data.train_split"])
        .assert()
        .success()
        .stdout("0.9\n");
}

#[test]
fn test_config_get_list_prints_one_per_line() {
    let temp = TempDir::new().unwrap();
    let dir = config_dir(&temp);

    let mut cmd = Command::cargo_bin("lmsft-cli").unwrap();
    cmd.env("LMSFT_CONFIG_DIR", &dir)
        .args(["config", "get", "source.data.dataset_name"])
        .assert()
        .success()
        .stdout("teknium/OpenHermes-2.5\nTeam-ACE/ToolACE\n");
}

#[test]
fn test_config_get_env_override() {
    let temp = TempDir::new().unwrap();
    let dir = config_dir(&temp);

    let mut cmd = Command::cargo_bin("lmsft-cli").unwrap();
    cmd.env("LMSFT__SOURCE__MODEL__MODEL_NAME", "Qwen2.5-7B")
        .arg("--config-dir")
        .arg(&dir)
        .args(["config", "get", "source.model.model_name"])
        .assert()
        .success()
        .stdout("Qwen2.5-7B\n");
}

#[test]
fn test_config_get_override_file() {
    let temp = TempDir::new().unwrap();
    let dir = config_dir(&temp);
    let local = temp.path().join("local.yaml");
    fs::write(&local, "source:\n  data:\n    train_split: 0.75\n").unwrap();

    let mut cmd = Command::cargo_bin("lmsft-cli").unwrap();
    cmd.arg("--config-dir")
        .arg(&dir)
        .arg("--config-override")
        .arg(&local)
        .args(["config", "get", "source.data.train_split"])
        .assert()
        .success()
        .stdout("0.75\n");
}

#[test]
fn test_config_get_missing_key_fails() {
    let temp = TempDir::new().unwrap();
    let dir = config_dir(&temp);

    let mut cmd = Command::cargo_bin("lmsft-cli").unwrap();
    cmd.arg("--config-dir")
        .arg(&dir)
        .args(["config", "get", "source.data.nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn test_missing_config_dir_fails() {
    let temp = TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("lmsft-cli").unwrap();
    cmd.arg("--config-dir")
        .arg(temp.path().join("absent"))
        .args(["config", "get", "source.data.train_split"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration directory not found"));
}
