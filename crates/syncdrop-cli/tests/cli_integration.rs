//! CLI Integration Tests
//!
//! These tests verify the CLI commands work correctly end-to-end against the
//! local store. They test the "wiring" between the CLI and the core library.

use std::process::Stdio;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Create a CLI command with a temporary data directory
fn cli_cmd(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("syncdrop").expect("Failed to find syncdrop binary");
    cmd.arg("--data-dir")
        .arg(data_dir.path())
        .env_remove("SYNCDROP_REMOTE_URL")
        .env_remove("SYNCDROP_API_KEY")
        .env_remove("SYNCDROP_ACCESS_TOKEN")
        .env_remove("SYNCDROP_OWNER")
        .env_remove("RUST_LOG");
    cmd
}

/// Extract the drop ID from `add` output (format: "  ID: <ulid>")
fn extract_drop_id(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("  ID: "))
        .map(|id| id.trim().to_string())
}

/// Add a drop and return its ID
fn add_drop(data_dir: &TempDir, args: &[&str]) -> String {
    let output = cli_cmd(data_dir)
        .arg("add")
        .args(args)
        .output()
        .expect("Failed to run add");
    assert!(output.status.success(), "add failed: {:?}", output);
    extract_drop_id(&String::from_utf8_lossy(&output.stdout)).expect("No drop ID in output")
}

// ============================================================================
// Status / Device Tests
// ============================================================================

#[test]
fn test_status_in_fresh_directory() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("SyncDrop v"))
        .stdout(predicate::str::contains("Account: not signed in"))
        .stdout(predicate::str::contains("Backend: local"))
        .stdout(predicate::str::contains("Active drops: 0"));
}

#[test]
fn test_device_id_is_stable() {
    let data_dir = TempDir::new().unwrap();

    let first = cli_cmd(&data_dir).arg("device").output().unwrap();
    let second = cli_cmd(&data_dir).arg("device").output().unwrap();
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
    assert!(String::from_utf8_lossy(&first.stdout).contains("  ID: "));
}

#[test]
fn test_guest_flag_shows_in_status() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["guest", "on"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Continuing as guest"));

    cli_cmd(&data_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Account: guest"));

    cli_cmd(&data_dir).args(["guest", "off"]).assert().success();
    cli_cmd(&data_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Account: not signed in"));
}

// ============================================================================
// Drop Lifecycle Tests
// ============================================================================

#[test]
fn test_add_classifies_links() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["add", "https://example.com/post"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added drop"))
        .stdout(predicate::str::contains("Collection: Links"))
        .stdout(predicate::str::contains("Type: url"));

    cli_cmd(&data_dir)
        .args(["list", "--filter", "links"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Drops (1):"))
        .stdout(predicate::str::contains("https://example.com/post"));
}

#[test]
fn test_add_to_explicit_collection() {
    let data_dir = TempDir::new().unwrap();
    let id = add_drop(&data_dir, &["standup at 10", "--collection", "work", "--tag", "meeting"]);

    cli_cmd(&data_dir)
        .args(["list", "--filter", "work"])
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("tags: meeting"));

    cli_cmd(&data_dir)
        .args(["list", "--filter", "inbox"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No drops."));
}

#[test]
fn test_trash_restore_and_purge() {
    let data_dir = TempDir::new().unwrap();
    let id = add_drop(&data_dir, &["short-lived"]);

    cli_cmd(&data_dir).args(["rm", &id]).assert().success();
    cli_cmd(&data_dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No drops."));
    cli_cmd(&data_dir)
        .args(["list", "--filter", "trash"])
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()));

    cli_cmd(&data_dir).args(["restore", &id]).assert().success();
    cli_cmd(&data_dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()));

    cli_cmd(&data_dir).args(["purge", &id]).assert().success();
    // Purging twice is fine
    cli_cmd(&data_dir).args(["purge", &id]).assert().success();
    cli_cmd(&data_dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No drops."));
}

#[test]
fn test_move_between_collections() {
    let data_dir = TempDir::new().unwrap();
    let id = add_drop(&data_dir, &["fn main() {}", "--type", "snippet"]);

    cli_cmd(&data_dir)
        .args(["move", &id, "code"])
        .assert()
        .success()
        .stdout(predicate::str::contains("to Code"));

    cli_cmd(&data_dir)
        .args(["list", "--filter", "code"])
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()));
}

#[test]
fn test_list_query() {
    let data_dir = TempDir::new().unwrap();
    add_drop(&data_dir, &["Buy oat milk"]);
    add_drop(&data_dir, &["call the dentist"]);

    cli_cmd(&data_dir)
        .args(["list", "--query", "MILK"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Drops (1):"))
        .stdout(predicate::str::contains("Buy oat milk"))
        .stdout(predicate::str::contains("dentist").not());
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[test]
fn test_unknown_collection_is_rejected() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["add", "x", "--collection", "nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid collection"));

    cli_cmd(&data_dir)
        .args(["list", "--filter", "nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid filter"));
}

#[test]
fn test_owner_requires_remote() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["--owner", "someone", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--owner requires --remote-url"));
}

#[test]
fn test_watch_requires_an_account() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .arg("watch")
        .assert()
        .failure()
        .stderr(predicate::str::contains("watch needs a signed-in account"));
}

#[test]
fn test_watch_leaves_local_store_usable() {
    let data_dir = TempDir::new().unwrap();
    add_drop(&data_dir, &["first"]);

    // Nothing listens on port 9; the watcher keeps polling and stays up.
    let mut watcher = std::process::Command::new(assert_cmd::cargo::cargo_bin("syncdrop"))
        .arg("--data-dir")
        .arg(data_dir.path())
        .args(["--remote-url", "http://127.0.0.1:9", "--api-key", "test"])
        .args(["--owner", "owner-1", "watch"])
        .env_remove("SYNCDROP_ACCESS_TOKEN")
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn watch");

    std::thread::sleep(Duration::from_secs(1));
    let still_running = watcher.try_wait().unwrap().is_none();

    let second = cli_cmd(&data_dir).args(["add", "second"]).output().unwrap();
    let listed = cli_cmd(&data_dir).arg("list").output().unwrap();

    watcher.kill().ok();
    watcher.wait().ok();
    assert!(still_running, "watch exited early");
    assert!(second.status.success(), "add during watch failed: {:?}", second);
    assert!(String::from_utf8_lossy(&listed.stdout).contains("Drops (2):"));
}

#[test]
fn test_migrate_without_account_fails() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .arg("migrate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("signed-in principal"));
}
