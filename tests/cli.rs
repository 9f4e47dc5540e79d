use assert_cmd::Command;
use serde_json::Value;
use tempfile::tempdir;

fn companion(db: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("companion").unwrap();
    cmd.env_remove("COMPANION_DB")
        .env_remove("COMPANION_LOG_DIR")
        .env("COMPANION_LOG", "off")
        .arg("--db")
        .arg(db);
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn migrate_creates_the_database() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("nested").join("companion.sqlite3");
    let output = companion(&db).arg("migrate").output().unwrap();
    assert!(output.status.success());
    assert!(db.exists());
    let json = stdout_json(&output);
    assert_eq!(json["applied"].as_array().map(Vec::len), Some(1));
}

#[test]
fn add_update_and_stats_round_trip_through_the_cli() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("companion.sqlite3");

    let output = companion(&db)
        .args(["--user", "jane-doe", "add", "--person", "Jane"])
        .args(["--harm", "Said cruel things", "--priority", "high"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let inventory = stdout_json(&output);
    assert_eq!(inventory["progress"]["total_entries"], 1);
    let entry_id = inventory["entries"][0]["id"].as_str().unwrap().to_string();

    let output = companion(&db)
        .args(["--user", "jane-doe", "update", "--entry", &entry_id])
        .args(["--status", "completed"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let inventory = stdout_json(&output);
    assert_eq!(inventory["progress"]["entries_completed"], 1);
    assert!(inventory["entries"][0]["completed_at"].is_i64());

    let output = companion(&db)
        .args(["--user", "jane-doe", "stats"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stats = stdout_json(&output);
    assert_eq!(stats["completed_percentage"], 100);
    assert_eq!(stats["priority_counts"]["high"], 1);
}

#[test]
fn missing_entry_exits_with_not_found() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("companion.sqlite3");
    let output = companion(&db)
        .args(["--user", "jane-doe", "delete", "--entry", "nope"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("STEP8/ENTRY_NOT_FOUND"), "{stderr}");
}

#[test]
fn data_commands_need_a_user() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("companion.sqlite3");
    let output = companion(&db).arg("show").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("VALIDATION/USER_REQUIRED"), "{stderr}");
}

#[test]
fn unknown_status_is_rejected_by_the_parser() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("companion.sqlite3");
    companion(&db)
        .args(["--user", "jane-doe", "status", "paused"])
        .assert()
        .failure();
}
