use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn muzzik(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("muzzik");
    cmd.current_dir(home)
        .env("MUZZIK_HOME", home)
        .env("MUZZIK_CONFIG_PATH", home.join("muzzik.toml"))
        .env_remove("MUZZIK_STATE_FILE")
        .env_remove("MUZZIK_LOGS_DIR")
        .env_remove("MUZZIK_CHANNEL")
        .env_remove("MUZZIK_PLAYLIST_TITLE_PREFIX")
        .env_remove("MUZZIK_PLAYLIST_PRIVACY")
        .env_remove("MUZZIK_PLAYLIST_CAPACITY")
        .env_remove("MUZZIK_DAILY_INSERT_CAP")
        .env_remove("MUZZIK_RETRY_MAX_ATTEMPTS")
        .env_remove("MUZZIK_RETRY_BASE_DELAY_MS");
    cmd
}

#[test]
fn status_without_state_reports_issue() {
    let tmp = tempdir().expect("tempdir");

    muzzik(tmp.path())
        .arg("status")
        .assert()
        .failure()
        .stdout(predicate::str::contains("status: issues"))
        .stdout(predicate::str::contains("missing state file"));
}

#[test]
fn status_after_dry_run_lists_backlog() {
    let tmp = tempdir().expect("tempdir");
    let messages = tmp.path().join("messages.json");
    fs::write(
        &messages,
        r#"[{"user":"U1","ts":"1700000000.000100","text":"<https://youtu.be/aaa> <https://youtu.be/bbb>"}]"#,
    )
    .expect("write");

    muzzik(tmp.path())
        .args(["sync", "--dry-run", "--messages-file"])
        .arg(&messages)
        .assert()
        .success();

    muzzik(tmp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("status: ok"))
        .stdout(predicate::str::contains("backlog=2"))
        .stdout(predicate::str::contains("backlog_head=aaa,bbb"))
        .stdout(predicate::str::contains("resources total=2 publishable=2 published=0"));
}

#[test]
fn status_honours_config_file() {
    let tmp = tempdir().expect("tempdir");
    fs::write(
        tmp.path().join("muzzik.toml"),
        "[playlist]\ntitle_prefix = \"crate digging\"\ncapacity = 200\n",
    )
    .expect("write");

    muzzik(tmp.path())
        .args(["--json", "status"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("title_prefix=\\\"crate digging\\\""))
        .stdout(predicate::str::contains("capacity=200"));
}

#[test]
fn corrupt_state_is_reported() {
    let tmp = tempdir().expect("tempdir");
    fs::create_dir_all(tmp.path().join("state")).expect("mkdir");
    fs::write(tmp.path().join("state/state.json"), "{not json").expect("write");

    muzzik(tmp.path())
        .arg("status")
        .assert()
        .failure()
        .stdout(predicate::str::contains("state file is corrupt"));
}
