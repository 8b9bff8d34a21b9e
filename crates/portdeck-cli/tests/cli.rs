use assert_cmd::cargo::cargo_bin_cmd;
use std::fs;
use std::path::Path;

fn seed_catalog(home: &Path) {
    let cache = home.join("cache");
    fs::create_dir_all(&cache).expect("cache dir");
    let body = serde_json::json!({
        "ports": {
            "2048.zip": {
                "name": "2048.zip",
                "title": "2048",
                "description": "Sliding tile puzzle",
                "tags": ["puzzle"],
                "url": "https://example.invalid/2048.zip",
                "size": 1024,
            }
        }
    })
    .to_string();
    fs::write(cache.join("pm.json"), body).expect("seed cache");
}

fn stdout_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 stdout")
}

fn stderr_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stderr.clone()).expect("utf8 stderr")
}

#[test]
fn help_lists_subcommands() {
    let assert = cargo_bin_cmd!("portdeck").arg("--help").assert().success();
    let help = stdout_of(&assert);
    for subcommand in ["update", "list", "info", "install", "uninstall", "bus"] {
        assert!(help.contains(subcommand), "missing `{subcommand}` in help");
    }
}

#[test]
fn list_on_a_fresh_home_is_empty_but_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");
    let assert = cargo_bin_cmd!("portdeck")
        .env("PORTDECK_OFFLINE", "1")
        .arg("--home")
        .arg(temp.path())
        .arg("list")
        .assert()
        .success();
    assert!(stderr_of(&assert).contains("0 port(s)"));
    assert!(temp.path().join("sources.json").exists());
    assert!(temp.path().join("ports").is_dir());
}

#[test]
fn list_shows_cached_catalog_entries() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_catalog(temp.path());
    let assert = cargo_bin_cmd!("portdeck")
        .env("PORTDECK_OFFLINE", "1")
        .arg("--home")
        .arg(temp.path())
        .arg("list")
        .assert()
        .success();
    let listing = stdout_of(&assert);
    assert!(listing.contains("2048.zip"));
    assert!(listing.contains("not-installed"));
}

#[test]
fn info_for_an_unknown_port_exits_one() {
    let temp = tempfile::tempdir().expect("tempdir");
    cargo_bin_cmd!("portdeck")
        .env("PORTDECK_OFFLINE", "1")
        .arg("--home")
        .arg(temp.path())
        .args(["info", "nope.zip"])
        .assert()
        .code(1);
}

#[test]
fn uninstalling_an_unregistered_port_exits_one() {
    let temp = tempfile::tempdir().expect("tempdir");
    cargo_bin_cmd!("portdeck")
        .env("PORTDECK_OFFLINE", "1")
        .arg("--home")
        .arg(temp.path())
        .args(["uninstall", "nope.zip"])
        .assert()
        .code(1);
}

#[test]
fn offline_update_reports_zero_sources() {
    let temp = tempfile::tempdir().expect("tempdir");
    let assert = cargo_bin_cmd!("portdeck")
        .env("PORTDECK_OFFLINE", "1")
        .arg("--home")
        .arg(temp.path())
        .arg("update")
        .assert()
        .success();
    assert!(stdout_of(&assert).contains("updated 0 source(s)"));
}

#[test]
fn json_output_carries_status_and_details() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_catalog(temp.path());
    let assert = cargo_bin_cmd!("portdeck")
        .env("PORTDECK_OFFLINE", "1")
        .arg("--home")
        .arg(temp.path())
        .args(["--json", "list"])
        .assert()
        .success();
    let payload: serde_json::Value =
        serde_json::from_str(&stdout_of(&assert)).expect("json payload");
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["details"]["ports"][0]["name"], "2048.zip");
}
