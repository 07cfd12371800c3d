use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

/// `hd` isolated from the caller's environment, running in `dir`.
fn hd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("hd").unwrap();
    cmd.current_dir(dir)
        .env("XDG_CONFIG_HOME", dir.join(".config"))
        .env("XDG_STATE_HOME", dir.join(".state"))
        .env_remove("ACTOR")
        .env_remove("BD_ACTOR")
        .env_remove("WARBAND")
        .env_remove("HORDE_DISABLED")
        .env_remove("HORDE_ENABLED")
        .env_remove("ENCAMPMENT_ROOT");
    cmd
}

/// An encampment with warband `horde` and a clan worker `max` whose legacy
/// JSONL inbox holds one unread drum.
fn encampment_with_jsonl_inbox() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("warchief")).unwrap();
    fs::write(
        root.join("warchief/encampment.json"),
        r#"{"type":"encampment","version":1,"name":"camp","created_at":"2026-01-01T00:00:00Z"}"#,
    )
    .unwrap();
    fs::write(
        root.join("warchief/warbands.json"),
        r#"{"version":1,"warbands":{"horde":{"git_url":"git@host:o/horde.git","added_at":"2026-01-01T00:00:00Z","store":{"prefix":"hd"}}}}"#,
    )
    .unwrap();
    fs::create_dir_all(root.join("horde/clan/max/drums")).unwrap();
    fs::write(
        root.join("horde/config.json"),
        r#"{"type":"warband","version":1,"name":"horde","git_url":"git@host:o/horde.git","default_branch":"main","created_at":"2026-01-01T00:00:00Z","store":{"prefix":"hd"}}"#,
    )
    .unwrap();
    fs::write(
        root.join("horde/clan/max/drums/inbox.jsonl"),
        concat!(
            r#"{"id":"msg-0000000000000001","from":"horde/witness","to":"horde/clan/max","subject":"look at a.*b","body":"literal pattern","timestamp":"2026-01-02T00:00:00Z","priority":"normal","type":"notification","read":false,"thread_id":"thread-000000000001"}"#,
            "\n"
        ),
    )
    .unwrap();
    dir
}

#[test]
fn help_lists_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    hd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("warband"))
        .stdout(predicate::str::contains("drums"))
        .stdout(predicate::str::contains("witness"));
}

#[test]
fn drums_send_requires_subject() {
    let dir = tempfile::tempdir().unwrap();
    hd(dir.path())
        .args(["drums", "send", "horde/witness"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required arguments were not provided"));
}

#[test]
fn drums_send_rejects_unknown_priority() {
    let dir = tempfile::tempdir().unwrap();
    hd(dir.path())
        .args(["drums", "send", "horde/witness", "-s", "hi", "--priority", "whenever"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown priority"));
}

#[test]
fn outside_an_encampment_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    hd(dir.path())
        .args(["warband", "list"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("not in a horde encampment"));
}

#[test]
fn disabled_horde_skips_mutations() {
    let dir = tempfile::tempdir().unwrap();
    hd(dir.path())
        .env("HORDE_DISABLED", "1")
        .args(["warband", "remove", "horde"])
        .assert()
        .success()
        .stdout(predicate::str::contains("horde is disabled"));
}

#[test]
fn unknown_warband_is_not_found() {
    let camp = encampment_with_jsonl_inbox();
    hd(camp.path())
        .args(["warband", "show", "ghost"])
        .assert()
        .code(3);
}

#[test]
fn jsonl_inbox_read_and_search() {
    let camp = encampment_with_jsonl_inbox();
    let max = ["--identity", "horde/clan/max"];

    hd(camp.path())
        .args(["drums", "inbox", "--quiet"])
        .args(max)
        .assert()
        .success()
        .stdout("1\n");

    hd(camp.path())
        .args(["drums", "search", "a.*b", "--format", "text"])
        .args(max)
        .assert()
        .success()
        .stdout(predicate::str::contains("msg-0000000000000001"));

    hd(camp.path())
        .args(["drums", "search", "a.b", "--format", "text"])
        .args(max)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    hd(camp.path())
        .args(["drums", "read", "msg-0000000000000001", "--format", "text"])
        .args(max)
        .assert()
        .success()
        .stdout(predicate::str::contains("From:     horde/witness"));

    hd(camp.path())
        .args(["drums", "inbox", "--quiet"])
        .args(max)
        .assert()
        .success()
        .stdout("0\n");
}

#[test]
fn jsonl_archive_moves_the_drum() {
    let camp = encampment_with_jsonl_inbox();
    hd(camp.path())
        .args(["drums", "archive", "msg-0000000000000001", "--identity", "horde/clan/max"])
        .assert()
        .success();
    let archive = fs::read_to_string(camp.path().join("horde/clan/max/drums/archive.jsonl")).unwrap();
    assert!(archive.contains("msg-0000000000000001"));
    let inbox = fs::read_to_string(camp.path().join("horde/clan/max/drums/inbox.jsonl")).unwrap();
    assert!(inbox.trim().is_empty());
}
