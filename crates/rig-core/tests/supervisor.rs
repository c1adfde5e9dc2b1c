//! End-to-end supervisor tests.
//!
//! These drive the full runtime in-process (no detach): a logs monitor
//! on a temp file plus a noop action, with the socket and working
//! directory relocated into a scratch directory.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rig_core::config::RigFile;
use rig_core::control::client;
use rig_core::control::protocol::Request;
use rig_core::rig::{Rig, RigOutcome};

struct Scratch {
    _dir: tempfile::TempDir,
    log_path: PathBuf,
    socket_path: PathBuf,
    workdir: PathBuf,
    base: PathBuf,
}

fn scratch() -> Scratch {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_path_buf();
    let log_path = base.join("watched.log");
    std::fs::write(&log_path, "").unwrap();
    Scratch {
        socket_path: base.join("t.sock"),
        workdir: base.join("work").join("t"),
        log_path,
        base,
        _dir: dir,
    }
}

fn build_rig(scratch: &Scratch, extra: &str) -> Rig {
    let yaml = format!(
        "name: t\n{extra}monitors:\n  logs:\n    message: boom\n    files: {}\n    journals: null\nactions:\n  noop: {{}}\n",
        scratch.log_path.display()
    );
    let file = RigFile::parse(&yaml).unwrap();
    let mut rig = Rig::prepare(&file).unwrap();
    rig.override_paths(scratch.socket_path.clone(), scratch.workdir.clone());
    rig.bind().unwrap();
    rig
}

fn append_line(path: &Path, line: &str) {
    let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    writeln!(f, "{line}").unwrap();
}

fn find_archive(base: &Path) -> Option<PathBuf> {
    let work_parent = base.join("work");
    std::fs::read_dir(work_parent).ok()?.find_map(|e| {
        let p = e.ok()?.path();
        p.to_string_lossy().ends_with(".tar.gz").then_some(p)
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn log_match_runs_actions_and_archives() {
    let s = scratch();
    let rig = build_rig(&s, "");
    let handle = tokio::spawn(rig.run());

    // Let the rig reach polling, then write a matching line.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    append_line(&s.log_path, "preboom");
    append_line(&s.log_path, "boom occurred");

    let outcome = tokio::time::timeout(Duration::from_secs(15), handle)
        .await
        .expect("rig did not finish in time")
        .unwrap()
        .unwrap();

    let RigOutcome::Completed { archive } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    let archive = archive.expect("archive should be produced");
    assert!(archive.exists());
    assert_eq!(archive, find_archive(&s.base).unwrap());

    // Working directory is gone, socket is gone.
    assert!(!s.workdir.exists());
    assert!(!s.socket_path.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn no_archive_preserves_workdir() {
    let s = scratch();
    let rig = build_rig(&s, "no_archive: true\n");
    let handle = tokio::spawn(rig.run());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    append_line(&s.log_path, "boom");

    let outcome = tokio::time::timeout(Duration::from_secs(15), handle)
        .await
        .expect("rig did not finish in time")
        .unwrap()
        .unwrap();

    assert!(matches!(outcome, RigOutcome::Completed { archive: None }));
    assert!(s.workdir.exists());
    assert!(s.workdir.join("noop.out").exists());
    assert!(find_archive(&s.base).is_none());
    assert!(!s.socket_path.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn status_answers_while_polling_and_destroy_stops_the_rig() {
    let s = scratch();
    let rig = build_rig(&s, "");
    let handle = tokio::spawn(rig.run());
    tokio::time::sleep(Duration::from_millis(800)).await;

    let sock = s.socket_path.clone();
    let status = tokio::task::spawn_blocking(move || {
        client::request_at("t", &sock, &Request::Status).unwrap()
    })
    .await
    .unwrap();
    assert_eq!(status["name"], "t");
    assert_eq!(status["phase"], "polling");
    assert_eq!(status["monitors"][0]["state"], "watching");

    let sock = s.socket_path.clone();
    let ack = tokio::task::spawn_blocking(move || {
        client::request_at("t", &sock, &Request::Destroy { force: false }).unwrap()
    })
    .await
    .unwrap();
    assert_eq!(ack["ok"], true);

    let outcome = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("rig did not stop after destroy")
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, RigOutcome::Destroyed));
    assert_eq!(outcome.exit_code(), 4);

    // Destroyed rigs leave nothing behind.
    assert!(!s.socket_path.exists());
    assert!(!s.workdir.exists());

    // A second destroy finds nothing to talk to.
    let err = client::request_at("t", &s.socket_path, &Request::Destroy { force: false })
        .unwrap_err();
    assert!(matches!(err, client::ClientError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn name_collision_is_a_deploy_error() {
    let s = scratch();
    let _first = build_rig(&s, "");

    let yaml = format!(
        "name: t\nmonitors:\n  logs:\n    message: x\n    files: {}\n    journals: null\nactions:\n  noop: {{}}\n",
        s.log_path.display()
    );
    let file = RigFile::parse(&yaml).unwrap();
    let mut second = Rig::prepare(&file).unwrap();
    second.override_paths(s.socket_path.clone(), s.workdir.clone());
    let err = second.bind().unwrap_err();
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_socket_is_reclaimed() {
    let s = scratch();
    // A dead rig's socket: bound, then dropped.
    drop(std::os::unix::net::UnixListener::bind(&s.socket_path).unwrap());
    assert!(s.socket_path.exists());

    // bind() inside build_rig reclaims it.
    let _rig = build_rig(&s, "");
    assert!(s.socket_path.exists());
}
