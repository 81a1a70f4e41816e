//! Local tail behaviour at the byte level: partial lines, CRLF, rotation.

use aegis_test_utils::TempLog;
use logwatcher::source::{LocalSource, LogSource};
use logwatcher::status::StatusCell;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

struct Tail {
    rx: mpsc::Receiver<String>,
    shutdown: watch::Sender<bool>,
}

fn tail(log: &TempLog, read_from_start: bool) -> Tail {
    let (tx, rx) = mpsc::channel(256);
    let (shutdown, shutdown_rx) = watch::channel(false);
    let source = Box::new(LocalSource::new(log.path(), read_from_start));
    tokio::spawn(source.run(tx, shutdown_rx, StatusCell::new()));
    Tail { rx, shutdown }
}

async fn next_line(tail: &mut Tail) -> String {
    tokio::time::timeout(Duration::from_secs(5), tail.rx.recv())
        .await
        .expect("timed out waiting for line")
        .expect("source closed")
}

#[tokio::test]
async fn partial_writes_never_tear_lines() {
    let log = TempLog::new();
    let mut tail = tail(&log, true);

    log.append_raw(b"[t][ 1]LogSquad: first half");
    log.append_raw(b" second half\n[t][ 2]LogNet: next\n");

    assert_eq!(
        next_line(&mut tail).await,
        "[t][ 1]LogSquad: first half second half"
    );
    assert_eq!(next_line(&mut tail).await, "[t][ 2]LogNet: next");
    let _ = tail.shutdown.send(true);
}

#[tokio::test]
async fn crlf_is_normalised_and_trailing_newline_adds_no_line() {
    let log = TempLog::new();
    let mut tail = tail(&log, true);

    log.append_raw(b"alpha\r\nbeta\r\n");
    assert_eq!(next_line(&mut tail).await, "alpha");
    assert_eq!(next_line(&mut tail).await, "beta");

    // Nothing further: the trailing newline does not produce an empty line.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(tail.rx.try_recv().is_err());
    let _ = tail.shutdown.send(true);
}

#[tokio::test]
async fn rotation_resets_and_delivers_fresh_content_once() {
    let log = TempLog::new();
    let mut content = String::new();
    for i in 0..100 {
        content.push_str(&format!("old {i}\n"));
    }
    log.rotate_with(&content);

    let mut tail = tail(&log, true);
    for i in 0..100 {
        assert_eq!(next_line(&mut tail).await, format!("old {i}"));
    }

    // The replacement is much smaller than the delivered offset.
    log.rotate_with("fresh 0\nfresh 1\n");
    assert_eq!(next_line(&mut tail).await, "fresh 0");
    assert_eq!(next_line(&mut tail).await, "fresh 1");

    // No duplicates from before the rotation follow.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(tail.rx.try_recv().is_err());
    let _ = tail.shutdown.send(true);
}

#[tokio::test]
async fn unchanged_file_delivers_nothing() {
    let log = TempLog::new();
    log.append_line("before attach");
    // Attach at the end: the pre-existing content is skipped.
    let mut tail = tail(&log, false);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(tail.rx.try_recv().is_err());

    log.append_line("after attach");
    assert_eq!(next_line(&mut tail).await, "after attach");
    let _ = tail.shutdown.send(true);
}

#[tokio::test]
async fn shutdown_stops_the_source_promptly() {
    let log = TempLog::new();
    let tail = tail(&log, true);
    let _ = tail.shutdown.send(true);
    // The channel closes once the source task exits.
    let mut rx = tail.rx;
    let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
    assert!(matches!(closed, Ok(None)));
}
