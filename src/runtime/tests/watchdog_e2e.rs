//! Integration test: watchdog supervisor against real UNIX sockets.
//!
//! A fake hypervisor serves both the guest channel (the supervisor connects
//! to it, as with a `server=on` chardev) and the QMP management socket.
//! The guest side writes commands into the channel; resets are observed as
//! `system_reset` commands arriving on the QMP socket.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use qsession_runtime::{QmpReset, SupervisorConfig, WatchdogSupervisor};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

const GREETING: &str =
    r#"{"QMP": {"version": {"qemu": {"micro": 0, "minor": 2, "major": 8}}, "capabilities": []}}"#;

/// Accept QMP connections forever, acknowledging every command and
/// reporting the arrival time of each `system_reset`.
fn spawn_fake_qmp(path: &Path) -> mpsc::UnboundedReceiver<Instant> {
    let listener = UnixListener::bind(path).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                write_half
                    .write_all(format!("{}\n", GREETING).as_bytes())
                    .await
                    .unwrap();
                let mut line = String::new();
                while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                    if line.contains("system_reset") {
                        let _ = tx.send(Instant::now());
                    }
                    let _ = write_half.write_all(b"{\"return\": {}}\n").await;
                    line.clear();
                }
            });
        }
    });
    rx
}

fn supervisor_config(channel: PathBuf, rearm: Duration) -> SupervisorConfig {
    SupervisorConfig {
        channel_path: channel,
        default_timeout: Duration::from_secs(30),
        rearm_delay: rearm,
        poll_interval: Duration::from_millis(50),
    }
}

async fn accept_guest(listener: &UnixListener) -> UnixStream {
    tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("supervisor never connected to the channel")
        .unwrap()
        .0
}

#[tokio::test]
async fn test_unstopped_watchdog_resets_and_rearms() {
    let dir = tempfile::tempdir().unwrap();
    let qmp = dir.path().join("qmp.sock");
    let channel = dir.path().join("watchdog.sock");

    let mut resets = spawn_fake_qmp(&qmp);
    let channel_listener = UnixListener::bind(&channel).unwrap();

    let mut supervisor = WatchdogSupervisor::new(
        supervisor_config(channel.clone(), Duration::from_secs(1)),
        QmpReset::new(qmp.clone()),
    );
    let supervisor = tokio::spawn(async move { supervisor.run().await });

    let mut guest = accept_guest(&channel_listener).await;
    guest.write_all(b"START 2\n").await.unwrap();
    let armed_at = Instant::now();

    let first = tokio::time::timeout(Duration::from_secs(5), resets.recv())
        .await
        .expect("no reset after the deadline")
        .unwrap();
    let to_first = first.duration_since(armed_at);
    assert!(
        to_first >= Duration::from_millis(1800) && to_first < Duration::from_millis(3500),
        "first reset after {:?}",
        to_first
    );

    let second = tokio::time::timeout(Duration::from_secs(5), resets.recv())
        .await
        .expect("no reset after the re-arm delay")
        .unwrap();
    let gap = second.duration_since(first);
    assert!(
        gap >= Duration::from_millis(800) && gap < Duration::from_millis(2500),
        "second reset after {:?}",
        gap
    );

    guest.write_all(b"STOP\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    drop(guest);

    let report = tokio::time::timeout(Duration::from_secs(5), supervisor)
        .await
        .expect("supervisor did not exit on hangup")
        .unwrap()
        .unwrap();
    assert_eq!(report.resets, 2);
    assert_eq!(report.failed_resets, 0);
    assert!(resets.try_recv().is_err());
}

#[tokio::test]
async fn test_stopped_watchdog_never_resets() {
    let dir = tempfile::tempdir().unwrap();
    let qmp = dir.path().join("qmp.sock");
    let channel = dir.path().join("watchdog.sock");

    let mut resets = spawn_fake_qmp(&qmp);
    let channel_listener = UnixListener::bind(&channel).unwrap();

    let mut supervisor = WatchdogSupervisor::new(
        supervisor_config(channel.clone(), Duration::from_secs(1)),
        QmpReset::new(qmp.clone()),
    );
    let supervisor = tokio::spawn(async move { supervisor.run().await });

    let mut guest = accept_guest(&channel_listener).await;
    guest.write_all(b"START 1\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    guest.write_all(b"STOP\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    drop(guest);

    let report = tokio::time::timeout(Duration::from_secs(5), supervisor)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.resets, 0);
    assert!(resets.try_recv().is_err());
}

#[tokio::test]
async fn test_unreachable_control_plane_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let channel = dir.path().join("watchdog.sock");
    let channel_listener = UnixListener::bind(&channel).unwrap();

    let mut supervisor = WatchdogSupervisor::new(
        supervisor_config(channel.clone(), Duration::from_millis(300)),
        QmpReset::new(dir.path().join("no-qmp.sock")),
    );
    let supervisor = tokio::spawn(async move { supervisor.run().await });

    let mut guest = accept_guest(&channel_listener).await;
    guest.write_all(b"START 0\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    drop(guest);

    let report = tokio::time::timeout(Duration::from_secs(5), supervisor)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(report.resets >= 2, "resets: {}", report.resets);
    assert_eq!(report.failed_resets, report.resets);
}
