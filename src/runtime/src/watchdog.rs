//! Watchdog supervisor: the event loop run by the `qsession-watchdog` process.
//!
//! ```text
//! wait_for_channel()  ── poll until the guest channel socket accepts
//!        │
//! supervise()         ── select { channel readable, deadline reached }
//!        ├─ data     → parse lines → WatchdogState::apply
//!        ├─ deadline → ResetTrigger::trigger_reset → WatchdogState::rearm
//!        └─ hangup   → Closed, return
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use qsession_core::error::{Result, SessionError};
use qsession_core::watchdog::{parse_line, LineBuffer, WatchdogState};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UnixStream;

use crate::qmp::{execute_once, QmpCommand};

/// Interval between attempts to open the guest channel.
pub const CHANNEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Issues the guest reset when the watchdog fires.
#[async_trait]
pub trait ResetTrigger: Send + Sync {
    async fn trigger_reset(&self) -> Result<()>;
}

/// Resets the guest through the hypervisor management socket.
#[derive(Debug, Clone)]
pub struct QmpReset {
    socket_path: PathBuf,
}

impl QmpReset {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }
}

#[async_trait]
impl ResetTrigger for QmpReset {
    async fn trigger_reset(&self) -> Result<()> {
        execute_once(&self.socket_path, &QmpCommand::system_reset()).await?;
        Ok(())
    }
}

/// Settings for one supervisor run.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Host side of the guest health channel.
    pub channel_path: PathBuf,
    /// Timeout for a bare `START`.
    pub default_timeout: Duration,
    /// Fixed delay before the next reset after one was triggered.
    pub rearm_delay: Duration,
    pub poll_interval: Duration,
}

/// What happened during a supervisor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupervisorReport {
    /// Resets attempted (successful or not).
    pub resets: u32,
    /// Resets the control plane did not accept.
    pub failed_resets: u32,
}

pub struct WatchdogSupervisor<R: ResetTrigger> {
    config: SupervisorConfig,
    reset: R,
    state: WatchdogState,
}

impl<R: ResetTrigger> WatchdogSupervisor<R> {
    pub fn new(config: SupervisorConfig, reset: R) -> Self {
        Self {
            config,
            reset,
            state: WatchdogState::Idle,
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Wait for the channel, then supervise it until hangup.
    pub async fn run(&mut self) -> Result<SupervisorReport> {
        let stream = self.wait_for_channel().await;
        tracing::info!(channel = %self.config.channel_path.display(), "Watchdog channel connected");
        self.supervise(stream).await
    }

    /// Poll until the channel socket exists and accepts a connection.
    ///
    /// Bounded only by process lifetime: the hypervisor creates the socket
    /// asynchronously and may take arbitrarily long to get there.
    pub async fn wait_for_channel(&self) -> UnixStream {
        let mut attempts: u64 = 0;
        loop {
            match self.try_connect().await {
                Ok(stream) => return stream,
                Err(e) => {
                    attempts += 1;
                    if attempts == 1 || attempts % 40 == 0 {
                        tracing::debug!(attempts, error = %e, "Waiting for watchdog channel");
                    }
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn try_connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.config.channel_path)
            .await
            .map_err(|e| {
                SessionError::ChannelNotReady(format!(
                    "{}: {}",
                    self.config.channel_path.display(),
                    e
                ))
            })
    }

    /// Run the event loop over an open channel until it hangs up.
    pub async fn supervise<S>(&mut self, mut channel: S) -> Result<SupervisorReport>
    where
        S: AsyncRead + Unpin,
    {
        let mut report = SupervisorReport::default();
        let mut lines = LineBuffer::new();
        let mut buf = [0u8; 512];

        while !self.state.is_closed() {
            let deadline = self.state.deadline();
            let expired = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                read = channel.read(&mut buf) => match read {
                    Ok(0) => {
                        tracing::info!("Watchdog channel hung up");
                        self.state = self.state.close();
                    }
                    Ok(n) => {
                        for line in lines.push(&buf[..n]) {
                            self.handle_line(&line);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Watchdog channel read failed");
                        self.state = self.state.close();
                    }
                },
                () = expired => {
                    self.fire(&mut report).await;
                }
            }
        }

        Ok(report)
    }

    fn handle_line(&mut self, line: &str) {
        match parse_line(line) {
            Some(command) => {
                self.state = self
                    .state
                    .apply(command, Instant::now(), self.config.default_timeout);
                tracing::debug!(?command, state = ?self.state, "Watchdog command");
            }
            None if line.trim().is_empty() => {}
            None => tracing::debug!(line, "Ignoring unrecognized watchdog line"),
        }
    }

    async fn fire(&mut self, report: &mut SupervisorReport) {
        tracing::warn!("Watchdog deadline reached, resetting guest");
        report.resets += 1;
        if let Err(e) = self.reset.trigger_reset().await {
            report.failed_resets += 1;
            tracing::warn!(error = %e, "Guest reset failed, retrying on next cycle");
        }
        self.state = self.state.rearm(Instant::now(), self.config.rearm_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    #[derive(Clone, Default)]
    struct CountingReset {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl ResetTrigger for CountingReset {
        async fn trigger_reset(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SessionError::ControlPlaneUnavailable("refused".to_string()));
            }
            Ok(())
        }
    }

    fn config(rearm_ms: u64) -> SupervisorConfig {
        SupervisorConfig {
            channel_path: PathBuf::from("/nonexistent/watchdog.sock"),
            default_timeout: Duration::from_secs(30),
            rearm_delay: Duration::from_millis(rearm_ms),
            poll_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_start_then_stop_never_resets() {
        let reset = CountingReset::default();
        let mut supervisor = WatchdogSupervisor::new(config(100), reset.clone());
        let (guest, host) = tokio::io::duplex(64);

        let driver = tokio::spawn(async move {
            let mut guest = guest;
            guest.write_all(b"START 1\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            guest.write_all(b"STOP\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(1200)).await;
            drop(guest);
        });

        let report = supervisor.supervise(host).await.unwrap();
        driver.await.unwrap();
        assert_eq!(report.resets, 0);
        assert_eq!(reset.calls.load(Ordering::SeqCst), 0);
        assert!(supervisor.state().is_closed());
    }

    #[tokio::test]
    async fn test_expiry_resets_and_rearms() {
        let reset = CountingReset::default();
        let mut supervisor = WatchdogSupervisor::new(config(400), reset.clone());
        let (guest, host) = tokio::io::duplex(64);

        let driver = tokio::spawn(async move {
            let mut guest = guest;
            guest.write_all(b"START 1\n").await.unwrap();
            // 1s deadline + one 400ms re-arm, then STOP before the next.
            tokio::time::sleep(Duration::from_millis(1200)).await;
            guest.write_all(b"STOP\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(600)).await;
            drop(guest);
        });

        let report = supervisor.supervise(host).await.unwrap();
        driver.await.unwrap();
        assert_eq!(report.resets, 1);
        assert_eq!(report.failed_resets, 0);
        assert_eq!(reset.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_retrying() {
        let reset = CountingReset {
            fail: true,
            ..Default::default()
        };
        let mut supervisor = WatchdogSupervisor::new(config(200), reset.clone());
        let (guest, host) = tokio::io::duplex(64);

        let driver = tokio::spawn(async move {
            let mut guest = guest;
            guest.write_all(b"START 0\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(700)).await;
            drop(guest);
        });

        let report = supervisor.supervise(host).await.unwrap();
        driver.await.unwrap();
        assert!(report.resets >= 2, "expected repeated resets, got {}", report.resets);
        assert_eq!(report.resets, report.failed_resets);
    }

    #[tokio::test]
    async fn test_hangup_while_armed_ends_without_reset() {
        let reset = CountingReset::default();
        let mut supervisor = WatchdogSupervisor::new(config(100), reset.clone());
        let (guest, host) = tokio::io::duplex(64);

        let driver = tokio::spawn(async move {
            let mut guest = guest;
            guest.write_all(b"START 5\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(guest);
        });

        let started = Instant::now();
        let report = supervisor.supervise(host).await.unwrap();
        driver.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.resets, 0);
        assert_eq!(reset.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hangup_while_idle() {
        let reset = CountingReset::default();
        let mut supervisor = WatchdogSupervisor::new(config(100), reset.clone());
        let (guest, host) = tokio::io::duplex(64);
        drop(guest);

        let report = supervisor.supervise(host).await.unwrap();
        assert_eq!(report, SupervisorReport::default());
        assert!(supervisor.state().is_closed());
    }

    #[tokio::test]
    async fn test_multiple_commands_in_one_read_and_garbage() {
        let reset = CountingReset::default();
        let mut supervisor = WatchdogSupervisor::new(config(100), reset.clone());
        let (guest, host) = tokio::io::duplex(128);

        let driver = tokio::spawn(async move {
            let mut guest = guest;
            // Ends disarmed: the later STOP wins over the earlier START.
            guest
                .write_all(b"hello from guest\nSTART 1\nSTOP\n")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(1300)).await;
            drop(guest);
        });

        let report = supervisor.supervise(host).await.unwrap();
        driver.await.unwrap();
        assert_eq!(report.resets, 0);
    }

    #[tokio::test]
    async fn test_wait_for_channel_polls_until_socket_appears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchdog.sock");
        let mut cfg = config(100);
        cfg.channel_path = path.clone();
        let supervisor = WatchdogSupervisor::new(cfg, CountingReset::default());

        let binder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let listener = tokio::net::UnixListener::bind(&path).unwrap();
            let (_stream, _) = listener.accept().await.unwrap();
        });

        let stream = tokio::time::timeout(Duration::from_secs(5), supervisor.wait_for_channel())
            .await
            .unwrap();
        drop(stream);
        binder.await.unwrap();
    }
}
