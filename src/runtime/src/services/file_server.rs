//! Ephemeral HTTP server publishing a host directory to the guest.
//!
//! The helper binds an OS-assigned loopback port and announces it on its
//! stdout. That pipe is the private handoff channel: the launcher reads the
//! single announcement line, then closes its end for good.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use qsession_core::error::{Result, SessionError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::process::ManagedProcess;

/// Bound on waiting for the port announcement.
const PORT_REPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Guest-visible address the published directory is reachable at.
pub const GUEST_ADDRESS: &str = "10.0.2.100";
pub const GUEST_PORT: u16 = 80;

#[derive(Debug)]
pub struct FileServer {
    process: ManagedProcess,
    port: u16,
}

impl FileServer {
    /// Start serving `directory` with the `python` helper.
    pub async fn start(python: &Path, directory: &Path, verbose: bool) -> Result<Self> {
        if !directory.is_dir() {
            return Err(SessionError::ConfigError(format!(
                "publish directory not found: {}",
                directory.display()
            )));
        }

        let mut command = Command::new(python);
        command
            .args(["-u", "-m", "http.server", "0", "--bind", "127.0.0.1", "--directory"])
            .arg(directory)
            .current_dir(directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if verbose { Stdio::inherit() } else { Stdio::null() });

        let mut process = ManagedProcess::spawn("file-server", &mut command)?;
        let port = match read_port(&mut process).await {
            Ok(port) => port,
            Err(e) => {
                process.terminate().await;
                return Err(e);
            }
        };

        tracing::info!(
            pid = process.pid(),
            port,
            directory = %directory.display(),
            "File server started"
        );

        Ok(Self {
            process,
            port,
        })
    }

    /// Loopback port on the host.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// User-network rule exposing the server inside the guest.
    pub fn guestfwd(&self) -> String {
        format!(
            "tcp:{}:{}-tcp:127.0.0.1:{}",
            GUEST_ADDRESS, GUEST_PORT, self.port
        )
    }

    pub fn process_mut(&mut self) -> &mut ManagedProcess {
        &mut self.process
    }

    pub async fn terminate(&mut self) {
        self.process.terminate().await;
    }
}

/// Read the announcement line and close the handoff pipe.
async fn read_port(process: &mut ManagedProcess) -> Result<u16> {
    let stdout = process
        .child_mut()
        .and_then(|child| child.stdout.take())
        .ok_or_else(|| SessionError::LaunchError {
            message: "file server stdout not captured".to_string(),
            hint: None,
        })?;

    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    let read = tokio::time::timeout(PORT_REPORT_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| SessionError::LaunchError {
            message: "file server did not report its port".to_string(),
            hint: None,
        })??;
    drop(reader);

    if read == 0 {
        return Err(SessionError::LaunchError {
            message: "file server exited before reporting its port".to_string(),
            hint: None,
        });
    }

    parse_serving_port(&line).ok_or_else(|| SessionError::LaunchError {
        message: format!("unexpected file server output: {}", line.trim()),
        hint: None,
    })
}

/// Extract N from `Serving HTTP on 127.0.0.1 port N (http://...) ...`.
pub fn parse_serving_port(line: &str) -> Option<u16> {
    let mut words = line.split_whitespace();
    words.find(|w| *w == "port")?;
    words.next()?.parse().ok().filter(|p| *p != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binaries::find_binary;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_parse_serving_port() {
        let banner = "Serving HTTP on 127.0.0.1 port 43567 (http://127.0.0.1:43567/) ...\n";
        assert_eq!(parse_serving_port(banner), Some(43567));
        assert_eq!(parse_serving_port("Serving HTTP on :: port 8000"), Some(8000));
        assert_eq!(parse_serving_port("Traceback (most recent call last):"), None);
        assert_eq!(parse_serving_port("port"), None);
        assert_eq!(parse_serving_port("port 0"), None);
    }

    #[tokio::test]
    async fn test_start_rejects_missing_directory() {
        let err = FileServer::start(Path::new("/bin/sh"), Path::new("/nonexistent/dir"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_helper_exiting_early_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        // `false` ignores its arguments and exits without output.
        let Some(helper) = find_binary("false") else {
            return;
        };
        let err = FileServer::start(&helper, dir.path(), false).await.unwrap_err();
        assert!(matches!(err, SessionError::LaunchError { .. }));
    }

    #[tokio::test]
    async fn test_serves_directory() {
        let Some(python) = find_binary("python3") else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello guest").unwrap();

        let mut server = FileServer::start(&python, dir.path(), false).await.unwrap();
        assert!(server.guestfwd().starts_with("tcp:10.0.2.100:80-tcp:127.0.0.1:"));

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", server.port()))
            .await
            .unwrap();
        stream
            .write_all(b"GET /hello.txt HTTP/1.0\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.0 200"));
        assert!(response.ends_with("hello guest"));

        server.terminate().await;
        assert!(server.process_mut().is_terminated());
    }
}
