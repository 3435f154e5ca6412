//! Guest health watchdog: line protocol and state machine.
//!
//! The guest writes newline-delimited ASCII commands to a virtual serial
//! port; nothing is ever written back.
//!
//! ```text
//! START [seconds]   arm (or re-arm) with the given or default timeout
//! STOP              disarm
//! ```
//!
//! State transitions are pure functions of the current state, the command
//! and the current instant, so they can be exercised without a clock.

use std::time::{Duration, Instant};

/// A recognized command from the guest channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogCommand {
    /// Arm with an optional timeout in seconds.
    Start(Option<u64>),
    Stop,
}

/// Parse one line from the guest channel. Unrecognized lines yield `None`.
pub fn parse_line(line: &str) -> Option<WatchdogCommand> {
    let mut words = line.split_whitespace();
    let command = words.next()?;
    let argument = words.next();
    if words.next().is_some() {
        return None;
    }

    match (command, argument) {
        ("START", None) => Some(WatchdogCommand::Start(None)),
        ("START", Some(secs)) => secs.parse().ok().map(|s| WatchdogCommand::Start(Some(s))),
        ("STOP", None) => Some(WatchdogCommand::Stop),
        _ => None,
    }
}

/// Splits a byte stream into lines, keeping incomplete trailing data
/// for the next chunk.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

/// Upper bound on buffered bytes without a newline.
const MAX_PENDING: usize = 4096;

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete line it finished, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1])
                .trim_end_matches('\r')
                .to_string();
            lines.push(line);
        }

        if self.pending.len() > MAX_PENDING {
            self.pending.clear();
        }
        lines
    }
}

/// Supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// Not armed (initial).
    Idle,
    /// A reset fires at `deadline` unless a `STOP` arrives first.
    Armed { deadline: Instant },
    /// The channel hung up. Terminal.
    Closed,
}

impl WatchdogState {
    /// Apply a guest command.
    pub fn apply(self, command: WatchdogCommand, now: Instant, default_timeout: Duration) -> Self {
        match (self, command) {
            (WatchdogState::Closed, _) => WatchdogState::Closed,
            (_, WatchdogCommand::Start(secs)) => {
                let timeout = secs.map(Duration::from_secs).unwrap_or(default_timeout);
                WatchdogState::Armed {
                    deadline: now + timeout,
                }
            }
            (_, WatchdogCommand::Stop) => WatchdogState::Idle,
        }
    }

    /// Called once the deadline passed and a reset was issued.
    pub fn rearm(self, now: Instant, rearm_delay: Duration) -> Self {
        match self {
            WatchdogState::Armed { .. } => WatchdogState::Armed {
                deadline: now + rearm_delay,
            },
            other => other,
        }
    }

    /// The channel hung up.
    pub fn close(self) -> Self {
        WatchdogState::Closed
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            WatchdogState::Armed { deadline } => Some(*deadline),
            _ => None,
        }
    }

    /// True when armed and `now` is at or past the deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, WatchdogState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Duration = Duration::from_secs(30);
    const REARM: Duration = Duration::from_secs(10);

    #[test]
    fn test_parse_line_forms() {
        assert_eq!(parse_line("START"), Some(WatchdogCommand::Start(None)));
        assert_eq!(parse_line("START 5"), Some(WatchdogCommand::Start(Some(5))));
        assert_eq!(parse_line("  START   120 "), Some(WatchdogCommand::Start(Some(120))));
        assert_eq!(parse_line("STOP"), Some(WatchdogCommand::Stop));
    }

    #[test]
    fn test_parse_line_unrecognized() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("start"), None);
        assert_eq!(parse_line("START soon"), None);
        assert_eq!(parse_line("START -1"), None);
        assert_eq!(parse_line("STOP now"), None);
        assert_eq!(parse_line("START 5 6"), None);
        assert_eq!(parse_line("REBOOT"), None);
    }

    #[test]
    fn test_line_buffer_splits_multiple_commands() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"START 5\nSTOP\nSTART\n");
        assert_eq!(lines, vec!["START 5", "STOP", "START"]);
    }

    #[test]
    fn test_line_buffer_keeps_partial_line() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"STA").is_empty());
        assert_eq!(buf.push(b"RT 3\r\nST"), vec!["START 3"]);
        assert_eq!(buf.push(b"OP\n"), vec!["STOP"]);
    }

    #[test]
    fn test_line_buffer_drops_oversized_garbage() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(&vec![b'x'; MAX_PENDING + 1]).is_empty());
        assert_eq!(buf.push(b"STOP\n"), vec!["STOP"]);
    }

    #[test]
    fn test_start_arms_with_explicit_timeout() {
        let now = Instant::now();
        let state = WatchdogState::Idle.apply(WatchdogCommand::Start(Some(5)), now, DEFAULT);
        assert_eq!(state.deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_start_uses_default_timeout() {
        let now = Instant::now();
        let state = WatchdogState::Idle.apply(WatchdogCommand::Start(None), now, DEFAULT);
        assert_eq!(state.deadline(), Some(now + DEFAULT));
    }

    #[test]
    fn test_start_then_stop_never_expires() {
        let now = Instant::now();
        let state = WatchdogState::Idle
            .apply(WatchdogCommand::Start(Some(5)), now, DEFAULT)
            .apply(WatchdogCommand::Stop, now, DEFAULT);
        assert_eq!(state, WatchdogState::Idle);
        assert!(!state.is_expired(now + Duration::from_secs(3600)));
    }

    #[test]
    fn test_expiry_and_rearm() {
        let now = Instant::now();
        let state = WatchdogState::Idle.apply(WatchdogCommand::Start(Some(1)), now, DEFAULT);
        let later = now + Duration::from_millis(1500);
        assert!(state.is_expired(later));

        let rearmed = state.rearm(later, REARM);
        assert_eq!(rearmed.deadline(), Some(later + REARM));
        assert!(!rearmed.is_expired(later));
    }

    #[test]
    fn test_stop_when_idle_stays_idle() {
        let now = Instant::now();
        assert_eq!(
            WatchdogState::Idle.apply(WatchdogCommand::Stop, now, DEFAULT),
            WatchdogState::Idle
        );
        assert_eq!(WatchdogState::Idle.rearm(now, REARM), WatchdogState::Idle);
    }

    #[test]
    fn test_closed_is_terminal() {
        let now = Instant::now();
        for state in [
            WatchdogState::Idle,
            WatchdogState::Armed { deadline: now },
        ] {
            let closed = state.close();
            assert!(closed.is_closed());
            assert!(closed
                .apply(WatchdogCommand::Start(Some(1)), now, DEFAULT)
                .is_closed());
            assert!(closed.rearm(now, REARM).is_closed());
            assert!(!closed.is_expired(now + REARM));
        }
    }
}
