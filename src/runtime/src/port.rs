//! Host TCP port allocation.
//!
//! Ports are found by probing: bind, then release immediately. The allocator
//! remembers every port it handed out so a single session never receives the
//! same port twice, even though nothing stays bound between the probe and
//! the hypervisor's own bind.

use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};

use qsession_core::error::{Result, SessionError};

/// Number of consecutive ports probed before giving up.
pub const MAX_PROBE_ATTEMPTS: u16 = 32;

/// Sequential, probe-based port allocator for one session.
#[derive(Debug, Default)]
pub struct PortAllocator {
    claimed: HashSet<u16>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the first bindable port in `preferred..preferred + 32` that
    /// this allocator has not already handed out.
    pub fn allocate(&mut self, preferred: u16) -> Result<u16> {
        for offset in 0..MAX_PROBE_ATTEMPTS {
            let Some(port) = preferred.checked_add(offset) else {
                break;
            };
            if port == 0 || self.claimed.contains(&port) {
                continue;
            }

            match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
                Ok(listener) => {
                    drop(listener);
                    self.claimed.insert(port);
                    if port != preferred {
                        tracing::debug!(preferred, port, "Preferred port busy, using next free");
                    }
                    return Ok(port);
                }
                Err(e) => {
                    tracing::trace!(port, error = %e, "Port not bindable");
                }
            }
        }

        Err(SessionError::ResourceExhausted {
            preferred,
            attempts: MAX_PROBE_ATTEMPTS,
        })
    }

    /// Ports handed out so far.
    pub fn claimed(&self) -> impl Iterator<Item = u16> + '_ {
        self.claimed.iter().copied()
    }
}
