//! Network planning for a session.
//!
//! Produces the guest MAC and the forwarded-port table the hypervisor's
//! user-mode network is configured with.

mod identity;

pub use identity::{derive_mac, HostIdentity};

use qsession_core::error::Result;
use qsession_core::network::{parse_forward_rules, MacAddress, PortForwardRule, SSH_GUEST_PORT};

use crate::port::PortAllocator;

/// Guest MAC plus resolved port forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPlan {
    pub mac: MacAddress,
    /// Resolved forwards, SSH first. Host ports are unique.
    pub forwards: Vec<PortForwardRule>,
}

impl NetworkPlan {
    /// Build the plan for this host.
    pub fn build(allocator: &mut PortAllocator, ssh_port: u16, user_rules: &str) -> Result<Self> {
        let identity = HostIdentity::detect();
        let mac = derive_mac(identity.as_str());
        tracing::debug!(source = identity.source(), mac = %mac, "Derived guest MAC");

        let forwards = build_forward_table(allocator, ssh_port, user_rules)?;
        Ok(Self { mac, forwards })
    }

    /// Host port forwarded to guest SSH, if any.
    pub fn ssh_host_port(&self) -> Option<u16> {
        self.forwards
            .iter()
            .find(|r| r.guest_port == SSH_GUEST_PORT)
            .map(|r| r.host_port)
    }
}

/// Resolve the forward table.
///
/// The whole rule string is validated before any port is probed. A user
/// rule targeting guest port 22 replaces the default SSH forward. Each host
/// port is resolved through the allocator, so a busy or duplicate request
/// moves to the next free port.
pub fn build_forward_table(
    allocator: &mut PortAllocator,
    ssh_port: u16,
    user_rules: &str,
) -> Result<Vec<PortForwardRule>> {
    let requested = parse_forward_rules(user_rules)?;

    let mut wanted = Vec::with_capacity(requested.len() + 1);
    if !requested.iter().any(|r| r.guest_port == SSH_GUEST_PORT) {
        wanted.push(PortForwardRule::new(ssh_port, SSH_GUEST_PORT));
    }
    wanted.extend(requested);

    let mut table = Vec::with_capacity(wanted.len());
    for rule in wanted {
        let host_port = allocator.allocate(rule.host_port)?;
        if host_port != rule.host_port {
            tracing::warn!(
                requested = rule.host_port,
                host_port,
                guest_port = rule.guest_port,
                "Requested host port unavailable, forwarding from another port"
            );
        }
        table.push(PortForwardRule::new(host_port, rule.guest_port));
    }
    Ok(table)
}
