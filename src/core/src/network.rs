//! Network value types for a session: guest MAC address and port forwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SessionError};

/// Guest port the default SSH forward targets.
pub const SSH_GUEST_PORT: u16 = 22;

/// First octet of every derived MAC: locally administered, unicast.
pub const MAC_PREFIX: u8 = 0x52;

/// A 6-octet Ethernet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Bit 1 of the first octet.
    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    pub fn is_unicast(&self) -> bool {
        self.0[0] & 0x01 == 0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(SessionError::ConfigError(format!(
                "invalid MAC address '{}': expected 6 octets, got {}",
                s,
                parts.len()
            )));
        }

        let mut mac = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            mac[i] = u8::from_str_radix(part, 16).map_err(|e| {
                SessionError::ConfigError(format!("invalid MAC octet '{}': {}", part, e))
            })?;
        }
        Ok(MacAddress(mac))
    }
}

/// One TCP forward from a host port to a guest port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortForwardRule {
    pub host_port: u16,
    pub guest_port: u16,
}

impl PortForwardRule {
    pub fn new(host_port: u16, guest_port: u16) -> Self {
        Self {
            host_port,
            guest_port,
        }
    }
}

impl fmt::Display for PortForwardRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_port, self.guest_port)
    }
}

/// Parse a forward rule string: `host:guest[,host:guest...]`.
///
/// Whitespace around entries is ignored and an empty string yields no rules.
/// Any malformed entry rejects the whole string.
pub fn parse_forward_rules(rules: &str) -> Result<Vec<PortForwardRule>> {
    let rules = rules.trim();
    if rules.is_empty() {
        return Ok(Vec::new());
    }

    rules.split(',').map(parse_forward_rule).collect()
}

fn parse_forward_rule(entry: &str) -> Result<PortForwardRule> {
    let entry = entry.trim();
    let (host, guest) = entry.split_once(':').ok_or_else(|| {
        SessionError::ConfigError(format!(
            "invalid port forward '{}': expected host:guest",
            entry
        ))
    })?;

    Ok(PortForwardRule::new(
        parse_port(host, entry)?,
        parse_port(guest, entry)?,
    ))
}

fn parse_port(value: &str, entry: &str) -> Result<u16> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SessionError::ConfigError(format!(
            "invalid port forward '{}': '{}' is not a port number",
            entry, value
        )));
    }
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err(SessionError::ConfigError(format!(
            "invalid port forward '{}': port {} out of range 1-65535",
            entry, value
        ))),
        Ok(port) => Ok(port),
    }
}
