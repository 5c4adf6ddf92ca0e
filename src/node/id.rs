//! Node ID: a network endpoint (IPv6 address + port).

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

/// Default CoAP port the motes listen on.
pub const DEFAULT_PORT: u16 = 5684;

/// Default network prefix (`aaaa::/64`) used when a mote reports a bare
/// interface identifier.
pub const DEFAULT_PREFIX: u16 = 0xaaaa;

/// Identifies a mote (or the border router) on the mesh.
///
/// Equality, ordering and hashing are by `(address, port)`. The address is
/// the prefix-qualified, EUI-64 derived IPv6 address of the mote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    address: Ipv6Addr,
    port: u16,
}

impl NodeId {
    /// Reserved target meaning "every neighbour" (RPL all-nodes multicast).
    pub const BROADCAST: NodeId = NodeId {
        address: Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x1a),
        port: DEFAULT_PORT,
    };

    #[inline]
    pub fn new(address: Ipv6Addr, port: u16) -> Self {
        NodeId { address, port }
    }

    /// Build an address from a /64 prefix head and a 64-bit interface id.
    pub fn from_interface_id(prefix: u16, iid: u64, port: u16) -> Self {
        let segments = [
            prefix,
            0,
            0,
            0,
            (iid >> 48) as u16,
            (iid >> 32) as u16,
            (iid >> 16) as u16,
            iid as u16,
        ];
        NodeId::new(Ipv6Addr::from(segments), port)
    }

    /// Parse what a mote reports in its children list.
    ///
    /// Accepts a full IPv6 address (`aaaa::215:8d00:52:68c7`), a bracketed
    /// endpoint (`[aaaa::1]:5684`) or a bare interface id (`215:8d00:52:68c7`),
    /// which is qualified with `prefix`.
    pub fn parse_with_prefix(s: &str, prefix: u16) -> Result<Self, ControllerError> {
        let s = s.trim();
        if s.starts_with('[') {
            return s.parse();
        }
        if let Ok(address) = s.parse::<Ipv6Addr>() {
            return Ok(NodeId::new(address, DEFAULT_PORT));
        }
        let groups: Vec<&str> = s.split(':').collect();
        if groups.is_empty() || groups.len() > 4 {
            return Err(ControllerError::InvalidAddress(s.to_string()));
        }
        let mut iid = 0u64;
        for group in groups {
            let value = u16::from_str_radix(group, 16)
                .map_err(|_| ControllerError::InvalidAddress(s.to_string()))?;
            iid = (iid << 16) | u64::from(value);
        }
        Ok(NodeId::from_interface_id(prefix, iid, DEFAULT_PORT))
    }

    #[inline]
    pub fn address(self) -> Ipv6Addr {
        self.address
    }

    #[inline]
    pub fn port(self) -> u16 {
        self.port
    }

    /// Lower 64 bits of the address.
    pub fn interface_id(self) -> u64 {
        let octets = self.address.octets();
        let mut iid = 0u64;
        for byte in &octets[8..] {
            iid = (iid << 8) | u64::from(*byte);
        }
        iid
    }

    #[inline]
    pub fn is_broadcast(self) -> bool {
        self == NodeId::BROADCAST
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]:{}", self.address, self.port)
    }
}

impl FromStr for NodeId {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ControllerError::InvalidAddress(s.to_string());
        if let Some(rest) = s.strip_prefix('[') {
            let (address, port) = rest.split_once(']').ok_or_else(invalid)?;
            let address = address.parse::<Ipv6Addr>().map_err(|_| invalid())?;
            let port = match port.strip_prefix(':') {
                Some(p) => p.parse::<u16>().map_err(|_| invalid())?,
                None if port.is_empty() => DEFAULT_PORT,
                None => return Err(invalid()),
            };
            return Ok(NodeId::new(address, port));
        }
        let address = s.parse::<Ipv6Addr>().map_err(|_| invalid())?;
        Ok(NodeId::new(address, DEFAULT_PORT))
    }
}

impl TryFrom<String> for NodeId {
    type Error = ControllerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}
