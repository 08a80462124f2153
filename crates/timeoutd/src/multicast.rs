//! IPv4 multicast interface selection.
//!
//! Receiving joins the group on every interface that is not excluded by
//! name. Sending needs exactly one interface, and only one with an RFC 1918
//! address qualifies: multicast keepalives are not meant to leave a private
//! network.
//!
//! Docker bridges receive but never send. When timeoutd runs on the host
//! it should announce itself on the real interface, and inside a container
//! the only bridge is the far end of a veth.

use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{Context, Result};
use socket2::Socket;

/// Which directions an interface may carry multicast keepalives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub receive: bool,
    pub send: bool,
}

const NONE: Usage = Usage {
    receive: false,
    send: false,
};
const RECEIVE_ONLY: Usage = Usage {
    receive: true,
    send: false,
};
const ANY: Usage = Usage {
    receive: true,
    send: true,
};

/// Interface-name prefixes and what they are allowed to do. The first
/// matching prefix decides.
const RULES: &[(&str, Usage)] = &[
    ("lo", NONE),
    ("docker_gwbridge", RECEIVE_ONLY),
    ("docker0", RECEIVE_ONLY),
    // host side of docker bridges
    ("veth", NONE),
    // pimd pseudo-interface
    ("pimreg", NONE),
];

/// Usage permitted by name alone.
pub fn classify(name: &str) -> Usage {
    RULES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|&(_, usage)| usage)
        .unwrap_or(ANY)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub addr: Ipv4Addr,
}

/// Interfaces chosen for multicast, plus group and TTL.
#[derive(Debug, Clone)]
pub struct MulticastPlan {
    pub group: Ipv4Addr,
    pub ttl: u32,
    pub receive: Vec<Interface>,
    pub send: Interface,
}

impl MulticastPlan {
    /// Scan the host's IPv4 interfaces.
    pub fn discover(group: Ipv4Addr, ttl: u32) -> Result<Self> {
        let addrs = nix::ifaddrs::getifaddrs().context("failed to list network interfaces")?;

        let interfaces = addrs.filter_map(|ifa| {
            let sin = ifa.address.as_ref()?.as_sockaddr_in()?;
            let addr = *SocketAddrV4::from(*sin).ip();
            Some(Interface {
                name: ifa.interface_name,
                addr,
            })
        });

        Self::from_interfaces(group, ttl, interfaces)
    }

    /// Apply the selection rules to a list of (name, IPv4 address) pairs.
    pub fn from_interfaces(
        group: Ipv4Addr,
        ttl: u32,
        interfaces: impl IntoIterator<Item = Interface>,
    ) -> Result<Self> {
        if !group.is_multicast() {
            anyhow::bail!("{} is not a multicast address", group);
        }

        let mut receive = Vec::new();
        let mut send: Option<Interface> = None;

        for iface in interfaces {
            let usage = classify(&iface.name);
            let can_send = usage.send && iface.addr.is_private();

            tracing::debug!(
                interface = %iface.name,
                addr = %iface.addr,
                send = can_send,
                receive = usage.receive,
                "multicast interface"
            );

            if can_send {
                match &send {
                    Some(chosen) => tracing::warn!(
                        interface = %iface.name,
                        chosen = %chosen.name,
                        "multiple multicast-eligible interfaces"
                    ),
                    None => send = Some(iface.clone()),
                }
            }
            if usage.receive {
                receive.push(iface);
            }
        }

        let send = send.context("no RFC 1918 interface available for multicast")?;
        Ok(Self {
            group,
            ttl,
            receive,
            send,
        })
    }

    /// Join the group on every receive interface. Failures are logged per
    /// interface.
    pub fn setup_receiver(&self, socket: &Socket) {
        for iface in &self.receive {
            match socket.join_multicast_v4(&self.group, &iface.addr) {
                Ok(()) => tracing::debug!(
                    group = %self.group,
                    interface = %iface.name,
                    "joined multicast group"
                ),
                Err(e) => tracing::error!(
                    group = %self.group,
                    interface = %iface.name,
                    error = %e,
                    "failed to join multicast group"
                ),
            }
        }
    }

    /// Set TTL and outgoing interface on a socket that sends to the group.
    pub fn setup_sender(&self, socket: &Socket) {
        if let Err(e) = socket.set_multicast_ttl_v4(self.ttl) {
            tracing::error!(ttl = self.ttl, error = %e, "failed to set multicast TTL");
        }
        if let Err(e) = socket.set_multicast_if_v4(&self.send.addr) {
            tracing::error!(
                interface = %self.send.name,
                error = %e,
                "failed to bind multicast to interface"
            );
        }
    }
}
