//! Keepalive listeners.
//!
//! One task per bound socket. Each datagram is decoded by the socket's codec
//! and handed to the scheduler with the sender's IP. Bad packets are logged
//! and dropped; nothing a peer sends can stop the loop.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use timeoutd_core::codec::{unix_now, Codec};
use timeoutd_core::wire::RECV_BUFFER_SIZE;
use timeoutd_services::{ReceiveOutcome, Scheduler};

use crate::multicast::MulticastPlan;

pub struct Listener {
    socket: UdpSocket,
    codec: Codec,
    scheduler: Arc<Scheduler>,
    shutdown: broadcast::Receiver<()>,
}

impl Listener {
    /// Bind `addr` and, for IPv4 with a multicast plan, join the group.
    pub fn bind(
        addr: SocketAddr,
        codec: Codec,
        scheduler: Arc<Scheduler>,
        multicast: Option<&MulticastPlan>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let socket = make_listener_socket(addr, multicast)
            .with_context(|| format!("unable to bind {} listener on {}", codec.name(), addr))?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;
        Ok(Self::from_socket(socket, codec, scheduler, shutdown))
    }

    pub fn from_socket(
        socket: UdpSocket,
        codec: Codec,
        scheduler: Arc<Scheduler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            codec,
            scheduler,
            shutdown,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let local = self.local_addr()?;

        tracing::debug!(addr = %local, codec = self.codec.name(), "listening");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!(addr = %local, "listener shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, peer_addr) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "error reading data packet");
                            continue;
                        }
                    };
                    if len == 0 {
                        continue;
                    }

                    handle_packet(&self.codec, &self.scheduler, &buf[..len], peer_addr.ip()).await;
                }
            }
        }
    }
}

/// Decode one datagram and pass it to the scheduler.
///
/// Returns None when the packet was rejected.
pub async fn handle_packet(
    codec: &Codec,
    scheduler: &Scheduler,
    data: &[u8],
    source: IpAddr,
) -> Option<ReceiveOutcome> {
    tracing::trace!(source = %source, bytes = hex::encode(data), "packet");

    let keepalive = match codec.decode(data, unix_now()) {
        Ok(k) => k,
        Err(e) if e.is_auth_failure() => {
            tracing::error!(source = %source, error = %e, "rejected packet");
            return None;
        }
        Err(e) => {
            tracing::warn!(source = %source, error = %e, "rejected packet");
            return None;
        }
    };

    let address = source.to_string();
    Some(
        scheduler
            .receive(&keepalive.key, keepalive.timeout_secs, &address)
            .await,
    )
}

fn make_listener_socket(
    addr: SocketAddr,
    multicast: Option<&MulticastPlan>,
) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .context("socket()")?;

    match addr {
        SocketAddr::V4(_) => {
            if let Some(plan) = multicast {
                plan.setup_receiver(&socket);
            }
        }
        SocketAddr::V6(_) => {
            socket.set_only_v6(true).context("IPV6_V6ONLY")?;
        }
    }

    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket.bind(&addr.into()).context("bind()")?;

    Ok(socket.into())
}
