//! Keepalive senders.
//!
//! One task per destination. The socket is connected once; the loop sends
//! immediately and then every `frequency` until shutdown.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use timeoutd_core::codec::{unix_now, Codec};
use timeoutd_core::wire::Keepalive;

use crate::multicast::MulticastPlan;

pub struct Sender {
    socket: UdpSocket,
    destination: SocketAddr,
    codec: Codec,
    keepalive: Keepalive,
    frequency: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl Sender {
    /// Open a socket connected to `destination`. Multicast destinations get
    /// TTL and interface from `multicast`.
    pub fn connect(
        destination: SocketAddr,
        codec: Codec,
        keepalive: Keepalive,
        frequency: Duration,
        multicast: Option<&MulticastPlan>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let socket = make_sender_socket(destination, multicast)
            .with_context(|| format!("unable to open sender to {}", destination))?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

        Ok(Self {
            socket,
            destination,
            codec,
            keepalive,
            frequency,
            shutdown,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        let mut interval = tokio::time::interval(self.frequency);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            destination = %self.destination,
            codec = self.codec.name(),
            frequency_secs = self.frequency.as_secs(),
            "starting sender"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!(destination = %self.destination, "sender shutting down");
                    return Ok(());
                }

                _ = interval.tick() => self.send_once().await,
            }
        }
    }

    async fn send_once(&self) {
        let packet = match self.codec.encode(&self.keepalive, unix_now()) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "unable to build keepalive");
                return;
            }
        };

        match self.socket.send(&packet).await {
            Ok(n) => tracing::trace!(destination = %self.destination, bytes = n, "keepalive sent"),
            // ICMP port unreachable from a peer that is not up yet.
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                tracing::trace!(destination = %self.destination, "connection refused");
            }
            Err(e) => {
                tracing::error!(destination = %self.destination, error = %e, "error sending UDP packet");
            }
        }
    }
}

fn make_sender_socket(
    destination: SocketAddr,
    multicast: Option<&MulticastPlan>,
) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(
        Domain::for_address(destination),
        Type::DGRAM,
        Some(Protocol::UDP),
    )
    .context("socket()")?;

    if let (SocketAddr::V4(v4), Some(plan)) = (destination, multicast) {
        if v4.ip().is_multicast() {
            plan.setup_sender(&socket);
        }
    }

    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket.connect(&destination.into()).context("connect()")?;

    Ok(socket.into())
}
