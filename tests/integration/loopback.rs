use std::time::Duration;

use tokio::net::UdpSocket;

use timeoutd_core::codec::{unix_now, Codec, SignedCodec, SimpleCodec};
use timeoutd_core::crypto::KeySet;
use timeoutd_core::wire::{Keepalive, RECV_BUFFER_SIZE};
use timeoutd_services::ReceiveOutcome;

use crate::*;

/// Receive one datagram and pass it through `codec` into the scheduler.
async fn receive_one(
    socket: &UdpSocket,
    codec: &Codec,
    sched: &timeoutd_services::Scheduler,
) -> Option<ReceiveOutcome> {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let (len, from) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("datagram not received")
        .expect("recv_from failed");

    let ka = codec.decode(&buf[..len], unix_now()).ok()?;
    Some(
        sched
            .receive(&ka.key, ka.timeout_secs, &from.ip().to_string())
            .await,
    )
}

/// Signed keepalive over real UDP, then silence until the key expires.
#[tokio::test]
async fn test_signed_udp_round_trip_then_expiry() {
    let (sched, mut rx) = recording_scheduler(200, 2);
    sched.start().await;

    let codec = Codec::Signed(SignedCodec::with_keys(
        KeySet::from_passphrases(&["fleet-key"]).unwrap(),
    ));
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender.connect(listener.local_addr().unwrap()).await.unwrap();

    let packet = codec
        .encode(&Keepalive::new("node.alpha", 1), unix_now())
        .unwrap();
    sender.send(&packet).await.unwrap();

    assert_eq!(
        receive_one(&listener, &codec, &sched).await,
        Some(ReceiveOutcome::Created)
    );

    let fired = tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("key never expired")
        .unwrap();
    assert_eq!(fired.key, "node.alpha");
    assert_eq!(fired.address, "127.0.0.1");
    assert!(!sched.contains("node.alpha").await);

    sched.stop().await;
}

/// A tampered datagram on the wire is dropped and the socket keeps working.
#[tokio::test]
async fn test_tampered_udp_datagram_dropped() {
    let (sched, _rx) = recording_scheduler(200, 1);
    let codec = Codec::Signed(SignedCodec::with_keys(
        KeySet::from_passphrases(&["fleet-key"]).unwrap(),
    ));
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut packet = codec
        .encode(&Keepalive::new("node.alpha", 10), unix_now())
        .unwrap();
    let last = packet.len() - 1;
    packet[last] ^= 0x01;
    sender.send_to(&packet, addr).await.unwrap();
    assert_eq!(receive_one(&listener, &codec, &sched).await, None);

    let good = codec
        .encode(&Keepalive::new("node.alpha", 10), unix_now())
        .unwrap();
    sender.send_to(&good, addr).await.unwrap();
    assert_eq!(
        receive_one(&listener, &codec, &sched).await,
        Some(ReceiveOutcome::Created)
    );
}

/// Simple-protocol packet on IPv6 loopback.
#[tokio::test]
async fn test_simple_udp_over_ipv6() {
    let listener = match UdpSocket::bind("[::1]:0").await {
        Ok(s) => s,
        Err(_) => {
            eprintln!("skipping: no IPv6 loopback");
            return;
        }
    };
    let (sched, _rx) = recording_scheduler(200, 1);
    let codec = Codec::Simple(SimpleCodec::default());
    let sender = UdpSocket::bind("[::1]:0").await.unwrap();

    let payload = codec.encode(&Keepalive::new("node.v6", 10), 0).unwrap();
    sender
        .send_to(&payload, listener.local_addr().unwrap())
        .await
        .unwrap();

    assert_eq!(
        receive_one(&listener, &codec, &sched).await,
        Some(ReceiveOutcome::Created)
    );
    assert_eq!(sched.entry("node.v6").await.unwrap().last_address(), "::1");
}
