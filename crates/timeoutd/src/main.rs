//! timeoutd — distributed dead man's switch daemon.
//!
//! Peers send each other keepalives; a key that goes quiet past its timeout
//! triggers the notify script.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use timeoutd_core::codec::{Codec, SignedCodec, SimpleCodec};
use timeoutd_core::config::TimeoutdConfig;
use timeoutd_core::crypto::KeySet;
use timeoutd_core::wire::Keepalive;
use timeoutd_services::{Scheduler, ScriptNotifier};

mod cli;
mod listener;
mod multicast;
mod peers;
mod sender;

use cli::Cli;
use listener::Listener;
use multicast::MulticastPlan;
use sender::Sender;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => TimeoutdConfig::load_from(path.clone()),
        None => TimeoutdConfig::load(),
    }
    .context("failed to load configuration")?;
    cli.apply(&mut config);
    config.validate()?;

    let keys = KeySet::from_passphrases(&config.protocol.preshared_keys)
        .context("invalid pre-shared key")?;
    let default_timeout = config.protocol.default_timeout_secs;
    let simple = Codec::Simple(SimpleCodec::new(default_timeout));
    let signed = (!keys.is_empty()).then(|| {
        Codec::Signed(SignedCodec::new(
            keys,
            config.protocol.timestamp_slack_secs,
            default_timeout,
        ))
    });

    let multicast = if config.multicast.enabled {
        let group: Ipv4Addr = config
            .multicast
            .group
            .parse()
            .with_context(|| format!("invalid multicast group {}", config.multicast.group))?;
        let plan = MulticastPlan::discover(group, config.multicast.ttl)
            .context("multicast bootstrap failed")?;
        tracing::info!(group = %group, interface = %plan.send.name, "multicast enabled");
        Some(plan)
    } else {
        None
    };

    // Resolve every destination before anything starts, so a bad peer is
    // a startup failure.
    let (sender_codec, sender_port) = match &signed {
        Some(codec) => (codec.clone(), config.protocol.signed_port),
        None => (simple.clone(), config.protocol.simple_port),
    };
    let destinations = collect_destinations(&config, multicast.as_ref(), sender_port).await?;

    let sender_key = match &config.sender.key {
        Some(key) => key.clone(),
        None => default_sender_key()?,
    };
    let keepalive = Keepalive::new(sender_key, config.sender.timeout_secs);

    // ── Scheduler ────────────────────────────────────────────────────────────
    let notifier = Arc::new(ScriptNotifier::new(config.scheduler.notify_script.clone()));
    let scheduler = Arc::new(Scheduler::new(&config.scheduler, notifier));
    scheduler.start().await;

    // ── Listeners ────────────────────────────────────────────────────────────
    let (listener_shutdown, _) = broadcast::channel::<()>(1);
    let mut bindings = vec![
        (IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.protocol.simple_port, simple.clone()),
        (IpAddr::V6(Ipv6Addr::UNSPECIFIED), config.protocol.simple_port, simple),
    ];
    if let Some(codec) = &signed {
        let port = config.protocol.signed_port;
        bindings.push((IpAddr::V4(Ipv4Addr::UNSPECIFIED), port, codec.clone()));
        bindings.push((IpAddr::V6(Ipv6Addr::UNSPECIFIED), port, codec.clone()));
    }

    let mut listener_tasks = Vec::new();
    for (ip, port, codec) in bindings {
        let listener = Listener::bind(
            SocketAddr::new(ip, port),
            codec,
            scheduler.clone(),
            multicast.as_ref().filter(|_| ip.is_ipv4()),
            listener_shutdown.subscribe(),
        )?;
        listener_tasks.push(tokio::spawn(listener.run()));
    }

    // ── Senders ──────────────────────────────────────────────────────────────
    let (sender_shutdown, _) = broadcast::channel::<()>(1);
    let frequency = Duration::from_secs(config.sender.frequency_secs);
    let mut sender_tasks = Vec::new();
    for destination in destinations {
        let sender = Sender::connect(
            destination,
            sender_codec.clone(),
            keepalive.clone(),
            frequency,
            multicast.as_ref(),
            sender_shutdown.subscribe(),
        )?;
        sender_tasks.push(tokio::spawn(sender.run()));
    }

    tracing::info!(
        key = %keepalive.key,
        listeners = listener_tasks.len(),
        senders = sender_tasks.len(),
        signed = signed.is_some(),
        "server running normally"
    );

    shutdown_signal().await?;

    // ── Shutdown: senders, listeners, then the scheduler ─────────────────────
    tracing::debug!("stopping senders");
    let _ = sender_shutdown.send(());
    join_all("sender", sender_tasks).await;

    tracing::debug!("stopping listeners");
    let _ = listener_shutdown.send(());
    join_all("listener", listener_tasks).await;

    tracing::debug!("stopping scheduler");
    scheduler.stop().await;

    tracing::info!("normal shutdown");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Configured peers, peers from peer files, and the multicast group.
async fn collect_destinations(
    config: &TimeoutdConfig,
    multicast: Option<&MulticastPlan>,
    port: u16,
) -> Result<Vec<SocketAddr>> {
    let mut names = config.sender.peers.clone();
    for path in &config.sender.peer_files {
        names.extend(peers::read_peer_file(path)?);
    }

    let mut destinations = Vec::with_capacity(names.len() + 1);
    for name in &names {
        destinations.push(peers::resolve_peer(name, port).await?);
    }
    if let Some(plan) = multicast {
        destinations.push(SocketAddr::new(IpAddr::V4(plan.group), port));
    }
    Ok(destinations)
}

fn default_sender_key() -> Result<String> {
    let hostname = nix::unistd::gethostname().context("unable to read node name")?;
    Ok(node_key(&hostname.to_string_lossy()))
}

/// `node.` plus the hostname up to its first dot.
fn node_key(hostname: &str) -> String {
    let short = hostname.split('.').next().unwrap_or(hostname);
    format!("node.{}", short)
}

async fn shutdown_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).context("SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("SIGTERM handler")?;
    tokio::select! {
        _ = sigint.recv() => tracing::info!("SIGINT received, shutting down"),
        _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down"),
    }
    Ok(())
}

async fn join_all(kind: &str, tasks: Vec<JoinHandle<Result<()>>>) {
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(kind, error = %e, "task failed"),
            Err(e) => tracing::error!(kind, error = %e, "task panicked"),
        }
    }
}
