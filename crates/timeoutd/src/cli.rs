//! Command-line flags. Anything given here overrides the config file.

use std::path::PathBuf;

use clap::Parser;

use timeoutd_core::config::TimeoutdConfig;

#[derive(Debug, Parser)]
#[command(name = "timeoutd", version, about = "Distributed dead man's switch")]
pub struct Cli {
    /// Config file (default: $TIMEOUTD_CONFIG or ~/.config/timeoutd/config.toml)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Seconds between keepalives sent to each peer
    #[arg(short = 'F', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub frequency: Option<u64>,

    /// Timeout announced to peers, in seconds
    #[arg(short = 'T', long, value_parser = clap::value_parser!(i32).range(1..))]
    pub timeout: Option<i32>,

    /// Key announced to peers (default: node.<hostname>)
    #[arg(short = 'K', long)]
    pub key: Option<String>,

    /// Peer to send keepalives to (repeatable)
    #[arg(short = 'p', long = "peer")]
    pub peers: Vec<String>,

    /// File listing peers, one per line (repeatable)
    #[arg(short = 'P', long = "peer-file")]
    pub peer_files: Vec<PathBuf>,

    /// Program run as `<script> <key> <address>` when a key times out
    #[arg(short = 's', long)]
    pub notify_script: Option<PathBuf>,

    /// IPv4 multicast TTL
    #[arg(short = 'M', long, value_parser = clap::value_parser!(u32).range(1..))]
    pub multicast_ttl: Option<u32>,

    /// Send and receive keepalives on the multicast group
    #[arg(short = 'm', long)]
    pub multicast: bool,

    /// Maximum number of tracked keys
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub entry_limit: Option<u64>,

    /// Debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    /// Overlay flags onto a loaded config.
    pub fn apply(&self, config: &mut TimeoutdConfig) {
        if let Some(f) = self.frequency {
            config.sender.frequency_secs = f;
        }
        if let Some(t) = self.timeout {
            config.sender.timeout_secs = t;
        }
        if let Some(k) = &self.key {
            config.sender.key = Some(k.clone());
        }
        config.sender.peers.extend(self.peers.iter().cloned());
        config.sender.peer_files.extend(self.peer_files.iter().cloned());
        if let Some(s) = &self.notify_script {
            config.scheduler.notify_script = s.clone();
        }
        if let Some(ttl) = self.multicast_ttl {
            config.multicast.ttl = ttl;
        }
        if self.multicast {
            config.multicast.enabled = true;
        }
        if let Some(limit) = self.entry_limit {
            config.scheduler.entry_limit = usize::try_from(limit).unwrap_or(usize::MAX);
        }
    }
}
