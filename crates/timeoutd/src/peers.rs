//! Peer lists and peer address resolution.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use anyhow::{Context, Result};

/// Peers from peer-file text: one per line, `#` or `;` starts a comment,
/// blank lines ignored.
pub fn parse_peer_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            let line = line.split(['#', ';']).next().unwrap_or("");
            line.trim_end()
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn read_peer_file(path: &Path) -> Result<Vec<String>> {
    tracing::debug!(path = %path.display(), "reading peer file");
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read peer file {}", path.display()))?;
    Ok(parse_peer_list(&text))
}

/// Resolve a peer to a socket address. IP literals are used as-is (IPv6
/// may be bracketed); names go through DNS and the first answer wins.
pub async fn resolve_peer(peer: &str, port: u16) -> Result<SocketAddr> {
    let literal = peer.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    tokio::net::lookup_host((peer, port))
        .await
        .with_context(|| format!("unable to find DNS record for peer {}", peer))?
        .next()
        .with_context(|| format!("no address found for peer {}", peer))
}
