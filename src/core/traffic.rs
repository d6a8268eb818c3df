//! Connection listing classifier
//!
//! Turns the text printed by `netstat -tuan` or `ss -tuan` into a
//! [`TrafficSummary`]. Classification is a pure function of its input and
//! timestamp; collecting the listing is the gateway's job.
//!
//! Accepted line layouts:
//!
//! ```text
//! netstat: tcp   0 0 127.0.0.1:22     0.0.0.0:*       LISTEN
//! ss:      tcp   LISTEN 0 128 0.0.0.0:22 0.0.0.0:*
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// Transport protocol of an observed socket
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnProtocol {
    Tcp,
    Udp,
    /// Anything the listing reports that is not tcp or udp
    Other,
}

impl ConnProtocol {
    /// Maps a listing's protocol column, folding the `6` family suffix.
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().trim_end_matches('6') {
            "tcp" => ConnProtocol::Tcp,
            "udp" => ConnProtocol::Udp,
            _ => ConnProtocol::Other,
        }
    }
}

/// Socket state bucket
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ConnState {
    Listen,
    Established,
    Other,
}

/// One socket parsed from a connection listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub protocol: ConnProtocol,
    /// `None` for the `*` wildcard
    pub local_address: Option<IpAddr>,
    pub local_port: Option<u16>,
    pub remote_address: Option<IpAddr>,
    pub remote_port: Option<u16>,
    pub state: ConnState,
}

/// Aggregate view of a connection listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSummary {
    pub total_connections: usize,
    pub by_protocol: BTreeMap<ConnProtocol, usize>,
    pub by_state: BTreeMap<ConnState, usize>,
    /// Local ports of listening sockets, ascending
    pub listening_ports: BTreeSet<u16>,
    /// Lines that were neither headers nor parseable records
    pub skipped_lines: usize,
    pub generated_at: DateTime<Utc>,
}

/// Result of parsing a single listing line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionLine {
    /// Blank or column header
    Ignored,
    Record(ConnectionRecord),
    Malformed,
}

/// Builds a summary from a raw connection listing.
pub fn classify(raw: &str, generated_at: DateTime<Utc>) -> TrafficSummary {
    let mut summary = TrafficSummary {
        total_connections: 0,
        by_protocol: BTreeMap::new(),
        by_state: BTreeMap::new(),
        listening_ports: BTreeSet::new(),
        skipped_lines: 0,
        generated_at,
    };

    for line in raw.lines() {
        match parse_connection_line(line) {
            ConnectionLine::Ignored => {}
            ConnectionLine::Malformed => summary.skipped_lines += 1,
            ConnectionLine::Record(record) => {
                summary.total_connections += 1;
                *summary.by_protocol.entry(record.protocol).or_insert(0) += 1;
                *summary.by_state.entry(record.state).or_insert(0) += 1;
                if record.state == ConnState::Listen
                    && let Some(port) = record.local_port
                {
                    summary.listening_ports.insert(port);
                }
            }
        }
    }

    summary
}

/// Parses one line of `netstat -tuan` or `ss -tuan` output.
pub fn parse_connection_line(line: &str) -> ConnectionLine {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let Some(first) = tokens.first() else {
        return ConnectionLine::Ignored;
    };
    if matches!(
        first.to_ascii_lowercase().as_str(),
        "active" | "proto" | "netid" | "state"
    ) {
        return ConnectionLine::Ignored;
    }
    if tokens.len() < 5 {
        return ConnectionLine::Malformed;
    }

    let is_counter = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    // netstat puts the queue counters right after the protocol, ss puts the state first
    let (state_token, local, remote) = if is_counter(tokens[1]) && is_counter(tokens[2]) {
        (tokens.get(5).copied(), tokens[3], tokens[4])
    } else if tokens.len() >= 6 && is_counter(tokens[2]) && is_counter(tokens[3]) {
        (Some(tokens[1]), tokens[4], tokens[5])
    } else {
        return ConnectionLine::Malformed;
    };

    let (Some((local_address, local_port)), Some((remote_address, remote_port))) =
        (parse_endpoint(local), parse_endpoint(remote))
    else {
        return ConnectionLine::Malformed;
    };

    let state = match state_token.map(str::to_ascii_uppercase).as_deref() {
        Some("LISTEN") => ConnState::Listen,
        Some("ESTABLISHED" | "ESTAB") => ConnState::Established,
        // Unbound datagram sockets have no state column in netstat and UNCONN in ss
        None | Some("UNCONN") if remote_port.is_none() => ConnState::Listen,
        _ => ConnState::Other,
    };

    ConnectionLine::Record(ConnectionRecord {
        protocol: ConnProtocol::from_token(tokens[0]),
        local_address,
        local_port,
        remote_address,
        remote_port,
        state,
    })
}

/// Splits `addr:port`, `[v6]:port` or `v6:port` into its parts.
///
/// Returns `None` when the endpoint is not parseable.
fn parse_endpoint(endpoint: &str) -> Option<(Option<IpAddr>, Option<u16>)> {
    let (host, port) = endpoint.rsplit_once(':')?;

    let port = match port {
        "*" => None,
        p => Some(p.parse::<u16>().ok()?),
    };

    let host = host.trim_start_matches('[').trim_end_matches(']');
    // ss appends the interface as `%zone`
    let host = host.split_once('%').map_or(host, |(addr, _)| addr);
    let address = match host {
        "*" => None,
        h => Some(h.parse::<IpAddr>().ok()?),
    };

    Some((address, port))
}
