//! Firewall rule data structures
//!
//! A [`Rule`] is a single match-and-action directive on one of the three
//! built-in chains. Rules are identified within a chain by their
//! [`RuleKey`] (chain, address, port, protocol); the action is not part of
//! the identity, so two rules differing only by action are duplicates.
//!
//! # Limits
//!
//! Snapshots are limited to [`MAX_RULES`] rules to prevent memory exhaustion.
//!
//! # Example
//!
//! ```
//! use fwadm::core::rule::{Action, Chain, Protocol, Rule};
//!
//! let rule = Rule::new(
//!     Chain::Input,
//!     "192.168.1.100".parse().unwrap(),
//!     22,
//!     Protocol::Tcp,
//!     Action::Accept,
//! );
//! assert_eq!(rule.to_string(), "INPUT src=192.168.1.100 dport=22 proto=tcp -> ACCEPT");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Maximum number of rules allowed in a single snapshot
///
/// Limit prevents memory exhaustion from malformed/malicious snapshot files.
pub const MAX_RULES: usize = 1000;

/// An ordered rule sequence in first-match evaluation order.
pub type RuleSet = Vec<Rule>;

/// Built-in filter chain a rule is attached to
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(ascii_case_insensitive)]
pub enum Chain {
    /// Packets addressed to this host
    #[strum(serialize = "INPUT")]
    Input,
    /// Packets originating from this host
    #[strum(serialize = "OUTPUT")]
    Output,
    /// Packets routed through this host
    #[strum(serialize = "FORWARD")]
    Forward,
}

impl Chain {
    pub const fn as_str(self) -> &'static str {
        match self {
            Chain::Input => "INPUT",
            Chain::Output => "OUTPUT",
            Chain::Forward => "FORWARD",
        }
    }
}

/// Transport protocol matched by a rule
///
/// `Copy` trait allows efficient passing by value for this small enum.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Protocol {
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "udp")]
    Udp,
    /// Match every protocol
    #[default]
    #[strum(serialize = "any")]
    Any,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Any => "any",
        }
    }
}

/// What happens to a packet matching the rule
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(ascii_case_insensitive)]
pub enum Action {
    /// Accept the packet (allow it through)
    #[default]
    #[strum(serialize = "ACCEPT")]
    Accept,
    /// Drop the packet silently (no response sent)
    #[strum(serialize = "DROP")]
    Drop,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Accept => "ACCEPT",
            Action::Drop => "DROP",
        }
    }
}

/// A validated firewall rule.
///
/// Field order is the canonical snapshot field order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub chain: Chain,
    /// Source host the rule matches
    pub address: IpAddr,
    /// Destination port, 0 matches every port
    pub port: u16,
    pub protocol: Protocol,
    pub action: Action,
}

impl Rule {
    pub fn new(chain: Chain, address: IpAddr, port: u16, protocol: Protocol, action: Action) -> Self {
        Self {
            chain,
            address,
            port,
            protocol,
            action,
        }
    }

    /// Identity of this rule within its chain
    pub fn key(&self) -> RuleKey {
        RuleKey {
            chain: self.chain,
            address: self.address,
            port: self.port,
            protocol: self.protocol,
        }
    }

    pub fn is_ipv6(&self) -> bool {
        self.address.is_ipv6()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.key(), self.action)
    }
}

/// The (chain, address, port, protocol) tuple that identifies a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub chain: Chain,
    pub address: IpAddr,
    pub port: u16,
    pub protocol: Protocol,
}

impl RuleKey {
    pub fn matches(&self, rule: &Rule) -> bool {
        rule.chain == self.chain
            && rule.address == self.address
            && rule.port == self.port
            && rule.protocol == self.protocol
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} src={} dport={} proto={}",
            self.chain, self.address, self.port, self.protocol
        )
    }
}
