//! Parser for the packet filter's authoritative rule listing
//!
//! The gateway reports live state in `iptables -S` form (one `-A CHAIN ...`
//! line per rule, in evaluation order). `iptables-save` output is accepted
//! too since it only adds table headers, counters and `COMMIT` lines.
//!
//! Not every live rule fits the [`Rule`] model. A well-formed rule that uses
//! a user-defined chain, a network (rather than host) source, or any match
//! or target beyond `-s/-p/-m tcp|udp/--dport/-j ACCEPT|DROP` is *foreign*:
//! it is counted and skipped, never managed. A line that is structurally
//! broken fails the whole parse so the store can keep its prior state.

use crate::core::error::StoreError;
use crate::core::rule::{Action, Chain, Protocol, Rule, RuleKey};
use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// Result of parsing a complete listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedListing {
    /// Managed rules in listing order
    pub rules: Vec<Rule>,
    /// Well-formed rules the model cannot represent
    pub foreign: usize,
}

/// Classification of one listing line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingLine {
    /// Policy, chain declaration, table header, comment or blank line
    Ignored,
    /// A rule in the model
    Managed(Rule),
    /// A rule on `chain` the model cannot represent
    Foreign { chain: String },
}

/// Parses a full listing, preserving rule order exactly.
///
/// # Errors
///
/// Returns [`StoreError::Sync`] naming the first broken line.
pub fn parse_rule_listing(raw: &str) -> Result<ParsedListing, StoreError> {
    let mut parsed = ParsedListing::default();

    for (idx, line) in raw.lines().enumerate() {
        match parse_listing_line(line).map_err(|reason| StoreError::Sync {
            line: idx + 1,
            reason,
        })? {
            ListingLine::Ignored => {}
            ListingLine::Managed(rule) => parsed.rules.push(rule),
            ListingLine::Foreign { .. } => parsed.foreign += 1,
        }
    }

    Ok(parsed)
}

/// Finds the 1-based position of the first rule matching `key` within its
/// chain, counting foreign rules on the same chain.
///
/// The position is what `iptables -D CHAIN <num>` expects.
///
/// # Errors
///
/// Returns [`StoreError::Sync`] if the listing cannot be parsed.
pub fn find_rule_position(raw: &str, key: &RuleKey) -> Result<Option<usize>, StoreError> {
    let mut position = 0;

    for (idx, line) in raw.lines().enumerate() {
        let parsed = parse_listing_line(line).map_err(|reason| StoreError::Sync {
            line: idx + 1,
            reason,
        })?;

        match parsed {
            ListingLine::Ignored => {}
            ListingLine::Foreign { chain } => {
                if chain == key.chain.as_str() {
                    position += 1;
                }
            }
            ListingLine::Managed(rule) => {
                if rule.chain == key.chain {
                    position += 1;
                    if key.matches(&rule) {
                        return Ok(Some(position));
                    }
                }
            }
        }
    }

    Ok(None)
}

/// Parses a single listing line.
///
/// # Errors
///
/// Returns a human-readable reason if the line is structurally broken.
pub fn parse_listing_line(line: &str) -> Result<ListingLine, String> {
    let line = line.trim();

    // iptables-save framing and warnings printed by the nft backend
    if line.is_empty()
        || line.starts_with('#')
        || line.starts_with('*')
        || line.starts_with(':')
        || line == "COMMIT"
    {
        return Ok(ListingLine::Ignored);
    }

    let tokens = split_args(line)?;
    let mut iter = tokens.iter().map(String::as_str);

    match iter.next() {
        Some("-P" | "-N") => return Ok(ListingLine::Ignored),
        Some("-A") => {}
        Some(other) => return Err(format!("unexpected listing command '{other}'")),
        None => return Ok(ListingLine::Ignored),
    }

    let chain_name = iter.next().ok_or("missing chain after -A")?;
    let foreign = || {
        Ok(ListingLine::Foreign {
            chain: chain_name.to_string(),
        })
    };

    // iptables chain names are case-sensitive; lowercase "input" is a user chain
    let chain = match chain_name {
        "INPUT" => Chain::Input,
        "OUTPUT" => Chain::Output,
        "FORWARD" => Chain::Forward,
        _ => return foreign(),
    };

    let mut address: Option<IpAddr> = None;
    let mut protocol = Protocol::Any;
    let mut port: u16 = 0;
    let mut action: Option<Action> = None;

    while let Some(option) = iter.next() {
        match option {
            "-s" => {
                let value = iter.next().ok_or("missing value for -s")?;
                if value == "!" {
                    return foreign();
                }
                let network: IpNetwork = value
                    .parse()
                    .map_err(|e| format!("invalid source '{value}': {e}"))?;
                let host_prefix = if network.is_ipv4() { 32 } else { 128 };
                if network.prefix() != host_prefix {
                    return foreign();
                }
                address = Some(network.ip());
            }
            "-p" => match iter.next().ok_or("missing value for -p")? {
                "tcp" => protocol = Protocol::Tcp,
                "udp" => protocol = Protocol::Udp,
                "all" => protocol = Protocol::Any,
                _ => return foreign(),
            },
            "-m" => match iter.next().ok_or("missing value for -m")? {
                "tcp" | "udp" => {}
                _ => return foreign(),
            },
            "--dport" => {
                let value = iter.next().ok_or("missing value for --dport")?;
                if value.contains(':') {
                    // Port ranges are valid iptables but outside the model
                    return foreign();
                }
                port = value
                    .parse()
                    .map_err(|_| format!("invalid destination port '{value}'"))?;
            }
            "-j" => match iter.next().ok_or("missing value for -j")? {
                "ACCEPT" => action = Some(Action::Accept),
                "DROP" => action = Some(Action::Drop),
                _ => return foreign(),
            },
            _ => return foreign(),
        }
    }

    match (address, action) {
        (Some(address), Some(action)) => Ok(ListingLine::Managed(Rule::new(
            chain, address, port, protocol, action,
        ))),
        _ => foreign(),
    }
}

/// Splits a listing line into arguments, honouring the double quotes
/// iptables puts around comments and other values containing spaces.
fn split_args(line: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            '\\' if in_quotes => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => return Err("dangling escape at end of line".to_string()),
            },
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quote".to_string());
    }
    if has_token {
        args.push(current);
    }

    Ok(args)
}
