//! Boundary to the packet filter and the socket table
//!
//! [`FilterGateway`] is the only way rule changes reach the kernel. The
//! production implementation shells out to `iptables`/`ip6tables` through
//! [`crate::elevation`]; tests substitute an in-memory fake.
//!
//! Only validated, typed rule fields are rendered into arguments, and
//! arguments always travel as an argv vector, never through a shell.

use crate::core::error::GatewayError;
use crate::core::listing::find_rule_position;
use crate::core::rule::{Protocol, Rule, RuleKey};
use crate::elevation::{
    ElevationError, create_elevated_ip6tables_command, create_elevated_iptables_command,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Privileged packet filter operations
#[allow(async_fn_in_trait)]
pub trait FilterGateway {
    /// Appends `rule` to the end of its chain.
    async fn apply_add(&mut self, rule: &Rule) -> Result<(), GatewayError>;

    /// Deletes the first live rule matching `key`.
    async fn apply_remove(&mut self, key: &RuleKey) -> Result<(), GatewayError>;

    /// Authoritative rule listing in `iptables -S` form.
    async fn list_all(&mut self) -> Result<String, GatewayError>;
}

/// Source of the raw active-connection listing
#[allow(async_fn_in_trait)]
pub trait ConnectionSource {
    async fn list_connections(&mut self) -> Result<String, GatewayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    V4,
    V6,
}

impl Family {
    fn of(address: IpAddr) -> Self {
        if address.is_ipv6() { Family::V6 } else { Family::V4 }
    }

    fn program(self) -> &'static str {
        match self {
            Family::V4 => "iptables",
            Family::V6 => "ip6tables",
        }
    }

    fn host_prefix(self) -> u8 {
        match self {
            Family::V4 => 32,
            Family::V6 => 128,
        }
    }
}

/// Renders the match and target part of a rule, everything after `-A CHAIN`.
///
/// # Errors
///
/// Returns [`GatewayError::CommandFailed`] for a port match on protocol
/// `any`, which iptables cannot express.
pub fn rule_spec_args(rule: &Rule) -> Result<Vec<String>, GatewayError> {
    let family = Family::of(rule.address);
    let mut args = vec![
        "-s".to_string(),
        format!("{}/{}", rule.address, family.host_prefix()),
    ];

    match (rule.protocol, rule.port) {
        (Protocol::Any, 0) => {}
        (Protocol::Any, port) => {
            return Err(GatewayError::command_failed(format!(
                "port matching requires tcp or udp (port {port} with protocol any)"
            )));
        }
        (protocol, 0) => {
            args.extend(["-p".to_string(), protocol.as_str().to_string()]);
        }
        (protocol, port) => {
            let proto = protocol.as_str().to_string();
            args.extend([
                "-p".to_string(),
                proto.clone(),
                "-m".to_string(),
                proto,
                "--dport".to_string(),
                port.to_string(),
            ]);
        }
    }

    args.extend(["-j".to_string(), rule.action.as_str().to_string()]);
    Ok(args)
}

/// The line `iptables -S` prints for `rule`.
///
/// # Errors
///
/// See [`rule_spec_args`].
pub fn format_listing_line(rule: &Rule) -> Result<String, GatewayError> {
    Ok(format!(
        "-A {} {}",
        rule.chain.as_str(),
        rule_spec_args(rule)?.join(" ")
    ))
}

fn elevation_failure(e: ElevationError) -> GatewayError {
    GatewayError::PermissionDenied(e.to_string())
}

async fn run_filter_command(family: Family, args: &[&str]) -> Result<String, GatewayError> {
    let mut cmd = match family {
        Family::V4 => create_elevated_iptables_command(args),
        Family::V6 => create_elevated_ip6tables_command(args),
    }
    .map_err(elevation_failure)?;

    debug!("Running {} {}", family.program(), args.join(" "));
    run_captured(&mut cmd, family.program()).await
}

/// Runs a command to completion and returns its stdout.
///
/// The child is killed if the future is dropped early.
async fn run_captured(cmd: &mut Command, program: &str) -> Result<String, GatewayError> {
    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                GatewayError::PermissionDenied(format!("cannot execute {program}: {e}"))
            }
            _ => GatewayError::command_failed(format!("failed to spawn {program}: {e}")),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GatewayError::from_failure(&stderr, output.status.code()));
    }

    String::from_utf8(output.stdout)
        .map_err(|e| GatewayError::Unparseable(format!("{program} printed non-UTF-8 output: {e}")))
}

/// [`FilterGateway`] backed by `iptables` and `ip6tables`
#[derive(Debug, Clone)]
pub struct IptablesGateway {
    /// List and manage `ip6tables` alongside `iptables`
    pub include_ipv6: bool,
}

impl Default for IptablesGateway {
    fn default() -> Self {
        Self { include_ipv6: true }
    }
}

impl IptablesGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FilterGateway for IptablesGateway {
    async fn apply_add(&mut self, rule: &Rule) -> Result<(), GatewayError> {
        let family = Family::of(rule.address);
        let spec = rule_spec_args(rule)?;

        let mut args = vec!["-A", rule.chain.as_str()];
        args.extend(spec.iter().map(String::as_str));

        run_filter_command(family, &args).await?;
        info!("Appended rule via {}: {rule}", family.program());
        Ok(())
    }

    async fn apply_remove(&mut self, key: &RuleKey) -> Result<(), GatewayError> {
        let family = Family::of(key.address);
        let chain = key.chain.as_str();

        // Deleting by position avoids having to know the live rule's action
        let listing = run_filter_command(family, &["-S", chain]).await?;
        let position = find_rule_position(&listing, key)
            .map_err(|e| GatewayError::Unparseable(e.to_string()))?
            .ok_or_else(|| {
                GatewayError::command_failed(format!(
                    "Bad rule (does a matching rule exist in that chain?): {key}"
                ))
            })?;

        let position = position.to_string();
        run_filter_command(family, &["-D", chain, position.as_str()]).await?;
        info!("Deleted rule #{position} from {chain} via {}: {key}", family.program());
        Ok(())
    }

    async fn list_all(&mut self) -> Result<String, GatewayError> {
        let mut listing = run_filter_command(Family::V4, &["-S"]).await?;

        if self.include_ipv6 {
            match run_filter_command(Family::V6, &["-S"]).await {
                Ok(v6) => {
                    if !listing.is_empty() && !listing.ends_with('\n') {
                        listing.push('\n');
                    }
                    listing.push_str(&v6);
                }
                Err(e @ GatewayError::PermissionDenied(_)) => return Err(e),
                Err(e) => warn!("Skipping ip6tables listing: {e}"),
            }
        }

        Ok(listing)
    }
}

/// Which tool produces the connection listing
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ConnectionTool {
    /// `ss`, falling back to `netstat`
    #[default]
    Auto,
    Ss,
    Netstat,
}

/// [`ConnectionSource`] reading the live socket table
#[derive(Debug, Clone, Default)]
pub struct SystemConnections {
    pub tool: ConnectionTool,
}

impl SystemConnections {
    pub fn new(tool: ConnectionTool) -> Self {
        Self { tool }
    }
}

async fn run_listing_tool(program: &str) -> Result<String, GatewayError> {
    let mut cmd = Command::new(program);
    cmd.arg("-tuan");
    run_captured(&mut cmd, program).await
}

impl ConnectionSource for SystemConnections {
    async fn list_connections(&mut self) -> Result<String, GatewayError> {
        match self.tool {
            ConnectionTool::Ss => run_listing_tool("ss").await,
            ConnectionTool::Netstat => run_listing_tool("netstat").await,
            ConnectionTool::Auto => match run_listing_tool("ss").await {
                Ok(listing) => Ok(listing),
                Err(e) => {
                    debug!("ss unavailable ({e}), falling back to netstat");
                    run_listing_tool("netstat").await
                }
            },
        }
    }
}
