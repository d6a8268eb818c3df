//! fwadm - firewall rules management from the command line
//!
//! # Usage
//!
//! ```bash
//! fwadm --list                               # Managed rules (add --raw for the full listing)
//! fwadm --add INPUT 192.168.1.100 22         # Allow SSH from one host
//! fwadm --add INPUT 10.0.0.5 53 --protocol udp --action DROP
//! fwadm --delete INPUT 192.168.1.100 22
//! fwadm --analyze --json                     # Summarize active connections
//! fwadm --save --file rules.json             # Snapshot the managed rules
//! fwadm --restore --file rules.json          # Re-apply a snapshot
//! ```
//!
//! Flags can be combined; they run in the order list, add, delete, analyze,
//! save, restore. Every operation is recorded in the audit log.

use chrono::Utc;
use clap::{CommandFactory, Parser};
use fwadm::audit::{AuditLog, EventType};
use fwadm::config::{AppConfig, config_path, load_config, save_config_to};
use fwadm::core::error::{Error, GatewayError, IptablesErrorPattern, Result, StoreError};
use fwadm::core::gateway::{ConnectionSource, IptablesGateway, SystemConnections};
use fwadm::core::manager::{Manager, RestoreReport};
use fwadm::core::rule::{Chain, Rule, RuleKey};
use fwadm::core::snapshot::{load_snapshot_file, save_snapshot_file};
use fwadm::core::store::{AddOutcome, RemoveOutcome, SyncReport};
use fwadm::core::traffic::{TrafficSummary, classify};
use fwadm::elevation::check_elevation_available;
use fwadm::validators::{
    check_reserved_ip, check_well_known_port, validate, validate_chain, validate_with_action,
};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "fwadm", version)]
#[command(about = "Firewall rules management: validated iptables rules, traffic analysis, snapshots", long_about = None)]
struct Cli {
    /// List the rules currently in the packet filter
    #[arg(long)]
    list: bool,

    /// Add a rule allowing ADDRESS to reach PORT (0 = any port)
    #[arg(long, num_args = 3, value_names = ["CHAIN", "ADDRESS", "PORT"])]
    add: Option<Vec<String>>,

    /// Delete the rule matching CHAIN, ADDRESS, PORT and --protocol
    #[arg(long, num_args = 3, value_names = ["CHAIN", "ADDRESS", "PORT"])]
    delete: Option<Vec<String>>,

    /// Summarize active connections and listening ports
    #[arg(long)]
    analyze: bool,

    /// Save the managed rules to a snapshot file
    #[arg(long)]
    save: bool,

    /// Re-apply the rules from a snapshot file
    #[arg(long)]
    restore: bool,

    /// Protocol for --add/--delete: tcp, udp or any
    #[arg(long, default_value = "tcp")]
    protocol: String,

    /// Action for --add: ACCEPT or DROP
    #[arg(long, default_value = "ACCEPT")]
    action: String,

    /// Only list rules on this chain
    #[arg(long, value_name = "CHAIN")]
    chain: Option<String>,

    /// Snapshot file for --save/--restore (default from config)
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Print --list/--analyze output as JSON
    #[arg(long)]
    json: bool,

    /// Print the packet filter's listing verbatim for --list
    #[arg(long)]
    raw: bool,

    /// Write the current configuration (defaults if none) to the config file
    #[arg(long)]
    init_config: bool,

    /// Debug-level diagnostic logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn has_operation(&self) -> bool {
        self.list
            || self.add.is_some()
            || self.delete.is_some()
            || self.analyze
            || self.save
            || self.restore
            || self.init_config
    }

    fn needs_gateway(&self) -> bool {
        self.list || self.add.is_some() || self.delete.is_some() || self.save || self.restore
    }

    fn snapshot_path(&self, config: &AppConfig) -> PathBuf {
        self.file
            .clone()
            .unwrap_or_else(|| config.snapshot_path.clone())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if !cli.has_operation() {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    }

    if !cfg!(target_os = "linux") {
        eprintln!("Error: fwadm manages iptables and only runs on Linux");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        let dirs_ready = fwadm::utils::ensure_dirs();
        let config = load_config().await;
        init_logging(&config, cli.verbose);
        if let Err(e) = dirs_ready {
            warn!("Could not create data/state directories: {e}");
        }

        match run(&cli, &config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                report_error(&e);
                ExitCode::FAILURE
            }
        }
    })
}

/// Diagnostic log to `<state_dir>/fwadm.log`, stderr if that is not writable
fn init_logging(config: &AppConfig, verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config
            .log_level
            .parse::<tracing::Level>()
            .unwrap_or(tracing::Level::INFO)
    };

    let log_file = fwadm::utils::get_state_dir().and_then(|dir| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("fwadm.log"))
            .ok()
    });

    match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(file)
            .init(),
        None => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn report_error(error: &Error) {
    eprintln!("Error: {error}");

    let detail = match error {
        Error::Gateway(GatewayError::PermissionDenied(msg)) => Some(msg.clone()),
        Error::Gateway(GatewayError::CommandFailed {
            message, stderr, ..
        }) => Some(stderr.clone().unwrap_or_else(|| message.clone())),
        _ => None,
    };

    if let Some(detail) = detail {
        let translation = IptablesErrorPattern::match_error(&detail);
        eprintln!("{}", translation.user_message);
        for suggestion in translation.suggestions {
            eprintln!("  - {suggestion}");
        }
    }
}

/// Records a failed step in the audit log and passes the result through.
async fn audited<T>(audit: &AuditLog, event: EventType, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        audit.record(event, json!({}), Some(e)).await;
    }
    result
}

fn rule_from_args(args: &[String], protocol: &str, action: &str) -> Result<Rule> {
    match args {
        [chain, address, port] => Ok(validate_with_action(
            chain,
            address,
            port,
            Some(protocol),
            Some(action),
        )?),
        _ => Err(Error::Config(format!(
            "expected CHAIN ADDRESS PORT, got {} values",
            args.len()
        ))),
    }
}

/// Rule identity for `--delete`; `--action` is not part of it and is ignored.
fn key_from_args(args: &[String], protocol: &str) -> Result<RuleKey> {
    match args {
        [chain, address, port] => Ok(validate(chain, address, port, Some(protocol))?.key()),
        _ => Err(Error::Config(format!(
            "expected CHAIN ADDRESS PORT, got {} values",
            args.len()
        ))),
    }
}

async fn run(cli: &Cli, config: &AppConfig) -> Result<()> {
    let audit = if config.audit_enabled {
        AuditLog::from_state_dir().unwrap_or_else(|e| {
            warn!("Audit log disabled: {e}");
            AuditLog::disabled()
        })
    } else {
        AuditLog::disabled()
    };
    info!("fwadm session {}", audit.session());

    if cli.init_config {
        let path = config_path()
            .ok_or_else(|| Error::Config("no data directory for the config file".to_string()))?;
        save_config_to(&path, config)
            .await
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        println!("Wrote configuration to {}", path.display());
    }

    // Validate every user-supplied field before anything privileged runs
    let chain_filter: Option<Chain> = match cli.chain.as_deref() {
        Some(chain) => {
            let chain = validate_chain(chain).map_err(Error::from);
            Some(audited(&audit, EventType::ListRules, chain).await?)
        }
        None => None,
    };
    let add_rule = match cli.add.as_deref() {
        Some(args) => Some(
            audited(&audit, EventType::AddRule, rule_from_args(args, &cli.protocol, &cli.action))
                .await?,
        ),
        None => None,
    };
    let delete_key = match cli.delete.as_deref() {
        Some(args) => Some(
            audited(&audit, EventType::DeleteRule, key_from_args(args, &cli.protocol)).await?,
        ),
        None => None,
    };

    let mut manager = Manager::new(IptablesGateway::new(), audit.clone());
    let mut sync = SyncReport::default();

    if cli.needs_gateway() {
        let method = check_elevation_available()
            .map_err(|e| Error::from(GatewayError::PermissionDenied(e.to_string())));
        let method = audited(&audit, EventType::PermissionCheck, method).await?;
        info!("Filter commands will run via {method}");

        sync = manager.refresh().await?;
    }

    if cli.list {
        if cli.raw {
            print!("{}", manager.last_listing());
        } else {
            let rules = manager.list(chain_filter);
            print_rules(&rules, sync, cli.json)?;
        }
        audit
            .record(
                EventType::ListRules,
                json!({ "rules": sync.rules, "foreign": sync.foreign, "raw": cli.raw }),
                None,
            )
            .await;
    }

    if let Some(rule) = add_rule {
        for advisory in [check_well_known_port(rule.port), check_reserved_ip(rule.address)]
            .into_iter()
            .flatten()
        {
            println!("Note: {advisory}");
        }

        match manager.add_rule(rule.clone()).await? {
            AddOutcome::Inserted => println!("Added: {rule}"),
            AddOutcome::AlreadyPresent => println!("Already present: {rule}"),
        }
    }

    if let Some(key) = delete_key {
        match manager.delete_rule(&key).await? {
            RemoveOutcome::Removed => println!("Deleted: {key}"),
            RemoveOutcome::NotFound => return Err(StoreError::NotFound(key).into()),
        }
    }

    if cli.analyze {
        let mut source = SystemConnections::new(config.connection_tool);
        let raw = source.list_connections().await.map_err(Error::from);
        let raw = audited(&audit, EventType::AnalyzeTraffic, raw).await?;

        let summary = classify(&raw, Utc::now());
        print_summary(&summary, cli.json)?;
        audit
            .record(
                EventType::AnalyzeTraffic,
                json!({
                    "total_connections": summary.total_connections,
                    "listening_ports": summary.listening_ports,
                    "skipped_lines": summary.skipped_lines,
                }),
                None,
            )
            .await;
    }

    if cli.save {
        let path = cli.snapshot_path(config);
        let document =
            audited(&audit, EventType::SaveSnapshot, manager.snapshot(Utc::now())).await?;
        audited(
            &audit,
            EventType::SaveSnapshot,
            save_snapshot_file(&path, &document),
        )
        .await?;
        audit
            .record(
                EventType::SaveSnapshot,
                json!({ "path": path.display().to_string(), "rules": document.rules.len() }),
                None,
            )
            .await;
        println!("Saved {} rules to {}", document.rules.len(), path.display());
    }

    if cli.restore {
        let path = cli.snapshot_path(config);
        let snapshot = audited(&audit, EventType::RestoreSnapshot, load_snapshot_file(&path)).await?;
        println!(
            "Restoring {} rules saved at {}",
            snapshot.rules.len(),
            snapshot.saved_at.to_rfc3339()
        );

        let report = manager.restore(&snapshot.rules).await?;
        print_restore_report(&report);
        if !report.is_complete() {
            return Err(Error::PartialRestore {
                failed: report.failed.len(),
                total: report.total(),
            });
        }
    }

    Ok(())
}

fn print_rules(rules: &[Rule], sync: SyncReport, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(rules)?);
        return Ok(());
    }

    if rules.is_empty() {
        println!("No managed rules.");
    } else {
        println!(
            "{:>3}  {:<8} {:<39} {:>5}  {:<5} {}",
            "#", "CHAIN", "SOURCE", "PORT", "PROTO", "ACTION"
        );
        for (i, rule) in rules.iter().enumerate() {
            let port = if rule.port == 0 {
                "*".to_string()
            } else {
                rule.port.to_string()
            };
            println!(
                "{:>3}  {:<8} {:<39} {:>5}  {:<5} {}",
                i + 1,
                rule.chain.as_str(),
                rule.address,
                port,
                rule.protocol.as_str(),
                rule.action.as_str()
            );
        }
    }

    if sync.foreign > 0 {
        println!(
            "({} other rules are not managed by fwadm; use --raw to see them)",
            sync.foreign
        );
    }
    Ok(())
}

fn print_summary(summary: &TrafficSummary, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("Network traffic summary ({})", summary.generated_at.to_rfc3339());
    println!("  Total connections: {}", summary.total_connections);
    for (protocol, count) in &summary.by_protocol {
        println!("  {:<12} {count}", protocol.as_ref());
    }
    for (state, count) in &summary.by_state {
        println!("  {:<12} {count}", state.as_ref());
    }
    let ports: Vec<String> = summary
        .listening_ports
        .iter()
        .map(ToString::to_string)
        .collect();
    println!(
        "  Listening ports: {}",
        if ports.is_empty() {
            "none".to_string()
        } else {
            ports.join(", ")
        }
    );
    if summary.skipped_lines > 0 {
        println!("  ({} unrecognized lines skipped)", summary.skipped_lines);
    }
    Ok(())
}

fn print_restore_report(report: &RestoreReport) {
    println!(
        "Applied {}, already present {}, failed {}",
        report.applied.len(),
        report.already_present.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        println!("  FAILED {}: {}", failure.rule, failure.error);
    }
}
