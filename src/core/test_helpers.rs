//! Shared test utilities for core module tests
//!
//! Provides an in-memory packet filter and rule builders so no test needs
//! root or a real `iptables`. This module is only compiled in test mode.

use crate::core::error::GatewayError;
use crate::core::gateway::{FilterGateway, format_listing_line};
use crate::core::rule::{Action, Chain, Protocol, Rule, RuleKey};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::remove_var("FWADM_TEST_NO_ELEVATION");
///     std::env::set_var("FWADM_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("FWADM_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// Gateway calls recorded by [`FakeGateway`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Add(Rule),
    Remove(RuleKey),
    List,
}

/// In-memory [`FilterGateway`]
///
/// `rules` is the "live" filter. Listings are rendered exactly as
/// `iptables -S` would print them.
#[derive(Debug, Default)]
pub struct FakeGateway {
    pub rules: Vec<Rule>,
    /// Keys whose `apply_add` fails with `CommandFailed`
    pub reject: Vec<RuleKey>,
    /// Every mutation fails with `PermissionDenied`
    pub deny_all: bool,
    /// `list_all` fails with `CommandFailed`
    pub fail_listing: bool,
    pub calls: Vec<GatewayCall>,
}

impl FakeGateway {
    pub fn rejecting(reject: Vec<RuleKey>) -> Self {
        Self {
            reject,
            ..Self::default()
        }
    }

    pub fn add_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, GatewayCall::Add(_)))
            .count()
    }

    pub fn list_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, GatewayCall::List))
            .count()
    }
}

impl FilterGateway for FakeGateway {
    async fn apply_add(&mut self, rule: &Rule) -> Result<(), GatewayError> {
        self.calls.push(GatewayCall::Add(rule.clone()));
        if self.deny_all {
            return Err(GatewayError::PermissionDenied(
                "Permission denied (you must be root)".to_string(),
            ));
        }
        if self.reject.contains(&rule.key()) {
            return Err(GatewayError::CommandFailed {
                message: format!("rejected {rule}"),
                stderr: Some("iptables: Invalid argument.".to_string()),
                exit_code: Some(1),
            });
        }
        // Same check the real gateway makes before spawning
        format_listing_line(rule)?;
        self.rules.push(rule.clone());
        Ok(())
    }

    async fn apply_remove(&mut self, key: &RuleKey) -> Result<(), GatewayError> {
        self.calls.push(GatewayCall::Remove(*key));
        if self.deny_all {
            return Err(GatewayError::PermissionDenied(
                "Permission denied (you must be root)".to_string(),
            ));
        }
        match self.rules.iter().position(|r| key.matches(r)) {
            Some(idx) => {
                self.rules.remove(idx);
                Ok(())
            }
            None => Err(GatewayError::command_failed(
                "iptables: Bad rule (does a matching rule exist in that chain?).",
            )),
        }
    }

    async fn list_all(&mut self) -> Result<String, GatewayError> {
        self.calls.push(GatewayCall::List);
        if self.fail_listing {
            return Err(GatewayError::command_failed("listing unavailable"));
        }

        let mut listing = String::from("-P INPUT ACCEPT\n-P FORWARD ACCEPT\n-P OUTPUT ACCEPT\n");
        for rule in &self.rules {
            listing.push_str(&format_listing_line(rule)?);
            listing.push('\n');
        }
        Ok(listing)
    }
}

/// An `INPUT ... tcp -> ACCEPT` rule for `address:port`.
pub fn create_test_rule(address: &str, port: u16) -> Rule {
    Rule::new(
        Chain::Input,
        address.parse().expect("test address must be valid"),
        port,
        Protocol::Tcp,
        Action::Accept,
    )
}

/// Key of `create_test_rule("192.168.1.100", 80)`
pub fn input_http_key() -> RuleKey {
    create_test_rule("192.168.1.100", 80).key()
}

/// 2024-05-01T12:00:00Z
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("valid fixed timestamp")
}
