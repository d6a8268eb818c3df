//! In-memory rule store
//!
//! Holds the ordered rule set the tool believes is live. The store is only
//! trusted between calls to [`RuleStore::sync_from`]; the packet filter's own
//! listing is the source of truth and overwrites it wholesale.

use crate::core::error::StoreError;
use crate::core::listing::parse_rule_listing;
use crate::core::rule::{Chain, Rule, RuleKey};
use tracing::{debug, warn};

/// Outcome of [`RuleStore::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    /// A rule with the same identity exists; the store is unchanged
    AlreadyPresent,
}

/// Outcome of [`RuleStore::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// Summary of a successful sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Managed rules now held by the store
    pub rules: usize,
    /// Live rules that were skipped because the model cannot represent them
    pub foreign: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    rules: Vec<Rule>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `rule` unless a rule with the same identity exists.
    pub fn add(&mut self, rule: Rule) -> AddOutcome {
        let key = rule.key();
        if self.contains(&key) {
            debug!("Rule already present: {key}");
            return AddOutcome::AlreadyPresent;
        }
        self.rules.push(rule);
        AddOutcome::Inserted
    }

    /// Removes the first rule matching `key`.
    pub fn remove(&mut self, key: &RuleKey) -> RemoveOutcome {
        match self.rules.iter().position(|r| key.matches(r)) {
            Some(idx) => {
                self.rules.remove(idx);
                RemoveOutcome::Removed
            }
            None => RemoveOutcome::NotFound,
        }
    }

    /// Copy of the held rules in order, optionally restricted to one chain.
    pub fn list(&self, chain: Option<Chain>) -> Vec<Rule> {
        self.rules
            .iter()
            .filter(|r| chain.is_none_or(|c| r.chain == c))
            .cloned()
            .collect()
    }

    pub fn contains(&self, key: &RuleKey) -> bool {
        self.rules.iter().any(|r| key.matches(r))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Replaces the contents verbatim, duplicates included.
    pub fn replace_all(&mut self, rules: Vec<Rule>) {
        self.rules = rules;
    }

    /// Replaces the contents with the rules parsed from a gateway listing.
    ///
    /// Order is preserved exactly, including duplicates the filter holds
    /// (first-match semantics depend on it). If the listing cannot be parsed
    /// the store keeps its previous contents.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sync`] if any listing line is structurally broken.
    pub fn sync_from(&mut self, raw: &str) -> Result<SyncReport, StoreError> {
        let parsed = match parse_rule_listing(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Sync rejected, keeping {} known rules: {e}", self.rules.len());
                return Err(e);
            }
        };

        let report = SyncReport {
            rules: parsed.rules.len(),
            foreign: parsed.foreign,
        };
        if report.foreign > 0 {
            debug!("Skipped {} foreign rules during sync", report.foreign);
        }

        self.rules = parsed.rules;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rule::{Action, Protocol};
    use crate::core::test_helpers::{create_test_rule, input_http_key};

    #[test]
    fn test_add_is_idempotent() {
        let mut store = RuleStore::new();
        let rule = create_test_rule("192.168.1.100", 80);

        assert_eq!(store.add(rule.clone()), AddOutcome::Inserted);
        assert_eq!(store.add(rule), AddOutcome::AlreadyPresent);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_action_does_not_change_identity() {
        let mut store = RuleStore::new();
        let accept = create_test_rule("192.168.1.100", 80);
        let drop = Rule {
            action: Action::Drop,
            ..accept.clone()
        };

        store.add(accept);
        assert_eq!(store.add(drop), AddOutcome::AlreadyPresent);
        assert_eq!(store.list(None)[0].action, Action::Accept);
    }

    #[test]
    fn test_add_then_remove_leaves_store_empty() {
        let mut store = RuleStore::new();
        store.add(create_test_rule("192.168.1.100", 80));

        let key = input_http_key();
        assert_eq!(store.remove(&key), RemoveOutcome::Removed);
        assert!(store.is_empty());
        assert_eq!(store.remove(&key), RemoveOutcome::NotFound);
    }

    #[test]
    fn test_remove_only_first_duplicate() {
        let mut store = RuleStore::new();
        let rule = create_test_rule("192.168.1.100", 80);
        store.replace_all(vec![rule.clone(), rule]);

        assert_eq!(store.remove(&input_http_key()), RemoveOutcome::Removed);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_list_filters_by_chain() {
        let mut store = RuleStore::new();
        store.add(create_test_rule("10.0.0.1", 22));
        store.add(Rule {
            chain: Chain::Output,
            ..create_test_rule("10.0.0.2", 443)
        });

        assert_eq!(store.list(None).len(), 2);
        let output = store.list(Some(Chain::Output));
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].port, 443);
        assert!(store.list(Some(Chain::Forward)).is_empty());
    }

    #[test]
    fn test_sync_replaces_contents_in_gateway_order() {
        let mut store = RuleStore::new();
        store.add(create_test_rule("10.9.9.9", 1));

        let report = store
            .sync_from(
                "-P INPUT ACCEPT\n\
                 -A INPUT -s 10.0.0.2/32 -p udp -m udp --dport 53 -j ACCEPT\n\
                 -A INPUT -s 10.0.0.1/32 -p tcp -m tcp --dport 22 -j DROP\n\
                 -A INPUT -i lo -j ACCEPT\n",
            )
            .unwrap();

        assert_eq!(report, SyncReport { rules: 2, foreign: 1 });
        let rules = store.list(None);
        assert_eq!(rules[0].protocol, Protocol::Udp);
        assert_eq!(rules[1].action, Action::Drop);
    }

    #[test]
    fn test_failed_sync_keeps_prior_state() {
        let mut store = RuleStore::new();
        store.add(create_test_rule("192.168.1.100", 80));

        let err = store
            .sync_from("-A INPUT -s 10.0.0.1/32 -p tcp -m tcp --dport\n")
            .unwrap_err();
        assert!(matches!(err, StoreError::Sync { line: 1, .. }));
        assert_eq!(store.len(), 1);
        assert!(store.contains(&input_http_key()));
    }

    #[test]
    fn test_sync_keeps_gateway_duplicates() {
        let mut store = RuleStore::new();
        let line = "-A INPUT -s 192.168.1.100/32 -p tcp -m tcp --dport 80 -j ACCEPT\n";
        store.sync_from(&format!("{line}{line}")).unwrap();
        assert_eq!(store.len(), 2);
    }
}
