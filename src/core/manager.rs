//! Orchestration of store, gateway and audit log
//!
//! Every mutation follows the same shape: update the store optimistically,
//! push the change through the [`FilterGateway`], then re-list the filter
//! and let [`RuleStore::sync_from`] overwrite the store with what is really
//! live. The re-list happens even when the mutation failed, so the store
//! never keeps a rule the filter refused.

use crate::audit::{AuditLog, EventType};
use crate::core::error::{Error, GatewayError, Result};
use crate::core::gateway::FilterGateway;
use crate::core::rule::{Chain, Rule, RuleKey};
use crate::core::snapshot::{SnapshotDocument, encode};
use crate::core::store::{AddOutcome, RemoveOutcome, RuleStore, SyncReport};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info, warn};

/// A snapshot rule the gateway refused during restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    pub rule: Rule,
    pub error: GatewayError,
}

/// Per-rule outcome of a restore
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub applied: Vec<Rule>,
    pub already_present: Vec<Rule>,
    pub failed: Vec<RestoreFailure>,
}

impl RestoreReport {
    pub fn total(&self) -> usize {
        self.applied.len() + self.already_present.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Manager<G: FilterGateway> {
    gateway: G,
    store: RuleStore,
    audit: AuditLog,
    last_listing: String,
}

impl<G: FilterGateway> Manager<G> {
    pub fn new(gateway: G, audit: AuditLog) -> Self {
        Self {
            gateway,
            store: RuleStore::new(),
            audit,
            last_listing: String::new(),
        }
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The gateway listing from the most recent successful refresh
    pub fn last_listing(&self) -> &str {
        &self.last_listing
    }

    /// Re-reads the live filter into the store.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if listing fails, or a sync error if the
    /// listing cannot be parsed. The store is unchanged in both cases.
    pub async fn refresh(&mut self) -> Result<SyncReport> {
        let result = self.sync_once().await;
        if let Err(e) = &result {
            self.audit
                .record(EventType::SyncRules, json!({}), Some(e))
                .await;
        }
        result
    }

    async fn sync_once(&mut self) -> Result<SyncReport> {
        let listing = self.gateway.list_all().await?;
        let report = self.store.sync_from(&listing)?;
        self.last_listing = listing;
        Ok(report)
    }

    /// Post-mutation sync; failures are logged, never returned, so the
    /// mutation's own outcome is what the caller sees.
    async fn resync_after(&mut self, operation: &str) {
        if let Err(e) = self.refresh().await {
            warn!("Could not re-read filter after {operation}: {e}");
        }
    }

    /// Rules currently believed live, optionally restricted to one chain.
    pub fn list(&self, chain: Option<Chain>) -> Vec<Rule> {
        self.store.list(chain)
    }

    /// Adds `rule` to the store and the live filter.
    ///
    /// An identical rule already in the store is not sent to the gateway.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the filter refused the rule.
    pub async fn add_rule(&mut self, rule: Rule) -> Result<AddOutcome> {
        let details = json!({ "rule": rule.to_string() });

        if self.store.add(rule.clone()) == AddOutcome::AlreadyPresent {
            info!("Rule already present, not re-applied: {rule}");
            self.audit
                .record(
                    EventType::AddRule,
                    json!({ "rule": rule.to_string(), "already_present": true }),
                    None,
                )
                .await;
            return Ok(AddOutcome::AlreadyPresent);
        }

        let applied = self.gateway.apply_add(&rule).await.map_err(Error::from);
        if applied.is_err() {
            self.store.remove(&rule.key());
        }
        self.resync_after("add").await;

        self.audit
            .record(EventType::AddRule, details, applied.as_ref().err())
            .await;
        applied?;

        info!("Added rule: {rule}");
        Ok(AddOutcome::Inserted)
    }

    /// Removes the first rule matching `key` from the store and the filter.
    ///
    /// # Errors
    ///
    /// Returns the gateway error if the filter refused the deletion.
    pub async fn delete_rule(&mut self, key: &RuleKey) -> Result<RemoveOutcome> {
        let details = json!({ "rule": key.to_string() });

        if self.store.remove(key) == RemoveOutcome::NotFound {
            self.audit
                .record(
                    EventType::DeleteRule,
                    details,
                    Some(&Error::from(crate::core::error::StoreError::NotFound(*key))),
                )
                .await;
            return Ok(RemoveOutcome::NotFound);
        }

        let removed = self.gateway.apply_remove(key).await.map_err(Error::from);
        self.resync_after("delete").await;

        self.audit
            .record(EventType::DeleteRule, details, removed.as_ref().err())
            .await;
        removed?;

        info!("Deleted rule: {key}");
        Ok(RemoveOutcome::Removed)
    }

    /// Captures the current store as a snapshot document.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::Malformed`](crate::core::error::SnapshotError::Malformed)
    /// when the store holds more rules than a snapshot may carry.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Result<SnapshotDocument> {
        Ok(encode(&self.store.list(None), now)?)
    }

    /// Re-applies every rule in `rules`, in order.
    ///
    /// Restore is additive: live rules absent from `rules` are left alone,
    /// and rules already live are skipped. A rule the filter rejects is
    /// recorded and the rest still run.
    ///
    /// # Errors
    ///
    /// Aborts with [`GatewayError::PermissionDenied`], after re-reading the
    /// filter, since no further rule can succeed.
    pub async fn restore(&mut self, rules: &[Rule]) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();

        for rule in rules {
            if self.store.add(rule.clone()) == AddOutcome::AlreadyPresent {
                report.already_present.push(rule.clone());
                continue;
            }

            match self.gateway.apply_add(rule).await {
                Ok(()) => report.applied.push(rule.clone()),
                Err(e @ GatewayError::PermissionDenied(_)) => {
                    error!("Restore aborted at {rule}: {e}");
                    self.store.remove(&rule.key());
                    let err = Error::from(e);
                    self.resync_after("aborted restore").await;
                    self.audit
                        .record(
                            EventType::RestoreSnapshot,
                            json!({
                                "total": rules.len(),
                                "applied": report.applied.len(),
                                "already_present": report.already_present.len(),
                            }),
                            Some(&err),
                        )
                        .await;
                    return Err(err);
                }
                Err(e) => {
                    warn!("Restore could not apply {rule}: {e}");
                    // The rule never reached the filter; keep the store honest until the re-sync
                    self.store.remove(&rule.key());
                    report.failed.push(RestoreFailure {
                        rule: rule.clone(),
                        error: e,
                    });
                }
            }
        }

        self.resync_after("restore").await;

        let partial = (!report.is_complete()).then(|| Error::PartialRestore {
            failed: report.failed.len(),
            total: rules.len(),
        });
        self.audit
            .record(
                EventType::RestoreSnapshot,
                json!({
                    "total": rules.len(),
                    "applied": report.applied.len(),
                    "already_present": report.already_present.len(),
                    "failed": report.failed.iter().map(|f| f.rule.to_string()).collect::<Vec<_>>(),
                }),
                partial.as_ref(),
            )
            .await;

        info!(
            "Restore finished: {} applied, {} already present, {} failed",
            report.applied.len(),
            report.already_present.len(),
            report.failed.len()
        );
        Ok(report)
    }
}
