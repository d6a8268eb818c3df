//! Cross-module tests for the core: validator → manager → snapshot → restore

use crate::audit::AuditLog;
use crate::core::error::{GatewayError, ValidationError};
use crate::core::manager::Manager;
use crate::core::rule::{Action, Chain, Protocol};
use crate::core::snapshot::{decode, encode};
use crate::core::store::{AddOutcome, RemoveOutcome};
use crate::core::test_helpers::{FakeGateway, GatewayCall, fixed_time};
use crate::validators::{validate, validate_with_action};

#[tokio::test]
async fn test_invalid_address_never_reaches_gateway() {
    let mut mgr = Manager::new(FakeGateway::default(), AuditLog::disabled());

    for address in ["999.1.1.1", "abc.def.ghi.jkl"] {
        let err = validate("INPUT", address, "80", Some("tcp")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAddress(_)));
    }

    // Only a validated rule can be handed to the manager
    let rule = validate("input", "192.168.1.100", "80", Some("tcp")).unwrap();
    mgr.add_rule(rule).await.unwrap();
    assert_eq!(mgr.gateway().calls.len(), 2);
    assert!(matches!(mgr.gateway().calls[0], GatewayCall::Add(_)));
}

#[tokio::test]
async fn test_add_remove_example() {
    let mut mgr = Manager::new(FakeGateway::default(), AuditLog::disabled());
    let rule = validate("INPUT", "192.168.1.100", "80", Some("tcp")).unwrap();
    let key = rule.key();

    assert_eq!(mgr.add_rule(rule.clone()).await.unwrap(), AddOutcome::Inserted);
    assert_eq!(mgr.add_rule(rule).await.unwrap(), AddOutcome::AlreadyPresent);
    assert_eq!(mgr.list(None).len(), 1);

    assert_eq!(mgr.delete_rule(&key).await.unwrap(), RemoveOutcome::Removed);
    assert!(mgr.list(None).is_empty());
    assert_eq!(mgr.delete_rule(&key).await.unwrap(), RemoveOutcome::NotFound);
}

#[tokio::test]
async fn test_save_then_restore_into_empty_filter() {
    let mut source = Manager::new(FakeGateway::default(), AuditLog::disabled());
    for (chain, address, port, protocol, action) in [
        ("INPUT", "10.0.0.1", "22", "tcp", "ACCEPT"),
        ("OUTPUT", "10.0.0.2", "53", "udp", "DROP"),
        ("FORWARD", "2001:db8::5", "0", "any", "DROP"),
    ] {
        let rule =
            validate_with_action(chain, address, port, Some(protocol), Some(action)).unwrap();
        source.add_rule(rule).await.unwrap();
    }

    let text = source.snapshot(fixed_time()).unwrap().to_json().unwrap();
    let rules = decode(&text).unwrap();
    assert_eq!(rules, source.list(None));

    let mut target = Manager::new(FakeGateway::default(), AuditLog::disabled());
    let report = target.restore(&rules).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(target.list(None), source.list(None));
}

#[tokio::test]
async fn test_restore_reports_inexpressible_rule() {
    // Port match without a protocol passes validation but not the gateway
    let rules = vec![
        validate("INPUT", "10.0.0.1", "22", Some("tcp")).unwrap(),
        validate("INPUT", "10.0.0.2", "80", None).unwrap(),
    ];
    assert_eq!(rules[1].protocol, Protocol::Any);

    let text = encode(&rules, fixed_time()).unwrap().to_json().unwrap();
    let mut mgr = Manager::new(FakeGateway::default(), AuditLog::disabled());
    let report = mgr.restore(&decode(&text).unwrap()).await.unwrap();

    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].rule, rules[1]);
    assert!(matches!(
        report.failed[0].error,
        GatewayError::CommandFailed { .. }
    ));
    assert_eq!(mgr.list(Some(Chain::Input)).len(), 1);
}

#[tokio::test]
async fn test_external_rules_survive_restore() {
    let mut gateway = FakeGateway::default();
    let external = validate_with_action("INPUT", "172.16.0.1", "443", Some("tcp"), Some("DROP"))
        .unwrap();
    gateway.rules.push(external.clone());

    let mut mgr = Manager::new(gateway, AuditLog::disabled());
    mgr.refresh().await.unwrap();
    mgr.restore(&[validate("INPUT", "10.0.0.1", "22", Some("tcp")).unwrap()])
        .await
        .unwrap();

    let live = mgr.list(None);
    assert_eq!(live.len(), 2);
    assert_eq!(live[0], external);
    assert_eq!(live[0].action, Action::Drop);
}
