//! Versioned JSON snapshots of the rule set
//!
//! A snapshot document looks like:
//!
//! ```json
//! {
//!   "version": 1,
//!   "savedAt": "2024-05-01T12:00:00Z",
//!   "rules": [
//!     { "chain": "INPUT", "address": "192.168.1.100", "port": 22, "protocol": "tcp", "action": "ACCEPT" }
//!   ]
//! }
//! ```
//!
//! Decoding never trusts the file: the version tag is checked first and every
//! rule goes back through the validator before it can reach the gateway.
//!
//! On disk the document is written atomically (temp file + rename, mode 0600)
//! next to a `<file>.sha256` checksum. A checksum mismatch is logged but not
//! fatal so hand-edited snapshots still restore.

use crate::core::error::{Result, SnapshotError};
use crate::core::rule::{MAX_RULES, Rule, RuleSet};
use crate::validators::validate_with_action;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Schema version written by [`encode`] and the only one [`decode`] accepts
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of a snapshot, fields in canonical order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDocument {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub rules: Vec<Rule>,
}

impl SnapshotDocument {
    /// Pretty-printed JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// A decoded, validated snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,
    pub rules: RuleSet,
}

/// Builds the snapshot document for `rules`.
///
/// # Errors
///
/// [`SnapshotError::Malformed`] above [`MAX_RULES`] rules, the limit [`decode`]
/// also enforces.
pub fn encode(
    rules: &[Rule],
    now: DateTime<Utc>,
) -> std::result::Result<SnapshotDocument, SnapshotError> {
    check_rule_count(rules.len())?;
    Ok(SnapshotDocument {
        version: SNAPSHOT_VERSION,
        saved_at: now,
        rules: rules.to_vec(),
    })
}

fn check_rule_count(count: usize) -> std::result::Result<(), SnapshotError> {
    if count > MAX_RULES {
        return Err(SnapshotError::Malformed(format!(
            "snapshot contains {count} rules (max: {MAX_RULES})"
        )));
    }
    Ok(())
}

/// Decodes snapshot text into a validated rule set.
///
/// # Errors
///
/// [`SnapshotError::SchemaMismatch`] for a missing or unknown version,
/// [`SnapshotError::Malformed`] for anything else that is wrong.
pub fn decode(text: &str) -> std::result::Result<RuleSet, SnapshotError> {
    decode_snapshot(text).map(|snapshot| snapshot.rules)
}

/// Like [`decode`] but keeps the snapshot timestamp.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_snapshot(text: &str) -> std::result::Result<Snapshot, SnapshotError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SnapshotError::Malformed(format!("invalid JSON: {e}")))?;
    decode_value(&value)
}

/// Decodes an already-parsed JSON document.
///
/// Unknown fields are ignored at every level.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_value(value: &Value) -> std::result::Result<Snapshot, SnapshotError> {
    let obj = value
        .as_object()
        .ok_or_else(|| SnapshotError::Malformed("snapshot must be a JSON object".to_string()))?;

    // Version is checked before anything else so drift is reported as drift
    match obj.get("version") {
        None => {
            return Err(SnapshotError::SchemaMismatch {
                found: "none".to_string(),
                expected: SNAPSHOT_VERSION,
            });
        }
        Some(v) if v.as_u64() == Some(u64::from(SNAPSHOT_VERSION)) => {}
        Some(v) => {
            return Err(SnapshotError::SchemaMismatch {
                found: v.to_string(),
                expected: SNAPSHOT_VERSION,
            });
        }
    }

    let saved_at = obj
        .get("savedAt")
        .and_then(Value::as_str)
        .ok_or_else(|| SnapshotError::Malformed("missing savedAt timestamp".to_string()))?;
    let saved_at = DateTime::parse_from_rfc3339(saved_at)
        .map_err(|e| SnapshotError::Malformed(format!("invalid savedAt '{saved_at}': {e}")))?
        .with_timezone(&Utc);

    let entries = obj
        .get("rules")
        .and_then(Value::as_array)
        .ok_or_else(|| SnapshotError::Malformed("missing rules array".to_string()))?;

    check_rule_count(entries.len())?;

    let rules = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| decode_rule(i, entry))
        .collect::<std::result::Result<RuleSet, _>>()?;

    Ok(Snapshot { saved_at, rules })
}

fn decode_rule(index: usize, entry: &Value) -> std::result::Result<Rule, SnapshotError> {
    let malformed = |reason: String| SnapshotError::Malformed(format!("rule {index}: {reason}"));

    let obj = entry
        .as_object()
        .ok_or_else(|| malformed("not an object".to_string()))?;

    let chain = string_field(obj, "chain").map_err(malformed)?;
    let address = string_field(obj, "address").map_err(malformed)?;
    let protocol = string_field(obj, "protocol").map_err(malformed)?;
    let action = string_field(obj, "action").map_err(malformed)?;
    let port = match obj.get("port") {
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => return Err(malformed(format!("port must be an integer, got {other}"))),
        None => return Err(malformed("missing field 'port'".to_string())),
    };

    // Same checks a rule typed on the command line goes through
    validate_with_action(chain, address, &port, Some(protocol), Some(action))
        .map_err(|e| malformed(e.to_string()))
}

fn string_field<'a>(obj: &'a Map<String, Value>, name: &str) -> std::result::Result<&'a str, String> {
    match obj.get(name) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(format!("field '{name}' must be a string, got {other}")),
        None => Err(format!("missing field '{name}'")),
    }
}

/// Computes the SHA-256 checksum of snapshot text as lowercase hex.
pub fn compute_checksum(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Path of the checksum sidecar for a snapshot file.
pub fn checksum_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

/// Compares `text` against the sidecar checksum, if one exists.
///
/// # Errors
///
/// Returns [`SnapshotError::ChecksumMismatch`] if the sidecar disagrees.
pub fn verify_checksum(path: &Path, text: &str) -> std::result::Result<(), SnapshotError> {
    let Ok(expected) = std::fs::read_to_string(checksum_path(path)) else {
        return Ok(());
    };

    let actual = compute_checksum(text);
    if expected.trim() != actual {
        return Err(SnapshotError::ChecksumMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(())
}

/// Writes a snapshot atomically and records its checksum.
///
/// # Errors
///
/// Returns an error if the directory, temp file, rename or sidecar write fails.
pub fn save_snapshot_file(path: &Path, document: &SnapshotDocument) -> Result<()> {
    use std::io::Write;
    use tempfile::NamedTempFile;

    check_rule_count(document.rules.len())?;
    let json = document.to_json()?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    // Temp file in the target directory so the rename stays on one filesystem
    let mut temp = NamedTempFile::new_in(parent)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    std::fs::write(checksum_path(path), compute_checksum(&json))?;

    info!(
        "Snapshot with {} rules saved to {}",
        document.rules.len(),
        path.display()
    );
    Ok(())
}

/// Reads and decodes a snapshot file.
///
/// # Errors
///
/// [`SnapshotError::NotFound`] if the file does not exist, otherwise any
/// I/O or decode error.
pub fn load_snapshot_file(path: &Path) -> Result<Snapshot> {
    if !path.exists() {
        return Err(SnapshotError::NotFound(path.display().to_string()).into());
    }

    let text = std::fs::read_to_string(path)?;

    if let Err(e) = verify_checksum(path, &text) {
        warn!("{} may have been edited by hand: {e}", path.display());
    }

    Ok(decode_snapshot(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rule::{Action, Chain, Protocol};
    use crate::core::test_helpers::{create_test_rule, fixed_time};
    use serde_json::json;

    fn sample_rules() -> RuleSet {
        vec![
            create_test_rule("192.168.1.100", 22),
            Rule::new(
                Chain::Output,
                "2001:db8::7".parse().unwrap(),
                0,
                Protocol::Any,
                Action::Drop,
            ),
        ]
    }

    #[test]
    fn test_round_trip_preserves_order_and_fields() {
        let rules = sample_rules();
        let text = encode(&rules, fixed_time()).unwrap().to_json().unwrap();
        assert_eq!(decode(&text).unwrap(), rules);

        let snapshot = decode_snapshot(&text).unwrap();
        assert_eq!(snapshot.saved_at, fixed_time());
    }

    #[test]
    fn test_canonical_field_order() {
        let text = encode(&sample_rules()[..1], fixed_time())
            .unwrap()
            .to_json()
            .unwrap();
        let keys = [
            "\"version\"",
            "\"savedAt\"",
            "\"rules\"",
            "\"chain\"",
            "\"address\"",
            "\"port\"",
            "\"protocol\"",
            "\"action\"",
        ];
        let positions: Vec<usize> = keys
            .iter()
            .map(|k| text.find(k).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_missing_version_is_schema_mismatch() {
        let err = decode(r#"{"savedAt": "2024-05-01T12:00:00Z", "rules": []}"#).unwrap_err();
        assert!(matches!(err, SnapshotError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_future_version_is_schema_mismatch() {
        let err = decode(r#"{"version": 2, "savedAt": "2024-05-01T12:00:00Z", "rules": []}"#)
            .unwrap_err();
        assert_eq!(
            err,
            SnapshotError::SchemaMismatch {
                found: "2".to_string(),
                expected: SNAPSHOT_VERSION
            }
        );

        let err = decode(r#"{"version": "1", "savedAt": "2024-05-01T12:00:00Z", "rules": []}"#)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_invalid_rule_is_malformed() {
        let doc = json!({
            "version": 1,
            "savedAt": "2024-05-01T12:00:00Z",
            "rules": [
                {"chain": "INPUT", "address": "10.0.0.1", "port": 22, "protocol": "tcp", "action": "ACCEPT"},
                {"chain": "INPUT", "address": "999.1.1.1", "port": 22, "protocol": "tcp", "action": "ACCEPT"}
            ]
        });
        match decode_value(&doc).unwrap_err() {
            SnapshotError::Malformed(msg) => {
                assert!(msg.starts_with("rule 1:"));
                assert!(msg.contains("999.1.1.1"));
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_mistyped_and_missing_fields_are_malformed() {
        let base = |rule: Value| {
            json!({"version": 1, "savedAt": "2024-05-01T12:00:00Z", "rules": [rule]})
        };

        for rule in [
            json!({"chain": "INPUT", "address": "10.0.0.1", "port": "22", "protocol": "tcp", "action": "ACCEPT"}),
            json!({"chain": "INPUT", "address": "10.0.0.1", "port": 70000, "protocol": "tcp", "action": "ACCEPT"}),
            json!({"chain": "INPUT", "address": "10.0.0.1", "port": -1, "protocol": "tcp", "action": "ACCEPT"}),
            json!({"chain": "INPUT", "address": "10.0.0.1", "port": 22, "protocol": "tcp"}),
            json!({"chain": "PREROUTING", "address": "10.0.0.1", "port": 22, "protocol": "tcp", "action": "ACCEPT"}),
            json!("INPUT 10.0.0.1 22"),
        ] {
            let err = decode_value(&base(rule.clone())).unwrap_err();
            assert!(matches!(err, SnapshotError::Malformed(_)), "{rule} -> {err:?}");
        }

        assert!(matches!(
            decode(r#"{"version": 1, "rules": []}"#).unwrap_err(),
            SnapshotError::Malformed(_)
        ));
        assert!(matches!(
            decode("not json").unwrap_err(),
            SnapshotError::Malformed(_)
        ));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let doc = json!({
            "version": 1,
            "savedAt": "2024-05-01T14:00:00+02:00",
            "host": "gateway-1",
            "rules": [
                {"chain": "input", "address": "10.0.0.1", "port": 22, "protocol": "TCP", "action": "drop", "comment": "ssh"}
            ]
        });
        let snapshot = decode_value(&doc).unwrap();
        assert_eq!(snapshot.saved_at, fixed_time());
        assert_eq!(snapshot.rules[0].action, Action::Drop);
        assert_eq!(snapshot.rules[0].protocol, Protocol::Tcp);
    }

    #[test]
    fn test_rule_count_limit() {
        let rules: Vec<Value> = (0..=MAX_RULES)
            .map(|i| json!({"chain": "INPUT", "address": "10.0.0.1", "port": i % 65536, "protocol": "tcp", "action": "ACCEPT"}))
            .collect();
        let doc = json!({"version": 1, "savedAt": "2024-05-01T12:00:00Z", "rules": rules});
        assert!(matches!(
            decode_value(&doc).unwrap_err(),
            SnapshotError::Malformed(_)
        ));
    }

    fn oversized_rule_set() -> Vec<Rule> {
        (0..=MAX_RULES)
            .map(|i| create_test_rule(&format!("10.0.{}.{}", i / 256, i % 256), 22))
            .collect()
    }

    #[test]
    fn test_encode_refuses_more_than_max_rules() {
        let rules = oversized_rule_set();
        assert_eq!(rules.len(), MAX_RULES + 1);
        assert!(matches!(
            encode(&rules, fixed_time()).unwrap_err(),
            SnapshotError::Malformed(_)
        ));

        let at_limit = encode(&rules[..MAX_RULES], fixed_time()).unwrap();
        let text = at_limit.to_json().unwrap();
        assert_eq!(decode(&text).unwrap(), rules[..MAX_RULES]);
    }

    #[test]
    fn test_save_refuses_oversized_document_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let document = SnapshotDocument {
            version: SNAPSHOT_VERSION,
            saved_at: fixed_time(),
            rules: oversized_rule_set(),
        };

        let err = save_snapshot_file(&path, &document).unwrap_err();
        assert_eq!(err.kind(), "malformed");
        assert!(!path.exists());
        assert!(!checksum_path(&path).exists());
    }

    #[test]
    fn test_compute_checksum_deterministic() {
        let a = compute_checksum("{}");
        assert_eq!(a, compute_checksum("{}"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, compute_checksum("[]"));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snapshot.json");
        let rules = sample_rules();

        save_snapshot_file(&path, &encode(&rules, fixed_time()).unwrap()).unwrap();
        assert!(checksum_path(&path).exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let loaded = load_snapshot_file(&path).unwrap();
        assert_eq!(loaded.rules, rules);
        assert_eq!(loaded.saved_at, fixed_time());
    }

    #[test]
    fn test_edited_file_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        save_snapshot_file(&path, &encode(&sample_rules(), fixed_time()).unwrap()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let edited = text.replace("\"port\": 22", "\"port\": 2222");
        std::fs::write(&path, &edited).unwrap();

        assert!(matches!(
            verify_checksum(&path, &edited).unwrap_err(),
            SnapshotError::ChecksumMismatch { .. }
        ));
        assert_eq!(load_snapshot_file(&path).unwrap().rules[0].port, 2222);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_snapshot_file(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.kind(), "snapshot_not_found");
    }
}
