/// Audit logging for privileged and state-changing operations
///
/// Every CLI operation leaves one JSON line in `<state_dir>/audit.log`,
/// tagged with the invocation's session id so entries from one run can be
/// grouped. The log is an explicit collaborator: callers construct an
/// [`AuditLog`] and hand it to whoever needs it.
use crate::core::error::Error;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AddRule,
    DeleteRule,
    ListRules,
    AnalyzeTraffic,
    SaveSnapshot,
    RestoreSnapshot,
    SyncRules,
    PermissionCheck,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Invocation the event belongs to
    pub session: Uuid,

    pub event_type: EventType,

    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Stable tag from [`Error::kind`]
    pub error_kind: Option<String>,

    pub error: Option<String>,
}

/// Audit log writer
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: Option<PathBuf>,
    session: Uuid,
}

impl AuditLog {
    /// An audit log that records nothing (`audit_enabled = false`).
    pub fn disabled() -> Self {
        Self {
            path: None,
            session: Uuid::new_v4(),
        }
    }

    /// An audit log appending to `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            session: Uuid::new_v4(),
        }
    }

    /// The default log at `<state_dir>/audit.log`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the state directory cannot be determined
    pub fn from_state_dir() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self::at(log_path))
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Records the outcome of an operation.
    ///
    /// Write failures are reported through `tracing` and never fail the
    /// operation being audited.
    pub async fn record(
        &self,
        event_type: EventType,
        details: serde_json::Value,
        error: Option<&Error>,
    ) {
        if self.path.is_none() {
            return;
        }

        let event = AuditEvent {
            timestamp: chrono::Utc::now(),
            session: self.session,
            event_type,
            success: error.is_none(),
            details,
            error_kind: error.map(|e| e.kind().to_string()),
            error: error.map(ToString::to_string),
        };

        if let Err(e) = self.append(&event).await {
            tracing::warn!("Failed to write audit log: {}", e);
        }
    }

    /// Appends an event as one JSON line
    async fn append(&self, event: &AuditEvent) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string(event)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(path).await?;
        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events, newest first
    ///
    /// Lines that fail to parse are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        let content = tokio::fs::read_to_string(path).await?;

        Ok(content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(count)
            .collect())
    }
}
