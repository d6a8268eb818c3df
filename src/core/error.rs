use crate::core::rule::RuleKey;
use thiserror::Error;

/// Core error type for fwadm
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A proposed rule failed structural validation
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The rule store could not satisfy the request
    #[error("Rule store error: {0}")]
    Store(#[from] StoreError),

    /// Snapshot encode/decode or file operation failed
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// The packet filter rejected or could not run a command
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Restore finished but some rules were rejected by the packet filter
    #[error("Restore incomplete: {failed} of {total} rules failed to apply")]
    PartialRestore { failed: usize, total: usize },

    /// Configuration could not be read or written
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Stable snake_case tag recorded in the audit log.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Validation(e) => e.kind(),
            Error::Store(e) => e.kind(),
            Error::Snapshot(e) => e.kind(),
            Error::Gateway(e) => e.kind(),
            Error::PartialRestore { .. } => "partial_restore",
            Error::Config(_) => "config",
        }
    }

    /// Whether no further operation in this invocation can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Gateway(GatewayError::PermissionDenied(_)))
    }
}

/// Structural problems with a proposed rule
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid chain '{0}' (expected INPUT, OUTPUT or FORWARD)")]
    InvalidChain(String),

    #[error("invalid address '{0}' (expected an IPv4 dotted quad or IPv6 literal)")]
    InvalidAddress(String),

    #[error("invalid port '{0}' (expected an integer between 0 and 65535)")]
    InvalidPort(String),

    #[error("invalid protocol '{0}' (expected tcp, udp or any)")]
    InvalidProtocol(String),

    #[error("invalid action '{0}' (expected ACCEPT or DROP)")]
    InvalidAction(String),
}

impl ValidationError {
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::InvalidChain(_) => "invalid_chain",
            ValidationError::InvalidAddress(_) => "invalid_address",
            ValidationError::InvalidPort(_) => "invalid_port",
            ValidationError::InvalidProtocol(_) => "invalid_protocol",
            ValidationError::InvalidAction(_) => "invalid_action",
        }
    }
}

/// Rule store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no rule matches {0}")]
    NotFound(RuleKey),

    /// The gateway listing could not be parsed; the store kept its prior contents
    #[error("sync failed at listing line {line}: {reason}")]
    Sync { line: usize, reason: String },
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Sync { .. } => "sync_error",
        }
    }
}

/// Snapshot-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot schema mismatch: found version {found}, expected v{expected}")]
    SchemaMismatch { found: String, expected: u32 },

    #[error("snapshot malformed: {0}")]
    Malformed(String),

    #[error("snapshot checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("snapshot not found: {0}")]
    NotFound(String),
}

impl SnapshotError {
    pub fn kind(&self) -> &'static str {
        match self {
            SnapshotError::SchemaMismatch { .. } => "schema_mismatch",
            SnapshotError::Malformed(_) => "malformed",
            SnapshotError::ChecksumMismatch { .. } => "checksum_mismatch",
            SnapshotError::NotFound(_) => "snapshot_not_found",
        }
    }
}

/// Failures reported by the packet filter boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Insufficient privilege for the packet filter. Fatal for the invocation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("filter command failed: {message}")]
    CommandFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("unparseable gateway output: {0}")]
    Unparseable(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::PermissionDenied(_) => "permission_denied",
            GatewayError::CommandFailed { .. } => "command_failed",
            GatewayError::Unparseable(_) => "unparseable",
        }
    }

    /// Shorthand for a failure that never reached the packet filter.
    pub fn command_failed(message: impl Into<String>) -> Self {
        GatewayError::CommandFailed {
            message: message.into(),
            stderr: None,
            exit_code: None,
        }
    }

    /// Classifies a non-zero exit of an (elevated) filter command.
    ///
    /// Privilege failures come from three places: iptables itself (exit 4 with
    /// "Permission denied (you must be root)"), `sudo -n` without cached
    /// credentials, and pkexec/run0 refusing or dismissing authentication
    /// (exit 126/127).
    pub fn from_failure(stderr: &str, exit_code: Option<i32>) -> Self {
        let lower = stderr.to_lowercase();
        let denied = lower.contains("permission denied")
            || lower.contains("you must be root")
            || lower.contains("operation not permitted")
            || lower.contains("a password is required")
            || lower.contains("not authorized")
            || (matches!(exit_code, Some(126 | 127)) && lower.contains("auth"));

        let trimmed = stderr.trim().to_string();
        if denied {
            return GatewayError::PermissionDenied(trimmed);
        }

        let message = trimmed
            .lines()
            .next()
            .map_or_else(|| format!("exit code {exit_code:?}"), String::from);
        GatewayError::CommandFailed {
            message,
            stderr: Some(trimmed),
            exit_code,
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Known iptables failure messages and their translations
pub struct IptablesErrorPattern;

impl IptablesErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied")
            || lower.contains("you must be root")
            || lower.contains("a password is required")
        {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run fwadm as root, or make sure sudo/run0/pkexec can elevate")
                .with_suggestion("Force a method with FWADM_ELEVATION_METHOD=sudo|run0|pkexec")
                .with_suggestion("Check that CAP_NET_ADMIN is available in this environment");
        }

        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("iptables is not installed or not found in PATH")
                .with_suggestion("Install iptables: sudo apt install iptables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install iptables  (Fedora/RHEL)")
                .with_suggestion("Or: sudo pacman -S iptables  (Arch)");
        }

        if lower.contains("does a matching rule exist") || lower.contains("bad rule") {
            return ErrorTranslation::new("No matching rule exists in the packet filter")
                .with_suggestion("List the live rules with: fwadm --list --raw")
                .with_suggestion("The rule may have been removed by another tool");
        }

        if lower.contains("no chain/target/match by that name") {
            return ErrorTranslation::new("Chain, target or match module not available")
                .with_suggestion("Check loaded kernel modules: lsmod | grep -E 'ip_tables|nf_tables'")
                .with_suggestion("Load the filter table: sudo modprobe iptable_filter");
        }

        if lower.contains("resource temporarily unavailable") || lower.contains("xtables lock") {
            return ErrorTranslation::new("The xtables lock is held by another process")
                .with_suggestion("Another firewall manager may be running (firewalld, ufw)")
                .with_suggestion("Wait a moment and try again");
        }

        if lower.contains("port matching requires") {
            return ErrorTranslation::new("A port can only be matched for tcp or udp rules")
                .with_suggestion("Pass --protocol tcp or --protocol udp")
                .with_suggestion("Use port 0 to match every port");
        }

        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Check the audit log for the full failure record")
            .with_suggestion("Verify iptables is working: sudo iptables -S")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
