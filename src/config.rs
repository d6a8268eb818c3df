use crate::core::gateway::ConnectionTool;
use crate::utils::{default_snapshot_path, get_data_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User configuration, persisted as `<data_dir>/config.json`
///
/// Every field has a default so older or partial files keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Snapshot file used by `--save` and `--restore` unless `--file` is given
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Write the JSON-lines audit log
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
    /// `tracing` level when `-v` is not passed
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub connection_tool: ConnectionTool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            audit_enabled: true,
            log_level: default_log_level(),
            connection_tool: ConnectionTool::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Location of the config file, if a data directory exists
pub fn config_path() -> Option<PathBuf> {
    get_data_dir().map(|dir| dir.join("config.json"))
}

/// Saves the config atomically.
/// 1. Writes to a temporary file created with mode 0o600.
/// 2. Syncs it to disk.
/// 3. Atomically renames it over the target path.
///
/// # Errors
///
/// Returns any I/O or serialization error.
pub async fn save_config_to(path: &Path, config: &AppConfig) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let json = serde_json::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    // Permissions are set before any data is written
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&temp_path).await?;
    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e
        }
    })
}

/// Loads the config at `path`, or defaults if it is missing or unreadable.
pub async fn load_config_from(path: &Path) -> AppConfig {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => match serde_json::from_str::<AppConfig>(&json) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring invalid config {}: {e}", path.display());
                AppConfig::default()
            }
        },
        Err(_) => AppConfig::default(),
    }
}

/// Loads the user's config from the data directory.
pub async fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_config_from(&path).await,
        None => AppConfig::default(),
    }
}
